//! Central adjacency store for a triangle mesh: triangles, edges and the
//! vertex -> edge incidence index. Entities are addressed by dense integer
//! ids in flat `Vec`s; removals set a `valid` flag rather than renumbering,
//! so ids stay stable for the lifetime of one connectivity instance (and so
//! the simplifier's heap can hold stale edge ids across removals).

use ahash::AHashMap;
use itertools::Itertools;

use crate::quadric::{Point, Quadric};

pub type VertexId = usize;
pub type EdgeId = usize;
pub type TriangleId = usize;

/// Result of [`MeshConnectivity::add_triangle`]: success, or which of the
/// two rejection reasons applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTriangleOutcome {
    Added(TriangleId),
    /// Two of the triangle's three vertex ids were equal.
    Degenerate,
    /// Adding this triangle would give some edge a third incident
    /// triangle, which manifold mode rejects.
    NonManifold,
}

impl AddTriangleOutcome {
    pub fn triangle_id(self) -> Option<TriangleId> {
        match self {
            AddTriangleOutcome::Added(t) => Some(t),
            _ => None,
        }
    }
}

fn canon(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone)]
struct VertexRec {
    position: Point,
    valid: bool,
}

#[derive(Debug, Clone)]
struct EdgeRec {
    v0: VertexId,
    v1: VertexId,
    t0: Option<TriangleId>,
    t1: Option<TriangleId>,
    valid: bool,
    /// Cached contraction cost and optimal point, written by the
    /// simplifier's costing pass and read back during the contraction loop.
    cost: f32,
    optimal: Point,
}

#[derive(Debug, Clone)]
struct TriangleRec {
    v: [VertexId; 3],
    e: [Option<EdgeId>; 3],
    face_id: u64,
    valid: bool,
    plane_quadric: Quadric,
}

/// The mesh-connectivity data structure of spec section 4.3. One instance
/// exclusively owns its triangles, edges and vertex-edge adjacency for the
/// duration of a simplification run; it is not thread-safe and is not
/// meant to be shared across runs.
#[derive(Debug)]
pub struct MeshConnectivity {
    vertices: Vec<VertexRec>,
    edges: Vec<EdgeRec>,
    triangles: Vec<TriangleRec>,
    edge_lookup: AHashMap<(VertexId, VertexId), EdgeId>,
    vertex_edges: Vec<Vec<EdgeId>>,
    allow_non_manifold: bool,
}

impl MeshConnectivity {
    /// `allow_non_manifold` governs whether a third-or-later triangle
    /// observed on the same edge is rejected (manifold mode, `false`) or
    /// accepted (`true`). In non-manifold mode a triangle beyond the second
    /// still gets its own edge id in its `.e` slot, but the edge's `t0`/`t1`
    /// reverse pointers only ever track the first two observations — a
    /// third-or-later triangle on that edge is not discoverable from
    /// [`MeshConnectivity::get_edge_triangles`]. The simplifier never
    /// exercises this path: it always builds with `allow_non_manifold =
    /// false` and treats a rejected attach during construction as proof the
    /// input already contained a non-manifold edge.
    pub fn new(positions: Vec<Point>, allow_non_manifold: bool) -> Self {
        let n = positions.len();
        Self {
            vertices: positions
                .into_iter()
                .map(|position| VertexRec {
                    position,
                    valid: true,
                })
                .collect(),
            edges: Vec::new(),
            triangles: Vec::new(),
            edge_lookup: AHashMap::new(),
            vertex_edges: vec![Vec::new(); n],
            allow_non_manifold,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    // ---- triangle/edge mutation -------------------------------------

    /// Rejects a triangle with a repeated vertex id (degenerate) or, in
    /// manifold mode, one that would make some edge non-manifold.
    /// Otherwise attaches to (or creates) each of the three edges and
    /// returns the new triangle id.
    pub fn add_triangle(
        &mut self,
        face_id: u64,
        v0: VertexId,
        v1: VertexId,
        v2: VertexId,
    ) -> AddTriangleOutcome {
        if v0 == v1 || v1 == v2 || v0 == v2 {
            return AddTriangleOutcome::Degenerate;
        }
        let pairs = [(v0, v1), (v1, v2), (v2, v0)];
        if !self.allow_non_manifold {
            for &(a, b) in &pairs {
                let key = canon(a, b);
                if let Some(&eid) = self.edge_lookup.get(&key) {
                    let edge = &self.edges[eid];
                    if edge.valid && edge.t0.is_some() && edge.t1.is_some() {
                        return AddTriangleOutcome::NonManifold;
                    }
                }
            }
        }
        let t = self.triangles.len();
        let mut e = [None; 3];
        for (i, &(a, b)) in pairs.iter().enumerate() {
            e[i] = Some(self.attach_or_create_edge(a, b, t));
        }
        self.triangles.push(TriangleRec {
            v: [v0, v1, v2],
            e,
            face_id,
            valid: true,
            plane_quadric: Quadric::zero(),
        });
        AddTriangleOutcome::Added(t)
    }

    fn attach_or_create_edge(&mut self, a: VertexId, b: VertexId, t: TriangleId) -> EdgeId {
        let key = canon(a, b);
        if let Some(&eid) = self.edge_lookup.get(&key) {
            let edge = &mut self.edges[eid];
            if edge.t0.is_none() {
                edge.t0 = Some(t);
            } else if edge.t1.is_none() {
                edge.t1 = Some(t);
            }
            eid
        } else {
            let eid = self.edges.len();
            self.edges.push(EdgeRec {
                v0: key.0,
                v1: key.1,
                t0: Some(t),
                t1: None,
                valid: true,
                cost: f32::INFINITY,
                optimal: self.vertices[key.0].position,
            });
            self.edge_lookup.insert(key, eid);
            self.vertex_edges[key.0].push(eid);
            self.vertex_edges[key.1].push(eid);
            eid
        }
    }

    /// Clears the triangle and detaches it from each edge, promoting `t1`
    /// into `t0` when possible. Edges that end up with no incident
    /// triangles are removed. Idempotent: removing an already-invalid or
    /// unknown id is a no-op.
    pub fn remove_triangle(&mut self, t: TriangleId) {
        if t >= self.triangles.len() || !self.triangles[t].valid {
            return;
        }
        self.triangles[t].valid = false;
        let edges = self.triangles[t].e;
        for e in edges.into_iter().flatten() {
            if self.edges[e].valid {
                let orphaned = self.detach_edge_triangle(e, t);
                if orphaned {
                    self.remove_edge_internal(e);
                }
            }
        }
    }

    fn detach_edge_triangle(&mut self, e: EdgeId, t: TriangleId) -> bool {
        let edge = &mut self.edges[e];
        if edge.t0 == Some(t) {
            edge.t0 = edge.t1;
            edge.t1 = None;
        } else if edge.t1 == Some(t) {
            edge.t1 = None;
        }
        edge.t0.is_none() && edge.t1.is_none()
    }

    fn remove_edge_internal(&mut self, e: EdgeId) {
        if !self.edges[e].valid {
            return;
        }
        self.edges[e].valid = false;
        let (v0, v1) = (self.edges[e].v0, self.edges[e].v1);
        self.edge_lookup.remove(&(v0, v1));
        self.remove_vertex_edge(v0, e);
        self.remove_vertex_edge(v1, e);
    }

    fn remove_vertex_edge(&mut self, v: VertexId, e: EdgeId) {
        if let Some(pos) = self.vertex_edges[v].iter().position(|&x| x == e) {
            self.vertex_edges[v].swap_remove(pos);
        }
    }

    /// Removes the edge and nulls it out of every triangle that referenced
    /// it. A triangle whose three edge slots all become empty, or whose
    /// edge triple ends up with a duplicate, is also invalidated and
    /// removed (cascading). Idempotent on unknown/invalid ids.
    pub fn remove_edge(&mut self, e: EdgeId) {
        if e >= self.edges.len() || !self.edges[e].valid {
            return;
        }
        let edge = self.edges[e].clone();
        for tid in [edge.t0, edge.t1].into_iter().flatten() {
            if tid < self.triangles.len() && self.triangles[tid].valid {
                for slot in self.triangles[tid].e.iter_mut() {
                    if *slot == Some(e) {
                        *slot = None;
                    }
                }
                let present: Vec<EdgeId> = self.triangles[tid].e.iter().flatten().copied().collect();
                if present.is_empty() || !present.iter().all_unique() {
                    self.remove_triangle(tid);
                }
            }
        }
        self.remove_edge_internal(e);
    }

    /// Rewrites `old` to `new` across the triangle's vertex triple. If the
    /// result is degenerate the triangle is invalidated (and `false`
    /// returned); otherwise it is detached from its old edges and
    /// reattached against the new vertex triple.
    pub fn replace_triangle_vertex(&mut self, t: TriangleId, old: VertexId, new: VertexId) -> bool {
        assert!(
            self.triangles[t].valid,
            "MeshConnectivity::replace_triangle_vertex: triangle {t} is not valid"
        );
        let tri = self.triangles[t].clone();
        let mut v = tri.v;
        let mut found = false;
        for slot in v.iter_mut() {
            if *slot == old {
                *slot = new;
                found = true;
            }
        }
        assert!(
            found,
            "MeshConnectivity::replace_triangle_vertex: vertex {old} is not on triangle {t}"
        );
        if v[0] == v[1] || v[1] == v[2] || v[0] == v[2] {
            self.remove_triangle(t);
            return false;
        }
        for e in tri.e.into_iter().flatten() {
            if self.edges[e].valid {
                let orphaned = self.detach_edge_triangle(e, t);
                if orphaned {
                    self.remove_edge_internal(e);
                }
            }
        }
        let pairs = [(v[0], v[1]), (v[1], v[2]), (v[2], v[0])];
        let mut e = [None; 3];
        for (i, &(a, b)) in pairs.iter().enumerate() {
            e[i] = Some(self.attach_or_create_edge(a, b, t));
        }
        self.triangles[t].v = v;
        self.triangles[t].e = e;
        true
    }

    /// Updates an edge's canonical key from `old` to `new` and
    /// re-registers vertex-edge incidence. If the rewrite would leave both
    /// endpoints equal, the edge is removed instead and `false` is
    /// returned.
    pub fn replace_edge_vertex(&mut self, e: EdgeId, old: VertexId, new: VertexId) -> bool {
        if e >= self.edges.len() || !self.edges[e].valid {
            return false;
        }
        let edge = self.edges[e].clone();
        let mut a = edge.v0;
        let mut b = edge.v1;
        if a == old {
            a = new;
        } else if b == old {
            b = new;
        } else {
            panic!("MeshConnectivity::replace_edge_vertex: vertex {old} is not on edge {e}");
        }
        if a == b {
            self.remove_edge(e);
            return false;
        }
        let (na, nb) = canon(a, b);
        self.remove_vertex_edge(old, e);
        if !self.vertex_edges[new].contains(&e) {
            self.vertex_edges[new].push(e);
        }
        self.edge_lookup.remove(&(edge.v0, edge.v1));
        self.edges[e].v0 = na;
        self.edges[e].v1 = nb;
        self.edge_lookup.insert((na, nb), e);
        true
    }

    // ---- read-only accessors ------------------------------------------

    pub fn find_edge(&self, a: VertexId, b: VertexId) -> Option<EdgeId> {
        self.edge_lookup.get(&canon(a, b)).copied()
    }

    pub fn edge_endpoints(&self, e: EdgeId) -> (VertexId, VertexId) {
        (self.edges[e].v0, self.edges[e].v1)
    }

    pub fn get_edge_triangles(&self, e: EdgeId) -> (Option<TriangleId>, Option<TriangleId>) {
        (self.edges[e].t0, self.edges[e].t1)
    }

    pub fn get_vertex_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.vertex_edges[v]
    }

    pub fn get_vertex_triangles(&self, v: VertexId) -> Vec<TriangleId> {
        let mut out = Vec::new();
        for &e in &self.vertex_edges[v] {
            if !self.edges[e].valid {
                continue;
            }
            for tid in [self.edges[e].t0, self.edges[e].t1].into_iter().flatten() {
                if self.triangles[tid].valid && !out.contains(&tid) {
                    out.push(tid);
                }
            }
        }
        out
    }

    pub fn get_other_vertex(&self, e: EdgeId, v: VertexId) -> VertexId {
        let edge = &self.edges[e];
        if edge.v0 == v {
            edge.v1
        } else if edge.v1 == v {
            edge.v0
        } else {
            panic!("MeshConnectivity::get_other_vertex: vertex {v} is not on edge {e}")
        }
    }

    pub fn triangle_has_vertex(&self, t: TriangleId, v: VertexId) -> bool {
        self.triangles[t].v.contains(&v)
    }

    pub fn is_boundary_edge(&self, e: EdgeId) -> bool {
        let edge = &self.edges[e];
        edge.t0.is_some() != edge.t1.is_some()
    }

    pub fn is_boundary_vertex(&self, v: VertexId) -> bool {
        self.vertex_edges[v]
            .iter()
            .any(|&e| self.edges[e].valid && self.is_boundary_edge(e))
    }

    pub fn is_vertex_valid(&self, v: VertexId) -> bool {
        self.vertices[v].valid
    }

    pub fn is_edge_valid(&self, e: EdgeId) -> bool {
        e < self.edges.len() && self.edges[e].valid
    }

    pub fn is_triangle_valid(&self, t: TriangleId) -> bool {
        t < self.triangles.len() && self.triangles[t].valid
    }

    pub fn vertex_position(&self, v: VertexId) -> Point {
        self.vertices[v].position
    }

    pub fn set_vertex_position(&mut self, v: VertexId, p: Point) {
        self.vertices[v].position = p;
    }

    pub fn invalidate_vertex(&mut self, v: VertexId) {
        self.vertices[v].valid = false;
    }

    pub fn triangle_vertices(&self, t: TriangleId) -> [VertexId; 3] {
        self.triangles[t].v
    }

    pub fn triangle_edges(&self, t: TriangleId) -> [Option<EdgeId>; 3] {
        self.triangles[t].e
    }

    pub fn triangle_face_id(&self, t: TriangleId) -> u64 {
        self.triangles[t].face_id
    }

    pub fn triangle_plane_quadric(&self, t: TriangleId) -> Quadric {
        self.triangles[t].plane_quadric
    }

    pub fn set_triangle_plane_quadric(&mut self, t: TriangleId, q: Quadric) {
        self.triangles[t].plane_quadric = q;
    }

    pub fn edge_cost(&self, e: EdgeId) -> f32 {
        self.edges[e].cost
    }

    pub fn edge_optimal(&self, e: EdgeId) -> Point {
        self.edges[e].optimal
    }

    pub fn set_edge_cost_and_optimal(&mut self, e: EdgeId, cost: f32, optimal: Point) {
        self.edges[e].cost = cost;
        self.edges[e].optimal = optimal;
    }

    pub fn valid_triangle_ids(&self) -> impl Iterator<Item = TriangleId> + '_ {
        (0..self.triangles.len()).filter(move |&t| self.triangles[t].valid)
    }

    pub fn valid_vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).filter(move |&v| self.vertices[v].valid)
    }

    pub fn valid_edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edges.len()).filter(move |&e| self.edges[e].valid)
    }

    pub fn valid_triangle_count(&self) -> usize {
        self.valid_triangle_ids().count()
    }

    /// Checks every invariant of spec section 8 that applies to live
    /// connectivity state. Intended for tests and debug-mode assertions,
    /// not the simplification hot path.
    pub fn validate(&self) -> Result<(), String> {
        for e in self.valid_edge_ids() {
            let edge = &self.edges[e];
            if edge.v0 >= edge.v1 {
                return Err(format!("edge {e} is not canonical: ({}, {})", edge.v0, edge.v1));
            }
            if self.edge_lookup.get(&(edge.v0, edge.v1)) != Some(&e) {
                return Err(format!("edge {e} is not the canonical entry for its key"));
            }
            match (edge.t0, edge.t1) {
                (None, None) => return Err(format!("edge {e} has no incident triangles")),
                (None, Some(_)) => return Err(format!("edge {e} has t1 set but not t0")),
                _ => {}
            }
            for v in [edge.v0, edge.v1] {
                if !self.vertex_edges[v].contains(&e) {
                    return Err(format!("vertex {v} incidence list is missing edge {e}"));
                }
            }
        }
        for v in self.valid_vertex_ids() {
            for &e in &self.vertex_edges[v] {
                if self.edges[e].valid {
                    let (a, b) = (self.edges[e].v0, self.edges[e].v1);
                    if a != v && b != v {
                        return Err(format!("vertex {v} lists edge {e} that does not touch it"));
                    }
                }
            }
        }
        for t in self.valid_triangle_ids() {
            let tri = &self.triangles[t];
            if tri.v[0] == tri.v[1] || tri.v[1] == tri.v[2] || tri.v[0] == tri.v[2] {
                return Err(format!("triangle {t} is degenerate: {:?}", tri.v));
            }
            for (i, e) in tri.e.iter().enumerate() {
                let e = e.ok_or_else(|| format!("triangle {t} is missing edge slot {i}"))?;
                if !self.edges[e].valid {
                    return Err(format!("triangle {t} references invalid edge {e}"));
                }
                let (a, b) = canon(tri.v[i], tri.v[(i + 1) % 3]);
                let (ea, eb) = (self.edges[e].v0, self.edges[e].v1);
                if (a, b) != (ea, eb) {
                    return Err(format!(
                        "triangle {t} edge slot {i} endpoints ({a},{b}) mismatch edge {e} ({ea},{eb})"
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadric::Point;

    fn triangle_positions() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn add_triangle_rejects_degenerate() {
        let mut c = MeshConnectivity::new(triangle_positions(), false);
        assert_eq!(c.add_triangle(0, 0, 0, 1), AddTriangleOutcome::Degenerate);
    }

    #[test]
    fn shared_edge_tracks_both_triangles() {
        let mut c = MeshConnectivity::new(triangle_positions(), false);
        let t0 = c.add_triangle(1, 0, 1, 2).triangle_id().unwrap();
        let t1 = c.add_triangle(1, 1, 3, 2).triangle_id().unwrap();
        let shared = c.find_edge(1, 2).unwrap();
        let (a, b) = c.get_edge_triangles(shared);
        assert_eq!((a, b), (Some(t0), Some(t1)));
        assert!(!c.is_boundary_edge(shared));
        assert!(c.is_boundary_edge(c.find_edge(0, 1).unwrap()));
        c.validate().unwrap();
    }

    #[test]
    fn third_observation_rejected_in_manifold_mode() {
        let mut positions = triangle_positions();
        positions.push(Point::new(0.5, 0.5, 1.0));
        let mut c = MeshConnectivity::new(positions, false);
        c.add_triangle(0, 0, 1, 2).triangle_id().unwrap();
        c.add_triangle(0, 1, 3, 2).triangle_id().unwrap();
        assert_eq!(
            c.add_triangle(0, 0, 1, 4),
            AddTriangleOutcome::NonManifold
        );
    }

    #[test]
    fn remove_triangle_orphans_its_edges() {
        let mut c = MeshConnectivity::new(triangle_positions(), false);
        let t = c.add_triangle(0, 0, 1, 2).triangle_id().unwrap();
        let e = c.find_edge(0, 1).unwrap();
        c.remove_triangle(t);
        assert!(!c.is_edge_valid(e));
        assert!(c.get_vertex_edges(0).is_empty());
    }

    #[test]
    fn replace_triangle_vertex_rewires_edges() {
        let mut c = MeshConnectivity::new(triangle_positions(), false);
        let t = c.add_triangle(0, 0, 1, 2).triangle_id().unwrap();
        assert!(c.replace_triangle_vertex(t, 2, 3));
        assert_eq!(c.triangle_vertices(t), [0, 1, 3]);
        assert!(c.find_edge(0, 3).is_some());
        assert!(c.find_edge(0, 2).is_none());
        c.validate().unwrap();
    }

    #[test]
    fn replace_triangle_vertex_invalidates_on_degenerate_result() {
        let mut c = MeshConnectivity::new(triangle_positions(), false);
        let t = c.add_triangle(0, 0, 1, 2).triangle_id().unwrap();
        assert!(!c.replace_triangle_vertex(t, 2, 1));
        assert!(!c.is_triangle_valid(t));
    }
}
