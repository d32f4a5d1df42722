//! The Garland-Heckbert decimation driver: builds [`crate::connectivity::MeshConnectivity`]
//! from an input [`crate::mesh::TriangleMesh`], prices every edge by its
//! accumulated vertex quadrics, and repeatedly contracts the cheapest edge
//! that survives the safety gauntlet until a target triangle count is
//! reached or no more edges are contractible.
//!
//! The simplifier exclusively owns the vertex quadrics and the min-heap;
//! [`crate::connectivity::MeshConnectivity`] only ever sees positions, ids
//! and the per-edge cost/optimal-point cache it stores on the simplifier's
//! behalf.

use anyhow::{bail, Result};
use tracing::trace;

use crate::connectivity::{AddTriangleOutcome, EdgeId, MeshConnectivity, TriangleId, VertexId};
use crate::consts;
use crate::heap::IndexedMinHeap;
use crate::mesh::{MeshTriangle, TriangleMesh};
use crate::quadric::{cross_and_area, safe_normalize, Point, Quadric};

/// Counters describing one simplification run, returned alongside the
/// reduced mesh since the caller otherwise has no way to tell a target
/// that was hit from one that was merely approached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyReport {
    pub initial_triangle_count: usize,
    pub final_triangle_count: usize,
    pub edges_contracted: usize,
    pub edges_rejected: usize,
}

/// An edge that passed every gauntlet check, with the data its contraction
/// needs already extracted so the gauntlet doesn't have to be re-run.
struct Contraction {
    v0: VertexId,
    v1: VertexId,
    t0: Option<TriangleId>,
    t1: Option<TriangleId>,
    p_star: Point,
}

/// Owns the working connectivity, the per-vertex quadrics and the
/// contraction-order heap for one simplification run.
pub struct Simplifier {
    connectivity: MeshConnectivity,
    quadrics: Vec<Quadric>,
    heap: IndexedMinHeap,
}

impl Simplifier {
    /// Reduces `mesh` toward `target_triangle_count` triangles, returning
    /// the simplified mesh and a report of what happened. Errors if `mesh`
    /// already contains a non-manifold edge; the simplifier only ever
    /// operates in manifold mode.
    pub fn run(mesh: &TriangleMesh, target_triangle_count: usize) -> Result<(TriangleMesh, SimplifyReport)> {
        let mut connectivity = MeshConnectivity::new(mesh.vertices.clone(), false);
        for t in &mesh.triangles {
            match connectivity.add_triangle(t.face_id, t.v[0], t.v[1], t.v[2]) {
                AddTriangleOutcome::Added(_) => {}
                AddTriangleOutcome::Degenerate => {
                    trace!(v = ?t.v, "skipping degenerate input triangle");
                }
                AddTriangleOutcome::NonManifold => {
                    bail!(
                        "input mesh already contains a non-manifold edge at triangle {:?}; \
                         the simplifier requires 2-manifold input",
                        t.v
                    );
                }
            }
        }

        let quadrics = vec![Quadric::zero(); connectivity.vertex_count()];
        let mut simplifier = Simplifier {
            connectivity,
            quadrics,
            heap: IndexedMinHeap::new(),
        };

        let initial_triangle_count = simplifier.connectivity.valid_triangle_count();
        simplifier.init_quadrics();
        simplifier.init_edge_costs();

        let mut report = SimplifyReport {
            initial_triangle_count,
            final_triangle_count: initial_triangle_count,
            edges_contracted: 0,
            edges_rejected: 0,
        };
        simplifier.contract_loop(target_triangle_count, &mut report);
        report.final_triangle_count = simplifier.connectivity.valid_triangle_count();

        let mesh = simplifier.rebuild_mesh(mesh.precision);
        Ok((mesh, report))
    }

    /// Phase A: every valid triangle's plane quadric, scaled by its area,
    /// onto each of its three vertices. Degenerate triangles contribute
    /// [`Quadric::zero`] via [`Quadric::from_triangle`] and are effectively
    /// skipped.
    fn init_quadrics(&mut self) {
        let triangles: Vec<TriangleId> = self.connectivity.valid_triangle_ids().collect();
        for t in triangles {
            let v = self.connectivity.triangle_vertices(t);
            let p0 = self.connectivity.vertex_position(v[0]);
            let p1 = self.connectivity.vertex_position(v[1]);
            let p2 = self.connectivity.vertex_position(v[2]);
            let q = Quadric::from_triangle(p0, p1, p2);
            self.connectivity.set_triangle_plane_quadric(t, q);
            for vid in v {
                self.quadrics[vid] = self.quadrics[vid].add(&q);
            }
        }
    }

    /// Phase B: price every edge and seed the heap.
    fn init_edge_costs(&mut self) {
        let edges: Vec<EdgeId> = self.connectivity.valid_edge_ids().collect();
        for e in edges {
            self.price_edge(e);
            let cost = self.connectivity.edge_cost(e);
            self.heap.push(e, cost);
        }
    }

    /// Recomputes `e`'s combined quadric, optimal point and cost, and
    /// writes them back onto the connectivity's edge record.
    fn price_edge(&mut self, e: EdgeId) {
        let (v0, v1) = self.connectivity.edge_endpoints(e);
        let q = self.quadrics[v0].add(&self.quadrics[v1]);
        let p0 = self.connectivity.vertex_position(v0);
        let p1 = self.connectivity.vertex_position(v1);

        let boundary = self.connectivity.is_boundary_edge(e);
        let v0_boundary = self.connectivity.is_boundary_vertex(v0);
        let v1_boundary = self.connectivity.is_boundary_vertex(v1);

        let optimal = if boundary {
            Point::from((p0.coords + p1.coords) / 2.0)
        } else if v0_boundary && !v1_boundary {
            p0
        } else if v1_boundary && !v0_boundary {
            p1
        } else {
            q.optimal(p0, p1)
        };
        let cost = q.evaluate(optimal) as f32;
        self.connectivity.set_edge_cost_and_optimal(e, cost, optimal);
    }

    /// Phase C: repeatedly pop the cheapest edge and contract it if it
    /// survives the gauntlet, until `target` triangles remain or the heap
    /// is exhausted.
    fn contract_loop(&mut self, target: usize, report: &mut SimplifyReport) {
        while self.connectivity.valid_triangle_count() > target {
            let Some((e, _)) = self.heap.pop_min() else {
                break;
            };
            if !self.connectivity.is_edge_valid(e) {
                // Invalidated by an earlier contraction while still sitting
                // stale in the heap.
                continue;
            }
            match self.check_gauntlet(e) {
                Some(c) => self.contract(e, c, report),
                None => report.edges_rejected += 1,
            }
        }
    }

    /// Runs every safety-gauntlet check for edge `e`. Returns the data a
    /// contraction needs when all checks pass, `None` otherwise.
    fn check_gauntlet(&self, e: EdgeId) -> Option<Contraction> {
        let (v0, v1) = self.connectivity.edge_endpoints(e);
        let (t0, t1) = self.connectivity.get_edge_triangles(e);
        let p_star = self.connectivity.edge_optimal(e);

        let edge_is_boundary = t0.is_some() != t1.is_some();
        let v0_boundary = self.connectivity.is_boundary_vertex(v0);
        let v1_boundary = self.connectivity.is_boundary_vertex(v1);

        // Two-boundary-endpoints rule: an interior edge whose two endpoints
        // both sit on the boundary would pinch two separate boundary loops
        // together.
        if !edge_is_boundary && v0_boundary && v1_boundary {
            return None;
        }

        match (t0, t1) {
            (Some(t0id), Some(t1id)) => {
                let other0 = third_vertex(&self.connectivity, t0id, v0, v1);
                let other1 = third_vertex(&self.connectivity, t1id, v0, v1);
                if other0 == other1 {
                    return None;
                }
                if self.shares_forbidden_neighbour(v0, v1, t0, t1) {
                    return None;
                }
                if self.would_split_one_ring(v0, v1, other0, other1)
                    || self.would_split_one_ring(v1, v0, other0, other1)
                {
                    return None;
                }
            }
            (Some(tid), None) | (None, Some(tid)) => {
                // Manifoldness test (ii): contracting a boundary edge whose
                // lone triangle has another boundary edge would seal a hole.
                for oe in self.connectivity.triangle_edges(tid).into_iter().flatten() {
                    if oe != e && self.connectivity.is_boundary_edge(oe) {
                        return None;
                    }
                }
                if self.shares_forbidden_neighbour(v0, v1, t0, t1) {
                    return None;
                }
            }
            (None, None) => unreachable!("a valid edge always has at least one incident triangle"),
        }

        if self.normal_flip_test(v0, v1, p_star, t0, t1) {
            return None;
        }

        Some(Contraction { v0, v1, t0, t1, p_star })
    }

    /// Neighbourhood test and link condition, collapsed into one predicate:
    /// any vertex that is a one-ring neighbour of both `v0` and `v1` must
    /// already belong to `t0` or `t1`, or contracting the edge would give
    /// some edge a third incident triangle.
    fn shares_forbidden_neighbour(
        &self,
        v0: VertexId,
        v1: VertexId,
        t0: Option<TriangleId>,
        t1: Option<TriangleId>,
    ) -> bool {
        let nb0 = self.one_ring(v0);
        let nb1 = self.one_ring(v1);
        for &n in &nb0 {
            if n == v1 {
                continue;
            }
            if !nb1.contains(&n) {
                continue;
            }
            let in_t0 = t0.is_some_and(|t| self.connectivity.triangle_has_vertex(t, n));
            let in_t1 = t1.is_some_and(|t| self.connectivity.triangle_has_vertex(t, n));
            if !in_t0 && !in_t1 {
                return true;
            }
        }
        false
    }

    /// Manifoldness test (i): when `apex` has interior valence 3 (its
    /// one-ring is exactly `{other_end, other0, other1}`) and the edge
    /// between `other0` and `other1` is itself interior with one incident
    /// triangle touching `apex` and the other touching `other_end`,
    /// contracting `(apex, other_end)` would weld two triangles into the
    /// same vertex triple, splitting the one-ring into two sheets joined
    /// only along an edge.
    fn would_split_one_ring(
        &self,
        apex: VertexId,
        other_end: VertexId,
        other0: VertexId,
        other1: VertexId,
    ) -> bool {
        if self.connectivity.is_boundary_vertex(apex) {
            return false;
        }
        if self.connectivity.get_vertex_edges(apex).len() != 3 {
            return false;
        }
        let Some(opp) = self.connectivity.find_edge(other0, other1) else {
            return false;
        };
        if !self.connectivity.is_edge_valid(opp) || self.connectivity.is_boundary_edge(opp) {
            return false;
        }
        let (ta, tb) = self.connectivity.get_edge_triangles(opp);
        let touches = |t: Option<TriangleId>, v: VertexId| {
            t.is_some_and(|t| self.connectivity.triangle_has_vertex(t, v))
        };
        (touches(ta, apex) && touches(tb, other_end)) || (touches(tb, apex) && touches(ta, other_end))
    }

    /// For every valid triangle incident on `v0` or `v1`, other than `t0`
    /// and `t1`, compares its current normal against the normal it would
    /// have if whichever of `v0`/`v1` it touches moved to `p_star`.
    /// Triangles whose current cross product is already near-degenerate
    /// are skipped, since they have no reliable normal to flip.
    fn normal_flip_test(
        &self,
        v0: VertexId,
        v1: VertexId,
        p_star: Point,
        t0: Option<TriangleId>,
        t1: Option<TriangleId>,
    ) -> bool {
        let mut triangles = self.connectivity.get_vertex_triangles(v0);
        for t in self.connectivity.get_vertex_triangles(v1) {
            if !triangles.contains(&t) {
                triangles.push(t);
            }
        }
        for t in triangles {
            if Some(t) == t0 || Some(t) == t1 {
                continue;
            }
            let verts = self.connectivity.triangle_vertices(t);
            let before: Vec<Point> = verts.iter().map(|&v| self.connectivity.vertex_position(v)).collect();
            let (cross_before, _) = cross_and_area(before[0], before[1], before[2]);
            if cross_before.norm() < consts::MIN_TRIANGLE_AREA {
                continue;
            }
            let after: Vec<Point> = verts
                .iter()
                .map(|&v| {
                    if v == v0 || v == v1 {
                        p_star
                    } else {
                        self.connectivity.vertex_position(v)
                    }
                })
                .collect();
            let (cross_after, _) = cross_and_area(after[0], after[1], after[2]);
            let n_before = safe_normalize(cross_before);
            let n_after = safe_normalize(cross_after);
            if n_before.dot(&n_after) < consts::NORMAL_FLIP_DOT_THRESHOLD {
                return true;
            }
        }
        false
    }

    fn one_ring(&self, v: VertexId) -> Vec<VertexId> {
        self.connectivity
            .get_vertex_edges(v)
            .iter()
            .filter(|&&e| self.connectivity.is_edge_valid(e))
            .map(|&e| self.connectivity.get_other_vertex(e, v))
            .collect()
    }

    /// Moves `v0` to `p_star`, folds `v1`'s quadric into it, rewires every
    /// triangle and edge that touched `v1` onto `v0`, and re-prices
    /// whatever still touches `v0` afterward.
    fn contract(&mut self, e: EdgeId, c: Contraction, report: &mut SimplifyReport) {
        let Contraction { v0, v1, p_star, .. } = c;

        let v1_triangles = self.connectivity.get_vertex_triangles(v1);
        let v1_edges: Vec<EdgeId> = self.connectivity.get_vertex_edges(v1).to_vec();

        self.connectivity.set_vertex_position(v0, p_star);
        self.quadrics[v0] = self.quadrics[v0].add(&self.quadrics[v1]);

        for t in v1_triangles {
            if self.connectivity.is_triangle_valid(t) {
                self.connectivity.replace_triangle_vertex(t, v1, v0);
            }
        }
        for eid in v1_edges {
            if self.connectivity.is_edge_valid(eid) {
                self.connectivity.replace_edge_vertex(eid, v1, v0);
            }
        }
        self.connectivity.invalidate_vertex(v1);
        debug_assert!(
            !self.connectivity.is_edge_valid(e),
            "contracted edge should have been removed as a side effect of invalidating its triangles"
        );

        for eid in self.connectivity.get_vertex_edges(v0).to_vec() {
            if self.connectivity.is_edge_valid(eid) {
                self.price_edge(eid);
                let cost = self.connectivity.edge_cost(eid);
                self.heap.push_or_update(eid, cost);
            }
        }
        report.edges_contracted += 1;
    }

    /// Phase D: rebuild a dense [`TriangleMesh`] from whatever survived,
    /// remapping vertex ids and preserving face ids, then unify winding
    /// across the result.
    fn rebuild_mesh(&self, precision: f64) -> TriangleMesh {
        let mut remap = vec![usize::MAX; self.connectivity.vertex_count()];
        let mut vertices = Vec::new();
        for v in self.connectivity.valid_vertex_ids() {
            remap[v] = vertices.len();
            vertices.push(self.connectivity.vertex_position(v));
        }

        let mut triangles = Vec::new();
        for t in self.connectivity.valid_triangle_ids() {
            let v = self.connectivity.triangle_vertices(t);
            triangles.push(MeshTriangle {
                v: [remap[v[0]], remap[v[1]], remap[v[2]]],
                face_id: self.connectivity.triangle_face_id(t),
            });
        }

        let mut mesh = TriangleMesh::new(vertices, triangles, precision);
        mesh.unify_face_orientation();
        mesh
    }
}

fn third_vertex(connectivity: &MeshConnectivity, t: TriangleId, v0: VertexId, v1: VertexId) -> VertexId {
    connectivity
        .triangle_vertices(t)
        .into_iter()
        .find(|&v| v != v0 && v != v1)
        .expect("triangle incident on edge (v0, v1) must have a third vertex")
}
