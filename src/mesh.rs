//! The triangle mesh type that crosses the kernel's boundary: a plain
//! indexed surface with a per-triangle face id and a precision tolerance,
//! independent of [`crate::connectivity::MeshConnectivity`] (which is a
//! transient working structure, not a storage format).

use std::collections::VecDeque;
use std::sync::RwLock;

use ahash::AHashMap;
use anyhow::Result;
use cache_access::cache_access;
use nalgebra::Vector3;

use crate::quadric::Point;

/// One triangle: three vertex indices in winding order and the opaque id
/// of the original surface it belongs to, preserved through simplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshTriangle {
    pub v: [usize; 3],
    pub face_id: u64,
}

#[derive(Default, Debug, Clone)]
struct InnerCache {
    face_normals: Option<Vec<Vector3<f64>>>,
    edges: Option<Vec<[usize; 2]>>,
    face_adjacency: Option<Vec<(usize, usize)>>,
}

/// An indexed triangle mesh: distinct vertex positions, triangles in
/// winding order with a preserved face id, and the linear precision
/// (model units) the mesh was built or simplified against.
#[derive(Debug)]
pub struct TriangleMesh {
    pub vertices: Vec<Point>,
    pub triangles: Vec<MeshTriangle>,
    pub precision: f64,

    _cache: RwLock<InnerCache>,
}

impl Clone for TriangleMesh {
    fn clone(&self) -> Self {
        Self {
            vertices: self.vertices.clone(),
            triangles: self.triangles.clone(),
            precision: self.precision,
            _cache: RwLock::new(InnerCache::default()),
        }
    }
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Point>, triangles: Vec<MeshTriangle>, precision: f64) -> Self {
        Self {
            vertices,
            triangles,
            precision,
            _cache: RwLock::new(InnerCache::default()),
        }
    }

    /// Build a mesh from `(face_id, v0, v1, v2)` tuples, for callers that
    /// don't want to construct [`MeshTriangle`] directly.
    pub fn from_faces(
        vertices: Vec<Point>,
        faces: &[(u64, usize, usize, usize)],
        precision: f64,
    ) -> Self {
        let triangles = faces
            .iter()
            .map(|&(face_id, v0, v1, v2)| MeshTriangle {
                v: [v0, v1, v2],
                face_id,
            })
            .collect();
        Self::new(vertices, triangles, precision)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    fn invalidate_cache(&mut self) {
        self._cache = RwLock::new(InnerCache::default());
    }

    /// The (non-normalized-input) face normal of each triangle.
    #[cache_access]
    pub fn face_normals(&self) -> Vec<Vector3<f64>> {
        self.triangles
            .iter()
            .map(|t| {
                let p0 = self.vertices[t.v[0]];
                let p1 = self.vertices[t.v[1]];
                let p2 = self.vertices[t.v[2]];
                crate::quadric::safe_normalize((p1 - p0).cross(&(p2 - p0)))
            })
            .collect()
    }

    /// The three directed edges of every triangle, flattened: `[t0e0,
    /// t0e1, t0e2, t1e0, ...]`.
    #[cache_access]
    pub fn edges(&self) -> Vec<[usize; 2]> {
        self.triangles
            .iter()
            .flat_map(|t| vec![[t.v[0], t.v[1]], [t.v[1], t.v[2]], [t.v[2], t.v[0]]])
            .collect()
    }

    /// Pairs of triangle indices that share an edge.
    #[cache_access]
    pub fn face_adjacency(&self) -> Vec<(usize, usize)> {
        let mut edge_map = AHashMap::new();
        let mut adjacency = Vec::new();

        for (i, edge) in self.edges().iter().enumerate() {
            let face_index = i / 3;
            let key = [edge[0].min(edge[1]), edge[0].max(edge[1])];
            if let Some(other) = edge_map.get(&key) {
                adjacency.push((*other, face_index));
            } else {
                edge_map.insert(key, face_index);
            }
        }

        adjacency
    }

    /// Axis-aligned bounding box, or an error if the mesh has no vertices.
    pub fn bounds(&self) -> Result<(Point, Point)> {
        if self.vertices.is_empty() {
            return Err(anyhow::anyhow!("mesh has no vertices"));
        }
        let (mut lower, mut upper) = (self.vertices[0], self.vertices[0]);
        for v in self.vertices.iter().skip(1) {
            lower = lower.inf(v);
            upper = upper.sup(v);
        }
        Ok((lower, upper))
    }

    /// Flips triangle winding within each connected component so that
    /// adjacent triangles traverse their shared edge in opposite
    /// directions (a consistent orientation). Run once after a rebuild,
    /// since contraction can leave triangles whose winding no longer
    /// agrees with neighbours that were rewired independently of them.
    pub fn unify_face_orientation(&mut self) {
        let n = self.triangles.len();
        if n == 0 {
            return;
        }
        let adjacency = self.face_adjacency();
        let mut adj_list: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(a, b) in &adjacency {
            adj_list[a].push(b);
            adj_list[b].push(a);
        }

        let mut visited = vec![false; n];
        for start in 0..n {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut queue = VecDeque::new();
            queue.push_back(start);
            while let Some(t) = queue.pop_front() {
                let t_edges = directed_edges(self.triangles[t].v);
                for &nb in &adj_list[t] {
                    if visited[nb] {
                        continue;
                    }
                    let nb_edges = directed_edges(self.triangles[nb].v);
                    let same_direction = t_edges.iter().any(|e| nb_edges.contains(e));
                    if same_direction {
                        self.triangles[nb].v.swap(1, 2);
                    }
                    visited[nb] = true;
                    queue.push_back(nb);
                }
            }
        }
        self.invalidate_cache();
    }
}

fn directed_edges(v: [usize; 3]) -> [(usize, usize); 3] {
    [(v[0], v[1]), (v[1], v[2]), (v[2], v[0])]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::relative_eq;

    fn unit_triangle() -> TriangleMesh {
        TriangleMesh::from_faces(
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
            ],
            &[(7, 0, 1, 2)],
            1e-3,
        )
    }

    #[test]
    fn face_normals_point_in_winding_direction() {
        let m = unit_triangle();
        let normals = m.face_normals();
        assert_eq!(normals.len(), 1);
        assert!(relative_eq!(
            normals[0],
            Vector3::new(0.0, 0.0, 1.0),
            epsilon = 1e-9
        ));
    }

    #[test]
    fn face_id_is_preserved_on_the_struct() {
        let m = unit_triangle();
        assert_eq!(m.triangles[0].face_id, 7);
    }

    #[test]
    fn bounds_of_single_triangle() {
        let m = unit_triangle();
        let (lower, upper) = m.bounds().unwrap();
        assert_eq!(lower, Point::new(0.0, 0.0, 0.0));
        assert_eq!(upper, Point::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn unify_orientation_flips_inconsistent_neighbour() {
        // Two triangles sharing edge (1,2), but both wound so that the
        // shared edge runs 1 -> 2 in the same direction from each side.
        let mut m = TriangleMesh::from_faces(
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(1.0, 1.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
            ],
            &[(0, 0, 1, 2), (0, 1, 2, 3)],
            1e-3,
        );
        m.unify_face_orientation();
        let t_edges = directed_edges(m.triangles[0].v);
        let nb_edges = directed_edges(m.triangles[1].v);
        assert!(!t_edges.iter().any(|e| nb_edges.contains(e)));
    }
}
