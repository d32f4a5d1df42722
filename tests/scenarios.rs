//! End-to-end mesh-level scenarios that don't fit naturally into a single
//! module's unit tests: they exercise `Simplifier::run` and
//! `MeshConnectivity::validate` together across a whole reduction.

use std::collections::{HashMap, HashSet};

use approx::relative_eq;
use bim_mesh_kernel::connectivity::MeshConnectivity;
use bim_mesh_kernel::deflection::{DeflectionPolicy, DeflectionSettings, ProfileKind, SweepKind};
use bim_mesh_kernel::mesh::TriangleMesh;
use bim_mesh_kernel::quadric::{Point, Quadric};
use bim_mesh_kernel::simplify::Simplifier;

fn face_key(face_id: u64, mut v: [usize; 3]) -> (u64, [usize; 3]) {
    v.sort_unstable();
    (face_id, v)
}

fn boundary_edges(mesh: &TriangleMesh) -> HashSet<(usize, usize)> {
    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for t in &mesh.triangles {
        for i in 0..3 {
            let a = t.v[i];
            let b = t.v[(i + 1) % 3];
            let key = (a.min(b), a.max(b));
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts.into_iter().filter(|&(_, c)| c == 1).map(|(k, _)| k).collect()
}

/// Tetrahedron identity: simplifying to the input's own triangle count
/// returns an isomorphic mesh.
#[test]
fn tetrahedron_identity() {
    let vertices = vec![
        Point::new(0.0, 0.0, 0.0),
        Point::new(1.0, 0.0, 0.0),
        Point::new(0.0, 1.0, 0.0),
        Point::new(0.0, 0.0, 1.0),
    ];
    let faces = [(0u64, 0, 1, 2), (1, 0, 3, 1), (2, 1, 3, 2), (3, 2, 3, 0)];
    let mesh = TriangleMesh::from_faces(vertices.clone(), &faces, 1e-6);

    let (out, report) = Simplifier::run(&mesh, 4).unwrap();

    assert_eq!(out.triangle_count(), 4);
    assert_eq!(report.edges_contracted, 0);

    let in_faces: HashSet<_> = faces.iter().map(|&(f, a, b, c)| face_key(f, [a, b, c])).collect();
    let out_faces: HashSet<_> = out
        .triangles
        .iter()
        .map(|t| face_key(t.face_id, t.v))
        .collect();
    assert_eq!(in_faces, out_faces);

    let in_positions: HashSet<[u64; 3]> = vertices.iter().map(bit_key).collect();
    let out_positions: HashSet<[u64; 3]> = out.vertices.iter().map(bit_key).collect();
    assert_eq!(in_positions, out_positions);
}

fn bit_key(p: &Point) -> [u64; 3] {
    [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
}

fn icosahedron() -> TriangleMesh {
    // Standard unit icosahedron construction via the golden ratio.
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let raw = [
        (-1.0, phi, 0.0),
        (1.0, phi, 0.0),
        (-1.0, -phi, 0.0),
        (1.0, -phi, 0.0),
        (0.0, -1.0, phi),
        (0.0, 1.0, phi),
        (0.0, -1.0, -phi),
        (0.0, 1.0, -phi),
        (phi, 0.0, -1.0),
        (phi, 0.0, 1.0),
        (-phi, 0.0, -1.0),
        (-phi, 0.0, 1.0),
    ];
    let vertices: Vec<Point> = raw
        .iter()
        .map(|&(x, y, z)| {
            let len = (x * x + y * y + z * z).sqrt();
            Point::new(x / len, y / len, z / len)
        })
        .collect();
    let faces: [(u64, usize, usize, usize); 20] = [
        (0, 0, 11, 5),
        (1, 0, 5, 1),
        (2, 0, 1, 7),
        (3, 0, 7, 10),
        (4, 0, 10, 11),
        (5, 1, 5, 9),
        (6, 5, 11, 4),
        (7, 11, 10, 2),
        (8, 10, 7, 6),
        (9, 7, 1, 8),
        (10, 3, 9, 4),
        (11, 3, 4, 2),
        (12, 3, 2, 6),
        (13, 3, 6, 8),
        (14, 3, 8, 9),
        (15, 4, 9, 5),
        (16, 2, 4, 11),
        (17, 6, 2, 10),
        (18, 8, 6, 7),
        (19, 9, 8, 1),
    ];
    TriangleMesh::from_faces(vertices, &faces, 1e-6)
}

/// Regular icosahedron down to octahedron-scale: 20 triangles reduced to
/// 8, every connectivity invariant still holding, and every surviving
/// triangle's normal reasonably close to some original face normal.
#[test]
fn icosahedron_down_to_octahedron_scale() {
    let mesh = icosahedron();
    let original_normals = mesh.face_normals();

    let (out, report) = Simplifier::run(&mesh, 8).unwrap();
    assert_eq!(out.triangle_count(), 8);
    assert!(report.final_triangle_count <= report.initial_triangle_count);

    let mut connectivity = MeshConnectivity::new(out.vertices.clone(), false);
    for t in &out.triangles {
        connectivity.add_triangle(t.face_id, t.v[0], t.v[1], t.v[2]);
    }
    connectivity.validate().expect("simplified icosahedron must still be a valid 2-manifold");

    let out_normals = out.face_normals();
    for n in &out_normals {
        let best = original_normals
            .iter()
            .map(|o| n.dot(o))
            .fold(f64::MIN, f64::max);
        assert!(best >= 0.8, "face normal drifted too far from every original: best dot {best}");
    }
}

/// Boundary preservation: an open 10x10 grid of quads (200 triangles)
/// simplified to 50 keeps its boundary vertex loop identical.
#[test]
fn boundary_preservation_on_an_open_grid() {
    let n = 11;
    let mut vertices = Vec::new();
    for y in 0..n {
        for x in 0..n {
            vertices.push(Point::new(x as f64, y as f64, 0.0));
        }
    }
    let idx = |x: usize, y: usize| y * n + x;
    let mut faces = Vec::new();
    let mut face_id = 0u64;
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            faces.push((face_id, idx(x, y), idx(x + 1, y), idx(x + 1, y + 1)));
            face_id += 1;
            faces.push((face_id, idx(x, y), idx(x + 1, y + 1), idx(x, y + 1)));
            face_id += 1;
        }
    }
    assert_eq!(faces.len(), 200);
    let mesh = TriangleMesh::from_faces(vertices, &faces, 1e-6);

    let boundary_positions_before: HashSet<[u64; 3]> = boundary_edges(&mesh)
        .into_iter()
        .flat_map(|(a, b)| [a, b])
        .map(|v| bit_key(&mesh.vertices[v]))
        .collect();

    let (out, _report) = Simplifier::run(&mesh, 50).unwrap();

    let boundary_positions_after: HashSet<[u64; 3]> = boundary_edges(&out)
        .into_iter()
        .flat_map(|(a, b)| [a, b])
        .map(|v| bit_key(&out.vertices[v]))
        .collect();

    assert_eq!(boundary_positions_before, boundary_positions_after);
}

/// Multi-face preservation: a cube's 12-triangle, 6-face-id surface
/// simplified back to its own triangle count keeps every face id
/// appearing exactly twice.
#[test]
fn multi_face_preservation_on_a_cube() {
    let vertices = vec![
        Point::new(0.0, 0.0, 0.0),
        Point::new(1.0, 0.0, 0.0),
        Point::new(1.0, 1.0, 0.0),
        Point::new(0.0, 1.0, 0.0),
        Point::new(0.0, 0.0, 1.0),
        Point::new(1.0, 0.0, 1.0),
        Point::new(1.0, 1.0, 1.0),
        Point::new(0.0, 1.0, 1.0),
    ];
    let faces = [
        (0u64, 0, 1, 2),
        (0, 0, 2, 3),
        (1, 4, 6, 5),
        (1, 4, 7, 6),
        (2, 0, 5, 1),
        (2, 0, 4, 5),
        (3, 1, 6, 2),
        (3, 1, 5, 6),
        (4, 2, 7, 3),
        (4, 2, 6, 7),
        (5, 3, 4, 0),
        (5, 3, 7, 4),
    ];
    let mesh = TriangleMesh::from_faces(vertices, &faces, 1e-6);

    let (out, _report) = Simplifier::run(&mesh, 12).unwrap();
    assert_eq!(out.triangle_count(), 12);

    let mut counts: HashMap<u64, usize> = HashMap::new();
    for t in &out.triangles {
        *counts.entry(t.face_id).or_insert(0) += 1;
    }
    assert_eq!(counts.len(), 6);
    for (&face_id, &count) in &counts {
        assert_eq!(count, 2, "face id {face_id} should appear exactly twice, got {count}");
    }
}

/// Quadric singularity: two coplanar triangles sharing an edge cost 0 to
/// contract, with the optimal point at the shared edge's midpoint.
#[test]
fn quadric_singularity_on_coplanar_pair() {
    let p0 = Point::new(0.0, 0.0, 0.0);
    let p1 = Point::new(1.0, 0.0, 0.0);
    let p2 = Point::new(0.0, 1.0, 0.0);
    let p3 = Point::new(1.0, 1.0, 0.0);

    let q_left = Quadric::from_triangle(p0, p1, p2);
    let q_right = Quadric::from_triangle(p1, p3, p2);
    let combined = q_left.add(&q_right);

    let midpoint = Point::from((p1.coords + p2.coords) / 2.0);
    let optimal = combined.optimal(p1, p2);

    assert!(relative_eq!(combined.evaluate(optimal), 0.0, epsilon = 1e-9));
    assert!(relative_eq!(optimal, midpoint, epsilon = 1e-9));
}

/// Deflection monotonicity: for a fixed profile and defaults, increasing
/// sweep length never decreases either returned tolerance.
#[test]
fn deflection_tolerances_never_decrease_with_sweep_length() {
    let policy = DeflectionPolicy::new();
    let settings = DeflectionSettings::default();
    let profile = ProfileKind::Rectangle { x_dim: 8.0, y_dim: 8.0 };

    let mut last = (0.0, 0.0);
    for depth in [40.0, 80.0, 160.0, 320.0, 640.0] {
        let (linear, angular) = policy.deflection_for(
            profile,
            SweepKind::Extrusion { depth },
            depth,
            1.0,
            0.0,
            0.0,
            &settings,
        );
        assert!(linear >= last.0 - 1e-12);
        assert!(angular >= last.1 - 1e-12);
        last = (linear, angular);
    }
}
