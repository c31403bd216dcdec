//! Mesh boolean operations.
//!
//! Union, difference and intersection of two closed manifold meshes by face
//! classification: each face is kept or dropped whole depending on whether its
//! centroid lies inside the other operand (ray-cast parity, majority of three
//! skewed rays, accelerated with a BVH). Faces that cross the other surface are
//! not split, so a result is only returned when it closes up without splitting;
//! operands whose surfaces cross fail with `BooleanFailed` and the combiner
//! takes its fallback.
//!
//! # Example
//!
//! ```
//! use mesh_forge::Mesh;
//! use mesh_forge::boolean::{SolidOp, BooleanParams, boolean_operation};
//!
//! let cube = |offset: f64| {
//!     let mut m = Mesh::from_raw(
//!         &[
//!             [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0],
//!             [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0],
//!         ],
//!         &[
//!             [0, 2, 1], [0, 3, 2], [4, 5, 6], [4, 6, 7], [0, 1, 5], [0, 5, 4],
//!             [2, 3, 7], [2, 7, 6], [1, 2, 6], [1, 6, 5], [3, 0, 4], [3, 4, 7],
//!         ],
//!     );
//!     m.translate(nalgebra::Vector3::new(offset, 0.0, 0.0));
//!     m
//! };
//!
//! // Disjoint operands: union is the two solids side by side.
//! let result = boolean_operation(&cube(0.0), &cube(5.0), SolidOp::Union, &BooleanParams::default()).unwrap();
//! assert_eq!(result.mesh.face_count(), 24);
//! ```

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::repair::{
    DEGENERATE_AREA_EPSILON, fix_non_manifold_edges, remove_degenerate_triangles,
    remove_duplicate_faces, remove_unreferenced_vertices, weld_vertices,
};
use crate::tracing_ext::OperationTimer;
use crate::validate::validate_mesh;
use crate::Mesh;

/// Solid boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolidOp {
    /// A ∪ B.
    Union,
    /// A − B.
    Difference,
    /// A ∩ B.
    Intersection,
}

impl SolidOp {
    /// Lowercase operator name.
    pub fn name(self) -> &'static str {
        match self {
            SolidOp::Union => "union",
            SolidOp::Difference => "difference",
            SolidOp::Intersection => "intersection",
        }
    }
}

impl std::fmt::Display for SolidOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters for boolean operations.
#[derive(Debug, Clone)]
pub struct BooleanParams {
    /// Weld tolerance used when stitching the kept faces.
    pub tolerance: f64,

    /// Weld, drop degenerate/duplicate faces and split non-manifold edges in the result.
    pub cleanup: bool,

    /// Maximum triangles per BVH leaf.
    pub bvh_leaf_size: usize,
}

impl Default for BooleanParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            cleanup: true,
            bvh_leaf_size: 8,
        }
    }
}

/// Result of a boolean operation.
#[derive(Debug, Clone)]
pub struct BooleanResult {
    /// Resulting mesh.
    pub mesh: Mesh,

    /// Faces kept from the first operand.
    pub faces_from_a: usize,

    /// Faces kept from the second operand.
    pub faces_from_b: usize,

    /// Operand bounding boxes did not overlap and the answer was direct.
    pub disjoint: bool,

    /// Non-manifold edges removed during cleanup.
    pub non_manifold_edges_fixed: usize,
}

#[derive(Debug, Clone)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    fn from_triangle(v0: &Point3<f64>, v1: &Point3<f64>, v2: &Point3<f64>) -> Self {
        let mut bbox = Self::empty();
        for p in [v0, v1, v2] {
            bbox.include(p);
        }
        bbox
    }

    fn from_mesh(mesh: &Mesh) -> Self {
        let mut bbox = Self::empty();
        for v in &mesh.vertices {
            bbox.include(&v.position);
        }
        bbox
    }

    fn include(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    fn expand(&mut self, other: &Aabb) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.max[i] >= other.min[i] && other.max[i] >= self.min[i])
    }

    fn center_on(&self, axis: usize) -> f64 {
        (self.min[axis] + self.max[axis]) * 0.5
    }

    fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Slab test for a ray starting at `origin` with precomputed `1 / dir`.
    fn hit_by_ray(&self, origin: &Point3<f64>, inv_dir: &Vector3<f64>) -> bool {
        let mut t_min = 0.0_f64;
        let mut t_max = f64::INFINITY;
        for i in 0..3 {
            let t1 = (self.min[i] - origin[i]) * inv_dir[i];
            let t2 = (self.max[i] - origin[i]) * inv_dir[i];
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
        }
        t_min <= t_max
    }
}

enum BvhNode {
    Leaf {
        bbox: Aabb,
        triangles: Vec<usize>,
    },
    Internal {
        bbox: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

/// Bounding volume hierarchy over one mesh's triangles, queried by rays.
struct Bvh<'a> {
    mesh: &'a Mesh,
    root: Option<BvhNode>,
}

impl<'a> Bvh<'a> {
    fn build(mesh: &'a Mesh, max_leaf_size: usize) -> Self {
        let boxes: Vec<Aabb> = mesh
            .triangles()
            .map(|t| Aabb::from_triangle(&t.v0, &t.v1, &t.v2))
            .collect();
        let root = if boxes.is_empty() {
            None
        } else {
            Some(Self::build_recursive(
                &boxes,
                (0..boxes.len()).collect(),
                max_leaf_size.max(1),
            ))
        };
        Self { mesh, root }
    }

    fn build_recursive(boxes: &[Aabb], mut indices: Vec<usize>, max_leaf_size: usize) -> BvhNode {
        let mut bbox = Aabb::empty();
        for &i in &indices {
            bbox.expand(&boxes[i]);
        }

        if indices.len() <= max_leaf_size {
            return BvhNode::Leaf {
                bbox,
                triangles: indices,
            };
        }

        let axis = bbox.longest_axis();
        indices.sort_by(|&a, &b| {
            boxes[a]
                .center_on(axis)
                .total_cmp(&boxes[b].center_on(axis))
        });
        let right = indices.split_off(indices.len() / 2);

        BvhNode::Internal {
            bbox,
            left: Box::new(Self::build_recursive(boxes, indices, max_leaf_size)),
            right: Box::new(Self::build_recursive(boxes, right, max_leaf_size)),
        }
    }

    /// Number of triangles crossed by the ray `origin + t * dir`, `t > 0`.
    fn count_crossings(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> usize {
        let inv_dir = dir.map(|d| 1.0 / d);
        let mut count = 0;
        let mut stack: Vec<&BvhNode> = self.root.iter().collect();

        while let Some(node) = stack.pop() {
            match node {
                BvhNode::Leaf { bbox, triangles } => {
                    if !bbox.hit_by_ray(origin, &inv_dir) {
                        continue;
                    }
                    for &fi in triangles {
                        if let Some(tri) = self.mesh.triangle(fi)
                            && ray_hits_triangle(origin, dir, &tri.v0, &tri.v1, &tri.v2)
                        {
                            count += 1;
                        }
                    }
                }
                BvhNode::Internal { bbox, left, right } => {
                    if bbox.hit_by_ray(origin, &inv_dir) {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        count
    }

    /// Point containment by majority vote of three ray parities.
    fn contains(&self, point: &Point3<f64>) -> bool {
        let inside_votes = RAY_DIRECTIONS
            .iter()
            .filter(|d| self.count_crossings(point, &Vector3::new(d[0], d[1], d[2])) % 2 == 1)
            .count();
        inside_votes >= 2
    }
}

// Skewed so rays rarely graze edges or vertices of axis-aligned geometry.
const RAY_DIRECTIONS: [[f64; 3]; 3] = [
    [0.9134, 0.3068, 0.2675],
    [-0.2419, 0.9217, 0.3031],
    [0.1711, -0.2873, 0.9424],
];

/// Möller-Trumbore ray-triangle intersection, `t > epsilon`.
fn ray_hits_triangle(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    v0: &Point3<f64>,
    v1: &Point3<f64>,
    v2: &Point3<f64>,
) -> bool {
    let epsilon = 1e-12;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < epsilon {
        return false;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }

    f * edge2.dot(&q) > epsilon
}

/// Reject operands the classifier cannot handle.
fn check_operand(mesh: &Mesh, label: &str, op: SolidOp) -> MeshResult<()> {
    if mesh.faces.is_empty() {
        return Err(MeshError::boolean_failed(op.name(), format!("{} is empty", label)));
    }
    let report = validate_mesh(mesh);
    if !report.is_manifold {
        return Err(MeshError::boolean_failed(
            op.name(),
            format!(
                "{} is not manifold ({} non-manifold edges, {} non-manifold vertices)",
                label, report.non_manifold_edge_count, report.non_manifold_vertex_count
            ),
        ));
    }
    if !report.is_watertight {
        return Err(MeshError::boolean_failed(
            op.name(),
            format!(
                "{} is not closed ({} boundary edges)",
                label, report.boundary_edge_count
            ),
        ));
    }
    Ok(())
}

/// Copy the selected faces of `source` into `result`, optionally reversed.
fn append_faces(result: &mut Mesh, source: &Mesh, keep: &[bool], invert: bool) -> usize {
    let mut remap: Vec<Option<u32>> = vec![None; source.vertices.len()];
    let mut added = 0;

    for (face, _) in source.faces.iter().zip(keep).filter(|(_, k)| **k) {
        let mut mapped = [0u32; 3];
        for (slot, &v) in mapped.iter_mut().zip(face) {
            *slot = *remap[v as usize].get_or_insert_with(|| {
                result.vertices.push(source.vertices[v as usize].clone());
                (result.vertices.len() - 1) as u32
            });
        }
        if invert {
            mapped.swap(1, 2);
        }
        result.faces.push(mapped);
        added += 1;
    }
    added
}

/// For each face of `mesh`, whether its centroid lies inside `other`.
fn classify_faces(mesh: &Mesh, other: &Bvh<'_>) -> Vec<bool> {
    mesh.triangles()
        .map(|tri| other.contains(&tri.centroid()))
        .collect()
}

/// Perform a boolean operation on two closed manifold meshes.
///
/// Fails with `BooleanFailed` when an operand is empty, non-manifold or open,
/// when a union or intersection comes out empty, and when the kept faces do
/// not form a closed manifold solid.
pub fn boolean_operation(
    mesh_a: &Mesh,
    mesh_b: &Mesh,
    op: SolidOp,
    params: &BooleanParams,
) -> MeshResult<BooleanResult> {
    check_operand(mesh_a, "first operand", op)?;
    check_operand(mesh_b, "second operand", op)?;

    let _timer = OperationTimer::with_context(
        "boolean",
        mesh_a.face_count() + mesh_b.face_count(),
        mesh_a.vertex_count() + mesh_b.vertex_count(),
    );

    if !Aabb::from_mesh(mesh_a).overlaps(&Aabb::from_mesh(mesh_b)) {
        debug!("Boolean {}: operand bounds are disjoint", op);
        return match op {
            SolidOp::Union => {
                let mut mesh = mesh_a.clone();
                mesh.append(mesh_b);
                Ok(BooleanResult {
                    mesh,
                    faces_from_a: mesh_a.face_count(),
                    faces_from_b: mesh_b.face_count(),
                    disjoint: true,
                    non_manifold_edges_fixed: 0,
                })
            }
            SolidOp::Difference => Ok(BooleanResult {
                mesh: mesh_a.clone(),
                faces_from_a: mesh_a.face_count(),
                faces_from_b: 0,
                disjoint: true,
                non_manifold_edges_fixed: 0,
            }),
            SolidOp::Intersection => Err(MeshError::boolean_failed(
                op.name(),
                "operands do not overlap, intersection is empty",
            )),
        };
    }

    let bvh_a = Bvh::build(mesh_a, params.bvh_leaf_size);
    let bvh_b = Bvh::build(mesh_b, params.bvh_leaf_size);
    let a_inside_b = classify_faces(mesh_a, &bvh_b);
    let b_inside_a = classify_faces(mesh_b, &bvh_a);

    let outside = |flags: &[bool]| flags.iter().map(|inside| !inside).collect::<Vec<_>>();

    let mut mesh = Mesh::new();
    let (faces_from_a, faces_from_b) = match op {
        SolidOp::Union => (
            append_faces(&mut mesh, mesh_a, &outside(&a_inside_b), false),
            append_faces(&mut mesh, mesh_b, &outside(&b_inside_a), false),
        ),
        SolidOp::Difference => (
            append_faces(&mut mesh, mesh_a, &outside(&a_inside_b), false),
            append_faces(&mut mesh, mesh_b, &b_inside_a, true),
        ),
        SolidOp::Intersection => (
            append_faces(&mut mesh, mesh_a, &a_inside_b, false),
            append_faces(&mut mesh, mesh_b, &b_inside_a, false),
        ),
    };

    let mut non_manifold_edges_fixed = 0;
    if params.cleanup {
        weld_vertices(&mut mesh, params.tolerance);
        remove_degenerate_triangles(&mut mesh, DEGENERATE_AREA_EPSILON);
        remove_duplicate_faces(&mut mesh);
        non_manifold_edges_fixed = fix_non_manifold_edges(&mut mesh);
        remove_unreferenced_vertices(&mut mesh);
    }

    debug!(
        "Boolean {}: kept {} faces from A, {} from B",
        op, faces_from_a, faces_from_b
    );

    if mesh.faces.is_empty() {
        if op != SolidOp::Difference {
            return Err(MeshError::boolean_failed(op.name(), "result is empty"));
        }
    } else {
        let report = validate_mesh(&mesh);
        if !report.is_watertight || !report.is_manifold {
            return Err(MeshError::boolean_failed(
                op.name(),
                format!(
                    "result is not a closed solid ({} boundary edges, {} non-manifold edges)",
                    report.boundary_edge_count, report.non_manifold_edge_count
                ),
            ));
        }
    }

    Ok(BooleanResult {
        mesh,
        faces_from_a,
        faces_from_b,
        disjoint: false,
        non_manifold_edges_fixed,
    })
}

/// Whether `point` lies inside the closed mesh.
pub fn point_in_mesh(mesh: &Mesh, point: &Point3<f64>) -> bool {
    Bvh::build(mesh, BooleanParams::default().bvh_leaf_size).contains(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(offset: [f64; 3], size: f64) -> Mesh {
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
            &[
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [2, 3, 7],
                [2, 7, 6],
                [1, 2, 6],
                [1, 6, 5],
                [3, 0, 4],
                [3, 4, 7],
            ],
        );
        mesh.scale(size);
        mesh.translate(Vector3::new(offset[0], offset[1], offset[2]));
        mesh
    }

    #[test]
    fn test_point_in_mesh() {
        let c = cube([0.0; 3], 2.0);
        assert!(point_in_mesh(&c, &Point3::new(1.0, 1.0, 1.0)));
        assert!(point_in_mesh(&c, &Point3::new(0.1, 1.9, 0.5)));
        assert!(!point_in_mesh(&c, &Point3::new(3.0, 1.0, 1.0)));
        assert!(!point_in_mesh(&c, &Point3::new(-0.5, -0.5, -0.5)));
    }

    #[test]
    fn test_disjoint_shortcuts() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([3.0, 0.0, 0.0], 1.0);
        let params = BooleanParams::default();

        let union = boolean_operation(&a, &b, SolidOp::Union, &params).unwrap();
        assert!(union.disjoint);
        assert_eq!(union.mesh.face_count(), 24);

        let difference = boolean_operation(&a, &b, SolidOp::Difference, &params).unwrap();
        assert_eq!(difference.mesh, a);

        assert!(matches!(
            boolean_operation(&a, &b, SolidOp::Intersection, &params),
            Err(MeshError::BooleanFailed { .. })
        ));
    }

    #[test]
    fn test_contained_operand() {
        let outer = cube([0.0; 3], 4.0);
        let inner = cube([1.0, 1.0, 1.0], 1.0);
        let params = BooleanParams::default();

        let union = boolean_operation(&outer, &inner, SolidOp::Union, &params).unwrap();
        assert_eq!(union.faces_from_a, 12);
        assert_eq!(union.faces_from_b, 0);

        let intersection = boolean_operation(&outer, &inner, SolidOp::Intersection, &params).unwrap();
        assert_eq!(intersection.faces_from_a, 0);
        assert_eq!(intersection.faces_from_b, 12);

        // A hollow: outer shell plus the inner cube turned inside out.
        let difference = boolean_operation(&outer, &inner, SolidOp::Difference, &params).unwrap();
        assert_eq!(difference.mesh.face_count(), 24);
        let expected = outer.volume() - inner.volume();
        assert!((difference.mesh.signed_volume() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_crossing_operands_rejected() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.5, 0.5, 0.5], 1.0);
        let params = BooleanParams::default();
        for op in [SolidOp::Union, SolidOp::Difference, SolidOp::Intersection] {
            match boolean_operation(&a, &b, op, &params) {
                Ok(result) => {
                    let report = validate_mesh(&result.mesh);
                    assert!(report.is_watertight && report.is_manifold, "{op}");
                }
                Err(MeshError::BooleanFailed { details, .. }) => {
                    assert!(details.contains("closed solid") || details.contains("empty"), "{op}: {details}");
                }
                Err(other) => panic!("{op}: unexpected error {other:?}"),
            }
        }
        let union = boolean_operation(&a, &b, SolidOp::Union, &params);
        assert!(union.is_err());
    }

    #[test]
    fn test_rejects_open_operand() {
        let a = cube([0.0; 3], 1.0);
        let mut open = cube([0.5, 0.0, 0.0], 1.0);
        open.faces.pop();
        let err = boolean_operation(&a, &open, SolidOp::Union, &BooleanParams::default()).unwrap_err();
        assert!(err.to_string().contains("not closed"));
    }

    #[test]
    fn test_rejects_non_manifold_operand() {
        let a = cube([0.0; 3], 1.0);
        let mut b = cube([0.5, 0.0, 0.0], 1.0);
        // A third face on an existing edge.
        b.vertices.push(crate::Vertex::from_coords(1.0, -1.0, 0.5));
        b.faces.push([0, 1, 8]);
        assert!(boolean_operation(&a, &b, SolidOp::Difference, &BooleanParams::default()).is_err());
    }
}
