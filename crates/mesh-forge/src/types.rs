//! Core mesh data types.

use nalgebra::{Point3, Vector3};

/// Mesh vertex: a position plus an optional cached normal.
///
/// Coordinates carry no unit; every tolerance in the crate is absolute in mesh-local units.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: Point3<f64>,

    /// Cached unit normal. Cleared by anything that moves vertices.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Vertex at `position` with no cached normal.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// Indexed triangle mesh.
///
/// Vertex indices are the identity used by faces. Every face index must
/// reference an existing vertex; decoders enforce this through
/// [`validate_mesh_data`](crate::validate::validate_mesh_data).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,

    /// Index triples into `vertices`, wound counter-clockwise seen from outside.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Build a mesh from raw positions and index triples.
    pub fn from_raw(positions: &[[f64; 3]], faces: &[[u32; 3]]) -> Self {
        Self {
            vertices: positions
                .iter()
                .map(|&[x, y, z]| Vertex::from_coords(x, y, z))
                .collect(),
            faces: faces.to_vec(),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// True when there is nothing to render: no vertices or no faces.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Axis-aligned `(min, max)` corners, or `None` without vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?.position;
        let mut min = first;
        let mut max = first;

        for p in self.vertices.iter().skip(1).map(|v| &v.position) {
            min = min.inf(p);
            max = max.sup(p);
        }

        Some((min, max))
    }

    /// Face geometry in face order.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&face| self.face_triangle(face))
    }

    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&face| self.face_triangle(face))
    }

    #[inline]
    fn face_triangle(&self, [i0, i1, i2]: [u32; 3]) -> Triangle {
        Triangle {
            v0: self.position(i0),
            v1: self.position(i1),
            v2: self.position(i2),
        }
    }

    #[inline]
    fn position(&self, index: u32) -> Point3<f64> {
        self.vertices[index as usize].position
    }

    /// Move every vertex by `offset`.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        self.vertices.iter_mut().for_each(|v| v.position += offset);
    }

    /// Uniform scale about the origin.
    pub fn scale(&mut self, factor: f64) {
        self.scale_axes(Vector3::repeat(factor));
    }

    /// Scale mesh independently along each axis around the origin.
    ///
    /// An odd number of negative factors mirrors the mesh, so the winding is
    /// flipped to keep normals pointing the same way relative to the surface.
    pub fn scale_axes(&mut self, factors: Vector3<f64>) {
        for v in &mut self.vertices {
            v.position.coords.component_mul_assign(&factors);
            v.normal = None;
        }

        let negative = factors.iter().filter(|f| **f < 0.0).count();
        if negative % 2 == 1 {
            for face in &mut self.faces {
                face.swap(1, 2);
            }
        }
    }

    /// Append another mesh's vertices and faces, offsetting its indices.
    ///
    /// Topology of both meshes is left untouched: shared positions are not welded.
    pub fn append(&mut self, other: &Mesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend(other.vertices.iter().cloned());
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|&[a, b, c]| [a + offset, b + offset, c + offset]),
        );
    }

    /// Reverse the winding of every face.
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
        for n in self.vertices.iter_mut().filter_map(|v| v.normal.as_mut()) {
            *n = -*n;
        }
    }

    /// Enclosed volume, positive when faces wind outward.
    ///
    /// Sums the origin-apex tetrahedra of every face. Open meshes give a number
    /// that depends on where the origin sits.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|tri| tri.v0.coords.dot(&tri.v1.coords.cross(&tri.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Negative enclosed volume: faces wind inward.
    #[inline]
    pub fn is_inside_out(&self) -> bool {
        self.signed_volume() < 0.0
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }
}

/// Resolved face geometry, used by the scoring and cleanup passes.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Right-hand cross product of the two edges leaving `v0`; its length is twice the area.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, `None` when the triangle has collapsed.
    pub fn normal(&self) -> Option<Vector3<f64>> {
        self.normal_unnormalized().try_normalize(f64::EPSILON)
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Edge lengths ordered v0-v1, v1-v2, v2-v0.
    #[inline]
    pub fn edge_lengths(&self) -> [f64; 3] {
        [
            nalgebra::distance(&self.v0, &self.v1),
            nalgebra::distance(&self.v1, &self.v2),
            nalgebra::distance(&self.v2, &self.v0),
        ]
    }

    /// Interior angles in degrees at v0, v1 and v2.
    ///
    /// Returns `None` when any edge has zero length, since the angles are undefined.
    pub fn angles_degrees(&self) -> Option<[f64; 3]> {
        let corner = |a: Point3<f64>, b: Point3<f64>, c: Point3<f64>| -> Option<f64> {
            let u = b - a;
            let v = c - a;
            let denom = u.norm() * v.norm();
            if denom <= f64::EPSILON {
                return None;
            }
            Some((u.dot(&v) / denom).clamp(-1.0, 1.0).acos().to_degrees())
        };

        Some([
            corner(self.v0, self.v1, self.v2)?,
            corner(self.v1, self.v2, self.v0)?,
            corner(self.v2, self.v0, self.v1)?,
        ])
    }

    /// Area below `epsilon`.
    #[inline]
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        self.area() < epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn cube() -> Mesh {
        Mesh::from_raw(
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
                [3, 7, 6],
                [3, 6, 2],
                [0, 4, 7],
                [0, 7, 3],
                [1, 2, 6],
                [1, 6, 5],
            ],
        )
    }

    #[test]
    fn test_from_raw_keeps_positions() {
        let mesh = Mesh::from_raw(&[[1.0, 2.0, 3.0]], &[]);
        assert_eq!(mesh.vertices[0].position, Point3::new(1.0, 2.0, 3.0));
        assert!(mesh.vertices[0].normal.is_none());
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_triangle_normal_and_area() {
        let tri = Triangle::new(Point3::origin(), Point3::new(2.0, 0.0, 0.0), Point3::new(0.0, 2.0, 0.0));
        assert_eq!(tri.normal(), Some(Vector3::z()));
        assert!(close(tri.area(), 2.0));
        assert!(close(tri.edge_lengths()[1], 8f64.sqrt()));
    }

    #[test]
    fn test_degenerate_triangle() {
        let tri = Triangle::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0), Point3::new(3.0, 3.0, 3.0));
        assert!(tri.normal().is_none());
        assert!(tri.is_degenerate(1e-10));
    }

    #[test]
    fn test_triangle_angles() {
        let tri = Triangle::new(Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0));
        let [a, b, c] = tri.angles_degrees().expect("valid angles");
        assert!((a - 90.0).abs() < 1e-9);
        assert!((b - 45.0).abs() < 1e-9);
        assert!((c - 45.0).abs() < 1e-9);

        let collapsed = Triangle::new(Point3::origin(), Point3::origin(), Point3::new(1.0, 0.0, 0.0));
        assert!(collapsed.angles_degrees().is_none());
    }

    #[test]
    fn test_mesh_bounds() {
        let mesh = Mesh::from_raw(&[[0.0, 0.0, 0.0], [10.0, 5.0, 3.0], [-2.0, 8.0, 1.0]], &[]);

        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(10.0, 8.0, 3.0));
        assert!(Mesh::new().bounds().is_none());
    }

    #[test]
    fn test_cube_volume_and_area() {
        let mesh = cube();
        assert!(close(mesh.signed_volume(), 1.0));
        assert!(close(mesh.surface_area(), 6.0));
        assert!(!mesh.is_inside_out());
    }

    #[test]
    fn test_flip_makes_inside_out() {
        let mut mesh = cube();
        mesh.flip_faces();
        assert!(close(mesh.signed_volume(), -1.0));
        assert!(mesh.is_inside_out());
    }

    #[test]
    fn test_scale_axes() {
        let mut mesh = cube();
        mesh.scale_axes(Vector3::new(2.0, 3.0, 4.0));
        assert!(close(mesh.volume(), 24.0));
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_scale_axes_mirror_keeps_orientation() {
        let mut mesh = cube();
        mesh.scale_axes(Vector3::new(-1.0, 1.0, 1.0));
        assert!(close(mesh.signed_volume(), 1.0));
    }

    #[test]
    fn test_translate_keeps_volume() {
        let mut mesh = cube();
        mesh.translate(Vector3::new(-4.0, 7.5, 100.0));
        assert!(close(mesh.signed_volume(), 1.0));
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut a = cube();
        let b = cube();
        a.append(&b);
        assert_eq!(a.vertex_count(), 16);
        assert_eq!(a.face_count(), 24);
        assert_eq!(a.faces[12], [8, 10, 9]);
    }

    #[test]
    fn test_empty_mesh() {
        let mesh = Mesh::new();
        assert!(mesh.is_empty());
        assert!(close(mesh.signed_volume(), 0.0));
        assert!(close(mesh.surface_area(), 0.0));
    }
}
