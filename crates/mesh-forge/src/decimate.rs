//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! [`decimate_mesh_checked`] is the simplifier itself. [`decimate`] is the
//! decimation stage: it never fails, and falls back to the unmodified input
//! when the simplifier is unavailable, errors, or panics.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use hashbrown::HashSet;
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::adjacency::{MeshAdjacency, edge_key};
use crate::error::{Annotation, MeshError, MeshResult};
use crate::tracing_ext::{OperationTimer, log_annotation};
use crate::{Mesh, Vertex};

/// Default face budget for decimation.
pub const DEFAULT_TARGET_FACES: usize = 50_000;

/// Parameters for mesh decimation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DecimateParams {
    /// Target number of faces. Default: 50 000
    pub target_faces: usize,
    /// Never move vertices that lie on a boundary edge. Default: true
    pub preserve_boundary: bool,
    /// Maximum quadric error allowed for a single collapse. If None, no limit.
    pub max_error: Option<f64>,
    /// Cost multiplier for boundary edges when `preserve_boundary` is false.
    /// Default: 10.0
    pub boundary_penalty: f64,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_faces: DEFAULT_TARGET_FACES,
            preserve_boundary: true,
            max_error: None,
            boundary_penalty: 10.0,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a specific face count.
    pub fn with_target_faces(count: usize) -> Self {
        Self {
            target_faces: count,
            ..Default::default()
        }
    }

    /// Allow boundary vertices to move (penalised rather than locked).
    pub fn aggressive(count: usize) -> Self {
        Self {
            target_faces: count,
            preserve_boundary: false,
            boundary_penalty: 1.0,
            ..Default::default()
        }
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: Mesh,
    /// Number of faces in the input mesh.
    pub original_faces: usize,
    /// Number of faces in the decimated mesh.
    pub final_faces: usize,
    /// Number of edge collapses performed.
    pub collapses: usize,
    /// Collapses rejected by the link, flip, or error checks.
    pub collapses_rejected: usize,
}

/// Outcome of the decimation stage.
#[derive(Debug, Clone)]
pub struct DecimateOutcome {
    pub mesh: Mesh,
    pub original_faces: usize,
    pub final_faces: usize,
    /// Set when the original mesh was kept because the simplifier could not run.
    pub annotation: Option<Annotation>,
}

/// Quadric error matrix (4x4 symmetric matrix stored as 10 values).
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    // [a b c d]
    // [  e f g]
    // [    h i]
    // [      j]
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
}

impl Quadric {
    /// Quadric of the plane `n · p + d = 0` with unit normal `n`.
    fn from_plane(n: Vector3<f64>, d: f64) -> Self {
        Self {
            a: n.x * n.x,
            b: n.x * n.y,
            c: n.x * n.z,
            d: n.x * d,
            e: n.y * n.y,
            f: n.y * n.z,
            g: n.y * d,
            h: n.z * n.z,
            i: n.z * d,
            j: d * d,
        }
    }

    fn add(&mut self, other: &Quadric) {
        self.a += other.a;
        self.b += other.b;
        self.c += other.c;
        self.d += other.d;
        self.e += other.e;
        self.f += other.f;
        self.g += other.g;
        self.h += other.h;
        self.i += other.i;
        self.j += other.j;
    }

    fn combined(&self, other: &Quadric) -> Quadric {
        let mut q = *self;
        q.add(other);
        q
    }

    /// vᵀ Q v with v = [x, y, z, 1].
    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let (x, y, z) = (p.x, p.y, p.z);
        self.a * x * x
            + 2.0 * self.b * x * y
            + 2.0 * self.c * x * z
            + 2.0 * self.d * x
            + self.e * y * y
            + 2.0 * self.f * y * z
            + 2.0 * self.g * y
            + self.h * z * z
            + 2.0 * self.i * z
            + self.j
    }

    /// Minimiser of the quadric, or None if the 3x3 system is singular.
    fn optimal_point(&self) -> Option<Point3<f64>> {
        let det = self.a * (self.e * self.h - self.f * self.f)
            - self.b * (self.b * self.h - self.f * self.c)
            + self.c * (self.b * self.f - self.e * self.c);

        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;
        let m00 = (self.e * self.h - self.f * self.f) * inv_det;
        let m01 = (self.c * self.f - self.b * self.h) * inv_det;
        let m02 = (self.b * self.f - self.c * self.e) * inv_det;
        let m11 = (self.a * self.h - self.c * self.c) * inv_det;
        let m12 = (self.b * self.c - self.a * self.f) * inv_det;
        let m22 = (self.a * self.e - self.b * self.b) * inv_det;

        let x = -(m00 * self.d + m01 * self.g + m02 * self.i);
        let y = -(m01 * self.d + m11 * self.g + m12 * self.i);
        let z = -(m02 * self.d + m12 * self.g + m22 * self.i);

        let p = Point3::new(x, y, z);
        p.coords.iter().all(|c| c.is_finite()).then_some(p)
    }
}

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    keep: u32,
    remove: u32,
    cost: f64,
    target: Point3<f64>,
    /// Vertex versions when the candidate was queued; stale once either changes.
    stamps: (u32, u32),
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: smallest cost pops first.
        other.cost.total_cmp(&self.cost)
    }
}

/// Working state for one decimation run.
struct Simplifier<'a> {
    params: &'a DecimateParams,
    positions: Vec<Point3<f64>>,
    vertex_alive: Vec<bool>,
    versions: Vec<u32>,
    quadrics: Vec<Quadric>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
    boundary_vertices: HashSet<u32>,
    boundary_edges: HashSet<(u32, u32)>,
    active_faces: usize,
}

impl<'a> Simplifier<'a> {
    fn new(mesh: &Mesh, params: &'a DecimateParams) -> Self {
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();

        let mut quadrics = vec![Quadric::default(); positions.len()];
        let mut vertex_faces = vec![Vec::new(); positions.len()];
        for (face_idx, face) in mesh.faces.iter().enumerate() {
            for &v in face {
                vertex_faces[v as usize].push(face_idx as u32);
            }
            let [p0, p1, p2] = face.map(|v| positions[v as usize]);
            let Some(n) = (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-20) else {
                continue;
            };
            let q = Quadric::from_plane(n, -n.dot(&p0.coords));
            for &v in face {
                quadrics[v as usize].add(&q);
            }
        }

        let boundary_edges: HashSet<(u32, u32)> = adjacency.boundary_edges().collect();
        let boundary_vertices = adjacency.boundary_vertices();

        Self {
            params,
            vertex_alive: vec![true; positions.len()],
            versions: vec![0; positions.len()],
            positions,
            quadrics,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            vertex_faces,
            boundary_vertices,
            boundary_edges,
            active_faces: mesh.faces.len(),
        }
    }

    fn live_faces_of(&self, v: u32) -> impl Iterator<Item = u32> + '_ {
        self.vertex_faces[v as usize]
            .iter()
            .copied()
            .filter(|&f| self.face_alive[f as usize])
    }

    fn neighbors(&self, v: u32) -> HashSet<u32> {
        self.live_faces_of(v)
            .flat_map(|f| self.faces[f as usize])
            .filter(|&n| n != v)
            .collect()
    }

    fn candidate(&self, v1: u32, v2: u32) -> Option<EdgeCollapse> {
        let on_boundary = |v: u32| self.boundary_vertices.contains(&v);
        if self.params.preserve_boundary && (on_boundary(v1) || on_boundary(v2)) {
            return None;
        }

        let q = self.quadrics[v1 as usize].combined(&self.quadrics[v2 as usize]);
        let (p1, p2) = (self.positions[v1 as usize], self.positions[v2 as usize]);
        let target = q
            .optimal_point()
            .unwrap_or_else(|| nalgebra::center(&p1, &p2));

        let mut cost = q.evaluate(&target).max(0.0);
        if self.boundary_edges.contains(&edge_key(v1, v2)) {
            cost *= self.params.boundary_penalty;
        }

        Some(EdgeCollapse {
            keep: v1,
            remove: v2,
            cost,
            target,
            stamps: (self.versions[v1 as usize], self.versions[v2 as usize]),
        })
    }

    fn is_stale(&self, c: &EdgeCollapse) -> bool {
        !self.vertex_alive[c.keep as usize]
            || !self.vertex_alive[c.remove as usize]
            || self.versions[c.keep as usize] != c.stamps.0
            || self.versions[c.remove as usize] != c.stamps.1
    }

    /// Link condition: the edge's endpoints may share at most two neighbours.
    fn satisfies_link_condition(&self, v1: u32, v2: u32) -> bool {
        let n1 = self.neighbors(v1);
        let n2 = self.neighbors(v2);
        n1.contains(&v2) && n1.intersection(&n2).count() <= 2
    }

    /// Reject collapses that would flip or flatten a surviving face.
    fn flips_a_face(&self, v1: u32, v2: u32, target: &Point3<f64>) -> bool {
        for v in [v1, v2] {
            for f in self.live_faces_of(v) {
                let face = self.faces[f as usize];
                if face.contains(&v1) && face.contains(&v2) {
                    continue;
                }
                let before = face.map(|i| self.positions[i as usize]);
                let after = face.map(|i| {
                    if i == v {
                        *target
                    } else {
                        self.positions[i as usize]
                    }
                });
                let n_before = (before[1] - before[0]).cross(&(before[2] - before[0]));
                let n_after = (after[1] - after[0]).cross(&(after[2] - after[0]));
                if n_after.norm_squared() <= f64::EPSILON * n_before.norm_squared()
                    || n_before.dot(&n_after) <= 0.0
                {
                    return true;
                }
            }
        }
        false
    }

    fn collapse(&mut self, c: &EdgeCollapse) {
        let (keep, remove) = (c.keep, c.remove);
        self.positions[keep as usize] = c.target;
        let q = self.quadrics[remove as usize];
        self.quadrics[keep as usize].add(&q);
        self.vertex_alive[remove as usize] = false;
        self.versions[keep as usize] += 1;
        self.versions[remove as usize] += 1;

        let moved = std::mem::take(&mut self.vertex_faces[remove as usize]);
        for f in moved {
            if !self.face_alive[f as usize] {
                continue;
            }
            let face = &mut self.faces[f as usize];
            if face.contains(&keep) {
                self.face_alive[f as usize] = false;
                self.active_faces -= 1;
                continue;
            }
            for idx in face.iter_mut() {
                if *idx == remove {
                    *idx = keep;
                }
            }
            self.vertex_faces[keep as usize].push(f);
        }
    }

    fn queue_vertex(&self, v: u32, heap: &mut BinaryHeap<EdgeCollapse>) {
        for n in self.neighbors(v) {
            heap.extend(self.candidate(v, n));
        }
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut mesh = Mesh::with_capacity(self.positions.len(), self.active_faces);

        for (face, _) in self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, alive)| **alive)
        {
            for &v in face {
                remap[v as usize] = 0;
            }
        }
        for (old, slot) in remap.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = mesh.vertices.len() as u32;
                mesh.vertices.push(Vertex::new(self.positions[old]));
            }
        }
        for (face, _) in self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, alive)| **alive)
        {
            mesh.faces.push(face.map(|v| remap[v as usize]));
        }
        mesh
    }
}

/// Decimate a mesh using edge collapse with quadric error metrics.
///
/// Returns `DecimationFailed` when the input or the result contains
/// non-finite coordinates.
///
/// # Example
/// ```
/// use mesh_forge::{Mesh, DecimateParams, decimate_mesh_checked};
///
/// let mesh = Mesh::from_raw(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
///     &[[0, 1, 2]],
/// );
/// let result = decimate_mesh_checked(&mesh, &DecimateParams::with_target_faces(10)).unwrap();
/// assert_eq!(result.final_faces, 1);
/// ```
pub fn decimate_mesh_checked(mesh: &Mesh, params: &DecimateParams) -> MeshResult<DecimateResult> {
    let original_faces = mesh.faces.len();

    if let Some((idx, _)) = mesh
        .vertices
        .iter()
        .enumerate()
        .find(|(_, v)| !v.position.coords.iter().all(|c| c.is_finite()))
    {
        return Err(MeshError::decimation_failed(format!(
            "vertex {idx} has a non-finite coordinate"
        )));
    }

    if original_faces <= params.target_faces {
        return Ok(DecimateResult {
            mesh: mesh.clone(),
            original_faces,
            final_faces: original_faces,
            collapses: 0,
            collapses_rejected: 0,
        });
    }

    let _timer = OperationTimer::with_context("decimate", original_faces, mesh.vertex_count());
    let mut simplifier = Simplifier::new(mesh, params);

    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();
    for face in &mesh.faces {
        for (a, b) in [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])] {
            if seen.insert(edge_key(a, b)) {
                heap.extend(simplifier.candidate(a, b));
            }
        }
    }

    let mut collapses = 0;
    let mut collapses_rejected = 0;

    while simplifier.active_faces > params.target_faces {
        let Some(c) = heap.pop() else {
            break;
        };
        if simplifier.is_stale(&c) {
            continue;
        }
        if let Some(max_error) = params.max_error
            && c.cost > max_error
        {
            debug!("Next collapse cost {:.3e} exceeds max error, stopping", c.cost);
            break;
        }
        if !simplifier.satisfies_link_condition(c.keep, c.remove)
            || simplifier.flips_a_face(c.keep, c.remove, &c.target)
        {
            collapses_rejected += 1;
            continue;
        }

        simplifier.collapse(&c);
        collapses += 1;
        simplifier.queue_vertex(c.keep, &mut heap);
    }

    let final_faces = simplifier.active_faces;
    let result_mesh = simplifier.into_mesh();

    if !result_mesh
        .vertices
        .iter()
        .all(|v| v.position.coords.iter().all(|c| c.is_finite()))
    {
        return Err(MeshError::decimation_failed(
            "edge collapse produced non-finite vertex positions",
        ));
    }

    info!(
        "Decimated {} → {} faces ({} collapses, {} rejected)",
        original_faces, final_faces, collapses, collapses_rejected
    );

    Ok(DecimateResult {
        mesh: result_mesh,
        original_faces,
        final_faces,
        collapses,
        collapses_rejected,
    })
}

/// Run the decimation stage.
///
/// No-op when the mesh is already within budget. Non-manifold input marks the
/// simplifier unavailable; errors and panics mark it failed. In both cases the
/// original mesh is returned with an annotation.
pub fn decimate(mesh: &Mesh, params: &DecimateParams) -> DecimateOutcome {
    let original_faces = mesh.face_count();
    let unchanged = |annotation: Option<Annotation>| DecimateOutcome {
        mesh: mesh.clone(),
        original_faces,
        final_faces: original_faces,
        annotation,
    };

    if original_faces <= params.target_faces {
        return unchanged(None);
    }

    if !MeshAdjacency::build(&mesh.faces).is_manifold() {
        let annotation = Annotation::DecimationUnavailable {
            reason: "edge collapse requires an edge-manifold mesh".to_string(),
        };
        log_annotation(&annotation);
        return unchanged(Some(annotation));
    }

    let attempt = catch_unwind(AssertUnwindSafe(|| decimate_mesh_checked(mesh, params)));
    match attempt {
        Ok(Ok(result)) => DecimateOutcome {
            mesh: result.mesh,
            original_faces,
            final_faces: result.final_faces,
            annotation: None,
        },
        Ok(Err(e)) => {
            let annotation = Annotation::DecimationFailed {
                reason: e.to_string(),
            };
            log_annotation(&annotation);
            unchanged(Some(annotation))
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            let annotation = Annotation::DecimationFailed {
                reason: format!("simplifier panicked: {reason}"),
            };
            log_annotation(&annotation);
            unchanged(Some(annotation))
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_mesh;

    /// Closed n×n grid on each face of a unit cube, 12·n² faces.
    fn subdivided_cube(n: usize) -> Mesh {
        let mut mesh = Mesh::new();
        let faces: [([f64; 3], [f64; 3], [f64; 3]); 6] = [
            ([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        for (origin, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            for i in 0..=n {
                for j in 0..=n {
                    let (s, t) = (i as f64 / n as f64, j as f64 / n as f64);
                    mesh.vertices.push(Vertex::from_coords(
                        origin[0] + s * u[0] + t * v[0],
                        origin[1] + s * u[1] + t * v[1],
                        origin[2] + s * u[2] + t * v[2],
                    ));
                }
            }
            let idx = |i: usize, j: usize| base + (i * (n + 1) + j) as u32;
            for i in 0..n {
                for j in 0..n {
                    mesh.faces.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
                    mesh.faces.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
                }
            }
        }
        crate::repair::weld_vertices(&mut mesh, 1e-9);
        crate::repair::remove_unreferenced_vertices(&mut mesh);
        mesh
    }

    #[test]
    fn test_fixture_is_closed() {
        let mesh = subdivided_cube(4);
        assert_eq!(mesh.face_count(), 192);
        assert!(validate_mesh(&mesh).is_watertight);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_decimate_reduces_faces() {
        let mesh = subdivided_cube(6);
        let result = decimate_mesh_checked(&mesh, &DecimateParams::with_target_faces(100)).unwrap();
        assert!(result.final_faces <= 101, "got {}", result.final_faces);
        assert!(result.final_faces < result.original_faces);
        assert_eq!(result.mesh.face_count(), result.final_faces);
        assert!(result.mesh.vertex_count() <= mesh.vertex_count());
    }

    #[test]
    fn test_decimate_keeps_cube_closed_and_shaped() {
        let mesh = subdivided_cube(6);
        let result = decimate_mesh_checked(&mesh, &DecimateParams::with_target_faces(120)).unwrap();
        let report = validate_mesh(&result.mesh);
        assert!(report.is_watertight);
        assert!(report.is_manifold);
        approx::assert_relative_eq!(result.mesh.volume(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_within_budget_is_noop() {
        let mesh = subdivided_cube(2);
        let outcome = decimate(&mesh, &DecimateParams::with_target_faces(1000));
        assert_eq!(outcome.mesh, mesh);
        assert!(outcome.annotation.is_none());
    }

    #[test]
    fn test_non_finite_input_falls_back() {
        let mut mesh = subdivided_cube(3);
        mesh.vertices[0].position.x = f64::NAN;
        let outcome = decimate(&mesh, &DecimateParams::with_target_faces(10));
        assert_eq!(outcome.mesh.face_count(), mesh.face_count());
        assert!(matches!(
            outcome.annotation,
            Some(Annotation::DecimationFailed { .. })
        ));
    }

    #[test]
    fn test_non_manifold_input_is_unavailable() {
        let mut mesh = subdivided_cube(3);
        let extra = mesh.vertices.len() as u32;
        mesh.vertices.push(Vertex::from_coords(0.5, 0.5, 3.0));
        let [a, b, _] = mesh.faces[0];
        mesh.faces.push([a, b, extra]);
        let outcome = decimate(&mesh, &DecimateParams::with_target_faces(10));
        assert_eq!(outcome.mesh, mesh);
        assert!(matches!(
            outcome.annotation,
            Some(Annotation::DecimationUnavailable { .. })
        ));
    }

    #[test]
    fn test_open_boundary_is_preserved() {
        let mut mesh = subdivided_cube(4);
        mesh.faces.truncate(mesh.faces.len() - 32);
        let before = MeshAdjacency::build(&mesh.faces).boundary_edge_count();
        let result = decimate_mesh_checked(&mesh, &DecimateParams::with_target_faces(40)).unwrap();
        let after = MeshAdjacency::build(&result.mesh.faces).boundary_edge_count();
        assert_eq!(before, after);
    }
}
