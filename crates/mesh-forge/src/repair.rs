//! Mesh repair: primitive cleanup operations and the repair stage.
//!
//! The primitives (welding, degenerate removal, compaction, ...) are shared
//! with [`cleanup`](crate::cleanup). [`repair_mesh`] is the repair stage:
//! consistent outward winding, small hole filling, and one best-effort
//! "make consistent" pass when the mesh is still open.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, warn};

use crate::Mesh;
use crate::adjacency::MeshAdjacency;
use crate::error::Annotation;
use crate::holes::fill_holes_with_max_edges;
use crate::tracing_ext::{OperationTimer, log_annotation};
use crate::validate::validate_mesh;
use crate::winding::{fix_winding_order, orient_outward};

/// Default distance below which vertices are treated as identical.
pub const DEFAULT_WELD_EPSILON: f64 = 1e-8;

/// Faces with area below this are degenerate.
pub const DEGENERATE_AREA_EPSILON: f64 = 1e-10;

/// Configuration parameters for the repair stage.
///
/// All thresholds are in mesh-local units.
///
/// # Example
///
/// ```
/// use mesh_forge::RepairParams;
///
/// let params = RepairParams {
///     max_hole_edges: 64,
///     ..Default::default()
/// };
/// assert!(params.fill_holes);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RepairParams {
    /// Make winding consistent across shared edges. Default: `true`
    pub fix_winding: bool,

    /// Flip closed components with negative signed volume. Default: `true`
    pub orient_outward: bool,

    /// Fill boundary loops of at most `max_hole_edges` edges. Default: `true`
    pub fill_holes: bool,

    /// Small-hole cutoff in edges. Larger holes are left open.
    ///
    /// Default: `32`
    pub max_hole_edges: usize,

    /// Run the make-consistent pass when the mesh is still not watertight. Default: `true`
    pub make_consistent: bool,

    /// Weld distance used by the make-consistent pass.
    ///
    /// Default: `1e-7` (10× the cleanup weld tolerance)
    pub consistency_weld_epsilon: f64,

    /// Area threshold for degenerate faces. Default: `1e-10`
    pub degenerate_area_threshold: f64,

    /// Compute area-weighted vertex normals at the end. Default: `true`
    pub compute_normals: bool,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            fix_winding: true,
            orient_outward: true,
            fill_holes: true,
            max_hole_edges: 32,
            make_consistent: true,
            consistency_weld_epsilon: DEFAULT_WELD_EPSILON * 10.0,
            degenerate_area_threshold: DEGENERATE_AREA_EPSILON,
            compute_normals: true,
        }
    }
}

impl RepairParams {
    /// Params for noisy generator output: larger holes, looser consistency weld.
    pub fn for_generated() -> Self {
        Self {
            max_hole_edges: 64,
            consistency_weld_epsilon: 1e-5,
            ..Default::default()
        }
    }

    /// Params for CAD-kernel output, where open boundaries are usually intentional.
    pub fn for_cad() -> Self {
        Self {
            fill_holes: false,
            consistency_weld_epsilon: 1e-9,
            ..Default::default()
        }
    }
}

/// Statistics from a repair stage run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairResult {
    /// Faces whose winding was flipped for consistency.
    pub faces_flipped: usize,
    /// Closed components turned outward.
    pub components_reoriented: usize,
    /// Small holes filled.
    pub holes_filled: usize,
    /// Holes left open for exceeding the size cutoff.
    pub holes_skipped: usize,
    /// Whether the make-consistent pass ran.
    pub consistency_pass: bool,
    /// Watertight after repair.
    pub watertight: bool,
    /// Manifold after repair.
    pub manifold: bool,
    /// Set when the mesh is still not watertight.
    pub annotation: Option<Annotation>,
}

/// Remove triangles with area below threshold.
///
/// Returns the number of triangles removed.
pub fn remove_degenerate_triangles(mesh: &mut Mesh, area_threshold: f64) -> usize {
    let original_count = mesh.faces.len();
    let vertices = &mesh.vertices;

    mesh.faces.retain(|&[i0, i1, i2]| {
        if i0 == i1 || i1 == i2 || i0 == i2 {
            return false;
        }
        let e1 = vertices[i1 as usize].position - vertices[i0 as usize].position;
        let e2 = vertices[i2 as usize].position - vertices[i0 as usize].position;
        e1.cross(&e2).norm() * 0.5 >= area_threshold
    });

    let removed = original_count - mesh.faces.len();
    if removed > 0 {
        debug!(
            "Removed {} degenerate triangles (area < {:.1e})",
            removed, area_threshold
        );
    }
    removed
}

/// Weld vertices that are within epsilon distance of each other.
///
/// Uses spatial hashing; each vertex merges into the lowest-index vertex of its
/// cluster. Faces that collapse are dropped. A non-positive epsilon merges only
/// exactly equal positions. Returns the number of vertices merged.
pub fn weld_vertices(mesh: &mut Mesh, epsilon: f64) -> usize {
    let original_count = mesh.vertices.len();
    if original_count == 0 {
        return 0;
    }

    let mut vertex_remap: Vec<u32> = (0..original_count as u32).collect();
    let mut merged_count = 0;

    if epsilon > 0.0 {
        let cell_size = epsilon * 2.0;

        let mut spatial_hash: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            let cell = pos_to_cell(&vertex.position, cell_size);
            spatial_hash.entry(cell).or_default().push(idx as u32);
        }

        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            let idx = idx as u32;
            if vertex_remap[idx as usize] != idx {
                continue;
            }

            let cell = pos_to_cell(&vertex.position, cell_size);

            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        let neighbor_cell = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                        let Some(candidates) = spatial_hash.get(&neighbor_cell) else {
                            continue;
                        };
                        for &other_idx in candidates {
                            if other_idx <= idx || vertex_remap[other_idx as usize] != other_idx {
                                continue;
                            }
                            let other_pos = &mesh.vertices[other_idx as usize].position;
                            if (vertex.position - other_pos).norm() <= epsilon {
                                vertex_remap[other_idx as usize] = idx;
                                merged_count += 1;
                            }
                        }
                    }
                }
            }
        }
    } else {
        let mut first_seen: HashMap<[u64; 3], u32> = HashMap::new();
        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            // +0.0 normalises negative zero.
            let p = vertex.position;
            let key = [
                (p.x + 0.0).to_bits(),
                (p.y + 0.0).to_bits(),
                (p.z + 0.0).to_bits(),
            ];
            let canonical = *first_seen.entry(key).or_insert(idx as u32);
            if canonical != idx as u32 {
                vertex_remap[idx] = canonical;
                merged_count += 1;
            }
        }
    }

    if merged_count == 0 {
        return 0;
    }

    // Resolve transitive merges (A->B, B->C => A->C).
    for i in 0..vertex_remap.len() {
        let mut target = vertex_remap[i];
        while vertex_remap[target as usize] != target {
            target = vertex_remap[target as usize];
        }
        vertex_remap[i] = target;
    }

    for face in &mut mesh.faces {
        for index in face.iter_mut() {
            *index = vertex_remap[*index as usize];
        }
    }

    mesh.faces
        .retain(|&[i0, i1, i2]| i0 != i1 && i1 != i2 && i0 != i2);

    debug!(
        "Welded {} vertices (epsilon = {:.1e}): {} → {}",
        merged_count,
        epsilon,
        original_count,
        original_count - merged_count
    );

    merged_count
}

/// Convert position to spatial hash cell.
fn pos_to_cell(pos: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (pos.x / cell_size).floor() as i64,
        (pos.y / cell_size).floor() as i64,
        (pos.z / cell_size).floor() as i64,
    )
}

/// Remove unreferenced vertices and compact the vertex array.
///
/// Relative vertex order is preserved. Returns the number of vertices removed.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let original_count = mesh.vertices.len();

    let mut referenced = vec![false; original_count];
    for face in &mesh.faces {
        for &index in face {
            referenced[index as usize] = true;
        }
    }

    if referenced.iter().all(|&r| r) {
        return 0;
    }

    let mut remap = vec![u32::MAX; original_count];
    let mut new_vertices = Vec::with_capacity(original_count);
    for (old_idx, vertex) in mesh.vertices.drain(..).enumerate() {
        if referenced[old_idx] {
            remap[old_idx] = new_vertices.len() as u32;
            new_vertices.push(vertex);
        }
    }

    for face in &mut mesh.faces {
        for index in face.iter_mut() {
            *index = remap[*index as usize];
        }
    }

    let removed = original_count - new_vertices.len();
    mesh.vertices = new_vertices;

    debug!("Removed {} unreferenced vertices", removed);

    removed
}

/// Compute vertex normals as area-weighted average of adjacent face normals.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut normal_accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); mesh.vertices.len()];

    for (face, tri) in mesh.faces.iter().zip(mesh.triangles()) {
        // Unnormalized normal has length 2*area, giving area weighting.
        let weighted_normal = tri.normal_unnormalized();
        for &index in face {
            normal_accum[index as usize] += weighted_normal;
        }
    }

    for (vertex, accum) in mesh.vertices.iter_mut().zip(normal_accum) {
        vertex.normal = accum.try_normalize(f64::EPSILON);
    }
}

/// Remove duplicate faces (same vertex set regardless of winding or rotation).
///
/// Keeps the first occurrence. Returns the number of duplicate faces removed.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let original_count = mesh.faces.len();

    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(original_count);
    mesh.faces.retain(|face| {
        let mut key = *face;
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = original_count - mesh.faces.len();
    if removed > 0 {
        debug!("Removed {} duplicate faces", removed);
    }

    removed
}

/// Fix non-manifold edges by removing excess faces.
///
/// For each edge shared by more than 2 faces, keeps the 2 largest-area faces.
/// Returns the number of faces removed.
pub fn fix_non_manifold_edges(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    let mut faces_to_remove: HashSet<u32> = HashSet::new();
    let mut edge_count = 0;

    for faces in adjacency.edge_to_faces.values() {
        if faces.len() <= 2 {
            continue;
        }
        edge_count += 1;

        let mut by_area: Vec<(u32, f64)> = faces
            .iter()
            .filter(|f| !faces_to_remove.contains(*f))
            .filter_map(|&f| mesh.triangle(f as usize).map(|tri| (f, tri.area())))
            .collect();
        by_area.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        for (f, _) in by_area.into_iter().skip(2) {
            faces_to_remove.insert(f);
        }
    }

    if faces_to_remove.is_empty() {
        return 0;
    }

    let mut idx = 0u32;
    mesh.faces.retain(|_| {
        let keep = !faces_to_remove.contains(&idx);
        idx += 1;
        keep
    });

    info!(
        "Fixed {} non-manifold edges by removing {} faces",
        edge_count,
        faces_to_remove.len()
    );

    faces_to_remove.len()
}

/// Best-effort consistency pass: re-weld, drop degenerate/duplicate faces,
/// split non-manifold edges, and redo winding.
fn make_consistent(mesh: &mut Mesh, params: &RepairParams) {
    weld_vertices(mesh, params.consistency_weld_epsilon);
    remove_degenerate_triangles(mesh, params.degenerate_area_threshold);
    remove_duplicate_faces(mesh);
    fix_non_manifold_edges(mesh);
    if params.fix_winding {
        fix_winding_order(mesh);
    }
    if params.fill_holes {
        fill_holes_with_max_edges(mesh, params.max_hole_edges);
    }
    if params.orient_outward {
        orient_outward(mesh);
    }
    remove_unreferenced_vertices(mesh);
}

/// Run the repair stage on a mesh.
///
/// Failure to reach watertightness is not an error: it is reported through
/// [`RepairResult::annotation`] and surfaces later as `needs_repair`.
///
/// # Example
///
/// ```
/// use mesh_forge::{Mesh, RepairParams, repair_mesh};
///
/// let mut mesh = Mesh::new();
/// let result = repair_mesh(&mut mesh, &RepairParams::default());
/// assert!(!result.watertight);
/// ```
pub fn repair_mesh(mesh: &mut Mesh, params: &RepairParams) -> RepairResult {
    let _timer = OperationTimer::new("repair");
    let mut result = RepairResult::default();

    if mesh.faces.is_empty() {
        warn!("Mesh has no faces, skipping repair");
        result.annotation = Some(Annotation::RepairIncomplete {
            boundary_edges: 0,
            non_manifold_edges: 0,
        });
        return result;
    }

    if params.fix_winding {
        result.faces_flipped = fix_winding_order(mesh);
    }

    if params.fill_holes {
        let fill = fill_holes_with_max_edges(mesh, params.max_hole_edges);
        result.holes_filled = fill.holes_filled;
        result.holes_skipped = fill.holes_skipped;
    }

    if params.orient_outward {
        result.components_reoriented = orient_outward(mesh);
    }

    let mut report = validate_mesh(mesh);
    if !report.is_watertight && params.make_consistent {
        debug!(
            "Mesh still open after hole filling ({} boundary edges), running consistency pass",
            report.boundary_edge_count
        );
        make_consistent(mesh, params);
        result.consistency_pass = true;
        report = validate_mesh(mesh);
    }

    remove_unreferenced_vertices(mesh);
    if params.compute_normals {
        compute_vertex_normals(mesh);
    }

    result.watertight = report.is_watertight;
    result.manifold = report.is_manifold;

    if !report.is_watertight {
        let annotation = Annotation::RepairIncomplete {
            boundary_edges: report.boundary_edge_count,
            non_manifold_edges: report.non_manifold_edge_count,
        };
        log_annotation(&annotation);
        result.annotation = Some(annotation);
    }

    info!(
        "Repair complete: flipped {}, filled {} hole(s), watertight: {}",
        result.faces_flipped, result.holes_filled, result.watertight
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
    use approx::assert_relative_eq;

    fn simple_mesh() -> Mesh {
        Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]],
            &[[0, 1, 2]],
        )
    }

    fn open_box_mesh() -> Mesh {
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
                [0, 1, 5],
                [0, 5, 4],
                [1, 2, 6],
                [1, 6, 5],
                [2, 3, 7],
                [2, 7, 6],
                [3, 0, 4],
                [3, 4, 7],
            ],
        )
    }

    #[test]
    fn test_remove_degenerate_triangles() {
        let mut mesh = simple_mesh();
        mesh.vertices.push(Vertex::from_coords(5.0, 0.0, 0.0));
        mesh.faces.push([0, 1, 3]);
        mesh.faces.push([2, 2, 1]);

        let removed = remove_degenerate_triangles(&mut mesh, DEGENERATE_AREA_EPSILON);
        assert_eq!(removed, 2);
        assert_eq!(mesh.face_count(), 1);
    }

    #[test]
    fn test_weld_vertices() {
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [10.0, 0.0, 0.0],
                [0.0, 10.0, 0.0],
                [10.001, 0.0, 0.0],
                [10.0, 10.0, 0.0],
            ],
            &[[0, 1, 2], [3, 4, 2]],
        );

        let merged = weld_vertices(&mut mesh, 0.01);
        assert_eq!(merged, 1);
        assert_eq!(mesh.faces[1], [1, 4, 2]);
    }

    #[test]
    fn test_weld_exact_only() {
        let mut mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-0.0, 1.0, 0.0]],
            &[[0, 1, 2], [0, 1, 3]],
        );
        assert_eq!(weld_vertices(&mut mesh, 0.0), 1);
        assert_eq!(mesh.faces[1], [0, 1, 2]);
    }

    #[test]
    fn test_remove_unreferenced_preserves_order() {
        let mut mesh = simple_mesh();
        mesh.vertices.insert(1, Vertex::from_coords(100.0, 100.0, 100.0));
        mesh.faces[0] = [0, 2, 3];

        let removed = remove_unreferenced_vertices(&mut mesh);
        assert_eq!(removed, 1);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.faces[0], [0, 1, 2]);
        assert_relative_eq!(mesh.vertices[1].position.x, 10.0);
    }

    #[test]
    fn test_compute_vertex_normals() {
        let mut mesh = simple_mesh();
        compute_vertex_normals(&mut mesh);

        for v in &mesh.vertices {
            let n = v.normal.expect("should have normal");
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_remove_duplicate_faces() {
        let mut mesh = simple_mesh();
        mesh.faces.push([1, 2, 0]);
        mesh.faces.push([0, 2, 1]);
        assert_eq!(remove_duplicate_faces(&mut mesh), 2);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_fix_non_manifold_edges() {
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.5, 2.0, 0.0],
                [0.5, -1.0, 0.0],
                [0.5, 0.0, 0.1],
            ],
            &[[0, 1, 2], [1, 0, 3], [0, 1, 4]],
        );
        assert_eq!(fix_non_manifold_edges(&mut mesh), 1);
        assert_eq!(mesh.face_count(), 2);
        assert!(MeshAdjacency::build(&mesh.faces).is_manifold());
    }

    #[test]
    fn test_repair_fills_small_hole() {
        let mut mesh = open_box_mesh();
        let result = repair_mesh(&mut mesh, &RepairParams::default());
        assert!(result.watertight);
        assert!(result.annotation.is_none());
        assert_eq!(result.holes_filled, 1);
        assert!(!result.consistency_pass);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_repair_orients_inside_out_mesh() {
        let mut mesh = open_box_mesh();
        mesh.flip_faces();
        let result = repair_mesh(&mut mesh, &RepairParams::default());
        assert!(result.watertight);
        assert_relative_eq!(mesh.signed_volume(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_repair_incomplete_is_annotated() {
        let mut mesh = open_box_mesh();
        let params = RepairParams::for_cad();
        let result = repair_mesh(&mut mesh, &params);
        assert!(!result.watertight);
        assert!(result.consistency_pass);
        assert!(matches!(
            result.annotation,
            Some(Annotation::RepairIncomplete {
                boundary_edges: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_repair_empty_mesh_is_non_fatal() {
        let mut mesh = Mesh::new();
        let result = repair_mesh(&mut mesh, &RepairParams::default());
        assert!(!result.watertight);
        assert!(result.annotation.is_some());
    }
}
