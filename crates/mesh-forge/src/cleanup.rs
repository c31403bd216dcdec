//! Cleanup stage: weld, drop degenerate faces, filter stray components, purge.

use tracing::info;

use crate::Mesh;
use crate::components::{ComponentPolicy, apply_component_policy};
use crate::repair::{
    DEFAULT_WELD_EPSILON, DEGENERATE_AREA_EPSILON, remove_degenerate_triangles,
    remove_unreferenced_vertices, weld_vertices,
};
use crate::tracing_ext::OperationTimer;

/// Parameters for [`clean_mesh`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CleanParams {
    /// Vertices closer than this are merged. Default: `1e-8`
    pub weld_tolerance: f64,

    /// Faces with a smaller area are discarded. Default: `1e-10`
    pub min_face_area: f64,

    /// Which connected components survive. Default: 5 % size ratio
    pub component_policy: ComponentPolicy,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            weld_tolerance: DEFAULT_WELD_EPSILON,
            min_face_area: DEGENERATE_AREA_EPSILON,
            component_policy: ComponentPolicy::default(),
        }
    }
}

impl CleanParams {
    /// Keep only the largest connected component.
    pub fn keep_largest() -> Self {
        Self {
            component_policy: ComponentPolicy::KeepLargest,
            ..Default::default()
        }
    }

    /// Never drop components; for inputs known to be multi-part assemblies.
    pub fn keep_all() -> Self {
        Self {
            component_policy: ComponentPolicy::KeepAll,
            ..Default::default()
        }
    }
}

/// What [`clean_mesh`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanResult {
    pub vertices_welded: usize,
    pub degenerate_faces_removed: usize,
    pub components_found: usize,
    pub components_removed: usize,
    pub faces_removed_with_components: usize,
    pub unreferenced_vertices_removed: usize,
}

impl CleanResult {
    /// True if the pass left the mesh untouched.
    pub fn is_noop(&self) -> bool {
        self.vertices_welded == 0
            && self.degenerate_faces_removed == 0
            && self.components_removed == 0
            && self.unreferenced_vertices_removed == 0
    }
}

/// Clean a mesh in place.
///
/// Running it twice with the same params leaves the second pass a no-op.
///
/// # Example
///
/// ```
/// use mesh_forge::{Mesh, CleanParams, clean_mesh};
///
/// // Four vertices, one an exact duplicate.
/// let mut mesh = Mesh::from_raw(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
///     &[[0, 1, 2], [0, 3, 2]],
/// );
/// clean_mesh(&mut mesh, &CleanParams::default());
/// assert_eq!(mesh.vertex_count(), 3);
/// ```
pub fn clean_mesh(mesh: &mut Mesh, params: &CleanParams) -> CleanResult {
    let _timer = OperationTimer::with_context("clean", mesh.face_count(), mesh.vertex_count());
    let mut result = CleanResult {
        vertices_welded: weld_vertices(mesh, params.weld_tolerance),
        degenerate_faces_removed: remove_degenerate_triangles(mesh, params.min_face_area),
        ..Default::default()
    };

    let filter = apply_component_policy(mesh, params.component_policy);
    result.components_found = filter.components_found;
    result.components_removed = filter.components_removed;
    result.faces_removed_with_components = filter.faces_removed;

    result.unreferenced_vertices_removed = remove_unreferenced_vertices(mesh);

    info!(
        "Cleanup: welded {}, dropped {} degenerate face(s), removed {} of {} component(s)",
        result.vertices_welded,
        result.degenerate_faces_removed,
        result.components_removed,
        result.components_found
    );

    result
}
