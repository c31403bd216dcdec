//! Connected component analysis for meshes.
//!
//! A connected component is a set of faces reachable from each other across
//! shared edges. Open boundaries and non-manifold edges are tolerated: every
//! face on an edge is linked to every other face on that edge.

use std::cmp::Reverse;

use hashbrown::HashMap;
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::types::Mesh;

/// Result of connected component analysis.
#[derive(Debug, Clone, Default)]
pub struct ComponentAnalysis {
    /// Number of connected components found.
    pub component_count: usize,
    /// Face indices for each component, sorted by component size (largest first).
    pub components: Vec<Vec<u32>>,
    /// Size of the largest component (number of faces).
    pub largest_component_size: usize,
    /// Size of the smallest component (number of faces).
    pub smallest_component_size: usize,
}

impl ComponentAnalysis {
    /// Check if the mesh is fully connected (single component).
    pub fn is_connected(&self) -> bool {
        self.component_count == 1
    }

    /// Get the face indices of the largest component.
    pub fn largest_component(&self) -> &[u32] {
        self.components.first().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl std::fmt::Display for ComponentAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Component Analysis:")?;
        writeln!(f, "  Connected components: {}", self.component_count)?;
        if self.component_count > 1 {
            writeln!(f, "  Component sizes:")?;
            for (i, comp) in self.components.iter().enumerate() {
                writeln!(f, "    Component {}: {} faces", i + 1, comp.len())?;
            }
        }
        Ok(())
    }
}

/// Which components the cleanup stage retains.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "policy", rename_all = "snake_case")
)]
pub enum ComponentPolicy {
    /// Keep every component.
    KeepAll,
    /// Keep only the component with the most faces.
    KeepLargest,
    /// Keep components with at least `min_ratio` × the largest component's face count.
    SizeRatio { min_ratio: f64 },
}

impl Default for ComponentPolicy {
    fn default() -> Self {
        ComponentPolicy::SizeRatio { min_ratio: 0.05 }
    }
}

/// Outcome of applying a [`ComponentPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentFilterResult {
    /// Components found before filtering.
    pub components_found: usize,
    /// Components discarded by the policy.
    pub components_removed: usize,
    /// Faces discarded with them.
    pub faces_removed: usize,
}

/// Find all connected components in a mesh.
///
/// Uses a flood fill starting from each unvisited face.
///
/// # Example
/// ```
/// use mesh_forge::Mesh;
/// use mesh_forge::components::find_connected_components;
///
/// let mesh = Mesh::from_raw(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0],
///       [10.0, 0.0, 0.0], [11.0, 0.0, 0.0], [10.0, 1.0, 0.0]],
///     &[[0, 1, 2], [3, 4, 5]],
/// );
/// assert_eq!(find_connected_components(&mesh).component_count, 2);
/// ```
pub fn find_connected_components(mesh: &Mesh) -> ComponentAnalysis {
    if mesh.faces.is_empty() {
        return ComponentAnalysis::default();
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut face_neighbors: Vec<Vec<u32>> = vec![Vec::new(); face_count];
    for faces in adjacency.edge_to_faces.values() {
        if faces.len() < 2 {
            continue;
        }
        for &a in faces {
            for &b in faces {
                if a != b {
                    face_neighbors[a as usize].push(b);
                }
            }
        }
    }

    let mut visited = vec![false; face_count];
    let mut components: Vec<Vec<u32>> = Vec::new();

    for start_face in 0..face_count {
        if visited[start_face] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start_face as u32];
        visited[start_face] = true;

        while let Some(face_idx) = stack.pop() {
            component.push(face_idx);

            for &neighbor in &face_neighbors[face_idx as usize] {
                if !visited[neighbor as usize] {
                    visited[neighbor as usize] = true;
                    stack.push(neighbor);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    // Stable sort keeps discovery order between equal sizes.
    components.sort_by_key(|c| Reverse(c.len()));

    let component_count = components.len();
    let largest_component_size = components.first().map(|c| c.len()).unwrap_or(0);
    let smallest_component_size = components.last().map(|c| c.len()).unwrap_or(0);

    debug!(
        "Found {} connected component(s) in mesh with {} faces",
        component_count, face_count
    );

    ComponentAnalysis {
        component_count,
        components,
        largest_component_size,
        smallest_component_size,
    }
}

/// Build a compact mesh from a subset of faces, dropping vertices they don't use.
pub fn extract_faces(mesh: &Mesh, face_indices: &[u32]) -> Mesh {
    let mut old_to_new: HashMap<u32, u32> = HashMap::new();
    let mut result = Mesh::with_capacity(face_indices.len(), face_indices.len());

    for &face_idx in face_indices {
        let face = mesh.faces[face_idx as usize];
        let mut remapped = [0u32; 3];
        for (slot, &old) in remapped.iter_mut().zip(face.iter()) {
            *slot = *old_to_new.entry(old).or_insert_with(|| {
                result.vertices.push(mesh.vertices[old as usize].clone());
                (result.vertices.len() - 1) as u32
            });
        }
        result.faces.push(remapped);
    }

    result
}

/// Apply a component retention policy in place.
///
/// Retained faces keep their relative order. Vertices no longer referenced are
/// dropped.
pub fn apply_component_policy(mesh: &mut Mesh, policy: ComponentPolicy) -> ComponentFilterResult {
    let analysis = find_connected_components(mesh);
    let mut result = ComponentFilterResult {
        components_found: analysis.component_count,
        ..Default::default()
    };

    if analysis.component_count <= 1 {
        return result;
    }

    let keep_count = match policy {
        ComponentPolicy::KeepAll => return result,
        ComponentPolicy::KeepLargest => 1,
        ComponentPolicy::SizeRatio { min_ratio } => {
            let threshold = analysis.largest_component_size as f64 * min_ratio.clamp(0.0, 1.0);
            analysis
                .components
                .iter()
                .take_while(|c| c.len() as f64 >= threshold)
                .count()
                .max(1)
        }
    };

    if keep_count == analysis.component_count {
        return result;
    }

    let mut kept: Vec<u32> = analysis.components[..keep_count]
        .iter()
        .flatten()
        .copied()
        .collect();
    kept.sort_unstable();

    result.components_removed = analysis.component_count - keep_count;
    result.faces_removed = mesh.faces.len() - kept.len();

    info!(
        "Keeping {} of {} component(s), removing {} faces",
        keep_count, analysis.component_count, result.faces_removed
    );

    *mesh = extract_faces(mesh, &kept);
    result
}

/// Keep only the largest connected component. Returns the number of components removed.
pub fn keep_largest_component(mesh: &mut Mesh) -> usize {
    apply_component_policy(mesh, ComponentPolicy::KeepLargest).components_removed
}
