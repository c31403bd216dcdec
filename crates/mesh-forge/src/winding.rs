//! Normal consistency and winding order correction.

use hashbrown::HashSet;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::Mesh;
use crate::adjacency::{MeshAdjacency, edge_key};
use crate::components::find_connected_components;

/// Fix winding order so all faces have consistent orientation.
///
/// Uses BFS flood fill from the lowest-index face of each connected component.
/// For each face, ensures that shared edges are traversed in opposite directions.
/// Non-manifold edges are skipped so a fin cannot flip its neighbours.
///
/// Returns the number of faces flipped.
pub fn fix_winding_order(mesh: &mut Mesh) -> usize {
    if mesh.faces.is_empty() {
        return 0;
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut visited = vec![false; face_count];
    let mut flipped = vec![false; face_count];
    let mut component_count = 0;

    for start_face in 0..face_count {
        if visited[start_face] {
            continue;
        }

        component_count += 1;
        let mut queue: VecDeque<u32> = VecDeque::new();
        queue.push_back(start_face as u32);
        visited[start_face] = true;

        while let Some(face_idx) = queue.pop_front() {
            let face = mesh.faces[face_idx as usize];

            for edge_idx in 0..3 {
                let v0 = face[edge_idx];
                let v1 = face[(edge_idx + 1) % 3];

                let Some(neighbors) = adjacency.edge_to_faces.get(&edge_key(v0, v1)) else {
                    continue;
                };
                if neighbors.len() != 2 {
                    continue;
                }

                for &neighbor_idx in neighbors {
                    if neighbor_idx == face_idx || visited[neighbor_idx as usize] {
                        continue;
                    }
                    visited[neighbor_idx as usize] = true;

                    // Both faces traversing v0 -> v1 the same way means one must flip.
                    let neighbor_face = mesh.faces[neighbor_idx as usize];
                    let same_direction =
                        edge_direction_in_face(&neighbor_face, v0, v1).unwrap_or_default();

                    // The stored face is unflipped, so invert when the current face was flipped.
                    flipped[neighbor_idx as usize] = same_direction != flipped[face_idx as usize];

                    queue.push_back(neighbor_idx);
                }
            }
        }
    }

    let mut total_flipped = 0;
    for (face, &flip) in mesh.faces.iter_mut().zip(flipped.iter()) {
        if flip {
            face.swap(1, 2);
            total_flipped += 1;
        }
    }

    if total_flipped > 0 {
        info!(
            "Fixed winding order: flipped {} faces across {} component(s)",
            total_flipped, component_count
        );
    } else {
        debug!(
            "Winding order already consistent across {} component(s)",
            component_count
        );
    }

    total_flipped
}

/// Flip every closed component whose signed volume is negative.
///
/// Assumes winding is already consistent within each component. Open
/// components are left alone because their volume sign is not meaningful.
/// Returns the number of components flipped.
pub fn orient_outward(mesh: &mut Mesh) -> usize {
    let analysis = find_connected_components(mesh);
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let mut flipped_components = 0;

    for component in &analysis.components {
        let closed = component.iter().all(|&f| {
            let [a, b, c] = mesh.faces[f as usize];
            [(a, b), (b, c), (c, a)].iter().all(|&(x, y)| {
                adjacency
                    .faces_for_edge(x, y)
                    .is_some_and(|faces| faces.len() == 2)
            })
        });
        if !closed {
            continue;
        }

        let signed_volume: f64 = component
            .iter()
            .filter_map(|&f| mesh.triangle(f as usize))
            .map(|tri| tri.v0.coords.dot(&tri.v1.coords.cross(&tri.v2.coords)))
            .sum::<f64>()
            / 6.0;

        if signed_volume < 0.0 {
            for &f in component {
                mesh.faces[f as usize].swap(1, 2);
            }
            flipped_components += 1;
        }
    }

    if flipped_components > 0 {
        info!(
            "Flipped {} inside-out component(s) to face outward",
            flipped_components
        );
    }

    flipped_components
}

/// Count shared manifold edges traversed in the same direction by both faces.
pub fn count_inconsistent_edges(mesh: &Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut count = 0;

    for (&(a, b), faces) in &adjacency.edge_to_faces {
        if faces.len() != 2 || !seen.insert((a, b)) {
            continue;
        }
        let d0 = edge_direction_in_face(&mesh.faces[faces[0] as usize], a, b);
        let d1 = edge_direction_in_face(&mesh.faces[faces[1] as usize], a, b);
        if d0.is_some() && d0 == d1 {
            count += 1;
        }
    }

    count
}

/// Check if edge (a, b) appears in face in the same direction (a -> b).
/// Returns Some(true) if same direction, Some(false) if opposite, None if edge not found.
fn edge_direction_in_face(face: &[u32; 3], a: u32, b: u32) -> Option<bool> {
    for i in 0..3 {
        let v0 = face[i];
        let v1 = face[(i + 1) % 3];

        if v0 == a && v1 == b {
            return Some(true);
        }
        if v0 == b && v1 == a {
            return Some(false);
        }
    }
    None
}
