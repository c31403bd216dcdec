//! Laplacian smoothing stage.
//!
//! Each iteration moves every vertex toward the centroid of its edge neighbours:
//!
//! ```text
//! v_new = lambda * centroid(N(v)) + (1 - lambda) * v
//! ```
//!
//! Positions for an iteration are computed into a fresh buffer from the
//! previous iteration's positions, so the result does not depend on vertex order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use nalgebra::Point3;
use tracing::debug;

use crate::Mesh;
use crate::adjacency::MeshAdjacency;
use crate::decimate::panic_message;
use crate::error::Annotation;
use crate::tracing_ext::{OperationTimer, log_annotation};

/// Parameters for [`smooth_mesh`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SmoothParams {
    /// Number of iterations. Default: 2
    pub iterations: u32,
    /// Blend factor toward the neighbour centroid, 0.0 to 1.0. Default: 0.5
    pub lambda: f64,
    /// Keep boundary vertices fixed. Default: false
    pub pin_boundary: bool,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            iterations: 2,
            lambda: 0.5,
            pin_boundary: false,
        }
    }
}

impl SmoothParams {
    /// A single light pass.
    pub fn light() -> Self {
        Self {
            iterations: 1,
            lambda: 0.3,
            ..Default::default()
        }
    }
}

/// Outcome of the smoothing stage.
#[derive(Debug, Clone, Default)]
pub struct SmoothResult {
    /// Iterations that completed and were applied.
    pub iterations_completed: usize,
    /// Largest single vertex displacement over all iterations.
    pub max_displacement: f64,
    /// Set when an iteration was rejected.
    pub annotation: Option<Annotation>,
}

/// One smoothing iteration. Returns the new positions and the largest displacement.
fn smooth_step(
    positions: &[Point3<f64>],
    neighbors: &[Vec<u32>],
    pinned: &[bool],
    lambda: f64,
) -> Result<(Vec<Point3<f64>>, f64), String> {
    let mut next = Vec::with_capacity(positions.len());
    let mut max_displacement = 0.0_f64;

    for (i, (p, ring)) in positions.iter().zip(neighbors).enumerate() {
        if ring.is_empty() || pinned[i] {
            next.push(*p);
            continue;
        }

        let sum = ring
            .iter()
            .map(|&n| positions[n as usize].coords)
            .sum::<nalgebra::Vector3<f64>>();
        let centroid = sum / ring.len() as f64;
        let moved = Point3::from(centroid * lambda + p.coords * (1.0 - lambda));

        if !moved.coords.iter().all(|c| c.is_finite()) {
            return Err(format!("vertex {i} moved to a non-finite position"));
        }
        max_displacement = max_displacement.max((moved - p).norm());
        next.push(moved);
    }

    Ok((next, max_displacement))
}

/// Smooth a mesh in place.
///
/// Never fails: if an iteration is rejected (non-finite result or an internal
/// panic), the mesh keeps the positions of the last good iteration and the
/// result carries a `SmoothingFailed` annotation.
///
/// # Example
///
/// ```
/// use mesh_forge::{Mesh, SmoothParams, smooth_mesh};
///
/// let mut mesh = Mesh::from_raw(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
///     &[[0, 1, 2]],
/// );
/// let result = smooth_mesh(&mut mesh, &SmoothParams::default());
/// assert_eq!(result.iterations_completed, 2);
/// ```
pub fn smooth_mesh(mesh: &mut Mesh, params: &SmoothParams) -> SmoothResult {
    let mut result = SmoothResult::default();
    if mesh.faces.is_empty() || params.iterations == 0 {
        return result;
    }

    let _timer = OperationTimer::with_context("smooth", mesh.face_count(), mesh.vertex_count());
    let lambda = params.lambda.clamp(0.0, 1.0);
    let neighbors = MeshAdjacency::vertex_neighbors(&mesh.faces, mesh.vertices.len());

    let mut pinned = vec![false; mesh.vertices.len()];
    if params.pin_boundary {
        for v in MeshAdjacency::build(&mesh.faces).boundary_vertices() {
            pinned[v as usize] = true;
        }
    }

    let mut positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();

    for iteration in 0..params.iterations {
        let step = catch_unwind(AssertUnwindSafe(|| {
            smooth_step(&positions, &neighbors, &pinned, lambda)
        }));
        let failure = match step {
            Ok(Ok((next, displacement))) => {
                positions = next;
                result.max_displacement = result.max_displacement.max(displacement);
                result.iterations_completed += 1;
                debug!(
                    "Smoothing iteration {} max displacement {:.3e}",
                    iteration + 1,
                    displacement
                );
                continue;
            }
            Ok(Err(reason)) => reason,
            Err(panic) => format!("smoothing panicked: {}", panic_message(panic.as_ref())),
        };

        let annotation = Annotation::SmoothingFailed {
            completed_iterations: result.iterations_completed,
            reason: failure,
        };
        log_annotation(&annotation);
        result.annotation = Some(annotation);
        break;
    }

    for (vertex, p) in mesh.vertices.iter_mut().zip(positions) {
        vertex.position = p;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fan_with_raised_center() -> Mesh {
        // Square fan around a center vertex lifted to z = 1.
        Mesh::from_raw(
            &[
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, -1.0, 0.0],
            ],
            &[[0, 1, 2], [0, 2, 3], [0, 3, 4], [0, 4, 1]],
        )
    }

    #[test]
    fn test_center_moves_halfway_to_ring_centroid() {
        let mut mesh = fan_with_raised_center();
        let params = SmoothParams {
            iterations: 1,
            lambda: 0.5,
            pin_boundary: true,
        };
        let result = smooth_mesh(&mut mesh, &params);
        assert_eq!(result.iterations_completed, 1);
        assert_relative_eq!(mesh.vertices[0].position.z, 0.5, epsilon = 1e-12);
        assert_relative_eq!(mesh.vertices[1].position.x, 1.0);
    }

    #[test]
    fn test_unpinned_boundary_moves() {
        let mut mesh = fan_with_raised_center();
        smooth_mesh(&mut mesh, &SmoothParams::default());
        assert!(mesh.vertices[1].position.x < 1.0);
    }

    #[test]
    fn test_isolated_vertex_is_unchanged() {
        let mut mesh = fan_with_raised_center();
        mesh.vertices.push(crate::Vertex::from_coords(9.0, 9.0, 9.0));
        smooth_mesh(&mut mesh, &SmoothParams::default());
        assert_relative_eq!(mesh.vertices[5].position.x, 9.0);
    }

    #[test]
    fn test_non_finite_iteration_keeps_last_good_state() {
        let mut mesh = fan_with_raised_center();
        mesh.vertices[1].position.x = f64::INFINITY;
        let before = mesh.clone();

        let result = smooth_mesh(&mut mesh, &SmoothParams::default());
        assert_eq!(result.iterations_completed, 0);
        assert!(matches!(
            result.annotation,
            Some(Annotation::SmoothingFailed {
                completed_iterations: 0,
                ..
            })
        ));
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_zero_iterations_is_noop() {
        let mut mesh = fan_with_raised_center();
        let before = mesh.clone();
        let params = SmoothParams {
            iterations: 0,
            ..Default::default()
        };
        smooth_mesh(&mut mesh, &params);
        assert_eq!(mesh, before);
    }
}
