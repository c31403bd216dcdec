//! Hole detection and small-hole filling.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::{Mesh, Triangle};

/// A boundary loop representing a hole in the mesh.
///
/// Vertices are ordered so that triangles built in loop order wind
/// consistently with the faces around the hole.
#[derive(Debug, Clone)]
pub struct BoundaryLoop {
    /// Ordered list of vertex indices forming the loop.
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    /// Number of edges (and vertices) in the loop.
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Result of a hole filling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoleFillResult {
    /// Holes detected.
    pub holes_found: usize,
    /// Holes filled.
    pub holes_filled: usize,
    /// Holes skipped for exceeding the edge limit.
    pub holes_skipped: usize,
    /// Triangles added.
    pub faces_added: usize,
}

/// Detect all closed boundary loops (holes) in the mesh.
///
/// Each boundary edge a→b of a face contributes the reversed half-edge b→a to
/// the hole, so loops come out oriented for filling. Open chains that never
/// close (only possible on non-manifold boundaries) are dropped.
pub fn detect_holes(mesh: &Mesh, adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let mut next: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut edge_total = 0;

    for (edge, faces) in &adjacency.edge_to_faces {
        if faces.len() != 1 {
            continue;
        }
        let face = mesh.faces[faces[0] as usize];
        let (a, b) = *edge;
        // Orientation of the edge inside its only face.
        let forward = (0..3).any(|i| face[i] == a && face[(i + 1) % 3] == b);
        let (from, to) = if forward { (b, a) } else { (a, b) };
        next.entry(from).or_default().push(to);
        edge_total += 1;
    }

    if edge_total == 0 {
        return Vec::new();
    }
    debug!("Found {} boundary edges", edge_total);

    let mut starts: Vec<u32> = next.keys().copied().collect();
    starts.sort_unstable();

    let mut used: HashSet<(u32, u32)> = HashSet::new();
    let mut loops = Vec::new();

    for start in starts {
        loop {
            let Some(first) = next[&start].iter().copied().find(|&t| !used.contains(&(start, t)))
            else {
                break;
            };

            let mut loop_vertices = vec![start];
            used.insert((start, first));
            let mut current = first;
            let mut closed = false;

            while loop_vertices.len() <= edge_total {
                if current == start {
                    closed = true;
                    break;
                }
                loop_vertices.push(current);
                let candidate = next
                    .get(&current)
                    .and_then(|targets| targets.iter().copied().find(|&t| !used.contains(&(current, t))));
                match candidate {
                    Some(t) => {
                        used.insert((current, t));
                        current = t;
                    }
                    None => break,
                }
            }

            if closed && loop_vertices.len() >= 3 {
                loops.push(BoundaryLoop {
                    vertices: loop_vertices,
                });
            } else if !closed {
                warn!("Boundary chain starting at vertex {} is not closed", start);
            }
        }
    }

    debug!(
        "Detected {} holes (boundary loops), sizes: {:?}",
        loops.len(),
        loops.iter().map(|l| l.edge_count()).collect::<Vec<_>>()
    );

    loops
}

/// Fill a hole using ear clipping triangulation.
///
/// Returns the new triangles to add to the mesh.
pub fn fill_hole_ear_clipping(mesh: &Mesh, boundary: &BoundaryLoop) -> Vec<[u32; 3]> {
    let n = boundary.vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let positions: Vec<Point3<f64>> = boundary
        .vertices
        .iter()
        .map(|&idx| mesh.vertices[idx as usize].position)
        .collect();

    let hole_normal = compute_hole_normal(&positions);

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    while remaining.len() > 3 {
        let len = remaining.len();
        let ear = (0..len).find(|&i| {
            let prev = remaining[(i + len - 1) % len];
            let next = remaining[(i + 1) % len];
            is_ear(&positions, &remaining, prev, remaining[i], next, &hole_normal)
        });

        let Some(i) = ear else {
            debug!(
                "Ear clipping stuck with {} vertices remaining, using fan triangulation",
                remaining.len()
            );
            break;
        };

        let prev = remaining[(i + len - 1) % len];
        let next = remaining[(i + 1) % len];
        triangles.push([
            boundary.vertices[prev],
            boundary.vertices[remaining[i]],
            boundary.vertices[next],
        ]);
        remaining.remove(i);
    }

    // Fan over whatever is left (exactly one triangle when clipping finished).
    for i in 1..remaining.len().saturating_sub(1) {
        triangles.push([
            boundary.vertices[remaining[0]],
            boundary.vertices[remaining[i]],
            boundary.vertices[remaining[i + 1]],
        ]);
    }

    triangles
}

/// Newell normal of the loop.
fn compute_hole_normal(positions: &[Point3<f64>]) -> Vector3<f64> {
    let n = positions.len();
    let centroid = positions
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n as f64;

    let mut normal = Vector3::zeros();
    for i in 0..n {
        let v0 = positions[i].coords - centroid;
        let v1 = positions[(i + 1) % n].coords - centroid;
        normal += v0.cross(&v1);
    }

    normal
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector3::z)
}

/// Check if vertex at index `curr` forms a valid ear.
fn is_ear(
    positions: &[Point3<f64>],
    remaining: &[usize],
    prev: usize,
    curr: usize,
    next: usize,
    hole_normal: &Vector3<f64>,
) -> bool {
    let p_prev = positions[prev];
    let p_curr = positions[curr];
    let p_next = positions[next];

    let Some(tri_normal) = Triangle::new(p_prev, p_curr, p_next).normal() else {
        return false;
    };

    // Reflex corner.
    if tri_normal.dot(hole_normal) <= 0.0 {
        return false;
    }

    !remaining.iter().any(|&idx| {
        idx != prev
            && idx != curr
            && idx != next
            && point_in_triangle_2d(&positions[idx], &p_prev, &p_curr, &p_next, hole_normal)
    })
}

/// Check if point is inside triangle (projected onto plane defined by normal).
fn point_in_triangle_2d(
    p: &Point3<f64>,
    v0: &Point3<f64>,
    v1: &Point3<f64>,
    v2: &Point3<f64>,
    normal: &Vector3<f64>,
) -> bool {
    // Project to 2D by dropping the axis most aligned with normal.
    let abs_normal = normal.abs();
    let project = |q: &Point3<f64>| -> (f64, f64) {
        if abs_normal.z >= abs_normal.x && abs_normal.z >= abs_normal.y {
            (q.x, q.y)
        } else if abs_normal.y >= abs_normal.x {
            (q.x, q.z)
        } else {
            (q.y, q.z)
        }
    };

    let (p, a, b, c) = (project(p), project(v0), project(v1), project(v2));
    let sign = |p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)| -> f64 {
        (p1.0 - p3.0) * (p2.1 - p3.1) - (p2.0 - p3.0) * (p1.1 - p3.1)
    };

    let d1 = sign(p, a, b);
    let d2 = sign(p, b, c);
    let d3 = sign(p, c, a);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;

    !(has_neg && has_pos)
}

/// Fill all holes with at most `max_hole_edges` edges.
///
/// Holes are triangulated in parallel with rayon; each hole only reads vertex
/// positions, and the new triangles are merged afterwards.
pub fn fill_holes_with_max_edges(mesh: &mut Mesh, max_hole_edges: usize) -> HoleFillResult {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(mesh, &adjacency);

    let holes_found = holes.len();
    let (fillable, skipped): (Vec<_>, Vec<_>) = holes
        .into_iter()
        .partition(|hole| hole.edge_count() <= max_hole_edges);

    for hole in &skipped {
        debug!(
            "Skipping large hole with {} edges (max: {})",
            hole.edge_count(),
            max_hole_edges
        );
    }

    let all_new_triangles: Vec<Vec<[u32; 3]>> = fillable
        .par_iter()
        .map(|hole| fill_hole_ear_clipping(mesh, hole))
        .collect();

    let mut result = HoleFillResult {
        holes_found,
        holes_skipped: skipped.len(),
        ..Default::default()
    };

    for triangles in all_new_triangles {
        if triangles.is_empty() {
            continue;
        }
        result.holes_filled += 1;
        result.faces_added += triangles.len();
        mesh.faces.extend(triangles);
    }

    if result.holes_filled > 0 {
        info!(
            "Filled {} of {} hole(s) with {} triangles",
            result.holes_filled, holes_found, result.faces_added
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::winding::count_inconsistent_edges;

    fn open_box_mesh() -> Mesh {
        // A unit box missing its top face.
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
    fn test_detect_holes() {
        let mesh = open_box_mesh();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&mesh, &adjacency);

        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
    }

    #[test]
    fn test_fill_holes_consistent_and_outward() {
        let mut mesh = open_box_mesh();

        let result = fill_holes_with_max_edges(&mut mesh, 32);

        assert_eq!(result.holes_filled, 1);
        assert_eq!(result.faces_added, 2);
        assert!(MeshAdjacency::build(&mesh.faces).is_watertight());
        assert_eq!(count_inconsistent_edges(&mesh), 0);
        assert!((mesh.signed_volume() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_holes_skipped() {
        let mut mesh = open_box_mesh();
        let result = fill_holes_with_max_edges(&mut mesh, 3);
        assert_eq!(result.holes_found, 1);
        assert_eq!(result.holes_skipped, 1);
        assert_eq!(mesh.face_count(), 10);
    }

    #[test]
    fn test_no_holes_in_closed_mesh() {
        let mut mesh = open_box_mesh();
        fill_holes_with_max_edges(&mut mesh, 32);
        let result = fill_holes_with_max_edges(&mut mesh, 32);
        assert_eq!(result, HoleFillResult::default());
    }
}
