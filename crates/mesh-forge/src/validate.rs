//! Mesh validation and reporting.
//!
//! [`validate_mesh`] computes the derived topology facts of a mesh.
//! [`validate_mesh_data`] checks raw indices and coordinates and is run by every decoder.

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::Mesh;
use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult, ValidationIssue};

/// Derived topology facts for a mesh.
#[derive(Debug, Clone)]
pub struct MeshReport {
    /// No boundary edges and every edge shared by exactly two faces.
    pub is_watertight: bool,

    /// No edge with more than two faces and no bow-tie vertices.
    pub is_manifold: bool,

    /// Edges used by a single face.
    pub boundary_edge_count: usize,

    /// Edges shared by three or more faces.
    pub non_manifold_edge_count: usize,

    /// Number of vertices whose faces form more than one fan.
    pub non_manifold_vertex_count: usize,

    pub vertex_count: usize,
    pub face_count: usize,

    /// Distinct undirected edge count.
    pub edge_count: usize,

    /// Axis-aligned `(min, max)` corners.
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,

    /// Extent along x, y and z.
    pub dimensions: Option<(f64, f64, f64)>,

    /// Signed volume (positive = outward normals). Only meaningful when watertight.
    pub signed_volume: f64,

    /// Enclosed volume, present only for watertight meshes.
    pub volume: Option<f64>,

    pub surface_area: f64,

    /// Negative signed volume.
    pub is_inside_out: bool,

    /// Number of face-connected components.
    pub component_count: usize,
}

impl MeshReport {
    /// At least one vertex and one face.
    pub fn is_valid(&self) -> bool {
        self.vertex_count > 0 && self.face_count > 0
    }

    /// Watertight, manifold and outward-facing.
    pub fn is_closed_solid(&self) -> bool {
        self.is_watertight && self.is_manifold && !self.is_inside_out
    }
}

impl std::fmt::Display for MeshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Topology:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(f, "  Edges: {}", self.edge_count)?;
        writeln!(f, "  Components: {}", self.component_count)?;

        if let Some((dx, dy, dz)) = &self.dimensions {
            writeln!(f, "  Dimensions: {:.3} x {:.3} x {:.3}", dx, dy, dz)?;
        }

        writeln!(f, "  Surface Area: {:.3}", self.surface_area)?;
        match self.volume {
            Some(volume) => writeln!(f, "  Volume: {:.3}", volume)?,
            None => writeln!(f, "  Volume: n/a (open surface)")?,
        }

        writeln!(
            f,
            "  Closed: {} ({} open edge(s))",
            if self.is_watertight { "yes" } else { "no" },
            self.boundary_edge_count
        )?;

        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {}, vertices: {})",
            if self.is_manifold { "yes" } else { "no" },
            self.non_manifold_edge_count,
            self.non_manifold_vertex_count
        )?;

        Ok(())
    }
}

/// Compute the topology report for `mesh`.
pub fn validate_mesh(mesh: &Mesh) -> MeshReport {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    let boundary_edge_count = adjacency.boundary_edge_count();
    let non_manifold_edge_count = adjacency.non_manifold_edge_count();
    let non_manifold_vertex_count = adjacency.non_manifold_vertices(&mesh.faces).len();

    let bounds = mesh.bounds();
    let dimensions = bounds.map(|(min, max)| (max.x - min.x, max.y - min.y, max.z - min.z));

    let is_watertight =
        !mesh.faces.is_empty() && boundary_edge_count == 0 && non_manifold_edge_count == 0;
    let signed_volume = mesh.signed_volume();

    let report = MeshReport {
        is_watertight,
        is_manifold: non_manifold_edge_count == 0 && non_manifold_vertex_count == 0,
        boundary_edge_count,
        non_manifold_edge_count,
        non_manifold_vertex_count,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        edge_count: adjacency.edge_count(),
        bounds,
        dimensions,
        signed_volume,
        volume: is_watertight.then_some(signed_volume.abs()),
        surface_area: mesh.surface_area(),
        is_inside_out: signed_volume < 0.0,
        component_count: crate::components::find_connected_components(mesh).component_count,
    };

    debug!("{}", report);

    report
}

/// How [`validate_mesh_data`] treats bad indices and coordinates.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Fail on the first problem instead of collecting it. Defaults to `true`.
    pub reject_on_invalid: bool,
    /// Stop scanning after this many collected issues.
    pub max_issues: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            reject_on_invalid: true,
            max_issues: 100,
        }
    }
}

impl ValidationOptions {
    /// Never fail; gather up to a thousand issues.
    pub fn collect_all() -> Self {
        Self {
            reject_on_invalid: false,
            max_issues: 1000,
        }
    }
}

/// Issues gathered by a non-rejecting [`validate_mesh_data`] run.
#[derive(Debug, Clone, Default)]
pub struct DataValidationResult {
    pub issues: Vec<ValidationIssue>,
    /// Face corners pointing past the vertex array.
    pub invalid_index_count: usize,
    /// NaN or infinite coordinate components.
    pub non_finite_count: usize,
}

impl DataValidationResult {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Validate mesh data for out-of-range indices and non-finite coordinates.
///
/// With `reject_on_invalid` the first problem is returned as an error;
/// otherwise problems are collected up to `max_issues`.
pub fn validate_mesh_data(
    mesh: &Mesh,
    options: &ValidationOptions,
) -> MeshResult<DataValidationResult> {
    let mut result = DataValidationResult::default();
    let vertex_count = mesh.vertices.len();

    'vertices: for (vertex_idx, vertex) in mesh.vertices.iter().enumerate() {
        let coords = [
            ("x", vertex.position.x),
            ("y", vertex.position.y),
            ("z", vertex.position.z),
        ];

        for (coordinate, value) in coords {
            if value.is_finite() {
                continue;
            }
            if options.reject_on_invalid {
                return Err(MeshError::invalid_coordinate(vertex_idx, coordinate, value));
            }
            result.non_finite_count += 1;
            result.issues.push(if value.is_nan() {
                ValidationIssue::NaNCoordinate {
                    vertex_index: vertex_idx,
                    coordinate,
                }
            } else {
                ValidationIssue::InfiniteCoordinate {
                    vertex_index: vertex_idx,
                    coordinate,
                    value,
                }
            });
            if result.issues.len() >= options.max_issues {
                break 'vertices;
            }
        }
    }

    'faces: for (face_idx, face) in mesh.faces.iter().enumerate() {
        if result.issues.len() >= options.max_issues {
            break;
        }
        for &vertex_idx in face {
            if (vertex_idx as usize) < vertex_count {
                continue;
            }
            if options.reject_on_invalid {
                return Err(MeshError::invalid_vertex_index(
                    face_idx,
                    vertex_idx,
                    vertex_count,
                ));
            }
            result.invalid_index_count += 1;
            result.issues.push(ValidationIssue::InvalidVertexIndex {
                face_index: face_idx,
                vertex_index: vertex_idx,
                vertex_count,
            });
            if result.issues.len() >= options.max_issues {
                break 'faces;
            }
        }
    }

    if !result.is_valid() {
        warn!(
            "Mesh data validation found {} issue(s): {} invalid indices, {} non-finite coordinates",
            result.issues.len(),
            result.invalid_index_count,
            result.non_finite_count
        );
    }

    Ok(result)
}

/// [`validate_mesh_data`] with default options, discarding the empty report.
pub fn validate_mesh_data_strict(mesh: &Mesh) -> MeshResult<()> {
    validate_mesh_data(mesh, &ValidationOptions::default())?;
    Ok(())
}
