//! Triangle mesh post-processing for generated 3D assets.
//!
//! Meshes coming out of a generator are noisy: duplicated vertices, slivers,
//! floating debris, holes, far more triangles than a viewer or printer needs.
//! This crate turns them into clean, scored, exportable assets.
//!
//! # Features
//!
//! - **Cleanup**: weld vertices, drop degenerate faces and noise components
//! - **Repair**: consistent outward winding, small-hole filling, manifold fixes
//! - **Decimation**: quadric edge collapse to a face budget
//! - **Smoothing**: Laplacian relaxation with non-finite rollback
//! - **Quality scoring**: a flat [`QualityMetrics`] record and a 1–10 score
//! - **Orchestration**: a bounded retry state machine keeping the best attempt
//! - **Combination**: transforms plus union/difference/intersection with fallbacks
//! - **Conversion**: GLB, STL, OBJ, PLY, STEP and DXF through built-in writers or
//!   an optional external converter
//! - **Batching**: a bounded worker pool with per-item results
//!
//! # Failure model
//!
//! Only undecodable input ([`MeshError::ValidationFailure`]) and unknown or
//! unwritable formats ([`MeshError::UnsupportedFormat`]) are errors. Every other
//! problem is absorbed, logged with `tracing`, and reported as an
//! [`Annotation`] next to the result: a syntactically valid mesh always yields
//! some valid output.
//!
//! # Coordinate System
//!
//! Right-handed; face winding is counter-clockwise when viewed from outside,
//! so normals point outward by the right-hand rule. Units are whatever the
//! generator used; tolerances are absolute.
//!
//! # Quick Start
//!
//! ```
//! use mesh_forge::{Mesh, ProcessConfig, process_mesh};
//!
//! // A closed tetrahedron.
//! let mesh = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.5, 0.5, 1.0]],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! );
//!
//! let outcome = process_mesh(&mesh, &ProcessConfig::default());
//! assert!(outcome.metrics.watertight);
//! assert!((1.0..=10.0).contains(&outcome.metrics.overall_score));
//! ```
//!
//! ## Bytes in, bytes out
//!
//! ```
//! use mesh_forge::{Mesh, MeshFormat, ProcessConfig, io, process};
//!
//! let mesh = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.5, 0.5, 1.0]],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! );
//! let obj = io::encode(&mesh, MeshFormat::Obj).unwrap();
//!
//! let output = process(&obj, MeshFormat::Obj, &ProcessConfig::default()).unwrap();
//! assert_eq!(output.format, MeshFormat::Obj);
//! println!("{}", serde_json::to_string(&output.metrics).unwrap());
//! ```
//!
//! ## Individual stages
//!
//! ```
//! use mesh_forge::{CleanParams, Mesh, RepairParams, ScoreParams, clean_mesh, repair_mesh, score_mesh};
//!
//! let mut mesh = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
//!     &[[0, 1, 2], [0, 3, 2]],
//! );
//! let cleaned = clean_mesh(&mut mesh, &CleanParams::default());
//! assert_eq!(cleaned.vertices_welded, 1);
//!
//! repair_mesh(&mut mesh, &RepairParams::default());
//! let metrics = score_mesh(&mesh, &ScoreParams::default());
//! assert!((1.0..=10.0).contains(&metrics.overall_score));
//! ```
//!
//! ## Combining meshes
//!
//! ```
//! use mesh_forge::combine::{BooleanOp, CombinationRequest, Operand, Transform, combine};
//! use mesh_forge::Mesh;
//!
//! let part = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.5, 0.5, 1.0]],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! );
//! let moved = Operand::new(part.clone()).with_transform(Transform::translate(5.0, 0.0, 0.0));
//! let request = CombinationRequest::new(Operand::new(part), Some(moved), BooleanOp::Concatenate);
//!
//! let outcome = combine(request);
//! assert_eq!(outcome.mesh.face_count(), 8);
//! ```
//!
//! # Supported Formats
//!
//! | Format | Tag    | Decode | Encode | Notes |
//! |--------|--------|--------|--------|-------|
//! | GLB    | `glb`  | ✓      | ✓      | Binary glTF 2.0, primary interchange format |
//! | STL    | `stl`  | ✓      | ✓      | Binary & ASCII on import, binary on export |
//! | OBJ    | `obj`  | ✓      | ✓      | Preserves vertex order |
//! | PLY    | `ply`  | ✓      | ✓      | ASCII & binary on import, polygons fan-triangulated |
//! | STEP   | `step` | ✗      | ✓      | Faceted B-rep built in; external converter preferred |
//! | DXF    | `dxf`  | ✗      | ✓      | R12 `3DFACE` + footprint layer; external converter preferred |

mod error;
mod types;

pub mod adjacency;
pub mod backend;
pub mod batch;
pub mod boolean;
pub mod cleanup;
pub mod combine;
pub mod components;
pub mod convert;
pub mod decimate;
pub mod dxf;
pub mod glb;
pub mod holes;
pub mod io;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod quality;
pub mod repair;
pub mod smooth;
pub mod tracing_ext;
pub mod validate;
pub mod winding;

#[cfg(feature = "step")]
pub mod step;

#[cfg(test)]
mod edge_cases;

pub use error::{
    Annotation, ErrorCode, IssueSeverity, MeshError, MeshLocation, MeshResult, RecoverySuggestion,
    ValidationIssue,
};
pub use types::{Mesh, Triangle, Vertex};

pub use adjacency::MeshAdjacency;
pub use cleanup::{CleanParams, CleanResult, clean_mesh};
pub use components::{ComponentAnalysis, ComponentPolicy, find_connected_components};
pub use decimate::{DecimateParams, DecimateResult, decimate, decimate_mesh_checked};
pub use io::{MeshFormat, decode, decode_auto, encode, load_mesh, save_mesh};
pub use process::{ProcessConfig, ProcessOutcome, ProcessState, ProcessedOutput, process, process_mesh};
pub use quality::{QualityMetrics, ScoreParams, score_mesh};
pub use repair::{RepairParams, RepairResult, repair_mesh};
pub use smooth::{SmoothParams, SmoothResult, smooth_mesh};
pub use validate::{MeshReport, validate_mesh};

pub use combine::{BooleanOp, CombinationRequest, CombineOutcome, Operand, Scale, Transform, combine, combine_and_process};
pub use convert::{ConversionOptions, ConversionOutput, ConversionTarget, ConverterService, capability};

pub use batch::{BatchConfig, BatchReport, run_batch};
#[cfg(feature = "pipeline-config")]
pub use pipeline::PipelineConfigError;
pub use pipeline::{OutputSpec, PipelineConfig, PipelineOutput, run_pipeline};

// Convenience methods on Mesh
impl Mesh {
    /// Load a mesh from a file, choosing the format by extension or content.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh in the polygon format named by the file extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        io::save_mesh(self, path.as_ref())
    }

    /// Topology and geometry report.
    pub fn validate(&self) -> MeshReport {
        validate::validate_mesh(self)
    }

    /// Quality metrics with default scoring parameters.
    pub fn score(&self) -> QualityMetrics {
        quality::score_mesh(self, &ScoreParams::default())
    }

    /// Run the cleanup stage in place with default parameters.
    pub fn clean(&mut self) -> CleanResult {
        cleanup::clean_mesh(self, &CleanParams::default())
    }

    /// Run the repair stage in place.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_forge::{Mesh, RepairParams};
    ///
    /// let mut mesh = Mesh::new();
    /// let result = mesh.repair(&RepairParams::default());
    /// assert_eq!(result.holes_filled, 0);
    /// ```
    pub fn repair(&mut self, params: &RepairParams) -> RepairResult {
        repair::repair_mesh(self, params)
    }

    /// Run the full processing state machine on a copy of this mesh.
    pub fn process(&self, config: &ProcessConfig) -> ProcessOutcome {
        process::process_mesh(self, config)
    }
}
