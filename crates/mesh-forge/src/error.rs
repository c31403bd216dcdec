//! Error types for mesh operations with rich diagnostics.
//!
//! Two kinds of problems are modelled here:
//!
//! - [`MeshError`]: fatal errors that are returned to the caller. Processing only
//!   surfaces input that cannot be decoded ([`MeshError::ValidationFailure`]) and
//!   formats or conversions nobody can produce ([`MeshError::UnsupportedFormat`]).
//! - [`Annotation`]: non-fatal conditions (incomplete repair, decimation fallback,
//!   backend fallback, ...) that are absorbed, logged and attached to results.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-1xxx`: I/O errors (file reading, writing)
//! - `MESH-2xxx`: Validation errors (undecodable input, topology, coordinates)
//! - `MESH-3xxx`: Processing errors (operations that couldn't complete)
//! - `MESH-4xxx`: Format errors (unsupported formats, encoding)
//! - `MESH-5xxx`: Annotations (non-fatal, attached to results)
//!
//! # Example
//!
//! ```
//! use mesh_forge::{MeshError, ErrorCode};
//!
//! let err = MeshError::invalid_vertex_index(5, 100, 50);
//! assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
//! assert_eq!(err.code().as_str(), "MESH-2002");
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes for mesh operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// MESH-1001: Failed to read file
    IoRead = 1001,
    /// MESH-1002: Failed to write file
    IoWrite = 1002,

    // Validation errors (2xxx)
    /// MESH-2001: Input bytes are not a decodable mesh
    ValidationFailure = 2001,
    /// MESH-2002: Face references invalid vertex index
    InvalidVertexIndex = 2002,
    /// MESH-2003: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2003,

    // Processing errors (3xxx)
    /// MESH-3001: Decimation failed
    DecimationFailed = 3001,
    /// MESH-3002: Boolean operation failed
    BooleanFailed = 3002,

    // Format errors (4xxx)
    /// MESH-4001: Unsupported format or conversion
    UnsupportedFormat = 4001,
    /// MESH-4002: Encoding into a format failed
    EncodeFailed = 4002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ValidationFailure => "MESH-2001",
            ErrorCode::InvalidVertexIndex => "MESH-2002",
            ErrorCode::InvalidCoordinate => "MESH-2003",
            ErrorCode::DecimationFailed => "MESH-3001",
            ErrorCode::BooleanFailed => "MESH-3002",
            ErrorCode::UnsupportedFormat => "MESH-4001",
            ErrorCode::EncodeFailed => "MESH-4002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for mesh errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-export the file from the original software with different settings.
    ReexportFile { format: Option<String> },
    /// Run repair operations to fix the issue.
    RunRepair { operations: Vec<String> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Check the original mesh for issues.
    CheckSourceMesh { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportFile { format } => {
                if let Some(fmt) = format {
                    write!(f, "Try re-exporting the mesh as {} from its generator", fmt)
                } else {
                    write!(f, "Try re-exporting the mesh from its generator")
                }
            }
            RecoverySuggestion::RunRepair { operations } => {
                write!(f, "Run repair operations: {}", operations.join(", "))
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::CheckSourceMesh { checks } => {
                write!(f, "Check the source mesh for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
        }
    }
}

/// Location information for mesh errors.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex { index: usize },
    /// Error at a specific face.
    Face { index: usize },
    /// Error in a file.
    File { path: PathBuf },
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {}", index),
            MeshLocation::Face { index } => write!(f, "face {}", index),
            MeshLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur during mesh operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}")]
    #[diagnostic(
        code(mesh::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(mesh::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input bytes could not be decoded as a mesh.
    #[error("input is not a valid {format} mesh: {details}")]
    #[diagnostic(
        code(mesh::validation::decode),
        help(
            "The data may be truncated or in a different format than declared. Try auto-detection or re-export from the generator."
        )
    )]
    ValidationFailure { format: String, details: String },

    /// Unsupported format, or a conversion missing from the capability table.
    #[error("unsupported format: {format}")]
    #[diagnostic(
        code(mesh::format::unsupported),
        help("Run `mesh formats` to list what can be read and written")
    )]
    UnsupportedFormat { format: String },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Check the generator's export settings; the index buffer is inconsistent.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help("Check for numerical issues in the source data.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// Decimation failed.
    #[error("decimation failed: {details}")]
    #[diagnostic(
        code(mesh::decimate::failed),
        help("Try a higher target face count or repair the mesh before decimation.")
    )]
    DecimationFailed { details: String },

    /// Boolean operation failed.
    #[error("boolean {operation} failed: {details}")]
    #[diagnostic(
        code(mesh::boolean::failed),
        help("Ensure both meshes are watertight and manifold. Try `mesh process` on both inputs first.")
    )]
    BooleanFailed { operation: String, details: String },

    /// Encoding a mesh into a format failed.
    #[error("failed to encode {format}: {details}")]
    #[diagnostic(code(mesh::format::encode))]
    EncodeFailed { format: String, details: String },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ValidationFailure { .. } => ErrorCode::ValidationFailure,
            MeshError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::DecimationFailed { .. } => ErrorCode::DecimationFailed,
            MeshError::BooleanFailed { .. } => ErrorCode::BooleanFailed,
            MeshError::EncodeFailed { .. } => ErrorCode::EncodeFailed,
        }
    }

    /// Whether this error is one of the two kinds processing surfaces to callers.
    ///
    /// Index and coordinate problems found while decoding count as validation failures.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MeshError::ValidationFailure { .. }
                | MeshError::UnsupportedFormat { .. }
                | MeshError::InvalidVertexIndex { .. }
                | MeshError::InvalidCoordinate { .. }
        )
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::IoRead { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            MeshError::IoWrite { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            MeshError::ValidationFailure { .. } => RecoverySuggestion::ReexportFile {
                format: Some("GLB or binary STL".into()),
            },
            MeshError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec![
                    "GLB".into(),
                    "STL".into(),
                    "OBJ".into(),
                    "PLY".into(),
                    "STEP".into(),
                    "DXF".into(),
                ],
            },
            MeshError::InvalidVertexIndex { .. } => RecoverySuggestion::ReexportFile { format: None },
            MeshError::InvalidCoordinate { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["coordinate values".into(), "export precision".into()],
            },
            MeshError::DecimationFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("target_faces".into(), "try a higher value".into())],
            },
            MeshError::BooleanFailed { .. } => RecoverySuggestion::RunRepair {
                operations: vec!["clean".into(), "repair".into()],
            },
            MeshError::EncodeFailed { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["GLB".into(), "STL".into()],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            MeshError::InvalidVertexIndex { face_index, .. } => {
                Some(MeshLocation::Face { index: *face_index })
            }
            MeshError::InvalidCoordinate { vertex_index, .. } => Some(MeshLocation::Vertex {
                index: *vertex_index,
            }),
            MeshError::IoRead { path, .. } | MeshError::IoWrite { path, .. } => {
                Some(MeshLocation::File { path: path.clone() })
            }
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ValidationFailure error.
    pub fn validation_failure(format: impl Into<String>, details: impl Into<String>) -> Self {
        MeshError::ValidationFailure {
            format: format.into(),
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        MeshError::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        MeshError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        MeshError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    /// Create a DecimationFailed error.
    pub fn decimation_failed(details: impl Into<String>) -> Self {
        MeshError::DecimationFailed {
            details: details.into(),
        }
    }

    /// Create a BooleanFailed error.
    pub fn boolean_failed(operation: impl Into<String>, details: impl Into<String>) -> Self {
        MeshError::BooleanFailed {
            operation: operation.into(),
            details: details.into(),
        }
    }

    /// Create an EncodeFailed error.
    pub fn encode_failed(format: impl Into<String>, details: impl Into<String>) -> Self {
        MeshError::EncodeFailed {
            format: format.into(),
            details: details.into(),
        }
    }
}

/// Issues collected while validating raw mesh data.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// Face references a vertex index that doesn't exist.
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },
    /// Vertex has NaN coordinate.
    NaNCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
    },
    /// Vertex has infinite coordinate.
    InfiniteCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::InvalidVertexIndex {
                face_index,
                vertex_index,
                vertex_count,
            } => write!(
                f,
                "face {} references vertex {}, but mesh only has {} vertices",
                face_index, vertex_index, vertex_count
            ),
            ValidationIssue::NaNCoordinate {
                vertex_index,
                coordinate,
            } => write!(f, "vertex {} has NaN {} coordinate", vertex_index, coordinate),
            ValidationIssue::InfiniteCoordinate {
                vertex_index,
                coordinate,
                value,
            } => write!(
                f,
                "vertex {} has infinite {} coordinate ({})",
                vertex_index, coordinate, value
            ),
        }
    }
}

/// Severity levels for annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum IssueSeverity {
    /// Informational, no action needed.
    Info,
    /// Output was produced through a fallback or is below expectations.
    Warning,
}

/// A non-fatal condition absorbed during processing, combination or conversion.
///
/// Annotations never stop a run. They are logged with `warn!`/`info!` where they
/// occur and attached to the returned outcome so callers can persist them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum Annotation {
    /// Mesh is still not watertight (or not manifold) after repair.
    RepairIncomplete {
        boundary_edges: usize,
        non_manifold_edges: usize,
    },
    /// Decimation could not run on this input; the original mesh was kept.
    DecimationUnavailable { reason: String },
    /// Decimation failed part-way; the original mesh was kept.
    DecimationFailed { reason: String },
    /// A smoothing iteration failed; the last good iteration was kept.
    SmoothingFailed {
        completed_iterations: usize,
        reason: String,
    },
    /// Retries were exhausted; the best attempt was returned.
    QualityBelowThreshold {
        best_score: f64,
        min_quality: f64,
        attempts: usize,
    },
    /// A boolean operation was infeasible and the fallback chain applied.
    BooleanOperationInfeasible {
        operation: String,
        fallback: String,
        reason: String,
    },
    /// The external conversion backend is not installed or not runnable.
    BackendUnavailable { backend: String, reason: String },
    /// The external conversion backend exceeded its timeout and was killed.
    BackendTimeout { backend: String, timeout_secs: f64 },
    /// The external conversion backend exited with a failure status.
    BackendNonZeroExit {
        backend: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl Annotation {
    /// Code in the `MESH-5xxx` range for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Annotation::RepairIncomplete { .. } => "MESH-5001",
            Annotation::DecimationUnavailable { .. } => "MESH-5002",
            Annotation::DecimationFailed { .. } => "MESH-5003",
            Annotation::SmoothingFailed { .. } => "MESH-5004",
            Annotation::QualityBelowThreshold { .. } => "MESH-5005",
            Annotation::BooleanOperationInfeasible { .. } => "MESH-5006",
            Annotation::BackendUnavailable { .. } => "MESH-5007",
            Annotation::BackendTimeout { .. } => "MESH-5008",
            Annotation::BackendNonZeroExit { .. } => "MESH-5009",
        }
    }

    /// Severity of the condition.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            Annotation::DecimationUnavailable { .. } | Annotation::BackendUnavailable { .. } => {
                IssueSeverity::Info
            }
            _ => IssueSeverity::Warning,
        }
    }

    /// Whether this annotation records a conversion backend fallback.
    pub fn is_backend_fallback(&self) -> bool {
        matches!(
            self,
            Annotation::BackendUnavailable { .. }
                | Annotation::BackendTimeout { .. }
                | Annotation::BackendNonZeroExit { .. }
        )
    }
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Annotation::RepairIncomplete {
                boundary_edges,
                non_manifold_edges,
            } => write!(
                f,
                "repair incomplete: {} boundary edges, {} non-manifold edges remain",
                boundary_edges, non_manifold_edges
            ),
            Annotation::DecimationUnavailable { reason } => {
                write!(f, "decimation unavailable, original mesh kept: {}", reason)
            }
            Annotation::DecimationFailed { reason } => {
                write!(f, "decimation failed, original mesh kept: {}", reason)
            }
            Annotation::SmoothingFailed {
                completed_iterations,
                reason,
            } => write!(
                f,
                "smoothing failed after {} iteration(s), last good state kept: {}",
                completed_iterations, reason
            ),
            Annotation::QualityBelowThreshold {
                best_score,
                min_quality,
                attempts,
            } => write!(
                f,
                "quality below threshold: best score {:.1} < {:.1} after {} attempt(s)",
                best_score, min_quality, attempts
            ),
            Annotation::BooleanOperationInfeasible {
                operation,
                fallback,
                reason,
            } => write!(
                f,
                "boolean {} infeasible ({}), fell back to {}",
                operation, reason, fallback
            ),
            Annotation::BackendUnavailable { backend, reason } => {
                write!(f, "backend {} unavailable: {}", backend, reason)
            }
            Annotation::BackendTimeout {
                backend,
                timeout_secs,
            } => write!(f, "backend {} timed out after {:.0}s", backend, timeout_secs),
            Annotation::BackendNonZeroExit {
                backend,
                exit_code,
                stderr,
            } => {
                match exit_code {
                    Some(code) => write!(f, "backend {} exited with status {}", backend, code)?,
                    None => write!(f, "backend {} was terminated by a signal", backend)?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
        assert_eq!(err.code().as_str(), "MESH-2002");

        let err = MeshError::validation_failure("stl", "truncated header");
        assert_eq!(err.code().as_str(), "MESH-2001");
        assert!(err.is_input_error());

        let err = MeshError::decimation_failed("no edges");
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = MeshError::unsupported_format("fbx");
        match err.recovery_suggestion() {
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                assert!(suggested.contains(&"GLB".to_string()));
            }
            other => panic!("Expected UseDifferentFormat suggestion, got {:?}", other),
        }
    }

    #[test]
    fn test_location_info() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        match err.location() {
            Some(MeshLocation::Face { index }) => assert_eq!(index, 5),
            other => panic!("Expected Face location, got {:?}", other),
        }
        assert!(MeshError::unsupported_format("fbx").location().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        let display = format!("{}", err);
        assert!(display.contains("face 5"));
        assert!(display.contains("vertex 100"));
        assert!(display.contains("50 vertices"));

        let err = MeshError::validation_failure("glb", "bad magic");
        assert_eq!(err.to_string(), "input is not a valid glb mesh: bad magic");
    }

    #[test]
    fn test_annotation_codes_and_severity() {
        let a = Annotation::BackendUnavailable {
            backend: "freecad".into(),
            reason: "not found".into(),
        };
        assert_eq!(a.code(), "MESH-5007");
        assert_eq!(a.severity(), IssueSeverity::Info);
        assert!(a.is_backend_fallback());

        let q = Annotation::QualityBelowThreshold {
            best_score: 7.0,
            min_quality: 11.0,
            attempts: 3,
        };
        assert_eq!(q.severity(), IssueSeverity::Warning);
        assert!(q.to_string().contains("quality below threshold"));
        assert!(!q.is_backend_fallback());
    }

    #[test]
    fn test_annotation_display_signal_exit() {
        let a = Annotation::BackendNonZeroExit {
            backend: "conv".into(),
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(a.to_string(), "backend conv was terminated by a signal");
    }

    #[cfg(feature = "pipeline-config")]
    #[test]
    fn test_annotation_serializes_with_kind_tag() {
        let a = Annotation::DecimationFailed {
            reason: "panic".into(),
        };
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"kind\":\"decimation_failed\""));
    }
}
