//! Conversion router.
//!
//! Chooses a backend per target format from a static capability table. Formats
//! that benefit from the high-fidelity external converter go there when it is
//! available; every external failure (not installed, timeout, non-zero exit,
//! missing output) falls back to the built-in writers and is recorded as an
//! [`Annotation`]. A conversion never fails only because the external
//! converter is missing.
//!
//! # Example
//!
//! ```
//! use mesh_forge::convert::{ConversionOptions, ConverterService};
//! use mesh_forge::{Mesh, MeshFormat, io};
//!
//! let mesh = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
//!     &[[0, 1, 2]],
//! );
//! let stl = io::encode(&mesh, MeshFormat::Stl).unwrap();
//!
//! let service = ConverterService::builtin_only();
//! let out = service
//!     .convert(&stl, MeshFormat::Stl, MeshFormat::Dxf, &ConversionOptions::default())
//!     .unwrap();
//! assert_eq!(out.backend, "builtin");
//! assert!(!out.bytes.is_empty());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{BuiltinBackend, ConversionBackend, ExternalBackend, ExternalBackendConfig};
use crate::error::{Annotation, MeshError, MeshResult};
use crate::io::{MeshFormat, decode};
use crate::tracing_ext::{OperationTimer, log_annotation};
use crate::Mesh;

/// Default hard timeout of one external converter call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-target conversion options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ConversionOptions {
    /// Merge vertices closer than this before a built-in export.
    pub tolerance: Option<f64>,
    /// Hard timeout of the external converter. Default: 120 s
    #[cfg_attr(feature = "pipeline-config", serde(with = "duration_secs"))]
    pub timeout: Duration,
    /// Settings file handed to the external converter.
    pub settings_file: Option<PathBuf>,
    /// Log file handed to the external converter.
    pub log_file: Option<PathBuf>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            tolerance: None,
            timeout: DEFAULT_TIMEOUT,
            settings_file: None,
            log_file: None,
        }
    }
}

impl ConversionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Durations as fractional seconds in config files.
#[cfg(feature = "pipeline-config")]
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One requested output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionTarget {
    pub format: MeshFormat,
    pub options: ConversionOptions,
}

impl ConversionTarget {
    pub fn new(format: MeshFormat) -> Self {
        Self {
            format,
            options: ConversionOptions::default(),
        }
    }
}

/// Capability-table row for one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct Capability {
    pub format: MeshFormat,
    /// The built-in backend can write it.
    pub builtin: bool,
    /// Prefer the external converter when available.
    pub prefers_external: bool,
    /// Format the mesh is handed to the external converter in.
    pub external_input: Option<MeshFormat>,
}

/// Static capability table.
pub fn capability(format: MeshFormat) -> Capability {
    match format {
        MeshFormat::Glb | MeshFormat::Stl | MeshFormat::Obj | MeshFormat::Ply => Capability {
            format,
            builtin: true,
            prefers_external: false,
            external_input: None,
        },
        MeshFormat::Step => Capability {
            format,
            builtin: cfg!(feature = "step"),
            prefers_external: true,
            external_input: Some(MeshFormat::Stl),
        },
        MeshFormat::Dxf => Capability {
            format,
            builtin: true,
            prefers_external: true,
            external_input: Some(MeshFormat::Stl),
        },
    }
}

/// The whole table, in [`MeshFormat::all`] order.
pub fn capability_table() -> Vec<Capability> {
    MeshFormat::all().into_iter().map(capability).collect()
}

/// Result of one conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub bytes: Vec<u8>,
    pub format: MeshFormat,
    /// Name of the backend that produced the bytes.
    pub backend: String,
    /// Fallback annotations for this output.
    pub annotations: Vec<Annotation>,
}

/// Long-lived converter handle.
///
/// Created once by the caller and shared by reference across workers; the
/// external converter's availability is checked on first use and cached.
pub struct ConverterService {
    builtin: BuiltinBackend,
    external: Option<Box<dyn ConversionBackend>>,
}

impl std::fmt::Debug for ConverterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterService")
            .field("external", &self.external.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl Default for ConverterService {
    fn default() -> Self {
        Self::builtin_only()
    }
}

impl ConverterService {
    /// Service with an external converter when `config` names an executable.
    pub fn new(config: ExternalBackendConfig) -> Self {
        let external: Option<Box<dyn ConversionBackend>> = if config.executable.is_some() {
            Some(Box::new(ExternalBackend::new(config)))
        } else {
            None
        };
        Self {
            builtin: BuiltinBackend,
            external,
        }
    }

    /// Service that only uses the built-in writers.
    pub fn builtin_only() -> Self {
        Self {
            builtin: BuiltinBackend,
            external: None,
        }
    }

    /// Service with a custom external backend.
    pub fn with_backend(backend: Box<dyn ConversionBackend>) -> Self {
        Self {
            builtin: BuiltinBackend,
            external: Some(backend),
        }
    }

    /// Name of the configured external backend, if any.
    pub fn external_name(&self) -> Option<&str> {
        self.external.as_deref().map(|b| b.name())
    }

    /// Whether the external backend is configured and runnable.
    pub fn external_available(&self) -> bool {
        self.external.as_deref().is_some_and(|b| b.is_available())
    }

    /// Convert `bytes` from one format to another.
    ///
    /// Same-format requests return the input bytes once they decode.
    /// Fails only with `ValidationFailure` or `UnsupportedFormat`.
    pub fn convert(
        &self,
        bytes: &[u8],
        from: MeshFormat,
        to: MeshFormat,
        options: &ConversionOptions,
    ) -> MeshResult<ConversionOutput> {
        let mesh = decode(bytes, from)?;

        if from == to {
            debug!("Conversion {} → {} is a passthrough", from, to);
            return Ok(ConversionOutput {
                bytes: bytes.to_vec(),
                format: to,
                backend: "passthrough".to_string(),
                annotations: Vec::new(),
            });
        }

        let target = ConversionTarget {
            format: to,
            options: options.clone(),
        };
        self.export(&mesh, std::slice::from_ref(&target))?
            .pop()
            .ok_or_else(|| MeshError::unsupported_format(to.tag()))
    }

    /// Export a mesh to several formats.
    ///
    /// Targets preferring the external converter are exported in a single
    /// external invocation. Outputs are returned in target order.
    pub fn export(&self, mesh: &Mesh, targets: &[ConversionTarget]) -> MeshResult<Vec<ConversionOutput>> {
        let _timer = OperationTimer::with_context("convert", mesh.face_count(), mesh.vertex_count());

        for target in targets {
            let cap = capability(target.format);
            if !cap.builtin && !(cap.prefers_external && self.external.is_some()) {
                return Err(MeshError::unsupported_format(target.format.tag()));
            }
        }

        let mut results: Vec<Option<ConversionOutput>> = vec![None; targets.len()];
        let mut pending: Vec<(usize, Vec<Annotation>)> = Vec::new();

        let (external_idx, builtin_idx): (Vec<usize>, Vec<usize>) =
            (0..targets.len()).partition(|&i| capability(targets[i].format).prefers_external);
        pending.extend(builtin_idx.into_iter().map(|i| (i, Vec::new())));

        if !external_idx.is_empty() {
            match self.external.as_deref() {
                None => {
                    // No converter configured is the normal built-in setup, not a fallback.
                    pending.extend(external_idx.into_iter().map(|i| (i, Vec::new())));
                }
                Some(backend) => {
                    let ext_targets: Vec<ConversionTarget> =
                        external_idx.iter().map(|&i| targets[i].clone()).collect();
                    let outcome = if backend.is_available() {
                        backend.export(mesh, &ext_targets)
                    } else {
                        Err(crate::backend::BackendFailure::Unavailable {
                            reason: "not installed or not runnable".to_string(),
                        })
                    };

                    match outcome {
                        Ok(outputs) => {
                            for (slot, &i) in external_idx.iter().enumerate() {
                                match outputs.get(slot) {
                                    Some(bytes) if !bytes.is_empty() => {
                                        results[i] = Some(ConversionOutput {
                                            bytes: bytes.clone(),
                                            format: targets[i].format,
                                            backend: backend.name().to_string(),
                                            annotations: Vec::new(),
                                        });
                                    }
                                    _ => {
                                        let annotation = Annotation::BackendUnavailable {
                                            backend: backend.name().to_string(),
                                            reason: format!(
                                                "no {} output produced",
                                                targets[i].format
                                            ),
                                        };
                                        log_annotation(&annotation);
                                        pending.push((i, vec![annotation]));
                                    }
                                }
                            }
                        }
                        Err(failure) => {
                            let annotation = failure.to_annotation(backend.name());
                            log_annotation(&annotation);
                            pending.extend(external_idx.into_iter().map(|i| (i, vec![annotation.clone()])));
                        }
                    }
                }
            }
        }

        for (i, annotations) in pending {
            let target = &targets[i];
            if !capability(target.format).builtin {
                return Err(MeshError::unsupported_format(target.format.tag()));
            }
            let bytes = self.builtin.encode(mesh, target.format, target.options.tolerance)?;
            results[i] = Some(ConversionOutput {
                bytes,
                format: target.format,
                backend: BuiltinBackend::NAME.to_string(),
                annotations,
            });
        }

        let outputs: Vec<ConversionOutput> = results.into_iter().flatten().collect();
        info!(
            outputs = outputs.len(),
            fallbacks = outputs.iter().filter(|o| !o.annotations.is_empty()).count(),
            "Conversion finished"
        );
        Ok(outputs)
    }
}
