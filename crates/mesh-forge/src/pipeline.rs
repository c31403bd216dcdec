//! End-to-end pipeline: bytes → processing orchestrator → conversion router.
//!
//! A [`PipelineConfig`] names the processing settings and the requested
//! outputs. With the `pipeline-config` feature it loads from and saves to
//! TOML or JSON, so workflows can be versioned next to the data they process.
//!
//! # Example TOML
//!
//! ```toml
//! name = "cad-handoff"
//! description = "Clean up a generated mesh and hand it to CAD"
//!
//! [process]
//! target_faces = 20000
//! min_quality = 8.0
//!
//! [[outputs]]
//! format = "glb"
//!
//! [[outputs]]
//! format = "step"
//! [outputs.options]
//! timeout = 60.0
//!
//! [converter]
//! executable = "mesh-converter"
//! ```
//!
//! # Example
//!
//! ```
//! use mesh_forge::convert::ConverterService;
//! use mesh_forge::pipeline::{OutputSpec, PipelineConfig, run_pipeline};
//! use mesh_forge::{Mesh, MeshFormat, io};
//!
//! let mesh = Mesh::from_raw(
//!     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.5, 0.5, 1.0]],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! );
//! let bytes = io::encode(&mesh, MeshFormat::Obj).unwrap();
//!
//! let config = PipelineConfig::with_name("demo").add_output(OutputSpec::new(MeshFormat::Dxf));
//! let output = run_pipeline(&bytes, MeshFormat::Obj, &config, &ConverterService::builtin_only()).unwrap();
//! assert_eq!(output.exports.len(), 1);
//! assert!(output.metrics.overall_score >= 1.0);
//! ```

use tracing::info;

use crate::Mesh;
use crate::backend::ExternalBackendConfig;
use crate::convert::{ConversionOptions, ConversionTarget, ConverterService};
use crate::error::{Annotation, MeshResult};
use crate::io::{MeshFormat, decode};
use crate::process::{AttemptRecord, ProcessConfig, ProcessState, process_mesh};
use crate::quality::QualityMetrics;
use crate::tracing_ext::OperationTimer;

/// One requested output of a pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputSpec {
    pub format: MeshFormat,
    #[cfg_attr(feature = "pipeline-config", serde(default))]
    pub options: ConversionOptions,
}

impl OutputSpec {
    pub fn new(format: MeshFormat) -> Self {
        Self {
            format,
            options: ConversionOptions::default(),
        }
    }
}

/// A serializable pipeline configuration.
///
/// With no outputs, the processed mesh is returned in the input format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PipelineConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub process: ProcessConfig,
    pub outputs: Vec<OutputSpec>,
    /// External converter used by [`ConverterService::new`].
    pub converter: ExternalBackendConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn add_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn process(mut self, process: ProcessConfig) -> Self {
        self.process = process;
        self
    }

    /// Converter service for this configuration's external backend.
    pub fn converter_service(&self) -> ConverterService {
        ConverterService::new(self.converter.clone())
    }

    /// Web preview: a light GLB.
    pub fn preset_preview() -> Self {
        Self::with_name("preview")
            .description("Light GLB for web preview")
            .process(ProcessConfig::with_target_faces(20_000))
            .add_output(OutputSpec::new(MeshFormat::Glb))
    }

    /// CAD hand-off: GLB plus STEP and DXF.
    pub fn preset_cad_handoff() -> Self {
        Self::with_name("cad-handoff")
            .description("Cleaned mesh with STEP and DXF exports")
            .process(ProcessConfig {
                min_quality: 8.0,
                ..ProcessConfig::default()
            })
            .add_output(OutputSpec::new(MeshFormat::Glb))
            .add_output(OutputSpec::new(MeshFormat::Step))
            .add_output(OutputSpec::new(MeshFormat::Dxf))
    }
}

#[cfg(feature = "pipeline-config")]
impl PipelineConfig {
    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, PipelineConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> Result<String, PipelineConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_toml(&self, path: impl AsRef<std::path::Path>) -> Result<(), PipelineConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn from_json(json_str: &str) -> Result<Self, PipelineConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn to_json(&self) -> Result<String, PipelineConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Errors loading or saving pipeline configurations.
#[cfg(feature = "pipeline-config")]
#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One produced file.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub format: MeshFormat,
    pub bytes: Vec<u8>,
    /// Backend that wrote it.
    pub backend: String,
}

/// Result of [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub mesh: Mesh,
    pub metrics: QualityMetrics,
    pub state: ProcessState,
    pub attempts: Vec<AttemptRecord>,
    /// Processing annotations followed by conversion fallbacks.
    pub annotations: Vec<Annotation>,
    /// In the order of [`PipelineConfig::outputs`].
    pub exports: Vec<ExportedFile>,
}

/// Decode, process, and export.
///
/// Fails only with `ValidationFailure` (undecodable input) or
/// `UnsupportedFormat` (an output no backend can write).
pub fn run_pipeline(
    bytes: &[u8],
    format: MeshFormat,
    config: &PipelineConfig,
    service: &ConverterService,
) -> MeshResult<PipelineOutput> {
    let _timer = OperationTimer::new("pipeline");
    let mesh = decode(bytes, format)?;
    run_pipeline_mesh(&mesh, format, config, service)
}

/// [`run_pipeline`] for an already decoded mesh.
///
/// `source_format` is the output format when the config requests none.
pub fn run_pipeline_mesh(
    mesh: &Mesh,
    source_format: MeshFormat,
    config: &PipelineConfig,
    service: &ConverterService,
) -> MeshResult<PipelineOutput> {
    if let Some(name) = &config.name {
        info!(pipeline = %name, "Running pipeline");
    }

    let outcome = process_mesh(mesh, &config.process);

    let targets: Vec<ConversionTarget> = if config.outputs.is_empty() {
        vec![ConversionTarget::new(source_format)]
    } else {
        config
            .outputs
            .iter()
            .map(|o| ConversionTarget {
                format: o.format,
                options: o.options.clone(),
            })
            .collect()
    };

    let converted = service.export(&outcome.mesh, &targets)?;

    let mut annotations = outcome.annotations;
    let mut exports = Vec::with_capacity(converted.len());
    for output in converted {
        annotations.extend(output.annotations);
        exports.push(ExportedFile {
            format: output.format,
            bytes: output.bytes,
            backend: output.backend,
        });
    }

    info!(
        score = outcome.metrics.overall_score,
        exports = exports.len(),
        annotations = annotations.len(),
        "Pipeline finished"
    );

    Ok(PipelineOutput {
        mesh: outcome.mesh,
        metrics: outcome.metrics,
        state: outcome.state,
        attempts: outcome.attempts,
        annotations,
        exports,
    })
}
