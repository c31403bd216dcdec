//! Conversion backends.
//!
//! A [`ConversionBackend`] turns one mesh into bytes for one or more target
//! formats. Two implementations exist:
//!
//! - [`BuiltinBackend`]: in-process writers (polygon codecs, DXF, faceted STEP).
//! - [`ExternalBackend`]: a high-fidelity converter run as a subprocess with a
//!   hard timeout. Optional; its availability is checked once per instance.
//!
//! The conversion router in [`crate::convert`] decides which one to use and
//! turns every [`BackendFailure`] into an annotation plus a built-in fallback.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::convert::{ConversionTarget, capability};
use crate::dxf::export_dxf_string;
use crate::error::{Annotation, MeshError, MeshResult};
use crate::io::{MeshFormat, encode};
use crate::repair::{
    DEGENERATE_AREA_EPSILON, remove_degenerate_triangles, remove_unreferenced_vertices, weld_vertices,
};
#[cfg(feature = "step")]
use crate::step::{StepExportParams, export_step_string};
use crate::Mesh;

/// Interval between `try_wait` polls of a running converter.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on how long the availability check may run.
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of converter stderr kept in annotations.
const STDERR_LIMIT: usize = 2000;

/// Why a backend could not produce output for a call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendFailure {
    /// Not installed, not runnable, or the call could not be set up.
    Unavailable { reason: String },
    /// The process exceeded its timeout and was killed.
    Timeout { timeout: Duration },
    /// The process exited with a failure status.
    NonZeroExit { code: Option<i32>, stderr: String },
}

impl BackendFailure {
    /// The annotation recorded when the router falls back from `backend`.
    pub fn to_annotation(&self, backend: &str) -> Annotation {
        match self {
            BackendFailure::Unavailable { reason } => Annotation::BackendUnavailable {
                backend: backend.to_string(),
                reason: reason.clone(),
            },
            BackendFailure::Timeout { timeout } => Annotation::BackendTimeout {
                backend: backend.to_string(),
                timeout_secs: timeout.as_secs_f64(),
            },
            BackendFailure::NonZeroExit { code, stderr } => Annotation::BackendNonZeroExit {
                backend: backend.to_string(),
                exit_code: *code,
                stderr: stderr.clone(),
            },
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::Unavailable { reason } => write!(f, "backend unavailable: {}", reason),
            BackendFailure::Timeout { timeout } => {
                write!(f, "backend timed out after {:.1}s", timeout.as_secs_f64())
            }
            BackendFailure::NonZeroExit { code: Some(code), .. } => {
                write!(f, "backend exited with status {}", code)
            }
            BackendFailure::NonZeroExit { code: None, .. } => {
                write!(f, "backend terminated by a signal")
            }
        }
    }
}

impl std::error::Error for BackendFailure {}

/// Something that can export a mesh to target formats.
///
/// Implementations are shared by reference across batch workers.
pub trait ConversionBackend: Send + Sync {
    /// Short name recorded in outputs and annotations.
    fn name(&self) -> &str;

    /// Whether the backend can run at all. Cheap after the first call.
    fn is_available(&self) -> bool;

    /// Export `mesh` to every target in one call.
    ///
    /// Returns one buffer per target, in order. An empty buffer means the
    /// backend produced nothing usable for that target.
    fn export(&self, mesh: &Mesh, targets: &[ConversionTarget]) -> Result<Vec<Vec<u8>>, BackendFailure>;
}

/// In-process writers for every format in the capability table.
#[derive(Debug, Clone, Default)]
pub struct BuiltinBackend;

impl BuiltinBackend {
    pub const NAME: &'static str = "builtin";

    /// Encode `mesh` as `format`.
    ///
    /// With a tolerance, vertices closer than it are merged first.
    pub fn encode(&self, mesh: &Mesh, format: MeshFormat, tolerance: Option<f64>) -> MeshResult<Vec<u8>> {
        let welded;
        let mesh = match tolerance {
            Some(tol) if tol > 0.0 => {
                let mut copy = mesh.clone();
                let merged = weld_vertices(&mut copy, tol);
                remove_degenerate_triangles(&mut copy, DEGENERATE_AREA_EPSILON);
                remove_unreferenced_vertices(&mut copy);
                debug!(tolerance = tol, merged, "Welded before export");
                welded = copy;
                &welded
            }
            _ => mesh,
        };

        match format {
            MeshFormat::Glb | MeshFormat::Stl | MeshFormat::Obj | MeshFormat::Ply => encode(mesh, format),
            MeshFormat::Dxf => Ok(export_dxf_string(mesh).text.into_bytes()),
            #[cfg(feature = "step")]
            MeshFormat::Step => {
                Ok(export_step_string(mesh, &StepExportParams::default()).text.into_bytes())
            }
            #[cfg(not(feature = "step"))]
            MeshFormat::Step => Err(MeshError::unsupported_format("step (built without the `step` feature)")),
        }
    }
}

impl ConversionBackend for BuiltinBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    fn export(&self, mesh: &Mesh, targets: &[ConversionTarget]) -> Result<Vec<Vec<u8>>, BackendFailure> {
        targets
            .iter()
            .map(|t| self.encode(mesh, t.format, t.options.tolerance))
            .collect::<MeshResult<Vec<_>>>()
            .map_err(|e: MeshError| BackendFailure::Unavailable { reason: e.to_string() })
    }
}

/// Configuration for the external converter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ExternalBackendConfig {
    /// Executable name (looked up on `PATH`) or absolute path. `None` disables the backend.
    pub executable: Option<PathBuf>,
    /// Name used in outputs and annotations. Default: "external"
    pub name: String,
    /// Arguments of the availability check. Default: ["--version"]
    pub check_args: Vec<String>,
    /// Extra arguments placed before the input path.
    pub extra_args: Vec<String>,
}

impl Default for ExternalBackendConfig {
    fn default() -> Self {
        Self {
            executable: None,
            name: "external".to_string(),
            check_args: vec!["--version".to_string()],
            extra_args: Vec::new(),
        }
    }
}

impl ExternalBackendConfig {
    /// Config for an executable.
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Default::default()
        }
    }
}

/// A converter run as a subprocess:
///
/// ```text
/// <exe> [extra args] <input> -e <out1> [-e <out2> ...] [--settings <file>] [--log <file>]
/// ```
///
/// Each call works in a private temporary directory that is removed when the
/// call returns, so outputs of a killed or failed run are never read.
#[derive(Debug)]
pub struct ExternalBackend {
    config: ExternalBackendConfig,
    availability: OnceLock<Result<(), String>>,
}

impl ExternalBackend {
    pub fn new(config: ExternalBackendConfig) -> Self {
        Self {
            config,
            availability: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ExternalBackendConfig {
        &self.config
    }

    /// Cached availability result; `Err` holds the reason.
    pub fn availability(&self) -> Result<(), String> {
        self.availability.get_or_init(|| self.check_available()).clone()
    }

    fn check_available(&self) -> Result<(), String> {
        let Some(exe) = &self.config.executable else {
            return Err("no executable configured".to_string());
        };

        if exe.is_absolute() {
            return if exe.is_file() {
                info!(backend = %self.config.name, path = ?exe, "External converter found");
                Ok(())
            } else {
                Err(format!("{} does not exist", exe.display()))
            };
        }

        let child = Command::new(exe)
            .args(&self.config.check_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("cannot run {}: {}", exe.display(), e))?;

        // Any exit status counts: only the launch itself matters.
        match wait_with_timeout(child, AVAILABILITY_TIMEOUT) {
            Ok(Some(_)) => {
                info!(backend = %self.config.name, executable = ?exe, "External converter found");
                Ok(())
            }
            Ok(None) => Err(format!("{} did not answer the availability check", exe.display())),
            Err(e) => Err(format!("availability check of {} failed: {}", exe.display(), e)),
        }
    }

    fn run(
        &self,
        exe: &Path,
        mesh: &Mesh,
        targets: &[ConversionTarget],
    ) -> Result<Vec<Vec<u8>>, BackendFailure> {
        let unavailable = |reason: String| BackendFailure::Unavailable { reason };

        let workdir = tempfile::Builder::new()
            .prefix("mesh-forge-convert-")
            .tempdir()
            .map_err(|e| unavailable(format!("cannot create work directory: {}", e)))?;

        let input_format = targets
            .first()
            .and_then(|t| capability(t.format).external_input)
            .unwrap_or(MeshFormat::Stl);
        let input_path = workdir.path().join(format!("input.{}", input_format.extension()));
        let input_bytes = encode(mesh, input_format).map_err(|e| unavailable(e.to_string()))?;
        std::fs::write(&input_path, input_bytes)
            .map_err(|e| unavailable(format!("cannot write converter input: {}", e)))?;

        let outputs: Vec<PathBuf> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| workdir.path().join(format!("output_{}.{}", i, t.format.extension())))
            .collect();

        let mut command = Command::new(exe);
        command.args(&self.config.extra_args).arg(&input_path);
        for out in &outputs {
            command.arg("-e").arg(out);
        }
        if let Some(settings) = targets.iter().find_map(|t| t.options.settings_file.as_ref()) {
            command.arg("--settings").arg(settings);
        }
        if let Some(log) = targets.iter().find_map(|t| t.options.log_file.as_ref()) {
            command.arg("--log").arg(log);
        }

        let stderr_path = workdir.path().join("stderr.txt");
        let stderr_file = File::create(&stderr_path)
            .map_err(|e| unavailable(format!("cannot capture converter stderr: {}", e)))?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_file));

        let timeout = targets
            .iter()
            .map(|t| t.options.timeout)
            .max()
            .unwrap_or(crate::convert::DEFAULT_TIMEOUT);

        debug!(backend = %self.config.name, ?command, timeout_secs = timeout.as_secs_f64(), "Running external converter");
        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| unavailable(format!("cannot run {}: {}", exe.display(), e)))?;

        let status = match wait_with_timeout(child, timeout) {
            Ok(Some(status)) => status,
            Ok(None) => return Err(BackendFailure::Timeout { timeout }),
            Err(e) => return Err(unavailable(format!("lost track of converter process: {}", e))),
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(BackendFailure::NonZeroExit {
                code: status.code(),
                stderr: truncate(stderr.trim(), STDERR_LIMIT),
            });
        }

        info!(
            backend = %self.config.name,
            targets = targets.len(),
            elapsed_ms = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
            "External conversion finished"
        );

        Ok(outputs
            .iter()
            .map(|path| match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(backend = %self.config.name, path = ?path, "Converter output missing: {}", e);
                    Vec::new()
                }
            })
            .collect())
    }
}

impl ConversionBackend for ExternalBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_available(&self) -> bool {
        self.availability().is_ok()
    }

    fn export(&self, mesh: &Mesh, targets: &[ConversionTarget]) -> Result<Vec<Vec<u8>>, BackendFailure> {
        self.availability()
            .map_err(|reason| BackendFailure::Unavailable { reason })?;
        let Some(exe) = self.config.executable.as_deref() else {
            return Err(BackendFailure::Unavailable {
                reason: "no executable configured".to_string(),
            });
        };
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        self.run(exe, mesh, targets)
    }
}

/// Wait for `child`; on timeout kill and reap it and return `Ok(None)`.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            warn!(pid = child.id(), timeout_secs = timeout.as_secs_f64(), "Killing converter after timeout");
            // The process may exit between try_wait and kill.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
