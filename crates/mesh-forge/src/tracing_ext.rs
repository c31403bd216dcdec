//! Tracing helpers for mesh operations.
//!
//! The library only emits events; applications choose the subscriber:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=mesh_forge=debug for stage details,
//! // RUST_LOG=mesh_forge::timing=info for per-stage timings only.
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: absorbed failures and fallbacks (every [`Annotation`])
//! - **INFO**: stage summaries, timing
//! - **DEBUG**: intermediate states, orchestrator transitions
//! - **TRACE**: detailed mesh state dumps

use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

use crate::error::{Annotation, IssueSeverity};
use crate::quality::QualityMetrics;

/// Span plus wall-clock timer for one pipeline stage; the duration is logged on drop.
///
/// # Example
///
/// ```
/// use mesh_forge::tracing_ext::OperationTimer;
///
/// fn weld_stage() {
///     let _timer = OperationTimer::new("weld");
/// }
/// # weld_stage();
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("mesh_operation", operation = name);
        debug!(target: "mesh_forge::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that also records the input size.
    pub fn with_context(name: &'static str, face_count: usize, vertex_count: usize) -> Self {
        let span = tracing::info_span!(
            "mesh_operation",
            operation = name,
            faces = face_count,
            vertices = vertex_count
        );
        debug!(
            target: "mesh_forge::timing",
            operation = name,
            faces = face_count,
            vertices = vertex_count,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "mesh_forge::timing",
            operation = self.name,
            ms = format!("{:.2}", self.elapsed_ms()),
            "Stage finished"
        );
    }
}

/// Log mesh size and extent at debug level.
pub fn log_mesh_stats(mesh: &crate::Mesh, context: &str) {
    let (lo, hi) = mesh.bounds().unwrap_or_default();
    let extent = hi - lo;

    debug!(
        target: "mesh_forge::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        extent = format!("{:.2} x {:.2} x {:.2}", extent.x, extent.y, extent.z),
        "Mesh state"
    );
    trace!(
        target: "mesh_forge::mesh_state",
        context = context,
        min = format!("{:.4?}", lo),
        max = format!("{:.4?}", hi),
        surface_area = mesh.surface_area(),
        signed_volume = mesh.signed_volume(),
        "Detailed mesh state"
    );
}

/// Log a quality snapshot as structured fields.
pub fn log_metrics(metrics: &QualityMetrics, context: &str) {
    info!(
        target: "mesh_forge::quality",
        context = context,
        score = metrics.overall_score,
        faces = metrics.face_count,
        watertight = metrics.watertight,
        manifold = metrics.manifold,
        needs_repair = metrics.needs_repair,
        needs_decimation = metrics.needs_decimation,
        needs_smoothing = metrics.needs_smoothing,
        "Quality snapshot"
    );
}

/// Log a non-fatal condition at a level matching its severity.
pub fn log_annotation(annotation: &Annotation) {
    match annotation.severity() {
        IssueSeverity::Info => info!(
            target: "mesh_forge::annotations",
            code = annotation.code(),
            "{}",
            annotation
        ),
        IssueSeverity::Warning => warn!(
            target: "mesh_forge::annotations",
            code = annotation.code(),
            "{}",
            annotation
        ),
    }
}

/// Debug-level progress line for batch work.
pub fn log_progress(operation: &str, current: usize, total: usize) {
    let percent = (current * 100).checked_div(total).unwrap_or(0);

    debug!(
        target: "mesh_forge::progress",
        operation = operation,
        current = current,
        total = total,
        percent = percent,
        "Progress update"
    );
}

/// Record a file read or write and whether it worked.
pub fn log_io_operation(operation: &str, path: &std::path::Path, format: &str, success: bool) {
    if success {
        info!(
            target: "mesh_forge::io",
            operation = operation,
            path = %path.display(),
            format = format,
            "File done"
        );
    } else {
        warn!(
            target: "mesh_forge::io",
            operation = operation,
            path = %path.display(),
            format = format,
            "File failed"
        );
    }
}
