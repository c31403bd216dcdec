//! Subcommand implementations.

pub mod batch;
pub mod combine;
pub mod convert;
pub mod formats;
pub mod process;
pub mod score;

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use mesh_forge::{MeshFormat, ProcessConfig};
use tracing::debug;

use crate::ProcessArgs;

/// Read a mesh file, taking the format from the extension or the content.
pub(crate) fn read_input(path: &Path) -> Result<(Vec<u8>, MeshFormat)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let format = MeshFormat::from_path(path)
        .or_else(|| MeshFormat::detect(&bytes))
        .ok_or_else(|| anyhow!("Cannot tell the mesh format of {:?}", path))?;
    debug!("Read {} bytes of {} from {:?}", bytes.len(), format, path);
    Ok((bytes, format))
}

/// Output format named by a file extension.
pub(crate) fn output_format(path: &Path) -> Result<MeshFormat> {
    MeshFormat::from_path(path).ok_or_else(|| {
        anyhow!(
            "Unknown output extension in {:?} (expected one of: {})",
            path,
            MeshFormat::all().map(|f| f.extension()).join(", ")
        )
    })
}

pub(crate) fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))
}

impl ProcessArgs {
    /// Apply command-line overrides on top of `base`.
    pub(crate) fn apply(&self, mut base: ProcessConfig) -> ProcessConfig {
        if let Some(target) = self.target_faces {
            base.target_faces = target;
        }
        if let Some(min_quality) = self.min_quality {
            base.min_quality = min_quality;
        }
        if let Some(max_retries) = self.max_retries {
            base.max_retries = max_retries;
        }
        base.clean &= !self.no_clean;
        base.repair &= !self.no_repair;
        base.decimate &= !self.no_decimate;
        base.smooth &= !self.no_smooth;
        if self.keep_all_components {
            base.clean_params = mesh_forge::CleanParams::keep_all();
        }
        base
    }
}
