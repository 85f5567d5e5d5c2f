//! Binding to the pdfium shared library.
//!
//! Lookup order:
//! 1. the path given in [`crate::config::AnalyzerConfig::pdfium_library`]
//! 2. `PDFIUM_LIB_PATH`
//! 3. the system library search path
//!
//! A path may name the library file itself or the directory containing it.

use crate::error::PaperError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium. Must be called on the thread that will use the handle.
pub fn bind(explicit: Option<&Path>) -> Result<Pdfium, PaperError> {
    if let Some(path) = explicit {
        return bind_at(path);
    }

    if let Ok(env_path) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !env_path.is_empty() {
            return bind_at(Path::new(&env_path));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PaperError::PdfiumBindingFailed(format!("system library: {e:?}")))
}

fn bind_at(path: &Path) -> Result<Pdfium, PaperError> {
    let lib = library_file(path);
    debug!("Binding pdfium from {}", lib.display());
    Pdfium::bind_to_library(&lib)
        .map(Pdfium::new)
        .map_err(|e| PaperError::PdfiumBindingFailed(format!("{}: {e:?}", lib.display())))
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}
