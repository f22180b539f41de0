//! Edit surface collaborators.
//!
//! An edit surface is an opaque tabular store that curators edit outside the
//! registry. The ledger creates one per session, the exporter writes the
//! snapshot into it, and checkin fetches the edited rows back.

pub mod folder;
pub mod memory;

use std::sync::Arc;

use crate::config::{AppConfig, SurfaceKind};
use crate::errors::SurfaceError;
use crate::values::SheetRow;

pub use folder::FolderSurface;
pub use memory::MemorySurface;

/// Contract for an external tabular store.
pub trait EditSurface: Send + Sync {
    /// Create an empty surface and return its identifier.
    fn create(&self, title: &str) -> Result<String, SurfaceError>;

    /// Replace the surface content with `rows` laid out in `header` order.
    fn write(&self, surface_id: &str, header: &[&str], rows: &[SheetRow])
        -> Result<(), SurfaceError>;

    /// Read the surface content back, rows in order.
    fn fetch(&self, surface_id: &str) -> Result<Vec<SheetRow>, SurfaceError>;
}

/// Build the edit surface selected by the configuration.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn EditSurface>, SurfaceError> {
    let surface: Arc<dyn EditSurface> = match config.surface.kind {
        SurfaceKind::Folder => Arc::new(FolderSurface::new(config.surface_dir())?),
        SurfaceKind::Memory => Arc::new(MemorySurface::new()),
    };
    Ok(surface)
}
