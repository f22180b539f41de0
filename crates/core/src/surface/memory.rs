//! In-process edit surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use super::EditSurface;
use crate::errors::SurfaceError;
use crate::values::SheetRow;

#[derive(Debug, Clone, Default)]
struct Sheet {
    title: String,
    header: Vec<String>,
    rows: Vec<SheetRow>,
}

/// Edit surface backed by a map in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySurface {
    sheets: Mutex<HashMap<String, Sheet>>,
    reject_writes: AtomicBool,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write` fail with an I/O error.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of surfaces created so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn title(&self, surface_id: &str) -> Option<String> {
        self.lock().get(surface_id).map(|s| s.title.clone())
    }

    pub fn header(&self, surface_id: &str) -> Option<Vec<String>> {
        self.lock().get(surface_id).map(|s| s.header.clone())
    }

    /// Apply a curator's edit to the rows of a surface.
    pub fn edit<F>(&self, surface_id: &str, f: F) -> Result<(), SurfaceError>
    where
        F: FnOnce(&mut Vec<SheetRow>),
    {
        let mut sheets = self.lock();
        let sheet = sheets
            .get_mut(surface_id)
            .ok_or_else(|| SurfaceError::NotFound(surface_id.to_string()))?;
        f(&mut sheet.rows);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Sheet>> {
        self.sheets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EditSurface for MemorySurface {
    fn create(&self, title: &str) -> Result<String, SurfaceError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().insert(
            id.clone(),
            Sheet {
                title: title.to_string(),
                ..Default::default()
            },
        );
        debug!(surface_id = %id, title, "created memory surface");
        Ok(id)
    }

    fn write(
        &self,
        surface_id: &str,
        header: &[&str],
        rows: &[SheetRow],
    ) -> Result<(), SurfaceError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(SurfaceError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "surface is read-only",
            )));
        }
        let mut sheets = self.lock();
        let sheet = sheets
            .get_mut(surface_id)
            .ok_or_else(|| SurfaceError::NotFound(surface_id.to_string()))?;
        sheet.header = header.iter().map(|h| h.to_string()).collect();
        sheet.rows = rows.to_vec();
        Ok(())
    }

    fn fetch(&self, surface_id: &str) -> Result<Vec<SheetRow>, SurfaceError> {
        self.lock()
            .get(surface_id)
            .map(|s| s.rows.clone())
            .ok_or_else(|| SurfaceError::NotFound(surface_id.to_string()))
    }
}
