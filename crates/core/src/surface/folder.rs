//! Edit surface backed by CSV files in a directory.
//!
//! Each surface is `<dir>/<surface_id>.csv`. Curators open the file in any
//! spreadsheet program, edit it, and save it back as CSV with the header row
//! intact.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::EditSurface;
use crate::errors::SurfaceError;
use crate::values::SheetRow;

pub struct FolderSurface {
    dir: PathBuf,
}

impl FolderSurface {
    /// Use `dir` as the surface store, creating it if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, SurfaceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the CSV file behind a surface.
    pub fn path_for(&self, surface_id: &str) -> Result<PathBuf, SurfaceError> {
        if surface_id.is_empty()
            || surface_id.contains(['/', '\\'])
            || surface_id.starts_with('.')
        {
            return Err(SurfaceError::Malformed {
                id: surface_id.to_string(),
                detail: "surface id is not a plain file name".into(),
            });
        }
        Ok(self.dir.join(format!("{surface_id}.csv")))
    }
}

impl EditSurface for FolderSurface {
    fn create(&self, title: &str) -> Result<String, SurfaceError> {
        let slug: String = title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let id = format!("{slug}-{}", uuid::Uuid::new_v4());
        let path = self.path_for(&id)?;
        fs::File::create(&path)?;
        info!(surface_id = %id, path = %path.display(), "created edit surface");
        Ok(id)
    }

    fn write(
        &self,
        surface_id: &str,
        header: &[&str],
        rows: &[SheetRow],
    ) -> Result<(), SurfaceError> {
        let path = self.path_for(surface_id)?;
        if !path.exists() {
            return Err(SurfaceError::NotFound(surface_id.to_string()));
        }

        // Write beside the target and rename so a reader never sees half a file.
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(header)?;
            for row in rows {
                writer.write_record(header.iter().map(|h| row.get(h).unwrap_or("")))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(surface_id, rows = rows.len(), "wrote edit surface");
        Ok(())
    }

    fn fetch(&self, surface_id: &str) -> Result<Vec<SheetRow>, SurfaceError> {
        let path = self.path_for(surface_id)?;
        if !path.exists() {
            return Err(SurfaceError::NotFound(surface_id.to_string()));
        }
        if fs::metadata(&path)?.len() == 0 {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut seen = HashSet::new();
        if let Some(dup) = header.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(SurfaceError::Malformed {
                id: surface_id.to_string(),
                detail: format!("duplicate column '{dup}'"),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            let row: SheetRow = header
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect();
            rows.push(row);
        }
        debug!(surface_id, rows = rows.len(), "fetched edit surface");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FolderSurface::new(dir.path().join("sheets")).unwrap();
        let id = surface.create("titlehistory").unwrap();
        assert!(id.starts_with("titlehistory-"));
        assert!(surface.fetch(&id).unwrap().is_empty());

        let row: SheetRow = [("masterid", "3"), ("notes", "renamed, 1998")].into_iter().collect();
        surface.write(&id, &["masterid", "bibstem", "notes"], &[row]).unwrap();

        let fetched = surface.fetch(&id).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].get("notes"), Some("renamed, 1998"));
        // Columns missing from the row are written as blank cells.
        assert_eq!(fetched[0].get("bibstem"), Some(""));
    }

    #[test]
    fn test_curator_edits_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FolderSurface::new(dir.path()).unwrap();
        let id = surface.create("abbrevs").unwrap();
        let path = surface.path_for(&id).unwrap();
        std::fs::write(
            &path,
            "abbrevid,masterid,bibstem,abbreviation\n1,1,ApJ,Astrophys. J.\n,,,\n,1,ApJ,ApJ\n",
        )
        .unwrap();

        let rows = surface.fetch(&id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("abbrevid"), Some(""));
        assert_eq!(rows[1].get("abbreviation"), Some("ApJ"));
    }

    #[test]
    fn test_rejects_bad_ids_and_duplicate_columns() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FolderSurface::new(dir.path()).unwrap();
        assert!(matches!(surface.fetch("../etc"), Err(SurfaceError::Malformed { .. })));
        assert!(matches!(surface.fetch("missing"), Err(SurfaceError::NotFound(_))));

        let id = surface.create("names").unwrap();
        std::fs::write(surface.path_for(&id).unwrap(), "nameid,nameid\n1,2\n").unwrap();
        assert!(matches!(surface.fetch(&id), Err(SurfaceError::Malformed { .. })));
    }
}
