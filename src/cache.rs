//! Process-wide memoization of loaded artifacts.
//!
//! Entries are keyed by path and remember the modification time and schema
//! they were built from. A changed file or a different schema replaces the
//! entry; an entry's value is never mutated once stored.

use crate::data;
use crate::error::LoadError;
use crate::types::{GeometryCollection, GeometrySchema, TableSchema, TabularSeries};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::debug;

struct Entry<S, T> {
    modified: SystemTime,
    schema: S,
    value: Arc<T>,
}

type Slots<S, T> = Mutex<HashMap<PathBuf, Entry<S, T>>>;

#[derive(Default)]
pub struct ArtifactCache {
    geometries: Slots<GeometrySchema, GeometryCollection>,
    tables: Slots<TableSchema, TabularSeries>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry(
        &self,
        path: &Path,
        schema: &GeometrySchema,
    ) -> Result<Arc<GeometryCollection>, LoadError> {
        lookup(&self.geometries, path, schema, data::load_geometry)
    }

    pub fn table(&self, path: &Path, schema: &TableSchema) -> Result<Arc<TabularSeries>, LoadError> {
        lookup(&self.tables, path, schema, data::load_table)
    }

    /// Number of cached artifacts of both kinds.
    pub fn len(&self) -> usize {
        self.geometries.lock().unwrap_or_else(PoisonError::into_inner).len()
            + self.tables.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn modified_time(path: &Path) -> Result<SystemTime, LoadError> {
    let origin = path.display().to_string();
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::parse(&origin, e.to_string()),
    })?;
    metadata
        .modified()
        .map_err(|e| LoadError::parse(&origin, e.to_string()))
}

fn lookup<S, T, F>(slots: &Slots<S, T>, path: &Path, schema: &S, load: F) -> Result<Arc<T>, LoadError>
where
    S: Clone + PartialEq,
    F: FnOnce(&Path, &S) -> Result<T, LoadError>,
{
    let modified = modified_time(path)?;

    {
        let slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slots.get(path) {
            if entry.modified == modified && entry.schema == *schema {
                return Ok(Arc::clone(&entry.value));
            }
        }
    }

    // Parse outside the lock so one slow file does not stall other views.
    let value = Arc::new(load(path, schema)?);
    debug!(path = %path.display(), "cached artifact");

    slots.lock().unwrap_or_else(PoisonError::into_inner).insert(
        path.to_path_buf(),
        Entry {
            modified,
            schema: schema.clone(),
            value: Arc::clone(&value),
        },
    );

    Ok(value)
}
