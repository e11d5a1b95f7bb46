//! Cube cache keyed by warehouse version
//!
//! Holds at most one assembled cube. A lookup with the same version returns
//! the cached cube; a different version rebuilds it. `invalidate` drops the
//! cube explicitly, e.g. after the tables are reloaded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;
use warehouse::{WarehouseTables, WarehouseVersion};

use crate::cube::Cube;

#[derive(Debug, Default)]
pub struct CubeCache {
    slot: Mutex<Option<Arc<Cube>>>,
}

impl CubeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Cube>>> {
        // The slot is only ever replaced whole, so a poisoned lock is still consistent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached cube for `tables.version`, assembling it on a miss
    pub fn get_or_assemble(&self, tables: &WarehouseTables) -> Arc<Cube> {
        let mut slot = self.lock();
        if let Some(cube) = slot.as_ref() {
            if cube.version == tables.version {
                return Arc::clone(cube);
            }
        }

        let cube = Arc::new(Cube::from_tables(tables));
        info!(version = %cube.version, rows = cube.rows.len(), "cube cached");
        *slot = Some(Arc::clone(&cube));
        cube
    }

    pub fn invalidate(&self) {
        if let Some(old) = self.lock().take() {
            info!(version = %old.version, "cube cache invalidated");
        }
    }

    pub fn cached_version(&self) -> Option<WarehouseVersion> {
        self.lock().as_ref().map(|cube| cube.version.clone())
    }
}
