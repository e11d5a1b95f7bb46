//! Warehouse Store - reads and writes the four star-schema files
//!
//! Writes are staged: every table is rendered in memory, written to a
//! `.tmp` sibling, and only then renamed into place. A reader never sees a
//! warehouse made of tables from two different runs unless a rename itself
//! fails half way.
//!
//! Loads compute a [`WarehouseVersion`] over the raw bytes so callers can
//! tell whether anything changed since the last load.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::model::{ClientRecord, ProductRecord, SaleRecord, Table, TimeRecord, Warehouse};

/// Every file that makes up a warehouse, in load order
pub const TABLE_FILES: [&str; 4] = [
    ClientRecord::FILE,
    ProductRecord::FILE,
    TimeRecord::FILE,
    SaleRecord::FILE,
];

/// Content digest of the four warehouse files, `sha256:<hex>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WarehouseVersion(String);

impl WarehouseVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WarehouseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A warehouse loaded from disk together with the version it was read at
#[derive(Debug, Clone)]
pub struct WarehouseTables {
    pub warehouse: Warehouse,
    pub version: WarehouseVersion,
}

/// Render one table as CSV bytes. The header is always written, even for
/// an empty table.
pub fn render_table<T: Table>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(T::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer
        .into_inner()
        .map_err(|e| WarehouseError::Io(e.into_error()))
}

/// Render all four tables, paired with their file names
pub fn render_warehouse(warehouse: &Warehouse) -> Result<Vec<(&'static str, Vec<u8>)>> {
    Ok(vec![
        (ClientRecord::FILE, render_table(&warehouse.clients)?),
        (ProductRecord::FILE, render_table(&warehouse.products)?),
        (TimeRecord::FILE, render_table(&warehouse.time)?),
        (SaleRecord::FILE, render_table(&warehouse.sales)?),
    ])
}

fn staging_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(format!("{}.tmp", file))
}

fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp);
    }
}

/// Persist a complete warehouse into `dir`
pub fn write_warehouse(dir: &Path, warehouse: &Warehouse) -> Result<()> {
    // Render first: a serialization failure must not touch the directory
    let rendered = render_warehouse(warehouse)?;

    fs::create_dir_all(dir)?;

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(rendered.len());
    for (file, bytes) in &rendered {
        let tmp = staging_path(dir, file);
        if let Err(e) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            discard_staged(&staged);
            return Err(e.into());
        }
        debug!(file = %file, bytes = bytes.len(), "staged table");
        staged.push((tmp, dir.join(file)));
    }

    for (i, (tmp, target)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, target) {
            discard_staged(&staged[i..]);
            return Err(e.into());
        }
    }

    info!(dir = %dir.display(), "warehouse written");
    Ok(())
}

/// Return the first warehouse file missing from `dir`, if any
pub fn missing_table(dir: &Path) -> Option<PathBuf> {
    TABLE_FILES
        .iter()
        .map(|file| dir.join(file))
        .find(|path| !path.is_file())
}

/// Feed one table into the version digest. The content is length-framed so
/// bytes cannot move from one table to the next without changing the digest.
fn digest_table(hasher: &mut Sha256, file: &str, bytes: &[u8]) {
    hasher.update(file.as_bytes());
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn read_table<T: Table>(dir: &Path, hasher: &mut Sha256) -> Result<Vec<T>> {
    let path = dir.join(T::FILE);
    let bytes = fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WarehouseError::MissingSource { path: path.clone() },
        _ => WarehouseError::Io(e),
    })?;

    digest_table(hasher, T::FILE, &bytes);

    let content = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content);

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: T = result.map_err(|e| WarehouseError::schema(T::FILE, e.to_string()))?;
        rows.push(row);
    }

    debug!(file = %T::FILE, rows = rows.len(), "loaded table");
    Ok(rows)
}

/// Load the four tables from `dir`.
///
/// Fails with [`WarehouseError::MissingSource`] before reading anything if
/// one of the files is absent, so no partial warehouse is ever returned.
pub fn load_tables(dir: &Path) -> Result<WarehouseTables> {
    if let Some(path) = missing_table(dir) {
        return Err(WarehouseError::MissingSource { path });
    }

    let mut hasher = Sha256::new();
    let warehouse = Warehouse {
        clients: read_table(dir, &mut hasher)?,
        products: read_table(dir, &mut hasher)?,
        time: read_table(dir, &mut hasher)?,
        sales: read_table(dir, &mut hasher)?,
    };
    let version = WarehouseVersion(format!("sha256:{:x}", hasher.finalize()));

    info!(
        version = %version,
        clients = warehouse.clients.len(),
        products = warehouse.products.len(),
        dates = warehouse.time.len(),
        sales = warehouse.sales.len(),
        "warehouse loaded"
    );

    Ok(WarehouseTables { warehouse, version })
}
