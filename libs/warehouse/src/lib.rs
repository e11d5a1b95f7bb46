//! Warehouse - Shared star-schema model and storage
//!
//! Used by both services:
//! - `etl` builds the four tables and persists them with [`store::write_warehouse`]
//! - `api` loads them back with [`store::load_tables`] and assembles the cube
//!
//! Value coercion lives here so that ids and dates are normalized the same
//! way on the write side and on the read side of the warehouse.

pub mod coerce;
pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, WarehouseError};
pub use model::{
    ClientRecord, Fingerprint, Keyed, ProductRecord, SaleRecord, Table, TimeRecord, Warehouse,
};
pub use store::{WarehouseTables, WarehouseVersion};
