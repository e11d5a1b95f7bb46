//! Cube Assembler - fact ⟕ client ⟕ product ⟕ time
//!
//! Explicit hash joins: each dimension is indexed by its key, then every
//! fact probes the indexes. One cube row per fact, always; a failed probe
//! leaves the joined attributes as `None`.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use warehouse::{Keyed, Warehouse, WarehouseTables, WarehouseVersion};

/// One denormalized fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CubeRow {
    pub sale_id: i64,
    pub client_id: i64,
    pub product_id: i64,
    pub date: NaiveDate,
    pub quantity: i64,
    pub amount: f64,

    // Dim_Clients
    pub client_name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub segment: Option<String>,

    // Dim_Produits
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,

    // Dim_Temps
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub quarter: Option<u32>,
}

/// The assembled cube and the warehouse version it was built from
#[derive(Debug, Clone)]
pub struct Cube {
    pub version: WarehouseVersion,
    pub rows: Vec<CubeRow>,
}

impl Cube {
    pub fn from_tables(tables: &WarehouseTables) -> Self {
        Self {
            version: tables.version.clone(),
            rows: assemble(&tables.warehouse),
        }
    }
}

/// Build side of a hash join. On a duplicated key the first row wins, so
/// a probe never matches more than one row.
fn index_by_key<T: Keyed>(rows: &[T]) -> HashMap<T::Key, &T> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(row.key()).or_insert(row);
    }
    index
}

/// Left outer join of the fact table with the three dimensions, in fact order
pub fn assemble(warehouse: &Warehouse) -> Vec<CubeRow> {
    let clients = index_by_key(&warehouse.clients);
    let products = index_by_key(&warehouse.products);
    let time = index_by_key(&warehouse.time);

    let rows: Vec<CubeRow> = warehouse
        .sales
        .iter()
        .map(|sale| {
            let client = clients.get(&sale.client_id);
            let product = products.get(&sale.product_id);
            let day = time.get(&sale.date);

            CubeRow {
                sale_id: sale.sale_id,
                client_id: sale.client_id,
                product_id: sale.product_id,
                date: sale.date,
                quantity: sale.quantity,
                amount: sale.amount,
                client_name: client.map(|c| c.name.clone()),
                city: client.map(|c| c.city.clone()),
                country: client.map(|c| c.country.clone()),
                segment: client.map(|c| c.segment.clone()),
                product_name: product.map(|p| p.name.clone()),
                category: product.map(|p| p.category.clone()),
                price: product.map(|p| p.price),
                year: day.map(|t| t.year),
                month: day.map(|t| t.month),
                day: day.map(|t| t.day),
                quarter: day.map(|t| t.quarter),
            }
        })
        .collect();

    debug!(rows = rows.len(), "cube assembled");
    rows
}
