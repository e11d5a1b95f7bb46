//! Extractor/Cleaner - raw extracts into typed, cleaned rows
//!
//! The source extracts quote whole lines rather than fields, so lines are
//! split on commas with quote handling disabled and every `"` is removed
//! afterwards.
//!
//! Fatal: missing file, missing designated column, a numeric column that
//! fails coercion on every complete row.
//! Recoverable: a row with a missing field, an unparseable value or a bad
//! date is dropped and recorded as a defect.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use warehouse::coerce::{parse_date, parse_decimal, parse_integer};
use warehouse::{ClientRecord, Fingerprint, ProductRecord, Result, SaleRecord, WarehouseError};

pub const CLIENTS_FILE: &str = "Clients.csv";
pub const PRODUCTS_FILE: &str = "Produits.csv";
pub const SALES_FILE: &str = "Ventes.csv";

/// Accepted header names per designated column (English first, then the
/// French names used by the original extracts)
const CLIENT_ID_COLUMNS: &[&str] = &["client_id"];
const CLIENT_NAME_COLUMNS: &[&str] = &["name", "nom"];
const CLIENT_CITY_COLUMNS: &[&str] = &["city", "ville"];
const CLIENT_COUNTRY_COLUMNS: &[&str] = &["country", "pays"];
const CLIENT_SEGMENT_COLUMNS: &[&str] = &["segment"];

const PRODUCT_ID_COLUMNS: &[&str] = &["product_id", "produit_id"];
const PRODUCT_NAME_COLUMNS: &[&str] = &["name", "nom_produit", "nom"];
const PRODUCT_CATEGORY_COLUMNS: &[&str] = &["category", "categorie"];
const PRODUCT_PRICE_COLUMNS: &[&str] = &["price", "prix"];

const SALE_ID_COLUMNS: &[&str] = &["sale_id", "vente_id"];
const SALE_DATE_COLUMNS: &[&str] = &["date"];
const SALE_QUANTITY_COLUMNS: &[&str] = &["quantity", "quantite"];
const SALE_AMOUNT_COLUMNS: &[&str] = &["amount", "montant"];

/// How many defects are echoed to the log per extract
const DEFECTS_LOGGED: usize = 5;

/// One line of an extract after quote stripping; `None` is a missing value
#[derive(Debug, Clone)]
pub struct RawRow {
    pub line: usize,
    pub fields: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct RawExtract {
    pub table: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub read: usize,
    pub missing: usize,
    pub defective: usize,
    pub duplicates: usize,
}

/// Output of cleaning one extract
#[derive(Debug, Clone)]
pub struct Cleaned<T> {
    pub rows: Vec<T>,
    pub stats: CleanStats,
    pub defects: Vec<String>,
}

/// The three cleaned extracts of one run
#[derive(Debug, Clone)]
pub struct Extracts {
    pub clients: Cleaned<ClientRecord>,
    pub products: Cleaned<ProductRecord>,
    pub sales: Cleaned<SaleRecord>,
}

/// Remove quoting artifacts and surrounding whitespace
pub fn clean_value(raw: &str) -> Option<String> {
    let unquoted: String = raw.chars().filter(|c| *c != '"').collect();
    let trimmed = unquoted.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode raw bytes, honouring (and dropping) a byte-order marker
pub fn decode(bytes: &[u8]) -> String {
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "invalid byte sequences replaced while decoding");
    }
    text.into_owned()
}

/// Split decoded content into headers and quote-stripped rows
pub fn parse_extract(table: &'static str, content: &str) -> Result<RawExtract> {
    let mut reader = csv::ReaderBuilder::new()
        .quoting(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| clean_value(h).unwrap_or_default())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(WarehouseError::schema(table, "no header row"));
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        rows.push(RawRow {
            line,
            fields: record.iter().map(clean_value).collect(),
        });
    }

    Ok(RawExtract {
        table,
        headers,
        rows,
    })
}

/// Read and parse one extract file from `dir`
pub fn read_extract(dir: &Path, table: &'static str) -> Result<RawExtract> {
    let path = dir.join(table);
    let bytes = fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WarehouseError::MissingSource { path: path.clone() },
        _ => WarehouseError::Io(e),
    })?;
    parse_extract(table, &decode(&bytes))
}

impl RawExtract {
    /// Locate a designated column. Absence is fatal for the whole extract.
    pub fn column(&self, candidates: &[&str]) -> Result<usize> {
        for candidate in candidates {
            if let Some(idx) = self
                .headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(candidate))
            {
                return Ok(idx);
            }
        }
        Err(WarehouseError::schema(
            self.table,
            format!(
                "missing column '{}' (accepted names: {})",
                candidates[0],
                candidates.join(", ")
            ),
        ))
    }
}

/// A numeric designated column. If its values fail to parse on every
/// complete row the extract is rejected. Dates are never listed here: an
/// unparseable date only drops its row.
struct NumericColumn {
    idx: usize,
    name: &'static str,
    parses: fn(&str) -> bool,
}

impl NumericColumn {
    fn integer(idx: usize, name: &'static str) -> Self {
        Self {
            idx,
            name,
            parses: |raw| parse_integer(raw).is_some(),
        }
    }

    fn decimal(idx: usize, name: &'static str) -> Self {
        Self {
            idx,
            name,
            parses: |raw| parse_decimal(raw).is_some(),
        }
    }
}

/// A complete row: every header has a non-missing value
struct Row<'a> {
    fields: &'a [Option<String>],
    line: usize,
}

impl<'a> Row<'a> {
    fn text(&self, idx: usize) -> String {
        self.fields[idx].clone().unwrap_or_default()
    }

    fn raw(&self, idx: usize) -> &str {
        self.fields[idx].as_deref().unwrap_or("")
    }

    fn integer(&self, idx: usize, column: &str) -> std::result::Result<i64, String> {
        parse_integer(self.raw(idx)).ok_or_else(|| {
            format!("Line {}: invalid integer '{}' in '{}'", self.line, self.raw(idx), column)
        })
    }

    fn decimal(&self, idx: usize, column: &str) -> std::result::Result<f64, String> {
        parse_decimal(self.raw(idx)).ok_or_else(|| {
            format!("Line {}: invalid decimal '{}' in '{}'", self.line, self.raw(idx), column)
        })
    }

    fn date(&self, idx: usize) -> std::result::Result<NaiveDate, String> {
        parse_date(self.raw(idx))
            .ok_or_else(|| format!("Line {}: unparseable date '{}'", self.line, self.raw(idx)))
    }

    fn non_negative<N: PartialOrd + Default + std::fmt::Display>(
        &self,
        value: N,
        column: &str,
    ) -> std::result::Result<N, String> {
        if value < N::default() {
            Err(format!("Line {}: negative {} {}", self.line, column, value))
        } else {
            Ok(value)
        }
    }
}

/// Shared cleaning loop: missing-field drop, typed conversion, exact dedup.
///
/// Every column in `numeric` is checked on every complete row, whatever
/// else fails on that row. One that never parses is a schema error rather
/// than a pile of row defects.
fn clean_rows<T, F>(
    extract: &RawExtract,
    numeric: &[NumericColumn],
    mut convert: F,
) -> Result<Cleaned<T>>
where
    T: Fingerprint,
    F: FnMut(&Row) -> std::result::Result<T, String>,
{
    let width = extract.headers.len();
    let mut stats = CleanStats::default();
    let mut defects = Vec::new();
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    let mut complete = 0usize;
    let mut failures = vec![0usize; numeric.len()];

    for raw in &extract.rows {
        stats.read += 1;

        if raw.fields.len() > width {
            stats.defective += 1;
            defects.push(format!(
                "Line {}: expected {} fields, found {}",
                raw.line,
                width,
                raw.fields.len()
            ));
            continue;
        }
        if raw.fields.len() < width || raw.fields.iter().any(Option::is_none) {
            stats.missing += 1;
            continue;
        }

        complete += 1;
        for (column, failed) in numeric.iter().zip(failures.iter_mut()) {
            if !(column.parses)(raw.fields[column.idx].as_deref().unwrap_or("")) {
                *failed += 1;
            }
        }

        let row = Row {
            fields: &raw.fields,
            line: raw.line,
        };
        match convert(&row) {
            Ok(record) => {
                if seen.insert(record.fingerprint()) {
                    rows.push(record);
                } else {
                    stats.duplicates += 1;
                }
            }
            Err(defect) => {
                stats.defective += 1;
                defects.push(defect);
            }
        }
    }

    if complete > 0 {
        if let Some((column, _)) = numeric
            .iter()
            .zip(&failures)
            .find(|(_, failed)| **failed == complete)
        {
            return Err(WarehouseError::schema(
                extract.table,
                format!(
                    "column '{}' cannot be coerced in any of {} rows",
                    column.name, complete
                ),
            ));
        }
    }

    Ok(Cleaned {
        rows,
        stats,
        defects,
    })
}

pub fn clean_clients(extract: &RawExtract) -> Result<Cleaned<ClientRecord>> {
    let id = extract.column(CLIENT_ID_COLUMNS)?;
    let name = extract.column(CLIENT_NAME_COLUMNS)?;
    let city = extract.column(CLIENT_CITY_COLUMNS)?;
    let country = extract.column(CLIENT_COUNTRY_COLUMNS)?;
    let segment = extract.column(CLIENT_SEGMENT_COLUMNS)?;

    let numeric = [NumericColumn::integer(id, "client_id")];
    clean_rows(extract, &numeric, |row| {
        Ok(ClientRecord {
            client_id: row.integer(id, "client_id")?,
            name: row.text(name),
            city: row.text(city),
            country: row.text(country),
            segment: row.text(segment),
        })
    })
}

pub fn clean_products(extract: &RawExtract) -> Result<Cleaned<ProductRecord>> {
    let id = extract.column(PRODUCT_ID_COLUMNS)?;
    let name = extract.column(PRODUCT_NAME_COLUMNS)?;
    let category = extract.column(PRODUCT_CATEGORY_COLUMNS)?;
    let price = extract.column(PRODUCT_PRICE_COLUMNS)?;

    let numeric = [
        NumericColumn::integer(id, "product_id"),
        NumericColumn::decimal(price, "price"),
    ];
    clean_rows(extract, &numeric, |row| {
        let value = row.decimal(price, "price")?;
        Ok(ProductRecord {
            product_id: row.integer(id, "product_id")?,
            name: row.text(name),
            category: row.text(category),
            price: row.non_negative(value, "price")?,
        })
    })
}

pub fn clean_sales(extract: &RawExtract) -> Result<Cleaned<SaleRecord>> {
    let id = extract.column(SALE_ID_COLUMNS)?;
    let client = extract.column(CLIENT_ID_COLUMNS)?;
    let product = extract.column(PRODUCT_ID_COLUMNS)?;
    let date = extract.column(SALE_DATE_COLUMNS)?;
    let quantity = extract.column(SALE_QUANTITY_COLUMNS)?;
    let amount = extract.column(SALE_AMOUNT_COLUMNS)?;

    let numeric = [
        NumericColumn::integer(id, "sale_id"),
        NumericColumn::integer(client, "client_id"),
        NumericColumn::integer(product, "product_id"),
        NumericColumn::integer(quantity, "quantity"),
        NumericColumn::decimal(amount, "amount"),
    ];
    clean_rows(extract, &numeric, |row| {
        let sale_date = row.date(date)?;
        let qty = row.integer(quantity, "quantity")?;
        Ok(SaleRecord {
            sale_id: row.integer(id, "sale_id")?,
            client_id: row.integer(client, "client_id")?,
            product_id: row.integer(product, "product_id")?,
            date: sale_date,
            quantity: row.non_negative(qty, "quantity")?,
            amount: row.decimal(amount, "amount")?,
        })
    })
}

fn log_cleaned<T>(table: &str, cleaned: &Cleaned<T>) {
    info!(
        table,
        read = cleaned.stats.read,
        kept = cleaned.rows.len(),
        missing = cleaned.stats.missing,
        defective = cleaned.stats.defective,
        duplicates = cleaned.stats.duplicates,
        "extract cleaned"
    );
    for defect in cleaned.defects.iter().take(DEFECTS_LOGGED) {
        warn!(table, "{}", defect);
    }
    if cleaned.defects.len() > DEFECTS_LOGGED {
        warn!(table, "... and {} more", cleaned.defects.len() - DEFECTS_LOGGED);
    }
}

/// Read and clean the three extracts from `dir`.
///
/// All three files are checked before any of them is processed so that a
/// missing source is reported without doing partial work.
pub fn extract_all(dir: &Path) -> Result<Extracts> {
    for table in [CLIENTS_FILE, PRODUCTS_FILE, SALES_FILE] {
        let path = dir.join(table);
        if !path.is_file() {
            return Err(WarehouseError::MissingSource { path });
        }
    }

    let clients = clean_clients(&read_extract(dir, CLIENTS_FILE)?)?;
    log_cleaned(CLIENTS_FILE, &clients);
    let products = clean_products(&read_extract(dir, PRODUCTS_FILE)?)?;
    log_cleaned(PRODUCTS_FILE, &products);
    let sales = clean_sales(&read_extract(dir, SALES_FILE)?)?;
    log_cleaned(SALES_FILE, &sales);

    Ok(Extracts {
        clients,
        products,
        sales,
    })
}
