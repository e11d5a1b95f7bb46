//! Star schema records
//!
//! Field order of every record is the column order of its warehouse file.

use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

use crate::coerce;

/// A warehouse table: one CSV file with a fixed header
pub trait Table: Serialize + DeserializeOwned {
    const FILE: &'static str;
    const HEADERS: &'static [&'static str];
}

/// Entity key used for dimension uniqueness and hash joins
pub trait Keyed {
    type Key: Eq + Hash + Clone;
    fn key(&self) -> Self::Key;
}

/// Exact row identity, used to remove duplicate rows.
/// Decimals are compared bit for bit.
pub trait Fingerprint {
    type Print: Eq + Hash;
    fn fingerprint(&self) -> Self::Print;
}

fn decimal_bits(v: f64) -> u64 {
    // -0.0 and 0.0 are the same value
    if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(deserialize_with = "coerce::de_integer")]
    pub client_id: i64,
    pub name: String,
    pub city: String,
    pub country: String,
    pub segment: String,
}

impl Table for ClientRecord {
    const FILE: &'static str = "Dim_Clients.csv";
    const HEADERS: &'static [&'static str] = &["client_id", "name", "city", "country", "segment"];
}

impl Keyed for ClientRecord {
    type Key = i64;
    fn key(&self) -> i64 {
        self.client_id
    }
}

impl Fingerprint for ClientRecord {
    type Print = (i64, String, String, String, String);
    fn fingerprint(&self) -> Self::Print {
        (
            self.client_id,
            self.name.clone(),
            self.city.clone(),
            self.country.clone(),
            self.segment.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(deserialize_with = "coerce::de_integer")]
    pub product_id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
}

impl Table for ProductRecord {
    const FILE: &'static str = "Dim_Produits.csv";
    const HEADERS: &'static [&'static str] = &["product_id", "name", "category", "price"];
}

impl Keyed for ProductRecord {
    type Key = i64;
    fn key(&self) -> i64 {
        self.product_id
    }
}

impl Fingerprint for ProductRecord {
    type Print = (i64, String, String, u64);
    fn fingerprint(&self) -> Self::Print {
        (
            self.product_id,
            self.name.clone(),
            self.category.clone(),
            decimal_bits(self.price),
        )
    }
}

/// Calendar attributes of one sale date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    #[serde(deserialize_with = "coerce::de_date")]
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub quarter: u32,
}

impl TimeRecord {
    pub fn from_date(date: NaiveDate) -> Self {
        let month = date.month();
        Self {
            date,
            year: date.year(),
            month,
            day: date.day(),
            quarter: (month + 2) / 3,
        }
    }
}

impl Table for TimeRecord {
    const FILE: &'static str = "Dim_Temps.csv";
    const HEADERS: &'static [&'static str] = &["date", "year", "month", "day", "quarter"];
}

impl Keyed for TimeRecord {
    type Key = NaiveDate;
    fn key(&self) -> NaiveDate {
        self.date
    }
}

/// One row of the fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    #[serde(deserialize_with = "coerce::de_integer")]
    pub sale_id: i64,
    #[serde(deserialize_with = "coerce::de_integer")]
    pub client_id: i64,
    #[serde(deserialize_with = "coerce::de_integer")]
    pub product_id: i64,
    #[serde(deserialize_with = "coerce::de_date")]
    pub date: NaiveDate,
    #[serde(deserialize_with = "coerce::de_integer")]
    pub quantity: i64,
    pub amount: f64,
}

impl Table for SaleRecord {
    const FILE: &'static str = "Fact_Ventes.csv";
    const HEADERS: &'static [&'static str] = &[
        "sale_id",
        "client_id",
        "product_id",
        "date",
        "quantity",
        "amount",
    ];
}

impl Fingerprint for SaleRecord {
    type Print = (i64, i64, i64, NaiveDate, i64, u64);
    fn fingerprint(&self) -> Self::Print {
        (
            self.sale_id,
            self.client_id,
            self.product_id,
            self.date,
            self.quantity,
            decimal_bits(self.amount),
        )
    }
}

/// The four tables of one ETL run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Warehouse {
    pub clients: Vec<ClientRecord>,
    pub products: Vec<ProductRecord>,
    pub time: Vec<TimeRecord>,
    pub sales: Vec<SaleRecord>,
}
