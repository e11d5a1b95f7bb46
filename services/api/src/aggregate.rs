//! Aggregation Engine - filtered KPIs and group-bys over the cube
//!
//! Every function here is pure over (cube rows, filters), so results can be
//! computed straight from a cached cube.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::cube::{Cube, CubeRow};

pub const TOP_PRODUCTS: usize = 10;
pub const TOP_CLIENTS: usize = 5;

/// Allowed values per filterable attribute. A row whose attribute is null
/// is never allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub years: BTreeSet<i32>,
    pub countries: BTreeSet<String>,
    pub categories: BTreeSet<String>,
}

/// Distinct non-null values available for filtering, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub years: Vec<i32>,
    pub countries: Vec<String>,
    pub categories: Vec<String>,
}

impl Filters {
    /// Selection of the whole observed domain
    pub fn all(options: &FilterOptions) -> Self {
        Self {
            years: options.years.iter().copied().collect(),
            countries: options.countries.iter().cloned().collect(),
            categories: options.categories.iter().cloned().collect(),
        }
    }

    pub fn matches(&self, row: &CubeRow) -> bool {
        let year = row.year.map_or(false, |y| self.years.contains(&y));
        let country = row
            .country
            .as_ref()
            .map_or(false, |c| self.countries.contains(c));
        let category = row
            .category
            .as_ref()
            .map_or(false, |c| self.categories.contains(c));
        year && country && category
    }
}

pub fn filter_options(rows: &[CubeRow]) -> FilterOptions {
    let years: BTreeSet<i32> = rows.iter().filter_map(|r| r.year).collect();
    let countries: BTreeSet<&str> = rows.iter().filter_map(|r| r.country.as_deref()).collect();
    let categories: BTreeSet<&str> = rows.iter().filter_map(|r| r.category.as_deref()).collect();

    FilterOptions {
        years: years.into_iter().collect(),
        countries: countries.into_iter().map(str::to_string).collect(),
        categories: categories.into_iter().map(str::to_string).collect(),
    }
}

pub fn apply<'a>(rows: &'a [CubeRow], filters: &Filters) -> Vec<&'a CubeRow> {
    rows.iter().filter(|r| filters.matches(r)).collect()
}

/// Scalar indicators over the filtered rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_amount: f64,
    pub total_quantity: i64,
    /// `None` when no filtered row has a price
    pub mean_price: Option<f64>,
    pub formatted: FormattedKpis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedKpis {
    pub total_amount: String,
    pub total_quantity: String,
    pub mean_price: String,
}

pub fn kpis(rows: &[&CubeRow]) -> Kpis {
    let total_amount: f64 = rows.iter().map(|r| r.amount).sum();
    let total_quantity = rows
        .iter()
        .fold(0i64, |total, r| total.saturating_add(r.quantity));

    let prices: Vec<f64> = rows.iter().filter_map(|r| r.price).collect();
    let mean_price = if prices.is_empty() {
        None
    } else {
        Some(prices.iter().sum::<f64>() / prices.len() as f64)
    };

    Kpis {
        total_amount,
        total_quantity,
        mean_price,
        formatted: FormattedKpis {
            total_amount: format_eur(total_amount),
            total_quantity: format_count(total_quantity),
            mean_price: mean_price.map(format_eur).unwrap_or_else(|| "n/a".to_string()),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal<K, V> {
    pub key: K,
    pub value: V,
}

/// A summable measure. Integer counts saturate instead of overflowing.
trait Measure: Copy + Default {
    fn accumulate(&mut self, other: Self);
}

impl Measure for f64 {
    fn accumulate(&mut self, other: Self) {
        *self += other;
    }
}

impl Measure for i64 {
    fn accumulate(&mut self, other: Self) {
        *self = self.saturating_add(other);
    }
}

/// Hash aggregation. Groups come out in first-encountered order; rows with
/// a null key are skipped.
fn sum_by<K, V>(
    rows: &[&CubeRow],
    key: impl Fn(&CubeRow) -> Option<K>,
    value: impl Fn(&CubeRow) -> V,
) -> Vec<GroupTotal<K, V>>
where
    K: Eq + Hash + Clone,
    V: Measure,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<GroupTotal<K, V>> = Vec::new();

    for &row in rows {
        let Some(k) = key(row) else { continue };
        let slot = *index.entry(k.clone()).or_insert_with(|| {
            groups.push(GroupTotal {
                key: k,
                value: V::default(),
            });
            groups.len() - 1
        });
        groups[slot].value.accumulate(value(row));
    }

    groups
}

fn ordered_by_key<K: Ord, V>(mut groups: Vec<GroupTotal<K, V>>) -> Vec<GroupTotal<K, V>> {
    groups.sort_by(|a, b| a.key.cmp(&b.key));
    groups
}

/// Largest `n` values; the sort is stable so ties keep first-encountered order
fn top_n<K, V: PartialOrd>(mut groups: Vec<GroupTotal<K, V>>, n: usize) -> Vec<GroupTotal<K, V>> {
    groups.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups.truncate(n);
    groups
}

pub fn sales_by_country(rows: &[&CubeRow]) -> Vec<GroupTotal<String, f64>> {
    ordered_by_key(sum_by(rows, |r| r.country.clone(), |r| r.amount))
}

pub fn sales_by_month(rows: &[&CubeRow]) -> Vec<GroupTotal<u32, f64>> {
    ordered_by_key(sum_by(rows, |r| r.month, |r| r.amount))
}

pub fn top_products(rows: &[&CubeRow]) -> Vec<GroupTotal<String, i64>> {
    top_n(
        sum_by(rows, |r| r.product_name.clone(), |r| r.quantity),
        TOP_PRODUCTS,
    )
}

pub fn sales_by_segment(rows: &[&CubeRow]) -> Vec<GroupTotal<String, f64>> {
    ordered_by_key(sum_by(rows, |r| r.segment.clone(), |r| r.amount))
}

pub fn top_clients(rows: &[&CubeRow]) -> Vec<GroupTotal<String, f64>> {
    top_n(
        sum_by(rows, |r| r.client_name.clone(), |r| r.amount),
        TOP_CLIENTS,
    )
}

/// Everything the presentation layer needs for one filter selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub kpis: Kpis,
    pub sales_by_country: Vec<GroupTotal<String, f64>>,
    pub sales_by_month: Vec<GroupTotal<u32, f64>>,
    pub top_products: Vec<GroupTotal<String, i64>>,
    pub sales_by_segment: Vec<GroupTotal<String, f64>>,
    pub top_clients: Vec<GroupTotal<String, f64>>,
    pub filters: FilterOptions,
}

pub fn query(cube: &Cube, filters: &Filters) -> Dashboard {
    let rows = apply(&cube.rows, filters);

    Dashboard {
        kpis: kpis(&rows),
        sales_by_country: sales_by_country(&rows),
        sales_by_month: sales_by_month(&rows),
        top_products: top_products(&rows),
        sales_by_segment: sales_by_segment(&rows),
        top_clients: top_clients(&rows),
        filters: filter_options(&cube.rows),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `1234.5` -> `1,234.50 €`
pub fn format_eur(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{} €", sign, group_thousands(int_part), frac_part)
}

/// `1234` -> `1,234`
pub fn format_count(count: i64) -> String {
    let sign = if count < 0 { "-" } else { "" };
    format!("{}{}", sign, group_thousands(&count.unsigned_abs().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate};
    use warehouse::WarehouseVersion;

    struct Sale<'a> {
        client: Option<(&'a str, &'a str, &'a str)>, // name, country, segment
        product: Option<(&'a str, &'a str, f64)>,    // name, category, price
        date: (i32, u32, u32),
        dated: bool,
        quantity: i64,
        amount: f64,
    }

    fn row(id: i64, s: Sale) -> CubeRow {
        let date = NaiveDate::from_ymd_opt(s.date.0, s.date.1, s.date.2).unwrap();
        CubeRow {
            sale_id: id,
            client_id: id,
            product_id: id,
            date,
            quantity: s.quantity,
            amount: s.amount,
            client_name: s.client.map(|c| c.0.to_string()),
            city: s.client.map(|_| "Ville".to_string()),
            country: s.client.map(|c| c.1.to_string()),
            segment: s.client.map(|c| c.2.to_string()),
            product_name: s.product.map(|p| p.0.to_string()),
            category: s.product.map(|p| p.1.to_string()),
            price: s.product.map(|p| p.2),
            year: s.dated.then(|| date.year()),
            month: s.dated.then(|| date.month()),
            day: s.dated.then(|| date.day()),
            quarter: s.dated.then(|| (date.month() + 2) / 3),
        }
    }

    fn sale(
        client: (&'static str, &'static str, &'static str),
        product: (&'static str, &'static str, f64),
        date: (i32, u32, u32),
        quantity: i64,
        amount: f64,
    ) -> Sale<'static> {
        Sale {
            client: Some(client),
            product: Some(product),
            date,
            dated: true,
            quantity,
            amount,
        }
    }

    const ALICE: (&str, &str, &str) = ("Alice", "USA", "Particulier");
    const BOB: (&str, &str, &str) = ("Bob", "USA", "Entreprise");
    const CHLOE: (&str, &str, &str) = ("Chloé", "France", "Particulier");
    const LAPTOP: (&str, &str, f64) = ("Laptop", "Informatique", 1000.0);
    const MOUSE: (&str, &str, f64) = ("Souris", "Accessoires", 25.0);

    /// The three-client, two-product, five-sale scenario
    fn scenario() -> Cube {
        Cube {
            version: WarehouseVersion::default(),
            rows: vec![
                row(1, sale(ALICE, LAPTOP, (2022, 3, 15), 1, 1000.0)),
                row(2, sale(BOB, MOUSE, (2022, 7, 1), 4, 100.0)),
                row(3, sale(CHLOE, LAPTOP, (2023, 1, 10), 2, 2000.0)),
                row(4, sale(ALICE, MOUSE, (2023, 5, 20), 2, 50.0)),
                row(5, sale(BOB, LAPTOP, (2023, 11, 30), 1, 1000.0)),
            ],
        }
    }

    fn everything(cube: &Cube) -> Filters {
        Filters::all(&filter_options(&cube.rows))
    }

    // -------------------------------------------------------------------------
    // DOMAIN LISTINGS
    // -------------------------------------------------------------------------

    #[test]
    fn test_filter_options_sorted_distinct() {
        let options = filter_options(&scenario().rows);
        assert_eq!(options.years, vec![2022, 2023]);
        assert_eq!(options.countries, vec!["France", "USA"]);
        assert_eq!(options.categories, vec!["Accessoires", "Informatique"]);
    }

    #[test]
    fn test_filter_options_exclude_nulls() {
        let mut cube = scenario();
        cube.rows.push(row(
            6,
            Sale {
                client: None,
                product: None,
                date: (2030, 1, 1),
                dated: false,
                quantity: 1,
                amount: 1.0,
            },
        ));
        let options = filter_options(&cube.rows);
        assert_eq!(options.years, vec![2022, 2023]);
        assert_eq!(options.countries.len(), 2);
        assert_eq!(options.categories.len(), 2);
    }

    // -------------------------------------------------------------------------
    // FILTERING
    // -------------------------------------------------------------------------

    #[test]
    fn test_full_domain_is_noop() {
        let cube = scenario();
        assert_eq!(apply(&cube.rows, &everything(&cube)).len(), cube.rows.len());
    }

    #[test]
    fn test_empty_allowed_set_yields_nothing() {
        let cube = scenario();
        let mut filters = everything(&cube);
        filters.countries.clear();
        assert!(apply(&cube.rows, &filters).is_empty());
    }

    #[test]
    fn test_null_attribute_never_allowed() {
        let mut cube = scenario();
        cube.rows.push(row(
            6,
            Sale {
                client: None,
                ..sale(ALICE, LAPTOP, (2023, 2, 2), 1, 5.0)
            },
        ));
        let filters = everything(&cube);
        assert_eq!(apply(&cube.rows, &filters).len(), 5);
    }

    #[test]
    fn test_filters_combine_with_and() {
        let cube = scenario();
        let mut filters = everything(&cube);
        filters.years = BTreeSet::from([2023]);
        filters.countries = BTreeSet::from(["USA".to_string()]);
        let ids: Vec<i64> = apply(&cube.rows, &filters).iter().map(|r| r.sale_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    // -------------------------------------------------------------------------
    // KPIS
    // -------------------------------------------------------------------------

    #[test]
    fn test_scenario_first_year_total() {
        let cube = scenario();
        let mut filters = everything(&cube);
        filters.years = BTreeSet::from([2022]);
        let dashboard = query(&cube, &filters);
        assert_eq!(dashboard.kpis.total_amount, 1000.0 + 100.0);
        assert_eq!(dashboard.kpis.total_quantity, 5);
    }

    #[test]
    fn test_total_matches_filtered_sum() {
        let cube = scenario();
        let options = filter_options(&cube.rows);
        for year in &options.years {
            for country in &options.countries {
                let filters = Filters {
                    years: BTreeSet::from([*year]),
                    countries: BTreeSet::from([country.clone()]),
                    categories: options.categories.iter().cloned().collect(),
                };
                let manual: f64 = cube
                    .rows
                    .iter()
                    .filter(|r| r.year == Some(*year) && r.country.as_ref() == Some(country))
                    .map(|r| r.amount)
                    .sum();
                assert_eq!(query(&cube, &filters).kpis.total_amount, manual);
            }
        }
    }

    #[test]
    fn test_mean_price() {
        let cube = scenario();
        let k = query(&cube, &everything(&cube)).kpis;
        assert_eq!(k.mean_price, Some((1000.0 * 3.0 + 25.0 * 2.0) / 5.0));
        assert_eq!(k.formatted.mean_price, "610.00 €");
    }

    #[test]
    fn test_empty_selection_kpis() {
        let cube = scenario();
        let dashboard = query(&cube, &Filters::default());
        assert_eq!(dashboard.kpis.total_amount, 0.0);
        assert_eq!(dashboard.kpis.total_quantity, 0);
        assert_eq!(dashboard.kpis.mean_price, None);
        assert_eq!(dashboard.kpis.formatted.mean_price, "n/a");
        assert!(dashboard.sales_by_country.is_empty());
        assert!(dashboard.sales_by_month.is_empty());
        assert!(dashboard.top_products.is_empty());
        assert!(dashboard.sales_by_segment.is_empty());
        assert!(dashboard.top_clients.is_empty());
        // Listings still describe the whole cube
        assert_eq!(dashboard.filters.years, vec![2022, 2023]);
    }

    #[test]
    fn test_extreme_quantities_saturate() {
        let cube = Cube {
            version: WarehouseVersion::default(),
            rows: vec![
                row(1, sale(ALICE, LAPTOP, (2023, 1, 1), i64::MAX, 1.0)),
                row(2, sale(BOB, LAPTOP, (2023, 1, 2), 5, 1.0)),
            ],
        };
        let dashboard = query(&cube, &everything(&cube));
        assert_eq!(dashboard.kpis.total_quantity, i64::MAX);
        assert_eq!(dashboard.top_products[0].value, i64::MAX);
    }

    // -------------------------------------------------------------------------
    // GROUPED AGGREGATES
    // -------------------------------------------------------------------------

    #[test]
    fn test_sales_by_country() {
        let cube = scenario();
        let groups = query(&cube, &everything(&cube)).sales_by_country;
        assert_eq!(
            groups,
            vec![
                GroupTotal { key: "France".to_string(), value: 2000.0 },
                GroupTotal { key: "USA".to_string(), value: 2150.0 },
            ]
        );
    }

    #[test]
    fn test_sales_by_month_numeric_order() {
        let cube = Cube {
            version: WarehouseVersion::default(),
            rows: vec![
                row(1, sale(ALICE, LAPTOP, (2023, 11, 1), 1, 11.0)),
                row(2, sale(ALICE, LAPTOP, (2023, 2, 1), 1, 2.0)),
                row(3, sale(ALICE, LAPTOP, (2022, 11, 5), 1, 1.0)),
                row(4, sale(ALICE, LAPTOP, (2023, 10, 1), 1, 10.0)),
            ],
        };
        let months: Vec<(u32, f64)> = query(&cube, &everything(&cube))
            .sales_by_month
            .into_iter()
            .map(|g| (g.key, g.value))
            .collect();
        assert_eq!(months, vec![(2, 2.0), (10, 10.0), (11, 12.0)]);
    }

    #[test]
    fn test_sales_by_segment() {
        let cube = scenario();
        let groups = query(&cube, &everything(&cube)).sales_by_segment;
        let pairs: Vec<(&str, f64)> = groups.iter().map(|g| (g.key.as_str(), g.value)).collect();
        assert_eq!(pairs, vec![("Entreprise", 1100.0), ("Particulier", 3050.0)]);
    }

    #[test]
    fn test_top_products_fewer_than_ten() {
        let cube = scenario();
        let top = query(&cube, &everything(&cube)).top_products;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key, "Souris");
        assert_eq!(top[0].value, 6);
        assert_eq!(top[1].key, "Laptop");
        assert_eq!(top[1].value, 4);
    }

    #[test]
    fn test_top_products_truncated_with_stable_ties() {
        let names = ["P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8", "P9", "P10", "P11", "P12"];
        let rows: Vec<CubeRow> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let qty = if i == 11 { 50 } else { 7 };
                let mut r = row(i as i64, sale(ALICE, LAPTOP, (2023, 1, 1), qty, 1.0));
                r.product_name = Some(name.to_string());
                r
            })
            .collect();
        let cube = Cube {
            version: WarehouseVersion::default(),
            rows,
        };

        let top = query(&cube, &everything(&cube)).top_products;
        assert_eq!(top.len(), TOP_PRODUCTS);
        let keys: Vec<&str> = top.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["P12", "P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8", "P9"]);
    }

    #[test]
    fn test_top_clients_top_five() {
        let clients = [
            ("A", 10.0),
            ("B", 60.0),
            ("C", 30.0),
            ("D", 30.0),
            ("E", 50.0),
            ("F", 5.0),
            ("G", 40.0),
        ];
        let rows: Vec<CubeRow> = clients
            .iter()
            .enumerate()
            .map(|(i, (name, amount))| {
                let mut r = row(i as i64, sale(ALICE, LAPTOP, (2023, 1, 1), 1, *amount));
                r.client_name = Some(name.to_string());
                r
            })
            .collect();
        let cube = Cube {
            version: WarehouseVersion::default(),
            rows,
        };

        let top = query(&cube, &everything(&cube)).top_clients;
        let keys: Vec<&str> = top.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["B", "E", "G", "C", "D"]);
    }

    #[test]
    fn test_group_sums_accumulate() {
        let cube = scenario();
        let top = query(&cube, &everything(&cube)).top_clients;
        let alice = top.iter().find(|g| g.key == "Alice").unwrap();
        assert_eq!(alice.value, 1050.0);
    }

    // -------------------------------------------------------------------------
    // FORMATTING
    // -------------------------------------------------------------------------

    #[test]
    fn test_format_eur() {
        assert_eq!(format_eur(0.0), "0.00 €");
        assert_eq!(format_eur(999.5), "999.50 €");
        assert_eq!(format_eur(1234.567), "1,234.57 €");
        assert_eq!(format_eur(1_000_000.0), "1,000,000.00 €");
        assert_eq!(format_eur(-4150.0), "-4,150.00 €");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(123), "123");
        assert_eq!(format_count(1234), "1,234");
        assert_eq!(format_count(-1234567), "-1,234,567");
    }
}
