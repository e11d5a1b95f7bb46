//! Star schema builders: client/product dimensions, time dimension, fact table

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;
use tracing::{info, warn};
use warehouse::{ClientRecord, Keyed, ProductRecord, SaleRecord, TimeRecord, Warehouse};

use crate::extract::Extracts;

/// Historical spellings collapsed to one canonical country token
/// (exact match only)
pub const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("États-Unis", "USA"),
    ("United States", "USA"),
    ("US", "USA"),
];

pub fn normalize_country(country: &str) -> &str {
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == country)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(country)
}

/// Keep the first row per entity key, preserving order
fn unique_by_key<T>(table: &str, rows: Vec<T>) -> Vec<T>
where
    T: Keyed + PartialEq + Debug,
    T::Key: Debug,
{
    let mut index: HashMap<T::Key, usize> = HashMap::new();
    let mut unique: Vec<T> = Vec::with_capacity(rows.len());

    for row in rows {
        let key = row.key();
        match index.get(&key) {
            Some(&i) => {
                if unique[i] != row {
                    warn!(table, key = ?key, kept = ?unique[i], dropped = ?row, "conflicting rows for key");
                }
            }
            None => {
                index.insert(key, unique.len());
                unique.push(row);
            }
        }
    }

    unique
}

/// Client dimension: country normalization, then one row per client_id
pub fn build_clients(rows: Vec<ClientRecord>) -> Vec<ClientRecord> {
    let normalized = rows
        .into_iter()
        .map(|mut c| {
            c.country = normalize_country(&c.country).to_string();
            c
        })
        .collect();
    unique_by_key("Dim_Clients", normalized)
}

/// Product dimension: one row per product_id
pub fn build_products(rows: Vec<ProductRecord>) -> Vec<ProductRecord> {
    unique_by_key("Dim_Produits", rows)
}

/// One row per distinct sale date, ascending
pub fn build_time(sales: &[SaleRecord]) -> Vec<TimeRecord> {
    sales
        .iter()
        .map(|s| s.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(TimeRecord::from_date)
        .collect()
}

/// Fact references without a dimension row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Orphans {
    pub client_refs: usize,
    pub product_refs: usize,
}

/// Fact table in extract order. Keys are not checked against the
/// dimensions; references without a match are only counted.
pub fn build_facts(
    sales: Vec<SaleRecord>,
    clients: &[ClientRecord],
    products: &[ProductRecord],
) -> (Vec<SaleRecord>, Orphans) {
    let client_keys: HashSet<i64> = clients.iter().map(Keyed::key).collect();
    let product_keys: HashSet<i64> = products.iter().map(Keyed::key).collect();

    let orphans = Orphans {
        client_refs: sales
            .iter()
            .filter(|s| !client_keys.contains(&s.client_id))
            .count(),
        product_refs: sales
            .iter()
            .filter(|s| !product_keys.contains(&s.product_id))
            .count(),
    };

    (sales, orphans)
}

/// Assemble the four warehouse tables from cleaned extracts
pub fn build_warehouse(extracts: Extracts) -> (Warehouse, Orphans) {
    let clients = build_clients(extracts.clients.rows);
    let products = build_products(extracts.products.rows);
    let time = build_time(&extracts.sales.rows);
    let (sales, orphans) = build_facts(extracts.sales.rows, &clients, &products);

    info!(
        clients = clients.len(),
        products = products.len(),
        dates = time.len(),
        sales = sales.len(),
        "star schema built"
    );
    if orphans != Orphans::default() {
        warn!(
            client_refs = orphans.client_refs,
            product_refs = orphans.product_refs,
            "facts reference missing dimension rows"
        );
    }

    (
        Warehouse {
            clients,
            products,
            time,
            sales,
        },
        orphans,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn client(id: i64, country: &str) -> ClientRecord {
        ClientRecord {
            client_id: id,
            name: format!("Client {}", id),
            city: "Ville".into(),
            country: country.into(),
            segment: "Particulier".into(),
        }
    }

    fn sale(id: i64, client_id: i64, product_id: i64, date: (i32, u32, u32)) -> SaleRecord {
        SaleRecord {
            sale_id: id,
            client_id,
            product_id,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            quantity: 1,
            amount: 10.0,
        }
    }

    // -------------------------------------------------------------------------
    // COUNTRY NORMALIZATION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_country_aliases_collapse() {
        assert_eq!(normalize_country("États-Unis"), "USA");
        assert_eq!(normalize_country("United States"), "USA");
        assert_eq!(normalize_country("US"), "USA");
        assert_eq!(normalize_country("USA"), "USA");
    }

    #[test]
    fn test_country_normalization_is_exact_match() {
        assert_eq!(normalize_country("France"), "France");
        assert_eq!(normalize_country("us"), "us");
        assert_eq!(normalize_country("United States of America"), "United States of America");
    }

    #[test]
    fn test_build_clients_normalizes() {
        let built = build_clients(vec![
            client(1, "États-Unis"),
            client(2, "United States"),
            client(3, "US"),
        ]);
        assert!(built.iter().all(|c| c.country == "USA"));
    }

    // -------------------------------------------------------------------------
    // KEY UNIQUENESS TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_clients_one_row_per_key() {
        let mut second = client(1, "France");
        second.segment = "Entreprise".into();
        let built = build_clients(vec![client(1, "France"), client(2, "France"), second]);
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].segment, "Particulier");
    }

    #[test]
    fn test_aliases_merge_into_one_row() {
        // Same client spelled two ways becomes an exact duplicate
        let built = build_clients(vec![client(1, "US"), client(1, "USA")]);
        assert_eq!(built, vec![client(1, "USA")]);
    }

    #[test]
    fn test_build_products_one_row_per_key() {
        let p = |id: i64, price: f64| ProductRecord {
            product_id: id,
            name: "Stylo".into(),
            category: "Bureau".into(),
            price,
        };
        let built = build_products(vec![p(1, 2.0), p(1, 3.0), p(2, 4.0)]);
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].price, 2.0);
    }

    // -------------------------------------------------------------------------
    // TIME DIMENSION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_time_distinct_sorted() {
        let sales = vec![
            sale(1, 1, 1, (2023, 11, 30)),
            sale(2, 1, 1, (2022, 3, 15)),
            sale(3, 1, 1, (2023, 11, 30)),
            sale(4, 1, 1, (2023, 5, 1)),
        ];
        let time = build_time(&sales);
        let dates: Vec<String> = time.iter().map(|t| t.date.to_string()).collect();
        assert_eq!(dates, vec!["2022-03-15", "2023-05-01", "2023-11-30"]);
        assert_eq!(time[2].quarter, 4);
        assert_eq!(time[0].quarter, 1);
    }

    #[test]
    fn test_build_time_empty() {
        assert!(build_time(&[]).is_empty());
    }

    // -------------------------------------------------------------------------
    // FACT TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_facts_keeps_order_and_orphans() {
        let sales = vec![sale(2, 1, 1, (2023, 1, 1)), sale(1, 9, 1, (2023, 1, 2))];
        let products = vec![ProductRecord {
            product_id: 1,
            name: "Stylo".into(),
            category: "Bureau".into(),
            price: 1.0,
        }];
        let (facts, orphans) = build_facts(sales.clone(), &[client(1, "France")], &products);
        assert_eq!(facts, sales);
        assert_eq!(
            orphans,
            Orphans {
                client_refs: 1,
                product_refs: 0
            }
        );
    }
}
