//! SQL analytics task: Q2 revenue by category.
//!
//! The sandbox gets `data/{orders,products,returns}.csv`. Ground truth is
//! revenue per category for orders placed in Q2 2023, excluding returned
//! orders, top 3 sorted by `(-revenue, category)` and rounded to cents.
//! Graded as an ordered sequence under numeric tolerance.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::grading::{AnalyticsGrader, Grader, ResultFields};
use crate::sandbox::{SandboxError, SandboxInstance};

use super::pick_variant;

pub(crate) const PROMPT: &str = "\
The sandbox holds CSV exports of an order database under data/.

Compute revenue (quantity * unit_price) per product category for orders
placed between 2023-04-01 and 2023-06-30 inclusive, excluding returned
orders. Report the top 3 categories sorted by revenue descending, ties
broken by category ascending, revenue rounded to cents.

Sandbox layout:
{layout_hint}

Submit a JSON envelope:
{\"passed\": bool, \"checks\": {}, \"answer\": {\"results\": [{\"category\": str, \"revenue\": number}]}, \"notes\": \"\"}
";

pub(crate) struct Order {
    pub order_id: &'static str,
    pub order_date: &'static str,
    pub product_id: &'static str,
    pub quantity: u32,
    pub unit_price: f64,
}

pub(crate) struct VariantData {
    pub products: &'static [(&'static str, &'static str)],
    pub orders: &'static [Order],
    pub returns: &'static [&'static str],
}

macro_rules! order {
    ($id:literal, $date:literal, $product:literal, $qty:literal, $price:literal) => {
        Order {
            order_id: $id,
            order_date: $date,
            product_id: $product,
            quantity: $qty,
            unit_price: $price,
        }
    };
}

fn variant_data(variant: u32) -> VariantData {
    match variant {
        1 => VariantData {
            products: &[("W1", "widgets"), ("G1", "gadgets"), ("A1", "accessories")],
            orders: &[
                order!("1001", "2023-04-03", "W1", 2, 20.0),
                order!("1002", "2023-04-20", "G1", 1, 45.0),
                order!("1003", "2023-05-05", "A1", 5, 12.0),
                order!("1004", "2023-06-15", "W1", 1, 20.0),
            ],
            returns: &["1002"],
        },
        2 => VariantData {
            products: &[("P1", "hardware"), ("P2", "hardware"), ("P3", "software")],
            orders: &[
                order!("2001", "2023-04-11", "P1", 1, 120.0),
                order!("2002", "2023-05-19", "P2", 2, 90.0),
                order!("2003", "2023-06-02", "P3", 3, 40.0),
            ],
            returns: &[],
        },
        _ => VariantData {
            products: &[("C1", "cloud"), ("S1", "support")],
            orders: &[
                order!("3001", "2023-05-01", "C1", 10, 15.0),
                order!("3002", "2023-05-15", "S1", 1, 200.0),
            ],
            returns: &[],
        },
    }
}

fn render_orders_csv(orders: &[Order]) -> String {
    let mut out = String::from("order_id,order_date,product_id,quantity,unit_price\n");
    for order in orders {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            order.order_id, order.order_date, order.product_id, order.quantity, order.unit_price
        ));
    }
    out
}

fn render_products_csv(products: &[(&str, &str)]) -> String {
    let mut out = String::from("product_id,category\n");
    for (id, category) in products {
        out.push_str(&format!("{id},{category}\n"));
    }
    out
}

fn render_returns_csv(returns: &[&str]) -> String {
    let mut out = String::from("order_id\n");
    for id in returns {
        out.push_str(&format!("{id}\n"));
    }
    out
}

/// Independent ground-truth computation over the same variant data.
pub(crate) fn compute_expected(data: &VariantData) -> Vec<(String, f64)> {
    let categories: std::collections::BTreeMap<&str, &str> =
        data.products.iter().copied().collect();
    let returned: std::collections::BTreeSet<&str> = data.returns.iter().copied().collect();

    let mut revenue: std::collections::BTreeMap<&str, f64> = std::collections::BTreeMap::new();
    for order in data.orders {
        if returned.contains(order.order_id) {
            continue;
        }
        if order.order_date < "2023-04-01" || order.order_date > "2023-06-30" {
            continue;
        }
        let Some(category) = categories.get(order.product_id) else {
            continue;
        };
        *revenue.entry(category).or_insert(0.0) += f64::from(order.quantity) * order.unit_price;
    }

    let mut items: Vec<(String, f64)> = revenue
        .into_iter()
        .map(|(category, amount)| (category.to_string(), (amount * 100.0).round() / 100.0))
        .collect();
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    items.truncate(3);
    items
}

/// Seeds one variant and returns the matching analytics grader.
pub(crate) fn build(
    sandbox: &SandboxInstance,
    seed: u64,
    _config: &HarnessConfig,
) -> Result<(Arc<dyn Grader>, u32), SandboxError> {
    let variant = pick_variant(seed, 3);
    let data = variant_data(variant);

    sandbox.write_file("data/orders.csv", &render_orders_csv(data.orders))?;
    sandbox.write_file("data/products.csv", &render_products_csv(data.products))?;
    sandbox.write_file("data/returns.csv", &render_returns_csv(data.returns))?;
    sandbox.write_file(
        "data/README.txt",
        "Data files:\n\
         - orders.csv: order_id, order_date, product_id, quantity, unit_price\n\
         - products.csv: product_id, category\n\
         - returns.csv: order_id\n",
    )?;

    let expected = compute_expected(&data);
    Ok((
        Arc::new(AnalyticsGrader::new(
            ResultFields::CATEGORY_REVENUE,
            expected,
        )),
        variant,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_variant_1_excludes_returned_order() {
        let expected = compute_expected(&variant_data(1));
        // Order 1002 (gadgets, 45.0) was returned. widgets 2*20 + 1*20 = 60
        // ties accessories 5*12 = 60; category ascending puts accessories first.
        assert_eq!(
            expected,
            vec![
                ("accessories".to_string(), 60.0),
                ("widgets".to_string(), 60.0),
            ]
        );
    }

    #[test]
    fn test_expected_variant_2_merges_same_category() {
        let expected = compute_expected(&variant_data(2));
        assert_eq!(
            expected,
            vec![
                ("hardware".to_string(), 300.0),
                ("software".to_string(), 120.0),
            ]
        );
    }

    #[test]
    fn test_date_window_is_inclusive() {
        let data = VariantData {
            products: &[("X", "edge")],
            orders: &[
                order!("1", "2023-04-01", "X", 1, 10.0),
                order!("2", "2023-06-30", "X", 1, 10.0),
                order!("3", "2023-07-01", "X", 1, 10.0),
                order!("4", "2023-03-31", "X", 1, 10.0),
            ],
            returns: &[],
        };
        let expected = compute_expected(&data);
        assert_eq!(expected, vec![("edge".to_string(), 20.0)]);
    }

    #[test]
    fn test_rounding_to_cents() {
        let data = VariantData {
            products: &[("X", "fractional")],
            orders: &[order!("1", "2023-05-01", "X", 3, 3.333)],
            returns: &[],
        };
        let expected = compute_expected(&data);
        assert_eq!(expected[0].1, 10.0);
    }

    #[test]
    fn test_build_writes_csvs() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let (_grader, _variant) = build(&sandbox, 2, &HarnessConfig::new()).unwrap();
        for name in ["orders.csv", "products.csv", "returns.csv", "README.txt"] {
            assert!(sandbox.root().join("data").join(name).exists());
        }
        let orders = std::fs::read_to_string(sandbox.root().join("data/orders.csv")).unwrap();
        assert!(orders.starts_with("order_id,order_date,product_id,quantity,unit_price\n"));
        sandbox.teardown().unwrap();
    }
}
