use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mockalchemy_core::Record;

pub const DEFAULT_PAGE: u32 = 1;

/// Flat AND of field conditions: literal values or operator objects.
pub type Filter = Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Options of a list query. Missing page/limit fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    #[serde(skip_serializing_if = "Filter::is_empty")]
    pub filter: Filter,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn filter(mut self, field: impl Into<String>, condition: Value) -> Self {
        self.filter.insert(field.into(), condition);
        self
    }

    pub fn effective_page(&self) -> u32 {
        self.page.unwrap_or(DEFAULT_PAGE).max(1)
    }

    pub fn effective_limit(&self, default_limit: u32) -> u32 {
        self.limit.unwrap_or(default_limit).max(1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub data: Vec<Record>,
    pub pagination: Pagination,
}

/// Filter, then sort, then paginate.
pub fn run_query(records: Vec<Record>, options: &QueryOptions, default_limit: u32) -> QueryResult {
    let mut matching: Vec<Record> = records
        .into_iter()
        .filter(|record| matches_filter(record, &options.filter))
        .collect();
    if let Some(field) = &options.sort_by {
        sort_records(&mut matching, field, options.sort_order);
    }
    paginate(
        matching,
        options.effective_page(),
        options.effective_limit(default_limit),
    )
}

/// Slice one page out of `records`. Out-of-range pages are empty.
pub fn paginate(records: Vec<Record>, page: u32, limit: u32) -> QueryResult {
    let page = page.max(1);
    let limit = limit.max(1);
    let total = records.len();
    let total_pages = total.div_ceil(limit as usize);
    let start = (page as usize - 1).saturating_mul(limit as usize);

    let data = records
        .into_iter()
        .skip(start)
        .take(limit as usize)
        .collect();

    QueryResult {
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages,
        },
    }
}

/// Stable single-key sort over a total order: missing < null < booleans <
/// numbers < strings < arrays < objects, values compared within their rank.
pub fn sort_records(records: &mut [Record], field: &str, order: SortOrder) {
    records.sort_by(|left, right| {
        let ordering = sort_key_cmp(left.get(field), right.get(field));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn sort_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

fn sort_key_cmp(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    sort_rank(left)
        .cmp(&sort_rank(right))
        .then_with(|| match (left, right) {
            (Some(Value::Number(left)), Some(Value::Number(right))) => left
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&right.as_f64().unwrap_or(f64::NAN)),
            (Some(left), Some(right)) => compare_values(left, right).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        })
}

pub fn matches_filter(record: &Record, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(field, condition)| matches_condition(record.get(field), condition))
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> bool {
    match operator_object(condition) {
        Some(operators) => operators
            .iter()
            .all(|(operator, operand)| apply_operator(value, operator, operand)),
        None => value.is_some_and(|value| values_equal(value, condition)),
    }
}

/// An object whose keys are `$`-prefixed operators.
fn operator_object(condition: &Value) -> Option<&Map<String, Value>> {
    condition
        .as_object()
        .filter(|object| !object.is_empty() && object.keys().all(|key| key.starts_with('$')))
}

fn apply_operator(value: Option<&Value>, operator: &str, operand: &Value) -> bool {
    match operator {
        "$eq" => value.is_some_and(|value| values_equal(value, operand)),
        "$ne" => !value.is_some_and(|value| values_equal(value, operand)),
        "$gt" => compare_present(value, operand).is_some_and(Ordering::is_gt),
        "$gte" => compare_present(value, operand).is_some_and(Ordering::is_ge),
        "$lt" => compare_present(value, operand).is_some_and(Ordering::is_lt),
        "$lte" => compare_present(value, operand).is_some_and(Ordering::is_le),
        "$in" => match operand.as_array() {
            Some(candidates) => value.is_some_and(|value| {
                candidates
                    .iter()
                    .any(|candidate| values_equal(value, candidate))
            }),
            None => false,
        },
        "$nin" => match operand.as_array() {
            Some(candidates) => !value.is_some_and(|value| {
                candidates
                    .iter()
                    .any(|candidate| values_equal(value, candidate))
            }),
            None => false,
        },
        // unknown operators do not constrain the match
        _ => true,
    }
}

fn compare_present(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    value.and_then(|value| compare_values(value, operand))
}

/// Numbers compare numerically, strings and booleans natively. Mixed types
/// have no order.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

/// Strict equality, except that `1` and `1.0` are the same number.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        },
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products() -> Vec<Record> {
        [
            json!({"id": "p1", "category": "electronics", "price": 30}),
            json!({"id": "p2", "category": "books", "price": 10.5}),
            json!({"id": "p3", "category": "electronics", "price": 20}),
            json!({"id": "p4", "category": "toys"}),
        ]
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect()
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|record| record["id"].as_str())
            .collect()
    }

    #[test]
    fn literal_filters_match_exactly() {
        let options = QueryOptions::new().filter("category", json!("electronics"));
        let result = run_query(products(), &options, 20);
        assert_eq!(ids(&result.data), vec!["p1", "p3"]);
    }

    #[test]
    fn comparison_operators_skip_missing_and_mixed_values() {
        let options = QueryOptions::new().filter("price", json!({"$gte": 20}));
        let result = run_query(products(), &options, 20);
        assert_eq!(ids(&result.data), vec!["p1", "p3"]);

        let options = QueryOptions::new().filter("price", json!({"$lt": "50"}));
        assert!(run_query(products(), &options, 20).data.is_empty());
    }

    #[test]
    fn membership_operators() {
        let options =
            QueryOptions::new().filter("category", json!({"$in": ["books", "toys"]}));
        assert_eq!(ids(&run_query(products(), &options, 20).data), vec!["p2", "p4"]);

        let options = QueryOptions::new().filter("category", json!({"$nin": ["books"]}));
        assert_eq!(
            ids(&run_query(products(), &options, 20).data),
            vec!["p1", "p3", "p4"]
        );

        let options = QueryOptions::new().filter("category", json!({"$in": "books"}));
        assert!(run_query(products(), &options, 20).data.is_empty());
    }

    #[test]
    fn ne_matches_missing_fields_and_unknown_operators_pass() {
        let options = QueryOptions::new().filter("price", json!({"$ne": 30}));
        assert_eq!(
            ids(&run_query(products(), &options, 20).data),
            vec!["p2", "p3", "p4"]
        );

        let options = QueryOptions::new().filter("price", json!({"$regex": "^3"}));
        assert_eq!(run_query(products(), &options, 20).data.len(), 4);
    }

    #[test]
    fn integer_and_float_literals_compare_equal() {
        let options = QueryOptions::new().filter("price", json!(20.0));
        assert_eq!(ids(&run_query(products(), &options, 20).data), vec!["p3"]);
    }

    #[test]
    fn sort_is_stable_and_puts_missing_values_first() {
        let mut records = products();
        sort_records(&mut records, "price", SortOrder::Desc);
        assert_eq!(ids(&records), vec!["p1", "p3", "p2", "p4"]);

        let mut records = products();
        sort_records(&mut records, "price", SortOrder::Asc);
        assert_eq!(ids(&records), vec!["p4", "p2", "p3", "p1"]);

        let mut records = products();
        sort_records(&mut records, "category", SortOrder::Asc);
        assert_eq!(ids(&records), vec!["p2", "p1", "p3", "p4"]);
    }

    #[test]
    fn sorting_with_gaps_keeps_present_values_monotone() {
        let mut records: Vec<Record> = (0..200)
            .filter_map(|index| {
                let value = if index % 4 == 0 {
                    json!({"id": format!("r{index}")})
                } else {
                    json!({"id": format!("r{index}"), "price": (index * 37) % 101})
                };
                value.as_object().cloned()
            })
            .collect();
        records.push(json!({"id": "text", "price": "n/a"}).as_object().cloned().unwrap_or_default());
        records.push(json!({"id": "null", "price": null}).as_object().cloned().unwrap_or_default());

        sort_records(&mut records, "price", SortOrder::Asc);
        let prices: Vec<f64> = records
            .iter()
            .filter_map(|record| record.get("price").and_then(Value::as_f64))
            .collect();
        assert_eq!(prices.len(), 150);
        assert!(prices.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(records[..50].iter().all(|record| !record.contains_key("price")));
        assert_eq!(records[50]["id"], json!("null"));
        assert_eq!(records.last().map(|record| &record["id"]), Some(&json!("text")));

        sort_records(&mut records, "price", SortOrder::Desc);
        let prices: Vec<f64> = records
            .iter()
            .filter_map(|record| record.get("price").and_then(Value::as_f64))
            .collect();
        assert!(prices.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn pagination_clamps_out_of_range_pages() {
        let result = paginate(products(), 2, 3);
        assert_eq!(ids(&result.data), vec!["p4"]);
        assert_eq!(result.pagination.total_pages, 2);

        let result = paginate(products(), 9, 3);
        assert!(result.data.is_empty());
        assert_eq!(result.pagination.total, 4);

        let result = paginate(Vec::new(), 1, 5);
        assert_eq!(result.pagination.total_pages, 0);
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: QueryOptions = serde_json::from_value(json!({
            "page": 2,
            "sortBy": "price",
            "sortOrder": "desc",
            "filter": {"price": {"$gt": 25}}
        }))
        .expect("options");
        assert_eq!(options.effective_page(), 2);
        assert_eq!(options.effective_limit(20), 20);
        assert_eq!(options.sort_order, SortOrder::Desc);
    }
}
