//! Pagination, search, and sort over keyed store entries.
//!
//! Search is a logical OR across the key and the named value fields; sort is
//! stable so equal keys keep their insertion order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Search/sort options for a paginated listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageQuery {
    /// Case-insensitive substring to search for.
    pub search_val: Option<String>,
    /// Value fields to search; when absent the whole JSON value is searched.
    pub search_fields: Option<Vec<String>>,
    /// Sort field; `"key"` sorts by entry key, anything else by that value field.
    pub sort_by: Option<String>,
    pub sort_desc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// One page of a filtered/sorted listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Paginate `entries`, applying `query` filtering and sorting first.
///
/// `page` is clamped into `[1, total_pages]`; concatenating every page in
/// order reproduces the full filtered set with no duplicates or gaps.
pub fn paginate<T: Serialize + Clone>(
    entries: &[(String, T)],
    page: usize,
    page_size: usize,
    query: &PageQuery,
) -> Page<T> {
    let page_size = page_size.max(1);

    let mut filtered: Vec<(&String, Value, &T)> = entries
        .iter()
        .map(|(k, v)| (k, serde_json::to_value(v).unwrap_or(Value::Null), v))
        .filter(|(k, json, _)| matches_search(k, json, query))
        .collect();

    if let Some(sort_by) = query.sort_by.as_deref() {
        sort_entries(&mut filtered, sort_by, query.sort_desc);
    }

    let total = filtered.len();
    let total_pages = total.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages);

    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total);
    let items = if start < total {
        filtered[start..end].iter().map(|(_, _, v)| (*v).clone()).collect()
    } else {
        Vec::new()
    };

    Page {
        items,
        pagination: Pagination {
            page,
            page_size,
            total,
            total_pages,
        },
    }
}

fn matches_search(key: &str, json: &Value, query: &PageQuery) -> bool {
    let Some(needle) = query.search_val.as_deref().filter(|s| !s.is_empty()) else {
        return true;
    };
    let needle = needle.to_lowercase();

    if key.to_lowercase().contains(&needle) {
        return true;
    }

    match query.search_fields.as_deref().filter(|f| !f.is_empty()) {
        Some(fields) => fields.iter().any(|field| {
            json.get(field)
                .map(|v| value_text(v).to_lowercase().contains(&needle))
                .unwrap_or(false)
        }),
        // No named fields: fall back to a whole-value JSON substring match.
        None => json.to_string().to_lowercase().contains(&needle),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sort_entries<T>(entries: &mut [(&String, Value, &T)], sort_by: &str, desc: bool) {
    entries.sort_by(|a, b| {
        let ordering = if sort_by == "key" {
            a.0.cmp(b.0)
        } else {
            compare_values(a.1.get(sort_by), b.1.get(sort_by))
        };
        if desc {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
