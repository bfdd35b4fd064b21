//! Include path resolution.
//!
//! An include path names a field holding a document id. Segments are
//! separated by `.`; a segment ending in `[]` walks every element of an
//! array. `Lines[].Product` resolves the `Product` field of each line.

use crate::constants::DOCUMENT_ID_FIELD_NAME;
use serde_json::Value;

/// Calls `f` with every id `path` resolves to inside `document`.
pub fn for_each_include_id(document: &Value, path: &str, mut f: impl FnMut(&str)) {
    if path.is_empty() || path == DOCUMENT_ID_FIELD_NAME {
        return;
    }
    let segments: Vec<&str> = path.split('.').collect();
    walk(document, &segments, &mut f);
}

/// Collects every id `path` resolves to inside `document`.
#[must_use]
pub fn collect_include_ids(document: &Value, path: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for_each_include_id(document, path, |id| ids.push(id.to_string()));
    ids
}

fn walk(value: &Value, segments: &[&str], f: &mut dyn FnMut(&str)) {
    let Some((segment, rest)) = segments.split_first() else {
        emit(value, f);
        return;
    };

    let (field, is_array) = match segment.strip_suffix("[]") {
        Some(field) => (field, true),
        None => (*segment, false),
    };
    let Some(child) = value.get(field) else {
        return;
    };

    if is_array {
        if let Some(items) = child.as_array() {
            for item in items {
                walk(item, rest, f);
            }
        }
    } else {
        walk(child, rest, f);
    }
}

fn emit(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::String(id) if !id.is_empty() => f(id.as_str()),
        Value::Array(items) => {
            for item in items {
                if let Some(id) = item.as_str().filter(|id| !id.is_empty()) {
                    f(id);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> Value {
        json!({
            "Company": "companies/1",
            "Employees": ["employees/1", "employees/2"],
            "Shipping": {"Carrier": "shippers/3"},
            "Lines": [
                {"Product": "products/1"},
                {"Product": "products/2"},
                {"Quantity": 3}
            ]
        })
    }

    #[test]
    fn plain_field() {
        assert_eq!(collect_include_ids(&order(), "Company"), ["companies/1"]);
    }

    #[test]
    fn array_of_ids() {
        assert_eq!(
            collect_include_ids(&order(), "Employees"),
            ["employees/1", "employees/2"]
        );
    }

    #[test]
    fn nested_and_array_paths() {
        assert_eq!(collect_include_ids(&order(), "Shipping.Carrier"), ["shippers/3"]);
        assert_eq!(
            collect_include_ids(&order(), "Lines[].Product"),
            ["products/1", "products/2"]
        );
    }

    #[test]
    fn unknown_and_id_paths_yield_nothing() {
        assert!(collect_include_ids(&order(), "Missing.Field").is_empty());
        assert!(collect_include_ids(&order(), DOCUMENT_ID_FIELD_NAME).is_empty());
    }
}
