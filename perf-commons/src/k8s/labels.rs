use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

/// Parses `key1=val1;key2=val2` into a label map.
///
/// All or nothing: one pair that does not split into exactly a key and a
/// value invalidates the whole map. Empty input yields `None` as well.
pub fn parse_labels(input: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in input.split(';') {
        let parts: Vec<&str> = pair.trim().split('=').collect();
        let [key, value] = parts.as_slice() else {
            return None;
        };
        labels.insert(key.to_string(), value.to_string());
    }
    Some(labels)
}

/// Renders a structured selector in the `kubectl -l` string form.
pub fn selector_string(selector: &LabelSelector) -> String {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        terms.push(match expr.operator.as_str() {
            "In" => format!("{} in ({values})", expr.key),
            "NotIn" => format!("{} notin ({values})", expr.key),
            "DoesNotExist" => format!("!{}", expr.key),
            _ => expr.key.clone(),
        });
    }
    terms.join(",")
}

/// Joins selector fragments, dropping empty ones.
pub fn join_selectors<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
