//! Scalar comparison for sizing values
//!
//! Resolves the "larger"/"smaller" of two heterogeneous scalar values:
//! Kubernetes resource-quantity strings ("500m", "2Gi"), plain JSON numbers,
//! booleans, and known size-profile names. Anything else falls back to a
//! deterministic lexicographic order so that folding over tenants is total.

use serde_json::Value;
use std::cmp::Ordering;

/// Rank table for named size profiles; larger rank means more capacity.
const PROFILE_RANKS: &[(&str, u8)] = &[
    ("starterset", 0),
    ("small", 1),
    ("medium", 2),
    ("large", 3),
];

/// Compare two scalar values, returning `(max, min)`.
pub fn compare(a: &Value, b: &Value) -> (Value, Value) {
    match ordering(a, b) {
        Ordering::Less => (b.clone(), a.clone()),
        _ => (a.clone(), b.clone()),
    }
}

/// Total order over scalar sizing values.
pub fn ordering(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Some(x), Some(y)) = (profile_rank(a), profile_rank(b)) {
        return x.cmp(&y);
    }
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return x.cmp(y);
    }
    render(a).cmp(&render(b))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_quantity(s),
        _ => None,
    }
}

fn profile_rank(value: &Value) -> Option<u8> {
    let name = value.as_str()?;
    PROFILE_RANKS
        .iter()
        .find(|(profile, _)| *profile == name)
        .map(|(_, rank)| *rank)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a Kubernetes resource quantity into a comparable float.
///
/// Supports plain decimals (including exponent forms like "1E3"), decimal SI
/// suffixes (n, u, m, k, M, G, T, P, E) and binary suffixes (Ki..Ei).
pub fn parse_quantity(input: &str) -> Option<f64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    // Plain numbers first; this also covers exponent notation like "1E3".
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    const BINARY: &[(&str, f64)] = &[
        ("Ki", 1024f64),
        ("Mi", 1048576f64),
        ("Gi", 1073741824f64),
        ("Ti", 1099511627776f64),
        ("Pi", 1125899906842624f64),
        ("Ei", 1152921504606846976f64),
    ];
    const DECIMAL: &[(&str, f64)] = &[
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    for (suffix, factor) in BINARY.iter().chain(DECIMAL) {
        if let Some(rest) = s.strip_suffix(suffix) {
            if let Ok(v) = rest.parse::<f64>() {
                return Some(v * factor);
            }
        }
    }
    None
}
