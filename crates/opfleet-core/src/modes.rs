//! Controller-mode resolution
//!
//! Each tenant declares, per operand, which authority owns its sizing fields:
//! the default engine or an independent controller (an external autoscaler).
//! Independent modes are sticky across tenants; the default mode never
//! displaces one.

use std::collections::{BTreeMap, BTreeSet};

/// Per-operand controller-mode declarations. The `FALLBACK_MODE_KEY` entry,
/// when present, applies to every operand without its own entry.
pub type ControllerModes = BTreeMap<String, String>;

/// Map key carrying the all-operand fallback mode.
pub const FALLBACK_MODE_KEY: &str = "profileController";

/// Mode meaning the default engine owns the sizing fields.
pub const DEFAULT_MODE: &str = "default";

/// Controllers that take sizing ownership away from the default engine.
pub fn independent_controllers() -> BTreeSet<String> {
    ["turbo", "turbonomic", "vpa"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Fold one tenant's mode declarations into the summary.
///
/// An incoming mode replaces an existing entry only when it is independent
/// and the existing entry is not; absent entries are adopted regardless.
pub fn merge_controller_modes(
    summary: &mut ControllerModes,
    incoming: &ControllerModes,
    independent: &BTreeSet<String>,
) {
    for (operand, mode) in incoming {
        match summary.get(operand) {
            Some(existing) => {
                if independent.contains(mode) && !independent.contains(existing) {
                    summary.insert(operand.clone(), mode.clone());
                }
            }
            None => {
                summary.insert(operand.clone(), mode.clone());
            }
        }
    }
}

/// Mode in effect for an operand, falling back to the summary-wide default.
pub fn mode_for<'a>(summary: &'a ControllerModes, operand: &str) -> Option<&'a str> {
    summary
        .get(operand)
        .or_else(|| summary.get(FALLBACK_MODE_KEY))
        .map(String::as_str)
}

/// Whether the operand's sizing is owned by an independent controller.
pub fn is_independent(summary: &ControllerModes, operand: &str, independent: &BTreeSet<String>) -> bool {
    mode_for(summary, operand).is_some_and(|mode| independent.contains(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes(entries: &[(&str, &str)]) -> ControllerModes {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_independent_mode_displaces_default() {
        let independent = independent_controllers();
        let mut summary = modes(&[("postgresql", DEFAULT_MODE)]);
        merge_controller_modes(&mut summary, &modes(&[("postgresql", "vpa")]), &independent);
        assert_eq!(summary.get("postgresql").map(String::as_str), Some("vpa"));
    }

    #[test]
    fn test_default_never_displaces_independent() {
        let independent = independent_controllers();
        let mut summary = modes(&[("postgresql", "vpa")]);
        merge_controller_modes(
            &mut summary,
            &modes(&[("postgresql", DEFAULT_MODE)]),
            &independent,
        );
        assert_eq!(summary.get("postgresql").map(String::as_str), Some("vpa"));
    }

    #[test]
    fn test_first_independent_mode_is_sticky() {
        let independent = independent_controllers();
        let mut summary = modes(&[("postgresql", "vpa")]);
        merge_controller_modes(&mut summary, &modes(&[("postgresql", "turbonomic")]), &independent);
        assert_eq!(summary.get("postgresql").map(String::as_str), Some("vpa"));
    }

    #[test]
    fn test_missing_entry_adopted() {
        let independent = independent_controllers();
        let mut summary = ControllerModes::new();
        merge_controller_modes(&mut summary, &modes(&[("search", DEFAULT_MODE)]), &independent);
        assert_eq!(
            summary.get("search").map(String::as_str),
            Some(DEFAULT_MODE)
        );
    }

    #[test]
    fn test_mode_for_falls_back_to_profile_controller() {
        let independent = independent_controllers();
        let summary = modes(&[(FALLBACK_MODE_KEY, "turbo"), ("search", DEFAULT_MODE)]);
        assert_eq!(mode_for(&summary, "postgresql"), Some("turbo"));
        assert_eq!(mode_for(&summary, "search"), Some("default"));
        assert!(is_independent(&summary, "postgresql", &independent));
        assert!(!is_independent(&summary, "search", &independent));
    }
}
