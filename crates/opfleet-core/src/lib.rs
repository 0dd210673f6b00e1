//! # Opfleet Core
//!
//! Structural merge engine for multi-tenant operand fleet configuration.
//! Pure tree algorithms over generic JSON configuration trees; no cluster I/O.

pub mod error;
pub mod index;
pub mod merge;
pub mod modes;
pub mod profiles;
pub mod quantity;
pub mod rules;

pub use error::*;
pub use merge::{
    deep_merge, extreme_merge, filter_with_rules, merge_with_default_rules, merge_with_rules,
    reset_managed_fields, Extreme, MergePolicy,
};
pub use modes::{merge_controller_modes, ControllerModes, DEFAULT_MODE, FALLBACK_MODE_KEY};
pub use rules::RuleSet;
