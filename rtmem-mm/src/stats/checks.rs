//! Per-field sanity checks for memory statistics
//!
//! A static table maps every report field to the predicates it must satisfy
//! once the runtime has allocated something and completed at least one forced
//! collection. [`check_fields`] walks the report field by field, so a field
//! added to [`MemStats`] without a table entry is reported too.

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use super::{FieldValue, MemStats};

/// A predicate on one report field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldCheck {
    /// Must not be the zero value
    NonZero,
    /// Must be strictly below the bound (anything larger is overflow)
    AtMost(f64),
    /// Flag must have this value
    Equals(bool),
}

impl FieldCheck {
    /// Applies the predicate, describing the failure
    pub fn apply(&self, value: &FieldValue) -> core::result::Result<(), String> {
        match (*self, *value) {
            (FieldCheck::NonZero, FieldValue::Uint(0)) => Err(String::from("zero value")),
            (FieldCheck::NonZero, FieldValue::Float(v)) if v == 0.0 => Err(String::from("zero value")),
            (FieldCheck::NonZero, FieldValue::Bool(false)) => Err(String::from("zero value")),
            (FieldCheck::NonZero, FieldValue::Array(0)) => Err(String::from("zero value")),
            (FieldCheck::NonZero, _) => Ok(()),
            (FieldCheck::AtMost(limit), FieldValue::Uint(v)) => at_most(v as f64, limit),
            (FieldCheck::AtMost(limit), FieldValue::Float(v)) => at_most(v, limit),
            (FieldCheck::Equals(want), FieldValue::Bool(v)) if v == want => Ok(()),
            (FieldCheck::Equals(want), _) => Err(format!("want {}", want)),
            (check, value) => Err(format!("{:?} does not apply to {}", check, value)),
        }
    }
}

fn at_most(value: f64, limit: f64) -> core::result::Result<(), String> {
    if value < limit {
        Ok(())
    } else {
        Err(format!("insanely high value (overflow?); want <= {:e}", limit))
    }
}

use FieldCheck::{AtMost, Equals, NonZero};

/// Expected checks per report field.
///
/// `heap_idle` and `heap_released` may legitimately be zero, and so may
/// `pause_total_ns` when the clock resolution is coarse.
pub static MEMSTATS_FIELD_CHECKS: &[(&str, &[FieldCheck])] = &[
    ("alloc", &[NonZero, AtMost(1e10)]),
    ("total_alloc", &[NonZero, AtMost(1e11)]),
    ("sys", &[NonZero, AtMost(1e10)]),
    ("lookups", &[NonZero, AtMost(1e10)]),
    ("mallocs", &[NonZero, AtMost(1e10)]),
    ("frees", &[NonZero, AtMost(1e10)]),
    ("heap_alloc", &[NonZero, AtMost(1e10)]),
    ("heap_sys", &[NonZero, AtMost(1e10)]),
    ("heap_idle", &[AtMost(1e10)]),
    ("heap_inuse", &[NonZero, AtMost(1e10)]),
    ("heap_released", &[AtMost(1e10)]),
    ("heap_objects", &[NonZero, AtMost(1e10)]),
    ("stack_inuse", &[NonZero, AtMost(1e10)]),
    ("stack_sys", &[NonZero, AtMost(1e10)]),
    ("mspan_inuse", &[NonZero, AtMost(1e10)]),
    ("mspan_sys", &[NonZero, AtMost(1e10)]),
    ("mcache_inuse", &[NonZero, AtMost(1e10)]),
    ("mcache_sys", &[NonZero, AtMost(1e10)]),
    ("buck_hash_sys", &[NonZero, AtMost(1e10)]),
    ("gc_sys", &[NonZero, AtMost(1e10)]),
    ("other_sys", &[NonZero, AtMost(1e10)]),
    ("next_gc", &[NonZero, AtMost(1e10)]),
    ("last_gc", &[NonZero]),
    ("pause_total_ns", &[AtMost(1e11)]),
    ("pause_ns", &[]),
    ("pause_end", &[]),
    ("num_gc", &[NonZero, AtMost(1e9)]),
    ("num_forced_gc", &[NonZero, AtMost(1e9)]),
    ("gc_cpu_fraction", &[]),
    ("enable_gc", &[Equals(true)]),
    ("debug_gc", &[Equals(false)]),
    ("by_size", &[]),
];

/// One failed field check
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    /// Field name
    pub field: &'static str,
    /// Observed value, if the field exists in the report
    pub value: Option<FieldValue>,
    /// What went wrong
    pub reason: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{} = {}: {}", self.field, value, self.reason),
            None => write!(f, "{}: {}", self.field, self.reason),
        }
    }
}

/// Looks up the checks for a field
pub fn checks_for(field: &str) -> Option<&'static [FieldCheck]> {
    MEMSTATS_FIELD_CHECKS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, checks)| *checks)
}

/// Runs every table check against the report
pub fn check_fields(stats: &MemStats) -> Vec<FieldViolation> {
    let fields = stats.fields();
    let mut violations = Vec::new();

    for (name, value) in fields.iter() {
        let Some(checks) = checks_for(name) else {
            violations.push(FieldViolation {
                field: *name,
                value: Some(*value),
                reason: String::from("unknown MemStats field"),
            });
            continue;
        };
        for check in checks {
            if let Err(reason) = check.apply(value) {
                violations.push(FieldViolation {
                    field: *name,
                    value: Some(*value),
                    reason,
                });
            }
        }
    }

    for (name, _) in MEMSTATS_FIELD_CHECKS {
        if !fields.iter().any(|(field, _)| field == name) {
            violations.push(FieldViolation {
                field: *name,
                value: None,
                reason: String::from("checked field missing from MemStats"),
            });
        }
    }

    violations
}
