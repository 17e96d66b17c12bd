//! Pool metrics
//!
//! Emitted through the `metrics` facade; without an installed recorder
//! every call is a no-op.
//!
//! - `nvs_pool_open_total{outcome}` - open attempts by result
//! - `nvs_pool_open_slots` - slots currently bound to an engine handle
//! - `nvs_pool_busy_total{op}` - operations refused by slot contention
//! - `nvs_pool_engine_errors_total{op}` - engine primitives that failed
//! - `nvs_pool_truncations_total{kind}` - identifiers cut to their limit

use crate::validate::IdentifierKind;
use ::metrics::{counter, gauge};

pub(crate) fn record_open(outcome: &'static str) {
    counter!("nvs_pool_open_total", "outcome" => outcome).increment(1);
}

pub(crate) fn set_open_slots(open: usize) {
    gauge!("nvs_pool_open_slots").set(open as f64);
}

pub(crate) fn record_busy(op: &'static str) {
    counter!("nvs_pool_busy_total", "op" => op).increment(1);
}

pub(crate) fn record_engine_error(op: &'static str) {
    counter!("nvs_pool_engine_errors_total", "op" => op).increment(1);
}

pub(crate) fn record_truncation(kind: IdentifierKind) {
    let kind = match kind {
        IdentifierKind::Partition => "partition",
        IdentifierKind::Namespace => "namespace",
        IdentifierKind::Key => "key",
    };
    counter!("nvs_pool_truncations_total", "kind" => kind).increment(1);
}
