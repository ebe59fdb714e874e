//! Terminal output helpers.

mod output;

pub use output::{header, info, kv, success, warning};
