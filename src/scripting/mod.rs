//! Rhai-based evaluation of block property expressions
//!
//! Block properties are dynamic string expressions ("2 * pi() / decim",
//! "\"float32\"", "[1, 0, -1]"). Each block evaluation helper owns one
//! [`ExpressionEngine`]; properties evaluate in declaration order, and
//! every successful result is bound back into the scope so later
//! expressions can reference earlier properties by key.
//!
//! ## Helper Functions
//!
//! - `pi()` - the circle constant
//! - `db20(x)` / `db10(x)` - amplitude/power ratio to decibels
//! - `from_db20(x)` / `from_db10(x)` - decibels back to a ratio
//!
//! Results are carried as tagged [`PropertyResult`]s rather than untyped
//! dynamic objects.

mod engine;

pub use engine::{EvaluatedProperty, ExpressionEngine};
