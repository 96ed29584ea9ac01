//! # Request Classification
//!
//! ## Responsibility
//! Decide what each request deserves before any money is spent: how hard it
//! is ([`ComplexityClassifier`]), how important it is
//! ([`PriorityClassifier`]), and which model the clock favours
//! ([`TimeBasedRouter`]).
//!
//! ## Guarantees
//! - Deterministic: the same request and instant always classify the same way
//! - Infallible: invalid patterns are dropped at construction with a warning
//! - Immutable after construction, so classifiers are shared freely across tasks
//!
//! ## NOT Responsible For
//! - Budget admission (that belongs to `budget`)
//! - Calling the model (that belongs to `upstream` / `middleware`)

pub mod complexity;
pub mod priority;
pub mod time_based;

pub use complexity::{estimate_tokens, ComplexityClassifier, ComplexityResult, MODEL_LADDER};
pub use priority::{is_higher_priority, PriorityClassifier, PriorityResult};
pub use time_based::{TimeBasedRouter, TimePeriod, TimeRoutingResult};
