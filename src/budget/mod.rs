//! # Budget Subsystem
//!
//! ## Responsibility
//! Keep spend inside the configured token budgets: [`TokenTracker`] counts
//! and prices usage and answers admission checks; [`AlertEmitter`] tells
//! people when utilisation crosses a threshold.
//!
//! ## Guarantees
//! - A denied admission is a value, never a panic
//! - Alert delivery problems never affect request handling
//!
//! ## NOT Responsible For
//! - Persisting counters across restarts

pub mod alerts;
pub mod tracker;

pub use alerts::{
    channel_from_config, AlertChannel, AlertEmitter, AlertError, BudgetAlert, ConsoleChannel,
    FileChannel, WebhookChannel,
};
pub use tracker::{
    Admission, AdmissionCheck, BudgetPeriod, BudgetStatus, Reservation, TokenTracker,
};
