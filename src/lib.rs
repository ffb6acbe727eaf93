//! Alarm correlation and reduction engine.
//!
//! Events carrying alarm data are folded into long-lived alarms keyed by
//! reduction key. [`processing::AlarmPersister`] is the entry point; the
//! storage, transaction and notification seams are traits in [`state`] and
//! [`notifications`].

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod processing;
pub mod state;

pub use error::{AppError, Result};
pub use processing::AlarmPersister;
