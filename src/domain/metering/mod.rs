//! Meter value normalization and per-transaction energy accounting

pub mod engine;
pub mod model;

pub use engine::{TransactionStart, TransactionStop};
pub use model::{ConnectorMetrics, Measurand, MeterSample, MeterValue};
