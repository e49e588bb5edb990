//! Core domain models for Spout.
//!
//! This module contains the envelope data model, configuration handling,
//! and the error taxonomy shared by the ingestion pipeline and the store.

#![warn(missing_docs)]

pub mod config;
pub mod envelope;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ExpositionConfig, NozzleConfig, RollupConfig, RollupKind, StoreConfig};
pub use envelope::{
    CategoryFilter, CounterMessage, Envelope, EnvelopeMessage, GaugeMessage, GaugeValue,
    MetricCategory, TimerMessage,
};
pub use error::{Result, SpoutError};
