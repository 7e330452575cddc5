//! River-flow forecast loading for National Water Model reaches.
//!
//! Fetches reach metadata, return periods and forecast horizons, converts
//! every series into the preferred flow unit at the network boundary, caches
//! static reach metadata, and orchestrates phased loads with graceful
//! degradation.

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod convert;
pub mod error;
pub mod formatters;
pub mod geocode;
pub mod models;
pub mod orchestrator;
pub mod service;
pub mod units;

pub use cache::{FileStore, KeyValueStore, MemoryStore, ReachCache};
pub use client::{ForecastClient, Priority, Supplement};
pub use config::Config;
pub use error::{ForecastError, Result};
pub use geocode::{HttpGeocoder, NoGeocoder, Place, ReverseGeocoder};
pub use models::{
    FlowCategory, ForecastFragment, ForecastPoint, ForecastResponse, ForecastSection,
    ForecastSeries, Horizon, ReachMetadata,
};
pub use orchestrator::{Degradation, ForecastOrchestrator, LoadPhase, LoadState, PhaseResult};
pub use units::{FlowUnit, UnitLabel, UnitPreference};
