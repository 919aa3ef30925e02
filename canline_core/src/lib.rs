#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core fill-line logic (broker- and storage-agnostic).
//!
//! This crate provides the closed-loop control and quality-monitoring
//! pipeline for a can filling line. The message broker sits behind
//! `canline_traits::BusPublisher`; persistence sits behind the contracts in
//! the `store` module.
//!
//! ## Architecture
//!
//! - **Model**: transient snapshots of persisted entities (`model` module)
//! - **Contracts**: data-access traits the store crate implements (`store`)
//! - **Control**: R2R valve-time correction with optional predictor (`control`)
//! - **SPC**: two-sided CUSUM drift detection (`spc`)
//! - **Quality**: SPC persistence and alarm deduplication (`quality`)
//! - **Ingest**: arrival / fill-result state machines (`ingest`)
//! - **Relay**: cross-thread hand-off into the broadcast fan-out (`relay`)

pub mod control;
pub mod conversions;
pub mod error;
pub mod ingest;
pub mod mocks;
pub mod model;
pub mod payload;
pub mod quality;
pub mod relay;
pub mod spc;
pub mod store;

pub use control::{ControlCfg, Predictor, ValveController};
pub use error::{IngestError, Result};
pub use ingest::Ingestor;
pub use model::{
    Alarm, AlarmOutcome, Cycle, DriftDirection, LineState, Recipe, SpcReport, SpcStateKind,
};
pub use relay::{Broadcaster, EventRelay, StatusEvent};
pub use spc::SpcCfg;
