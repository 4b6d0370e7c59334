//! Security-analytics core: multi-modal pattern recognition, behavioral
//! baselining, real-time monitoring/alerting, and threat-intelligence NLP.
//!
//! This crate is a library; the transport (HTTP, RPC, embedding) that
//! drives it is an external concern (§6).

pub mod alerts;
pub mod baseline;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod model_runtime;
pub mod monitoring;
pub mod nlp;
pub mod notify;
pub mod pattern;
pub mod sources;

pub use error::{CoreError, CoreResult};
pub use event::{Event, EventCategory, EventPayload};
