//! services/api/src/lib.rs
//!
//! The MindHit API service: storage and AI adapters, application services, the
//! job bus and its handlers, and the HTTP layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod web;
pub mod worker;
