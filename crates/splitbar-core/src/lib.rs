//! Core types and logic for the Splitbar experiment engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! bucketing, event validation, statistics and winner selection, and talks to
//! persistence only through the [`store::ExperimentStore`] trait.

// Store impls use native `async fn`; the trait spells out the `Send` bounds.
#![allow(async_fn_in_trait)]

pub mod assignment;
pub mod bucket;
pub mod error;
pub mod event;
pub mod experiment;
pub mod flag;
pub mod identity;
pub mod service;
pub mod stats;
pub mod store;
pub mod winner;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use service::ExperimentService;
