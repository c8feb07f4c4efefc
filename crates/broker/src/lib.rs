//! Durable publish/subscribe client for the order fulfillment system.
//!
//! This crate provides:
//! - [`Broker`] trait: durable publish, subscribe with one in-flight message
//!   per subscription (prefetch = 1), manual acknowledgement
//! - [`Handler`] trait for message consumers, with [`HandlerError`]
//!   distinguishing transient failures (requeued up to a delivery ceiling)
//!   from fatal ones (dead-lettered immediately)
//! - [`MemoryBroker`] for testing
//! - [`PostgresBroker`] backed by the relational store, claiming messages
//!   with `FOR UPDATE SKIP LOCKED` so multiple instances can consume the
//!   same queue safely

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod memory;
pub mod postgres;

pub use broker::{Broker, BrokerExt, Subscription};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use handler::{Handler, HandlerError};
pub use memory::{DeadLetter, MemoryBroker};
pub use postgres::PostgresBroker;
