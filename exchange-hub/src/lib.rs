//! Exchange Hub
//!
//! Durable key/value rendezvous point between pipeline stages. A producer
//! stage publishes its output under a key; consumer stages block until the
//! key appears. Every publish rewrites a full snapshot on disk so results
//! survive a restart.

mod config;
mod store;

pub use config::ExchangeConfig;
pub use store::{ExchangeEntry, ExchangeStore};
