//! Delivery of approved signals to the external executor.
//!
//! Every attempt is staged to a local file first, then handed to a
//! [`Transport`] with a bounded number of retries.

pub mod config;
pub mod delivery;
pub mod transport;

pub use config::DeliveryConfig;
pub use delivery::{DeliveryAck, DeliveryClient, StagedDelivery};
pub use transport::{HttpTransport, Transport, TransportAck, TransportError};
