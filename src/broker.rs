//! The broker: a single-sequence actor owning the loader registry, the
//! running-instance table, the argument table, and the content-handler cache.

pub(crate) mod actor;
pub mod handle;
pub(crate) mod protocol;

pub use handle::{Broker, BrokerBuilder};
