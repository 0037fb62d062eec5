pub mod error;
pub mod channel;
pub mod fetch;

pub mod args;
pub mod broker;
pub mod content_handler;
pub mod delegate;
pub mod loader;
pub mod registrar;
pub mod utils;

mod instance;
mod shell;

pub use crate::broker::{Broker, BrokerBuilder};
pub use crate::channel::{
    application_channel, message_pipe, service_provider, ApplicationEndpoint, ApplicationMessage,
    MessagePipe, ServiceProviderClient, ServiceProviderServer, ServiceRequest, ShellClient,
    ShellEndpoint, ShellMessage,
};
pub use crate::delegate::{BrokerDelegate, DefaultDelegate};
pub use crate::error::{BrokerError, BrokerResult};
pub use crate::fetch::{ContentFetcher, UrlResponse};
pub use crate::loader::ApplicationLoader;
pub use crate::registrar::ExternalApplicationRegistrar;
