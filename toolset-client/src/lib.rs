//! Caller side of toolforest.
//!
//! [`DiscoveryRegistry`] finds which tool processes are published in an
//! environment, [`ProxyFactory`] turns each process's manifest into callable
//! [`ProxyStub`]s, and [`InvocationClient`] carries the calls with deadline
//! and retry handling over a [`Transport`].

#![warn(missing_docs, clippy::pedantic)]

mod discovery;
mod error;
mod http;
mod invocation;
mod proxy;
mod store;
mod transport;

#[cfg(test)]
mod testing;

pub use discovery::{
    DiscoveryConfig, DiscoveryError, DiscoveryRegistry, DiscoveryResult, RefreshTask,
    RegistryStore,
};
pub use error::{ClientError, ClientResult, TransportError, TransportErrorKind};
pub use http::HttpTransport;
pub use invocation::{CallState, InvocationClient, RetryPolicy};
pub use proxy::{Parameter, ProxyCatalog, ProxyFactory, ProxyStub, StubSet};
pub use store::{FileRegistryStore, InMemoryRegistryStore};
pub use transport::{LocalTransport, Transport};
