//! The proxy-facing side of gantry: translator caches that project the
//! routing DAG into data-plane resources, per-family version notifiers, and
//! the streaming discovery server.
//!
//! Each resource family implements the same capability bundle — contents,
//! query, and waker registration keyed to a version counter — and the server
//! dispatches on the request's type URL. Translators are written wholesale on
//! every DAG rebuild and bump their version only when output actually
//! changed, so connected proxies are only woken for real differences.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod api;
pub mod cluster;
pub mod endpoints;
pub mod listener;
pub mod notifier;
pub mod route;
pub mod secret;
pub mod server;

pub use self::cluster::ClusterCache;
pub use self::endpoints::EndpointsTranslator;
pub use self::listener::ListenerCache;
pub use self::notifier::Notifier;
pub use self::route::RouteCache;
pub use self::secret::SecretCache;
pub use self::server::{DiscoveryHandler, GrpcServer};

use tokio::sync::mpsc::Sender;

/// The capability bundle one resource family exposes to the discovery
/// server.
pub trait Resource: Send + Sync {
    /// The type URL this family answers to.
    fn type_url(&self) -> &'static str;

    /// Every resource in the family, in deterministic order.
    fn contents(&self) -> Vec<prost_types::Any>;

    /// The named resources, synthesizing a zero-valued placeholder for any
    /// name not present so the protocol can proceed on partial knowledge.
    fn query(&self, names: &[String]) -> Vec<prost_types::Any>;

    /// Enrolls a single-slot waker. If the family's version already exceeds
    /// `last`, the waker fires immediately; otherwise it fires on the next
    /// bump and is dropped (edge-triggered).
    fn register(&self, waker: Sender<u64>, last: u64, hints: &[String]);
}
