//! Core data model for the gantry ingress controller.
//!
//! The types in this crate form the routing DAG: the validated, immutable
//! value graph that the builder produces from a snapshot of watched
//! Kubernetes objects and that the resource translators project into
//! discovery responses. The DAG is rebuilt wholesale on every change; nothing
//! in here is mutated after construction.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod timeout;

pub use self::timeout::Timeout;

use sha2::{Digest as _, Sha256};
use std::{collections::BTreeMap, fmt};

/// Key under the conventional TLS secret entry holding the certificate chain.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Key under the conventional TLS secret entry holding the private key.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Key under which an Opaque secret may carry a CA bundle.
pub const CA_CERTIFICATE_KEY: &str = "ca.crt";

/// A namespace-qualified object name, ordered so that iteration over keyed
/// collections is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses a secret reference of the form `name` or `namespace/name`,
    /// defaulting the namespace of unqualified references.
    pub fn parse_ref(default_namespace: &str, s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new(default_namespace, s),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for NamespacedName {
    type Err = InvalidNameRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(InvalidNameRef(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected a namespace/name reference, got {0:?}")]
pub struct InvalidNameRef(String);

/// Minimum TLS protocol version accepted by a secure virtual host.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TlsVersion {
    #[default]
    V1_2,
    V1_3,
}

impl TlsVersion {
    /// Recognizes the wire form used by annotations and HTTPProxy fields.
    /// Anything unrecognized falls back to the default.
    pub fn parse(s: &str) -> Self {
        match s {
            "1.3" => Self::V1_3,
            _ => Self::V1_2,
        }
    }
}

/// A secret payload captured into the DAG. Rotations are detected through
/// [`Secret::versioned_name`], which folds a digest of the payload into the
/// name handed to the data plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: NamespacedName,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(name: NamespacedName, data: BTreeMap<String, Vec<u8>>) -> Self {
        Self { name, data }
    }

    pub fn cert(&self) -> &[u8] {
        self.data.get(TLS_CERT_KEY).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn private_key(&self) -> &[u8] {
        self.data
            .get(TLS_PRIVATE_KEY_KEY)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn ca_bundle(&self) -> &[u8] {
        self.data
            .get(CA_CERTIFICATE_KEY)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A stable ten-hex-character digest of the payload. Entries are folded
    /// in key order so the digest does not depend on map insertion order.
    pub fn digest(&self) -> String {
        let mut hash = Sha256::new();
        for (k, v) in &self.data {
            hash.update(k.as_bytes());
            hash.update([0]);
            hash.update((v.len() as u64).to_be_bytes());
            hash.update(v);
        }
        let digest = hash.finalize();
        digest[..5].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// `namespace/name/<digest>`: the name under which the data plane sees
    /// this secret. A payload rotation produces a new name.
    pub fn versioned_name(&self) -> String {
        format!("{}/{}", self.name, self.digest())
    }
}

/// Client-certificate validation requirements for a secure virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerValidationContext {
    pub ca: Secret,
    pub subject_name: Option<String>,
}

/// The port of a backend Service selected by a route, carrying just enough
/// to correlate with EndpointSlice ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePort {
    /// Empty when the Service has exactly one unnamed port.
    pub name: String,
    pub number: u16,
}

/// One backend Service participating in a cluster, with its traffic weight.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightedService {
    pub weight: u32,
    pub service: NamespacedName,
    pub port: ServicePort,
}

/// Load-balancing strategies the data plane understands. Unrecognized
/// strategies collapse to the default (`None` upstream).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadBalancerPolicy {
    WeightedLeastRequest,
    Random,
    Cookie,
    RoundRobin,
}

impl LoadBalancerPolicy {
    pub fn parse(strategy: &str) -> Option<Self> {
        match strategy {
            "WeightedLeastRequest" => Some(Self::WeightedLeastRequest),
            "Random" => Some(Self::Random),
            "Cookie" => Some(Self::Cookie),
            "RoundRobin" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// A named pool of backend endpoints. The name is the correlation key shared
/// by the cluster translator and the endpoints translator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceCluster {
    pub name: String,
    pub services: Vec<WeightedService>,
    pub lb_policy: Option<LoadBalancerPolicy>,
}

/// Computes the stable cluster name: `namespace/service` when the Service has
/// exactly one unnamed port, `namespace/service/port-name` otherwise.
pub fn cluster_name(service: &NamespacedName, port: &ServicePort) -> String {
    if port.name.is_empty() {
        service.to_string()
    } else {
        format!("{service}/{}", port.name)
    }
}

/// Path portion of a route match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathMatch {
    Prefix(String),
    Exact(String),
    Regex(String),
}

impl Default for PathMatch {
    fn default() -> Self {
        Self::Prefix("/".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderMatchKind {
    Present,
    Exact(String),
    Contains(String),
}

/// A single header predicate on a route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: String,
    pub kind: HeaderMatchKind,
    pub invert: bool,
}

/// A reference from a route to a cluster, weighted for traffic splitting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightedCluster {
    pub name: String,
    pub weight: u32,
}

/// Retry behavior attached to a route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: Timeout,
    pub retriable_status_codes: Vec<u32>,
}

/// Timeout behavior attached to a route.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub response: Timeout,
    pub idle: Timeout,
}

/// Cross-origin policy attached to a virtual host. `max_age` holds the
/// pre-rendered seconds value (`"0"` disables preflight caching; `None`
/// leaves the header unset).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_origin: Vec<String>,
    pub allow_credentials: bool,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age: Option<String>,
}

/// One routing rule inside a virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub path: PathMatch,
    pub headers: Vec<HeaderMatch>,
    pub clusters: Vec<WeightedCluster>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            path: PathMatch::default(),
            headers: Vec::new(),
            clusters: Vec::new(),
            retry_policy: None,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

/// A plaintext virtual host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualHost {
    /// The FQDN this host serves. Unique across the DAG.
    pub name: String,
    pub routes: Vec<Route>,
    pub cors_policy: Option<CorsPolicy>,
}

/// A TLS-terminating virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecureVirtualHost {
    pub virtual_host: VirtualHost,
    pub secret: Secret,
    pub min_tls_version: TlsVersion,
    pub peer_validation: Option<PeerValidationContext>,
    /// Marks this host as opting into the process-wide fallback certificate.
    pub fallback_certificate: bool,
}

/// Validity verdict recorded for one input object during a build.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Ingress,
    HttpProxy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Valid,
    Invalid,
    Orphaned,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Orphaned => "orphaned",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub kind: ObjectKind,
    pub name: NamespacedName,
    pub condition: Condition,
    pub description: String,
}

impl Status {
    pub fn valid(kind: ObjectKind, name: NamespacedName, description: impl Into<String>) -> Self {
        Self {
            kind,
            name,
            condition: Condition::Valid,
            description: description.into(),
        }
    }

    pub fn invalid(kind: ObjectKind, name: NamespacedName, description: impl Into<String>) -> Self {
        Self {
            kind,
            name,
            condition: Condition::Invalid,
            description: description.into(),
        }
    }

    pub fn orphaned(kind: ObjectKind, name: NamespacedName) -> Self {
        Self {
            kind,
            name,
            condition: Condition::Orphaned,
            description: "this HTTPProxy is not part of a delegation chain from a root HTTPProxy"
                .to_string(),
        }
    }
}

/// The routing graph produced by one build. All lists are sorted so that the
/// same snapshot always yields an identical value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dag {
    pub virtual_hosts: Vec<VirtualHost>,
    pub secure_virtual_hosts: Vec<SecureVirtualHost>,
    pub clusters: Vec<ServiceCluster>,
    pub secrets: Vec<Secret>,
    pub fallback_certificate: Option<Secret>,
    pub statuses: Vec<Status>,
}

/// Implemented by everything that consumes rebuilt DAGs: the resource
/// translator caches and the status index. The dispatcher fans each build out
/// to every registered observer, in registration order.
pub trait DagObserver: Send + Sync {
    fn on_change(&self, dag: &Dag);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(entries: &[(&str, &[u8])]) -> Secret {
        Secret::new(
            NamespacedName::new("default", "tls"),
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        )
    }

    #[test]
    fn secret_digest_is_stable_and_rotation_sensitive() {
        let a = secret(&[(TLS_CERT_KEY, b"cert"), (TLS_PRIVATE_KEY_KEY, b"key")]);
        let b = secret(&[(TLS_PRIVATE_KEY_KEY, b"key"), (TLS_CERT_KEY, b"cert")]);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 10);

        let rotated = secret(&[(TLS_CERT_KEY, b"cert2"), (TLS_PRIVATE_KEY_KEY, b"key")]);
        assert_ne!(a.digest(), rotated.digest());

        assert_eq!(a.versioned_name(), format!("default/tls/{}", a.digest()));
    }

    #[test]
    fn cluster_names() {
        let svc = NamespacedName::new("default", "kuard");
        assert_eq!(
            cluster_name(
                &svc,
                &ServicePort {
                    name: String::new(),
                    number: 8080
                }
            ),
            "default/kuard"
        );
        assert_eq!(
            cluster_name(
                &svc,
                &ServicePort {
                    name: "http".to_string(),
                    number: 8080
                }
            ),
            "default/kuard/http"
        );
    }

    #[test]
    fn secret_refs_default_the_namespace() {
        assert_eq!(
            NamespacedName::parse_ref("default", "tls"),
            NamespacedName::new("default", "tls")
        );
        assert_eq!(
            NamespacedName::parse_ref("default", "admin/tls"),
            NamespacedName::new("admin", "tls")
        );
    }

    #[test]
    fn unrecognized_lb_strategies_collapse_to_default() {
        assert_eq!(
            LoadBalancerPolicy::parse("Random"),
            Some(LoadBalancerPolicy::Random)
        );
        assert_eq!(LoadBalancerPolicy::parse("please"), None);
        assert_eq!(LoadBalancerPolicy::parse(""), None);
    }
}
