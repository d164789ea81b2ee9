use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A richer routing object than Ingress: a virtual host with TLS and CORS
/// settings, a list of routes with per-route policies, and inclusion of
/// routes from other HTTPProxies.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    status = "HTTPProxyStatus",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxySpec {
    /// Only root HTTPProxies declare a virtual host; included proxies
    /// contribute routes to the root that includes them.
    #[serde(default, rename = "virtualhost", skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<VirtualHost>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    pub fqdn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TLS>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CORSPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TLS {
    /// `name` or `namespace/name`; cross-namespace references require a
    /// TLSCertificateDelegation from the secret's namespace.
    pub secret_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub minimum_protocol_version: String,

    #[serde(default)]
    pub enable_fallback_certificate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_validation: Option<DownstreamValidation>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamValidation {
    /// Secret holding the CA bundle used to validate client certificates.
    pub ca_secret: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CORSPolicy {
    #[serde(default)]
    pub allow_credentials: bool,

    pub allow_origin: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,

    /// Go-syntax duration; `0s` disables preflight caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<TimeoutPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_policy: Option<LoadBalancerPolicy>,
}

/// At most one `prefix` per condition block; header conditions accumulate.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderMatchCondition>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatchCondition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(default, rename = "notcontains", skip_serializing_if = "Option::is_none")]
    pub not_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, rename = "notexact", skip_serializing_if = "Option::is_none")]
    pub not_exact: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,

    pub port: i32,

    #[serde(default)]
    pub weight: u32,
}

/// Timeout strings use Go duration syntax; `infinite` disables a timeout.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idle: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Zero is treated as unset and promoted to one retry.
    #[serde(default)]
    pub count: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub per_try_timeout: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retriable_status_codes: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerPolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    pub name: String,

    /// Defaults to the including proxy's namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxyStatus {
    #[serde(default)]
    pub current_status: String,

    #[serde(default)]
    pub description: String,
}
