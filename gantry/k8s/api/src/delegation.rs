use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Grants objects in other namespaces permission to reference TLS secrets
/// from this object's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "TLSCertificateDelegation",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct TLSCertificateDelegationSpec {
    pub delegations: Vec<CertificateDelegation>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDelegation {
    /// A secret in the delegation's own namespace.
    pub secret_name: String,

    /// Namespaces allowed to reference the secret; `"*"` permits all.
    pub target_namespaces: Vec<String>,
}
