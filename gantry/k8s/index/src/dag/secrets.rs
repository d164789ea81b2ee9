//! Secret reference resolution, including the cross-namespace delegation
//! rule: a reference into another namespace is honored only when a
//! TLSCertificateDelegation in the secret's namespace names the consumer's
//! namespace (or `"*"`).

use crate::cache::KubernetesCache;
use gantry_core::{NamespacedName, Secret, CA_CERTIFICATE_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use gantry_k8s_api::{self as k8s, SECRET_TYPE_TLS};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum SecretError {
    #[error("Secret not found")]
    NotFound,

    #[error("Secret is not of type kubernetes.io/tls or lacks a certificate and key")]
    NotTls,

    #[error("Secret does not carry a CA bundle under {CA_CERTIFICATE_KEY:?}")]
    NoCaBundle,

    #[error("certificate delegation not permitted")]
    NotDelegated,
}

/// Resolves a serving-certificate reference for a consumer namespace.
pub(crate) fn tls_secret(
    source: &KubernetesCache,
    name: &NamespacedName,
    consumer_namespace: &str,
) -> Result<Secret, SecretError> {
    let secret = source.secrets.get(name).ok_or(SecretError::NotFound)?;
    if !is_tls(secret) {
        return Err(SecretError::NotTls);
    }
    check_delegation(source, name, consumer_namespace)?;
    Ok(to_dag_secret(name.clone(), secret))
}

/// Resolves a CA-bundle reference for client-certificate validation.
pub(crate) fn ca_secret(
    source: &KubernetesCache,
    name: &NamespacedName,
    consumer_namespace: &str,
) -> Result<Secret, SecretError> {
    let secret = source.secrets.get(name).ok_or(SecretError::NotFound)?;
    let has_ca = secret
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(CA_CERTIFICATE_KEY));
    if !has_ca {
        return Err(SecretError::NoCaBundle);
    }
    check_delegation(source, name, consumer_namespace)?;
    Ok(to_dag_secret(name.clone(), secret))
}

fn check_delegation(
    source: &KubernetesCache,
    secret: &NamespacedName,
    consumer_namespace: &str,
) -> Result<(), SecretError> {
    if secret.namespace == consumer_namespace {
        return Ok(());
    }
    let permitted = source.delegations.iter().any(|(name, delegation)| {
        name.namespace == secret.namespace
            && delegation.spec.delegations.iter().any(|d| {
                d.secret_name == secret.name
                    && d.target_namespaces
                        .iter()
                        .any(|ns| ns == "*" || ns == consumer_namespace)
            })
    });
    if permitted {
        Ok(())
    } else {
        Err(SecretError::NotDelegated)
    }
}

fn is_tls(secret: &k8s::Secret) -> bool {
    secret.type_.as_deref() == Some(SECRET_TYPE_TLS)
        && secret.data.as_ref().is_some_and(|d| {
            d.contains_key(TLS_CERT_KEY) && d.contains_key(TLS_PRIVATE_KEY_KEY)
        })
}

fn to_dag_secret(name: NamespacedName, secret: &k8s::Secret) -> Secret {
    let data = secret
        .data
        .as_ref()
        .map(|d| {
            d.iter()
                .map(|(k, v)| (k.clone(), v.0.clone()))
                .collect()
        })
        .unwrap_or_default();
    Secret::new(name, data)
}
