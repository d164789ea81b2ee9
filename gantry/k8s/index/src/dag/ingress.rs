//! Compiles Ingress objects: host/path routing with annotation-driven retry
//! and TLS policies.

use super::{policy, resolve_service, secrets, BuildState, PortSelector};
use crate::cache::KubernetesCache;
use ahash::AHashMap;
use gantry_core::{
    NamespacedName, ObjectKind, PathMatch, Route, Secret, SecureVirtualHost, Status, TlsVersion,
    VirtualHost, WeightedCluster,
};
use gantry_k8s_api as k8s;

/// Characters that mark an ImplementationSpecific path as a regular
/// expression rather than a literal prefix.
const REGEX_CHARS: &[char] = &['^', '+', '*', '[', ']', '%'];

pub(super) struct IngressProcessor;

impl IngressProcessor {
    pub(super) fn run(&self, source: &KubernetesCache, state: &mut BuildState) {
        for (name, ingress) in &source.ingresses {
            index_ingress(source, state, name, ingress);
        }
    }
}

/// All FQDNs an Ingress lays claim to; a rule without a host claims the
/// wildcard virtual host.
pub(super) fn ingress_hosts(ingress: &k8s::Ingress) -> Vec<String> {
    let Some(spec) = &ingress.spec else {
        return Vec::new();
    };
    spec.rules
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|rule| match rule.host.as_deref() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => "*".to_string(),
        })
        .collect()
}

fn index_ingress(
    source: &KubernetesCache,
    state: &mut BuildState,
    name: &NamespacedName,
    ingress: &k8s::Ingress,
) {
    let Some(spec) = &ingress.spec else {
        return;
    };

    let retry = policy::ingress_retry_policy(ingress);
    let min_tls_version = policy::annotation(&ingress.metadata, "tls-minimum-protocol-version")
        .map(TlsVersion::parse)
        .unwrap_or_default();

    // Resolve TLS entries up front; a broken secret invalidates the entry but
    // the affected hosts continue to serve plaintext.
    let mut tls_by_host: AHashMap<&str, Secret> = AHashMap::new();
    for tls in spec.tls.as_deref().unwrap_or_default() {
        let Some(secret_name) = tls.secret_name.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        let secret_key = NamespacedName::new(&name.namespace, secret_name);
        match secrets::tls_secret(source, &secret_key, &name.namespace) {
            Ok(secret) => {
                for host in tls.hosts.as_deref().unwrap_or_default() {
                    tls_by_host.insert(host.as_str(), secret.clone());
                }
            }
            Err(error) => state.set_status(Status::invalid(
                ObjectKind::Ingress,
                name.clone(),
                format!("Spec.TLS Secret {secret_name:?} is invalid: {error}"),
            )),
        }
    }

    for rule in spec.rules.as_deref().unwrap_or_default() {
        let fqdn = match rule.host.as_deref() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => "*".to_string(),
        };
        if !state.owns(&fqdn, ObjectKind::Ingress, name) {
            state.set_status(Status::invalid(
                ObjectKind::Ingress,
                name.clone(),
                format!("fqdn {fqdn:?} is used by another object"),
            ));
            continue;
        }

        let Some(http) = &rule.http else {
            continue;
        };

        let mut routes = Vec::new();
        let mut resolved = true;
        for path in &http.paths {
            let Some(backend) = &path.backend.service else {
                continue;
            };
            let selector = match backend_port(backend) {
                Some(selector) => selector,
                None => {
                    state.set_status(Status::invalid(
                        ObjectKind::Ingress,
                        name.clone(),
                        format!("backend for service {:?} has no port", backend.name),
                    ));
                    resolved = false;
                    break;
                }
            };
            match resolve_service(source, &name.namespace, &backend.name, selector) {
                Some((service, port)) => {
                    let cluster = state.register_cluster(service, port, None);
                    routes.push(Route {
                        path: path_match(path),
                        clusters: vec![WeightedCluster {
                            name: cluster,
                            weight: 1,
                        }],
                        retry_policy: retry.clone(),
                        ..Default::default()
                    });
                }
                None => {
                    state.set_status(Status::invalid(
                        ObjectKind::Ingress,
                        name.clone(),
                        format!(
                            "unresolved service reference {}/{}",
                            name.namespace, backend.name
                        ),
                    ));
                    resolved = false;
                    break;
                }
            }
        }

        // One unresolved backend rejects the whole virtual host.
        if !resolved || routes.is_empty() {
            continue;
        }

        let vhost = VirtualHost {
            name: fqdn.clone(),
            routes,
            cors_policy: None,
        };
        match tls_by_host.get(fqdn.as_str()) {
            Some(secret) => {
                state.register_secret(secret.clone());
                state.add_secure_virtual_host(SecureVirtualHost {
                    virtual_host: vhost,
                    secret: secret.clone(),
                    min_tls_version,
                    peer_validation: None,
                    fallback_certificate: false,
                });
            }
            None => state.add_virtual_host(vhost),
        }
    }

    state.set_status(Status::valid(
        ObjectKind::Ingress,
        name.clone(),
        "valid Ingress",
    ));
}

fn backend_port(backend: &k8s::IngressServiceBackend) -> Option<PortSelector<'_>> {
    let port = backend.port.as_ref()?;
    if let Some(name) = port.name.as_deref().filter(|n| !n.is_empty()) {
        return Some(PortSelector::Name(name));
    }
    port.number.map(PortSelector::Number)
}

fn path_match(path: &k8s::HTTPIngressPath) -> PathMatch {
    let raw = path
        .path
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    match path.path_type.as_str() {
        "Exact" => PathMatch::Exact(raw),
        "Prefix" => PathMatch::Prefix(raw),
        _ if raw.contains(REGEX_CHARS) => PathMatch::Regex(raw),
        _ => PathMatch::Prefix(raw),
    }
}
