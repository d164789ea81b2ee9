//! Compiles HTTPProxy objects: root virtual hosts with TLS, CORS, and
//! per-route policies, plus the include graph that lets a root pull routes
//! from proxies in other namespaces.

use super::{policy, resolve_service, secrets, BuildState, PortSelector};
use crate::cache::KubernetesCache;
use ahash::AHashSet;
use gantry_core::{
    HeaderMatch, HeaderMatchKind, NamespacedName, ObjectKind, PathMatch, PeerValidationContext,
    Route, SecureVirtualHost, Status, TlsVersion, VirtualHost, WeightedCluster,
};
use gantry_k8s_api as k8s;

pub(super) struct HttpProxyProcessor<'a> {
    pub(super) fallback_certificate: Option<&'a NamespacedName>,
}

impl HttpProxyProcessor<'_> {
    pub(super) fn run(&self, source: &KubernetesCache, state: &mut BuildState) {
        let mut included = AHashSet::new();
        for (name, proxy) in &source.proxies {
            if proxy.spec.virtual_host.is_some() {
                self.index_root(source, state, name, proxy, &mut included);
            }
        }

        // A proxy without a virtual host that no root reached is orphaned.
        for (name, proxy) in &source.proxies {
            if proxy.spec.virtual_host.is_none() && !included.contains(name) {
                state.set_status(Status::orphaned(ObjectKind::HttpProxy, name.clone()));
            }
        }
    }

    fn index_root(
        &self,
        source: &KubernetesCache,
        state: &mut BuildState,
        name: &NamespacedName,
        proxy: &k8s::HTTPProxy,
        included: &mut AHashSet<NamespacedName>,
    ) {
        let vhost = proxy
            .spec
            .virtual_host
            .as_ref()
            .expect("index_root requires a virtual host");

        if vhost.fqdn.is_empty() {
            state.set_status(Status::invalid(
                ObjectKind::HttpProxy,
                name.clone(),
                "Spec.VirtualHost.Fqdn must be specified",
            ));
            return;
        }
        if !state.owns(&vhost.fqdn, ObjectKind::HttpProxy, name) {
            state.set_status(Status::invalid(
                ObjectKind::HttpProxy,
                name.clone(),
                format!("fqdn {:?} is used by another object", vhost.fqdn),
            ));
            return;
        }

        let cors_policy = match policy::cors_policy(vhost.cors_policy.as_ref()) {
            Ok(cors) => cors,
            Err(error) => {
                state.set_status(Status::invalid(
                    ObjectKind::HttpProxy,
                    name.clone(),
                    error.to_string(),
                ));
                return;
            }
        };

        let mut tls_context = None;
        let mut fallback_secret = None;
        if let Some(tls) = &vhost.tls {
            if tls.secret_name.is_empty() {
                state.set_status(Status::invalid(
                    ObjectKind::HttpProxy,
                    name.clone(),
                    "Spec.VirtualHost.TLS secretName must be specified",
                ));
                return;
            }
            let secret_name = NamespacedName::parse_ref(&name.namespace, &tls.secret_name);
            let secret = match secrets::tls_secret(source, &secret_name, &name.namespace) {
                Ok(secret) => secret,
                Err(error) => {
                    state.set_status(Status::invalid(
                        ObjectKind::HttpProxy,
                        name.clone(),
                        format!(
                            "Spec.VirtualHost.TLS Secret {:?} is invalid: {error}",
                            tls.secret_name
                        ),
                    ));
                    return;
                }
            };

            let min_tls_version = if tls.minimum_protocol_version.is_empty() {
                TlsVersion::default()
            } else {
                TlsVersion::parse(&tls.minimum_protocol_version)
            };

            let peer_validation = match &tls.client_validation {
                Some(validation) => {
                    let ca_name = NamespacedName::parse_ref(&name.namespace, &validation.ca_secret);
                    match secrets::ca_secret(source, &ca_name, &name.namespace) {
                        Ok(ca) => Some(PeerValidationContext {
                            ca,
                            subject_name: validation.subject_name.clone(),
                        }),
                        Err(error) => {
                            state.set_status(Status::invalid(
                                ObjectKind::HttpProxy,
                                name.clone(),
                                format!(
                                    "Spec.VirtualHost.TLS client validation is invalid: {error}"
                                ),
                            ));
                            return;
                        }
                    }
                }
                None => None,
            };

            if tls.enable_fallback_certificate {
                // Client validation dispatches on the client certificate
                // before SNI fallback could apply; the two cannot coexist.
                if peer_validation.is_some() {
                    state.set_status(Status::invalid(
                        ObjectKind::HttpProxy,
                        name.clone(),
                        "Spec.VirtualHost.TLS fallback certificate and client validation are incompatible",
                    ));
                    return;
                }
                let Some(fallback_name) = self.fallback_certificate else {
                    state.set_status(Status::invalid(
                        ObjectKind::HttpProxy,
                        name.clone(),
                        "Spec.VirtualHost.TLS enableFallbackCertificate is set but no fallback certificate is configured",
                    ));
                    return;
                };
                match secrets::tls_secret(source, fallback_name, &name.namespace) {
                    Ok(fallback) => fallback_secret = Some(fallback),
                    Err(error) => {
                        state.set_status(Status::invalid(
                            ObjectKind::HttpProxy,
                            name.clone(),
                            format!(
                                "Spec.VirtualHost.TLS fallback certificate Secret {fallback_name} is invalid: {error}"
                            ),
                        ));
                        return;
                    }
                }
            }

            tls_context = Some((
                secret,
                min_tls_version,
                peer_validation,
                tls.enable_fallback_certificate,
            ));
        }

        let mut visiting = Vec::new();
        let routes = match collect_routes(
            source,
            state,
            name,
            proxy,
            "",
            &[],
            &mut visiting,
            included,
        ) {
            Ok(routes) => routes,
            Err(message) => {
                state.set_status(Status::invalid(ObjectKind::HttpProxy, name.clone(), message));
                return;
            }
        };
        if routes.is_empty() {
            state.set_status(Status::invalid(
                ObjectKind::HttpProxy,
                name.clone(),
                "Spec.Routes must define at least one route or include",
            ));
            return;
        }

        let virtual_host = VirtualHost {
            name: vhost.fqdn.clone(),
            routes,
            cors_policy,
        };
        match tls_context {
            Some((secret, min_tls_version, peer_validation, fallback_certificate)) => {
                state.register_secret(secret.clone());
                if let Some(fallback) = fallback_secret {
                    state.set_fallback_certificate(fallback);
                }
                state.add_secure_virtual_host(SecureVirtualHost {
                    virtual_host,
                    secret,
                    min_tls_version,
                    peer_validation,
                    fallback_certificate,
                });
            }
            None => state.add_virtual_host(virtual_host),
        }
        state.set_status(Status::valid(
            ObjectKind::HttpProxy,
            name.clone(),
            "valid HTTPProxy",
        ));
    }
}

/// Gathers the routes of `proxy` and, recursively, of everything it
/// includes. Any error invalidates the root that initiated the walk.
#[allow(clippy::too_many_arguments)]
fn collect_routes(
    source: &KubernetesCache,
    state: &mut BuildState,
    name: &NamespacedName,
    proxy: &k8s::HTTPProxy,
    prefix: &str,
    headers: &[HeaderMatch],
    visiting: &mut Vec<NamespacedName>,
    included: &mut AHashSet<NamespacedName>,
) -> Result<Vec<Route>, String> {
    if let Some(start) = visiting.iter().position(|n| n == name) {
        let mut chain: Vec<String> = visiting[start..].iter().map(|n| n.to_string()).collect();
        chain.push(name.to_string());
        let message = format!("include creates an inclusion cycle: {}", chain.join(" -> "));
        for participant in &visiting[start..] {
            state.set_status(Status::invalid(
                ObjectKind::HttpProxy,
                participant.clone(),
                message.clone(),
            ));
        }
        return Err(message);
    }

    visiting.push(name.clone());
    let result = routes_of(source, state, name, proxy, prefix, headers, visiting, included);
    visiting.pop();
    result
}

#[allow(clippy::too_many_arguments)]
fn routes_of(
    source: &KubernetesCache,
    state: &mut BuildState,
    name: &NamespacedName,
    proxy: &k8s::HTTPProxy,
    prefix: &str,
    headers: &[HeaderMatch],
    visiting: &mut Vec<NamespacedName>,
    included: &mut AHashSet<NamespacedName>,
) -> Result<Vec<Route>, String> {
    let mut routes = Vec::new();

    for route in &proxy.spec.routes {
        let (path, route_headers) = merge_route_conditions(prefix, headers, &route.conditions)?;

        if route.services.is_empty() {
            return Err("route must reference at least one service".to_string());
        }
        let timeout_policy = policy::timeout_policy(route.timeout_policy.as_ref())
            .map_err(|error| format!("route timeout policy is invalid: {error}"))?;
        let retry_policy = policy::retry_policy(route.retry_policy.as_ref());
        let lb_policy = policy::load_balancer_policy(route.load_balancer_policy.as_ref());

        let mut clusters = Vec::new();
        for service in &route.services {
            match resolve_service(
                source,
                &name.namespace,
                &service.name,
                PortSelector::Number(service.port),
            ) {
                Some((svc, port)) => clusters.push(WeightedCluster {
                    name: state.register_cluster(svc, port, lb_policy),
                    weight: service.weight,
                }),
                None => {
                    return Err(format!(
                        "Spec.Routes unresolved service reference: {}/{}:{}",
                        name.namespace, service.name, service.port
                    ))
                }
            }
        }

        routes.push(Route {
            path,
            headers: route_headers,
            clusters,
            retry_policy,
            timeout_policy,
        });
    }

    for include in &proxy.spec.includes {
        let namespace = if include.namespace.is_empty() {
            &name.namespace
        } else {
            &include.namespace
        };
        let child_name = NamespacedName::new(namespace.clone(), include.name.clone());
        let Some(child) = source.proxies.get(&child_name) else {
            return Err(format!("include of non-existent HTTPProxy {child_name}"));
        };
        if child.spec.virtual_host.is_some() {
            return Err(format!(
                "root HTTPProxy {child_name} cannot be included by another HTTPProxy"
            ));
        }

        let (child_prefix, child_headers) =
            merge_include_conditions(prefix, headers, &include.conditions)?;

        included.insert(child_name.clone());
        let child_routes = collect_routes(
            source,
            state,
            &child_name,
            child,
            &child_prefix,
            &child_headers,
            visiting,
            included,
        )?;
        state.set_status(Status::valid(
            ObjectKind::HttpProxy,
            child_name,
            "valid HTTPProxy",
        ));
        routes.extend(child_routes);
    }

    Ok(routes)
}

/// Extracts at most one prefix from a condition block, validating its shape.
fn single_prefix(conditions: &[k8s::MatchCondition]) -> Result<&str, String> {
    let mut prefixes = conditions.iter().filter_map(|c| c.prefix.as_deref());
    let first = prefixes.next().unwrap_or("");
    if prefixes.next().is_some() {
        return Err("route: more than one prefix is not allowed in a condition block".to_string());
    }
    if !first.is_empty() && !first.starts_with('/') {
        return Err(format!("prefix condition {first:?} must start with /"));
    }
    Ok(first)
}

fn header_matches(conditions: &[k8s::MatchCondition]) -> Vec<HeaderMatch> {
    conditions
        .iter()
        .filter_map(|c| c.header.as_ref())
        .filter_map(|h| {
            let (kind, invert) = if let Some(exact) = &h.exact {
                (HeaderMatchKind::Exact(exact.clone()), false)
            } else if let Some(not_exact) = &h.not_exact {
                (HeaderMatchKind::Exact(not_exact.clone()), true)
            } else if let Some(contains) = &h.contains {
                (HeaderMatchKind::Contains(contains.clone()), false)
            } else if let Some(not_contains) = &h.not_contains {
                (HeaderMatchKind::Contains(not_contains.clone()), true)
            } else if h.present == Some(true) {
                (HeaderMatchKind::Present, false)
            } else {
                return None;
            };
            Some(HeaderMatch {
                name: h.name.clone(),
                kind,
                invert,
            })
        })
        .collect()
}

fn merge_route_conditions(
    prefix: &str,
    headers: &[HeaderMatch],
    conditions: &[k8s::MatchCondition],
) -> Result<(PathMatch, Vec<HeaderMatch>), String> {
    let (prefix, headers) = merge_include_conditions(prefix, headers, conditions)?;
    let path = if prefix.is_empty() {
        PathMatch::default()
    } else {
        PathMatch::Prefix(prefix)
    };
    Ok((path, headers))
}

fn merge_include_conditions(
    prefix: &str,
    headers: &[HeaderMatch],
    conditions: &[k8s::MatchCondition],
) -> Result<(String, Vec<HeaderMatch>), String> {
    let own = single_prefix(conditions)?;
    let mut merged_headers = headers.to_vec();
    merged_headers.extend(header_matches(conditions));
    Ok((join_prefix(prefix, own), merged_headers))
}

/// `/a` + `/b` → `/a/b`; a bare `/` on either side contributes nothing.
fn join_prefix(outer: &str, inner: &str) -> String {
    if inner.is_empty() || inner == "/" {
        return outer.to_string();
    }
    if outer.is_empty() || outer == "/" {
        return inner.to_string();
    }
    format!("{}{inner}", outer.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_concatenate() {
        assert_eq!(join_prefix("", "/api"), "/api");
        assert_eq!(join_prefix("/", "/api"), "/api");
        assert_eq!(join_prefix("/api", "/"), "/api");
        assert_eq!(join_prefix("/api", "/v1"), "/api/v1");
        assert_eq!(join_prefix("/api/", "/v1"), "/api/v1");
    }

    #[test]
    fn at_most_one_prefix_per_block() {
        let conditions = vec![
            k8s::MatchCondition {
                prefix: Some("/a".to_string()),
                ..Default::default()
            },
            k8s::MatchCondition {
                prefix: Some("/b".to_string()),
                ..Default::default()
            },
        ];
        assert!(single_prefix(&conditions).is_err());
    }
}
