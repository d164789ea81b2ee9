//! Projects the DAG into route configurations, keyed by the listener that
//! serves them. The plaintext configuration always exists (even empty) so a
//! proxy can distinguish "no routes" from "no configuration yet"; the TLS
//! and fallback configurations appear only when they have content.

use crate::notifier::Notifier;
use crate::{api, Resource};
use gantry_core::{
    CorsPolicy, Dag, DagObserver, HeaderMatch, HeaderMatchKind, PathMatch, Route, Timeout,
    VirtualHost,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc::Sender;

pub const HTTP_ROUTECONFIG: &str = "ingress_http";
pub const HTTPS_ROUTECONFIG: &str = "ingress_https";
pub const FALLBACK_ROUTECONFIG: &str = "ingress_fallbackcert";

#[derive(Default)]
pub struct RouteCache {
    configs: Mutex<BTreeMap<String, api::RouteConfiguration>>,
    notifier: Notifier,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DagObserver for RouteCache {
    fn on_change(&self, dag: &Dag) {
        let next = build_route_configs(dag);
        let mut current = self.configs.lock();
        if *current != next {
            *current = next;
            drop(current);
            self.notifier.next();
        }
    }
}

impl Resource for RouteCache {
    fn type_url(&self) -> &'static str {
        api::ROUTE_TYPE_URL
    }

    fn contents(&self) -> Vec<prost_types::Any> {
        self.configs
            .lock()
            .values()
            .map(|c| api::to_any(api::ROUTE_TYPE_URL, c))
            .collect()
    }

    fn query(&self, names: &[String]) -> Vec<prost_types::Any> {
        let configs = self.configs.lock();
        let mut names: Vec<&String> = names.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| match configs.get(name) {
                Some(config) => api::to_any(api::ROUTE_TYPE_URL, config),
                None => api::to_any(
                    api::ROUTE_TYPE_URL,
                    &api::RouteConfiguration {
                        name: name.clone(),
                        ..Default::default()
                    },
                ),
            })
            .collect()
    }

    fn register(&self, waker: Sender<u64>, last: u64, _hints: &[String]) {
        self.notifier.register(waker, last);
    }
}

fn build_route_configs(dag: &Dag) -> BTreeMap<String, api::RouteConfiguration> {
    let mut out = BTreeMap::new();

    // Plaintext: real routes for plain hosts, HTTPS redirects for secure
    // ones. FQDNs are unique across the DAG, so merging then sorting is
    // collision-free.
    let mut http_vhosts: Vec<api::VirtualHost> =
        dag.virtual_hosts.iter().map(virtual_host).collect();
    http_vhosts.extend(
        dag.secure_virtual_hosts
            .iter()
            .map(|svh| redirect_virtual_host(&svh.virtual_host)),
    );
    http_vhosts.sort_by(|a, b| a.name.cmp(&b.name));
    out.insert(
        HTTP_ROUTECONFIG.to_string(),
        api::RouteConfiguration {
            name: HTTP_ROUTECONFIG.to_string(),
            virtual_hosts: http_vhosts,
        },
    );

    if !dag.secure_virtual_hosts.is_empty() {
        out.insert(
            HTTPS_ROUTECONFIG.to_string(),
            api::RouteConfiguration {
                name: HTTPS_ROUTECONFIG.to_string(),
                virtual_hosts: dag
                    .secure_virtual_hosts
                    .iter()
                    .map(|svh| virtual_host(&svh.virtual_host))
                    .collect(),
            },
        );
    }

    if dag.fallback_certificate.is_some() {
        let fallback_hosts: Vec<api::VirtualHost> = dag
            .secure_virtual_hosts
            .iter()
            .filter(|svh| svh.fallback_certificate)
            .map(|svh| virtual_host(&svh.virtual_host))
            .collect();
        if !fallback_hosts.is_empty() {
            out.insert(
                FALLBACK_ROUTECONFIG.to_string(),
                api::RouteConfiguration {
                    name: FALLBACK_ROUTECONFIG.to_string(),
                    virtual_hosts: fallback_hosts,
                },
            );
        }
    }

    out
}

fn virtual_host(vhost: &VirtualHost) -> api::VirtualHost {
    api::VirtualHost {
        name: vhost.name.clone(),
        domains: vec![vhost.name.clone()],
        routes: vhost.routes.iter().map(route).collect(),
        cors: vhost.cors_policy.as_ref().map(cors_policy),
    }
}

/// The plaintext shadow of a secure host: same matches, but every action is
/// an upgrade to HTTPS.
fn redirect_virtual_host(vhost: &VirtualHost) -> api::VirtualHost {
    api::VirtualHost {
        name: vhost.name.clone(),
        domains: vec![vhost.name.clone()],
        routes: vhost
            .routes
            .iter()
            .map(|r| api::Route {
                r#match: Some(route_match(r)),
                action: Some(api::route::Action::Redirect(api::RedirectAction {
                    https_redirect: true,
                })),
            })
            .collect(),
        cors: None,
    }
}

fn route(route: &Route) -> api::Route {
    api::Route {
        r#match: Some(route_match(route)),
        action: Some(api::route::Action::Route(route_action(route))),
    }
}

fn route_match(route: &Route) -> api::RouteMatch {
    let path_specifier = match &route.path {
        PathMatch::Prefix(p) => api::route_match::PathSpecifier::Prefix(p.clone()),
        PathMatch::Exact(p) => api::route_match::PathSpecifier::Path(p.clone()),
        PathMatch::Regex(p) => api::route_match::PathSpecifier::SafeRegex(p.clone()),
    };
    api::RouteMatch {
        path_specifier: Some(path_specifier),
        headers: route.headers.iter().map(header_matcher).collect(),
    }
}

fn header_matcher(header: &HeaderMatch) -> api::HeaderMatcher {
    let r#match = match &header.kind {
        HeaderMatchKind::Present => api::header_matcher::Match::Present(true),
        HeaderMatchKind::Exact(v) => api::header_matcher::Match::Exact(v.clone()),
        HeaderMatchKind::Contains(v) => api::header_matcher::Match::Contains(v.clone()),
    };
    api::HeaderMatcher {
        name: header.name.clone(),
        r#match: Some(r#match),
        invert_match: header.invert,
    }
}

fn route_action(route: &Route) -> api::RouteAction {
    let cluster_specifier = if route.clusters.len() == 1 {
        api::route_action::ClusterSpecifier::Cluster(route.clusters[0].name.clone())
    } else {
        // All-zero weights mean an even split; otherwise weights pass
        // through, zeroes included.
        let all_zero = route.clusters.iter().all(|c| c.weight == 0);
        let clusters: Vec<api::ClusterWeight> = route
            .clusters
            .iter()
            .map(|c| api::ClusterWeight {
                name: c.name.clone(),
                weight: if all_zero { 1 } else { c.weight },
            })
            .collect();
        let total_weight = clusters.iter().map(|c| c.weight).sum();
        api::route_action::ClusterSpecifier::WeightedClusters(api::WeightedCluster {
            clusters,
            total_weight,
        })
    };

    api::RouteAction {
        cluster_specifier: Some(cluster_specifier),
        timeout: wire_timeout(route.timeout_policy.response),
        idle_timeout: wire_timeout(route.timeout_policy.idle),
        retry_policy: route.retry_policy.as_ref().map(|rp| api::RetryPolicy {
            retry_on: rp.retry_on.clone(),
            num_retries: rp.num_retries,
            per_try_timeout: wire_timeout(rp.per_try_timeout),
            retriable_status_codes: rp.retriable_status_codes.clone(),
        }),
    }
}

fn wire_timeout(timeout: Timeout) -> Option<prost_types::Duration> {
    timeout.wire_duration().map(api::proto_duration)
}

fn cors_policy(cors: &CorsPolicy) -> api::CorsPolicy {
    api::CorsPolicy {
        allow_origin: cors.allow_origin.clone(),
        allow_methods: cors.allow_methods.join(","),
        allow_headers: cors.allow_headers.join(","),
        expose_headers: cors.expose_headers.join(","),
        max_age: cors.max_age.clone().unwrap_or_default(),
        allow_credentials: cors.allow_credentials,
    }
}
