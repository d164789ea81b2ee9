//! Projects the DAG into listeners: one plaintext, one TLS-terminating with
//! SNI-indexed filter chains, and a static administrative listener that is
//! always present.

use crate::notifier::Notifier;
use crate::{api, route, Resource};
use gantry_core::{Dag, DagObserver, SecureVirtualHost, TlsVersion};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc::Sender;

pub const HTTP_LISTENER: &str = "ingress_http";
pub const HTTPS_LISTENER: &str = "ingress_https";
pub const STATS_LISTENER: &str = "stats-health";

pub const HTTP_PORT: u32 = 8080;
pub const HTTPS_PORT: u32 = 8443;
pub const STATS_PORT: u32 = 8002;

/// Listener filter that sniffs SNI so the TLS listener can pick a chain.
pub const TLS_INSPECTOR: &str = "tls-inspector";

const ALPN_PROTOCOLS: [&str; 2] = ["h2", "http/1.1"];

#[derive(Default)]
pub struct ListenerCache {
    listeners: Mutex<BTreeMap<String, api::Listener>>,
    notifier: Notifier,
}

impl ListenerCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DagObserver for ListenerCache {
    fn on_change(&self, dag: &Dag) {
        let next = build_listeners(dag);
        let mut current = self.listeners.lock();
        if *current != next {
            *current = next;
            drop(current);
            self.notifier.next();
        }
    }
}

impl Resource for ListenerCache {
    fn type_url(&self) -> &'static str {
        api::LISTENER_TYPE_URL
    }

    fn contents(&self) -> Vec<prost_types::Any> {
        self.listeners
            .lock()
            .values()
            .map(|l| api::to_any(api::LISTENER_TYPE_URL, l))
            .collect()
    }

    fn query(&self, names: &[String]) -> Vec<prost_types::Any> {
        let listeners = self.listeners.lock();
        let mut names: Vec<&String> = names.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| match listeners.get(name) {
                Some(listener) => api::to_any(api::LISTENER_TYPE_URL, listener),
                None => api::to_any(
                    api::LISTENER_TYPE_URL,
                    &api::Listener {
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

fn build_listeners(dag: &Dag) -> BTreeMap<String, api::Listener> {
    let mut out = BTreeMap::new();
    out.insert(STATS_LISTENER.to_string(), stats_listener());

    // Plaintext routes and the HTTPS redirects for secure hosts both hang
    // off the plaintext listener, so it exists whenever any host does.
    if !dag.virtual_hosts.is_empty() || !dag.secure_virtual_hosts.is_empty() {
        out.insert(
            HTTP_LISTENER.to_string(),
            api::Listener {
                name: HTTP_LISTENER.to_string(),
                address: Some(socket_address(HTTP_PORT)),
                listener_filters: Vec::new(),
                filter_chains: vec![api::FilterChain {
                    server_names: Vec::new(),
                    tls_context: None,
                    http: Some(http_connection_manager(route::HTTP_ROUTECONFIG)),
                }],
            },
        );
    }

    if !dag.secure_virtual_hosts.is_empty() {
        let mut filter_chains: Vec<api::FilterChain> = dag
            .secure_virtual_hosts
            .iter()
            .map(tls_filter_chain)
            .collect();

        if let Some(fallback) = &dag.fallback_certificate {
            // No SNI constraint: this chain catches everything the named
            // chains miss, so it must come last.
            filter_chains.push(api::FilterChain {
                server_names: Vec::new(),
                tls_context: Some(api::DownstreamTlsContext {
                    secret_name: fallback.versioned_name(),
                    min_protocol_version: api::TlsProtocol::V1_2 as i32,
                    validation_context: None,
                    alpn_protocols: alpn(),
                }),
                http: Some(http_connection_manager(route::FALLBACK_ROUTECONFIG)),
            });
        }

        out.insert(
            HTTPS_LISTENER.to_string(),
            api::Listener {
                name: HTTPS_LISTENER.to_string(),
                address: Some(socket_address(HTTPS_PORT)),
                listener_filters: vec![TLS_INSPECTOR.to_string()],
                filter_chains,
            },
        );
    }

    out
}

fn tls_filter_chain(vhost: &SecureVirtualHost) -> api::FilterChain {
    api::FilterChain {
        server_names: vec![vhost.virtual_host.name.clone()],
        tls_context: Some(api::DownstreamTlsContext {
            secret_name: vhost.secret.versioned_name(),
            min_protocol_version: tls_protocol(vhost.min_tls_version) as i32,
            validation_context: vhost.peer_validation.as_ref().map(|pv| {
                api::CertificateValidationContext {
                    trusted_ca: pv.ca.ca_bundle().to_vec(),
                    match_subject_alt_names: pv.subject_name.iter().cloned().collect(),
                }
            }),
            alpn_protocols: alpn(),
        }),
        http: Some(http_connection_manager(route::HTTPS_ROUTECONFIG)),
    }
}

fn tls_protocol(version: TlsVersion) -> api::TlsProtocol {
    match version {
        TlsVersion::V1_2 => api::TlsProtocol::V1_2,
        TlsVersion::V1_3 => api::TlsProtocol::V1_3,
    }
}

fn stats_listener() -> api::Listener {
    api::Listener {
        name: STATS_LISTENER.to_string(),
        address: Some(socket_address(STATS_PORT)),
        listener_filters: Vec::new(),
        filter_chains: vec![api::FilterChain {
            server_names: Vec::new(),
            tls_context: None,
            http: Some(http_connection_manager(STATS_LISTENER)),
        }],
    }
}

fn socket_address(port: u32) -> api::SocketAddress {
    api::SocketAddress {
        address: "0.0.0.0".to_string(),
        port_value: port,
    }
}

fn http_connection_manager(route_config_name: &str) -> api::HttpConnectionManager {
    api::HttpConnectionManager {
        route_config_name: route_config_name.to_string(),
        stat_prefix: route_config_name.to_string(),
    }
}

fn alpn() -> Vec<String> {
    ALPN_PROTOCOLS.iter().map(|p| p.to_string()).collect()
}
