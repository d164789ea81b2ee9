//! End-to-end pipeline tests: Kubernetes object events in, translator
//! contents out, exercising the cache, the DAG builder, and the resource
//! caches together the way the running binary wires them.

use gantry::k8s;
use gantry::xds::server::DiscoveryStream;
use gantry::xds::{
    api, ClusterCache, DiscoveryHandler, EndpointsTranslator, ListenerCache, Resource, RouteCache,
    SecretCache,
};
use gantry::{status, Builder, DagObserver, Dispatcher, KubernetesCache, NamespacedName, SharedCache};
use gantry_core::{Condition, ObjectKind, Secret as DagSecret};
use kubert::index::IndexNamespacedResource;
use prost::Message as _;
use std::sync::Arc;

struct Harness {
    cache: SharedCache,
    dispatcher: Dispatcher,
    listeners: Arc<ListenerCache>,
    routes: Arc<RouteCache>,
    clusters: Arc<ClusterCache>,
    secrets: Arc<SecretCache>,
    endpoints: EndpointsTranslator,
    status: Arc<status::Index>,
    _updates: tokio::sync::mpsc::UnboundedReceiver<status::Update>,
}

fn harness() -> Harness {
    harness_with(Builder::default())
}

fn harness_with(builder: Builder) -> Harness {
    let (trigger, _) = tokio::sync::mpsc::unbounded_channel();
    let cache = KubernetesCache::shared(trigger);

    let listeners = Arc::new(ListenerCache::new());
    let routes = Arc::new(RouteCache::new());
    let clusters = Arc::new(ClusterCache::new());
    let secrets = Arc::new(SecretCache::new());
    let endpoints = EndpointsTranslator::new();
    let (updates_tx, updates_rx) = tokio::sync::mpsc::unbounded_channel();
    let status = Arc::new(status::Index::new(updates_tx));

    let observers: Vec<Arc<dyn DagObserver>> = vec![
        listeners.clone(),
        routes.clone(),
        clusters.clone(),
        secrets.clone(),
        Arc::new(endpoints.clone()),
        status.clone(),
    ];
    let dispatcher = Dispatcher::new(cache.clone(), builder, observers);
    dispatcher.rebuild();

    Harness {
        cache,
        dispatcher,
        listeners,
        routes,
        clusters,
        secrets,
        endpoints,
        status,
        _updates: updates_rx,
    }
}

impl Harness {
    fn on_add<T>(&self, resource: T)
    where
        KubernetesCache: IndexNamespacedResource<T>,
    {
        self.cache.write().apply(resource);
        self.dispatcher.rebuild();
    }

    fn on_update<T>(&self, resource: T)
    where
        KubernetesCache: IndexNamespacedResource<T>,
    {
        self.on_add(resource);
    }

    fn on_delete<T>(&self, namespace: &str, name: &str)
    where
        KubernetesCache: IndexNamespacedResource<T>,
    {
        IndexNamespacedResource::<T>::delete(
            &mut *self.cache.write(),
            namespace.to_string(),
            name.to_string(),
        );
        self.dispatcher.rebuild();
    }

    fn apply_slice(&self, slice: k8s::EndpointSlice) {
        let mut endpoints = self.endpoints.clone();
        endpoints.apply(slice);
    }

    fn listeners(&self) -> Vec<api::Listener> {
        decode(self.listeners.contents())
    }

    fn listener(&self, name: &str) -> Option<api::Listener> {
        self.listeners().into_iter().find(|l| l.name == name)
    }

    fn route_config(&self, name: &str) -> Option<api::RouteConfiguration> {
        decode::<api::RouteConfiguration>(self.routes.contents())
            .into_iter()
            .find(|c| c.name == name)
    }

    fn secret_names(&self) -> Vec<String> {
        decode::<api::Secret>(self.secrets.contents())
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    fn proxy_status(&self, namespace: &str, name: &str) -> Option<(Condition, String)> {
        self.status
            .verdict(ObjectKind::HttpProxy, &NamespacedName::new(namespace, name))
    }
}

fn decode<M: prost::Message + Default>(anys: Vec<prost_types::Any>) -> Vec<M> {
    anys.iter()
        .map(|any| M::decode(any.value.as_slice()).expect("resource must decode"))
        .collect()
}

fn meta(namespace: &str, name: &str) -> k8s::ObjectMeta {
    k8s::ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn service(namespace: &str, name: &str, ports: &[(&str, i32)]) -> k8s::Service {
    k8s::Service {
        metadata: meta(namespace, name),
        spec: Some(k8s::ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, number)| k8s::ServicePort {
                        name: if port_name.is_empty() {
                            None
                        } else {
                            Some(port_name.to_string())
                        },
                        port: *number,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tls_secret(namespace: &str, name: &str) -> k8s::Secret {
    k8s::Secret {
        metadata: meta(namespace, name),
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(
            [
                ("tls.crt".to_string(), k8s::ByteString(b"certificate".to_vec())),
                ("tls.key".to_string(), k8s::ByteString(b"key".to_vec())),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    }
}

fn ca_secret(namespace: &str, name: &str) -> k8s::Secret {
    k8s::Secret {
        metadata: meta(namespace, name),
        data: Some(
            [("ca.crt".to_string(), k8s::ByteString(b"ca".to_vec()))]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

/// The versioned name the secret cache publishes for a fixture secret.
fn versioned_name(secret: &k8s::Secret) -> String {
    let name = NamespacedName::new(
        secret.metadata.namespace.clone().unwrap(),
        secret.metadata.name.clone().unwrap(),
    );
    let data = secret
        .data
        .as_ref()
        .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    DagSecret::new(name, data).versioned_name()
}

fn proxy(namespace: &str, name: &str, spec: k8s::HTTPProxySpec) -> k8s::HTTPProxy {
    let mut proxy = k8s::HTTPProxy::new(name, spec);
    proxy.metadata.namespace = Some(namespace.to_string());
    proxy
}

fn delegation(namespace: &str, name: &str, secret: &str, targets: &[&str]) -> k8s::TLSCertificateDelegation {
    let mut delegation = k8s::TLSCertificateDelegation::new(
        name,
        k8s::TLSCertificateDelegationSpec {
            delegations: vec![k8s::CertificateDelegation {
                secret_name: secret.to_string(),
                target_namespaces: targets.iter().map(|t| t.to_string()).collect(),
            }],
        },
    );
    delegation.metadata.namespace = Some(namespace.to_string());
    delegation
}

fn route_to(service: &str, port: i32) -> k8s::Route {
    k8s::Route {
        services: vec![k8s::RouteService {
            name: service.to_string(),
            port,
            weight: 0,
        }],
        ..Default::default()
    }
}

fn tls_vhost(fqdn: &str, tls: k8s::TLS) -> k8s::VirtualHost {
    k8s::VirtualHost {
        fqdn: fqdn.to_string(),
        tls: Some(tls),
        ..Default::default()
    }
}

#[test]
fn fallback_certificate_lifecycle() {
    let h = harness_with(Builder {
        fallback_certificate: Some(NamespacedName::new("admin", "fallbacksecret")),
    });

    let sec1 = tls_secret("default", "secret");
    let fallback_secret = tls_secret("admin", "fallbacksecret");
    h.on_add(sec1.clone());
    h.on_add(fallback_secret.clone());
    h.on_add(service("default", "backend", &[("http", 80)]));

    // Fallback disabled: one SNI chain, no fallback chain.
    let proxy_plain = proxy(
        "default",
        "simple",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "fallback.example.com",
                k8s::TLS {
                    secret_name: "secret".to_string(),
                    ..Default::default()
                },
            )),
            routes: vec![route_to("backend", 80)],
            ..Default::default()
        },
    );
    h.on_add(proxy_plain.clone());

    let https = h.listener("ingress_https").expect("https listener");
    assert_eq!(https.listener_filters, vec!["tls-inspector".to_string()]);
    assert_eq!(https.filter_chains.len(), 1);
    assert_eq!(
        https.filter_chains[0].server_names,
        vec!["fallback.example.com".to_string()]
    );

    // Fallback enabled without a delegation: the proxy is rejected and the
    // TLS listener disappears entirely.
    let proxy_fallback = proxy(
        "default",
        "simple",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "fallback.example.com",
                k8s::TLS {
                    secret_name: "secret".to_string(),
                    enable_fallback_certificate: true,
                    ..Default::default()
                },
            )),
            routes: vec![route_to("backend", 80)],
            ..Default::default()
        },
    );
    h.on_update(proxy_fallback.clone());
    assert!(h.listener("ingress_https").is_none());
    assert_eq!(
        h.proxy_status("default", "simple").unwrap().0,
        Condition::Invalid
    );

    // A wildcard delegation unlocks the fallback chain, ordered last.
    h.on_add(delegation("admin", "fallbackcertdelegation", "fallbacksecret", &["*"]));
    let https = h.listener("ingress_https").expect("https listener");
    assert_eq!(https.filter_chains.len(), 2);
    assert_eq!(
        https.filter_chains[0].server_names,
        vec!["fallback.example.com".to_string()]
    );
    let fallback_chain = &https.filter_chains[1];
    assert!(fallback_chain.server_names.is_empty());
    assert_eq!(
        fallback_chain.tls_context.as_ref().unwrap().secret_name,
        versioned_name(&fallback_secret)
    );
    assert_eq!(
        fallback_chain.http.as_ref().unwrap().route_config_name,
        "ingress_fallbackcert"
    );
    assert!(h.route_config("ingress_fallbackcert").is_some());

    // Deleting the delegation takes everything back down.
    h.on_delete::<k8s::TLSCertificateDelegation>("admin", "fallbackcertdelegation");
    assert!(h.listener("ingress_https").is_none());

    // A delegation naming the consumer namespace works too.
    h.on_add(delegation(
        "admin",
        "fallbackcertdelegation",
        "fallbacksecret",
        &["default"],
    ));
    assert_eq!(
        h.listener("ingress_https").unwrap().filter_chains.len(),
        2
    );

    // Fallback plus client validation is a contradiction: rejected.
    let proxy_invalid = proxy(
        "default",
        "simple",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "fallback.example.com",
                k8s::TLS {
                    secret_name: "secret".to_string(),
                    enable_fallback_certificate: true,
                    client_validation: Some(k8s::DownstreamValidation {
                        ca_secret: "something".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )),
            routes: vec![route_to("backend", 80)],
            ..Default::default()
        },
    );
    h.on_update(proxy_invalid);
    assert!(h.listener("ingress_https").is_none());
    assert_eq!(
        h.proxy_status("default", "simple").unwrap().0,
        Condition::Invalid
    );

    // Two valid fallback hosts: SNI chains sorted by FQDN, fallback last.
    h.on_update(proxy_fallback);
    h.on_add(proxy(
        "default",
        "simple-two",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "anotherfallback.example.com",
                k8s::TLS {
                    secret_name: "secret".to_string(),
                    enable_fallback_certificate: true,
                    ..Default::default()
                },
            )),
            routes: vec![route_to("backend", 80)],
            ..Default::default()
        },
    ));
    let https = h.listener("ingress_https").unwrap();
    let server_names: Vec<&[String]> = https
        .filter_chains
        .iter()
        .map(|c| c.server_names.as_slice())
        .collect();
    assert_eq!(
        server_names,
        vec![
            &["anotherfallback.example.com".to_string()][..],
            &["fallback.example.com".to_string()][..],
            &[][..],
        ]
    );

    // Both the serving certificate and the fallback certificate are
    // published, under versioned names.
    assert_eq!(
        h.secret_names(),
        vec![versioned_name(&fallback_secret), versioned_name(&sec1)]
    );

    // Losing the fallback secret invalidates the opted-in hosts.
    h.on_delete::<k8s::Secret>("admin", "fallbacksecret");
    assert!(h.listener("ingress_https").is_none());

    // And removing the proxies clears the secret cache.
    h.on_delete::<k8s::HTTPProxy>("default", "simple");
    h.on_delete::<k8s::HTTPProxy>("default", "simple-two");
    assert!(h.secret_names().is_empty());
}

#[test]
fn cors_policy_reaches_the_route_configuration() {
    let h = harness();
    h.on_add(service("default", "svc1", &[("", 80)]));

    let with_cors = |cors: k8s::CORSPolicy| {
        proxy(
            "default",
            "simple",
            k8s::HTTPProxySpec {
                virtual_host: Some(k8s::VirtualHost {
                    fqdn: "hello.world".to_string(),
                    cors_policy: Some(cors),
                    ..Default::default()
                }),
                routes: vec![route_to("svc1", 80)],
                ..Default::default()
            },
        )
    };

    h.on_add(with_cors(k8s::CORSPolicy {
        allow_origin: vec!["*".to_string()],
        allow_credentials: true,
        allow_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
        max_age: Some("10m".to_string()),
        ..Default::default()
    }));

    let config = h.route_config("ingress_http").unwrap();
    assert_eq!(config.virtual_hosts.len(), 1);
    let vhost = &config.virtual_hosts[0];
    assert_eq!(vhost.name, "hello.world");
    let cors = vhost.cors.as_ref().unwrap();
    assert_eq!(cors.allow_origin, vec!["*".to_string()]);
    assert!(cors.allow_credentials);
    assert_eq!(cors.allow_methods, "GET,POST,OPTIONS");
    assert_eq!(cors.max_age, "600");
    match vhost.routes[0].action.as_ref().unwrap() {
        api::route::Action::Route(action) => match action.cluster_specifier.as_ref().unwrap() {
            api::route_action::ClusterSpecifier::Cluster(name) => {
                assert_eq!(name, "default/svc1")
            }
            other => panic!("expected a single cluster, got {other:?}"),
        },
        api::route::Action::Redirect(_) => panic!("expected a forwarding route"),
    }

    // "0s" disables preflight caching.
    h.on_update(with_cors(k8s::CORSPolicy {
        allow_origin: vec!["*".to_string()],
        allow_credentials: true,
        max_age: Some("0s".to_string()),
        ..Default::default()
    }));
    let config = h.route_config("ingress_http").unwrap();
    assert_eq!(config.virtual_hosts[0].cors.as_ref().unwrap().max_age, "0");

    // A negative max age rejects the whole virtual host.
    h.on_update(with_cors(k8s::CORSPolicy {
        allow_origin: vec!["*".to_string()],
        allow_credentials: true,
        max_age: Some("-10m".to_string()),
        ..Default::default()
    }));
    let config = h.route_config("ingress_http").unwrap();
    assert!(config.virtual_hosts.is_empty());
    assert_eq!(
        h.proxy_status("default", "simple").unwrap().0,
        Condition::Invalid
    );
}

#[test]
fn tls_minimum_protocol_version() {
    let h = harness();
    h.on_add(tls_secret("default", "secret"));
    h.on_add(service("default", "backend", &[("http", 80)]));

    let ingress = |annotations: Option<(&str, &str)>| {
        let mut ingress = k8s::Ingress {
            metadata: meta("default", "simple"),
            spec: Some(k8s::IngressSpec {
                tls: Some(vec![k8s::IngressTLS {
                    hosts: Some(vec!["kuard.example.com".to_string()]),
                    secret_name: Some("secret".to_string()),
                }]),
                rules: Some(vec![k8s::IngressRule {
                    host: Some("kuard.example.com".to_string()),
                    http: Some(k8s::HTTPIngressRuleValue {
                        paths: vec![k8s::HTTPIngressPath {
                            path: None,
                            path_type: "Prefix".to_string(),
                            backend: k8s::IngressBackend {
                                service: Some(k8s::IngressServiceBackend {
                                    name: "backend".to_string(),
                                    port: Some(k8s::ServiceBackendPort {
                                        name: Some("http".to_string()),
                                        number: None,
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Some((key, value)) = annotations {
            ingress.metadata.annotations =
                Some([(key.to_string(), value.to_string())].into_iter().collect());
        }
        ingress
    };

    h.on_add(ingress(None));
    let https = h.listener("ingress_https").unwrap();
    assert_eq!(
        https.filter_chains[0]
            .tls_context
            .as_ref()
            .unwrap()
            .min_protocol_version,
        api::TlsProtocol::V1_2 as i32
    );

    h.on_update(ingress(Some((
        "contour.heptio.com/tls-minimum-protocol-version",
        "1.3",
    ))));
    let https = h.listener("ingress_https").unwrap();
    assert_eq!(
        https.filter_chains[0]
            .tls_context
            .as_ref()
            .unwrap()
            .min_protocol_version,
        api::TlsProtocol::V1_3 as i32
    );

    // The HTTPProxy field spells it the same way.
    h.on_delete::<k8s::Ingress>("default", "simple");
    h.on_add(proxy(
        "default",
        "simple",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "kuard.example.com",
                k8s::TLS {
                    secret_name: "default/secret".to_string(),
                    minimum_protocol_version: "1.3".to_string(),
                    ..Default::default()
                },
            )),
            routes: vec![route_to("backend", 80)],
            ..Default::default()
        },
    ));
    let https = h.listener("ingress_https").unwrap();
    assert_eq!(
        https.filter_chains[0]
            .tls_context
            .as_ref()
            .unwrap()
            .min_protocol_version,
        api::TlsProtocol::V1_3 as i32
    );
}

#[test]
fn downstream_tls_certificate_validation() {
    let h = harness();
    h.on_add(tls_secret("default", "servertls"));
    h.on_add(ca_secret("default", "clientca"));
    h.on_add(service("default", "kuard", &[("http", 8080)]));

    h.on_add(proxy(
        "default",
        "example",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "example.com",
                k8s::TLS {
                    secret_name: "servertls".to_string(),
                    client_validation: Some(k8s::DownstreamValidation {
                        ca_secret: "clientca".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )),
            routes: vec![route_to("kuard", 8080)],
            ..Default::default()
        },
    ));

    // Plaintext (with the HTTPS redirect), TLS, and the static listener.
    let names: Vec<String> = h.listeners().into_iter().map(|l| l.name).collect();
    assert_eq!(names, vec!["ingress_http", "ingress_https", "stats-health"]);

    let https = h.listener("ingress_https").unwrap();
    let tls = https.filter_chains[0].tls_context.as_ref().unwrap();
    let validation = tls.validation_context.as_ref().unwrap();
    assert_eq!(validation.trusted_ca, b"ca".to_vec());
    assert_eq!(
        h.proxy_status("default", "example").unwrap().0,
        Condition::Valid
    );

    // The plaintext side serves only the HTTPS redirect for this host.
    let http = h.route_config("ingress_http").unwrap();
    match http.virtual_hosts[0].routes[0].action.as_ref().unwrap() {
        api::route::Action::Redirect(redirect) => assert!(redirect.https_redirect),
        api::route::Action::Route(_) => panic!("expected an HTTPS redirect"),
    }
}

#[test]
fn ingress_retry_annotations_reach_the_route() {
    let h = harness();
    h.on_add(service("default", "backend", &[("http", 80)]));

    let mut ingress = k8s::Ingress {
        metadata: meta("default", "retries"),
        spec: Some(k8s::IngressSpec {
            rules: Some(vec![k8s::IngressRule {
                host: Some("retry.example.com".to_string()),
                http: Some(k8s::HTTPIngressRuleValue {
                    paths: vec![k8s::HTTPIngressPath {
                        path: None,
                        path_type: "Prefix".to_string(),
                        backend: k8s::IngressBackend {
                            service: Some(k8s::IngressServiceBackend {
                                name: "backend".to_string(),
                                port: Some(k8s::ServiceBackendPort {
                                    name: None,
                                    number: Some(80),
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    ingress.metadata.annotations = Some(
        [
            ("projectcontour.io/retry-on", "5xx"),
            ("projectcontour.io/num-retries", "7"),
            ("projectcontour.io/per-try-timeout", "10s"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    );
    h.on_add(ingress);

    let config = h.route_config("ingress_http").unwrap();
    let route = &config.virtual_hosts[0].routes[0];
    let action = match route.action.as_ref().unwrap() {
        api::route::Action::Route(action) => action,
        api::route::Action::Redirect(_) => panic!("expected a forwarding route"),
    };
    let retry = action.retry_policy.as_ref().unwrap();
    assert_eq!(retry.retry_on, "5xx");
    assert_eq!(retry.num_retries, 7);
    assert_eq!(
        retry.per_try_timeout,
        Some(api::proto_duration(std::time::Duration::from_secs(10)))
    );
}

#[test]
fn endpoint_cartesian_product() {
    let h = harness();
    h.on_add(service("default", "httpbin-org", &[("a", 8675), ("b", 309)]));
    h.on_add(proxy(
        "default",
        "httpbin",
        k8s::HTTPProxySpec {
            virtual_host: Some(k8s::VirtualHost {
                fqdn: "httpbin.example.com".to_string(),
                ..Default::default()
            }),
            routes: vec![
                route_to("httpbin-org", 8675),
                route_to("httpbin-org", 309),
            ],
            ..Default::default()
        },
    ));

    h.apply_slice(k8s::EndpointSlice {
        metadata: k8s::ObjectMeta {
            labels: Some(
                [("kubernetes.io/service-name".to_string(), "httpbin-org".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..meta("default", "httpbin-org-abc")
        },
        endpoints: ["10.10.2.2", "10.10.1.1"]
            .iter()
            .map(|address| k8s::Endpoint {
                addresses: vec![address.to_string()],
                conditions: Some(k8s::EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![
            k8s::EndpointPort {
                name: Some("b".to_string()),
                port: Some(309),
                ..Default::default()
            },
            k8s::EndpointPort {
                name: Some("a".to_string()),
                port: Some(8675),
                ..Default::default()
            },
        ]),
        ..Default::default()
    });

    let assignments: Vec<api::ClusterLoadAssignment> = decode(h.endpoints.contents());
    assert_eq!(assignments.len(), 2);

    let addresses = |cla: &api::ClusterLoadAssignment| -> Vec<(String, u32)> {
        cla.endpoints
            .iter()
            .flat_map(|l| l.lb_endpoints.iter())
            .map(|e| {
                let address = e.address.as_ref().unwrap();
                (address.address.clone(), address.port_value)
            })
            .collect()
    };

    assert_eq!(assignments[0].cluster_name, "default/httpbin-org/a");
    assert_eq!(
        addresses(&assignments[0]),
        vec![
            ("10.10.1.1".to_string(), 8675),
            ("10.10.2.2".to_string(), 8675)
        ]
    );
    assert_eq!(assignments[0].endpoints[0].load_balancing_weight, Some(1));

    assert_eq!(assignments[1].cluster_name, "default/httpbin-org/b");
    assert_eq!(
        addresses(&assignments[1]),
        vec![
            ("10.10.1.1".to_string(), 309),
            ("10.10.2.2".to_string(), 309)
        ]
    );
}

struct OneShotStream {
    request: Option<api::DiscoveryRequest>,
}

#[async_trait::async_trait]
impl DiscoveryStream for OneShotStream {
    async fn recv(&mut self) -> anyhow::Result<Option<api::DiscoveryRequest>> {
        Ok(self.request.take())
    }

    async fn send(&mut self, _response: api::DiscoveryResponse) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn unknown_type_urls_fail_the_discovery_stream() {
    let h = harness();
    let handler = DiscoveryHandler::new(vec![
        h.listeners.clone() as Arc<dyn Resource>,
        h.routes.clone(),
        h.clusters.clone(),
        h.secrets.clone(),
        Arc::new(h.endpoints.clone()),
    ]);

    let mut stream = OneShotStream {
        request: Some(api::DiscoveryRequest {
            type_url: "io.projectcontour.potato".to_string(),
            ..Default::default()
        }),
    };
    let (_signal, drain) = drain::channel();
    let err = handler.stream(&mut stream, drain).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "no resource registered for typeURL \"io.projectcontour.potato\""
    );
}

#[test]
fn no_op_updates_do_not_bump_versions() {
    let h = harness();
    let svc = service("default", "kuard", &[("http", 8080)]);
    let web = proxy(
        "default",
        "web",
        k8s::HTTPProxySpec {
            virtual_host: Some(k8s::VirtualHost {
                fqdn: "web.example.com".to_string(),
                ..Default::default()
            }),
            routes: vec![route_to("kuard", 8080)],
            ..Default::default()
        },
    );
    h.on_add(svc.clone());
    h.on_add(web.clone());

    // Catch up to the current listener version.
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    h.listeners.register(tx, 0, &[]);
    let current = rx.try_recv().expect("initial version");

    // Re-applying the identical object must not wake anyone.
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    h.listeners.register(tx, current, &[]);
    h.on_update(web.clone());
    assert!(rx.try_recv().is_err());

    // A real change does.
    h.on_delete::<k8s::HTTPProxy>("default", "web");
    assert!(rx.try_recv().is_ok());
}

#[test]
fn add_then_delete_restores_translator_contents() {
    let h = harness();
    let before_listeners = h.listeners.contents();
    let before_routes = h.routes.contents();
    let before_clusters = h.clusters.contents();
    let before_secrets = h.secrets.contents();
    let before_endpoints = h.endpoints.contents();

    h.on_add(service("default", "kuard", &[("http", 8080)]));
    h.on_add(tls_secret("default", "tls"));
    h.on_add(proxy(
        "default",
        "web",
        k8s::HTTPProxySpec {
            virtual_host: Some(tls_vhost(
                "web.example.com",
                k8s::TLS {
                    secret_name: "tls".to_string(),
                    ..Default::default()
                },
            )),
            routes: vec![route_to("kuard", 8080)],
            ..Default::default()
        },
    ));
    assert_ne!(h.listeners.contents(), before_listeners);

    h.on_delete::<k8s::HTTPProxy>("default", "web");
    h.on_delete::<k8s::Secret>("default", "tls");
    h.on_delete::<k8s::Service>("default", "kuard");

    assert_eq!(h.listeners.contents(), before_listeners);
    assert_eq!(h.routes.contents(), before_routes);
    assert_eq!(h.clusters.contents(), before_clusters);
    assert_eq!(h.secrets.contents(), before_secrets);
    assert_eq!(h.endpoints.contents(), before_endpoints);
}
