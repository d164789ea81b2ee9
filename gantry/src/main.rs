#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use gantry::{k8s, status, Builder, DagObserver, Dispatcher, KubernetesCache, NamespacedName};
use gantry::xds::{
    ClusterCache, DiscoveryHandler, EndpointsTranslator, GrpcServer, ListenerCache, Resource,
    RouteCache, SecretCache,
};
use kube::runtime::watcher;
use parking_lot::RwLock;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tonic::transport::Server;
use tracing::{info, info_span, instrument, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "gantry", about = "Ingress controller control plane")]
struct Args {
    #[clap(long, default_value = "gantry=info,warn", env = "GANTRY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address the discovery server listens on.
    #[clap(long, default_value = "0.0.0.0:8001")]
    xds_addr: SocketAddr,

    /// `namespace/name` of the TLS secret served when SNI matches no
    /// virtual host. Proxies opt in per virtual host.
    #[clap(long)]
    fallback_certificate: Option<NamespacedName>,

    /// Quiet period after a mutation before the routing graph is rebuilt.
    #[clap(long, default_value = "100")]
    rebuild_holdoff_ms: u64,

    /// Upper bound on how long a steady stream of mutations can defer a
    /// rebuild.
    #[clap(long, default_value = "500")]
    rebuild_max_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        xds_addr,
        fallback_certificate,
        rebuild_holdoff_ms,
        rebuild_max_delay_ms,
    } = Args::parse();

    let mut runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_admin(admin)
        .with_client(client)
        .build()
        .await?;

    // The object cache pokes the dispatcher on every effective mutation.
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let cache = KubernetesCache::shared(trigger_tx);

    let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
    tokio::spawn(kubert::index::namespaced(cache.clone(), services).instrument(info_span!("services")));

    let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
    tokio::spawn(kubert::index::namespaced(cache.clone(), secrets).instrument(info_span!("secrets")));

    let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(cache.clone(), ingresses).instrument(info_span!("ingresses")),
    );

    let proxies = runtime.watch_all::<k8s::HTTPProxy>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(cache.clone(), proxies).instrument(info_span!("httpproxies")),
    );

    let delegations = runtime.watch_all::<k8s::TLSCertificateDelegation>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(cache.clone(), delegations)
            .instrument(info_span!("tlscertificatedelegations")),
    );

    // Endpoint data bypasses the DAG: slices feed the translator directly.
    let endpoints = EndpointsTranslator::new();
    let slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(Arc::new(RwLock::new(endpoints.clone())), slices)
            .instrument(info_span!("endpointslices")),
    );

    let listeners = Arc::new(ListenerCache::new());
    let routes = Arc::new(RouteCache::new());
    let clusters = Arc::new(ClusterCache::new());
    let secret_cache = Arc::new(SecretCache::new());
    let endpoint_resource = Arc::new(endpoints.clone());

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let status_index = Arc::new(status::Index::new(updates_tx));

    let observers: Vec<Arc<dyn DagObserver>> = vec![
        listeners.clone(),
        routes.clone(),
        clusters.clone(),
        secret_cache.clone(),
        endpoint_resource.clone(),
        status_index,
    ];
    let dispatcher = Dispatcher::new(
        cache,
        Builder {
            fallback_certificate,
        },
        observers,
    )
    .with_holdoff(
        Duration::from_millis(rebuild_holdoff_ms),
        Duration::from_millis(rebuild_max_delay_ms),
    );
    tokio::spawn(dispatcher.run(trigger_rx).instrument(info_span!("dispatcher")));

    let controller = status::Controller::new(runtime.client(), updates_rx);
    tokio::spawn(controller.run().instrument(info_span!("status")));

    let handler = Arc::new(DiscoveryHandler::new(vec![
        listeners as Arc<dyn Resource>,
        routes,
        clusters,
        endpoint_resource,
        secret_cache,
    ]));
    tokio::spawn(grpc(xds_addr, handler, runtime.shutdown_handle()));

    // Block on the shutdown signal, then let background tasks wind down.
    if runtime.run().await.is_err() {
        bail!("aborted");
    }

    Ok(())
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(addr: SocketAddr, handler: Arc<DiscoveryHandler>, drain: drain::Watch) -> Result<()> {
    let svc = GrpcServer::new(handler, drain.clone()).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .add_service(svc)
            .serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "discovery server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?;
        }
    }
    Ok(())
}
