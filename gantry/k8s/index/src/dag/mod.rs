//! The DAG builder: a pure function from a cache snapshot to the validated
//! routing graph.
//!
//! Compilation runs in processor order. The Ingress processor and the
//! HTTPProxy processor each claim virtual hosts and contribute routes,
//! clusters, secrets, and verdicts; the listener processor performs the final
//! assembly: pruning, sorting, and deduplication so the same snapshot always
//! yields an identical [`Dag`].

use crate::cache::KubernetesCache;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use gantry_core::{
    cluster_name, Condition, Dag, LoadBalancerPolicy, NamespacedName, ObjectKind, Secret,
    SecureVirtualHost, ServiceCluster, ServicePort, Status, VirtualHost, WeightedService,
};

mod httpproxy;
mod ingress;
pub(crate) mod policy;
pub(crate) mod secrets;


/// Compiles cache snapshots into routing graphs. Cheap to construct; carries
/// only process-wide build parameters.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    /// Secret served when SNI matches no virtual host. Proxies opt in per
    /// virtual host; the reference itself is process-wide configuration.
    pub fallback_certificate: Option<NamespacedName>,
}

impl Builder {
    pub fn build(&self, source: &KubernetesCache) -> Dag {
        let mut state = BuildState::new(source);
        ingress::IngressProcessor.run(source, &mut state);
        httpproxy::HttpProxyProcessor {
            fallback_certificate: self.fallback_certificate.as_ref(),
        }
        .run(source, &mut state);
        ListenerProcessor.run(state)
    }
}

/// Identifies the object that won a virtual-host FQDN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Claim {
    pub kind: ObjectKind,
    pub name: NamespacedName,
}

/// Mutable state threaded through the processors during one build.
pub(crate) struct BuildState {
    claims: AHashMap<String, Claim>,
    virtual_hosts: AHashMap<String, VirtualHost>,
    secure_virtual_hosts: AHashMap<String, SecureVirtualHost>,
    clusters: AHashMap<String, ServiceCluster>,
    secrets: AHashMap<NamespacedName, Secret>,
    fallback_certificate: Option<Secret>,
    statuses: AHashMap<(ObjectKind, NamespacedName), Status>,
}

impl BuildState {
    fn new(source: &KubernetesCache) -> Self {
        Self {
            claims: arbitrate_fqdns(source),
            virtual_hosts: AHashMap::new(),
            secure_virtual_hosts: AHashMap::new(),
            clusters: AHashMap::new(),
            secrets: AHashMap::new(),
            fallback_certificate: None,
            statuses: AHashMap::new(),
        }
    }

    /// Whether `name` won the claim for `fqdn`.
    pub(crate) fn owns(&self, fqdn: &str, kind: ObjectKind, name: &NamespacedName) -> bool {
        match self.claims.get(fqdn) {
            Some(claim) => claim.kind == kind && claim.name == *name,
            None => false,
        }
    }

    pub(crate) fn add_virtual_host(&mut self, vhost: VirtualHost) {
        self.virtual_hosts.insert(vhost.name.clone(), vhost);
    }

    pub(crate) fn add_secure_virtual_host(&mut self, vhost: SecureVirtualHost) {
        self.secure_virtual_hosts
            .insert(vhost.virtual_host.name.clone(), vhost);
    }

    /// Installs a cluster for a resolved backend, returning its stable name.
    /// The first registration of a name wins; later ones are identical in
    /// everything but load-balancing strategy.
    pub(crate) fn register_cluster(
        &mut self,
        service: NamespacedName,
        port: ServicePort,
        lb_policy: Option<LoadBalancerPolicy>,
    ) -> String {
        let name = cluster_name(&service, &port);
        self.clusters
            .entry(name.clone())
            .or_insert_with(|| ServiceCluster {
                name: name.clone(),
                services: vec![WeightedService {
                    weight: 1,
                    service,
                    port,
                }],
                lb_policy,
            });
        name
    }

    pub(crate) fn register_secret(&mut self, secret: Secret) {
        self.secrets.insert(secret.name.clone(), secret);
    }

    pub(crate) fn set_fallback_certificate(&mut self, secret: Secret) {
        self.register_secret(secret.clone());
        self.fallback_certificate = Some(secret);
    }

    /// Records a verdict. Within one build a worse verdict is sticky: a valid
    /// verdict never displaces an invalid one for the same object.
    pub(crate) fn set_status(&mut self, status: Status) {
        let key = (status.kind, status.name.clone());
        match self.statuses.get(&key) {
            Some(existing) if severity(existing.condition) >= severity(status.condition) => {}
            _ => {
                self.statuses.insert(key, status);
            }
        }
    }
}

fn severity(condition: Condition) -> u8 {
    match condition {
        Condition::Valid => 0,
        Condition::Orphaned => 1,
        Condition::Invalid => 2,
    }
}

/// Decides, per FQDN, which object gets to define the virtual host: the
/// oldest creation timestamp wins, ties broken by (namespace, name).
fn arbitrate_fqdns(source: &KubernetesCache) -> AHashMap<String, Claim> {
    type Candidate = (Option<DateTime<Utc>>, NamespacedName, u8);

    fn better(a: &Candidate, b: &Candidate) -> bool {
        // `None` sorts first: an object the API server has not yet stamped
        // cannot lose to one it has.
        a < b
    }

    let mut winners: AHashMap<String, (Candidate, Claim)> = AHashMap::new();
    let mut offer = |fqdn: &str, created: Option<DateTime<Utc>>, kind: ObjectKind, name: &NamespacedName| {
        let candidate: Candidate = (created, name.clone(), kind_order(kind));
        let claim = Claim {
            kind,
            name: name.clone(),
        };
        match winners.get_mut(fqdn) {
            Some((best, best_claim)) => {
                if better(&candidate, best) {
                    *best = candidate;
                    *best_claim = claim;
                }
            }
            None => {
                winners.insert(fqdn.to_string(), (candidate, claim));
            }
        }
    };

    for (name, ingress) in &source.ingresses {
        let created = ingress.metadata.creation_timestamp.as_ref().map(|t| t.0);
        for fqdn in ingress::ingress_hosts(ingress) {
            offer(&fqdn, created, ObjectKind::Ingress, name);
        }
    }

    for (name, proxy) in &source.proxies {
        if let Some(vhost) = &proxy.spec.virtual_host {
            if !vhost.fqdn.is_empty() {
                let created = proxy.metadata.creation_timestamp.as_ref().map(|t| t.0);
                offer(&vhost.fqdn, created, ObjectKind::HttpProxy, name);
            }
        }
    }

    winners
        .into_iter()
        .map(|(fqdn, (_, claim))| (fqdn, claim))
        .collect()
}

fn kind_order(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Ingress => 0,
        ObjectKind::HttpProxy => 1,
    }
}

/// Final assembly: drop route-less hosts, sort every output list, and emit
/// the graph.
struct ListenerProcessor;

impl ListenerProcessor {
    fn run(&self, state: BuildState) -> Dag {
        let BuildState {
            virtual_hosts,
            secure_virtual_hosts,
            clusters,
            secrets,
            fallback_certificate,
            statuses,
            ..
        } = state;

        let mut virtual_hosts: Vec<VirtualHost> = virtual_hosts
            .into_values()
            .filter(|vh| !vh.routes.is_empty())
            .collect();
        virtual_hosts.sort_by(|a, b| a.name.cmp(&b.name));

        let mut secure_virtual_hosts: Vec<SecureVirtualHost> = secure_virtual_hosts
            .into_values()
            .filter(|vh| !vh.virtual_host.routes.is_empty())
            .collect();
        secure_virtual_hosts.sort_by(|a, b| a.virtual_host.name.cmp(&b.virtual_host.name));

        let mut clusters: Vec<ServiceCluster> = clusters.into_values().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));

        let mut secrets: Vec<Secret> = secrets.into_values().collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));

        let mut statuses: Vec<Status> = statuses.into_values().collect();
        statuses.sort_by(|a, b| (&a.name, kind_order(a.kind)).cmp(&(&b.name, kind_order(b.kind))));

        Dag {
            virtual_hosts,
            secure_virtual_hosts,
            clusters,
            secrets,
            fallback_certificate,
            statuses,
        }
    }
}

/// How a route names the Service port it wants.
#[derive(Clone, Copy, Debug)]
pub(crate) enum PortSelector<'a> {
    Number(i32),
    Name(&'a str),
}

/// Looks a backend up in the snapshot, returning the port descriptor that
/// feeds cluster naming and endpoint correlation.
pub(crate) fn resolve_service(
    source: &KubernetesCache,
    namespace: &str,
    name: &str,
    selector: PortSelector<'_>,
) -> Option<(NamespacedName, ServicePort)> {
    let key = NamespacedName::new(namespace, name);
    let service = source.services.get(&key)?;
    let ports = service.spec.as_ref()?.ports.as_deref()?;

    let port = ports.iter().find(|p| match selector {
        PortSelector::Number(n) => p.port == n,
        PortSelector::Name(n) => p.name.as_deref() == Some(n),
    })?;

    let descriptor = ServicePort {
        name: port.name.clone().unwrap_or_default(),
        number: u16::try_from(port.port).ok()?,
    };
    Some((key, descriptor))
}
