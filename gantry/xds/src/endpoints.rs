//! Translates EndpointSlice state into cluster load assignments.
//!
//! Unlike the other translators this one has two inputs: the DAG rebuild
//! installs the set of service clusters worth tracking, and EndpointSlice
//! watch events update address data live, recomputing only the clusters the
//! event touches. A cluster with no ready endpoints still publishes an empty
//! assignment so the data plane can tell "unknown cluster" from "scaled to
//! zero".

use crate::notifier::Notifier;
use crate::{api, Resource};
use ahash::{AHashMap, AHashSet};
use gantry_core::{Dag, DagObserver, NamespacedName, ServiceCluster};
use gantry_k8s_api::{EndpointSlice, SERVICE_NAME_LABEL};
use kubert::index::IndexNamespacedResource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

#[derive(Clone, Default)]
pub struct EndpointsTranslator {
    inner: Arc<Mutex<Inner>>,
    notifier: Arc<Notifier>,
}

#[derive(Default)]
struct Inner {
    /// Clusters installed by the most recent DAG rebuild, by cluster name.
    clusters: BTreeMap<String, ServiceCluster>,
    /// Service → names of clusters that reference it.
    clusters_by_service: AHashMap<NamespacedName, AHashSet<String>>,
    /// Mirrored slice data, keyed by the slice's own (namespace, name).
    slices: AHashMap<NamespacedName, SliceData>,
    /// Service → slices that materialize it.
    slices_by_service: AHashMap<NamespacedName, AHashSet<NamespacedName>>,
    /// Published load assignments, keyed (and therefore ordered) by cluster
    /// name.
    entries: BTreeMap<String, api::ClusterLoadAssignment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SliceData {
    service: NamespacedName,
    /// Ready addresses only; not-ready addresses are never emitted.
    addresses: Vec<String>,
    /// (port name, port number) pairs; the name correlates with the Service
    /// port, the number is what goes on the wire.
    ports: Vec<(String, u32)>,
}

impl EndpointsTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the cluster table from a rebuild and recomputes everything;
    /// clusters the DAG no longer references are garbage-collected here.
    fn set_clusters(&self, clusters: &[ServiceCluster]) {
        let mut inner = self.inner.lock();

        inner.clusters = clusters
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        inner.clusters_by_service.clear();
        for cluster in clusters {
            for ws in &cluster.services {
                inner
                    .clusters_by_service
                    .entry(ws.service.clone())
                    .or_default()
                    .insert(cluster.name.clone());
            }
        }

        let next: BTreeMap<String, api::ClusterLoadAssignment> = inner
            .clusters
            .values()
            .map(|c| (c.name.clone(), assignment(&inner, c)))
            .collect();
        let changed = inner.entries != next;
        inner.entries = next;
        drop(inner);
        if changed {
            self.notifier.next();
        }
    }

    fn apply_slice(&self, slice: EndpointSlice) {
        let key = NamespacedName::new(
            slice.metadata.namespace.clone().unwrap_or_default(),
            slice.metadata.name.clone().unwrap_or_default(),
        );
        let data = mirror(&key, &slice);

        let mut inner = self.inner.lock();
        let mut touched: AHashSet<NamespacedName> = AHashSet::new();

        let previous = match &data {
            Some(data) => inner.slices.insert(key.clone(), data.clone()),
            None => inner.slices.remove(&key),
        };
        if let Some(previous) = &previous {
            touched.insert(previous.service.clone());
            if data.as_ref().map(|d| &d.service) != Some(&previous.service) {
                if let Some(set) = inner.slices_by_service.get_mut(&previous.service) {
                    set.remove(&key);
                }
            }
        }
        if let Some(data) = &data {
            touched.insert(data.service.clone());
            inner
                .slices_by_service
                .entry(data.service.clone())
                .or_default()
                .insert(key);
        }

        self.recompute(inner, &touched);
    }

    fn delete_slice(&self, namespace: String, name: String) {
        let key = NamespacedName::new(namespace, name);
        let mut inner = self.inner.lock();
        let Some(previous) = inner.slices.remove(&key) else {
            return;
        };
        if let Some(set) = inner.slices_by_service.get_mut(&previous.service) {
            set.remove(&key);
        }
        let mut touched = AHashSet::new();
        touched.insert(previous.service);
        self.recompute(inner, &touched);
    }

    /// Recomputes assignments for the clusters referencing the touched
    /// services, bumping the version only when something actually changed.
    fn recompute(
        &self,
        mut inner: parking_lot::MutexGuard<'_, Inner>,
        services: &AHashSet<NamespacedName>,
    ) {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for service in services {
            if let Some(clusters) = inner.clusters_by_service.get(service) {
                affected.extend(clusters.iter().cloned());
            }
        }

        let mut changed = false;
        for name in affected {
            let Some(cluster) = inner.clusters.get(&name) else {
                continue;
            };
            let next = assignment(&inner, cluster);
            if inner.entries.get(&name) != Some(&next) {
                inner.entries.insert(name, next);
                changed = true;
            }
        }
        drop(inner);
        if changed {
            self.notifier.next();
        }
    }
}

/// Extracts the part of a slice this translator cares about. `None` when the
/// slice carries no service label (nothing to correlate it with).
fn mirror(key: &NamespacedName, slice: &EndpointSlice) -> Option<SliceData> {
    let service = slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))?;

    let addresses = slice
        .endpoints
        .iter()
        .filter(|ep| {
            ep.conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true)
        })
        .flat_map(|ep| ep.addresses.iter().cloned())
        .collect();

    let ports = slice
        .ports
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|p| {
            let number = u32::try_from(p.port?).ok()?;
            Some((p.name.clone().unwrap_or_default(), number))
        })
        .collect();

    Some(SliceData {
        service: NamespacedName::new(key.namespace.clone(), service.clone()),
        addresses,
        ports,
    })
}

/// Builds one cluster's load assignment from the mirrored slices: ready
/// addresses of every slice, cartesian-joined with the matching port, then
/// deduplicated and sorted ascending by (address, port).
fn assignment(inner: &Inner, cluster: &ServiceCluster) -> api::ClusterLoadAssignment {
    let total_weight: u32 = cluster.services.iter().map(|s| s.weight).sum();

    let mut endpoints = Vec::new();
    for ws in &cluster.services {
        let mut pairs: BTreeSet<(String, u32)> = BTreeSet::new();
        if let Some(slice_keys) = inner.slices_by_service.get(&ws.service) {
            for slice_key in slice_keys {
                let Some(slice) = inner.slices.get(slice_key) else {
                    continue;
                };
                for (port_name, port_number) in &slice.ports {
                    if *port_name == ws.port.name {
                        pairs.extend(
                            slice
                                .addresses
                                .iter()
                                .map(|addr| (addr.clone(), *port_number)),
                        );
                    }
                }
            }
        }
        if pairs.is_empty() {
            continue;
        }

        // All-zero weights mean an even split; otherwise weights propagate,
        // zeroes included.
        let weight = if total_weight == 0 { 1 } else { ws.weight };
        endpoints.push(api::LocalityLbEndpoints {
            lb_endpoints: pairs
                .into_iter()
                .map(|(address, port_value)| api::LbEndpoint {
                    address: Some(api::SocketAddress {
                        address,
                        port_value,
                    }),
                })
                .collect(),
            load_balancing_weight: Some(weight),
        });
    }

    api::ClusterLoadAssignment {
        cluster_name: cluster.name.clone(),
        endpoints,
    }
}

impl DagObserver for EndpointsTranslator {
    fn on_change(&self, dag: &Dag) {
        self.set_clusters(&dag.clusters);
    }
}

// Driven directly by the EndpointSlice watch; `delete` is the exact mirror
// of `apply`.
impl IndexNamespacedResource<EndpointSlice> for EndpointsTranslator {
    fn apply(&mut self, resource: EndpointSlice) {
        Self::apply_slice(self, resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        Self::delete_slice(self, namespace, name);
    }
}

impl Resource for EndpointsTranslator {
    fn type_url(&self) -> &'static str {
        api::ENDPOINT_TYPE_URL
    }

    fn contents(&self) -> Vec<prost_types::Any> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|e| api::to_any(api::ENDPOINT_TYPE_URL, e))
            .collect()
    }

    fn query(&self, names: &[String]) -> Vec<prost_types::Any> {
        let inner = self.inner.lock();
        let mut names: Vec<&String> = names.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| match inner.entries.get(name) {
                Some(entry) => api::to_any(api::ENDPOINT_TYPE_URL, entry),
                None => api::to_any(
                    api::ENDPOINT_TYPE_URL,
                    &api::ClusterLoadAssignment {
                        cluster_name: name.clone(),
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
