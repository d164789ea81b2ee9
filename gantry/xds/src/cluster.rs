//! Projects the DAG's service clusters into data-plane cluster resources.
//! Cluster names are the stable DAG names, which is how the endpoints
//! translator and the route configuration stay correlated.

use crate::notifier::Notifier;
use crate::{api, Resource};
use gantry_core::{Dag, DagObserver, LoadBalancerPolicy};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Default)]
pub struct ClusterCache {
    clusters: Mutex<BTreeMap<String, api::Cluster>>,
    notifier: Notifier,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DagObserver for ClusterCache {
    fn on_change(&self, dag: &Dag) {
        let next: BTreeMap<String, api::Cluster> = dag
            .clusters
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    api::Cluster {
                        name: c.name.clone(),
                        lb_policy: lb_policy(c.lb_policy) as i32,
                        connect_timeout: Some(api::proto_duration(CONNECT_TIMEOUT)),
                    },
                )
            })
            .collect();

        let mut current = self.clusters.lock();
        if *current != next {
            *current = next;
            drop(current);
            self.notifier.next();
        }
    }
}

impl Resource for ClusterCache {
    fn type_url(&self) -> &'static str {
        api::CLUSTER_TYPE_URL
    }

    fn contents(&self) -> Vec<prost_types::Any> {
        self.clusters
            .lock()
            .values()
            .map(|c| api::to_any(api::CLUSTER_TYPE_URL, c))
            .collect()
    }

    fn query(&self, names: &[String]) -> Vec<prost_types::Any> {
        let clusters = self.clusters.lock();
        let mut names: Vec<&String> = names.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| match clusters.get(name) {
                Some(cluster) => api::to_any(api::CLUSTER_TYPE_URL, cluster),
                None => api::to_any(
                    api::CLUSTER_TYPE_URL,
                    &api::Cluster {
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

fn lb_policy(policy: Option<LoadBalancerPolicy>) -> api::LbPolicy {
    match policy {
        Some(LoadBalancerPolicy::WeightedLeastRequest) => api::LbPolicy::WeightedLeastRequest,
        Some(LoadBalancerPolicy::Random) => api::LbPolicy::Random,
        Some(LoadBalancerPolicy::Cookie) => api::LbPolicy::Cookie,
        Some(LoadBalancerPolicy::RoundRobin) | None => api::LbPolicy::RoundRobin,
    }
}
