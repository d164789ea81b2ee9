//! Projects the DAG's in-use TLS secrets into data-plane secret resources.
//! Names carry a payload digest, so a certificate rotation surfaces as a new
//! resource and stale material ages out by name.

use crate::notifier::Notifier;
use crate::{api, Resource};
use gantry_core::{Dag, DagObserver};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc::Sender;

#[derive(Default)]
pub struct SecretCache {
    secrets: Mutex<BTreeMap<String, api::Secret>>,
    notifier: Notifier,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DagObserver for SecretCache {
    fn on_change(&self, dag: &Dag) {
        let next: BTreeMap<String, api::Secret> = dag
            .secrets
            .iter()
            .map(|s| {
                let name = s.versioned_name();
                (
                    name.clone(),
                    api::Secret {
                        name,
                        tls_certificate: Some(api::TlsCertificate {
                            certificate_chain: s.cert().to_vec(),
                            private_key: s.private_key().to_vec(),
                        }),
                    },
                )
            })
            .collect();

        let mut current = self.secrets.lock();
        if *current != next {
            *current = next;
            drop(current);
            self.notifier.next();
        }
    }
}

impl Resource for SecretCache {
    fn type_url(&self) -> &'static str {
        api::SECRET_TYPE_URL
    }

    fn contents(&self) -> Vec<prost_types::Any> {
        self.secrets
            .lock()
            .values()
            .map(|s| api::to_any(api::SECRET_TYPE_URL, s))
            .collect()
    }

    fn query(&self, names: &[String]) -> Vec<prost_types::Any> {
        let secrets = self.secrets.lock();
        let mut names: Vec<&String> = names.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| match secrets.get(name) {
                Some(secret) => api::to_any(api::SECRET_TYPE_URL, secret),
                None => api::to_any(
                    api::SECRET_TYPE_URL,
                    &api::Secret {
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
