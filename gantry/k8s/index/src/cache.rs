//! In-memory mirror of the watched cluster state.
//!
//! Every map is keyed and iterated in `(namespace, name)` order so that DAG
//! builds are deterministic. Mutations that change nothing (duplicate adds,
//! no-op updates) are swallowed without poking the dispatcher.

use gantry_core::{NamespacedName, CA_CERTIFICATE_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use gantry_k8s_api::{
    HTTPProxy, Ingress, ResourceExt, Secret, Service, TLSCertificateDelegation, SECRET_TYPE_TLS,
};
use kubert::index::IndexNamespacedResource;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

pub type SharedCache = Arc<RwLock<KubernetesCache>>;

#[derive(Default)]
pub struct KubernetesCache {
    pub services: BTreeMap<NamespacedName, Service>,
    pub secrets: BTreeMap<NamespacedName, Secret>,
    pub ingresses: BTreeMap<NamespacedName, Ingress>,
    pub proxies: BTreeMap<NamespacedName, HTTPProxy>,
    pub delegations: BTreeMap<NamespacedName, TLSCertificateDelegation>,

    trigger: Option<UnboundedSender<()>>,
}

impl KubernetesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that pokes `trigger` after every effective mutation.
    pub fn with_trigger(trigger: UnboundedSender<()>) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    pub fn shared(trigger: UnboundedSender<()>) -> SharedCache {
        Arc::new(RwLock::new(Self::with_trigger(trigger)))
    }

    fn touch(&self) {
        if let Some(trigger) = &self.trigger {
            let _ = trigger.send(());
        }
    }

    fn insert<T: PartialEq>(map: &mut BTreeMap<NamespacedName, T>, key: NamespacedName, value: T) -> bool {
        if map.get(&key) == Some(&value) {
            return false;
        }
        map.insert(key, value);
        true
    }

    /// A secret is worth mirroring when it can terminate TLS or can validate
    /// client certificates. Everything else is dropped on the floor.
    fn secret_relevant(secret: &Secret) -> bool {
        let data = match &secret.data {
            Some(data) => data,
            None => return false,
        };
        let tls = secret.type_.as_deref() == Some(SECRET_TYPE_TLS)
            && data.contains_key(TLS_CERT_KEY)
            && data.contains_key(TLS_PRIVATE_KEY_KEY);
        tls || data.contains_key(CA_CERTIFICATE_KEY)
    }
}

fn key_of<T: kube::Resource>(resource: &T) -> NamespacedName
where
    T::DynamicType: Default,
{
    NamespacedName::new(
        resource.namespace().unwrap_or_default(),
        resource.name_unchecked(),
    )
}

impl IndexNamespacedResource<Service> for KubernetesCache {
    fn apply(&mut self, resource: Service) {
        if Self::insert(&mut self.services, key_of(&resource), resource) {
            self.touch();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .services
            .remove(&NamespacedName::new(namespace, name))
            .is_some()
        {
            self.touch();
        }
    }
}

impl IndexNamespacedResource<Secret> for KubernetesCache {
    fn apply(&mut self, resource: Secret) {
        let key = key_of(&resource);
        let changed = if Self::secret_relevant(&resource) {
            Self::insert(&mut self.secrets, key, resource)
        } else {
            self.secrets.remove(&key).is_some()
        };
        if changed {
            self.touch();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .secrets
            .remove(&NamespacedName::new(namespace, name))
            .is_some()
        {
            self.touch();
        }
    }
}

impl IndexNamespacedResource<Ingress> for KubernetesCache {
    fn apply(&mut self, resource: Ingress) {
        if Self::insert(&mut self.ingresses, key_of(&resource), resource) {
            self.touch();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .ingresses
            .remove(&NamespacedName::new(namespace, name))
            .is_some()
        {
            self.touch();
        }
    }
}

impl IndexNamespacedResource<HTTPProxy> for KubernetesCache {
    fn apply(&mut self, resource: HTTPProxy) {
        if Self::insert(&mut self.proxies, key_of(&resource), resource) {
            self.touch();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .proxies
            .remove(&NamespacedName::new(namespace, name))
            .is_some()
        {
            self.touch();
        }
    }
}

impl IndexNamespacedResource<TLSCertificateDelegation> for KubernetesCache {
    fn apply(&mut self, resource: TLSCertificateDelegation) {
        if Self::insert(&mut self.delegations, key_of(&resource), resource) {
            self.touch();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .delegations
            .remove(&NamespacedName::new(namespace, name))
            .is_some()
        {
            self.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_k8s_api::ObjectMeta;

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_applies_do_not_retrigger() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut cache = KubernetesCache::with_trigger(tx);

        cache.apply(service("default", "kuard"));
        assert!(rx.try_recv().is_ok());

        cache.apply(service("default", "kuard"));
        assert!(rx.try_recv().is_err());

        IndexNamespacedResource::<Service>::delete(
            &mut cache,
            "default".to_string(),
            "kuard".to_string(),
        );
        assert!(rx.try_recv().is_ok());

        // Deleting an absent object is idempotent.
        IndexNamespacedResource::<Service>::delete(
            &mut cache,
            "default".to_string(),
            "kuard".to_string(),
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn irrelevant_secrets_are_not_mirrored() {
        let mut cache = KubernetesCache::new();
        let secret = Secret {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("token".to_string()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/service-account-token".to_string()),
            ..Default::default()
        };
        cache.apply(secret);
        assert!(cache.secrets.is_empty());
    }
}
