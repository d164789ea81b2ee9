use ahash::{AHashMap, AHashSet};
use gantry_core::{Condition, Dag, DagObserver, NamespacedName, ObjectKind};
use gantry_k8s_api::{Api, Client, HTTPProxy, Patch, PatchParams};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::error;

const FIELD_MANAGER: &str = "projectcontour.io/gantry";

type Key = (ObjectKind, NamespacedName);
type Verdict = (Condition, String);

/// Holds the most recent verdict per input object and emits a patch whenever
/// a verdict changes. Re-recording an identical verdict is a no-op.
pub struct Index {
    verdicts: Mutex<AHashMap<Key, Verdict>>,
    updates: UnboundedSender<Update>,
}

pub struct Update {
    pub name: NamespacedName,
    pub patch: Patch<serde_json::Value>,
}

impl Index {
    pub fn new(updates: UnboundedSender<Update>) -> Self {
        Self {
            verdicts: Mutex::new(AHashMap::new()),
            updates,
        }
    }

    /// The last recorded verdict for an object, if any.
    pub fn verdict(&self, kind: ObjectKind, name: &NamespacedName) -> Option<Verdict> {
        self.verdicts.lock().get(&(kind, name.clone())).cloned()
    }
}

impl DagObserver for Index {
    fn on_change(&self, dag: &Dag) {
        let mut verdicts = self.verdicts.lock();
        let mut live: AHashSet<Key> = AHashSet::with_capacity(dag.statuses.len());

        for status in &dag.statuses {
            let key = (status.kind, status.name.clone());
            live.insert(key.clone());
            let verdict = (status.condition, status.description.clone());
            if verdicts.get(&key) == Some(&verdict) {
                continue;
            }
            verdicts.insert(key, verdict);

            // Only HTTPProxy carries a compatible status subresource; other
            // verdicts stay queryable in the index.
            if status.kind == ObjectKind::HttpProxy {
                let patch = Patch::Merge(serde_json::json!({
                    "status": {
                        "currentStatus": status.condition.as_str(),
                        "description": status.description,
                    }
                }));
                if self
                    .updates
                    .send(Update {
                        name: status.name.clone(),
                        patch,
                    })
                    .is_err()
                {
                    error!(object = %status.name, "status controller is gone");
                }
            }
        }

        // Deleted objects forget their verdict so a re-add republishes it.
        verdicts.retain(|key, _| live.contains(key));
    }
}

/// Drains the update queue and applies the patches. Failures are logged and
/// retried implicitly on the next verdict change.
pub struct Controller {
    client: Client,
    updates: UnboundedReceiver<Update>,
}

impl Controller {
    pub fn new(client: Client, updates: UnboundedReceiver<Update>) -> Self {
        Self { client, updates }
    }

    pub async fn run(mut self) {
        let params = PatchParams::apply(FIELD_MANAGER);
        while let Some(Update { name, patch }) = self.updates.recv().await {
            let api = Api::<HTTPProxy>::namespaced(self.client.clone(), &name.namespace);
            if let Err(error) = api.patch_status(&name.name, &params, &patch).await {
                error!(object = %name, %error, "failed to patch HTTPProxy status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Status;

    fn dag_with(statuses: Vec<Status>) -> Dag {
        Dag {
            statuses,
            ..Default::default()
        }
    }

    fn invalid(name: &str, message: &str) -> Status {
        Status::invalid(
            ObjectKind::HttpProxy,
            NamespacedName::new("default", name),
            message,
        )
    }

    #[test]
    fn duplicate_verdicts_emit_one_patch() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let index = Index::new(tx);

        index.on_change(&dag_with(vec![invalid("web", "broken")]));
        assert!(rx.try_recv().is_ok());

        index.on_change(&dag_with(vec![invalid("web", "broken")]));
        assert!(rx.try_recv().is_err());

        // A changed message is a changed verdict.
        index.on_change(&dag_with(vec![invalid("web", "still broken")]));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn deleted_objects_forget_their_verdicts() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let index = Index::new(tx);
        let name = NamespacedName::new("default", "web");

        index.on_change(&dag_with(vec![invalid("web", "broken")]));
        assert!(rx.try_recv().is_ok());
        assert!(index.verdict(ObjectKind::HttpProxy, &name).is_some());

        index.on_change(&dag_with(vec![]));
        assert!(index.verdict(ObjectKind::HttpProxy, &name).is_none());

        // Re-adding the object republishes even an identical verdict.
        index.on_change(&dag_with(vec![invalid("web", "broken")]));
        assert!(rx.try_recv().is_ok());
    }
}
