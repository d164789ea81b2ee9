//! Serializes rebuilds. The cache pokes the trigger channel on every
//! effective mutation; this task coalesces bursts inside a hold-off window,
//! rebuilds the DAG from a consistent snapshot, and fans the result out to
//! the registered observers. Rebuilds are synchronous within the task, so
//! they can never overlap.

use crate::cache::SharedCache;
use crate::dag::Builder;
use gantry_core::DagObserver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Quiet period after the last mutation before a rebuild runs.
pub const DEFAULT_HOLDOFF: Duration = Duration::from_millis(100);

/// A steady drip of mutations cannot defer a rebuild past this bound.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(500);

pub struct Dispatcher {
    cache: SharedCache,
    builder: Builder,
    observers: Vec<Arc<dyn DagObserver>>,
    holdoff: Duration,
    max_delay: Duration,
}

impl Dispatcher {
    pub fn new(cache: SharedCache, builder: Builder, observers: Vec<Arc<dyn DagObserver>>) -> Self {
        Self {
            cache,
            builder,
            observers,
            holdoff: DEFAULT_HOLDOFF,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_holdoff(mut self, holdoff: Duration, max_delay: Duration) -> Self {
        self.holdoff = holdoff;
        self.max_delay = max_delay;
        self
    }

    /// One synchronous rebuild: snapshot, compile, fan out.
    pub fn rebuild(&self) {
        let dag = {
            let cache = self.cache.read();
            self.builder.build(&cache)
        };
        trace!(
            virtual_hosts = dag.virtual_hosts.len(),
            secure_virtual_hosts = dag.secure_virtual_hosts.len(),
            clusters = dag.clusters.len(),
            "rebuilt"
        );
        for observer in &self.observers {
            observer.on_change(&dag);
        }
    }

    /// Runs until the trigger channel closes.
    pub async fn run(self, mut trigger: UnboundedReceiver<()>) {
        while trigger.recv().await.is_some() {
            let deadline = Instant::now() + self.max_delay;
            loop {
                tokio::select! {
                    _ = time::sleep(self.holdoff) => break,
                    more = trigger.recv() => {
                        if more.is_none() || Instant::now() >= deadline {
                            break;
                        }
                        debug!("mutation within hold-off window, coalescing");
                    }
                }
            }
            // Anything that arrived since the last recv is already reflected
            // in the cache; fold its trigger into this rebuild.
            while trigger.try_recv().is_ok() {}
            self.rebuild();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KubernetesCache;
    use gantry_core::Dag;
    use gantry_k8s_api::{ObjectMeta, Service};
    use kubert::index::IndexNamespacedResource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl DagObserver for CountingObserver {
        fn on_change(&self, _dag: &Dag) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce_into_one_rebuild() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let cache = KubernetesCache::shared(tx);
        let observer = Arc::new(CountingObserver::default());

        let dispatcher = Dispatcher::new(
            cache.clone(),
            Builder::default(),
            vec![observer.clone() as Arc<dyn DagObserver>],
        );
        let task = tokio::spawn(dispatcher.run(rx));

        for i in 0..10 {
            cache.write().apply(service(&format!("svc-{i}")));
        }
        // Paused time auto-advances while this test sleeps, letting the
        // dispatcher's hold-off elapse.
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        // A later, separate mutation rebuilds again.
        cache.write().apply(service("late"));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(observer.0.load(Ordering::SeqCst), 2);

        // A no-op update never pokes the trigger, so nothing rebuilds.
        cache.write().apply(service("late"));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(observer.0.load(Ordering::SeqCst), 2);

        task.abort();
    }
}
