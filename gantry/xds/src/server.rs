//! The streaming discovery server.
//!
//! The protocol loop is written against a narrow stream trait so it can be
//! exercised with in-memory streams; the tonic adapter at the bottom bridges
//! it onto the generated-style service from [`crate::api`]. Each stream picks
//! its resource family with its first request and is then push-driven: the
//! loop registers a waker with the family's notifier, waits for a version
//! edge, and sends the current state. A slow peer therefore skips
//! intermediate versions instead of queueing them, and never holds up any
//! other stream.

use crate::{api, Resource};
use ahash::AHashMap;
use anyhow::{anyhow, bail, Context as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// One end of a discovery stream, as seen by the protocol loop.
#[async_trait::async_trait]
pub trait DiscoveryStream: Send {
    /// The next request; `None` on orderly end of input.
    async fn recv(&mut self) -> anyhow::Result<Option<api::DiscoveryRequest>>;

    async fn send(&mut self, response: api::DiscoveryResponse) -> anyhow::Result<()>;
}

pub struct DiscoveryHandler {
    resources: AHashMap<&'static str, Arc<dyn Resource>>,
    stream_count: AtomicU64,
}

impl DiscoveryHandler {
    pub fn new(resources: Vec<Arc<dyn Resource>>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.type_url(), r)).collect(),
            stream_count: AtomicU64::new(0),
        }
    }

    /// Runs one stream to completion. Every error path releases the waker
    /// registration: the single-slot receiver is dropped with the loop, and
    /// the notifier sheds the dead sender on its next bump.
    pub async fn stream<S: DiscoveryStream>(
        &self,
        stream: &mut S,
        drain: drain::Watch,
    ) -> anyhow::Result<()> {
        let id = self.stream_count.fetch_add(1, Ordering::SeqCst) + 1;

        // The first request selects the resource family for the whole
        // stream; no further requests are needed.
        let Some(request) = stream.recv().await? else {
            return Ok(());
        };
        let resource = self
            .resources
            .get(request.type_url.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("no resource registered for typeURL {:?}", request.type_url))?;
        debug!(id, type_url = %request.type_url, names = ?request.resource_names, "stream opened");

        let names = request.resource_names;
        let mut last = 0u64;
        let mut nonce = 0u64;

        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            // Single-slot waker, re-registered each pass (edge-triggered).
            let (waker, mut wakeup) = mpsc::channel(1);
            resource.register(waker, last, &names);

            tokio::select! {
                version = wakeup.recv() => match version {
                    Some(version) => last = version,
                    None => return Ok(()),
                },
                _ = &mut shutdown => {
                    debug!(id, "stream cancelled by shutdown");
                    return Ok(());
                }
            }

            let resources = if names.is_empty() {
                resource.contents()
            } else {
                resource.query(&names)
            };
            for any in &resources {
                if any.type_url.is_empty() {
                    bail!(
                        "invalid resource in response for typeURL {:?}",
                        request.type_url
                    );
                }
            }

            nonce += 1;
            stream
                .send(api::DiscoveryResponse {
                    version_info: last.to_string(),
                    resources,
                    type_url: request.type_url.clone(),
                    nonce: nonce.to_string(),
                })
                .await
                .context("sending discovery response")?;
        }
    }
}

/// Tonic-facing wrapper: spawns one task per stream and feeds responses
/// through a bounded channel so a slow peer only stalls itself.
#[derive(Clone)]
pub struct GrpcServer {
    handler: Arc<DiscoveryHandler>,
    drain: drain::Watch,
}

impl GrpcServer {
    pub fn new(handler: Arc<DiscoveryHandler>, drain: drain::Watch) -> Self {
        Self { handler, drain }
    }

    pub fn svc(self) -> api::discovery_server::DiscoveryServer<Self> {
        api::discovery_server::DiscoveryServer::new(self)
    }
}

#[async_trait::async_trait]
impl api::discovery_server::Discovery for GrpcServer {
    type StreamResourcesStream =
        ReceiverStream<Result<api::DiscoveryResponse, tonic::Status>>;

    async fn stream_resources(
        &self,
        request: tonic::Request<tonic::Streaming<api::DiscoveryRequest>>,
    ) -> Result<tonic::Response<Self::StreamResourcesStream>, tonic::Status> {
        let requests = request.into_inner();
        let (responses, rx) = mpsc::channel(1);
        let handler = self.handler.clone();
        let drain = self.drain.clone();

        tokio::spawn(async move {
            let mut stream = TonicStream {
                requests,
                responses: responses.clone(),
            };
            if let Err(error) = handler.stream(&mut stream, drain).await {
                debug!(%error, "discovery stream failed");
                let _ = responses
                    .send(Err(tonic::Status::unknown(format!("{error:#}"))))
                    .await;
            }
        });

        Ok(tonic::Response::new(ReceiverStream::new(rx)))
    }
}

struct TonicStream {
    requests: tonic::Streaming<api::DiscoveryRequest>,
    responses: mpsc::Sender<Result<api::DiscoveryResponse, tonic::Status>>,
}

#[async_trait::async_trait]
impl DiscoveryStream for TonicStream {
    async fn recv(&mut self) -> anyhow::Result<Option<api::DiscoveryRequest>> {
        self.requests.message().await.map_err(Into::into)
    }

    async fn send(&mut self, response: api::DiscoveryResponse) -> anyhow::Result<()> {
        self.responses
            .send(Ok(response))
            .await
            .map_err(|_| anyhow!("stream closed by peer"))
    }
}
