//! Wire types for the `gantry.xds.v1` configuration-discovery protocol.
//!
//! Messages are written out as prost types rather than generated at build
//! time; the service glue below follows the shape tonic's code generator
//! produces so the server composes with `tonic::transport::Server` like any
//! generated service.

/// Type URLs, one per resource family. Opaque strings as far as the protocol
/// is concerned; an unknown one is a fatal stream error.
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/gantry.xds.v1.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/gantry.xds.v1.RouteConfiguration";
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/gantry.xds.v1.Cluster";
pub const ENDPOINT_TYPE_URL: &str = "type.googleapis.com/gantry.xds.v1.ClusterLoadAssignment";
pub const SECRET_TYPE_URL: &str = "type.googleapis.com/gantry.xds.v1.Secret";

/// Packs a message into the wire union type under the given type URL.
pub fn to_any<M: prost::Message>(type_url: &str, message: &M) -> prost_types::Any {
    prost_types::Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

pub fn proto_duration(d: std::time::Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryRequest {
    /// Version the peer last acked; accepted but not acted upon.
    #[prost(string, tag = "1")]
    pub version_info: String,
    /// When non-empty, the response is narrowed to these resources.
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    #[prost(string, tag = "6")]
    pub response_nonce: String,
    #[prost(string, tag = "7")]
    pub type_url: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryResponse {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<prost_types::Any>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SocketAddress {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(uint32, tag = "2")]
    pub port_value: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Listener {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub address: Option<SocketAddress>,
    /// Listener-level filters applied before a chain is chosen, e.g. the
    /// TLS inspector that sniffs SNI.
    #[prost(string, repeated, tag = "3")]
    pub listener_filters: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub filter_chains: Vec<FilterChain>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterChain {
    /// SNI names this chain matches. Empty matches anything, which is how
    /// the fallback chain catches unmatched names; it must be ordered last.
    #[prost(string, repeated, tag = "1")]
    pub server_names: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub tls_context: Option<DownstreamTlsContext>,
    #[prost(message, optional, tag = "3")]
    pub http: Option<HttpConnectionManager>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpConnectionManager {
    /// Name of the route configuration served to this chain.
    #[prost(string, tag = "1")]
    pub route_config_name: String,
    #[prost(string, tag = "2")]
    pub stat_prefix: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TlsProtocol {
    Auto = 0,
    V1_2 = 1,
    V1_3 = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownstreamTlsContext {
    /// Versioned secret name; resolved via the secret resource family.
    #[prost(string, tag = "1")]
    pub secret_name: String,
    #[prost(enumeration = "TlsProtocol", tag = "2")]
    pub min_protocol_version: i32,
    #[prost(message, optional, tag = "3")]
    pub validation_context: Option<CertificateValidationContext>,
    #[prost(string, repeated, tag = "4")]
    pub alpn_protocols: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CertificateValidationContext {
    #[prost(bytes = "vec", tag = "1")]
    pub trusted_ca: Vec<u8>,
    #[prost(string, repeated, tag = "2")]
    pub match_subject_alt_names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteConfiguration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VirtualHost {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub domains: Vec<String>,
    #[prost(message, repeated, tag = "3")]
    pub routes: Vec<Route>,
    #[prost(message, optional, tag = "4")]
    pub cors: Option<CorsPolicy>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(message, optional, tag = "1")]
    pub r#match: Option<RouteMatch>,
    #[prost(oneof = "route::Action", tags = "2, 3")]
    pub action: Option<route::Action>,
}

pub mod route {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        #[prost(message, tag = "2")]
        Route(super::RouteAction),
        #[prost(message, tag = "3")]
        Redirect(super::RedirectAction),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteMatch {
    #[prost(oneof = "route_match::PathSpecifier", tags = "1, 2, 3")]
    pub path_specifier: Option<route_match::PathSpecifier>,
    #[prost(message, repeated, tag = "4")]
    pub headers: Vec<HeaderMatcher>,
}

pub mod route_match {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PathSpecifier {
        #[prost(string, tag = "1")]
        Prefix(String),
        #[prost(string, tag = "2")]
        Path(String),
        #[prost(string, tag = "3")]
        SafeRegex(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderMatcher {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "header_matcher::Match", tags = "2, 3, 4")]
    pub r#match: Option<header_matcher::Match>,
    #[prost(bool, tag = "5")]
    pub invert_match: bool,
}

pub mod header_matcher {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Match {
        #[prost(bool, tag = "2")]
        Present(bool),
        #[prost(string, tag = "3")]
        Exact(String),
        #[prost(string, tag = "4")]
        Contains(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteAction {
    #[prost(oneof = "route_action::ClusterSpecifier", tags = "1, 2")]
    pub cluster_specifier: Option<route_action::ClusterSpecifier>,
    #[prost(message, optional, tag = "3")]
    pub timeout: Option<prost_types::Duration>,
    #[prost(message, optional, tag = "4")]
    pub idle_timeout: Option<prost_types::Duration>,
    #[prost(message, optional, tag = "5")]
    pub retry_policy: Option<RetryPolicy>,
}

pub mod route_action {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ClusterSpecifier {
        #[prost(string, tag = "1")]
        Cluster(String),
        #[prost(message, tag = "2")]
        WeightedClusters(super::WeightedCluster),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedCluster {
    #[prost(message, repeated, tag = "1")]
    pub clusters: Vec<ClusterWeight>,
    #[prost(uint32, tag = "2")]
    pub total_weight: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterWeight {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub weight: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RedirectAction {
    #[prost(bool, tag = "1")]
    pub https_redirect: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryPolicy {
    #[prost(string, tag = "1")]
    pub retry_on: String,
    #[prost(uint32, tag = "2")]
    pub num_retries: u32,
    #[prost(message, optional, tag = "3")]
    pub per_try_timeout: Option<prost_types::Duration>,
    #[prost(uint32, repeated, tag = "4")]
    pub retriable_status_codes: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CorsPolicy {
    #[prost(string, repeated, tag = "1")]
    pub allow_origin: Vec<String>,
    #[prost(string, tag = "2")]
    pub allow_methods: String,
    #[prost(string, tag = "3")]
    pub allow_headers: String,
    #[prost(string, tag = "4")]
    pub expose_headers: String,
    /// Whole seconds; `"0"` disables preflight caching, empty leaves the
    /// header unset.
    #[prost(string, tag = "5")]
    pub max_age: String,
    #[prost(bool, tag = "6")]
    pub allow_credentials: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LbPolicy {
    RoundRobin = 0,
    WeightedLeastRequest = 1,
    Random = 2,
    Cookie = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cluster {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "LbPolicy", tag = "2")]
    pub lb_policy: i32,
    #[prost(message, optional, tag = "3")]
    pub connect_timeout: Option<prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterLoadAssignment {
    #[prost(string, tag = "1")]
    pub cluster_name: String,
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalityLbEndpoints {
    #[prost(message, repeated, tag = "1")]
    pub lb_endpoints: Vec<LbEndpoint>,
    /// Weight zero excludes the entry from balancing but keeps it visible
    /// for accounting.
    #[prost(uint32, optional, tag = "2")]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LbEndpoint {
    #[prost(message, optional, tag = "1")]
    pub address: Option<SocketAddress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Secret {
    /// Versioned `namespace/name/<digest>` form.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub tls_certificate: Option<TlsCertificate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TlsCertificate {
    #[prost(bytes = "vec", tag = "1")]
    pub certificate_chain: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub private_key: Vec<u8>,
}

/// Server implementation for the `gantry.xds.v1.Discovery` service, written
/// to match tonic's generated shape.
pub mod discovery_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::*;

    #[async_trait]
    pub trait Discovery: std::marker::Send + std::marker::Sync + 'static {
        /// Server streaming response type for the StreamResources method.
        type StreamResourcesStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::DiscoveryResponse, tonic::Status>,
            > + std::marker::Send
            + 'static;

        /// One bidirectional stream per connected proxy; requests select the
        /// resource family, responses push configuration on change.
        async fn stream_resources(
            &self,
            request: tonic::Request<tonic::Streaming<super::DiscoveryRequest>>,
        ) -> std::result::Result<tonic::Response<Self::StreamResourcesStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct DiscoveryServer<T> {
        inner: Arc<T>,
        accept_compression_encodings: EnabledCompressionEncodings,
        send_compression_encodings: EnabledCompressionEncodings,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }

    impl<T> DiscoveryServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self {
                inner,
                accept_compression_encodings: Default::default(),
                send_compression_encodings: Default::default(),
                max_decoding_message_size: None,
                max_encoding_message_size: None,
            }
        }

        pub fn with_interceptor<F>(inner: T, interceptor: F) -> InterceptedService<Self, F>
        where
            F: tonic::service::Interceptor,
        {
            InterceptedService::new(Self::new(inner), interceptor)
        }

        /// Enable decompressing requests with the given encoding.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.accept_compression_encodings.enable(encoding);
            self
        }

        /// Compress responses with the given encoding, if the client supports it.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.send_compression_encodings.enable(encoding);
            self
        }

        /// Limits the maximum size of a decoded message.
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }

        /// Limits the maximum size of an encoded message.
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for DiscoveryServer<T>
    where
        T: Discovery,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/gantry.xds.v1.Discovery/StreamResources" => {
                    #[allow(non_camel_case_types)]
                    struct StreamResourcesSvc<T: Discovery>(pub Arc<T>);
                    impl<T: Discovery>
                        tonic::server::StreamingService<super::DiscoveryRequest>
                        for StreamResourcesSvc<T>
                    {
                        type Response = super::DiscoveryResponse;
                        type ResponseStream = T::StreamResourcesStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<super::DiscoveryRequest>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as Discovery>::stream_resources(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StreamResourcesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers.insert(
                        tonic::Status::GRPC_STATUS,
                        (tonic::Code::Unimplemented as i32).into(),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        tonic::metadata::GRPC_CONTENT_TYPE,
                    );
                    Ok(response)
                }),
            }
        }
    }

    impl<T> Clone for DiscoveryServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self {
                inner,
                accept_compression_encodings: self.accept_compression_encodings,
                send_compression_encodings: self.send_compression_encodings,
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }

    pub const SERVICE_NAME: &str = "gantry.xds.v1.Discovery";

    impl<T> tonic::server::NamedService for DiscoveryServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
