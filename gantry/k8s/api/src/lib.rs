//! Kubernetes object model watched by gantry: the HTTPProxy and
//! TLSCertificateDelegation custom resources, plus re-exports of the core
//! types so downstream crates need not juggle `k8s-openapi` paths.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod delegation;
mod httpproxy;

pub use self::delegation::{
    CertificateDelegation, TLSCertificateDelegation, TLSCertificateDelegationSpec,
};
pub use self::httpproxy::{
    CORSPolicy, DownstreamValidation, HTTPProxy, HTTPProxySpec, HTTPProxyStatus,
    HeaderMatchCondition, Include, LoadBalancerPolicy, MatchCondition, RetryPolicy, Route,
    Service as RouteService, TimeoutPolicy, VirtualHost, TLS,
};

pub use k8s_openapi::{
    api::{
        core::v1::{Secret, Service, ServicePort, ServiceSpec},
        discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{apis::meta::v1::Time, util::intstr::IntOrString},
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams},
    Client, Resource, ResourceExt,
};

/// Label linking an EndpointSlice back to the Service it materializes.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Secret type carrying a certificate chain and private key.
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// Secret type for everything else; relevant when carrying a CA bundle.
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
