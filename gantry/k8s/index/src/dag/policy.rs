//! Translation of route and virtual-host policies from their external forms
//! (Ingress annotations, HTTPProxy fields) into DAG policy values.

use gantry_core::duration::GoDuration;
use gantry_core::timeout::TimeoutError;
use gantry_core::{CorsPolicy, LoadBalancerPolicy, RetryPolicy, Timeout, TimeoutPolicy};
use gantry_k8s_api::{self as k8s, ObjectMeta};
use tracing::warn;

/// Annotation prefixes in priority order: the current project prefix wins
/// over the legacy one when both are present.
const ANNOTATION_PREFIXES: [&str; 2] = ["projectcontour.io/", "contour.heptio.com/"];

/// Looks `name` up under each recognized prefix, most preferred first.
pub(crate) fn annotation<'a>(meta: &'a ObjectMeta, name: &str) -> Option<&'a str> {
    let annotations = meta.annotations.as_ref()?;
    ANNOTATION_PREFIXES
        .iter()
        .find_map(|prefix| annotations.get(&format!("{prefix}{name}")))
        .map(String::as_str)
}

/// Retry policy from Ingress annotations. Without `retry-on` there is no
/// policy at all; unlike HTTPProxy, an explicit retry count of zero passes
/// through unchanged.
pub(crate) fn ingress_retry_policy(ingress: &k8s::Ingress) -> Option<RetryPolicy> {
    let retry_on = annotation(&ingress.metadata, "retry-on")?;
    if retry_on.is_empty() {
        return None;
    }

    let num_retries = annotation(&ingress.metadata, "num-retries")
        .and_then(|raw| {
            raw.parse().map_err(|_| warn!(%raw, "ignoring unparsable num-retries annotation")).ok()
        })
        .unwrap_or(0);

    let per_try_timeout = annotation(&ingress.metadata, "per-try-timeout")
        .map(parse_per_try_timeout)
        .unwrap_or_default();

    Some(RetryPolicy {
        retry_on: retry_on.to_string(),
        num_retries,
        per_try_timeout,
        retriable_status_codes: Vec::new(),
    })
}

/// Retry policy from an HTTPProxy route. An empty policy object still means
/// "retry": RetryOn defaults to `5xx` and a zero count is promoted to one.
pub(crate) fn retry_policy(policy: Option<&k8s::RetryPolicy>) -> Option<RetryPolicy> {
    let policy = policy?;

    let retry_on = if policy.retry_on.is_empty() {
        "5xx".to_string()
    } else {
        policy.retry_on.join(",")
    };

    Some(RetryPolicy {
        retry_on,
        num_retries: policy.count.max(1),
        per_try_timeout: parse_per_try_timeout(&policy.per_try_timeout),
        retriable_status_codes: policy.retriable_status_codes.clone(),
    })
}

/// `0s` (and the empty string) fall back to the default-timeout sentinel; a
/// string that does not parse is ignored rather than invalidating the object.
fn parse_per_try_timeout(raw: &str) -> Timeout {
    match Timeout::parse(raw) {
        Ok(timeout) => timeout,
        Err(error) => {
            warn!(%raw, %error, "ignoring unparsable per-try timeout");
            Timeout::Default
        }
    }
}

/// Timeout policy from an HTTPProxy route. Unparsable values are hard
/// validation errors for the enclosing object.
pub(crate) fn timeout_policy(
    policy: Option<&k8s::TimeoutPolicy>,
) -> Result<TimeoutPolicy, TimeoutError> {
    let Some(policy) = policy else {
        return Ok(TimeoutPolicy::default());
    };
    Ok(TimeoutPolicy {
        response: Timeout::parse(&policy.response)?,
        idle: Timeout::parse(&policy.idle)?,
    })
}

pub(crate) fn load_balancer_policy(
    policy: Option<&k8s::LoadBalancerPolicy>,
) -> Option<LoadBalancerPolicy> {
    policy.and_then(|p| LoadBalancerPolicy::parse(&p.strategy))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum CorsError {
    #[error("Spec.VirtualHost.CORSPolicy max age is invalid")]
    InvalidMaxAge,

    #[error("Spec.VirtualHost.CORSPolicy max age cannot be negative")]
    NegativeMaxAge,
}

/// CORS policy from an HTTPProxy virtual host. MaxAge renders to whole
/// seconds; `0s` renders to `"0"`, which disables preflight caching; a
/// negative value rejects the virtual host.
pub(crate) fn cors_policy(policy: Option<&k8s::CORSPolicy>) -> Result<Option<CorsPolicy>, CorsError> {
    let Some(policy) = policy else {
        return Ok(None);
    };

    let max_age = match policy.max_age.as_deref() {
        None | Some("") => None,
        Some(raw) => {
            let parsed: GoDuration = raw.parse().map_err(|_| CorsError::InvalidMaxAge)?;
            if parsed.is_negative() {
                return Err(CorsError::NegativeMaxAge);
            }
            Some(parsed.magnitude().as_secs().to_string())
        }
    };

    Ok(Some(CorsPolicy {
        allow_origin: policy.allow_origin.clone(),
        allow_credentials: policy.allow_credentials,
        allow_methods: policy.allow_methods.clone(),
        allow_headers: policy.allow_headers.clone(),
        expose_headers: policy.expose_headers.clone(),
        max_age,
    }))
}
