use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use silverline_assist::MessageKind;
use silverline_types::{BucketConfig, RateLimitConfig};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Header carrying the carrier's request signature.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Hard cap on a buffered webhook body, above the configurable limit.
const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;

/// Buckets idle this long are dropped when the table grows large.
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(3600);

/// Which token bucket a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    Webhook,
    Signup,
    Default,
}

impl BucketKind {
    /// Picks the bucket for a request path. `None` means the path is not limited.
    pub fn for_path(path: &str) -> Option<Self> {
        if path == "/health" {
            None
        } else if path.starts_with("/webhooks/") {
            Some(Self::Webhook)
        } else if path.starts_with("/api/signups") {
            Some(Self::Signup)
        } else {
            Some(Self::Default)
        }
    }

    fn config(self, policy: &RateLimitConfig) -> &BucketConfig {
        match self {
            Self::Webhook => &policy.webhook,
            Self::Signup => &policy.signup,
            Self::Default => &policy.default,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// In-memory token buckets keyed by bucket kind and client IP.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<(BucketKind, IpAddr), Bucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one token. On rejection returns how long until a token is back.
    pub fn check(&self, kind: BucketKind, ip: IpAddr, config: &BucketConfig) -> Result<(), Duration> {
        self.check_at(kind, ip, config, Instant::now())
    }

    fn check_at(
        &self,
        kind: BucketKind,
        ip: IpAddr,
        config: &BucketConfig,
        now: Instant,
    ) -> Result<(), Duration> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };

        if state.len() > 10_000 {
            state.retain(|_, bucket| now.duration_since(bucket.updated) <= IDLE_BUCKET_TTL);
        }

        let capacity = f64::from(config.capacity);
        let rate = config.refill_per_sec();
        let bucket = state.entry((kind, ip)).or_insert(Bucket {
            tokens: capacity,
            updated: now,
        });

        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / rate))
        } else {
            Err(IDLE_BUCKET_TTL)
        }
    }
}

/// Rate limiting middleware.
///
/// Runs before any handler, so a rejected request never touches a session.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let Some(kind) = BucketKind::for_path(req.uri().path()) else {
        return Ok(next.run(req).await);
    };

    let ip = match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip(),
        // Missing peer info means the server was started without connect info.
        None => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    if let Err(wait) = state
        .rate_limiter
        .check(kind, ip, kind.config(&state.rate_limit))
    {
        tracing::warn!(bucket = ?kind, path = %req.uri().path(), "rate limit exceeded");
        let retry_after = wait.as_secs().max(1);
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "rate limit exceeded" })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return Ok(response);
    }

    Ok(next.run(req).await)
}

/// Checks carrier request signatures.
///
/// The signed string is the full public URL of the webhook followed by every
/// form parameter, sorted by name, as `name` then `value` with no separators.
/// The signature is the base64 HMAC-SHA1 of that string under the account's
/// auth token.
#[derive(Clone)]
pub struct SignatureVerifier {
    auth_token: String,
    public_base_url: Option<String>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("auth_token", &"[redacted]")
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(auth_token: impl Into<String>, public_base_url: Option<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Computes the signature the carrier would send for `url` and `params`.
    pub fn sign(&self, url: &str, params: &[(String, String)]) -> String {
        self.mac(url, params)
            .map(|mac| base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of `signature` against `url` and `params`.
    pub fn verify(&self, url: &str, params: &[(String, String)], signature: &str) -> bool {
        if self.auth_token.is_empty() {
            return false;
        }
        let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
            return false;
        };
        self.mac(url, params)
            .is_some_and(|mac| mac.verify_slice(&provided).is_ok())
    }

    /// Rebuilds the URL the carrier called, from the configured public base
    /// URL or else from the forwarding headers.
    pub fn request_url(&self, headers: &HeaderMap, path_and_query: &str) -> Option<String> {
        if let Some(base) = &self.public_base_url {
            return Some(format!("{base}{path_and_query}"));
        }
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|v| v.to_str().ok())?;
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        Some(format!("{scheme}://{host}{path_and_query}"))
    }

    fn mac(&self, url: &str, params: &[(String, String)]) -> Option<Hmac<Sha1>> {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut mac = Hmac::<Sha1>::new_from_slice(self.auth_token.as_bytes()).ok()?;
        mac.update(url.as_bytes());
        for (name, value) in sorted {
            mac.update(name.as_bytes());
            mac.update(value.as_bytes());
        }
        Some(mac)
    }
}

fn forbidden(reason: &str) -> Response {
    tracing::warn!(reason, "rejected webhook signature");
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": "invalid request signature" })),
    )
        .into_response()
}

/// Rejects oversized webhook bodies and webhooks whose signature does not
/// match, before any handler runs.
///
/// The signature check is skipped when the server is configured without a
/// verifier; the body limit always applies.
pub async fn signature_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_WEBHOOK_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Err(StatusCode::PAYLOAD_TOO_LARGE),
    };

    let within_limit = {
        let text = String::from_utf8_lossy(&bytes);
        state
            .orchestrator
            .services()
            .limits
            .validate(&text, MessageKind::WebhookBody)
            .await
    };
    if let Err(e) = within_limit {
        return Ok((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response());
    }

    let Some(verifier) = state.signature.as_ref() else {
        return Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await);
    };

    let Some(signature) = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(forbidden("missing signature header"));
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let Some(url) = verifier.request_url(&parts.headers, path_and_query) else {
        return Ok(forbidden("cannot reconstruct request url"));
    };

    let params: Vec<(String, String)> = form_urlencoded::parse(&bytes).into_owned().collect();
    if !verifier.verify(&url, &params, signature) {
        return Ok(forbidden("signature mismatch"));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}
