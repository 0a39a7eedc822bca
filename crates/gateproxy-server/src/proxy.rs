//! Forwarding requests to the upstream.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use tracing::{debug, instrument};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;

const X_USER_AGENT: HeaderName = HeaderName::from_static("x-user-agent");
const X_REMOTE_IP: HeaderName = HeaderName::from_static("x-remote-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// A buffered upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The upstream API and how requests are rewritten on the way to it.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    user_agent: HeaderValue,
    override_origin: Option<HeaderValue>,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let user_agent = HeaderValue::from_str(&config.user_agent)?;
        let override_origin = config
            .override_origin
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()?;

        Ok(Self {
            client,
            base,
            timeout: config.timeout,
            user_agent,
            override_origin,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Joins the inbound path and query onto the upstream base URL.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut target = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        let request_path = uri.path().trim_start_matches('/');
        target.set_path(&format!("{base_path}/{request_path}"));
        target.set_query(uri.query());
        target
    }

    /// Builds the outbound header set from the inbound one.
    ///
    /// Hop-by-hop headers are dropped. The caller's `User-Agent` moves to
    /// `x-user-agent` and is replaced by the gateway's own; `x-forwarded-for`
    /// becomes `x-remote-ip`, falling back to the peer address.
    pub fn outbound_headers(&self, inbound: &HeaderMap, peer: Option<SocketAddr>) -> HeaderMap {
        let mut headers = strip_hop_by_hop(inbound);
        headers.remove(header::CONTENT_LENGTH);

        headers.remove(X_USER_AGENT);
        if let Some(agent) = headers.remove(header::USER_AGENT) {
            headers.insert(X_USER_AGENT, agent);
        }
        headers.insert(header::USER_AGENT, self.user_agent.clone());

        let remote_ip = headers.remove(X_FORWARDED_FOR).or_else(|| {
            peer.and_then(|addr| HeaderValue::from_str(&addr.ip().to_string()).ok())
        });
        match remote_ip {
            Some(ip) => {
                headers.insert(X_REMOTE_IP, ip);
            }
            None => {
                headers.remove(X_REMOTE_IP);
            }
        }

        if let Some(origin) = &self.override_origin {
            headers.insert(header::ORIGIN, origin.clone());
        }
        headers
    }

    /// Sends the request upstream and buffers the response.
    #[instrument(skip(self, headers, body), fields(upstream = %self.base))]
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, GatewayError> {
        let target = self.target_url(uri);
        debug!(target_url = %target, "Forwarding request");

        let response = self
            .client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        debug!(status = %status, bytes = body.len(), "Upstream responded");
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout(self.timeout)
        } else if e.is_connect() {
            GatewayError::Upstream(format!("Failed to connect to upstream: {e}"))
        } else {
            GatewayError::Upstream(format!("Upstream request failed: {e}"))
        }
    }
}

/// Copies `headers` without hop-by-hop headers, including any the
/// `Connection` header names.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name.as_str())
            || connection_listed.iter().any(|listed| listed == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Checks if a header is a hop-by-hop header that should not be forwarded.
///
/// Hop-by-hop headers are defined in RFC 2616 Section 13.5.1.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host" // Host is set from the upstream URL
    )
}
