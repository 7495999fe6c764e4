//! HTTP endpoint that feeds tunneled frames to the backend agent

use crate::agent::{AgentLink, PendingKind, PendingResponse, Upstream};
use crate::error::{Error, Result};
use crate::logging::{JsonlWriter, LogEvent};
use crate::protocol::{AgentMessage, FrameBuffer};
use crate::ssh::AuthorizationContext;
use crate::tunnel::{COMMAND_HEADER, FRAME_CONTENT_TYPE};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::BytesMut;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span, warn};

use super::auth::{AuthHeader, CredentialCheck};

pub const DEFAULT_PATH: &str = "/ssh-agent";

pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

const CHALLENGE: &str = "Basic realm=\"socketauth\"";

#[derive(Clone)]
struct GatewayState {
    upstream: Upstream,
    credentials: Arc<dyn CredentialCheck>,
    audit: Option<Arc<JsonlWriter>>,
}

impl GatewayState {
    fn audit(&self, event: LogEvent) {
        if let Some(audit) = &self.audit
            && let Err(e) = audit.write(&event)
        {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    /// Forward `requests` over a fresh backend link and collect the replies
    ///
    /// The link lives only for this call, so concurrent gateway requests
    /// never share a correlation queue.
    async fn exchange(
        &self,
        requests: Vec<AgentMessage>,
        context: Arc<AuthorizationContext>,
    ) -> Result<Bytes> {
        if requests.is_empty() {
            return Ok(Bytes::new());
        }

        // Restricted requests are answered here, so a body made only of them
        // never dials the backend
        let needs_backend = requests
            .iter()
            .any(|r| PendingKind::for_request(r.msg_type).is_some());
        let link = if needs_backend {
            Some(AgentLink::connect(&self.upstream, self.audit.clone()).await?)
        } else {
            None
        };

        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let response = match &link {
                Some(link) => link.forward(request, Arc::clone(&context)).await?,
                None => {
                    warn!(msg_type = request.msg_type.as_str(), "Rejecting restricted agent request");
                    PendingResponse::restricted()
                }
            };
            pending.push(response);
        }

        let responses =
            futures::future::try_join_all(pending.into_iter().map(|p| p.response())).await?;

        let mut body = BytesMut::new();
        for response in &responses {
            body.extend_from_slice(&response.encode());
        }
        Ok(body.freeze())
    }
}

/// Authenticating HTTP front for the backend agent
pub struct Gateway {
    state: GatewayState,
    path: String,
    max_body_size: usize,
}

impl Gateway {
    pub fn new(upstream: Upstream, credentials: Arc<dyn CredentialCheck>) -> Self {
        Self {
            state: GatewayState {
                upstream,
                credentials,
                audit: None,
            },
            path: DEFAULT_PATH.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Serve the tunnel on `path` instead of `/ssh-agent`
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Record decisions to a JSONL audit log
    pub fn with_audit(mut self, audit: Arc<JsonlWriter>) -> Self {
        self.state.audit = Some(audit);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.path, post(tunnel).fallback(not_found))
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let endpoint = match listener.local_addr() {
            Ok(addr) => format!("{}{}", addr, self.path),
            Err(_) => self.path.clone(),
        };
        info!(
            endpoint = %endpoint,
            upstream = %self.state.upstream.socket_path().display(),
            "Gateway listening"
        );
        self.state.audit(LogEvent::server_start(&endpoint));

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        info!(endpoint = %endpoint, "Gateway stopped");
        self.state.audit(LogEvent::server_stop(&endpoint));
        result.map_err(Error::from)
    }
}

async fn tunnel(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let credentials = match AuthHeader::from_headers(&headers) {
        AuthHeader::Basic(credentials) => credentials,
        AuthHeader::Missing => {
            debug!("Tunnel request without credentials");
            state.audit(LogEvent::auth_failure("missing credentials"));
            return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, CHALLENGE)]).into_response();
        }
        AuthHeader::Malformed => {
            warn!("Tunnel request with malformed Authorization header");
            state.audit(LogEvent::auth_failure("malformed credentials"));
            return StatusCode::FORBIDDEN.into_response();
        }
    };
    if !state.credentials.verify(&credentials) {
        warn!(username = %credentials.username, "Tunnel request with invalid credentials");
        state.audit(
            LogEvent::auth_failure("invalid credentials").with_username(&credentials.username),
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let command = match command_from_headers(&headers) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Rejecting command header");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let context = Arc::new(AuthorizationContext::from_args(&command));

    let requests = match decode_body(&body) {
        Ok(requests) => requests,
        Err(e) => {
            debug!(error = %e, "Rejecting request body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let span = info_span!(
        "tunnel",
        username = %credentials.username,
        host = ?context.host,
        repository = ?context.repository,
        frames = requests.len(),
    );
    async move {
        state.audit(LogEvent::tunnel_request(&credentials.username, &context));
        match state.exchange(requests, context).await {
            Ok(body) => {
                debug!(bytes = body.len(), "Tunnel exchange complete");
                (StatusCode::OK, [(CONTENT_TYPE, FRAME_CONTENT_TYPE)], body).into_response()
            }
            Err(e) => {
                warn!(error = %e, "Tunnel exchange failed");
                state.audit(LogEvent::error(e.to_string()));
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// ssh arguments carried by the command header; absent means none
fn command_from_headers(headers: &HeaderMap) -> Result<Vec<String>> {
    let Some(value) = headers.get(COMMAND_HEADER) else {
        return Ok(Vec::new());
    };
    let raw = std::str::from_utf8(value.as_bytes())
        .map_err(|e| Error::InvalidMessage(format!("Command header is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(raw)?)
}

/// The body must hold whole frames and nothing else
fn decode_body(body: &[u8]) -> Result<Vec<AgentMessage>> {
    let mut frames = FrameBuffer::new();
    frames.extend(body);
    let requests = frames.decode()?;
    if !frames.is_empty() {
        return Err(Error::InvalidMessage(format!(
            "Body ends with a partial frame of {} bytes",
            frames.pending_len()
        )));
    }
    Ok(requests)
}
