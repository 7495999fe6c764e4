//! Correlating link to the backend SSH agent
//!
//! The agent protocol has no request IDs: the agent answers requests in the
//! order it received them. An `AgentLink` owns one backend connection and a
//! FIFO of pending requests, so each arriving response is paired with the
//! oldest outstanding request. Writes and enqueues happen under one lock,
//! which keeps queue order identical to wire order.

use crate::agent::Upstream;
use crate::error::{Error, Result};
use crate::logging::{JsonlWriter, LogEvent};
use crate::protocol::{AgentCodec, AgentMessage, FrameBuffer, Identity, MessageType};
use crate::scope::IdentityScopeFilter;
use crate::ssh::AuthorizationContext;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Read chunk size for backend responses
const READ_CHUNK_SIZE: usize = 8192;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Response kind a pending request is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Identities,
    Sign,
}

impl PendingKind {
    /// Kind for a client request, or `None` when it must not reach the backend
    pub fn for_request(msg_type: MessageType) -> Option<Self> {
        match msg_type {
            MessageType::RequestIdentities => Some(PendingKind::Identities),
            MessageType::SignRequest => Some(PendingKind::Sign),
            _ => None,
        }
    }

    fn expected(&self) -> MessageType {
        match self {
            PendingKind::Identities => MessageType::IdentitiesAnswer,
            PendingKind::Sign => MessageType::SignResponse,
        }
    }
}

/// One request written to the backend and not yet answered
struct PendingRequest {
    kind: PendingKind,
    context: Arc<AuthorizationContext>,
    reply: oneshot::Sender<Result<AgentMessage>>,
}

#[derive(Default)]
struct LinkState {
    pending: VecDeque<PendingRequest>,
    closed: bool,
}

/// Shared between the link handle and its reader task
struct Shared {
    state: Mutex<LinkState>,
    audit: Option<Arc<JsonlWriter>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        // A poisoned queue is still structurally valid
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the link and fail every outstanding request
    fn fail_all(&self, make_error: fn() -> Error) {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending agent requests");
        }
        for request in pending {
            let _ = request.reply.send(Err(make_error()));
        }
    }

    fn dispatch(&self, response: AgentMessage) {
        let Some(request) = self.lock().pending.pop_front() else {
            warn!(
                msg_type = response.msg_type.as_str(),
                "Dropping orphaned response from upstream agent"
            );
            return;
        };

        let result = self.correlate(&request, response);
        if let Err(e) = &result {
            warn!(error = %e, "Agent response rejected");
        }
        if request.reply.send(result).is_err() {
            trace!("Caller went away before the agent responded");
        }
    }

    fn correlate(&self, request: &PendingRequest, response: AgentMessage) -> Result<AgentMessage> {
        match (request.kind, response.msg_type) {
            (_, msg_type) if msg_type.is_status() => Ok(response),
            (PendingKind::Identities, MessageType::IdentitiesAnswer) => {
                let scoped = IdentityScopeFilter::filter(&response, &request.context)?;
                self.audit_listing(&request.context, &scoped.allowed, &scoped.dropped);
                Ok(scoped.message)
            }
            (PendingKind::Sign, MessageType::SignResponse) => Ok(response),
            (kind, msg_type) => Err(Error::Correlation(format!(
                "expected {} but upstream sent {}",
                kind.expected().as_str(),
                msg_type.as_str()
            ))),
        }
    }

    fn audit_listing(&self, context: &AuthorizationContext, allowed: &[Identity], dropped: &[Identity]) {
        let Some(audit) = &self.audit else {
            return;
        };
        let events = dropped
            .iter()
            .map(|id| LogEvent::key_filtered(id, context))
            .chain(std::iter::once(LogEvent::identities_response(
                context,
                allowed.len(),
                dropped.len(),
            )));
        for event in events {
            if let Err(e) = audit.write(&event) {
                warn!(error = %e, "Failed to write audit event");
            }
        }
    }
}

/// Future-like handle for one forwarded request
#[derive(Debug)]
pub struct PendingResponse {
    inner: PendingInner,
}

#[derive(Debug)]
enum PendingInner {
    Ready(AgentMessage),
    Waiting(oneshot::Receiver<Result<AgentMessage>>),
}

impl PendingResponse {
    fn ready(message: AgentMessage) -> Self {
        Self {
            inner: PendingInner::Ready(message),
        }
    }

    /// SSH_AGENT_FAILURE answer for a request that is never forwarded
    pub fn restricted() -> Self {
        Self::ready(AgentMessage::failure())
    }

    /// Whether the response was produced locally without touching the backend
    pub fn is_immediate(&self) -> bool {
        matches!(self.inner, PendingInner::Ready(_))
    }

    /// Wait for the correlated response
    pub async fn response(self) -> Result<AgentMessage> {
        match self.inner {
            PendingInner::Ready(message) => Ok(message),
            PendingInner::Waiting(rx) => rx.await.map_err(|_| Error::Cancelled)?,
        }
    }
}

/// A single backend connection with its request queue
///
/// Never share one link between unrelated callers: responses are matched by
/// order alone.
pub struct AgentLink {
    writer: tokio::sync::Mutex<BoxedWriter>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl AgentLink {
    /// Open a dedicated connection to the upstream agent
    pub async fn connect(upstream: &Upstream, audit: Option<Arc<JsonlWriter>>) -> Result<Self> {
        let stream = upstream.connect().await?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_split(reader, writer, audit))
    }

    /// Build a link over an already established duplex stream
    pub fn from_split<R, W>(reader: R, writer: W, audit: Option<Arc<JsonlWriter>>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState::default()),
            audit,
        });
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            shared,
            reader,
        }
    }

    /// Number of requests awaiting a backend response
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Forward one client request under `context`
    ///
    /// Only identity listing and signing reach the backend. Every other
    /// request type is answered locally with SSH_AGENT_FAILURE.
    pub async fn forward(
        &self,
        request: AgentMessage,
        context: Arc<AuthorizationContext>,
    ) -> Result<PendingResponse> {
        let Some(kind) = PendingKind::for_request(request.msg_type) else {
            warn!(msg_type = request.msg_type.as_str(), "Rejecting restricted agent request");
            return Ok(PendingResponse::restricted());
        };

        if kind == PendingKind::Sign {
            self.audit_sign_request(&request, &context);
        }

        let (tx, rx) = oneshot::channel();
        let mut writer = self.writer.lock().await;
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(Error::UpstreamClosed);
            }
            state.pending.push_back(PendingRequest {
                kind,
                context,
                reply: tx,
            });
        }

        trace!(msg_type = request.msg_type.as_str(), "Forwarding request to upstream");
        if let Err(e) = AgentCodec::write(&mut *writer, &request).await {
            warn!(error = %e, "Failed to write to upstream agent");
            self.shared.fail_all(|| Error::UpstreamClosed);
            self.reader.abort();
            return Err(e);
        }

        Ok(PendingResponse {
            inner: PendingInner::Waiting(rx),
        })
    }

    fn audit_sign_request(&self, request: &AgentMessage, context: &AuthorizationContext) {
        let identity = request
            .parse_sign_request_key()
            .map(|blob| Identity::new(blob, String::new()));
        if let Ok(identity) = &identity {
            debug!(
                fingerprint = %identity.fingerprint_string(),
                repository = ?context.repository,
                "Forwarding sign request"
            );
        }
        if let (Some(audit), Ok(identity)) = (&self.shared.audit, &identity) {
            if let Err(e) = audit.write(&LogEvent::sign_request(identity, context)) {
                warn!(error = %e, "Failed to write audit event");
            }
        }
    }
}

impl Drop for AgentLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.shared.fail_all(|| Error::Cancelled);
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Upstream agent closed connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to read from upstream agent");
                break;
            }
        };

        frames.extend(&chunk[..n]);
        let responses = match frames.decode() {
            Ok(responses) => responses,
            Err(e) => {
                warn!(error = %e, "Malformed frame from upstream agent");
                break;
            }
        };
        for response in responses {
            shared.dispatch(response);
        }
    }

    shared.fail_all(|| Error::UpstreamClosed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    struct MockBackend {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
    }

    impl MockBackend {
        async fn recv(&mut self) -> Option<AgentMessage> {
            AgentCodec::read(&mut self.reader).await.unwrap()
        }

        async fn send(&mut self, msg: &AgentMessage) {
            AgentCodec::write(&mut self.writer, msg).await.unwrap();
        }
    }

    fn link_pair() -> (AgentLink, MockBackend) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(ours);
        let (br, bw) = tokio::io::split(theirs);
        (
            AgentLink::from_split(r, w, None),
            MockBackend {
                reader: br,
                writer: bw,
            },
        )
    }

    fn ctx(repo: Option<&str>) -> Arc<AuthorizationContext> {
        Arc::new(AuthorizationContext {
            repository: repo.map(str::to_string),
            ..Default::default()
        })
    }

    fn sign_request(tag: u8) -> AgentMessage {
        AgentMessage::new(MessageType::SignRequest, Bytes::from(vec![0, 0, 0, 1, tag]))
    }

    fn sign_response(tag: u8) -> AgentMessage {
        AgentMessage::new(MessageType::SignResponse, Bytes::from(vec![tag]))
    }

    #[tokio::test]
    async fn test_restricted_request_never_reaches_backend() {
        let (link, mut backend) = link_pair();
        let add = AgentMessage::new(MessageType::AddIdentity, Bytes::from_static(b"secret"));
        let pending = link.forward(add, ctx(None)).await.unwrap();
        assert!(pending.is_immediate());

        let response = pending.response().await.unwrap();
        assert_eq!(response.msg_type, MessageType::Failure);
        assert!(response.payload.is_empty());
        assert_eq!(link.pending_count(), 0);

        drop(link);
        assert!(backend.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_correlation() {
        let (link, mut backend) = link_pair();
        let mut handles = Vec::new();
        for tag in 1..=3 {
            handles.push(link.forward(sign_request(tag), ctx(None)).await.unwrap());
        }
        assert_eq!(link.pending_count(), 3);

        for tag in 1..=3 {
            let req = backend.recv().await.unwrap();
            assert_eq!(req, sign_request(tag));
            backend.send(&sign_response(tag)).await;
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let response = handle.response().await.unwrap();
            assert_eq!(response, sign_response(i as u8 + 1));
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_their_own_responses() {
        let (link, mut backend) = link_pair();
        let link = Arc::new(link);

        tokio::spawn(async move {
            while let Some(req) = backend.recv().await {
                let tag = req.payload[4];
                backend.send(&sign_response(tag)).await;
            }
        });

        let mut tasks = Vec::new();
        for tag in 0..50u8 {
            let link = Arc::clone(&link);
            tasks.push(tokio::spawn(async move {
                let pending = link.forward(sign_request(tag), ctx(None)).await.unwrap();
                (tag, pending.response().await.unwrap())
            }));
        }
        for task in tasks {
            let (tag, response) = task.await.unwrap();
            assert_eq!(response, sign_response(tag));
        }
    }

    #[tokio::test]
    async fn test_listing_is_scoped_by_request_context() {
        let (link, mut backend) = link_pair();
        let request = AgentMessage::new(MessageType::RequestIdentities, Bytes::new());
        let pending = link.forward(request, ctx(Some("teamA/repoX"))).await.unwrap();

        backend.recv().await.unwrap();
        backend
            .send(&AgentMessage::build_identities_answer(&[
                Identity::new(Bytes::from_static(b"x"), "teamA_repoX".to_string()),
                Identity::new(Bytes::from_static(b"y"), "teamA_repoY".to_string()),
            ]))
            .await;

        let ids = pending.response().await.unwrap().parse_identities().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].comment, "teamA_repoX");
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error_for_caller() {
        let (link, mut backend) = link_pair();
        let request = AgentMessage::new(MessageType::RequestIdentities, Bytes::new());
        let pending = link.forward(request, ctx(None)).await.unwrap();

        backend.recv().await.unwrap();
        backend.send(&sign_response(1)).await;

        let err = pending.response().await.unwrap_err();
        assert!(matches!(err, Error::Correlation(_)));
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn test_status_replies_pass_through() {
        let (link, mut backend) = link_pair();
        let first = link.forward(sign_request(1), ctx(None)).await.unwrap();
        let second = link
            .forward(AgentMessage::new(MessageType::RequestIdentities, Bytes::new()), ctx(None))
            .await
            .unwrap();

        backend.recv().await.unwrap();
        backend.recv().await.unwrap();
        backend.send(&AgentMessage::failure()).await;
        backend
            .send(&AgentMessage::new(MessageType::ExtensionFailure, Bytes::new()))
            .await;

        assert_eq!(first.response().await.unwrap().msg_type, MessageType::Failure);
        assert_eq!(
            second.response().await.unwrap().msg_type,
            MessageType::ExtensionFailure
        );
    }

    #[tokio::test]
    async fn test_orphaned_response_is_dropped() {
        let (link, mut backend) = link_pair();
        backend.send(&AgentMessage::success()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!link.is_closed());

        let pending = link.forward(sign_request(7), ctx(None)).await.unwrap();
        backend.recv().await.unwrap();
        backend.send(&sign_response(7)).await;
        assert_eq!(pending.response().await.unwrap(), sign_response(7));
    }

    #[tokio::test]
    async fn test_response_split_across_chunks() {
        let (link, mut backend) = link_pair();
        let pending = link.forward(sign_request(9), ctx(None)).await.unwrap();
        backend.recv().await.unwrap();

        let wire = sign_response(9).encode();
        for b in wire.iter() {
            backend.writer.write_all(std::slice::from_ref(b)).await.unwrap();
            backend.writer.flush().await.unwrap();
        }
        assert_eq!(pending.response().await.unwrap(), sign_response(9));
    }

    #[tokio::test]
    async fn test_backend_disconnect_fails_pending() {
        let (link, backend) = link_pair();
        let pending = link.forward(sign_request(1), ctx(None)).await.unwrap();
        drop(backend);

        let err = pending.response().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamClosed));

        // Later requests fail fast once the reader has torn the link down
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(link.is_closed());
        assert!(link.forward(sign_request(2), ctx(None)).await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_link_cancels_pending() {
        let (link, _backend) = link_pair();
        let pending = link.forward(sign_request(1), ctx(None)).await.unwrap();
        drop(link);
        assert!(matches!(pending.response().await, Err(Error::Cancelled)));
    }
}
