//! HTTP-level gateway tests and tunnel failure handling

use bytes::Bytes;
use socketauth::Error;
use socketauth::agent::Upstream;
use socketauth::gateway::{Gateway, StaticCredentials};
use socketauth::logging::open_audit_log;
use socketauth::protocol::{AgentCodec, AgentMessage, Identity, MessageType};
use socketauth::tunnel::{COMMAND_HEADER, TunnelClient, TunnelOptions, TunnelSession};
use ssh_key::PublicKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UnixListener, UnixStream};

const ED25519_KEY_WORK: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl user@work.example.com";

fn list_request() -> Bytes {
    AgentMessage::new(MessageType::RequestIdentities, Bytes::new()).encode()
}

async fn start_mock_agent(socket_path: &Path, identities: Vec<Identity>) {
    let listener = UnixListener::bind(socket_path).unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let identities = identities.clone();
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                while let Ok(Some(msg)) = AgentCodec::read(&mut reader).await {
                    let response = match msg.msg_type {
                        MessageType::RequestIdentities => {
                            AgentMessage::build_identities_answer(&identities)
                        }
                        _ => AgentMessage::failure(),
                    };
                    if AgentCodec::write(&mut writer, &response).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

fn work_identity() -> Identity {
    let public_key: PublicKey = ED25519_KEY_WORK.parse().unwrap();
    Identity::new(
        Bytes::from(public_key.to_bytes().unwrap()),
        "user@laptop".to_string(),
    )
}

fn credentials() -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(HashMap::from([(
        "ci".to_string(),
        "secret".to_string(),
    )])))
}

async fn serve(gateway: Gateway) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway.serve(listener, std::future::pending::<()>()));
    addr
}

/// Gateway in front of a mock agent holding one unscoped key
async fn start_gateway(dir: &TempDir) -> SocketAddr {
    let agent_path = dir.path().join("backend.sock");
    start_mock_agent(&agent_path, vec![work_identity()]).await;
    serve(Gateway::new(Upstream::new(&agent_path), credentials()).with_max_body_size(4096)).await
}

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}/ssh-agent", addr)
}

#[tokio::test]
async fn test_missing_credentials_get_challenge() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .body(list_request())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get("www-authenticate").unwrap();
    assert_eq!(challenge.to_str().unwrap(), "Basic realm=\"socketauth\"");
}

#[tokio::test]
async fn test_wrong_password_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("nope"))
        .body(list_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_authorization_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .header("authorization", "Basic !!!not-base64")
        .body(list_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_routes_are_not_found() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;
    let client = reqwest::Client::new();

    let get = client
        .get(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), reqwest::StatusCode::NOT_FOUND);

    let other_path = client
        .post(format!("http://{}/elsewhere", addr))
        .basic_auth("ci", Some("secret"))
        .body(list_request())
        .send()
        .await
        .unwrap();
    assert_eq!(other_path.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_command_header_is_rejected() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .header(COMMAND_HEADER, "{\"not\": \"an array\"}")
        .body(list_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_partial_frame_body_is_rejected() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let mut body = list_request().to_vec();
    body.extend_from_slice(&[0, 0, 0, 9, 13]);

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .body(vec![0u8; 8192])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_empty_body_gets_empty_reply() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_backend_is_server_error() {
    let dir = TempDir::new().unwrap();
    let addr = serve(Gateway::new(
        Upstream::new(dir.path().join("absent.sock")),
        credentials(),
    ))
    .await;

    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .body(list_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_restricted_request_answered_without_backend() {
    let dir = TempDir::new().unwrap();
    let addr = serve(Gateway::new(
        Upstream::new(dir.path().join("absent.sock")),
        credentials(),
    ))
    .await;

    let add_identity = AgentMessage::new(MessageType::AddIdentity, Bytes::from_static(b"key"));
    let response = reqwest::Client::new()
        .post(endpoint(addr))
        .basic_auth("ci", Some("secret"))
        .body(add_identity.encode())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], &[0, 0, 0, 1, 5]);
}

#[tokio::test]
async fn test_custom_path_and_audit_log() {
    let dir = TempDir::new().unwrap();
    let agent_path = dir.path().join("backend.sock");
    start_mock_agent(&agent_path, vec![work_identity()]).await;
    let log_path = dir.path().join("logs").join("audit.jsonl");
    let audit = open_audit_log(&log_path).unwrap();

    let gateway = Gateway::new(Upstream::new(&agent_path), credentials())
        .with_path("agent")
        .with_audit(audit);
    let addr = serve(gateway).await;

    let client = TunnelClient::new(
        &format!("http://{}/agent", addr),
        TunnelOptions {
            username: Some("ci".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let reply = client.exchange(list_request(), &[]).await.unwrap();
    let message = AgentMessage::decode(&reply[4..]).unwrap();
    assert_eq!(message.parse_identities().unwrap().len(), 1);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("server_start"));
    assert!(log.contains("tunnel_request"));
    assert!(log.contains("identities_response"));
}

#[tokio::test]
async fn test_client_reports_refusal() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let client = TunnelClient::new(&endpoint(addr), TunnelOptions::default()).unwrap();
    let err = client.exchange(list_request(), &[]).await.unwrap_err();
    assert!(matches!(err, Error::Tunnel(_)));
}

#[tokio::test]
async fn test_client_enforces_response_cap() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let client = TunnelClient::new(
        &format!("http://ci:secret@{}/ssh-agent", addr),
        TunnelOptions {
            max_response_size: 16,
            ..Default::default()
        },
    )
    .unwrap();
    let err = client.exchange(list_request(), &[]).await.unwrap_err();
    assert!(matches!(err, Error::Tunnel(_)));
}

#[tokio::test]
async fn test_refused_exchange_closes_local_connection() {
    let dir = TempDir::new().unwrap();
    let addr = start_gateway(&dir).await;

    let client = TunnelClient::new(
        &format!("http://ci:wrong@{}/ssh-agent", addr),
        TunnelOptions::default(),
    )
    .unwrap();
    let session = TunnelSession::new(Arc::new(client), Vec::new());

    let (mut local, remote) = UnixStream::pair().unwrap();
    let relay = tokio::spawn(async move { session.relay(remote, &[]).await });

    AgentCodec::write(&mut local, &AgentMessage::new(MessageType::RequestIdentities, Bytes::new()))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = local.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
    assert!(relay.await.unwrap().is_err());
}

/// Accepts HTTP connections and never answers them
async fn start_silent_gateway() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

fn impatient_client(addr: SocketAddr) -> TunnelClient {
    TunnelClient::new(
        &format!("http://ci:secret@{}/ssh-agent", addr),
        TunnelOptions {
            timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_exchange_times_out() {
    let addr = start_silent_gateway().await;
    let client = impatient_client(addr);

    let started = Instant::now();
    let err = client.exchange(list_request(), &[]).await.unwrap_err();
    assert!(matches!(err, Error::Http(_) | Error::Tunnel(_)), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_timed_out_exchange_closes_local_connection() {
    let addr = start_silent_gateway().await;
    let session = TunnelSession::new(Arc::new(impatient_client(addr)), Vec::new());

    let (mut local, remote) = UnixStream::pair().unwrap();
    let relay = tokio::spawn(async move { session.relay(remote, &[]).await });

    AgentCodec::write(&mut local, &AgentMessage::new(MessageType::RequestIdentities, Bytes::new()))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), local.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(relay.await.unwrap().is_err());
}
