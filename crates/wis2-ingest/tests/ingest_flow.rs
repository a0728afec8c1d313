//! End-to-end ingest: broker session → receiver → pipeline → HTTP origin → repository

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wis2_common::checksum::compute_digest;
use wis2_common::types::IntegrityMethod;
use wis2_ingest::credentials::CredentialChain;
use wis2_ingest::fetch::SchemeFetcherFactory;
use wis2_ingest::receiver::{
    BrokerConnector, BrokerSession, ConnectRequest, InboundPublish, MessageReceiver, ReceiverOptions,
};
use wis2_ingest::repo::FsRepository;
use wis2_ingest::{Pipeline, PipelineConfig, ReceiverError, ReceiverState};

const TOPIC: &str = "cache/a/wis2/de-dwd/data/core/weather";

/// Broker session fed from a channel; records whether DISCONNECT was sent
struct ScriptedConnector {
    publishes: Mutex<Option<mpsc::UnboundedReceiver<InboundPublish>>>,
    disconnected: Arc<AtomicBool>,
}

struct ScriptedSession {
    publishes: mpsc::UnboundedReceiver<InboundPublish>,
    disconnected: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnector for ScriptedConnector {
    async fn connect(&self, _request: &ConnectRequest) -> Result<Box<dyn BrokerSession>, ReceiverError> {
        Ok(Box::new(ScriptedSession {
            publishes: self.publishes.lock().unwrap().take().unwrap(),
            disconnected: self.disconnected.clone(),
        }))
    }
}

#[async_trait]
impl BrokerSession for ScriptedSession {
    async fn subscribe(&mut self, topics: &[String], qos: u8) -> Result<Vec<u8>, ReceiverError> {
        Ok(vec![qos; topics.len()])
    }

    async fn next_publish(&mut self) -> Result<Option<InboundPublish>, ReceiverError> {
        Ok(self.publishes.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), ReceiverError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn message(base_url: &str, rel_path: &str, body: &[u8]) -> InboundPublish {
    let digest = compute_digest(body, IntegrityMethod::Sha512);
    let json = serde_json::json!({
        "pubTime": "2024-01-18T12:00:00Z",
        "baseUrl": base_url,
        "relPath": rel_path,
        "integrity": {"method": "SHA512", "value": STANDARD.encode(digest)},
        "size": body.len(),
    });
    InboundPublish {
        topic: TOPIC.to_string(),
        payload: serde_json::to_vec(&json).unwrap(),
    }
}

#[tokio::test]
async fn test_notifications_are_fetched_verified_and_stored() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/obs.bufr4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"observation".to_vec()))
        .expect(1)
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/corrupt.bufr4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"corrupted".to_vec()))
        .expect(1)
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/existing.bufr4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .expect(0)
        .mount(&origin)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let topic_dir = data_dir.path().join(TOPIC);
    std::fs::create_dir_all(&topic_dir).unwrap();
    std::fs::write(topic_dir.join("existing.bufr4"), b"old").unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let connector = ScriptedConnector {
        publishes: Mutex::new(Some(rx)),
        disconnected: Arc::new(AtomicBool::new(false)),
    };

    let base = origin.uri();
    tx.send(message(&base, "/data/obs.bufr4", b"observation")).unwrap();
    tx.send(message(&base, "/data/corrupt.bufr4", b"original")).unwrap();
    tx.send(message(&base, "/data/existing.bufr4", b"new")).unwrap();
    tx.send(message("not a url", "/x.bufr4", b"x")).unwrap();

    let cancel = CancellationToken::new();
    let options = ReceiverOptions {
        credentials: Arc::new(CredentialChain::new()),
        ..Default::default()
    };
    let receiver = MessageReceiver::connect_with(
        &connector,
        "tcp://broker.example.org",
        &[TOPIC.to_string()],
        options,
        cancel.clone(),
    )
    .await
    .unwrap();
    assert_eq!(receiver.state(), ReceiverState::Streaming);

    let repo = Arc::new(FsRepository::new(data_dir.path()).unwrap());
    let fetchers = Arc::new(SchemeFetcherFactory::new(Arc::new(CredentialChain::new())).unwrap());
    let pipeline = Pipeline::new(
        repo,
        fetchers,
        PipelineConfig {
            workers: 2,
            ..Default::default()
        },
    );
    let run = tokio::spawn(async move { pipeline.run(receiver).await });

    // all four messages are queued before the stream is cancelled
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.received, 4);
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.submitted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.stream_error.is_none());

    assert_eq!(std::fs::read(topic_dir.join("obs.bufr4")).unwrap(), b"observation");
    assert!(!topic_dir.join("corrupt.bufr4").exists());
    assert_eq!(std::fs::read(topic_dir.join("existing.bufr4")).unwrap(), b"old");
    assert!(connector.disconnected.load(Ordering::SeqCst));
    drop(tx);
}

#[tokio::test]
async fn test_undecodable_message_ends_run_with_error() {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = ScriptedConnector {
        publishes: Mutex::new(Some(rx)),
        disconnected: Arc::new(AtomicBool::new(false)),
    };
    tx.send(InboundPublish {
        topic: TOPIC.to_string(),
        payload: b"<xml/>".to_vec(),
    })
    .unwrap();

    let options = ReceiverOptions {
        credentials: Arc::new(CredentialChain::new()),
        ..Default::default()
    };
    let receiver = MessageReceiver::connect_with(
        &connector,
        "tcp://broker.example.org",
        &[TOPIC.to_string()],
        options,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let data_dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        Arc::new(FsRepository::new(data_dir.path()).unwrap()),
        Arc::new(SchemeFetcherFactory::new(Arc::new(CredentialChain::new())).unwrap()),
        PipelineConfig::default(),
    );
    let summary = tokio::time::timeout(Duration::from_secs(10), pipeline.run(receiver))
        .await
        .unwrap();

    assert_eq!(summary.received, 0);
    let error = summary.stream_error.unwrap();
    assert!(error.contains("decode"), "{}", error);
    assert!(connector.disconnected.load(Ordering::SeqCst));
}
