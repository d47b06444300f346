#[path = "support/mod.rs"]
mod support;

use reportsink::archive::SubmissionArchive;
use reportsink::artifacts::ArtifactStore;
use reportsink::config::StorageConfig;
use reportsink::consumer::{SubmissionDelivery, SubmissionListener};
use reportsink::dump::MessageDump;
use reportsink::notify::Notifier;
use reportsink::status::SubmissionStatus;
use reportsink::status_store::StatusStore;
use reportsink::submission::finalizer::Finalizer;
use reportsink::submission::processor::SubmissionProcessor;
use reportsink::submission::stage::StageChain;
use std::collections::HashMap;
use std::sync::Arc;
use support::mocks::{self, MockArchive, MockQueueConsumer, MockStatusStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    _dir: tempfile::TempDir,
    dump_dir: std::path::PathBuf,
    archive: Arc<MockArchive>,
    listener: SubmissionListener,
}

fn harness(token: Uuid) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dump_dir = dir.path().join("dumps");
    let storage = StorageConfig {
        report_dir: dir.path().join("reports").to_string_lossy().into_owned(),
        status_dir: dir.path().join("status").to_string_lossy().into_owned(),
        message_dump_dir: None,
    };
    let store = ArtifactStore::new(&storage);

    let status = Arc::new(MockStatusStore::with_row(token, SubmissionStatus::InQueue));
    let archive = Arc::new(MockArchive::default());
    let finalizer = Finalizer::new(
        store,
        Arc::clone(&archive) as Arc<dyn SubmissionArchive>,
        Notifier::default(),
    );
    let processor = Arc::new(SubmissionProcessor::new(
        status as Arc<dyn StatusStore>,
        StageChain::new(Vec::new()),
        finalizer,
    ));

    let dump = MessageDump::new(Some(dump_dir.to_string_lossy().into_owned()));
    let listener = SubmissionListener::new(processor, dump);

    Harness {
        _dir: dir,
        dump_dir,
        archive,
        listener,
    }
}

fn delivery(tag: u64, token: Option<&str>, body: Vec<u8>) -> SubmissionDelivery {
    let mut headers = HashMap::new();
    if let Some(token) = token {
        headers.insert("Token".to_string(), token.to_string());
    }
    headers.insert(
        "Subject".to_string(),
        "O=Example Bank, CN=100001".to_string(),
    );
    SubmissionDelivery {
        body,
        delivery_tag: tag,
        redelivered: false,
        headers,
    }
}

#[tokio::test]
async fn readable_message_is_processed_and_acked() {
    let token = Uuid::new_v4();
    let harness = harness(token);
    let body =
        serde_json::to_vec(&mocks::message("FRP", "2017-12", "100001", "PGZvbz4=")).unwrap();
    let consumer =
        MockQueueConsumer::with_deliveries(vec![delivery(7, Some(&token.to_string()), body)]);
    let acks = Arc::clone(&consumer.acks);

    harness
        .listener
        .run(consumer, CancellationToken::new())
        .await;

    assert_eq!(*acks.lock().unwrap(), vec![7]);
    assert_eq!(harness.archive.commits.lock().unwrap().len(), 1);

    // The raw message was dumped under its token.
    let dump = harness.dump_dir.join(format!("msg_{token}.dmp"));
    assert!(dump.exists());
}

#[tokio::test]
async fn unreadable_body_is_acked_without_processing() {
    let token = Uuid::new_v4();
    let harness = harness(token);
    let consumer = MockQueueConsumer::with_deliveries(vec![delivery(
        3,
        Some(&token.to_string()),
        b"not json at all".to_vec(),
    )]);
    let acks = Arc::clone(&consumer.acks);

    harness
        .listener
        .run(consumer, CancellationToken::new())
        .await;

    assert_eq!(*acks.lock().unwrap(), vec![3]);
    assert!(harness.archive.commits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_token_header_is_acked_without_processing() {
    let token = Uuid::new_v4();
    let harness = harness(token);
    let body =
        serde_json::to_vec(&mocks::message("FRP", "2017-12", "100001", "PGZvbz4=")).unwrap();
    let consumer = MockQueueConsumer::with_deliveries(vec![delivery(5, None, body)]);
    let acks = Arc::clone(&consumer.acks);

    harness
        .listener
        .run(consumer, CancellationToken::new())
        .await;

    assert_eq!(*acks.lock().unwrap(), vec![5]);
    assert!(harness.archive.commits.lock().unwrap().is_empty());
}
