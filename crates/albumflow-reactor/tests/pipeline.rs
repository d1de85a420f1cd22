//! End-to-end pipeline tests.
//!
//! Each test wires the full topology over an in-memory table and a
//! recording notifier, feeds it notifications, and waits for the pipeline
//! to go idle. Time is paused so batching windows and retries run instantly.

mod common;

use albumflow_broker::{ChangeEvent, FailureKind, UpdateRequest};
use albumflow_meta::MetadataStore;
use albumflow_reactor::PipelineError;
use common::{notification, Harness, IDLE_TIMEOUT};

#[tokio::test(start_paused = true)]
async fn test_created_image_gets_record_and_confirmation() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline
        .ingest(&notification("Created", "vacation+photo.png"))
        .await
        .unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    let record = h.table.get("vacation photo.png").unwrap().unwrap();
    assert_eq!(record.object_key, "vacation photo.png");
    assert_eq!(record.description, None);

    assert_eq!(
        h.subjects(),
        vec!["Image Received Confirmation", "Image Added"]
    );
    let added = h.notifier.with_subject("Image Added");
    assert_eq!(added[0].recipient, "owner@example.com");
    assert!(added[0].body_html.contains("vacation photo.png"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_created_event_fans_out_to_queue_and_acknowledgement() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    let summaries = h
        .pipeline
        .ingest(&notification("Created", "summer+trip.jpg"))
        .await
        .unwrap();
    let mut targets = summaries[0].delivered_to();
    targets.sort_unstable();
    assert_eq!(targets, vec!["creation-queue", "received"]);

    // Acknowledged on publish, before the queue is drained.
    let received = h.notifier.with_subject("Image Received Confirmation");
    assert_eq!(received.len(), 1);
    assert!(received[0]
        .body_html
        .contains("We received your image. Its URL is s3://photos/summer trip.jpg"));

    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    assert!(h.table.contains("summer trip.jpg").unwrap());
    assert_eq!(h.notifier.sent().len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeat_upload_resets_description_without_second_confirmation() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "dog.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    h.pipeline
        .submit_update(UpdateRequest::new("dog.png", "a good dog"))
        .await
        .unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    h.pipeline.ingest(&notification("Created", "dog.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert_eq!(h.table.get("dog.png").unwrap().unwrap().description, None);
    assert_eq!(h.notifier.with_subject("Image Added").len(), 1);
    assert_eq!(
        h.notifier.with_subject("Image Received Confirmation").len(),
        2
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_type_is_rejected_once_after_max_receives() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "doc.pdf")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(!h.table.contains("doc.pdf").unwrap());
    let stats = h.pipeline.stats();
    assert_eq!(stats.creation_queue.delivered, 3);
    assert_eq!(stats.creation_queue.acked, 0);
    assert_eq!(stats.dead_lettered, 1);

    let rejections = h.notifier.with_subject("Image Rejected");
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].body_html.contains("doc.pdf"));
    assert!(rejections[0].body_html.contains("photos"));
    assert!(rejections[0].body_html.contains("Unsupported image type: pdf."));
    assert_eq!(
        h.subjects(),
        vec!["Image Received Confirmation", "Image Rejected"]
    );

    let dead = h.pipeline.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.delivery_attempt, 3);
    assert_eq!(dead[0].reason.kind, FailureKind::Validation);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_create_then_delete_confirms_both_in_order() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "a.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    h.pipeline.ingest(&notification("Removed", "a.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(!h.table.contains("a.png").unwrap());
    assert_eq!(
        h.subjects(),
        vec!["Image Received Confirmation", "Image Added", "Image Deleted"]
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_sets_description_without_confirmation() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "cat.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    let summary = h
        .pipeline
        .submit_update(UpdateRequest::new("cat.png", "a sleepy cat"))
        .await
        .unwrap();
    assert_eq!(summary.delivered_to(), vec!["update"]);
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    let record = h.table.get("cat.png").unwrap().unwrap();
    assert_eq!(record.description.as_deref(), Some("a sleepy cat"));
    assert_eq!(
        h.subjects(),
        vec!["Image Received Confirmation", "Image Added"]
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_of_missing_key_changes_nothing() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    let results = h
        .pipeline
        .ingest_message(r#"{"objectKey":"ghost.png","description":"boo"}"#)
        .await
        .unwrap();
    assert!(results[0].all_succeeded());
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(h.table.is_empty().unwrap());
    assert!(h.notifier.sent().is_empty());
    assert!(h.pipeline.dead_letters().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_idempotent() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "b.jpeg")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    for _ in 0..2 {
        let summaries = h
            .pipeline
            .ingest(&notification("Removed", "b.jpeg"))
            .await
            .unwrap();
        assert!(summaries[0].all_succeeded());
    }
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(!h.table.contains("b.jpeg").unwrap());
    assert_eq!(
        h.subjects(),
        vec!["Image Received Confirmation", "Image Added", "Image Deleted"]
    );
    assert!(h.pipeline.dead_letters().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_input_publishes_nothing() {
    let h = Harness::new().await;

    let err = h
        .pipeline
        .ingest(r#"{"eventKind":"Created","container":"photos"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Broker(_)));
    assert!(h.pipeline.ingest_message("not json").await.is_err());
    assert!(h
        .pipeline
        .ingest_message(r#"{"objectKey":"","description":"x"}"#)
        .await
        .is_err());

    assert_eq!(h.pipeline.stats().broker.published, 0);
    assert!(h.pipeline.creation_queue().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_events_reach_no_reactor() {
    let h = Harness::new().await;
    let summary = h
        .pipeline
        .publish(ChangeEvent::new(
            albumflow_broker::EventKind::Unknown,
            "photos",
            "a.png",
        ))
        .await;
    assert_eq!(summary.matched, 0);
    assert!(h.pipeline.creation_queue().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_creation_dead_letter_replay_gets_fresh_budget() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "scan.pdf")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    let id = h.pipeline.dead_letters()[0].envelope.id;

    h.pipeline.replay_dead_letter(id).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    let stats = h.pipeline.stats();
    assert_eq!(stats.creation_queue.delivered, 6);
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.rejections_sent, 2);
    assert_eq!(h.notifier.with_subject("Image Rejected").len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_is_dead_lettered_and_replayed() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();

    h.pipeline.ingest(&notification("Created", "c.png")).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    h.store.set_deletes_unavailable(true);
    let summaries = h
        .pipeline
        .ingest(&notification("Removed", "c.png"))
        .await
        .unwrap();
    assert!(!summaries[0].all_succeeded());
    assert_eq!(summaries[0].results[0].attempts, 3);
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(h.table.contains("c.png").unwrap());
    let dead = h.pipeline.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].source_queue, "deletion");
    assert_eq!(dead[0].reason.kind, FailureKind::Downstream);
    let rejections = h.notifier.with_subject("Image Rejected");
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].body_html.contains("after 3 attempts"));

    h.store.set_deletes_unavailable(false);
    h.pipeline.replay_dead_letter(dead[0].envelope.id).await.unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);

    assert!(!h.table.contains("c.png").unwrap());
    assert!(h.pipeline.dead_letters().is_empty());
    assert_eq!(
        h.subjects(),
        vec![
            "Image Received Confirmation",
            "Image Added",
            "Image Rejected",
            "Image Deleted"
        ]
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_changes_before_start_are_confirmed() {
    let mut h = Harness::new().await;
    h.pipeline
        .publish(ChangeEvent::removed("photos", "nothing.png"))
        .await;
    h.table
        .put(albumflow_meta::MetadataRecord::new("seeded.png"))
        .unwrap();

    let handle = h.pipeline.start().unwrap();
    assert!(h.pipeline.wait_idle(IDLE_TIMEOUT).await);
    assert_eq!(h.subjects(), vec!["Image Added"]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_fails() {
    let mut h = Harness::new().await;
    let handle = h.pipeline.start().unwrap();
    assert!(h.pipeline.start().is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_refused() {
    let mut config = common::test_config();
    config.notifier.recipient.clear();
    let table = std::sync::Arc::new(albumflow_meta::RecordTable::in_memory(16));
    let clients = albumflow_reactor::SharedClients::new(
        table.clone(),
        table.change_log(),
        std::sync::Arc::new(albumflow_reactor::MemoryNotifier::new()),
    );
    let result = albumflow_reactor::Pipeline::new(config, std::sync::Arc::new(clients)).await;
    assert!(matches!(result, Err(PipelineError::Config(_))));
}
