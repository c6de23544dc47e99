//! End-to-end scenarios from §8 "Concrete end-to-end scenarios", driving the
//! public C2–C5 surface the way a request task would: feed deltas through
//! [`IncrementalStreamParser`], forward the resulting `StreamPart`s to a
//! [`StreamHelper`], and assert on what a [`CapturingSink`] recorded.

use agent_stream_core::frame::{ComponentPayload, DataPartKind, Frame, OperationEvent, StreamPart};
use agent_stream_core::incremental::IncrementalStreamParser;
use agent_stream_core::sink::CapturingSink;
use agent_stream_core::{ArtifactPayload, StreamCoreConfig, StreamHelper};
use std::sync::Arc;

async fn forward_parts(helper: &StreamHelper, parts: Vec<StreamPart>) {
    for part in parts {
        match part {
            StreamPart::Text(text) => {
                helper.write_text(text, 0).await.unwrap();
            }
            StreamPart::Data {
                kind: DataPartKind::Component,
                id,
                payload,
            } => {
                let component_type = payload
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let mut props = payload.as_object().cloned().unwrap_or_default();
                props.remove("type");
                helper
                    .write_component(id, ComponentPayload { component_type, props })
                    .await
                    .unwrap();
            }
            StreamPart::Data {
                kind: DataPartKind::Artifact,
                payload,
                ..
            } => {
                helper
                    .write_artifact(ArtifactPayload {
                        artifact_id: payload
                            .get("artifact_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        task_id: payload
                            .get("task_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: String::new(),
                        description: String::new(),
                        parts: Vec::new(),
                        metadata: payload,
                    })
                    .await
                    .unwrap();
            }
        }
    }
}

#[tokio::test]
async fn scenario_1_single_text_then_component() {
    let sink = Arc::new(CapturingSink::new());
    let config = StreamCoreConfig::default();
    let helper = StreamHelper::new(sink.clone(), &config);
    let mut parser = IncrementalStreamParser::new(config.max_buffer_bytes);

    let parts = parser.process_text("Hello ");
    forward_parts(&helper, parts).await;
    let parts = parser.process_text("world");
    forward_parts(&helper, parts).await;

    let delta = serde_json::json!({
        "dataComponents": [{"id": "c1", "name": "Weather", "props": {"temp": 72}}]
    });
    let parts = parser.process_object_delta(&delta);
    forward_parts(&helper, parts).await;

    let frames = sink.frames();
    assert!(matches!(frames[0], Frame::TextStart { .. }));
    assert!(matches!(&frames[1], Frame::TextDelta { delta, .. } if delta == "Hello "));
    assert!(matches!(frames[2], Frame::TextEnd { .. }));
    assert!(matches!(frames[3], Frame::TextStart { .. }));
    assert!(matches!(&frames[4], Frame::TextDelta { delta, .. } if delta == "world"));
    assert!(matches!(frames[5], Frame::TextEnd { .. }));
    match &frames[6] {
        Frame::DataComponent { data, .. } => {
            assert_eq!(data.component_type, "Weather");
            assert_eq!(data.props["temp"], 72);
        }
        other => panic!("expected data-component, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_2_operation_queued_across_tight_text_gap() {
    tokio::time::pause();
    let sink = Arc::new(CapturingSink::new());
    let config = StreamCoreConfig::default();
    let helper = StreamHelper::new(sink.clone(), &config);

    helper.write_text("A", 0).await.unwrap();
    tokio::time::advance(std::time::Duration::from_millis(500)).await;
    helper
        .write_operation(OperationEvent::Completion {
            agent: "a1".into(),
            iteration: 1,
        })
        .await
        .unwrap();
    tokio::time::advance(std::time::Duration::from_millis(500)).await; // t=1s total
    helper.write_text("B", 0).await.unwrap();

    // Gap since "A" ended to "B" starting is < 2s: operation stays queued,
    // text frames are not interleaved with it.
    let frames = sink.frames();
    assert_eq!(frames.len(), 6);
    assert!(matches!(frames[0], Frame::TextStart { .. }));
    assert!(matches!(frames[3], Frame::TextStart { .. }));

    tokio::time::advance(std::time::Duration::from_secs(3)).await;
    helper
        .write_operation(OperationEvent::Error {
            message: "boom".into(),
            agent: None,
            severity: agent_stream_core::ErrorSeverity::Error,
            code: None,
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let frames = sink.frames();
    // text A (3) + text B (3) + drained completion (1) + error (1)
    assert_eq!(frames.len(), 8);
    assert!(matches!(frames[6], Frame::DataOperation { data: OperationEvent::Completion { .. }, .. }));
    assert!(matches!(frames[7], Frame::DataOperation { data: OperationEvent::Error { .. }, .. }));
}

#[tokio::test]
async fn scenario_3_artifact_during_text_gap_does_not_alter_timing() {
    tokio::time::pause();
    let sink = Arc::new(CapturingSink::new());
    let config = StreamCoreConfig::default();
    let helper = StreamHelper::new(sink.clone(), &config);

    helper.write_text("Here: ", 0).await.unwrap();
    tokio::time::advance(std::time::Duration::from_millis(300)).await;
    helper
        .write_artifact(ArtifactPayload {
            artifact_id: "a".into(),
            task_id: "t".into(),
            name: String::new(),
            description: String::new(),
            parts: Vec::new(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), 4);
    assert!(matches!(frames[3], Frame::DataArtifact { .. }));

    // The artifact write must not reset the gap clock: an operation
    // immediately after still queues rather than draining.
    helper
        .write_operation(OperationEvent::Completion {
            agent: "a1".into(),
            iteration: 1,
        })
        .await
        .unwrap();
    assert_eq!(sink.frames().len(), 4);
}

#[tokio::test]
async fn scenario_4_malformed_marker_at_end_is_stripped() {
    let mut parser = IncrementalStreamParser::new(5 * 1024 * 1024);
    let sink = Arc::new(CapturingSink::new());
    let config = StreamCoreConfig::default();
    let helper = StreamHelper::new(sink.clone(), &config);

    let parts = parser.process_text("Report ");
    forward_parts(&helper, parts).await;
    let parts = parser.process_text(r#"<artifact:ref id="x" "#);
    forward_parts(&helper, parts).await;

    let final_parts = parser.finalize();
    assert!(final_parts.is_empty());
    forward_parts(&helper, final_parts).await;
    helper.complete().await.unwrap();

    assert_eq!(sink.collected_text(), "Report ");
}

#[tokio::test]
async fn scenario_6_post_completion_writes_are_dropped() {
    let sink = Arc::new(CapturingSink::new());
    let config = StreamCoreConfig::default();
    let helper = StreamHelper::new(sink.clone(), &config);

    helper.complete().await.unwrap();
    let before = sink.frames().len();

    helper.write_text("ignored", 0).await.unwrap();
    helper
        .write_operation(OperationEvent::Completion {
            agent: "a1".into(),
            iteration: 1,
        })
        .await
        .unwrap();
    helper.write_error("also ignored").await.unwrap();
    helper
        .write_component(
            "c1",
            ComponentPayload {
                component_type: "Weather".into(),
                props: Default::default(),
            },
        )
        .await
        .unwrap();
    helper.complete().await.unwrap();

    assert_eq!(sink.frames().len(), before);
}
