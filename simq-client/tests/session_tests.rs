//! End-to-end query session tests
//!
//! Drives a `QueryService` through recorded message sequences the way a connection
//! task would: outbound requests over a channel, inbound messages through `run`.
//! Flush timer tests run on a paused clock.

use simq_client::query::{MessageChannel, FLUSH_INTERVAL};
use simq_client::{History, InMemoryHistory, QueryService, ResultsSnapshot, ScoreFunction};
use simq_common::config::Settings;
use simq_common::events::QueryChange;
use simq_common::messages::{
    ApiMessage, MediaObject, MediaSegment, MediaType, ObjectQueryResult, QueryEnd, QueryRequest,
    QueryStart, SegmentQueryResult, SegmentType, Similarity, SimilarityQueryResult,
    StagedSimilarityQuery,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn start(id: &str) -> ApiMessage {
    ApiMessage::QueryStart(QueryStart { query_id: id.into() })
}

fn end(id: &str) -> ApiMessage {
    ApiMessage::QueryEnd(QueryEnd { query_id: id.into() })
}

fn objects(id: &str, ids: &[(&str, MediaType)]) -> ApiMessage {
    ApiMessage::Object(ObjectQueryResult {
        query_id: id.into(),
        content: ids.iter().map(|(o, t)| MediaObject::new(*o, *t)).collect(),
    })
}

fn segments(id: &str, pairs: &[(&str, &str)]) -> ApiMessage {
    ApiMessage::Segment(SegmentQueryResult {
        query_id: id.into(),
        segment_type: SegmentType::Default,
        content: pairs.iter().map(|(s, o)| MediaSegment::new(*s, *o)).collect(),
    })
}

fn similarity(id: &str, category: &str, values: &[(&str, f64)]) -> ApiMessage {
    ApiMessage::Similarity(SimilarityQueryResult {
        query_id: id.into(),
        category: category.into(),
        container_id: 0,
        content: values
            .iter()
            .map(|(key, value)| Similarity {
                key: key.to_string(),
                value: *value,
            })
            .collect(),
    })
}

async fn object_score(service: &QueryService, object_id: &str) -> f64 {
    service
        .with_results(|r| r.object(object_id).map(|o| o.score))
        .await
        .flatten()
        .unwrap_or_default()
}

fn average_settings() -> Settings {
    Settings::from_toml_str("[query]\nscoreFunction = \"AVERAGE\"").unwrap()
}

#[tokio::test]
async fn test_recorded_session_through_inbound_loop() {
    let history = Arc::new(InMemoryHistory::new(10));
    let service = Arc::new(QueryService::new(average_settings()).with_history(history.clone()));
    let mut events = service.subscribe_events();

    let (tx, rx) = mpsc::channel(64);
    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run(rx).await })
    };

    for message in [
        start("q1"),
        objects("q1", &[("o1", MediaType::Video), ("o2", MediaType::Image)]),
        segments("q1", &[("s1", "o1"), ("s2", "o2")]),
        similarity("q1", "color", &[("s1", 0.8), ("s2", 0.4), ("unknown", 1.0)]),
        end("q1"),
    ] {
        tx.send(message).await.unwrap();
    }
    drop(tx);
    runner.await.unwrap();

    let views = service.subscribe_views().borrow().clone().unwrap();
    let ranked: Vec<(String, f64)> = views
        .segments
        .borrow()
        .iter()
        .map(|s| (s.segment_id.clone(), s.score))
        .collect();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].0, "s1");
    assert!((ranked[0].1 - 0.8).abs() < 1e-9);
    assert!((ranked[1].1 - 0.4).abs() < 1e-9);

    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["Started", "Updated", "Updated", "Updated", "Ended"]);

    let entry = history.latest().unwrap();
    assert_eq!(entry.snapshot.query_id, "q1");
    assert_eq!(entry.snapshot.segments.len(), 2);
    // The observation for the undescribed segment was dropped
    assert_eq!(entry.snapshot.similarity.len(), 2);
}

#[tokio::test]
async fn test_text_channel_carries_wire_json() {
    let service = QueryService::new(Settings::default());
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    service.attach_channel(Arc::new(tx)).await;
    assert_eq!(rx.recv().await.unwrap(), r#"{"messageType":"Q_RETRIEVER"}"#);

    assert!(service.find_similar(vec![StagedSimilarityQuery::new(vec![])]).await);
    let text = rx.recv().await.unwrap();
    assert!(text.starts_with(r#"{"messageType":"Q_TEMPORAL""#), "{text}");

    service.detach_channel().await;
    assert!(!service.find_similar(vec![]).await);
}

#[tokio::test]
async fn test_channel_factory_attaches_and_detaches() {
    let service = Arc::new(QueryService::new(Settings::default()));
    let (factory_tx, factory_rx) = watch::channel(None);
    let watcher = service.watch_channel(factory_rx);

    let (tx, mut rx) = mpsc::unbounded_channel::<QueryRequest>();
    let channel: Arc<dyn MessageChannel> = Arc::new(tx);
    factory_tx.send(Some(channel)).unwrap();

    // Attaching asks for the retriever list
    assert_eq!(rx.recv().await, Some(QueryRequest::Retrievers));
    assert!(service.has_channel().await);

    factory_tx.send(None).unwrap();
    for _ in 0..100 {
        if !service.has_channel().await {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!service.has_channel().await);

    drop(factory_tx);
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_snapshot_load_reproduces_ranking() {
    let history = Arc::new(InMemoryHistory::new(10));
    let service = QueryService::new(average_settings()).with_history(history.clone());
    for message in [
        start("q1"),
        objects("q1", &[("o1", MediaType::Video)]),
        segments("q1", &[("s1", "o1"), ("s2", "o1")]),
        similarity("q1", "color", &[("s1", 0.3), ("s2", 0.9)]),
        similarity("q1", "edge", &[("s1", 0.5)]),
        end("q1"),
    ] {
        service.dispatch(message).await;
    }
    let before = service
        .with_results(|r| (r.segment("s1").map(|s| s.score), r.segment("s2").map(|s| s.score)))
        .await
        .unwrap();

    service.clear().await;
    assert!(service.query_id().await.is_none());

    let snapshot: ResultsSnapshot = history.latest().unwrap().snapshot;
    let json = snapshot.to_json().unwrap();
    let restored = ResultsSnapshot::from_json(&json).unwrap();

    let mut events = service.subscribe_events();
    assert!(service.load(&restored).await);
    let after = service
        .with_results(|r| (r.segment("s1").map(|s| s.score), r.segment("s2").map(|s| s.score)))
        .await
        .unwrap();
    assert_eq!(before, after);

    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["Started", "Ended"]);
    assert!(!service.is_running().await);
}

#[tokio::test]
async fn test_settings_change_swaps_score_function() {
    let service = QueryService::new(average_settings());
    for message in [
        start("q1"),
        segments("q1", &[("s1", "o1"), ("s2", "o1")]),
        similarity("q1", "color", &[("s1", 0.2), ("s2", 0.6)]),
        end("q1"),
    ] {
        service.dispatch(message).await;
    }
    assert!((object_score(&service, "o1").await - 0.4).abs() < 1e-9);

    service
        .set_settings(Settings::from_toml_str("[query]\nscoreFunction = \"maxpool\"").unwrap())
        .await;
    assert_eq!(service.score_function().await, ScoreFunction::Maxpool);
    assert!((object_score(&service, "o1").await - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_history_trait_object() {
    let history: Arc<dyn History> = Arc::new(InMemoryHistory::default());
    let service = QueryService::new(Settings::default()).with_history(history);
    service.dispatch(start("q1")).await;
    service.dispatch(segments("q1", &[("s1", "o1")])).await;
    service.dispatch(end("q1")).await;
    assert_eq!(service.snapshot().await.map(|s| s.segments.len()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_flush_timer_publishes_after_interval() {
    let service = QueryService::new(average_settings());
    let views = service.subscribe_views();
    service.dispatch(start("q1")).await;
    let receivers = views.borrow().clone().unwrap();

    service.dispatch(objects("q1", &[("o1", MediaType::Video)])).await;
    service.dispatch(segments("q1", &[("s1", "o1")])).await;
    service.dispatch(similarity("q1", "color", &[("s1", 0.8)])).await;
    assert!(receivers.segments.borrow().is_empty(), "nothing published before a tick");

    tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(10)).await;
    let published = receivers.segments.borrow().clone();
    assert_eq!(published.len(), 1);
    assert!((published[0].score - 0.8).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_burst_waits_one_more_tick() {
    let service = QueryService::new(average_settings());
    let views = service.subscribe_views();
    service.dispatch(start("q1")).await;
    let receivers = views.borrow().clone().unwrap();

    service.dispatch(segments("q1", &[("s1", "o1")])).await;
    for i in 0..150 {
        let value = (i + 1) as f64 / 150.0;
        service.dispatch(similarity("q1", "color", &[("s1", value)])).await;
    }

    // First tick: saturated, deferred
    tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(10)).await;
    assert!(receivers.segments.borrow().is_empty());
    assert_eq!(service.with_results(|r| r.rerank_pending()).await, Some(1));

    // Second tick: one re-rank with everything received so far
    tokio::time::sleep(FLUSH_INTERVAL).await;
    let published = receivers.segments.borrow().clone();
    assert_eq!(published.len(), 1);
    assert!((published[0].score - 1.0).abs() < 1e-9);
    assert_eq!(service.with_results(|r| r.rerank_pending()).await, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_error_stops_flush_timer() {
    let service = QueryService::new(average_settings());
    let views = service.subscribe_views();
    service.dispatch(start("q1")).await;
    let receivers = views.borrow().clone().unwrap();
    service.dispatch(segments("q1", &[("s1", "o1")])).await;
    service
        .dispatch(ApiMessage::QueryError(simq_common::messages::QueryError {
            query_id: "q1".into(),
            message: "timeout".into(),
        }))
        .await;

    tokio::time::sleep(FLUSH_INTERVAL * 3).await;
    assert!(receivers.segments.borrow().is_empty());
    assert_eq!(service.with_results(|r| r.segment_count()).await, Some(1));
    assert_eq!(service.flush().await, Some(simq_client::UpdateOutcome::Reranked));
    assert_eq!(receivers.segments.borrow().len(), 1);
}

#[tokio::test]
async fn test_events_serialize_with_type_tag() {
    let service = QueryService::new(Settings::default());
    let mut events = service.subscribe_events();
    service.dispatch(start("q1")).await;
    let event: QueryChange = events.try_recv().unwrap();
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains(r#""type":"Started""#));
    assert!(json.contains(r#""query_id":"q1""#));
}

#[tokio::test]
async fn test_snapshot_survives_file_round_trip() {
    let service = QueryService::new(average_settings());
    for message in [
        start("q7"),
        objects("q7", &[("o1", MediaType::Image)]),
        segments("q7", &[("s1", "o1")]),
        similarity("q7", "color", &[("s1", 0.7)]),
        end("q7"),
    ] {
        service.dispatch(message).await;
    }

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("q7.json");
    let snapshot = service.snapshot().await.unwrap();
    std::fs::write(&path, snapshot.to_json_pretty().unwrap()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let reloaded = QueryService::new(average_settings());
    assert!(reloaded.load(&ResultsSnapshot::from_json(&text).unwrap()).await);
    assert_eq!(reloaded.query_id().await.as_deref(), Some("q7"));
    assert!((object_score(&reloaded, "o1").await - 0.7).abs() < 1e-9);
}
