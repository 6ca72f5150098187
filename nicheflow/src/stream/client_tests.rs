//! Behavioural tests for ProgressStream.

#[cfg(test)]
mod tests {
    use crate::config::StreamConfig;
    use crate::core::StreamState;
    use crate::errors::{NicheflowError, StreamFailure, StreamTransportError};
    use crate::events::CollectingEventSink;
    use crate::project::ProjectData;
    use crate::stream::{AnalyzeRequest, AnalyzeResponse, MockAnalysisTransport, ProgressStream, ProgressUpdate};
    use crate::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn request() -> AnalyzeRequest {
        AnalyzeRequest::new("plumber", "birmingham al")
    }

    fn results() -> Value {
        json!({
            "query": "plumber",
            "location": "birmingham al",
            "keywords": {"all_keywords": [{"keyword": "emergency plumber", "search_volume_score": 80}]},
            "competitors": [{"name": "Magic City Plumbing", "rating": 4.6}],
            "opportunity_score": 0.72
        })
    }

    fn stream_over(transport: &Arc<ScriptedTransport>) -> ProgressStream {
        ProgressStream::new("niche-analysis", "nicheAnalysis", transport.clone())
    }

    #[tokio::test]
    async fn test_completed_results_stored_exactly() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "started", "message": "Analysis started"}))
                .event(&json!({"status": "processing", "step": "geographic", "message": "Analyzing location data..."}))
                .event(&json!({"status": "processing", "step": "keywords", "message": "Discovering keywords..."}))
                .event(&json!({"status": "completed", "results": results()})),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        let stored = stream.start(request(), &project).await.unwrap();

        assert_eq!(stored, results());
        assert_eq!(stream.state(), StreamState::Completed);
        assert_eq!(stream.results(), Some(results()));
        assert_eq!(project.get("nicheAnalysis"), Some(results()));
        assert_eq!(
            project.get("selectedNiche"),
            Some(json!({
                "name": "plumber",
                "location": "birmingham al",
                "keywords": [{"keyword": "emergency plumber", "search_volume_score": 80}]
            }))
        );
        assert_eq!(stream.progress(), ProgressUpdate::new("keywords", "Discovering keywords..."));
        assert_eq!(transport.subscribes(), 1);
        assert_eq!(transport.triggers(), 1);
        assert_eq!(transport.analyze_calls(), 0);
        assert!(transport.channel_closed());
    }

    #[tokio::test]
    async fn test_transport_error_falls_back_once() {
        let fallback = json!({"query": "plumber", "location": "birmingham al", "source": "fallback"});
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "processing", "step": "geo", "message": "..."}))
                .transport_error("connection reset")
                .event(&json!({"status": "completed", "results": {"source": "late channel"}}))
                .fallback(AnalyzeResponse::ok(fallback.clone())),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        let stored = stream.start(request(), &project).await.unwrap();

        assert_eq!(stored, fallback);
        assert_eq!(stream.state(), StreamState::Completed);
        assert_eq!(project.get("nicheAnalysis"), Some(fallback));
        assert_eq!(transport.analyze_calls(), 1);
        assert_eq!(transport.delivered(), 2);
        assert!(transport.channel_closed());
    }

    #[tokio::test]
    async fn test_fallback_failure_leaves_project_untouched() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .transport_error("unsupported transport")
                .fallback(AnalyzeResponse::failed("Query and location are required")),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        let err = stream.start(request(), &project).await.unwrap_err();

        assert!(matches!(
            err,
            NicheflowError::Stream(StreamFailure::Fallback(ref msg)) if msg.contains("required")
        ));
        assert_eq!(stream.state(), StreamState::Errored);
        assert!(stream.error().is_some());
        assert!(project.is_empty());
        assert_eq!(transport.analyze_calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_request_error() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .transport_error("reset")
                .fallback_error("503 Service Unavailable"),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        let err = stream.start(request(), &project).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(transport.analyze_calls(), 1);
    }

    #[tokio::test]
    async fn test_server_error_falls_back_by_default() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "error", "error": "places quota exceeded"}))
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        stream.start(request(), &project).await.unwrap();

        assert_eq!(transport.analyze_calls(), 1);
        assert_eq!(project.get("nicheAnalysis"), Some(results()));
    }

    #[tokio::test]
    async fn test_server_error_is_terminal_when_fallback_disabled() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "error", "error": "places quota exceeded"}))
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport)
            .with_config(StreamConfig::default().with_fallback_on_server_error(false));

        let err = stream.start(request(), &project).await.unwrap_err();

        assert!(matches!(err, NicheflowError::Stream(StreamFailure::Server(_))));
        assert_eq!(stream.state(), StreamState::Errored);
        assert_eq!(transport.analyze_calls(), 0);
        assert!(project.is_empty());
    }

    #[tokio::test]
    async fn test_channel_ending_early_falls_back() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "processing", "step": "geo"}))
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());

        stream_over(&transport).start(request(), &project).await.unwrap();
        assert_eq!(transport.analyze_calls(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_acknowledged_before_trigger() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .subscribe_error("event streams unsupported")
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());

        stream_over(&transport).start(request(), &project).await.unwrap();

        assert_eq!(transport.subscribes(), 1);
        assert_eq!(transport.triggers(), 0);
        assert_eq!(transport.analyze_calls(), 1);
    }

    #[tokio::test]
    async fn test_trigger_failure_falls_back() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .hold_open()
                .trigger_error("400 Bad Request")
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());

        stream_over(&transport).start(request(), &project).await.unwrap();

        assert_eq!(transport.analyze_calls(), 1);
        assert!(transport.channel_closed());
    }

    #[tokio::test]
    async fn test_unknown_status_ignored() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "heartbeat"}))
                .event(&json!({"status": "completed", "results": results()})),
        );
        let project = Arc::new(ProjectData::new());

        stream_over(&transport).start(request(), &project).await.unwrap();
        assert_eq!(transport.analyze_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_mid_stream_prevents_write() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "processing", "step": "geo"}))
                .hold_open(),
        );
        let project = Arc::new(ProjectData::new());
        let stream = Arc::new(stream_over(&transport));

        let handle = {
            let stream = stream.clone();
            let project = project.clone();
            tokio::spawn(async move { stream.start(request(), &project).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(stream.state(), StreamState::Streaming);
        assert!(stream.close("operator navigated away"));

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, NicheflowError::Cancelled(_)));
        assert_eq!(stream.state(), StreamState::Errored);
        assert!(project.is_empty());
        assert!(transport.channel_closed());
        assert!(!stream.close("again"));
    }

    #[tokio::test]
    async fn test_close_during_fallback_prevents_write() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .transport_error("reset")
                .fallback(AnalyzeResponse::ok(results()))
                .fallback_delay(Duration::from_millis(200)),
        );
        let project = Arc::new(ProjectData::new());
        let stream = Arc::new(stream_over(&transport));

        let handle = {
            let stream = stream.clone();
            let project = project.clone();
            tokio::spawn(async move { stream.start(request(), &project).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.close("operator");

        assert!(matches!(handle.await.unwrap(), Err(NicheflowError::Cancelled(_))));
        assert!(project.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_run_closes_channel() {
        let transport = Arc::new(ScriptedTransport::new().hold_open());
        let project = Arc::new(ProjectData::new());
        let stream = Arc::new(stream_over(&transport));

        let handle = {
            let stream = stream.clone();
            let project = project.clone();
            tokio::spawn(async move { stream.start(request(), &project).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(transport.channel_closed());
        assert_eq!(stream.state(), StreamState::Errored);
        assert!(project.is_empty());
    }

    #[tokio::test]
    async fn test_start_while_streaming_is_busy() {
        let transport = Arc::new(ScriptedTransport::new().hold_open());
        let project = Arc::new(ProjectData::new());
        let stream = Arc::new(stream_over(&transport));

        let handle = {
            let stream = stream.clone();
            let project = project.clone();
            tokio::spawn(async move { stream.start(request(), &project).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = stream.start(request(), &project).await.unwrap_err();
        assert!(matches!(err, NicheflowError::StageBusy(_)));

        stream.close("test over");
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_export_requires_completion() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "completed", "results": results()}))
                .export_bytes(b"keyword,type\nemergency plumber,service\n"),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        assert!(matches!(stream.export_csv().await, Err(NicheflowError::InvalidState(_))));
        assert_eq!(stream.suggested_export_filename(), None);

        stream.start(request(), &project).await.unwrap();

        let csv = stream.export_csv().await.unwrap();
        assert!(csv.starts_with(b"keyword,type"));
        assert_eq!(transport.exports(), 1);
        assert_eq!(
            stream.suggested_export_filename().as_deref(),
            Some("niche_analysis_plumber_birmingham al.csv")
        );
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let transport = Arc::new(
            ScriptedTransport::new()
                .event(&json!({"status": "processing", "step": "geo", "message": "..."}))
                .transport_error("reset")
                .fallback(AnalyzeResponse::ok(results())),
        );
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport).with_event_sink(sink.clone());

        stream.start(request(), &project).await.unwrap();

        assert_eq!(
            sink.event_types(),
            vec!["stream.started", "stream.progress", "stream.fallback", "stream.completed"]
        );
    }

    #[tokio::test]
    async fn test_rerun_after_error() {
        let transport = Arc::new(ScriptedTransport::new().transport_error("reset"));
        let project = Arc::new(ProjectData::new());
        let stream = stream_over(&transport);

        assert!(stream.start(request(), &project).await.is_err());
        assert!(stream.start(request(), &project).await.is_err());
        assert_eq!(transport.analyze_calls(), 2);
        assert_eq!(transport.subscribes(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_expectations() {
        let mut transport = MockAnalysisTransport::new();
        transport
            .expect_subscribe()
            .times(1)
            .returning(|_| Err(StreamTransportError::new("no event source")));
        transport.expect_trigger().times(0);
        transport
            .expect_analyze()
            .withf(|req| req.query == "plumber" && req.location == "birmingham al")
            .times(1)
            .returning(|_| Ok(AnalyzeResponse::ok(json!({"query": "plumber"}))));

        let project = Arc::new(ProjectData::new());
        let stream = ProgressStream::new("niche-analysis", "nicheAnalysis", Arc::new(transport));

        let stored = stream.start(request(), &project).await.unwrap();
        assert_eq!(stored, json!({"query": "plumber"}));
    }
}
