use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::civitai::io::ApiConfig;
use crate::civitai::pipeline::{DownloadJob, Pipeline, PipelineError, PipelineResult, RunSummary};
use crate::civitai::politeness::DelayStrategy;
use crate::civitai::progress::{ChannelSink, ProgressEvent};
use crate::civitai::sender::RequestSender;

/// Runs one pipeline on a background task so the foreground stays responsive.
pub(crate) struct DownloadWorker;

impl DownloadWorker {
    /// Builds a pipeline that reports over a channel and starts it on its own task.
    pub(crate) fn spawn(
        api: &ApiConfig,
        api_key: Option<String>,
        delay: Box<dyn DelayStrategy>,
        job: DownloadJob,
    ) -> PipelineResult<WorkerHandle> {
        let sender = RequestSender::new(api, api_key).map_err(PipelineError::Client)?;
        let (events_tx, events) = unbounded_channel();
        let pipeline = Pipeline::new(sender, delay, Arc::new(ChannelSink::new(events_tx)));
        Ok(Self::start(pipeline, job, events))
    }

    fn start(mut pipeline: Pipeline, job: DownloadJob, events: UnboundedReceiver<ProgressEvent>) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            trace!("Download worker started");
            let result = pipeline.run(&job, &task_cancel).await;
            info!("Download worker finished");
            result
        });

        WorkerHandle { cancel, events, task }
    }
}

/// The foreground's view of a running download.
pub(crate) struct WorkerHandle {
    cancel: CancellationToken,
    events: UnboundedReceiver<ProgressEvent>,
    task: JoinHandle<PipelineResult<RunSummary>>,
}

impl WorkerHandle {
    /// Asks the worker to stop at its next check point.
    pub(crate) fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping download...");
            self.cancel.cancel();
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next progress event, or `None` once the worker is done and every event was read.
    pub(crate) async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Waits for the worker to end and returns what the run produced.
    pub(crate) async fn join(self) -> PipelineResult<RunSummary> {
        self.task
            .await
            .map_err(|err| PipelineError::Worker(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::civitai::politeness::FixedDelay;
    use crate::civitai::query::{ListingQuery, ModelId};

    fn api_for(server: &MockServer) -> ApiConfig {
        ApiConfig {
            base_url: format!("{}/api/v1/images", server.uri()),
            timeout_secs: 5,
            ..ApiConfig::default()
        }
    }

    fn job(root: &std::path::Path) -> DownloadJob {
        DownloadJob {
            query: ListingQuery::new(ModelId::parse("1000").unwrap(), None),
            destination_root: root.to_path_buf(),
        }
    }

    #[test]
    fn client_setup_failure_is_not_a_listing_error() {
        let root = tempdir().unwrap();
        let api = ApiConfig {
            user_agent: "bad\nagent".to_string(),
            ..ApiConfig::default()
        };

        let result = DownloadWorker::spawn(
            &api,
            None,
            Box::new(FixedDelay::new(Duration::ZERO)),
            job(root.path()),
        );

        assert!(matches!(result, Err(PipelineError::Client(_))));
    }

    #[tokio::test]
    async fn events_stream_until_the_run_ends() {
        let server = MockServer::start().await;
        let root = tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"url": format!("{}/img/imgA.jpeg", server.uri()), "meta": {"prompt": "p"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/imgA.jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let mut handle = DownloadWorker::spawn(
            &api_for(&server),
            None,
            Box::new(FixedDelay::new(Duration::ZERO)),
            job(root.path()),
        )
        .unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        let summary = handle.join().await.unwrap();

        assert_eq!(summary.downloaded, 1);
        assert!(events.contains(&ProgressEvent::AnnotationSaved {
            name: "imgA.jpeg".to_string()
        }));
        assert_eq!(events.last(), Some(&ProgressEvent::Finished));
        assert!(root.path().join("1000/imgA.txt").exists());
    }

    #[tokio::test]
    async fn stop_cancels_during_the_delay() {
        let server = MockServer::start().await;
        let root = tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"url": format!("{}/img/imgA.jpeg", server.uri())},
                    {"url": format!("{}/img/imgB.jpeg", server.uri())}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/imgA.jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/imgB.jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let mut handle = DownloadWorker::spawn(
            &api_for(&server),
            None,
            Box::new(FixedDelay::new(Duration::from_secs(3600))),
            job(root.path()),
        )
        .unwrap();

        while let Some(event) = handle.next_event().await {
            if matches!(event, ProgressEvent::Waiting { .. }) {
                handle.stop();
            }
        }
        assert!(handle.is_stopping());
        let summary = handle.join().await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.downloaded, 1);
        assert!(root.path().join("1000/imgA.txt").exists());
        assert!(!root.path().join("1000/imgB.jpeg").exists());
    }
}
