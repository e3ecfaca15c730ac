//! The fetch-and-save pipeline.
//!
//! Walks the listing pages of one model (optionally one model version) in order and, for
//! every listed image, stores the image and its prompt under the destination root. Images
//! already on disk are skipped, so an interrupted run is resumed by running it again.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::civitai::io::directory::{DownloadTarget, resource_file_name};
use crate::civitai::politeness::DelayStrategy;
use crate::civitai::progress::{ProgressEvent, ProgressSink, SkipReason};
use crate::civitai::query::ListingQuery;
use crate::civitai::sender::entries::Item;
use crate::civitai::sender::{RequestSender, SenderError};

#[derive(Error, Debug)]
pub(crate) enum PipelineError {
    #[error("Listing request failed: {0}")]
    Listing(#[from] SenderError),

    #[error("{0:#}")]
    Storage(anyhow::Error),

    #[error("Failed to save {name}: {source}")]
    Save {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to set up the HTTP client: {0}")]
    Client(#[source] SenderError),

    #[error("Download worker stopped unexpectedly: {0}")]
    Worker(String),
}

pub(crate) type PipelineResult<T> = Result<T, PipelineError>;

/// What to download and where to put it.
#[derive(Debug, Clone)]
pub(crate) struct DownloadJob {
    pub(crate) query: ListingQuery,
    pub(crate) destination_root: PathBuf,
}

/// Counts of what a run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) pages_fetched: usize,
    pub(crate) downloaded: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
    pub(crate) cancelled: bool,
}

pub(crate) struct Pipeline {
    sender: RequestSender,
    delay: Box<dyn DelayStrategy>,
    sink: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub(crate) fn new(sender: RequestSender, delay: Box<dyn DelayStrategy>, sink: Arc<dyn ProgressSink>) -> Self {
        Self { sender, delay, sink }
    }

    fn emit(&self, event: ProgressEvent) {
        self.sink.emit(&event);
    }

    /// Runs `job` until the listing is exhausted, a listing request fails, or `cancel` fires.
    ///
    /// Cancellation is checked before every page and every item and interrupts the pause
    /// between downloads. A download already in flight always completes first.
    pub(crate) async fn run(&mut self, job: &DownloadJob, cancel: &CancellationToken) -> PipelineResult<RunSummary> {
        let query = &job.query;
        let target = DownloadTarget::new(&job.destination_root, query.model_id(), query.model_version_id());
        info!(
            "Downloading images of model {} (version: {}) into {}",
            query.model_id(),
            query.model_version_id().map_or("all".to_string(), |v| v.to_string()),
            target.directory().display()
        );
        debug!(
            "Page size {}, NSFW filter {}",
            query.page_size(),
            query.nsfw().as_query_value()
        );

        let mut summary = RunSummary::default();
        let mut next_page_url: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(summary));
            }

            let page = match next_page_url.take() {
                None => {
                    self.emit(ProgressEvent::RequestingPage {
                        url: self.sender.base_url().to_string(),
                    });
                    self.sender.fetch_first_page(query).await?
                }
                Some(url) => {
                    self.emit(ProgressEvent::RequestingPage { url: url.clone() });
                    self.sender.fetch_page_url(&url).await?
                }
            };
            summary.pages_fetched += 1;
            self.emit(ProgressEvent::PageFetched {
                page: summary.pages_fetched,
                items: page.items.len(),
            });

            if page.items.is_empty() {
                self.emit(ProgressEvent::Exhausted);
                return Ok(summary);
            }

            target.ensure().map_err(PipelineError::Storage)?;

            for item in page.items {
                if cancel.is_cancelled() {
                    return Ok(self.cancelled(summary));
                }
                if self.process_item(&target, item, &mut summary).await? {
                    self.pause(cancel).await;
                }
            }

            // A stop during the last pause of a page still ends the run as cancelled.
            if cancel.is_cancelled() {
                return Ok(self.cancelled(summary));
            }

            match page.next_page_url {
                Some(url) => next_page_url = Some(url),
                None => {
                    self.emit(ProgressEvent::Finished);
                    return Ok(summary);
                }
            }
        }
    }

    /// Handles one listed image. Returns whether a download was attempted.
    async fn process_item(
        &self,
        target: &DownloadTarget,
        item: Item,
        summary: &mut RunSummary,
    ) -> PipelineResult<bool> {
        let Some(url) = item.resource_url else {
            summary.skipped += 1;
            self.emit(ProgressEvent::Skipped {
                name: String::new(),
                reason: SkipReason::MissingUrl,
            });
            return Ok(false);
        };

        let name = match resource_file_name(&url) {
            Some(name) => name,
            None => {
                summary.skipped += 1;
                self.emit(ProgressEvent::Skipped {
                    name: url,
                    reason: SkipReason::UnusableName,
                });
                return Ok(false);
            }
        };

        // An image named like its own annotation would be overwritten by it.
        let (image_path, annotation_path) = target.artifact_paths(&name);
        if image_path == annotation_path {
            summary.skipped += 1;
            self.emit(ProgressEvent::Skipped {
                name,
                reason: SkipReason::UnusableName,
            });
            return Ok(false);
        }

        if target.contains(&name) {
            summary.skipped += 1;
            self.emit(ProgressEvent::Skipped {
                name,
                reason: SkipReason::AlreadyExists,
            });
            return Ok(false);
        }

        match self.sender.fetch_resource(&url).await {
            Ok(content) => {
                target
                    .save_artifact(&name, &content, &item.annotation_text)
                    .map_err(|source| PipelineError::Save {
                        name: name.clone(),
                        source,
                    })?;
                summary.downloaded += 1;
                self.emit(ProgressEvent::Downloaded {
                    name: name.clone(),
                    bytes: content.len(),
                });
                self.emit(ProgressEvent::AnnotationSaved { name });
            }
            Err(err) => {
                summary.failed += 1;
                self.emit(ProgressEvent::ItemFailed {
                    url,
                    reason: err.to_string(),
                });
            }
        }

        Ok(true)
    }

    /// Waits out the politeness delay unless the run is cancelled first.
    async fn pause(&mut self, cancel: &CancellationToken) {
        let delay = self.delay.next_delay();
        if delay.is_zero() {
            return;
        }

        self.emit(ProgressEvent::Waiting { delay });
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => debug!("Politeness delay interrupted"),
        }
    }

    fn cancelled(&self, mut summary: RunSummary) -> RunSummary {
        summary.cancelled = true;
        self.emit(ProgressEvent::Cancelled);
        summary
    }
}
