//! Progress events emitted by the download pipeline.
//!
//! The pipeline never prints. It hands every step to a [ProgressSink], which decides
//! whether the step ends up in the log, on a channel for a background worker, or in a test.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Why an item produced no files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SkipReason {
    /// The listing had no resource URL for the item.
    MissingUrl,
    /// No usable file name could be derived from the resource URL.
    UnusableName,
    /// The image is already on disk.
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProgressEvent {
    RequestingPage { url: String },
    PageFetched { page: usize, items: usize },
    Skipped { name: String, reason: SkipReason },
    Downloaded { name: String, bytes: usize },
    AnnotationSaved { name: String },
    ItemFailed { url: String, reason: String },
    Waiting { delay: Duration },
    /// A page came back without items.
    Exhausted,
    /// The last page had no continuation.
    Finished,
    Cancelled,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RequestingPage { url } => write!(f, "Requesting: {}", url),
            ProgressEvent::PageFetched { page, items } => {
                write!(f, "Page {} listed {} images", page, items)
            }
            ProgressEvent::Skipped { name, reason } => match reason {
                SkipReason::MissingUrl => write!(f, "Image has no URL, skipping"),
                SkipReason::UnusableName => write!(f, "Cannot derive a file name, skipping: {}", name),
                SkipReason::AlreadyExists => write!(f, "Image already exists, skipping: {}", name),
            },
            ProgressEvent::Downloaded { name, bytes } => {
                write!(f, "Downloaded image: {} ({} bytes)", name, bytes)
            }
            ProgressEvent::AnnotationSaved { name } => write!(f, "Saved prompt for: {}", name),
            ProgressEvent::ItemFailed { url, reason } => {
                write!(f, "Failed to download image: {} ({})", url, reason)
            }
            ProgressEvent::Waiting { delay } => write!(
                f,
                "Waiting {:.1} seconds before the next download...",
                delay.as_secs_f64()
            ),
            ProgressEvent::Exhausted => write!(f, "No more images to download."),
            ProgressEvent::Finished => write!(f, "All pages processed."),
            ProgressEvent::Cancelled => write!(f, "Download stopped."),
        }
    }
}

/// Receives progress events from the pipeline.
pub(crate) trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ItemFailed { .. } => warn!("{}", event),
            ProgressEvent::Skipped {
                reason: SkipReason::MissingUrl,
                ..
            } => debug!("{}", event),
            _ => info!("{}", event),
        }
    }
}

/// Forwards events to whoever holds the receiving end, typically the foreground of a
/// background download.
#[derive(Debug, Clone)]
pub(crate) struct ChannelSink {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub(crate) fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: &ProgressEvent) {
        debug!("{}", event);
        // The receiver going away only means nobody is watching any more.
        let _ = self.sender.send(event.clone());
    }
}
