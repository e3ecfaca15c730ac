//! One-shot download driven by a few prompts.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::civitai::io::Config;
use crate::civitai::pipeline::{DownloadJob, Pipeline};
use crate::civitai::progress::LogSink;
use crate::civitai::query::{InputError, InputResult, ListingQuery, ModelId, ModelVersionId};
use crate::civitai::sender::RequestSender;

/// Environment variable the API key is read from before prompting for it.
pub(crate) const API_KEY_VARIABLE: &str = "CIVITAI_API_KEY";

/// Validates the prompted answers into a job with the default page size and filter.
fn job_from_answers(folder: &str, model_id: &str, model_version_id: &str) -> InputResult<DownloadJob> {
    let folder = folder.trim();
    if folder.is_empty() || !Path::new(folder).is_dir() {
        return Err(InputError::InvalidDestination(folder.to_string()));
    }

    let query = ListingQuery::new(
        ModelId::parse(model_id)?,
        ModelVersionId::parse_optional(model_version_id)?,
    );
    Ok(DownloadJob {
        query,
        destination_root: PathBuf::from(folder),
    })
}

fn exit_message(err: &InputError) -> &'static str {
    match err {
        InputError::InvalidModelId(_) => "Invalid modelId. Exiting.",
        InputError::InvalidModelVersionId(_) => "Invalid modelVersionId. Exiting.",
        InputError::InvalidDestination(_) => "No folder selected. Exiting.",
    }
}

fn api_key_from_env() -> Option<String> {
    env::var(API_KEY_VARIABLE)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

/// Asks for everything a download needs, then runs it in the foreground until it ends or
/// Ctrl-C is pressed.
pub(crate) async fn run_script(config: &Config) -> Result<()> {
    let theme = ColorfulTheme::default();

    let folder: String = Input::with_theme(&theme)
        .with_prompt("Download folder")
        .allow_empty(true)
        .interact_text()?;
    let model_id: String = Input::with_theme(&theme)
        .with_prompt("Enter modelId")
        .allow_empty(true)
        .interact_text()?;
    let model_version_id: String = Input::with_theme(&theme)
        .with_prompt("Enter modelVersionId (optional)")
        .allow_empty(true)
        .interact_text()?;

    let job = match job_from_answers(&folder, &model_id, &model_version_id) {
        Ok(job) => job,
        Err(err) => {
            trace!("{}", err);
            println!("{}", style(exit_message(&err)).yellow());
            return Ok(());
        }
    };

    let api_key = match api_key_from_env() {
        Some(key) => {
            trace!("Using API key from {}", API_KEY_VARIABLE);
            Some(key)
        }
        None => {
            let key = Password::with_theme(&theme)
                .with_prompt("API key (leave empty for none)")
                .allow_empty_password(true)
                .interact()?;
            Some(key)
        }
    };

    let sender = RequestSender::new(&config.api, api_key)?;
    let mut pipeline = Pipeline::new(sender, config.politeness.build_strategy(), Arc::new(LogSink));

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current download");
            watcher.cancel();
        }
    });

    info!("Politeness delay: {}", config.politeness);
    let result = pipeline.run(&job, &cancel).await;
    ctrl_c.abort();

    match result {
        Ok(summary) => {
            info!(
                "Downloaded {} images, skipped {}, failed {} over {} pages",
                summary.downloaded, summary.skipped, summary.failed, summary.pages_fetched
            );
            Ok(())
        }
        Err(err) => {
            println!("{}", style(&err).red());
            Err(err.into())
        }
    }
}
