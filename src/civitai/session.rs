//! Interactive session: edit the download settings from a menu and run downloads in the
//! background.
//!
//! Settings are loaded once. The menu is redrawn from the in-memory [Settings] on every
//! iteration and every edit writes straight back into them, so nothing on screen can drift
//! from what a download will use.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password, Select};
use tracing::{error, info, trace, warn};

use crate::civitai::io::Config;
use crate::civitai::io::settings::Settings;
use crate::civitai::pipeline::RunSummary;
use crate::civitai::tui::DownloadSpinner;
use crate::civitai::worker::{DownloadWorker, WorkerHandle};

/// Where the API itself is documented.
pub(crate) const API_HELP_URL: &str = "https://github.com/civitai/civitai/wiki/REST-API-Reference";

/// Largest image limit the session lets the user enter.
const MAX_IMAGE_LIMIT: u32 = 1000;

/// Session menu options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionMenuOption {
    DownloadFolder,
    ApiKey,
    ModelId,
    ModelVersionId,
    ImageLimit,
    ToggleNsfw,
    ApiHelp,
    StartDownload,
    SaveSettings,
    Exit,
}

impl SessionMenuOption {
    /// Get all menu options
    pub(crate) fn variants() -> &'static [SessionMenuOption] {
        &[
            SessionMenuOption::DownloadFolder,
            SessionMenuOption::ApiKey,
            SessionMenuOption::ModelId,
            SessionMenuOption::ModelVersionId,
            SessionMenuOption::ImageLimit,
            SessionMenuOption::ToggleNsfw,
            SessionMenuOption::ApiHelp,
            SessionMenuOption::StartDownload,
            SessionMenuOption::SaveSettings,
            SessionMenuOption::Exit,
        ]
    }

    /// Get the display name for the menu option
    pub(crate) fn display_name(&self) -> &'static str {
        match self {
            SessionMenuOption::DownloadFolder => "Download folder",
            SessionMenuOption::ApiKey => "API key",
            SessionMenuOption::ModelId => "Model ID",
            SessionMenuOption::ModelVersionId => "Model version ID",
            SessionMenuOption::ImageLimit => "Image limit",
            SessionMenuOption::ToggleNsfw => "NSFW",
            SessionMenuOption::ApiHelp => "API help",
            SessionMenuOption::StartDownload => "Start download",
            SessionMenuOption::SaveSettings => "Save settings",
            SessionMenuOption::Exit => "Exit",
        }
    }

    /// The menu line, with the current value for options that edit a setting.
    fn label(&self, settings: &Settings) -> String {
        let value = match self {
            SessionMenuOption::DownloadFolder => or_unset(&settings.download_folder),
            SessionMenuOption::ApiKey => {
                if settings.api_key().is_some() {
                    "********".to_string()
                } else {
                    "<not set>".to_string()
                }
            }
            SessionMenuOption::ModelId => or_unset(&settings.model_id),
            SessionMenuOption::ModelVersionId => or_unset(&settings.model_version_id),
            SessionMenuOption::ImageLimit => settings.image_limit.to_string(),
            SessionMenuOption::ToggleNsfw => on_off(settings.nsfw.is_enabled()).to_string(),
            _ => return self.display_name().to_string(),
        };
        format!("{:<18} {}", self.display_name(), value)
    }
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "<not set>".to_string()
    } else {
        value.to_string()
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "On" } else { "Off" }
}

/// The lines printed before a download starts.
fn run_header(settings: &Settings) -> Vec<String> {
    let version = settings.model_version_id.trim();
    vec![
        "Starting image download.".to_string(),
        format!("Folder: {}", settings.download_folder.trim()),
        format!("Model ID: {}", settings.model_id.trim()),
        format!(
            "Model version: {}",
            if version.is_empty() { "Not specified" } else { version }
        ),
        format!("Image limit: {}", settings.image_limit),
        format!("NSFW: {}", on_off(settings.nsfw.is_enabled())),
    ]
}

fn validate_image_limit(limit: &u32) -> Result<(), String> {
    if (1..=MAX_IMAGE_LIMIT).contains(limit) {
        Ok(())
    } else {
        Err(format!("The image limit must be between 1 and {}", MAX_IMAGE_LIMIT))
    }
}

fn validate_folder(folder: &String) -> Result<(), String> {
    let folder = folder.trim();
    if folder.is_empty() || Path::new(folder).is_dir() {
        Ok(())
    } else {
        Err(format!("{} is not an existing directory", folder))
    }
}

/// Answer to the question asked on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitChoice {
    Save,
    Discard,
    Cancel,
}

impl ExitChoice {
    fn variants() -> &'static [ExitChoice] {
        &[ExitChoice::Save, ExitChoice::Discard, ExitChoice::Cancel]
    }

    fn display_name(&self) -> &'static str {
        match self {
            ExitChoice::Save => "Yes",
            ExitChoice::Discard => "No",
            ExitChoice::Cancel => "Cancel",
        }
    }
}

/// The interactive session and the settings it edits.
pub(crate) struct Session {
    config: Config,
    settings: Settings,
    settings_path: PathBuf,
    theme: ColorfulTheme,
}

impl Session {
    /// Loads the settings at `settings_path`. A broken settings file is reported and the
    /// session starts from the defaults.
    pub(crate) fn new(config: Config, settings_path: PathBuf) -> Self {
        let settings = match Settings::load(&settings_path) {
            Ok(settings) => settings,
            Err(err) => {
                error!("Error loading settings: {}", err);
                println!("{}: {}", style("Error loading settings").red().bold(), err);
                Settings::default()
            }
        };

        Self {
            config,
            settings,
            settings_path,
            theme: ColorfulTheme::default(),
        }
    }

    /// Run the menu loop until the user exits.
    pub(crate) async fn run(&mut self) -> Result<()> {
        loop {
            match self.show_menu()? {
                SessionMenuOption::DownloadFolder => self.edit_download_folder()?,
                SessionMenuOption::ApiKey => self.edit_api_key()?,
                SessionMenuOption::ModelId => {
                    self.settings.model_id = self.edit_text("Model ID", &self.settings.model_id)?;
                }
                SessionMenuOption::ModelVersionId => {
                    self.settings.model_version_id =
                        self.edit_text("Model version ID (optional)", &self.settings.model_version_id)?;
                }
                SessionMenuOption::ImageLimit => self.edit_image_limit()?,
                SessionMenuOption::ToggleNsfw => {
                    self.settings.nsfw = self.settings.nsfw.toggled();
                    trace!("NSFW set to {}", self.settings.nsfw.as_query_value());
                }
                SessionMenuOption::ApiHelp => {
                    println!("\nThe API is documented at {}\n", style(API_HELP_URL).cyan().underlined());
                }
                SessionMenuOption::StartDownload => self.start_download().await?,
                SessionMenuOption::SaveSettings => self.save_settings(),
                SessionMenuOption::Exit => {
                    if self.confirm_exit()? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn show_menu(&self) -> Result<SessionMenuOption> {
        let options = SessionMenuOption::variants();
        let labels: Vec<String> = options.iter().map(|option| option.label(&self.settings)).collect();

        println!("\n{}", style("Civitai Downloader").cyan().bold());
        let selection = Select::with_theme(&self.theme)
            .items(&labels)
            .default(0)
            .interact()?;

        Ok(options[selection])
    }

    fn edit_text(&self, prompt: &str, current: &str) -> Result<String> {
        let value: String = Input::with_theme(&self.theme)
            .with_prompt(prompt)
            .with_initial_text(current)
            .allow_empty(true)
            .interact_text()?;
        Ok(value.trim().to_string())
    }

    fn edit_download_folder(&mut self) -> Result<()> {
        let folder: String = Input::with_theme(&self.theme)
            .with_prompt("Download folder")
            .with_initial_text(&self.settings.download_folder)
            .allow_empty(true)
            .validate_with(validate_folder)
            .interact_text()?;
        self.settings.download_folder = folder.trim().to_string();
        Ok(())
    }

    fn edit_api_key(&mut self) -> Result<()> {
        let key = Password::with_theme(&self.theme)
            .with_prompt("API key (leave empty to clear)")
            .allow_empty_password(true)
            .interact()?;
        self.settings.api_key = key.trim().to_string();
        Ok(())
    }

    fn edit_image_limit(&mut self) -> Result<()> {
        let limit: u32 = Input::with_theme(&self.theme)
            .with_prompt(format!("Image limit (1-{})", MAX_IMAGE_LIMIT))
            .default(self.settings.image_limit)
            .validate_with(validate_image_limit)
            .interact_text()?;
        self.settings.image_limit = limit;
        Ok(())
    }

    /// Runs one download on the background worker and follows it until it ends.
    ///
    /// The menu is not shown again before the worker finished, so at most one worker runs.
    async fn start_download(&self) -> Result<()> {
        let job = match self.settings.to_job() {
            Ok(job) => job,
            Err(err) => {
                println!("{}", style(err).red());
                return Ok(());
            }
        };

        let api_key = self.settings.api_key();
        if api_key.is_none() {
            warn!("No API key set, the listing may leave out restricted images");
        }

        for line in run_header(&self.settings) {
            info!("{}", line);
        }
        info!("Politeness delay: {}", self.config.politeness);

        let mut handle = DownloadWorker::spawn(
            &self.config.api,
            api_key,
            self.config.politeness.build_strategy(),
            job,
        )?;
        let spinner = DownloadSpinner::start("Downloading");
        println!("{}", style("Press Ctrl-C to stop the download.").dim());

        follow_worker(&mut handle, &spinner, tokio::signal::ctrl_c()).await;

        match handle.join().await {
            Ok(summary) => {
                spinner.finish(finish_message(&summary));
                info!(
                    "Downloaded {} images, skipped {}, failed {} over {} pages",
                    summary.downloaded, summary.skipped, summary.failed, summary.pages_fetched
                );
            }
            Err(err) => {
                spinner.finish("Download failed.");
                error!("An error occurred during the download: {}", err);
                println!("{}: {}", style("An error occurred during the download").red().bold(), err);
            }
        }

        Ok(())
    }

    /// Saves the settings. A failure is reported and the session carries on.
    fn save_settings(&self) {
        match self.settings.save(&self.settings_path) {
            Ok(()) => println!("{}", style("Settings saved successfully!").green()),
            Err(err) => {
                error!("Error saving settings: {}", err);
                println!("{}: {}", style("Error saving settings").red().bold(), err);
            }
        }
    }

    /// Asks whether to save before leaving. Returns `false` when the user cancels.
    fn confirm_exit(&self) -> Result<bool> {
        let choices = ExitChoice::variants();
        let names: Vec<&str> = choices.iter().map(ExitChoice::display_name).collect();
        let selection = Select::with_theme(&self.theme)
            .with_prompt("Save current settings before exiting?")
            .items(&names)
            .default(0)
            .interact_opt()?;

        match selection.map(|index| choices[index]) {
            Some(ExitChoice::Save) => {
                self.save_settings();
                Ok(true)
            }
            Some(ExitChoice::Discard) => Ok(true),
            Some(ExitChoice::Cancel) | None => Ok(false),
        }
    }
}

/// Shows worker events until the worker is done. `stop_signal` is listened to for the
/// whole run and stops the worker once it fires.
async fn follow_worker<F>(handle: &mut WorkerHandle, spinner: &DownloadSpinner, stop_signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(stop_signal);
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => spinner.show(&event),
                None => break,
            },
            signal = &mut stop_signal, if !handle.is_stopping() => {
                if let Err(err) = signal {
                    error!("Unable to listen for Ctrl-C: {}", err);
                }
                handle.stop();
                spinner.show_message("Stopping download...");
            }
        }
    }
}

fn finish_message(summary: &RunSummary) -> &'static str {
    if summary.cancelled {
        "Download stopped."
    } else {
        "Download finished!"
    }
}
