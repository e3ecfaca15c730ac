use std::fs::{read_to_string, write};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, trace};

use crate::civitai::pipeline::DownloadJob;
use crate::civitai::query::{
    DEFAULT_PAGE_SIZE, InputError, InputResult, ListingQuery, ModelId, ModelVersionId, NsfwFilter,
};

/// Name of the file the interactive session keeps its settings in.
pub(crate) const SETTINGS_NAME: &str = "civitai_settings.json";

#[derive(Error, Debug)]
pub(crate) enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) type SettingsResult<T> = Result<T, SettingsError>;

/// Everything the interactive session remembers between launches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) download_folder: String,
    pub(crate) api_key: String,
    pub(crate) model_id: String,
    pub(crate) model_version_id: String,
    pub(crate) image_limit: u32,
    pub(crate) nsfw: NsfwFilter,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_folder: String::new(),
            api_key: String::new(),
            model_id: String::new(),
            model_version_id: String::new(),
            image_limit: DEFAULT_PAGE_SIZE,
            nsfw: NsfwFilter::default(),
        }
    }
}

impl Settings {
    /// Reads the settings at `path`. A missing file yields the defaults.
    pub(crate) fn load(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            trace!("{}: does not exist, using default settings", path.display());
            return Ok(Settings::default());
        }

        let settings = serde_json::from_str(&read_to_string(path)?)?;
        trace!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub(crate) fn save(&self, path: &Path) -> SettingsResult<()> {
        write(path, serde_json::to_string_pretty(self)?)?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// The credential to send, if one was entered.
    pub(crate) fn api_key(&self) -> Option<String> {
        let key = self.api_key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    /// Checks the settings and turns them into a job for the pipeline.
    pub(crate) fn to_job(&self) -> InputResult<DownloadJob> {
        let folder = self.download_folder.trim();
        if folder.is_empty() || !Path::new(folder).is_dir() {
            return Err(InputError::InvalidDestination(folder.to_string()));
        }

        let model_id = ModelId::parse(&self.model_id)?;
        let model_version_id = ModelVersionId::parse_optional(&self.model_version_id)?;
        let query = ListingQuery::new(model_id, model_version_id)
            .with_page_size(self.image_limit)
            .with_nsfw(self.nsfw);

        Ok(DownloadJob {
            query,
            destination_root: PathBuf::from(folder),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join(SETTINGS_NAME)).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.image_limit, 100);
        assert_eq!(settings.nsfw, NsfwFilter::On);
        assert_eq!(settings.api_key(), None);
    }

    #[test]
    fn reads_files_with_missing_keys_and_old_spelling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_NAME);
        write(&path, r#"{"model_id": "1000", "nsfw": "None"}"#).unwrap();

        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.model_id, "1000");
        assert_eq!(settings.nsfw, NsfwFilter::Off);
        assert_eq!(settings.image_limit, 100);
        assert!(settings.download_folder.is_empty());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_NAME);
        let settings = Settings {
            download_folder: dir.path().display().to_string(),
            api_key: "key".to_string(),
            model_id: "1000".to_string(),
            model_version_id: "55".to_string(),
            image_limit: 20,
            nsfw: NsfwFilter::Off,
        };

        settings.save(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["nsfw"], "none");
        assert_eq!(raw["image_limit"], 20);
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_NAME);
        write(&path, "{not json").unwrap();

        assert!(matches!(Settings::load(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn job_requires_an_existing_folder() {
        let settings = Settings {
            download_folder: "/definitely/not/here".to_string(),
            model_id: "1000".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.to_job(), Err(InputError::InvalidDestination(_))));

        let empty = Settings {
            model_id: "1000".to_string(),
            ..Settings::default()
        };
        assert!(matches!(empty.to_job(), Err(InputError::InvalidDestination(_))));
    }

    #[test]
    fn job_validates_identifiers() {
        let dir = tempdir().unwrap();
        let mut settings = Settings {
            download_folder: dir.path().display().to_string(),
            model_id: "abc".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.to_job(), Err(InputError::InvalidModelId(_))));

        settings.model_id = "1000".to_string();
        settings.model_version_id = "v2".to_string();
        assert!(matches!(settings.to_job(), Err(InputError::InvalidModelVersionId(_))));

        settings.model_version_id = " 55 ".to_string();
        settings.image_limit = 20;
        settings.nsfw = NsfwFilter::Off;
        let job = settings.to_job().unwrap();
        assert_eq!(job.destination_root, dir.path());
        assert_eq!(job.query.model_version_id().map(ModelVersionId::as_str), Some("55"));
        assert_eq!(job.query.page_size(), 20);
        assert_eq!(job.query.nsfw(), NsfwFilter::Off);
    }
}
