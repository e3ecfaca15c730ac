//! Listing request composition for the images endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Sort order requested from the listing endpoint. Fixed for every run.
pub(crate) const SORT_ORDER: &str = "Most Reactions";

/// Default number of items requested per listing page.
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size the listing endpoint accepts.
pub(crate) const MAX_PAGE_SIZE: u32 = 200;

/// Errors raised while validating user supplied identifiers.
#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum InputError {
    #[error("Invalid modelId: {0:?}")]
    InvalidModelId(String),

    #[error("Invalid modelVersionId: {0:?}")]
    InvalidModelVersionId(String),

    #[error("Download folder is not an existing directory: {0}")]
    InvalidDestination(String),
}

pub(crate) type InputResult<T> = Result<T, InputError>;

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Identifier of a model in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModelId(String);

impl ModelId {
    pub(crate) fn parse(value: &str) -> InputResult<Self> {
        let value = value.trim();
        if is_numeric(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InputError::InvalidModelId(value.to_string()))
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single version of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModelVersionId(String);

impl ModelVersionId {
    pub(crate) fn parse(value: &str) -> InputResult<Self> {
        let value = value.trim();
        if is_numeric(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InputError::InvalidModelVersionId(value.to_string()))
        }
    }

    /// Parses an optional version id where blank input means "not given".
    pub(crate) fn parse_optional(value: &str) -> InputResult<Option<Self>> {
        if value.trim().is_empty() {
            Ok(None)
        } else {
            Self::parse(value).map(Some)
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Controls whether restricted content is included in the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum NsfwFilter {
    #[default]
    #[serde(rename = "X")]
    On,
    #[serde(rename = "none", alias = "None")]
    Off,
}

impl NsfwFilter {
    pub(crate) fn as_query_value(&self) -> &'static str {
        match self {
            NsfwFilter::On => "X",
            NsfwFilter::Off => "none",
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        matches!(self, NsfwFilter::On)
    }

    pub(crate) fn toggled(&self) -> Self {
        match self {
            NsfwFilter::On => NsfwFilter::Off,
            NsfwFilter::Off => NsfwFilter::On,
        }
    }
}

/// Everything needed to request the first listing page.
#[derive(Debug, Clone)]
pub(crate) struct ListingQuery {
    model_id: ModelId,
    model_version_id: Option<ModelVersionId>,
    page_size: u32,
    nsfw: NsfwFilter,
}

impl ListingQuery {
    pub(crate) fn new(model_id: ModelId, model_version_id: Option<ModelVersionId>) -> Self {
        Self {
            model_id,
            model_version_id,
            page_size: DEFAULT_PAGE_SIZE,
            nsfw: NsfwFilter::default(),
        }
    }

    /// Sets the page size, clamping it into the range the endpoint accepts.
    pub(crate) fn with_page_size(mut self, page_size: u32) -> Self {
        let clamped = page_size.clamp(1, MAX_PAGE_SIZE);
        if clamped != page_size {
            warn!("Page size {} is out of range, using {}", page_size, clamped);
        }
        self.page_size = clamped;
        self
    }

    pub(crate) fn with_nsfw(mut self, nsfw: NsfwFilter) -> Self {
        self.nsfw = nsfw;
        self
    }

    pub(crate) fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub(crate) fn model_version_id(&self) -> Option<&ModelVersionId> {
        self.model_version_id.as_ref()
    }

    pub(crate) fn page_size(&self) -> u32 {
        self.page_size
    }

    pub(crate) fn nsfw(&self) -> NsfwFilter {
        self.nsfw
    }

    /// Query parameters for the first listing request, in a stable order.
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("limit", self.page_size.to_string()),
            ("modelId", self.model_id.to_string()),
        ];
        if let Some(version) = &self.model_version_id {
            pairs.push(("modelVersionId", version.to_string()));
        }
        pairs.push(("nsfw", self.nsfw.as_query_value().to_string()));
        pairs.push(("sort", SORT_ORDER.to_string()));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_accepts_digits_only() {
        assert_eq!(ModelId::parse(" 1000 ").unwrap().as_str(), "1000");
        assert!(ModelId::parse("").is_err());
        assert!(ModelId::parse("abc").is_err());
        assert!(ModelId::parse("-12").is_err());
        assert!(ModelId::parse("12.5").is_err());
    }

    #[test]
    fn blank_version_is_absent() {
        assert_eq!(ModelVersionId::parse_optional("   ").unwrap(), None);
        assert_eq!(
            ModelVersionId::parse_optional("55").unwrap().unwrap().as_str(),
            "55"
        );
        assert_eq!(
            ModelVersionId::parse_optional("5x"),
            Err(InputError::InvalidModelVersionId("5x".to_string()))
        );
    }

    #[test]
    fn query_pairs_omit_missing_version() {
        let query = ListingQuery::new(ModelId::parse("1000").unwrap(), None);
        let keys: Vec<_> = query.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["limit", "modelId", "nsfw", "sort"]);
    }

    #[test]
    fn query_pairs_carry_every_option() {
        let query = ListingQuery::new(
            ModelId::parse("1000").unwrap(),
            Some(ModelVersionId::parse("55").unwrap()),
        )
        .with_page_size(20)
        .with_nsfw(NsfwFilter::Off);

        assert_eq!(
            query.query_pairs(),
            vec![
                ("limit", "20".to_string()),
                ("modelId", "1000".to_string()),
                ("modelVersionId", "55".to_string()),
                ("nsfw", "none".to_string()),
                ("sort", "Most Reactions".to_string()),
            ]
        );
    }

    #[test]
    fn page_size_is_clamped() {
        let id = ModelId::parse("1").unwrap();
        assert_eq!(ListingQuery::new(id.clone(), None).with_page_size(0).page_size(), 1);
        assert_eq!(ListingQuery::new(id, None).with_page_size(1000).page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn nsfw_filter_reads_both_spellings() {
        let on: NsfwFilter = serde_json::from_str("\"X\"").unwrap();
        let off: NsfwFilter = serde_json::from_str("\"None\"").unwrap();
        assert_eq!(on, NsfwFilter::On);
        assert_eq!(off, NsfwFilter::Off);
        assert_eq!(serde_json::to_string(&off).unwrap(), "\"none\"");
    }
}
