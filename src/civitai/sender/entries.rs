use serde::Deserialize;

/// Annotation written when an image carries no prompt.
pub(crate) const MISSING_PROMPT: &str = "No prompt available.";

/// Raw body of a listing page.
#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct ListingResponse {
    #[serde(default)]
    pub(crate) items: Vec<ImageEntry>,
    #[serde(default)]
    pub(crate) metadata: Option<ListingMetadata>,
}

/// Pagination block of a listing page.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListingMetadata {
    #[serde(default)]
    pub(crate) next_page: Option<String>,
}

/// One image as listed by the endpoint. Only the fields the downloader uses.
#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct ImageEntry {
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) meta: Option<ImageMeta>,
}

/// Generation metadata attached to an image.
#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct ImageMeta {
    #[serde(default)]
    pub(crate) prompt: Option<String>,
}

/// A fetched listing page reduced to what the pipeline needs.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListingPage {
    pub(crate) items: Vec<Item>,
    pub(crate) next_page_url: Option<String>,
}

/// A listed image: where to fetch it and the text saved beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub(crate) resource_url: Option<String>,
    pub(crate) annotation_text: String,
}

impl From<ImageEntry> for Item {
    fn from(entry: ImageEntry) -> Self {
        let annotation_text = entry
            .meta
            .and_then(|meta| meta.prompt)
            .unwrap_or_else(|| MISSING_PROMPT.to_string());
        Item {
            resource_url: entry.url.filter(|url| !url.trim().is_empty()),
            annotation_text,
        }
    }
}

impl From<ListingResponse> for ListingPage {
    fn from(response: ListingResponse) -> Self {
        ListingPage {
            items: response.items.into_iter().map(Item::from).collect(),
            next_page_url: response
                .metadata
                .and_then(|metadata| metadata.next_page)
                .filter(|url| !url.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerates_missing_and_null_fields() {
        let body = r#"{
            "items": [
                {"id": 1, "url": "https://img.example/a/imgA.jpeg", "meta": {"prompt": "a cat"}},
                {"id": 2, "url": null, "meta": null},
                {"id": 3, "url": "https://img.example/c/imgC.png", "meta": {"seed": 4}},
                {"id": 4, "url": "https://img.example/d/imgD.png", "meta": {"prompt": null}}
            ],
            "metadata": {"nextCursor": "abc"}
        }"#;

        let page: ListingPage = serde_json::from_str::<ListingResponse>(body).unwrap().into();

        assert_eq!(page.items.len(), 4);
        assert_eq!(page.items[0].annotation_text, "a cat");
        assert_eq!(page.items[1].resource_url, None);
        assert_eq!(page.items[1].annotation_text, MISSING_PROMPT);
        assert_eq!(page.items[2].annotation_text, MISSING_PROMPT);
        assert_eq!(page.items[3].annotation_text, MISSING_PROMPT);
        assert_eq!(page.next_page_url, None);
    }

    #[test]
    fn reads_next_page_url() {
        let body = r#"{"items": [], "metadata": {"nextPage": "https://civitai.com/api/v1/images?cursor=9"}}"#;
        let page: ListingPage = serde_json::from_str::<ListingResponse>(body).unwrap().into();
        assert!(page.items.is_empty());
        assert_eq!(
            page.next_page_url.as_deref(),
            Some("https://civitai.com/api/v1/images?cursor=9")
        );
    }

    #[test]
    fn empty_object_is_an_empty_page() {
        let page: ListingPage = serde_json::from_str::<ListingResponse>("{}").unwrap().into();
        assert!(page.items.is_empty());
        assert!(page.next_page_url.is_none());
    }
}
