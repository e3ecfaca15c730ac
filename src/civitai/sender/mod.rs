use std::time::Duration;

use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::civitai::io::ApiConfig;
use crate::civitai::query::ListingQuery;
use crate::civitai::sender::entries::{ListingPage, ListingResponse};

pub(crate) mod entries;

/// Longest pause between two retries of the same request.
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Most memory reserved up front for a resource body, whatever its `Content-Length` says.
const MAX_PREALLOCATED_BYTES: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub(crate) enum SenderError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Error: {status} - {body}")]
    Status { status: StatusCode, body: String },

    #[error("Malformed listing response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SenderError {
    /// Timeouts and connection failures are worth another attempt; everything else is final.
    fn is_retryable(&self) -> bool {
        match self {
            SenderError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

pub(crate) type SenderResult<T> = Result<T, SenderError>;

/// Sends every request to the remote catalog through one shared client.
#[derive(Clone, Debug)]
pub(crate) struct RequestSender {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl RequestSender {
    /// Builds the client. A blank `api_key` means requests are sent without credentials.
    pub(crate) fn new(config: &ApiConfig, api_key: Option<String>) -> SenderResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        let api_key = api_key.filter(|key| !key.trim().is_empty());
        trace!("Request sender created for {}", config.base_url);
        trace!("API Key: {}", "*".repeat(api_key.as_deref().map_or(0, str::len)));

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Requests the first listing page for `query`.
    pub(crate) async fn fetch_first_page(&self, query: &ListingQuery) -> SenderResult<ListingPage> {
        let pairs = query.query_pairs();
        let response = self
            .send_with_retry(|| {
                self.authorized(self.client.get(&self.base_url).query(&pairs))
            })
            .await?;
        Self::read_listing(response).await
    }

    /// Follows a continuation URL. It already carries every query parameter.
    pub(crate) async fn fetch_page_url(&self, url: &str) -> SenderResult<ListingPage> {
        let response = self
            .send_with_retry(|| self.authorized(self.client.get(url)))
            .await?;
        Self::read_listing(response).await
    }

    async fn read_listing(response: Response) -> SenderResult<ListingPage> {
        let response = Self::check_status(response).await?;
        let body = response.bytes().await?;
        let listing: ListingResponse = serde_json::from_slice(&body)?;
        debug!("Listing page holds {} items", listing.items.len());
        Ok(listing.into())
    }

    /// Downloads a resource and returns its raw bytes.
    pub(crate) async fn fetch_resource(&self, url: &str) -> SenderResult<Vec<u8>> {
        let response = self.send_with_retry(|| self.client.get(url)).await?;
        let response = Self::check_status(response).await?;

        let mut content = Vec::with_capacity(capacity_hint(response.content_length()));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            content.extend_from_slice(&chunk?);
        }

        trace!("Fetched {} bytes from {}", content.len(), url);
        Ok(content)
    }

    async fn check_status(response: Response) -> SenderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SenderError::Status { status, body })
    }

    /// Sends the request built by `build`, retrying timeouts and connection failures.
    async fn send_with_retry<F>(&self, build: F) -> SenderResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let err = SenderError::from(err);
                    if attempts > self.max_retries || !err.is_retryable() {
                        return Err(err);
                    }

                    let backoff = calculate_backoff(attempts, self.retry_base_delay);
                    warn!("{}", err);
                    info!(
                        "Retry {}/{} in {}ms",
                        attempts, self.max_retries, backoff.as_millis()
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// Buffer size to reserve for a body announced as `content_length` bytes.
fn capacity_hint(content_length: Option<u64>) -> usize {
    content_length
        .map_or(0, |len| usize::try_from(len).unwrap_or(usize::MAX))
        .min(MAX_PREALLOCATED_BYTES)
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at one minute.
fn calculate_backoff(attempt: usize, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let delay = (base.as_millis() as u64).saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(MAX_RETRY_DELAY_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civitai::query::{ModelId, ModelVersionId, NsfwFilter};
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slow_sender(server: &MockServer, max_retries: usize) -> RequestSender {
        let config = ApiConfig {
            base_url: format!("{}/api/v1/images", server.uri()),
            timeout_secs: 1,
            max_retries,
            retry_base_delay_ms: 10,
            ..ApiConfig::default()
        };
        RequestSender::new(&config, None).unwrap()
    }

    async fn mount_slow_listing(server: &MockServer, times: u64) {
        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"items": []}"#)
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    fn sender_for(server: &MockServer, api_key: Option<&str>) -> RequestSender {
        let config = ApiConfig {
            base_url: format!("{}/api/v1/images", server.uri()),
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        RequestSender::new(&config, api_key.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn first_page_carries_query_and_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .and(query_param("limit", "50"))
            .and(query_param("modelId", "1000"))
            .and(query_param("modelVersionId", "55"))
            .and(query_param("nsfw", "none"))
            .and(query_param("sort", "Most Reactions"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items": [{"url": "https://img.example/a.png", "meta": {"prompt": "p"}}], "metadata": {}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let query = ListingQuery::new(
            ModelId::parse("1000").unwrap(),
            Some(ModelVersionId::parse("55").unwrap()),
        )
        .with_page_size(50)
        .with_nsfw(NsfwFilter::Off);

        let page = sender_for(&server, Some("secret"))
            .fetch_first_page(&query)
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].annotation_text, "p");
    }

    #[tokio::test]
    async fn missing_version_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/images"))
            .and(query_param_is_missing("modelVersionId"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
            .expect(1)
            .mount(&server)
            .await;

        let query = ListingQuery::new(ModelId::parse("1000").unwrap(), None);
        let page = sender_for(&server, None).fetch_first_page(&query).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn error_status_keeps_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let query = ListingQuery::new(ModelId::parse("1000").unwrap(), None);
        let err = sender_for(&server, None).fetch_first_page(&query).await.unwrap_err();

        match err {
            SenderError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_listing_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = sender_for(&server, None)
            .fetch_page_url(&format!("{}/api/v1/images?cursor=2", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::Decode(_)));
    }

    #[tokio::test]
    async fn resources_are_fetched_without_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/imgA.jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let sender = sender_for(&server, Some("secret"));
        let bytes = sender
            .fetch_resource(&format!("{}/img/imgA.jpeg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(1000);
        assert_eq!(calculate_backoff(1, base), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(3, base), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(12, base), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[test]
    fn status_errors_are_not_retried() {
        let err = SenderError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn timeouts_are_retried_up_to_the_limit() {
        let server = MockServer::start().await;
        mount_slow_listing(&server, 2).await;

        let query = ListingQuery::new(ModelId::parse("1000").unwrap(), None);
        let err = slow_sender(&server, 1).fetch_first_page(&query).await.unwrap_err();

        match err {
            SenderError::Request(source) => assert!(source.is_timeout()),
            other => panic!("unexpected error: {other}"),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn no_retries_means_a_single_attempt() {
        let server = MockServer::start().await;
        mount_slow_listing(&server, 1).await;

        let query = ListingQuery::new(ModelId::parse("1000").unwrap(), None);
        let err = slow_sender(&server, 0).fetch_first_page(&query).await.unwrap_err();

        assert!(matches!(err, SenderError::Request(_)));
        server.verify().await;
    }

    #[test]
    fn announced_length_only_reserves_so_much() {
        assert_eq!(capacity_hint(None), 0);
        assert_eq!(capacity_hint(Some(1024)), 1024);
        assert_eq!(capacity_hint(Some(u64::MAX)), MAX_PREALLOCATED_BYTES);
    }
}
