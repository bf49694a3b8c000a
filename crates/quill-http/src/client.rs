//! Collaborator service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use quill_scheduler::{
    CollaboratorError, ContentGenerator, ContentPlanner, DiscoveredPage, GeneratedArticle,
    ProposedTopic, Publication, Publisher,
};
use quill_store::{Article, Link, Page, Site, Topic};

use crate::HttpError;

/// Writing an article can take minutes. An article job makes two calls back
/// to back, and both must fit inside the stale-job window.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 240;

#[derive(Serialize)]
struct SiteRequest<'a> {
    site: &'a Site,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    site: &'a Site,
    topic: Option<&'a Topic>,
}

#[derive(Serialize)]
struct LinksRequest<'a> {
    site: &'a Site,
    article: &'a Article,
    pages: &'a [Page],
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    site: &'a Site,
    article: &'a Article,
}

#[derive(Deserialize)]
struct PlanResponse {
    topics: Vec<ProposedTopic>,
}

#[derive(Deserialize)]
struct CrawlResponse {
    pages: Vec<DiscoveredPage>,
}

#[derive(Deserialize)]
struct LinksResponse {
    links: Vec<Link>,
}

/// Client for the collaborator service.
pub struct CollaboratorClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl CollaboratorClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, HttpError> {
        Self::with_timeout(
            base_url,
            token,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HttpError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `endpoint` and decode the JSON reply.
    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(endpoint, "calling collaborator");
        let response = request.send().await?;
        self.handle_response(endpoint, response).await
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, HttpError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            warn!(endpoint, ?retry_after_secs, "collaborator rate limited");
            return Err(HttpError::RateLimited {
                endpoint: endpoint.to_string(),
                retry_after_secs,
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("failed to read response: {}", e));
            return Err(HttpError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        // Read the body first so a malformed reply is a JSON error, not a transport one
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ContentPlanner for CollaboratorClient {
    async fn propose(&self, site: &Site) -> Result<Vec<ProposedTopic>, CollaboratorError> {
        let response: PlanResponse = self.post("/plan", &SiteRequest { site }).await?;
        Ok(response.topics)
    }
}

#[async_trait]
impl ContentGenerator for CollaboratorClient {
    async fn write(
        &self,
        site: &Site,
        topic: Option<&Topic>,
    ) -> Result<GeneratedArticle, CollaboratorError> {
        Ok(self.post("/write", &WriteRequest { site, topic }).await?)
    }

    async fn crawl(&self, site: &Site) -> Result<Vec<DiscoveredPage>, CollaboratorError> {
        let response: CrawlResponse = self.post("/crawl", &SiteRequest { site }).await?;
        Ok(response.pages)
    }

    async fn links(
        &self,
        site: &Site,
        article: &Article,
        pages: &[Page],
    ) -> Result<Vec<Link>, CollaboratorError> {
        let response: LinksResponse = self
            .post(
                "/links",
                &LinksRequest {
                    site,
                    article,
                    pages,
                },
            )
            .await?;
        Ok(response.links)
    }
}

#[async_trait]
impl Publisher for CollaboratorClient {
    async fn publish(
        &self,
        site: &Site,
        article: &Article,
    ) -> Result<Publication, CollaboratorError> {
        Ok(self
            .post("/publish", &PublishRequest { site, article })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use quill_store::{NewTopic, SiteUpsert};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn site() -> Site {
        SiteUpsert::domain("usesubwise.app").into_site(Utc::now())
    }

    #[test]
    fn test_default_timeout_fits_stale_window() {
        let stale_secs = quill_scheduler::DEFAULT_STALE_AFTER_MINUTES as u64 * 60;
        assert!(2 * DEFAULT_REQUEST_TIMEOUT_SECS + 60 < stale_secs);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = CollaboratorClient::new("https://collab.example.com/", None).unwrap();
        assert_eq!(client.base_url(), "https://collab.example.com");
    }

    #[tokio::test]
    async fn test_propose_sends_site_and_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/plan"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "site": { "domain": "usesubwise.app" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "topics": [
                    { "label": "Cancel subscriptions", "primaryKeyword": "cancel subscriptions", "priority": 2.0 }
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), Some("secret".into())).unwrap();
        let topics = client.propose(&site()).await.unwrap();

        assert_eq!(
            topics,
            vec![NewTopic {
                label: "Cancel subscriptions".into(),
                priority: Some(2.0),
                ..NewTopic::keyword("cancel subscriptions")
            }]
        );
    }

    #[tokio::test]
    async fn test_write_decodes_article() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Best budget apps",
                "slug": "best-budget-apps",
                "markdown": "# Best budget apps",
                "metaDescription": "A roundup"
            })))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), None).unwrap();
        let article = client.write(&site(), None).await.unwrap();
        assert_eq!(article.slug, "best-budget-apps");
        assert_eq!(article.meta_description.as_deref(), Some("A roundup"));
        assert!(article.sources.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), None).unwrap();
        let err = client.crawl(&site()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Transient(msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/plan"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), None).unwrap();
        let err = client.propose(&site()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Transient(msg) if msg.contains("30s")));
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publish"))
            .respond_with(ResponseTemplate::new(422).set_body_string("slug already published"))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), None).unwrap();
        let article = quill_store::NewArticle {
            site_id: site().id,
            title: "t".into(),
            slug: "t".into(),
            markdown: String::new(),
            ..Default::default()
        }
        .into_draft(&Default::default(), Utc::now());
        let err = client.publish(&site(), &article).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_permanent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/plan"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::new(mock_server.uri(), None).unwrap();
        let err = client.propose(&site()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = CollaboratorClient::with_timeout(
            mock_server.uri(),
            None,
            Duration::from_millis(50),
        )
        .unwrap();
        let err = client.write(&site(), None).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Transient(_)));
    }
}
