use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};
use url::Url;

use crate::error::{FetcherError, Result};
use crate::models::CollectionPage;

/// A remote collection-management service exposing paginated listings and per-object JSON.
#[async_trait]
pub trait CollectionService: Send + Sync {
    /// Fetches listing page `page` (1-based) of the collection at `path`.
    async fn fetch_page(&self, path: &str, page: u32) -> Result<CollectionPage>;

    /// Fetches the full description of one object.
    async fn fetch_object(&self, id: &str) -> Result<JsonMap<String, JsonValue>>;
}

/// [`CollectionService`] over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpCollectionService {
    http_client: reqwest::Client,
    root_url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl HttpCollectionService {
    pub fn new(root_url: &str) -> Result<Self> {
        let root_url = Url::parse(root_url)?;
        if root_url.cannot_be_a_base() {
            return Err(FetcherError::InvalidParam(format!(
                "'{}' cannot be used as a root URL",
                root_url
            )));
        }
        Ok(Self {
            http_client: reqwest::Client::new(),
            root_url,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, username: String, password: Option<String>) -> Self {
        self.credentials = Some((username, password));
        self
    }

    pub fn page_url(&self, path: &str, page: u32) -> Url {
        let mut url = self.root_url.clone();
        url.set_path(&format!("{}/objects/json", path.trim_matches('/')));
        url.query_pairs_mut().clear().append_pair("page", &page.to_string());
        url
    }

    pub fn object_url(&self, id: &str) -> Url {
        let mut url = self.root_url.clone();
        url.set_path(&format!("objects/{}/json", id));
        url.set_query(None);
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        log::debug!("GET {}", url);
        let mut request = self.http_client.get(url.clone());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(FetcherError::Api(format!(
                "HTTP {} for {}: {}",
                response.status(),
                url,
                response.text().await.unwrap_or_default()
            )));
        }
        let body = response.text().await?;
        log::trace!("Response body: {}", body);
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl CollectionService for HttpCollectionService {
    async fn fetch_page(&self, path: &str, page: u32) -> Result<CollectionPage> {
        let url = self.page_url(path, page);
        log::info!("Requesting collection page {}", url);
        self.get_json(url).await
    }

    async fn fetch_object(&self, id: &str) -> Result<JsonMap<String, JsonValue>> {
        let url = self.object_url(id);
        log::info!("Fetching collection object {} at {}", id, url);
        self.get_json(url).await
    }
}
