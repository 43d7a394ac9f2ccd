//! Elasticsearch-backed [`DocumentIndex`].
//!
//! Each logical document type gets its own index named `<collection>-<type>`, addressed
//! through the typeless document API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use url::Url;

use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::index::{DocType, DocumentIndex};
use crate::models::DocumentId;

/// Server-side retries for concurrent partial updates to the same document.
const RETRY_ON_CONFLICT: u32 = 3;

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: JsonValue,
}

#[derive(Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: Url,
    collection: String,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticsearchIndex {
    pub fn new(host: &str, collection: &str) -> Result<Self> {
        let mut base_url = Url::parse(host)
            .map_err(|e| SyncError::Config(format!("invalid Elasticsearch URL '{}': {}", host, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            collection: collection.to_lowercase(),
            credentials: None,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let mut index = Self::new(&config.elasticsearch_url, &config.collection)?;
        if let Some(username) = &config.username {
            index.credentials = Some((username.clone(), config.password.clone()));
        }
        Ok(index)
    }

    pub fn index_name(&self, doc_type: DocType) -> String {
        format!("{}-{}", self.collection, doc_type.as_str())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Config(format!("cannot build request URL for '{}': {}", path, e)))
    }

    fn doc_url(&self, doc_type: DocType, endpoint: &str, id: DocumentId) -> Result<Url> {
        self.url(&format!("{}/{}/{}", self.index_name(doc_type), endpoint, id))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    /// Makes recent writes visible to search-based endpoints. `false` if the index does not exist.
    async fn refresh(&self, doc_type: DocType) -> Result<bool> {
        let url = self.url(&format!("{}/_refresh", self.index_name(doc_type)))?;
        let response = self.request(Method::POST, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(unexpected(response).await),
        }
    }
}

async fn unexpected(response: Response) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SyncError::BackendUnavailable(format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl DocumentIndex for ElasticsearchIndex {
    async fn open(&self) -> Result<()> {
        let response = self.request(Method::GET, self.base_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        log::info!("Connected to Elasticsearch at {}", self.base_url);
        Ok(())
    }

    async fn exists(&self, doc_type: DocType, id: DocumentId) -> Result<bool> {
        let url = self.doc_url(doc_type, "_doc", id)?;
        let response = self.request(Method::HEAD, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(unexpected(response).await),
        }
    }

    async fn get(&self, doc_type: DocType, id: DocumentId) -> Result<Option<JsonValue>> {
        let url = self.doc_url(doc_type, "_doc", id)?;
        let response = self.request(Method::GET, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: GetResponse = response.json().await?;
                Ok(Some(body.source))
            }
            _ => Err(unexpected(response).await),
        }
    }

    async fn create(&self, doc_type: DocType, id: DocumentId, body: &JsonValue) -> Result<()> {
        let url = self.doc_url(doc_type, "_create", id)?;
        let response = self.request(Method::PUT, url).json(body).send().await?;
        match response.status() {
            StatusCode::CONFLICT => Err(SyncError::DuplicateId(id)),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn update(&self, doc_type: DocType, id: DocumentId, doc: &JsonValue) -> Result<()> {
        let url = self.doc_url(doc_type, "_update", id)?;
        let response = self
            .request(Method::POST, url)
            .query(&[("retry_on_conflict", RETRY_ON_CONFLICT)])
            .json(&json!({ "doc": doc }))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(id)),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn delete(&self, doc_type: DocType, id: DocumentId) -> Result<()> {
        let url = self.doc_url(doc_type, "_doc", id)?;
        let response = self.request(Method::DELETE, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(id)),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected(response).await),
        }
    }

    async fn delete_all(&self, doc_type: DocType) -> Result<u64> {
        if !self.refresh(doc_type).await? {
            return Ok(0);
        }
        let url = self.url(&format!("{}/_delete_by_query", self.index_name(doc_type)))?;
        let response = self
            .request(Method::POST, url)
            .query(&[("conflicts", "proceed"), ("refresh", "true")])
            .json(&json!({ "query": { "match_all": {} } }))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => {
                let body: DeleteByQueryResponse = response.json().await?;
                Ok(body.deleted)
            }
            _ => Err(unexpected(response).await),
        }
    }

    async fn count(&self, doc_type: DocType) -> Result<u64> {
        if !self.refresh(doc_type).await? {
            return Ok(0);
        }
        let url = self.url(&format!("{}/_count", self.index_name(doc_type)))?;
        let response = self.request(Method::GET, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => {
                let body: CountResponse = response.json().await?;
                Ok(body.count)
            }
            _ => Err(unexpected(response).await),
        }
    }
}
