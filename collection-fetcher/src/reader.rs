use std::sync::Arc;

use async_trait::async_trait;
use indexsync::errors::Result as SyncResult;
use indexsync::models::Record;
use indexsync::reader::RecordReader;

use crate::client::CollectionService;
use crate::models::flatten_object;

/// Walks a remote collection page by page, fetching each listed object in turn.
///
/// A failed object fetch is reported from `next` but still advances past that object, so the
/// caller can skip it and carry on.
pub struct UrlCollectionReader {
    service: Arc<dyn CollectionService>,
    path: String,
    id_field: String,
    pages_fetched: u32,
    page_ids: Vec<String>,
    position: usize,
    exhausted: bool,
}

impl UrlCollectionReader {
    pub fn new(service: Arc<dyn CollectionService>, path: impl Into<String>) -> Self {
        Self {
            service,
            path: path.into(),
            id_field: "id".to_string(),
            pages_fetched: 0,
            page_ids: Vec::new(),
            position: 0,
            exhausted: false,
        }
    }

    /// Field that receives the listing id when an object description lacks it.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Restarts from the first page of `path`.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.pages_fetched = 0;
        self.page_ids.clear();
        self.position = 0;
        self.exhausted = false;
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    fn current_page_has_more(&self) -> bool {
        self.position < self.page_ids.len()
    }

    async fn fetch_next_page(&mut self) -> SyncResult<()> {
        let page = self.pages_fetched + 1;
        let listing = self.service.fetch_page(&self.path, page).await?;
        self.pages_fetched = page;
        self.page_ids = listing.ids();
        self.position = 0;
        log::info!(
            "Collection page {} of '{}' lists {} objects",
            page,
            self.path,
            self.page_ids.len()
        );
        if self.page_ids.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordReader for UrlCollectionReader {
    async fn has_next(&mut self) -> SyncResult<bool> {
        if self.current_page_has_more() {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }
        self.fetch_next_page().await?;
        Ok(self.current_page_has_more())
    }

    async fn next(&mut self) -> SyncResult<Option<Record>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let id = self.page_ids[self.position].clone();
        self.position += 1;

        let object = self.service.fetch_object(&id).await?;
        let mut record = flatten_object(&object);
        if record.get(&self.id_field).is_none() {
            record.insert(self.id_field.clone(), &id);
        }
        Ok(Some(record))
    }
}
