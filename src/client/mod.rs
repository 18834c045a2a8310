use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServerOptions;
use crate::error::{SyncError, SyncResult};
use crate::files::{FileRef, Page, PageKey};

pub mod push;
pub mod reply;

pub use push::{PushInbox, PushMessage, PushSender, FILE_STATUS};
pub use reply::ReplyRegistry;

#[async_trait]
pub trait FileApi: Send + Sync {
    async fn fetch_page(&self, key: &PageKey) -> SyncResult<Page>;

    async fn update_tags(&self, unique_id: &str, tags: &str) -> SyncResult<()>;

    async fn update_tags_batch(&self, files: &[FileRef], tags: &str) -> SyncResult<()>;

    /// Starts a backend method whose result is delivered later over the
    /// push stream. Returns the correlation code to wait for.
    async fn invoke(&self, method: &str, params: Value) -> SyncResult<String>;
}

#[derive(Debug, Serialize)]
struct TagsBody<'a> {
    tags: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchTagsBody<'a> {
    files: &'a [FileRef],
    tags: &'a str,
}

#[derive(Debug, Serialize)]
struct MethodBody<'a> {
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct MethodAccepted {
    code: String,
}

#[derive(Clone)]
pub struct HttpFileApi {
    client: Client,
    base_url: String,
}

impl HttpFileApi {
    pub fn new(options: &ServerOptions) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn checked(response: Response) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl FileApi for HttpFileApi {
    async fn fetch_page(&self, key: &PageKey) -> SyncResult<Page> {
        let url = self.url(&key.to_string());
        let response = self.client.get(&url).send().await?;
        let bytes = Self::checked(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn update_tags(&self, unique_id: &str, tags: &str) -> SyncResult<()> {
        let path = format!("/file/{}/update-tags", urlencoding::encode(unique_id));
        let response = self
            .client
            .post(self.url(&path))
            .json(&TagsBody { tags })
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn update_tags_batch(&self, files: &[FileRef], tags: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url("/files/update-tags"))
            .json(&BatchTagsBody { files, tags })
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn invoke(&self, method: &str, params: Value) -> SyncResult<String> {
        let response = self
            .client
            .post(self.url("/telegram/api"))
            .json(&MethodBody { method, params })
            .send()
            .await?;
        let bytes = Self::checked(response).await?.bytes().await?;
        let accepted: MethodAccepted = serde_json::from_slice(&bytes)?;
        Ok(accepted.code)
    }
}
