use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use mockalchemy_core::Record;

use super::StorageBackend;
use crate::errors::{StorageError, StorageResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote CRUD API ("cloud" storage).
///
/// Endpoints, relative to the base URL:
/// - `GET|PUT /collections/{name}` whole snapshot
/// - `POST /collections/{name}/records` create one
/// - `PUT|DELETE /collections/{name}/records/{id}` update or delete one
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>) -> StorageResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(StorageError::Unavailable(
                "cloud storage requires a base url".to_string(),
            ));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{collection}", self.base_url)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/records/{id}", self.collection_url(collection))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> StorageResult<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(StorageError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            })
        }
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn load(&self, collection: &str) -> StorageResult<Option<Vec<Record>>> {
        let url = self.collection_url(collection);
        let response = self.authorize(self.client.get(&url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(StorageError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }

    async fn save_all(&self, collection: &str, records: &[Record]) -> StorageResult<()> {
        let url = self.collection_url(collection);
        self.send(self.client.put(&url).json(records), &url).await?;
        Ok(())
    }

    async fn create_one(&self, collection: &str, record: &Record) -> StorageResult<()> {
        let url = format!("{}/records", self.collection_url(collection));
        self.send(self.client.post(&url).json(record), &url).await?;
        Ok(())
    }

    async fn update_one(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        let url = self.record_url(collection, id);
        self.send(self.client.put(&url).json(record), &url).await?;
        Ok(())
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        let url = self.record_url(collection, id);
        self.send(self.client.delete(&url), &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoint_urls() {
        let backend = HttpBackend::new("https://mock.example.com/api/", None).expect("backend");
        assert_eq!(backend.base_url(), "https://mock.example.com/api");
        assert_eq!(
            backend.collection_url("users"),
            "https://mock.example.com/api/collections/users"
        );
        assert_eq!(
            backend.record_url("users", "u1"),
            "https://mock.example.com/api/collections/users/records/u1"
        );
    }

    #[test]
    fn rejects_empty_base_url() {
        assert!(matches!(
            HttpBackend::new("/", None),
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_storage_error() {
        let backend = HttpBackend::new("http://127.0.0.1:9", None).expect("backend");
        assert!(backend.load("users").await.is_err());
    }
}
