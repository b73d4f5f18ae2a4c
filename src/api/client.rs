//! HTTP client for the media, advent and gallery services

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response};

use crate::config::Config;
use crate::models::{AdventEntry, AdventView, ImageKey, ImagePage, PhotoFilter};

use super::{AdventApi, ApiError, ImageIndexApi, MediaApi, MediaPayload};

/// Header carrying the session id on every request
pub const SESSION_HEADER: &str = "X-Session-Id";

/// HTTP implementation of the service traits
#[derive(Debug, Clone)]
pub struct HttpMediaClient {
    client: Client,
    base_url: String,
    session_id: Option<String>,
}

impl HttpMediaClient {
    /// Create a client against `base_url` (e.g. `https://host/api/v1`)
    pub fn new(base_url: &str, session_id: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, session_id)
    }

    /// Create a client from the application config
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(
            client,
            &config.api_base_url,
            config.session_id.clone(),
        ))
    }

    fn with_client(client: Client, base_url: &str, session_id: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Build API URL
    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, ApiError> {
        let session = self.session_id.as_deref().ok_or(ApiError::NoSession)?;
        Ok(self
            .client
            .request(method, self.api_url(endpoint))
            .header(SESSION_HEADER, session))
    }

    async fn send(&self, method: Method, endpoint: &str) -> Result<Response, ApiError> {
        let response = self.request(method, endpoint)?.send().await?;
        check_status(response).await
    }
}

/// Turn non-success responses into [`ApiError::Status`]
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            message
        },
    })
}

async fn read_payload(response: Response) -> Result<MediaPayload, ApiError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;
    Ok(MediaPayload {
        bytes: bytes.to_vec(),
        content_type,
    })
}

fn thumbnail_endpoint(key: &ImageKey) -> String {
    format!("/image/{}/thumbnail", key.encoded())
}

fn image_endpoint(key: &ImageKey) -> String {
    format!("/image/{}", key.encoded())
}

fn images_endpoint(filter: PhotoFilter, limit: usize, cursor: Option<&str>) -> String {
    let mut endpoint = format!("/images{}?limit={limit}", filter.path());
    if let Some(cursor) = cursor {
        endpoint.push_str("&cursor=");
        endpoint.push_str(&urlencoding::encode(cursor));
    }
    endpoint
}

impl MediaApi for HttpMediaClient {
    async fn fetch_thumbnail(&self, key: &ImageKey) -> Result<MediaPayload, ApiError> {
        let response = self.send(Method::GET, &thumbnail_endpoint(key)).await?;
        read_payload(response).await
    }

    async fn request_thumbnail_generation(&self, key: &ImageKey) -> Result<(), ApiError> {
        self.send(Method::POST, &thumbnail_endpoint(key)).await?;
        Ok(())
    }

    async fn fetch_full_image(&self, key: &ImageKey) -> Result<MediaPayload, ApiError> {
        let response = self.send(Method::GET, &image_endpoint(key)).await?;
        read_payload(response).await
    }
}

impl AdventApi for HttpMediaClient {
    async fn advents(&self, view: AdventView) -> Result<Vec<AdventEntry>, ApiError> {
        let response = self
            .send(Method::GET, &format!("/advent/{}", view.path()))
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_advent(&self, id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, &format!("/advent/{}", urlencoding::encode(id)))
            .await?;
        Ok(())
    }
}

impl ImageIndexApi for HttpMediaClient {
    async fn list_images(
        &self,
        filter: PhotoFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ImagePage, ApiError> {
        let response = self
            .send(Method::GET, &images_endpoint(filter, limit, cursor))
            .await?;
        Ok(response.json().await?)
    }
}
