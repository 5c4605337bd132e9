use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Item, ItemId},
    error::ApiError,
    protocol::{ItemChanges, NewItem},
};
use tracing::debug;
use url::Url;

use crate::error::RemoteError;

/// The remote `items` collection, as seen by the coordinator.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Item>, RemoteError>;
    async fn create(&self, new_item: &NewItem) -> Result<Item, RemoteError>;
    async fn update(&self, id: &ItemId, changes: &ItemChanges) -> Result<Item, RemoteError>;
    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError>;
}

pub struct HttpRemoteStore {
    http: Client,
    base_url: Url,
}

impl HttpRemoteStore {
    pub fn new(server_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|err| err.message)
            .unwrap_or(body);
        debug!(status = status.as_u16(), %message, "items request rejected");
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(message));
        }
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list(&self) -> Result<Vec<Item>, RemoteError> {
        let response = self.send(self.http.get(self.endpoint(&["items"]))).await?;
        decode(response).await
    }

    async fn create(&self, new_item: &NewItem) -> Result<Item, RemoteError> {
        let request = self.http.post(self.endpoint(&["items"])).json(new_item);
        decode(self.send(request).await?).await
    }

    async fn update(&self, id: &ItemId, changes: &ItemChanges) -> Result<Item, RemoteError> {
        let request = self
            .http
            .patch(self.endpoint(&["items", id.as_str()]))
            .json(changes);
        decode(self.send(request).await?).await
    }

    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError> {
        self.send(self.http.delete(self.endpoint(&["items", id.as_str()])))
            .await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|err| RemoteError::Malformed(err.to_string()))
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(err.to_string())
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
