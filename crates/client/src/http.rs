//! HTTP + WebSocket client for the CoreBGP API server.
//!
//! CRUD and list go over plain HTTP; the watch feed is a WebSocket carrying
//! one JSON frame per change.

use std::sync::Arc;

use async_trait::async_trait;
use corebgp_core::{Announcement, AnnouncementKey, Revision};
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::store::{AnnouncementStore, Snapshot, WatchStream};
use crate::wire::{self, ListResponse, MutationResponse};

/// Client for the announcement API server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Parsed base URL.
    base_url: Url,
    /// Configuration for the client.
    config: Arc<ClientConfig>,
    /// Shared HTTP client.
    http_client: reqwest::Client,
}

impl ApiClient {
    /// Create a new client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config_error(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::connection_failed(e.to_string()))?;

        Ok(Self {
            base_url,
            config: Arc::new(config),
            http_client,
        })
    }

    /// Create a new client for the given base URL with default settings.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::with_config`].
    pub fn with_url(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::with_base_url(base_url))
    }

    /// Base URL this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::config_error("base URL cannot carry a path"))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self) -> Result<Url> {
        self.url_with_segments(&["v1", "announcements", ""])
    }

    fn announcement_url(&self, key: &AnnouncementKey) -> Result<Url> {
        self.url_with_segments(&["v1", "announcements", &key.project, &key.name])
    }

    /// WebSocket URL for a watch starting at `from`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the base URL scheme has no WebSocket
    /// equivalent.
    pub fn watch_url(&self, from: Revision) -> Result<Url> {
        let mut url = self.url_with_segments(&["v1", "watch", "announcements", ""])?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::config_error(format!(
                    "unsupported URL scheme '{other}'"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::config_error(format!("cannot switch scheme to {scheme}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("revision", &from.to_string());
        Ok(url)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn map_send_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::timeout(self.timeout_ms())
        } else if error.is_connect() {
            Error::connection_failed(error.to_string())
        } else {
            Error::Http(error)
        }
    }
}

/// Turn a non-success response into an error, keeping the body for context.
async fn unexpected(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::unexpected_status(status, body)
}

async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::decode(e.to_string()))
}

#[async_trait]
impl AnnouncementStore for ApiClient {
    async fn get(&self, key: &AnnouncementKey) -> Result<Announcement> {
        let url = self.announcement_url(key)?;
        debug!(%url, "Fetching announcement");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::OK => decode_json(response).await,
            StatusCode::NOT_FOUND => Err(Error::not_found(key.clone())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn create(&self, announcement: &Announcement) -> Result<Revision> {
        let url = self.collection_url()?;
        debug!(%url, key = %announcement.key(), "Creating announcement");

        let response = self
            .http_client
            .post(url)
            .json(announcement)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let body: MutationResponse = decode_json(response).await?;
                Ok(body.revision)
            }
            StatusCode::CONFLICT => Err(Error::conflict(announcement.key())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn update(&self, announcement: &Announcement) -> Result<Revision> {
        let url = self.collection_url()?;
        debug!(%url, key = %announcement.key(), "Updating announcement");

        let response = self
            .http_client
            .patch(url)
            .json(announcement)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let body: MutationResponse = decode_json(response).await?;
                Ok(body.revision)
            }
            StatusCode::NOT_FOUND => Err(Error::not_found(announcement.key())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn delete(&self, key: &AnnouncementKey) -> Result<()> {
        let url = self.announcement_url(key)?;
        debug!(%url, "Deleting announcement");

        let response = self
            .http_client
            .delete(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::not_found(key.clone())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn list(&self) -> Result<Snapshot> {
        let url = self.collection_url()?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status() != StatusCode::OK {
            return Err(unexpected(response).await);
        }

        // Unusable records are passed through; the reconciler rejects and
        // counts them without failing the whole listing.
        let body: ListResponse = decode_json(response).await?;

        debug!(
            revision = %body.revision,
            count = body.announcements.len(),
            "Listed announcements"
        );
        Ok(Snapshot {
            announcements: body.announcements,
            revision: body.revision,
        })
    }

    async fn watch(&self, from: Revision) -> Result<WatchStream> {
        let url = self.watch_url(from)?;
        info!(%url, "Opening watch stream");

        let (socket, _response) =
            tokio::time::timeout(self.config.timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| Error::timeout(self.timeout_ms()))?
                .map_err(|e| {
                    Error::connection_failed(format!("failed to establish websocket connection: {e}"))
                })?;

        let events = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(wire::decode_frame(text.as_str())),
                Ok(Message::Binary(bytes)) => Some(
                    std::str::from_utf8(&bytes)
                        .map_err(|e| Error::decode(format!("non UTF-8 frame: {e}")))
                        .and_then(wire::decode_frame),
                ),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Watch stream closed by server");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::stream_closed(e.to_string()))),
            }
        });

        Ok(Box::pin(events))
    }

    async fn health_check(&self) -> Result<()> {
        let url = self.url_with_segments(&["healthz"])?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(response).await)
        }
    }
}
