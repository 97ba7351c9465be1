use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::segmentation::feature::Feature;
use crate::snippet::source::FetchError;

#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid segmentation feature: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<SegmentationError> for FetchError {
    fn from(err: SegmentationError) -> Self {
        match err {
            SegmentationError::Decode(e) => FetchError::Decode(e.to_string()),
            other => FetchError::Source(other.to_string()),
        }
    }
}

/// Name of the payload holding the outline of `track_id` at `frame`.
pub fn feature_file_name(frame: i64, track_id: &str) -> String {
    format!("{frame}-{track_id}.json")
}

/// Loads one segmentation feature per `(frame, track)`.
///
/// A feature that does not exist is `Ok(None)`, not an error.
#[async_trait]
pub trait SegmentationSource: Send + Sync {
    async fn fetch_feature(&self, frame: i64, track_id: &str) -> Result<Option<Feature>, SegmentationError>;
}

/// Features served over HTTP at `{base}/{frame}-{trackId}.json`.
pub struct HttpSegmentationSource {
    client: Client,
    base_url: String,
}

impl HttpSegmentationSource {
    pub fn new(base_url: &str) -> Result<Self, SegmentationError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SegmentationError::Request {
                url: base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn feature_url(&self, frame: i64, track_id: &str) -> String {
        format!("{}/{}", self.base_url, feature_file_name(frame, track_id))
    }
}

#[async_trait]
impl SegmentationSource for HttpSegmentationSource {
    async fn fetch_feature(&self, frame: i64, track_id: &str) -> Result<Option<Feature>, SegmentationError> {
        let url = self.feature_url(frame, track_id);
        let request_error = |e: reqwest::Error| SegmentationError::Request {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(request_error)?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(%url, "no segmentation");
                Ok(None)
            }
            status if !status.is_success() => Err(SegmentationError::Status {
                url,
                status: status.as_u16(),
            }),
            _ => {
                let body = response.bytes().await.map_err(request_error)?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
        }
    }
}

/// Features stored as files named like the HTTP layout.
pub struct DirSegmentationSource {
    root: PathBuf,
}

impl DirSegmentationSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn feature_path(&self, frame: i64, track_id: &str) -> PathBuf {
        self.root.join(feature_file_name(frame, track_id))
    }
}

#[async_trait]
impl SegmentationSource for DirSegmentationSource {
    async fn fetch_feature(&self, frame: i64, track_id: &str) -> Result<Option<Feature>, SegmentationError> {
        let path = self.feature_path(frame, track_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no segmentation");
                Ok(None)
            }
            Err(source) => Err(SegmentationError::Io { path, source }),
        }
    }
}
