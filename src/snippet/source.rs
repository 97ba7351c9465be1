use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::snippet::selection::SelectionKey;

/// Failure of an asynchronous snippet or segmentation load.
///
/// `Clone` so one failure can be handed to every caller waiting on the same
/// load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The load was interrupted on purpose; never surfaced to consumers.
    #[error("fetch cancelled")]
    Cancelled,
    #[error("source error: {0}")]
    Source(String),
    #[error("decode error: {0}")]
    Decode(String),
    /// The caller driving a shared load went away before it finished.
    #[error("fetch abandoned before completion")]
    Abandoned,
}

impl FetchError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Decoded pixels of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: Vec<u16>,
    pub width: usize,
    pub height: usize,
}

impl Raster {
    /// Interpret little-endian `u16` samples.
    pub fn from_le_bytes(bytes: &[u8], width: usize, height: usize) -> Result<Self, FetchError> {
        let Some(expected) = width.checked_mul(height).and_then(|n| n.checked_mul(2)) else {
            return Err(FetchError::Decode(format!("raster size {width}x{height} overflows")));
        };
        if bytes.len() != expected {
            return Err(FetchError::Decode(format!(
                "expected {expected} bytes for a {width}x{height} u16 raster, got {}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { data, width, height })
    }
}

/// Cooperative interruption flag handed to a [`RasterSource`].
///
/// Sources may poll it and bail out with [`FetchError::Cancelled`]; ignoring
/// it is always allowed.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The imaging backend: loads one full plane for a selection.
#[async_trait]
pub trait RasterSource: Send + Sync {
    async fn get_raster(&self, selection: &SelectionKey, signal: Option<&CancelSignal>) -> Result<Raster, FetchError>;
}

/// Planes stored as raw little-endian `u16` files named `c{channel}-t{time}-z{z}.raw`.
pub struct RawDirRasterSource {
    root: PathBuf,
    width: usize,
    height: usize,
}

impl RawDirRasterSource {
    pub fn new(root: impl AsRef<Path>, width: usize, height: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            width,
            height,
        }
    }

    pub fn plane_path(&self, selection: &SelectionKey) -> PathBuf {
        self.root.join(format!(
            "c{}-t{}-z{}.raw",
            selection.channel, selection.time, selection.z
        ))
    }
}

#[async_trait]
impl RasterSource for RawDirRasterSource {
    async fn get_raster(&self, selection: &SelectionKey, signal: Option<&CancelSignal>) -> Result<Raster, FetchError> {
        let path = self.plane_path(selection);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::Source(format!("{}: {e}", path.display())))?;
        if signal.is_some_and(CancelSignal::is_raised) {
            debug!(%selection, "raster read interrupted before decode");
            return Err(FetchError::Cancelled);
        }
        Raster::from_le_bytes(&bytes, self.width, self.height)
    }
}
