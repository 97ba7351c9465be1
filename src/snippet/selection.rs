use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoundingBoxError {
    #[error("invalid bounding box format: expected 'left,bottom,right,top', got '{0}'")]
    InvalidFormat(String),
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(#[from] std::num::ParseIntError),
    #[error("left ({left}) must not exceed right ({right})")]
    InvalidWidth { left: i64, right: i64 },
    #[error("top ({top}) must not exceed bottom ({bottom})")]
    InvalidHeight { top: i64, bottom: i64 },
}

/// A crop box in pixel coordinates.
///
/// Rows grow downwards, so `top` is the smaller row index and `bottom` the
/// larger one. The box covers columns `left..right` and rows `top..bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
    pub top: i64,
}

impl BoundingBox {
    pub fn new(left: i64, bottom: i64, right: i64, top: i64) -> Result<Self, BoundingBoxError> {
        if left > right {
            return Err(BoundingBoxError::InvalidWidth { left, right });
        }
        if top > bottom {
            return Err(BoundingBoxError::InvalidHeight { top, bottom });
        }
        Ok(Self {
            left,
            bottom,
            right,
            top,
        })
    }

    /// Box of `size` pixels on each side centred on `(x, y)`.
    ///
    /// A negative size yields an inverted box and is rejected like any other.
    pub fn centered(x: f64, y: f64, size: i64) -> Result<Self, BoundingBoxError> {
        let half = size / 2;
        let left = (x.round() as i64).saturating_sub(half);
        let top = (y.round() as i64).saturating_sub(half);
        Self::new(left, top.saturating_add(size), left.saturating_add(size), top)
    }

    /// Zero for a hand-built inverted box.
    pub fn width(&self) -> usize {
        self.right.saturating_sub(self.left).max(0) as usize
    }

    pub fn height(&self) -> usize {
        self.bottom.saturating_sub(self.top).max(0) as usize
    }

    pub fn area(&self) -> usize {
        self.width().saturating_mul(self.height())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.bottom, self.right, self.top)
    }
}

impl FromStr for BoundingBox {
    type Err = BoundingBoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [left, bottom, right, top] = parts.as_slice() else {
            return Err(BoundingBoxError::InvalidFormat(s.to_string()));
        };
        BoundingBox::new(left.parse()?, bottom.parse()?, right.parse()?, top.parse()?)
    }
}

/// Identity of one raster fetch: a channel, timepoint and z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectionKey {
    pub channel: u32,
    pub time: u32,
    pub z: u32,
}

impl SelectionKey {
    pub fn new(channel: u32, time: u32, z: u32) -> Self {
        Self { channel, time, z }
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}/t{}/z{}", self.channel, self.time, self.z)
    }
}

/// A fetch unit together with the crop boxes wanted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub key: SelectionKey,
    pub boxes: Vec<BoundingBox>,
}

impl Selection {
    pub fn new(key: SelectionKey, boxes: Vec<BoundingBox>) -> Self {
        Self { key, boxes }
    }

    /// Cache keys of every crop in this selection.
    pub fn snippet_keys(&self) -> impl Iterator<Item = SnippetKey> + '_ {
        self.boxes.iter().map(|&bbox| SnippetKey {
            selection: self.key,
            bbox,
        })
    }
}

/// Cache key of one cropped snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnippetKey {
    pub selection: SelectionKey,
    pub bbox: BoundingBox,
}
