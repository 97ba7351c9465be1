use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::genealogy::{Cell, GenealogyModel, frame_number};
use crate::segmentation::feature::Feature;
use crate::segmentation::source::SegmentationSource;
use crate::snippet::cache::SnippetCache;
use crate::snippet::source::FetchError;

type FeatureKey = (i64, String);

/// Memoized access to per-cell segmentation features.
///
/// Absent features are cached too, so a missing file is only asked for once.
pub struct SegmentationStore {
    source: Arc<dyn SegmentationSource>,
    cache: SnippetCache<FeatureKey, Option<Arc<Feature>>>,
}

impl SegmentationStore {
    pub fn new(source: Arc<dyn SegmentationSource>, capacity: usize) -> Self {
        Self {
            source,
            cache: SnippetCache::new(capacity),
        }
    }

    pub fn cache(&self) -> &SnippetCache<FeatureKey, Option<Arc<Feature>>> {
        &self.cache
    }

    pub async fn get_feature(&self, frame: i64, track_id: &str) -> Result<Option<Arc<Feature>>, FetchError> {
        let source = Arc::clone(&self.source);
        let owned_id = track_id.to_string();
        self.cache
            .fetch((frame, track_id.to_string()), move || async move {
                let feature = source.fetch_feature(frame, &owned_id).await?;
                Ok(feature.map(Arc::new))
            })
            .await
    }

    /// Outline of `cell` in its own frame. Cells without a frame have none.
    pub async fn get_cell_segmentation(
        &self,
        model: &GenealogyModel,
        cell: &Cell,
    ) -> Result<Option<Arc<Feature>>, FetchError> {
        let Some(frame) = cell.num(&model.headers().frame).and_then(frame_number) else {
            debug!(row = cell.row_id, "cell has no frame, skipping segmentation");
            return Ok(None);
        };
        self.get_feature(frame, &cell.track_id).await
    }

    /// Outlines of every cell that has one, in input order.
    pub async fn get_cell_segmentations<'a>(
        &self,
        model: &GenealogyModel,
        cells: impl IntoIterator<Item = &'a Cell>,
    ) -> Result<Vec<Arc<Feature>>, FetchError> {
        let pending = cells
            .into_iter()
            .map(|cell| self.get_cell_segmentation(model, cell));
        let mut features = Vec::new();
        for result in join_all(pending).await {
            if let Some(feature) = result? {
                features.push(feature);
            }
        }
        Ok(features)
    }

    pub async fn get_frame_segmentations(
        &self,
        model: &GenealogyModel,
        frame: i64,
    ) -> Result<Vec<Arc<Feature>>, FetchError> {
        self.get_cell_segmentations(model, model.cells_at_frame(frame)).await
    }
}
