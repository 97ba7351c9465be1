use serde::Serialize;

use crate::genealogy::GenealogyModel;

pub const DEFAULT_ATTRIBUTE: &str = "mass";

/// One sample of an attribute over time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time: f64,
    pub value: f64,
}

/// Attribute values of one track, in cell order.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSeries {
    pub track_id: String,
    /// Generation within the lineage.
    pub generation: usize,
    /// Distance below the track the series was started from.
    pub depth: usize,
    pub points: Vec<SeriesPoint>,
    /// Not an ancestor or descendant of the selected track.
    pub muted: bool,
}

/// Per-track series of one attribute across a lineage.
#[derive(Debug, Clone, Serialize)]
pub struct LineageSeries {
    pub lineage_id: String,
    pub attribute: String,
    /// Tracks in lineage pre-order.
    pub tracks: Vec<TrackSeries>,
    /// Value range over every point, for axis scaling.
    pub value_range: Option<(f64, f64)>,
}

impl LineageSeries {
    pub fn point_count(&self) -> usize {
        self.tracks.iter().map(|t| t.points.len()).sum()
    }

    pub fn highlighted(&self) -> impl Iterator<Item = &TrackSeries> {
        self.tracks.iter().filter(|t| !t.muted)
    }
}

/// Mean of the attribute over all cells of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMean {
    pub frame: i64,
    pub mean: f64,
    /// Cells that carried the attribute.
    pub count: usize,
}

/// Builds the series shown by aggregate views.
pub struct AggregateCalculator {
    /// Numeric attribute to plot.
    pub attribute: String,
    /// Generations below the founder to include; `None` for all.
    pub max_depth: Option<usize>,
}

impl AggregateCalculator {
    pub fn new() -> Self {
        Self {
            attribute: DEFAULT_ATTRIBUTE.to_string(),
            max_depth: None,
        }
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attribute = attribute.to_string();
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Series for every track of `lineage_id`.
    ///
    /// With a `selected` track, series that are not its direct relatives are
    /// flagged `muted`. Cells lacking the time or the attribute are skipped.
    pub fn lineage_series(
        &self,
        model: &GenealogyModel,
        lineage_id: &str,
        selected: Option<&str>,
    ) -> Option<LineageSeries> {
        let lineage = model.lineage(lineage_id)?;
        let time_col = &model.headers().time;

        let mut range: Option<(f64, f64)> = None;
        let mut tracks = Vec::new();
        for (track, depth) in model.lineage_tracks(&lineage.lineage_id, self.max_depth).with_depth() {
            let points: Vec<SeriesPoint> = track
                .cells
                .iter()
                .filter_map(|cell| {
                    Some(SeriesPoint {
                        time: cell.num(time_col)?,
                        value: cell.num(&self.attribute)?,
                    })
                })
                .collect();

            for p in &points {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(p.value), hi.max(p.value)),
                    None => (p.value, p.value),
                });
            }

            tracks.push(TrackSeries {
                track_id: track.track_id.clone(),
                generation: track.generation(),
                depth,
                points,
                muted: selected.is_some_and(|s| !model.is_direct_relation(s, &track.track_id)),
            });
        }

        Some(LineageSeries {
            lineage_id: lineage.lineage_id.clone(),
            attribute: self.attribute.clone(),
            tracks,
            value_range: range,
        })
    }

    /// Per-frame mean over the whole dataset. Frames where no cell has the
    /// attribute are left out.
    pub fn frame_means(&self, model: &GenealogyModel) -> Vec<FrameMean> {
        model
            .frame_list()
            .iter()
            .filter_map(|&frame| {
                let (sum, count) = model
                    .cells_at_frame(frame)
                    .filter_map(|c| c.num(&self.attribute))
                    .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
                (count > 0).then(|| FrameMean {
                    frame,
                    mean: sum / count as f64,
                    count,
                })
            })
            .collect()
    }
}

impl Default for AggregateCalculator {
    fn default() -> Self {
        Self::new()
    }
}
