use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::genealogy::traverse::{LineageCellIter, LineageTrackIter};
use crate::table::HeaderMap;

/// One observation of one cell at one timepoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Position of the source row; unique and stable.
    pub row_id: usize,
    pub track_id: String,
    pub attr_num: HashMap<String, f64>,
    pub attr_str: HashMap<String, String>,
}

impl Cell {
    pub fn num(&self, key: &str) -> Option<f64> {
        self.attr_num.get(key).copied()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.attr_str.get(key).map(String::as_str)
    }
}

/// Index of a track in the model's arena.
pub type TrackIdx = usize;

/// Position of a cell: owning track and index within that track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub track: TrackIdx,
    pub index: usize,
}

/// Statistics derived for every track at build time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TrackStats {
    pub track_length: usize,
    /// True when the time attribute never decreases along the track.
    pub sorted: bool,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    /// Parent hops to the lineage founder.
    pub generation: usize,
}

pub const ATTR_TRACK_LENGTH: &str = "track_length";
pub const ATTR_SORTED: &str = "sorted";
pub const ATTR_MIN_TIME: &str = "min_time";
pub const ATTR_MAX_TIME: &str = "max_time";
pub const ATTR_GENERATION: &str = "generation";

/// A run of observations of the same cell between divisions.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: String,
    /// Raw parent id as read from the first cell; may be empty or a sentinel.
    pub parent_id: String,
    /// Arena index of the real parent, if any.
    pub parent: Option<TrackIdx>,
    pub cells: Vec<Cell>,
    /// Daughter tracks in the order they were linked.
    pub children: Vec<TrackIdx>,
    pub stats: TrackStats,
    /// Derived numeric attributes (`track_length`, `sorted`, `min_time`,
    /// `max_time`, `generation`).
    pub attr_num: HashMap<String, f64>,
}

impl Track {
    pub(crate) fn new(track_id: String, parent_id: String) -> Self {
        Self {
            track_id,
            parent_id,
            parent: None,
            cells: Vec::new(),
            children: Vec::new(),
            stats: TrackStats::default(),
            attr_num: HashMap::new(),
        }
    }

    pub fn is_founder(&self) -> bool {
        self.parent.is_none()
    }

    pub fn generation(&self) -> usize {
        self.stats.generation
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(crate) fn set_stats(&mut self, stats: TrackStats) {
        self.attr_num.insert(ATTR_TRACK_LENGTH.to_string(), stats.track_length as f64);
        self.attr_num
            .insert(ATTR_SORTED.to_string(), if stats.sorted { 1.0 } else { 0.0 });
        if let Some(min) = stats.min_time {
            self.attr_num.insert(ATTR_MIN_TIME.to_string(), min);
        }
        if let Some(max) = stats.max_time {
            self.attr_num.insert(ATTR_MAX_TIME.to_string(), max);
        }
        self.attr_num.insert(ATTR_GENERATION.to_string(), stats.generation as f64);
        self.stats = stats;
    }
}

/// A family tree rooted at a founder track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lineage {
    /// Same as the founder's track id.
    pub lineage_id: String,
    #[serde(skip)]
    pub founder: TrackIdx,
    /// Total cells across every track in the tree.
    pub cell_count: usize,
    /// Number of levels in the tree; a founder without children has 1.
    pub generations: usize,
    pub track_count: usize,
}

/// Serializable overview of one lineage.
#[derive(Debug, Clone, Serialize)]
pub struct LineageSummary {
    pub lineage_id: String,
    pub track_count: usize,
    pub cell_count: usize,
    pub generations: usize,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
}

/// The reconstructed genealogy of one dataset.
///
/// Built in one go by [`crate::genealogy::GenealogyBuilder`] and read-only
/// afterwards, so it can be shared freely between consumers.
#[derive(Debug, Clone, Default)]
pub struct GenealogyModel {
    pub(crate) headers: HeaderMap,
    pub(crate) columns: Vec<String>,
    pub(crate) attribute_columns: Vec<String>,
    pub(crate) tracks: Vec<Track>,
    pub(crate) track_index: HashMap<String, TrackIdx>,
    pub(crate) lineages: Vec<Lineage>,
    pub(crate) lineage_index: HashMap<String, usize>,
    /// Every cell in source row order.
    pub(crate) cell_order: Vec<CellRef>,
    pub(crate) frame_map: BTreeMap<i64, Vec<CellRef>>,
    /// Sorted by time.
    pub(crate) time_map: Vec<(f64, Vec<CellRef>)>,
    pub(crate) frame_list: Vec<i64>,
}

impl GenealogyModel {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Column names in source order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Columns that are plain attributes rather than special columns.
    pub fn attribute_columns(&self) -> &[String] {
        &self.attribute_columns
    }

    /// Tracks in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.track_index.get(track_id).map(|&idx| &self.tracks[idx])
    }

    pub fn track_idx(&self, track_id: &str) -> Option<TrackIdx> {
        self.track_index.get(track_id).copied()
    }

    pub fn track_at(&self, idx: TrackIdx) -> &Track {
        &self.tracks[idx]
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn lineage(&self, lineage_id: &str) -> Option<&Lineage> {
        self.lineage_index.get(lineage_id).map(|&i| &self.lineages[i])
    }

    pub fn cell(&self, cell: CellRef) -> &Cell {
        &self.tracks[cell.track].cells[cell.index]
    }

    /// All cells in source row order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cell_order.iter().map(|&r| self.cell(r))
    }

    pub fn cell_count(&self) -> usize {
        self.cell_order.len()
    }

    fn founder_of(&self, mut idx: TrackIdx) -> TrackIdx {
        // Cycles are rejected at build time, so the walk terminates.
        while let Some(parent) = self.tracks[idx].parent {
            idx = parent;
        }
        idx
    }

    /// Lineage containing the given track.
    pub fn lineage_of(&self, track_id: &str) -> Option<&Lineage> {
        let founder = self.founder_of(self.track_idx(track_id)?);
        self.lineage(&self.tracks[founder].track_id)
    }

    pub fn lineage_id_of(&self, track_id: &str) -> Option<&str> {
        let founder = self.founder_of(self.track_idx(track_id)?);
        Some(self.tracks[founder].track_id.as_str())
    }

    /// Pre-order walk over the tree below `track_id` (inclusive).
    ///
    /// `max_depth` limits how many generations below the start track are
    /// visited; `Some(0)` yields only the start track.
    pub fn lineage_tracks(&self, track_id: &str, max_depth: Option<usize>) -> LineageTrackIter<'_> {
        LineageTrackIter::new(self, self.track_idx(track_id), max_depth)
    }

    /// Every cell below `track_id`, track by track in pre-order.
    pub fn lineage_cells(&self, track_id: &str, max_depth: Option<usize>) -> LineageCellIter<'_> {
        LineageCellIter::new(self.lineage_tracks(track_id, max_depth))
    }

    /// True when one track is an ancestor of the other, or they are the same.
    pub fn is_direct_relation(&self, a: &str, b: &str) -> bool {
        let (Some(a), Some(b)) = (self.track_idx(a), self.track_idx(b)) else {
            return false;
        };
        let (deeper, shallower) = if self.tracks[a].generation() >= self.tracks[b].generation() {
            (a, b)
        } else {
            (b, a)
        };

        let mut current = Some(deeper);
        while let Some(idx) = current {
            if idx == shallower {
                return true;
            }
            if self.tracks[idx].generation() < self.tracks[shallower].generation() {
                return false;
            }
            current = self.tracks[idx].parent;
        }
        false
    }

    /// Sorted, unique frame numbers present in the data.
    pub fn frame_list(&self) -> &[i64] {
        &self.frame_list
    }

    pub fn cells_at_frame(&self, frame: i64) -> impl Iterator<Item = &Cell> {
        self.frame_map
            .get(&frame)
            .into_iter()
            .flatten()
            .map(|&r| self.cell(r))
    }

    pub fn cells_at_time(&self, time: f64) -> impl Iterator<Item = &Cell> {
        self.time_map
            .binary_search_by(|(t, _)| t.total_cmp(&time))
            .ok()
            .map(|i| &self.time_map[i].1)
            .into_iter()
            .flatten()
            .map(|&r| self.cell(r))
    }

    /// Sorted distinct time values.
    pub fn time_list(&self) -> impl Iterator<Item = f64> + '_ {
        self.time_map.iter().map(|(t, _)| *t)
    }

    /// The cell of `track_id` observed at `frame`, if any.
    pub fn track_cell_at_frame(&self, track_id: &str, frame: i64) -> Option<&Cell> {
        let frame_col = &self.headers.frame;
        self.track(track_id)?
            .cells
            .iter()
            .find(|c| c.num(frame_col).and_then(frame_number) == Some(frame))
    }

    pub fn lineage_summary(&self, lineage: &Lineage) -> LineageSummary {
        let (min_time, max_time) = self
            .lineage_tracks(&lineage.lineage_id, None)
            .fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), track| {
                let lo = match (lo, track.stats.min_time) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                let hi = match (hi, track.stats.max_time) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                (lo, hi)
            });

        LineageSummary {
            lineage_id: lineage.lineage_id.clone(),
            track_count: lineage.track_count,
            cell_count: lineage.cell_count,
            generations: lineage.generations,
            min_time,
            max_time,
        }
    }

    pub fn summaries(&self) -> Vec<LineageSummary> {
        self.lineages.iter().map(|l| self.lineage_summary(l)).collect()
    }
}

/// Interpret a numeric frame attribute as an integer frame number.
pub fn frame_number(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}
