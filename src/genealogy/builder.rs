use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::genealogy::model::{CellRef, GenealogyModel, Lineage, Track, TrackIdx, TrackStats, frame_number};
use crate::table::{HeaderMap, RawRecord, classify_row};

/// Parent id meaning "no parent" in addition to an empty value.
pub const DEFAULT_NO_PARENT_SENTINEL: &str = "-1";

/// Structural integrity failures. Any of these aborts the whole load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenealogyError {
    #[error("track '{track_id}' references parent '{parent_id}', which is not in the dataset")]
    MissingParent { track_id: String, parent_id: String },
    #[error("track '{track_id}' is part of a parent cycle")]
    ParentCycle { track_id: String },
}

/// Which columns are special and which are plain attributes.
#[derive(Debug, Clone, PartialEq)]
struct ColumnLayout {
    attribute_columns: Vec<String>,
    missing_special: Vec<String>,
}

impl ColumnLayout {
    fn classify(columns: &[String], headers: &HeaderMap) -> Self {
        let attribute_columns = columns
            .iter()
            .filter(|c| !headers.is_special(c))
            .cloned()
            .collect();
        let missing_special = headers
            .special_columns()
            .iter()
            .filter(|name| !columns.iter().any(|c| c == *name))
            .map(|name| name.to_string())
            .collect();
        Self {
            attribute_columns,
            missing_special,
        }
    }
}

/// Turns a flat table of cell observations into a [`GenealogyModel`].
///
/// Rows must already be in temporal order; this is not checked, but tracks
/// whose times go backwards get `sorted = 0`.
pub struct GenealogyBuilder {
    no_parent_sentinel: String,
    previous: Option<(HeaderMap, Vec<String>, ColumnLayout)>,
    headers_reclassified: usize,
}

impl GenealogyBuilder {
    pub fn new() -> Self {
        Self {
            no_parent_sentinel: DEFAULT_NO_PARENT_SENTINEL.to_string(),
            previous: None,
            headers_reclassified: 0,
        }
    }

    pub fn with_no_parent_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.no_parent_sentinel = sentinel.into();
        self
    }

    /// How many loads had to re-derive the column layout.
    pub fn headers_reclassified(&self) -> usize {
        self.headers_reclassified
    }

    /// Build a complete model from `rows`.
    ///
    /// `columns` is the ordered column list of the table; when empty, the
    /// columns of the first row are used.
    pub fn init(
        &mut self,
        rows: &[RawRecord],
        columns: &[String],
        headers: &HeaderMap,
    ) -> Result<GenealogyModel, GenealogyError> {
        let columns: Vec<String> = if columns.is_empty() {
            rows.first()
                .map(|r| r.iter().map(|(name, _)| name.to_string()).collect())
                .unwrap_or_default()
        } else {
            columns.to_vec()
        };
        let attribute_columns = self.ensure_layout(headers, &columns).attribute_columns.clone();

        let mut model = GenealogyModel {
            headers: headers.clone(),
            columns,
            attribute_columns,
            ..GenealogyModel::default()
        };

        Self::group(&mut model, rows);
        let founders = self.link_parents(&mut model)?;
        let generations = Self::generations(&model, &founders)?;
        Self::compute_stats(&mut model, &generations);
        Self::assemble_lineages(&mut model, &founders);
        Self::create_frame_map(&mut model);

        info!(
            rows = rows.len(),
            cells = model.cell_count(),
            tracks = model.tracks.len(),
            lineages = model.lineages.len(),
            "genealogy built"
        );
        Ok(model)
    }

    fn ensure_layout(&mut self, headers: &HeaderMap, columns: &[String]) -> &ColumnLayout {
        let unchanged = matches!(
            &self.previous,
            Some((prev_headers, prev_columns, _)) if prev_headers == headers && prev_columns == columns
        );

        if unchanged {
            debug!("header mapping unchanged, skipping column classification");
        } else {
            let layout = ColumnLayout::classify(columns, headers);
            for name in &layout.missing_special {
                debug!(column = %name, "special column not present in table");
            }
            self.headers_reclassified += 1;
            self.previous = Some((headers.clone(), columns.to_vec(), layout));
        }

        let (_, _, layout) = self.previous.get_or_insert_with(|| {
            (headers.clone(), columns.to_vec(), ColumnLayout::classify(columns, headers))
        });
        layout
    }

    /// Pass 1: group cells into tracks by track id.
    fn group(model: &mut GenealogyModel, rows: &[RawRecord]) {
        let parent_col = model.headers.parent_id.clone();

        for (row, record) in rows.iter().enumerate() {
            let cell = match classify_row(row, record, &model.headers) {
                Ok(cell) => cell,
                Err(e) => {
                    warn!(error = %e, "skipping row");
                    continue;
                }
            };

            let idx = match model.track_index.get(&cell.track_id) {
                Some(&idx) => idx,
                None => {
                    let parent_id = cell.text(&parent_col).unwrap_or_default().to_string();
                    let idx = model.tracks.len();
                    model.tracks.push(Track::new(cell.track_id.clone(), parent_id));
                    model.track_index.insert(cell.track_id.clone(), idx);
                    idx
                }
            };

            let track = &mut model.tracks[idx];
            model.cell_order.push(CellRef {
                track: idx,
                index: track.cells.len(),
            });
            track.cells.push(cell);
        }
    }

    fn has_real_parent(&self, track: &Track) -> bool {
        !track.parent_id.is_empty()
            && track.parent_id != track.track_id
            && track.parent_id != self.no_parent_sentinel
    }

    /// Pass 2: link daughters to parents. Returns founders in creation order.
    fn link_parents(&self, model: &mut GenealogyModel) -> Result<Vec<TrackIdx>, GenealogyError> {
        let mut founders = Vec::new();

        for idx in 0..model.tracks.len() {
            if !self.has_real_parent(&model.tracks[idx]) {
                founders.push(idx);
                continue;
            }

            let parent_id = &model.tracks[idx].parent_id;
            let parent = model.track_index.get(parent_id).copied().ok_or_else(|| {
                GenealogyError::MissingParent {
                    track_id: model.tracks[idx].track_id.clone(),
                    parent_id: parent_id.clone(),
                }
            })?;

            model.tracks[idx].parent = Some(parent);
            model.tracks[parent].children.push(idx);
        }

        Ok(founders)
    }

    /// Breadth-first from the founders. A track that is never reached sits on
    /// (or below) a parent cycle.
    fn generations(model: &GenealogyModel, founders: &[TrackIdx]) -> Result<Vec<usize>, GenealogyError> {
        let mut generation = vec![None; model.tracks.len()];
        let mut queue: VecDeque<TrackIdx> = founders.iter().copied().collect();
        for &f in founders {
            generation[f] = Some(0);
        }

        while let Some(idx) = queue.pop_front() {
            let next = generation[idx].unwrap_or_default() + 1;
            for &child in &model.tracks[idx].children {
                generation[child] = Some(next);
                queue.push_back(child);
            }
        }

        generation
            .into_iter()
            .enumerate()
            .map(|(idx, g)| {
                g.ok_or_else(|| GenealogyError::ParentCycle {
                    track_id: model.tracks[idx].track_id.clone(),
                })
            })
            .collect()
    }

    /// Pass 3: per-track statistics.
    fn compute_stats(model: &mut GenealogyModel, generations: &[usize]) {
        let time_col = model.headers.time.clone();

        for (idx, track) in model.tracks.iter_mut().enumerate() {
            let times: Vec<f64> = track.cells.iter().filter_map(|c| c.num(&time_col)).collect();
            let sorted = times.windows(2).all(|w| w[0] <= w[1]);
            let min_time = times.iter().copied().reduce(f64::min);
            let max_time = times.iter().copied().reduce(f64::max);

            track.set_stats(TrackStats {
                track_length: track.cells.len(),
                sorted,
                min_time,
                max_time,
                generation: generations[idx],
            });
        }
    }

    /// Pass 4: one lineage per founder.
    fn assemble_lineages(model: &mut GenealogyModel, founders: &[TrackIdx]) {
        for &founder in founders {
            let mut cell_count = 0;
            let mut track_count = 0;
            let mut generations = 0;

            let mut stack = vec![(founder, 1usize)];
            while let Some((idx, level)) = stack.pop() {
                let track = &model.tracks[idx];
                cell_count += track.cells.len();
                track_count += 1;
                generations = generations.max(level);
                stack.extend(track.children.iter().map(|&c| (c, level + 1)));
            }

            let lineage_id = model.tracks[founder].track_id.clone();
            model.lineage_index.insert(lineage_id.clone(), model.lineages.len());
            model.lineages.push(Lineage {
                lineage_id,
                founder,
                cell_count,
                generations,
                track_count,
            });
        }
    }

    /// Group all cells by frame and by time in a single pass.
    fn create_frame_map(model: &mut GenealogyModel) {
        let frame_col = model.headers.frame.clone();
        let time_col = model.headers.time.clone();

        let mut frames: BTreeMap<i64, Vec<CellRef>> = BTreeMap::new();
        let mut times: HashMap<u64, (f64, Vec<CellRef>)> = HashMap::new();

        for &cell_ref in &model.cell_order {
            let cell = model.cell(cell_ref);
            if let Some(frame) = cell.num(&frame_col).and_then(frame_number) {
                frames.entry(frame).or_default().push(cell_ref);
            }
            if let Some(time) = cell.num(&time_col).filter(|t| t.is_finite()) {
                // Normalise -0.0 so it shares a bucket with 0.0.
                let time = if time == 0.0 { 0.0 } else { time };
                times.entry(time.to_bits()).or_insert_with(|| (time, Vec::new())).1.push(cell_ref);
            }
        }

        let mut time_map: Vec<(f64, Vec<CellRef>)> = times.into_values().collect();
        time_map.sort_by(|a, b| a.0.total_cmp(&b.0));

        model.frame_list = frames.keys().copied().collect();
        model.frame_map = frames;
        model.time_map = time_map;
    }
}

impl Default for GenealogyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
