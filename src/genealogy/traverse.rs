use crate::genealogy::model::{Cell, GenealogyModel, Track, TrackIdx};

/// Pre-order iterator over a lineage subtree.
///
/// Driven by an explicit stack, so deep lineages do not hit recursion limits.
/// Cloning the iterator before it is advanced gives an independent replay of
/// the same sequence.
#[derive(Debug, Clone)]
pub struct LineageTrackIter<'a> {
    model: &'a GenealogyModel,
    /// Pending tracks with their depth below the start track.
    stack: Vec<(TrackIdx, usize)>,
    max_depth: Option<usize>,
}

impl<'a> LineageTrackIter<'a> {
    pub(crate) fn new(model: &'a GenealogyModel, start: Option<TrackIdx>, max_depth: Option<usize>) -> Self {
        Self {
            model,
            stack: start.map(|idx| (idx, 0)).into_iter().collect(),
            max_depth,
        }
    }

    /// Like `next`, but also reports depth below the start track.
    pub fn next_with_depth(&mut self) -> Option<(&'a Track, usize)> {
        let (idx, depth) = self.stack.pop()?;
        let track = self.model.track_at(idx);

        let expand = self.max_depth.is_none_or(|max| depth < max);
        if expand {
            // Reverse so the first child is popped first.
            self.stack
                .extend(track.children.iter().rev().map(|&child| (child, depth + 1)));
        }
        Some((track, depth))
    }

    /// Adapter yielding `(track, depth)` pairs.
    pub fn with_depth(self) -> impl Iterator<Item = (&'a Track, usize)> {
        let mut iter = self;
        std::iter::from_fn(move || iter.next_with_depth())
    }
}

impl<'a> Iterator for LineageTrackIter<'a> {
    type Item = &'a Track;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_with_depth().map(|(track, _)| track)
    }
}

/// Every cell of a lineage subtree, track by track, in track pre-order and
/// then in each track's insertion order.
#[derive(Debug, Clone)]
pub struct LineageCellIter<'a> {
    tracks: LineageTrackIter<'a>,
    current: std::slice::Iter<'a, Cell>,
}

impl<'a> LineageCellIter<'a> {
    pub(crate) fn new(tracks: LineageTrackIter<'a>) -> Self {
        Self {
            tracks,
            current: [].iter(),
        }
    }
}

impl<'a> Iterator for LineageCellIter<'a> {
    type Item = &'a Cell;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cell) = self.current.next() {
                return Some(cell);
            }
            self.current = self.tracks.next()?.cells.iter();
        }
    }
}
