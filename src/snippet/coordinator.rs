use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::snippet::cache::SnippetCache;
use crate::snippet::crop::snippet_of_buffer;
use crate::snippet::selection::{BoundingBox, Selection, SelectionKey, SnippetKey};
use crate::snippet::source::{CancelSignal, FetchError, Raster, RasterSource};

/// Pixels of one cropped snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetData {
    pub width: usize,
    pub height: usize,
    pub pixels: Arc<[u16]>,
}

/// A cropped snippet together with its cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub key: SnippetKey,
    pub data: SnippetData,
}

pub type SnippetStore = SnippetCache<SnippetKey, SnippetData>;

/// The set of snippets currently handed to the renderer.
pub type PublishedSet = Arc<[Snippet]>;

/// What happens to a running fetch whose selection is no longer wanted.
///
/// The coordinator always marks the request stale, so its result is cached but
/// not published. Implementations decide whether to additionally interrupt
/// the source.
pub trait SupersedePolicy: Send + Sync {
    fn supersede(&self, key: &SelectionKey, signal: &CancelSignal);
}

/// Let superseded fetches run to completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftCancel;

impl SupersedePolicy for SoftCancel {
    fn supersede(&self, key: &SelectionKey, _signal: &CancelSignal) {
        debug!(%key, "selection superseded, fetch left running");
    }
}

/// Raise the cancel signal of superseded fetches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCancel;

impl SupersedePolicy for SignalCancel {
    fn supersede(&self, key: &SelectionKey, signal: &CancelSignal) {
        debug!(%key, "selection superseded, signalling source");
        signal.raise();
    }
}

struct InFlightRequest {
    fetch_id: u64,
    /// Crops to cut when the raster arrives; replaced on every update.
    boxes: Vec<BoundingBox>,
    stale: bool,
    signal: CancelSignal,
}

#[derive(Default)]
struct CoordinatorState {
    in_flight: HashMap<SelectionKey, InFlightRequest>,
    published: Vec<Snippet>,
    tasks: Vec<JoinHandle<Result<(), FetchError>>>,
    /// First failure since the last `settle`; later ones are only counted.
    first_failure: Option<FetchError>,
    dropped_failures: usize,
    next_fetch_id: u64,
}

impl CoordinatorState {
    /// Collect finished fetch tasks, keeping their failures for `settle`.
    fn reap_finished(&mut self) {
        let mut running = Vec::with_capacity(self.tasks.len());
        for handle in std::mem::take(&mut self.tasks) {
            if !handle.is_finished() {
                running.push(handle);
                continue;
            }
            match handle.now_or_never() {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => self.record_failure(e),
                Some(Err(join)) => self.record_failure(FetchError::Source(format!("fetch task failed: {join}"))),
                None => {}
            }
        }
        self.tasks = running;
    }

    fn record_failure(&mut self, failure: FetchError) {
        if self.first_failure.is_none() {
            self.first_failure = Some(failure);
        } else {
            self.dropped_failures += 1;
        }
    }

    /// Hand out the pending failure, forgetting any that came after it.
    fn take_failure(&mut self) -> Option<FetchError> {
        let dropped = std::mem::take(&mut self.dropped_failures);
        if dropped > 0 {
            warn!(dropped, "further fetch failures since the last settle");
        }
        self.first_failure.take()
    }
}

/// Result of one [`SegmentationFetchCoordinator::update`] call.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Everything that could be served without waiting.
    pub published: PublishedSet,
    /// Selections for which a new fetch was started.
    pub started: Vec<SelectionKey>,
    /// Selections already in flight whose crop boxes were replaced.
    pub retargeted: Vec<SelectionKey>,
    /// In-flight selections that are no longer wanted.
    pub superseded: Vec<SelectionKey>,
}

struct Shared {
    cache: Arc<SnippetStore>,
    source: Arc<dyn RasterSource>,
    policy: Box<dyn SupersedePolicy>,
    state: Mutex<CoordinatorState>,
    published_tx: watch::Sender<PublishedSet>,
}

/// Keeps the rendered snippet set in step with what is on screen.
///
/// Each [`update`](Self::update) serves what it can from the cache at once and
/// starts at most one fetch per selection. Fetches that become unnecessary are
/// allowed to finish and warm the cache, but their crops are not published.
#[derive(Clone)]
pub struct SegmentationFetchCoordinator {
    shared: Arc<Shared>,
}

impl SegmentationFetchCoordinator {
    pub fn new(cache: Arc<SnippetStore>, source: Arc<dyn RasterSource>) -> Self {
        Self::with_policy(cache, source, Box::new(SoftCancel))
    }

    pub fn with_policy(cache: Arc<SnippetStore>, source: Arc<dyn RasterSource>, policy: Box<dyn SupersedePolicy>) -> Self {
        let (published_tx, _) = watch::channel(PublishedSet::from(Vec::new()));
        Self {
            shared: Arc::new(Shared {
                cache,
                source,
                policy,
                state: Mutex::new(CoordinatorState::default()),
                published_tx,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<SnippetStore> {
        &self.shared.cache
    }

    /// Receiver that sees every change to the published set.
    pub fn subscribe(&self) -> watch::Receiver<PublishedSet> {
        self.shared.published_tx.subscribe()
    }

    pub fn published(&self) -> PublishedSet {
        self.shared.published_tx.borrow().clone()
    }

    pub fn is_in_flight(&self, key: &SelectionKey) -> bool {
        self.shared.state.lock().in_flight.contains_key(key)
    }

    /// `None` when the selection is not in flight.
    pub fn is_stale(&self, key: &SelectionKey) -> Option<bool> {
        self.shared.state.lock().in_flight.get(key).map(|r| r.stale)
    }

    /// Crop boxes the running fetch for `key` will produce.
    pub fn in_flight_boxes(&self, key: &SelectionKey) -> Option<Vec<BoundingBox>> {
        self.shared.state.lock().in_flight.get(key).map(|r| r.boxes.clone())
    }

    /// Replace the set of wanted selections.
    ///
    /// Must be called from within a Tokio runtime; new fetches are spawned
    /// onto it.
    pub fn update(&self, desired: &[Selection]) -> UpdateOutcome {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        state.reap_finished();

        let previous: HashMap<SnippetKey, SnippetData> = state
            .published
            .iter()
            .map(|s| (s.key, s.data.clone()))
            .collect();

        let mut published = Vec::new();
        let mut seen = HashSet::new();
        let mut unmatched = Vec::new();
        for selection in desired {
            let mut missing = false;
            for key in selection.snippet_keys() {
                match shared.cache.get(&key).or_else(|| previous.get(&key).cloned()) {
                    Some(data) => {
                        if seen.insert(key) {
                            published.push(Snippet { key, data });
                        }
                    }
                    None => missing = true,
                }
            }
            if missing {
                unmatched.push(selection);
            }
        }

        let mut started = Vec::new();
        let mut retargeted = Vec::new();
        for selection in unmatched {
            let key = selection.key;
            let reusable = state
                .in_flight
                .get(&key)
                .is_some_and(|r| !(r.stale && r.signal.is_raised()));

            if reusable {
                if let Some(request) = state.in_flight.get_mut(&key) {
                    request.boxes = selection.boxes.clone();
                    if request.stale {
                        debug!(%key, "in-flight selection wanted again");
                        request.stale = false;
                    }
                }
                retargeted.push(key);
                continue;
            }

            let fetch_id = state.next_fetch_id;
            state.next_fetch_id += 1;
            let signal = CancelSignal::new();
            state.in_flight.insert(
                key,
                InFlightRequest {
                    fetch_id,
                    boxes: selection.boxes.clone(),
                    stale: false,
                    signal: signal.clone(),
                },
            );
            let handle = tokio::spawn(run_fetch(Arc::clone(shared), key, fetch_id, signal));
            state.tasks.push(handle);
            started.push(key);
        }

        let wanted: HashSet<SelectionKey> = desired.iter().map(|s| s.key).collect();
        let mut superseded = Vec::new();
        for (key, request) in state.in_flight.iter_mut() {
            if !request.stale && !wanted.contains(key) {
                request.stale = true;
                shared.policy.supersede(key, &request.signal);
                superseded.push(*key);
            }
        }

        state.published = published;
        let snapshot = PublishedSet::from(state.published.clone());
        shared.published_tx.send_replace(snapshot.clone());

        debug!(
            published = snapshot.len(),
            started = started.len(),
            retargeted = retargeted.len(),
            superseded = superseded.len(),
            "selection update"
        );

        UpdateOutcome {
            published: snapshot,
            started,
            retargeted,
            superseded,
        }
    }

    /// Wait for every fetch started so far, including any started while
    /// waiting. Returns the first non-cancellation failure.
    pub async fn settle(&self) -> Result<(), FetchError> {
        loop {
            let tasks = std::mem::take(&mut self.shared.state.lock().tasks);
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                let outcome = match task.await {
                    Ok(result) => result,
                    Err(join) => Err(FetchError::Source(format!("fetch task failed: {join}"))),
                };
                if let Err(e) = outcome {
                    self.shared.state.lock().record_failure(e);
                }
            }
        }

        match self.shared.state.lock().take_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_fetch(shared: Arc<Shared>, key: SelectionKey, fetch_id: u64, signal: CancelSignal) -> Result<(), FetchError> {
    debug!(%key, fetch_id, "fetch started");
    let result = shared.source.get_raster(&key, Some(&signal)).await;

    let mut state = shared.state.lock();
    let owns_entry = state.in_flight.get(&key).is_some_and(|r| r.fetch_id == fetch_id);
    let request = if owns_entry { state.in_flight.remove(&key) } else { None };

    let raster = match result {
        Ok(raster) => raster,
        Err(e) if e.is_cancellation() => {
            debug!(%key, fetch_id, "fetch cancelled");
            return Ok(());
        }
        Err(e) => {
            error!(%key, fetch_id, error = %e, "fetch failed");
            return Err(e);
        }
    };

    let Some(request) = request else {
        debug!(%key, fetch_id, "fetch was replaced, discarding result");
        return Ok(());
    };

    let snippets = crop_all(&key, &raster, &request.boxes);
    for snippet in &snippets {
        shared.cache.insert(snippet.key, snippet.data.clone());
    }

    if request.stale {
        debug!(%key, crops = snippets.len(), "stale fetch finished, cached only");
        return Ok(());
    }

    let before = state.published.len();
    let mut seen: HashSet<SnippetKey> = state.published.iter().map(|p| p.key).collect();
    for snippet in snippets {
        if seen.insert(snippet.key) {
            state.published.push(snippet);
        }
    }
    if state.published.len() != before {
        shared
            .published_tx
            .send_replace(PublishedSet::from(state.published.clone()));
    }
    debug!(%key, fetch_id, published = state.published.len(), "fetch merged");
    Ok(())
}

/// Cut every requested box out of a decoded raster.
pub fn crop_all(key: &SelectionKey, raster: &Raster, boxes: &[BoundingBox]) -> Vec<Snippet> {
    boxes
        .iter()
        .map(|bbox| Snippet {
            key: SnippetKey {
                selection: *key,
                bbox: *bbox,
            },
            data: SnippetData {
                width: bbox.width(),
                height: bbox.height(),
                pixels: snippet_of_buffer(&raster.data, raster.width, raster.height, bbox).into(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_all() {
        let raster = Raster {
            data: (0..16).collect(),
            width: 4,
            height: 4,
        };
        let key = SelectionKey::new(1, 2, 0);
        let boxes = vec![
            BoundingBox::new(1, 3, 3, 1).unwrap(),
            BoundingBox::new(3, 2, 5, 0).unwrap(),
        ];
        let snippets = crop_all(&key, &raster, &boxes);

        assert_eq!(snippets.len(), 2);
        assert_eq!(&*snippets[0].data.pixels, &[5, 6, 9, 10]);
        assert_eq!(&*snippets[1].data.pixels, &[3, 0, 7, 0]);
        assert_eq!(snippets[1].key.selection, key);
        assert_eq!(snippets[1].data.width, 2);
    }

    #[test]
    fn test_failures_kept_to_first_and_drained() {
        let mut state = CoordinatorState::default();
        for i in 0..1000 {
            state.record_failure(FetchError::Source(format!("plane {i}")));
        }
        assert_eq!(state.dropped_failures, 999);

        assert_eq!(state.take_failure(), Some(FetchError::Source("plane 0".into())));
        assert_eq!(state.dropped_failures, 0);
        assert_eq!(state.take_failure(), None);
    }

    #[test]
    fn test_signal_cancel_raises() {
        let signal = CancelSignal::new();
        SoftCancel.supersede(&SelectionKey::new(0, 0, 0), &signal);
        assert!(!signal.is_raised());
        SignalCancel.supersede(&SelectionKey::new(0, 0, 0), &signal);
        assert!(signal.is_raised());
    }
}
