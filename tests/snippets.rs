//! Snippet cache and fetch coordinator against an in-memory raster source
//! whose fetches complete only when the test lets them.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use lineage_scope::snippet::{
    BoundingBox, CancelSignal, FetchError, Raster, RasterSource, SegmentationFetchCoordinator, Selection,
    SelectionKey, SignalCancel, SnippetCache, SnippetData, SnippetKey, SnippetStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 4x4 planes holding `time * 100 + index`, released one permit per fetch.
struct GatedSource {
    gate: Semaphore,
    calls: AtomicUsize,
    failing: Mutex<HashSet<SelectionKey>>,
}

impl GatedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RasterSource for GatedSource {
    async fn get_raster(&self, selection: &SelectionKey, signal: Option<&CancelSignal>) -> Result<Raster, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Source("gate closed".into()))?;
        permit.forget();

        if signal.is_some_and(CancelSignal::is_raised) {
            return Err(FetchError::Cancelled);
        }
        if self.failing.lock().contains(selection) {
            return Err(FetchError::Source(format!("no plane for {selection}")));
        }
        let base = selection.time as u16 * 100;
        Ok(Raster {
            data: (0..16).map(|i| base + i).collect(),
            width: 4,
            height: 4,
        })
    }
}

fn bbox(left: i64, bottom: i64, right: i64, top: i64) -> BoundingBox {
    BoundingBox::new(left, bottom, right, top).unwrap()
}

fn selection(time: u32, boxes: Vec<BoundingBox>) -> Selection {
    Selection::new(SelectionKey::new(0, time, 0), boxes)
}

fn snippet_key(time: u32, b: BoundingBox) -> SnippetKey {
    SnippetKey {
        selection: SelectionKey::new(0, time, 0),
        bbox: b,
    }
}

fn setup() -> (Arc<GatedSource>, Arc<SnippetStore>, SegmentationFetchCoordinator) {
    let source = GatedSource::new();
    let cache = Arc::new(SnippetCache::new(64));
    let coordinator = SegmentationFetchCoordinator::new(cache.clone(), source.clone());
    (source, cache, coordinator)
}

fn published_keys(coordinator: &SegmentationFetchCoordinator) -> Vec<SnippetKey> {
    coordinator.published().iter().map(|s| s.key).collect()
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cached_selection_published_without_fetch() {
    let (source, cache, coordinator) = setup();
    let b = bbox(0, 2, 2, 0);
    cache.insert(
        snippet_key(1, b),
        SnippetData {
            width: 2,
            height: 2,
            pixels: vec![1, 2, 3, 4].into(),
        },
    );

    let outcome = coordinator.update(&[selection(1, vec![b])]);

    assert_eq!(outcome.published.len(), 1);
    assert!(outcome.started.is_empty());
    coordinator.settle().await.unwrap();
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_fetch_crops_published_and_cached() {
    let (source, cache, coordinator) = setup();
    let b = bbox(1, 3, 3, 1);

    let outcome = coordinator.update(&[selection(2, vec![b])]);
    assert!(outcome.published.is_empty());
    assert_eq!(outcome.started, vec![SelectionKey::new(0, 2, 0)]);

    source.release(1);
    coordinator.settle().await.unwrap();

    let published = coordinator.published();
    assert_eq!(published.len(), 1);
    assert_eq!(&*published[0].data.pixels, &[205, 206, 209, 210]);
    assert!(cache.contains(&snippet_key(2, b)));
    assert!(!coordinator.is_in_flight(&SelectionKey::new(0, 2, 0)));
}

#[tokio::test]
async fn test_repeat_request_retargets_single_fetch() {
    let (source, _cache, coordinator) = setup();
    let first = bbox(0, 1, 1, 0);
    let second = bbox(2, 4, 4, 2);
    let key = SelectionKey::new(0, 3, 0);

    coordinator.update(&[selection(3, vec![first])]);
    let outcome = coordinator.update(&[selection(3, vec![second])]);
    assert!(outcome.started.is_empty());
    assert_eq!(outcome.retargeted, vec![key]);
    assert_eq!(coordinator.in_flight_boxes(&key), Some(vec![second]));

    source.release(1);
    coordinator.settle().await.unwrap();

    assert_eq!(source.calls(), 1);
    assert_eq!(published_keys(&coordinator), vec![snippet_key(3, second)]);
}

#[tokio::test]
async fn test_superseded_fetch_warms_cache_but_is_not_published() {
    let (source, cache, coordinator) = setup();
    let b = bbox(0, 2, 2, 0);
    let key = SelectionKey::new(0, 5, 0);

    coordinator.update(&[selection(5, vec![b])]);
    let outcome = coordinator.update(&[]);
    assert_eq!(outcome.superseded, vec![key]);
    assert_eq!(coordinator.is_stale(&key), Some(true));

    source.release(1);
    coordinator.settle().await.unwrap();

    assert!(cache.contains(&snippet_key(5, b)));
    assert!(coordinator.published().is_empty());

    // Scrolling back serves it straight from the cache.
    let outcome = coordinator.update(&[selection(5, vec![b])]);
    assert_eq!(outcome.published.len(), 1);
    assert!(outcome.started.is_empty());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_stale_fetch_revived_when_wanted_again() {
    let (source, _cache, coordinator) = setup();
    let b = bbox(0, 2, 2, 0);
    let key = SelectionKey::new(0, 6, 0);

    coordinator.update(&[selection(6, vec![b])]);
    coordinator.update(&[selection(7, vec![b])]);
    assert_eq!(coordinator.is_stale(&key), Some(true));

    let outcome = coordinator.update(&[selection(6, vec![b])]);
    assert_eq!(outcome.retargeted, vec![key]);
    assert_eq!(coordinator.is_stale(&key), Some(false));

    source.release(2);
    coordinator.settle().await.unwrap();

    assert_eq!(source.calls(), 2);
    assert_eq!(published_keys(&coordinator), vec![snippet_key(6, b)]);
}

#[tokio::test]
async fn test_completions_merge_into_current_set() {
    let (source, _cache, coordinator) = setup();
    let b = bbox(0, 1, 1, 0);

    coordinator.update(&[selection(1, vec![b]), selection(2, vec![b])]);
    let mut rx = coordinator.subscribe();

    source.release(2);
    coordinator.settle().await.unwrap();

    let mut keys = published_keys(&coordinator);
    keys.sort_by_key(|k| k.selection);
    assert_eq!(keys, vec![snippet_key(1, b), snippet_key(2, b)]);
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().len(), 2);
}

#[tokio::test]
async fn test_failure_surfaces_from_settle() {
    let (source, cache, coordinator) = setup();
    let key = SelectionKey::new(0, 8, 0);
    source.failing.lock().insert(key);

    coordinator.update(&[selection(8, vec![bbox(0, 1, 1, 0)])]);
    source.release(1);

    let err = coordinator.settle().await.unwrap_err();
    assert!(matches!(err, FetchError::Source(_)));
    assert!(cache.is_empty());
    assert!(!coordinator.is_in_flight(&key));

    // Not cached, so the next request fetches again.
    source.failing.lock().clear();
    let outcome = coordinator.update(&[selection(8, vec![bbox(0, 1, 1, 0)])]);
    assert_eq!(outcome.started, vec![key]);
    source.release(1);
    coordinator.settle().await.unwrap();
    assert_eq!(coordinator.published().len(), 1);
}

#[tokio::test]
async fn test_settle_drains_all_failures_at_once() {
    let (source, _cache, coordinator) = setup();
    let b = bbox(0, 1, 1, 0);
    for time in 10..13 {
        source.failing.lock().insert(SelectionKey::new(0, time, 0));
    }

    coordinator.update(&[selection(10, vec![b]), selection(11, vec![b]), selection(12, vec![b])]);
    source.release(3);

    assert!(matches!(coordinator.settle().await, Err(FetchError::Source(_))));
    coordinator.settle().await.unwrap();
}

#[tokio::test]
async fn test_signal_cancel_is_swallowed() {
    let source = GatedSource::new();
    let cache: Arc<SnippetStore> = Arc::new(SnippetCache::new(64));
    let coordinator =
        SegmentationFetchCoordinator::with_policy(cache.clone(), source.clone(), Box::new(SignalCancel));
    let b = bbox(0, 2, 2, 0);

    coordinator.update(&[selection(9, vec![b])]);
    coordinator.update(&[]);
    source.release(1);

    coordinator.settle().await.unwrap();
    assert!(cache.is_empty());
    assert!(coordinator.published().is_empty());
}

#[tokio::test]
async fn test_cancelled_fetch_replaced_when_wanted_again() {
    let source = GatedSource::new();
    let cache: Arc<SnippetStore> = Arc::new(SnippetCache::new(64));
    let coordinator =
        SegmentationFetchCoordinator::with_policy(cache.clone(), source.clone(), Box::new(SignalCancel));
    let b = bbox(0, 2, 2, 0);

    coordinator.update(&[selection(4, vec![b])]);
    coordinator.update(&[]);
    let outcome = coordinator.update(&[selection(4, vec![b])]);
    assert_eq!(outcome.started, vec![SelectionKey::new(0, 4, 0)]);

    source.release(2);
    coordinator.settle().await.unwrap();
    assert_eq!(published_keys(&coordinator), vec![snippet_key(4, b)]);
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_fetches_share_one_load() {
    let cache: Arc<SnippetCache<u32, Arc<Vec<u16>>>> = Arc::new(SnippetCache::new(8));
    let loads = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = cache.clone();
            let loads = loads.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                cache
                    .fetch(7, move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        gate.acquire().await.map_err(|_| FetchError::Abandoned)?.forget();
                        Ok(Arc::new(vec![1, 2, 3]))
                    })
                    .await
            })
        })
        .collect();

    tokio::task::yield_now().await;
    gate.add_permits(1);

    let results = futures::future::join_all(handles).await;
    let values: Vec<Arc<Vec<u16>>> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(cache.stats().loads, 1);
}
