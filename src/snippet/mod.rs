pub mod cache;
pub mod coordinator;
pub mod crop;
pub mod selection;
pub mod source;

pub use cache::{CacheStats, DEFAULT_SNIPPET_CAPACITY, SnippetCache};
pub use coordinator::{
    PublishedSet, SegmentationFetchCoordinator, SignalCancel, Snippet, SnippetData, SnippetStore, SoftCancel,
    SupersedePolicy, UpdateOutcome,
};
pub use crop::snippet_of_buffer;
pub use selection::{BoundingBox, BoundingBoxError, Selection, SelectionKey, SnippetKey};
pub use source::{CancelSignal, FetchError, Raster, RasterSource, RawDirRasterSource};
