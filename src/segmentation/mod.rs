pub mod feature;
pub mod source;
pub mod store;

pub use feature::{Feature, Geometry};
pub use source::{
    DirSegmentationSource, HttpSegmentationSource, SegmentationError, SegmentationSource, feature_file_name,
};
pub use store::SegmentationStore;
