pub mod builder;
pub mod model;
pub mod traverse;

pub use builder::{DEFAULT_NO_PARENT_SENTINEL, GenealogyBuilder, GenealogyError};
pub use model::{
    Cell, CellRef, GenealogyModel, Lineage, LineageSummary, Track, TrackIdx, TrackStats, frame_number,
};
pub use traverse::{LineageCellIter, LineageTrackIter};
