pub mod app;
pub mod render;

pub use app::{App, ViewMode};
pub use render::{LineageTreeView, SeriesView};
