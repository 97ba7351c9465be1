pub mod config;
pub mod genealogy;
pub mod metrics;
pub mod segmentation;
pub mod snippet;
pub mod table;
pub mod viewer;
