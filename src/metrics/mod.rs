pub mod aggregate;

pub use aggregate::{AggregateCalculator, DEFAULT_ATTRIBUTE, FrameMean, LineageSeries, SeriesPoint, TrackSeries};
