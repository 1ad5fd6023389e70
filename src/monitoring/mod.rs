//! Monitoring Module
//!
//! Execution timeline recorded during workflow runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: step and map-item start/end timing for Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
