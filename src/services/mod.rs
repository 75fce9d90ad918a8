pub mod batch;
pub mod event_source;
pub mod recompute;
