pub mod batch;
pub mod classifier;
pub mod labels;
pub mod orchestrator;
pub mod queue;
pub mod resize;
pub mod storage;
pub mod store;
