pub mod community;
pub mod frame;
pub mod graphs;
pub mod pairs;
pub mod pipeline;
pub mod pruning;
pub mod scoring;

pub use frame::VisitFrame;
pub use pipeline::{CancelFlag, DetectError, MultiCardDetector};
