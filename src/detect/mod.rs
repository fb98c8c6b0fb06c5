mod adapter;
mod backend;
mod backends;
mod result;

pub use adapter::{DetectionAdapter, DetectionStage, PLATE_STAGE_PARAMS};
pub use backend::{DetectParams, DetectorBackend};
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, ObjectClass, PartitionedDetections, RawDetection};
