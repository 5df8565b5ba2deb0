mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::ScriptedDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, WearClass};
