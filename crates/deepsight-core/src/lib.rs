pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use error::{Result, VisionError};
pub use traits::{Backend, ImageHandle, ImageRef, RawStatus, TrainingBackend, VendorResult};
pub use types::*;
