pub mod error;
pub mod registry;

pub use error::{RecorderError, Result};
pub use registry::{RecorderHandle, ResponseRecorder};
