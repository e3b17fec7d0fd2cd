pub mod checkpoint_store;
pub mod dataset_service;
pub mod decode_failure_log;
pub mod gemini_service;

pub use checkpoint_store::{failed_indices, CheckpointStore};
pub use decode_failure_log::DecodeFailureLog;
pub use gemini_service::GeminiService;
