pub mod data;
pub mod io;
pub mod printing;

pub use data::{BackendSettings, Config, GenerationSettings, RagSettings, RetrySettings};
pub use io::ConfigError;
