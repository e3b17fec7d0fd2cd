pub mod filename;
pub mod logging;
