pub mod parse_runner;
pub mod retry_categorize_runner;
pub mod retry_parse_runner;
