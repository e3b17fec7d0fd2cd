pub mod fan_out;

pub use fan_out::fan_out;
