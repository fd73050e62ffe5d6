pub mod cube;
pub mod outlier;
pub mod plan;
pub mod rolling;
