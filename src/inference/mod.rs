pub mod classifier;
pub mod mnist;
pub mod preprocess;
