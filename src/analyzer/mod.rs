pub mod threshold;

pub use threshold::{Evaluation, Summary, ThresholdEvaluator};
