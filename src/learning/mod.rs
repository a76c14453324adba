mod em;
/// Schedulers of the exponent of expected counts
pub mod schedulers;

pub use em::{normalize_by_parent, EmConfig, EmInfo, ExpectationMaximization, ParameterGroup};

#[cfg(test)]
pub(crate) use em::LikelihoodHistory;
