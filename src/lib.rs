/// A module containing the factor graph data model, evidence staging and the continuous leaf adapter
pub mod core;
/// A module containing inference engines: loopy belief propagation and Gibbs sampling
pub mod inference;
/// A module containing parameter learning by expectation maximization
pub mod learning;

#[cfg(test)]
mod tests;
