mod edges;
mod gibbs;
mod lbp;
mod max_assignment;

pub use gibbs::{GibbsConfig, GibbsSampling, SamplingInfo};
pub use lbp::{
    BeliefPropagationConfig, LoopyBeliefPropagation, MessageInit, MessagePassingInfo,
    PropagationMode, UpdateSchedule,
};

#[cfg(test)]
pub(crate) use gibbs::potential_scale_reduction;
#[cfg(test)]
pub(crate) use lbp::OscillationDetector;

use serde::{Deserialize, Serialize};

use crate::core::{cross_entropy_term, FGError, FGResult, FactorGraph, Observation};

// ------------------------------------------------------------------------------------------

/// Information returned by a successful inference run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InferenceInfo {
    MessagePassing(MessagePassingInfo),
    Sampling(SamplingInfo),
}

/// Common interface of inference engines. An engine owns the factor graph
/// it runs on and the observation used as evidence. After a successful run
/// beliefs are readable from the graph's variables and factors
pub trait Inferencer {
    /// Binds a factor graph. Cached results of a previous graph are dropped
    fn set_factor_graph(&mut self, graph: FactorGraph);

    fn factor_graph(&self) -> FGResult<&FactorGraph>;

    fn factor_graph_mut(&mut self) -> FGResult<&mut FactorGraph>;

    /// Unbinds and returns the factor graph
    fn take_factor_graph(&mut self) -> Option<FactorGraph>;

    /// Sets evidence used by subsequent runs
    fn set_observation(&mut self, observation: Observation);

    fn clear_observation(&mut self);

    fn observation(&self) -> Option<&Observation>;

    /// Runs inference. Evidence and continuous substitutions are staged
    /// before the run and reverted after it, also when the run fails
    fn run_inference(&mut self) -> FGResult<InferenceInfo>;

    /// Log partition function of the last successful run
    fn calculate_log_z(&self) -> FGResult<f64>;
}

// ------------------------------------------------------------------------------------------

/// Stages continuous substitutions and evidence, runs `run` and reverts the
/// staging on both the success and the failure paths
pub(crate) fn run_staged<T>(
    graph: &mut FactorGraph,
    observation: Option<&Observation>,
    run: impl FnOnce(&mut FactorGraph) -> FGResult<T>,
) -> FGResult<T> {
    if let Some(issue) = graph.inferrability_issue() {
        return Err(FGError::NotInferrable(issue));
    }
    graph.clear_beliefs();
    graph.substitute_continuous(observation)?;
    if let Some(observation) = observation {
        if let Err(e) = graph.attach_observation(observation) {
            graph.restore_continuous()?;
            return Err(e);
        }
    }
    let result = run(graph);
    graph.detach_observation();
    graph.restore_continuous()?;
    if result.is_err() {
        graph.clear_beliefs();
    }
    result
}

/// Bethe approximation of the log partition function computed from the
/// current node and factor beliefs:
///
/// `sum_f [sum_x b_f ln psi_f - sum_x b_f ln b_f] + sum_v (d_v - 1) sum_x b_v ln b_v`
///
/// # Notes
///
/// On a tree with exact beliefs the approximation is exact
pub(crate) fn bethe_log_z(graph: &FactorGraph) -> FGResult<f64> {
    let mut log_z = 0f64;
    for (_, factor) in graph.discrete_factors() {
        let belief = factor.belief().ok_or(FGError::NotInferred)?;
        log_z += cross_entropy_term(belief, factor.values()) - cross_entropy_term(belief, belief);
    }
    for variable in graph.variables() {
        let belief = variable.belief().ok_or(FGError::NotInferred)?;
        let degree = variable.factors().len() as f64;
        log_z += (degree - 1f64) * cross_entropy_term(belief, belief);
    }
    if log_z.is_nan() {
        return Err(FGError::NumericError("Bethe log partition function".to_string()));
    }
    Ok(log_z)
}
