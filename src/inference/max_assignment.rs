use log::warn;
use ndarray::Array1;

use crate::core::{Assignment, FGError, FGResult, Factor, FactorGraph, VariableId};

/// Max-marginals closer than this are treated as equal
const TIE_TOLERANCE: f64 = 1e-9;

/// States whose max-marginal equals the maximal one
fn top_states(belief: &Array1<f64>) -> Vec<usize> {
    let max = belief.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (0..belief.len())
        .filter(|s| max - belief[*s] <= TIE_TOLERANCE)
        .collect()
}

/// Extracts a joint assignment from max-marginals stored in the graph.
///
/// A variable with a unique top state takes it. Remaining variables are
/// resolved from incident factor beliefs: the best entry whose state of the
/// variable is one of its top states is chosen, ties between entries are
/// broken by the number of already resolved variables the entry agrees with.
/// All still unresolved variables of the chosen entry are fixed jointly
pub(crate) fn find_maximum(graph: &FactorGraph) -> FGResult<Assignment> {
    let mut assignment = Assignment::new();
    let mut ambiguous: Vec<(VariableId, Vec<usize>)> = Vec::new();
    for variable in graph.variables() {
        let belief = variable.belief().ok_or(FGError::NotInferred)?;
        let candidates = top_states(belief);
        if candidates.len() == 1 {
            assignment.insert(variable.id(), candidates[0]);
        } else {
            ambiguous.push((variable.id(), candidates));
        }
    }
    for (var, candidates) in &ambiguous {
        if assignment.contains_key(var) {
            continue;
        }
        let mut best: Option<(&Factor, usize, f64, usize)> = None;
        for fid in graph.variable(*var)?.factors() {
            let Ok(factor) = graph.factor(*fid) else {
                continue;
            };
            let Some(belief) = factor.belief() else {
                continue;
            };
            let Some(position) = factor.position_of(*var) else {
                continue;
            };
            for (index, value) in belief.iter().enumerate() {
                if !candidates.contains(&factor.state_of(index, position)) {
                    continue;
                }
                let agreement = agreement(factor, index, &assignment);
                let better = match best {
                    None => true,
                    Some((_, _, best_value, best_agreement)) => {
                        *value > best_value + TIE_TOLERANCE
                            || ((*value - best_value).abs() <= TIE_TOLERANCE
                                && agreement > best_agreement)
                    }
                };
                if better {
                    best = Some((factor, index, *value, agreement));
                }
            }
        }
        match best {
            Some((factor, index, _, _)) => {
                for (position, other) in factor.variables().iter().enumerate() {
                    if assignment.contains_key(other) {
                        continue;
                    }
                    let state = factor.state_of(index, position);
                    let allowed = ambiguous
                        .iter()
                        .find(|(v, _)| v == other)
                        .map_or(false, |(_, c)| c.contains(&state));
                    if allowed {
                        assignment.insert(*other, state);
                    }
                }
            }
            None => {
                warn!(
                    "variable '{}' is unresolved in the maximal assignment, state {} is taken",
                    graph.variable(*var)?.name(),
                    candidates[0]
                );
                assignment.insert(*var, candidates[0]);
            }
        }
    }
    Ok(assignment)
}

/// Number of resolved variables of `factor` whose state in entry `index`
/// matches the assignment
fn agreement(factor: &Factor, index: usize, assignment: &Assignment) -> usize {
    factor
        .variables()
        .iter()
        .enumerate()
        .filter(|(position, var)| {
            assignment.get(*var) == Some(&factor.state_of(index, *position))
        })
        .count()
}
