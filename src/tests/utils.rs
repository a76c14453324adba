use std::collections::HashMap;

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Uniform;

use crate::core::{FactorGraph, FactorGraphBuilder, FactorId, VariableId};

/// Exact marginals obtained by enumerating every joint assignment
pub(super) struct BruteForce {
    pub(super) variables: HashMap<VariableId, Array1<f64>>,
    pub(super) factors: HashMap<FactorId, Array1<f64>>,
    pub(super) log_z: f64,
}

/// Enumerates all joint states of the discrete part of `fg`
pub(super) fn brute_force(fg: &FactorGraph) -> BruteForce {
    let ids = fg.variable_ids();
    let cards: Vec<usize> = ids
        .iter()
        .map(|id| fg.variable(*id).unwrap().states())
        .collect();
    let slot: HashMap<VariableId, usize> = ids.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let total: usize = cards.iter().product();
    let mut variables: HashMap<VariableId, Array1<f64>> = ids
        .iter()
        .zip(&cards)
        .map(|(id, c)| (*id, Array1::zeros(*c)))
        .collect();
    let mut factors: HashMap<FactorId, Array1<f64>> = fg
        .discrete_factors()
        .map(|(id, f)| (id, Array1::zeros(f.len())))
        .collect();
    let mut z = 0f64;
    let mut state = vec![0usize; ids.len()];
    for joint in 0..total {
        let mut rest = joint;
        for (s, c) in state.iter_mut().zip(&cards) {
            *s = rest % c;
            rest /= c;
        }
        let mut weight = 1f64;
        let mut indices = Vec::new();
        for (id, f) in fg.discrete_factors() {
            let index: usize = f
                .variables()
                .iter()
                .zip(f.strides())
                .map(|(v, stride)| state[slot[v]] * stride)
                .sum();
            weight *= f.values()[index];
            indices.push((id, index));
        }
        z += weight;
        for (id, s) in ids.iter().zip(&state) {
            variables.get_mut(id).unwrap()[*s] += weight;
        }
        for (id, index) in indices {
            factors.get_mut(&id).unwrap()[index] += weight;
        }
    }
    for m in variables.values_mut() {
        *m /= z;
    }
    for m in factors.values_mut() {
        *m /= z;
    }
    BruteForce {
        variables,
        factors,
        log_z: z.ln(),
    }
}

/// Factor ids and every variable's factor list
pub(super) fn structure(fg: &FactorGraph) -> (Vec<FactorId>, Vec<(VariableId, Vec<FactorId>)>) {
    let variables = fg
        .variables()
        .map(|v| (v.id(), v.factors().to_vec()))
        .collect();
    (fg.factor_ids(), variables)
}

pub(super) fn assert_close(lhs: &Array1<f64>, rhs: &Array1<f64>, tol: f64) {
    assert_eq!(lhs.len(), rhs.len());
    for (l, r) in lhs.iter().zip(rhs) {
        assert!((l - r).abs() < tol, "{lhs} != {rhs}");
    }
}

// ------------------------------------------------------------------------------------------

pub(super) struct TwoVariables {
    pub(super) fg: FactorGraph,
    pub(super) a: VariableId,
    pub(super) b: VariableId,
    pub(super) prior: FactorId,
    pub(super) ab: FactorId,
}

/// A has prior [0.4, 0.6], B depends on A
pub(super) fn two_variables() -> TwoVariables {
    let mut fgb = FactorGraphBuilder::new("two variables");
    let a = fgb.add_variable("A", 2);
    let b = fgb.add_variable("B", 2);
    let prior = fgb.add_factor("prior", &[a], vec![0.4, 0.6]).unwrap();
    let ab = fgb
        .add_factor("A->B", &[a, b], vec![0.1, 0.55, 0.9, 0.45])
        .unwrap();
    TwoVariables {
        fg: fgb.build(),
        a,
        b,
        prior,
        ab,
    }
}

pub(super) struct Chain {
    pub(super) fg: FactorGraph,
    pub(super) mrna: VariableId,
    pub(super) tab: VariableId,
    pub(super) protein: VariableId,
    pub(super) to_tab: FactorId,
    pub(super) to_protein: FactorId,
}

pub(super) const MRNA_PRIOR: [f64; 3] = [0.2, 0.6, 0.2];
pub(super) const MRNA_TAB_CPT: [f64; 9] = [0.02, 0.01, 0.03, 0.89, 0.92, 0.76, 0.09, 0.07, 0.21];
pub(super) const PROTEIN_CPT: [f64; 9] = [0.9, 0.05, 0.05, 0.05, 0.9, 0.05, 0.05, 0.05, 0.9];

/// mRNA -> mRNA.tab and mRNA -> protein, 3 states each
pub(super) fn chain() -> Chain {
    let mut fgb = FactorGraphBuilder::new("chain");
    let mrna = fgb.add_variable("mRNA", 3);
    let tab = fgb.add_variable("mRNA.tab", 3);
    let protein = fgb.add_variable("protein", 3);
    fgb.add_factor("mRNA prior", &[mrna], MRNA_PRIOR.to_vec())
        .unwrap();
    let to_tab = fgb
        .add_factor("mRNA->mRNA.tab", &[mrna, tab], MRNA_TAB_CPT.to_vec())
        .unwrap();
    let to_protein = fgb
        .add_factor("mRNA->protein", &[mrna, protein], PROTEIN_CPT.to_vec())
        .unwrap();
    Chain {
        fg: fgb.build(),
        mrna,
        tab,
        protein,
        to_tab,
        to_protein,
    }
}

/// A random tree of `nodes_number` variables with random positive tables
/// and a random unary factor on every variable
pub(super) fn random_tree(rng: &mut impl Rng, nodes_number: usize, max_states: usize) -> FactorGraph {
    let mut fgb = FactorGraphBuilder::new("random tree");
    let states = Uniform::new_inclusive(2, max_states);
    let values = Uniform::new(0.05f64, 1f64);
    let cards: Vec<usize> = (0..nodes_number).map(|_| rng.sample(states)).collect();
    let ids: Vec<_> = cards
        .iter()
        .enumerate()
        .map(|(i, c)| fgb.add_variable(format!("x{i}"), *c))
        .collect();
    for (i, id) in ids.iter().enumerate() {
        let table = (0..cards[i]).map(|_| rng.sample(values)).collect();
        fgb.add_factor(format!("u{i}"), &[*id], table).unwrap();
    }
    let mut order: Vec<usize> = (1..nodes_number).collect();
    order.shuffle(rng);
    for child in order {
        let parent = rng.gen_range(0..child);
        let mut pair = [parent, child];
        pair.shuffle(rng);
        let table = (0..cards[pair[0]] * cards[pair[1]])
            .map(|_| rng.sample(values))
            .collect();
        fgb.add_factor(
            format!("e{parent}-{child}"),
            &[ids[pair[0]], ids[pair[1]]],
            table,
        )
        .unwrap();
    }
    fgb.build()
}

/// Joint assignment with the maximal unnormalized weight and that weight
pub(super) fn brute_force_argmax(fg: &FactorGraph) -> (HashMap<VariableId, usize>, f64) {
    let ids = fg.variable_ids();
    let cards: Vec<usize> = ids
        .iter()
        .map(|id| fg.variable(*id).unwrap().states())
        .collect();
    let total: usize = cards.iter().product();
    let mut best = (HashMap::new(), f64::NEG_INFINITY);
    for joint in 0..total {
        let mut rest = joint;
        let assignment: HashMap<VariableId, usize> = ids
            .iter()
            .zip(&cards)
            .map(|(id, c)| {
                let s = rest % c;
                rest /= c;
                (*id, s)
            })
            .collect();
        let weight = joint_weight(fg, &assignment);
        if weight > best.1 {
            best = (assignment, weight);
        }
    }
    best
}

/// Product of all discrete factors at a joint assignment
pub(super) fn joint_weight(fg: &FactorGraph, assignment: &HashMap<VariableId, usize>) -> f64 {
    fg.discrete_factors()
        .map(|(_, f)| f.value(assignment).unwrap())
        .product()
}
