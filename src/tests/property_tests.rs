use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::{FactorGraph, Observation};
use crate::inference::{BeliefPropagationConfig, Inferencer, LoopyBeliefPropagation};

use super::utils::{brute_force, random_tree, structure};

/// Observation of the first `observed` variables, states wrapped into range
fn observation_of(fg: &FactorGraph, observed: &[usize]) -> Observation {
    fg.variables()
        .zip(observed)
        .map(|(v, s)| (v.id(), s % v.states()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Sum-product on a tree reproduces exact marginals and logZ, with and
    /// without evidence
    #[test]
    fn tree_marginals_are_exact(
        seed in any::<u64>(),
        nodes in 2usize..8,
        observed in prop::collection::vec(0usize..4, 0..3),
        log_space in any::<bool>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut fg = random_tree(&mut rng, nodes, 3);
        let observation = observation_of(&fg, &observed);
        fg.attach_observation(&observation).unwrap();
        let exact = brute_force(&fg);
        fg.detach_observation();

        let mut lbp = LoopyBeliefPropagation::new(BeliefPropagationConfig {
            log_space,
            tolerance: 1e-12,
            seed: Some(seed),
            ..Default::default()
        })
        .unwrap();
        lbp.set_factor_graph(fg);
        lbp.set_observation(observation);
        let info = lbp.run_message_passing().unwrap();
        prop_assert!(info.converged);
        let fg = lbp.factor_graph().unwrap();
        for variable in fg.variables() {
            let belief = variable.belief().unwrap();
            let expected = &exact.variables[&variable.id()];
            for (b, e) in belief.iter().zip(expected) {
                prop_assert!((b - e).abs() < 1e-8, "{} != {}", belief, expected);
            }
        }
        let log_z = lbp.calculate_log_z().unwrap();
        prop_assert!((log_z - exact.log_z).abs() < 1e-8, "{} != {}", log_z, exact.log_z);
    }

    /// Attaching and detaching evidence leaves the graph structure unchanged
    #[test]
    fn attach_detach_round_trip(
        seed in any::<u64>(),
        nodes in 2usize..10,
        observed in prop::collection::vec(0usize..4, 0..10),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut fg = random_tree(&mut rng, nodes, 4);
        let before = structure(&fg);
        let observation = observation_of(&fg, &observed);
        fg.attach_observation(&observation).unwrap();
        prop_assert_eq!(fg.evidence_factors().len(), observation.len());
        prop_assert_eq!(fg.factors_number(), before.0.len() + observation.len());
        fg.detach_observation();
        prop_assert_eq!(structure(&fg), before);
    }
}
