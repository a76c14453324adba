use ndarray::{array, Array1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::{FactorGraph, FactorGraphBuilder, GaussianComponent, Observation};
use crate::inference::{
    BeliefPropagationConfig, InferenceInfo, Inferencer, LoopyBeliefPropagation, MessageInit,
    UpdateSchedule,
};

use super::utils::{assert_close, brute_force, chain, random_tree, two_variables};

fn engine(config: BeliefPropagationConfig, fg: FactorGraph) -> LoopyBeliefPropagation {
    let mut lbp = LoopyBeliefPropagation::new(config).unwrap();
    lbp.set_factor_graph(fg);
    lbp
}

fn seeded() -> BeliefPropagationConfig {
    BeliefPropagationConfig {
        seed: Some(42),
        ..Default::default()
    }
}

/// Compares every variable and factor belief with exact marginals
fn check_exact(fg: &FactorGraph, log_z: f64, error: f64) {
    let exact = brute_force(fg);
    for variable in fg.variables() {
        assert_close(
            variable.belief().unwrap(),
            &exact.variables[&variable.id()],
            error,
        );
    }
    for (id, factor) in fg.discrete_factors() {
        assert_close(factor.belief().unwrap(), &exact.factors[&id], error);
    }
    assert!((log_z - exact.log_z).abs() < error);
}

// ------------------------------------------------------------------------------------------

#[test]
fn two_variables_marginals() {
    let tv = two_variables();
    let mut lbp = engine(seeded(), tv.fg);
    let info = match lbp.run_inference().unwrap() {
        InferenceInfo::MessagePassing(info) => info,
        InferenceInfo::Sampling(_) => unreachable!(),
    };
    assert!(info.converged);
    assert!(info.iterations_number <= 3);
    let fg = lbp.factor_graph().unwrap();
    assert_close(fg.variable(tv.a).unwrap().belief().unwrap(), &array![0.4, 0.6], 1e-10);
    assert_close(fg.variable(tv.b).unwrap().belief().unwrap(), &array![0.37, 0.63], 1e-10);
    assert_close(fg.factor(tv.prior).unwrap().belief().unwrap(), &array![0.4, 0.6], 1e-10);
    assert_close(
        fg.factor(tv.ab).unwrap().belief().unwrap(),
        &array![0.04, 0.33, 0.36, 0.27],
        1e-10,
    );
    assert!(lbp.calculate_log_z().unwrap().abs() < 1e-10);
}

#[test]
fn chain_with_evidence() {
    let chain = chain();
    let factors_number = chain.fg.factors_number();
    let mut lbp = engine(seeded(), chain.fg);
    let mut observation = Observation::new();
    observation.set_state(chain.mrna, 2);
    lbp.set_observation(observation);
    for _ in 0..2 {
        lbp.run_inference().unwrap();
        let fg = lbp.factor_graph().unwrap();
        assert!(fg.evidence_factors().is_empty());
        assert_eq!(fg.factors_number(), factors_number);
        assert_close(fg.variable(chain.mrna).unwrap().belief().unwrap(), &array![0., 0., 1.], 1e-10);
        assert_close(
            fg.variable(chain.tab).unwrap().belief().unwrap(),
            &array![0.03, 0.76, 0.21],
            1e-10,
        );
        assert_close(
            fg.variable(chain.protein).unwrap().belief().unwrap(),
            &array![0.05, 0.05, 0.9],
            1e-10,
        );
        // the likelihood of the evidence is the prior of mRNA = 2
        assert!((lbp.calculate_log_z().unwrap() - 0.2f64.ln()).abs() < 1e-10);
    }
    assert_eq!(
        lbp.factor_graph().unwrap().variable(chain.tab).unwrap().most_probable_state(),
        Some(1)
    );

    lbp.clear_observation();
    lbp.run_inference().unwrap();
    let fg = lbp.factor_graph().unwrap();
    // prior of mRNA is recovered without evidence
    assert_close(
        fg.variable(chain.mrna).unwrap().belief().unwrap(),
        &array![0.2, 0.6, 0.2],
        1e-10,
    );
    let log_z = lbp.calculate_log_z().unwrap();
    check_exact(lbp.factor_graph().unwrap(), log_z, 1e-10);
}

#[test]
fn log_space_agrees_with_linear_space() {
    let chain = chain();
    let mut observation = Observation::new();
    observation.set_state(chain.protein, 0);
    let mut beliefs = Vec::new();
    for log_space in [false, true] {
        let config = BeliefPropagationConfig {
            log_space,
            ..seeded()
        };
        let mut lbp = engine(config, chain.fg.clone());
        lbp.set_observation(observation.clone());
        lbp.run_inference().unwrap();
        let fg = lbp.factor_graph().unwrap();
        let b: Vec<Array1<f64>> = fg
            .variables()
            .map(|v| v.belief().unwrap().clone())
            .collect();
        beliefs.push((b, lbp.calculate_log_z().unwrap()));
    }
    for (linear, log) in beliefs[0].0.iter().zip(&beliefs[1].0) {
        assert_close(linear, log, 1e-10);
    }
    assert!((beliefs[0].1 - beliefs[1].1).abs() < 1e-10);
}

#[test]
fn random_trees_are_exact() {
    let mut rng = StdRng::seed_from_u64(29);
    for (i, (schedule, initialization, log_space)) in [
        (UpdateSchedule::Variables, MessageInit::Uniform, false),
        (UpdateSchedule::Factors, MessageInit::Random, false),
        (UpdateSchedule::Variables, MessageInit::Random, true),
        (UpdateSchedule::Factors, MessageInit::Uniform, true),
    ]
    .into_iter()
    .enumerate()
    {
        let fg = random_tree(&mut rng, 8, 3);
        assert!(fg.is_tree());
        let config = BeliefPropagationConfig {
            schedule,
            initialization,
            log_space,
            tolerance: 1e-12,
            seed: Some(i as u64),
            ..Default::default()
        };
        let mut lbp = engine(config, fg);
        let info = lbp.run_message_passing().unwrap();
        assert!(info.converged);
        let log_z = lbp.calculate_log_z().unwrap();
        check_exact(lbp.factor_graph().unwrap(), log_z, 1e-8);
        for variable in lbp.factor_graph().unwrap().variables() {
            assert!((variable.belief().unwrap().sum() - 1f64).abs() < 1e-12);
        }
    }
}

#[test]
fn continuous_leaf_evidence() {
    let mut fgb = FactorGraphBuilder::new("leaf");
    let d = fgb.add_variable("D", 2);
    let x = fgb.add_continuous_variable("X", false);
    fgb.add_factor("prior", &[d], vec![0.3, 0.7]).unwrap();
    let mixtures = vec![
        vec![GaussianComponent::new(1., 0., 1.)],
        vec![GaussianComponent::new(1., 2., 1.)],
    ];
    fgb.add_clg_factor("clg", d, x, mixtures.clone()).unwrap();
    let mut lbp = engine(seeded(), fgb.build());

    // without a value the leaf integrates to one for each state
    lbp.run_inference().unwrap();
    let fg = lbp.factor_graph().unwrap();
    assert_close(fg.variable(d).unwrap().belief().unwrap(), &array![0.3, 0.7], 1e-10);
    assert!(fg.contains_variable(x));
    assert_eq!(fg.continuous_factors().count(), 1);

    let mut observation = Observation::new();
    observation.set_continuous(x, 0.5);
    lbp.set_observation(observation);
    lbp.run_inference().unwrap();
    let posterior = array![
        0.3 * mixtures[0][0].weighted_density(0.5),
        0.7 * mixtures[1][0].weighted_density(0.5)
    ];
    let posterior = &posterior / posterior.sum();
    let fg = lbp.factor_graph().unwrap();
    assert_close(fg.variable(d).unwrap().belief().unwrap(), &posterior, 1e-10);
    assert!(!fg.has_substitutions());
    assert_eq!(fg.continuous_factors().count(), 1);
}
