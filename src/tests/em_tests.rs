use ndarray::{array, Array1};

use crate::core::{FGError, FactorGraphBuilder, Observation, VariableId};
use crate::inference::{BeliefPropagationConfig, Inferencer, LoopyBeliefPropagation};
use crate::learning::{EmConfig, ExpectationMaximization, LikelihoodHistory};

use super::utils::{assert_close, chain, two_variables};

fn lbp() -> LoopyBeliefPropagation {
    LoopyBeliefPropagation::new(BeliefPropagationConfig {
        seed: Some(13),
        ..Default::default()
    })
    .unwrap()
}

/// Observations of the two leaves of the chain, mRNA stays hidden
fn leaves_corpus(tab: VariableId, protein: VariableId) -> Vec<Observation> {
    [(0, 0), (1, 1), (1, 1), (1, 0), (2, 2), (1, 1), (2, 2), (0, 0), (1, 1), (1, 2)]
        .iter()
        .map(|(t, p)| [(tab, *t), (protein, *p)].into_iter().collect())
        .collect()
}

/// Checks that every parent block of a table sums to one
fn assert_cpt(values: &Array1<f64>, parent_states: usize) {
    for parent in 0..parent_states {
        let sum: f64 = values.iter().skip(parent).step_by(parent_states).sum();
        assert!((sum - 1f64).abs() < 1e-10, "{values}");
    }
}

// ------------------------------------------------------------------------------------------

#[test]
fn complete_data_gives_laplace_frequencies() {
    let tv = two_variables();
    let mut engine = lbp();
    engine.set_factor_graph(tv.fg);
    let mut em = ExpectationMaximization::new(engine, EmConfig::default()).unwrap();
    em.add_learnable_factor(tv.prior, None).unwrap();
    em.add_learnable_factor(tv.ab, Some(tv.a)).unwrap();
    assert_eq!(em.groups()[1].parent(), Some(0));

    let corpus: Vec<Observation> = [(0, 0), (0, 0), (0, 0), (0, 1), (1, 1), (1, 1)]
        .iter()
        .map(|(a, b)| [(tv.a, *a), (tv.b, *b)].into_iter().collect())
        .collect();
    let info = em.run(&corpus).unwrap();
    assert!(info.converged);
    assert_eq!(info.iterations_number, 3);
    assert_eq!(info.decreases, 0);

    let fg = em.engine().factor_graph().unwrap();
    assert_close(fg.factor(tv.prior).unwrap().values(), &array![5. / 8., 3. / 8.], 1e-8);
    assert_close(
        fg.factor(tv.ab).unwrap().values(),
        &array![4. / 6., 1. / 4., 2. / 6., 3. / 4.],
        1e-8,
    );
    let expected = 3. * (5f64 / 8. * 4. / 6.).ln()
        + (5f64 / 8. * 2. / 6.).ln()
        + 2. * (3f64 / 8. * 3. / 4.).ln();
    assert!((info.final_log_likelihood() - expected).abs() < 1e-8);
    assert!((em.log_likelihood(&corpus).unwrap() - expected).abs() < 1e-8);
    assert!(em.engine().observation().is_none());
}

/// EM on the chain with mRNA hidden and all three tables learnable
fn hidden_parent_learner() -> (ExpectationMaximization<LoopyBeliefPropagation>, Vec<Observation>) {
    let chain = chain();
    let mut engine = lbp();
    engine.set_factor_graph(chain.fg);
    let config = EmConfig {
        max_iteration: 50,
        ..Default::default()
    };
    let mut em = ExpectationMaximization::new(engine, config).unwrap();
    let prior = em
        .engine()
        .factor_graph()
        .unwrap()
        .variable(chain.mrna)
        .unwrap()
        .factors()[0];
    em.add_learnable_factor(prior, None).unwrap();
    em.add_learnable_factor(chain.to_tab, Some(chain.mrna)).unwrap();
    em.add_learnable_factor(chain.to_protein, Some(chain.mrna))
        .unwrap();
    (em, leaves_corpus(chain.tab, chain.protein))
}

#[test]
fn hidden_parent_learning() {
    let (mut em, corpus) = hidden_parent_learner();
    let corpus: Vec<Observation> = corpus.iter().cycle().take(50 * corpus.len()).cloned().collect();
    let initial = em.log_likelihood(&corpus).unwrap();
    let info = em.run(&corpus).unwrap();

    let history = &info.log_likelihood_history;
    assert!((history[0] - initial).abs() < 1e-10);
    assert!(info.final_log_likelihood() > initial);
    assert_eq!(info.decreases, 0);
    for pair in history.windows(2) {
        assert!(pair[1] >= pair[0], "{} -> {}", pair[0], pair[1]);
    }
    let fg = em.engine().factor_graph().unwrap();
    for (_, factor) in fg.discrete_factors() {
        match factor.len() {
            3 => assert!((factor.values().sum() - 1f64).abs() < 1e-10),
            _ => assert_cpt(factor.values(), 3),
        }
    }
}

#[test]
fn laplace_counts_on_a_small_corpus_decrease_likelihood() {
    // 9-cell tables with a count of one per cell outweigh ten observations
    let (mut em, corpus) = hidden_parent_learner();
    let info = em.run(&corpus).unwrap();
    assert!(info.decreases >= 1);
    assert_eq!(info.log_likelihood_history.len(), info.iterations_number);
    assert!(info.final_log_likelihood().is_finite());
}

#[test]
fn annealing_delays_convergence() {
    let chain = chain();
    let mut engine = lbp();
    engine.set_factor_graph(chain.fg);
    let config = EmConfig {
        max_iteration: 40,
        annealing: true,
        ..Default::default()
    };
    let mut em = ExpectationMaximization::new(engine, config).unwrap();
    em.add_learnable_factor(chain.to_tab, Some(chain.mrna)).unwrap();
    let info = em.run(&leaves_corpus(chain.tab, chain.protein)).unwrap();
    assert!(info.iterations_number >= 6);
    assert!(info.final_log_likelihood().is_finite());
    let fg = em.engine().factor_graph().unwrap();
    assert_cpt(fg.factor(chain.to_tab).unwrap().values(), 3);
}

#[test]
fn random_restarts_keep_the_best_run() {
    let chain = chain();
    let corpus = leaves_corpus(chain.tab, chain.protein);
    let learner = |restarts: usize| {
        let mut engine = lbp();
        engine.set_factor_graph(chain.fg.clone());
        let config = EmConfig {
            max_iteration: 30,
            restarts,
            seed: Some(21),
            ..Default::default()
        };
        let mut em = ExpectationMaximization::new(engine, config).unwrap();
        em.add_learnable_factor(chain.to_tab, Some(chain.mrna)).unwrap();
        em.add_learnable_factor(chain.to_protein, Some(chain.mrna))
            .unwrap();
        em
    };
    let single = learner(1).run(&corpus).unwrap();
    let mut em = learner(4);
    let best = em.run_with_restarts(&corpus).unwrap();
    assert!(best.restart < 4);
    assert!(best.final_log_likelihood() >= single.final_log_likelihood() - 1e-8);
    let fg = em.engine().factor_graph().unwrap();
    assert_cpt(fg.factor(chain.to_tab).unwrap().values(), 3);
    assert_cpt(fg.factor(chain.to_protein).unwrap().values(), 3);
}

#[test]
fn shared_factors() {
    let mut fgb = FactorGraphBuilder::new("shared");
    let a = fgb.add_variable("A", 2);
    let b1 = fgb.add_variable("B1", 2);
    let b2 = fgb.add_variable("B2", 2);
    let c = fgb.add_variable("C", 3);
    fgb.add_factor("prior", &[a], vec![0.5, 0.5]).unwrap();
    let f1 = fgb.add_factor("A->B1", &[a, b1], vec![0.5; 4]).unwrap();
    let f2 = fgb.add_factor("A->B2", &[a, b2], vec![0.5; 4]).unwrap();
    let f3 = fgb
        .add_factor("A->C", &[a, c], vec![1. / 3.; 6])
        .unwrap();
    let mut engine = lbp();
    engine.set_factor_graph(fgb.build());
    let mut em = ExpectationMaximization::new(engine, EmConfig::default()).unwrap();

    assert!(matches!(
        em.add_shared_factors(&[f1, f3], Some(0)),
        Err(FGError::SharedFactorMismatch { .. })
    ));
    assert!(matches!(
        em.add_shared_factors(&[], None),
        Err(FGError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        em.add_shared_factors(&[f1, f2], Some(2)),
        Err(FGError::InvalidConfiguration(_))
    ));
    assert!(em.groups().is_empty());
    em.add_shared_factors(&[f1, f2], Some(0)).unwrap();

    let corpus: Vec<Observation> = [(0, 0, 1), (1, 1, 1)]
        .iter()
        .map(|(sa, s1, s2)| [(a, *sa), (b1, *s1), (b2, *s2)].into_iter().collect())
        .collect();
    let info = em.run(&corpus).unwrap();
    assert!(info.converged);
    let fg = em.engine().factor_graph().unwrap();
    let expected = array![0.5, 0.25, 0.5, 0.75];
    assert_close(fg.factor(f1).unwrap().values(), &expected, 1e-8);
    assert_close(fg.factor(f2).unwrap().values(), &expected, 1e-8);
}

#[test]
fn likelihood_history_logs_decreases() {
    let mut history = LikelihoodHistory::default();
    assert_eq!(history.relative_change(), None);
    assert!(!history.push(-10.));
    assert!(!history.push(-8.));
    assert!(history.push(-9.));
    assert_eq!(history.decreases, 1);
    assert_eq!(history.values, vec![-10., -8., -9.]);
    assert!((history.relative_change().unwrap() - 1. / 8.).abs() < 1e-12);
}

#[test]
fn invalid_learning_setups() {
    assert!(matches!(
        ExpectationMaximization::new(lbp(), EmConfig::default()),
        Err(FGError::MissingFactorGraph)
    ));
    let tv = two_variables();
    let mut engine = lbp();
    engine.set_factor_graph(tv.fg);
    assert!(matches!(
        ExpectationMaximization::new(
            engine.clone(),
            EmConfig {
                annealing_temperatures: vec![2., 0.],
                ..Default::default()
            }
        ),
        Err(FGError::InvalidConfiguration(_))
    ));
    let mut em = ExpectationMaximization::new(engine, EmConfig::default()).unwrap();
    assert!(matches!(
        em.add_learnable_factor(tv.prior, Some(tv.b)),
        Err(FGError::UnknownVariable(_))
    ));
}
