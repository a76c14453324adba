use log::{debug, info, warn};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Dirichlet;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::core::{FGError, FGResult, FactorId, Observation, VariableId};
use crate::inference::Inferencer;
use crate::learning::schedulers::{
    get_annealing_exponent_scheduler, get_standard_exponent_scheduler,
    DEFAULT_ANNEALING_TEMPERATURES,
};

// ------------------------------------------------------------------------------------------

/// Hyper-parameters of expectation maximization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmConfig {
    /// A maximal number of rounds
    pub max_iteration: usize,

    /// Learning stops once the relative change of the log-likelihood
    /// between rounds is not greater than this threshold
    pub tolerance: f64,

    /// Raise expected counts to `1 / T` over `annealing_temperatures`
    pub annealing: bool,

    pub annealing_temperatures: Vec<f64>,

    /// Number of runs of `run_with_restarts`, the first one starts from the
    /// current tables, the others from random tables
    pub restarts: usize,

    /// Seed of random tables. Entropy is used if not set
    pub seed: Option<u64>,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            max_iteration: 100,
            tolerance: 1e-5,
            annealing: false,
            annealing_temperatures: DEFAULT_ANNEALING_TEMPERATURES.to_vec(),
            restarts: 1,
            seed: None,
        }
    }
}

impl EmConfig {
    fn validate(&self) -> FGResult<()> {
        if self.max_iteration == 0 || self.restarts == 0 {
            return Err(FGError::InvalidConfiguration(
                "EM needs at least one round and one restart".to_string(),
            ));
        }
        if !(self.tolerance >= 0f64) {
            return Err(FGError::InvalidConfiguration(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.annealing_temperatures.iter().any(|t| !(*t > 0f64)) {
            return Err(FGError::InvalidConfiguration(
                "annealing temperatures must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Information returned after learning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmInfo {
    /// Log-likelihood of the corpus at the beginning of every round
    pub log_likelihood_history: Vec<f64>,

    /// Number of rounds whose log-likelihood was lower than the previous one
    pub decreases: usize,

    /// Number of rounds performed
    pub iterations_number: usize,

    /// False if `max_iteration` rounds passed without reaching the tolerance
    pub converged: bool,

    /// Index of the restart the result comes from
    pub restart: usize,
}

impl EmInfo {
    /// Log-likelihood of the last round
    #[inline]
    pub fn final_log_likelihood(&self) -> f64 {
        self.log_likelihood_history
            .last()
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }
}

/// Log-likelihood per round. Decreases are logged and counted, never fatal
#[derive(Debug, Clone, Default)]
pub(crate) struct LikelihoodHistory {
    pub(crate) values: Vec<f64>,
    pub(crate) decreases: usize,
}

impl LikelihoodHistory {
    /// Appends a value, returns true if it is lower than the previous one
    pub(crate) fn push(&mut self, value: f64) -> bool {
        let decreased = matches!(self.values.last(), Some(prev) if value < *prev);
        if decreased {
            self.decreases += 1;
            warn!(
                "log-likelihood decreased at round {}: {} -> {}",
                self.values.len() + 1,
                self.values[self.values.len() - 1],
                value
            );
        }
        self.values.push(value);
        decreased
    }

    /// Relative change between the last two values
    pub(crate) fn relative_change(&self) -> Option<f64> {
        match self.values.as_slice() {
            [.., prev, last] => Some((last - prev).abs() / prev.abs().max(f64::MIN_POSITIVE)),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------

/// Factors tied to one learnable value table.
///
/// The table is a conditional probability table: entries sharing a state of
/// the parent variable sum to one. Without a parent the whole table sums to one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroup {
    factors: Vec<FactorId>,
    cardinalities: Vec<usize>,
    parent: Option<usize>,
}

impl ParameterGroup {
    #[inline]
    pub fn factors(&self) -> &[FactorId] {
        &self.factors
    }

    #[inline]
    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    /// Position of the parent variable in the factors' variable lists
    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

/// Groups table indices by the state of the parent variable
fn parent_blocks(cardinalities: &[usize], parent: Option<usize>) -> Vec<Vec<usize>> {
    let len: usize = cardinalities.iter().product();
    match parent {
        None => vec![(0..len).collect()],
        Some(position) => {
            let stride: usize = cardinalities[..position].iter().product();
            let card = cardinalities[position];
            let mut blocks = vec![Vec::with_capacity(len / card.max(1)); card];
            for index in 0..len {
                blocks[(index / stride) % card].push(index);
            }
            blocks
        }
    }
}

/// Normalizes counts into a conditional probability table: every entry is
/// divided by the sum of entries sharing its parent state
///
/// # Arguments
///
/// * `counts` - Flat table of counts with the usual strides
/// * `cardinalities` - Cardinalities of the table's variables
/// * `parent` - Position of the parent variable, `None` normalizes the whole table
///
/// # Example
///
/// ```
/// use fgcore::learning::normalize_by_parent;
/// use ndarray::array;
///
/// let counts = array![1., 3., 3., 1.];
/// let cpt = normalize_by_parent(&counts, &[2, 2], Some(0)).unwrap();
/// assert_eq!(cpt, array![0.25, 0.75, 0.75, 0.25]);
/// ```
pub fn normalize_by_parent(
    counts: &Array1<f64>,
    cardinalities: &[usize],
    parent: Option<usize>,
) -> FGResult<Array1<f64>> {
    let mut values = counts.clone();
    for block in parent_blocks(cardinalities, parent) {
        let sum: f64 = block.iter().map(|i| counts[*i]).sum();
        if !(sum > 0f64) || !sum.is_finite() {
            return Err(FGError::NumericError(format!(
                "cannot normalize counts with sum {sum}"
            )));
        }
        for i in block {
            values[i] /= sum;
        }
    }
    Ok(values)
}

// ------------------------------------------------------------------------------------------

/// Expectation maximization over an inference engine.
///
/// Every round runs inference once without evidence to obtain the background
/// `logZ` and once per training observation. Beliefs of learnable factors are
/// accumulated on top of Laplace counts and normalized by parent state
///
/// # Example
///
/// ```
/// use fgcore::core::{FactorGraphBuilder, Observation};
/// use fgcore::inference::{BeliefPropagationConfig, Inferencer, LoopyBeliefPropagation};
/// use fgcore::learning::{EmConfig, ExpectationMaximization};
///
/// let mut fgb = FactorGraphBuilder::new("coin");
/// let a = fgb.add_variable("A", 2);
/// let prior = fgb.add_factor("prior", &[a], vec![0.5, 0.5]).unwrap();
///
/// let mut lbp = LoopyBeliefPropagation::new(BeliefPropagationConfig::default()).unwrap();
/// lbp.set_factor_graph(fgb.build());
/// let mut em = ExpectationMaximization::new(lbp, EmConfig::default()).unwrap();
/// em.add_learnable_factor(prior, None).unwrap();
///
/// let corpus: Vec<Observation> = [1, 1, 1, 0]
///     .iter()
///     .map(|s| [(a, *s)].into_iter().collect())
///     .collect();
/// em.run(&corpus).unwrap();
///
/// let fg = em.engine().factor_graph().unwrap();
/// let values = fg.factor(prior).unwrap().values();
/// assert!((values[1] - 4. / 6.).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct ExpectationMaximization<I: Inferencer> {
    engine: I,
    config: EmConfig,
    groups: Vec<ParameterGroup>,
    rng: StdRng,
}

impl<I: Inferencer> ExpectationMaximization<I> {
    /// Wraps an engine that already holds the factor graph to learn
    pub fn new(engine: I, config: EmConfig) -> FGResult<Self> {
        config.validate()?;
        engine.factor_graph()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(ExpectationMaximization {
            engine,
            config,
            groups: Vec::new(),
            rng,
        })
    }

    #[inline]
    pub fn engine(&self) -> &I {
        &self.engine
    }

    #[inline]
    pub fn engine_mut(&mut self) -> &mut I {
        &mut self.engine
    }

    pub fn into_engine(self) -> I {
        self.engine
    }

    #[inline]
    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    #[inline]
    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    /// Marks a factor as learnable
    ///
    /// # Arguments
    ///
    /// * `factor` - A discrete factor of the engine's graph
    /// * `parent` - The conditioning variable, `None` for a prior
    pub fn add_learnable_factor(
        &mut self,
        factor: FactorId,
        parent: Option<VariableId>,
    ) -> FGResult<()> {
        let f = self.engine.factor_graph()?.factor(factor)?;
        let parent = match parent {
            Some(var) => Some(f.position_of(var).ok_or(FGError::UnknownVariable(var))?),
            None => None,
        };
        self.add_shared_factors(&[factor], parent)
    }

    /// Ties several factors to one learnable table. All of them must have
    /// identical cardinalities
    ///
    /// # Arguments
    ///
    /// * `factors` - Tied factors
    /// * `parent` - Position of the parent variable in each factor, `None` for priors
    pub fn add_shared_factors(&mut self, factors: &[FactorId], parent: Option<usize>) -> FGResult<()> {
        let graph = self.engine.factor_graph()?;
        let first = *factors.first().ok_or_else(|| {
            FGError::InvalidConfiguration("a parameter group needs at least one factor".to_string())
        })?;
        let cardinalities = graph.factor(first)?.cardinalities().to_vec();
        for id in &factors[1..] {
            let actual = graph.factor(*id)?.cardinalities();
            if actual != cardinalities.as_slice() {
                return Err(FGError::SharedFactorMismatch {
                    expected: cardinalities,
                    actual: actual.to_vec(),
                });
            }
        }
        if let Some(position) = parent {
            if position >= cardinalities.len() {
                return Err(FGError::InvalidConfiguration(format!(
                    "parent position {position} is out of range of [0..{})",
                    cardinalities.len()
                )));
            }
        }
        self.groups.push(ParameterGroup {
            factors: factors.to_vec(),
            cardinalities,
            parent,
        });
        Ok(())
    }

    /// Log-likelihood of a corpus under the current tables:
    /// `sum_obs (logZ_obs - logZ_background)`
    pub fn log_likelihood(&mut self, observations: &[Observation]) -> FGResult<f64> {
        self.expectation(observations, 1f64).map(|(ll, _)| ll)
    }

    /// Learns the tables of parameter groups from a corpus
    pub fn run(&mut self, observations: &[Observation]) -> FGResult<EmInfo> {
        let scheduler: Box<dyn Fn(usize) -> f64> = if self.config.annealing {
            Box::new(get_annealing_exponent_scheduler(
                self.config.annealing_temperatures.clone(),
            ))
        } else {
            Box::new(get_standard_exponent_scheduler())
        };
        let mut history = LikelihoodHistory::default();
        let mut converged = false;
        for iteration in 0..self.config.max_iteration {
            let exponent = scheduler(iteration);
            let (log_likelihood, counts) = self.expectation(observations, exponent)?;
            history.push(log_likelihood);
            self.maximization(counts)?;
            debug!(
                "EM round {}: exponent {}, log-likelihood {}",
                iteration + 1,
                exponent,
                log_likelihood
            );
            let annealed = iteration > 0 && exponent == 1f64 && scheduler(iteration - 1) == 1f64;
            if annealed
                && history
                    .relative_change()
                    .map_or(false, |c| c <= self.config.tolerance)
            {
                converged = true;
                break;
            }
        }
        let info = EmInfo {
            iterations_number: history.values.len(),
            decreases: history.decreases,
            log_likelihood_history: history.values,
            converged,
            restart: 0,
        };
        info!(
            "EM finished after {} rounds, log-likelihood {}, converged: {}",
            info.iterations_number,
            info.final_log_likelihood(),
            info.converged
        );
        Ok(info)
    }

    /// Replaces the tables of all parameter groups by random conditional
    /// probability tables, each block drawn from a flat Dirichlet
    pub fn randomize_parameters(&mut self) -> FGResult<()> {
        for group in &self.groups {
            let len: usize = group.cardinalities.iter().product();
            let mut values = Array1::<f64>::zeros(len);
            for block in parent_blocks(&group.cardinalities, group.parent) {
                let draw = if block.len() < 2 {
                    vec![1f64; block.len()]
                } else {
                    let dirichlet = Dirichlet::new(&vec![1f64; block.len()])
                        .map_err(|e| FGError::NumericError(format!("Dirichlet: {e}")))?;
                    self.rng.sample(dirichlet)
                };
                for (i, v) in block.iter().zip(draw) {
                    values[*i] = v;
                }
            }
            let graph = self.engine.factor_graph_mut()?;
            for id in &group.factors {
                graph.factor_mut(*id)?.set_values(values.clone())?;
            }
        }
        Ok(())
    }

    /// Runs `config.restarts` independent learning procedures in parallel and
    /// keeps the one with the highest final log-likelihood. The first restart
    /// starts from the current tables, the others from random ones
    pub fn run_with_restarts(&mut self, observations: &[Observation]) -> FGResult<EmInfo>
    where
        I: Clone + Send + Sync,
    {
        let base_seed: u64 = self.rng.gen();
        let results: Vec<FGResult<(Self, EmInfo)>> = (0..self.config.restarts)
            .into_par_iter()
            .map(|restart| {
                let mut learner = ExpectationMaximization {
                    engine: self.engine.clone(),
                    config: self.config.clone(),
                    groups: self.groups.clone(),
                    rng: StdRng::seed_from_u64(base_seed.wrapping_add(restart as u64)),
                };
                if restart > 0 {
                    learner.randomize_parameters()?;
                }
                let mut info = learner.run(observations)?;
                info.restart = restart;
                Ok((learner, info))
            })
            .collect();
        let mut best: Option<(Self, EmInfo)> = None;
        for result in results {
            let (learner, info) = result?;
            let better = best.as_ref().map_or(true, |(_, b)| {
                info.final_log_likelihood() > b.final_log_likelihood()
            });
            if better {
                best = Some((learner, info));
            }
        }
        match best {
            Some((learner, info)) => {
                info!(
                    "restart {} is the best one with log-likelihood {}",
                    info.restart,
                    info.final_log_likelihood()
                );
                self.engine = learner.engine;
                Ok(info)
            }
            None => Err(FGError::InvalidConfiguration(
                "EM needs at least one restart".to_string(),
            )),
        }
    }
}

// private methods --------------------------------------------------------------------------

impl<I: Inferencer> ExpectationMaximization<I> {
    /// Expected counts of every group and the corpus log-likelihood
    fn expectation(
        &mut self,
        observations: &[Observation],
        exponent: f64,
    ) -> FGResult<(f64, Vec<Array1<f64>>)> {
        let mut counts: Vec<Array1<f64>> = self
            .groups
            .iter()
            .map(|g| Array1::ones(g.cardinalities.iter().product::<usize>()))
            .collect();
        let previous = self.engine.observation().cloned();
        let result = self.accumulate(observations, exponent, &mut counts);
        match previous {
            Some(observation) => self.engine.set_observation(observation),
            None => self.engine.clear_observation(),
        }
        Ok((result?, counts))
    }

    fn accumulate(
        &mut self,
        observations: &[Observation],
        exponent: f64,
        counts: &mut [Array1<f64>],
    ) -> FGResult<f64> {
        self.engine.clear_observation();
        self.engine.run_inference()?;
        let background = self.engine.calculate_log_z()?;
        let mut log_likelihood = 0f64;
        for observation in observations {
            self.engine.set_observation(observation.clone());
            self.engine.run_inference()?;
            log_likelihood += self.engine.calculate_log_z()? - background;
            let graph = self.engine.factor_graph()?;
            for (group, count) in self.groups.iter().zip(counts.iter_mut()) {
                for id in &group.factors {
                    let belief = graph.factor(*id)?.belief().ok_or(FGError::NotInferred)?;
                    if exponent == 1f64 {
                        *count += belief;
                    } else {
                        *count += &belief.mapv(|b| b.powf(exponent));
                    }
                }
            }
        }
        Ok(log_likelihood)
    }

    fn maximization(&mut self, counts: Vec<Array1<f64>>) -> FGResult<()> {
        let graph = self.engine.factor_graph_mut()?;
        for (group, count) in self.groups.iter().zip(counts) {
            let values = normalize_by_parent(&count, &group.cardinalities, group.parent)?;
            for id in &group.factors {
                graph.factor_mut(*id)?.set_values(values.clone())?;
            }
        }
        Ok(())
    }
}
