use std::collections::HashMap;
use std::fmt::Display;

use log::{debug, info, warn};
use ndarray::Array1;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::{exp_shifted, normalize, FGError, FGResult, FactorGraph, FactorId, Observation};
use crate::inference::{bethe_log_z, run_staged, InferenceInfo, Inferencer};

/// Potential scale reduction above this value is reported as a warning
const PSRF_WARNING_THRESHOLD: f64 = 1.1;

/// Draws of a chain's starting state before giving up
const INITIAL_STATE_ATTEMPTS: usize = 100;

// ------------------------------------------------------------------------------------------

/// Hyper-parameters of Gibbs sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GibbsConfig {
    /// Sweeps discarded at the beginning of every chain
    pub burnin: usize,

    /// Retained sweeps per chain, one sample per sweep
    pub max_iteration: usize,

    /// Number of independent chains
    pub restart: usize,

    /// Conditionals of variables with at most this many neighbours are cached
    pub blanket_cache_limit: usize,

    /// Seed of the sampler. Entropy is used if not set
    pub seed: Option<u64>,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        GibbsConfig {
            burnin: 100,
            max_iteration: 1000,
            restart: 3,
            blanket_cache_limit: 6,
            seed: None,
        }
    }
}

impl GibbsConfig {
    fn validate(&self) -> FGResult<()> {
        if self.max_iteration == 0 || self.restart == 0 {
            return Err(FGError::InvalidConfiguration(
                "Gibbs sampling needs at least one chain and one retained sweep".to_string(),
            ));
        }
        Ok(())
    }
}

/// Information returned after successful sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingInfo {
    /// Number of independent chains
    pub chains: usize,

    /// Retained samples per chain
    pub samples_per_chain: usize,

    /// Potential scale reduction of the log unnormalized probability of
    /// samples. Not defined for a single chain or a degenerate statistic
    pub potential_scale_reduction: Option<f64>,

    /// Conditionals served from the Markov blanket cache
    pub cache_hits: usize,
}

impl Display for SamplingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sampling has finished: {} chains of {} samples, potential scale reduction: {:?}",
            self.chains, self.samples_per_chain, self.potential_scale_reduction,
        )
    }
}

// ------------------------------------------------------------------------------------------

/// Gibbs sampling engine.
///
/// Each chain starts from a random state of positive weight, so observed
/// variables start in their observed states. It performs `burnin` sweeps
/// and then retains one sample per sweep. Beliefs are state frequencies over
/// all retained samples of all chains, a state never visited by a variable
/// gets frequency `1 / total_samples` before renormalization
///
/// # Example
///
/// ```
/// use fgcore::core::FactorGraphBuilder;
/// use fgcore::inference::{GibbsConfig, GibbsSampling, Inferencer};
///
/// let mut fgb = FactorGraphBuilder::new("two variables");
/// let a = fgb.add_variable("A", 2);
/// let b = fgb.add_variable("B", 2);
/// fgb.add_factor("prior", &[a], vec![0.4, 0.6]).unwrap();
/// fgb.add_factor("A->B", &[a, b], vec![0.1, 0.55, 0.9, 0.45]).unwrap();
///
/// let config = GibbsConfig { seed: Some(42), ..GibbsConfig::default() };
/// let mut gibbs = GibbsSampling::new(config).unwrap();
/// gibbs.set_factor_graph(fgb.build());
/// gibbs.run_inference().unwrap();
///
/// let belief = gibbs.factor_graph().unwrap().variable(b).unwrap().belief().unwrap();
/// assert!((belief[0] - 0.37).abs() < 0.05);
/// ```
#[derive(Debug, Clone)]
pub struct GibbsSampling {
    config: GibbsConfig,
    graph: Option<FactorGraph>,
    observation: Option<Observation>,
    rng: StdRng,
    cache: BlanketCache,
    log_z: Option<f64>,
}

impl GibbsSampling {
    /// Creates an engine. Fails if the configuration is inconsistent
    pub fn new(config: GibbsConfig) -> FGResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(GibbsSampling {
            config,
            graph: None,
            observation: None,
            rng,
            cache: BlanketCache::default(),
            log_z: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &GibbsConfig {
        &self.config
    }

    /// Samples chains with the current graph and observation
    pub fn run_sampling(&mut self) -> FGResult<SamplingInfo> {
        self.log_z = None;
        self.cache.clear();
        let graph = self.graph.as_mut().ok_or(FGError::MissingFactorGraph)?;
        let config = &self.config;
        let rng = &mut self.rng;
        let cache = &mut self.cache;
        let (info, log_z) = run_staged(graph, self.observation.as_ref(), |graph| {
            sample_chains(graph, config, rng, cache)
        })?;
        info!("{}", info);
        self.log_z = Some(log_z);
        Ok(info)
    }
}

impl Inferencer for GibbsSampling {
    fn set_factor_graph(&mut self, graph: FactorGraph) {
        self.graph = Some(graph);
        self.log_z = None;
    }

    fn factor_graph(&self) -> FGResult<&FactorGraph> {
        self.graph.as_ref().ok_or(FGError::MissingFactorGraph)
    }

    fn factor_graph_mut(&mut self) -> FGResult<&mut FactorGraph> {
        self.graph.as_mut().ok_or(FGError::MissingFactorGraph)
    }

    fn take_factor_graph(&mut self) -> Option<FactorGraph> {
        self.log_z = None;
        self.graph.take()
    }

    fn set_observation(&mut self, observation: Observation) {
        self.observation = Some(observation);
    }

    fn clear_observation(&mut self) {
        self.observation = None;
    }

    fn observation(&self) -> Option<&Observation> {
        self.observation.as_ref()
    }

    fn run_inference(&mut self) -> FGResult<InferenceInfo> {
        self.run_sampling().map(InferenceInfo::Sampling)
    }

    /// Bethe approximation evaluated at the sampled beliefs
    fn calculate_log_z(&self) -> FGResult<f64> {
        self.log_z.ok_or(FGError::NotInferred)
    }
}

// private methods --------------------------------------------------------------------------

/// Conditionals of a variable keyed by the states of its Markov blanket
#[derive(Debug, Clone, Default)]
struct BlanketCache {
    conditionals: HashMap<usize, HashMap<Vec<usize>, Vec<f64>>>,
    hits: usize,
}

impl BlanketCache {
    fn clear(&mut self) {
        self.conditionals.clear();
        self.hits = 0;
    }
}

/// A variable being sampled, addressed by its slot in the state vector
#[derive(Debug)]
struct Site {
    states: usize,

    /// Slots of the Markov blanket, sorted
    blanket: Vec<usize>,

    /// Incident factors and the position of the variable in each of them
    factors: Vec<(FactorId, usize)>,
}

/// Static layout of a staged graph
struct Layout<'a> {
    graph: &'a FactorGraph,
    sites: Vec<Site>,

    /// Slots of every factor's variables in factor order
    factor_slots: HashMap<FactorId, Vec<usize>>,
}

impl<'a> Layout<'a> {
    fn new(graph: &'a FactorGraph) -> FGResult<Self> {
        let ids = graph.variable_ids();
        let slot_of: HashMap<_, _> = ids.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let factor_slots: HashMap<FactorId, Vec<usize>> = graph
            .discrete_factors()
            .map(|(id, f)| (id, f.variables().iter().map(|v| slot_of[v]).collect()))
            .collect();
        let mut sites = Vec::with_capacity(ids.len());
        for (slot, id) in ids.iter().enumerate() {
            let variable = graph.variable(*id)?;
            let mut blanket = Vec::new();
            let mut factors = Vec::new();
            for fid in variable.factors() {
                let factor = graph.factor(*fid)?;
                let position = factor.position_of(*id).ok_or(FGError::UnknownVariable(*id))?;
                factors.push((*fid, position));
                blanket.extend(factor_slots[fid].iter().filter(|s| **s != slot));
            }
            blanket.sort_unstable();
            blanket.dedup();
            sites.push(Site {
                states: variable.states(),
                blanket,
                factors,
            });
        }
        Ok(Layout {
            graph,
            sites,
            factor_slots,
        })
    }

    /// Linear index of the current state vector in a factor's table
    #[inline]
    fn factor_index(&self, id: FactorId, strides: &[usize], state: &[usize]) -> usize {
        self.factor_slots[&id]
            .iter()
            .zip(strides)
            .map(|(slot, stride)| state[*slot] * stride)
            .sum()
    }

    /// Distribution of `slot` given the states of all other variables
    fn conditional(&self, slot: usize, state: &[usize]) -> FGResult<Vec<f64>> {
        let site = &self.sites[slot];
        let mut log_p = vec![0f64; site.states];
        for (id, position) in &site.factors {
            let factor = self.graph.factor(*id)?;
            let stride = factor.strides()[*position];
            let base = self.factor_index(*id, factor.strides(), state) - state[slot] * stride;
            for (s, lp) in log_p.iter_mut().enumerate() {
                *lp += factor.values()[base + s * stride].ln();
            }
        }
        exp_shifted(&mut log_p, "Gibbs conditional")?;
        let total: f64 = log_p.iter().sum();
        for p in log_p.iter_mut() {
            *p /= total;
        }
        Ok(log_p)
    }

    /// Starting state of a chain with a positive weight. Variables are
    /// drawn one by one, each from the product of its factors summed over
    /// the variables not drawn yet. A draw that ends with zero weight is
    /// repeated
    fn initial_state(&self, rng: &mut StdRng) -> FGResult<Vec<usize>> {
        for _ in 0..INITIAL_STATE_ATTEMPTS {
            if let Some(state) = self.draw_state(rng)? {
                if self.log_weight(&state) > f64::NEG_INFINITY {
                    return Ok(state);
                }
            }
        }
        Err(FGError::NumericError(format!(
            "Gibbs initial state of '{}': no state of positive weight after {} attempts",
            self.graph.name(),
            INITIAL_STATE_ATTEMPTS
        )))
    }

    fn draw_state(&self, rng: &mut StdRng) -> FGResult<Option<Vec<usize>>> {
        let mut drawn: Vec<Option<usize>> = vec![None; self.sites.len()];
        for (slot, site) in self.sites.iter().enumerate() {
            let mut weights = vec![1f64; site.states];
            for (id, position) in &site.factors {
                let factor = self.graph.factor(*id)?;
                let slots = &self.factor_slots[id];
                let mut partial = vec![0f64; site.states];
                for (index, value) in factor.values().iter().enumerate() {
                    let consistent = slots.iter().enumerate().all(|(p, s)| match drawn[*s] {
                        Some(d) => factor.state_of(index, p) == d,
                        None => true,
                    });
                    if consistent {
                        partial[factor.state_of(index, *position)] += value;
                    }
                }
                for (w, p) in weights.iter_mut().zip(partial) {
                    *w *= p;
                }
            }
            match WeightedIndex::new(&weights) {
                Ok(distr) => drawn[slot] = Some(rng.sample(distr)),
                Err(_) => return Ok(None),
            }
        }
        Ok(drawn.into_iter().collect())
    }

    /// Log unnormalized probability of a state vector
    fn log_weight(&self, state: &[usize]) -> f64 {
        self.graph
            .discrete_factors()
            .map(|(id, f)| f.values()[self.factor_index(id, f.strides(), state)].ln())
            .sum()
    }
}

/// Runs all chains on an already staged graph and writes beliefs
fn sample_chains(
    graph: &mut FactorGraph,
    config: &GibbsConfig,
    rng: &mut StdRng,
    cache: &mut BlanketCache,
) -> FGResult<(SamplingInfo, f64)> {
    let layout = Layout::new(&*graph)?;
    let mut counts: Vec<Array1<f64>> = layout
        .sites
        .iter()
        .map(|s| Array1::zeros(s.states))
        .collect();
    let mut factor_counts: HashMap<FactorId, Array1<f64>> = graph
        .discrete_factors()
        .map(|(id, f)| (id, Array1::zeros(f.len())))
        .collect();
    let mut statistics: Vec<Vec<f64>> = Vec::with_capacity(config.restart);
    for chain in 0..config.restart {
        let mut state = layout.initial_state(rng)?;
        let mut statistic = Vec::with_capacity(config.max_iteration);
        for sweep in 0..config.burnin + config.max_iteration {
            for slot in 0..layout.sites.len() {
                state[slot] = resample(&layout, slot, &state, config, rng, cache)?;
            }
            if sweep < config.burnin {
                continue;
            }
            for (slot, s) in state.iter().enumerate() {
                counts[slot][*s] += 1f64;
            }
            for (id, f) in graph.discrete_factors() {
                if let Some(c) = factor_counts.get_mut(&id) {
                    c[layout.factor_index(id, f.strides(), &state)] += 1f64;
                }
            }
            statistic.push(layout.log_weight(&state));
        }
        debug!("chain {} finished, cache hits so far: {}", chain + 1, cache.hits);
        statistics.push(statistic);
    }
    let potential_scale_reduction = potential_scale_reduction(&statistics);
    match potential_scale_reduction {
        Some(r) if r > PSRF_WARNING_THRESHOLD => warn!(
            "Gibbs chains on '{}' may not have mixed, potential scale reduction {:.4}",
            graph.name(),
            r
        ),
        _ => {}
    }

    let total = (config.restart * config.max_iteration) as f64;
    let ids = graph.variable_ids();
    drop(layout);
    for (id, count) in ids.into_iter().zip(counts) {
        graph.variable_mut(id)?.belief = Some(smoothed_frequencies(count, total)?);
    }
    for (id, mut count) in factor_counts {
        normalize(&mut count, "factor sample counts")?;
        graph.factor_mut(id)?.belief = Some(count);
    }
    let log_z = bethe_log_z(graph)?;
    Ok((
        SamplingInfo {
            chains: config.restart,
            samples_per_chain: config.max_iteration,
            potential_scale_reduction,
            cache_hits: cache.hits,
        },
        log_z,
    ))
}

/// Draws a new state of `slot`, using the blanket cache for small blankets
fn resample(
    layout: &Layout,
    slot: usize,
    state: &[usize],
    config: &GibbsConfig,
    rng: &mut StdRng,
    cache: &mut BlanketCache,
) -> FGResult<usize> {
    let site = &layout.sites[slot];
    let conditional = if site.blanket.len() <= config.blanket_cache_limit {
        let key: Vec<usize> = site.blanket.iter().map(|s| state[*s]).collect();
        let by_blanket = cache.conditionals.entry(slot).or_default();
        match by_blanket.get(&key) {
            Some(p) => {
                cache.hits += 1;
                p.clone()
            }
            None => {
                let p = layout.conditional(slot, state)?;
                by_blanket.insert(key, p.clone());
                p
            }
        }
    } else {
        layout.conditional(slot, state)?
    };
    let distr = WeightedIndex::new(&conditional)
        .map_err(|e| FGError::NumericError(format!("Gibbs conditional: {e}")))?;
    Ok(rng.sample(distr))
}

/// Frequencies with unseen states raised to `1 / total`, renormalized
fn smoothed_frequencies(mut count: Array1<f64>, total: f64) -> FGResult<Array1<f64>> {
    count /= total;
    count.mapv_inplace(|p| if p == 0f64 { 1f64 / total } else { p });
    normalize(&mut count, "sampled belief")?;
    Ok(count)
}

/// Gelman-Rubin potential scale reduction of a scalar statistic
pub(crate) fn potential_scale_reduction(chains: &[Vec<f64>]) -> Option<f64> {
    let m = chains.len();
    let n = chains.first()?.len();
    if m < 2 || n < 2 || chains.iter().any(|c| c.len() != n) {
        return None;
    }
    if chains.iter().flatten().any(|x| !x.is_finite()) {
        return None;
    }
    let means: Vec<f64> = chains
        .iter()
        .map(|c| c.iter().sum::<f64>() / n as f64)
        .collect();
    let grand_mean = means.iter().sum::<f64>() / m as f64;
    let between = n as f64 / (m - 1) as f64
        * means.iter().map(|x| (x - grand_mean).powi(2)).sum::<f64>();
    let within = chains
        .iter()
        .zip(&means)
        .map(|(c, mean)| c.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64)
        .sum::<f64>()
        / m as f64;
    if within == 0f64 {
        return if between == 0f64 { Some(1f64) } else { None };
    }
    let pooled = (n - 1) as f64 / n as f64 * within + between / n as f64;
    Some((pooled / within).sqrt())
}
