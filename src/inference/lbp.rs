use std::collections::HashMap;
use std::fmt::Display;

use log::{debug, info, warn};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

use crate::core::{
    exp_shifted, normalize, Assignment, FGError, FGResult, Factor, FactorGraph, FactorId, Message,
    Observation,
};
use crate::inference::edges::{EdgeStore, NodeRef};
use crate::inference::max_assignment::find_maximum;
use crate::inference::{bethe_log_z, run_staged, InferenceInfo, Inferencer};

// ------------------------------------------------------------------------------------------

/// Rule used to combine messages at factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationMode {
    /// Marginals: messages are summed over the other variables
    SumProduct,

    /// Max-marginals: messages are maximized over the other variables
    MaxProduct,
}

/// Kind of nodes visited during one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSchedule {
    Variables,
    Factors,
}

/// Initial value of messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageInit {
    Uniform,
    Random,
}

/// Hyper-parameters of loopy belief propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefPropagationConfig {
    /// A maximal number of rounds. Reaching it is reported with a warning,
    /// beliefs are computed from the last messages
    pub max_iteration: usize,

    /// A run converges once the maximal per-state message change of a round
    /// is not greater than this threshold
    pub tolerance: f64,

    pub mode: PropagationMode,

    /// Multiply messages by adding their logarithms
    pub log_space: bool,

    pub schedule: UpdateSchedule,

    pub initialization: MessageInit,

    /// Fail runs whose discrepancy keeps increasing
    pub detect_oscillation: bool,

    /// Rounds elapsed before the oscillation check starts
    pub oscillation_min_rounds: usize,

    /// Number of trailing rounds examined by the oscillation check
    pub oscillation_window: usize,

    /// Increases within the window that mark a run as oscillating
    pub oscillation_max_increases: usize,

    /// Seed of the random order of updates. Entropy is used if not set
    pub seed: Option<u64>,
}

impl Default for BeliefPropagationConfig {
    fn default() -> Self {
        BeliefPropagationConfig {
            max_iteration: 10000,
            tolerance: 1e-6,
            mode: PropagationMode::SumProduct,
            log_space: false,
            schedule: UpdateSchedule::Variables,
            initialization: MessageInit::Uniform,
            detect_oscillation: true,
            oscillation_min_rounds: 50,
            oscillation_window: 50,
            oscillation_max_increases: 10,
            seed: None,
        }
    }
}

impl BeliefPropagationConfig {
    fn validate(&self) -> FGResult<()> {
        if self.max_iteration == 0 {
            return Err(FGError::InvalidConfiguration(
                "max_iteration must be positive".to_string(),
            ));
        }
        if !(self.tolerance >= 0f64) || !self.tolerance.is_finite() {
            return Err(FGError::InvalidConfiguration(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.detect_oscillation && self.oscillation_window < 2 {
            return Err(FGError::InvalidConfiguration(
                "oscillation window must cover at least two rounds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Information returned after a message passing procedure that did not fail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePassingInfo {
    /// Number of rounds performed
    pub iterations_number: usize,

    /// Final discrepancy between last and previous round's messages maximized across edges
    pub last_discrepancy: f64,

    /// Dynamics of discrepancy
    pub discrepancy_dynamics: Vec<f64>,

    /// False if the round budget was exhausted before reaching the tolerance
    pub converged: bool,
}

impl Display for MessagePassingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.converged {
            write!(
                f,
                "Messaged passing has converged after {} iterations, last iteration discrepancy: {}",
                self.iterations_number, self.last_discrepancy,
            )
        } else {
            write!(
                f,
                "Messaged passing has stopped after {} iterations without convergence, last iteration discrepancy: {}",
                self.iterations_number, self.last_discrepancy,
            )
        }
    }
}

// ------------------------------------------------------------------------------------------

/// Detects runs whose discrepancy grows too often
#[derive(Debug, Clone, Copy)]
pub(crate) struct OscillationDetector {
    min_rounds: usize,
    window: usize,
    max_increases: usize,
}

impl OscillationDetector {
    pub(crate) fn new(min_rounds: usize, window: usize, max_increases: usize) -> Self {
        OscillationDetector {
            min_rounds,
            window,
            max_increases,
        }
    }

    /// Counts adjacent increases within the trailing window of `dynamics`
    pub(crate) fn is_oscillating(&self, dynamics: &[f64]) -> bool {
        if dynamics.len() < self.min_rounds.max(2) {
            return false;
        }
        let start = dynamics.len().saturating_sub(self.window);
        let increases = dynamics[start..]
            .windows(2)
            .filter(|pair| pair[1] > pair[0])
            .count();
        increases >= self.max_increases
    }
}

/// Reusable per-engine buffers holding factor tables, keyed by table length
#[derive(Debug, Clone, Default)]
struct Scratch {
    buffers: HashMap<usize, Vec<f64>>,
}

impl Scratch {
    #[inline]
    fn buffer(&mut self, len: usize) -> &mut Vec<f64> {
        self.buffers.entry(len).or_insert_with(|| vec![0f64; len])
    }
}

// ------------------------------------------------------------------------------------------

/// Loopy belief propagation engine.
///
/// Every run builds fresh edges, initializes messages, then repeatedly
/// visits all variables (or all factors) in a random order. A visited node
/// first pulls messages from its neighbours and then pushes messages to them.
/// On a tree the procedure is exact.
///
/// # Example
///
/// ```
/// use fgcore::core::FactorGraphBuilder;
/// use fgcore::inference::{BeliefPropagationConfig, Inferencer, LoopyBeliefPropagation};
///
/// let mut fgb = FactorGraphBuilder::new("two variables");
/// let a = fgb.add_variable("A", 2);
/// let b = fgb.add_variable("B", 2);
/// fgb.add_factor("prior", &[a], vec![0.4, 0.6]).unwrap();
/// fgb.add_factor("A->B", &[a, b], vec![0.1, 0.55, 0.9, 0.45]).unwrap();
///
/// let mut lbp = LoopyBeliefPropagation::new(BeliefPropagationConfig::default()).unwrap();
/// lbp.set_factor_graph(fgb.build());
/// lbp.run_inference().unwrap();
///
/// let fg = lbp.factor_graph().unwrap();
/// let belief = fg.variable(b).unwrap().belief().unwrap();
/// assert!((belief[0] - 0.37).abs() < 1e-8);
/// assert!(lbp.calculate_log_z().unwrap().abs() < 1e-8);
/// ```
#[derive(Debug, Clone)]
pub struct LoopyBeliefPropagation {
    config: BeliefPropagationConfig,
    graph: Option<FactorGraph>,
    observation: Option<Observation>,
    rng: StdRng,
    scratch: Scratch,
    log_z: Option<f64>,
    last_mode: Option<PropagationMode>,
}

impl LoopyBeliefPropagation {
    /// Creates an engine. Fails if the configuration is inconsistent
    pub fn new(config: BeliefPropagationConfig) -> FGResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(LoopyBeliefPropagation {
            config,
            graph: None,
            observation: None,
            rng,
            scratch: Scratch::default(),
            log_z: None,
            last_mode: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &BeliefPropagationConfig {
        &self.config
    }

    /// Reseeds the random order of updates
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Runs message passing with the current graph and observation
    ///
    /// # Notes
    ///
    /// Exhausting `max_iteration` is not an error: a warning is logged and
    /// `MessagePassingInfo::converged` is false. An oscillating run fails
    /// with `FGError::MessagePassingError`. In both cases the graph is left
    /// without evidence factors
    pub fn run_message_passing(&mut self) -> FGResult<MessagePassingInfo> {
        self.log_z = None;
        self.last_mode = None;
        let graph = self.graph.as_mut().ok_or(FGError::MissingFactorGraph)?;
        let config = &self.config;
        let rng = &mut self.rng;
        let scratch = &mut self.scratch;
        let (info, log_z) = run_staged(graph, self.observation.as_ref(), |graph| {
            propagate(graph, config, rng, scratch)
        })?;
        info!("{}", info);
        self.log_z = log_z;
        self.last_mode = Some(config.mode);
        Ok(info)
    }

    /// Returns the most probable joint assignment found by the last
    /// max-product run
    ///
    /// # Notes
    ///
    /// Variables whose max-marginal has a unique top state take it. Ties are
    /// resolved through factor beliefs, preferring states that agree with
    /// already resolved neighbours. Variables left ambiguous are logged
    pub fn find_maximum(&self) -> FGResult<Assignment> {
        match self.last_mode {
            Some(PropagationMode::MaxProduct) => find_maximum(self.factor_graph()?),
            Some(PropagationMode::SumProduct) => Err(FGError::InvalidConfiguration(
                "the maximal assignment requires a max-product run".to_string(),
            )),
            None => Err(FGError::NotInferred),
        }
    }
}

impl Inferencer for LoopyBeliefPropagation {
    fn set_factor_graph(&mut self, graph: FactorGraph) {
        self.graph = Some(graph);
        self.log_z = None;
        self.last_mode = None;
    }

    fn factor_graph(&self) -> FGResult<&FactorGraph> {
        self.graph.as_ref().ok_or(FGError::MissingFactorGraph)
    }

    fn factor_graph_mut(&mut self) -> FGResult<&mut FactorGraph> {
        self.graph.as_mut().ok_or(FGError::MissingFactorGraph)
    }

    fn take_factor_graph(&mut self) -> Option<FactorGraph> {
        self.log_z = None;
        self.last_mode = None;
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
        self.run_message_passing().map(InferenceInfo::MessagePassing)
    }

    /// Bethe approximation of the log partition function. Available after
    /// a sum-product run
    fn calculate_log_z(&self) -> FGResult<f64> {
        self.log_z.ok_or(FGError::NotInferred)
    }
}

// private methods --------------------------------------------------------------------------

/// One full run on an already staged graph
fn propagate(
    graph: &mut FactorGraph,
    config: &BeliefPropagationConfig,
    rng: &mut StdRng,
    scratch: &mut Scratch,
) -> FGResult<(MessagePassingInfo, Option<f64>)> {
    let log_space = config.log_space;
    let mut edges = match config.initialization {
        MessageInit::Uniform => {
            EdgeStore::build(graph, |states| Ok(Message::uniform(states, log_space)))?
        }
        MessageInit::Random => {
            let distr = Uniform::new(0.1f64, 1f64);
            EdgeStore::build(graph, |states| {
                let values: Array1<f64> = (0..states).map(|_| rng.sample(distr)).collect();
                Message::from_probabilities(values, log_space)
            })?
        }
    };
    let mut order: Vec<NodeRef> = match config.schedule {
        UpdateSchedule::Variables => graph
            .variable_ids()
            .into_iter()
            .map(NodeRef::Variable)
            .collect(),
        UpdateSchedule::Factors => graph
            .discrete_factors()
            .map(|(id, _)| NodeRef::Factor(id))
            .collect(),
    };
    let detector = OscillationDetector::new(
        config.oscillation_min_rounds,
        config.oscillation_window,
        config.oscillation_max_increases,
    );
    let sender = Sender {
        graph: &*graph,
        mode: config.mode,
        log_space,
    };
    let mut discrepancy_dynamics = Vec::new();
    let mut last_discrepancy = f64::MAX;
    let mut converged = false;
    for iteration in 0..config.max_iteration {
        order.shuffle(rng);
        let mut max_discrepancy = 0f64;
        for node in &order {
            for k in 0..edges.incoming(*node).len() {
                let e = edges.incoming(*node)[k];
                max_discrepancy = max_discrepancy.max(sender.update(&mut edges, e, scratch)?);
            }
            for k in 0..edges.outgoing(*node).len() {
                let e = edges.outgoing(*node)[k];
                max_discrepancy = max_discrepancy.max(sender.update(&mut edges, e, scratch)?);
            }
        }
        discrepancy_dynamics.push(max_discrepancy);
        last_discrepancy = max_discrepancy;
        debug!("round {}: discrepancy {:e}", iteration + 1, max_discrepancy);
        if max_discrepancy <= config.tolerance {
            converged = true;
            break;
        }
        if config.detect_oscillation && detector.is_oscillating(&discrepancy_dynamics) {
            return Err(FGError::MessagePassingError {
                iterations_number: iteration + 1,
                last_discrepancy,
                discrepancy_dynamics,
            });
        }
    }
    let iterations_number = discrepancy_dynamics.len();
    if !converged {
        warn!(
            "message passing on '{}' reached {} iterations without convergence, last discrepancy {:e}",
            sender.graph.name(),
            iterations_number,
            last_discrepancy
        );
    }
    let beliefs = sender.beliefs(&edges, scratch)?;
    for (node, belief) in beliefs {
        match node {
            NodeRef::Variable(v) => graph.variable_mut(v)?.belief = Some(belief),
            NodeRef::Factor(f) => graph.factor_mut(f)?.belief = Some(belief),
        }
    }
    let log_z = match config.mode {
        PropagationMode::SumProduct => Some(bethe_log_z(graph)?),
        PropagationMode::MaxProduct => None,
    };
    Ok((
        MessagePassingInfo {
            iterations_number,
            last_discrepancy,
            discrepancy_dynamics,
            converged,
        },
        log_z,
    ))
}

/// Computes messages and beliefs from the current state of edges
struct Sender<'a> {
    graph: &'a FactorGraph,
    mode: PropagationMode,
    log_space: bool,
}

impl<'a> Sender<'a> {
    /// Recomputes the message of edge `e` and returns its change
    fn update(&self, edges: &mut EdgeStore, e: usize, scratch: &mut Scratch) -> FGResult<f64> {
        let edge = &edges.edges[e];
        let probabilities = match (edge.from, edge.to) {
            (NodeRef::Variable(v), _) => {
                self.variable_product(edges, NodeRef::Variable(v), Some(edge.reverse), edge.message.len())?
            }
            (NodeRef::Factor(f), _) => {
                let factor = self.graph.factor(f)?;
                let buffer = scratch.buffer(factor.len());
                self.factor_product(factor, f, edges, Some(edge.reverse), buffer)?;
                let position = edge.position;
                let mut projected = Array1::<f64>::zeros(factor.cardinalities()[position]);
                for (index, value) in buffer.iter().enumerate() {
                    let state = factor.state_of(index, position);
                    match self.mode {
                        PropagationMode::SumProduct => projected[state] += value,
                        PropagationMode::MaxProduct => {
                            projected[state] = projected[state].max(*value)
                        }
                    }
                }
                projected
            }
        };
        let message = Message::from_probabilities(probabilities, self.log_space)?;
        let discrepancy = message.discrepancy(&edges.edges[e].message);
        if discrepancy.is_nan() {
            return Err(FGError::NumericError(format!(
                "message of '{}'",
                self.graph.factor(edges.edges[e].factor)?.name()
            )));
        }
        edges.edges[e].message = message;
        Ok(discrepancy)
    }

    /// Product of messages coming into a variable, in probability space
    fn variable_product(
        &self,
        edges: &EdgeStore,
        node: NodeRef,
        skip: Option<usize>,
        states: usize,
    ) -> FGResult<Array1<f64>> {
        let mut product = if self.log_space {
            Array1::<f64>::zeros(states)
        } else {
            Array1::<f64>::ones(states)
        };
        for i in edges.incoming(node) {
            if Some(*i) == skip {
                continue;
            }
            let message = edges.edges[*i].message.values();
            if self.log_space {
                product += message;
            } else {
                product *= message;
            }
        }
        if self.log_space {
            if let Some(values) = product.as_slice_mut() {
                exp_shifted(values, "variable message")?;
            }
        }
        Ok(product)
    }

    /// Writes the factor table multiplied by incoming messages into `buffer`,
    /// in probability space
    fn factor_product(
        &self,
        factor: &Factor,
        id: FactorId,
        edges: &EdgeStore,
        skip: Option<usize>,
        buffer: &mut [f64],
    ) -> FGResult<()> {
        for (b, v) in buffer.iter_mut().zip(factor.values()) {
            *b = if self.log_space { v.ln() } else { *v };
        }
        for i in edges.incoming(NodeRef::Factor(id)) {
            if Some(*i) == skip {
                continue;
            }
            let edge = &edges.edges[*i];
            let message = edge.message.values();
            for (index, b) in buffer.iter_mut().enumerate() {
                let state = factor.state_of(index, edge.position);
                if self.log_space {
                    *b += message[state];
                } else {
                    *b *= message[state];
                }
            }
        }
        if self.log_space {
            exp_shifted(buffer, factor.name())?;
        }
        Ok(())
    }

    /// Normalized beliefs of every variable and factor
    fn beliefs(
        &self,
        edges: &EdgeStore,
        scratch: &mut Scratch,
    ) -> FGResult<Vec<(NodeRef, Array1<f64>)>> {
        let mut beliefs = Vec::new();
        for variable in self.graph.variables() {
            let node = NodeRef::Variable(variable.id());
            let mut belief = self.variable_product(edges, node, None, variable.states())?;
            normalize(&mut belief, variable.name())?;
            beliefs.push((node, belief));
        }
        for (id, factor) in self.graph.discrete_factors() {
            let buffer = scratch.buffer(factor.len());
            self.factor_product(factor, id, edges, None, buffer)?;
            let mut belief = Array1::from(buffer.clone());
            normalize(&mut belief, factor.name())?;
            beliefs.push((NodeRef::Factor(id), belief));
        }
        Ok(beliefs)
    }
}
