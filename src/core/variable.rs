use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::core::{FGError, FGResult, FactorId};

/// Stable handle of a variable inside a factor graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub usize);

impl VariableId {
    /// Id of a variable that has not been added to a factor graph yet
    pub const UNREGISTERED: VariableId = VariableId(usize::MAX);
}

/// Kind of a random variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// A discrete variable taking one of `states` values
    Discrete,

    /// A continuous quantity. It may only appear as a leaf of a continuous factor.
    /// `two_sided` tells whether deviations in both directions are abnormal
    Continuous { two_sided: bool },
}

/// A random variable of a factor graph
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) id: VariableId,
    name: String,
    states: Option<usize>,
    kind: VariableKind,
    pub(crate) factors: Vec<FactorId>,
    pub(crate) belief: Option<Array1<f64>>,
}

impl Variable {
    /// Creates a discrete variable with a fixed number of states
    ///
    /// # Arguments
    ///
    /// * `name` - A human-readable name
    /// * `states` - The cardinality of the variable
    ///
    /// # Notes
    ///
    /// The id is assigned when a variable is added to a factor graph.
    /// Standalone variables carry `VariableId::UNREGISTERED`. A variable
    /// with zero states can not be put in a factor
    pub fn new(name: impl Into<String>, states: usize) -> Self {
        Variable {
            id: VariableId::UNREGISTERED,
            name: name.into(),
            states: Some(states),
            kind: VariableKind::Discrete,
            factors: Vec::new(),
            belief: None,
        }
    }

    /// Creates a continuous variable
    pub fn continuous(name: impl Into<String>, two_sided: bool) -> Self {
        Variable {
            id: VariableId::UNREGISTERED,
            name: name.into(),
            states: None,
            kind: VariableKind::Continuous { two_sided },
            factors: Vec::new(),
            belief: None,
        }
    }

    #[inline]
    pub fn id(&self) -> VariableId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of states, zero for a continuous variable
    #[inline]
    pub fn states(&self) -> usize {
        self.states.unwrap_or(0)
    }

    /// Sets the cardinality. It could be set only once, a second call
    /// with a different value fails
    pub fn set_states(&mut self, states: usize) -> FGResult<()> {
        if states == 0 {
            return Err(FGError::InvalidConfiguration(format!(
                "variable '{}' must have at least one state",
                self.name
            )));
        }
        match self.states {
            Some(current) if current != states => Err(FGError::StatesAlreadySet {
                variable: self.name.clone(),
                current,
                requested: states,
            }),
            _ => {
                self.states = Some(states);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    #[inline]
    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, VariableKind::Continuous { .. })
    }

    #[inline]
    pub fn is_two_sided(&self) -> bool {
        matches!(self.kind, VariableKind::Continuous { two_sided: true })
    }

    /// Factors this variable participates in
    #[inline]
    pub fn factors(&self) -> &[FactorId] {
        &self.factors
    }

    /// Marginal computed by the last successful inference run
    #[inline]
    pub fn belief(&self) -> Option<&Array1<f64>> {
        self.belief.as_ref()
    }

    /// Index of the most probable state according to the last belief
    pub fn most_probable_state(&self) -> Option<usize> {
        let belief = self.belief.as_ref()?;
        let mut best = 0;
        for (i, p) in belief.iter().enumerate() {
            if *p > belief[best] {
                best = i;
            }
        }
        Some(best)
    }
}
