use thiserror::Error;

use crate::core::{FactorId, VariableId};

// ------------------------------------------------------------------------------------------

/// Errors that could appear in factor graph's methods and in inference engines
#[derive(Debug, Clone, Error)]
pub enum FGError {
    /// An engine was asked to run without a factor graph
    #[error("Factor graph is not set")]
    MissingFactorGraph,

    /// A factor was given an empty list of variables
    #[error("Factor '{0}' must have at least one variable")]
    EmptyVariables(String),

    /// A factor was given the same variable twice
    #[error("Variable '{variable}' appears more than once in factor '{factor}'")]
    DuplicateVariable { factor: String, variable: String },

    /// Length of a value table does not match the product of cardinalities
    #[error("Value table of factor '{factor}' must have {expected} entries, got {actual}")]
    TableSizeMismatch {
        factor: String,
        expected: usize,
        actual: usize,
    },

    /// An assignment map lacks a state for one of the factor's variables
    #[error("Assignment has no state for variable {0:?}")]
    MissingState(VariableId),

    /// A state is outside of `[0..states)` of a variable
    #[error("State {state} of variable '{variable}' is out of range of [0..{states}) states")]
    StateOutOfRange {
        variable: String,
        state: usize,
        states: usize,
    },

    /// Cardinality of a variable may be set only once
    #[error("Variable '{variable}' already has {current} states, cannot change it to {requested}")]
    StatesAlreadySet {
        variable: String,
        current: usize,
        requested: usize,
    },

    /// Evidence strength of a binary variable must lie in [0, 1]
    #[error("Evidence strength {strength} of variable '{variable}' is out of [0, 1]")]
    StrengthOutOfRange { variable: String, strength: f64 },

    /// Index of a variable is out of range
    #[error("Unknown variable {0:?}")]
    UnknownVariable(VariableId),

    /// A factor with this id is not part of the graph
    #[error("Unknown factor {0:?}")]
    UnknownFactor(FactorId),

    /// The graph contains continuous variables that cannot be eliminated
    #[error("Factor graph is not inferrable: {0}")]
    NotInferrable(String),

    /// Factors tied to one parameter table have different cardinalities
    #[error("Shared factors have inconsistent cardinalities: expected {expected:?}, got {actual:?}")]
    SharedFactorMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Evidence factors are still attached from a previous observation
    #[error("Evidence is already attached to the factor graph")]
    EvidenceAlreadyAttached,

    /// A continuous factor is malformed or used with unsupported cardinality
    #[error("Invalid continuous factor: {0}")]
    InvalidContinuousFactor(String),

    /// An engine configuration value is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Beliefs or logZ were requested before a successful run
    #[error("Inference has not been run on the current factor graph")]
    NotInferred,

    /// Message passing error appearing when a message passing oscillates
    #[error(
        "Messaged passing has not converged after {iterations_number} iterations, last iteration discrepancy: {last_discrepancy}"
    )]
    MessagePassingError {
        /// Number of iterations past before failure
        iterations_number: usize,

        /// Final discrepancy between last and previous iteration's messages maximized across edges
        last_discrepancy: f64,

        /// Dynamics of discrepancy before failure
        discrepancy_dynamics: Vec<f64>,
    },

    /// A NaN or an all-zero vector appeared in a message or a belief
    #[error("Numeric failure in {0}")]
    NumericError(String),
}

/// Factor graph's methods result type
pub type FGResult<T> = Result<T, FGError>;
