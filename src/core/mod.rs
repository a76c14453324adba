mod continuous;
mod error;
mod factor;
mod factor_graph;
mod factor_graph_builder;
mod message;
mod observation;
mod variable;

pub use continuous::{
    ClgFactor, ContinuousFactor, EmpiricalDistribution, EmpiricalFactor, GaussianComponent,
};
pub use error::{FGError, FGResult};
pub use factor::{Assignment, Factor, FactorId};
pub use factor_graph::{FactorGraph, FactorNode};
pub use factor_graph_builder::FactorGraphBuilder;
pub use message::Message;
pub(crate) use message::{cross_entropy_term, exp_shifted, normalize};
pub use observation::{Observation, ObservedValue};
pub use variable::{Variable, VariableId, VariableKind};
