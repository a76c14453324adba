use ndarray::Array1;

use crate::core::factor_graph::FactorNode;
use crate::core::{
    FGError, FGResult, Factor, FactorGraph, FactorId, Observation, ObservedValue, Variable,
    VariableId,
};

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

// ------------------------------------------------------------------------------------------

/// One weighted Gaussian of a mixture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianComponent {
    pub weight: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl GaussianComponent {
    pub fn new(weight: f64, mean: f64, std_dev: f64) -> Self {
        GaussianComponent {
            weight,
            mean,
            std_dev,
        }
    }

    /// Weighted density at `x`
    #[inline]
    pub fn weighted_density(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.std_dev;
        self.weight * INV_SQRT_2PI / self.std_dev * (-0.5 * z * z).exp()
    }
}

/// Conditional linear Gaussian leaf: for each state of the discrete parent
/// the continuous child follows a mixture of Gaussians
#[derive(Debug, Clone)]
pub struct ClgFactor {
    name: String,
    variables: [VariableId; 2],
    mixtures: Vec<Vec<GaussianComponent>>,
}

impl ClgFactor {
    /// Creates a factor
    ///
    /// # Arguments
    ///
    /// * `discrete` - The discrete parent
    /// * `continuous` - The continuous leaf
    /// * `mixtures` - One mixture per state of `discrete`
    pub fn new(
        name: impl Into<String>,
        discrete: &Variable,
        continuous: &Variable,
        mixtures: Vec<Vec<GaussianComponent>>,
    ) -> FGResult<Self> {
        let name = name.into();
        check_leaf_pair(&name, discrete, continuous)?;
        if mixtures.len() != discrete.states() {
            return Err(FGError::InvalidContinuousFactor(format!(
                "'{}' has {} mixtures for {} discrete states",
                name,
                mixtures.len(),
                discrete.states()
            )));
        }
        let malformed = mixtures.iter().any(|m| {
            m.is_empty()
                || m
                    .iter()
                    .any(|c| !(c.std_dev > 0f64) || !(c.weight >= 0f64) || !c.mean.is_finite())
        });
        if malformed {
            return Err(FGError::InvalidContinuousFactor(format!(
                "'{name}' needs non-empty mixtures with non-negative weights and positive deviations"
            )));
        }
        Ok(ClgFactor {
            name,
            variables: [discrete.id(), continuous.id()],
            mixtures,
        })
    }

    pub fn mixtures(&self) -> &[Vec<GaussianComponent>] {
        &self.mixtures
    }

    fn potential(&self, value: Option<f64>) -> Array1<f64> {
        self.mixtures
            .iter()
            .map(|mixture| match value {
                Some(x) => mixture.iter().map(|c| c.weighted_density(x)).sum::<f64>(),
                None => mixture.iter().map(|c| c.weight).sum::<f64>(),
            })
            .collect()
    }
}

// ------------------------------------------------------------------------------------------

/// An empirical distribution of a continuous quantity
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalDistribution {
    samples: Vec<f64>,
}

impl EmpiricalDistribution {
    pub fn new(mut samples: Vec<f64>) -> FGResult<Self> {
        if samples.is_empty() || samples.iter().any(|s| s.is_nan()) {
            return Err(FGError::InvalidContinuousFactor(
                "empirical distribution needs at least one non-NaN sample".to_string(),
            ));
        }
        samples.sort_by(|a, b| a.total_cmp(b));
        Ok(EmpiricalDistribution { samples })
    }

    /// Sorted samples
    #[inline]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Mid-rank cumulative probability of `x`
    pub fn cumulative_probability(&self, x: f64) -> f64 {
        let below = self.samples.partition_point(|s| *s < x);
        let not_above = self.samples.partition_point(|s| *s <= x);
        (below as f64 + 0.5 * (not_above - below) as f64) / self.samples.len() as f64
    }
}

/// Converts a cumulative probability into a discrete potential.
///
/// Two-sided quantities map to (lower, normal, higher) or (normal, abnormal),
/// one-sided ones treat only high values as abnormal
pub(crate) fn empirical_potential(
    cumulative: f64,
    states: usize,
    two_sided: bool,
) -> FGResult<Array1<f64>> {
    let c = cumulative.clamp(0f64, 1f64);
    let values = match (states, two_sided) {
        (3, true) => {
            let lower = (1f64 - 2f64 * c).max(0f64);
            let higher = (2f64 * c - 1f64).max(0f64);
            vec![lower, 1f64 - lower - higher, higher]
        }
        (2, true) => {
            let abnormal = (2f64 * c - 1f64).abs();
            vec![1f64 - abnormal, abnormal]
        }
        (2, false) => vec![1f64 - c, c],
        (3, false) => vec![0f64, 1f64 - c, c],
        _ => {
            return Err(FGError::InvalidContinuousFactor(format!(
                "empirical policy supports 2 or 3 discrete states, got {states}"
            )))
        }
    };
    Ok(Array1::from(values))
}

/// Empirical leaf: the observed value is ranked against an empirical
/// distribution and converted to a soft discrete potential
#[derive(Debug, Clone)]
pub struct EmpiricalFactor {
    name: String,
    variables: [VariableId; 2],
    states: usize,
    two_sided: bool,
    distribution: EmpiricalDistribution,
}

impl EmpiricalFactor {
    pub fn new(
        name: impl Into<String>,
        discrete: &Variable,
        continuous: &Variable,
        distribution: EmpiricalDistribution,
    ) -> FGResult<Self> {
        let name = name.into();
        check_leaf_pair(&name, discrete, continuous)?;
        let states = discrete.states();
        empirical_potential(0.5, states, continuous.is_two_sided())?;
        Ok(EmpiricalFactor {
            name,
            variables: [discrete.id(), continuous.id()],
            states,
            two_sided: continuous.is_two_sided(),
            distribution,
        })
    }

    pub fn distribution(&self) -> &EmpiricalDistribution {
        &self.distribution
    }

    fn potential(&self, value: Option<f64>) -> FGResult<Array1<f64>> {
        match value {
            Some(x) => empirical_potential(
                self.distribution.cumulative_probability(x),
                self.states,
                self.two_sided,
            ),
            None => {
                let samples = self.distribution.samples();
                let mut total = Array1::<f64>::zeros(self.states);
                for s in samples {
                    total += &empirical_potential(
                        self.distribution.cumulative_probability(*s),
                        self.states,
                        self.two_sided,
                    )?;
                }
                Ok(total / samples.len() as f64)
            }
        }
    }
}

fn check_leaf_pair(name: &str, discrete: &Variable, continuous: &Variable) -> FGResult<()> {
    if discrete.is_continuous() || !continuous.is_continuous() {
        return Err(FGError::InvalidContinuousFactor(format!(
            "'{name}' must link a discrete variable to a continuous one"
        )));
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------

/// A factor between a discrete variable and a continuous leaf
#[derive(Debug, Clone)]
pub enum ContinuousFactor {
    Clg(ClgFactor),
    Empirical(EmpiricalFactor),
}

impl ContinuousFactor {
    #[inline]
    pub fn name(&self) -> &str {
        match self {
            ContinuousFactor::Clg(f) => &f.name,
            ContinuousFactor::Empirical(f) => &f.name,
        }
    }

    /// `[discrete, continuous]`
    #[inline]
    pub fn variables(&self) -> &[VariableId] {
        match self {
            ContinuousFactor::Clg(f) => &f.variables,
            ContinuousFactor::Empirical(f) => &f.variables,
        }
    }

    #[inline]
    pub fn discrete(&self) -> VariableId {
        self.variables()[0]
    }

    #[inline]
    pub fn continuous(&self) -> VariableId {
        self.variables()[1]
    }

    pub fn discrete_states(&self) -> usize {
        match self {
            ContinuousFactor::Clg(f) => f.mixtures.len(),
            ContinuousFactor::Empirical(f) => f.states,
        }
    }

    /// Discrete factor obtained by integrating the continuous variable out
    pub fn marginalize(&self) -> FGResult<Factor> {
        self.marginalize_with(None)
    }

    /// Discrete factor obtained by conditioning on an observed value of the
    /// continuous variable
    pub fn marginalize_for_discrete(&self, value: f64) -> FGResult<Factor> {
        self.marginalize_with(Some(value))
    }

    fn marginalize_with(&self, value: Option<f64>) -> FGResult<Factor> {
        let potential = match self {
            ContinuousFactor::Clg(f) => f.potential(value),
            ContinuousFactor::Empirical(f) => f.potential(value)?,
        };
        let mut factor = Factor::detached(format!("{}:marginal", self.name()));
        factor.set_variables_raw(vec![self.discrete()], vec![self.discrete_states()])?;
        factor.set_values(potential)?;
        Ok(factor)
    }
}

impl From<ClgFactor> for ContinuousFactor {
    fn from(f: ClgFactor) -> Self {
        ContinuousFactor::Clg(f)
    }
}

impl From<EmpiricalFactor> for ContinuousFactor {
    fn from(f: EmpiricalFactor) -> Self {
        ContinuousFactor::Empirical(f)
    }
}

// ------------------------------------------------------------------------------------------

/// A continuous factor temporarily replaced by its discrete marginal
#[derive(Debug, Clone)]
pub(crate) struct Substitution {
    continuous: FactorId,
    discrete: FactorId,
    original: FactorNode,
}

impl FactorGraph {
    /// Replaces every continuous factor by a discrete one. If the observation
    /// holds a value of the continuous variable the factor is conditioned on
    /// it, otherwise the continuous variable is integrated out.
    /// `restore_continuous` is the exact inverse
    pub fn substitute_continuous(&mut self, observation: Option<&Observation>) -> FGResult<()> {
        if !self.substitutions.is_empty() {
            return Err(FGError::InvalidConfiguration(
                "continuous factors are already substituted".to_string(),
            ));
        }
        let continuous: Vec<_> = self.continuous_factors().map(|(id, _)| id).collect();
        for id in continuous {
            if let Err(e) = self.substitute_one(id, observation) {
                self.restore_continuous()?;
                return Err(e);
            }
        }
        Ok(())
    }

    fn substitute_one(&mut self, id: FactorId, observation: Option<&Observation>) -> FGResult<()> {
        let factor = self.continuous_factor(id)?;
        let value = match observation.and_then(|o| o.get(factor.continuous())) {
            Some(ObservedValue::Continuous { value, .. }) => Some(*value),
            Some(other) => {
                return Err(FGError::InvalidContinuousFactor(format!(
                    "continuous variable of '{}' observed with {:?}",
                    factor.name(),
                    other
                )))
            }
            None => None,
        };
        let marginal = match value {
            Some(x) => factor.marginalize_for_discrete(x)?,
            None => factor.marginalize()?,
        };
        let node = self.remove_factor(id)?;
        match self.add_factor(marginal) {
            Ok(discrete) => {
                self.substitutions.push(Substitution {
                    continuous: id,
                    discrete,
                    original: node,
                });
                Ok(())
            }
            Err(e) => {
                self.insert_node(id, node);
                Err(e)
            }
        }
    }

    /// Removes substituted discrete factors and puts the original continuous
    /// factors back under their original ids
    pub fn restore_continuous(&mut self) -> FGResult<()> {
        while let Some(substitution) = self.substitutions.pop() {
            self.remove_factor(substitution.discrete)?;
            self.insert_node(substitution.continuous, substitution.original);
        }
        Ok(())
    }

    #[inline]
    pub fn has_substitutions(&self) -> bool {
        !self.substitutions.is_empty()
    }
}
