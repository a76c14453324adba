use std::collections::BTreeMap;

use crate::core::continuous::empirical_potential;
use crate::core::{
    Assignment, EmpiricalDistribution, FGError, FGResult, Factor, FactorGraph, FactorId,
    Variable, VariableId,
};

/// A value assigned to an observed variable
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedValue {
    /// A hard state of a discrete variable
    State(usize),

    /// Soft evidence of a binary variable: probability-like strength of state 1
    Strength(f64),

    /// A real value. For a continuous leaf it conditions its continuous factor;
    /// for a discrete variable the distribution converts it into soft evidence
    Continuous {
        value: f64,
        distribution: Option<EmpiricalDistribution>,
    },
}

/// A sparse mapping from variables to observed values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    values: BTreeMap<VariableId, ObservedValue>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, variable: VariableId, state: usize) -> &mut Self {
        self.values.insert(variable, ObservedValue::State(state));
        self
    }

    pub fn set_strength(&mut self, variable: VariableId, strength: f64) -> &mut Self {
        self.values.insert(variable, ObservedValue::Strength(strength));
        self
    }

    pub fn set_continuous(&mut self, variable: VariableId, value: f64) -> &mut Self {
        self.values.insert(
            variable,
            ObservedValue::Continuous {
                value,
                distribution: None,
            },
        );
        self
    }

    pub fn set_continuous_with_distribution(
        &mut self,
        variable: VariableId,
        value: f64,
        distribution: EmpiricalDistribution,
    ) -> &mut Self {
        self.values.insert(
            variable,
            ObservedValue::Continuous {
                value,
                distribution: Some(distribution),
            },
        );
        self
    }

    #[inline]
    pub fn get(&self, variable: VariableId) -> Option<&ObservedValue> {
        self.values.get(&variable)
    }

    pub fn remove(&mut self, variable: VariableId) -> Option<ObservedValue> {
        self.values.remove(&variable)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &ObservedValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<(VariableId, usize)> for Observation {
    fn from_iter<T: IntoIterator<Item = (VariableId, usize)>>(iter: T) -> Self {
        Observation {
            values: iter
                .into_iter()
                .map(|(var, state)| (var, ObservedValue::State(state)))
                .collect(),
        }
    }
}

impl From<&Assignment> for Observation {
    fn from(assignment: &Assignment) -> Self {
        assignment.iter().map(|(k, v)| (*k, *v)).collect()
    }
}

// ------------------------------------------------------------------------------------------

/// Value table of a unary evidence factor
fn evidence_values(variable: &Variable, value: &ObservedValue) -> FGResult<Vec<f64>> {
    let states = variable.states();
    let strength_pair = |strength: f64| -> FGResult<Vec<f64>> {
        if !(0f64..=1f64).contains(&strength) {
            return Err(FGError::StrengthOutOfRange {
                variable: variable.name().to_string(),
                strength,
            });
        }
        Ok(vec![1f64 - strength, strength])
    };
    match value {
        ObservedValue::State(state) => {
            if *state >= states {
                return Err(FGError::StateOutOfRange {
                    variable: variable.name().to_string(),
                    state: *state,
                    states,
                });
            }
            if states == 2 {
                strength_pair(*state as f64)
            } else {
                let mut values = vec![0f64; states];
                values[*state] = 1f64;
                Ok(values)
            }
        }
        ObservedValue::Strength(strength) => {
            if states != 2 {
                return Err(FGError::InvalidConfiguration(format!(
                    "strength evidence needs a binary variable, '{}' has {} states",
                    variable.name(),
                    states
                )));
            }
            strength_pair(*strength)
        }
        ObservedValue::Continuous {
            value,
            distribution: Some(distribution),
        } => Ok(
            empirical_potential(distribution.cumulative_probability(*value), states, true)?
                .to_vec(),
        ),
        ObservedValue::Continuous {
            distribution: None, ..
        } => Err(FGError::InvalidConfiguration(format!(
            "continuous evidence for discrete variable '{}' needs an empirical distribution",
            variable.name()
        ))),
    }
}

impl FactorGraph {
    /// Stages an observation as unary evidence factors. Continuous variables
    /// are skipped, they are handled by `substitute_continuous`.
    /// On failure nothing stays attached
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::{FactorGraphBuilder, Observation};
    ///
    /// let mut fgb = FactorGraphBuilder::new("example");
    /// let a = fgb.add_variable("A", 3);
    /// let prior = fgb.add_factor("prior", &[a], vec![0.2, 0.3, 0.5]).unwrap();
    /// let mut fg = fgb.build();
    ///
    /// let mut observation = Observation::new();
    /// observation.set_state(a, 1);
    /// fg.attach_observation(&observation).unwrap();
    /// let evidence = fg.evidence_factors()[0];
    /// assert_eq!(fg.factor(evidence).unwrap().values().to_vec(), vec![0., 1., 0.]);
    ///
    /// fg.detach_observation();
    /// assert_eq!(fg.variable(a).unwrap().factors(), &[prior]);
    /// ```
    pub fn attach_observation(&mut self, observation: &Observation) -> FGResult<()> {
        if !self.evidence.is_empty() {
            return Err(FGError::EvidenceAlreadyAttached);
        }
        for (var, value) in observation.iter() {
            if let Err(e) = self.attach_one(var, value) {
                self.detach_observation();
                return Err(e);
            }
        }
        Ok(())
    }

    fn attach_one(&mut self, var: VariableId, value: &ObservedValue) -> FGResult<()> {
        let variable = self.variable(var)?;
        if variable.is_continuous() {
            return Ok(());
        }
        let values = evidence_values(variable, value)?;
        let mut factor =
            Factor::with_values(format!("evidence:{}", variable.name()), &[variable], values)?;
        factor.evidence = true;
        let id = self.add_factor(factor)?;
        self.evidence.push(id);
        Ok(())
    }

    /// Removes every evidence factor attached by `attach_observation`.
    /// Calling it with nothing attached does nothing
    pub fn detach_observation(&mut self) {
        for id in std::mem::take(&mut self.evidence) {
            let _ = self.remove_factor(id);
        }
    }

    /// Currently attached evidence factors
    #[inline]
    pub fn evidence_factors(&self) -> &[FactorId] {
        &self.evidence
    }
}
