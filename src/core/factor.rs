use std::collections::HashMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::core::{FGError, FGResult, Variable, VariableId};

/// Stable handle of a factor inside a factor graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactorId(pub usize);

/// A (partial) assignment of states to variables
pub type Assignment = HashMap<VariableId, usize>;

// ------------------------------------------------------------------------------------------

/// A discrete factor: a potential function over an ordered list of variables.
///
/// Values are stored in a flat table. The linear index of an assignment is
/// `sum_i state[i] * stride[i]` with `stride[0] = 1` and
/// `stride[i] = stride[i - 1] * states[i - 1]`, i.e. the first variable
/// changes fastest.
#[derive(Debug, Clone)]
pub struct Factor {
    name: String,
    variables: Vec<VariableId>,
    cardinalities: Vec<usize>,
    strides: Vec<usize>,
    values: Array1<f64>,
    pub(crate) evidence: bool,
    pub(crate) belief: Option<Array1<f64>>,
}

impl Factor {
    /// Creates a factor over `variables` with a table filled with ones
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::{Factor, FactorGraph, Variable};
    ///
    /// let mut fg = FactorGraph::new("example");
    /// let a = fg.add_variable(Variable::new("A", 2));
    /// let b = fg.add_variable(Variable::new("B", 3));
    /// let factor = Factor::new("A-B", &[fg.variable(a).unwrap(), fg.variable(b).unwrap()]).unwrap();
    /// assert_eq!(factor.strides(), &[1, 2]);
    /// assert_eq!(factor.len(), 6);
    /// ```
    pub fn new(name: impl Into<String>, variables: &[&Variable]) -> FGResult<Self> {
        let mut factor = Self::detached(name);
        factor.set_variables(variables)?;
        Ok(factor)
    }

    /// A factor without variables, its scope must be set before use
    pub(crate) fn detached(name: impl Into<String>) -> Self {
        Factor {
            name: name.into(),
            variables: Vec::new(),
            cardinalities: Vec::new(),
            strides: Vec::new(),
            values: Array1::zeros(0),
            evidence: false,
            belief: None,
        }
    }

    /// Creates a factor and sets its value table in one go
    pub fn with_values(
        name: impl Into<String>,
        variables: &[&Variable],
        values: Vec<f64>,
    ) -> FGResult<Self> {
        let mut factor = Self::new(name, variables)?;
        factor.set_values(values)?;
        Ok(factor)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resets the list of variables. The value table is reallocated and
    /// filled with ones, strides are recomputed
    ///
    /// # Notes
    ///
    /// If a factor already belongs to a factor graph, use
    /// `FactorGraph::set_factor_variables` instead so that adjacency is rewired
    pub fn set_variables(&mut self, variables: &[&Variable]) -> FGResult<()> {
        let ids: Vec<_> = variables.iter().map(|v| v.id()).collect();
        let cardinalities: Vec<_> = variables.iter().map(|v| v.states()).collect();
        for (i, var) in variables.iter().enumerate() {
            // standalone variables share one placeholder id, only registered ones can clash
            if var.id() != VariableId::UNREGISTERED
                && variables[..i].iter().any(|other| other.id() == var.id())
            {
                return Err(FGError::DuplicateVariable {
                    factor: self.name.clone(),
                    variable: var.name().to_string(),
                });
            }
        }
        self.set_variables_raw(ids, cardinalities)
    }

    pub(crate) fn set_variables_raw(
        &mut self,
        variables: Vec<VariableId>,
        cardinalities: Vec<usize>,
    ) -> FGResult<()> {
        if variables.is_empty() {
            return Err(FGError::EmptyVariables(self.name.clone()));
        }
        if cardinalities.contains(&0) {
            return Err(FGError::InvalidConfiguration(format!(
                "factor '{}' has a variable without states",
                self.name
            )));
        }
        let mut strides = Vec::with_capacity(cardinalities.len());
        let mut stride = 1;
        for card in &cardinalities {
            strides.push(stride);
            stride *= card;
        }
        self.values = Array1::ones(stride);
        self.variables = variables;
        self.cardinalities = cardinalities;
        self.strides = strides;
        self.belief = None;
        Ok(())
    }

    /// Replaces the value table. Its length must equal the product of
    /// cardinalities of the factor's variables
    pub fn set_values(&mut self, values: impl Into<Array1<f64>>) -> FGResult<()> {
        let values = values.into();
        if values.len() != self.values.len() {
            return Err(FGError::TableSizeMismatch {
                factor: self.name.clone(),
                expected: self.values.len(),
                actual: values.len(),
            });
        }
        self.values = values;
        Ok(())
    }

    #[inline]
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut Array1<f64> {
        &mut self.values
    }

    #[inline]
    pub fn variables(&self) -> &[VariableId] {
        &self.variables
    }

    #[inline]
    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of entries in the value table
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a variable in the factor's variable list
    #[inline]
    pub fn position_of(&self, variable: VariableId) -> Option<usize> {
        self.variables.iter().position(|v| *v == variable)
    }

    /// State of the variable at `position` encoded in a linear `index`
    #[inline(always)]
    pub fn state_of(&self, index: usize, position: usize) -> usize {
        (index / self.strides[position]) % self.cardinalities[position]
    }

    /// Linear index of an assignment. Every variable of the factor must
    /// have a state in `assignment`, extra entries are ignored
    pub fn index_for_assignment(&self, assignment: &Assignment) -> FGResult<usize> {
        let mut index = 0;
        for ((var, stride), card) in self
            .variables
            .iter()
            .zip(&self.strides)
            .zip(&self.cardinalities)
        {
            let state = *assignment.get(var).ok_or(FGError::MissingState(*var))?;
            if state >= *card {
                return Err(FGError::StateOutOfRange {
                    variable: format!("{:?}", var),
                    state,
                    states: *card,
                });
            }
            index += state * stride;
        }
        Ok(index)
    }

    /// Inverse of `index_for_assignment`
    pub fn assignment_for_index(&self, index: usize) -> Assignment {
        self.variables
            .iter()
            .enumerate()
            .map(|(pos, var)| (*var, self.state_of(index, pos)))
            .collect()
    }

    pub fn value(&self, assignment: &Assignment) -> FGResult<f64> {
        Ok(self.values[self.index_for_assignment(assignment)?])
    }

    pub fn set_value(&mut self, assignment: &Assignment, value: f64) -> FGResult<()> {
        let index = self.index_for_assignment(assignment)?;
        self.values[index] = value;
        Ok(())
    }

    /// Whether this factor was created to carry an observation
    #[inline]
    pub fn is_evidence(&self) -> bool {
        self.evidence
    }

    /// Joint belief over the factor's table computed by the last successful run
    #[inline]
    pub fn belief(&self) -> Option<&Array1<f64>> {
        self.belief.as_ref()
    }
}
