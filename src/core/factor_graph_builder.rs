use crate::core::{
    ClgFactor, ContinuousFactor, EmpiricalDistribution, EmpiricalFactor, FGResult, Factor,
    FactorGraph, FactorId, GaussianComponent, Variable, VariableId,
};

// ------------------------------------------------------------------------------------------

/// A factor graph builder. It wraps an empty factor graph and lets one
/// declare variables and factors by ids rather than by references
#[derive(Debug, Clone)]
pub struct FactorGraphBuilder {
    graph: FactorGraph,
}

impl FactorGraphBuilder {
    /// Creates a builder of an empty factor graph
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::FactorGraphBuilder;
    ///
    /// let fgb = FactorGraphBuilder::new("empty");
    /// let fg = fgb.build();
    /// assert_eq!(fg.factors_number(), 0);
    /// ```
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        FactorGraphBuilder {
            graph: FactorGraph::new(name),
        }
    }

    /// Adds a discrete variable
    ///
    /// # Arguments
    ///
    /// * `name` - A human readable name
    /// * `states` - A number of states of the variable
    #[inline]
    pub fn add_variable(&mut self, name: impl Into<String>, states: usize) -> VariableId {
        self.graph.add_variable(Variable::new(name, states))
    }

    /// Adds a continuous variable. It may only appear as the leaf of a
    /// continuous factor
    ///
    /// # Arguments
    ///
    /// * `name` - A human readable name
    /// * `two_sided` - Whether both low and high values are abnormal
    #[inline]
    pub fn add_continuous_variable(&mut self, name: impl Into<String>, two_sided: bool) -> VariableId {
        self.graph.add_variable(Variable::continuous(name, two_sided))
    }

    /// Adds a discrete factor
    ///
    /// # Arguments
    ///
    /// * `name` - A name of the factor
    /// * `variables` - Ids of adjoint variables, the first one changes fastest in `values`
    /// * `values` - A flat value table
    ///
    /// # Notes
    ///
    /// If the length of `values` does not match the product of the variables
    /// cardinalities, or an id is unknown, the method returns an error
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::FactorGraphBuilder;
    ///
    /// let mut fgb = FactorGraphBuilder::new("example");
    /// let a = fgb.add_variable("A", 2);
    /// let b = fgb.add_variable("B", 2);
    /// assert!(fgb.add_factor("ab", &[a, b], vec![0.1, 0.55, 0.9, 0.45]).is_ok());
    /// assert!(fgb.add_factor("bad", &[a, b], vec![0.1, 0.9]).is_err());
    /// ```
    pub fn add_factor(
        &mut self,
        name: impl Into<String>,
        variables: &[VariableId],
        values: Vec<f64>,
    ) -> FGResult<FactorId> {
        let factor = {
            let refs = self.variable_refs(variables)?;
            Factor::with_values(name, &refs, values)?
        };
        self.graph.add_factor(factor)
    }

    /// Adds a mixture of Gaussians leaf factor
    ///
    /// # Arguments
    ///
    /// * `discrete` - The discrete parent
    /// * `continuous` - The continuous leaf
    /// * `mixtures` - One mixture per state of the parent
    pub fn add_clg_factor(
        &mut self,
        name: impl Into<String>,
        discrete: VariableId,
        continuous: VariableId,
        mixtures: Vec<Vec<GaussianComponent>>,
    ) -> FGResult<FactorId> {
        let factor = ClgFactor::new(
            name,
            self.graph.variable(discrete)?,
            self.graph.variable(continuous)?,
            mixtures,
        )?;
        self.graph.add_continuous_factor(ContinuousFactor::Clg(factor))
    }

    /// Adds an empirical distribution leaf factor built from raw samples
    pub fn add_empirical_factor(
        &mut self,
        name: impl Into<String>,
        discrete: VariableId,
        continuous: VariableId,
        samples: Vec<f64>,
    ) -> FGResult<FactorId> {
        let factor = EmpiricalFactor::new(
            name,
            self.graph.variable(discrete)?,
            self.graph.variable(continuous)?,
            EmpiricalDistribution::new(samples)?,
        )?;
        self.graph
            .add_continuous_factor(ContinuousFactor::Empirical(factor))
    }

    /// Returns a factor graph
    #[inline]
    pub fn build(self) -> FactorGraph {
        self.graph
    }
}

// private methods --------------------------------------------------------------------------

impl FactorGraphBuilder {
    #[inline(always)]
    fn variable_refs(&self, ids: &[VariableId]) -> FGResult<Vec<&Variable>> {
        ids.iter().map(|id| self.graph.variable(*id)).collect()
    }
}
