use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::continuous::Substitution;
use crate::core::{ContinuousFactor, FGError, FGResult, Factor, FactorId, Variable, VariableId};

// ------------------------------------------------------------------------------------------

/// A factor stored in a factor graph: either an ordinary discrete table
/// or a continuous leaf factor that is marginalized before inference
#[derive(Debug, Clone)]
pub enum FactorNode {
    Discrete(Factor),
    Continuous(ContinuousFactor),
}

impl FactorNode {
    #[inline]
    pub fn name(&self) -> &str {
        match self {
            FactorNode::Discrete(f) => f.name(),
            FactorNode::Continuous(f) => f.name(),
        }
    }

    #[inline]
    pub fn variables(&self) -> &[VariableId] {
        match self {
            FactorNode::Discrete(f) => f.variables(),
            FactorNode::Continuous(f) => f.variables(),
        }
    }

    #[inline]
    pub fn is_continuous(&self) -> bool {
        matches!(self, FactorNode::Continuous(_))
    }
}

// ------------------------------------------------------------------------------------------

/// A factor graph.
///
/// Variables live in an append-only arena addressed by `VariableId`,
/// factors are addressed by `FactorId` and kept ordered by id. The set of
/// variables of the graph is derived from the factors: a variable belongs to
/// the graph while at least one factor references it.
#[derive(Debug, Clone)]
pub struct FactorGraph {
    name: String,
    pub(crate) variables: Vec<Variable>,
    pub(crate) factors: BTreeMap<FactorId, FactorNode>,
    next_factor_id: usize,
    members: BTreeSet<VariableId>,
    pub(crate) evidence: Vec<FactorId>,
    pub(crate) substitutions: Vec<Substitution>,
}

impl FactorGraph {
    /// Creates an empty factor graph
    pub fn new(name: impl Into<String>) -> Self {
        FactorGraph {
            name: name.into(),
            variables: Vec::new(),
            factors: BTreeMap::new(),
            next_factor_id: 0,
            members: BTreeSet::new(),
            evidence: Vec::new(),
            substitutions: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a variable and returns its id. A variable becomes a member
    /// of the graph once a factor references it
    pub fn add_variable(&mut self, mut variable: Variable) -> VariableId {
        let id = VariableId(self.variables.len());
        variable.id = id;
        variable.factors.clear();
        variable.belief = None;
        self.variables.push(variable);
        id
    }

    pub fn variable(&self, id: VariableId) -> FGResult<&Variable> {
        self.variables.get(id.0).ok_or(FGError::UnknownVariable(id))
    }

    pub fn variable_mut(&mut self, id: VariableId) -> FGResult<&mut Variable> {
        self.variables.get_mut(id.0).ok_or(FGError::UnknownVariable(id))
    }

    /// Looks a registered variable up by name
    pub fn variable_by_name(&self, name: &str) -> Option<VariableId> {
        self.variables.iter().find(|v| v.name() == name).map(|v| v.id)
    }

    /// Variables referenced by at least one factor, ordered by id
    pub fn variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.members.iter().map(move |id| &self.variables[id.0])
    }

    pub fn variable_ids(&self) -> Vec<VariableId> {
        self.members.iter().copied().collect()
    }

    #[inline]
    pub fn contains_variable(&self, id: VariableId) -> bool {
        self.members.contains(&id)
    }

    /// Adds a discrete factor and wires back-references of its variables
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::{Factor, FactorGraph, Variable};
    ///
    /// let mut fg = FactorGraph::new("example");
    /// let a = fg.add_variable(Variable::new("A", 2));
    /// let prior = Factor::with_values("prior", &[fg.variable(a).unwrap()], vec![0.4, 0.6]).unwrap();
    /// let id = fg.add_factor(prior).unwrap();
    /// assert_eq!(fg.variable(a).unwrap().factors(), &[id]);
    /// ```
    pub fn add_factor(&mut self, factor: Factor) -> FGResult<FactorId> {
        for (var, card) in factor.variables().iter().zip(factor.cardinalities()) {
            let variable = self.variable(*var)?;
            if variable.is_continuous() {
                return Err(FGError::NotInferrable(format!(
                    "continuous variable '{}' used in discrete factor '{}'",
                    variable.name(),
                    factor.name()
                )));
            }
            if variable.states() != *card {
                return Err(FGError::StatesAlreadySet {
                    variable: variable.name().to_string(),
                    current: variable.states(),
                    requested: *card,
                });
            }
        }
        Ok(self.insert_new(FactorNode::Discrete(factor)))
    }

    /// Adds a continuous leaf factor
    pub fn add_continuous_factor(&mut self, factor: ContinuousFactor) -> FGResult<FactorId> {
        self.variable(factor.discrete())?;
        self.variable(factor.continuous())?;
        Ok(self.insert_new(FactorNode::Continuous(factor)))
    }

    fn insert_new(&mut self, node: FactorNode) -> FactorId {
        let id = FactorId(self.next_factor_id);
        self.next_factor_id += 1;
        self.insert_node(id, node);
        id
    }

    /// Inserts a node under a given id. Back-reference lists stay sorted by
    /// factor id, so removing and re-inserting a factor is an exact inverse
    pub(crate) fn insert_node(&mut self, id: FactorId, node: FactorNode) {
        for var in node.variables() {
            let variable = &mut self.variables[var.0];
            if let Err(pos) = variable.factors.binary_search(&id) {
                variable.factors.insert(pos, id);
            }
            self.members.insert(*var);
        }
        self.next_factor_id = self.next_factor_id.max(id.0 + 1);
        self.factors.insert(id, node);
    }

    /// Removes a factor and unwires it from its variables
    pub fn remove_factor(&mut self, id: FactorId) -> FGResult<FactorNode> {
        let node = self.factors.remove(&id).ok_or(FGError::UnknownFactor(id))?;
        for var in node.variables() {
            let variable = &mut self.variables[var.0];
            variable.factors.retain(|f| *f != id);
            if variable.factors.is_empty() {
                self.members.remove(var);
            }
        }
        Ok(node)
    }

    pub fn factor_node(&self, id: FactorId) -> FGResult<&FactorNode> {
        self.factors.get(&id).ok_or(FGError::UnknownFactor(id))
    }

    /// Discrete factor by id
    pub fn factor(&self, id: FactorId) -> FGResult<&Factor> {
        match self.factors.get(&id) {
            Some(FactorNode::Discrete(f)) => Ok(f),
            Some(FactorNode::Continuous(f)) => Err(FGError::InvalidContinuousFactor(format!(
                "factor '{}' is continuous",
                f.name()
            ))),
            None => Err(FGError::UnknownFactor(id)),
        }
    }

    /// Mutable discrete factor by id. Only the value table should be changed
    /// through it, use `set_factor_variables` to change its scope
    pub fn factor_mut(&mut self, id: FactorId) -> FGResult<&mut Factor> {
        match self.factors.get_mut(&id) {
            Some(FactorNode::Discrete(f)) => Ok(f),
            Some(FactorNode::Continuous(f)) => Err(FGError::InvalidContinuousFactor(format!(
                "factor '{}' is continuous",
                f.name()
            ))),
            None => Err(FGError::UnknownFactor(id)),
        }
    }

    pub fn continuous_factor(&self, id: FactorId) -> FGResult<&ContinuousFactor> {
        match self.factors.get(&id) {
            Some(FactorNode::Continuous(f)) => Ok(f),
            Some(FactorNode::Discrete(f)) => Err(FGError::InvalidContinuousFactor(format!(
                "factor '{}' is discrete",
                f.name()
            ))),
            None => Err(FGError::UnknownFactor(id)),
        }
    }

    /// Ids of all factors in ascending order
    pub fn factor_ids(&self) -> Vec<FactorId> {
        self.factors.keys().copied().collect()
    }

    #[inline]
    pub fn factors_number(&self) -> usize {
        self.factors.len()
    }

    /// Iterates over discrete factors in ascending id order
    pub fn discrete_factors(&self) -> impl Iterator<Item = (FactorId, &Factor)> + '_ {
        self.factors.iter().filter_map(|(id, node)| match node {
            FactorNode::Discrete(f) => Some((*id, f)),
            FactorNode::Continuous(_) => None,
        })
    }

    /// Iterates over continuous factors in ascending id order
    pub fn continuous_factors(&self) -> impl Iterator<Item = (FactorId, &ContinuousFactor)> + '_ {
        self.factors.iter().filter_map(|(id, node)| match node {
            FactorNode::Continuous(f) => Some((*id, f)),
            FactorNode::Discrete(_) => None,
        })
    }

    /// Changes the scope of a factor already in the graph. The value table
    /// is reset and adjacency is rebuilt
    pub fn set_factor_variables(&mut self, id: FactorId, variables: &[VariableId]) -> FGResult<()> {
        let mut cardinalities = Vec::with_capacity(variables.len());
        for var in variables {
            cardinalities.push(self.variable(*var)?.states());
        }
        let factor = self.factor_mut(id)?;
        for (i, var) in variables.iter().enumerate() {
            if variables[..i].contains(var) {
                return Err(FGError::DuplicateVariable {
                    factor: factor.name().to_string(),
                    variable: format!("{:?}", var),
                });
            }
        }
        factor.set_variables_raw(variables.to_vec(), cardinalities)?;
        self.validate_variables();
        Ok(())
    }

    /// Recomputes the variable set and every variable's factor list from the
    /// current factor set. Must be called after mutating the factor set by
    /// means other than `add_factor`/`remove_factor`
    pub fn validate_variables(&mut self) {
        for variable in &mut self.variables {
            variable.factors.clear();
        }
        self.members.clear();
        for (id, node) in &self.factors {
            for var in node.variables() {
                self.variables[var.0].factors.push(*id);
                self.members.insert(*var);
            }
        }
    }

    /// Checks that the bipartite variable-factor graph has no cycles.
    /// A forest of several disconnected trees is accepted
    ///
    /// # Example
    ///
    /// ```
    /// use fgcore::core::FactorGraphBuilder;
    ///
    /// let mut fgb = FactorGraphBuilder::new("chain");
    /// let a = fgb.add_variable("A", 2);
    /// let b = fgb.add_variable("B", 2);
    /// let c = fgb.add_variable("C", 2);
    /// fgb.add_factor("ab", &[a, b], vec![1.; 4]).unwrap();
    /// fgb.add_factor("bc", &[b, c], vec![1.; 4]).unwrap();
    /// let fg = fgb.build();
    /// assert!(fg.is_tree());
    /// ```
    pub fn is_tree(&self) -> bool {
        let mut index: HashMap<VariableId, usize> = HashMap::new();
        for (i, id) in self.members.iter().enumerate() {
            index.insert(*id, i);
        }
        let nodes_number = self.members.len() + self.factors.len();
        let mut parents: Vec<usize> = (0..nodes_number).collect();
        for (f_pos, node) in self.factors.values().enumerate() {
            let f_node = self.members.len() + f_pos;
            for var in node.variables() {
                let v_node = index[var];
                let (root_f, root_v) = (find_root(&mut parents, f_node), find_root(&mut parents, v_node));
                if root_f == root_v {
                    return false;
                }
                parents[root_f] = root_v;
            }
        }
        true
    }

    /// Whether continuous variables, if any, can be eliminated before
    /// inference: each must be a leaf of exactly one continuous factor whose
    /// other variable is discrete
    pub fn is_inferrable(&self) -> bool {
        self.inferrability_issue().is_none()
    }

    pub(crate) fn inferrability_issue(&self) -> Option<String> {
        for variable in self.variables() {
            if !variable.is_continuous() {
                if variable.states() == 0 {
                    return Some(format!("variable '{}' has no states", variable.name()));
                }
                continue;
            }
            if variable.factors.len() != 1 {
                return Some(format!(
                    "continuous variable '{}' participates in {} factors",
                    variable.name(),
                    variable.factors.len()
                ));
            }
            match &self.factors[&variable.factors[0]] {
                FactorNode::Discrete(f) => {
                    return Some(format!(
                        "continuous variable '{}' is in discrete factor '{}'",
                        variable.name(),
                        f.name()
                    ))
                }
                FactorNode::Continuous(f) => {
                    if f.variables().len() > 2 || self.variables[f.discrete().0].is_continuous() {
                        return Some(format!(
                            "continuous factor '{}' must link one discrete and one continuous variable",
                            f.name()
                        ));
                    }
                }
            }
        }
        None
    }

    /// Drops beliefs of all variables and factors
    pub fn clear_beliefs(&mut self) {
        for variable in &mut self.variables {
            variable.belief = None;
        }
        for node in self.factors.values_mut() {
            if let FactorNode::Discrete(f) = node {
                f.belief = None;
            }
        }
    }
}

#[inline]
fn find_root(parents: &mut [usize], mut node: usize) -> usize {
    while parents[node] != node {
        parents[node] = parents[parents[node]];
        node = parents[node];
    }
    node
}
