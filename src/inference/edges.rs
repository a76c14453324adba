use std::collections::HashMap;

use crate::core::{FGResult, FactorGraph, FactorId, Message, VariableId};

/// An endpoint of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum NodeRef {
    Variable(VariableId),
    Factor(FactorId),
}

/// A directed carrier of a message between a variable and a factor
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) from: NodeRef,
    pub(crate) to: NodeRef,

    /// The factor endpoint
    pub(crate) factor: FactorId,

    /// Position of the variable endpoint in the factor's variable list
    pub(crate) position: usize,
    pub(crate) message: Message,

    /// Index of the edge going in the opposite direction
    pub(crate) reverse: usize,
}

/// Edges of one inference run. Created fresh for every run and dropped after it
#[derive(Debug, Clone, Default)]
pub(crate) struct EdgeStore {
    pub(crate) edges: Vec<Edge>,
    incoming: HashMap<NodeRef, Vec<usize>>,
    outgoing: HashMap<NodeRef, Vec<usize>>,
}

impl EdgeStore {
    /// Creates a pair of edges per (factor, variable) incidence of the
    /// discrete part of `graph`. `init` produces an initial message for a
    /// given number of states
    pub(crate) fn build(
        graph: &FactorGraph,
        mut init: impl FnMut(usize) -> FGResult<Message>,
    ) -> FGResult<Self> {
        let mut store = EdgeStore::default();
        for (fid, factor) in graph.discrete_factors() {
            for (position, (var, states)) in factor
                .variables()
                .iter()
                .zip(factor.cardinalities())
                .enumerate()
            {
                let to_var = store.edges.len();
                let to_factor = to_var + 1;
                let (f_node, v_node) = (NodeRef::Factor(fid), NodeRef::Variable(*var));
                store.edges.push(Edge {
                    from: f_node,
                    to: v_node,
                    factor: fid,
                    position,
                    message: init(*states)?,
                    reverse: to_factor,
                });
                store.edges.push(Edge {
                    from: v_node,
                    to: f_node,
                    factor: fid,
                    position,
                    message: init(*states)?,
                    reverse: to_var,
                });
                store.register(to_var);
                store.register(to_factor);
            }
        }
        Ok(store)
    }

    fn register(&mut self, index: usize) {
        let edge = &self.edges[index];
        let (from, to) = (edge.from, edge.to);
        self.outgoing.entry(from).or_default().push(index);
        self.incoming.entry(to).or_default().push(index);
    }

    #[inline]
    pub(crate) fn incoming(&self, node: NodeRef) -> &[usize] {
        self.incoming.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub(crate) fn outgoing(&self, node: NodeRef) -> &[usize] {
        self.outgoing.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}
