use std::collections::HashMap;

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Operations supported in the computation graph.
#[derive(Debug, Clone)]
pub enum Op {
    /// Variational parameter slot (index into the caller's φ vector).
    Param(usize),
    /// Sampled-value slot (index into the per-draw input vector).
    Input(usize),
    /// A constant scalar baked into the graph (observed data enters here).
    Constant(f64),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Div(NodeId, NodeId),
    Neg(NodeId),
    Exp(NodeId),
    Ln(NodeId),
    Square(NodeId),
    /// Log-density of a Normal distribution: logp(x | mu, sigma).
    NormalLogP {
        x: NodeId,
        mu: NodeId,
        sigma: NodeId,
    },
}

/// A single node in the computation graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    pub name: Option<String>,
}

/// A scalar objective expressed as a computation graph.
///
/// Nodes are stored in topological order (each node only references earlier
/// nodes). The graph's value is the sum of its accumulated terms, each
/// weighted by a constant scale; a scale other than 1.0 is how minibatch
/// likelihood terms apply the N/B subsampling correction.
///
/// `Param(i)` reads `params[i]` and `Input(j)` reads `inputs[j]` at
/// evaluation time, so the same graph can be evaluated against parameter
/// vectors longer than the set of slots it actually references.
#[derive(Debug, Clone)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub param_count: usize,
    pub input_count: usize,
    pub param_names: Vec<String>,
    pub input_names: Vec<String>,
    pub terms: Vec<(NodeId, f64)>,
    name_to_node: HashMap<String, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            param_count: 0,
            input_count: 0,
            param_names: Vec::new(),
            input_names: Vec::new(),
            terms: Vec::new(),
            name_to_node: HashMap::new(),
        }
    }

    fn add_node(&mut self, op: Op, name: Option<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(ref n) = name {
            self.name_to_node.insert(n.clone(), id);
        }
        self.nodes.push(Node { id, op, name });
        id
    }

    pub fn add_param(&mut self, name: &str) -> NodeId {
        let idx = self.param_count;
        self.param_count += 1;
        self.param_names.push(name.to_string());
        self.add_node(Op::Param(idx), Some(name.to_string()))
    }

    pub fn add_input(&mut self, name: &str) -> NodeId {
        let idx = self.input_count;
        self.input_count += 1;
        self.input_names.push(name.to_string());
        self.add_node(Op::Input(idx), Some(name.to_string()))
    }

    pub fn add_constant(&mut self, value: f64) -> NodeId {
        self.add_node(Op::Constant(value), None)
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Add(a, b), None)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Sub(a, b), None)
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Mul(a, b), None)
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Div(a, b), None)
    }

    pub fn neg(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Neg(a), None)
    }

    pub fn exp(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Exp(a), None)
    }

    pub fn ln(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Ln(a), None)
    }

    pub fn square(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Square(a), None)
    }

    pub fn normal_logp(&mut self, x: NodeId, mu: NodeId, sigma: NodeId) -> NodeId {
        self.add_node(Op::NormalLogP { x, mu, sigma }, None)
    }

    /// Register a node as one of the graph's summed terms.
    pub fn add_term(&mut self, node: NodeId) {
        self.terms.push((node, 1.0));
    }

    /// Register a term weighted by a constant factor.
    ///
    /// Minibatch likelihood terms use the factor N/B so that the expectation
    /// over uniform subsamples equals the full-data sum.
    pub fn add_scaled_term(&mut self, node: NodeId, scale: f64) {
        self.terms.push((node, scale));
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_to_node.get(name).copied()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
