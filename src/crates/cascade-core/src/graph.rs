//! Core graph data structures
//!
//! This module defines the building blocks the compiler assembles pipelines
//! from. A compiled pipeline is a directed routing structure, not a fan-out
//! scheduler: every node has exactly one outgoing edge, which is either a
//! direct transition or a conditional router evaluated on the node's terminal
//! state.
//!
//! ```text
//! START ──→ classify ──┬─(value == "na")──→ classify_value_setter_0 ──→ END
//!                      └─(default)────────→ classify_value_setter ────→ extract ──→ END
//! ```
//!
//! Nodes come in two kinds: **step** nodes wrap a step adapter's compiled
//! sub-workflow, and **value-setter** nodes apply an alias map to the state
//! without otherwise altering control flow.

use std::collections::HashMap;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Node identifier - unique name for each node in the graph
pub type NodeId = String;

/// Special node identifier for graph entry
pub const START: &str = "__start__";

/// Special node identifier for graph termination
///
/// The terminal sentinel. Step declarations may name it as an edge or
/// condition target to finish the pipeline early.
pub const END: &str = "__end__";

/// Async node executor: `(state) -> state`
///
/// Errors other than [`PipelineError::Paused`] fail the node; `Paused`
/// propagates as a deliberate suspension.
pub type NodeExecutor = Arc<
    dyn Fn(
            serde_json::Value,
        ) -> Pin<
            Box<dyn std::future::Future<Output = Result<serde_json::Value>> + Send>,
        > + Send
        + Sync,
>;

/// Router function for conditional edges: maps terminal state to the next node
pub type RouterFn = Arc<dyn Fn(&serde_json::Value) -> NodeId + Send + Sync>;

/// What a node does, for tracing and trace collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Wraps a step adapter's compiled sub-workflow
    Step,
    /// Applies an alias map at a routing boundary
    ValueSetter,
}

/// A processing unit in the graph
#[derive(Clone)]
pub struct NodeSpec {
    /// Human-readable name, unique within the graph
    pub name: String,
    /// Step or value-setter
    pub kind: NodeKind,
    /// Async executor that transforms state
    pub executor: NodeExecutor,
}

impl Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("executor", &"<function>")
            .finish()
    }
}

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition to a single node
    Direct(NodeId),

    /// Dynamic routing based on terminal state
    Conditional {
        /// Returns the next node id for the current state
        router: RouterFn,
        /// All targets the router can return, for compile-time validation
        branches: Vec<NodeId>,
    },
}

impl Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// The directed routing structure of a compiled pipeline
///
/// Immutable after compilation and safe to share across concurrent
/// predictions.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// All nodes mapped by their unique ids
    pub nodes: HashMap<NodeId, NodeSpec>,
    /// The single outgoing edge of each node
    pub edges: HashMap<NodeId, Edge>,
    /// Node where execution begins
    pub entry: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph
    ///
    /// Node ids are unique; a second node under the same name is a
    /// configuration error, never a silent overwrite. This is how a step
    /// named like a generated value-setter id gets caught.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<()> {
        if self.nodes.contains_key(&spec.name) {
            return Err(PipelineError::configuration(format!(
                "node '{}' is declared more than once",
                spec.name
            )));
        }
        self.nodes.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Add a direct (unconditional) edge
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
    }

    /// Add a conditional edge with dynamic routing
    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<NodeId>,
        router: RouterFn,
        branches: Vec<NodeId>,
    ) {
        self.edges
            .insert(from.into(), Edge::Conditional { router, branches });
    }

    /// Set the entry point for execution
    pub fn set_entry(&mut self, node: impl Into<NodeId>) {
        self.entry = Some(node.into());
    }

    /// Resolve the next node after `from`, given the current state
    pub fn resolve_next(&self, from: &str, state: &serde_json::Value) -> Result<NodeId> {
        match self.edges.get(from) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, .. }) => Ok(router(state)),
            None => Err(PipelineError::Execution(format!(
                "node '{}' has no outgoing edge",
                from
            ))),
        }
    }

    /// Validate the graph structure for correctness
    ///
    /// Checks that the entry point exists, that every edge source and target
    /// exists (END is a valid target), and that every node other than END is
    /// wired to something. Raised at compile time, never at invocation time.
    pub fn validate(&self) -> Result<()> {
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| PipelineError::configuration("graph has no entry point"))?;
        if !self.nodes.contains_key(entry) {
            return Err(PipelineError::configuration(format!(
                "entry point '{}' does not exist",
                entry
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(PipelineError::configuration(format!(
                    "edge source '{}' does not exist",
                    from
                )));
            }
            let targets: Vec<&NodeId> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { branches, .. } => branches.iter().collect(),
            };
            for to in targets {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(PipelineError::configuration(format!(
                        "edge target '{}' does not exist",
                        to
                    )));
                }
            }
        }

        for name in self.nodes.keys() {
            if !self.edges.contains_key(name) {
                return Err(PipelineError::configuration(format!(
                    "node '{}' has no outgoing edge",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Compact human-readable summary of the graph wiring, for logs
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .edges
            .iter()
            .map(|(from, edge)| match edge {
                Edge::Direct(to) => format!("{} -> {}", from, to),
                Edge::Conditional { branches, .. } => {
                    format!("{} -> ?{{{}}}", from, branches.join(", "))
                }
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

/// Build a pass-through executor for tests and trivial nodes
#[cfg(test)]
pub(crate) fn identity_executor() -> NodeExecutor {
    Arc::new(|state| Box::pin(async move { Ok(state) }))
}
