//! Graph compiler
//!
//! Compiles declarative step/edge/condition declarations into a runnable
//! directed graph. Per step, in declaration order:
//!
//! 1. **Conditions declared**: one value-setter node per condition, named
//!    `<step>_value_setter_<index>`, plus a conditional router on the step.
//!    The router evaluates each condition's discriminant field against its
//!    `value`, case-insensitively and in order; on match it routes to that
//!    condition's setter, which feeds the condition's target. With no match,
//!    the default target is the `edge`-derived setter when an edge is also
//!    declared, otherwise the next declared step.
//! 2. **Edge only**: a single value-setter named `<step>_value_setter` is
//!    interposed unconditionally between the step and `edge.node` - including
//!    when `edge.node` is the terminal sentinel on the very last step, so an
//!    output mapping on a final edge-to-END is never dropped.
//! 3. **Neither**: a direct edge to the next declared step, or to the
//!    terminal sentinel after the last step.
//!
//! A step's own `output` map applies to its terminal state before any routing
//! decision, so conditions and downstream steps see the aliased fields.
//!
//! Edges or conditions naming a non-existent target are a configuration
//! error at compile time, not at invocation time.

use std::sync::Arc;

use crate::config::{PipelineConfig, StepDeclaration};
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, NodeExecutor, NodeId, NodeKind, NodeSpec, RouterFn, END};
use crate::value_setter::{apply_aliases, make_value_setter};

/// Normalize a declared routing target to a graph node id
///
/// Configurations write the terminal sentinel as `"END"`; the graph uses the
/// reserved id [`END`]. Both spellings are accepted.
fn resolve_target(name: &str) -> NodeId {
    if name == "END" || name == END {
        END.to_string()
    } else {
        name.to_string()
    }
}

/// One compiled condition, ready for the router closure
struct CompiledCondition {
    /// Lower-cased value to match
    value: String,
    /// Discriminant state field
    field: String,
    /// Value-setter node routed to on match
    setter: NodeId,
}

/// Compile step declarations and their executors into a routing graph
///
/// `executors` pairs each step name with its compiled sub-workflow, in the
/// same order as `config.steps`. The returned graph has been validated: every
/// edge and condition target exists (or is the terminal sentinel).
pub fn compile_graph(
    config: &PipelineConfig,
    executors: Vec<(String, NodeExecutor)>,
) -> Result<Graph> {
    config.validate()?;
    if executors.len() != config.steps.len() {
        return Err(PipelineError::configuration(format!(
            "{} steps declared but {} executors supplied",
            config.steps.len(),
            executors.len()
        )));
    }

    let mut graph = Graph::new();

    for ((step, (executor_name, executor)), next) in config
        .steps
        .iter()
        .zip(executors)
        .zip(next_step_names(config))
    {
        if executor_name != step.name {
            return Err(PipelineError::configuration(format!(
                "executor order mismatch: expected '{}', got '{}'",
                step.name, executor_name
            )));
        }

        graph.add_node(NodeSpec {
            name: step.name.clone(),
            kind: NodeKind::Step,
            executor: with_step_output(step, executor),
        })?;

        wire_step(&mut graph, step, next)?;
    }

    if let Some(first) = config.steps.first() {
        graph.set_entry(first.name.clone());
    }

    graph.validate()?;
    tracing::debug!(graph = %graph.describe(), "pipeline graph compiled");
    Ok(graph)
}

/// The fall-through target of each step: the next declared step, or END
fn next_step_names(config: &PipelineConfig) -> impl Iterator<Item = NodeId> + '_ {
    config
        .steps
        .iter()
        .skip(1)
        .map(|step| step.name.clone())
        .chain(std::iter::once(END.to_string()))
}

/// Wrap a step executor so its own `output` aliases apply to the terminal
/// state before any routing decision sees it
fn with_step_output(step: &StepDeclaration, executor: NodeExecutor) -> NodeExecutor {
    if step.output.is_empty() {
        return executor;
    }
    let aliases = Arc::new(step.output.clone());
    Arc::new(move |state| {
        let executor = Arc::clone(&executor);
        let aliases = Arc::clone(&aliases);
        Box::pin(async move {
            let mut state = executor(state).await?;
            apply_aliases(&mut state, &aliases);
            Ok(state)
        })
    })
}

fn wire_step(graph: &mut Graph, step: &StepDeclaration, fall_through: NodeId) -> Result<()> {
    if !step.conditions.is_empty() {
        return wire_conditions(graph, step, fall_through);
    }

    if let Some(edge) = &step.edge {
        // Edge-only: value setter interposed unconditionally, END included
        let setter = format!("{}_value_setter", step.name);
        graph.add_node(NodeSpec {
            name: setter.clone(),
            kind: NodeKind::ValueSetter,
            executor: make_value_setter(edge.output.clone()),
        })?;
        graph.add_edge(step.name.clone(), setter.clone());
        graph.add_edge(setter, resolve_target(&edge.node));
        return Ok(());
    }

    graph.add_edge(step.name.clone(), fall_through);
    Ok(())
}

fn wire_conditions(graph: &mut Graph, step: &StepDeclaration, fall_through: NodeId) -> Result<()> {
    let mut compiled = Vec::with_capacity(step.conditions.len());
    let mut branches = Vec::new();

    for (index, condition) in step.conditions.iter().enumerate() {
        let setter = format!("{}_value_setter_{}", step.name, index);
        graph.add_node(NodeSpec {
            name: setter.clone(),
            kind: NodeKind::ValueSetter,
            executor: make_value_setter(condition.output.clone()),
        })?;
        graph.add_edge(setter.clone(), resolve_target(&condition.node));
        branches.push(setter.clone());
        compiled.push(CompiledCondition {
            value: condition.value.to_lowercase(),
            field: condition.field.clone(),
            setter,
        });
    }

    // No match: fall back to the declared edge, else to the next step
    let default_target = match &step.edge {
        Some(edge) => {
            let setter = format!("{}_value_setter", step.name);
            graph.add_node(NodeSpec {
                name: setter.clone(),
                kind: NodeKind::ValueSetter,
                executor: make_value_setter(edge.output.clone()),
            })?;
            graph.add_edge(setter.clone(), resolve_target(&edge.node));
            setter
        }
        None => fall_through,
    };
    branches.push(default_target.clone());

    let router: RouterFn = Arc::new(move |state| {
        for condition in &compiled {
            let matched = state
                .get(&condition.field)
                .and_then(|v| v.as_str())
                .map(|v| v.to_lowercase() == condition.value)
                .unwrap_or(false);
            if matched {
                return condition.setter.clone();
            }
        }
        default_target.clone()
    });

    graph.add_conditional_edge(step.name.clone(), router, branches);
    Ok(())
}
