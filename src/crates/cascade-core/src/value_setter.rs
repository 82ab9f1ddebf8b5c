//! Value-transformation node factory
//!
//! A value setter is a small pure function that applies an alias map to the
//! state record: for each `(alias, source)` pair, the field named `source` is
//! copied into `alias` when it exists on the state (an explicit null still
//! counts as present); otherwise `source` itself is assigned to `alias` as a
//! literal string. Absence is the literal-value case, not an error - a value
//! setter never fails on missing optional fields. All other fields pass
//! through unchanged.
//!
//! The compiler interposes these nodes at every routing boundary that carries
//! an output mapping.

use serde_json::Value;
use std::sync::Arc;

use crate::config::AliasMap;
use crate::graph::NodeExecutor;

/// Apply an alias map to a state record in place
pub fn apply_aliases(state: &mut Value, aliases: &AliasMap) {
    let Some(record) = state.as_object_mut() else {
        return;
    };
    for (alias, source) in aliases {
        let value = match record.get(source) {
            Some(existing) => existing.clone(),
            None => Value::String(source.clone()),
        };
        record.insert(alias.clone(), value);
    }
}

/// Build the executor for a value-setter node
pub fn make_value_setter(aliases: AliasMap) -> NodeExecutor {
    let aliases = Arc::new(aliases);
    Arc::new(move |mut state| {
        let aliases = Arc::clone(&aliases);
        Box::pin(async move {
            apply_aliases(&mut state, &aliases);
            Ok(state)
        })
    })
}
