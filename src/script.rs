//! Scripts: a declaration, the initial data and a list of setter calls.
//!
//! ```yaml
//! declaration:
//!   - name: total
//!     getter: [size, [get, [root], items]]
//!   - name: setItem
//!     setter: [items, [arg, 0]]
//! data: {items: [1, 2]}
//! steps:
//!   - {op: set, setter: setItem, args: [2], value: 3}
//! ```
//!
//! Running a script records the getter snapshot after the initial build and
//! after every step.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;

use crate::ast::Model;
use crate::backend::Backend;
use crate::declaration::{DeclarationEntry, from_entries};
use crate::runtime::{Instance, Value};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub declaration: Vec<DeclarationEntry>,
    #[serde(default)]
    pub data: Json,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Set {
        setter: String,
        #[serde(default)]
        args: Vec<Json>,
        value: Json,
    },
    /// A `set` setter called without a value.
    Delete {
        setter: String,
        #[serde(default)]
        args: Vec<Json>,
    },
    Splice {
        setter: String,
        #[serde(default)]
        args: Vec<Json>,
        #[serde(default)]
        removed: usize,
        #[serde(default)]
        items: Vec<Json>,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, setter, args) = match self {
            Step::Set { setter, args, .. } => ("set", setter, args),
            Step::Delete { setter, args } => ("delete", setter, args),
            Step::Splice { setter, args, .. } => ("splice", setter, args),
        };
        let args = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{verb} {setter}({args})")
    }
}

/// Outcome of a script: the live instance and one snapshot per state.
pub struct Run {
    pub instance: Instance,
    pub snapshots: Vec<Json>,
}

impl Script {
    pub fn parse(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("Parsing script")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source =
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("Loading {}", path.display()))
    }

    pub fn model(&self) -> Result<Model> {
        from_entries(self.declaration.clone()).context("Loading script declaration")
    }

    pub fn run(&self, backend: &dyn Backend) -> Result<Run> {
        let model = self.model()?;
        let mut instance = backend
            .run(&model, &self.data)
            .with_context(|| format!("Starting {} backend", backend.name()))?;
        let mut snapshots = vec![instance.snapshot()];
        for (index, step) in self.steps.iter().enumerate() {
            apply(&mut instance, step)
                .with_context(|| format!("Step {} ({step})", index + 1))?;
            snapshots.push(instance.snapshot());
        }
        tracing::debug!(
            backend = backend.name(),
            steps = self.steps.len(),
            "script finished"
        );
        Ok(Run {
            instance,
            snapshots,
        })
    }
}

fn values(args: &[Json]) -> Vec<Value> {
    args.iter().map(Value::from_json).collect()
}

fn apply(instance: &mut Instance, step: &Step) -> Result<()> {
    match step {
        Step::Set {
            setter,
            args,
            value,
        } => instance.set(setter, &values(args), Some(Value::from_json(value)))?,
        Step::Delete { setter, args } => instance.set(setter, &values(args), None)?,
        Step::Splice {
            setter,
            args,
            removed,
            items,
        } => instance.splice(setter, &values(args), *removed, values(items))?,
    }
    Ok(())
}
