//! Validated, acyclic module graph restricted to what the requested output needs.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{UpdatePolicy, ValueType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("module {0:?} is declared more than once")]
    DuplicateModule(String),
    #[error("module {module:?} reads unknown module {input:?}")]
    UnknownInput { module: String, input: String },
    #[error("module {module:?} reads {input:?} as a {expected} input but it is not one")]
    InputKindMismatch {
        module: String,
        input: String,
        expected: &'static str,
    },
    #[error("dependency cycle through module {0:?}")]
    Cycle(String),
    #[error("output module {0:?} is not declared")]
    UnknownOutput(String),
    #[error("invalid graph definition: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleKind {
    Map,
    Store {
        value_type: ValueType,
        update_policy: UpdatePolicy,
    },
}

/// One upstream edge. Source inputs (blocks, clocks) never produce job dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleInput {
    Source(String),
    Map(String),
    Store(String),
}

impl ModuleInput {
    /// Upstream module name, `None` for sources.
    pub fn module(&self) -> Option<&str> {
        match self {
            ModuleInput::Source(_) => None,
            ModuleInput::Map(name) | ModuleInput::Store(name) => Some(name.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(flatten)]
    pub kind: ModuleKind,
    #[serde(default)]
    pub initial_block: u64,
    #[serde(default)]
    pub inputs: Vec<ModuleInput>,
}

impl Module {
    pub fn is_store(&self) -> bool {
        matches!(self.kind, ModuleKind::Store { .. })
    }
}

#[derive(Debug, Deserialize)]
struct GraphFile {
    output_module: String,
    modules: Vec<Module>,
}

#[derive(Debug, Clone)]
pub struct ModuleGraph {
    output_module: String,
    /// Ancestors of the output (and the output itself), dependencies first.
    ordered: Vec<Module>,
    index: HashMap<String, usize>,
    distances: HashMap<String, u32>,
}

impl ModuleGraph {
    pub fn new(modules: Vec<Module>, output_module: &str) -> Result<Self, GraphError> {
        let mut by_name: HashMap<String, Module> = HashMap::with_capacity(modules.len());
        for module in modules {
            if by_name.contains_key(&module.name) {
                return Err(GraphError::DuplicateModule(module.name));
            }
            by_name.insert(module.name.clone(), module);
        }

        for module in by_name.values() {
            for input in &module.inputs {
                let (name, wants_store, expected) = match input {
                    ModuleInput::Source(_) => continue,
                    ModuleInput::Map(name) => (name, false, "map"),
                    ModuleInput::Store(name) => (name, true, "store"),
                };
                let upstream = by_name.get(name).ok_or_else(|| GraphError::UnknownInput {
                    module: module.name.clone(),
                    input: name.clone(),
                })?;
                if upstream.is_store() != wants_store {
                    return Err(GraphError::InputKindMismatch {
                        module: module.name.clone(),
                        input: name.clone(),
                        expected,
                    });
                }
            }
        }

        if !by_name.contains_key(output_module) {
            return Err(GraphError::UnknownOutput(output_module.to_string()));
        }

        let order = topological_ancestors(&by_name, output_module)?;
        let distances = distances_to_output(&by_name, output_module);

        let mut ordered = Vec::with_capacity(order.len());
        let mut index = HashMap::with_capacity(order.len());
        for name in order {
            if let Some(module) = by_name.remove(&name) {
                index.insert(name, ordered.len());
                ordered.push(module);
            }
        }

        Ok(Self {
            output_module: output_module.to_string(),
            ordered,
            index,
            distances,
        })
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        let file: GraphFile =
            serde_json::from_slice(bytes).map_err(|err| GraphError::Decode(err.to_string()))?;
        Self::new(file.modules, &file.output_module)
    }

    pub fn output_module(&self) -> &str {
        &self.output_module
    }

    /// Modules needed by the output, dependencies before dependents.
    pub fn modules(&self) -> &[Module] {
        &self.ordered
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.index.get(name).map(|&idx| &self.ordered[idx])
    }

    /// Shortest number of edges from `name` down to the output module.
    pub fn distance_to_output(&self, name: &str) -> Option<u32> {
        self.distances.get(name).copied()
    }

    /// Needed modules reading `name` as a map or store input.
    pub fn dependents<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Module> + 'a {
        self.ordered
            .iter()
            .filter(move |module| module.inputs.iter().any(|input| input.module() == Some(name)))
    }
}

fn topological_ancestors(
    by_name: &HashMap<String, Module>,
    output_module: &str,
) -> Result<Vec<String>, GraphError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        by_name: &HashMap<String, Module>,
        marks: &mut HashMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(GraphError::Cycle(name.to_string())),
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        if let Some(module) = by_name.get(name) {
            for upstream in module.inputs.iter().filter_map(ModuleInput::module) {
                visit(upstream, by_name, marks, order)?;
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    visit(output_module, by_name, &mut marks, &mut order)?;
    Ok(order)
}

fn distances_to_output(by_name: &HashMap<String, Module>, output_module: &str) -> HashMap<String, u32> {
    let mut distances = HashMap::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(output_module.to_string(), 0u32)]);
    while let Some((name, distance)) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(module) = by_name.get(&name) {
            for upstream in module.inputs.iter().filter_map(ModuleInput::module) {
                queue.push_back((upstream.to_string(), distance + 1));
            }
        }
        distances.insert(name, distance);
    }
    distances
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn map(name: &str, initial_block: u64, inputs: Vec<ModuleInput>) -> Module {
        Module {
            name: name.to_string(),
            kind: ModuleKind::Map,
            initial_block,
            inputs,
        }
    }

    pub(crate) fn store(name: &str, initial_block: u64, inputs: Vec<ModuleInput>) -> Module {
        Module {
            name: name.to_string(),
            kind: ModuleKind::Store {
                value_type: ValueType::Int64,
                update_policy: UpdatePolicy::Add,
            },
            initial_block,
            inputs,
        }
    }

    pub(crate) fn source() -> ModuleInput {
        ModuleInput::Source("sf.substreams.v1.Clock".to_string())
    }

    /// `blocks -> map_transfers -> store_balances -> map_output`
    pub(crate) fn linear_graph(initial_block: u64) -> ModuleGraph {
        ModuleGraph::new(
            vec![
                map("map_transfers", initial_block, vec![source()]),
                store(
                    "store_balances",
                    initial_block,
                    vec![ModuleInput::Map("map_transfers".to_string())],
                ),
                map(
                    "map_output",
                    initial_block,
                    vec![
                        ModuleInput::Map("map_transfers".to_string()),
                        ModuleInput::Store("store_balances".to_string()),
                    ],
                ),
            ],
            "map_output",
        )
        .expect("linear fixture graph is valid")
    }
}
