use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::block::{Range, RangeError};
use crate::graph::{ModuleGraph, ModuleKind};
use crate::storage::{
    FileInfo, FileKind, ModuleStorageState, ObjectStore, StorageError, StoreStorageState,
};
use crate::store::{MergeError, Store, UpdatePolicy, ValueType};

#[derive(Debug, Error)]
pub enum SquashError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("module {module}: cannot squash partial {range}: {source}")]
    Merge {
        module: String,
        range: Range,
        #[source]
        source: MergeError,
    },
    #[error("module {0:?} is not registered for squashing")]
    UnknownModule(String),
}

struct SquashTarget {
    initial_block: u64,
    value_type: ValueType,
    update_policy: UpdatePolicy,
    /// In-memory copy of the complete snapshot ending at `complete_end`, loaded on first use.
    complete: Option<Store>,
    complete_end: u64,
    /// Partials on storage not yet folded in, keyed by start block.
    pending: BTreeMap<u64, Range>,
}

/// Folds partial store snapshots into the next complete snapshot as soon as they chain
/// contiguously onto the last one, writing `<initial>-<end>.kv` at every step.
pub struct Squasher {
    object_store: Arc<dyn ObjectStore>,
    targets: BTreeMap<String, SquashTarget>,
}

impl Squasher {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            targets: BTreeMap::new(),
        }
    }

    /// Seeds a store module from its reconciled state: the last complete snapshot is the
    /// starting point and partials already present are queued for folding.
    pub fn register(
        &mut self,
        value_type: ValueType,
        update_policy: UpdatePolicy,
        state: &StoreStorageState,
    ) {
        let pending = state
            .partials_present
            .iter()
            .map(|range| (range.start_block(), *range))
            .collect();
        self.targets.insert(
            state.module_name.clone(),
            SquashTarget {
                initial_block: state.module_initial_block,
                value_type,
                update_policy,
                complete: None,
                complete_end: state.ready_up_to_block(),
                pending,
            },
        );
    }

    /// Registers every store module of `graph` that has a reconciled state.
    pub fn register_graph(
        &mut self,
        graph: &ModuleGraph,
        states: &BTreeMap<String, ModuleStorageState>,
    ) {
        for module in graph.modules() {
            if let (
                ModuleKind::Store {
                    value_type,
                    update_policy,
                },
                Some(ModuleStorageState::Store(state)),
            ) = (&module.kind, states.get(&module.name))
            {
                self.register(value_type.clone(), *update_policy, state);
            }
        }
    }

    /// End block of the latest complete snapshot for `module`.
    pub fn squashed_up_to(&self, module: &str) -> Option<u64> {
        self.targets.get(module).map(|target| target.complete_end)
    }

    /// Records a freshly written partial and squashes whatever became contiguous.
    /// Returns the partial ranges folded in by this call.
    pub async fn add_partial(
        &mut self,
        module: &str,
        range: Range,
    ) -> Result<Vec<Range>, SquashError> {
        let target = self
            .targets
            .get_mut(module)
            .ok_or_else(|| SquashError::UnknownModule(module.to_string()))?;
        target.pending.insert(range.start_block(), range);
        squash_contiguous(self.object_store.as_ref(), module, target).await
    }

    /// Squashes every registered module as far as its partials allow. Gaps left behind
    /// are logged, not treated as errors.
    pub async fn squash_all(&mut self) -> Result<Vec<(String, Range)>, SquashError> {
        let mut squashed = Vec::new();
        for (module, target) in self.targets.iter_mut() {
            for range in squash_contiguous(self.object_store.as_ref(), module, target).await? {
                squashed.push((module.clone(), range));
            }
            if let Some(next) = target.pending.values().next() {
                warn!(
                    event = "squash_gap",
                    module = %module,
                    squashed_up_to = target.complete_end,
                    next_partial = %next,
                    "partials left unsquashed after a gap"
                );
            }
        }
        Ok(squashed)
    }
}

async fn squash_contiguous(
    object_store: &dyn ObjectStore,
    module: &str,
    target: &mut SquashTarget,
) -> Result<Vec<Range>, SquashError> {
    let mut squashed = Vec::new();
    while let Some(partial_range) = target.pending.remove(&target.complete_end) {
        let mut complete = match target.complete.take() {
            Some(store) => store,
            None => load_complete(object_store, module, target).await?,
        };

        let partial_path = FileInfo::new(partial_range, FileKind::Partial).path(module);
        let partial_bytes = object_store.get(&partial_path).await?;
        let partial = Store::from_bytes(module, &partial_bytes).map_err(StorageError::from)?;
        if let Err(source) = complete.merge(&partial) {
            target.pending.insert(partial_range.start_block(), partial_range);
            target.complete = Some(complete);
            return Err(SquashError::Merge {
                module: module.to_string(),
                range: partial_range,
                source,
            });
        }

        let complete_range = Range::new(target.initial_block, partial_range.exclusive_end_block())?;
        let complete_path = FileInfo::new(complete_range, FileKind::Complete).path(module);
        let bytes = complete.to_bytes().map_err(StorageError::from)?;
        object_store.put(&complete_path, bytes).await?;

        info!(
            event = "store_squashed",
            module,
            partial = %partial_range,
            complete = %complete_range,
            keys = complete.len(),
            "squashed partial into complete snapshot"
        );

        target.complete_end = partial_range.exclusive_end_block();
        target.complete = Some(complete);
        squashed.push(partial_range);
    }
    Ok(squashed)
}

async fn load_complete(
    object_store: &dyn ObjectStore,
    module: &str,
    target: &SquashTarget,
) -> Result<Store, SquashError> {
    if target.complete_end <= target.initial_block {
        return Ok(Store::new(
            module,
            target.value_type.clone(),
            target.update_policy,
        ));
    }
    let range = Range::new(target.initial_block, target.complete_end)?;
    let path = FileInfo::new(range, FileKind::Complete).path(module);
    let bytes = object_store.get(&path).await?;
    Ok(Store::from_bytes(module, &bytes).map_err(StorageError::from)?)
}
