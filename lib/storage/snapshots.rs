use tracing::warn;

use super::filename::{module_prefix, FileInfo, FileKind};
use super::{ObjectStore, StorageError};
use crate::block::{Range, Ranges};

/// Store snapshot ranges found for one module, each sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshots {
    pub completes: Ranges,
    pub partials: Ranges,
}

impl Snapshots {
    /// Classifies artifact file names; anything that is not a store snapshot is ignored.
    pub fn from_file_infos(infos: impl IntoIterator<Item = FileInfo>) -> Self {
        let mut out = Snapshots::default();
        for info in infos {
            match info.kind {
                FileKind::Complete => out.completes.push(info.range),
                FileKind::Partial => out.partials.push(info.range),
                FileKind::Output => {}
            }
        }
        out.sort();
        out
    }

    pub fn sort(&mut self) {
        self.completes.sort();
        self.partials.sort();
    }

    /// Complete snapshot reaching furthest without passing `block_num`.
    pub fn last_complete_before(&self, block_num: u64) -> Option<Range> {
        self.completes
            .iter()
            .filter(|range| range.exclusive_end_block() <= block_num)
            .max_by_key(|range| range.exclusive_end_block())
            .copied()
    }

    /// True when the complete snapshot `[start_block, exclusive_end_block)` is listed.
    pub fn has_complete(&self, start_block: u64, exclusive_end_block: u64) -> bool {
        self.completes.iter().any(|range| {
            range.start_block() == start_block && range.exclusive_end_block() == exclusive_end_block
        })
    }
}

/// Lists and parses one module's artifacts of `kind`.
///
/// Unparseable names are logged and skipped so a stray file never blocks planning.
pub async fn list_file_infos(
    object_store: &dyn ObjectStore,
    module: &str,
    kind: FileKind,
) -> Result<Vec<FileInfo>, StorageError> {
    let prefix = module_prefix(module, kind);
    let keys = object_store.list(&prefix).await?;

    let mut infos = Vec::with_capacity(keys.len());
    for key in keys {
        let name = key.rsplit('/').next().unwrap_or(key.as_str());
        match name.parse::<FileInfo>() {
            Ok(info) if info.kind.directory() == kind.directory() => infos.push(info),
            Ok(_) => {}
            Err(err) => {
                warn!(
                    event = "artifact_name_skipped",
                    module,
                    key = %key,
                    error = %err,
                    "skipping unrecognized artifact"
                );
            }
        }
    }
    Ok(infos)
}

pub async fn load_store_snapshots(
    object_store: &dyn ObjectStore,
    module: &str,
) -> Result<Snapshots, StorageError> {
    let infos = list_file_infos(object_store, module, FileKind::Partial).await?;
    Ok(Snapshots::from_file_infos(infos))
}

pub async fn load_map_outputs(
    object_store: &dyn ObjectStore,
    module: &str,
) -> Result<Ranges, StorageError> {
    let mut outputs: Ranges = list_file_infos(object_store, module, FileKind::Output)
        .await?
        .into_iter()
        .map(|info| info.range)
        .collect();
    outputs.sort();
    Ok(outputs)
}
