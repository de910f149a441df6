//! Module artifact storage: filename grammar, the object-store port and reconciliation of
//! cached snapshots against a request's target block.

mod error;
mod filename;
mod object_store;
mod snapshots;
mod state;

pub use error::StorageError;
pub use filename::{module_prefix, FileInfo, FileKind};
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use snapshots::{list_file_infos, load_map_outputs, load_store_snapshots, Snapshots};
pub use state::{
    fetch_map_state, fetch_store_state, MapStorageState, ModuleStorageState, StoreStorageState,
};
