use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;

use super::StorageError;

/// Opaque blob store holding module artifacts.
///
/// Keys are `/`-separated paths. Listings may lag behind writes; callers only rely on keys
/// being immutable once written.
pub trait ObjectStore: Send + Sync {
    /// Returns every key starting with `prefix`, sorted.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>>;

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>>;

    fn put<'a>(&'a self, path: &'a str, bytes: Vec<u8>)
        -> BoxFuture<'a, Result<(), StorageError>>;
}

impl<T> ObjectStore for Arc<T>
where
    T: ObjectStore + ?Sized,
{
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        (**self).list(prefix)
    }

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        (**self).get(path)
    }

    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        (**self).put(path, bytes)
    }
}

/// Process-local store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        Box::pin(async move {
            let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(objects
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        Box::pin(async move {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(path.to_string()))
        })
    }

    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.to_string(), bytes);
            Ok(())
        })
    }
}

/// Store rooted at a local directory. Prefixes passed to `list` must name a directory
/// (end with `/`).
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for FsObjectStore {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        Box::pin(async move {
            let dir = self.root.join(prefix);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(StorageError::io(prefix, err)),
            };

            let mut keys = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| StorageError::io(prefix, err))?
            {
                let is_file = entry
                    .file_type()
                    .await
                    .map_err(|err| StorageError::io(prefix, err))?
                    .is_file();
                if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                    if !name.starts_with('.') {
                        keys.push(format!("{prefix}{name}"));
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
    }

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        Box::pin(async move {
            match tokio::fs::read(self.root.join(path)).await {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    Err(StorageError::NotFound(path.to_string()))
                }
                Err(err) => Err(StorageError::io(path, err)),
            }
        })
    }

    /// Writes through a hidden temporary file and renames it into place so readers never
    /// observe a torn artifact.
    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let target = self.root.join(path);
            let parent = target
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| self.root.clone());
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|err| StorageError::io(path, err))?;

            let file_name = target
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| StorageError::InvalidFilename(path.to_string()))?;
            let tmp = parent.join(format!(".{file_name}.tmp"));
            tokio::fs::write(&tmp, bytes)
                .await
                .map_err(|err| StorageError::io(path, err))?;
            tokio::fs::rename(&tmp, &target)
                .await
                .map_err(|err| StorageError::io(path, err))
        })
    }
}
