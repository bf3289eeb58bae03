use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::layer::{StoreError, TileLayerInfo};

/// What happened to a descriptor, delivered to store listeners after the
/// on-disk state has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A descriptor was persisted for the first time.
    Created,
    /// An existing descriptor was replaced.
    Modified,
    /// A descriptor was deleted.
    Deleted,
}

/// Callback invoked with `(layer_id, event)` after successful mutations.
pub type StoreListener = Box<dyn Fn(&str, StoreEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct Registry {
    initialized: bool,
    descriptors: HashMap<String, TileLayerInfo>,
    ids_by_name: HashMap<String, String>,
}

/// Durable id↔name registry plus one descriptor file per tile layer id.
///
/// The store self-initializes lazily on first access by scanning its base
/// directory; a descriptor file that fails to parse is logged and skipped,
/// never aborting the load of the others. Writes are crash-safe: serialize
/// to a temporary file, parse that file back, atomically rename it over the
/// target, and only then update the in-memory index — the registry can never
/// point at a file that does not read back.
pub struct TileLayerStore {
    base_dir: PathBuf,
    registry: RwLock<Registry>,
    /// Serializes save/delete against each other; reads go through
    /// `registry` alone.
    write_lock: Mutex<()>,
    listeners: RwLock<Vec<StoreListener>>,
}

impl std::fmt::Debug for TileLayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayerStore")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl TileLayerStore {
    /// Creates a store over `base_dir`. Nothing is read until first access.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            registry: RwLock::new(Registry::default()),
            write_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Where descriptor files live.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Registers a listener for descriptor mutations.
    pub fn add_listener(&self, listener: StoreListener) {
        self.listeners
            .write()
            .expect("store listener lock poisoned")
            .push(listener);
    }

    fn notify(&self, id: &str, event: StoreEvent) {
        for listener in self
            .listeners
            .read()
            .expect("store listener lock poisoned")
            .iter()
        {
            listener(id, event);
        }
    }

    /// Scans the base directory and rebuilds the registry. Idempotent and
    /// safe to call concurrently; only the first call does work.
    pub fn initialize(&self) -> Result<(), StoreError> {
        {
            let registry = self.registry.read().expect("store registry poisoned");
            if registry.initialized {
                return Ok(());
            }
        }
        let mut registry = self.registry.write().expect("store registry poisoned");
        if registry.initialized {
            return Ok(());
        }

        fs::create_dir_all(&self.base_dir).map_err(|source| StoreError::Io {
            action: "create directory for",
            path: self.base_dir.clone(),
            source,
        })?;

        let entries = fs::read_dir(&self.base_dir).map_err(|source| StoreError::Io {
            action: "scan directory of",
            path: self.base_dir.clone(),
            source,
        })?;

        let mut loaded = 0_usize;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_descriptor(&path) {
                Ok(descriptor) => {
                    if let Some(previous) = registry
                        .ids_by_name
                        .insert(descriptor.name.clone(), descriptor.id.clone())
                    {
                        warn!(
                            "Duplicate tile layer name '{}' in store: replacing entry '{previous}' with '{}'",
                            descriptor.name, descriptor.id
                        );
                    }
                    registry
                        .descriptors
                        .insert(descriptor.id.clone(), descriptor);
                    loaded += 1;
                }
                Err(error) => {
                    warn!(
                        "Skipping unreadable tile layer descriptor {}: {error}",
                        path.display()
                    );
                }
            }
        }
        registry.initialized = true;
        info!(
            "Tile layer store initialized from {} with {loaded} layers",
            self.base_dir.display()
        );
        Ok(())
    }

    /// Descriptor lookup by id.
    pub fn layer_by_id(&self, id: &str) -> Result<Option<TileLayerInfo>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.descriptors.get(id).cloned())
    }

    /// Descriptor lookup by name: a registry hit followed by an id lookup.
    pub fn layer_by_name(&self, name: &str) -> Result<Option<TileLayerInfo>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry
            .ids_by_name
            .get(name)
            .and_then(|id| registry.descriptors.get(id))
            .cloned())
    }

    /// The id registered under `name`.
    pub fn layer_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.ids_by_name.get(name).cloned())
    }

    /// The name registered under `id`.
    pub fn layer_name(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.descriptors.get(id).map(|info| info.name.clone()))
    }

    /// Whether a descriptor with this id exists. Registry read only.
    pub fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.descriptors.contains_key(id))
    }

    /// All registered ids.
    pub fn layer_ids(&self) -> Result<Vec<String>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.descriptors.keys().cloned().collect())
    }

    /// All registered names.
    pub fn layer_names(&self) -> Result<Vec<String>, StoreError> {
        self.initialize()?;
        let registry = self.registry.read().expect("store registry poisoned");
        Ok(registry.ids_by_name.keys().cloned().collect())
    }

    /// Atomically persists a descriptor, returning the previous one.
    ///
    /// Rejects name collisions with a different live id before touching the
    /// disk. The two-phase write (temp file, read-back-verify, rename, index
    /// update) guarantees that a crash at any point leaves either the old or
    /// the new descriptor fully readable.
    pub fn save(&self, info: TileLayerInfo) -> Result<Option<TileLayerInfo>, StoreError> {
        self.initialize()?;
        info.validate().map_err(|message| StoreError::InvalidDescriptor {
            id: info.id.clone(),
            message,
        })?;
        let _serialized = self.write_lock.lock().expect("store write lock poisoned");

        let previous = {
            let registry = self.registry.read().expect("store registry poisoned");
            if let Some(existing_id) = registry.ids_by_name.get(&info.name)
                && *existing_id != info.id
            {
                return Err(StoreError::NameCollision {
                    name: info.name.clone(),
                    existing_id: existing_id.clone(),
                });
            }
            registry.descriptors.get(&info.id).cloned()
        };

        let path = self.descriptor_path(&info.id);
        let temp = path.with_extension("json.tmp");

        let payload = serde_json::to_vec_pretty(&info).map_err(|source| StoreError::Encode {
            id: info.id.clone(),
            source,
        })?;
        fs::write(&temp, &payload).map_err(|source| StoreError::Io {
            action: "write",
            path: temp.clone(),
            source,
        })?;

        // read the temp file back and make sure it parses before committing
        if let Err(source) = load_descriptor(&temp) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Verify { path: temp, source });
        }

        fs::rename(&temp, &path).map_err(|source| StoreError::Io {
            action: "commit",
            path: path.clone(),
            source,
        })?;

        {
            let mut registry = self.registry.write().expect("store registry poisoned");
            if let Some(previous) = &previous
                && previous.name != info.name
            {
                registry.ids_by_name.remove(&previous.name);
            }
            registry
                .ids_by_name
                .insert(info.name.clone(), info.id.clone());
            registry.descriptors.insert(info.id.clone(), info.clone());
        }

        let event = if previous.is_some() {
            StoreEvent::Modified
        } else {
            StoreEvent::Created
        };
        debug!("Saved tile layer descriptor '{}' ({event:?})", info.name);
        self.notify(&info.id, event);
        Ok(previous)
    }

    /// Removes a descriptor and its file. An unknown id yields `Ok(None)`;
    /// a missing file is not an error.
    pub fn delete(&self, id: &str) -> Result<Option<TileLayerInfo>, StoreError> {
        self.initialize()?;
        let _serialized = self.write_lock.lock().expect("store write lock poisoned");

        let removed = {
            let mut registry = self.registry.write().expect("store registry poisoned");
            let Some(info) = registry.descriptors.remove(id) else {
                return Ok(None);
            };
            registry.ids_by_name.remove(&info.name);
            info
        };

        let path = self.descriptor_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(source) if source.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    action: "delete",
                    path,
                    source,
                });
            }
        }
        debug!("Deleted tile layer descriptor '{}'", removed.name);
        self.notify(id, StoreEvent::Deleted);
        Ok(Some(removed))
    }

    fn descriptor_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_file_stem(id)))
    }
}

fn load_descriptor(path: &Path) -> Result<TileLayerInfo, serde_json::Error> {
    let contents = fs::read(path).map_err(|e| serde_json::Error::io(e))?;
    serde_json::from_slice(&contents)
}

/// Replaces every character unsafe for file names with `_`.
fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
