use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{constants::REGISTRY_FILE_NAME, error::NameServiceError};

/// Name to address map, optionally persisted in a storage directory.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, String>,
    path: Option<PathBuf>,
}

impl Registry {
    /// An empty registry that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the registry kept in `storage_dir`, creating the directory if needed.
    ///
    /// An unreadable registry file is logged and replaced by an empty registry.
    pub fn open(storage_dir: &Path) -> Result<Self, NameServiceError> {
        fs::create_dir_all(storage_dir)?;
        let path = storage_dir.join(REGISTRY_FILE_NAME);

        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable registry {}: {err}", path.display());
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!("Loaded {} registrations from {}", entries.len(), path.display());

        Ok(Self {
            entries,
            path: Some(path),
        })
    }

    pub fn register(&mut self, name: &str, address: &str) -> Result<(), NameServiceError> {
        self.entries.insert(name.to_string(), address.to_string());
        self.persist()
    }

    /// Removes `name`; returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> Result<bool, NameServiceError> {
        if self.entries.remove(name).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn persist(&self) -> Result<(), NameServiceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
