//! Unit registry.
//!
//! The registry owns [`UnitRecord`]s. Pollers only ever see cloned
//! snapshots from [`UnitRegistry::list_registered_units`]. Two
//! implementations are provided: [`MemoryRegistry`] for tests and embedding,
//! and [`FileRegistry`], which keeps units in a JSON file:
//!
//! ```json
//! {"units": [{"id": 1, "display_id": "Walk-in 1", "address": "10.0.0.5",
//!             "port": 8095, "api_key": "...", "position": 0}]}
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use coldwatch_types::{DEFAULT_API_PORT, UnitRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Source of the units to monitor.
pub trait UnitRegistry: Send + Sync {
    /// All registered units, ordered by position.
    fn list_registered_units(&self) -> Result<Vec<UnitRecord>>;
}

fn sort_units(units: &mut [UnitRecord]) {
    units.sort_by_key(|u| (u.position, u.id));
}

/// Registry held in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    units: RwLock<Vec<UnitRecord>>,
}

impl MemoryRegistry {
    /// Create a registry with `units`.
    pub fn new(units: Vec<UnitRecord>) -> Self {
        Self {
            units: RwLock::new(units),
        }
    }

    /// Replace all units.
    pub fn set_units(&self, units: Vec<UnitRecord>) {
        *self.units.write().unwrap_or_else(|e| e.into_inner()) = units;
    }
}

impl UnitRegistry for MemoryRegistry {
    fn list_registered_units(&self) -> Result<Vec<UnitRecord>> {
        let mut units = self
            .units
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        sort_units(&mut units);
        Ok(units)
    }
}

/// Fields supplied when registering a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit {
    /// User-facing name.
    pub display_id: String,
    /// Host name or IP address.
    pub address: String,
    /// API port.
    pub port: u16,
    /// API key.
    pub api_key: String,
}

impl NewUnit {
    /// A unit on the default port.
    pub fn new(
        display_id: impl Into<String>,
        address: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            display_id: display_id.into(),
            address: address.into(),
            port: DEFAULT_API_PORT,
            api_key: api_key.into(),
        }
    }

    /// Set the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    units: Vec<UnitRecord>,
}

/// Check a record before it is stored.
fn validate(unit: &UnitRecord, others: &[UnitRecord]) -> Result<()> {
    if unit.display_id.trim().is_empty() {
        return Err(Error::invalid_unit("display id cannot be empty"));
    }
    unit.base_url(Default::default())?;

    let name = unit.display_id.trim().to_lowercase();
    if others
        .iter()
        .any(|other| other.id != unit.id && other.display_id.trim().to_lowercase() == name)
    {
        return Err(Error::invalid_unit(format!(
            "a unit named '{}' already exists",
            unit.display_id.trim()
        )));
    }
    Ok(())
}

/// Registry stored as a JSON file.
///
/// Writes go to a temporary file that is then renamed over the original.
/// Read-modify-write cycles are serialized within the process.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    /// Use the registry file at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<UnitRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| Error::RegistryRead {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: RegistryFile =
            serde_json::from_str(&content).map_err(|source| Error::RegistryFormat {
                path: self.path.clone(),
                source,
            })?;
        let mut units = file.units;
        sort_units(&mut units);
        Ok(units)
    }

    fn save(&self, units: &[UnitRecord]) -> Result<()> {
        let write_err = |source| Error::RegistryWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let file = RegistryFile {
            units: units.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| Error::RegistryFormat {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        debug!("Saved {} units to {}", units.len(), self.path.display());
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<UnitRecord>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut units = self.load()?;
        let result = f(&mut units)?;
        sort_units(&mut units);
        self.save(&units)?;
        Ok(result)
    }

    /// All units, ordered by position.
    pub fn list(&self) -> Result<Vec<UnitRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    /// The unit with `id`.
    pub fn get(&self, id: u64) -> Result<UnitRecord> {
        self.list()?
            .into_iter()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::unit_not_found(id.to_string()))
    }

    /// Find a unit by numeric id or, failing that, by display id
    /// (case-insensitive).
    pub fn find(&self, query: &str) -> Result<UnitRecord> {
        let units = self.list()?;
        let query = query.trim();
        if let Ok(id) = query.parse::<u64>()
            && let Some(unit) = units.iter().find(|u| u.id == id)
        {
            return Ok(unit.clone());
        }
        let lower = query.to_lowercase();
        units
            .into_iter()
            .find(|u| u.display_id.trim().to_lowercase() == lower)
            .ok_or_else(|| Error::unit_not_found(query))
    }

    /// Register a unit. Assigns the next id and places it last.
    pub fn add(&self, new: NewUnit) -> Result<UnitRecord> {
        let unit = self.modify(|units| {
            let id = units.iter().map(|u| u.id).max().unwrap_or(0) + 1;
            let position = units
                .iter()
                .map(|u| u.position + 1)
                .max()
                .unwrap_or(0);
            let unit = UnitRecord {
                id,
                display_id: new.display_id.trim().to_string(),
                address: new.address.trim().to_string(),
                port: new.port,
                api_key: new.api_key.trim().to_string(),
                position,
            };
            validate(&unit, units)?;
            units.push(unit.clone());
            Ok(unit)
        })?;
        info!("Registered unit {} ({})", unit.display_id, unit.id);
        Ok(unit)
    }

    /// Replace a unit's connection details. Its position is kept.
    pub fn update(&self, unit: UnitRecord) -> Result<UnitRecord> {
        self.modify(|units| {
            let index = units
                .iter()
                .position(|u| u.id == unit.id)
                .ok_or_else(|| Error::unit_not_found(unit.id.to_string()))?;
            let updated = UnitRecord {
                display_id: unit.display_id.trim().to_string(),
                address: unit.address.trim().to_string(),
                api_key: unit.api_key.trim().to_string(),
                position: units[index].position,
                ..unit
            };
            validate(&updated, units)?;
            units[index] = updated.clone();
            Ok(updated)
        })
    }

    /// Remove a unit.
    pub fn remove(&self, id: u64) -> Result<UnitRecord> {
        let removed = self.modify(|units| {
            let index = units
                .iter()
                .position(|u| u.id == id)
                .ok_or_else(|| Error::unit_not_found(id.to_string()))?;
            Ok(units.remove(index))
        })?;
        info!("Removed unit {} ({})", removed.display_id, removed.id);
        Ok(removed)
    }

    /// Put the listed units first, in the given order; the rest follow in
    /// their current order. Positions are renumbered from 0.
    pub fn reorder(&self, ordered_ids: &[u64]) -> Result<Vec<UnitRecord>> {
        self.modify(|units| {
            if let Some(missing) = ordered_ids
                .iter()
                .find(|id| !units.iter().any(|u| u.id == **id))
            {
                return Err(Error::unit_not_found(missing.to_string()));
            }

            let mut ordered: Vec<UnitRecord> = Vec::with_capacity(units.len());
            for id in ordered_ids {
                if !ordered.iter().any(|u| u.id == *id)
                    && let Some(unit) = units.iter().find(|u| u.id == *id)
                {
                    ordered.push(unit.clone());
                }
            }
            for unit in units.iter() {
                if !ordered.iter().any(|u| u.id == unit.id) {
                    ordered.push(unit.clone());
                }
            }
            for (index, unit) in ordered.iter_mut().enumerate() {
                unit.position = index as u32;
            }
            *units = ordered.clone();
            Ok(ordered)
        })
    }

    /// Move one unit to `index` in the list (clamped to the end).
    pub fn move_to(&self, id: u64, index: usize) -> Result<Vec<UnitRecord>> {
        let mut ids: Vec<u64> = self.list()?.iter().map(|u| u.id).collect();
        let from = ids
            .iter()
            .position(|u| *u == id)
            .ok_or_else(|| Error::unit_not_found(id.to_string()))?;
        ids.remove(from);
        ids.insert(index.min(ids.len()), id);
        self.reorder(&ids)
    }
}

impl UnitRegistry for FileRegistry {
    fn list_registered_units(&self) -> Result<Vec<UnitRecord>> {
        self.list()
    }
}
