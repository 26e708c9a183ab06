//! Process-wide settings.
//!
//! [`init`] runs the whole startup chain once: deprecated env names are
//! migrated, a legacy `app.ini` is rewritten, then the file is mapped onto
//! the section defaults, overlaid from the environment and validated.  The
//! result lives behind [`settings()`] for the rest of the process.
//!
//! Readers get copies.  Writers (`update`, `reload`, `save`) swap a whole new
//! registry in under the lock, so a reader sees either the old or the new
//! state of a section, never a mix.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::{info, warn};

use crate::config::{AnySection, Registered, Registry, SECTION_NAMES};
use crate::env::{migrate_deprecated_env, overlay, overlay_section, Environment, ProcessEnv, ENV_PREFIX};
use crate::errors::SettingsError;
use crate::ini::IniFile;
use crate::migrate::{migrate_file, MigrationOutcome};
use crate::schema::Section;
use crate::validate::{validate, validate_section};

/// Settings file inside the data directory.
pub const CONFIG_FILE: &str = "app.ini";

/// Fallback read when [`CONFIG_FILE`] does not exist. Never written.
pub const EXAMPLE_FILE: &str = "app.example.ini";

struct State {
    registry: Arc<Registry>,
    /// Last file model read from disk; keeps unknown keys for `save`.
    file: IniFile,
    /// File the current state was read from.
    source: PathBuf,
}

/// Loaded settings plus the file they are persisted to.
pub struct Settings {
    data_dir: PathBuf,
    path: PathBuf,
    prefix: String,
    env: Mutex<Box<dyn Environment + Send>>,
    state: RwLock<State>,
    /// Serializes `save` and `reload`.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("data_dir", &self.data_dir)
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load settings from `data_dir` using the process environment.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        Self::load_with_env(data_dir, ProcessEnv, ENV_PREFIX)
    }

    /// Load settings from `data_dir` with an explicit environment and
    /// variable prefix.
    pub fn load_with_env(
        data_dir: impl Into<PathBuf>,
        env: impl Environment + Send + 'static,
        prefix: &str,
    ) -> Result<Self, SettingsError> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE);
        let mut env: Box<dyn Environment + Send> = Box::new(env);

        migrate_deprecated_env(env.as_mut(), prefix);

        let mut source = resolve_source(&data_dir);
        if migrate_file(&source, &path)? == MigrationOutcome::Migrated {
            source = path.clone();
        }

        let (file, registry) = build(&source, env.as_ref(), prefix)?;
        info!("settings loaded from {}", source.display());

        Ok(Self {
            data_dir,
            path,
            prefix: prefix.to_string(),
            env: Mutex::new(env),
            state: RwLock::new(State {
                registry: Arc::new(registry),
                file,
                source,
            }),
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `app.ini` inside the data directory; the only file ever written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File the current values were read from.
    pub fn source(&self) -> PathBuf {
        self.read_state().source.clone()
    }

    /// Consistent view of every section, stored values as-is.
    pub fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.read_state().registry)
    }

    /// Typed copy of a section.
    pub fn get<T: Registered>(&self) -> T {
        let mut section = self
            .snapshot()
            .get::<T>()
            .cloned()
            .unwrap_or_default();
        section.on_read();
        section
    }

    /// Copy of the section called `name`.
    pub fn get_by_name(&self, name: &str) -> Result<AnySection, SettingsError> {
        let mut section = self
            .snapshot()
            .section(name)
            .cloned()
            .ok_or_else(|| SettingsError::UnknownSection(name.to_string()))?;
        section.on_read();
        Ok(section)
    }

    /// Typed copy of a section with protected fields cleared, for anything
    /// that leaves the process.
    pub fn redacted<T: Registered>(&self) -> T {
        let mut section = self.get::<T>();
        section.redact();
        section
    }

    pub fn redacted_by_name(&self, name: &str) -> Result<AnySection, SettingsError> {
        let mut section = self.get_by_name(name)?;
        section.redact();
        Ok(section)
    }

    /// JSON view of a section. Protected fields included.
    pub fn get_json(&self, name: &str) -> Result<serde_json::Value, SettingsError> {
        Ok(to_json(&self.get_by_name(name)?))
    }

    /// JSON view of a section with protected fields cleared.
    pub fn redacted_json(&self, name: &str) -> Result<serde_json::Value, SettingsError> {
        Ok(to_json(&self.redacted_by_name(name)?))
    }

    /// Replace a section in memory. Call [`Settings::save`] to persist it.
    pub fn update(&self, section: impl Into<AnySection>) -> Result<(), SettingsError> {
        let section = section.into();
        let _guard = self.write_lock.lock().expect("settings write lock poisoned");
        let mut state = self.write_state();
        let mut registry = (*state.registry).clone();
        registry.replace(section)?;
        state.registry = Arc::new(registry);
        Ok(())
    }

    /// Re-read the file and refresh the section called `name`.
    pub fn reload(&self, name: &str) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().expect("settings write lock poisoned");
        let source = resolve_source(&self.data_dir);
        let file = IniFile::load(&source)?;

        let mut section = AnySection::default_for(name)
            .ok_or_else(|| SettingsError::UnknownSection(name.to_string()))?;
        section.map_from_ini(&file)?;
        {
            let env = self.env.lock().expect("settings env lock poisoned");
            overlay_section(&mut section, env.as_ref(), &self.prefix)?;
        }
        validate_section(&section)?;

        let mut state = self.write_state();
        let mut registry = (*state.registry).clone();
        registry.replace(section)?;
        state.registry = Arc::new(registry);
        state.file = file;
        state.source = source;
        info!("settings section [{}] reloaded", name);
        Ok(())
    }

    /// Write the current values to `app.ini` atomically, then load again
    /// from it.
    ///
    /// Values are validated before anything is written; on error the file
    /// on disk is unchanged. Sections are written in registration order,
    /// followed by any blocks the file carries that nothing registers.
    pub fn save(&self) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().expect("settings write lock poisoned");
        let (registry, mut file) = {
            let state = self.read_state();
            (Arc::clone(&state.registry), state.file.reordered(SECTION_NAMES))
        };

        validate(&registry)?;
        for section in registry.iter() {
            section.reflect_to_ini(&mut file);
        }
        file.save(&self.path)?;
        info!("settings saved to {}", self.path.display());

        let (file, registry) = {
            let env = self.env.lock().expect("settings env lock poisoned");
            build(&self.path, env.as_ref(), &self.prefix)?
        };
        let mut state = self.write_state();
        state.registry = Arc::new(registry);
        state.file = file;
        state.source = self.path.clone();
        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().expect("settings lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().expect("settings lock poisoned")
    }
}

/// `app.ini` when it exists, else `app.example.ini` when that exists, else
/// `app.ini` (read as empty).
pub fn resolve_source(data_dir: &Path) -> PathBuf {
    let path = data_dir.join(CONFIG_FILE);
    if path.exists() {
        return path;
    }
    let example = data_dir.join(EXAMPLE_FILE);
    if example.exists() {
        warn!(
            "{} not found, reading {}",
            path.display(),
            example.display()
        );
        return example;
    }
    path
}

/// defaults -> file -> env -> validate.
fn build(source: &Path, env: &dyn Environment, prefix: &str) -> Result<(IniFile, Registry), SettingsError> {
    let file = IniFile::load(source)?;
    let mut registry = Registry::with_defaults();
    for section in registry.iter_mut() {
        section.map_from_ini(&file)?;
    }
    overlay(&mut registry, env, prefix)?;
    validate(&registry)?;
    Ok((file, registry))
}

fn to_json(section: &AnySection) -> serde_json::Value {
    // Sections are plain structs of strings, numbers, bools and lists.
    serde_json::to_value(section).unwrap_or(serde_json::Value::Null)
}

// -- Process-wide accessor ----------------------------------------------------

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Load settings from `data_dir` and install them process-wide.
///
/// Must be the first settings call. A second call returns the settings
/// installed by the first.
pub fn init(data_dir: impl Into<PathBuf>) -> Result<&'static Settings, SettingsError> {
    if let Some(settings) = SETTINGS.get() {
        warn!("settings already initialized from {}", settings.data_dir.display());
        return Ok(settings);
    }
    let settings = Settings::load(data_dir)?;
    Ok(SETTINGS.get_or_init(|| settings))
}

/// The process-wide settings.
///
/// # Panics
///
/// Panics if [`init`] has not completed.
pub fn settings() -> &'static Settings {
    SETTINGS
        .get()
        .expect("settings accessed before settings::init")
}
