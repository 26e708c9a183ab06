//! Migration from the legacy single-`[server]` layout.
//!
//! Older releases kept almost every setting under `[server]`.  A file is in
//! the legacy layout when `[server]` carries a non-empty `JwtSecret`; the
//! migrator then redistributes the legacy fields over the current sections,
//! keeps any value the current sections already define, and rewrites the
//! whole file in canonical order.  A migrated file has no `JwtSecret` under
//! `[server]`, so running the migrator again is a no-op.

use std::path::Path;

use tracing::{debug, info};

use crate::config::{
    settings_section, AnySection, AppSettings, CertSettings, DatabaseSettings, HttpSettings,
    NodeSettings, Registry, ServerSettings, TerminalSettings,
};
use crate::errors::SettingsError;
use crate::ini::IniFile;
use crate::schema::{coerce_scalar, FieldKind, FieldValue, Section};

settings_section! {
    /// The legacy `[server]` block.
    pub struct LegacyServerSettings("server") {
        http_host: String = String::new();
        /// Stored as text in the legacy layout.
        http_port: String = String::new();
        run_mode: String = String::new();
        jwt_secret: String = String::new();
        node_secret: String = String::new();
        http_challenge_port: String = String::new();
        email: String = String::new();
        database: String = String::new();
        start_cmd: String = String::new();
        ca_dir: String = String::new();
        demo: bool = false;
        page_size: i64 = 0;
        github_proxy: String = String::new();
        cert_renewal_interval: i64 = 0;
        recursive_nameservers: Vec<String> = Vec::new();
        skip_installation: bool = false;
        insecure_skip_verify: bool = false;
        name: String = String::new();
    }
}

/// What [`migrate_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy signature; nothing was written.
    Unchanged,
    /// The file was rewritten in the current layout.
    Migrated,
}

/// Whether `file` is in the legacy layout.
pub fn is_legacy(file: &IniFile) -> bool {
    file.section(LegacyServerSettings::NAME)
        .and_then(|server| server.value("jwt_secret"))
        .is_some_and(|secret| !secret.trim().is_empty())
}

/// Migrate `source` and write the result to `dest` (usually the same path).
///
/// Nothing is written when `source` is not in the legacy layout.
pub fn migrate_file(source: &Path, dest: &Path) -> Result<MigrationOutcome, SettingsError> {
    let file = IniFile::load(source)?;
    let Some(migrated) = migrate(&file)? else {
        debug!("{} is not in the legacy layout", source.display());
        return Ok(MigrationOutcome::Unchanged);
    };
    migrated
        .save(dest)
        .map_err(|e| SettingsError::Migration(Box::new(e)))?;
    info!(
        "migrated legacy settings from {} to {}",
        source.display(),
        dest.display()
    );
    Ok(MigrationOutcome::Migrated)
}

/// Migrate an in-memory model. Returns `None` when there is nothing to do.
pub fn migrate(file: &IniFile) -> Result<Option<IniFile>, SettingsError> {
    if !is_legacy(file) {
        return Ok(None);
    }

    let mut legacy = LegacyServerSettings::zero();
    file.map_to(&mut legacy)
        .map_err(|e| SettingsError::Migration(Box::new(e)))?;
    let from_legacy = route_legacy(&legacy).map_err(|e| SettingsError::Migration(Box::new(e)))?;

    // Sections already in the current layout, on zero values so that only
    // fields the file actually sets take precedence over the legacy block.
    let mut merged = Registry::zeroed();
    for section in merged.iter_mut() {
        section
            .map_from_ini(file)
            .map_err(|e| SettingsError::Migration(Box::new(e)))?;
    }

    let defaults = Registry::with_defaults();
    for section in merged.iter_mut() {
        if let Some(src) = from_legacy.section(section.name()) {
            section.fill_zero_from(src);
        }
        if let Some(src) = defaults.section(section.name()) {
            section.fill_zero_from(src);
        }
    }

    let mut out = IniFile::new();
    for section in merged.iter() {
        section.reflect_to_ini(&mut out);
    }
    Ok(Some(out))
}

/// Redistribute legacy fields over zero-valued current sections.
fn route_legacy(legacy: &LegacyServerSettings) -> Result<Registry, SettingsError> {
    let mut registry = Registry::zeroed();

    let port = match coerce_scalar(FieldKind::Uint, &legacy.http_port) {
        Ok(Some(FieldValue::Uint(port))) => port,
        Ok(_) => 0,
        Err(_) => {
            return Err(SettingsError::Type {
                section: LegacyServerSettings::NAME.to_string(),
                field: "http_port".to_string(),
                value: legacy.http_port.clone(),
                expected: FieldKind::Uint,
            })
        }
    };

    set(&mut registry, ServerSettings {
        host: legacy.http_host.clone(),
        port,
        run_mode: legacy.run_mode.clone(),
    });
    set(&mut registry, AppSettings {
        jwt_secret: legacy.jwt_secret.clone(),
        page_size: legacy.page_size,
    });
    set(&mut registry, NodeSettings {
        name: legacy.name.clone(),
        secret: legacy.node_secret.clone(),
        skip_installation: legacy.skip_installation,
        demo: legacy.demo,
    });
    set(&mut registry, CertSettings {
        email: legacy.email.clone(),
        ca_dir: legacy.ca_dir.clone(),
        renewal_interval: legacy.cert_renewal_interval,
        recursive_nameservers: legacy.recursive_nameservers.clone(),
        http_challenge_port: legacy.http_challenge_port.clone(),
    });
    set(&mut registry, DatabaseSettings {
        name: if legacy.database.is_empty() {
            "database".to_string()
        } else {
            legacy.database.clone()
        },
    });
    set(&mut registry, TerminalSettings {
        start_cmd: legacy.start_cmd.clone(),
    });
    set(&mut registry, HttpSettings {
        github_proxy: legacy.github_proxy.clone(),
        insecure_skip_verify: legacy.insecure_skip_verify,
    });

    Ok(registry)
}

fn set(registry: &mut Registry, section: impl Into<AnySection>) {
    let result = registry.replace(section.into());
    debug_assert!(result.is_ok(), "routed section is not registered: {:?}", result);
}
