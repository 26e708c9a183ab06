//! Environment variable overlay.
//!
//! After the file is mapped onto the sections, every registered field may
//! be overridden by `<PREFIX>_<SECTION>_<FIELD>`.  Deprecated variable names
//! from the single-`[server]` era are copied to their new names first.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::{AnySection, Registry};
use crate::errors::SettingsError;
use crate::schema::coerce_scalar;

/// Environment variable prefix, fixed at build time.
///
/// Set `NGINX_UI_ENV_PREFIX` while compiling to change it.
pub const ENV_PREFIX: &str = match option_env!("NGINX_UI_ENV_PREFIX") {
    Some(prefix) => prefix,
    None => "NGINX_UI",
};

/// Deprecated variable suffixes and their replacements (both without the
/// prefix).
pub const DEPRECATED_ENV: &[(&str, &str)] = &[
    ("SERVER_HTTP_HOST", "SERVER_HOST"),
    ("SERVER_HTTP_PORT", "SERVER_PORT"),
    ("SERVER_JWT_SECRET", "APP_JWT_SECRET"),
    ("SERVER_NODE_SECRET", "NODE_SECRET"),
    ("SERVER_HTTP_CHALLENGE_PORT", "CERT_HTTP_CHALLENGE_PORT"),
    ("SERVER_EMAIL", "CERT_EMAIL"),
    ("SERVER_DATABASE", "DATABASE_NAME"),
    ("SERVER_START_CMD", "TERMINAL_START_CMD"),
    ("SERVER_CA_DIR", "CERT_CA_DIR"),
    ("SERVER_DEMO", "NODE_DEMO"),
    ("SERVER_PAGE_SIZE", "APP_PAGE_SIZE"),
    ("SERVER_GITHUB_PROXY", "HTTP_GITHUB_PROXY"),
    ("SERVER_CERT_RENEWAL_INTERVAL", "CERT_RENEWAL_INTERVAL"),
    ("SERVER_RECURSIVE_NAMESERVERS", "CERT_RECURSIVE_NAMESERVERS"),
    ("SERVER_SKIP_INSTALLATION", "NODE_SKIP_INSTALLATION"),
    ("SERVER_NAME", "NODE_NAME"),
];

/// Source of environment variables.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
    fn set_var(&mut self, key: &str, value: &str);
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_var(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// An in-memory environment, for tools and tests that must not touch the
/// process environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryEnv {
    vars: BTreeMap<String, String>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl Environment for MemoryEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn set_var(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }
}

/// Copy deprecated variables to their new names.
///
/// Runs unconditionally at startup. A mapping applies when the old name is
/// set and non-empty; each applied mapping logs a warning. Returns the
/// number of mappings applied.
pub fn migrate_deprecated_env(env: &mut dyn Environment, prefix: &str) -> usize {
    let mut applied = 0;
    for (old, new) in DEPRECATED_ENV {
        let old_key = format!("{prefix}_{old}");
        let new_key = format!("{prefix}_{new}");
        let Some(value) = env.var(&old_key).filter(|v| !v.is_empty()) else {
            continue;
        };
        env.set_var(&new_key, &value);
        warn!(
            "environment variable {} is deprecated, use {} instead",
            old_key, new_key
        );
        applied += 1;
    }
    applied
}

/// Override registry fields from the environment.
///
/// Empty variables are ignored. List values are comma-split and replace the
/// file value as a whole.
pub fn overlay(registry: &mut Registry, env: &dyn Environment, prefix: &str) -> Result<(), SettingsError> {
    for section in registry.iter_mut() {
        overlay_section(section, env, prefix)?;
    }
    Ok(())
}

/// Override the fields of one section from the environment.
pub fn overlay_section(
    section: &mut AnySection,
    env: &dyn Environment,
    prefix: &str,
) -> Result<(), SettingsError> {
    let name = section.name();
    for spec in section.fields() {
        let key = spec.env_key(prefix, name);
        let Some(raw) = env.var(&key).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let value = coerce_scalar(spec.kind, &raw).map_err(|_| SettingsError::Type {
            section: name.to_string(),
            field: spec.name.to_string(),
            value: raw.clone(),
            expected: spec.kind,
        })?;
        if let Some(value) = value {
            debug!("{} overrides {}.{}", key, name, spec.name);
            let result = section.set(spec.name, value);
            debug_assert!(result.is_ok(), "{}.{}: {:?}", name, spec.name, result);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthSettings, CertSettings, NodeSettings, ServerSettings};

    #[test]
    fn test_overlay_replaces_file_value() {
        let mut registry = Registry::with_defaults();
        registry.get_mut::<ServerSettings>().unwrap().port = 9000;
        let env = MemoryEnv::new().with("NGINX_UI_SERVER_PORT", "8080");
        overlay(&mut registry, &env, "NGINX_UI").unwrap();
        assert_eq!(registry.get::<ServerSettings>().unwrap().port, 8080);
    }

    #[test]
    fn test_overlay_ignores_empty_values() {
        let mut registry = Registry::with_defaults();
        let env = MemoryEnv::new().with("NGINX_UI_SERVER_HOST", "  ");
        overlay(&mut registry, &env, "NGINX_UI").unwrap();
        assert_eq!(registry.get::<ServerSettings>().unwrap().host, "0.0.0.0");
    }

    #[test]
    fn test_overlay_list_replaces_shadow_values() {
        let mut registry = Registry::with_defaults();
        registry.get_mut::<AuthSettings>().unwrap().ip_white_list = vec!["10.0.0.1".into()];
        let env = MemoryEnv::new().with("NGINX_UI_AUTH_IP_WHITE_LIST", "127.0.0.1, ::1");
        overlay(&mut registry, &env, "NGINX_UI").unwrap();
        assert_eq!(
            registry.get::<AuthSettings>().unwrap().ip_white_list,
            vec!["127.0.0.1", "::1"]
        );
    }

    #[test]
    fn test_overlay_bool_and_type_errors() {
        let mut registry = Registry::with_defaults();
        let env = MemoryEnv::new().with("NGINX_UI_NODE_DEMO", "TRUE");
        overlay(&mut registry, &env, "NGINX_UI").unwrap();
        assert!(registry.get::<NodeSettings>().unwrap().demo);

        let env = MemoryEnv::new().with("NGINX_UI_CERT_RENEWAL_INTERVAL", "weekly");
        let err = overlay(&mut registry, &env, "NGINX_UI").unwrap_err();
        assert_eq!(err.kind(), "ConfigTypeError");
        assert!(err.to_string().contains("renewal_interval"));
        assert_eq!(registry.get::<CertSettings>().unwrap().renewal_interval, 7);
    }

    #[test]
    fn test_migrate_deprecated_env_sets_new_names() {
        let mut env = MemoryEnv::new()
            .with("NGINX_UI_SERVER_JWT_SECRET", "x")
            .with("NGINX_UI_SERVER_HTTP_PORT", "")
            .with("NGINX_UI_SERVER_NAME", "edge");
        let applied = migrate_deprecated_env(&mut env, "NGINX_UI");
        assert_eq!(applied, 2);
        assert_eq!(env.var("NGINX_UI_APP_JWT_SECRET").as_deref(), Some("x"));
        assert_eq!(env.var("NGINX_UI_NODE_NAME").as_deref(), Some("edge"));
        assert_eq!(env.var("NGINX_UI_SERVER_PORT"), None);
    }

    #[test]
    fn test_migrate_deprecated_env_then_overlay() {
        let mut env = MemoryEnv::new().with("NGINX_UI_SERVER_JWT_SECRET", "x");
        migrate_deprecated_env(&mut env, "NGINX_UI");
        let mut registry = Registry::with_defaults();
        overlay(&mut registry, &env, "NGINX_UI").unwrap();
        assert_eq!(
            registry.get::<crate::config::AppSettings>().unwrap().jwt_secret,
            "x"
        );
    }

    #[test]
    fn test_default_prefix() {
        if option_env!("NGINX_UI_ENV_PREFIX").is_none() {
            assert_eq!(ENV_PREFIX, "NGINX_UI");
        }
    }
}
