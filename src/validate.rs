//! Field validation.
//!
//! Rules come from each section's field table and run in declaration
//! order, the way struct-tag validators do: `omitempty` skips zero values,
//! `dive` applies the rest of the chain to every list element, and the
//! first failing rule ends the chain for that value.  Failures from every
//! section are collected and reported together.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::cluster::parse_node;
use crate::config::{AnySection, Registry};
use crate::errors::{SettingsError, ValidationFailure};
use crate::schema::{FieldValue, Rule};

/// Result of a successful validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Violations of advisory rules. Logged, never fatal.
    pub warnings: Vec<ValidationFailure>,
}

/// Validate every section of `registry`.
///
/// Returns [`SettingsError::Validation`] with all fatal failures, or the
/// advisory warnings when there are none.
pub fn validate(registry: &Registry) -> Result<ValidationReport, SettingsError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for section in registry.iter() {
        check_section(section, &mut errors, &mut warnings);
    }
    finish(errors, warnings)
}

/// Validate a single section.
pub fn validate_section(section: &AnySection) -> Result<ValidationReport, SettingsError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    check_section(section, &mut errors, &mut warnings);
    finish(errors, warnings)
}

fn finish(
    errors: Vec<ValidationFailure>,
    warnings: Vec<ValidationFailure>,
) -> Result<ValidationReport, SettingsError> {
    for warning in &warnings {
        warn!("{}", warning);
    }
    if errors.is_empty() {
        Ok(ValidationReport { warnings })
    } else {
        Err(SettingsError::Validation(errors))
    }
}

fn check_section(
    section: &AnySection,
    errors: &mut Vec<ValidationFailure>,
    warnings: &mut Vec<ValidationFailure>,
) {
    for spec in section.fields() {
        if spec.rules.is_empty() {
            continue;
        }
        let Some(value) = section.get(spec.name) else {
            continue;
        };
        let mut failed = Vec::new();
        apply_rules(spec.rules, &value, &mut failed);
        for (rule, text) in failed {
            let failure = ValidationFailure {
                section: section.name().to_string(),
                field: spec.name.to_string(),
                rule: rule.to_string(),
                value: text,
            };
            if rule.is_advisory() {
                warnings.push(failure);
            } else {
                errors.push(failure);
            }
        }
    }
}

fn apply_rules(rules: &[Rule], value: &FieldValue, failed: &mut Vec<(Rule, String)>) {
    for (i, rule) in rules.iter().enumerate() {
        match rule {
            Rule::OmitEmpty => {
                if value.is_zero() {
                    return;
                }
            }
            Rule::Dive => {
                if let FieldValue::List(items) = value {
                    for item in items {
                        apply_rules(&rules[i + 1..], &FieldValue::Str(item.clone()), failed);
                    }
                    return;
                }
            }
            rule => {
                if !check(rule, value) {
                    failed.push((*rule, value.to_string()));
                    return;
                }
            }
        }
    }
}

fn check(rule: &Rule, value: &FieldValue) -> bool {
    match (rule, value) {
        (Rule::Url, FieldValue::Str(s)) => is_url(s),
        (Rule::Ip, FieldValue::Str(s)) => s.parse::<IpAddr>().is_ok(),
        (Rule::HostnamePort, FieldValue::Str(s)) => is_hostname_port(s),
        (Rule::SafetyText, FieldValue::Str(s)) => safety_text().is_match(s),
        (Rule::ClusterNode, FieldValue::Str(s)) => parse_node(s).is_ok(),
        (Rule::Min(min), value) => measure(value).map_or(true, |n| n >= i128::from(*min)),
        (Rule::Max(max), value) => measure(value).map_or(true, |n| n <= i128::from(*max)),
        _ => true,
    }
}

/// Numeric value, or length for strings and lists.
fn measure(value: &FieldValue) -> Option<i128> {
    match value {
        FieldValue::Int(n) => Some(i128::from(*n)),
        FieldValue::Uint(n) => Some(i128::from(*n)),
        FieldValue::Str(s) => Some(s.chars().count() as i128),
        FieldValue::List(items) => Some(items.len() as i128),
        FieldValue::Bool(_) => None,
    }
}

fn is_url(s: &str) -> bool {
    match url::Url::parse(s) {
        Ok(url) => !url.scheme().is_empty() && (url.has_host() || url.cannot_be_a_base()),
        Err(_) => false,
    }
}

fn is_hostname_port(s: &str) -> bool {
    let Some((host, port)) = s.rsplit_once(':') else {
        return false;
    };
    match port.parse::<u16>() {
        Ok(p) if p >= 1 => {}
        _ => return false,
    }
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<std::net::Ipv6Addr>().is_ok();
    }
    !host.is_empty() && (host.parse::<std::net::Ipv4Addr>().is_ok() || hostname().is_match(host))
}

fn safety_text() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_. -]*$").expect("valid safety_text pattern"))
}

fn hostname() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$",
        )
        .expect("valid hostname pattern")
    })
}
