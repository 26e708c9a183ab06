//! Field schema shared by every settings section.
//!
//! A section is a plain struct plus a static table of [`FieldSpec`]s.  The
//! table carries what the loader, the env overlay and the validator need to
//! know about each field (semantic type, validation rules, `protected` and
//! `allow-shadow` flags) so those stages can walk any section generically
//! through the [`Section`] trait without runtime reflection.

use std::fmt;

use serde::Serialize;

// -- Semantic types -----------------------------------------------------------

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Bool,
    Int,
    Uint,
    List,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Str => "string",
            FieldKind::Bool => "bool",
            FieldKind::Int => "signed integer",
            FieldKind::Uint => "unsigned integer",
            FieldKind::List => "list of strings",
        };
        f.write_str(name)
    }
}

/// A field value detached from its section struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
    List(Vec<String>),
}

impl FieldValue {
    /// The zero value of `kind`.
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Str => FieldValue::Str(String::new()),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::Uint => FieldValue::Uint(0),
            FieldKind::List => FieldValue::List(Vec::new()),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Uint(_) => FieldKind::Uint,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    /// Whether this is the zero value of its type.
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Str(s) => s.is_empty(),
            FieldValue::Bool(b) => !b,
            FieldValue::Int(n) => *n == 0,
            FieldValue::Uint(n) => *n == 0,
            FieldValue::List(items) => items.is_empty(),
        }
    }

    /// Render the value as INI text.
    ///
    /// Lists render one string per element when `shadow` is set, otherwise a
    /// single comma-joined string.
    pub fn to_ini_values(&self, shadow: bool) -> Vec<String> {
        match self {
            FieldValue::Str(s) => vec![s.clone()],
            FieldValue::Bool(b) => vec![b.to_string()],
            FieldValue::Int(n) => vec![n.to_string()],
            FieldValue::Uint(n) => vec![n.to_string()],
            FieldValue::List(items) if shadow => items.clone(),
            FieldValue::List(items) => vec![items.join(",")],
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(n) => write!(f, "{n}"),
            FieldValue::Uint(n) => write!(f, "{n}"),
            FieldValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

// -- Coercion -----------------------------------------------------------------

/// Text that does not parse as the requested [`FieldKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidValue;

/// Coerce raw text into a scalar of `kind`.
///
/// `Ok(None)` means the text was empty and the field keeps its current
/// value.  The caller knows which section and field the text belongs to and
/// turns [`InvalidValue`] into a typed error.
pub fn coerce_scalar(kind: FieldKind, raw: &str) -> Result<Option<FieldValue>, InvalidValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value = match kind {
        FieldKind::Str => FieldValue::Str(raw.to_string()),
        FieldKind::Bool => {
            if raw.eq_ignore_ascii_case("true") {
                FieldValue::Bool(true)
            } else if raw.eq_ignore_ascii_case("false") {
                FieldValue::Bool(false)
            } else {
                return Err(InvalidValue);
            }
        }
        FieldKind::Int => FieldValue::Int(raw.parse::<i64>().map_err(|_| InvalidValue)?),
        FieldKind::Uint => FieldValue::Uint(raw.parse::<u64>().map_err(|_| InvalidValue)?),
        FieldKind::List => FieldValue::List(split_list(raw)),
    };
    Ok(Some(value))
}

/// Split a comma-separated list, trimming elements and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// -- Rules and flags ----------------------------------------------------------

/// A validation predicate attached to a field.
///
/// Rules run in declaration order.  `OmitEmpty` stops evaluation for zero
/// values; `Dive` applies every following rule to each list element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    OmitEmpty,
    Url,
    Ip,
    HostnamePort,
    Min(i64),
    Max(i64),
    Dive,
    SafetyText,
    /// `cluster.node` peer URL. Violations are reported but never fatal.
    ClusterNode,
}

impl Rule {
    /// Whether a violation of this rule is only a warning.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Rule::ClusterNode)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::OmitEmpty => f.write_str("omitempty"),
            Rule::Url => f.write_str("url"),
            Rule::Ip => f.write_str("ip"),
            Rule::HostnamePort => f.write_str("hostname_port"),
            Rule::Min(n) => write!(f, "min={n}"),
            Rule::Max(n) => write!(f, "max={n}"),
            Rule::Dive => f.write_str("dive"),
            Rule::SafetyText => f.write_str("safety_text"),
            Rule::ClusterNode => f.write_str("cluster_node"),
        }
    }
}

/// Per-field flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Value must never reach an external read API.
    pub const PROTECTED: FieldFlags = FieldFlags(1);
    /// Key may repeat in the file; occurrences accumulate into a list.
    pub const SHADOW: FieldFlags = FieldFlags(1 << 1);

    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Static description of one field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Storage name (snake_case).
    pub name: &'static str,
    pub kind: FieldKind,
    pub rules: &'static [Rule],
    pub flags: FieldFlags,
}

impl FieldSpec {
    pub fn is_protected(&self) -> bool {
        self.flags.contains(FieldFlags::PROTECTED)
    }

    pub fn allows_shadow(&self) -> bool {
        self.flags.contains(FieldFlags::SHADOW)
    }

    /// Canonical key written to the INI file.
    pub fn ini_key(&self) -> String {
        ini_key(self.name)
    }

    /// Environment variable overriding this field.
    pub fn env_key(&self, prefix: &str, section: &str) -> String {
        env_key(prefix, section, self.name)
    }
}

// -- Naming -------------------------------------------------------------------

/// `jwt_secret` -> `JwtSecret`.
pub fn ini_key(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Key identity used for lookups: case-insensitive, underscores ignored.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// `<PREFIX>_<SECTION>_<FIELD>`, uppercased.
pub fn env_key(prefix: &str, section: &str, field: &str) -> String {
    format!("{prefix}_{section}_{field}").to_uppercase()
}

// -- Typed fields -------------------------------------------------------------

/// Rust types usable as section fields.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    fn to_value(&self) -> FieldValue;
    fn from_value(value: FieldValue) -> Option<Self>;
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Str;
    fn to_value(&self) -> FieldValue {
        FieldValue::Str(self.clone())
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Bool;
    fn to_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl FieldType for i64 {
    const KIND: FieldKind = FieldKind::Int;
    fn to_value(&self) -> FieldValue {
        FieldValue::Int(*self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl FieldType for u64 {
    const KIND: FieldKind = FieldKind::Uint;
    fn to_value(&self) -> FieldValue {
        FieldValue::Uint(*self)
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Uint(n) => Some(n),
            _ => None,
        }
    }
}

impl FieldType for Vec<String> {
    const KIND: FieldKind = FieldKind::List;
    fn to_value(&self) -> FieldValue {
        FieldValue::List(self.clone())
    }
    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

// -- Section trait ------------------------------------------------------------

/// Why [`Section::set`] rejected a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetFieldError {
    UnknownField,
    KindMismatch { expected: FieldKind, found: FieldKind },
}

/// A typed settings section.
///
/// Implemented through the `settings_section!` macro in [`crate::config`];
/// the provided methods give the loader, migrator and facade the per-field
/// operations (`is_zero`, `copy_from`, merge, redaction) they need.
pub trait Section: Clone + Default + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Section name as it appears in the file (`[cert]`).
    const NAME: &'static str;
    /// Fields in declaration order.
    const FIELDS: &'static [FieldSpec];

    /// An instance with every field at the zero value of its type.
    fn zero() -> Self;

    fn get(&self, field: &str) -> Option<FieldValue>;

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), SetFieldError>;

    /// Adjust values on their way to a reader. Stored values are untouched.
    fn on_read(&mut self) {}

    fn field_spec(name: &str) -> Option<&'static FieldSpec> {
        Self::FIELDS.iter().find(|spec| spec.name == name)
    }

    fn is_zero(&self, field: &str) -> bool {
        self.get(field).map_or(true, |value| value.is_zero())
    }

    /// Copy every field from `src`.
    fn copy_from(&mut self, src: &Self) {
        for spec in Self::FIELDS {
            if let Some(value) = src.get(spec.name) {
                let result = self.set(spec.name, value);
                debug_assert!(result.is_ok(), "{}.{}: {:?}", Self::NAME, spec.name, result);
            }
        }
    }

    /// Fill fields still at their zero value from `src`.
    fn fill_zero_from(&mut self, src: &Self) {
        for spec in Self::FIELDS {
            if self.is_zero(spec.name) {
                if let Some(value) = src.get(spec.name) {
                    let result = self.set(spec.name, value);
                    debug_assert!(result.is_ok(), "{}.{}: {:?}", Self::NAME, spec.name, result);
                }
            }
        }
    }

    /// Clear every protected field.
    fn redact(&mut self) {
        for spec in Self::FIELDS.iter().filter(|spec| spec.is_protected()) {
            let result = self.set(spec.name, FieldValue::zero(spec.kind));
            debug_assert!(result.is_ok(), "{}.{}: {:?}", Self::NAME, spec.name, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ini_key_pascal_case() {
        assert_eq!(ini_key("jwt_secret"), "JwtSecret");
        assert_eq!(ini_key("node"), "Node");
        assert_eq!(ini_key("ip_white_list"), "IpWhiteList");
    }

    #[test]
    fn test_normalize_key_ignores_case_and_underscores() {
        assert_eq!(normalize_key("JwtSecret"), normalize_key("jwt_secret"));
        assert_eq!(normalize_key("IPWhiteList"), normalize_key("ip_white_list"));
        assert_eq!(normalize_key("HTTPChallengePort"), "httpchallengeport");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("NGINX_UI", "server", "port"), "NGINX_UI_SERVER_PORT");
        assert_eq!(
            env_key("NGINX_UI", "nginx_log", "index_path"),
            "NGINX_UI_NGINX_LOG_INDEX_PATH"
        );
    }

    #[test]
    fn test_coerce_bool_case_insensitive() {
        assert_eq!(
            coerce_scalar(FieldKind::Bool, "TRUE"),
            Ok(Some(FieldValue::Bool(true)))
        );
        assert_eq!(
            coerce_scalar(FieldKind::Bool, "False"),
            Ok(Some(FieldValue::Bool(false)))
        );
        assert_eq!(coerce_scalar(FieldKind::Bool, "yes"), Err(InvalidValue));
        assert_eq!(coerce_scalar(FieldKind::Bool, ""), Ok(None));
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(
            coerce_scalar(FieldKind::Int, "-5"),
            Ok(Some(FieldValue::Int(-5)))
        );
        assert_eq!(coerce_scalar(FieldKind::Uint, "-5"), Err(InvalidValue));
        assert_eq!(coerce_scalar(FieldKind::Uint, "0x10"), Err(InvalidValue));
        assert_eq!(coerce_scalar(FieldKind::Int, "  "), Ok(None));
    }

    #[test]
    fn test_coerce_list_splits_on_commas() {
        assert_eq!(
            coerce_scalar(FieldKind::List, "8.8.8.8:53, 1.1.1.1:53,,"),
            Ok(Some(FieldValue::List(vec![
                "8.8.8.8:53".to_string(),
                "1.1.1.1:53".to_string()
            ])))
        );
    }

    #[test]
    fn test_list_rendering() {
        let value = FieldValue::List(vec!["a".into(), "b".into()]);
        assert_eq!(value.to_ini_values(true), vec!["a", "b"]);
        assert_eq!(value.to_ini_values(false), vec!["a,b"]);
    }

    #[test]
    fn test_flags() {
        let flags = FieldFlags::NONE.union(FieldFlags::SHADOW);
        assert!(flags.contains(FieldFlags::SHADOW));
        assert!(!flags.contains(FieldFlags::PROTECTED));
    }
}
