//! Typed settings sections and the section registry.
//!
//! Each section is declared once through [`settings_section!`], which
//! produces the struct, its defaults and its static field table.  The
//! registered sections form a closed family wrapped by [`AnySection`]; the
//! [`Registry`] keeps one instance of each, in canonical order (the order
//! sections are written back to `app.ini`).

use std::sync::Arc;
use std::time::Duration;

use crate::errors::SettingsError;
use crate::ini::IniFile;
use crate::schema::{FieldFlags, FieldSpec, FieldValue, Rule, Section, SetFieldError};

/// Declare a settings section.
///
/// ```ignore
/// settings_section! {
///     /// Doc.
///     pub struct ServerSettings("server") {
///         host: String = "0.0.0.0".to_string();
///         port: u64 = 9000, rules = [Rule::Min(1)];
///         secret: String = String::new(), flags = FieldFlags::PROTECTED;
///     }
/// }
/// ```
macro_rules! settings_section {
    (
        $(#[$meta:meta])*
        pub struct $ty:ident($section:literal) $(where on_read = $hook:path)? {
            $(
                $(#[$fmeta:meta])*
                $field:ident: $fty:ty = $default:expr
                    $(, rules = [$($rule:expr),* $(,)?])?
                    $(, flags = $flags:expr)?
                ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
        pub struct $ty {
            $(
                $(#[$fmeta])*
                pub $field: $fty,
            )*
        }

        impl Default for $ty {
            fn default() -> Self {
                Self {
                    $($field: $default,)*
                }
            }
        }

        impl $crate::schema::Section for $ty {
            const NAME: &'static str = $section;
            const FIELDS: &'static [$crate::schema::FieldSpec] = &[
                $(
                    $crate::schema::FieldSpec {
                        name: stringify!($field),
                        kind: <$fty as $crate::schema::FieldType>::KIND,
                        rules: &[$($($rule),*)?],
                        flags: $crate::schema::FieldFlags::NONE $(.union($flags))?,
                    },
                )*
            ];

            fn zero() -> Self {
                Self {
                    $($field: Default::default(),)*
                }
            }

            fn get(&self, field: &str) -> Option<$crate::schema::FieldValue> {
                match field {
                    $(stringify!($field) => Some($crate::schema::FieldType::to_value(&self.$field)),)*
                    _ => None,
                }
            }

            fn set(
                &mut self,
                field: &str,
                value: $crate::schema::FieldValue,
            ) -> Result<(), $crate::schema::SetFieldError> {
                match field {
                    $(
                        stringify!($field) => {
                            let found = value.kind();
                            self.$field = <$fty as $crate::schema::FieldType>::from_value(value)
                                .ok_or($crate::schema::SetFieldError::KindMismatch {
                                    expected: <$fty as $crate::schema::FieldType>::KIND,
                                    found,
                                })?;
                            Ok(())
                        }
                    )*
                    _ => Err($crate::schema::SetFieldError::UnknownField),
                }
            }

            fn on_read(&mut self) {
                $($hook(self);)?
            }
        }
    };
}

pub(crate) use settings_section;

// -- Sections -----------------------------------------------------------------

settings_section! {
    /// Application-wide settings.
    pub struct AppSettings("app") {
        /// Signing secret for session tokens.
        jwt_secret: String = String::new();
        /// Default page size for list endpoints.
        page_size: i64 = 10;
    }
}

settings_section! {
    /// HTTP listener settings.
    pub struct ServerSettings("server") {
        host: String = "0.0.0.0".to_string();
        port: u64 = 9000;
        /// `debug` or `release`.
        run_mode: String = "debug".to_string();
    }
}

impl ServerSettings {
    /// `host:port` bind address.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

settings_section! {
    /// Database settings.
    pub struct DatabaseSettings("database") {
        /// Database file name, relative to the data directory.
        name: String = "database".to_string();
    }
}

settings_section! {
    /// Login protection.
    pub struct AuthSettings("auth") {
        /// Addresses exempt from banning. Repeatable key.
        ip_white_list: Vec<String> = Vec::new(),
            rules = [Rule::OmitEmpty, Rule::Dive, Rule::Ip],
            flags = FieldFlags::SHADOW;
        ban_threshold_minutes: i64 = 10, rules = [Rule::Min(1)];
        max_attempts: i64 = 10, rules = [Rule::Min(1)];
    }
}

settings_section! {
    /// Casdoor single sign-on.
    pub struct CasdoorSettings("casdoor") {
        endpoint: String = String::new();
        client_id: String = String::new();
        client_secret: String = String::new();
        certificate_path: String = String::new();
        organization: String = String::new();
        application: String = String::new();
        redirect_uri: String = String::new();
    }
}

settings_section! {
    /// ACME certificate renewal.
    pub struct CertSettings("cert") where on_read = clamp_renewal_interval {
        email: String = String::new(), flags = FieldFlags::PROTECTED;
        /// ACME directory URL. Empty selects the default CA.
        ca_dir: String = String::new(), rules = [Rule::OmitEmpty, Rule::Url];
        /// Days between renewal checks. Readers always see a value in
        /// `[7, 21]`; the stored value is kept as written.
        renewal_interval: i64 = 7;
        /// DNS resolvers (`host:port`) used for DNS-01 propagation checks.
        recursive_nameservers: Vec<String> = Vec::new(),
            rules = [Rule::OmitEmpty, Rule::Dive, Rule::HostnamePort];
        http_challenge_port: String = "9180".to_string();
    }
}

/// Lower and upper bound of `cert.renewal_interval`, in days.
pub const RENEWAL_INTERVAL_RANGE: (i64, i64) = (7, 21);

fn clamp_renewal_interval(cert: &mut CertSettings) {
    cert.renewal_interval = cert.renewal_interval();
}

impl CertSettings {
    /// Renewal interval clamped to [`RENEWAL_INTERVAL_RANGE`].
    pub fn renewal_interval(&self) -> i64 {
        let (min, max) = RENEWAL_INTERVAL_RANGE;
        self.renewal_interval.clamp(min, max)
    }
}

settings_section! {
    /// Cluster peers.
    pub struct ClusterSettings("cluster") {
        /// Peer URLs carrying `name`, `node_secret` and `enabled` query
        /// parameters. Repeatable key.
        node: Vec<String> = Vec::new(),
            rules = [Rule::OmitEmpty, Rule::Dive, Rule::ClusterNode],
            flags = FieldFlags::SHADOW;
    }
}

settings_section! {
    pub struct CryptoSettings("crypto") {
        secret: String = String::new();
    }
}

settings_section! {
    /// Outbound HTTP client settings.
    pub struct HttpSettings("http") {
        /// Mirror prefix for GitHub downloads.
        github_proxy: String = String::new(), rules = [Rule::OmitEmpty, Rule::Url];
        insecure_skip_verify: bool = false, flags = FieldFlags::PROTECTED;
    }
}

settings_section! {
    /// Built-in logrotate runner.
    pub struct LogrotateSettings("logrotate") {
        enabled: bool = false;
        cmd: String = "logrotate /etc/logrotate.d/nginx".to_string(),
            flags = FieldFlags::PROTECTED;
        /// Minutes between runs.
        interval: i64 = 1440;
    }
}

impl LogrotateSettings {
    /// Run interval. Negative values read as zero.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(0) as u64 * 60)
    }
}

settings_section! {
    /// Paths and commands for the managed nginx.
    pub struct NginxSettings("nginx") {
        access_log_path: String = String::new();
        error_log_path: String = String::new();
        config_dir: String = String::new();
        pid_path: String = String::new();
        test_config_cmd: String = String::new();
        reload_cmd: String = String::new();
        restart_cmd: String = String::new();
        /// Directories whose logs may be browsed. Repeatable key.
        log_dir_white_list: Vec<String> = Vec::new(), flags = FieldFlags::SHADOW;
    }
}

settings_section! {
    pub struct NginxLogSettings("nginx_log") {
        indexing_enabled: bool = false;
        index_path: String = String::new();
    }
}

settings_section! {
    /// Identity of this node.
    pub struct NodeSettings("node") {
        name: String = String::new(), rules = [Rule::SafetyText];
        secret: String = String::new(), flags = FieldFlags::PROTECTED;
        skip_installation: bool = false, flags = FieldFlags::PROTECTED;
        demo: bool = false, flags = FieldFlags::PROTECTED;
    }
}

settings_section! {
    /// OpenID Connect login. Every field is protected.
    pub struct OidcSettings("oidc") {
        client_id: String = String::new(), flags = FieldFlags::PROTECTED;
        client_secret: String = String::new(), flags = FieldFlags::PROTECTED;
        endpoint: String = String::new(), flags = FieldFlags::PROTECTED;
        redirect_uri: String = String::new(), flags = FieldFlags::PROTECTED;
        scopes: String = String::new(), flags = FieldFlags::PROTECTED;
        identifier: String = String::new(), flags = FieldFlags::PROTECTED;
    }
}

settings_section! {
    pub struct OpenAiSettings("openai") {
        base_url: String = String::new();
        token: String = String::new();
        proxy: String = String::new();
        model: String = String::new();
    }
}

settings_section! {
    pub struct TerminalSettings("terminal") {
        /// Command started for web terminal sessions.
        start_cmd: String = String::new();
    }
}

settings_section! {
    /// WebAuthn relying-party settings.
    pub struct WebAuthnSettings("webauthn") {
        rp_display_name: String = String::new();
        rpid: String = String::new();
        rp_origins: Vec<String> = Vec::new();
    }
}

settings_section! {
    pub struct BackupSettings("backup") {
        /// Directories backups may be written to or restored from.
        granted_access_path: Vec<String> = Vec::new(), flags = FieldFlags::SHADOW;
    }
}

// -- Tagged union -------------------------------------------------------------

/// A registered section type that can be wrapped into [`AnySection`].
pub trait Registered: Section {
    fn into_any(self) -> AnySection;
    fn from_any(any: &AnySection) -> Option<&Self>;
    fn from_any_mut(any: &mut AnySection) -> Option<&mut Self>;
}

macro_rules! section_family {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Any registered section.
        #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
        #[serde(untagged)]
        pub enum AnySection {
            $($variant($ty),)*
        }

        /// Names of the registered sections, in canonical order.
        pub const SECTION_NAMES: &[&str] = &[$(<$ty as Section>::NAME,)*];

        impl AnySection {
            /// Every registered section at its defaults, in canonical order.
            pub fn defaults() -> Vec<AnySection> {
                vec![$(AnySection::$variant(<$ty>::default()),)*]
            }

            /// Default instance of the section called `name`.
            pub fn default_for(name: &str) -> Option<AnySection> {
                $(
                    if name.eq_ignore_ascii_case(<$ty as Section>::NAME) {
                        return Some(AnySection::$variant(<$ty>::default()));
                    }
                )*
                None
            }

            /// Zero-valued instance of the section called `name`.
            pub fn zero_for(name: &str) -> Option<AnySection> {
                $(
                    if name.eq_ignore_ascii_case(<$ty as Section>::NAME) {
                        return Some(AnySection::$variant(<$ty as Section>::zero()));
                    }
                )*
                None
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(AnySection::$variant(_) => <$ty as Section>::NAME,)*
                }
            }

            pub fn fields(&self) -> &'static [FieldSpec] {
                match self {
                    $(AnySection::$variant(_) => <$ty as Section>::FIELDS,)*
                }
            }

            pub fn get(&self, field: &str) -> Option<FieldValue> {
                match self {
                    $(AnySection::$variant(s) => s.get(field),)*
                }
            }

            pub fn set(&mut self, field: &str, value: FieldValue) -> Result<(), SetFieldError> {
                match self {
                    $(AnySection::$variant(s) => s.set(field, value),)*
                }
            }

            pub fn on_read(&mut self) {
                match self {
                    $(AnySection::$variant(s) => s.on_read(),)*
                }
            }

            pub fn redact(&mut self) {
                match self {
                    $(AnySection::$variant(s) => s.redact(),)*
                }
            }

            /// Map the file block of this section onto it.
            pub fn map_from_ini(&mut self, ini: &IniFile) -> Result<(), SettingsError> {
                match self {
                    $(AnySection::$variant(s) => ini.map_to(s),)*
                }
            }

            /// Write this section into its file block.
            pub fn reflect_to_ini(&self, ini: &mut IniFile) {
                match self {
                    $(AnySection::$variant(s) => ini.reflect_from(s),)*
                }
            }

            /// Fill zero fields from `src` when both are the same section.
            pub fn fill_zero_from(&mut self, src: &AnySection) {
                match (self, src) {
                    $((AnySection::$variant(dst), AnySection::$variant(src)) => dst.fill_zero_from(src),)*
                    _ => {}
                }
            }
        }

        $(
            impl Registered for $ty {
                fn into_any(self) -> AnySection {
                    AnySection::$variant(self)
                }

                fn from_any(any: &AnySection) -> Option<&Self> {
                    match any {
                        AnySection::$variant(s) => Some(s),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn from_any_mut(any: &mut AnySection) -> Option<&mut Self> {
                    match any {
                        AnySection::$variant(s) => Some(s),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }

            impl From<$ty> for AnySection {
                fn from(section: $ty) -> Self {
                    AnySection::$variant(section)
                }
            }
        )*
    };
}

section_family! {
    App(AppSettings),
    Server(ServerSettings),
    Database(DatabaseSettings),
    Auth(AuthSettings),
    Casdoor(CasdoorSettings),
    Cert(CertSettings),
    Cluster(ClusterSettings),
    Crypto(CryptoSettings),
    Http(HttpSettings),
    Logrotate(LogrotateSettings),
    Nginx(NginxSettings),
    NginxLog(NginxLogSettings),
    Node(NodeSettings),
    Oidc(OidcSettings),
    OpenAi(OpenAiSettings),
    Terminal(TerminalSettings),
    WebAuthn(WebAuthnSettings),
    Backup(BackupSettings),
}

// -- Registry -----------------------------------------------------------------

/// One instance of each registered section, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registry {
    sections: Vec<AnySection>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registered section at its defaults.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for section in AnySection::defaults() {
            registry.register(section);
        }
        registry
    }

    /// Every registered section with all fields at their zero values.
    pub fn zeroed() -> Self {
        let mut registry = Self::new();
        for name in SECTION_NAMES {
            if let Some(section) = AnySection::zero_for(name) {
                registry.register(section);
            }
        }
        registry
    }

    /// Add a section.
    ///
    /// # Panics
    ///
    /// Panics when a section with the same (case-insensitive) name is
    /// already registered.
    pub fn register(&mut self, section: AnySection) {
        if self.section(section.name()).is_some() {
            panic!("settings section {:?} registered twice", section.name());
        }
        self.sections.push(section);
    }

    /// Immutable view of the current values.
    pub fn snapshot(&self) -> Arc<Registry> {
        Arc::new(self.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnySection> {
        self.sections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AnySection> {
        self.sections.iter_mut()
    }

    /// Section by case-insensitive name.
    pub fn section(&self, name: &str) -> Option<&AnySection> {
        self.sections
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut AnySection> {
        self.sections
            .iter_mut()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    /// Typed access to a registered section.
    pub fn get<T: Registered>(&self) -> Option<&T> {
        self.section(T::NAME).and_then(T::from_any)
    }

    pub fn get_mut<T: Registered>(&mut self) -> Option<&mut T> {
        self.section_mut(T::NAME).and_then(T::from_any_mut)
    }

    /// Replace the registered section with the same name.
    pub fn replace(&mut self, section: AnySection) -> Result<(), SettingsError> {
        let slot = self
            .section_mut(section.name())
            .ok_or_else(|| SettingsError::UnknownSection(section.name().to_string()))?;
        *slot = section;
        Ok(())
    }

    /// Copy the current values of section `name` into `target`, matching
    /// fields by name. Fields `target` does not declare, or declares with a
    /// different type, are skipped.
    pub fn reflect_into<T: Section>(&self, name: &str, target: &mut T) -> Result<(), SettingsError> {
        let source = self
            .section(name)
            .ok_or_else(|| SettingsError::UnknownSection(name.to_string()))?;
        for spec in T::FIELDS {
            let Some(value) = source.get(spec.name) else {
                continue;
            };
            if value.kind() != spec.kind {
                continue;
            }
            let result = target.set(spec.name, value);
            debug_assert!(result.is_ok(), "{}.{}: {:?}", T::NAME, spec.name, result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    #[test]
    fn test_defaults_match_table() {
        let registry = Registry::with_defaults();
        let server = registry.get::<ServerSettings>().unwrap();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 9000);
        assert_eq!(server.run_mode, "debug");

        assert_eq!(registry.get::<AppSettings>().unwrap().page_size, 10);
        assert_eq!(registry.get::<DatabaseSettings>().unwrap().name, "database");
        assert_eq!(registry.get::<AuthSettings>().unwrap().max_attempts, 10);
        assert_eq!(registry.get::<CertSettings>().unwrap().http_challenge_port, "9180");
        let logrotate = registry.get::<LogrotateSettings>().unwrap();
        assert_eq!(logrotate.cmd, "logrotate /etc/logrotate.d/nginx");
        assert_eq!(logrotate.interval, 1440);
        assert!(!logrotate.enabled);
    }

    #[test]
    fn test_registration_order_is_canonical() {
        let registry = Registry::with_defaults();
        let names: Vec<&str> = registry.iter().map(AnySection::name).collect();
        assert_eq!(names, SECTION_NAMES);
        assert_eq!(names.first(), Some(&"app"));
        assert_eq!(names.last(), Some(&"backup"));
        assert_eq!(names.len(), 18);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_register_duplicate_panics() {
        let mut registry = Registry::with_defaults();
        registry.register(AnySection::from(ServerSettings::default()));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.section("NGINX_LOG").unwrap().name(), "nginx_log");
        assert!(registry.section("nope").is_none());
    }

    #[test]
    fn test_field_table_flags() {
        let spec = AuthSettings::field_spec("ip_white_list").unwrap();
        assert_eq!(spec.kind, FieldKind::List);
        assert!(spec.allows_shadow());
        assert!(!spec.is_protected());
        assert_eq!(spec.rules, &[Rule::OmitEmpty, Rule::Dive, Rule::Ip]);

        let spec = NodeSettings::field_spec("secret").unwrap();
        assert!(spec.is_protected());
        assert_eq!(spec.env_key("NGINX_UI", NodeSettings::NAME), "NGINX_UI_NODE_SECRET");
    }

    #[test]
    fn test_set_rejects_wrong_kind() {
        let mut server = ServerSettings::default();
        assert_eq!(
            server.set("port", FieldValue::Str("80".into())),
            Err(SetFieldError::KindMismatch {
                expected: FieldKind::Uint,
                found: FieldKind::Str
            })
        );
        assert_eq!(
            server.set("nope", FieldValue::Uint(1)),
            Err(SetFieldError::UnknownField)
        );
        server.set("port", FieldValue::Uint(80)).unwrap();
        assert_eq!(server.port, 80);
    }

    #[test]
    fn test_renewal_interval_clamped_on_read() {
        for (stored, seen) in [(30, 21), (1, 7), (14, 14), (-3, 7), (21, 21)] {
            let mut cert = CertSettings {
                renewal_interval: stored,
                ..CertSettings::default()
            };
            assert_eq!(cert.renewal_interval(), seen);
            cert.on_read();
            assert_eq!(cert.renewal_interval, seen);
        }
    }

    #[test]
    fn test_redact_clears_protected_fields_only() {
        let mut node = NodeSettings {
            name: "edge-1".into(),
            secret: "abc".into(),
            skip_installation: true,
            demo: true,
        };
        node.redact();
        assert_eq!(node.name, "edge-1");
        assert_eq!(node.secret, "");
        assert!(!node.skip_installation);
        assert!(!node.demo);
    }

    #[test]
    fn test_fill_zero_from_prefers_existing_values() {
        let mut dst = ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            run_mode: String::new(),
        };
        dst.fill_zero_from(&ServerSettings {
            host: "10.0.0.1".into(),
            port: 8080,
            run_mode: "release".into(),
        });
        assert_eq!(dst.host, "127.0.0.1");
        assert_eq!(dst.port, 8080);
        assert_eq!(dst.run_mode, "release");
    }

    #[test]
    fn test_reflect_into_copies_by_field_name() {
        let mut registry = Registry::with_defaults();
        registry.get_mut::<ServerSettings>().unwrap().port = 8443;
        let mut target = ServerSettings::zero();
        registry.reflect_into("server", &mut target).unwrap();
        assert_eq!(target.port, 8443);
        assert_eq!(target.host, "0.0.0.0");

        assert!(matches!(
            registry.reflect_into("missing", &mut target),
            Err(SettingsError::UnknownSection(_))
        ));
    }

    settings_section! {
        /// `server` with the port stored as text.
        pub struct TextPortServer("server") {
            port: String = String::new();
            host: String = String::new();
        }
    }

    #[test]
    fn test_reflect_into_skips_fields_of_another_type() {
        let registry = Registry::with_defaults();
        let mut target = TextPortServer::default();
        registry.reflect_into("server", &mut target).unwrap();
        assert_eq!(target.port, "");
        assert_eq!(target.host, "0.0.0.0");
    }

    #[test]
    fn test_server_addr() {
        let server = ServerSettings::default();
        assert_eq!(server.addr(), "0.0.0.0:9000");
        let server = ServerSettings {
            host: "::1".into(),
            ..ServerSettings::default()
        };
        assert_eq!(server.addr(), "[::1]:9000");
    }

    #[test]
    fn test_logrotate_interval_minutes() {
        let logrotate = LogrotateSettings::default();
        assert_eq!(logrotate.interval(), Duration::from_secs(1440 * 60));
    }
}
