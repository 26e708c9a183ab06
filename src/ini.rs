//! Sectioned INI model with shadow keys.
//!
//! The parser is loose in the ways the settings file has always been loose:
//! a missing file is an empty model, section and key names match
//! case-insensitively (keys also ignore underscores), and keys may repeat.
//! Repeated keys keep their occurrence order so shadow lists round-trip.
//!
//! Saving is crash-only: the rendered text goes to a temp file in the same
//! directory, is fsynced, and is renamed over the target.

use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::errors::SettingsError;
use crate::schema::{coerce_scalar, normalize_key, split_list, FieldKind, FieldValue, Section};

/// One `[section]` block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All `(key, value)` entries in file order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_key(&self, key: &str) -> bool {
        let wanted = normalize_key(key);
        self.entries.iter().any(|(k, _)| normalize_key(k) == wanted)
    }

    /// First value of `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        let wanted = normalize_key(key);
        self.entries
            .iter()
            .find(|(k, _)| normalize_key(k) == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `key`, in occurrence order.
    pub fn values(&self, key: &str) -> Vec<&str> {
        let wanted = normalize_key(key);
        self.entries
            .iter()
            .filter(|(k, _)| normalize_key(k) == wanted)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Append an occurrence of `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace every occurrence of `key` with a single entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.set_all(key, vec![value.into()]);
    }

    /// Replace every occurrence of `key` with `values`, placed where the
    /// first old occurrence was (or at the end).
    pub fn set_all(&mut self, key: &str, values: Vec<String>) {
        let wanted = normalize_key(key);
        let position = self
            .entries
            .iter()
            .position(|(k, _)| normalize_key(k) == wanted)
            .unwrap_or(self.entries.len());
        self.entries.retain(|(k, _)| normalize_key(k) != wanted);
        let position = position.min(self.entries.len());
        let new_entries = values.into_iter().map(|v| (key.to_string(), v));
        self.entries.splice(position..position, new_entries);
    }

    /// Remove every occurrence of `key`.
    pub fn delete(&mut self, key: &str) {
        let wanted = normalize_key(key);
        self.entries.retain(|(k, _)| normalize_key(k) != wanted);
    }

    /// Write the fields of `section` into this block.
    ///
    /// Declared fields come first in declaration order; keys the section
    /// does not declare are kept after them.
    pub fn reflect_from<T: Section>(&mut self, section: &T) {
        let mut declared = Vec::new();
        for spec in T::FIELDS {
            let Some(value) = section.get(spec.name) else {
                continue;
            };
            let key = spec.ini_key();
            for text in value.to_ini_values(spec.allows_shadow()) {
                declared.push((key.clone(), text));
            }
        }
        let leftovers: Vec<(String, String)> = self
            .entries
            .drain(..)
            .filter(|(k, _)| {
                let k = normalize_key(k);
                !T::FIELDS.iter().any(|spec| normalize_key(spec.name) == k)
            })
            .collect();
        self.entries = declared;
        self.entries.extend(leftovers);
    }

    /// Read this block into `target`, coercing text to each field's type.
    ///
    /// Absent keys and empty scalars leave the field untouched. A shadow list
    /// keeps every occurrence, blank ones included.
    pub fn map_to<T: Section>(&self, target: &mut T) -> Result<(), SettingsError> {
        for spec in T::FIELDS {
            let raw = self.values(spec.name);
            let Some(first) = raw.first() else {
                continue;
            };
            let value = if spec.kind == FieldKind::List && spec.allows_shadow() {
                Some(FieldValue::List(
                    raw.iter().map(|v| v.trim().to_string()).collect(),
                ))
            } else if spec.kind == FieldKind::List {
                Some(FieldValue::List(split_list(first)))
            } else {
                coerce_scalar(spec.kind, first).map_err(|_| SettingsError::Type {
                    section: T::NAME.to_string(),
                    field: spec.name.to_string(),
                    value: first.to_string(),
                    expected: spec.kind,
                })?
            };
            if let Some(value) = value {
                let result = target.set(spec.name, value);
                debug_assert!(result.is_ok(), "{}.{}: {:?}", T::NAME, spec.name, result);
            }
        }
        Ok(())
    }
}

/// An INI document: sections in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IniFile {
    sections: Vec<IniSection>,
}

impl IniFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`. A missing file yields an empty model.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse_named(&text, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(SettingsError::io(path, e)),
        }
    }

    /// Parse in-memory text.
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        Self::parse_named(text, "<memory>")
    }

    fn parse_named(text: &str, location: &str) -> Result<Self, SettingsError> {
        let mut file = IniFile::new();
        // Keys before the first header land in the unnamed section.
        let mut current: Option<usize> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let error = |message: &str| SettingsError::Parse {
                location: location.to_string(),
                line: line_no,
                message: message.to_string(),
            };

            if let Some(rest) = line.strip_prefix('[') {
                let rest = strip_inline_comment(rest);
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| error("unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(error("empty section name"));
                }
                current = Some(file.section_index_or_insert(name));
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| error("expected `key = value`"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(error("empty key"));
            }
            let value = unquote(strip_inline_comment(value.trim()));

            let index = match current {
                Some(index) => index,
                None => {
                    let index = file.section_index_or_insert("");
                    current = Some(index);
                    index
                }
            };
            file.sections[index].push(key, value);
        }

        Ok(file)
    }

    /// Render the document as text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if section.name.is_empty() && section.is_empty() {
                continue;
            }
            if i > 0 && !out.is_empty() {
                out.push('\n');
            }
            if !section.name.is_empty() {
                out.push('[');
                out.push_str(&section.name);
                out.push_str("]\n");
            }
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&quote(value));
                out.push('\n');
            }
        }
        out
    }

    /// Write the document to `path` atomically (temp file, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, e))?;

        let temp = NamedTempFile::new_in(parent).map_err(|e| SettingsError::io(parent, e))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer
                .write_all(self.render().as_bytes())
                .and_then(|_| writer.flush())
                .map_err(|e| SettingsError::io(temp.path(), e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| SettingsError::io(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| SettingsError::io(path, e.error))?;
        Ok(())
    }

    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut IniSection> {
        self.sections
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// The section called `name`, appended if absent.
    pub fn section_or_insert(&mut self, name: &str) -> &mut IniSection {
        let index = self.section_index_or_insert(name);
        &mut self.sections[index]
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self
            .sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
        {
            Some(index) => index,
            None => {
                self.sections.push(IniSection::new(name));
                self.sections.len() - 1
            }
        }
    }

    pub fn remove_section(&mut self, name: &str) {
        self.sections.retain(|s| !s.name.eq_ignore_ascii_case(name));
    }

    /// Drop every section.
    pub fn clear(&mut self) {
        self.sections.clear();
    }

    /// A copy with the blocks named in `order` first, in that order, then the
    /// remaining blocks as they appear here. Named blocks missing from this
    /// document are inserted empty. The unnamed block stays at the top.
    pub fn reordered(&self, order: &[&str]) -> IniFile {
        let mut out = IniFile::new();
        if let Some(unnamed) = self.sections.iter().find(|s| s.name.is_empty()) {
            out.sections.push(unnamed.clone());
        }
        for name in order {
            out.sections.push(
                self.section(name)
                    .cloned()
                    .unwrap_or_else(|| IniSection::new(*name)),
            );
        }
        for section in &self.sections {
            if !section.name.is_empty() && !out.has_section(&section.name) {
                out.sections.push(section.clone());
            }
        }
        out
    }

    /// Reflect `section` into the block of the same name.
    pub fn reflect_from<T: Section>(&mut self, section: &T) {
        self.section_or_insert(T::NAME).reflect_from(section);
    }

    /// Map the block named after `T` onto `target`. A missing block leaves
    /// `target` untouched.
    pub fn map_to<T: Section>(&self, target: &mut T) -> Result<(), SettingsError> {
        match self.section(T::NAME) {
            Some(section) => section.map_to(target),
            None => Ok(()),
        }
    }
}

/// Cut an inline comment: `;` or `#` preceded by whitespace.
fn strip_inline_comment(value: &str) -> &str {
    if value.starts_with('`') {
        if let Some(end) = value[1..].find('`') {
            return &value[..end + 2];
        }
        return value;
    }
    if value.starts_with('"') {
        let mut escaped = false;
        for (i, c) in value.char_indices().skip(1) {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => return &value[..i + 1],
                _ => {}
            }
        }
        return value;
    }
    let bytes = value.as_bytes();
    for i in 1..bytes.len() {
        if (bytes[i] == b';' || bytes[i] == b'#') && bytes[i - 1].is_ascii_whitespace() {
            return value[..i].trim_end();
        }
    }
    value
}

/// Backtick-quoted text is literal. Double-quoted text honours `\"` and `\\`;
/// any other backslash is kept as written.
fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('`') && value.ends_with('`') {
        return value[1..value.len() - 1].to_string();
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    if next == '"' || next == '\\' {
                        out.push(next);
                        chars.next();
                        continue;
                    }
                }
            }
            out.push(c);
        }
        return out;
    }
    value.to_string()
}

/// Quote a value that would not survive a parse round trip as bare text.
fn quote(value: &str) -> String {
    let needs_quotes = value != value.trim()
        || value.starts_with('"')
        || value.starts_with('`')
        || value.starts_with(';')
        || value.starts_with('#')
        || value.contains(" ;")
        || value.contains(" #")
        || value.contains("\t;")
        || value.contains("\t#");
    if !needs_quotes {
        return value.to_string();
    }
    if !value.contains('`') {
        return format!("`{value}`");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthSettings, BackupSettings, ClusterSettings, ServerSettings, WebAuthnSettings,
    };

    const SAMPLE: &str = "\
; top comment
[server]
Host = 127.0.0.1
Port = 9001 ; inline comment
RunMode = release

[cluster]
Node = http://10.0.0.1:9000?name=node1&node_secret=s&enabled=true
Node = http://10.0.0.2:9000?name=node2&node_secret=s&enabled=true
";

    #[test]
    fn test_parse_sections_and_shadow_keys() {
        let file = IniFile::parse(SAMPLE).unwrap();
        assert_eq!(file.sections().len(), 2);
        let server = file.section("SERVER").unwrap();
        assert_eq!(server.value("port"), Some("9001"));
        assert_eq!(server.value("run_mode"), Some("release"));
        let cluster = file.section("cluster").unwrap();
        assert_eq!(cluster.values("node").len(), 2);
        assert!(cluster.values("Node")[0].contains("name=node1"));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = IniFile::parse("[server]\nHost 127.0.0.1\n").unwrap_err();
        match err {
            SettingsError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        let err = IniFile::parse("[server\n").unwrap_err();
        assert_eq!(err.kind(), "ConfigParseError");
        assert!(err.to_string().contains("unterminated section header"));
    }

    #[test]
    fn test_missing_file_is_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        let file = IniFile::load(&dir.path().join("app.ini")).unwrap();
        assert!(file.sections().is_empty());
    }

    #[test]
    fn test_quoted_values() {
        let file = IniFile::parse("[terminal]\nStartCmd = `bash -l ; echo`\nOther = \"a #b\"\n").unwrap();
        let terminal = file.section("terminal").unwrap();
        assert_eq!(terminal.value("start_cmd"), Some("bash -l ; echo"));
        assert_eq!(terminal.value("other"), Some("a #b"));

        let rendered = file.render();
        let again = IniFile::parse(&rendered).unwrap();
        assert_eq!(again, file);
    }

    #[test]
    fn test_url_fragment_is_not_a_comment() {
        let file = IniFile::parse("[http]\nGithubProxy = https://mirror.example/#x\n").unwrap();
        assert_eq!(
            file.section("http").unwrap().value("github_proxy"),
            Some("https://mirror.example/#x")
        );
    }

    #[test]
    fn test_map_to_coerces_types() {
        let file = IniFile::parse(SAMPLE).unwrap();
        let mut server = ServerSettings::default();
        file.map_to(&mut server).unwrap();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 9001);
        assert_eq!(server.run_mode, "release");

        let mut cluster = ClusterSettings::default();
        file.map_to(&mut cluster).unwrap();
        assert_eq!(cluster.node.len(), 2);
        assert!(cluster.node[0].contains("node1"));
        assert!(cluster.node[1].contains("node2"));
    }

    #[test]
    fn test_map_to_type_error_names_field() {
        let file = IniFile::parse("[server]\nPort = eighty\n").unwrap();
        let mut server = ServerSettings::default();
        let err = file.map_to(&mut server).unwrap_err();
        match err {
            SettingsError::Type { section, field, value, .. } => {
                assert_eq!(section, "server");
                assert_eq!(field, "port");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_map_to_empty_keeps_default() {
        let file = IniFile::parse("[server]\nPort =\nHost = \n").unwrap();
        let mut server = ServerSettings::default();
        file.map_to(&mut server).unwrap();
        assert_eq!(server, ServerSettings::default());
    }

    #[test]
    fn test_non_shadow_list_is_comma_separated() {
        let file = IniFile::parse("[webauthn]\nRpOrigins = https://a.example, https://b.example\n").unwrap();
        let mut webauthn = WebAuthnSettings::default();
        file.map_to(&mut webauthn).unwrap();
        assert_eq!(webauthn.rp_origins, vec!["https://a.example", "https://b.example"]);

        let mut out = IniFile::new();
        out.reflect_from(&webauthn);
        assert_eq!(
            out.section("webauthn").unwrap().values("rp_origins"),
            vec!["https://a.example,https://b.example"]
        );
    }

    #[test]
    fn test_shadow_round_trip_preserves_order() {
        let text = "[auth]\nIpWhiteList = 10.0.0.3\nIpWhiteList = 10.0.0.1\nIpWhiteList = 10.0.0.2\n";
        let file = IniFile::parse(text).unwrap();
        let mut auth = AuthSettings::default();
        file.map_to(&mut auth).unwrap();

        let mut out = IniFile::new();
        out.reflect_from(&auth);
        let rendered = out.render();
        let occurrences: Vec<&str> = rendered
            .lines()
            .filter(|l| l.starts_with("IpWhiteList"))
            .collect();
        assert_eq!(
            occurrences,
            vec![
                "IpWhiteList = 10.0.0.3",
                "IpWhiteList = 10.0.0.1",
                "IpWhiteList = 10.0.0.2"
            ]
        );
    }

    #[test]
    fn test_reflect_from_keeps_unknown_keys_after_declared() {
        let mut file = IniFile::parse("[server]\nCustom = 1\nPort = 1\n").unwrap();
        file.reflect_from(&ServerSettings::default());
        let keys: Vec<&str> = file
            .section("server")
            .unwrap()
            .entries()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["Host", "Port", "RunMode", "Custom"]);
    }

    #[test]
    fn test_set_all_replaces_in_place() {
        let mut section = IniSection::new("backup");
        section.push("A", "1");
        section.push("GrantedAccessPath", "/x");
        section.push("B", "2");
        section.push("granted_access_path", "/y");
        section.set_all("GrantedAccessPath", vec!["/p".into(), "/q".into()]);
        let entries: Vec<(&str, &str)> = section
            .entries()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("A", "1"),
                ("GrantedAccessPath", "/p"),
                ("GrantedAccessPath", "/q"),
                ("B", "2")
            ]
        );
    }

    #[test]
    fn test_save_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.ini");
        let mut file = IniFile::new();
        file.reflect_from(&ServerSettings::default());
        file.save(&path).unwrap();

        let loaded = IniFile::load(&path).unwrap();
        assert_eq!(loaded, file);

        // No temp files left behind.
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("app.ini")]);
    }

    #[test]
    fn test_value_with_both_quote_marks_round_trips() {
        let cmd = "sh -c \"echo `id`\" ;x";
        let mut file = IniFile::new();
        file.section_or_insert("terminal").set("StartCmd", cmd);
        file.section_or_insert("terminal").set("Path", "C:\\tmp\\ #1");

        let again = IniFile::parse(&file.render()).unwrap();
        let terminal = again.section("terminal").unwrap();
        assert_eq!(terminal.value("start_cmd"), Some(cmd));
        assert_eq!(terminal.value("path"), Some("C:\\tmp\\ #1"));
    }

    #[test]
    fn test_double_quoted_escapes_and_trailing_comment() {
        let file = IniFile::parse("[terminal]\nStartCmd = \"say \\\"hi\\\" `x`\" ; note\nDir = \"C:\\dir\"\n").unwrap();
        let terminal = file.section("terminal").unwrap();
        assert_eq!(terminal.value("start_cmd"), Some("say \"hi\" `x`"));
        // A lone backslash is kept.
        assert_eq!(terminal.value("dir"), Some("C:\\dir"));
    }

    #[test]
    fn test_shadow_list_keeps_blank_occurrences() {
        let text = "[backup]\nGrantedAccessPath = /a\nGrantedAccessPath =\nGrantedAccessPath = /c\n";
        let file = IniFile::parse(text).unwrap();
        let mut backup = BackupSettings::default();
        file.map_to(&mut backup).unwrap();
        assert_eq!(backup.granted_access_path, vec!["/a", "", "/c"]);

        let mut out = IniFile::new();
        out.reflect_from(&backup);
        let again = IniFile::parse(&out.render()).unwrap();
        assert_eq!(
            again.section("backup").unwrap().values("granted_access_path"),
            vec!["/a", "", "/c"]
        );
    }

    #[test]
    fn test_reordered_puts_named_blocks_first() {
        let text = "Loose = 1\n[zeta]\nA = 1\n[server]\nPort = 1\n[app]\nPageSize = 5\n";
        let file = IniFile::parse(text).unwrap();
        let ordered = file.reordered(&["app", "server", "database"]);
        let names: Vec<&str> = ordered.sections().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["", "app", "server", "database", "zeta"]);
        assert_eq!(ordered.section("app").unwrap().value("page_size"), Some("5"));
        assert!(ordered.section("database").unwrap().is_empty());
    }
}
