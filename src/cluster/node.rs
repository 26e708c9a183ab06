//! Parsing of `cluster.node` peer URLs.
//!
//! `http://10.0.0.1:9000?name=node1&node_secret=s&enabled=true`

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::config::ClusterSettings;

/// A configured cluster peer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ClusterNode {
    /// Display name.
    pub name: String,
    /// Base URL of the peer, without query or fragment.
    pub url: String,
    /// Shared secret used to call the peer.
    #[serde(skip_serializing)]
    pub secret: String,
    pub enabled: bool,
}

/// Why a peer entry could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterNodeError {
    #[error("not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("missing query parameter `{0}`")]
    MissingParam(&'static str),

    #[error("`enabled` must be true or false, got {0:?}")]
    InvalidEnabled(String),
}

/// Parse one peer entry.
pub fn parse_node(raw: &str) -> Result<ClusterNode, ClusterNodeError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ClusterNodeError::InvalidUrl(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ClusterNodeError::UnsupportedScheme(url.scheme().to_string()));
    }

    let mut name = None;
    let mut secret = None;
    let mut enabled = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "name" => name = Some(value.into_owned()),
            "node_secret" => secret = Some(value.into_owned()),
            "enabled" => enabled = Some(value.into_owned()),
            _ => {}
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or(ClusterNodeError::MissingParam("name"))?;
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(ClusterNodeError::MissingParam("node_secret"))?;
    let enabled = match enabled.as_deref() {
        None => return Err(ClusterNodeError::MissingParam("enabled")),
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        Some(v) => return Err(ClusterNodeError::InvalidEnabled(v.to_string())),
    };

    url.set_query(None);
    url.set_fragment(None);
    let base = url.as_str().trim_end_matches('/').to_string();

    Ok(ClusterNode {
        name,
        url: base,
        secret,
        enabled,
    })
}

impl ClusterSettings {
    /// Parsed peers. Malformed entries are skipped with a warning; they stay
    /// in the section untouched.
    pub fn nodes(&self) -> Vec<ClusterNode> {
        self.node
            .iter()
            .filter_map(|raw| match parse_node(raw) {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!("ignoring cluster node {:?}: {}", raw, e);
                    None
                }
            })
            .collect()
    }
}
