//! Endpoint resolution
//!
//! Parses the connection URI (`scheme[+subproto]://[user@]host[:port]/?k=v`)
//! and derives the unix-domain rendezvous path for the plugin implementing
//! that scheme. The scheme part left of the first `+` selects the plugin;
//! the right part is a transport hint that travels inside the startup call.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Default directory where plugins publish their IPC sockets
pub const DEFAULT_SOCKET_ROOT: &str = "/var/run/arraybridge/ipc";

/// Environment override for the socket root directory
pub const SOCKET_ROOT_ENV: &str = "ARRAYBRIDGE_UDS_PATH";

// =============================================================================
// Device URI
// =============================================================================

/// Parsed form of a connection URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUri {
    /// Raw URI as given by the caller
    pub raw: String,
    /// Plugin-selecting scheme (left of any `+`)
    pub scheme: String,
    /// Optional sub-protocol hint (right of the first `+`)
    pub subproto: Option<String>,
    /// Target array host, if any
    pub host: Option<String>,
    /// Target array port, if any
    pub port: Option<u16>,
    /// Username for the target array, if any
    pub username: Option<String>,
    /// Query string parameters
    pub params: BTreeMap<String, String>,
}

impl DeviceUri {
    /// Parse a connection URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let parsed = Url::parse(uri)
            .map_err(|e| Error::InvalidArgument(format!("Invalid URI '{uri}': {e}")))?;

        let full_scheme = parsed.scheme().to_string();
        if full_scheme.is_empty() {
            return Err(Error::InvalidArgument(format!("URI '{uri}' has no scheme")));
        }
        let (scheme, subproto) = match full_scheme.split_once('+') {
            Some((plug, proto)) => (plug.to_string(), Some(proto.to_string())),
            None => (full_scheme, None),
        };

        let username = match parsed.username() {
            "" => None,
            u => Some(u.to_string()),
        };
        let host = parsed.host_str().filter(|h| !h.is_empty()).map(String::from);

        let mut params = BTreeMap::new();
        for (k, v) in parsed.query_pairs() {
            params.insert(k.into_owned(), v.into_owned());
        }

        Ok(Self {
            raw: uri.to_string(),
            scheme,
            subproto,
            host,
            port: parsed.port(),
            username,
            params,
        })
    }

    /// Require a named query parameter, e.g. a SMI-S namespace.
    pub fn require_param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidArgument(format!("URI missing query parameter '{key}'")))
    }
}

// =============================================================================
// IPC Configuration
// =============================================================================

/// Where to rendezvous with plugin processes.
///
/// Passed explicitly at construction; `from_env` is the single
/// environment-style override point.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Directory holding one unix socket per plugin scheme
    pub socket_root: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_root: PathBuf::from(DEFAULT_SOCKET_ROOT),
        }
    }
}

impl IpcConfig {
    /// Build a config honoring the `ARRAYBRIDGE_UDS_PATH` override.
    pub fn from_env() -> Self {
        match std::env::var(SOCKET_ROOT_ENV) {
            Ok(root) if !root.is_empty() => Self {
                socket_root: PathBuf::from(root),
            },
            _ => Self::default(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            socket_root: root.into(),
        }
    }

    /// Rendezvous path for a plugin scheme: `<socket_root>/<scheme>`.
    pub fn plugin_socket(&self, scheme: &str) -> PathBuf {
        self.socket_root.join(scheme)
    }

    /// Resolve the socket path for a scheme, failing fast when it cannot work.
    ///
    /// A missing socket root (or a root with no sockets at all) means the
    /// daemon isn't running; a present root without this scheme's socket
    /// means the URI names a plugin that isn't installed.
    pub fn resolve(&self, scheme: &str) -> Result<PathBuf> {
        let path = self.plugin_socket(scheme);
        if path.exists() {
            return Ok(path);
        }
        if self.any_plugin_present() {
            Err(Error::PluginNotFound(format!(
                "Plugin '{}' not found at {}",
                scheme,
                path.display()
            )))
        } else {
            Err(Error::DaemonNotRunning(format!(
                "No plugin sockets under {}",
                self.socket_root.display()
            )))
        }
    }

    fn any_plugin_present(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.socket_root) else {
            return false;
        };
        entries.filter_map(|e| e.ok()).any(|e| is_socket(&e.path()))
    }
}

fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_plain_scheme() {
        let u = DeviceUri::parse("sim://").unwrap();
        assert_eq!(u.scheme, "sim");
        assert_eq!(u.subproto, None);
        assert_eq!(u.host, None);
        assert_eq!(u.username, None);
        assert!(u.params.is_empty());
    }

    #[test]
    fn test_parse_full_uri() {
        let u = DeviceUri::parse("smispy+ssl://admin@emc-smi:5989/?namespace=root/emc").unwrap();
        assert_eq!(u.scheme, "smispy");
        assert_eq!(u.subproto.as_deref(), Some("ssl"));
        assert_eq!(u.host.as_deref(), Some("emc-smi"));
        assert_eq!(u.port, Some(5989));
        assert_eq!(u.username.as_deref(), Some("admin"));
        assert_eq!(u.params.get("namespace").map(String::as_str), Some("root/emc"));
        assert_eq!(u.require_param("namespace").unwrap(), "root/emc");
        assert_matches!(u.require_param("nope"), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_parse_splits_on_first_plus_only() {
        let u = DeviceUri::parse("ontap+ssl+extra://filer").unwrap();
        assert_eq!(u.scheme, "ontap");
        assert_eq!(u.subproto.as_deref(), Some("ssl+extra"));
    }

    #[test]
    fn test_parse_rejects_schemeless() {
        assert_matches!(DeviceUri::parse("no scheme here"), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_resolve_missing_root_is_daemon_not_running() {
        let cfg = IpcConfig::with_root("/nonexistent/arraybridge-test");
        assert_matches!(cfg.resolve("sim"), Err(Error::DaemonNotRunning(_)));
    }

    #[test]
    fn test_resolve_missing_scheme_with_live_root() {
        // A root that exists but holds no sockets still reads as "daemon
        // not running" rather than blaming the plugin.
        let dir = tempfile::tempdir().unwrap();
        let cfg = IpcConfig::with_root(dir.path());
        assert_matches!(cfg.resolve("sim"), Err(Error::DaemonNotRunning(_)));
    }

    #[test]
    fn test_plugin_socket_path() {
        let cfg = IpcConfig::with_root("/run/ab");
        assert_eq!(cfg.plugin_socket("sim"), PathBuf::from("/run/ab/sim"));
    }
}
