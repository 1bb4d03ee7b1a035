//! Hub configuration.
//!
//! The configuration file is TOML with two tables:
//!
//! ```toml
//! [hub]
//! upstream = "http://mirrors.kernel.org/archlinux"
//! port = 9129
//! probe_timeout_ms = 5000
//!
//! [peer]
//! "mirror1" = "archlinux/db,archlinux/pkg"
//! "mirror2:8080" = ",pkg"
//! ```
//!
//! Each `[peer]` key is `host[:port]` (port defaults to 80) and each value is
//! `db_prefix,pkg_prefix`. An empty prefix means the peer has no files of
//! that class and is skipped for such requests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use http::Uri;
use serde::Deserialize;

use crate::error::Error;

/// Upstream mirror used when no peer can serve a file.
pub const DEFAULT_UPSTREAM: &str = "http://mirrors.kernel.org/archlinux";

/// Port the hub listens on.
pub const DEFAULT_PORT: u16 = 9129;

/// Port assumed for a peer entry without an explicit one.
pub const DEFAULT_PEER_PORT: u16 = 80;

/// How long an outstanding probe may go unanswered before its peer
/// connection is recycled.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Configuration file consulted when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/pachub.toml";

/// Fully resolved hub configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port the hub listens on.
    pub port: u16,
    /// The canonical upstream mirror.
    pub upstream: Upstream,
    /// Deadline for each outstanding peer probe.
    pub probe_timeout: Duration,
    /// Configured peer mirrors, in deterministic (lexicographic) order.
    pub peers: Vec<PeerConfig>,
}

/// The upstream mirror, split out of its URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    /// The URL path with its leading slash removed; used as both the
    /// database and the package prefix.
    pub prefix: String,
}

/// One configured peer mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix under which the peer publishes database files, if any.
    pub db_prefix: Option<String>,
    /// Prefix under which the peer publishes package files, if any.
    pub pkg_prefix: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    hub: RawHub,
    peer: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawHub {
    upstream: String,
    port: u16,
    probe_timeout_ms: u64,
}

impl Default for RawHub {
    fn default() -> RawHub {
        RawHub {
            upstream: DEFAULT_UPSTREAM.to_owned(),
            port: DEFAULT_PORT,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: DEFAULT_PORT,
            upstream: Upstream {
                host: "mirrors.kernel.org".to_owned(),
                port: 80,
                prefix: "archlinux".to_owned(),
            },
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`.
    ///
    /// An unreadable file is not an error: the hub logs a warning and runs
    /// with the built-in defaults. A file that exists but does not parse is
    /// a startup error.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "cannot read config file, using defaults"
                );
                return Ok(Config::default());
            }
        };
        Config::parse(&raw)
    }

    /// Parses a configuration document.
    pub fn parse(raw: &str) -> crate::Result<Config> {
        let raw: RawConfig = toml::from_str(raw)
            .map_err(|err| Error::new_config("malformed config file").with(err))?;

        let upstream = parse_upstream(&raw.hub.upstream)?;
        let peers = raw
            .peer
            .iter()
            .map(|(key, value)| parse_peer(key, value))
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Config {
            port: raw.hub.port,
            upstream,
            probe_timeout: Duration::from_millis(raw.hub.probe_timeout_ms),
            peers,
        })
    }
}

fn parse_upstream(url: &str) -> crate::Result<Upstream> {
    let uri: Uri = url
        .parse()
        .map_err(|err| Error::new_config(format!("bad upstream url '{}'", url)).with(err))?;

    let host = match uri.host() {
        Some(host) => host.to_owned(),
        None => {
            return Err(Error::new_config(format!(
                "upstream url '{}' has no host",
                url
            )))
        }
    };
    let https = uri.scheme_str() == Some("https");
    let port = uri
        .port_u16()
        .unwrap_or(if https { 443 } else { 80 });
    let prefix = uri.path().trim_start_matches('/').to_owned();

    Ok(Upstream { host, port, prefix })
}

// A peer entry is `host[:port] = "db_prefix,pkg_prefix"`.
fn parse_peer(key: &str, value: &str) -> crate::Result<PeerConfig> {
    let (host, port) = match key.rfind(':') {
        Some(at) => {
            let port = key[at + 1..].parse::<u16>().map_err(|err| {
                Error::new_config(format!("peer '{}' has a bad port", key)).with(err)
            })?;
            (&key[..at], port)
        }
        None => (key, DEFAULT_PEER_PORT),
    };
    if host.is_empty() {
        return Err(Error::new_config(format!("peer '{}' has an empty host", key)));
    }

    let comma = match value.find(',') {
        Some(comma) => comma,
        None => {
            return Err(Error::new_config(format!(
                "peer '{}' must be configured as 'db_prefix,pkg_prefix'",
                key
            )))
        }
    };
    let (db, pkg) = (&value[..comma], &value[comma + 1..]);

    Ok(PeerConfig {
        host: host.to_owned(),
        port,
        db_prefix: non_empty(db),
        pkg_prefix: non_empty(pkg),
    })
}

fn non_empty(prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_owned())
    }
}
