//! Configuration management for cfddns.
//!
//! The configuration document is JSON by default (`*.json`, or any other
//! extension) and TOML when the file ends in `.toml`. It is rewritten in place
//! once a zone ID has been resolved so later runs can skip the zone lookup.

use crate::error::{DdnsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Sentinel record name for the zone apex.
const ROOT_RECORD: &str = "@";

/// TTL value Cloudflare interprets as "automatic".
pub const AUTO_TTL: i64 = 1;

/// Address family of the managed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

impl IpVersion {
    /// DNS record type written for this family.
    pub fn record_type(self) -> &'static str {
        match self {
            IpVersion::Ipv4 => "A",
            IpVersion::Ipv6 => "AAAA",
        }
    }

    /// Whether `ip` belongs to this family.
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            IpVersion::Ipv4 => ip.is_ipv4(),
            IpVersion::Ipv6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::Ipv4 => f.write_str("ipv4"),
            IpVersion::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// On-disk format of the configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Main configuration structure.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Cloudflare API token with `Zone:Read` and `DNS:Edit` permissions.
    pub api_token: String,

    /// Zone name (e.g., "example.com").
    pub zone: String,

    /// Record name relative to the zone, "@" or the zone name for the apex.
    pub record: String,

    /// Address family to publish.
    pub ipversion: IpVersion,

    /// Network interface the address is read from.
    pub interface: String,

    /// TTL in seconds, 1 means automatic.
    #[serde(default = "default_ttl")]
    pub ttl: i64,

    /// Whether to proxy through Cloudflare (default: false).
    #[serde(default)]
    pub proxied: bool,

    /// Zone ID, filled in after the first successful lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,

    /// Directory holding the last-address cache file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
}

fn default_ttl() -> i64 {
    AUTO_TTL
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"<redacted>")
            .field("zone", &self.zone)
            .field("record", &self.record)
            .field("ipversion", &self.ipversion)
            .field("interface", &self.interface)
            .field("ttl", &self.ttl)
            .field("proxied", &self.proxied)
            .field("zone_id", &self.zone_id)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DdnsError::Config(format!("could not read {}: {}", path.display(), e))
        })?;

        let mut config =
            Self::parse(&content, ConfigFormat::from_path(path)).map_err(|e| match e {
                DdnsError::Config(msg) => DdnsError::Config(format!("{}: {}", path.display(), msg)),
                other => other,
            })?;
        config.validate()?;

        tracing::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse a document without validating it.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| DdnsError::Config(e.to_string()))
            }
            ConfigFormat::Toml => Ok(toml::from_str(content)?),
        }
    }

    /// Check required fields and normalise optional ones.
    ///
    /// A TTL below 1 is clamped to 1 (automatic) rather than rejected.
    pub fn validate(&mut self) -> Result<()> {
        let required = [
            ("api_token", &self.api_token),
            ("zone", &self.zone),
            ("record", &self.record),
            ("interface", &self.interface),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DdnsError::Config(format!(
                    "missing required field '{}'",
                    field
                )));
            }
        }

        if self.ttl < AUTO_TTL {
            tracing::warn!(
                "TTL value {} is less than 1, defaulting to 1 (automatic)",
                self.ttl
            );
            self.ttl = AUTO_TTL;
        }

        self.work_dir = self
            .work_dir
            .take()
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty());
        self.zone_id = self.zone_id.take().filter(|id| !id.trim().is_empty());

        Ok(())
    }

    /// Save configuration to a specific path, readable by the owner only.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)? + "\n",
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };
        write_private(path, content.as_bytes())?;

        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Fully-qualified name of the managed record.
    pub fn fqdn(&self) -> String {
        if self.record == ROOT_RECORD || self.record == self.zone {
            self.zone.clone()
        } else {
            format!("{}.{}", self.record, self.zone)
        }
    }

    /// DNS record type for the configured address family.
    pub fn record_type(&self) -> &'static str {
        self.ipversion.record_type()
    }
}

/// Write `contents` to `path`, restricting access to the owner on Unix.
///
/// The data goes to a sibling temporary file that is renamed over `path`, so
/// an interrupted write never leaves `path` truncated.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = temp_path(path)?;
    if let Err(e) = write_new_private(&tmp_path, contents) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}

fn temp_path(path: &Path) -> std::io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

fn write_new_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;

    // `mode` only applies on creation, and a stale temp file may be left over.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "api_token": "token",
        "zone": "example.com",
        "record": "home",
        "ipversion": "ipv4",
        "interface": "eth0",
        "ttl": 300,
        "proxied": false
    }"#;

    fn sample() -> Config {
        let mut config = Config::parse(SAMPLE, ConfigFormat::Json).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_json() {
        let config = sample();
        assert_eq!(config.zone, "example.com");
        assert_eq!(config.ipversion, IpVersion::Ipv4);
        assert_eq!(config.ttl, 300);
        assert!(config.zone_id.is_none());
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let doc = SAMPLE.replace("\"proxied\": false", "\"proxied\": false, \"extra\": 1");
        assert!(matches!(
            Config::parse(&doc, ConfigFormat::Json),
            Err(DdnsError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_ipversion_rejected() {
        let doc = SAMPLE.replace("ipv4", "ipv5");
        assert!(Config::parse(&doc, ConfigFormat::Json).is_err());
    }

    #[test]
    fn test_missing_required_field() {
        let doc = SAMPLE.replace("\"interface\": \"eth0\",", "");
        assert!(Config::parse(&doc, ConfigFormat::Json).is_err());

        let mut config = sample();
        config.api_token = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api_token"));
    }

    #[test]
    fn test_ttl_clamped() {
        let mut config = sample();
        config.ttl = -5;
        config.validate().unwrap();
        assert_eq!(config.ttl, AUTO_TTL);

        let doc = SAMPLE.replace("\"ttl\": 300,", "");
        let config = Config::parse(&doc, ConfigFormat::Json).unwrap();
        assert_eq!(config.ttl, AUTO_TTL);
    }

    #[test]
    fn test_blank_optionals_normalised() {
        let mut config = sample();
        config.work_dir = Some("  /var/lib/cfddns \n".to_string());
        config.zone_id = Some(String::new());
        config.validate().unwrap();
        assert_eq!(config.work_dir.as_deref(), Some("/var/lib/cfddns"));
        assert!(config.zone_id.is_none());

        config.work_dir = Some("   ".to_string());
        config.validate().unwrap();
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn test_fqdn() {
        let mut config = sample();
        assert_eq!(config.fqdn(), "home.example.com");

        config.record = "@".to_string();
        assert_eq!(config.fqdn(), "example.com");

        config.record = "example.com".to_string();
        assert_eq!(config.fqdn(), "example.com");
    }

    #[test]
    fn test_record_type() {
        let mut config = sample();
        assert_eq!(config.record_type(), "A");
        config.ipversion = IpVersion::Ipv6;
        assert_eq!(config.record_type(), "AAAA");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/ddns.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a/ddns.TOML")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a/ddns.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a/ddns")), ConfigFormat::Json);
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut config = sample();
        config.api_token = "super-secret-token".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    fn test_save_and_reload_preserves_zone_id() {
        let dir = tempfile::tempdir().unwrap();

        for name in ["ddns.json", "ddns.toml"] {
            let path = dir.path().join(name);
            let mut config = sample();
            config.zone_id = Some("zone-123".to_string());
            config.save_to(&path).unwrap();

            let reloaded = Config::load_from(&path).unwrap();
            assert_eq!(reloaded, config);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddns.json");
        std::fs::write(&path, SAMPLE).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        sample().save_to(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddns.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut config = sample();
        config.zone_id = Some("zone-123".to_string());
        config.save_to(&path).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("ddns.json")]);
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_failed_save_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddns.json");
        std::fs::write(&path, SAMPLE).unwrap();
        // A directory where the temporary file would go makes the write fail.
        std::fs::create_dir(dir.path().join(".ddns.json.tmp")).unwrap();

        let mut config = sample();
        config.zone_id = Some("zone-123".to_string());
        assert!(config.save_to(&path).is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE);
        assert!(dir.path().join(".ddns.json.tmp").is_dir());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(DdnsError::Config(_))));
    }
}
