//! Current address discovery for a network interface.
//!
//! [`InterfaceProbe`] asks the operating system through `ip` and falls back to
//! `ifconfig` when `ip` is not installed. Private, loopback, link-local and
//! unique-local addresses are skipped, so the first global address wins.

use crate::config::IpVersion;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on a single probe command.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Source of the address to publish.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AddressProbe: Send + Sync {
    /// Return the current public address of `interface` for `version`.
    async fn current_address(&self, interface: &str, version: IpVersion) -> Result<IpAddr>;
}

/// Probe backed by the `ip` / `ifconfig` commands.
#[derive(Debug, Clone)]
pub struct InterfaceProbe {
    timeout: Duration,
}

impl InterfaceProbe {
    /// Create a probe with the default command timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a probe with a custom command timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `ip addr show`, restricted to global scope when the system supports it.
    async fn ip_addr_show(&self, interface: &str, version: IpVersion) -> std::io::Result<String> {
        let mut args = Vec::new();
        if version == IpVersion::Ipv6 {
            args.push("-6");
        }
        args.extend(["addr", "show", interface]);

        let mut scoped = args.clone();
        scoped.extend(["scope", "global"]);

        match self.run("ip", &scoped).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                tracing::warn!(
                    "Global scope lookup on {} failed ({}), retrying without scope filter",
                    interface,
                    e
                );
                self.run("ip", &args).await
            }
            result => result,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<String> {
        tracing::debug!("Running {} {}", program, args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| {
            std::io::Error::new(
                ErrorKind::TimedOut,
                format!("{} timed out after {}s", program, self.timeout.as_secs()),
            )
        })??;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for InterfaceProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressProbe for InterfaceProbe {
    async fn current_address(&self, interface: &str, version: IpVersion) -> Result<IpAddr> {
        let output = match self.ip_addr_show(interface, version).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("'ip' command not found, falling back to 'ifconfig'");
                self.run("ifconfig", &[interface]).await.map_err(|e| {
                    if e.kind() == ErrorKind::NotFound {
                        DdnsError::AddressProbe(
                            "neither 'ip' nor 'ifconfig' found in PATH".to_string(),
                        )
                    } else {
                        DdnsError::AddressProbe(format!("ifconfig {}: {}", interface, e))
                    }
                })?
            }
            result => result.map_err(|e| {
                DdnsError::AddressProbe(format!("ip addr show {}: {}", interface, e))
            })?,
        };

        let ip = select_public(&output, version).ok_or_else(|| {
            DdnsError::AddressProbe(format!(
                "no usable public {} address found on interface {}",
                version, interface
            ))
        })?;

        tracing::info!("Found public IP {} on interface {}", ip, interface);
        Ok(ip)
    }
}

/// First public address of `version` in `ip`/`ifconfig` output.
pub fn select_public(output: &str, version: IpVersion) -> Option<IpAddr> {
    parse_addresses(output, version).into_iter().find(|ip| {
        let public = is_public(ip);
        if !public {
            tracing::debug!("Skipping private/local IP {}", ip);
        }
        public
    })
}

/// Every `inet`/`inet6` address listed in `ip`/`ifconfig` output, in order.
///
/// Handles `inet 1.2.3.4/24`, `inet addr:1.2.3.4`, `inet6 addr: fe80::1/64`
/// and `inet6 fe80::1%lo0`.
pub fn parse_addresses(output: &str, version: IpVersion) -> Vec<IpAddr> {
    let keyword = match version {
        IpVersion::Ipv4 => "inet",
        IpVersion::Ipv6 => "inet6",
    };

    let mut addresses = Vec::new();
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token != keyword {
            continue;
        }
        let Some(mut value) = tokens.next() else {
            break;
        };
        if value == "addr:" {
            let Some(next) = tokens.next() else {
                break;
            };
            value = next;
        }
        let value = value.strip_prefix("addr:").unwrap_or(value);
        let value = value.split(['/', '%']).next().unwrap_or(value);

        match value.parse::<IpAddr>() {
            Ok(ip) if version.matches(&ip) => addresses.push(ip),
            _ => tracing::debug!("Ignoring unparseable {} value {:?}", keyword, value),
        }
    }
    addresses
}

/// Whether `ip` is routable on the public internet.
pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_public_v4(ip),
        IpAddr::V6(ip) => is_public_v6(ip),
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let link_local_multicast = a == 224 && b == 0 && c == 0;
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || link_local_multicast)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let link_local = first & 0xffc0 == 0xfe80;
    let link_local_multicast = first & 0xff0f == 0xff02;
    let unique_local = first & 0xfe00 == 0xfc00;
    !(ip.is_loopback() || ip.is_unspecified() || link_local || link_local_multicast || unique_local)
}
