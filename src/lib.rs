//! # cfddns
//!
//! A run-to-completion dynamic DNS updater for Cloudflare.
//!
//! Each invocation reads the public address of one network interface, skips
//! all remote work when it matches the address recorded by the previous run,
//! and otherwise creates or updates the matching `A`/`AAAA` record.
//!
//! ## Usage
//!
//! ```bash
//! # Run once, typically from cron or a systemd timer
//! cfddns -f /etc/cfddns/home.json
//!
//! # Ignore the cached address and check the record anyway
//! cfddns -f /etc/cfddns/home.json --force
//! ```
//!
//! Delete the `<config>.lastip` file to force a check on the next run.

pub mod cache;
pub mod cloudflare;
pub mod config;
pub mod error;
pub mod probe;
pub mod reconciler;
pub mod updater;

pub use config::Config;
pub use error::{DdnsError, Result};
pub use probe::{AddressProbe, InterfaceProbe};
pub use updater::{RunOutcome, Updater};
