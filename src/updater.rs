//! One reconciliation pass: probe, compare with the cache, resolve the zone,
//! upsert the record and remember the address.

use crate::cache::LastIpCache;
use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::error::Result;
use crate::probe::AddressProbe;
use crate::reconciler::{desired_record, reconcile, Reconciliation};
use std::net::IpAddr;
use std::path::PathBuf;

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The address matched the cache, Cloudflare was not contacted.
    NoChange,
    /// The record was checked and brought up to date.
    Reconciled(Reconciliation),
}

/// Drives a single update run.
pub struct Updater {
    config: Config,
    config_path: PathBuf,
    client: CloudflareClient,
    probe: Box<dyn AddressProbe>,
    cache: LastIpCache,
}

impl Updater {
    /// `config_path` is where `config` was loaded from. The resolved zone ID
    /// is written back there and the cache file is named after it.
    pub fn new(
        config: Config,
        config_path: impl Into<PathBuf>,
        client: CloudflareClient,
        probe: Box<dyn AddressProbe>,
    ) -> Self {
        let config_path = config_path.into();
        let cache = LastIpCache::for_config(&config_path, config.work_dir.as_deref());
        tracing::debug!("Using IP cache file {}", cache.path().display());

        Self {
            config,
            config_path,
            client,
            probe,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &LastIpCache {
        &self.cache
    }

    /// Run one pass.
    ///
    /// With `force` the cache comparison is skipped; the record is still only
    /// mutated when it differs. A returned error has already been logged with
    /// the stage that failed.
    pub async fn run(&mut self, force: bool) -> Result<RunOutcome> {
        let current = self
            .probe
            .current_address(&self.config.interface, self.config.ipversion)
            .await
            .inspect_err(|e| tracing::error!("Address resolution failed: {}", e))?;

        if !force && self.matches_cache(current) {
            tracing::info!(
                "Current IP ({}) matches cached IP from {}. No update needed",
                current,
                self.cache.path().display()
            );
            return Ok(RunOutcome::NoChange);
        }

        let zone_id = self
            .zone_id()
            .await
            .inspect_err(|e| tracing::error!("Zone lookup failed: {}", e))?;

        let desired = desired_record(&self.config, current);
        let outcome = reconcile(&self.client, &zone_id, &desired)
            .await
            .inspect_err(|e| tracing::error!("Record reconciliation failed: {}", e))?;

        if let Err(e) = self.cache.save(&desired.content) {
            tracing::warn!(
                "Cloudflare update succeeded, but failed to write current IP to cache file {}: {}",
                self.cache.path().display(),
                e
            );
        }

        Ok(RunOutcome::Reconciled(outcome))
    }

    fn matches_cache(&self, current: IpAddr) -> bool {
        let last = match self.cache.load() {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!(
                    "Could not read last IP cache {}: {}",
                    self.cache.path().display(),
                    e
                );
                return false;
            }
        };

        if last.is_empty() {
            tracing::info!("No valid cached IP found, checking Cloudflare");
            return false;
        }
        if last.parse::<IpAddr>().ok() == Some(current) {
            return true;
        }
        tracing::info!(
            "Current IP ({}) differs from cached IP ({}), checking Cloudflare",
            current,
            last
        );
        false
    }

    /// Cached zone ID, or a fresh lookup that is written back to the
    /// configuration file on a best-effort basis.
    async fn zone_id(&mut self) -> Result<String> {
        if let Some(zone_id) = &self.config.zone_id {
            tracing::info!("Using cached zone ID from config file: {}", zone_id);
            return Ok(zone_id.clone());
        }

        let zone_id = self.client.zone_id(&self.config.zone).await?;
        self.config.zone_id = Some(zone_id.clone());

        if let Err(e) = self.config.save_to(&self.config_path) {
            tracing::warn!(
                "Failed to save zone ID to config file {}: {}. Continuing with the fetched ID",
                self.config_path.display(),
                e
            );
        }

        Ok(zone_id)
    }
}
