//! Create-or-update of the managed DNS record.
//!
//! The existing record is fetched first and mutating calls are only issued
//! when its content, proxy flag or TTL differ from the desired state.

use crate::cloudflare::{CloudflareClient, DesiredRecord, RemoteRecord};
use crate::config::Config;
use crate::error::Result;
use std::net::IpAddr;

/// What reconciliation did to the remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The record already matched.
    Unchanged,
    /// No record existed and one was created.
    Created,
    /// An existing record was replaced.
    Updated,
}

/// Desired record state for `ip` under `config`.
pub fn desired_record(config: &Config, ip: IpAddr) -> DesiredRecord {
    DesiredRecord {
        record_type: config.record_type().to_string(),
        name: config.fqdn(),
        content: ip.to_string(),
        ttl: config.ttl,
        proxied: config.proxied,
    }
}

/// Whether `existing` already carries the desired content, proxy flag and TTL.
pub fn is_up_to_date(existing: &RemoteRecord, desired: &DesiredRecord) -> bool {
    content_matches(&existing.content, &desired.content)
        && existing.proxied == desired.proxied
        && existing.ttl == desired.ttl
}

// Addresses compare by value so differently abbreviated IPv6 text still matches.
fn content_matches(existing: &str, desired: &str) -> bool {
    match (existing.parse::<IpAddr>(), desired.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => existing == desired,
    }
}

/// Pick the record to reconcile against: the first one Cloudflare returned.
pub fn select_record<'a>(
    records: &'a [RemoteRecord],
    desired: &DesiredRecord,
) -> Option<&'a RemoteRecord> {
    let first = records.first()?;
    if records.len() > 1 {
        tracing::warn!(
            "Found {} {} records for {}, using the first one (ID: {})",
            records.len(),
            desired.record_type,
            desired.name,
            first.id
        );
    }
    Some(first)
}

/// Bring the record in `zone_id` to the desired state.
pub async fn reconcile(
    client: &CloudflareClient,
    zone_id: &str,
    desired: &DesiredRecord,
) -> Result<Reconciliation> {
    tracing::info!(
        "Checking DNS record {} ({})",
        desired.name,
        desired.record_type
    );

    let records = client
        .list_records(zone_id, &desired.name, &desired.record_type)
        .await?;

    match select_record(&records, desired) {
        Some(existing) if is_up_to_date(existing, desired) => {
            tracing::info!(
                "DNS record {} ({}) is already up-to-date ({})",
                desired.name,
                desired.record_type,
                desired.content
            );
            Ok(Reconciliation::Unchanged)
        }
        Some(existing) => {
            tracing::info!(
                "Record {} differs (content {} -> {}, proxied {} -> {}, ttl {} -> {}), updating",
                existing.id,
                existing.content,
                desired.content,
                existing.proxied,
                desired.proxied,
                existing.ttl,
                desired.ttl
            );
            let updated = client.update_record(zone_id, &existing.id, desired).await?;
            log_applied("updated", desired, updated.as_ref());
            Ok(Reconciliation::Updated)
        }
        None => {
            tracing::info!(
                "No existing {} record found for {}, creating",
                desired.record_type,
                desired.name
            );
            let created = client.create_record(zone_id, desired).await?;
            log_applied("created", desired, created.as_ref());
            Ok(Reconciliation::Created)
        }
    }
}

fn log_applied(verb: &str, desired: &DesiredRecord, record: Option<&RemoteRecord>) {
    match record {
        Some(record) => tracing::info!(
            "Successfully {} DNS record {} ({}) => {} (ID: {}, proxied: {}, TTL: {})",
            verb,
            record.name,
            record.record_type,
            record.content,
            record.id,
            record.proxied,
            record.ttl
        ),
        None => tracing::info!(
            "Successfully {} DNS record {} ({}) => {}",
            verb,
            desired.name,
            desired.record_type,
            desired.content
        ),
    }
}
