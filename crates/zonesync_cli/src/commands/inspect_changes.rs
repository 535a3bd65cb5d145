//! Inspect-changes command implementation.

use serde::Serialize;
use std::path::Path;
use zonesync_engine::ChangeLog;
use zonesync_protocol::{ChangeLogEntry, MutationKind};

/// Which entries to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFilter {
    /// Every entry.
    All,
    /// Entries captured by a pass that has not finished.
    Queued,
    /// Entries recorded since the last pass started.
    Unqueued,
}

/// One change-log entry for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Ledger sequence number.
    pub seq: u64,
    /// Record ID.
    pub record_id: String,
    /// Entity type.
    pub entity_type: String,
    /// `insert`, `update` or `delete`.
    pub mutation: &'static str,
    /// Changed fields of an update.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
    /// Creation time in milliseconds.
    pub created_at: u64,
    /// Whether a pass captured the entry.
    pub queued: bool,
}

impl From<&ChangeLogEntry> for EntryInfo {
    fn from(entry: &ChangeLogEntry) -> Self {
        Self {
            seq: entry.seq,
            record_id: entry.unique_id.to_string(),
            entity_type: entry.entity_type.clone(),
            mutation: mutation_label(entry.mutation_kind),
            changed_fields: entry.changed_fields.iter().cloned().collect(),
            created_at: entry.created_at,
            queued: entry.queued,
        }
    }
}

/// Change log inspection result.
#[derive(Debug, Serialize)]
pub struct ChangesReport {
    /// Change log path.
    pub path: String,
    /// Total entries.
    pub total: usize,
    /// Entries captured by an unfinished pass.
    pub queued: usize,
    /// Entries not yet captured.
    pub unqueued: usize,
    /// Next sequence to be assigned.
    pub next_seq: u64,
    /// Listed entries.
    pub entries: Vec<EntryInfo>,
}

fn mutation_label(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Inserted => "insert",
        MutationKind::Updated => "update",
        MutationKind::Deleted => "delete",
    }
}

/// Reads the change log without taking its lock.
pub fn collect(
    path: &Path,
    filter: EntryFilter,
    limit: Option<usize>,
) -> Result<ChangesReport, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No change log found at {:?}", path).into());
    }

    let ledger = ChangeLog::inspect(path)?;
    let page = ledger.pending_page(None, usize::MAX);
    let entries = page
        .entries
        .iter()
        .filter(|e| match filter {
            EntryFilter::All => true,
            EntryFilter::Queued => e.queued,
            EntryFilter::Unqueued => !e.queued,
        })
        .take(limit.unwrap_or(usize::MAX))
        .map(EntryInfo::from)
        .collect();

    Ok(ChangesReport {
        path: path.display().to_string(),
        total: ledger.len(),
        queued: ledger.queued_count(),
        unqueued: ledger.unqueued_count(),
        next_seq: ledger.next_seq(),
        entries,
    })
}

/// Runs the inspect-changes command.
pub fn run(
    path: &Path,
    filter: EntryFilter,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path, filter, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

fn print_text_output(report: &ChangesReport) {
    println!("Change log: {}", report.path);
    println!(
        "Entries: {} ({} queued, {} pending)",
        report.total, report.queued, report.unqueued
    );
    println!("Next sequence: {}", report.next_seq);

    if report.entries.is_empty() {
        return;
    }

    println!();
    println!(
        "{:>8}  {:<7}  {:<6}  {:<16}  RECORD",
        "SEQ", "KIND", "QUEUED", "ENTITY"
    );
    for entry in &report.entries {
        let fields = if entry.changed_fields.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.changed_fields.join(", "))
        };
        println!(
            "{:>8}  {:<7}  {:<6}  {:<16}  {}{}",
            entry.seq,
            entry.mutation,
            if entry.queued { "yes" } else { "no" },
            entry.entity_type,
            entry.record_id,
            fields
        );
    }
}
