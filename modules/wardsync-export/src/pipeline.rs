use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::info;

use report_client::ReportClient;
use wardsync_common::{add_provenance, stamp_content_hash};
use wardsync_warehouse::{Disposition, WarehouseStore};

use crate::window::ExportWindow;

/// The three tables produced by one export run.
pub struct ExportData {
    pub nurses: Vec<Value>,
    pub patient_trainings: Vec<Value>,
    pub nurse_trainings: Vec<Value>,
}

/// Fetches a date window of training data and the nurse profiles it
/// references. Per-day calls run with bounded parallelism; any failure
/// aborts the run (the export is all-or-nothing, unlike the incremental
/// sync).
pub struct ExportPipeline<'a> {
    client: &'a ReportClient,
    workers: usize,
}

impl<'a> ExportPipeline<'a> {
    pub fn new(client: &'a ReportClient, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    pub async fn fetch(&self, window: ExportWindow) -> Result<Option<ExportData>> {
        let days = days_in(window);
        info!(
            start = %window.start,
            end = %window.end,
            days = days.len(),
            "Fetching training data"
        );

        let mut patient_trainings: Vec<Value> = stream::iter(days.iter().copied())
            .map(|day| self.client.patient_trainings(day))
            .buffer_unordered(self.workers)
            .try_collect::<Vec<Vec<Value>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        let mut nurse_trainings: Vec<Value> = stream::iter(days.iter().copied())
            .map(|day| self.client.nurse_trainings(day))
            .buffer_unordered(self.workers)
            .try_collect::<Vec<Vec<Value>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        if patient_trainings.is_empty() {
            info!("No patient training sessions found");
            return Ok(None);
        }

        stamp_content_hash(&mut patient_trainings);
        stamp_content_hash(&mut nurse_trainings);

        let phones = collect_phones(&patient_trainings, &nurse_trainings);
        info!(phones = phones.len(), "Fetching nurse profiles");
        let nurses: Vec<Value> = stream::iter(phones.iter())
            .map(|phone| self.client.nurse_profile(phone))
            .buffer_unordered(self.workers)
            .try_collect::<Vec<Vec<Value>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        Ok(Some(ExportData {
            nurses,
            patient_trainings,
            nurse_trainings,
        }))
    }
}

fn days_in(window: ExportWindow) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = window.start;
    while day <= window.end {
        days.push(day);
        day = match day.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    days
}

/// Every phone number referenced by the fetched sessions: the
/// comma-separated conductor list on patient trainings, and the trainer
/// and trainee sub-lists on nurse trainings. Sorted and de-duplicated.
pub fn collect_phones(patient_trainings: &[Value], nurse_trainings: &[Value]) -> Vec<String> {
    let mut phones = BTreeSet::new();

    for session in patient_trainings {
        if let Some(conducted_by) = session.get("session_conducted_by").and_then(Value::as_str) {
            for phone in conducted_by.split(',') {
                let phone = phone.trim();
                if !phone.is_empty() {
                    phones.insert(phone.to_string());
                }
            }
        }
    }

    for session in nurse_trainings {
        for list in ["trainerdata1", "traineesdata1"] {
            if let Some(entries) = session.get(list).and_then(Value::as_array) {
                for entry in entries {
                    if let Some(phone) = entry.get("phone_no").and_then(Value::as_str) {
                        phones.insert(phone.to_string());
                    }
                }
            }
        }
    }

    phones.into_iter().collect()
}

/// Load an export into the warehouse: nurses merge keep-latest, training
/// tables append.
pub async fn load_warehouse(
    store: &WarehouseStore,
    mut data: ExportData,
    extracted_at: DateTime<Utc>,
) -> Result<()> {
    add_provenance(&mut data.nurses, extracted_at);
    add_provenance(&mut data.patient_trainings, extracted_at);
    add_provenance(&mut data.nurse_trainings, extracted_at);

    store.merge_latest_nurses(&data.nurses).await?;
    store
        .load(
            "patient_training_sessions",
            &data.patient_trainings,
            Disposition::Append,
        )
        .await?;
    store
        .load(
            "nurse_training_sessions",
            &data.nurse_trainings,
            Disposition::Append,
        )
        .await?;
    Ok(())
}

/// Write an export as JSON-lines files, one per table. Returns the paths
/// written, in table-name order.
pub async fn write_local(data: &ExportData, out_dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let tables = [
        ("nurse_training_sessions", &data.nurse_trainings),
        ("nurses", &data.nurses),
        ("patient_training_sessions", &data.patient_trainings),
    ];

    let mut paths = Vec::new();
    for (name, rows) in tables {
        let path = out_dir.join(format!("{name}.jsonl"));
        let mut lines = String::new();
        for row in rows {
            lines.push_str(&serde_json::to_string(row)?);
            lines.push('\n');
        }
        tokio::fs::write(&path, lines)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), rows = rows.len(), "Wrote export file");
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phones_come_from_conductors_trainers_and_trainees() {
        let patient = vec![json!({"session_conducted_by": "111, 222"})];
        let nurse = vec![json!({
            "trainerdata1": [{"phone_no": "333"}],
            "traineesdata1": [{"phone_no": "222"}, {"phone_no": "444"}],
        })];

        let phones = collect_phones(&patient, &nurse);
        assert_eq!(phones, vec!["111", "222", "333", "444"]);
    }

    #[test]
    fn missing_sublists_are_tolerated() {
        let patient = vec![json!({"id": 1})];
        let nurse = vec![json!({"trainerdata1": null})];
        assert!(collect_phones(&patient, &nurse).is_empty());
    }

    #[test]
    fn duplicate_phones_are_collapsed() {
        let patient = vec![
            json!({"session_conducted_by": "111,111"}),
            json!({"session_conducted_by": "111"}),
        ];
        let phones = collect_phones(&patient, &[]);
        assert_eq!(phones, vec!["111"]);
    }
}
