use crate::domain::model::CycleReport;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    package: &'a str,
    status: String,
    failed_stage: String,
    deleted_items: String,
    package_item_id: &'a str,
    service_item_id: &'a str,
    artifact_path: String,
    duration_ms: u64,
    finished_at: String,
    errors: String,
}

/// Writes one CSV row per package cycle, replacing any previous report.
pub fn write_report(path: &Path, reports: &[CycleReport], finished_at: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    let finished_at = finished_at.to_rfc3339();

    for report in reports {
        writer.serialize(ReportRow {
            package: &report.package,
            status: report.status.to_string(),
            failed_stage: report.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
            deleted_items: report
                .deleted
                .iter()
                .map(|item| item.id.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            package_item_id: report.package_item.as_ref().map(|i| i.id.as_str()).unwrap_or(""),
            service_item_id: report.service_item.as_ref().map(|i| i.id.as_str()).unwrap_or(""),
            artifact_path: report
                .artifact
                .as_ref()
                .map(|a| a.path.display().to_string())
                .unwrap_or_default(),
            duration_ms: report.duration_ms(),
            finished_at: finished_at.clone(),
            errors: report
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
        })?;
    }

    writer.flush()?;
    tracing::info!("📝 Wrote report for {} packages to {}", reports.len(), path.display());
    Ok(())
}
