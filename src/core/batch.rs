use crate::core::orchestrator::{CyclePlan, ReplacementOrchestrator};
use crate::domain::model::{duration_millis, CycleReport, CycleStatus, PackageSpec, WorkingMap};
use crate::domain::ports::{LayerSource, RemoteCatalog, TilePackager};
use crate::utils::monitor::SystemMonitor;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of a whole run.
#[derive(Debug)]
pub struct BatchSummary {
    pub reports: Vec<CycleReport>,
    pub duration: Duration,
}

impl BatchSummary {
    pub fn count(&self, status: CycleStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    /// The worst cycle status in the batch; an empty batch succeeded.
    pub fn overall_status(&self) -> CycleStatus {
        if self.count(CycleStatus::Failed) > 0 {
            CycleStatus::Failed
        } else if self.count(CycleStatus::PartiallyPublished) > 0 {
            CycleStatus::PartiallyPublished
        } else {
            CycleStatus::Succeeded
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.overall_status() {
            CycleStatus::Succeeded => 0,
            CycleStatus::Failed => 1,
            CycleStatus::PartiallyPublished => 2,
        }
    }

    pub fn get_execution_summary(&self) -> HashMap<String, serde_json::Value> {
        let mut summary = HashMap::new();

        summary.insert("total_packages".to_string(), serde_json::Value::from(self.reports.len()));
        summary.insert(
            "succeeded".to_string(),
            serde_json::Value::from(self.count(CycleStatus::Succeeded)),
        );
        summary.insert(
            "partially_published".to_string(),
            serde_json::Value::from(self.count(CycleStatus::PartiallyPublished)),
        );
        summary.insert("failed".to_string(), serde_json::Value::from(self.count(CycleStatus::Failed)));
        summary.insert(
            "total_duration_ms".to_string(),
            serde_json::Value::from(duration_millis(self.duration)),
        );

        let failed: Vec<serde_json::Value> = self
            .reports
            .iter()
            .filter(|r| r.status == CycleStatus::Failed)
            .map(|r| serde_json::Value::String(r.package.clone()))
            .collect();
        summary.insert("failed_packages".to_string(), serde_json::Value::Array(failed));

        summary
    }
}

/// Runs the replacement cycle for every package, in order, one at a time.
///
/// A failed cycle never stops the batch. The working map is cleared before
/// the first cycle and comes back empty from each one.
pub struct PublishBatch<L, P, R> {
    orchestrator: ReplacementOrchestrator<L, P, R>,
    monitor: Option<SystemMonitor>,
}

impl<L, P, R> PublishBatch<L, P, R>
where
    L: LayerSource,
    P: TilePackager,
    R: RemoteCatalog,
{
    pub fn new(orchestrator: ReplacementOrchestrator<L, P, R>) -> Self {
        Self {
            orchestrator,
            monitor: None,
        }
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = enabled.then(|| SystemMonitor::new(true));
        self
    }

    pub fn orchestrator(&self) -> &ReplacementOrchestrator<L, P, R> {
        &self.orchestrator
    }

    pub async fn run(&self, specs: &[PackageSpec], mut map: WorkingMap) -> (WorkingMap, BatchSummary) {
        let started = Instant::now();
        let mut reports = Vec::with_capacity(specs.len());

        let leftover = map.clear();
        if !leftover.is_empty() {
            tracing::info!("Removed {} layers left in the map by an earlier session", leftover.len());
        }
        if let Some(monitor) = &self.monitor {
            monitor.log_stats("Batch started");
        }

        for (index, spec) in specs.iter().enumerate() {
            tracing::info!("📦 Package {}/{}: '{}'", index + 1, specs.len(), spec.name());
            let (returned, report) = self.orchestrator.run_cycle(spec, map).await;
            map = returned;
            reports.push(report);

            if let Some(monitor) = &self.monitor {
                monitor.log_stats(&format!("After '{}'", spec.name()));
            }
        }

        let summary = BatchSummary {
            reports,
            duration: started.elapsed(),
        };
        tracing::info!(
            "🏁 Batch finished in {:?}: {} succeeded, {} partially published, {} failed",
            summary.duration,
            summary.count(CycleStatus::Succeeded),
            summary.count(CycleStatus::PartiallyPublished),
            summary.count(CycleStatus::Failed)
        );

        (map, summary)
    }

    pub async fn plan(&self, specs: &[PackageSpec]) -> Vec<CyclePlan> {
        let mut plans = Vec::with_capacity(specs.len());
        for spec in specs {
            plans.push(self.orchestrator.plan_cycle(spec).await);
        }
        plans
    }
}
