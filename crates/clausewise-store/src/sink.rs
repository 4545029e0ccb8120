//! Persisted compliance reports.

use std::path::PathBuf;

use async_trait::async_trait;
use clausewise_core::ComplianceReport;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::StoreError;

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist a report and return where it went.
    async fn save(&self, report: &ComplianceReport) -> Result<String, StoreError>;
}

/// Writes each report as `<dir>/<contract_id>-<report_id>.json`. Reports are
/// write-once: an existing file is never replaced.
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, report: &ComplianceReport) -> PathBuf {
        let contract: String = report
            .contract_id()
            .as_str()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("{contract}-{}.json", report.report_id()))
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn save(&self, report: &ComplianceReport) -> Result<String, StoreError> {
        let path = self.path_for(report);
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&json).await?;
        file.flush().await?;
        info!(
            report = %report.report_id(),
            status = report.run_status().as_str(),
            path = %path.display(),
            "report saved"
        );
        Ok(path.display().to_string())
    }
}
