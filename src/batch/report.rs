use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use tinytemplate::TinyTemplate;

use crate::batch::BatchError;
use crate::task::TaskResult;
use crate::upload::UploadLedger;

pub static UPLOAD_RESULTS: &str = "upload_results.json";
pub static TASK_RESULTS: &str = "task_results.json";
pub static BATCH_RESULTS: &str = "batch_results.json";

/// A row that didn't make it all the way through, `row` is the 1-based data row number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row: usize,
    pub reason: String,
}

/// Everything a batch run produced, written to `batch_results.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub uploaded_files: UploadLedger,
    pub created_tasks: Vec<TaskResult>,
    pub failures: Vec<RowFailure>,
}

/// Paths of the three output files
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub uploads: PathBuf,
    pub tasks: PathBuf,
    pub batch: PathBuf,
}

impl ReportPaths {
    pub fn in_dir(dir: &Path) -> ReportPaths {
        ReportPaths { uploads: dir.join(UPLOAD_RESULTS), tasks: dir.join(TASK_RESULTS), batch: dir.join(BATCH_RESULTS) }
    }
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn submitted(&self) -> usize {
        self.created_tasks.iter().filter(|task| task.is_success()).count()
    }

    /// Write the three output files to `dir`, even when they are empty
    pub fn write(&self, dir: &Path) -> Result<ReportPaths, BatchError> {
        fs::create_dir_all(dir).map_err(|source| BatchError::Write { path: dir.to_path_buf(), source })?;
        let paths = ReportPaths::in_dir(dir);
        write_json(&paths.uploads, &self.uploaded_files)?;
        write_json(&paths.tasks, &self.created_tasks)?;
        write_json(&paths.batch, self)?;
        Ok(paths)
    }

    pub fn read(path: &Path) -> anyhow::Result<BatchReport> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Render the end of run summary with the included template
    pub fn summary(&self, mode: &str, manifest: &Path, rows: usize, output_dir: &Path) -> Result<String, tinytemplate::error::Error> {
        /// included batch summary template
        static SUMMARY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/summary.txt"));
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template("summary", SUMMARY)?;

        let context = SummaryContext {
            mode: mode.to_string(),
            manifest: manifest.display().to_string(),
            rows,
            uploaded: self.uploaded_files.len(),
            created: self.submitted(),
            failed: self.failures.len(),
            failures: self.failures.clone(),
            output_dir: output_dir.display().to_string(),
        };
        tt.render("summary", &context)
    }
}

/// Rendering context for the batch summary
#[derive(Serialize)]
struct SummaryContext {
    mode: String,
    manifest: String,
    rows: usize,
    uploaded: usize,
    created: usize,
    failed: usize,
    failures: Vec<RowFailure>,
    output_dir: String,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), BatchError> {
    let json = serde_json::to_string_pretty(value)?;
    info!("Writing {}", path.display());
    fs::write(path, json).map_err(|source| BatchError::Write { path: path.to_path_buf(), source })
}
