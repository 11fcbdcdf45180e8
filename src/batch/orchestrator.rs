use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::{info, warn};

use crate::api::transport::RetryingTransport;
use crate::batch::manifest::read_manifest;
use crate::batch::observer::{BatchEvent, BatchObserver};
use crate::batch::report::{BatchReport, ReportPaths, RowFailure, UPLOAD_RESULTS};
use crate::batch::BatchError;
use crate::request::config::TaskConfig;
use crate::request::validate::validate;
use crate::settings::Settings;
use crate::task::{TaskCoordinator, TaskResult};
use crate::upload::{UploadCoordinator, UploadLedger, Uploaded};

/// Which halves of the workflow a run performs
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BatchMode {
    /// Upload files, then create tasks
    Full,
    UploadOnly,
    /// Create tasks from the ledger of an earlier upload-only run
    TaskOnly,
}

impl BatchMode {
    pub fn uploads(&self) -> bool {
        matches!(self, BatchMode::Full | BatchMode::UploadOnly)
    }

    pub fn creates_tasks(&self) -> bool {
        matches!(self, BatchMode::Full | BatchMode::TaskOnly)
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BatchMode::Full => write!(f, "full"),
            BatchMode::UploadOnly => write!(f, "upload-only"),
            BatchMode::TaskOnly => write!(f, "task-only"),
        }
    }
}

/// Phases of one batch run, always visited in this order
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BatchState {
    Reading,
    Uploading,
    TaskCreating,
    Reporting,
    Done,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BatchState::Reading => write!(f, "reading"),
            BatchState::Uploading => write!(f, "uploading"),
            BatchState::TaskCreating => write!(f, "creating tasks"),
            BatchState::Reporting => write!(f, "reporting"),
            BatchState::Done => write!(f, "done"),
        }
    }
}

/// What a finished run hands back
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub report: BatchReport,
    /// Data rows in the manifest
    pub rows: usize,
    pub paths: ReportPaths,
}

/// A manifest row on its way through the run
struct RowWork {
    row: usize,
    config: TaskConfig,
    failed: bool,
}

/// Drives one batch run and owns its ledger and report
///
/// Rows are handled strictly in manifest order. A failing row is recorded and skipped, only
/// manifest structure problems and output write errors end the run early.
pub struct BatchOrchestrator<'o> {
    uploader: UploadCoordinator,
    tasker: TaskCoordinator,
    mode: BatchMode,
    data_dir: Option<PathBuf>,
    output_dir: PathBuf,
    state: BatchState,
    report: BatchReport,
    rows: usize,
    observer: &'o mut dyn BatchObserver,
}

impl<'o> BatchOrchestrator<'o> {
    pub fn new(transport: RetryingTransport, settings: &Settings, mode: BatchMode, observer: &'o mut dyn BatchObserver) -> BatchOrchestrator<'o> {
        BatchOrchestrator {
            uploader: UploadCoordinator::new(transport.clone(), &settings.endpoints.upload),
            tasker: TaskCoordinator::new(transport, &settings.endpoints.create_task),
            mode,
            data_dir: settings.data_dir.clone(),
            output_dir: settings.output_dir.clone(),
            state: BatchState::Reading,
            report: BatchReport::default(),
            rows: 0,
            observer,
        }
    }

    /// Process every row of `manifest` and write the output files
    pub async fn run(mut self, manifest: &Path) -> Result<BatchRun, BatchError> {
        self.observer.notify(&BatchEvent::StateChanged(BatchState::Reading));
        let manifest = read_manifest(manifest)?;
        if self.mode == BatchMode::TaskOnly {
            self.report.uploaded_files = self.previous_ledger()?;
        }
        let data_dir = self.data_dir.clone();
        let mut rows: Vec<RowWork> = manifest
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| RowWork { row: i + 1, config: row.to_config(data_dir.as_deref()), failed: false })
            .collect();
        self.rows = rows.len();

        self.transition(BatchState::Uploading);
        if self.mode.uploads() {
            for work in rows.iter_mut() {
                self.upload_row(work).await;
            }
        }

        self.transition(BatchState::TaskCreating);
        for work in rows.iter_mut().filter(|work| !work.failed) {
            self.create_row(work).await;
        }

        self.transition(BatchState::Reporting);
        self.report.failures.sort_by_key(|failure| failure.row);
        let paths = self.report.write(&self.output_dir)?;
        info!(
            "Batch finished: {} rows, {} files uploaded, {} tasks created, {} failed rows",
            self.rows,
            self.report.uploaded_files.len(),
            self.report.submitted(),
            self.report.failures.len()
        );

        self.transition(BatchState::Done);
        Ok(BatchRun { report: self.report, rows: self.rows, paths })
    }

    /// Upload the row's files in field order, stopping at the first failure
    async fn upload_row(&mut self, work: &mut RowWork) {
        let prefix = Some(work.config.title.trim()).filter(|title| !title.is_empty());
        for (field, local) in work.config.files() {
            match self.uploader.upload_once(local, prefix, &mut self.report.uploaded_files).await {
                Ok(uploaded) => self.observer.notify(&BatchEvent::FileUploaded {
                    row: work.row,
                    local,
                    remote: uploaded.remote_path(),
                    reused: matches!(uploaded, Uploaded::Reused(_)),
                }),
                Err(err) => {
                    let reason = format!("{}: {field}: {err}", err.kind());
                    self.fail(work.row, reason);
                    work.failed = true;
                    return;
                }
            }
        }
    }

    async fn create_row(&mut self, work: &mut RowWork) {
        let task = match validate(&work.config) {
            Ok(task) => task,
            Err(err) => {
                self.fail(work.row, format!("{}: {err}", err.kind()));
                work.failed = true;
                return;
            }
        };
        if !self.mode.creates_tasks() {
            return;
        }

        let config = &work.config;
        match self.tasker.create_task(&task, &self.report.uploaded_files).await {
            Ok(submission_id) => {
                self.observer.notify(&BatchEvent::TaskCreated { row: work.row, title: &config.title, submission_id: &submission_id });
                self.report.created_tasks.push(TaskResult::submitted(&config.title, &config.vcf_mode, submission_id));
            }
            Err(err) => {
                let reason = format!("{}: {err}", err.kind());
                self.report.created_tasks.push(TaskResult::failed(&config.title, &config.vcf_mode, reason.clone()));
                self.fail(work.row, reason);
                work.failed = true;
            }
        }
    }

    fn previous_ledger(&self) -> Result<UploadLedger, BatchError> {
        let path = self.output_dir.join(UPLOAD_RESULTS);
        if !path.exists() {
            return Err(BatchError::MissingLedger(path));
        }
        let ledger = UploadLedger::load(&path).map_err(|source| BatchError::LedgerRead { path: path.clone(), source })?;
        if ledger.is_empty() {
            warn!("Upload ledger {} is empty, every row with files will fail", path.display());
        }
        Ok(ledger)
    }

    fn fail(&mut self, row: usize, reason: String) {
        self.observer.notify(&BatchEvent::RowFailed { row, reason: &reason });
        self.report.failures.push(RowFailure { row, reason });
    }

    fn transition(&mut self, next: BatchState) {
        info!("Batch state {} -> {}", self.state, next);
        self.state = next;
        self.observer.notify(&BatchEvent::StateChanged(next));
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;
    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::api::client::{ApiClient, ApiResponse, Timeouts};
    use crate::api::error::AttemptFailure;
    use crate::batch::report::{BatchReport, TASK_RESULTS};
    use crate::settings::Endpoints;

    static HEADER: &str = "samples,title,project,vcf_mode,assembly,upload_vcf,upload_father,upload_mother,clinical_info\n";

    /// Serves uploads and task creation, refusing titles listed in `duplicates`
    #[derive(Default)]
    struct FakeApi {
        uploads: Mutex<Vec<String>>,
        tasks: Mutex<Vec<Value>>,
        duplicates: Vec<&'static str>,
    }

    #[async_trait]
    impl ApiClient for FakeApi {
        async fn upload(&self, _: &str, file: &Path, _: Option<&str>, _: Timeouts) -> Result<ApiResponse, AttemptFailure> {
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push(name.clone());
            Ok(ApiResponse { status: 200, body: format!(r#"{{"upload_path": "uploads/{name}"}}"#) })
        }

        async fn post_json(&self, _: &str, body: &Value, _: Timeouts) -> Result<ApiResponse, AttemptFailure> {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(body.clone());
            let title = body["title"].as_str().unwrap_or_default();
            if self.duplicates.contains(&title) {
                return Ok(ApiResponse { status: 409, body: r#"{"message": "Task has already been submitted"}"#.into() });
            }
            Ok(ApiResponse { status: 200, body: format!(r#"{{"submission_id": "sub-{}"}}"#, tasks.len()) })
        }

        async fn get_json(&self, _: &str, _: &[(&str, &str)], _: Timeouts) -> Result<ApiResponse, AttemptFailure> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct Recording {
        states: Vec<BatchState>,
        failed_rows: Vec<usize>,
    }

    impl BatchObserver for Recording {
        fn notify(&mut self, event: &BatchEvent<'_>) {
            match event {
                BatchEvent::StateChanged(state) => self.states.push(*state),
                BatchEvent::RowFailed { row, .. } => self.failed_rows.push(*row),
                _ => {}
            }
        }
    }

    struct Workspace {
        data: TempDir,
        output: TempDir,
    }

    impl Workspace {
        fn new(files: &[&str]) -> Workspace {
            let data = TempDir::new().unwrap();
            for name in files {
                fs::write(data.path().join(name), b"##fileformat=VCFv4.2\n").unwrap();
            }
            Workspace { data, output: TempDir::new().unwrap() }
        }

        fn manifest(&self, header: &str, rows: &str) -> PathBuf {
            let path = self.data.path().join("samples.csv");
            fs::write(&path, format!("{header}{rows}")).unwrap();
            path
        }

        fn settings(&self) -> Settings {
            Settings {
                base_url: Url::parse("http://localhost:8082/api/").unwrap(),
                endpoints: Endpoints::default(),
                token: "token".into(),
                output_dir: self.output.path().to_path_buf(),
                data_dir: Some(self.data.path().to_path_buf()),
            }
        }

        async fn run(&self, api: Arc<FakeApi>, mode: BatchMode, rows: &str) -> (Result<BatchRun, BatchError>, Recording) {
            self.run_with_header(api, mode, HEADER, rows).await
        }

        async fn run_with_header(
            &self,
            api: Arc<FakeApi>,
            mode: BatchMode,
            header: &str,
            rows: &str,
        ) -> (Result<BatchRun, BatchError>, Recording) {
            let manifest = self.manifest(header, rows);
            let mut observer = Recording::default();
            let settings = self.settings();
            let result = BatchOrchestrator::new(RetryingTransport::new(api), &settings, mode, &mut observer).run(&manifest).await;
            (result, observer)
        }
    }

    #[tokio::test]
    async fn trio_row_uploads_three_files_and_creates_one_task() {
        let ws = Workspace::new(&["p.vcf.gz", "f.vcf.gz", "m.vcf.gz"]);
        let api = Arc::new(FakeApi::default());

        let (result, observer) =
            ws.run(api.clone(), BatchMode::Full, "P1,family-01,rare,TRIO,hg38,p.vcf.gz,f.vcf.gz,m.vcf.gz,hypotonia\n").await;
        let run = result.unwrap();

        assert_eq!(run.rows, 1);
        assert_eq!(run.report.uploaded_files.len(), 3);
        assert_eq!(run.report.created_tasks.len(), 1);
        assert_eq!(run.report.created_tasks[0].submission_id.as_deref(), Some("sub-1"));
        assert!(!run.report.has_failures());

        let body = &api.tasks.lock().unwrap()[0];
        assert_eq!(body["upload_vcf"], "uploads/p.vcf.gz");
        assert_eq!(body["upload_mother"], "uploads/m.vcf.gz");
        assert_eq!(
            observer.states,
            vec![BatchState::Reading, BatchState::Uploading, BatchState::TaskCreating, BatchState::Reporting, BatchState::Done]
        );
    }

    #[tokio::test]
    async fn row_files_upload_in_field_order_with_cnv() {
        let ws = Workspace::new(&["p.vcf", "f.vcf", "m.vcf", "cnv.txt"]);
        let api = Arc::new(FakeApi::default());
        let header = "samples,title,project,vcf_mode,assembly,upload_vcf,upload_father,upload_mother,clinical_info,upload_cnv\n";

        let (result, _) = ws
            .run_with_header(api.clone(), BatchMode::Full, header, "P1,family-02,rare,TRIO,hg38,p.vcf,f.vcf,m.vcf,seizures,cnv.txt\n")
            .await;
        let run = result.unwrap();

        assert_eq!(*api.uploads.lock().unwrap(), vec!["p.vcf", "f.vcf", "m.vcf", "cnv.txt"]);
        assert_eq!(run.report.uploaded_files.len(), 4);
        assert_eq!(api.tasks.lock().unwrap()[0]["upload_cnv"], "uploads/cnv.txt");
    }

    #[tokio::test]
    async fn dot_prefixed_path_shares_the_upload() {
        let ws = Workspace::new(&["a.vcf"]);
        let api = Arc::new(FakeApi::default());

        let (result, _) = ws
            .run(api.clone(), BatchMode::Full, "A,a,rare,SNP,hg19,a.vcf,NA,NA,x\nB,b,rare,SNP,hg19,./a.vcf,NA,NA,y\n")
            .await;
        let run = result.unwrap();

        assert_eq!(api.uploads.lock().unwrap().len(), 1);
        assert_eq!(run.report.uploaded_files.len(), 1);
        assert_eq!(run.report.submitted(), 2);
    }

    #[tokio::test]
    async fn snp_row_sends_no_parent_fields() {
        let ws = Workspace::new(&["p.vcf"]);
        let api = Arc::new(FakeApi::default());

        let (result, _) = ws.run(api.clone(), BatchMode::Full, "P1,solo,rare,SNP,hg19,p.vcf,NA,NA,ataxia\n").await;
        let run = result.unwrap();

        assert_eq!(run.report.submitted(), 1);
        let body = &api.tasks.lock().unwrap()[0];
        assert!(body.get("upload_father").is_none());
        assert!(body.get("upload_mother").is_none());
        assert_eq!(api.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_task_is_recorded_and_run_continues() {
        let ws = Workspace::new(&["a.vcf", "b.vcf"]);
        let api = Arc::new(FakeApi { duplicates: vec!["first"], ..FakeApi::default() });

        let (result, observer) = ws
            .run(api.clone(), BatchMode::Full, "A,first,rare,SNP,hg19,a.vcf,NA,NA,x\nB,second,rare,SNP,hg19,b.vcf,NA,NA,y\n")
            .await;
        let run = result.unwrap();

        assert!(run.report.has_failures());
        assert_eq!(run.report.failures.len(), 1);
        assert_eq!(run.report.failures[0].row, 1);
        assert!(run.report.failures[0].reason.starts_with("DuplicateTask"));
        assert_eq!(run.report.submitted(), 1);
        assert_eq!(run.report.created_tasks.len(), 2);
        assert_eq!(observer.failed_rows, vec![1]);
    }

    #[tokio::test]
    async fn invalid_row_is_isolated() {
        let ws = Workspace::new(&["a.vcf", "b.vcf", "c.vcf"]);
        let api = Arc::new(FakeApi::default());

        let (result, _) = ws
            .run(
                api.clone(),
                BatchMode::Full,
                "A,a,rare,SNP,hg19,a.vcf,NA,NA,x\nB,b,rare,QUAD,hg19,b.vcf,NA,NA,x\nC,c,rare,SNP,hg19,c.vcf,NA,NA,x\n",
            )
            .await;
        let run = result.unwrap();

        assert_eq!(run.report.submitted(), 2);
        assert_eq!(run.report.failures.len(), 1);
        assert_eq!(run.report.failures[0].row, 2);
        assert!(run.report.failures[0].reason.starts_with("InvalidEnumValue"));
        assert_eq!(api.tasks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_skips_only_that_row() {
        let ws = Workspace::new(&["a.vcf"]);
        let api = Arc::new(FakeApi::default());

        let (result, _) = ws
            .run(api.clone(), BatchMode::Full, "A,a,rare,SNP,hg19,gone.vcf,NA,NA,x\nB,b,rare,SNP,hg19,a.vcf,NA,NA,x\n")
            .await;
        let run = result.unwrap();

        assert_eq!(run.report.failures.len(), 1);
        assert!(run.report.failures[0].reason.starts_with("FileNotFound: upload_vcf"));
        assert_eq!(run.report.submitted(), 1);
        assert_eq!(api.tasks.lock().unwrap()[0]["title"], "b");
    }

    #[tokio::test]
    async fn shared_file_is_uploaded_once() {
        let ws = Workspace::new(&["p1.vcf", "p2.vcf", "dad.vcf", "mum.vcf"]);
        let api = Arc::new(FakeApi::default());

        let (result, _) = ws
            .run(
                api.clone(),
                BatchMode::Full,
                "P1,sib-1,rare,TRIO,hg38,p1.vcf,dad.vcf,mum.vcf,x\nP2,sib-2,rare,TRIO,hg38,p2.vcf,dad.vcf,mum.vcf,x\n",
            )
            .await;
        let run = result.unwrap();

        assert_eq!(api.uploads.lock().unwrap().len(), 4);
        assert_eq!(run.report.uploaded_files.len(), 4);
        assert_eq!(run.report.submitted(), 2);
        let tasks = api.tasks.lock().unwrap();
        assert_eq!(tasks[0]["upload_father"], tasks[1]["upload_father"]);
    }

    #[tokio::test]
    async fn malformed_manifest_aborts_before_any_upload() {
        let ws = Workspace::new(&["a.vcf"]);
        let api = Arc::new(FakeApi::default());
        let manifest = ws.data.path().join("bad.csv");
        fs::write(&manifest, "samples,title,project\nA,a,rare\n").unwrap();

        let mut observer = Recording::default();
        let settings = ws.settings();
        let result =
            BatchOrchestrator::new(RetryingTransport::new(api.clone()), &settings, BatchMode::Full, &mut observer).run(&manifest).await;

        assert!(matches!(result, Err(BatchError::MalformedManifest(_))));
        assert!(api.uploads.lock().unwrap().is_empty());
        assert!(!ws.output.path().join(TASK_RESULTS).exists());
    }

    #[tokio::test]
    async fn upload_only_then_task_only() {
        let ws = Workspace::new(&["a.vcf"]);
        let rows = "A,a,rare,SNP,hg19,a.vcf,NA,NA,x\n";

        let api = Arc::new(FakeApi::default());
        let (result, _) = ws.run(api.clone(), BatchMode::UploadOnly, rows).await;
        let run = result.unwrap();
        assert_eq!(run.report.uploaded_files.len(), 1);
        assert!(run.report.created_tasks.is_empty());
        assert!(api.tasks.lock().unwrap().is_empty());

        let api = Arc::new(FakeApi::default());
        let (result, _) = ws.run(api.clone(), BatchMode::TaskOnly, rows).await;
        let run = result.unwrap();
        assert!(api.uploads.lock().unwrap().is_empty());
        assert_eq!(run.report.submitted(), 1);
        assert_eq!(api.tasks.lock().unwrap()[0]["upload_vcf"], "uploads/a.vcf");

        let written = BatchReport::read(&ws.output.path().join(crate::batch::report::BATCH_RESULTS)).unwrap();
        assert_eq!(written, run.report);
    }

    #[tokio::test]
    async fn task_only_needs_a_ledger() {
        let ws = Workspace::new(&["a.vcf"]);
        let (result, _) = ws.run(Arc::new(FakeApi::default()), BatchMode::TaskOnly, "A,a,rare,SNP,hg19,a.vcf,NA,NA,x\n").await;
        assert!(matches!(result, Err(BatchError::MissingLedger(_))));
    }
}
