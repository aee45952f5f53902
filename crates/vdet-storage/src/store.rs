//! Result store and per-job write handles.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use vdet_models::{ErrorRecord, FrameRecord, JobId, JobInfo, ResultArtifact, ResultDocument, VideoMetadata};

use crate::error::{StorageError, StorageResult};

/// Canonical result file name.
pub const RESULTS_FILE: &str = "results.json";

/// Error record file name.
pub const ERROR_FILE: &str = "error.json";

/// Root of all job result directories.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a job's artifacts.
    ///
    /// Callers outside the store should go through [`open`](Self::open) or
    /// [`load`](Self::load), which reject ids that would leave the root.
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.as_str())
    }

    fn checked_job_dir(&self, job_id: &JobId) -> StorageResult<PathBuf> {
        if is_safe_job_id(job_id.as_str()) {
            Ok(self.job_dir(job_id))
        } else {
            Err(StorageError::InvalidJobId(job_id.as_str().to_string()))
        }
    }

    /// Canonical result location for a job.
    pub fn results_path(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id).join(RESULTS_FILE)
    }

    /// Open a write handle, creating the job directory if needed.
    ///
    /// Opening is idempotent; a redelivered job starts from an empty
    /// document and overwrites what a previous attempt left behind once
    /// its header is written.
    pub async fn open(&self, job_id: &JobId) -> StorageResult<ResultHandle> {
        let dir = self.checked_job_dir(job_id)?;
        fs::create_dir_all(&dir).await?;
        debug!(job_id = %job_id, dir = %dir.display(), "Opened result directory");

        Ok(ResultHandle {
            results_path: dir.join(RESULTS_FILE),
            error_path: dir.join(ERROR_FILE),
            dir,
            document: None,
            sealed: false,
        })
    }

    /// Read whatever is at a job's canonical location.
    pub async fn load(&self, job_id: &JobId) -> StorageResult<ResultArtifact> {
        read_json(&self.checked_job_dir(job_id)?.join(RESULTS_FILE)).await
    }

    /// Read a job's error record, if it failed.
    pub async fn load_error(&self, job_id: &JobId) -> StorageResult<Option<ErrorRecord>> {
        let path = self.checked_job_dir(job_id)?.join(ERROR_FILE);
        match read_json(&path).await {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Exclusive writer for one job's result document.
///
/// Frames must be appended with contiguous numbers starting at 1, and only
/// after the header. After [`seal`](Self::seal) or
/// [`write_error`](Self::write_error) the handle rejects further writes.
#[derive(Debug)]
pub struct ResultHandle {
    dir: PathBuf,
    results_path: PathBuf,
    error_path: PathBuf,
    document: Option<ResultDocument>,
    sealed: bool,
}

impl ResultHandle {
    /// Canonical result location.
    pub fn location(&self) -> &Path {
        &self.results_path
    }

    /// Location of the error record.
    pub fn error_location(&self) -> &Path {
        &self.error_path
    }

    pub fn has_header(&self) -> bool {
        self.document.is_some()
    }

    /// Number of frame records written so far.
    pub fn frames_written(&self) -> u64 {
        self.document.as_ref().map(|d| d.frames.len() as u64).unwrap_or(0)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Write the header with an empty frame list.
    pub async fn write_header(&mut self, video_info: VideoMetadata, job_info: JobInfo) -> StorageResult<()> {
        self.ensure_open()?;
        if self.document.is_some() {
            return Err(StorageError::HeaderExists);
        }

        remove_if_exists(&self.error_path).await?;

        let document = ResultDocument::new(video_info, job_info);
        write_atomic(&self.dir, &self.results_path, &document).await?;
        self.document = Some(document);
        Ok(())
    }

    /// Append one frame record and persist the whole document.
    pub async fn append_frame(&mut self, record: FrameRecord) -> StorageResult<()> {
        self.ensure_open()?;
        let document = self.document.as_mut().ok_or(StorageError::HeaderMissing)?;

        let expected = document.last_frame_number() + 1;
        if record.frame_number != expected {
            return Err(StorageError::out_of_order(expected, record.frame_number));
        }

        document.frames.push(record);
        if let Err(e) = write_atomic(&self.dir, &self.results_path, &*document).await {
            // keep memory in step with disk
            document.frames.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Persist an error record and seal the handle.
    ///
    /// Frames already in `results.json` stay valid. Without a header the
    /// error record also becomes the canonical result.
    pub async fn write_error(&mut self, record: &ErrorRecord) -> StorageResult<()> {
        self.ensure_open()?;
        self.sealed = true;

        write_atomic(&self.dir, &self.error_path, record).await?;
        if self.document.is_none() {
            write_atomic(&self.dir, &self.results_path, record).await?;
        }
        Ok(())
    }

    /// Reject further writes. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.sealed {
            Err(StorageError::Sealed)
        } else {
            Ok(())
        }
    }
}

/// A job id must name exactly one plain directory under the root.
fn is_safe_job_id(id: &str) -> bool {
    if id.is_empty() || id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Serialize `value` to a temp file in `dir`, then rename it over `path`.
async fn write_atomic<T: Serialize + ?Sized>(dir: &Path, path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    fs::write(&tmp_path, &bytes).await?;
    if let Err(e) = fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = fs::remove_file(&tmp_path).await {
            warn!(path = %tmp_path.display(), "Failed to remove temp file: {}", cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<T> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(path)),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
