use strongbox_api_types::ErrorKind;

/// One file that failed during a backup or restore run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileError {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a `BackupPipeline`/`RestorePipeline` run. Partial progress is
/// observable even when `success` is `false`: `files_processed` and `bytes`
/// count everything completed before the run stopped or finished.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineResult {
    pub success: bool,
    pub files_processed: u64,
    pub bytes: u64,
    pub errors: Vec<FileError>,
}

impl PipelineResult {
    pub fn new() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn record_error(&mut self, path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) {
        self.success = false;
        self.errors.push(FileError {
            path: path.into(),
            kind,
            message: message.into(),
        });
    }
}
