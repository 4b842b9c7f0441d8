use onboard_core::StepRecord;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// File name of the JSONL mirror inside the audit directory.
pub const AUDIT_FILE: &str = "audit.jsonl";

pub(crate) enum SinkCommand {
    Append(Box<StepRecord>),
    Flush(oneshot::Sender<()>),
}

/// Background writer that mirrors records to `<dir>/audit.jsonl`, one JSON
/// object per line. Must be created inside a tokio runtime.
pub(crate) struct JsonlSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
    path: PathBuf,
}

impl JsonlSink {
    pub(crate) fn spawn(dir: &Path) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkCommand>();
        let dir = dir.to_path_buf();
        let path = dir.join(AUDIT_FILE);
        let file_path = path.clone();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "cannot create audit directory");
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .await
            {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "audit file unavailable, records stay in memory");
                    None
                }
            };

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    SinkCommand::Append(record) => {
                        let Some(f) = file.as_mut() else { continue };
                        match serde_json::to_string(&record) {
                            Ok(line) => {
                                let line = format!("{line}\n");
                                if let Err(e) = f.write_all(line.as_bytes()).await {
                                    warn!(error = %e, "audit write failed");
                                }
                            }
                            Err(e) => warn!(error = %e, "audit record not serializable"),
                        }
                    }
                    SinkCommand::Flush(done) => {
                        if let Some(f) = file.as_mut() {
                            let _ = f.flush().await;
                        }
                        let _ = done.send(());
                    }
                }
            }
            info!("audit writer stopped");
        });

        Self { tx, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&self, record: &StepRecord) {
        let _ = self.tx.send(SinkCommand::Append(Box::new(record.clone())));
    }

    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SinkCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

/// Reads a JSONL audit file back. Lines that fail to parse are skipped.
pub async fn read_jsonl(path: &Path) -> std::io::Result<Vec<StepRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
