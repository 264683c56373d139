//! PDF download for tasks that set `download_pdfs`.
//!
//! Files land in `{root}/pdfs/{conference}/{year}/{title}.pdf`. Existing files
//! are skipped so reruns only fetch what is missing. A failed download is
//! logged and skipped; only local I/O errors fail the sink.

use super::{Sink, TaskBatch, task_dir};
use crate::error::SinkError;
use crate::models::Paper;
use crate::network::HttpClient;
use crate::utils::sanitize_filename;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PdfSink {
    root: PathBuf,
    http: HttpClient,
}

#[derive(Debug, Default, PartialEq)]
struct DownloadTally {
    saved: usize,
    existing: usize,
    failed: usize,
    no_link: usize,
}

impl PdfSink {
    pub fn new(root: impl Into<PathBuf>, http: HttpClient) -> Self {
        Self {
            root: root.into().join("pdfs"),
            http,
        }
    }

    async fn download(&self, paper: &Paper, dir: &Path, tally: &mut DownloadTally) -> Result<(), SinkError> {
        let Some(url) = paper.pdf_url.as_deref() else {
            tally.no_link += 1;
            return Ok(());
        };
        let path = dir.join(format!("{}.pdf", sanitize_filename(&paper.title)));
        if fs::try_exists(&path).await? {
            debug!(path = %path.display(), "PDF already present");
            tally.existing += 1;
            return Ok(());
        }

        match self.http.get(url).await {
            Some(resp) => {
                fs::write(&path, &resp.body).await?;
                debug!(path = %path.display(), bytes = resp.body.len(), "Saved PDF");
                tally.saved += 1;
            }
            None => {
                warn!(%url, title = %paper.title, "PDF download failed");
                tally.failed += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for PdfSink {
    fn name(&self) -> &'static str {
        "pdf"
    }

    #[instrument(level = "info", skip_all, fields(task = %batch.task.name))]
    async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError> {
        if !batch.task.download_pdfs {
            return Ok(());
        }
        let dir = task_dir(&self.root, batch.task);
        fs::create_dir_all(&dir).await?;

        let mut tally = DownloadTally::default();
        for paper in batch.papers {
            self.download(paper, &dir, &mut tally).await?;
        }
        info!(
            saved = tally.saved,
            existing = tally.existing,
            failed = tally.failed,
            no_link = tally.no_link,
            "PDF downloads finished"
        );
        Ok(())
    }
}
