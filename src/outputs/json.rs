//! JSON output, one file per task.
//!
//! ```text
//! output/
//! └── CVPR/
//!     └── 2023/
//!         └── CVPR_2023.json
//! ```

use super::{Sink, TaskBatch, task_dir, task_stem};
use crate::error::SinkError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct JsonSink {
    root: PathBuf,
}

impl JsonSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Sink for JsonSink {
    fn name(&self) -> &'static str {
        "json"
    }

    /// Write the batch to `{root}/{conference}/{year}/{task}.json`.
    ///
    /// A rerun of the same task replaces its file; other tasks' files are
    /// untouched.
    #[instrument(level = "info", skip_all, fields(task = %batch.task.name))]
    async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError> {
        let dir = task_dir(&self.root, batch.task);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.json", task_stem(batch.task)));
        let json = serde_json::to_string_pretty(batch.papers)?;
        fs::write(&path, json).await?;
        info!(path = %path.display(), count = batch.papers.len(), "Wrote JSON file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Paper;
    use crate::task::{SourceKind, TaskConfig};

    #[tokio::test]
    async fn test_writes_pretty_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = TaskConfig::new("CVPR_2023", SourceKind::StaticHtml);
        task.conference = Some("CVPR".into());
        task.year = Some(2023);
        let papers = vec![
            Paper::builder("https://x.org/a")
                .title(Some("A".into()))
                .build()
                .annotate(Some("CVPR"), Some(2023)),
        ];

        JsonSink::new(dir.path())
            .deliver(&TaskBatch {
                task: &task,
                papers: &papers,
            })
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("CVPR/2023/CVPR_2023.json")).unwrap();
        let back: Vec<Paper> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, papers);
        assert!(text.contains("\n  {"));
    }
}
