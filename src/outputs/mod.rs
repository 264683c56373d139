//! Post-processing sinks that receive each task's records.
//!
//! The runner hands every finished task to each configured [`Sink`] in turn,
//! task by task. Sinks append; none of them rewrites what an earlier task
//! produced.
//!
//! # Submodules
//!
//! - [`json`]: one pretty-printed JSON array per task
//! - [`markdown`]: one Markdown report per task plus a running `index.md`
//! - [`pdf`]: optional PDF download for tasks that set `download_pdfs`
//!
//! # Output Structure
//!
//! ```text
//! output/
//! ├── index.md
//! ├── ICLR/
//! │   └── 2024/
//! │       ├── ICLR_2024.json
//! │       └── ICLR_2024.md
//! └── pdfs/
//!     └── ICLR/
//!         └── 2024/
//!             └── Some_Paper_Title.pdf
//! ```

pub mod json;
pub mod markdown;
pub mod pdf;

use crate::error::SinkError;
use crate::models::Paper;
use crate::task::TaskConfig;
use crate::utils::sanitize_filename;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One task's annotated, filtered records plus the task they came from.
#[derive(Debug, Clone, Copy)]
pub struct TaskBatch<'a> {
    pub task: &'a TaskConfig,
    pub papers: &'a [Paper],
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError>;
}

/// `<root>/<conference>/<year>` for a task.
pub fn task_dir(root: &Path, task: &TaskConfig) -> PathBuf {
    root.join(sanitize_filename(task.conference_label()))
        .join(task.year_label())
}

/// File stem used for a task's per-task outputs.
pub fn task_stem(task: &TaskConfig) -> String {
    sanitize_filename(&task.name)
}
