//! Markdown reports and the running crawl index.
//!
//! Each task gets `{root}/{conference}/{year}/{task}.md` with a table of
//! contents and one section per paper. `{root}/index.md` lists every task
//! grouped by conference:
//!
//! ```text
//! # Crawl Index
//!
//! - [**ICLR**]
//!     - [2024: ICLR_2024](./ICLR/2024/ICLR_2024.md) (120 papers)
//! - [**CVPR**]
//!     - [2023: CVPR_2023](./CVPR/2023/CVPR_2023.md) (2100 papers)
//! ```
//!
//! Entries are inserted once; a rerun of the same task refreshes its line
//! in place.

use super::{Sink, TaskBatch, task_dir, task_stem};
use crate::error::SinkError;
use crate::models::Paper;
use crate::utils::{sanitize_filename, slugify_title};
use async_trait::async_trait;
use std::fmt::Write;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, instrument};

const INDEX_HEADER: &str = "# Crawl Index";

#[derive(Debug, Clone)]
pub struct MarkdownSink {
    root: PathBuf,
}

impl MarkdownSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Insert or refresh the task's line in `index.md`.
    async fn update_index(&self, batch: &TaskBatch<'_>, report_rel: &str) -> Result<(), SinkError> {
        let index_path = self.root.join("index.md");
        let content = if fs::try_exists(&index_path).await? {
            fs::read_to_string(&index_path).await?
        } else {
            format!("{INDEX_HEADER}\n")
        };

        let conference_heading = format!("- [**{}**]", batch.task.conference_label());
        let entry = format!(
            "    - [{}: {}](./{}) ({} papers)",
            batch.task.year_label(),
            batch.task.name,
            report_rel,
            batch.papers.len()
        );
        let link = format!("](./{report_rel})");

        let lines = insert_entry(&content, &conference_heading, &entry, &link);
        fs::write(&index_path, lines.join("\n") + "\n").await?;
        info!(path = %index_path.display(), "Updated crawl index");
        Ok(())
    }
}

/// Place `entry` under `heading`, replacing a line that already carries `link`.
fn insert_entry(content: &str, heading: &str, entry: &str, link: &str) -> Vec<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    if let Some(pos) = lines.iter().position(|l| l.contains(link)) {
        lines[pos] = entry.to_string();
        return lines;
    }

    match lines.iter().position(|l| l.trim() == heading.trim()) {
        Some(i) => {
            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with("    - ") {
                j += 1;
            }
            lines.insert(j, entry.to_string());
        }
        None => {
            if lines.last().is_some_and(|l| l.starts_with(INDEX_HEADER)) {
                lines.push(String::new());
            }
            lines.push(heading.to_string());
            lines.push(entry.to_string());
        }
    }
    lines
}

fn render_report(batch: &TaskBatch<'_>) -> Result<String, std::fmt::Error> {
    let mut md = String::new();
    let task = batch.task;

    writeln!(md, "# {}\n", task.name)?;
    writeln!(
        md,
        "*{} {}, {} papers, source `{}`*\n",
        task.conference_label(),
        task.year_label(),
        batch.papers.len(),
        task.source_type
    )?;
    if !task.filters.is_empty() {
        writeln!(md, "Filtered by: {}\n", task.filters.join(", "))?;
    }

    writeln!(md, "## Contents\n")?;
    for (i, paper) in batch.papers.iter().enumerate() {
        writeln!(md, "{}. [{}](#{})", i + 1, paper.title, slugify_title(&paper.title))?;
    }
    writeln!(md)?;

    for paper in batch.papers {
        write_paper(&mut md, paper)?;
    }
    Ok(md)
}

fn write_paper(md: &mut String, paper: &Paper) -> std::fmt::Result {
    writeln!(md, "## {}\n", paper.title)?;
    writeln!(md, "- **Authors:** {}", paper.authors_display())?;
    writeln!(md, "- **Source:** <{}>", paper.source_url)?;
    if let Some(pdf) = &paper.pdf_url {
        writeln!(md, "- **PDF:** <{pdf}>")?;
    }
    if let Some(decision) = paper.decision {
        writeln!(md, "- **Decision:** {decision}")?;
    }
    if let Some(avg) = paper.avg_rating {
        writeln!(
            md,
            "- **Rating:** {avg:.2} ({})",
            paper
                .review_ratings
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )?;
    }
    if !paper.keywords.is_empty() {
        writeln!(md, "- **Keywords:** {}", paper.keywords.join(", "))?;
    }
    if let Some(published) = &paper.published {
        writeln!(md, "- **Published:** {published}")?;
    }
    writeln!(md, "\n{}\n", paper.abstract_text)
}

#[async_trait]
impl Sink for MarkdownSink {
    fn name(&self) -> &'static str {
        "markdown"
    }

    #[instrument(level = "info", skip_all, fields(task = %batch.task.name))]
    async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError> {
        let dir = task_dir(&self.root, batch.task);
        fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.md", task_stem(batch.task));
        let path = dir.join(&file_name);
        fs::write(&path, render_report(batch)?).await?;
        info!(path = %path.display(), count = batch.papers.len(), "Wrote Markdown report");

        let report_rel = format!(
            "{}/{}/{}",
            sanitize_filename(batch.task.conference_label()),
            batch.task.year_label(),
            file_name
        );
        self.update_index(batch, &report_rel).await
    }
}
