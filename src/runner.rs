//! Sequential multi-task orchestrator.
//!
//! For each configured task, in declared order:
//!
//! 1. Skip it when disabled or not selected on the command line
//! 2. Resolve it into a [`TaskConfig`]; a build failure skips the task
//! 3. Scrape with the strategy for its source kind
//! 4. Keyword-filter, de-duplicate by `source_url`, cap at `limit`
//! 5. Annotate with conference and year, then hand to every sink
//!
//! Steps 3-5 run behind a per-task boundary: an error or a panic fails that
//! task only and the loop moves on. Tasks never overlap; a short delay
//! separates consecutive tasks.

use crate::config::Config;
use crate::context::AppContext;
use crate::error::TaskError;
use crate::filter::KeywordFilter;
use crate::models::{NOT_AVAILABLE, Paper};
use crate::outputs::{Sink, TaskBatch};
use crate::scrapers::{Scraper, apply_limit};
use crate::task::{TaskConfig, build_task_config};
use crate::utils::truncate_for_log;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// How one task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { count: usize },
    Empty,
    Skipped { reason: String },
    Failed { reason: String },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed { count } => write!(f, "completed ({count} papers)"),
            TaskOutcome::Empty => f.write_str("empty"),
            TaskOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            TaskOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub name: String,
    pub outcome: TaskOutcome,
}

/// Everything a run produced: one outcome per considered task plus all
/// annotated records in task order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    pub papers: Vec<Paper>,
}

impl RunReport {
    /// Records grouped by conference for the aggregation phase.
    /// Records without a conference are grouped under `"N/A"`.
    pub fn by_conference(&self) -> BTreeMap<String, Vec<&Paper>> {
        let mut groups: BTreeMap<String, Vec<&Paper>> = BTreeMap::new();
        for p in &self.papers {
            groups
                .entry(
                    p.conference
                        .clone()
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                )
                .or_default()
                .push(p);
        }
        groups
    }

    pub fn failed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Failed { .. }))
            .count()
    }

    fn record(&mut self, name: String, outcome: TaskOutcome) {
        self.tasks.push(TaskReport { name, outcome });
    }
}

pub struct TaskRunner<'a> {
    ctx: &'a AppContext,
    sinks: Vec<Box<dyn Sink>>,
    selected: Vec<String>,
}

impl<'a> TaskRunner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            sinks: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Restrict the run to the named tasks. An empty list runs everything.
    pub fn only(mut self, names: Vec<String>) -> Self {
        self.selected = names;
        self
    }

    fn is_selected(&self, name: &str) -> bool {
        self.selected.is_empty() || self.selected.iter().any(|n| n == name)
    }

    /// Run every task in `config`, never failing as a whole.
    pub async fn run(&self, config: &Config) -> RunReport {
        let mut report = RunReport::default();
        let mut ran_any = false;
        let run_t0 = Instant::now();

        for spec in &config.tasks {
            let name = spec.display_name();
            if !self.is_selected(&name) {
                debug!(task = %name, "Not selected; ignoring");
                continue;
            }
            if !spec.enabled {
                info!(task = %name, "Task disabled; skipping");
                report.record(name, TaskOutcome::Skipped { reason: "disabled".into() });
                continue;
            }

            let task = match build_task_config(spec, &config.source_definitions) {
                Ok(t) => t,
                Err(e) => {
                    error!(task = %name, error = %e, "Could not build task configuration; skipping");
                    report.record(name, TaskOutcome::Skipped { reason: e.to_string() });
                    continue;
                }
            };

            if ran_any {
                let delay = self.ctx.settings.task_delay();
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
            ran_any = true;

            let span = info_span!(
                "task",
                task = %task.name,
                kind = %task.kind,
                conference = task.conference.as_deref().unwrap_or(NOT_AVAILABLE),
                year = task.year.unwrap_or_default(),
            );
            let task_t0 = Instant::now();
            let result = AssertUnwindSafe(self.run_task(&task))
                .catch_unwind()
                .instrument(span.clone())
                .await
                .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));

            let _enter = span.enter();
            let elapsed_ms = task_t0.elapsed().as_millis() as u64;
            let outcome = match result {
                Ok(papers) if papers.is_empty() => {
                    warn!(elapsed_ms, "Task finished with no papers");
                    TaskOutcome::Empty
                }
                Ok(papers) => {
                    info!(count = papers.len(), elapsed_ms, "Task completed");
                    let count = papers.len();
                    report.papers.extend(papers);
                    TaskOutcome::Completed { count }
                }
                Err(e) => {
                    error!(error = %e, elapsed_ms, "Task failed; continuing with next task");
                    TaskOutcome::Failed { reason: e.to_string() }
                }
            };
            report.record(task.name.clone(), outcome);
        }

        info!(
            tasks = report.tasks.len(),
            failed = report.failed(),
            papers = report.papers.len(),
            elapsed_ms_total = run_t0.elapsed().as_millis() as u64,
            "Run finished"
        );
        report
    }

    /// Scrape, post-process and deliver one task.
    async fn run_task(&self, task: &TaskConfig) -> Result<Vec<Paper>, TaskError> {
        info!(source_type = %task.source_type, "Starting task");
        let scraped = Scraper::new(task.clone(), self.ctx).scrape().await?;
        let scraped_count = scraped.len();

        let papers = KeywordFilter::new(&task.filters).apply(scraped);
        let papers = dedup_by_source_url(papers);
        let papers: Vec<Paper> = apply_limit(papers, task.limit, &task.name)
            .into_iter()
            .map(|p| p.annotate(task.conference.as_deref(), task.year))
            .collect();
        debug!(scraped = scraped_count, kept = papers.len(), "Post-processed records");

        let batch = TaskBatch { task, papers: &papers };
        for sink in &self.sinks {
            sink.deliver(&batch)
                .await
                .map_err(|source| TaskError::Sink { sink: sink.name(), source })?;
        }
        Ok(papers)
    }
}

/// First record per `source_url` wins. Sentinel URLs are never merged.
fn dedup_by_source_url(papers: Vec<Paper>) -> Vec<Paper> {
    let mut seen: HashSet<String> = HashSet::new();
    let before = papers.len();
    let kept: Vec<Paper> = papers
        .into_iter()
        .filter(|p| p.source_url == NOT_AVAILABLE || seen.insert(p.source_url.clone()))
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "Removed duplicate records");
    }
    kept
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    truncate_for_log(&msg, 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceDefinitions, TaskSpec, parse_config};
    use crate::context::testing::{context, context_with_browser};
    use crate::error::SinkError;
    use crate::network::testing::FakeTransport;
    use crate::scrapers::arxiv::ArxivScraper;
    use crate::scrapers::browser::testing::{FakeLauncher, FakeMode};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    fn outcome<'r>(report: &'r RunReport, task: &str) -> Option<&'r TaskOutcome> {
        report
            .tasks
            .iter()
            .find(|t| t.name == task)
            .map(|t| &t.outcome)
    }

    fn feed(titles: &[(&str, &str)]) -> String {
        let entries: String = titles
            .iter()
            .map(|(id, title)| {
                format!(
                    r#"<entry><id>http://arxiv.org/abs/{id}</id><title>{title}</title>
                    <summary>About {title}.</summary><author><name>A. Author</name></author></entry>"#
                )
            })
            .collect();
        format!(r#"<feed xmlns="http://www.w3.org/2005/Atom">{entries}</feed>"#)
    }

    fn arxiv_spec(name: &str, category: &str) -> TaskSpec {
        TaskSpec {
            name: Some(name.into()),
            source_type: "arxiv".into(),
            enabled: true,
            category: Some(category.into()),
            max_results: Some(10),
            ..TaskSpec::default()
        }
    }

    fn url_for(ctx: &AppContext, spec: &TaskSpec) -> String {
        let cfg = build_task_config(spec, &SourceDefinitions::new()).unwrap();
        ArxivScraper::new(cfg, ctx).request_url()
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError> {
            self.seen
                .lock()
                .unwrap()
                .push((batch.task.name.clone(), batch.papers.len()));
            Ok(())
        }
    }

    struct SharedSink(Arc<RecordingSink>);

    #[async_trait]
    impl Sink for SharedSink {
        fn name(&self) -> &'static str {
            self.0.name()
        }

        async fn deliver(&self, batch: &TaskBatch<'_>) -> Result<(), SinkError> {
            self.0.deliver(batch).await
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _batch: &TaskBatch<'_>) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let specs = vec![
            arxiv_spec("ai", "cs.AI"),
            arxiv_spec("cl", "cs.CL"),
            arxiv_spec("lg", "cs.LG"),
        ];
        fake.route(&url_for(&ctx, &specs[0]), 200, &feed(&[("1", "Alpha"), ("2", "Beta")]));
        fake.panic_on(&url_for(&ctx, &specs[1]));
        fake.route(&url_for(&ctx, &specs[2]), 200, &feed(&[("3", "Gamma")]));

        let recorder = Arc::new(RecordingSink::default());
        let config = Config { tasks: specs, ..Config::default() };
        let report = TaskRunner::new(&ctx)
            .with_sink(Box::new(SharedSink(recorder.clone())))
            .run(&config)
            .await;

        assert_eq!(outcome(&report, "ai"), Some(&TaskOutcome::Completed { count: 2 }));
        assert!(matches!(outcome(&report, "cl"), Some(TaskOutcome::Failed { reason }) if reason.contains("panicked")));
        assert_eq!(outcome(&report, "lg"), Some(&TaskOutcome::Completed { count: 1 }));
        assert_eq!(report.papers.len(), 3);
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![("ai".to_string(), 2), ("lg".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_browser_launch_failure_fails_only_that_task() {
        let fake = Arc::new(FakeTransport::new());
        let launcher = Arc::new(FakeLauncher::with_mode(FakeMode::FailLaunch));
        let ctx = context_with_browser(fake.clone(), launcher);
        let ok = arxiv_spec("ai", "cs.AI");
        fake.route(&url_for(&ctx, &ok), 200, &feed(&[("1", "Alpha")]));

        let config = parse_config(
            r#"
tasks:
  - conference: KDD
    year: 2024
    source_type: selenium
    enabled: true
source_definitions:
  selenium:
    KDD: "https://kdd.org/kddYYYY/accepted-papers"
"#,
        )
        .unwrap();
        let config = Config {
            tasks: [config.tasks, vec![ok]].concat(),
            ..config
        };

        let report = TaskRunner::new(&ctx).run(&config).await;
        assert!(matches!(outcome(&report, "KDD_2024"), Some(TaskOutcome::Failed { .. })));
        assert_eq!(outcome(&report, "ai"), Some(&TaskOutcome::Completed { count: 1 }));
    }

    #[tokio::test]
    async fn test_disabled_and_unbuildable_tasks_are_skipped_without_requests() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let config = parse_config(
            r#"
tasks:
  - conference: CVPR
    year: 2023
    source_type: html_cvf
  - conference: ICCV
    year: 2023
    source_type: html_cvf
    enabled: true
  - conference: X
    year: 2023
    source_type: gopher
    enabled: true
"#,
        )
        .unwrap();

        let report = TaskRunner::new(&ctx).run(&config).await;
        assert_eq!(
            outcome(&report, "CVPR_2023"),
            Some(&TaskOutcome::Skipped { reason: "disabled".into() })
        );
        assert!(matches!(outcome(&report, "ICCV_2023"), Some(TaskOutcome::Skipped { .. })));
        assert!(matches!(outcome(&report, "X_2023"), Some(TaskOutcome::Skipped { .. })));
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_dedup_limit_and_annotation() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let mut spec = arxiv_spec("nlp", "cs.CL");
        spec.conference = Some("ARXIV".into());
        spec.year = Some(2024);
        spec.filters = vec!["transformer".into(), "diffusion".into()];
        spec.limit = Some(2);
        fake.route(
            &url_for(&ctx, &spec),
            200,
            &feed(&[
                ("2", "Kernel methods"),
                ("1", "Transformer A"),
                ("1", "Transformer A duplicate"),
                ("3", "Diffusion B"),
                ("4", "Diffusion C"),
            ]),
        );

        let config = Config { tasks: vec![spec], ..Config::default() };
        let report = TaskRunner::new(&ctx).run(&config).await;

        let titles: Vec<&str> = report.papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Transformer A", "Diffusion B"]);
        assert!(report.papers.iter().all(|p| p.conference.as_deref() == Some("ARXIV")));
        assert!(report.papers.iter().all(|p| p.year == Some(2024)));
        assert_eq!(report.by_conference()["ARXIV"].len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_marks_task_failed() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let spec = arxiv_spec("ai", "cs.AI");
        fake.route(&url_for(&ctx, &spec), 200, &feed(&[("1", "Alpha")]));

        let config = Config { tasks: vec![spec], ..Config::default() };
        let report = TaskRunner::new(&ctx)
            .with_sink(Box::new(FailingSink))
            .run(&config)
            .await;

        assert!(matches!(
            outcome(&report, "ai"),
            Some(TaskOutcome::Failed { reason }) if reason.contains("failing")
        ));
        assert!(report.papers.is_empty());
    }

    #[tokio::test]
    async fn test_selection_restricts_run() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let specs = vec![arxiv_spec("ai", "cs.AI"), arxiv_spec("cl", "cs.CL")];
        fake.route(&url_for(&ctx, &specs[1]), 200, &feed(&[("1", "Alpha")]));

        let config = Config { tasks: specs, ..Config::default() };
        let report = TaskRunner::new(&ctx).only(vec!["cl".into()]).run(&config).await;
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(outcome(&report, "cl"), Some(&TaskOutcome::Completed { count: 1 }));
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_recorded() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let config = Config { tasks: vec![arxiv_spec("ai", "cs.AI")], ..Config::default() };
        let report = TaskRunner::new(&ctx).run(&config).await;
        assert_eq!(outcome(&report, "ai"), Some(&TaskOutcome::Empty));
    }

    #[test]
    fn test_dedup_keeps_sentinel_urls() {
        let a = Paper::builder("https://x.org/1").build();
        let b = Paper::builder("https://x.org/1").title(Some("dup".into())).build();
        let c = Paper::builder("").build();
        let d = Paper::builder("").build();
        let kept = dedup_by_source_url(vec![a, b, c, d]);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].title, NOT_AVAILABLE);
    }
}
