//! Command-line interface definitions for pubcrawler.
//!
//! Every option can also come from an environment variable.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for a crawl run.
///
/// # Examples
///
/// ```sh
/// # Run every enabled task from the default config
/// pubcrawler
///
/// # Run two tasks from a custom config into ./papers
/// pubcrawler -c ./crawl.yaml -o ./papers -t ICLR_2024 -t CVPR_2023
///
/// # Point browser tasks at a remote WebDriver
/// pubcrawler --webdriver-url http://selenium:4444
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML task configuration
    #[arg(short, long, env = "PUBCRAWLER_CONFIG", default_value = "configs/tasks.yaml")]
    pub config: PathBuf,

    /// Root directory for JSON, Markdown and PDF output
    #[arg(short, long, env = "PUBCRAWLER_OUTPUT", default_value = "output")]
    pub output_dir: PathBuf,

    /// Only run the named task (repeatable)
    #[arg(short, long = "task", value_name = "NAME")]
    pub tasks: Vec<String>,

    /// WebDriver endpoint for browser tasks; overrides the config file
    #[arg(long, env = "WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,
}
