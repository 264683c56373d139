//! Keyword filter applied to a task's records after scraping.

use crate::models::Paper;
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

/// Case-insensitive alternation over the task's filter terms.
///
/// Terms are regular expressions. A term set that does not compile is
/// retried with every term escaped, so a stray `+` or `(` matches literally
/// instead of failing the task.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    pattern: Option<Regex>,
}

impl KeywordFilter {
    pub fn new(terms: &[String]) -> Self {
        let terms: Vec<&str> = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Self { pattern: None };
        }

        let pattern = compile(&terms.join("|")).or_else(|e| {
            warn!(error = %e, "Filter terms are not a valid pattern; matching literally");
            let escaped: Vec<String> = terms.iter().map(|t| regex::escape(t)).collect();
            compile(&escaped.join("|"))
        });
        Self {
            pattern: pattern.ok(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn matches(&self, paper: &Paper) -> bool {
        match &self.pattern {
            None => true,
            Some(re) => re.is_match(&paper.title) || re.is_match(&paper.abstract_text),
        }
    }

    /// Keep the records whose title or abstract matches. Order is preserved.
    pub fn apply(&self, papers: Vec<Paper>) -> Vec<Paper> {
        if !self.is_active() {
            return papers;
        }
        let before = papers.len();
        let kept: Vec<Paper> = papers.into_iter().filter(|p| self.matches(p)).collect();
        info!(before, after = kept.len(), "Applied keyword filter");
        kept
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(title: &str, abs: &str) -> Paper {
        Paper::builder(format!("https://x.org/{title}"))
            .title(Some(title.into()))
            .abstract_text(Some(abs.into()))
            .build()
    }

    fn terms(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_title_or_abstract_case_insensitive() {
        let f = KeywordFilter::new(&terms(&["transformer", "diffusion"]));
        let papers = vec![
            paper("A TRANSFORMER for graphs", "n/a"),
            paper("Convolutions", "we use Diffusion models"),
            paper("Kernels", "classic methods"),
        ];
        let kept = f.apply(papers);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "A TRANSFORMER for graphs");
        assert_eq!(kept[1].title, "Convolutions");
    }

    #[test]
    fn test_empty_terms_keep_everything() {
        let f = KeywordFilter::new(&terms(&["", "  "]));
        assert!(!f.is_active());
        assert_eq!(f.apply(vec![paper("a", "b")]).len(), 1);
    }

    #[test]
    fn test_regex_terms() {
        let f = KeywordFilter::new(&terms(&[r"graph\s+neural"]));
        assert!(f.matches(&paper("Graph   Neural nets", "")));
        assert!(!f.matches(&paper("Graphs", "")));
    }

    #[test]
    fn test_invalid_pattern_matched_literally() {
        let f = KeywordFilter::new(&terms(&["C++", "(unclosed"]));
        assert!(f.is_active());
        assert!(f.matches(&paper("Fast C++ kernels", "")));
        assert!(f.matches(&paper("x", "an (unclosed remark")));
        assert!(!f.matches(&paper("Rust kernels", "")));
    }
}
