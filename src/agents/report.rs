use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::ReportCollaborator;
use crate::error::AgentResult;
use crate::model::{Aggregation, Brief, Report};

/// Renders the aggregation as a Markdown document.
///
/// Markdown is the only format produced; other requested formats are kept
/// on the report for downstream converters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownReporter;

impl MarkdownReporter {
    pub fn render_markdown(&self, brief: &Brief, aggregation: &Aggregation) -> String {
        let mut out = format!("# {}\n\n", brief.goal);
        out.push_str(&format!(
            "_Coverage {:.0}% after {} round(s)_\n",
            aggregation.coverage * 100.0,
            aggregation.rounds
        ));

        if !aggregation.key_findings.is_empty() {
            out.push_str("\n## Key findings\n\n");
            for finding in &aggregation.key_findings {
                out.push_str(&format!("- {}\n", finding));
            }
        }

        for section in &aggregation.sections {
            out.push_str(&format!("\n## {}\n\n{}\n", section.title, section.body.trim_end()));
        }

        if !aggregation.recommendations.is_empty() {
            out.push_str("\n## Recommendations\n\n");
            for recommendation in &aggregation.recommendations {
                out.push_str(&format!("- {}\n", recommendation));
            }
        }

        if !aggregation.bibliography.is_empty() {
            out.push_str("\n## Sources\n\n");
            for (i, source) in aggregation.bibliography.iter().enumerate() {
                match &source.url {
                    Some(url) => out.push_str(&format!("{}. [{}]({})\n", i + 1, source.title, url)),
                    None => out.push_str(&format!("{}. {}\n", i + 1, source.title)),
                }
            }
        }

        out
    }
}

#[async_trait]
impl ReportCollaborator for MarkdownReporter {
    async fn render(&self, brief: &Brief, aggregation: &Aggregation) -> AgentResult<Report> {
        let unsupported: Vec<&str> = brief
            .output_formats
            .iter()
            .map(String::as_str)
            .filter(|f| !f.eq_ignore_ascii_case("markdown"))
            .collect();
        if !unsupported.is_empty() {
            debug!(?unsupported, "Rendering markdown only");
        }

        Ok(Report {
            format: "markdown".to_string(),
            content: self.render_markdown(brief, aggregation),
            requested_formats: brief.output_formats.clone(),
            created_at: Utc::now(),
        })
    }
}
