use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AgentCore, ContextCollaborator};
use crate::error::AgentResult;
use crate::model::{ResearchContext, Session};
use crate::oracle::Message;
use crate::prompts::CONTEXT_PROMPT;

#[derive(Debug, Deserialize)]
struct ContextOutput {
    summary: String,
    #[serde(default)]
    background: Vec<String>,
    #[serde(default)]
    suggested_topics: Vec<String>,
}

/// Gathers initial context through the reasoning service.
pub struct OracleContextAgent {
    core: AgentCore,
    pipe_name: String,
}

impl OracleContextAgent {
    pub fn new(core: AgentCore, pipe_name: impl Into<String>) -> Self {
        Self {
            core,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl ContextCollaborator for OracleContextAgent {
    async fn gather(&self, session: &Session) -> AgentResult<ResearchContext> {
        debug!(session_id = %session.id, "Gathering initial context");

        let messages = vec![
            Message::system(CONTEXT_PROMPT),
            Message::user(format!("Research query: {}", session.query)),
        ];
        let response = self.core.complete(&self.pipe_name, messages, None).await?;

        match self.core.parse::<ContextOutput>(&self.pipe_name, &response) {
            Ok(output) => Ok(ResearchContext {
                background: output.background,
                suggested_topics: output.suggested_topics,
                ..ResearchContext::new(output.summary)
            }),
            Err(e) if self.core.strict_mode() => Err(e),
            Err(_) => {
                warn!(session_id = %session.id, "Using raw completion as context summary");
                Ok(ResearchContext::new(response.completion.trim()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{core, ScriptedOracle};
    use crate::error::AgentError;

    #[tokio::test]
    async fn test_gather_parses_context() {
        let oracle = ScriptedOracle::new([r#"{
            "summary": "EV adoption is accelerating",
            "background": ["Battery prices fell"],
            "suggested_topics": ["charging", "subsidies"]
        }"#]);
        let agent = OracleContextAgent::new(core(oracle.clone(), false), "context-v1");
        let session = Session::new("u1", "EV market in Europe");

        let context = agent.gather(&session).await.unwrap();
        assert_eq!(context.summary, "EV adoption is accelerating");
        assert_eq!(context.suggested_topics, vec!["charging", "subsidies"]);

        let requests = oracle.requests();
        assert_eq!(requests[0].name, "context-v1");
        assert!(requests[0].messages[1].content.contains("EV market in Europe"));
    }

    #[tokio::test]
    async fn test_unstructured_context_degrades_unless_strict() {
        let lenient = OracleContextAgent::new(
            core(ScriptedOracle::new(["Plain prose summary"]), false),
            "context",
        );
        let session = Session::new("u1", "q");
        let context = lenient.gather(&session).await.unwrap();
        assert_eq!(context.summary, "Plain prose summary");

        let strict = OracleContextAgent::new(
            core(ScriptedOracle::new(["Plain prose summary"]), true),
            "context",
        );
        let err = strict.gather(&session).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { .. }));
    }
}
