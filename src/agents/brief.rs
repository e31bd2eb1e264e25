use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::core::to_prompt_json;
use super::{AgentCore, BriefCollaborator, BriefTurn};
use crate::error::{AgentError, AgentResult};
use crate::model::{Brief, Conversation, ResearchContext, Session, TurnRole};
use crate::oracle::Message;
use crate::prompts::BRIEF_PROMPT;

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum BriefOutput {
    Question { question: String },
    Complete { brief: Brief },
}

/// Runs the brief conversation through the reasoning service.
pub struct OracleBriefAgent {
    core: AgentCore,
    pipe_name: String,
}

impl OracleBriefAgent {
    pub fn new(core: AgentCore, pipe_name: impl Into<String>) -> Self {
        Self {
            core,
            pipe_name: pipe_name.into(),
        }
    }

    fn build_messages(
        &self,
        session: &Session,
        context: Option<&ResearchContext>,
        conversation: &Conversation,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(BRIEF_PROMPT)];

        let mut opening = format!("Research query: {}", session.query);
        if let Some(context) = context {
            opening.push_str(&format!("\n\nBackground context:\n{}", to_prompt_json(context)));
        }
        messages.push(Message::user(opening));

        for turn in &conversation.turns {
            messages.push(match turn.role {
                TurnRole::User => Message::user(turn.content.clone()),
                TurnRole::Assistant => Message::assistant(turn.content.clone()),
            });
        }
        messages
    }
}

#[async_trait]
impl BriefCollaborator for OracleBriefAgent {
    async fn respond(
        &self,
        session: &Session,
        context: Option<&ResearchContext>,
        conversation: &Conversation,
    ) -> AgentResult<BriefTurn> {
        debug!(
            session_id = %session.id,
            turns = conversation.turns.len(),
            "Continuing brief conversation"
        );

        let messages = self.build_messages(session, context, conversation);
        let response = self.core.complete(&self.pipe_name, messages, None).await?;

        match self.core.parse::<BriefOutput>(&self.pipe_name, &response) {
            Ok(BriefOutput::Question { question }) => Ok(BriefTurn::Question(question)),
            Ok(BriefOutput::Complete { brief }) => brief
                .normalize()
                .map(BriefTurn::Draft)
                .map_err(|e| AgentError::InvalidOutput {
                    message: e.to_string(),
                }),
            Err(e) if self.core.strict_mode() => Err(e),
            Err(e) => {
                // Prose without JSON is almost always a clarifying question.
                let text = response.completion.trim();
                if text.is_empty() {
                    return Err(e);
                }
                warn!(session_id = %session.id, "Treating unstructured brief reply as a question");
                Ok(BriefTurn::Question(text.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{core, ScriptedOracle};
    use crate::model::ScopeKind;
    use crate::oracle::MessageRole;

    fn conversation() -> Conversation {
        let mut conversation = Conversation::default();
        conversation.push(TurnRole::User, "EV market in Europe");
        conversation.push(TurnRole::Assistant, "Which countries?");
        conversation.push(TurnRole::User, "Germany and France");
        conversation
    }

    #[tokio::test]
    async fn test_question_turn() {
        let oracle = ScriptedOracle::new([r#"{"status": "question", "question": "Which years?"}"#]);
        let agent = OracleBriefAgent::new(core(oracle.clone(), false), "brief");
        let session = Session::new("u1", "EV market in Europe");

        let turn = agent
            .respond(&session, Some(&ResearchContext::new("ctx")), &conversation())
            .await
            .unwrap();
        assert_eq!(turn, BriefTurn::Question("Which years?".to_string()));

        let request = &oracle.requests()[0];
        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
        assert!(request.messages[1].content.contains("Background context"));
    }

    #[tokio::test]
    async fn test_complete_turn_normalizes_brief() {
        let oracle = ScriptedOracle::new([r#"```json
{"status": "complete", "brief": {
  "goal": "Size the EV market",
  "scope": [
    {"topic": "Market size", "kind": "data", "priority": "high"},
    {"topic": "Policy", "kind": "research"}
  ],
  "output_formats": ["markdown"]
}}
```"#]);
        let agent = OracleBriefAgent::new(core(oracle, false), "brief");
        let session = Session::new("u1", "q");

        let BriefTurn::Draft(brief) = agent
            .respond(&session, None, &conversation())
            .await
            .unwrap()
        else {
            panic!("expected a draft");
        };
        assert_eq!(brief.scope[0].id, "s1");
        assert_eq!(brief.scope[1].id, "s2");
        assert_eq!(brief.scope[1].kind, ScopeKind::Research);
    }

    #[tokio::test]
    async fn test_empty_scope_is_invalid_output() {
        let oracle = ScriptedOracle::new([
            r#"{"status": "complete", "brief": {"goal": "g", "scope": []}}"#,
        ]);
        let agent = OracleBriefAgent::new(core(oracle, false), "brief");
        let err = agent
            .respond(&Session::new("u1", "q"), None, &conversation())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn test_prose_reply_becomes_question() {
        let oracle = ScriptedOracle::new(["Could you narrow the time range?"]);
        let agent = OracleBriefAgent::new(core(oracle, false), "brief");
        let turn = agent
            .respond(&Session::new("u1", "q"), None, &conversation())
            .await
            .unwrap();
        assert_eq!(
            turn,
            BriefTurn::Question("Could you narrow the time range?".to_string())
        );
    }
}
