//! Persona replies: history window, query rewriting, retrieval and generation.

use std::sync::Arc;

use crate::config::StudyConfig;
use crate::error::ChatError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::retrieval::DocumentRetriever;

use super::prompts::{QUERY_REWRITE_INSTRUCTION, grounded_user_message, persona_system_prompt};
use super::session::{ChatContext, Speaker, Turn};

const REPLY_MAX_TOKENS: u32 = 512;
const REWRITE_MAX_TOKENS: u32 = 128;

/// The last `n` turns, with the persona's first turn put back in front when
/// it has scrolled out of the window.
pub fn history_window(conversation: &[Turn], n: usize) -> Vec<Turn> {
    let start = conversation.len().saturating_sub(n);
    let mut window = conversation[start..].to_vec();
    if let Some(first) = conversation
        .iter()
        .position(|t| t.speaker == Speaker::Assistant)
        .filter(|&i| i < start)
    {
        window.insert(0, conversation[first].clone());
    }
    window
}

fn to_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|t| match t.speaker {
            Speaker::User => ChatMessage::user(&t.text),
            Speaker::Assistant => ChatMessage::assistant(&t.text),
        })
        .collect()
}

/// Composes the retriever and the LLM into one reply per participant turn.
pub struct ChatResponder {
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<dyn DocumentRetriever>,
    history_turns: usize,
    retrieval_k: usize,
    rewrite_queries: bool,
}

impl ChatResponder {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<dyn DocumentRetriever>,
        config: &StudyConfig,
    ) -> Self {
        Self {
            llm,
            retriever,
            history_turns: config.history_turns,
            retrieval_k: config.retrieval_k,
            rewrite_queries: config.rewrite_queries,
        }
    }

    /// Produce the persona's reply to `ctx.utterance`.
    pub async fn reply(&self, ctx: &ChatContext<'_>) -> Result<String, ChatError> {
        let history = to_messages(&history_window(ctx.history, self.history_turns));

        let query = self.search_query(&history, ctx.utterance).await;
        let passages = self.retriever.retrieve(&query, self.retrieval_k).await?;
        tracing::debug!(passages = passages.len(), query = %query, "Retrieved context");
        let context: Vec<String> = passages.into_iter().map(|p| p.text).collect();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(persona_system_prompt(ctx.gender)));
        messages.extend(history);
        messages.push(ChatMessage::user(grounded_user_message(
            &context,
            ctx.utterance,
        )));

        let request = CompletionRequest::new(messages)
            .with_max_tokens(REPLY_MAX_TOKENS)
            .with_temperature(0.0);
        let response = self.llm.complete(request).await?;
        tracing::debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Generated persona reply"
        );

        let reply = response.content.trim();
        if reply.is_empty() {
            return Err(ChatError::EmptyReply);
        }
        Ok(reply.to_string())
    }

    /// Rewrite the utterance into a standalone search query. Falls back to
    /// the raw utterance on any failure.
    async fn search_query(&self, history: &[ChatMessage], utterance: &str) -> String {
        if !self.rewrite_queries || history.is_empty() {
            return utterance.to_string();
        }

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(utterance));
        messages.push(ChatMessage::user(QUERY_REWRITE_INSTRUCTION));
        let request = CompletionRequest::new(messages)
            .with_max_tokens(REWRITE_MAX_TOKENS)
            .with_temperature(0.0);

        match self.llm.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                response.content.trim().to_string()
            }
            Ok(_) => utterance.to_string(),
            Err(e) => {
                tracing::warn!("Query rewrite failed, searching with raw utterance: {}", e);
                utterance.to_string()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{LlmError, RetrievalError};
    use crate::llm::{CompletionResponse, FinishReason, Role};
    use crate::retrieval::Passage;
    use crate::study::model::Gender;

    /// Replies with a fixed script and records every request.
    pub(crate) struct ScriptedLlm {
        pub replies: Mutex<Vec<Result<String, String>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("Dzięki!".to_string()));
            match next {
                Ok(content) => Ok(CompletionResponse {
                    content,
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: FinishReason::Stop,
                }),
                Err(reason) => Err(LlmError::RequestFailed {
                    provider: "scripted".to_string(),
                    reason,
                }),
            }
        }
    }

    /// Returns fixed passages and records queries.
    pub(crate) struct FixedRetriever {
        pub fail: bool,
        pub queries: Mutex<Vec<String>>,
    }

    impl FixedRetriever {
        pub(crate) fn new() -> Self {
            Self {
                fail: false,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentRetriever for FixedRetriever {
        async fn retrieve(
            &self,
            query: &str,
            limit: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(RetrievalError::SearchFailed {
                    reason: "index offline".to_string(),
                });
            }
            Ok((0..limit)
                .map(|i| Passage {
                    source: "workbook".to_string(),
                    text: format!("passage {i}"),
                })
                .collect())
        }
    }

    fn conversation(len: usize) -> Vec<Turn> {
        (0..len)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::assistant(format!("a{i}"))
                } else {
                    Turn::user(format!("u{i}"))
                }
            })
            .collect()
    }

    fn responder(llm: Arc<ScriptedLlm>, retriever: Arc<FixedRetriever>) -> ChatResponder {
        ChatResponder::new(llm, retriever, &StudyConfig::default())
    }

    #[test]
    fn short_history_is_kept_whole() {
        let turns = conversation(3);
        assert_eq!(history_window(&turns, 6), turns);
    }

    #[test]
    fn long_history_keeps_first_assistant_turn() {
        let turns = conversation(10);
        let window = history_window(&turns, 6);
        assert_eq!(window.len(), 7);
        assert_eq!(window[0].text, "a0");
        assert_eq!(window[1].text, "a4");
        assert_eq!(window.last().unwrap().text, "u9");
    }

    #[test]
    fn window_starting_at_first_turn_is_not_duplicated() {
        let turns = conversation(6);
        let window = history_window(&turns, 6);
        assert_eq!(window, turns);
    }

    #[tokio::test]
    async fn reply_rewrites_retrieves_and_generates() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("jak radzić sobie z błędami"),
            Ok("  Dzięki, to ciekawe. Jak to robisz?  "),
        ]));
        let retriever = Arc::new(FixedRetriever::new());
        let history = conversation(1);
        let ctx = ChatContext {
            history: &history,
            utterance: "Robię przerwę",
            gender: Some(Gender::Male),
        };

        let reply = responder(llm.clone(), retriever.clone())
            .reply(&ctx)
            .await
            .unwrap();
        assert_eq!(reply, "Dzięki, to ciekawe. Jak to robisz?");
        assert_eq!(
            retriever.queries.lock().unwrap().as_slice(),
            ["jak radzić sobie z błędami"]
        );

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].temperature, Some(0.0));
        let generation = &requests[1];
        assert_eq!(generation.messages[0].role, Role::System);
        assert!(generation.messages[0].content.contains("**mężczyzna**"));
        assert_eq!(generation.messages[1].content, "a0");
        let last = generation.messages.last().unwrap();
        assert!(last.content.contains("passage 3"));
        assert!(last.content.contains("Robię przerwę"));
    }

    #[tokio::test]
    async fn failed_rewrite_falls_back_to_utterance() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err("timeout"), Ok("Odpowiedź")]));
        let retriever = Arc::new(FixedRetriever::new());
        let history = conversation(1);
        let ctx = ChatContext {
            history: &history,
            utterance: "Robię przerwę",
            gender: None,
        };
        let reply = responder(llm, retriever.clone()).reply(&ctx).await.unwrap();
        assert_eq!(reply, "Odpowiedź");
        assert_eq!(retriever.queries.lock().unwrap()[0], "Robię przerwę");
    }

    #[tokio::test]
    async fn retrieval_and_generation_failures_surface() {
        let history = conversation(1);
        let ctx = ChatContext {
            history: &history,
            utterance: "hej",
            gender: None,
        };

        let failing = Arc::new(FixedRetriever {
            fail: true,
            queries: Mutex::new(Vec::new()),
        });
        let err = responder(Arc::new(ScriptedLlm::new(vec![])), failing)
            .reply(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Retrieval(_)));

        let llm = Arc::new(ScriptedLlm::new(vec![Ok("zapytanie"), Err("503")]));
        let err = responder(llm, Arc::new(FixedRetriever::new()))
            .reply(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));

        let llm = Arc::new(ScriptedLlm::new(vec![Ok("zapytanie"), Ok("   ")]));
        let err = responder(llm, Arc::new(FixedRetriever::new()))
            .reply(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyReply));
    }
}
