//! Explicit, caller-triggered compaction of the whole history.
//!
//! The history is flattened into a transcript, the model is asked for a
//! structured summary, and the summary becomes the only message. A failed
//! summarization call leaves the history exactly as it was.

use tracing::{debug, warn};

use crate::Message;
use crate::api::transport::ChatTransport;
use crate::context::window::{ContextManager, ContextStats};
use crate::error::LlmError;

/// Summarization request. `{conversation_history}` is replaced with the transcript.
pub const CONTEXT_SUMMARY_PROMPT: &str = "\
Analyze the following conversation history and create a concise but informative summary.

Important guidelines:
- Highlight key decisions and results
- Emphasize the most recent messages (they are most relevant)
- Preserve important technical context (files, functions, errors, code changes)
- The summary should allow continuing work without losing context

Conversation history:
{conversation_history}

Create a summary in this format:

## Working Context
[Brief description of the task and current state]

## Key Results
[What was accomplished]

## Current Focus
[What was being worked on in recent messages]

## Important Details
[Technical details to remember: file paths, function names, decisions made]
";

/// Result of [`compact`].
#[derive(Debug)]
pub enum CompactionOutcome {
    Compacted {
        summary: String,
        before: ContextStats,
        after: ContextStats,
        /// `before.used_tokens - after.used_tokens`; negative if the summary grew.
        tokens_saved: i64,
    },
    /// History was already empty.
    NothingToCompact { stats: ContextStats },
    /// The summarization call failed; history is untouched.
    Failed {
        error: LlmError,
        stats: ContextStats,
    },
}

/// `[ROLE]: content` blocks separated by blank lines.
pub fn flatten_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role.to_string().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_summary_prompt(messages: &[Message]) -> String {
    CONTEXT_SUMMARY_PROMPT.replace("{conversation_history}", &flatten_transcript(messages))
}

/// Summarize `context` through `transport` and replace its history.
pub async fn compact(
    context: &mut ContextManager,
    transport: &dyn ChatTransport,
) -> CompactionOutcome {
    let before = context.get_stats();
    if context.is_empty() {
        return CompactionOutcome::NothingToCompact { stats: before };
    }

    let request = [Message::user(build_summary_prompt(context.messages()))];
    debug!(
        "Compacting {} message(s), {} tokens",
        before.message_count, before.used_tokens
    );

    let summary = match transport.chat(&request).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!("Compaction returned an empty summary; history kept");
            return CompactionOutcome::Failed {
                error: LlmError::Api("model returned an empty summary".into()),
                stats: before,
            };
        }
        Err(error) => {
            warn!("Compaction failed: {error}; history kept");
            return CompactionOutcome::Failed {
                error,
                stats: before,
            };
        }
    };

    context.set_initial_summary(&summary);
    context.set_compacted(true);
    let after = context.get_stats();
    let tokens_saved = before.used_tokens as i64 - after.used_tokens as i64;
    debug!(
        "Compacted context: {} -> {} tokens ({tokens_saved} saved)",
        before.used_tokens, after.used_tokens
    );

    CompactionOutcome::Compacted {
        summary,
        before,
        after,
        tokens_saved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::ChatFuture;
    use crate::context::window::{ContextConfig, SUMMARY_HEADER};
    use std::sync::Mutex;

    struct Summarizer {
        reply: Result<String, String>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Summarizer {
        fn replying(reply: Result<&str, &str>) -> Self {
            Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatTransport for Summarizer {
        fn chat<'a>(&'a self, messages: &'a [Message]) -> ChatFuture<'a> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let reply = self.reply.clone().map_err(LlmError::Request);
            Box::pin(async move { reply })
        }
    }

    fn populated() -> ContextManager {
        let mut ctx = ContextManager::new(ContextConfig::default()).unwrap();
        ctx.set_system_prompt("system");
        ctx.add_message(Message::user("Fix the bug in parser.rs"));
        ctx.add_message(Message::assistant("Reading parser.rs now. ".repeat(50)));
        ctx.add_message(Message::tool_results("[file-read]: fn parse() {}"));
        ctx
    }

    #[test]
    fn transcript_uses_uppercase_roles() {
        let text = flatten_transcript(&[Message::user("hi"), Message::assistant("hello")]);
        assert_eq!(text, "[USER]: hi\n\n[ASSISTANT]: hello");
    }

    #[test]
    fn prompt_embeds_transcript_and_sections() {
        let prompt = build_summary_prompt(&[Message::user("hi")]);
        assert!(prompt.contains("Conversation history:\n[USER]: hi\n"));
        for section in ["## Working Context", "## Key Results", "## Current Focus", "## Important Details"] {
            assert!(prompt.contains(section), "missing {section}");
        }
        assert!(!prompt.contains("{conversation_history}"));
    }

    #[tokio::test]
    async fn compaction_replaces_history() {
        let mut ctx = populated();
        let transport = Summarizer::replying(Ok("## Working Context\nFixing parser.rs"));

        let outcome = compact(&mut ctx, &transport).await;
        let (summary, before, after, tokens_saved) = match outcome {
            CompactionOutcome::Compacted {
                summary,
                before,
                after,
                tokens_saved,
            } => (summary, before, after, tokens_saved),
            other => panic!("expected compaction, got {other:?}"),
        };

        assert_eq!(summary, "## Working Context\nFixing parser.rs");
        assert_eq!(before.message_count, 3);
        assert_eq!(after.message_count, 1);
        assert_eq!(tokens_saved, before.used_tokens as i64 - after.used_tokens as i64);
        assert!(tokens_saved > 0);
        assert!(ctx.messages()[0].content.starts_with(SUMMARY_HEADER));
        assert!(ctx.is_compacted());
        assert_eq!(ctx.system_prompt(), "system");

        // One standalone request: no system prompt, transcript in a user turn.
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 1);
        assert!(seen[0][0].content.contains("[USER]: Fix the bug in parser.rs"));
    }

    #[tokio::test]
    async fn failure_leaves_history_untouched() {
        let mut ctx = populated();
        let snapshot = ctx.messages().to_vec();
        let outcome = compact(&mut ctx, &Summarizer::replying(Err("connection reset"))).await;

        assert!(matches!(outcome, CompactionOutcome::Failed { .. }));
        assert_eq!(ctx.messages(), snapshot.as_slice());
        assert!(!ctx.is_compacted());
    }

    #[tokio::test]
    async fn blank_summary_is_a_failure() {
        let mut ctx = populated();
        let outcome = compact(&mut ctx, &Summarizer::replying(Ok("   "))).await;
        assert!(matches!(outcome, CompactionOutcome::Failed { .. }));
        assert_eq!(ctx.len(), 3);
    }

    #[tokio::test]
    async fn empty_history_is_not_sent() {
        let mut ctx = ContextManager::new(ContextConfig::default()).unwrap();
        let transport = Summarizer::replying(Ok("unused"));
        let outcome = compact(&mut ctx, &transport).await;
        assert!(matches!(outcome, CompactionOutcome::NothingToCompact { .. }));
        assert!(transport.seen.lock().unwrap().is_empty());
    }
}
