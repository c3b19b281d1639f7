use std::sync::Mutex;

use crate::models::message::Message;
use crate::providers::base::Usage;

/// Last-exchange and running token usage for a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub last: Usage,
    pub cumulative: Usage,
}

struct State {
    messages: Vec<Message>,
    last_usage: Usage,
    cumulative_usage: Usage,
}

/// Append-only conversation state: an immutable system prompt, the message
/// log, and token-usage counters.
///
/// The locking discipline is copy-out/merge-in: `snapshot` clones the history
/// under the lock and `append` merges a completed exchange under the lock.
/// The lock is never held across network I/O, so a stalled stream cannot
/// block concurrent readers.
pub struct Conversation {
    system_prompt: String,
    state: Mutex<State>,
}

impl Conversation {
    pub fn new<S: Into<String>>(system_prompt: S, initial_messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            state: Mutex::new(State {
                messages: initial_messages,
                last_usage: Usage::default(),
                cumulative_usage: Usage::default(),
            }),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Independent copy of the system prompt and history. Never observes a
    /// partially-appended exchange.
    pub fn snapshot(&self) -> (String, Vec<Message>) {
        let state = self.state.lock().unwrap();
        (self.system_prompt.clone(), state.messages.clone())
    }

    /// Atomically append a completed exchange and fold its usage into the
    /// counters. The only mutator.
    pub fn append(&self, messages: Vec<Message>, usage: &Usage) {
        let mut state = self.state.lock().unwrap();
        tracing::debug!(
            appended = messages.len(),
            history = state.messages.len() + messages.len(),
            "conversation append"
        );
        state.messages.extend(messages);
        state.cumulative_usage = add_usage(&state.cumulative_usage, usage);
        state.last_usage = usage.clone();
    }

    pub fn token_usage(&self) -> TokenUsage {
        let state = self.state.lock().unwrap();
        TokenUsage {
            last: state.last_usage.clone(),
            cumulative: state.cumulative_usage.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn add_usage(total: &Usage, delta: &Usage) -> Usage {
    fn add(a: Option<i32>, b: Option<i32>) -> Option<i32> {
        match (a, b) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        }
    }
    Usage::new(
        add(total.input_tokens, delta.input_tokens),
        add(total.output_tokens, delta.output_tokens),
        add(total.total_tokens, delta.total_tokens),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let conversation = Conversation::new("system", vec![Message::user().with_text("hi")]);
        let (system, history) = conversation.snapshot();
        conversation.append(
            vec![Message::assistant().with_text("hello")],
            &Usage::default(),
        );

        assert_eq!(system, "system");
        assert_eq!(history.len(), 1);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn usage_accumulates_and_zero_rounds_leave_cumulative_unchanged() {
        let conversation = Conversation::new("system", vec![]);
        conversation.append(vec![], &Usage::new(Some(10), Some(5), Some(15)));
        let usage = conversation.token_usage();
        assert_eq!(usage.cumulative.total_tokens, Some(15));
        assert_eq!(usage.last.input_tokens, Some(10));

        conversation.append(vec![], &Usage::new(Some(0), Some(0), Some(0)));
        let usage = conversation.token_usage();
        assert_eq!(usage.cumulative.input_tokens, Some(10));
        assert_eq!(usage.cumulative.output_tokens, Some(5));
        assert_eq!(usage.cumulative.total_tokens, Some(15));
    }

    #[test]
    fn appends_are_atomic_under_concurrent_snapshots() {
        let conversation = Arc::new(Conversation::new("system", vec![]));
        let writer = {
            let conversation = conversation.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    conversation.append(
                        vec![
                            Message::user().with_text(format!("q{i}")),
                            Message::assistant().with_text(format!("a{i}")),
                        ],
                        &Usage::default(),
                    );
                }
            })
        };

        // Exchanges land in pairs, so a snapshot must never see an odd count.
        for _ in 0..100 {
            let (_, history) = conversation.snapshot();
            assert_eq!(history.len() % 2, 0);
        }
        writer.join().unwrap();
        assert_eq!(conversation.len(), 200);
    }
}
