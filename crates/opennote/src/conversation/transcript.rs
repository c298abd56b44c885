//! Bounded message history.
//!
//! The transcript keeps a running character count and trims from the front
//! before anything new is appended. Eviction works on units: an assistant
//! tool request leaves together with the tool results answering it, so the
//! history handed to the model never opens with an unanswered call or an
//! orphaned tool result.

use std::collections::VecDeque;
use tracing::debug;

use super::message::{Message, Role};

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: VecDeque<Message>,
    char_len: usize,
    budget: usize,
}

impl Transcript {
    pub fn new(budget: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            char_len: 0,
            budget,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Owned copy of the history, in order, for a provider call.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    /// Appends one message, trimming first if it would not fit.
    pub fn push(&mut self, message: Message) {
        self.trim_for(message.char_len());
        self.char_len += message.char_len();
        self.messages.push_back(message);
    }

    /// Appends messages that must stay adjacent (a tool request and its results).
    pub fn push_unit(&mut self, unit: Vec<Message>) {
        let incoming: usize = unit.iter().map(Message::char_len).sum();
        self.trim_for(incoming);
        for message in unit {
            self.char_len += message.char_len();
            self.messages.push_back(message);
        }
    }

    fn trim_for(&mut self, incoming: usize) {
        let mut evicted = 0;
        while !self.messages.is_empty() && self.char_len + incoming > self.budget {
            evicted += self.evict_front_unit();
        }
        if evicted > 0 {
            debug!(
                "Trimmed {} messages from transcript ({} of {} chars in use)",
                evicted, self.char_len, self.budget
            );
        }
    }

    fn evict_front_unit(&mut self) -> usize {
        let Some(first) = self.pop_front() else {
            return 0;
        };
        let mut evicted = 1;
        if first.is_tool_request() || first.role == Role::Tool {
            while self.messages.front().map(|m| m.role == Role::Tool).unwrap_or(false) {
                self.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    fn pop_front(&mut self) -> Option<Message> {
        let message = self.messages.pop_front()?;
        self.char_len -= message.char_len();
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolCall;
    use proptest::prelude::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "query_notes".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn test_push_within_budget_keeps_everything() {
        let mut transcript = Transcript::new(100);
        transcript.push(Message::user("hello"));
        transcript.push(Message::assistant("hi there"));
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.char_len(), 13);
    }

    #[test]
    fn test_oldest_message_evicted_first() {
        let mut transcript = Transcript::new(10);
        transcript.push(Message::user("aaaa"));
        transcript.push(Message::assistant("bbbb"));
        transcript.push(Message::user("cccc"));

        let contents: Vec<&str> = transcript.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["bbbb", "cccc"]);
        assert_eq!(transcript.char_len(), 8);
    }

    #[test]
    fn test_tool_request_evicted_with_its_results() {
        let mut transcript = Transcript::new(40);
        let request = call("call_1");
        transcript.push_unit(vec![
            Message::assistant_tool_request("", request.clone()),
            Message::tool_result(&request, "0123456789"),
        ]);
        transcript.push(Message::assistant("final answer"));
        transcript.push(Message::user("next question"));

        // "query_notes{}" (13) + 10 + 12 + 13 > 40: the whole first unit goes.
        assert_eq!(transcript.messages().next().map(|m| m.role), Some(Role::Assistant));
        assert!(!transcript.messages().any(|m| m.role == Role::Tool));
        assert!(!transcript.messages().any(Message::is_tool_request));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_oversized_message_is_kept_alone() {
        let mut transcript = Transcript::new(5);
        transcript.push(Message::user("abc"));
        transcript.push(Message::user("much longer than five"));
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().map(|m| m.content.as_str()), Some("much longer than five"));
    }

    fn arb_step() -> impl Strategy<Value = (bool, String)> {
        (any::<bool>(), "[a-z ]{0,30}")
    }

    proptest! {
        #[test]
        fn prop_transcript_stays_bounded(steps in proptest::collection::vec(arb_step(), 1..60)) {
            let budget = 64;
            let mut transcript = Transcript::new(budget);
            for (i, (with_tool, text)) in steps.into_iter().enumerate() {
                transcript.push(Message::user(text.clone()));
                if with_tool {
                    let request = call(&format!("call_{}", i));
                    transcript.push_unit(vec![
                        Message::assistant_tool_request("", request.clone()),
                        Message::tool_result(&request, text.clone()),
                    ]);
                }
                transcript.push(Message::assistant(text));

                let counted: usize = transcript.messages().map(Message::char_len).sum();
                prop_assert_eq!(counted, transcript.char_len());
                prop_assert!(transcript.char_len() <= budget);
                let front = transcript.messages().next().map(|m| m.role);
                prop_assert_ne!(front, Some(Role::Tool));
            }
        }
    }
}
