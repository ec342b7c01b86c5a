use crate::core::message::{HistoryTurn, Message, Role};

/// Ordered turns resent with every request. Owned by one chat session; only
/// completed exchanges are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStore {
    turns: Vec<HistoryTurn>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: HistoryTurn) {
        self.turns.push(turn);
    }

    pub fn replace_all(&mut self, turns: Vec<HistoryTurn>) {
        self.turns = turns;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn snapshot(&self) -> Vec<HistoryTurn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Rebuild turns from a persisted transcript as user/assistant pairs.
    /// Assistant lines without a preceding question (the greeting) are
    /// skipped; an exchange with a blank side (a file-only question or an
    /// empty reply) is dropped whole.
    pub fn turns_from_messages(messages: &[Message]) -> Vec<HistoryTurn> {
        let mut turns = Vec::new();
        let mut question: Option<&Message> = None;
        for message in messages {
            match message.role {
                Role::User => question = Some(message),
                Role::Assistant => {
                    let Some(user) = question.take() else {
                        continue;
                    };
                    if is_blank(user) || is_blank(message) {
                        continue;
                    }
                    turns.push(HistoryTurn::text(Role::User, user.content.clone()));
                    turns.push(HistoryTurn::text(Role::Assistant, message.content.clone()));
                }
            }
        }
        turns
    }
}

fn is_blank(message: &Message) -> bool {
    message.content.trim().is_empty()
}
