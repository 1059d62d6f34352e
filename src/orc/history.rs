use serde::{Deserialize, Serialize};

use crate::llm::messages::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry of the caller's chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for Message {
    fn from(turn: &ChatTurn) -> Self {
        match turn.role {
            TurnRole::User => Message::user(turn.content.clone()),
            TurnRole::Assistant => Message::assistant(Some(turn.content.clone())),
        }
    }
}

/// Converts the whole history, current user turn included, in order.
pub fn history_to_messages(history: &[ChatTurn]) -> Vec<Message> {
    history.iter().map(Message::from).collect()
}

#[cfg(test)]
mod tests {
    use super::{ChatTurn, history_to_messages};
    use crate::llm::messages::Message;

    #[test]
    fn history_keeps_order_and_last_turn() {
        let history = vec![
            ChatTurn::user("What is policy X?"),
            ChatTurn::assistant("Policy X covers travel."),
            ChatTurn::user("And policy Y?"),
        ];

        let messages = history_to_messages(&history);
        assert_eq!(
            messages,
            vec![
                Message::user("What is policy X?"),
                Message::assistant(Some("Policy X covers travel.".to_string())),
                Message::user("And policy Y?"),
            ]
        );
    }

    #[test]
    fn history_parses_from_json() {
        let history: Vec<ChatTurn> =
            serde_json::from_str(r#"[{"role":"user","content":"Hi there"}]"#)
                .expect("history should parse");
        assert_eq!(history, vec![ChatTurn::user("Hi there")]);
    }
}
