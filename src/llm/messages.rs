use serde::{Deserialize, Serialize};

/// Function-call directive emitted by the model.
///
/// `arguments` keeps the raw JSON text exactly as the model produced it so it
/// can be echoed back in the follow-up request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One chat message, tagged by role.
///
/// Each role only carries the fields the chat-completions protocol accepts
/// for it, so a user message with a function call cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_call: Option<FunctionCall>,
    },
    Function {
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>) -> Self {
        Self::Assistant {
            content,
            function_call: None,
        }
    }

    /// Assistant turn that requested a function; content is always null.
    pub fn assistant_function_call(call: FunctionCall) -> Self {
        Self::Assistant {
            content: None,
            function_call: Some(call),
        }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Textual content, if the message has any.
    pub fn content_text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Function { content, .. } => {
                Some(content)
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }
}
