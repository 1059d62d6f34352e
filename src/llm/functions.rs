use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the retrieval function exposed to the model.
pub const GET_SOURCES: &str = "get_sources";

/// JSON schema primitive types supported for function parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One function parameter definition.
#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: String,
    pub description: Option<String>,
    pub kind: ParamType,
    pub required: bool,
}

impl FunctionParam {
    pub fn new(
        name: impl Into<String>,
        kind: ParamType,
        required: bool,
        description: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            kind,
            required,
        }
    }
}

/// Callable function declaration in chat-completions `functions` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionDeclaration {
    /// Builds a declaration from typed parameter definitions.
    pub fn from_params(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[FunctionParam],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: params_schema(params),
        }
    }
}

fn params_schema(params: &[FunctionParam]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut param_def = Map::new();
        param_def.insert(
            "type".to_string(),
            Value::String(param.kind.as_str().to_string()),
        );
        if let Some(description) = &param.description {
            param_def.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        properties.insert(param.name.clone(), Value::Object(param_def));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(schema)
}

/// Declarations offered to the model when no file overrides them.
pub fn default_declarations() -> Vec<FunctionDeclaration> {
    vec![FunctionDeclaration::from_params(
        GET_SOURCES,
        "Retrieve sources from the knowledge base that help answer the user's question.",
        &[FunctionParam::new(
            "question",
            ParamType::String,
            true,
            Some("Standalone question to search the knowledge base for.".to_string()),
        )],
    )]
}

/// Loads an ordered JSON array of declarations.
pub fn load_declarations(path: &Path) -> Result<Vec<FunctionDeclaration>, String> {
    let raw = fs::read_to_string(path).map_err(|err| {
        format!(
            "Failed to read functions file '{}': {err}",
            path.display()
        )
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        format!(
            "Failed to parse functions file '{}': {err}",
            path.display()
        )
    })
}
