use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::llm::functions::GET_SOURCES;
use crate::llm::messages::FunctionCall;
use crate::orc::retrieval::{RetrievalArgs, RetrievalError, Retriever};

/// Closed set of functions the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    GetSources,
}

impl FunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetSources => GET_SOURCES,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DispatchError> {
        match name {
            GET_SOURCES => Ok(Self::GetSources),
            _ => Err(DispatchError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("malformed arguments for function '{name}': {reason}")]
    MalformedArguments { name: String, reason: String },
    #[error("function '{name}' failed: {source}")]
    Invocation {
        name: &'static str,
        #[source]
        source: RetrievalError,
    },
}

/// Function-call directive with its arguments parsed into a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl FunctionCallRequest {
    pub fn parse(call: &FunctionCall) -> Result<Self, DispatchError> {
        let malformed = |reason: String| DispatchError::MalformedArguments {
            name: call.name.clone(),
            reason,
        };
        let value: Value =
            serde_json::from_str(&call.arguments).map_err(|err| malformed(err.to_string()))?;
        match value {
            Value::Object(arguments) => Ok(Self {
                name: call.name.clone(),
                arguments,
            }),
            other => Err(malformed(format!("expected a JSON object, got {other}"))),
        }
    }
}

/// A registered capability, one variant per [`FunctionKind`].
#[derive(Clone)]
pub enum Capability {
    Retrieval(Arc<dyn Retriever>),
}

impl Capability {
    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::Retrieval(_) => FunctionKind::GetSources,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Capability").field(&self.kind()).finish()
    }
}

/// Result of invoking a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOutput {
    pub kind: FunctionKind,
    pub result: String,
    /// Question sent to retrieval, when the capability was retrieval.
    pub search_query: Option<String>,
}

/// Immutable name to capability table.
#[derive(Debug, Clone, Default)]
pub struct FunctionDispatchTable {
    capabilities: HashMap<FunctionKind, Capability>,
}

impl FunctionDispatchTable {
    pub fn builder() -> FunctionDispatchTableBuilder {
        FunctionDispatchTableBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Result<&Capability, DispatchError> {
        let kind = FunctionKind::from_name(name)?;
        self.capabilities
            .get(&kind)
            .ok_or_else(|| DispatchError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub async fn invoke(
        &self,
        capability: &Capability,
        arguments: &Map<String, Value>,
    ) -> Result<FunctionOutput, DispatchError> {
        match capability {
            Capability::Retrieval(retriever) => {
                let kind = capability.kind();
                let args = RetrievalArgs::from_arguments(arguments).map_err(|reason| {
                    DispatchError::MalformedArguments {
                        name: kind.name().to_string(),
                        reason,
                    }
                })?;
                let result = retriever
                    .retrieve(&args)
                    .await
                    .map_err(|source| DispatchError::Invocation {
                        name: kind.name(),
                        source,
                    })?;
                Ok(FunctionOutput {
                    kind,
                    result,
                    search_query: Some(args.question),
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct FunctionDispatchTableBuilder {
    capabilities: HashMap<FunctionKind, Capability>,
}

impl FunctionDispatchTableBuilder {
    pub fn retrieval(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.capabilities
            .insert(FunctionKind::GetSources, Capability::Retrieval(retriever));
        self
    }

    pub fn build(self) -> FunctionDispatchTable {
        FunctionDispatchTable {
            capabilities: self.capabilities,
        }
    }
}
