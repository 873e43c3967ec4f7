//! In-process Tool Registry
//!
//! The executor can only reach tools registered here. Required parameters
//! are checked before a handler runs so a malformed call never touches the
//! machine.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use pca_core::{Arguments, ToolDescriptor, ToolError, ToolOutput, ToolRegistry, ToolRisk};

/// A registered tool: its descriptor plus the async handler
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError>;
}

/// Tool backed by a closure, for ad-hoc registration
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    pub fn new(descriptor: ToolDescriptor, handler: F) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        (self.handler)(arguments.clone()).await
    }
}

fn kind_matches(kind: &str, value: &Value) -> bool {
    match kind {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Check arguments against a descriptor's parameter schema
pub fn validate_arguments(tool: &ToolDescriptor, arguments: &Arguments) -> Result<(), ToolError> {
    for param in &tool.params {
        match arguments.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ToolError::InvalidArguments {
                    tool: tool.name.clone(),
                    message: format!("missing required param: {}", param.name),
                });
            }
            Some(value) if !value.is_null() && !kind_matches(&param.kind, value) => {
                return Err(ToolError::InvalidArguments {
                    tool: tool.name.clone(),
                    message: format!("param '{}' must be of type {}", param.name, param.kind),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Registry of tools living in this process
#[derive(Default, Clone)]
pub struct LocalToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl LocalToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in diagnostic and file tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in crate::builtin::all() {
            registry.register_arc(tool);
        }
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.descriptor().name;
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of read-only tools
    pub fn safe_tools(&self) -> Vec<String> {
        self.tools
            .values()
            .map(|t| t.descriptor())
            .filter(|d| d.risk_level == ToolRisk::Safe)
            .map(|d| d.name)
            .collect()
    }
}

#[async_trait]
impl ToolRegistry for LocalToolRegistry {
    fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor())
    }

    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    async fn invoke(&self, name: &str, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        validate_arguments(&tool.descriptor(), arguments)?;
        tool.call(arguments).await
    }
}
