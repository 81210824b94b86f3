//! Tool and resource handler traits, and the registry that owns them
//!
//! Resource and tool handlers are the two capabilities a user of this
//! runtime provides. Both are expressed as narrow `async_trait`
//! interfaces rather than an open inheritance hierarchy, matching how
//! `initialize`/`tools/*`/`resources/*` are the only dispatchable
//! surface this runtime defines. A [`HandlerRegistry`] owns the routes
//! table (built via [`crate::router::Router`]) plus a name-keyed table
//! of tools; both are built once at construction and read-only
//! thereafter.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RuntimeError;
use crate::mcp::types::{CallToolResponse, McpTool, ResourceContents, ResourceTemplate};
use crate::router::Router;
use crate::template::ParamBinding;

/// Implemented by user-provided tool backends, one per `tools/call` name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Metadata returned in `tools/list` for this tool.
    fn descriptor(&self) -> McpTool;

    /// Invoke the tool with `params.arguments` passed through unchanged.
    async fn call(&self, arguments: Option<Value>) -> Result<CallToolResponse, RuntimeError>;
}

/// Implemented by user-provided resource backends, one per registered
/// URI template.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource identified by `uri`, given the parameter
    /// binding the router extracted from its matching template.
    async fn read(
        &self,
        uri: &str,
        binding: &ParamBinding,
    ) -> Result<Vec<ResourceContents>, RuntimeError>;
}

/// A named tool paired with its handler. A thin wrapper so call sites
/// don't have to thread `(String, Arc<dyn ToolHandler>)` tuples around;
/// [`crate::mcp::types::McpTool`] is the wire type this produces.
struct Tool {
    handler: Arc<dyn ToolHandler>,
}

/// Owns the route table and the tool table. Built once at server
/// startup (via [`HandlerRegistry::register_tool`] and
/// [`HandlerRegistry::register_resource_template`]), then shared
/// read-only with every transport.
#[derive(Default)]
pub struct HandlerRegistry {
    router: Router,
    tools: HashMap<String, Tool>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            router: Router::new(),
            tools: HashMap::new(),
        }
    }

    pub fn register_tool(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.descriptor().name.clone();
        self.tools.insert(name, Tool { handler });
    }

    pub fn register_resource_template(
        &mut self,
        uri_template: &str,
        handler: Arc<dyn ResourceHandler>,
        user_data: Option<Value>,
    ) -> Result<(), RuntimeError> {
        self.router.register(uri_template, handler, user_data)
    }

    pub fn list_tools(&self) -> Vec<McpTool> {
        self.tools.values().map(|t| t.handler.descriptor()).collect()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.router
            .routes()
            .iter()
            .map(|route| ResourceTemplate {
                uri_template: route.template.clone(),
                name: route.template.clone(),
                description: None,
                mime_type: None,
            })
            .collect()
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResponse, RuntimeError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RuntimeError::ToolNotFound(name.to_string()))?;
        tool.handler.call(arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, RuntimeError> {
        let (route, binding) = self.router.dispatch(uri)?;
        route.handler.read(uri, &binding).await
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}
