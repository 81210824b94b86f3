//! JSON-RPC 2.0 dispatcher
//!
//! Parses a request or batch, dispatches `initialize`, `tools/list`,
//! `tools/call`, `resources/read`, and `resources/templates/list` by
//! fixed semantics, and delegates any other method name to a
//! registered tool handler. Input and output are UTF-8 byte strings;
//! a pure notification (no `id`) produces no output.

#![allow(dead_code)]

use crate::handler::HandlerRegistry;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, InitializeParams, InitializeResponse, Implementation,
    JsonRpcError, JsonRpcInbound, JsonRpcRequest, JsonRpcResponse, ListResourceTemplatesResponse,
    ListToolsResponse, ReadResourceParams, ReadResourceResponse,
    ServerCapabilities, ERROR_INVALID_PARAMS, ERROR_INVALID_REQUEST, ERROR_PARSE_ERROR,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_RESOURCES_READ,
    METHOD_RESOURCES_TEMPLATES_LIST, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::RuntimeError;

/// Dispatch one already-parsed request, returning `None` for
/// notifications (no `id`) and `Some(response)` otherwise.
pub async fn dispatch_request(
    handlers: &HandlerRegistry,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let id = request.id.clone();
    let is_notification = id.is_none();

    let result = route_method(handlers, &request).await;

    if is_notification {
        if let Err(e) = result {
            tracing::debug!(method = %request.method, error = %e, "notification handling failed");
        }
        return None;
    }

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::failure(id, to_jsonrpc_error(&e)),
    })
}

/// Parse and dispatch a raw JSON-RPC message (single object or batch
/// array). Returns the UTF-8 response bytes, or `None` if every
/// message in the input was a notification.
pub async fn dispatch_bytes(handlers: &HandlerRegistry, raw: &[u8]) -> Option<Vec<u8>> {
    let inbound: JsonRpcInbound = match serde_json::from_slice(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            let error = JsonRpcResponse::failure(
                None,
                JsonRpcError {
                    code: ERROR_PARSE_ERROR,
                    message: format!("parse error: {e}"),
                    data: None,
                },
            );
            return Some(serde_json::to_vec(&error).expect("response always serializes"));
        }
    };

    match inbound {
        JsonRpcInbound::Single(request) => {
            let response = dispatch_request(handlers, request).await?;
            Some(serde_json::to_vec(&response).expect("response always serializes"))
        }
        JsonRpcInbound::Batch(requests) => {
            if requests.is_empty() {
                let error = JsonRpcResponse::failure(
                    None,
                    JsonRpcError {
                        code: ERROR_INVALID_REQUEST,
                        message: "batch must not be empty".to_string(),
                        data: None,
                    },
                );
                return Some(serde_json::to_vec(&error).expect("response always serializes"));
            }
            let mut responses = Vec::new();
            for request in requests {
                if let Some(response) = dispatch_request(handlers, request).await {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                None
            } else {
                Some(serde_json::to_vec(&responses).expect("responses always serialize"))
            }
        }
    }
}

async fn route_method(
    handlers: &HandlerRegistry,
    request: &JsonRpcRequest,
) -> Result<serde_json::Value, RuntimeError> {
    match request.method.as_str() {
        METHOD_INITIALIZE => handle_initialize(request),
        METHOD_TOOLS_LIST => handle_tools_list(handlers),
        METHOD_TOOLS_CALL => handle_tools_call(handlers, request).await,
        METHOD_RESOURCES_READ => handle_resources_read(handlers, request).await,
        METHOD_RESOURCES_TEMPLATES_LIST => handle_resource_templates_list(handlers),
        other => handle_user_method(handlers, other, request).await,
    }
}

fn handle_initialize(request: &JsonRpcRequest) -> Result<serde_json::Value, RuntimeError> {
    let params: InitializeParams = parse_params(request)?;
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
        return Err(RuntimeError::ProtocolVersion(params.protocol_version));
    }

    let response = InitializeResponse {
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            experimental: None,
            resources: Some(serde_json::json!({})),
            tools: Some(serde_json::json!({})),
        },
        server_info: Implementation {
            name: "mcprt".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
        },
        instructions: None,
    };
    Ok(serde_json::to_value(response)?)
}

fn handle_tools_list(handlers: &HandlerRegistry) -> Result<serde_json::Value, RuntimeError> {
    let response = ListToolsResponse {
        tools: handlers.list_tools(),
        next_cursor: None,
    };
    Ok(serde_json::to_value(response)?)
}

async fn handle_tools_call(
    handlers: &HandlerRegistry,
    request: &JsonRpcRequest,
) -> Result<serde_json::Value, RuntimeError> {
    let params: CallToolParams = parse_params(request)?;
    let result: CallToolResponse = handlers.call_tool(&params.name, params.arguments).await?;
    Ok(serde_json::to_value(result)?)
}

async fn handle_resources_read(
    handlers: &HandlerRegistry,
    request: &JsonRpcRequest,
) -> Result<serde_json::Value, RuntimeError> {
    let params: ReadResourceParams = parse_params(request)?;
    let contents = handlers.read_resource(&params.uri).await.map_err(|e| {
        // TemplateMismatch from the router is internal; externally a
        // dispatch failure on a resource URI is always ResourceNotFound.
        match e {
            RuntimeError::TemplateMismatch(_) => RuntimeError::ResourceNotFound(params.uri.clone()),
            other => other,
        }
    })?;
    Ok(serde_json::to_value(ReadResourceResponse { contents })?)
}

fn handle_resource_templates_list(
    handlers: &HandlerRegistry,
) -> Result<serde_json::Value, RuntimeError> {
    let response = ListResourceTemplatesResponse {
        resource_templates: handlers.list_resource_templates(),
        next_cursor: None,
    };
    Ok(serde_json::to_value(response)?)
}

async fn handle_user_method(
    handlers: &HandlerRegistry,
    method: &str,
    request: &JsonRpcRequest,
) -> Result<serde_json::Value, RuntimeError> {
    let result = handlers
        .call_tool(method, request.params.clone())
        .await
        .map_err(|e| match e {
            RuntimeError::ToolNotFound(_) => RuntimeError::NoRouteMatched(method.to_string()),
            other => other,
        })?;
    Ok(serde_json::to_value(result)?)
}

fn parse_params<T: serde::de::DeserializeOwned>(
    request: &JsonRpcRequest,
) -> Result<T, RuntimeError> {
    let value = request.params.clone().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| RuntimeError::InvalidParams {
        method: request.method.clone(),
        message: e.to_string(),
    })
}

fn to_jsonrpc_error(error: &RuntimeError) -> JsonRpcError {
    JsonRpcError {
        code: error.rpc_code(),
        message: error.to_string(),
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{ERROR_METHOD_NOT_FOUND, METHOD_PING};

    fn request(id: Option<serde_json::Value>, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_returns_protocol_version_and_capabilities() {
        let handlers = HandlerRegistry::new();
        let req = request(
            Some(serde_json::json!(1)),
            METHOD_INITIALIZE,
            Some(serde_json::json!({
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.0.1" }
            })),
        );
        let response = dispatch_request(&handlers, req).await.unwrap();
        assert!(response.error.is_none());
        assert_eq!(
            response.result.unwrap()["protocolVersion"],
            LATEST_PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn unknown_method_on_empty_registry_reports_method_not_found() {
        let handlers = HandlerRegistry::new();
        let req = request(Some(serde_json::json!(2)), METHOD_PING, None);
        let response = dispatch_request(&handlers, req).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, ERROR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let handlers = HandlerRegistry::new();
        let req = request(None, METHOD_PING, None);
        assert!(dispatch_request(&handlers, req).await.is_none());
    }

    #[tokio::test]
    async fn tools_call_with_missing_params_is_invalid_params() {
        let handlers = HandlerRegistry::new();
        let req = request(Some(serde_json::json!(3)), METHOD_TOOLS_CALL, None);
        let response = dispatch_request(&handlers, req).await.unwrap();
        assert_eq!(response.error.unwrap().code, ERROR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn batch_response_omits_notifications_and_preserves_order() {
        let handlers = HandlerRegistry::new();
        let batch = serde_json::to_vec(&serde_json::json!([
            { "jsonrpc": "2.0", "id": 1, "method": "tools/list" },
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "id": 2, "method": "tools/list" },
        ]))
        .unwrap();

        let raw = dispatch_bytes(&handlers, &batch).await.unwrap();
        let responses: Vec<JsonRpcResponse> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, Some(serde_json::json!(1)));
        assert_eq!(responses[1].id, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn malformed_json_yields_parse_error() {
        let handlers = HandlerRegistry::new();
        let raw = dispatch_bytes(&handlers, b"{not json").await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&raw).unwrap();
        assert_eq!(response.error.unwrap().code, ERROR_PARSE_ERROR);
    }
}
