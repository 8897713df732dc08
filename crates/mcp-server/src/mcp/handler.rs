//! MCP 请求处理
//!
//! 传输层无关：每个传输绑定把收到的原始消息交给 [`McpHandler::handle_message`]，
//! 再把返回的响应写回客户端。

use std::sync::Arc;
use std::time::Instant;

use mcp_shared::observability::metrics::record_tool_call;
use rule_engine::FactBag;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use validator::Validate;

use super::protocol::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, negotiate_version};
use super::tools::{Tool, ToolRegistry};
use crate::dto::{
    CreateOutput, DetailOutput, EvaluateInput, EvaluateOutput, ListOutput, NameInput, RulesetInput,
    SuccessOutput,
};
use crate::error::RulesetError;
use crate::service::RuleOrchestrator;

pub const SERVER_NAME: &str = "rule-mcp";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// 工具调用失败的两类原因
enum ToolFailure {
    /// 参数无法解码或未通过校验，作为 JSON-RPC 错误返回
    InvalidArguments(String),
    /// 业务错误，作为 `isError: true` 的工具结果返回
    Domain(RulesetError),
}

impl From<RulesetError> for ToolFailure {
    fn from(err: RulesetError) -> Self {
        match err {
            RulesetError::Validation(msg) => Self::InvalidArguments(msg),
            other => Self::Domain(other),
        }
    }
}

/// MCP 协议处理器
#[derive(Clone)]
pub struct McpHandler {
    orchestrator: RuleOrchestrator,
    registry: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(orchestrator: RuleOrchestrator, registry: ToolRegistry) -> Self {
        Self {
            orchestrator,
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 处理一条原始消息，通知与无法回复的消息返回 `None`
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(raw) {
            Err(e) => Some(JsonRpcResponse::failure(None, JsonRpcError::parse_error(e))),
            Ok(Value::Array(_)) => Some(JsonRpcResponse::failure(
                None,
                JsonRpcError::invalid_request("Batch requests are not supported"),
            )),
            Ok(value) => {
                let id = value.get("id").cloned();
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) => self.handle_request(request).await,
                    Err(e) => Some(JsonRpcResponse::failure(
                        id,
                        JsonRpcError::invalid_request(format!("Invalid request: {e}")),
                    )),
                }
            }
        }?;

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "响应序列化失败");
                None
            }
        }
    }

    /// 处理一个已解码的请求
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                request.id,
                JsonRpcError::invalid_request(format!("Unsupported jsonrpc version: {}", request.jsonrpc)),
            ));
        }

        if request.is_notification() {
            debug!("收到通知");
            return None;
        }

        let id = request.id.unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.descriptors() })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);

        json!({
            "protocolVersion": negotiate_version(requested),
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tools/call params: {e}")))?;

        let tool = self
            .registry
            .resolve(&params.name)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)))?;

        let arguments = params
            .arguments
            .unwrap_or_else(|| Value::Object(Map::new()));

        let start = Instant::now();
        let outcome = self.dispatch(tool, arguments).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(output) => {
                record_tool_call(tool.name(), "success", elapsed);
                Ok(json!({
                    "content": [{ "type": "text", "text": output.to_string() }],
                    "structuredContent": output,
                    "isError": false,
                }))
            }
            Err(ToolFailure::Domain(err)) => {
                record_tool_call(tool.name(), err.code(), elapsed);
                debug!(tool = %tool, error = %err, "工具调用返回业务错误");
                Ok(json!({
                    "content": [{ "type": "text", "text": err.to_string() }],
                    "isError": true,
                }))
            }
            Err(ToolFailure::InvalidArguments(msg)) => {
                record_tool_call(tool.name(), "invalid_arguments", elapsed);
                Err(JsonRpcError::invalid_params(msg))
            }
        }
    }

    async fn dispatch(&self, tool: Tool, arguments: Value) -> Result<Value, ToolFailure> {
        match tool {
            Tool::Evaluate => {
                let input: EvaluateInput = decode(arguments)?;
                let modified_facts = self
                    .orchestrator
                    .evaluate(FactBag::from(input.facts), &input.rule_name)
                    .await?;
                to_value(EvaluateOutput { modified_facts })
            }
            Tool::Create => {
                let input: RulesetInput = decode(arguments)?;
                let id = self.orchestrator.create(input.into()).await?;
                to_value(CreateOutput { id })
            }
            Tool::Update => {
                let input: RulesetInput = decode(arguments)?;
                let name = input.name.clone();
                self.orchestrator.update(&name, input.into()).await?;
                to_value(SuccessOutput { success: true })
            }
            Tool::Delete => {
                let input: NameInput = decode(arguments)?;
                self.orchestrator.delete(&input.name).await?;
                to_value(SuccessOutput { success: true })
            }
            Tool::List => {
                let rulesets = self.orchestrator.get_all().await?;
                to_value(ListOutput { rulesets })
            }
            Tool::Detail => {
                let input: NameInput = decode(arguments)?;
                let ruleset = self.orchestrator.get_by_name(&input.name).await?;
                to_value(DetailOutput { ruleset })
            }
        }
    }
}

fn decode<T>(arguments: Value) -> Result<T, ToolFailure>
where
    T: DeserializeOwned + Validate,
{
    let input: T = serde_json::from_value(arguments)
        .map_err(|e| ToolFailure::InvalidArguments(format!("Invalid arguments: {e}")))?;
    input
        .validate()
        .map_err(|e| ToolFailure::InvalidArguments(e.to_string()))?;
    Ok(input)
}

fn to_value<T: serde::Serialize>(output: T) -> Result<Value, ToolFailure> {
    serde_json::to_value(output)
        .map_err(|e| ToolFailure::Domain(RulesetError::Store(format!("输出序列化失败: {e}"))))
}
