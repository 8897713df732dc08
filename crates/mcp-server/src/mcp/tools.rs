//! 工具定义与注册表
//!
//! 六个工具名称固定不变，每个工具附带 JSON Schema 形式的输入/输出描述。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Evaluate,
    Create,
    Update,
    Delete,
    List,
    Detail,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Evaluate,
        Tool::Create,
        Tool::Update,
        Tool::Delete,
        Tool::List,
        Tool::Detail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Evaluate => "evaluate",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Detail => "detail",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Evaluate => "Evaluate a set of facts against a named ruleset and return the modified facts",
            Self::Create => "Create a new ruleset and register it with the rule engine",
            Self::Update => "Update an existing ruleset and rebuild its compiled rules",
            Self::Delete => "Delete a ruleset by name",
            Self::List => "List all rulesets",
            Self::Detail => "Get a single ruleset by name",
        }
    }

    pub fn input_schema(self) -> Value {
        let name = json!({"type": "string", "minLength": 1, "maxLength": 128});
        match self {
            Self::Evaluate => json!({
                "type": "object",
                "properties": {
                    "facts": {"type": "object", "description": "Facts the rules read and modify"},
                    "rule_name": name,
                },
                "required": ["facts", "rule_name"],
            }),
            Self::Create | Self::Update => json!({
                "type": "object",
                "properties": {
                    "name": name,
                    "description": {"type": "string"},
                    "salience": {"type": "integer"},
                    "grl": {"type": "string", "description": "Rule source"},
                },
                "required": ["name", "grl"],
            }),
            Self::Delete | Self::Detail => json!({
                "type": "object",
                "properties": {"name": name},
                "required": ["name"],
            }),
            Self::List => json!({"type": "object", "properties": {}}),
        }
    }

    pub fn output_schema(self) -> Value {
        match self {
            Self::Evaluate => json!({
                "type": "object",
                "properties": {"modified_facts": {"type": "object"}},
                "required": ["modified_facts"],
            }),
            Self::Create => json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"],
            }),
            Self::Update | Self::Delete => json!({
                "type": "object",
                "properties": {"success": {"type": "boolean"}},
                "required": ["success"],
            }),
            Self::List => json!({
                "type": "object",
                "properties": {"rulesets": {"type": "array", "items": ruleset_schema()}},
                "required": ["rulesets"],
            }),
            Self::Detail => json!({
                "type": "object",
                "properties": {"ruleset": ruleset_schema()},
                "required": ["ruleset"],
            }),
        }
    }
}

fn ruleset_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "name": {"type": "string"},
            "description": {"type": "string"},
            "salience": {"type": "integer"},
            "grl": {"type": "string"},
            "created_at": {"type": "string", "format": "date-time"},
            "updated_at": {"type": "string", "format": "date-time"},
        },
    })
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| format!("Unknown tool: {s}"))
    }
}

/// `tools/list` 返回的工具描述
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name(),
            description: tool.description(),
            input_schema: tool.input_schema(),
            output_schema: tool.output_schema(),
        }
    }
}

/// 工具注册表
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部规则集工具
    pub fn with_ruleset_tools() -> Self {
        let mut registry = Self::new();
        for tool in Tool::ALL {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn resolve(&self, name: &str) -> Option<Tool> {
        self.tools.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 以固定顺序列出已注册的工具
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<Tool> = self.tools.values().copied().collect();
        tools.sort();
        tools.into_iter().map(ToolDescriptor::from).collect()
    }
}
