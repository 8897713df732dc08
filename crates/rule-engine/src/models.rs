//! 规则引擎领域模型
//!
//! 规则源码是一个 JSON 文档：每条规则由 `when` 条件树和 `then` 动作列表组成，
//! 执行时直接读写调用方传入的 [`FactBag`]。

use crate::error::{Result, RuleError};
use crate::operators::{LogicalOperator, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 规则集源码文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetDocument {
    pub rules: Vec<RuleDefinition>,
}

/// 单条规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 优先级，数值越大越先执行
    #[serde(default)]
    pub salience: i64,
    pub when: RuleNode,
    pub then: Vec<Action>,
}

/// 规则节点（条件或逻辑组）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    Condition(Condition),
    Group(LogicalGroup),
}

/// 条件节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub children: Vec<RuleNode>,
}

impl LogicalGroup {
    pub fn new(operator: LogicalOperator, children: Vec<RuleNode>) -> Self {
        Self { operator, children }
    }

    pub fn and(children: Vec<RuleNode>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }
}

/// 规则命中后执行的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// 写入字段（支持点号路径，缺失的中间对象会被创建）
    Set { field: String, value: Value },
    /// 将一个字段的当前值复制到另一个字段
    Copy { from: String, to: String },
    /// 删除字段
    Remove { field: String },
}

impl Action {
    /// 动作涉及的所有字段路径
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Set { field, .. } | Self::Remove { field } => vec![field.as_str()],
            Self::Copy { from, to } => vec![from.as_str(), to.as_str()],
        }
    }
}

/// 事实集合
///
/// 单次评估期间由引擎原地修改的键值容器，值可以是任意 JSON 类型。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactBag {
    facts: Map<String, Value>,
}

impl FactBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.facts.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.facts.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.facts.remove(key)
    }

    /// 获取字段值（支持点号分隔的路径，如 "order.amount" 或 "items.0.price"）
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.facts.get(segments.next()?)?;

        for part in segments {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    /// 按路径写入字段
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RuleError::ExecutionError(format!("无效的字段路径: '{}'", path)));
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| RuleError::ExecutionError("字段路径不能为空".to_string()))?;

        let mut current = &mut self.facts;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                other => {
                    return Err(RuleError::TypeMismatch {
                        expected: format!("object at '{}'", segment),
                        actual: type_name(other).to_string(),
                    });
                }
            };
        }

        current.insert(last.to_string(), value);
        Ok(())
    }

    /// 按路径删除字段，返回被删除的值
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.facts;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.facts.keys()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.facts
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.facts
    }
}

impl From<Map<String, Value>> for FactBag {
    fn from(facts: Map<String, Value>) -> Self {
        Self { facts }
    }
}

/// 执行报告
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub ruleset: String,
    pub version: u64,
    /// 按触发顺序记录的规则名称
    pub fired_rules: Vec<String>,
    pub cycles: usize,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_ms: i64,
}

impl ExecutionReport {
    pub fn new(ruleset: String, version: u64) -> Self {
        Self {
            ruleset,
            version,
            fired_rules: Vec::new(),
            cycles: 0,
            evaluation_trace: Vec::new(),
            evaluation_time_ms: 0,
        }
    }
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
