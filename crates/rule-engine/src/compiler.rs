//! 规则编译器
//!
//! 将规则集源码解析、校验并编译成按优先级排好序的内存执行结构。

use crate::error::{Result, RuleError};
use crate::models::{Action, Condition, RuleDefinition, RuleNode, RulesetDocument};
use crate::operators::Operator;
use serde_json::Value;
use std::collections::HashSet;

/// 编译后的单条规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub definition: RuleDefinition,
    /// 条件中使用的所有字段路径
    pub required_fields: HashSet<String>,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn salience(&self) -> i64 {
        self.definition.salience
    }

    pub fn root(&self) -> &RuleNode {
        &self.definition.when
    }

    pub fn actions(&self) -> &[Action] {
        &self.definition.then
    }
}

/// 编译后的规则集
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    pub name: String,
    /// 按 salience 降序排列，同优先级保持源码顺序
    pub rules: Vec<CompiledRule>,
    pub required_fields: HashSet<String>,
    /// 注册版本号（用于缓存失效）
    pub version: u64,
    /// 缓存淘汰优先级
    pub priority: i64,
}

impl CompiledRuleset {
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// 规则编译器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCompiler;

impl RuleCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 只做解析和校验，不产出编译结果
    pub fn check(&self, source: &str) -> Result<()> {
        let document = self.parse(source)?;
        self.validate_document(&document)
    }

    /// 编译规则集
    pub fn compile(
        &self,
        name: &str,
        source: &str,
        version: u64,
        priority: i64,
    ) -> Result<CompiledRuleset> {
        if name.trim().is_empty() {
            return Err(RuleError::CompileError("规则集名称不能为空".to_string()));
        }

        let document = self.parse(source)?;
        self.validate_document(&document)?;

        let mut rules: Vec<CompiledRule> = document
            .rules
            .into_iter()
            .map(|definition| {
                let required_fields = self.extract_fields(&definition.when);
                CompiledRule {
                    definition,
                    required_fields,
                }
            })
            .collect();

        // sort_by 是稳定排序，同优先级规则保持源码顺序
        rules.sort_by(|a, b| b.salience().cmp(&a.salience()));

        let required_fields = rules
            .iter()
            .flat_map(|rule| rule.required_fields.iter().cloned())
            .collect();

        Ok(CompiledRuleset {
            name: name.to_string(),
            rules,
            required_fields,
            version,
            priority,
        })
    }

    fn parse(&self, source: &str) -> Result<RulesetDocument> {
        if source.trim().is_empty() {
            return Err(RuleError::ParseError("规则源码不能为空".to_string()));
        }
        serde_json::from_str(source).map_err(|e| RuleError::ParseError(e.to_string()))
    }

    fn validate_document(&self, document: &RulesetDocument) -> Result<()> {
        if document.rules.is_empty() {
            return Err(RuleError::CompileError("规则集至少需要一条规则".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &document.rules {
            self.validate_rule(rule)?;
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::CompileError(format!(
                    "规则名称重复: '{}'",
                    rule.name
                )));
            }
        }

        Ok(())
    }

    /// 验证单条规则
    fn validate_rule(&self, rule: &RuleDefinition) -> Result<()> {
        if rule.name.trim().is_empty() {
            return Err(RuleError::CompileError("规则名称不能为空".to_string()));
        }

        self.validate_node(&rule.when, &format!("{}.when", rule.name))?;

        if rule.then.is_empty() {
            return Err(RuleError::CompileError(format!(
                "规则 '{}' 至少需要一个动作",
                rule.name
            )));
        }

        for (i, action) in rule.then.iter().enumerate() {
            for field in action.fields() {
                if !is_valid_path(field) {
                    return Err(RuleError::CompileError(format!(
                        "规则 '{}' 的动作 then[{}] 字段路径无效: '{}'",
                        rule.name, i, field
                    )));
                }
            }
        }

        Ok(())
    }

    /// 验证规则节点
    fn validate_node(&self, node: &RuleNode, path: &str) -> Result<()> {
        match node {
            RuleNode::Condition(cond) => self.validate_condition(cond, path),
            RuleNode::Group(group) => {
                if group.children.is_empty() {
                    return Err(RuleError::CompileError(format!(
                        "逻辑组 '{}' 不能为空",
                        path
                    )));
                }

                for (i, child) in group.children.iter().enumerate() {
                    self.validate_node(child, &format!("{}.children[{}]", path, i))?;
                }
                Ok(())
            }
        }
    }

    /// 验证条件及操作符与值的兼容性
    fn validate_condition(&self, cond: &Condition, path: &str) -> Result<()> {
        if !is_valid_path(&cond.field) {
            return Err(RuleError::CompileError(format!(
                "条件 '{}' 的字段无效: '{}'",
                path, cond.field
            )));
        }

        // eq/neq 允许与 null 比较
        let null_allowed = matches!(cond.operator, Operator::Eq | Operator::Neq);
        if cond.operator.requires_value() && !null_allowed && cond.value.is_null() {
            return Err(RuleError::CompileError(format!(
                "条件 '{}' 的 {} 操作符需要期望值",
                path, cond.operator
            )));
        }

        match cond.operator {
            Operator::Between => match &cond.value {
                Value::Array(arr) if arr.len() == 2 => {}
                Value::Array(arr) => {
                    return Err(RuleError::CompileError(format!(
                        "条件 '{}' 的 between 操作符需要 [min, max] 数组，当前有 {} 个元素",
                        path,
                        arr.len()
                    )));
                }
                _ => {
                    return Err(RuleError::CompileError(format!(
                        "条件 '{}' 的 between 操作符需要 [min, max] 数组",
                        path
                    )));
                }
            },
            Operator::In | Operator::NotIn => {
                if !cond.value.is_array() {
                    return Err(RuleError::CompileError(format!(
                        "条件 '{}' 的 {} 操作符需要数组值",
                        path, cond.operator
                    )));
                }
            }
            Operator::Regex => {
                let pattern = cond.value.as_str().ok_or_else(|| {
                    RuleError::CompileError(format!(
                        "条件 '{}' 的 regex 操作符需要字符串值",
                        path
                    ))
                })?;
                regex::Regex::new(pattern).map_err(|e| {
                    RuleError::CompileError(format!("条件 '{}' 的正则表达式无效: {}", path, e))
                })?;
            }
            _ => {}
        }

        Ok(())
    }

    fn extract_fields(&self, node: &RuleNode) -> HashSet<String> {
        let mut fields = HashSet::new();
        collect_fields(node, &mut fields);
        fields
    }
}

fn collect_fields(node: &RuleNode, fields: &mut HashSet<String>) {
    match node {
        RuleNode::Condition(cond) => {
            fields.insert(cond.field.clone());
        }
        RuleNode::Group(group) => {
            for child in &group.children {
                collect_fields(child, fields);
            }
        }
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(|segment| !segment.trim().is_empty())
}
