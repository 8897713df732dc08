//! 规则执行器
//!
//! 前向链式执行：每个周期选出优先级最高、尚未触发且条件成立的规则，
//! 执行它的动作并修改事实集合，直到没有规则可以触发。
//! 每条规则在一次执行中最多触发一次。

use crate::compiler::{CompiledRule, CompiledRuleset};
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{Action, Condition, ExecutionReport, FactBag, LogicalGroup, RuleNode};
use crate::operators::LogicalOperator;
use std::time::Instant;
use tracing::debug;

/// 默认最大执行周期
pub const DEFAULT_MAX_CYCLES: usize = 5000;

/// 规则执行器
#[derive(Debug, Clone)]
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
    max_cycles: usize,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// 对事实集合执行规则集
    pub fn execute(&self, ruleset: &CompiledRuleset, facts: &mut FactBag) -> Result<ExecutionReport> {
        let start = Instant::now();
        let mut report = ExecutionReport::new(ruleset.name.clone(), ruleset.version);
        let mut fired = vec![false; ruleset.rules.len()];

        loop {
            let mut selected = None;
            for (idx, rule) in ruleset.rules.iter().enumerate() {
                if fired[idx] {
                    continue;
                }
                let path = format!("{}.when", rule.name());
                if self.evaluate_node(rule.root(), facts, &mut report, &path)? {
                    selected = Some(idx);
                    break;
                }
            }

            let Some(idx) = selected else {
                break;
            };

            if report.cycles >= self.max_cycles {
                return Err(RuleError::MaxCyclesExceeded {
                    ruleset: ruleset.name.clone(),
                    max_cycles: self.max_cycles,
                });
            }

            let rule = &ruleset.rules[idx];
            self.fire(rule, facts, &mut report)?;
            fired[idx] = true;
            report.cycles += 1;
            report.fired_rules.push(rule.name().to_string());
        }

        report.evaluation_time_ms = start.elapsed().as_millis() as i64;

        debug!(
            ruleset = %ruleset.name,
            fired = report.fired_rules.len(),
            cycles = report.cycles,
            "规则集执行完成"
        );

        Ok(report)
    }

    /// 执行规则动作
    fn fire(&self, rule: &CompiledRule, facts: &mut FactBag, report: &mut ExecutionReport) -> Result<()> {
        for action in rule.actions() {
            match action {
                Action::Set { field, value } => {
                    facts.set_path(field, value.clone())?;
                }
                Action::Copy { from, to } => {
                    let value = facts.get_path(from).cloned().ok_or_else(|| {
                        RuleError::ExecutionError(format!(
                            "规则 '{}' 复制的字段不存在: '{}'",
                            rule.name(),
                            from
                        ))
                    })?;
                    facts.set_path(to, value)?;
                }
                Action::Remove { field } => {
                    facts.remove_path(field);
                }
            }
        }

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{}: 触发 (salience {}, {} 个动作)",
                rule.name(),
                rule.salience(),
                rule.actions().len()
            ));
        }

        Ok(())
    }

    fn evaluate_node(
        &self,
        node: &RuleNode,
        facts: &FactBag,
        report: &mut ExecutionReport,
        path: &str,
    ) -> Result<bool> {
        match node {
            RuleNode::Condition(cond) => self.evaluate_condition(cond, facts, report, path),
            RuleNode::Group(group) => self.evaluate_group(group, facts, report, path),
        }
    }

    fn evaluate_condition(
        &self,
        cond: &Condition,
        facts: &FactBag,
        report: &mut ExecutionReport,
        path: &str,
    ) -> Result<bool> {
        let field_value = facts.get_path(&cond.field);
        let matched = ConditionEvaluator::evaluate(field_value, cond.operator, &cond.value)?;

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{}: {} {} {} => {}",
                path,
                cond.field,
                cond.operator,
                cond.value,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        Ok(matched)
    }

    /// 评估逻辑组节点（短路求值）
    fn evaluate_group(
        &self,
        group: &LogicalGroup,
        facts: &FactBag,
        report: &mut ExecutionReport,
        path: &str,
    ) -> Result<bool> {
        // AND 遇到 false 立即返回，OR 遇到 true 立即返回
        let short_circuit_on = group.operator == LogicalOperator::Or;

        for (i, child) in group.children.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            let child_matched = self.evaluate_node(child, facts, report, &child_path)?;

            if child_matched == short_circuit_on {
                if self.trace_enabled {
                    report
                        .evaluation_trace
                        .push(format!("{}: {} 短路于子节点 {}", path, group.operator, i));
                }
                return Ok(short_circuit_on);
            }
        }

        Ok(!short_circuit_on)
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use serde_json::{Value, json};

    fn facts(value: Value) -> FactBag {
        match value {
            Value::Object(map) => FactBag::from(map),
            _ => panic!("facts must be an object"),
        }
    }

    fn compile(source: &str) -> CompiledRuleset {
        RuleCompiler::new().compile("test", source, 1, 0).unwrap()
    }

    const DISCOUNT: &str = r#"
    {
        "rules": [
            {
                "name": "apply_discount",
                "salience": 10,
                "when": { "type": "condition", "field": "amount", "operator": "gt", "value": 100 },
                "then": [{ "action": "set", "field": "applied", "value": true }]
            }
        ]
    }
    "#;

    #[test]
    fn test_rule_fires_and_mutates_facts() {
        let ruleset = compile(DISCOUNT);
        let mut bag = facts(json!({ "amount": 150 }));

        let report = RuleExecutor::new().execute(&ruleset, &mut bag).unwrap();

        assert_eq!(report.fired_rules, vec!["apply_discount"]);
        assert_eq!(report.cycles, 1);
        assert_eq!(bag.get("applied"), Some(&json!(true)));
        assert_eq!(bag.get("amount"), Some(&json!(150)));
    }

    #[test]
    fn test_rule_does_not_fire() {
        let ruleset = compile(DISCOUNT);
        let mut bag = facts(json!({ "amount": 50 }));

        let report = RuleExecutor::new().execute(&ruleset, &mut bag).unwrap();

        assert!(report.fired_rules.is_empty());
        assert_eq!(bag, facts(json!({ "amount": 50 })));
    }

    #[test]
    fn test_forward_chaining_across_rules() {
        // 低优先级规则依赖高优先级规则写入的事实
        let ruleset = compile(
            r#"
            {
                "rules": [
                    {
                        "name": "gold_discount",
                        "salience": 1,
                        "when": { "type": "condition", "field": "tier", "operator": "eq", "value": "gold" },
                        "then": [{ "action": "set", "field": "discount.rate", "value": 0.2 }]
                    },
                    {
                        "name": "mark_gold",
                        "salience": 5,
                        "when": { "type": "condition", "field": "spent", "operator": "gte", "value": 1000 },
                        "then": [{ "action": "set", "field": "tier", "value": "gold" }]
                    }
                ]
            }
            "#,
        );
        let mut bag = facts(json!({ "spent": 1200 }));

        let report = RuleExecutor::new().execute(&ruleset, &mut bag).unwrap();

        assert_eq!(report.fired_rules, vec!["mark_gold", "gold_discount"]);
        assert_eq!(bag.get_path("discount.rate"), Some(&json!(0.2)));
    }

    #[test]
    fn test_rule_fires_at_most_once() {
        let ruleset = compile(
            r#"
            {
                "rules": [{
                    "name": "counter",
                    "when": { "type": "condition", "field": "n", "operator": "exists" },
                    "then": [{ "action": "set", "field": "n", "value": 2 }]
                }]
            }
            "#,
        );
        let mut bag = facts(json!({ "n": 1 }));

        let report = RuleExecutor::new().execute(&ruleset, &mut bag).unwrap();
        assert_eq!(report.cycles, 1);
    }

    #[test]
    fn test_copy_and_remove_actions() {
        let ruleset = compile(
            r#"
            {
                "rules": [{
                    "name": "move",
                    "when": { "type": "condition", "field": "draft.total", "operator": "exists" },
                    "then": [
                        { "action": "copy", "from": "draft.total", "to": "order.total" },
                        { "action": "remove", "field": "draft" }
                    ]
                }]
            }
            "#,
        );
        let mut bag = facts(json!({ "draft": { "total": 88 } }));

        RuleExecutor::new().execute(&ruleset, &mut bag).unwrap();

        assert_eq!(bag.get_path("order.total"), Some(&json!(88)));
        assert!(!bag.has("draft"));
    }

    #[test]
    fn test_type_mismatch_is_execution_error() {
        let ruleset = compile(DISCOUNT);
        let mut bag = facts(json!({ "amount": "lots" }));

        let err = RuleExecutor::new().execute(&ruleset, &mut bag).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_max_cycles_exceeded() {
        let ruleset = compile(
            r#"
            {
                "rules": [
                    { "name": "a", "when": { "type": "condition", "field": "x", "operator": "exists" },
                      "then": [{ "action": "set", "field": "a", "value": 1 }] },
                    { "name": "b", "when": { "type": "condition", "field": "x", "operator": "exists" },
                      "then": [{ "action": "set", "field": "b", "value": 1 }] }
                ]
            }
            "#,
        );
        let mut bag = facts(json!({ "x": 1 }));

        let err = RuleExecutor::new()
            .with_max_cycles(1)
            .execute(&ruleset, &mut bag)
            .unwrap_err();
        assert!(matches!(err, RuleError::MaxCyclesExceeded { max_cycles: 1, .. }));
    }

    #[test]
    fn test_group_short_circuit_trace() {
        let ruleset = compile(
            r#"
            {
                "rules": [{
                    "name": "vip_or_big",
                    "when": {
                        "type": "group",
                        "operator": "OR",
                        "children": [
                            { "type": "condition", "field": "user.is_vip", "operator": "eq", "value": true },
                            { "type": "condition", "field": "amount", "operator": "gt", "value": 1000 }
                        ]
                    },
                    "then": [{ "action": "set", "field": "eligible", "value": true }]
                }]
            }
            "#,
        );
        let mut bag = facts(json!({ "user": { "is_vip": true }, "amount": 10 }));

        let report = RuleExecutor::new()
            .with_trace()
            .execute(&ruleset, &mut bag)
            .unwrap();

        assert_eq!(bag.get("eligible"), Some(&json!(true)));
        assert!(report.evaluation_trace.iter().any(|t| t.contains("短路")));
        // 第二个条件未被评估
        assert!(!report.evaluation_trace.iter().any(|t| t.contains("children[1]")));
    }

    #[test]
    fn test_and_group_requires_all() {
        let ruleset = compile(
            r#"
            {
                "rules": [{
                    "name": "both",
                    "when": {
                        "type": "group",
                        "operator": "AND",
                        "children": [
                            { "type": "condition", "field": "a", "operator": "eq", "value": 1 },
                            { "type": "condition", "field": "b", "operator": "eq", "value": 2 }
                        ]
                    },
                    "then": [{ "action": "set", "field": "ok", "value": true }]
                }]
            }
            "#,
        );

        let mut partial = facts(json!({ "a": 1, "b": 3 }));
        RuleExecutor::new().execute(&ruleset, &mut partial).unwrap();
        assert!(!partial.has("ok"));

        let mut full = facts(json!({ "a": 1, "b": 2 }));
        RuleExecutor::new().execute(&ruleset, &mut full).unwrap();
        assert!(full.has("ok"));
    }
}
