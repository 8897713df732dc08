//! 条件评估器
//!
//! 针对事实集合中的单个字段值计算条件是否成立。

use crate::error::{Result, RuleError};
use crate::models::type_name;
use crate::operators::Operator;
use regex::Regex;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// # Arguments
    /// * `field_value` - 从事实集合中取出的字段值，字段不存在时为 `None`
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
    ) -> Result<bool> {
        match operator {
            Operator::Exists => return Ok(field_value.is_some()),
            Operator::NotExists => return Ok(field_value.is_none()),
            _ => {}
        }

        // 字段不存在时条件不成立
        let Some(field_value) = field_value else {
            return Ok(false);
        };

        match operator {
            Operator::Eq => Ok(Self::eq(field_value, expected_value)),
            Operator::Neq => Ok(!Self::eq(field_value, expected_value)),
            Operator::Gt => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::Gte => Self::compare(field_value, expected_value, |a, b| a >= b),
            Operator::Lt => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::Lte => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::Between => Self::between(field_value, expected_value),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::NotIn => Self::in_list(field_value, expected_value).map(|r| !r),
            Operator::Contains => Self::contains(field_value, expected_value),
            Operator::StartsWith => {
                let (s, prefix) = Self::string_pair(field_value, expected_value)?;
                Ok(s.starts_with(prefix))
            }
            Operator::EndsWith => {
                let (s, suffix) = Self::string_pair(field_value, expected_value)?;
                Ok(s.ends_with(suffix))
            }
            Operator::Regex => Self::regex_match(field_value, expected_value),
            Operator::Exists | Operator::NotExists => unreachable!(),
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一转为浮点数比较，避免 100 和 100.0 不相等
        if let (Value::Number(a), Value::Number(b)) = (field, expected) {
            if let (Some(f1), Some(f2)) = (a.as_f64(), b.as_f64()) {
                return (f1 - f2).abs() < f64::EPSILON;
            }
        }

        field == expected
    }

    /// 数值比较
    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::require_f64(field)?;
        let expected_num = Self::require_f64(expected)?;
        Ok(cmp(field_num, expected_num))
    }

    /// 范围比较，expected 为 [min, max]
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let bounds = match expected.as_array() {
            Some(arr) if arr.len() == 2 => arr,
            _ => {
                return Err(RuleError::TypeMismatch {
                    expected: "array [min, max]".to_string(),
                    actual: type_name(expected).to_string(),
                });
            }
        };

        let value = Self::require_f64(field)?;
        let min = Self::require_f64(&bounds[0])?;
        let max = Self::require_f64(&bounds[1])?;

        Ok(value >= min && value <= max)
    }

    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: type_name(expected).to_string(),
        })?;

        Ok(arr.iter().any(|item| Self::eq(field, item)))
    }

    /// 字符串子串或数组元素包含检查
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: type_name(expected).to_string(),
                })?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            _ => Err(RuleError::TypeMismatch {
                expected: "string or array".to_string(),
                actual: type_name(field).to_string(),
            }),
        }
    }

    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let (s, pattern) = Self::string_pair(field, expected)?;

        // 模式已在编译阶段校验过
        let regex = Regex::new(pattern).map_err(|e| {
            RuleError::ExecutionError(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;

        Ok(regex.is_match(s))
    }

    fn string_pair<'a>(field: &'a Value, expected: &'a Value) -> Result<(&'a str, &'a str)> {
        let s = field.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: type_name(field).to_string(),
        })?;
        let other = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: type_name(expected).to_string(),
        })?;
        Ok((s, other))
    }

    /// 数值字段必须是 JSON 数字，不做字符串隐式转换
    fn require_f64(value: &Value) -> Result<f64> {
        value.as_f64().ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(value).to_string(),
        })
    }
}
