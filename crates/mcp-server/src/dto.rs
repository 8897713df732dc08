//! 工具调用的输入输出结构
//!
//! 每个工具对应一对类型化的输入/输出；输入在进入编排服务前完成校验。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::models::{Ruleset, RulesetDraft};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EvaluateInput {
    /// 事实集合
    pub facts: Map<String, Value>,
    #[validate(length(min = 1, max = 128))]
    pub rule_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateOutput {
    pub modified_facts: Map<String, Value>,
}

/// create 与 update 共用的输入
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RulesetInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub salience: i64,
    pub grl: String,
}

impl From<RulesetInput> for RulesetDraft {
    fn from(input: RulesetInput) -> Self {
        RulesetDraft::new(input.name, input.description, input.salience, input.grl)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NameInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutput {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessOutput {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListOutput {
    pub rulesets: Vec<Ruleset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailOutput {
    pub ruleset: Ruleset,
}
