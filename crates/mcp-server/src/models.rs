//! 规则集数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 持久化的规则集
///
/// `name` 是业务主键，更新、删除、查询都按名称寻址；`id` 创建后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ruleset {
    pub id: String,
    pub name: String,
    pub description: String,
    /// 优先级，数值越大越先执行
    pub salience: i64,
    /// 规则源码，对存储层不透明
    pub grl: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ruleset {
    /// 由存储层调用：分配 ID，创建时间与更新时间相同
    pub fn from_draft(draft: RulesetDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: draft.name,
            description: draft.description,
            salience: draft.salience,
            grl: draft.grl,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用可变字段，`updated_at` 不早于 `created_at`
    pub fn apply(&mut self, draft: RulesetDraft, now: DateTime<Utc>) {
        self.description = draft.description;
        self.salience = draft.salience;
        self.grl = draft.grl;
        self.updated_at = now.max(self.created_at);
    }
}

/// 规则集的可变字段
///
/// ID 与时间戳只由存储层分配，调用方无法覆盖。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct RulesetDraft {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub description: String,
    pub salience: i64,
    pub grl: String,
}

impl RulesetDraft {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        salience: i64,
        grl: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            salience,
            grl: grl.into(),
        }
    }
}
