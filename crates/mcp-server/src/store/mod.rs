//! 规则集存储层
//!
//! 按名称寻址的规则集 CRUD，所有操作相互之间线性一致。
//!
//! - `MemoryRulesetStore`：进程内存储，默认后端
//! - `PostgresRulesetStore`：PostgreSQL 持久化存储

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Ruleset, RulesetDraft};

pub use memory::MemoryRulesetStore;
pub use postgres::PostgresRulesetStore;

/// 规则集存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RulesetStore: Send + Sync {
    /// 获取全部规则集快照，顺序不保证
    async fn get_all(&self) -> Result<Vec<Ruleset>>;

    async fn get_by_name(&self, name: &str) -> Result<Ruleset>;

    /// 创建规则集，返回新分配的 ID
    async fn create(&self, draft: RulesetDraft) -> Result<String>;

    /// 替换描述、优先级与规则源码，ID 与创建时间保持不变
    async fn update(&self, name: &str, draft: RulesetDraft) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}
