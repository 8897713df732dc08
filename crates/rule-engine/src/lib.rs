//! 规则引擎
//!
//! 提供可复用的规则集编译与执行能力，支持：
//! - JSON 规则集定义、解析和校验
//! - 按优先级排序的前向链式执行，动作直接修改事实集合
//! - LRU / LFU 编译缓存与后台过期清理

pub mod cache;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod operators;

pub use cache::{CacheStats, CacheType, CompiledCache};
pub use compiler::{CompiledRule, CompiledRuleset, RuleCompiler};
pub use engine::{CachedRuleEngine, EngineConfig, RuleEngine};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::{DEFAULT_MAX_CYCLES, RuleExecutor};
pub use models::{
    Action, Condition, ExecutionReport, FactBag, LogicalGroup, RuleDefinition, RuleNode,
    RulesetDocument,
};
pub use operators::{LogicalOperator, Operator};
