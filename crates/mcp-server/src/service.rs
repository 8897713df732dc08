//! 规则集编排服务
//!
//! 协调规则集存储与规则引擎：存储是唯一的事实来源，引擎的编译缓存以
//! 写穿方式跟随存储变化。两步写入不是事务：存储写入成功后引擎注册失败
//! 只记录日志与指标，调用仍然返回成功，直到下一次成功的更新之前会存在
//! 一个"已持久化但未编译"的窗口。

use std::sync::Arc;
use std::time::Instant;

use mcp_shared::observability::metrics::{record_registration_failure, record_rule_evaluation};
use rule_engine::{FactBag, RuleEngine, RuleError};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};
use validator::Validate;

use crate::error::{Result, RulesetError};
use crate::models::{Ruleset, RulesetDraft};
use crate::store::RulesetStore;

/// 注册到引擎时使用的优先级，与规则集的 salience 无关
pub const ENGINE_PRIORITY: i64 = 0;

/// 规则集编排服务
///
/// 自身不持有锁；对存储与引擎的调用按顺序进行，从不嵌套。
#[derive(Clone)]
pub struct RuleOrchestrator {
    store: Arc<dyn RulesetStore>,
    engine: Arc<dyn RuleEngine>,
}

impl RuleOrchestrator {
    pub fn new(store: Arc<dyn RulesetStore>, engine: Arc<dyn RuleEngine>) -> Self {
        Self { store, engine }
    }

    /// 对事实集合执行指定规则集
    ///
    /// 规则集必须存在于存储中，否则直接返回 `NotFound`，不会调用引擎。
    /// 规则执行是 CPU 密集的同步调用，放在阻塞线程池中进行。
    #[instrument(skip(self, facts), fields(fact_count = facts.len()))]
    pub async fn evaluate(&self, facts: FactBag, rule_name: &str) -> Result<Map<String, Value>> {
        let start = Instant::now();
        self.store.get_by_name(rule_name).await?;

        let engine = Arc::clone(&self.engine);
        let name = rule_name.to_string();
        let (facts, outcome) = tokio::task::spawn_blocking(move || {
            let mut facts = facts;
            let outcome = engine.execute(&name, &mut facts);
            (facts, outcome)
        })
        .await
        .unwrap_or_else(|e| (FactBag::new(), Err(RuleError::ExecutionError(e.to_string()))));
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(report) => {
                record_rule_evaluation("success", elapsed);
                debug!(
                    fired = report.fired_rules.len(),
                    cycles = report.cycles,
                    trace = ?report.evaluation_trace,
                    "规则集执行完成"
                );
                Ok(facts.into_inner())
            }
            Err(source) => {
                record_rule_evaluation("error", elapsed);
                Err(RulesetError::Evaluation {
                    name: rule_name.to_string(),
                    source,
                })
            }
        }
    }

    /// 创建规则集，存储写入成功后再注册到引擎
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create(&self, draft: RulesetDraft) -> Result<String> {
        draft.validate()?;

        let name = draft.name.clone();
        let grl = draft.grl.clone();
        let id = self.store.create(draft).await?;

        if let Err(e) = self.engine.add_rule(&name, &grl, ENGINE_PRIORITY) {
            error!(error = %e, "规则集已保存，但注册到引擎失败");
            record_registration_failure("create");
        }

        info!(id = %id, "规则集已创建");
        Ok(id)
    }

    /// 更新规则集，存储写入成功后重建引擎中的编译结果
    #[instrument(skip(self, changes))]
    pub async fn update(&self, name: &str, changes: RulesetDraft) -> Result<()> {
        changes.validate()?;

        let mut current = self.store.get_by_name(name).await?;
        current.description = changes.description;
        current.salience = changes.salience;
        current.grl = changes.grl;

        let grl = current.grl.clone();
        let draft = RulesetDraft::new(current.name, current.description, current.salience, current.grl);
        self.store.update(name, draft).await?;

        if let Err(e) = self.engine.build_rule(name, &grl, ENGINE_PRIORITY) {
            error!(error = %e, "规则集已更新，但重建引擎编译结果失败");
            record_registration_failure("update");
        }

        info!("规则集已更新");
        Ok(())
    }

    /// 删除规则集
    ///
    /// 引擎中已编译的结果不会被清除；之后对同名规则集的执行会先在存储中
    /// 查找失败，重新创建时会覆盖旧的编译结果。
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(name).await?;
        info!("规则集已删除");
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<Ruleset>> {
        self.store.get_all().await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Ruleset> {
        self.store.get_by_name(name).await
    }

    /// 启动时把存储中的全部规则集注册到引擎，返回注册成功的数量
    ///
    /// 单个规则集编译失败不影响其它规则集，也不阻止启动。
    #[instrument(skip(self))]
    pub async fn register_all(&self) -> Result<usize> {
        let rulesets = self.store.get_all().await?;
        let total = rulesets.len();
        let mut registered = 0;

        for ruleset in rulesets {
            match self.engine.add_rule(&ruleset.name, &ruleset.grl, ENGINE_PRIORITY) {
                Ok(()) => registered += 1,
                Err(e) => {
                    error!(name = %ruleset.name, error = %e, "启动时注册规则集失败");
                    record_registration_failure("startup");
                }
            }
        }

        info!(total, registered, "存储中的规则集已注册到引擎");
        Ok(registered)
    }
}
