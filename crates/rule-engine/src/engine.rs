//! 带缓存的规则引擎
//!
//! 注册表（DashMap）保存每个规则集的源码、优先级和版本号，编译结果放在
//! [`CompiledCache`] 中。缓存未命中或版本落后时按注册源码重新编译。

use crate::cache::{CacheStats, CacheType, CompiledCache};
use crate::compiler::{CompiledRuleset, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::executor::{DEFAULT_MAX_CYCLES, RuleExecutor};
use crate::models::{ExecutionReport, FactBag};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// 规则引擎能力
///
/// `add_rule` 与 `build_rule` 都是先编译后写入：编译失败时保留已有注册不变。
pub trait RuleEngine: Send + Sync {
    /// 注册规则集
    fn add_rule(&self, name: &str, source: &str, priority: i64) -> Result<()>;

    /// 重新构建已有规则集（不存在时等同注册）
    fn build_rule(&self, name: &str, source: &str, priority: i64) -> Result<()>;

    /// 对事实集合执行指定规则集，事实集合被原地修改
    fn execute(&self, name: &str, facts: &mut FactBag) -> Result<ExecutionReport>;
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_type: CacheType,
    pub cache_size: usize,
    /// 编译结果空闲过期时间
    pub ttl: Duration,
    /// 后台清理周期，为零时不启动清理任务
    pub cleanup_interval: Duration,
    pub max_cycles: usize,
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Lru,
            cache_size: 1000,
            ttl: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(3600),
            max_cycles: DEFAULT_MAX_CYCLES,
            trace: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    source: Arc<str>,
    priority: i64,
    version: u64,
}

/// 带编译缓存的规则引擎
pub struct CachedRuleEngine {
    compiler: RuleCompiler,
    executor: RuleExecutor,
    registry: DashMap<String, Registration>,
    cache: CompiledCache,
    versions: AtomicU64,
    cleanup_interval: Duration,
}

impl CachedRuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut executor = RuleExecutor::new().with_max_cycles(config.max_cycles);
        if config.trace {
            executor = executor.with_trace();
        }

        Self {
            compiler: RuleCompiler::new(),
            executor,
            registry: DashMap::new(),
            cache: CompiledCache::new(config.cache_type, config.cache_size, config.ttl),
            versions: AtomicU64::new(0),
            cleanup_interval: config.cleanup_interval,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// 当前注册版本号
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.registry.get(name).map(|r| r.version)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// 启动后台过期清理任务，收到关闭信号后退出
    pub fn spawn_cleanup(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.cleanup_interval.is_zero() {
            return None;
        }

        let engine = Arc::clone(self);
        let period = self.cleanup_interval;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即完成
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = engine.cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "已清理过期的编译缓存");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("编译缓存清理任务已退出");
        }))
    }

    /// 编译并写入注册表
    fn register(&self, name: &str, source: &str, priority: i64) -> Result<u64> {
        let compiled = self.prepare(name, source, priority)?;
        Ok(self.commit(name, source, priority, compiled))
    }

    /// 只编译不写入，版本号在提交时分配
    fn prepare(&self, name: &str, source: &str, priority: i64) -> Result<CompiledRuleset> {
        self.compiler.compile(name, source, 0, priority)
    }

    /// 写入注册表与缓存
    ///
    /// 版本号在持有注册表条目锁时分配，并发注册同名规则集时最后提交的一次生效。
    fn commit(&self, name: &str, source: &str, priority: i64, mut compiled: CompiledRuleset) -> u64 {
        let entry = self.registry.entry(name.to_string());
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let _slot = entry.insert(Registration {
            source: Arc::from(source),
            priority,
            version,
        });

        compiled.version = version;
        self.cache.insert(Arc::new(compiled));
        version
    }

    /// 获取当前版本的编译结果，必要时重新编译
    fn compiled(&self, name: &str) -> Result<Arc<CompiledRuleset>> {
        let registration = self
            .registry
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| RuleError::RuleNotRegistered(name.to_string()))?;

        if let Some(cached) = self.cache.get(name) {
            if cached.version >= registration.version {
                return Ok(cached);
            }
        }

        debug!(ruleset = %name, version = registration.version, "编译缓存未命中，重新编译");
        let compiled = Arc::new(self.compiler.compile(
            name,
            &registration.source,
            registration.version,
            registration.priority,
        )?);
        self.cache.insert(Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl Default for CachedRuleEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuleEngine for CachedRuleEngine {
    #[instrument(skip(self, source))]
    fn add_rule(&self, name: &str, source: &str, priority: i64) -> Result<()> {
        let version = self.register(name, source, priority)?;
        info!("规则集已注册: {} (version {})", name, version);
        Ok(())
    }

    #[instrument(skip(self, source))]
    fn build_rule(&self, name: &str, source: &str, priority: i64) -> Result<()> {
        let previous = self.version_of(name);
        let version = self.register(name, source, priority)?;
        match previous {
            Some(old) => info!("规则集已重建: {} (version {} -> {})", name, old, version),
            None => info!("规则集已注册: {} (version {})", name, version),
        }
        Ok(())
    }

    #[instrument(skip(self, facts), fields(fact_count = facts.len()))]
    fn execute(&self, name: &str, facts: &mut FactBag) -> Result<ExecutionReport> {
        let compiled = self.compiled(name)?;
        self.executor.execute(&compiled, facts)
    }
}
