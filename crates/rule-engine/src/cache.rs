//! 编译结果缓存
//!
//! 按规则集名称缓存编译结果，容量满时先淘汰优先级低的条目，
//! 同优先级内按 LRU 或 LFU 策略选择淘汰对象。空闲超过 TTL 的条目视为过期。

use crate::compiler::CompiledRuleset;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 缓存淘汰策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Lru,
    Lfu,
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            other => Err(format!("未知的缓存类型: {}", other)),
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lru => write!(f, "lru"),
            Self::Lfu => write!(f, "lfu"),
        }
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

struct CacheEntry {
    ruleset: Arc<CompiledRuleset>,
    last_access: Instant,
    /// 最近一次访问的逻辑时钟，用于 LRU
    last_tick: u64,
    /// 访问次数，用于 LFU
    frequency: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// 编译结果缓存
pub struct CompiledCache {
    policy: CacheType,
    capacity: usize,
    /// 为零表示永不过期
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: AtomicU64,
    counters: Counters,
}

impl CompiledCache {
    pub fn new(policy: CacheType, capacity: usize, ttl: Duration) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// 获取缓存条目，过期条目会被顺便移除
    pub fn get(&self, name: &str) -> Option<Arc<CompiledRuleset>> {
        let now = Instant::now();
        let tick = self.next_tick();
        let mut entries = self.entries.lock();

        let fresh = entries
            .get(name)
            .map(|entry| !self.is_expired(entry, now));

        match fresh {
            Some(true) => {
                if let Some(entry) = entries.get_mut(name) {
                    entry.last_access = now;
                    entry.last_tick = tick;
                    entry.frequency += 1;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.ruleset.clone());
                }
            }
            Some(false) => {
                entries.remove(name);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 插入或替换缓存条目
    pub fn insert(&self, ruleset: Arc<CompiledRuleset>) {
        let now = Instant::now();
        let tick = self.next_tick();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&ruleset.name) && entries.len() >= self.capacity {
            if let Some(victim) = self.select_victim(&entries) {
                entries.remove(&victim);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            ruleset.name.clone(),
            CacheEntry {
                ruleset,
                last_access: now,
                last_tick: tick,
                frequency: 1,
            },
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.lock().remove(name).is_some()
    }

    /// 清理所有过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_access) < self.ttl);
        let purged = before - entries.len();

        self.counters
            .expirations
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(entry.last_access) >= self.ttl
    }

    /// 选择淘汰对象：优先级最低者优先，再按策略比较
    fn select_victim(&self, entries: &HashMap<String, CacheEntry>) -> Option<String> {
        entries
            .iter()
            .min_by_key(|(_, entry)| {
                let usage = match self.policy {
                    CacheType::Lru => (entry.last_tick, 0),
                    CacheType::Lfu => (entry.frequency, entry.last_tick),
                };
                (entry.ruleset.priority, usage)
            })
            .map(|(name, _)| name.clone())
    }
}
