//! 内存规则集存储

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::RulesetStore;
use crate::error::{Result, RulesetError};
use crate::models::{Ruleset, RulesetDraft};

/// 内存规则集存储
///
/// 整个集合由一把读写锁保护，锁不会跨越 `.await` 持有。
#[derive(Default)]
pub struct MemoryRulesetStore {
    rulesets: RwLock<HashMap<String, Ruleset>>,
}

impl MemoryRulesetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rulesets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rulesets.read().is_empty()
    }
}

#[async_trait]
impl RulesetStore for MemoryRulesetStore {
    async fn get_all(&self) -> Result<Vec<Ruleset>> {
        Ok(self.rulesets.read().values().cloned().collect())
    }

    async fn get_by_name(&self, name: &str) -> Result<Ruleset> {
        self.rulesets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RulesetError::not_found(name))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    async fn create(&self, draft: RulesetDraft) -> Result<String> {
        let mut rulesets = self.rulesets.write();
        if rulesets.contains_key(&draft.name) {
            return Err(RulesetError::already_exists(draft.name));
        }

        let ruleset = Ruleset::from_draft(draft, Utc::now());
        let id = ruleset.id.clone();
        rulesets.insert(ruleset.name.clone(), ruleset);

        debug!(id = %id, "规则集已写入内存存储");
        Ok(id)
    }

    #[instrument(skip(self, draft))]
    async fn update(&self, name: &str, draft: RulesetDraft) -> Result<()> {
        let mut rulesets = self.rulesets.write();
        let ruleset = rulesets
            .get_mut(name)
            .ok_or_else(|| RulesetError::not_found(name))?;

        ruleset.apply(draft, Utc::now());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        self.rulesets
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RulesetError::not_found(name))
    }
}
