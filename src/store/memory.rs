use crate::error::StoreError;
use crate::models::RetrievalRule;
use crate::store::{check_batch, RuleStore};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Rule store kept in process memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<BTreeMap<String, RetrievalRule>>,
    batches: Mutex<Vec<usize>>,
}

impl MemoryRuleStore {
    pub fn with_rules(rules: impl IntoIterator<Item = RetrievalRule>) -> Self {
        Self {
            rules: Mutex::new(
                rules
                    .into_iter()
                    .map(|rule| (rule.name.clone(), rule))
                    .collect(),
            ),
            batches: Mutex::default(),
        }
    }

    pub async fn get(&self, name: &str) -> Option<RetrievalRule> {
        self.rules.lock().await.get(name).cloned()
    }

    /// Sizes of every batch written so far.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_rules(&self) -> Result<Vec<RetrievalRule>> {
        Ok(self.rules.lock().await.values().cloned().collect())
    }

    async fn put_rule(&self, rule: &RetrievalRule) -> Result<()> {
        self.rules
            .lock()
            .await
            .insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    async fn put_rules_batch(&self, rules: &[RetrievalRule]) -> Result<()> {
        check_batch(rules)?;
        let mut stored = self.rules.lock().await;
        for rule in rules {
            stored.insert(rule.name.clone(), rule.clone());
        }
        self.batches.lock().await.push(rules.len());
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        self.rules
            .lock()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()).into())
    }
}
