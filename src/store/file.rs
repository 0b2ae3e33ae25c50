use crate::error::StoreError;
use crate::models::RetrievalRule;
use crate::store::{check_batch, RuleStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Rules kept as a pretty-printed JSON array in one file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename.
pub struct JsonFileRuleStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, RetrievalRule>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "rule file not found, starting empty");
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let rules: Vec<RetrievalRule> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse rules in {}", self.path.display()))?;
        Ok(rules
            .into_iter()
            .map(|rule| (rule.name.clone(), rule))
            .collect())
    }

    async fn save(&self, rules: &BTreeMap<String, RetrievalRule>) -> Result<()> {
        let list: Vec<&RetrievalRule> = rules.values().collect();
        let json = serde_json::to_string_pretty(&list)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), rules = rules.len(), "saved rules");
        Ok(())
    }

    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, RetrievalRule>) -> Result<()> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut rules = self.load().await?;
        change(&mut rules)?;
        self.save(&rules).await
    }
}

#[async_trait]
impl RuleStore for JsonFileRuleStore {
    async fn list_rules(&self) -> Result<Vec<RetrievalRule>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }

    async fn put_rule(&self, rule: &RetrievalRule) -> Result<()> {
        let rule = rule.clone();
        self.update(move |rules| {
            rules.insert(rule.name.clone(), rule);
            Ok(())
        })
        .await
    }

    async fn put_rules_batch(&self, batch: &[RetrievalRule]) -> Result<()> {
        check_batch(batch)?;
        let batch = batch.to_vec();
        self.update(move |rules| {
            for rule in batch {
                rules.insert(rule.name.clone(), rule);
            }
            Ok(())
        })
        .await
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.update(move |rules| match rules.remove(&name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(name).into()),
        })
        .await
    }
}
