pub mod file;
pub mod memory;

pub use file::JsonFileRuleStore;
pub use memory::MemoryRuleStore;

use crate::error::StoreError;
use crate::models::RetrievalRule;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Largest batch a store accepts in one `put_rules_batch` call.
pub const MAX_BATCH: usize = 25;

/// Persistence for retrieval rules, keyed by rule name.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<RetrievalRule>>;

    /// Insert or replace one rule.
    async fn put_rule(&self, rule: &RetrievalRule) -> Result<()>;

    /// Insert or replace up to [`MAX_BATCH`] rules at once.
    async fn put_rules_batch(&self, rules: &[RetrievalRule]) -> Result<()>;

    async fn delete_rule(&self, name: &str) -> Result<()>;
}

/// Reject batches the store would refuse anyway.
pub fn check_batch(rules: &[RetrievalRule]) -> Result<(), StoreError> {
    if rules.len() > MAX_BATCH {
        return Err(StoreError::BatchTooLarge {
            len: rules.len(),
            max: MAX_BATCH,
        });
    }
    Ok(())
}

/// Write any number of rules as consecutive batches of at most [`MAX_BATCH`].
pub async fn put_rules_chunked(store: &dyn RuleStore, rules: &[RetrievalRule]) -> Result<()> {
    for (i, chunk) in rules.chunks(MAX_BATCH).enumerate() {
        debug!(batch = i, rules = chunk.len(), "writing rule batch");
        store.put_rules_batch(chunk).await?;
    }
    Ok(())
}
