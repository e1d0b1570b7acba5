use crate::traits::ArticleStore;
use crate::types::{ArticleDraft, InsertOutcome, Result};
use tracing::debug;

/// Tally of one batch through the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub failures: Vec<String>,
}

/// Insert a batch of drafts, letting the URL uniqueness constraint drop the ones already stored.
///
/// Duplicates are counted, not reported. Per-row failures come back in `failures`; only a
/// failure of the batch itself (connection, transaction) is an `Err`.
pub async fn persist_new(store: &dyn ArticleStore, drafts: &[ArticleDraft]) -> Result<PersistSummary> {
    let mut summary = PersistSummary::default();
    if drafts.is_empty() {
        return Ok(summary);
    }

    for outcome in store.bulk_insert_articles(drafts).await? {
        match outcome {
            InsertOutcome::Inserted => summary.inserted += 1,
            InsertOutcome::Duplicate => summary.duplicates += 1,
            InsertOutcome::Failed(message) => summary.failures.push(message),
        }
    }

    debug!(
        "Persisted batch: {} new, {} duplicates, {} failed",
        summary.inserted,
        summary.duplicates,
        summary.failures.len()
    );
    Ok(summary)
}

/// Single-item path: skip the insert when the URL is already stored.
pub async fn persist_if_absent(store: &dyn ArticleStore, draft: &ArticleDraft) -> Result<bool> {
    if store.find_article_by_url(&draft.url).await?.is_some() {
        return Ok(false);
    }
    let summary = persist_new(store, std::slice::from_ref(draft)).await?;
    Ok(summary.inserted == 1)
}
