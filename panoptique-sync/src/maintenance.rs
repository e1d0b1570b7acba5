use crate::normalizer::generate_excerpt;
use crate::rss_utils::{html, url::is_http_url};
use crate::traits::ArticleStore;
use crate::types::{Article, ArticleRepair, RepairReport, Result};
use tracing::{debug, info};

/// Articles examined per repair run.
pub const REPAIR_BATCH_SIZE: i64 = 1000;
const REPAIR_EXCERPT_CHARS: usize = 1000;
const NO_DESCRIPTION: &str = "No description available";

/// Delete all but the most recently created article of every URL group.
pub async fn cleanup_duplicates(store: &dyn ArticleStore, source_id: Option<i64>) -> Result<u64> {
    let groups = store.find_duplicate_articles_by_url(source_id).await?;

    let mut doomed = Vec::new();
    for mut group in groups {
        // Newest first; ties go to the higher id.
        group.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let mut rest = group.into_iter();
        let Some(keep) = rest.next() else { continue };
        for article in rest {
            debug!("Deleting duplicate article {} (kept {})", article.id, keep.id);
            doomed.push(article.id);
        }
    }

    let deleted = store.delete_articles(&doomed).await?;
    info!("Duplicate cleanup removed {} articles", deleted);
    Ok(deleted)
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Work out what a stored article is missing. The second value is a validation message when
/// the image URL had to be dropped.
pub fn plan_repair(article: &Article) -> (ArticleRepair, Option<String>) {
    let mut repair = ArticleRepair::default();
    let mut problem = None;

    if blank(&article.excerpt) {
        if let Some(content) = article.content.as_deref().filter(|c| !c.trim().is_empty()) {
            let excerpt = generate_excerpt(&html::to_plain_text(content), REPAIR_EXCERPT_CHARS);
            if !excerpt.is_empty() {
                repair.excerpt = Some(excerpt);
            }
        }
    }

    if blank(&article.description) {
        let description = [&article.summary, &repair.excerpt, &article.excerpt]
            .into_iter()
            .find(|candidate| !blank(candidate))
            .and_then(|candidate| candidate.clone())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());
        repair.description = Some(description);
    }

    if let Some(image_url) = article.image_url.as_deref() {
        if !is_http_url(image_url) {
            repair.clear_image_url = true;
            problem = Some(format!(
                "Invalid image URL for article {}: {}",
                article.id, image_url
            ));
        }
    }

    (repair, problem)
}

/// Backfill missing excerpts and descriptions and drop invalid image URLs for the most recent
/// batch of articles.
pub async fn validate_and_repair_articles(
    store: &dyn ArticleStore,
    source_id: Option<i64>,
) -> Result<RepairReport> {
    let articles = store.list_articles(source_id, REPAIR_BATCH_SIZE).await?;
    let mut report = RepairReport::default();

    for article in &articles {
        let (repair, problem) = plan_repair(article);
        if let Some(problem) = problem {
            report.errors.push(problem);
        }
        if repair.is_empty() {
            continue;
        }
        store.apply_article_repair(article.id, &repair).await?;
        report.repaired_count += 1;
    }

    info!(
        "Validated {} articles: {} repaired, {} problems",
        articles.len(),
        report.repaired_count,
        report.errors.len()
    );
    Ok(report)
}
