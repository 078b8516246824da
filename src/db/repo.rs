use super::model::{PublishedDeal, SourceSettingsRow};
use crate::model::{CandidateItem, KeywordEntry, SourceSettings};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=NORMAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs: expand a leading `~/`, create the parent
/// directory and make sure the file may be created. In-memory and
/// non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{path}?{query}")
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn is_published(pool: &Pool, source_id: &str, external_id: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM published_deals WHERE source_id = ? AND external_id = ?",
    )
    .bind(source_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Insert a publication record. Returns `false` when the pair was already
/// recorded.
#[instrument(skip_all)]
pub async fn mark_published(
    pool: &Pool,
    item: &CandidateItem,
    at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO published_deals \
         (source_id, external_id, title, discount_percent, current_price, publish_link, \
         published_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.source_id)
    .bind(&item.external_id)
    .bind(&item.title)
    .bind(i64::from(item.discount_percent))
    .bind(item.current_price)
    .bind(&item.publish_link)
    .bind(at.timestamp())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn count_published(pool: &Pool) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM published_deals")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[instrument(skip_all)]
pub async fn recent_published(pool: &Pool, limit: i64) -> Result<Vec<PublishedDeal>> {
    let rows = sqlx::query_as::<_, PublishedDeal>(
        "SELECT id, source_id, external_id, title, discount_percent, current_price, \
         publish_link, published_at \
         FROM published_deals ORDER BY published_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Delete publication records older than `cutoff`; returns the number removed.
#[instrument(skip_all)]
pub async fn prune_published_before(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("DELETE FROM published_deals WHERE published_at < ?")
        .bind(cutoff.timestamp())
        .execute(pool)
        .await?;
    if res.rows_affected() > 0 {
        info!(removed = res.rows_affected(), "pruned published deals");
    }
    Ok(res.rows_affected())
}

/// Keyword pool in pool order.
#[instrument(skip_all)]
pub async fn list_keywords(pool: &Pool) -> Result<Vec<KeywordEntry>> {
    let rows: Vec<(i64, String, Option<String>, i64)> = sqlx::query_as(
        "SELECT id, term, source_id, usage_count FROM search_keywords ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, term, source_id, usage_count)| KeywordEntry {
            id,
            term,
            source_id,
            usage_count,
        })
        .collect())
}

/// Add a keyword if its term is new; returns its id either way.
#[instrument(skip_all)]
pub async fn add_keyword(pool: &Pool, term: &str, source_id: Option<&str>) -> Result<i64> {
    let term = term.trim();
    sqlx::query(
        "INSERT OR IGNORE INTO search_keywords (term, source_id, usage_count, created_at) \
         VALUES (?, ?, 0, ?)",
    )
    .bind(term)
    .bind(source_id)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM search_keywords WHERE term = ?")
        .bind(term)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn increment_keyword_usage(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("UPDATE search_keywords SET usage_count = usage_count + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

const SETTINGS_COLUMNS: &str = "source_id, enabled, priority, posting_weight, min_discount, \
     price_min, price_max, categories, include_keywords, exclude_keywords";

#[instrument(skip_all)]
pub async fn list_enabled_sources(pool: &Pool) -> Result<Vec<SourceSettings>> {
    let rows = sqlx::query_as::<_, SourceSettingsRow>(&format!(
        "SELECT {SETTINGS_COLUMNS} FROM source_settings WHERE enabled = 1 \
         ORDER BY priority, source_id"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(SourceSettingsRow::into_settings).collect()
}

#[instrument(skip_all)]
pub async fn list_all_sources(pool: &Pool) -> Result<Vec<SourceSettings>> {
    let rows = sqlx::query_as::<_, SourceSettingsRow>(&format!(
        "SELECT {SETTINGS_COLUMNS} FROM source_settings ORDER BY priority, source_id"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(SourceSettingsRow::into_settings).collect()
}

async fn write_settings(pool: &Pool, s: &SourceSettings, replace: bool) -> Result<bool> {
    let verb = if replace {
        "INSERT INTO"
    } else {
        "INSERT OR IGNORE INTO"
    };
    let conflict = if replace {
        " ON CONFLICT(source_id) DO UPDATE SET enabled = excluded.enabled, \
         priority = excluded.priority, posting_weight = excluded.posting_weight, \
         min_discount = excluded.min_discount, price_min = excluded.price_min, \
         price_max = excluded.price_max, categories = excluded.categories, \
         include_keywords = excluded.include_keywords, \
         exclude_keywords = excluded.exclude_keywords, \
         updated_at = excluded.updated_at"
    } else {
        ""
    };
    let sql = format!(
        "{verb} source_settings ({SETTINGS_COLUMNS}, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){conflict}"
    );
    let res = sqlx::query(&sql)
        .bind(&s.source_id)
        .bind(s.enabled)
        .bind(i64::from(s.priority))
        .bind(s.posting_weight)
        .bind(i64::from(s.min_discount))
        .bind(s.price_min)
        .bind(s.price_max)
        .bind(serde_json::to_string(&s.categories)?)
        .bind(serde_json::to_string(&s.include_keywords)?)
        .bind(serde_json::to_string(&s.exclude_keywords)?)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await
        .with_context(|| format!("failed to write settings for '{}'", s.source_id))?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn upsert_source_settings(pool: &Pool, settings: &SourceSettings) -> Result<()> {
    write_settings(pool, settings, true).await?;
    Ok(())
}

/// Insert settings for sources that have none yet; returns how many rows
/// were added.
#[instrument(skip_all)]
pub async fn seed_source_settings(pool: &Pool, settings: &[SourceSettings]) -> Result<usize> {
    let mut added = 0;
    for s in settings {
        if write_settings(pool, s, false).await? {
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn prepare_url_variants() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested/bot.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", file.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", file.display()));
        assert!(file.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn published_roundtrip_and_duplicates() {
        let pool = setup_pool().await;
        let item = CandidateItem::new("amazon", "B01", "Headphones", 100.0, 300.0);

        assert!(!is_published(&pool, "amazon", "B01").await.unwrap());
        assert!(mark_published(&pool, &item, Utc::now()).await.unwrap());
        assert!(!mark_published(&pool, &item, Utc::now()).await.unwrap());
        assert!(is_published(&pool, "amazon", "B01").await.unwrap());
        // identity is per source
        assert!(!is_published(&pool, "flipkart", "B01").await.unwrap());
        assert_eq!(count_published(&pool).await.unwrap(), 1);

        let recent = recent_published(&pool, 5).await.unwrap();
        assert_eq!(recent[0].discount_percent, 67);
    }

    #[tokio::test]
    async fn prune_removes_old_records() {
        let pool = setup_pool().await;
        let old = CandidateItem::new("s", "old", "Old", 1.0, 2.0);
        let new = CandidateItem::new("s", "new", "New", 1.0, 2.0);
        let now = Utc::now();
        mark_published(&pool, &old, now - chrono::Duration::days(40))
            .await
            .unwrap();
        mark_published(&pool, &new, now).await.unwrap();

        let removed = prune_published_before(&pool, now - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(is_published(&pool, "s", "new").await.unwrap());
        assert!(!is_published(&pool, "s", "old").await.unwrap());
    }

    #[tokio::test]
    async fn keyword_pool() {
        let pool = setup_pool().await;
        let a = add_keyword(&pool, " laptops ", None).await.unwrap();
        let b = add_keyword(&pool, "phones", Some("flipkart")).await.unwrap();
        assert_eq!(add_keyword(&pool, "laptops", None).await.unwrap(), a);

        increment_keyword_usage(&pool, b).await.unwrap();
        increment_keyword_usage(&pool, b).await.unwrap();
        let kws = list_keywords(&pool).await.unwrap();
        assert_eq!(kws.len(), 2);
        assert_eq!(kws[0].term, "laptops");
        assert_eq!(kws[1].usage_count, 2);
        assert_eq!(kws[1].source_id.as_deref(), Some("flipkart"));
    }

    #[tokio::test]
    async fn settings_seed_upsert_and_listing() {
        let pool = setup_pool().await;
        let mut a = SourceSettings::new("amazon");
        a.priority = 2;
        a.categories = vec!["Electronics".into()];
        let mut f = SourceSettings::new("flipkart");
        f.priority = 1;
        f.price_max = Some(5000.0);
        let mut off = SourceSettings::new("myntra");
        off.enabled = false;

        assert_eq!(
            seed_source_settings(&pool, &[a.clone(), f.clone(), off.clone()])
                .await
                .unwrap(),
            3
        );
        // seeding again keeps existing rows
        let mut changed = a.clone();
        changed.min_discount = 10;
        assert_eq!(seed_source_settings(&pool, &[changed.clone()]).await.unwrap(), 0);

        let enabled = list_enabled_sources(&pool).await.unwrap();
        assert_eq!(enabled, vec![f.clone(), a.clone()]);
        assert_eq!(list_all_sources(&pool).await.unwrap().len(), 3);

        upsert_source_settings(&pool, &changed).await.unwrap();
        let enabled = list_enabled_sources(&pool).await.unwrap();
        assert_eq!(enabled[1].min_discount, 10);
    }
}
