//! Keyset-paginated listing of committed analyses.
//!
//! Pagination is by `committed_at` boundary, not row offset, so a page walk
//! stays stable while new commits land ahead of the cursor.

use crate::models::analysis::AnalysisStatus;
use chrono::{DateTime, Local, LocalResult, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

/// `today` scopes to commits since local midnight; `historical` has no
/// lower bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryFilter {
    Today,
    Historical,
}

impl HistoryFilter {
    /// Anything that isn't explicitly `historical` means today.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("historical") => Self::Historical,
            _ => Self::Today,
        }
    }
}

/// Summary row returned by the pager.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    pub meal_title: Option<String>,
    pub total_calories: Option<f64>,
    pub committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub next_cursor: Option<DateTime<Utc>>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct HistoryPager {
    pub db: Arc<SqlitePool>,
}

impl HistoryPager {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// List committed analyses for `owner_id`, newest first.
    ///
    /// `cursor` is the `committed_at` of the last item of the previous page
    /// and is applied as a strict upper bound. The page size is clamped to
    /// [1, 50], default 10. One extra row is fetched to decide `has_more`;
    /// it is never returned.
    pub async fn list(
        &self,
        owner_id: Uuid,
        filter: HistoryFilter,
        cursor: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<HistoryPage, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, meal_title, total_calories, committed_at \
             FROM analyses WHERE owner_id = ",
        );
        builder.push_bind(owner_id);
        builder.push(" AND status = ");
        builder.push_bind(AnalysisStatus::Committed);

        if filter == HistoryFilter::Today {
            builder.push(" AND committed_at >= ");
            builder.push_bind(start_of_local_day());
        }
        if let Some(cursor) = cursor {
            builder.push(" AND committed_at < ");
            builder.push_bind(cursor);
        }

        builder.push(" ORDER BY committed_at DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<HistoryItem> = builder.build_query_as().fetch_all(&*self.db).await?;

        let has_more = rows.len() == fetch_limit;
        if has_more {
            rows.pop();
        }
        let next_cursor = if has_more {
            rows.last().and_then(|item| item.committed_at)
        } else {
            None
        };

        Ok(HistoryPage {
            items: rows,
            next_cursor,
            has_more,
        })
    }
}

/// Local midnight as a UTC instant.
fn start_of_local_day() -> DateTime<Utc> {
    let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
    match midnight.and_local_timezone(Local) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // A DST gap exactly at midnight; fall back to UTC midnight.
        LocalResult::None => Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> HistoryPager {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.expect("schema");
        }
        HistoryPager::new(Arc::new(pool))
    }

    async fn insert(
        pager: &HistoryPager,
        owner: Uuid,
        status: AnalysisStatus,
        title: &str,
        committed_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO analyses (id, owner_id, status, meal_title, total_calories, created_at, committed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(owner)
        .bind(status)
        .bind(title)
        .bind(450.0_f64)
        .bind(Utc::now())
        .bind(committed_at)
        .execute(&*pager.db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn pages_walk_without_overlap() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..5 {
            insert(
                &pager,
                owner,
                AnalysisStatus::Committed,
                &format!("meal-{i}"),
                Some(base - Duration::minutes(i)),
            )
            .await;
        }

        let first = pager
            .list(owner, HistoryFilter::Historical, None, Some(2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.next_cursor, first.items[1].committed_at);
        assert_eq!(first.items[0].meal_title.as_deref(), Some("meal-0"));

        let second = pager
            .list(owner, HistoryFilter::Historical, first.next_cursor, Some(2))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second.has_more);
        let seen: Vec<_> = first.items.iter().chain(&second.items).map(|i| i.id).collect();
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 4);

        let third = pager
            .list(owner, HistoryFilter::Historical, second.next_cursor, Some(2))
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(!third.has_more);
        assert!(third.next_cursor.is_none());
    }

    #[tokio::test]
    async fn only_committed_records_are_listed() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        insert(&pager, owner, AnalysisStatus::Committed, "kept", Some(Utc::now())).await;
        insert(&pager, owner, AnalysisStatus::Completed, "pending-review", None).await;
        insert(&pager, owner, AnalysisStatus::Declined, "declined", None).await;

        let page = pager
            .list(owner, HistoryFilter::Historical, None, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].meal_title.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn other_owners_are_invisible() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        insert(&pager, owner, AnalysisStatus::Committed, "mine", Some(Utc::now())).await;
        insert(
            &pager,
            Uuid::new_v4(),
            AnalysisStatus::Committed,
            "theirs",
            Some(Utc::now()),
        )
        .await;

        let page = pager
            .list(owner, HistoryFilter::Historical, None, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].meal_title.as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn today_filter_excludes_older_commits() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        insert(&pager, owner, AnalysisStatus::Committed, "now", Some(Utc::now())).await;
        insert(
            &pager,
            owner,
            AnalysisStatus::Committed,
            "last-week",
            Some(Utc::now() - Duration::days(7)),
        )
        .await;

        let today = pager
            .list(owner, HistoryFilter::Today, None, None)
            .await
            .unwrap();
        assert_eq!(today.items.len(), 1);
        assert_eq!(today.items[0].meal_title.as_deref(), Some("now"));

        let all = pager
            .list(owner, HistoryFilter::Historical, None, None)
            .await
            .unwrap();
        assert_eq!(all.items.len(), 2);
    }

    #[tokio::test]
    async fn cursor_round_trip_keeps_sub_millisecond_boundaries() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        // Two commits inside the same millisecond, 500µs apart.
        let older: DateTime<Utc> = "2026-08-29T12:00:00Z".parse().unwrap();
        let newer: DateTime<Utc> = "2026-08-29T12:00:00.000500Z".parse().unwrap();
        insert(&pager, owner, AnalysisStatus::Committed, "older", Some(older)).await;
        insert(&pager, owner, AnalysisStatus::Committed, "newer", Some(newer)).await;

        let first = pager
            .list(owner, HistoryFilter::Historical, None, Some(1))
            .await
            .unwrap();
        assert_eq!(first.items[0].meal_title.as_deref(), Some("newer"));
        assert!(first.has_more);

        // The cursor crosses the wire as JSON; parsing it back must yield
        // the exact boundary instant.
        let wire = serde_json::to_value(first.next_cursor).unwrap();
        let cursor: Option<DateTime<Utc>> = serde_json::from_value(wire).unwrap();
        assert_eq!(cursor, Some(newer));

        let second = pager
            .list(owner, HistoryFilter::Historical, cursor, Some(1))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].meal_title.as_deref(), Some("older"));
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let pager = setup().await;
        let owner = Uuid::new_v4();
        for i in 0..3 {
            insert(
                &pager,
                owner,
                AnalysisStatus::Committed,
                &format!("meal-{i}"),
                Some(Utc::now() - Duration::minutes(i)),
            )
            .await;
        }

        // limit=0 is clamped up to 1.
        let page = pager
            .list(owner, HistoryFilter::Historical, None, Some(0))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.has_more);
    }

    #[test]
    fn filter_parse_defaults_to_today() {
        assert_eq!(HistoryFilter::parse(Some("historical")), HistoryFilter::Historical);
        assert_eq!(HistoryFilter::parse(Some("today")), HistoryFilter::Today);
        assert_eq!(HistoryFilter::parse(Some("bogus")), HistoryFilter::Today);
        assert_eq!(HistoryFilter::parse(None), HistoryFilter::Today);
    }
}
