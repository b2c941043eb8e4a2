use crate::model::{ContentItem, ContentKind, Invitation, NotificationJob, ReviewStatus, User};
use crate::review::{Outcome, Revision};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and ensure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }
    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }
    let expanded = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- users ----

#[instrument(skip_all)]
pub async fn insert_user(
    pool: &Pool,
    email: &str,
    full_name: Option<&str>,
    is_admin: bool,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO users (email, full_name, is_admin) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(email)
    .bind(full_name)
    .bind(is_admin)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| user_from_row(&r)).transpose()
}

#[instrument(skip_all)]
pub async fn find_user_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    row.map(|r| user_from_row(&r)).transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        is_admin: row.get("is_admin"),
        created_at: row.get("created_at"),
    })
}

// ---- content items ----

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub async fn insert_content(
    pool: &Pool,
    kind: ContentKind,
    title: &str,
    slug: &str,
    body: &str,
    excerpt: Option<&str>,
    author_id: i64,
    status: ReviewStatus,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO content_items (kind, title, slug, body, excerpt, status, author_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(title)
    .bind(slug)
    .bind(body)
    .bind(excerpt)
    .bind(status.as_str())
    .bind(author_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn fetch_content(pool: &Pool, id: i64) -> Result<Option<ContentItem>> {
    let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| content_from_row(&r)).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_content_by_slug(
    pool: &Pool,
    kind: ContentKind,
    slug: &str,
) -> Result<Option<ContentItem>> {
    let row = sqlx::query("SELECT * FROM content_items WHERE kind = ? AND slug = ?")
        .bind(kind.as_str())
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    row.map(|r| content_from_row(&r)).transpose()
}

/// Publicly visible items of one kind, newest publish first.
#[instrument(skip_all)]
pub async fn list_published(pool: &Pool, kind: ContentKind) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query(
        "SELECT * FROM content_items WHERE kind = ? AND published = 1 \
         ORDER BY datetime(published_at) DESC",
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(content_from_row).collect()
}

#[instrument(skip_all)]
pub async fn list_by_author(pool: &Pool, author_id: i64) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query(
        "SELECT * FROM content_items WHERE author_id = ? ORDER BY datetime(created_at) DESC",
    )
    .bind(author_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(content_from_row).collect()
}

/// Apply a state-machine outcome (and optionally an edit's revision text)
/// with a conditional update keyed on the previously read status. Returns
/// false when zero rows matched, i.e. a concurrent transition won the race.
///
/// `published_at` goes through COALESCE so it is written at most once and
/// never cleared, no matter how often the item is re-approved.
#[instrument(skip_all)]
pub async fn apply_transition(
    pool: &Pool,
    id: i64,
    expected: ReviewStatus,
    outcome: &Outcome,
    revision: Option<&Revision>,
) -> Result<bool> {
    let now = Utc::now();
    let publish_stamp: Option<DateTime<Utc>> = outcome.first_publish.then_some(now);
    let result = match revision {
        Some(rev) => {
            sqlx::query(
                "UPDATE content_items SET title = ?, body = ?, excerpt = ?, status = ?, \
                 published = ?, is_edited = ?, submission_note = ?, admin_feedback = ?, \
                 updated_at = ?, published_at = COALESCE(published_at, ?) \
                 WHERE id = ? AND status = ?",
            )
            .bind(&rev.title)
            .bind(&rev.body)
            .bind(rev.excerpt.as_deref())
            .bind(outcome.status.as_str())
            .bind(outcome.published)
            .bind(outcome.is_edited)
            .bind(outcome.submission_note.as_deref())
            .bind(outcome.admin_feedback.as_deref())
            .bind(now)
            .bind(publish_stamp)
            .bind(id)
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE content_items SET status = ?, published = ?, is_edited = ?, \
                 submission_note = ?, admin_feedback = ?, updated_at = ?, \
                 published_at = COALESCE(published_at, ?) \
                 WHERE id = ? AND status = ?",
            )
            .bind(outcome.status.as_str())
            .bind(outcome.published)
            .bind(outcome.is_edited)
            .bind(outcome.submission_note.as_deref())
            .bind(outcome.admin_feedback.as_deref())
            .bind(now)
            .bind(publish_stamp)
            .bind(id)
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
    };
    Ok(result.rows_affected() == 1)
}

/// Hard delete. Deliberately unconditional: delete sits outside the review
/// state machine.
#[instrument(skip_all)]
pub async fn delete_content(pool: &Pool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM collaborators WHERE content_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM invitations WHERE content_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM content_items WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let kind_raw: String = row.get("kind");
    let status_raw: String = row.get("status");
    Ok(ContentItem {
        id: row.get("id"),
        kind: ContentKind::parse(&kind_raw)
            .ok_or_else(|| anyhow!("unknown content kind: {kind_raw}"))?,
        title: row.get("title"),
        slug: row.get("slug"),
        body: row.get("body"),
        excerpt: row.get("excerpt"),
        status: ReviewStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown review status: {status_raw}"))?,
        published: row.get("published"),
        is_edited: row.get("is_edited"),
        submission_note: row.get("submission_note"),
        admin_feedback: row.get("admin_feedback"),
        author_id: row.get("author_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        published_at: row.get("published_at"),
    })
}

// ---- invitations & collaborators ----

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub async fn insert_invitation(
    pool: &Pool,
    content_id: i64,
    content_kind: ContentKind,
    invited_email: &str,
    invited_user_id: i64,
    invited_by: i64,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO invitations (content_id, content_kind, invited_email, invited_user_id, \
         invited_by, token, expires_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(content_id)
    .bind(content_kind.as_str())
    .bind(invited_email)
    .bind(invited_user_id)
    .bind(invited_by)
    .bind(token)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn find_invitation_by_token(pool: &Pool, token: &str) -> Result<Option<Invitation>> {
    let row = sqlx::query("SELECT * FROM invitations WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    row.map(|r| invitation_from_row(&r)).transpose()
}

/// One-way accept flag. Returns false when the invitation was already
/// accepted, which callers treat as "somebody (possibly a retry of this
/// very request) got here first".
#[instrument(skip_all)]
pub async fn mark_invitation_accepted(pool: &Pool, id: i64, user_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE invitations SET accepted = 1, invited_user_id = ?, accepted_at = ? \
         WHERE id = ? AND accepted = 0",
    )
    .bind(user_id)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn insert_collaborator(
    pool: &Pool,
    content_id: i64,
    content_kind: ContentKind,
    user_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO collaborators (content_id, content_kind, user_id) VALUES (?, ?, ?)",
    )
    .bind(content_id)
    .bind(content_kind.as_str())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn is_collaborator(
    pool: &Pool,
    content_id: i64,
    content_kind: ContentKind,
    user_id: i64,
) -> Result<bool> {
    let cnt: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM collaborators WHERE content_id = ? AND content_kind = ? AND user_id = ?",
    )
    .bind(content_id)
    .bind(content_kind.as_str())
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(cnt > 0)
}

fn invitation_from_row(row: &SqliteRow) -> Result<Invitation> {
    let kind_raw: String = row.get("content_kind");
    Ok(Invitation {
        id: row.get("id"),
        content_id: row.get("content_id"),
        content_kind: ContentKind::parse(&kind_raw)
            .ok_or_else(|| anyhow!("unknown content kind: {kind_raw}"))?,
        invited_email: row.get("invited_email"),
        invited_user_id: row.get("invited_user_id"),
        invited_by: row.get("invited_by"),
        token: row.get("token"),
        accepted: row.get("accepted"),
        accepted_at: row.get("accepted_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

// ---- notification jobs (broadcast ledger) ----

#[instrument(skip_all)]
pub async fn enqueue_notification(
    pool: &Pool,
    source: ContentKind,
    title: &str,
    excerpt: Option<&str>,
    slug: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO notification_jobs (source, title, excerpt, slug) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(source.as_str())
    .bind(title)
    .bind(excerpt)
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn unprocessed_jobs(pool: &Pool, limit: i64) -> Result<Vec<NotificationJob>> {
    let rows = sqlx::query(
        "SELECT * FROM notification_jobs WHERE processed = 0 \
         ORDER BY datetime(created_at) ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(job_from_row).collect()
}

/// Atomic one-way flag: update-if-not-processed. A concurrent drain that
/// loses this write sees zero rows affected and moves on.
#[instrument(skip_all)]
pub async fn mark_job_processed(pool: &Pool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE notification_jobs SET processed = 1 WHERE id = ? AND processed = 0")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

fn job_from_row(row: &SqliteRow) -> Result<NotificationJob> {
    let source_raw: String = row.get("source");
    Ok(NotificationJob {
        id: row.get("id"),
        source: ContentKind::parse(&source_raw)
            .ok_or_else(|| anyhow!("unknown job source: {source_raw}"))?,
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        slug: row.get("slug"),
        processed: row.get("processed"),
        created_at: row.get("created_at"),
    })
}

// ---- subscribers ----

/// Insert or reactivate; subscribing twice is harmless.
#[instrument(skip_all)]
pub async fn subscribe(pool: &Pool, email: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscribers (email, is_active) VALUES (?, 1) \
         ON CONFLICT(email) DO UPDATE SET is_active = 1",
    )
    .bind(email)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn unsubscribe(pool: &Pool, email: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET is_active = 0 WHERE email = ?")
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn active_subscribers(pool: &Pool) -> Result<Vec<String>> {
    let emails = sqlx::query_scalar("SELECT email FROM subscribers WHERE is_active = 1")
        .fetch_all(pool)
        .await?;
    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn approved_outcome(first: bool) -> Outcome {
        Outcome {
            status: ReviewStatus::Approved,
            published: true,
            is_edited: !first,
            submission_note: None,
            admin_feedback: None,
            first_publish: first,
        }
    }

    #[tokio::test]
    async fn conditional_transition_detects_stale_state() {
        let pool = setup_pool().await;
        let author = insert_user(&pool, "a@example.com", Some("Alice"), false)
            .await
            .unwrap();
        let id = insert_content(
            &pool,
            ContentKind::Community,
            "Title",
            "title",
            "body",
            None,
            author,
            ReviewStatus::Submitted,
        )
        .await
        .unwrap();

        let ok = apply_transition(&pool, id, ReviewStatus::Submitted, &approved_outcome(true), None)
            .await
            .unwrap();
        assert!(ok);

        // Same expected status again: the record moved on, so this must fail.
        let ok = apply_transition(&pool, id, ReviewStatus::Submitted, &approved_outcome(true), None)
            .await
            .unwrap();
        assert!(!ok);

        let item = fetch_content(&pool, id).await.unwrap().unwrap();
        assert_eq!(item.status, ReviewStatus::Approved);
        assert!(item.published);
        assert!(item.published_at.is_some());
    }

    #[tokio::test]
    async fn published_at_is_written_once() {
        let pool = setup_pool().await;
        let author = insert_user(&pool, "a@example.com", None, false).await.unwrap();
        let id = insert_content(
            &pool,
            ContentKind::Community,
            "T",
            "t",
            "b",
            None,
            author,
            ReviewStatus::Submitted,
        )
        .await
        .unwrap();

        apply_transition(&pool, id, ReviewStatus::Submitted, &approved_outcome(true), None)
            .await
            .unwrap();
        let first = fetch_content(&pool, id).await.unwrap().unwrap().published_at;
        assert!(first.is_some());

        // Reject then re-approve; the stamp must not move.
        let rejected = Outcome {
            status: ReviewStatus::Rejected,
            published: false,
            is_edited: false,
            submission_note: None,
            admin_feedback: Some("no".into()),
            first_publish: false,
        };
        apply_transition(&pool, id, ReviewStatus::Approved, &rejected, None)
            .await
            .unwrap();
        apply_transition(&pool, id, ReviewStatus::Rejected, &approved_outcome(false), None)
            .await
            .unwrap();

        let again = fetch_content(&pool, id).await.unwrap().unwrap().published_at;
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn listings_filter_by_visibility_and_author() {
        let pool = setup_pool().await;
        let alice = insert_user(&pool, "a@example.com", None, false).await.unwrap();
        let bob = insert_user(&pool, "b@example.com", None, false).await.unwrap();

        let visible = insert_content(
            &pool,
            ContentKind::Community,
            "Visible",
            "visible",
            "b",
            None,
            alice,
            ReviewStatus::Submitted,
        )
        .await
        .unwrap();
        insert_content(
            &pool,
            ContentKind::Community,
            "Hidden",
            "hidden",
            "b",
            None,
            bob,
            ReviewStatus::Submitted,
        )
        .await
        .unwrap();
        apply_transition(&pool, visible, ReviewStatus::Submitted, &approved_outcome(true), None)
            .await
            .unwrap();

        let public = list_published(&pool, ContentKind::Community).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].slug, "visible");

        let alices = list_by_author(&pool, alice).await.unwrap();
        assert_eq!(alices.len(), 1);
        let bobs = list_by_author(&pool, bob).await.unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].slug, "hidden");
    }

    #[tokio::test]
    async fn job_flag_is_one_way() {
        let pool = setup_pool().await;
        let id = enqueue_notification(&pool, ContentKind::Community, "T", None, "t")
            .await
            .unwrap();
        assert_eq!(unprocessed_jobs(&pool, 10).await.unwrap().len(), 1);
        assert!(mark_job_processed(&pool, id).await.unwrap());
        assert!(!mark_job_processed(&pool, id).await.unwrap());
        assert!(unprocessed_jobs(&pool, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_reactivates() {
        let pool = setup_pool().await;
        subscribe(&pool, "s@example.com").await.unwrap();
        subscribe(&pool, "s@example.com").await.unwrap();
        assert_eq!(active_subscribers(&pool).await.unwrap().len(), 1);
        unsubscribe(&pool, "s@example.com").await.unwrap();
        assert!(active_subscribers(&pool).await.unwrap().is_empty());
        subscribe(&pool, "s@example.com").await.unwrap();
        assert_eq!(active_subscribers(&pool).await.unwrap().len(), 1);
    }
}
