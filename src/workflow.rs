//! Workflow orchestrator: validates the actor, runs the state machine,
//! persists the outcome and triggers notifications.
//!
//! The load/validate/persist path is atomic with respect to the record (a
//! single conditional update); the notification steps after it are
//! best-effort and never roll a committed transition back.

use crate::config::Mail;
use crate::db::{self, Pool};
use crate::dispatch;
use crate::error::WorkflowError;
use crate::mailer::{self, Mailer};
use crate::model::{Actor, ContentItem, ContentKind, ReviewStatus, Role};
use crate::review::{self, Action};
use tracing::{info, instrument, warn};

/// Jobs handled by the inline drain after a publish; anything beyond this
/// is picked up by the scheduler's next pass.
const INLINE_DRAIN_LIMIT: i64 = 16;

/// Effective role of `actor` for one content item. Moderator wins over
/// authorship; for personal items the owning moderator is both.
#[instrument(skip_all)]
pub async fn resolve_role(
    pool: &Pool,
    item: &ContentItem,
    actor: Actor,
) -> Result<Role, WorkflowError> {
    if actor.is_moderator {
        return Ok(Role::Moderator);
    }
    if item.author_id == actor.user_id {
        return Ok(Role::Author);
    }
    if db::is_collaborator(pool, item.id, item.kind, actor.user_id).await? {
        return Ok(Role::Collaborator);
    }
    Ok(Role::None)
}

/// Run one review action against one content item.
#[instrument(skip_all, fields(content = content_id, action = action.name()))]
pub async fn submit_action(
    pool: &Pool,
    mailer: &dyn Mailer,
    mail_cfg: &Mail,
    content_id: i64,
    actor: Actor,
    action: Action,
) -> Result<ContentItem, WorkflowError> {
    let item = db::fetch_content(pool, content_id)
        .await?
        .ok_or(WorkflowError::NotFound)?;
    let role = resolve_role(pool, &item, actor).await?;

    let outcome = review::transition(&item, role, &action)?;
    if outcome.is_noop(&item) && action.revision().is_none() {
        return Ok(item);
    }

    let applied =
        db::apply_transition(pool, item.id, item.status, &outcome, action.revision()).await?;
    if !applied {
        return Err(WorkflowError::StaleState);
    }
    info!(
        content = item.id,
        from = item.status.as_str(),
        to = outcome.status.as_str(),
        "transition applied"
    );

    // Re-read: notification decisions are made from what actually landed,
    // not from the actor's view of the world.
    let fresh = db::fetch_content(pool, content_id)
        .await?
        .ok_or(WorkflowError::NotFound)?;

    // First-ever approval: enqueue exactly one broadcast job and drain.
    if item.published_at.is_none() && fresh.published_at.is_some() {
        notify_first_publish(pool, mailer, mail_cfg, &fresh).await;
    }

    // Moderator decision on community content: tell the author.
    if role == Role::Moderator && fresh.kind == ContentKind::Community {
        match &action {
            Action::Approve { .. } | Action::Reject { .. } => {
                notify_author_of_decision(pool, mailer, mail_cfg, &fresh).await;
            }
            _ => {}
        }
    }

    // Fresh submission or resubmission: tell the moderator.
    let entered_review = fresh.status != item.status
        && matches!(
            fresh.status,
            ReviewStatus::Submitted | ReviewStatus::Resubmitted
        );
    if entered_review {
        notify_moderator_of_submission(pool, mailer, mail_cfg, &fresh).await;
    }

    Ok(fresh)
}

async fn notify_first_publish(pool: &Pool, mailer: &dyn Mailer, mail_cfg: &Mail, item: &ContentItem) {
    let enqueued = db::enqueue_notification(
        pool,
        item.kind,
        &item.title,
        item.excerpt.as_deref(),
        &item.slug,
    )
    .await;
    match enqueued {
        Ok(job) => info!(job, content = item.id, "broadcast job enqueued"),
        Err(err) => {
            warn!(?err, content = item.id, "failed to enqueue broadcast job");
            return;
        }
    }
    if let Err(err) = dispatch::drain_queue(pool, mailer, &mail_cfg.site_url, INLINE_DRAIN_LIMIT).await
    {
        // The job row survives; the scheduler's next drain retries it.
        warn!(?err, content = item.id, "inline drain failed");
    }
}

async fn notify_author_of_decision(
    pool: &Pool,
    mailer: &dyn Mailer,
    mail_cfg: &Mail,
    item: &ContentItem,
) {
    let author = match db::find_user(pool, item.author_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(content = item.id, "author account missing; decision email skipped");
            return;
        }
        Err(err) => {
            warn!(?err, content = item.id, "author lookup failed; decision email skipped");
            return;
        }
    };
    let approved = item.status == ReviewStatus::Approved;
    let subject = mailer::decision_subject(item, approved);
    let html = mailer::decision_html(item, approved, &mail_cfg.site_url);
    let _ = dispatch::send_direct(mailer, &author.email, &subject, &html).await;
}

async fn notify_moderator_of_submission(
    pool: &Pool,
    mailer: &dyn Mailer,
    mail_cfg: &Mail,
    item: &ContentItem,
) {
    let author_email = match db::find_user(pool, item.author_id).await {
        Ok(Some(user)) => user.email,
        _ => String::from("unknown"),
    };
    let subject = mailer::submission_subject(item);
    let html = mailer::submission_html(item, &author_email);
    let _ = dispatch::send_direct(mailer, &mail_cfg.moderator_email, &subject, &html).await;
}

/// Request to create a new content item.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub excerpt: Option<String>,
    /// Personal items only: publish immediately instead of saving a draft.
    pub publish_now: bool,
}

/// Create a content item. Community submissions go straight into review
/// (creation auto-submits) and notify the moderator; personal items are
/// created by the moderator as drafts, or published immediately.
#[instrument(skip_all)]
pub async fn create_content(
    pool: &Pool,
    mailer: &dyn Mailer,
    mail_cfg: &Mail,
    actor: Actor,
    req: NewContent,
) -> Result<ContentItem, WorkflowError> {
    if req.title.trim().is_empty() || req.body.trim().is_empty() {
        return Err(WorkflowError::Internal(anyhow::anyhow!(
            "title and body are required"
        )));
    }
    let initial = match req.kind {
        ContentKind::Community => ReviewStatus::Submitted,
        ContentKind::Personal => {
            if !actor.is_moderator {
                return Err(WorkflowError::Forbidden);
            }
            ReviewStatus::Draft
        }
    };

    let slug = unique_slug(pool, req.kind, &req.title).await?;
    let id = db::insert_content(
        pool,
        req.kind,
        req.title.trim(),
        &slug,
        &req.body,
        req.excerpt.as_deref(),
        actor.user_id,
        initial,
    )
    .await?;
    info!(content = id, kind = req.kind.as_str(), "content created");

    let item = db::fetch_content(pool, id)
        .await?
        .ok_or(WorkflowError::NotFound)?;

    match req.kind {
        ContentKind::Community => {
            notify_moderator_of_submission(pool, mailer, mail_cfg, &item).await;
            Ok(item)
        }
        ContentKind::Personal if req.publish_now => {
            submit_action(
                pool,
                mailer,
                mail_cfg,
                id,
                actor,
                Action::Approve { feedback: None },
            )
            .await
        }
        ContentKind::Personal => Ok(item),
    }
}

/// Delete sits outside the state machine: moderator only, unconditional.
#[instrument(skip_all)]
pub async fn delete_content(
    pool: &Pool,
    actor: Actor,
    content_id: i64,
) -> Result<(), WorkflowError> {
    if !actor.is_moderator {
        return Err(WorkflowError::Forbidden);
    }
    db::fetch_content(pool, content_id)
        .await?
        .ok_or(WorkflowError::NotFound)?;
    db::delete_content(pool, content_id).await?;
    info!(content = content_id, "content deleted");
    Ok(())
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Slug unique per kind: append -1, -2, ... until free.
async fn unique_slug(
    pool: &Pool,
    kind: ContentKind,
    title: &str,
) -> Result<String, WorkflowError> {
    let base = slugify(title);
    let mut slug = base.clone();
    let mut count = 1;
    while db::fetch_content_by_slug(pool, kind, &slug).await?.is_some() {
        slug = format!("{base}-{count}");
        count += 1;
    }
    Ok(slug)
}
