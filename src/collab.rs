//! Collaboration registry: invitations and accepted memberships.
//!
//! Invitations are user-initiated, so their emails are direct at-least-once
//! sends, not ledger-gated. Acceptance is idempotent: a token resolves to
//! at most one membership no matter how often it is redeemed.

use crate::config::Mail;
use crate::db::{self, Pool};
use crate::error::WorkflowError;
use crate::mailer::{self, Mailer};
use crate::model::{Actor, Collaborator, ContentKind, Invitation, Role};
use crate::workflow;
use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVITE_TTL_HOURS: i64 = 48;

/// Invite an existing account to collaborate on a content item. Only someone
/// with a role on the item (moderator, author, or admitted collaborator) may
/// invite. The invitee must already have an account; the invitation email is
/// best-effort and a send failure does not undo the persisted invitation.
#[instrument(skip_all)]
pub async fn invite(
    pool: &Pool,
    mailer: &dyn Mailer,
    mail_cfg: &Mail,
    content_id: i64,
    email: &str,
    invited_by: i64,
) -> Result<Invitation, WorkflowError> {
    let item = db::fetch_content(pool, content_id)
        .await?
        .ok_or(WorkflowError::NotFound)?;
    let inviter = db::find_user(pool, invited_by)
        .await?
        .ok_or(WorkflowError::Forbidden)?;
    let inviter_actor = Actor {
        user_id: inviter.id,
        is_moderator: inviter.is_admin,
    };
    if workflow::resolve_role(pool, &item, inviter_actor).await? == Role::None {
        return Err(WorkflowError::Forbidden);
    }
    let invitee = db::find_user_by_email(pool, email)
        .await?
        .ok_or_else(|| WorkflowError::UnknownRecipient(email.to_string()))?;

    let token = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::hours(INVITE_TTL_HOURS);
    let id = db::insert_invitation(
        pool,
        content_id,
        item.kind,
        email,
        invitee.id,
        invited_by,
        &token,
        expires_at,
    )
    .await?;
    info!(invitation = id, content = content_id, "invitation created");

    let subject = mailer::invite_subject(&item.title);
    let html = mailer::invite_html(&item.title, &inviter.email, &token, &mail_cfg.site_url);
    if let Err(err) = mailer.send(email, &subject, &html).await {
        warn!(?err, invitation = id, "invite email failed; invitation stands");
    }

    db::find_invitation_by_token(pool, &token)
        .await?
        .ok_or(WorkflowError::InvalidToken)
}

/// Redeem an invitation token. Unknown or expired tokens fail with
/// `InvalidToken`; an already-accepted token returns the existing
/// membership without error.
#[instrument(skip_all)]
pub async fn accept(
    pool: &Pool,
    token: &str,
    user_id: i64,
) -> Result<Collaborator, WorkflowError> {
    let invitation = db::find_invitation_by_token(pool, token)
        .await?
        .ok_or(WorkflowError::InvalidToken)?;
    if invitation.expires_at < Utc::now() {
        return Err(WorkflowError::InvalidToken);
    }

    if invitation.accepted {
        let member = invitation.invited_user_id.unwrap_or(user_id);
        return Ok(Collaborator {
            content_id: invitation.content_id,
            content_kind: invitation.content_kind,
            user_id: member,
        });
    }

    // Conditional flip; a lost race means a concurrent (or retried) accept
    // already handled this token.
    let claimed = db::mark_invitation_accepted(pool, invitation.id, user_id).await?;
    if claimed {
        db::insert_collaborator(pool, invitation.content_id, invitation.content_kind, user_id)
            .await?;
        info!(
            invitation = invitation.id,
            content = invitation.content_id,
            user = user_id,
            "collaborator admitted"
        );
        return Ok(Collaborator {
            content_id: invitation.content_id,
            content_kind: invitation.content_kind,
            user_id,
        });
    }

    // Somebody else claimed the token between our read and the flip. The
    // membership on record belongs to whoever won, not the caller.
    let settled = db::find_invitation_by_token(pool, token)
        .await?
        .ok_or(WorkflowError::InvalidToken)?;
    Ok(Collaborator {
        content_id: settled.content_id,
        content_kind: settled.content_kind,
        user_id: settled.invited_user_id.unwrap_or(user_id),
    })
}

/// Whether `user_id` was admitted as a collaborator on the given item.
pub async fn is_collaborator(
    pool: &Pool,
    content_id: i64,
    content_kind: ContentKind,
    user_id: i64,
) -> Result<bool, WorkflowError> {
    Ok(db::is_collaborator(pool, content_id, content_kind, user_id).await?)
}
