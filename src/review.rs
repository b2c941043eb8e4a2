//! Pure review state machine: computes the next status and field set for a
//! (content item, role, action) triple. No I/O; persistence and
//! notifications are the orchestrator's job.

use crate::error::WorkflowError;
use crate::model::{ContentItem, ContentKind, ReviewStatus, Role};

/// Replacement text carried by an edit. The state machine never inspects
/// it; it is applied by the store together with the computed outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub title: String,
    pub body: String,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Author or collaborator sends a community draft into review.
    Submit,
    /// Moderator decision. Feedback is optional.
    Approve { feedback: Option<String> },
    /// Moderator decision. The feedback field is required but may be empty.
    Reject { feedback: String },
    /// Author, collaborator or moderator changes the content. A non-empty
    /// note is required when this forces a resubmission.
    Edit { revision: Revision, note: Option<String> },
    /// Moderator takes a personal item back off the public site.
    Unpublish,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Approve { .. } => "approve",
            Action::Reject { .. } => "reject",
            Action::Edit { .. } => "edit",
            Action::Unpublish => "unpublish",
        }
    }

    pub fn revision(&self) -> Option<&Revision> {
        match self {
            Action::Edit { revision, .. } => Some(revision),
            _ => None,
        }
    }
}

/// Complete next value for every workflow-owned field. `first_publish` is
/// true only on the transition that sets `published_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ReviewStatus,
    pub published: bool,
    pub is_edited: bool,
    pub submission_note: Option<String>,
    pub admin_feedback: Option<String>,
    pub first_publish: bool,
}

impl Outcome {
    fn keep(item: &ContentItem) -> Self {
        Outcome {
            status: item.status,
            published: item.published,
            is_edited: item.is_edited,
            submission_note: item.submission_note.clone(),
            admin_feedback: item.admin_feedback.clone(),
            first_publish: false,
        }
    }

    /// True when applying this outcome would not change the record's
    /// workflow fields. Re-applied decisions short-circuit here, which is
    /// what makes orchestrator retries safe.
    pub fn is_noop(&self, item: &ContentItem) -> bool {
        self.status == item.status
            && self.published == item.published
            && self.is_edited == item.is_edited
            && self.submission_note == item.submission_note
            && self.admin_feedback == item.admin_feedback
            && !self.first_publish
    }
}

/// Whether the given actor's next edit must carry a submission note.
/// Frontends render this as a prompt; the machine enforces it.
pub fn requires_note(item: &ContentItem, role: Role) -> bool {
    matches!(role, Role::Author | Role::Collaborator)
        && matches!(item.status, ReviewStatus::Approved | ReviewStatus::Rejected)
}

pub fn transition(
    item: &ContentItem,
    role: Role,
    action: &Action,
) -> Result<Outcome, WorkflowError> {
    match action {
        Action::Submit => submit(item, role),
        Action::Approve { feedback } => approve(item, role, feedback.clone()),
        Action::Reject { feedback } => reject(item, role, feedback.clone()),
        Action::Edit { note, .. } => edit(item, role, note.as_deref()),
        Action::Unpublish => unpublish(item, role),
    }
}

fn invalid(item: &ContentItem, action: &'static str) -> WorkflowError {
    WorkflowError::InvalidTransition {
        from: item.status,
        action,
    }
}

fn submit(item: &ContentItem, role: Role) -> Result<Outcome, WorkflowError> {
    if !matches!(role, Role::Author | Role::Collaborator) {
        return Err(WorkflowError::Forbidden);
    }
    if item.kind != ContentKind::Community {
        return Err(invalid(item, "submit"));
    }
    match item.status {
        ReviewStatus::Draft => Ok(Outcome {
            status: ReviewStatus::Submitted,
            published: false,
            is_edited: false,
            submission_note: None,
            admin_feedback: item.admin_feedback.clone(),
            first_publish: false,
        }),
        // Retried submission of an already-submitted item.
        ReviewStatus::Submitted => Ok(Outcome::keep(item)),
        _ => Err(invalid(item, "submit")),
    }
}

fn approve(
    item: &ContentItem,
    role: Role,
    feedback: Option<String>,
) -> Result<Outcome, WorkflowError> {
    if role != Role::Moderator {
        return Err(WorkflowError::Forbidden);
    }
    let first = item.published_at.is_none();
    match item.status {
        ReviewStatus::Submitted | ReviewStatus::Resubmitted => Ok(Outcome {
            status: ReviewStatus::Approved,
            published: true,
            // Edited-since-publish marker: only meaningful when the item
            // had been public before this approval.
            is_edited: !first,
            submission_note: None,
            admin_feedback: feedback,
            first_publish: first,
        }),
        // Personal items publish straight from draft.
        ReviewStatus::Draft if item.kind == ContentKind::Personal => Ok(Outcome {
            status: ReviewStatus::Approved,
            published: true,
            is_edited: false,
            submission_note: None,
            admin_feedback: feedback,
            first_publish: first,
        }),
        // Re-applied decision.
        ReviewStatus::Approved => Ok(Outcome::keep(item)),
        _ => Err(invalid(item, "approve")),
    }
}

fn reject(
    item: &ContentItem,
    role: Role,
    feedback: String,
) -> Result<Outcome, WorkflowError> {
    if role != Role::Moderator {
        return Err(WorkflowError::Forbidden);
    }
    match item.status {
        ReviewStatus::Submitted | ReviewStatus::Resubmitted => Ok(Outcome {
            status: ReviewStatus::Rejected,
            published: false,
            is_edited: item.is_edited,
            submission_note: item.submission_note.clone(),
            admin_feedback: Some(feedback),
            first_publish: false,
        }),
        // Re-applied decision.
        ReviewStatus::Rejected => Ok(Outcome::keep(item)),
        _ => Err(invalid(item, "reject")),
    }
}

fn edit(item: &ContentItem, role: Role, note: Option<&str>) -> Result<Outcome, WorkflowError> {
    match role {
        // Moderators do not resubmit to themselves: the edit lands with the
        // status the item already has.
        Role::Moderator => Ok(Outcome::keep(item)),
        Role::Author | Role::Collaborator => match item.status {
            ReviewStatus::Approved | ReviewStatus::Rejected => {
                let note = note.map(str::trim).unwrap_or_default();
                if note.is_empty() {
                    return Err(WorkflowError::MissingRequiredNote);
                }
                Ok(Outcome {
                    status: ReviewStatus::Resubmitted,
                    // An approved item keeps its previous content publicly
                    // visible until the moderator re-approves.
                    published: item.published,
                    is_edited: true,
                    submission_note: Some(note.to_string()),
                    admin_feedback: item.admin_feedback.clone(),
                    first_publish: false,
                })
            }
            ReviewStatus::Draft | ReviewStatus::Submitted | ReviewStatus::Resubmitted => {
                let mut out = Outcome::keep(item);
                if let Some(n) = note.map(str::trim).filter(|n| !n.is_empty()) {
                    out.submission_note = Some(n.to_string());
                }
                Ok(out)
            }
        },
        Role::None => Err(WorkflowError::Forbidden),
    }
}

fn unpublish(item: &ContentItem, role: Role) -> Result<Outcome, WorkflowError> {
    if role != Role::Moderator {
        return Err(WorkflowError::Forbidden);
    }
    if item.kind != ContentKind::Personal {
        return Err(invalid(item, "unpublish"));
    }
    match item.status {
        // published_at survives: it records the first publish, permanently.
        ReviewStatus::Approved => Ok(Outcome {
            status: ReviewStatus::Draft,
            published: false,
            is_edited: false,
            submission_note: None,
            admin_feedback: item.admin_feedback.clone(),
            first_publish: false,
        }),
        ReviewStatus::Draft => Ok(Outcome::keep(item)),
        _ => Err(invalid(item, "unpublish")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(kind: ContentKind, status: ReviewStatus) -> ContentItem {
        ContentItem {
            id: 1,
            kind,
            title: "t".into(),
            slug: "t".into(),
            body: "b".into(),
            excerpt: None,
            status,
            published: status == ReviewStatus::Approved,
            is_edited: false,
            submission_note: None,
            admin_feedback: None,
            author_id: 2,
            created_at: Utc::now(),
            updated_at: None,
            published_at: None,
        }
    }

    fn rev() -> Revision {
        Revision {
            title: "t2".into(),
            body: "b2".into(),
            excerpt: None,
        }
    }

    #[test]
    fn community_draft_submits() {
        let it = item(ContentKind::Community, ReviewStatus::Draft);
        let out = transition(&it, Role::Author, &Action::Submit).unwrap();
        assert_eq!(out.status, ReviewStatus::Submitted);
        assert!(!out.published);
        assert!(out.submission_note.is_none());
    }

    #[test]
    fn personal_items_do_not_submit() {
        let it = item(ContentKind::Personal, ReviewStatus::Draft);
        let err = transition(&it, Role::Author, &Action::Submit).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn moderator_cannot_submit() {
        let it = item(ContentKind::Community, ReviewStatus::Draft);
        let err = transition(&it, Role::Moderator, &Action::Submit).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden));
    }

    #[test]
    fn approve_first_publish() {
        let it = item(ContentKind::Community, ReviewStatus::Submitted);
        let out = transition(&it, Role::Moderator, &Action::Approve { feedback: None }).unwrap();
        assert_eq!(out.status, ReviewStatus::Approved);
        assert!(out.published);
        assert!(out.first_publish);
        assert!(!out.is_edited);
    }

    #[test]
    fn approve_after_resubmission_flags_edited() {
        let mut it = item(ContentKind::Community, ReviewStatus::Resubmitted);
        it.published = true;
        it.published_at = Some(Utc::now());
        it.submission_note = Some("fixed typos".into());
        let out = transition(&it, Role::Moderator, &Action::Approve { feedback: None }).unwrap();
        assert_eq!(out.status, ReviewStatus::Approved);
        assert!(out.is_edited);
        assert!(!out.first_publish);
        assert!(out.submission_note.is_none());
    }

    #[test]
    fn approve_requires_moderator() {
        let it = item(ContentKind::Community, ReviewStatus::Submitted);
        for role in [Role::Author, Role::Collaborator, Role::None] {
            let err =
                transition(&it, role, &Action::Approve { feedback: None }).unwrap_err();
            assert!(matches!(err, WorkflowError::Forbidden));
        }
    }

    #[test]
    fn reject_keeps_unpublished_and_stores_feedback() {
        let it = item(ContentKind::Community, ReviewStatus::Submitted);
        let out = transition(
            &it,
            Role::Moderator,
            &Action::Reject {
                feedback: "needs citations".into(),
            },
        )
        .unwrap();
        assert_eq!(out.status, ReviewStatus::Rejected);
        assert!(!out.published);
        assert_eq!(out.admin_feedback.as_deref(), Some("needs citations"));
    }

    #[test]
    fn reject_feedback_may_be_empty() {
        let it = item(ContentKind::Community, ReviewStatus::Resubmitted);
        let out = transition(
            &it,
            Role::Moderator,
            &Action::Reject {
                feedback: String::new(),
            },
        )
        .unwrap();
        assert_eq!(out.admin_feedback.as_deref(), Some(""));
    }

    #[test]
    fn edit_of_approved_item_needs_note() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let err = transition(
            &it,
            Role::Collaborator,
            &Action::Edit {
                revision: rev(),
                note: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingRequiredNote));

        let err = transition(
            &it,
            Role::Collaborator,
            &Action::Edit {
                revision: rev(),
                note: Some("   ".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingRequiredNote));
    }

    #[test]
    fn edit_of_approved_item_resubmits_but_stays_public() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let out = transition(
            &it,
            Role::Author,
            &Action::Edit {
                revision: rev(),
                note: Some("reworked intro".into()),
            },
        )
        .unwrap();
        assert_eq!(out.status, ReviewStatus::Resubmitted);
        assert!(out.published);
        assert!(out.is_edited);
        assert_eq!(out.submission_note.as_deref(), Some("reworked intro"));
    }

    #[test]
    fn edit_of_rejected_item_stays_unpublished() {
        let it = item(ContentKind::Community, ReviewStatus::Rejected);
        let out = transition(
            &it,
            Role::Author,
            &Action::Edit {
                revision: rev(),
                note: Some("addressed feedback".into()),
            },
        )
        .unwrap();
        assert_eq!(out.status, ReviewStatus::Resubmitted);
        assert!(!out.published);
    }

    #[test]
    fn draft_edit_needs_no_note() {
        let it = item(ContentKind::Community, ReviewStatus::Draft);
        let out = transition(
            &it,
            Role::Author,
            &Action::Edit {
                revision: rev(),
                note: None,
            },
        )
        .unwrap();
        assert_eq!(out.status, ReviewStatus::Draft);
    }

    #[test]
    fn moderator_edit_bypasses_resubmission() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let out = transition(
            &it,
            Role::Moderator,
            &Action::Edit {
                revision: rev(),
                note: None,
            },
        )
        .unwrap();
        assert_eq!(out.status, ReviewStatus::Approved);
        assert!(out.published);
        assert!(out.is_noop(&it));
    }

    #[test]
    fn personal_unpublish_round_trip() {
        let mut it = item(ContentKind::Personal, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let out = transition(&it, Role::Moderator, &Action::Unpublish).unwrap();
        assert_eq!(out.status, ReviewStatus::Draft);
        assert!(!out.published);
        // published_at is not part of the outcome: the store never clears it.
    }

    #[test]
    fn community_unpublish_is_invalid() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let err = transition(&it, Role::Moderator, &Action::Unpublish).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn reapplied_decisions_are_noops() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        let out = transition(&it, Role::Moderator, &Action::Approve { feedback: None }).unwrap();
        assert!(out.is_noop(&it));

        let mut it = item(ContentKind::Community, ReviewStatus::Rejected);
        it.admin_feedback = Some("no".into());
        let out = transition(
            &it,
            Role::Moderator,
            &Action::Reject {
                feedback: "no".into(),
            },
        )
        .unwrap();
        assert!(out.is_noop(&it));
    }

    #[test]
    fn requires_note_matches_edit_gate() {
        let mut it = item(ContentKind::Community, ReviewStatus::Approved);
        it.published_at = Some(Utc::now());
        assert!(requires_note(&it, Role::Author));
        assert!(requires_note(&it, Role::Collaborator));
        assert!(!requires_note(&it, Role::Moderator));
        let it = item(ContentKind::Community, ReviewStatus::Draft);
        assert!(!requires_note(&it, Role::Author));
    }
}
