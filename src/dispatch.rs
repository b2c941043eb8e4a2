//! Notification dispatcher: drains the broadcast ledger and performs
//! direct role-addressed sends.
//!
//! Broadcast jobs are at-most-once per publish event: the orchestrator
//! enqueues one job per first publish, and `processed` is a one-way flag
//! flipped only after every subscriber send succeeded. A job that fails
//! mid-send stays unprocessed and is retried on the next drain.

use crate::db::{self, Pool};
use crate::error::WorkflowError;
use crate::mailer::{self, Mailer};
use anyhow::Result;
use tracing::{info, instrument, warn};

/// Process up to `limit` unprocessed broadcast jobs. Returns how many jobs
/// were completed and marked processed. Safe to call concurrently: the
/// conditional flag update means a second drain finds nothing left to do.
#[instrument(skip_all)]
pub async fn drain_queue(
    pool: &Pool,
    mailer: &dyn Mailer,
    site_url: &str,
    limit: i64,
) -> Result<usize> {
    let jobs = db::unprocessed_jobs(pool, limit).await?;
    if jobs.is_empty() {
        return Ok(0);
    }
    let subscribers = db::active_subscribers(pool).await?;
    let mut completed = 0;
    for job in jobs {
        let subject = mailer::broadcast_subject(&job);
        let html = mailer::broadcast_html(&job, site_url);
        let mut failed = false;
        for recipient in &subscribers {
            if let Err(err) = mailer.send(recipient, &subject, &html).await {
                warn!(?err, job = job.id, recipient = %recipient, "broadcast send failed; job stays queued");
                failed = true;
                break;
            }
        }
        if failed {
            continue;
        }
        if db::mark_job_processed(pool, job.id).await? {
            info!(job = job.id, slug = %job.slug, "broadcast job processed");
            completed += 1;
        }
    }
    Ok(completed)
}

/// Unqueued role-addressed send. A failure is logged and surfaced as
/// `SendFailure`; callers never roll back persisted state because of it.
#[instrument(skip_all)]
pub async fn send_direct(
    mailer: &dyn Mailer,
    recipient: &str,
    subject: &str,
    html_body: &str,
) -> Result<(), WorkflowError> {
    match mailer.send(recipient, subject, html_body).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(?err, recipient, "direct send failed");
            Err(WorkflowError::SendFailure(err))
        }
    }
}
