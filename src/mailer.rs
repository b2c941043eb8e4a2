//! Outbound mail: the `Mailer` seam, the HTTP transport implementation and
//! the message templates. The daemon only composes recipients and bodies;
//! actual delivery is an external capability behind an HTTP endpoint.

use crate::config::Mail;
use crate::model::{ContentItem, NotificationJob};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    endpoint: Url,
    token: String,
    from_name: String,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpMailer {
    pub fn from_config(mail: &Mail) -> Result<Self> {
        let endpoint = Url::parse(&mail.endpoint).context("invalid mail.endpoint URL")?;
        Ok(Self::with_endpoint(
            endpoint,
            mail.token.clone(),
            mail.from_name.clone(),
        ))
    }

    pub fn with_endpoint(endpoint: Url, token: String, from_name: String) -> Self {
        let http = Client::builder()
            .user_agent("reviewd/0.1")
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint,
            token,
            from_name,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<()> {
        let body = json!({
            "from": self.from_name,
            "to": recipient,
            "subject": subject,
            "html": html_body,
        });
        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("mail endpoint unreachable")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("mail endpoint returned {status}: {text}"));
        }
        Ok(())
    }
}

// ---- templates ----

pub fn broadcast_subject(job: &NotificationJob) -> String {
    format!("New blog published: {}", job.title)
}

pub fn broadcast_html(job: &NotificationJob, site_url: &str) -> String {
    let excerpt = job
        .excerpt
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or("A new blog has been published. Click below to read it.");
    format!(
        r#"<div style="font-family:Arial,Helvetica,sans-serif;background:#f4f6fb;padding:30px">
  <div style="max-width:600px;margin:auto;background:#fff;border-radius:12px;padding:28px">
    <h1 style="margin:0 0 12px;font-size:26px;color:#0f172a">{title}</h1>
    <p style="font-size:16px;line-height:1.6;color:#334155;margin-bottom:26px">{excerpt}</p>
    <a href="{site_url}/blog/{slug}"
       style="display:inline-block;background:#2563eb;color:#fff;text-decoration:none;padding:14px 26px;border-radius:10px;font-weight:600">
      Read Full Blog
    </a>
    <p style="margin-top:36px;font-size:12px;color:#94a3b8">
      You received this email because you subscribed to blog updates.
    </p>
  </div>
</div>"#,
        title = job.title,
        excerpt = excerpt,
        site_url = site_url.trim_end_matches('/'),
        slug = job.slug,
    )
}

pub fn submission_subject(item: &ContentItem) -> String {
    match item.is_edited {
        true => format!("Blog resubmitted for review: {}", item.title),
        false => format!("Blog submitted for review: {}", item.title),
    }
}

pub fn submission_html(item: &ContentItem, author_email: &str) -> String {
    let note = item
        .submission_note
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("<p><b>Author's note:</b> {n}</p>"))
        .unwrap_or_default();
    format!(
        "<p><b>{title}</b> by {author} is waiting for review.</p>{note}",
        title = item.title,
        author = author_email,
        note = note,
    )
}

pub fn decision_subject(item: &ContentItem, approved: bool) -> String {
    match approved {
        true => format!("Your blog was approved: {}", item.title),
        false => format!("Your blog needs changes: {}", item.title),
    }
}

pub fn decision_html(item: &ContentItem, approved: bool, site_url: &str) -> String {
    let feedback = item
        .admin_feedback
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(|f| format!("<p><b>Moderator feedback:</b> {f}</p>"))
        .unwrap_or_default();
    if approved {
        format!(
            r#"<p>Good news — <b>{title}</b> has been approved and is now live.</p>
{feedback}<p><a href="{site_url}/blog/{slug}">View it here</a>.</p>"#,
            title = item.title,
            feedback = feedback,
            site_url = site_url.trim_end_matches('/'),
            slug = item.slug,
        )
    } else {
        format!(
            "<p><b>{title}</b> was not approved this time.</p>{feedback}\
             <p>You can edit and resubmit it from your dashboard.</p>",
            title = item.title,
            feedback = feedback,
        )
    }
}

pub fn invite_subject(content_title: &str) -> String {
    format!("You've been invited to collaborate on \"{content_title}\"")
}

pub fn invite_html(content_title: &str, inviter_email: &str, token: &str, site_url: &str) -> String {
    format!(
        r#"<p>{inviter} invited you to collaborate on <b>{title}</b>.</p>
<p><a href="{site_url}/accept-invite?token={token}">Accept the invitation</a>
(link expires in 48 hours).</p>"#,
        inviter = inviter_email,
        title = content_title,
        site_url = site_url.trim_end_matches('/'),
        token = token,
    )
}
