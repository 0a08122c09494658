//! Thin service layer over `MailStore`/`HandoffStore` (spec.md §4.2).
//!
//! The injection-formatting contract needs both ports together, so it
//! lives here rather than on either port alone; everything else is a
//! pass-through to keep one call site for both concerns.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::MessagingError;
use crate::domain::models::{Handoff, MailMessage};
use crate::domain::ports::{HandoffStore, MailStore};

pub struct MailHandoffService {
    mail: Arc<dyn MailStore>,
    handoffs: Arc<dyn HandoffStore>,
}

impl MailHandoffService {
    pub fn new(mail: Arc<dyn MailStore>, handoffs: Arc<dyn HandoffStore>) -> Self {
        Self { mail, handoffs }
    }

    /// Exposes the underlying `HandoffStore`, for callers (the workflow
    /// engine) that need the port directly rather than through this
    /// service's pass-through methods.
    pub fn handoff_store(&self) -> Arc<dyn HandoffStore> {
        self.handoffs.clone()
    }

    pub async fn send(&self, from: &str, to: &str, body: &str, subject: Option<&str>) -> Result<Uuid, MessagingError> {
        Ok(self.mail.send(from, to, body, subject).await?)
    }

    pub async fn get_unread(&self, handle: &str) -> Result<Vec<MailMessage>, MessagingError> {
        Ok(self.mail.get_unread(handle).await?)
    }

    pub async fn mark_read(&self, mail_id: Uuid) -> Result<(), MessagingError> {
        Ok(self.mail.mark_read(mail_id).await?)
    }

    pub async fn create_handoff(&self, handoff: &Handoff) -> Result<(), MessagingError> {
        Ok(self.handoffs.create(handoff).await?)
    }

    pub async fn get_handoff(&self, id: Uuid) -> Result<Option<Handoff>, MessagingError> {
        Ok(self.handoffs.get(id).await?)
    }

    pub async fn accept_handoff(&self, id: Uuid) -> Result<bool, MessagingError> {
        Ok(self.handoffs.accept(id, Utc::now()).await?)
    }

    pub async fn reject_handoff(&self, id: Uuid) -> Result<bool, MessagingError> {
        Ok(self.handoffs.reject(id).await?)
    }

    /// Markdown block of `handle`'s unread mail plus pending handoffs, for
    /// prepending to a (re)spawned worker's initial prompt (spec.md §4.2,
    /// §4.5). Empty input renders an empty string so callers can splice
    /// unconditionally.
    pub async fn format_for_injection(&self, handle: &str) -> Result<String, MessagingError> {
        let mail = self.mail.get_unread(handle).await?;
        let handoffs = self.handoffs.get_pending(handle).await?;
        Ok(render_injection(&mail, &handoffs))
    }
}

fn render_injection(mail: &[MailMessage], handoffs: &[Handoff]) -> String {
    if mail.is_empty() && handoffs.is_empty() {
        return String::new();
    }

    let mut out = String::new();

    if !mail.is_empty() {
        out.push_str(&format!("## Pending Messages ({})\n", mail.len()));
        for message in mail {
            out.push_str(&format!("### From {}\n", message.from_handle));
            if let Some(subject) = &message.subject {
                out.push_str(&format!("**Subject:** {subject}\n"));
            }
            out.push_str(&message.body);
            out.push_str("\n\n");
        }
    }

    if !handoffs.is_empty() {
        out.push_str(&format!("## Pending Handoffs ({})\n", handoffs.len()));
        for handoff in handoffs {
            out.push_str(&format!("### From {}\n", handoff.from_handle));
            let pretty = serde_json::to_string_pretty(&handoff.context).unwrap_or_default();
            out.push_str("```json\n");
            out.push_str(&pretty);
            out.push_str("\n```\n\n");
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HandoffStatus;
    use chrono::Utc;

    #[test]
    fn empty_input_renders_empty_string() {
        assert_eq!(render_injection(&[], &[]), "");
    }

    #[test]
    fn renders_mail_section_with_subject() {
        let mail = vec![MailMessage {
            id: Uuid::new_v4(),
            from_handle: "alice".into(),
            to_handle: "bob".into(),
            subject: Some("status update".into()),
            body: "all green".into(),
            read_at: None,
            created_at: Utc::now(),
        }];
        let rendered = render_injection(&mail, &[]);
        assert!(rendered.starts_with("## Pending Messages (1)"));
        assert!(rendered.contains("### From alice"));
        assert!(rendered.contains("**Subject:** status update"));
        assert!(rendered.contains("all green"));
    }

    #[test]
    fn renders_handoff_section_with_pretty_json_context() {
        let handoffs = vec![Handoff {
            id: Uuid::new_v4(),
            from_handle: "carol".into(),
            to_handle: "bob".into(),
            context: serde_json::json!({"task": "review PR"}),
            checkpoint: None,
            status: HandoffStatus::Pending,
            outcome: None,
            accepted_at: None,
            created_at: Utc::now(),
        }];
        let rendered = render_injection(&[], &handoffs);
        assert!(rendered.starts_with("## Pending Handoffs (1)"));
        assert!(rendered.contains("### From carol"));
        assert!(rendered.contains("```json"));
        assert!(rendered.contains("\"task\": \"review PR\""));
    }
}
