//! Notification dispatcher interface, informed after each commit
use super::agreement::Agreement;
use super::types::{AgreementStatus, Role};
use parking_lot::Mutex;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    AgreementCreated,
    ParticipantAdded,
    ContentUpdated,
    SentForSignature,
    Signed,
    Activated,
    Witnessed,
    Cancelled,
    Withdrawn,
    Rejected,
    RejectionAccepted,
    Disputed,
    FriendlyArrangementProposed,
    FriendlyArrangementCountered,
    FriendlyArrangementAccepted,
    LegalResolutionTriggered,
    AmendmentRequested,
    AmendmentApproved,
    AmendmentRejected,
    CompletionRequested,
    Completed,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::AgreementCreated => "agreement_created",
            NotificationEvent::ParticipantAdded => "participant_added",
            NotificationEvent::ContentUpdated => "content_updated",
            NotificationEvent::SentForSignature => "sent_for_signature",
            NotificationEvent::Signed => "signed",
            NotificationEvent::Activated => "activated",
            NotificationEvent::Witnessed => "witnessed",
            NotificationEvent::Cancelled => "cancelled",
            NotificationEvent::Withdrawn => "withdrawn",
            NotificationEvent::Rejected => "rejected",
            NotificationEvent::RejectionAccepted => "rejection_accepted",
            NotificationEvent::Disputed => "disputed",
            NotificationEvent::FriendlyArrangementProposed => "friendly_arrangement_proposed",
            NotificationEvent::FriendlyArrangementCountered => "friendly_arrangement_countered",
            NotificationEvent::FriendlyArrangementAccepted => "friendly_arrangement_accepted",
            NotificationEvent::LegalResolutionTriggered => "legal_resolution_triggered",
            NotificationEvent::AmendmentRequested => "amendment_requested",
            NotificationEvent::AmendmentApproved => "amendment_approved",
            NotificationEvent::AmendmentRejected => "amendment_rejected",
            NotificationEvent::CompletionRequested => "completion_requested",
            NotificationEvent::Completed => "completed",
        }
    }

    /// Who hears about the event. Drafting events stay with the creator.
    pub fn recipients(&self, agreement: &Agreement) -> Vec<String> {
        let roles: &[Role] = match self {
            NotificationEvent::AgreementCreated
            | NotificationEvent::ParticipantAdded
            | NotificationEvent::ContentUpdated => &[Role::Creator],
            NotificationEvent::LegalResolutionTriggered => {
                &[Role::Creator, Role::Counterparty, Role::Witness]
            }
            NotificationEvent::AmendmentRequested => &[Role::Counterparty],
            NotificationEvent::AmendmentApproved | NotificationEvent::AmendmentRejected => {
                &[Role::Creator]
            }
            _ => &[Role::Creator, Role::Counterparty],
        };
        agreement.emails_for(roles)
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub agreement_id: String,
    pub title: String,
    pub status: AgreementStatus,
    pub actor_id: String,
    pub actor_email: String,
    pub case_number: Option<String>,
}

impl NotificationContext {
    pub fn new(agreement: &Agreement, actor_id: &str, actor_email: &str) -> Self {
        Self {
            agreement_id: agreement.id.clone(),
            title: agreement.title.clone(),
            status: agreement.status,
            actor_id: actor_id.to_string(),
            actor_email: actor_email.to_string(),
            case_number: agreement.case_number().map(str::to_string),
        }
    }
}

/// Outbound delivery collaborator.
///
/// Called once per committed transition. Implementations should hand work
/// off rather than block; an error is logged by the caller and never retried.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        event: NotificationEvent,
        recipients: &[String],
        context: &NotificationContext,
    ) -> anyhow::Result<()>;
}

/// Writes each notification as a tracing event.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        event: NotificationEvent,
        recipients: &[String],
        context: &NotificationContext,
    ) -> anyhow::Result<()> {
        info!(
            %event,
            agreement_id = %context.agreement_id,
            status = %context.status,
            recipients = recipients.len(),
            "notification dispatched"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub event: NotificationEvent,
    pub recipients: Vec<String>,
    pub context: NotificationContext,
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().iter().map(|n| n.event).collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(
        &self,
        event: NotificationEvent,
        recipients: &[String],
        context: &NotificationContext,
    ) -> anyhow::Result<()> {
        self.sent.lock().push(SentNotification {
            event,
            recipients: recipients.to_vec(),
            context: context.clone(),
        });
        Ok(())
    }
}
