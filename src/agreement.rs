//! Agreement records, participants and the dispute/amendment sub-records they embed
use super::capability::Actor;
use super::error::LifecycleError;
use super::types::{AgreementStatus, AmendmentStatus, DeviceClass, Role, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    #[n(0)]
    pub role: Role,
    #[n(1)]
    pub account_id: Option<String>,
    #[n(2)]
    pub email: Option<String>, // invitees without an account are known by email only
    #[n(3)]
    pub name: Option<String>,
    #[n(4)]
    pub added_at: TimeStamp<Utc>,
}

impl Participant {
    /// Matches on account id, or on email case-insensitively.
    pub fn matches(&self, actor: &Actor) -> bool {
        let by_id = matches!(&self.account_id, Some(id) if *id == actor.id);
        let by_email = matches!(&self.email, Some(email) if !actor.email.is_empty() && email.eq_ignore_ascii_case(&actor.email));
        by_id || by_email
    }
}

/// Client fingerprint captured alongside rejection and dispute evidence.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint {
    #[n(0)]
    pub ip_address: String,
    #[n(1)]
    pub user_agent: String,
    #[n(2)]
    pub platform: String,
    #[n(3)]
    pub device_class: DeviceClass,
    #[n(4)]
    pub captured_at: TimeStamp<Utc>,
}

impl ClientFingerprint {
    pub fn capture(ip_address: &str, user_agent: &str, platform: &str) -> Self {
        let or_unknown = |value: &str| {
            let value = value.trim();
            if value.is_empty() {
                "unknown".to_string()
            } else {
                value.to_string()
            }
        };
        // forwarded headers may carry a chain, the first hop is the client
        let ip = ip_address.split(',').next().unwrap_or_default();

        Self {
            ip_address: or_unknown(ip),
            user_agent: or_unknown(user_agent),
            platform: or_unknown(platform),
            device_class: DeviceClass::from_user_agent(user_agent),
            captured_at: TimeStamp::new(),
        }
    }
}

/// An uploaded evidence file as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceFile {
    pub name: String,
    pub media_type: String,
    pub data: String, // data url
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub media_type: String,
    #[n(2)]
    pub data: String,
    #[n(3)]
    pub fingerprint: ClientFingerprint,
}

impl Evidence {
    pub fn attach(files: &[EvidenceFile], fingerprint: &ClientFingerprint) -> Vec<Evidence> {
        files
            .iter()
            .map(|file| Evidence {
                name: file.name.clone(),
                media_type: file.media_type.clone(),
                data: file.data.clone(),
                fingerprint: fingerprint.clone(),
            })
            .collect()
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    #[n(0)]
    pub rejected_by: String,
    #[n(1)]
    pub reason: String,
    #[n(2)]
    pub rejected_at: TimeStamp<Utc>,
    #[n(3)]
    pub evidence: Vec<Evidence>,
    #[n(4)]
    pub raised_in: AgreementStatus,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DisputeCase {
    #[n(0)]
    pub triggered_by: String,
    #[n(1)]
    pub reason: String,
    #[n(2)]
    pub evidence: Vec<Evidence>,
    #[n(3)]
    pub opened_at: TimeStamp<Utc>,
    #[n(4)]
    pub case_number: Option<String>,
    #[n(5)]
    pub escalated_by: Option<String>,
    #[n(6)]
    pub escalated_at: Option<TimeStamp<Utc>>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendlyResponseKind {
    #[n(0)]
    Accepted,
    #[n(1)]
    Conditional,
    #[n(2)]
    Rejected,
}

impl FriendlyResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendlyResponseKind::Accepted => "accepted",
            FriendlyResponseKind::Conditional => "conditional",
            FriendlyResponseKind::Rejected => "rejected",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FriendlyResponseRecord {
    #[n(0)]
    pub responded_by: String,
    #[n(1)]
    pub responded_at: TimeStamp<Utc>,
    #[n(2)]
    pub kind: FriendlyResponseKind,
    #[n(3)]
    pub conditions: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FriendlyArrangement {
    #[n(0)]
    pub proposed_by: String,
    #[n(1)]
    pub proposed_at: TimeStamp<Utc>,
    #[n(2)]
    pub terms: String,
    #[n(3)]
    pub round: u32,
    #[n(4)]
    pub last_response: Option<FriendlyResponseRecord>,
    #[n(5)]
    pub accepted_terms: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct AmendmentRequest {
    #[n(0)]
    pub status: AmendmentStatus,
    #[n(1)]
    pub requested_by: Option<String>,
    #[n(2)]
    pub requested_at: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub reason: Option<String>,
    #[n(4)]
    pub proposed_changes: Option<String>,
    #[n(5)]
    pub responded_by: Option<String>,
    #[n(6)]
    pub responded_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub response: Option<String>,
}

impl AmendmentRequest {
    pub fn is_pending(&self) -> bool {
        self.status == AmendmentStatus::Pending
    }
}

/// Who ended the agreement early, when, and why.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    #[n(0)]
    pub by: String,
    #[n(1)]
    pub at: TimeStamp<Utc>,
    #[n(2)]
    pub reason: String,
}

/// A superseded version, archived when an amendment is approved.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    #[n(0)]
    pub version: u32,
    #[n(1)]
    pub content_digest: String,
    #[n(2)]
    pub superseded_at: TimeStamp<Utc>,
    #[n(3)]
    pub amendment_reason: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub creator_id: String,
    #[n(2)]
    pub creator_email: String,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub content: String,
    #[n(5)]
    pub status: AgreementStatus,
    #[n(6)]
    pub is_locked: bool,
    #[n(7)]
    pub version: u32, // bumped on approved amendment
    #[n(8)]
    pub revision: u64, // bumped on every committed write
    #[n(9)]
    pub participants: Vec<Participant>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub updated_at: TimeStamp<Utc>,
    #[n(12)]
    pub sent_for_signature_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub activated_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub witnessed: bool,
    #[n(15)]
    pub rejection: Option<Rejection>,
    #[n(16)]
    pub dispute: Option<DisputeCase>,
    #[n(17)]
    pub friendly: Option<FriendlyArrangement>,
    #[n(18)]
    pub amendment: AmendmentRequest,
    #[n(19)]
    pub cancellation: Option<Termination>,
    #[n(20)]
    pub withdrawal: Option<Termination>,
    #[n(21)]
    pub completion_requested_by: Option<String>,
    #[n(22)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(23)]
    pub signature_keys: Vec<String>, // every version, in signing order
    #[n(24)]
    pub audit_len: u64,
    #[n(25)]
    pub audit_head: Option<String>, // hash of the latest audit entry
    #[n(26)]
    pub history: Vec<VersionRecord>,
}

impl Agreement {
    pub fn new(id: String, creator: &Actor, title: String, content: String) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            creator_id: creator.id.clone(),
            creator_email: creator.email.clone(),
            title,
            content,
            status: AgreementStatus::Draft,
            is_locked: false,
            version: 1,
            revision: 0,
            participants: vec![],
            created_at: now.clone(),
            updated_at: now,
            sent_for_signature_at: None,
            activated_at: None,
            witnessed: false,
            rejection: None,
            dispute: None,
            friendly: None,
            amendment: AmendmentRequest::default(),
            cancellation: None,
            withdrawal: None,
            completion_requested_by: None,
            completed_at: None,
            signature_keys: vec![],
            audit_len: 0,
            audit_head: None,
            history: vec![],
        }
    }

    pub fn participants_with(&self, role: Role) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.role == role)
    }

    pub fn has_counterparty(&self) -> bool {
        self.participants_with(Role::Counterparty).next().is_some()
    }

    /// Emails of the creator and every participant holding one of `roles`.
    pub fn emails_for(&self, roles: &[Role]) -> Vec<String> {
        let mut emails = vec![];
        if roles.contains(&Role::Creator) && !self.creator_email.is_empty() {
            emails.push(self.creator_email.clone());
        }
        for participant in &self.participants {
            if !roles.contains(&participant.role) {
                continue;
            }
            if let Some(email) = &participant.email {
                if !emails.iter().any(|e: &String| e.eq_ignore_ascii_case(email)) {
                    emails.push(email.clone());
                }
            }
        }
        emails
    }

    /// An unresolved rejection or dispute reason, as required for legal escalation.
    pub fn has_open_grievance(&self) -> bool {
        self.rejection.is_some() || self.dispute.is_some()
    }

    /// Whether any version of the agreement carries a signature in `role`.
    pub fn has_signature_from(&self, role: Role) -> bool {
        self.signature_keys
            .iter()
            .any(|key| key.split('/').nth(2) == Some(role.as_str()))
    }

    pub fn case_number(&self) -> Option<&str> {
        self.dispute.as_ref().and_then(|d| d.case_number.as_deref())
    }

    pub fn content_digest(&self) -> String {
        sha256::digest(self.content.as_bytes())
    }
}

/// An invitation to join an agreement as counterparty or witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInvite {
    pub role: Role,
    pub account_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl ParticipantInvite {
    pub fn counterparty(email: &str) -> Self {
        Self {
            role: Role::Counterparty,
            account_id: None,
            email: Some(email.to_string()),
            name: None,
        }
    }
    pub fn witness(email: &str) -> Self {
        Self {
            role: Role::Witness,
            ..Self::counterparty(email)
        }
    }
    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.role == Role::Creator {
            return Err(LifecycleError::Validation(
                "The creator role cannot be assigned to a participant".into(),
            ));
        }
        let has_id = self.account_id.as_deref().is_some_and(|id| !id.trim().is_empty());
        let has_email = self.email.as_deref().is_some_and(|e| e.contains('@'));
        if !has_id && !has_email {
            return Err(LifecycleError::Validation(
                "A participant needs an account id or a valid email".into(),
            ));
        }
        Ok(())
    }

    pub fn into_participant(self) -> Participant {
        Participant {
            role: self.role,
            account_id: self.account_id,
            email: self.email,
            name: self.name,
            added_at: TimeStamp::new(),
        }
    }
}

// Used for constructing drafts before the first write
#[derive(Debug, Default, Clone)]
pub struct AgreementDraft {
    title: Option<String>,
    content: Option<String>,
    invites: Vec<ParticipantInvite>,
}

impl AgreementDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }
    pub fn invite(mut self, invite: ParticipantInvite) -> Self {
        self.invites.push(invite);
        self
    }

    /// Checks the draft fields and builds the initial `draft` agreement.
    pub fn validate_and_finalise(self, id: String, creator: &Actor) -> Result<Agreement, LifecycleError> {
        let title = match self.title {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err(LifecycleError::Validation("Agreement title is required".into())),
        };
        let content = self.content.unwrap_or_default();

        let mut agreement = Agreement::new(id, creator, title, content);
        for invite in self.invites {
            super::capability::admit_participant(&mut agreement, invite)?;
        }
        Ok(agreement)
    }
}
