//! Agreement state machine
//!
//! [`evaluate`] is a pure function of the agreement row, the signatures of
//! its current version, the acting party and a permission snapshot. It
//! returns the next row together with the signature and audit entry to
//! write, and never touches storage. The store runs it inside the
//! transaction that persists the result, so every guard is checked against
//! the state being replaced.
//!
//! Checks run in a fixed order:
//! 1. the `(status, action)` pair must be in [`TRANSITIONS`]
//! 2. the hard role rule of the action
//! 3. the permission matrix
//! 4. the action's own guards
use super::agreement::{Agreement, ParticipantInvite, Termination};
use super::amendment;
use super::audit::AuditDraft;
use super::capability::{admit_participant, Actor, Capabilities};
use super::dispute::{self, FriendlyResponse, Grounds};
use super::error::LifecycleError;
use super::ledger::{self, SignaturePayload, SignatureRecord};
use super::notify::NotificationEvent;
use super::permissions::{PermissionAction, PermissionSnapshot};
use super::types::{AgreementStatus, PartyRole, Role, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SendForSignature,
    Cancel,
    Withdraw,
    Sign,
    WitnessSign,
    Reject,
    AcceptRejection,
    DisputeRejection,
    ProposeFriendlyArrangement,
    RespondFriendlyArrangement,
    TriggerLegalResolution,
    RequestAmendment,
    RespondAmendment,
    RequestCompletion,
    ConfirmCompletion,
}

impl ActionKind {
    pub const ALL: [ActionKind; 15] = [
        ActionKind::SendForSignature,
        ActionKind::Cancel,
        ActionKind::Withdraw,
        ActionKind::Sign,
        ActionKind::WitnessSign,
        ActionKind::Reject,
        ActionKind::AcceptRejection,
        ActionKind::DisputeRejection,
        ActionKind::ProposeFriendlyArrangement,
        ActionKind::RespondFriendlyArrangement,
        ActionKind::TriggerLegalResolution,
        ActionKind::RequestAmendment,
        ActionKind::RespondAmendment,
        ActionKind::RequestCompletion,
        ActionKind::ConfirmCompletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendForSignature => "send_for_signature",
            ActionKind::Cancel => "cancel",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Sign => "sign",
            ActionKind::WitnessSign => "witness_sign",
            ActionKind::Reject => "reject",
            ActionKind::AcceptRejection => "accept_rejection",
            ActionKind::DisputeRejection => "dispute_rejection",
            ActionKind::ProposeFriendlyArrangement => "propose_friendly_arrangement",
            ActionKind::RespondFriendlyArrangement => "respond_friendly_arrangement",
            ActionKind::TriggerLegalResolution => "trigger_legal_resolution",
            ActionKind::RequestAmendment => "request_amendment",
            ActionKind::RespondAmendment => "respond_amendment",
            ActionKind::RequestCompletion => "request_completion",
            ActionKind::ConfirmCompletion => "confirm_completion",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ActionKind::SendForSignature => "send the agreement for signature",
            ActionKind::Cancel => "cancel the agreement",
            ActionKind::Withdraw => "withdraw the agreement",
            ActionKind::Sign => "sign the agreement",
            ActionKind::WitnessSign => "witness the agreement",
            ActionKind::Reject => "reject an agreement awaiting signature",
            ActionKind::AcceptRejection => "accept a rejection",
            ActionKind::DisputeRejection => "dispute a rejection",
            ActionKind::ProposeFriendlyArrangement => "propose a friendly arrangement",
            ActionKind::RespondFriendlyArrangement => "respond to a friendly arrangement",
            ActionKind::TriggerLegalResolution => "trigger legal resolution",
            ActionKind::RequestAmendment => "request an amendment",
            ActionKind::RespondAmendment => "respond to amendment requests",
            ActionKind::RequestCompletion => "request completion",
            ActionKind::ConfirmCompletion => "confirm completion",
        }
    }

    /// The matrix row consulted for this action. Witnessing has none.
    pub fn permission(&self) -> Option<PermissionAction> {
        Some(match self {
            ActionKind::SendForSignature => PermissionAction::SendForSignature,
            ActionKind::Cancel => PermissionAction::Cancel,
            ActionKind::Withdraw => PermissionAction::Withdraw,
            ActionKind::Sign => PermissionAction::Sign,
            ActionKind::WitnessSign => return None,
            ActionKind::Reject => PermissionAction::Reject,
            ActionKind::AcceptRejection => PermissionAction::AcceptRejection,
            ActionKind::DisputeRejection => PermissionAction::DisputeRejection,
            ActionKind::ProposeFriendlyArrangement => PermissionAction::ProposeFriendlyArrangement,
            ActionKind::RespondFriendlyArrangement => PermissionAction::RespondFriendlyArrangement,
            ActionKind::TriggerLegalResolution => PermissionAction::TriggerLegalResolution,
            ActionKind::RequestAmendment => PermissionAction::RequestAmendment,
            ActionKind::RespondAmendment => PermissionAction::RespondAmendment,
            ActionKind::RequestCompletion => PermissionAction::RequestCompletion,
            ActionKind::ConfirmCompletion => PermissionAction::ConfirmCompletion,
        })
    }

    fn role_rule(&self, status: AgreementStatus) -> RoleRule {
        match self {
            ActionKind::SendForSignature
            | ActionKind::Cancel
            | ActionKind::Withdraw
            | ActionKind::RequestAmendment => RoleRule::Creator,
            ActionKind::RespondAmendment => RoleRule::Counterparty,
            ActionKind::Reject if status == AgreementStatus::PendingSignature => RoleRule::Counterparty,
            ActionKind::Sign => RoleRule::Signer,
            ActionKind::WitnessSign => RoleRule::Witness,
            _ => RoleRule::Party,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleRule {
    Creator,
    Counterparty,
    Party,
    Signer,  // role named by the action
    Witness, // fixed ledger rules
}

/// A lifecycle request with its action-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SendForSignature,
    Cancel {
        reason: Option<String>,
    },
    Withdraw {
        reason: Option<String>,
    },
    Sign {
        role: PartyRole,
        signature: SignaturePayload,
    },
    WitnessSign(SignaturePayload),
    Reject(Grounds),
    AcceptRejection,
    DisputeRejection(Grounds),
    ProposeFriendlyArrangement {
        terms: String,
    },
    RespondFriendlyArrangement(FriendlyResponse),
    TriggerLegalResolution,
    RequestAmendment {
        reason: String,
        proposed_changes: Option<String>,
    },
    RespondAmendment {
        approved: bool,
        response: Option<String>,
    },
    RequestCompletion,
    ConfirmCompletion,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::SendForSignature => ActionKind::SendForSignature,
            Action::Cancel { .. } => ActionKind::Cancel,
            Action::Withdraw { .. } => ActionKind::Withdraw,
            Action::Sign { .. } => ActionKind::Sign,
            Action::WitnessSign(_) => ActionKind::WitnessSign,
            Action::Reject(_) => ActionKind::Reject,
            Action::AcceptRejection => ActionKind::AcceptRejection,
            Action::DisputeRejection(_) => ActionKind::DisputeRejection,
            Action::ProposeFriendlyArrangement { .. } => ActionKind::ProposeFriendlyArrangement,
            Action::RespondFriendlyArrangement(_) => ActionKind::RespondFriendlyArrangement,
            Action::TriggerLegalResolution => ActionKind::TriggerLegalResolution,
            Action::RequestAmendment { .. } => ActionKind::RequestAmendment,
            Action::RespondAmendment { .. } => ActionKind::RespondAmendment,
            Action::RequestCompletion => ActionKind::RequestCompletion,
            Action::ConfirmCompletion => ActionKind::ConfirmCompletion,
        }
    }

    /// Whether a successful evaluation may issue a case number.
    pub fn may_escalate(&self) -> bool {
        matches!(
            self,
            Action::TriggerLegalResolution
                | Action::RespondFriendlyArrangement(FriendlyResponse::Rejected)
        )
    }
}

/// Edits allowed on an unlocked draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftEdit {
    AddParticipant(ParticipantInvite),
    UpdateContent {
        title: Option<String>,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: AgreementStatus,
    pub action: ActionKind,
    pub to: &'static [AgreementStatus],
}

const fn edge(from: AgreementStatus, action: ActionKind, to: &'static [AgreementStatus]) -> Edge {
    Edge { from, action, to }
}

/// Every `(status, action)` pair the engine accepts and the statuses it may lead to.
pub const TRANSITIONS: &[Edge] = {
    use ActionKind as A;
    use AgreementStatus as S;
    &[
        edge(S::Draft, A::SendForSignature, &[S::PendingSignature]),
        edge(S::Draft, A::Cancel, &[S::Cancelled]),
        edge(S::Draft, A::Withdraw, &[S::Withdrawn]),
        edge(S::PendingSignature, A::Sign, &[S::PendingSignature, S::Active]),
        edge(S::PendingSignature, A::Cancel, &[S::Cancelled]),
        edge(S::PendingSignature, A::Reject, &[S::Rejected]),
        edge(S::PendingSignature, A::RequestAmendment, &[S::PendingAmendment]),
        edge(S::Active, A::WitnessSign, &[S::Active]),
        edge(S::Active, A::Reject, &[S::Active]),
        edge(S::Active, A::AcceptRejection, &[S::Active]),
        edge(S::Active, A::DisputeRejection, &[S::Disputed]),
        edge(S::Active, A::TriggerLegalResolution, &[S::LegalResolution]),
        edge(S::Active, A::RequestAmendment, &[S::PendingAmendment]),
        edge(S::Active, A::RequestCompletion, &[S::Active]),
        edge(S::Active, A::ConfirmCompletion, &[S::Completed]),
        edge(S::Rejected, A::DisputeRejection, &[S::Disputed]),
        edge(S::Disputed, A::ProposeFriendlyArrangement, &[S::FriendlyArrangementNegotiation]),
        edge(S::Disputed, A::TriggerLegalResolution, &[S::LegalResolution]),
        edge(
            S::FriendlyArrangementNegotiation,
            A::RespondFriendlyArrangement,
            &[S::FriendlyArrangementNegotiation, S::Completed, S::LegalResolution],
        ),
        edge(S::PendingAmendment, A::RespondAmendment, &[S::Draft, S::Cancelled]),
    ]
};

pub fn find_edge(from: AgreementStatus, action: ActionKind) -> Option<&'static Edge> {
    TRANSITIONS.iter().find(|e| e.from == from && e.action == action)
}

pub fn is_defined(from: AgreementStatus, action: ActionKind) -> bool {
    find_edge(from, action).is_some()
}

/// Events raised inside the machine rather than by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalEvent {
    SignatureCompleted,
}

/// Applies an internal event to the row. Returns true when the status moved.
///
/// Re-running it on an already active agreement is a no-op, so activation
/// happens exactly once whichever side signs last.
pub fn react(
    agreement: &mut Agreement,
    event: InternalEvent,
    signatures: &[SignatureRecord],
    now: &TimeStamp<Utc>,
) -> bool {
    match event {
        InternalEvent::SignatureCompleted => {
            if agreement.status != AgreementStatus::PendingSignature
                || !ledger::completes_pair(signatures)
            {
                return false;
            }
            agreement.status = AgreementStatus::Active;
            agreement.activated_at = Some(now.clone());
            true
        }
    }
}

/// Everything one evaluation may look at.
pub struct Evaluation<'a> {
    pub agreement: &'a Agreement,
    pub signatures: &'a [SignatureRecord], // current version only
    pub actor: &'a Actor,
    pub capabilities: Capabilities,
    pub permissions: &'a PermissionSnapshot,
    pub now: TimeStamp<Utc>,
    pub case_number: Option<&'a str>, // reserved candidate, used only on escalation
}

impl<'a> Evaluation<'a> {
    pub fn new(
        agreement: &'a Agreement,
        signatures: &'a [SignatureRecord],
        actor: &'a Actor,
        permissions: &'a PermissionSnapshot,
    ) -> Self {
        Self {
            agreement,
            signatures,
            actor,
            capabilities: Capabilities::resolve(agreement, actor, signatures),
            permissions,
            now: TimeStamp::new(),
            case_number: None,
        }
    }

    pub fn with_case_number(mut self, case_number: Option<&'a str>) -> Self {
        self.case_number = case_number;
        self
    }

    /// A copy of the row to mutate, stamped with this evaluation's time.
    pub(crate) fn next(&self) -> Agreement {
        let mut next = self.agreement.clone();
        next.updated_at = self.now.clone();
        next
    }

    pub(crate) fn permit_as(&self, role: PartyRole, action: PermissionAction) -> Result<(), LifecycleError> {
        let status = self.agreement.status;
        if !self.permissions.is_action_enabled(role, status, action) {
            return Err(LifecycleError::PermissionDenied {
                role: role.into(),
                status,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Applies the hard role rule and then the matrix. Returns the role that was checked.
    pub(crate) fn authorize(&self, kind: ActionKind) -> Result<PartyRole, LifecycleError> {
        let caps = &self.capabilities;
        let role = match kind.role_rule(self.agreement.status) {
            RoleRule::Creator if caps.is_creator => PartyRole::Creator,
            RoleRule::Creator => {
                return Err(LifecycleError::Unauthorized(format!(
                    "Only the creator can {}",
                    kind.describe()
                )));
            }
            RoleRule::Counterparty if caps.is_counterparty => PartyRole::Counterparty,
            RoleRule::Counterparty => {
                return Err(LifecycleError::Unauthorized(format!(
                    "Only counterparties can {}",
                    kind.describe()
                )));
            }
            RoleRule::Party | RoleRule::Signer | RoleRule::Witness => {
                caps.party_role().ok_or_else(|| {
                    LifecycleError::Unauthorized(format!(
                        "Only agreement participants can {}",
                        kind.describe()
                    ))
                })?
            }
        };

        if let Some(action) = kind.permission() {
            self.permit_as(role, action)?;
        }
        Ok(role)
    }

    /// Whether `kind` passes the role rule and the matrix for this actor.
    fn admits(&self, kind: ActionKind) -> bool {
        let caps = &self.capabilities;
        let status = self.agreement.status;
        match kind.role_rule(status) {
            RoleRule::Witness => caps.is_witness && !caps.is_party() && !caps.has_signed_as_witness,
            RoleRule::Signer => PartyRole::ALL.into_iter().any(|role| {
                caps.holds(role)
                    && !caps.has_signed_as(role.into())
                    && self
                        .permissions
                        .is_action_enabled(role, status, PermissionAction::Sign)
            }),
            _ => self.authorize(kind).is_ok(),
        }
    }
}

/// The result of a successful evaluation, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub agreement: Agreement,
    pub signature: Option<SignatureRecord>,
    pub audit: AuditDraft,
    pub event: NotificationEvent,
}

impl Transition {
    pub fn new(agreement: Agreement, audit: AuditDraft, event: NotificationEvent) -> Self {
        Self {
            agreement,
            signature: None,
            audit,
            event,
        }
    }
}

pub fn evaluate(eval: &Evaluation, action: &Action) -> Result<Transition, LifecycleError> {
    eval.actor.ensure_authenticated()?;

    let status = eval.agreement.status;
    let kind = action.kind();

    match (status, kind) {
        (AgreementStatus::LegalResolution, ActionKind::TriggerLegalResolution) => {
            return Err(LifecycleError::AlreadyEscalated {
                case_number: eval
                    .agreement
                    .case_number()
                    .unwrap_or("unassigned")
                    .to_string(),
            });
        }
        (AgreementStatus::PendingAmendment, ActionKind::RequestAmendment) => {
            return Err(LifecycleError::AmendmentPending);
        }
        _ => {}
    }

    let edge = find_edge(status, kind).ok_or_else(|| {
        LifecycleError::InvalidTransition(format!(
            "Cannot {} while the agreement is {status}",
            kind.describe()
        ))
    })?;

    let transition = match action {
        Action::SendForSignature => send_for_signature(eval)?,
        Action::Cancel { reason } => cancel(eval, reason.as_deref())?,
        Action::Withdraw { reason } => withdraw(eval, reason.as_deref())?,
        Action::Sign { role, signature } => sign(eval, *role, signature)?,
        Action::WitnessSign(signature) => witness_sign(eval, signature)?,
        Action::Reject(grounds) => dispute::reject(eval, grounds)?,
        Action::AcceptRejection => dispute::accept_rejection(eval)?,
        Action::DisputeRejection(grounds) => dispute::dispute_rejection(eval, grounds)?,
        Action::ProposeFriendlyArrangement { terms } => {
            dispute::propose_friendly_arrangement(eval, terms)?
        }
        Action::RespondFriendlyArrangement(response) => {
            dispute::respond_friendly_arrangement(eval, response)?
        }
        Action::TriggerLegalResolution => dispute::trigger_legal_resolution(eval)?,
        Action::RequestAmendment {
            reason,
            proposed_changes,
        } => amendment::request_amendment(eval, reason, proposed_changes.as_deref())?,
        Action::RespondAmendment { approved, response } => {
            amendment::respond_amendment(eval, *approved, response.as_deref())?
        }
        Action::RequestCompletion => request_completion(eval)?,
        Action::ConfirmCompletion => confirm_completion(eval)?,
    };

    if !edge.to.contains(&transition.agreement.status) {
        return Err(LifecycleError::InvalidTransition(format!(
            "{kind} cannot move the agreement from {status} to {}",
            transition.agreement.status
        )));
    }
    Ok(transition)
}

/// Evaluates an edit on an unlocked draft.
pub fn evaluate_edit(eval: &Evaluation, edit: &DraftEdit) -> Result<Transition, LifecycleError> {
    eval.actor.ensure_authenticated()?;

    let agreement = eval.agreement;
    if agreement.status != AgreementStatus::Draft || agreement.is_locked {
        return Err(LifecycleError::InvalidTransition(format!(
            "Agreement is locked while {}. Request an amendment to change it.",
            agreement.status
        )));
    }
    if !eval.capabilities.is_creator {
        return Err(LifecycleError::Unauthorized(
            "Only the creator can edit the agreement".into(),
        ));
    }
    eval.permit_as(PartyRole::Creator, PermissionAction::Edit)?;

    let mut next = eval.next();
    match edit {
        DraftEdit::AddParticipant(invite) => {
            admit_participant(&mut next, invite.clone())?;
            let who = invite
                .email
                .clone()
                .or_else(|| invite.account_id.clone())
                .unwrap_or_default();
            Ok(Transition::new(
                next,
                AuditDraft::new("Participant Added", format!("{} {who}", invite.role)),
                NotificationEvent::ParticipantAdded,
            ))
        }
        DraftEdit::UpdateContent { title, content } => {
            if let Some(title) = title {
                if title.trim().is_empty() {
                    return Err(LifecycleError::Validation("Agreement title is required".into()));
                }
                next.title = title.clone();
            }
            next.content = content.clone();
            let digest = next.content_digest();
            Ok(Transition::new(
                next,
                AuditDraft::new("Content Updated", format!("content digest {digest}")),
                NotificationEvent::ContentUpdated,
            ))
        }
    }
}

/// Action kinds the actor may attempt on the agreement's current status.
///
/// Only the role rule and the matrix are applied. Payload guards still
/// decide the outcome of the attempt.
pub fn available_actions(eval: &Evaluation) -> Vec<ActionKind> {
    if eval.actor.ensure_authenticated().is_err() {
        return vec![];
    }
    TRANSITIONS
        .iter()
        .filter(|e| e.from == eval.agreement.status)
        .map(|e| e.action)
        .filter(|kind| eval.admits(*kind))
        .collect()
}

fn send_for_signature(eval: &Evaluation) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::SendForSignature)?;

    if !eval.agreement.has_counterparty() {
        return Err(LifecycleError::Validation(
            "Cannot send for signature. Agreement must have at least one counterparty.".into(),
        ));
    }

    let mut next = eval.next();
    next.status = AgreementStatus::PendingSignature;
    next.is_locked = true;
    next.sent_for_signature_at = Some(eval.now.clone());

    Ok(Transition::new(
        next,
        AuditDraft::new("Sent for Signature", format!("version {}", eval.agreement.version)),
        NotificationEvent::SentForSignature,
    ))
}

fn cancel(eval: &Evaluation, reason: Option<&str>) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::Cancel)?;

    if eval.agreement.has_signature_from(Role::Counterparty) {
        return Err(LifecycleError::InvalidTransition(
            "Cannot cancel after counterparty has signed. Agreement is now legally binding.".into(),
        ));
    }

    let reason = non_blank(reason).unwrap_or("Cancelled by creator").to_string();
    let mut next = eval.next();
    next.status = AgreementStatus::Cancelled;
    next.cancellation = Some(Termination {
        by: eval.actor.id.clone(),
        at: eval.now.clone(),
        reason: reason.clone(),
    });

    Ok(Transition::new(
        next,
        AuditDraft::new("Agreement Cancelled", reason),
        NotificationEvent::Cancelled,
    ))
}

fn withdraw(eval: &Evaluation, reason: Option<&str>) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::Withdraw)?;

    if !eval.agreement.signature_keys.is_empty() {
        return Err(LifecycleError::InvalidTransition(
            "Cannot withdraw an agreement that has been signed".into(),
        ));
    }

    let reason = non_blank(reason).unwrap_or("Withdrawn by creator").to_string();
    let mut next = eval.next();
    next.status = AgreementStatus::Withdrawn;
    next.withdrawal = Some(Termination {
        by: eval.actor.id.clone(),
        at: eval.now.clone(),
        reason: reason.clone(),
    });

    Ok(Transition::new(
        next,
        AuditDraft::new("Agreement Withdrawn", reason),
        NotificationEvent::Withdrawn,
    ))
}

fn sign(eval: &Evaluation, role: PartyRole, payload: &SignaturePayload) -> Result<Transition, LifecycleError> {
    if !eval.capabilities.holds(role) {
        return Err(LifecycleError::IneligibleSigner(match role {
            PartyRole::Creator => "Only the creator can sign as creator".into(),
            PartyRole::Counterparty => "You are not a counterparty on this agreement".into(),
        }));
    }
    eval.permit_as(role, PermissionAction::Sign)?;

    let record = ledger::record_signature(
        eval.agreement,
        eval.actor,
        &eval.capabilities,
        role.into(),
        payload,
        eval.signatures,
        &eval.now,
    )?;

    let mut next = eval.next();
    next.signature_keys.push(record.key());

    let mut rows = eval.signatures.to_vec();
    rows.push(record.clone());

    let (audit, event) = if react(&mut next, InternalEvent::SignatureCompleted, &rows, &eval.now) {
        (
            AuditDraft::new(
                "Agreement Activated",
                format!("signed as {role}, creator and counterparty signatures complete"),
            ),
            NotificationEvent::Activated,
        )
    } else {
        (
            AuditDraft::new(&format!("Signed as {role}"), format!("version {}", next.version)),
            NotificationEvent::Signed,
        )
    };

    Ok(Transition {
        agreement: next,
        signature: Some(record),
        audit,
        event,
    })
}

fn witness_sign(eval: &Evaluation, payload: &SignaturePayload) -> Result<Transition, LifecycleError> {
    let record = ledger::record_signature(
        eval.agreement,
        eval.actor,
        &eval.capabilities,
        Role::Witness,
        payload,
        eval.signatures,
        &eval.now,
    )?;

    let mut next = eval.next();
    next.signature_keys.push(record.key());
    next.witnessed = true;

    Ok(Transition {
        agreement: next,
        signature: Some(record),
        audit: AuditDraft::new("Agreement Witnessed", format!("witness {}", eval.actor.email)),
        event: NotificationEvent::Witnessed,
    })
}

fn request_completion(eval: &Evaluation) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::RequestCompletion)?;

    let agreement = eval.agreement;
    if agreement.has_open_grievance() {
        return Err(LifecycleError::InvalidAgreementState(
            "Resolve the open rejection before completing the agreement".into(),
        ));
    }
    if agreement.completion_requested_by.is_some() {
        return Err(LifecycleError::Conflict(
            "Completion has already been requested".into(),
        ));
    }

    let mut next = eval.next();
    next.completion_requested_by = Some(eval.actor.id.clone());

    Ok(Transition::new(
        next,
        AuditDraft::new("Completion Requested", ""),
        NotificationEvent::CompletionRequested,
    ))
}

fn confirm_completion(eval: &Evaluation) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::ConfirmCompletion)?;

    let Some(requested_by) = eval.agreement.completion_requested_by.as_deref() else {
        return Err(LifecycleError::InvalidAgreementState(
            "There is no completion request to confirm".into(),
        ));
    };
    if requested_by == eval.actor.id {
        return Err(LifecycleError::SelfAction(
            "Another party must confirm completion".into(),
        ));
    }

    let mut next = eval.next();
    next.status = AgreementStatus::Completed;
    next.completed_at = Some(eval.now.clone());

    Ok(Transition::new(
        next,
        AuditDraft::new("Agreement Completed", format!("requested by {requested_by}")),
        NotificationEvent::Completed,
    ))
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A required free-text field, trimmed.
pub(crate) fn required<'v>(value: &'v str, message: &str) -> Result<&'v str, LifecycleError> {
    non_blank(Some(value)).ok_or_else(|| LifecycleError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::AgreementDraft;
    use crate::ledger::SignatureMetadata;

    struct Fixture {
        agreement: Agreement,
        creator: Actor,
        counterparty: Actor,
        permissions: PermissionSnapshot,
    }

    fn fixture() -> Fixture {
        let creator = Actor::new("user_creator", "creator@example.com");
        let counterparty = Actor::new("user_counter", "counter@example.com");
        let agreement = AgreementDraft::new()
            .set_title("Car sale")
            .set_content("One car")
            .invite(ParticipantInvite::counterparty(&counterparty.email).with_account(&counterparty.id))
            .validate_and_finalise("agr_machine".into(), &creator)
            .unwrap();
        Fixture {
            agreement,
            creator,
            counterparty,
            permissions: PermissionSnapshot::defaults(),
        }
    }

    fn run(f: &Fixture, actor: &Actor, rows: &[SignatureRecord], action: Action) -> Result<Transition, LifecycleError> {
        evaluate(&Evaluation::new(&f.agreement, rows, actor, &f.permissions), &action)
    }

    fn signature(role: PartyRole) -> Action {
        Action::Sign {
            role,
            signature: SignaturePayload::new("sig", SignatureMetadata::new("10.0.0.1", "Mozilla/5.0")),
        }
    }

    #[test]
    fn send_for_signature_locks() {
        let f = fixture();
        let t = run(&f, &f.creator, &[], Action::SendForSignature).unwrap();
        assert_eq!(t.agreement.status, AgreementStatus::PendingSignature);
        assert!(t.agreement.is_locked);
        assert!(t.agreement.sent_for_signature_at.is_some());
    }

    #[test]
    fn counterparty_cannot_send() {
        let f = fixture();
        let err = run(&f, &f.counterparty, &[], Action::SendForSignature).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Unauthorized("Only the creator can send the agreement for signature".into())
        );
    }

    #[test]
    fn send_requires_counterparty() {
        let mut f = fixture();
        f.agreement.participants.clear();
        let err = run(&f, &f.creator, &[], Action::SendForSignature).unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[test]
    fn undefined_pair_is_invalid_transition() {
        let f = fixture();
        let err = run(&f, &f.creator, &[], Action::AcceptRejection).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }

    #[test]
    fn matrix_denial_is_unauthorized() {
        let mut f = fixture();
        f.permissions = PermissionSnapshot::default();
        let err = run(&f, &f.creator, &[], Action::SendForSignature).unwrap_err();
        assert!(matches!(err, LifecycleError::PermissionDenied { .. }));
    }

    #[test]
    fn second_signature_activates() {
        let mut f = fixture();
        f.agreement.status = AgreementStatus::PendingSignature;
        f.agreement.is_locked = true;

        let first = run(&f, &f.counterparty, &[], signature(PartyRole::Counterparty)).unwrap();
        assert_eq!(first.agreement.status, AgreementStatus::PendingSignature);
        assert_eq!(first.event, NotificationEvent::Signed);

        let rows = vec![first.signature.unwrap()];
        let second = run(&f, &f.creator, &rows, signature(PartyRole::Creator)).unwrap();
        assert_eq!(second.agreement.status, AgreementStatus::Active);
        assert_eq!(second.audit.action, "Agreement Activated");
        assert!(second.agreement.activated_at.is_some());
    }

    #[test]
    fn react_is_idempotent() {
        let mut f = fixture();
        f.agreement.status = AgreementStatus::Active;
        assert!(!react(&mut f.agreement, InternalEvent::SignatureCompleted, &[], &TimeStamp::new()));
        assert_eq!(f.agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn escalation_special_cases_conflict() {
        let mut f = fixture();
        f.agreement.status = AgreementStatus::LegalResolution;
        let err = run(&f, &f.creator, &[], Action::TriggerLegalResolution).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyEscalated { .. }));

        f.agreement.status = AgreementStatus::PendingAmendment;
        let err = run(
            &f,
            &f.creator,
            &[],
            Action::RequestAmendment {
                reason: "typo".into(),
                proposed_changes: None,
            },
        )
        .unwrap_err();
        assert_eq!(err, LifecycleError::AmendmentPending);
    }

    #[test]
    fn available_actions_follow_role_and_matrix() {
        let f = fixture();
        let creator = available_actions(&Evaluation::new(&f.agreement, &[], &f.creator, &f.permissions));
        assert_eq!(
            creator,
            vec![ActionKind::SendForSignature, ActionKind::Cancel, ActionKind::Withdraw]
        );

        let counterparty = available_actions(&Evaluation::new(&f.agreement, &[], &f.counterparty, &f.permissions));
        assert!(counterparty.is_empty());
    }

    #[test]
    fn edits_only_on_unlocked_draft() {
        let mut f = fixture();
        let edit = DraftEdit::UpdateContent {
            title: None,
            content: "Two cars".into(),
        };
        let t = evaluate_edit(&Evaluation::new(&f.agreement, &[], &f.creator, &f.permissions), &edit).unwrap();
        assert_eq!(t.agreement.content, "Two cars");

        f.agreement.status = AgreementStatus::PendingSignature;
        f.agreement.is_locked = true;
        let err = evaluate_edit(&Evaluation::new(&f.agreement, &[], &f.creator, &f.permissions), &edit).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }

    #[test]
    fn every_edge_is_unique() {
        for (i, a) in TRANSITIONS.iter().enumerate() {
            for b in &TRANSITIONS[i + 1..] {
                assert!(!(a.from == b.from && a.action == b.action), "{a:?}");
            }
            assert!(!a.from.is_terminal());
        }
    }
}
