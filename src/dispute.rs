//! Rejection, dispute, friendly arrangement and legal escalation
use super::agreement::{
    Agreement, ClientFingerprint, DisputeCase, Evidence, EvidenceFile, FriendlyArrangement,
    FriendlyResponseKind, FriendlyResponseRecord, Rejection,
};
use super::audit::AuditDraft;
use super::error::LifecycleError;
use super::machine::{required, ActionKind, Evaluation, Transition};
use super::notify::NotificationEvent;
use super::types::AgreementStatus;

/// A reason with its supporting evidence, as sent with a rejection or dispute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grounds {
    pub reason: String,
    pub evidence: Vec<EvidenceFile>,
    pub fingerprint: ClientFingerprint,
}

impl Grounds {
    pub fn new(reason: &str, fingerprint: ClientFingerprint) -> Self {
        Self {
            reason: reason.to_string(),
            evidence: vec![],
            fingerprint,
        }
    }
    pub fn with_evidence(mut self, file: EvidenceFile) -> Self {
        self.evidence.push(file);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendlyResponse {
    Accepted,
    Conditional { conditions: String },
    Rejected,
}

pub(crate) fn reject(eval: &Evaluation, grounds: &Grounds) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::Reject)?;
    let agreement = eval.agreement;

    let pre_signature = agreement.status == AgreementStatus::PendingSignature;
    if pre_signature && eval.capabilities.has_signed_as_counterparty {
        return Err(LifecycleError::InvalidTransition(
            "Cannot reject an agreement you have already signed".into(),
        ));
    }
    if let Some(open) = &agreement.rejection {
        return Err(LifecycleError::Conflict(format!(
            "A rejection raised by {} is already open",
            open.rejected_by
        )));
    }
    let reason = required(&grounds.reason, "Rejection reason is required")?;

    let mut next = eval.next();
    next.rejection = Some(Rejection {
        rejected_by: eval.actor.id.clone(),
        reason: reason.to_string(),
        rejected_at: eval.now.clone(),
        evidence: Evidence::attach(&grounds.evidence, &grounds.fingerprint),
        raised_in: agreement.status,
    });

    let action = if pre_signature {
        next.status = AgreementStatus::Rejected;
        "Agreement Rejected"
    } else {
        // an open rejection blocks completion until it is settled
        next.completion_requested_by = None;
        "Rejection Raised"
    };

    Ok(Transition::new(
        next,
        AuditDraft::new(action, reason),
        NotificationEvent::Rejected,
    ))
}

pub(crate) fn accept_rejection(eval: &Evaluation) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::AcceptRejection)?;

    let rejection = open_rejection(eval.agreement, "accept")?;
    if rejection.rejected_by == eval.actor.id {
        return Err(LifecycleError::SelfAction(
            "Another party must accept or dispute the rejection".into(),
        ));
    }
    let details = format!("rejection by {}: {}", rejection.rejected_by, rejection.reason);

    let mut next = eval.next();
    next.rejection = None;

    Ok(Transition::new(
        next,
        AuditDraft::new("Rejection Accepted", details),
        NotificationEvent::RejectionAccepted,
    ))
}

pub(crate) fn dispute_rejection(eval: &Evaluation, grounds: &Grounds) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::DisputeRejection)?;

    let rejection = open_rejection(eval.agreement, "dispute")?;
    if rejection.rejected_by == eval.actor.id {
        return Err(LifecycleError::SelfAction(
            "Another party must accept or dispute the rejection".into(),
        ));
    }
    let reason = required(&grounds.reason, "Dispute reason is required")?;
    let evidence = Evidence::attach(&grounds.evidence, &grounds.fingerprint);

    let mut next = eval.next();
    next.status = AgreementStatus::Disputed;
    next.dispute = Some(DisputeCase {
        triggered_by: eval.actor.id.clone(),
        reason: reason.to_string(),
        evidence,
        opened_at: eval.now.clone(),
        case_number: None,
        escalated_by: None,
        escalated_at: None,
    });

    Ok(Transition::new(
        next,
        AuditDraft::new(
            "Rejection Disputed",
            format!("{reason} ({} evidence file(s))", grounds.evidence.len()),
        ),
        NotificationEvent::Disputed,
    ))
}

pub(crate) fn propose_friendly_arrangement(eval: &Evaluation, terms: &str) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::ProposeFriendlyArrangement)?;
    let terms = required(terms, "Proposed terms are required")?;

    let round = eval.agreement.friendly.as_ref().map_or(0, |f| f.round) + 1;
    let mut next = eval.next();
    next.status = AgreementStatus::FriendlyArrangementNegotiation;
    next.friendly = Some(FriendlyArrangement {
        proposed_by: eval.actor.id.clone(),
        proposed_at: eval.now.clone(),
        terms: terms.to_string(),
        round,
        last_response: None,
        accepted_terms: None,
    });

    Ok(Transition::new(
        next,
        AuditDraft::new("Friendly Arrangement Proposed", format!("round {round}: {terms}")),
        NotificationEvent::FriendlyArrangementProposed,
    ))
}

pub(crate) fn respond_friendly_arrangement(
    eval: &Evaluation,
    response: &FriendlyResponse,
) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::RespondFriendlyArrangement)?;

    let Some(current) = eval.agreement.friendly.as_ref() else {
        return Err(LifecycleError::InvalidAgreementState(
            "There is no friendly arrangement to respond to".into(),
        ));
    };
    if current.proposed_by == eval.actor.id {
        return Err(LifecycleError::SelfAction(
            "You cannot respond to your own proposal".into(),
        ));
    }

    let mut next = eval.next();
    let mut arrangement = current.clone();
    let mut record = FriendlyResponseRecord {
        responded_by: eval.actor.id.clone(),
        responded_at: eval.now.clone(),
        kind: FriendlyResponseKind::Accepted,
        conditions: None,
    };

    let (audit, event) = match response {
        FriendlyResponse::Accepted => {
            arrangement.accepted_terms = Some(arrangement.terms.clone());
            next.status = AgreementStatus::Completed;
            next.completed_at = Some(eval.now.clone());
            (
                AuditDraft::new("Friendly Arrangement Accepted", arrangement.terms.clone()),
                NotificationEvent::FriendlyArrangementAccepted,
            )
        }
        FriendlyResponse::Conditional { conditions } => {
            let conditions = required(conditions, "Conditions are required for a conditional response")?;
            record.kind = FriendlyResponseKind::Conditional;
            record.conditions = Some(conditions.to_string());
            // the counter-offer becomes the terms on the table
            arrangement.terms = conditions.to_string();
            arrangement.proposed_by = eval.actor.id.clone();
            arrangement.proposed_at = eval.now.clone();
            arrangement.round += 1;
            (
                AuditDraft::new(
                    "Friendly Arrangement Countered",
                    format!("round {}: {conditions}", arrangement.round),
                ),
                NotificationEvent::FriendlyArrangementCountered,
            )
        }
        FriendlyResponse::Rejected => {
            record.kind = FriendlyResponseKind::Rejected;
            let case_number = escalate(eval, &mut next)?;
            (
                AuditDraft::new(
                    "Friendly Arrangement Rejected",
                    format!("escalated to legal resolution, case {case_number}"),
                ),
                NotificationEvent::LegalResolutionTriggered,
            )
        }
    };

    arrangement.last_response = Some(record);
    next.friendly = Some(arrangement);

    Ok(Transition::new(next, audit, event))
}

pub(crate) fn trigger_legal_resolution(eval: &Evaluation) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::TriggerLegalResolution)?;

    if eval.agreement.status == AgreementStatus::Active && !eval.agreement.has_open_grievance() {
        return Err(LifecycleError::InvalidTransition(
            "Legal resolution requires an open rejection or dispute".into(),
        ));
    }

    let mut next = eval.next();
    let case_number = escalate(eval, &mut next)?;

    Ok(Transition::new(
        next,
        AuditDraft::new("Legal Resolution Triggered", format!("case {case_number}")),
        NotificationEvent::LegalResolutionTriggered,
    ))
}

/// Moves `next` to legal resolution and stamps the reserved case number.
fn escalate(eval: &Evaluation, next: &mut Agreement) -> Result<String, LifecycleError> {
    if let Some(existing) = eval.agreement.case_number() {
        return Err(LifecycleError::AlreadyEscalated {
            case_number: existing.to_string(),
        });
    }
    let case_number = eval
        .case_number
        .ok_or_else(|| LifecycleError::Storage("no case number was reserved for escalation".into()))?
        .to_string();

    let mut case = match next.dispute.take() {
        Some(case) => case,
        // escalating straight from an open rejection
        None => {
            let rejection = next.rejection.as_ref();
            DisputeCase {
                triggered_by: eval.actor.id.clone(),
                reason: rejection
                    .map(|r| r.reason.clone())
                    .unwrap_or_else(|| "Escalated to legal resolution".into()),
                evidence: rejection.map(|r| r.evidence.clone()).unwrap_or_default(),
                opened_at: eval.now.clone(),
                case_number: None,
                escalated_by: None,
                escalated_at: None,
            }
        }
    };
    case.case_number = Some(case_number.clone());
    case.escalated_by = Some(eval.actor.id.clone());
    case.escalated_at = Some(eval.now.clone());

    next.dispute = Some(case);
    next.status = AgreementStatus::LegalResolution;
    Ok(case_number)
}

fn open_rejection<'a>(agreement: &'a Agreement, verb: &str) -> Result<&'a Rejection, LifecycleError> {
    agreement.rejection.as_ref().ok_or_else(|| {
        LifecycleError::InvalidAgreementState(format!("There is no open rejection to {verb}"))
    })
}
