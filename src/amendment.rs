//! Amendment requests on locked agreements
//!
//! `pending_amendment` status and a pending [`AmendmentRequest`] always change
//! together. Approval reopens the agreement as an unlocked draft of the next
//! version, rejection cancels it with the counterparty's reason.
use super::agreement::{AmendmentRequest, Termination, VersionRecord};
use super::audit::AuditDraft;
use super::error::LifecycleError;
use super::machine::{non_blank, required, ActionKind, Evaluation, Transition};
use super::notify::NotificationEvent;
use super::types::{AgreementStatus, AmendmentStatus};

pub(crate) fn request_amendment(
    eval: &Evaluation,
    reason: &str,
    proposed_changes: Option<&str>,
) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::RequestAmendment)?;
    let agreement = eval.agreement;

    if !agreement.is_locked {
        return Err(LifecycleError::InvalidAgreementState(
            "Agreement is not locked. You can edit it directly.".into(),
        ));
    }
    if agreement.amendment.is_pending() {
        return Err(LifecycleError::AmendmentPending);
    }
    let reason = required(reason, "Amendment reason is required")?;

    let mut next = eval.next();
    next.status = AgreementStatus::PendingAmendment;
    next.amendment = AmendmentRequest {
        status: AmendmentStatus::Pending,
        requested_by: Some(eval.actor.id.clone()),
        requested_at: Some(eval.now.clone()),
        reason: Some(reason.to_string()),
        proposed_changes: non_blank(proposed_changes).map(str::to_string),
        responded_by: None,
        responded_at: None,
        response: None,
    };

    Ok(Transition::new(
        next,
        AuditDraft::new("Amendment Requested", reason),
        NotificationEvent::AmendmentRequested,
    ))
}

pub(crate) fn respond_amendment(
    eval: &Evaluation,
    approved: bool,
    response: Option<&str>,
) -> Result<Transition, LifecycleError> {
    eval.authorize(ActionKind::RespondAmendment)?;
    let agreement = eval.agreement;

    if !agreement.amendment.is_pending() {
        return Err(LifecycleError::InvalidAgreementState(
            "There is no pending amendment request".into(),
        ));
    }
    let response = non_blank(response).map(str::to_string);

    let mut next = eval.next();
    let answered = AmendmentRequest {
        responded_by: Some(eval.actor.id.clone()),
        responded_at: Some(eval.now.clone()),
        response: response.clone(),
        ..AmendmentRequest::default()
    };

    if approved {
        next.history.push(VersionRecord {
            version: agreement.version,
            content_digest: agreement.content_digest(),
            superseded_at: eval.now.clone(),
            amendment_reason: agreement.amendment.reason.clone(),
        });
        next.version += 1;
        next.status = AgreementStatus::Draft;
        next.is_locked = false;
        next.sent_for_signature_at = None;
        next.activated_at = None;
        next.witnessed = false;
        next.rejection = None;
        next.completion_requested_by = None;
        // request fields clear, only the outcome is kept
        next.amendment = AmendmentRequest {
            status: AmendmentStatus::Approved,
            ..answered
        };

        Ok(Transition::new(
            next,
            AuditDraft::new(
                "Amendment Approved",
                format!("version {} opened for editing", agreement.version + 1),
            ),
            NotificationEvent::AmendmentApproved,
        ))
    } else {
        let reason = response.unwrap_or_else(|| "Amendment request rejected".into());
        next.status = AgreementStatus::Cancelled;
        next.cancellation = Some(Termination {
            by: eval.actor.id.clone(),
            at: eval.now.clone(),
            reason: reason.clone(),
        });
        next.amendment = AmendmentRequest {
            status: AmendmentStatus::Rejected,
            reason: agreement.amendment.reason.clone(),
            requested_by: agreement.amendment.requested_by.clone(),
            requested_at: agreement.amendment.requested_at.clone(),
            proposed_changes: agreement.amendment.proposed_changes.clone(),
            ..answered
        };

        Ok(Transition::new(
            next,
            AuditDraft::new("Amendment Rejected", reason),
            NotificationEvent::AmendmentRejected,
        ))
    }
}
