//! Property-based tests for the agreement state machine
//!
//! The machine is a pure function of the agreement row, the current-version
//! signatures, the actor and a permission snapshot, so these tests drive it
//! directly without a database. Committing is emulated the way the store
//! does it: the returned row replaces the old one and the signature row, if
//! any, joins the current version's rows.
//!
// These property tests cover:
//
// 1. Transition closure - pairs outside the table are always refused
// 2. Signing order independence - activation happens once, whoever signs last
// 3. Random walks - every accepted action follows a table edge and no
//    terminal status is ever left
// 4. Signature uniqueness - one row per (version, role, signer)
//
// Storage atomicity, unchanged rows after a refusal and optimistic
// concurrency are covered by the integration scenarios instead.

use agreement_lifecycle::{
    agreement::{Agreement, AgreementDraft, ClientFingerprint, ParticipantInvite},
    capability::Actor,
    dispute::{FriendlyResponse, Grounds},
    error::{ErrorKind, LifecycleError},
    ledger::{SignatureMetadata, SignaturePayload, SignatureRecord},
    machine::{self, Action, ActionKind, Evaluation, Transition},
    notify::NotificationEvent,
    permissions::PermissionSnapshot,
    types::{AgreementStatus, PartyRole},
};
use proptest::prelude::*;
use std::collections::HashSet;

const CASE_NUMBER: &str = "LC-2026-PROP0001";

fn creator() -> Actor {
    Actor::new("user_creator", "creator@example.com")
}

fn counterparty() -> Actor {
    Actor::new("user_counter", "counter@example.com")
}

fn witness() -> Actor {
    Actor::new("user_witness", "witness@example.com")
}

fn actors() -> [Actor; 3] {
    [creator(), counterparty(), witness()]
}

fn agreement() -> Agreement {
    AgreementDraft::new()
        .set_title("Garden maintenance")
        .set_content("Weekly mowing from April to September.")
        .invite(ParticipantInvite::counterparty(&counterparty().email))
        .invite(ParticipantInvite::witness(&witness().email))
        .validate_and_finalise("agr_prop".into(), &creator())
        .unwrap()
}

fn payload(data: &str) -> SignaturePayload {
    SignaturePayload::new(data, SignatureMetadata::new("192.0.2.1", "proptest"))
}

fn grounds() -> Grounds {
    Grounds::new("terms not met", ClientFingerprint::capture("192.0.2.1", "proptest", "linux"))
}

/// An action of `kind` with a fixed payload. `variant` picks between payload shapes.
fn action_for(kind: ActionKind, variant: u8) -> Action {
    let role = if variant % 2 == 0 {
        PartyRole::Creator
    } else {
        PartyRole::Counterparty
    };
    match kind {
        ActionKind::SendForSignature => Action::SendForSignature,
        ActionKind::Cancel => Action::Cancel { reason: None },
        ActionKind::Withdraw => Action::Withdraw { reason: None },
        ActionKind::Sign => Action::Sign {
            role,
            signature: payload("signed"),
        },
        ActionKind::WitnessSign => Action::WitnessSign(payload("witnessed")),
        ActionKind::Reject => Action::Reject(grounds()),
        ActionKind::AcceptRejection => Action::AcceptRejection,
        ActionKind::DisputeRejection => Action::DisputeRejection(grounds()),
        ActionKind::ProposeFriendlyArrangement => Action::ProposeFriendlyArrangement {
            terms: "pay half".into(),
        },
        ActionKind::RespondFriendlyArrangement => Action::RespondFriendlyArrangement(match variant % 3 {
            0 => FriendlyResponse::Accepted,
            1 => FriendlyResponse::Conditional {
                conditions: "pay two thirds".into(),
            },
            _ => FriendlyResponse::Rejected,
        }),
        ActionKind::TriggerLegalResolution => Action::TriggerLegalResolution,
        ActionKind::RequestAmendment => Action::RequestAmendment {
            reason: "wrong dates".into(),
            proposed_changes: None,
        },
        ActionKind::RespondAmendment => Action::RespondAmendment {
            approved: variant % 2 == 0,
            response: None,
        },
        ActionKind::RequestCompletion => Action::RequestCompletion,
        ActionKind::ConfirmCompletion => Action::ConfirmCompletion,
    }
}

fn run(
    agreement: &Agreement,
    signatures: &[SignatureRecord],
    actor: &Actor,
    action: &Action,
) -> Result<Transition, LifecycleError> {
    let permissions = PermissionSnapshot::defaults();
    let eval = Evaluation::new(agreement, signatures, actor, &permissions).with_case_number(Some(CASE_NUMBER));
    machine::evaluate(&eval, action)
}

/// Applies a transition the way a commit would.
fn apply(agreement: &mut Agreement, signatures: &mut Vec<SignatureRecord>, transition: Transition) {
    if transition.agreement.version != agreement.version {
        signatures.clear();
    }
    if let Some(record) = transition.signature {
        signatures.push(record);
    }
    *agreement = transition.agreement;
}

fn status_strategy() -> impl Strategy<Value = AgreementStatus> {
    prop::sample::select(AgreementStatus::ALL.to_vec())
}

fn kind_strategy() -> impl Strategy<Value = ActionKind> {
    prop::sample::select(ActionKind::ALL.to_vec())
}

proptest! {
    #[test]
    fn pairs_outside_the_table_are_refused(
        status in status_strategy(),
        kind in kind_strategy(),
        actor_index in 0usize..3,
        variant in any::<u8>(),
    ) {
        prop_assume!(!machine::is_defined(status, kind));

        let mut agreement = agreement();
        agreement.status = status;
        let actor = &actors()[actor_index];

        let err = run(&agreement, &[], actor, &action_for(kind, variant)).unwrap_err();
        match (status, kind) {
            (AgreementStatus::LegalResolution, ActionKind::TriggerLegalResolution) => {
                prop_assert!(matches!(err, LifecycleError::AlreadyEscalated { .. }), "{err:?}");
            }
            (AgreementStatus::PendingAmendment, ActionKind::RequestAmendment) => {
                prop_assert_eq!(err, LifecycleError::AmendmentPending);
            }
            _ => prop_assert_eq!(err.kind(), ErrorKind::InvalidTransition),
        }
    }

    #[test]
    fn activation_happens_once_whoever_signs_last(creator_first in any::<bool>()) {
        let mut agreement = agreement();
        agreement.status = AgreementStatus::PendingSignature;
        agreement.is_locked = true;
        let mut signatures = vec![];

        let mut order = vec![
            (creator(), PartyRole::Creator),
            (counterparty(), PartyRole::Counterparty),
        ];
        if !creator_first {
            order.reverse();
        }

        let mut events = vec![];
        for (actor, role) in order {
            let action = Action::Sign { role, signature: payload(actor.id.as_str()) };
            let transition = run(&agreement, &signatures, &actor, &action).unwrap();
            events.push(transition.event);
            apply(&mut agreement, &mut signatures, transition);
        }

        prop_assert_eq!(events, vec![NotificationEvent::Signed, NotificationEvent::Activated]);
        prop_assert_eq!(agreement.status, AgreementStatus::Active);
        prop_assert!(agreement.activated_at.is_some());
        prop_assert_eq!(signatures.len(), 2);
    }

    #[test]
    fn random_walks_follow_the_table(
        steps in prop::collection::vec((0usize..3, kind_strategy(), any::<u8>()), 1..40)
    ) {
        let mut agreement = agreement();
        let mut signatures: Vec<SignatureRecord> = vec![];
        let actors = actors();

        for (actor_index, kind, variant) in steps {
            let from = agreement.status;
            let actor = &actors[actor_index];
            let Ok(transition) = run(&agreement, &signatures, actor, &action_for(kind, variant)) else {
                continue;
            };

            prop_assert!(!from.is_terminal(), "left terminal status {from}");
            let edge = machine::find_edge(from, kind);
            prop_assert!(edge.is_some(), "accepted {kind} from {from}");
            if let Some(edge) = edge {
                prop_assert!(edge.to.contains(&transition.agreement.status));
            }
            let to = transition.agreement.status;
            if !to.is_terminal() {
                prop_assert_eq!(transition.agreement.is_locked, to != AgreementStatus::Draft);
            }
            apply(&mut agreement, &mut signatures, transition);

            let mut seen = HashSet::new();
            for row in &signatures {
                prop_assert_eq!(row.agreement_version, agreement.version);
                prop_assert!(seen.insert((row.role, row.signer_id.clone())), "duplicate signature row");
            }
            if agreement.status == AgreementStatus::LegalResolution {
                prop_assert_eq!(agreement.case_number(), Some(CASE_NUMBER));
            }
        }
    }
}
