//! Actor identity and the capability set each request resolves once
use super::agreement::{Agreement, ParticipantInvite};
use super::error::LifecycleError;
use super::ledger::SignatureRecord;
use super::types::{PartyRole, Role};

/// A caller already verified by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub email: String,
}

impl Actor {
    pub fn new(id: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
        }
    }

    pub fn ensure_authenticated(&self) -> Result<(), LifecycleError> {
        if self.id.trim().is_empty() {
            return Err(LifecycleError::Unauthenticated);
        }
        Ok(())
    }

    fn is_creator_of(&self, agreement: &Agreement) -> bool {
        self.id == agreement.creator_id
            || (!self.email.is_empty() && self.email.eq_ignore_ascii_case(&agreement.creator_email))
    }
}

/// What an actor is, and has already done, on one agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub is_creator: bool,
    pub is_counterparty: bool,
    pub is_witness: bool,
    pub has_signed_as_creator: bool,
    pub has_signed_as_counterparty: bool,
    pub has_signed_as_witness: bool,
}

impl Capabilities {
    /// `signatures` must be the ledger rows of the agreement's current version.
    pub fn resolve(agreement: &Agreement, actor: &Actor, signatures: &[SignatureRecord]) -> Self {
        let holds = |role: Role| agreement.participants_with(role).any(|p| p.matches(actor));
        let signed = |role: Role| {
            signatures
                .iter()
                .any(|s| s.role == role && s.signer_id == actor.id)
        };

        Self {
            is_creator: actor.is_creator_of(agreement),
            is_counterparty: holds(Role::Counterparty),
            is_witness: holds(Role::Witness),
            has_signed_as_creator: signed(Role::Creator),
            has_signed_as_counterparty: signed(Role::Counterparty),
            has_signed_as_witness: signed(Role::Witness),
        }
    }

    pub fn is_party(&self) -> bool {
        self.is_creator || self.is_counterparty
    }

    /// The role used for permission matrix lookups.
    pub fn party_role(&self) -> Option<PartyRole> {
        if self.is_creator {
            Some(PartyRole::Creator)
        } else if self.is_counterparty {
            Some(PartyRole::Counterparty)
        } else {
            None
        }
    }

    pub fn holds(&self, role: PartyRole) -> bool {
        match role {
            PartyRole::Creator => self.is_creator,
            PartyRole::Counterparty => self.is_counterparty,
        }
    }

    pub fn has_signed_as(&self, role: Role) -> bool {
        match role {
            Role::Creator => self.has_signed_as_creator,
            Role::Counterparty => self.has_signed_as_counterparty,
            Role::Witness => self.has_signed_as_witness,
        }
    }
}

/// Adds an invitee, keeping witnesses disjoint from the bound parties.
pub fn admit_participant(agreement: &mut Agreement, invite: ParticipantInvite) -> Result<(), LifecycleError> {
    invite.validate()?;

    let as_actor = Actor {
        id: invite.account_id.clone().unwrap_or_default(),
        email: invite.email.clone().unwrap_or_default(),
    };

    if as_actor.is_creator_of(agreement) {
        return Err(LifecycleError::Validation(
            "The creator cannot be added as a participant".into(),
        ));
    }

    if let Some(existing) = agreement.participants.iter().find(|p| p.matches(&as_actor)) {
        if existing.role == invite.role {
            return Err(LifecycleError::Conflict(format!(
                "Participant is already a {} on this agreement",
                existing.role
            )));
        }
        // any other pairing puts a witness next to a party role
        return Err(LifecycleError::Validation(
            "Participants cannot witness their own agreement".into(),
        ));
    }

    // witness and party records must share an identity field to be told apart
    let inviting_witness = invite.role == Role::Witness;
    let unverifiable = agreement
        .participants
        .iter()
        .filter(|p| (p.role == Role::Witness) != inviting_witness)
        .any(|p| {
            let by_id = p.account_id.is_some() && invite.account_id.is_some();
            let by_email = p.email.is_some() && invite.email.is_some();
            !by_id && !by_email
        });
    if unverifiable {
        return Err(LifecycleError::Validation(
            "Witnesses and parties must share an identifier. Invite both by email or both by account id.".into(),
        ));
    }

    agreement.participants.push(invite.into_participant());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::AgreementDraft;

    fn agreement() -> Agreement {
        AgreementDraft::new()
            .set_title("Rent")
            .invite(ParticipantInvite::counterparty("tenant@example.com").with_account("user_tenant"))
            .invite(ParticipantInvite::witness("notary@example.com"))
            .validate_and_finalise("agr_test".into(), &Actor::new("user_owner", "owner@example.com"))
            .unwrap()
    }

    #[test]
    fn resolves_roles_by_id_or_email() {
        let agreement = agreement();

        let owner = Capabilities::resolve(&agreement, &Actor::new("user_owner", ""), &[]);
        assert!(owner.is_creator && !owner.is_counterparty);
        assert_eq!(owner.party_role(), Some(PartyRole::Creator));

        // invitee signed up after the invite, matched on email
        let tenant = Capabilities::resolve(&agreement, &Actor::new("user_new", "TENANT@example.com"), &[]);
        assert!(tenant.is_counterparty);

        let notary = Capabilities::resolve(&agreement, &Actor::new("user_notary", "notary@example.com"), &[]);
        assert!(notary.is_witness && !notary.is_party());
        assert_eq!(notary.party_role(), None);
    }

    #[test]
    fn witness_cannot_be_a_party() {
        let mut agreement = agreement();

        let err = admit_participant(&mut agreement, ParticipantInvite::witness("tenant@example.com"));
        assert!(matches!(err, Err(LifecycleError::Validation(_))));

        let err = admit_participant(&mut agreement, ParticipantInvite::counterparty("notary@example.com"));
        assert!(matches!(err, Err(LifecycleError::Validation(_))));

        let err = admit_participant(&mut agreement, ParticipantInvite::witness("owner@example.com"));
        assert!(matches!(err, Err(LifecycleError::Validation(_))));
    }

    #[test]
    fn witness_without_shared_identifier_is_refused() {
        let creator = Actor::new("user_owner", "owner@example.com");
        let mut agreement = AgreementDraft::new()
            .set_title("Rent")
            .invite(ParticipantInvite::witness("notary@example.com"))
            .validate_and_finalise("agr_test".into(), &creator)
            .unwrap();

        // known by account only, so it cannot be compared with the email-only witness
        let by_account = ParticipantInvite {
            email: None,
            ..ParticipantInvite::counterparty("unused@example.com").with_account("user_notary")
        };
        let err = admit_participant(&mut agreement, by_account.clone()).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Validation(
                "Witnesses and parties must share an identifier. Invite both by email or both by account id.".into()
            )
        );
        assert_eq!(agreement.participants.len(), 1);

        // with an email as well, the two can be told apart
        let both = ParticipantInvite {
            email: Some("tenant@example.com".into()),
            ..by_account
        };
        admit_participant(&mut agreement, both).unwrap();
        assert_eq!(agreement.participants.len(), 2);
    }

    #[test]
    fn duplicate_invite_conflicts() {
        let mut agreement = agreement();
        let err = admit_participant(&mut agreement, ParticipantInvite::counterparty("tenant@example.com"));
        assert!(matches!(err, Err(LifecycleError::Conflict(_))));
    }

    #[test]
    fn blank_actor_is_unauthenticated() {
        assert_eq!(
            Actor::new("  ", "x@example.com").ensure_authenticated(),
            Err(LifecycleError::Unauthenticated)
        );
    }
}
