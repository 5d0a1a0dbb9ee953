//! Service layer API for agreement lifecycle operations
use super::agreement::{Agreement, AgreementDraft, ParticipantInvite};
use super::audit::{verify_chain, AuditDraft, AuditLogEntry, AuditTrail};
use super::capability::{Actor, Capabilities};
use super::config::EngineConfig;
use super::dispute::{FriendlyResponse, Grounds};
use super::error::{ErrorResponse, LifecycleError};
use super::ledger::{SignaturePayload, SignatureRecord};
use super::machine::{self, Action, ActionKind, DraftEdit, Evaluation};
use super::notify::{LogNotifier, NotificationContext, Notifier};
use super::permissions::{PermissionAction, PermissionMatrix};
use super::store::{AgreementStore, Committed};
use super::types::PartyRole;
use super::utils::{self, AGREEMENT_HRP};
use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One lifecycle request: who acts, on which agreement, with what payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub agreement_id: String,
    pub actor: Actor,
    pub action: Action,
    /// Revision the caller last saw. A mismatch fails with a conflict.
    /// Left unset, the revision current when the request starts is used.
    pub expected_revision: Option<u64>,
}

impl ActionRequest {
    pub fn new(agreement_id: &str, actor: &Actor, action: Action) -> Self {
        Self {
            agreement_id: agreement_id.to_string(),
            actor: actor.clone(),
            action,
            expected_revision: None,
        }
    }

    pub fn at_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

/// The success half of an action response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub agreement: Agreement,
    pub signatures: Vec<SignatureRecord>,
    pub audit: AuditLogEntry,
}

pub struct AgreementService {
    store: AgreementStore,
    permissions: Arc<PermissionMatrix>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl AgreementService {
    pub fn new(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        Self::with_config(instance, EngineConfig::default())
    }

    pub fn with_config(instance: Arc<sled::Db>, config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = AgreementStore::open(&instance, &config.case_number_prefix, config.case_number_attempts)
            .context("Failed to open agreement trees")?;
        let permissions = PermissionMatrix::open(&instance, config.permission_cache_ttl())
            .context("Failed to open permission matrix")?;
        if config.seed_default_permissions {
            let seeded = permissions.seed_defaults()?;
            debug!(seeded, "default permissions seeded");
        }

        Ok(Self {
            store,
            permissions: Arc::new(permissions),
            notifier: Arc::new(LogNotifier),
            config,
        })
    }

    /// Opens the database named in the configuration.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.database_path)
            .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?;
        Self::with_config(Arc::new(db), config)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Administrative handle on the permission matrix.
    pub fn permissions(&self) -> Arc<PermissionMatrix> {
        self.permissions.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(skip(self, creator, draft), fields(creator = %creator.id))]
    pub fn create_agreement(&self, creator: &Actor, draft: AgreementDraft) -> Result<ActionOutcome, LifecycleError> {
        creator.ensure_authenticated()?;

        let id = utils::new_uuid_to_bech32(AGREEMENT_HRP)
            .map_err(|e| LifecycleError::Storage(format!("failed to allocate agreement id: {e}")))?;
        let agreement = draft.validate_and_finalise(id, creator)?;
        let title = agreement.title.clone();

        let committed = self
            .store
            .insert_new(agreement, creator, AuditDraft::new("Agreement Created", title))?;
        Ok(self.finish(committed, creator))
    }

    pub fn add_participant(
        &self,
        agreement_id: &str,
        actor: &Actor,
        invite: ParticipantInvite,
    ) -> Result<ActionOutcome, LifecycleError> {
        self.edit(agreement_id, actor, DraftEdit::AddParticipant(invite))
    }

    pub fn update_content(
        &self,
        agreement_id: &str,
        actor: &Actor,
        title: Option<&str>,
        content: &str,
    ) -> Result<ActionOutcome, LifecycleError> {
        let edit = DraftEdit::UpdateContent {
            title: title.map(str::to_string),
            content: content.to_string(),
        };
        self.edit(agreement_id, actor, edit)
    }

    #[instrument(skip(self, actor, edit), fields(actor = %actor.id))]
    fn edit(&self, agreement_id: &str, actor: &Actor, edit: DraftEdit) -> Result<ActionOutcome, LifecycleError> {
        actor.ensure_authenticated()?;
        let revision = self.store.load(agreement_id)?.revision;
        let permissions = self.permissions.snapshot()?;

        let committed = self
            .store
            .commit(agreement_id, actor, Some(revision), false, |agreement, signatures, _| {
                let eval = Evaluation::new(agreement, signatures, actor, &permissions);
                machine::evaluate_edit(&eval, &edit)
            })
            .inspect_err(|error| debug!(%error, "draft edit rejected"))?;
        Ok(self.finish(committed, actor))
    }

    /// Builds a request pinned to the agreement's current revision. A commit
    /// landing before it executes turns it into a conflict.
    pub fn prepare(&self, agreement_id: &str, actor: &Actor, action: Action) -> Result<ActionRequest, LifecycleError> {
        actor.ensure_authenticated()?;
        let revision = self.store.load(agreement_id)?.revision;
        Ok(ActionRequest::new(agreement_id, actor, action).at_revision(revision))
    }

    /// Validates and applies one lifecycle action in a single transaction.
    #[instrument(
        skip(self, request),
        fields(
            agreement_id = %request.agreement_id,
            actor = %request.actor.id,
            action = %request.action.kind()
        )
    )]
    pub fn execute(&self, request: ActionRequest) -> Result<ActionOutcome, LifecycleError> {
        let ActionRequest {
            agreement_id,
            actor,
            action,
            expected_revision,
        } = request;
        actor.ensure_authenticated()?;
        // guards run against the revision the request started from
        let expected_revision = match expected_revision {
            Some(revision) => revision,
            None => self.store.load(&agreement_id)?.revision,
        };

        // evaluations inside the transaction share one snapshot
        let permissions = self.permissions.snapshot()?;

        let committed = self
            .store
            .commit(
                &agreement_id,
                &actor,
                Some(expected_revision),
                action.may_escalate(),
                |agreement, signatures, case_number| {
                    let eval = Evaluation::new(agreement, signatures, &actor, &permissions)
                        .with_case_number(case_number);
                    machine::evaluate(&eval, &action)
                },
            )
            .inspect_err(|error| debug!(%error, kind = %error.kind(), "action rejected"))?;
        Ok(self.finish(committed, &actor))
    }

    /// [`Self::execute`] with the error mapped to its response shape.
    pub fn respond(&self, request: ActionRequest) -> Result<ActionOutcome, ErrorResponse> {
        self.execute(request).map_err(ErrorResponse::from)
    }

    fn run(&self, agreement_id: &str, actor: &Actor, action: Action) -> Result<ActionOutcome, LifecycleError> {
        self.execute(self.prepare(agreement_id, actor, action)?)
    }

    pub fn send_for_signature(&self, agreement_id: &str, actor: &Actor) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::SendForSignature)
    }

    pub fn cancel(&self, agreement_id: &str, actor: &Actor, reason: Option<&str>) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::Cancel {
            reason: reason.map(str::to_string),
        };
        self.run(agreement_id, actor, action)
    }

    pub fn withdraw(&self, agreement_id: &str, actor: &Actor, reason: Option<&str>) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::Withdraw {
            reason: reason.map(str::to_string),
        };
        self.run(agreement_id, actor, action)
    }

    pub fn sign(
        &self,
        agreement_id: &str,
        actor: &Actor,
        role: PartyRole,
        signature: SignaturePayload,
    ) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::Sign { role, signature })
    }

    pub fn witness_sign(
        &self,
        agreement_id: &str,
        actor: &Actor,
        signature: SignaturePayload,
    ) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::WitnessSign(signature))
    }

    pub fn reject(&self, agreement_id: &str, actor: &Actor, grounds: Grounds) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::Reject(grounds))
    }

    pub fn accept_rejection(&self, agreement_id: &str, actor: &Actor) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::AcceptRejection)
    }

    pub fn dispute_rejection(
        &self,
        agreement_id: &str,
        actor: &Actor,
        grounds: Grounds,
    ) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::DisputeRejection(grounds))
    }

    pub fn propose_friendly_arrangement(
        &self,
        agreement_id: &str,
        actor: &Actor,
        terms: &str,
    ) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::ProposeFriendlyArrangement {
            terms: terms.to_string(),
        };
        self.run(agreement_id, actor, action)
    }

    pub fn respond_friendly_arrangement(
        &self,
        agreement_id: &str,
        actor: &Actor,
        response: FriendlyResponse,
    ) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::RespondFriendlyArrangement(response);
        self.run(agreement_id, actor, action)
    }

    pub fn trigger_legal_resolution(&self, agreement_id: &str, actor: &Actor) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::TriggerLegalResolution)
    }

    pub fn request_amendment(
        &self,
        agreement_id: &str,
        actor: &Actor,
        reason: &str,
        proposed_changes: Option<&str>,
    ) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::RequestAmendment {
            reason: reason.to_string(),
            proposed_changes: proposed_changes.map(str::to_string),
        };
        self.run(agreement_id, actor, action)
    }

    pub fn respond_amendment(
        &self,
        agreement_id: &str,
        actor: &Actor,
        approved: bool,
        response: Option<&str>,
    ) -> Result<ActionOutcome, LifecycleError> {
        let action = Action::RespondAmendment {
            approved,
            response: response.map(str::to_string),
        };
        self.run(agreement_id, actor, action)
    }

    pub fn request_completion(&self, agreement_id: &str, actor: &Actor) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::RequestCompletion)
    }

    pub fn confirm_completion(&self, agreement_id: &str, actor: &Actor) -> Result<ActionOutcome, LifecycleError> {
        self.run(agreement_id, actor, Action::ConfirmCompletion)
    }

    pub fn agreement(&self, agreement_id: &str) -> Result<Agreement, LifecycleError> {
        self.store.load(agreement_id)
    }

    /// Signatures on the agreement's current version.
    pub fn signatures(&self, agreement_id: &str) -> Result<Vec<SignatureRecord>, LifecycleError> {
        let agreement = self.store.load(agreement_id)?;
        self.store.load_signatures(agreement_id, Some(agreement.version))
    }

    /// Signatures on every version, superseded ones included.
    pub fn signature_history(&self, agreement_id: &str) -> Result<Vec<SignatureRecord>, LifecycleError> {
        self.store.load(agreement_id)?;
        self.store.load_signatures(agreement_id, None)
    }

    pub fn agreement_for_case(&self, case_number: &str) -> Result<Agreement, LifecycleError> {
        if !utils::is_case_number(&self.config.case_number_prefix, case_number) {
            return Err(LifecycleError::Validation(format!(
                "Invalid case number format: {case_number}"
            )));
        }
        let owner = self
            .store
            .case_owner(case_number)?
            .ok_or_else(|| LifecycleError::NotFound(format!("Case number not found: {case_number}")))?;
        self.store.load(&owner)
    }

    pub fn audit_trail(&self, agreement_id: &str, actor: &Actor) -> Result<AuditTrail, LifecycleError> {
        actor.ensure_authenticated()?;
        let agreement = self.store.load(agreement_id)?;

        let role = Capabilities::resolve(&agreement, actor, &[])
            .party_role()
            .ok_or_else(|| {
                LifecycleError::Unauthorized("Only agreement participants can view the audit trail".into())
            })?;
        if !self
            .permissions
            .is_action_enabled(role, agreement.status, PermissionAction::ViewAudit)?
        {
            return Err(LifecycleError::PermissionDenied {
                role: role.into(),
                status: agreement.status,
                action: PermissionAction::ViewAudit.to_string(),
            });
        }

        Ok(AuditTrail {
            agreement_id: agreement.id,
            entries: self.store.audit_entries(agreement_id)?,
        })
    }

    /// Recomputes the audit hash chain against the head stored on the agreement.
    pub fn verify_audit_trail(&self, agreement_id: &str) -> Result<(), LifecycleError> {
        let agreement = self.store.load(agreement_id)?;
        let entries = self.store.audit_entries(agreement_id)?;
        if entries.len() as u64 != agreement.audit_len {
            return Err(LifecycleError::AuditIntegrity(format!(
                "expected {} audit entries, found {}",
                agreement.audit_len,
                entries.len()
            )));
        }
        verify_chain(&entries, agreement.audit_head.as_deref())
    }

    pub fn available_actions(&self, agreement_id: &str, actor: &Actor) -> Result<Vec<ActionKind>, LifecycleError> {
        let agreement = self.store.load(agreement_id)?;
        let signatures = self.store.load_signatures(agreement_id, Some(agreement.version))?;
        let permissions = self.permissions.snapshot()?;

        let eval = Evaluation::new(&agreement, &signatures, actor, &permissions);
        Ok(machine::available_actions(&eval))
    }

    fn finish(&self, committed: Committed, actor: &Actor) -> ActionOutcome {
        let agreement = &committed.agreement;
        info!(
            agreement_id = %agreement.id,
            action = %committed.audit.action,
            from = ?committed.previous_status,
            to = %agreement.status,
            revision = agreement.revision,
            "transition committed"
        );

        // delivery happens after the commit and cannot undo it
        let recipients = committed.event.recipients(agreement);
        if !recipients.is_empty() {
            let context = NotificationContext::new(agreement, &actor.id, &actor.email);
            if let Err(error) = self.notifier.notify(committed.event, &recipients, &context) {
                warn!(
                    agreement_id = %agreement.id,
                    event = %committed.event,
                    %error,
                    "notification delivery failed"
                );
            }
        }

        ActionOutcome {
            agreement: committed.agreement,
            signatures: committed.signatures,
            audit: committed.audit,
        }
    }
}
