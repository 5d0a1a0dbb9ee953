//! Signature ledger
//!
//! Signature rows are immutable. Each one is keyed by
//! `<agreement>/<version>/<role>/<signer>` and the store refuses to overwrite
//! an existing key, so a signer holds at most one signature per role on each
//! agreement version. Witness eligibility is a fixed rule set and is never
//! looked up in the permission matrix.
use super::agreement::Agreement;
use super::capability::{Actor, Capabilities};
use super::error::LifecycleError;
use super::types::{AgreementStatus, DeviceClass, Role, TimeStamp};
use chrono::Utc;

/// Capture metadata recorded with each signature.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SignatureMetadata {
    #[n(0)]
    pub ip_address: String,
    #[n(1)]
    pub user_agent: String,
    #[n(2)]
    pub device_class: DeviceClass,
    #[n(3)]
    pub location: Option<String>,
}

impl SignatureMetadata {
    pub fn new(ip_address: &str, user_agent: &str) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            device_class: DeviceClass::from_user_agent(user_agent),
            location: None,
        }
    }
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

/// The signing payload submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePayload {
    pub signature_data: String,
    pub metadata: SignatureMetadata,
}

impl SignaturePayload {
    pub fn new(signature_data: &str, metadata: SignatureMetadata) -> Self {
        Self {
            signature_data: signature_data.to_string(),
            metadata,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    #[n(0)]
    pub agreement_id: String,
    #[n(1)]
    pub agreement_version: u32,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub signer_id: String,
    #[n(4)]
    pub signer_email: String,
    #[n(5)]
    pub payload: String,
    #[n(6)]
    pub payload_digest: String,
    #[n(7)]
    pub content_digest: String, // the agreement content that was signed
    #[n(8)]
    pub metadata: SignatureMetadata,
    #[n(9)]
    pub signed_at: TimeStamp<Utc>,
}

impl SignatureRecord {
    pub fn key(&self) -> String {
        signature_key(
            &self.agreement_id,
            self.agreement_version,
            self.role,
            &self.signer_id,
        )
    }

    pub fn build(&self) -> Result<(String, Vec<u8>), LifecycleError> {
        let cbor = minicbor::to_vec(self).map_err(|e| LifecycleError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

pub fn signature_key(agreement_id: &str, version: u32, role: Role, signer_id: &str) -> String {
    format!("{agreement_id}/{version}/{role}/{signer_id}")
}

/// Prefix shared by every signature of one agreement version.
pub fn version_prefix(agreement_id: &str, version: u32) -> String {
    format!("{agreement_id}/{version}/")
}

/// Validates a signature against the current ledger rows and builds the record.
///
/// `signatures` must hold every row of the agreement's current version. The
/// caller is expected to run this inside the transaction that inserts the
/// record.
pub fn record_signature(
    agreement: &Agreement,
    actor: &Actor,
    capabilities: &Capabilities,
    role: Role,
    payload: &SignaturePayload,
    signatures: &[SignatureRecord],
    now: &TimeStamp<Utc>,
) -> Result<SignatureRecord, LifecycleError> {
    actor.ensure_authenticated()?;

    let expected_status = match role {
        Role::Creator | Role::Counterparty => AgreementStatus::PendingSignature,
        Role::Witness => AgreementStatus::Active,
    };
    if agreement.status != expected_status {
        return Err(LifecycleError::InvalidAgreementState(match role {
            Role::Witness => format!(
                "Agreement must be active to be witnessed. Current status: {}",
                agreement.status
            ),
            _ => format!(
                "Agreement is not awaiting signatures. Current status: {}",
                agreement.status
            ),
        }));
    }

    check_eligibility(capabilities, role)?;

    if payload.signature_data.trim().is_empty() {
        return Err(LifecycleError::Validation("Signature data is required".into()));
    }

    if signatures
        .iter()
        .any(|s| s.role == role && s.signer_id == actor.id)
    {
        return Err(LifecycleError::AlreadySigned {
            role,
            version: agreement.version,
        });
    }

    Ok(SignatureRecord {
        agreement_id: agreement.id.clone(),
        agreement_version: agreement.version,
        role,
        signer_id: actor.id.clone(),
        signer_email: actor.email.clone(),
        payload: payload.signature_data.clone(),
        payload_digest: sha256::digest(payload.signature_data.as_bytes()),
        content_digest: agreement.content_digest(),
        metadata: payload.metadata.clone(),
        signed_at: now.clone(),
    })
}

fn check_eligibility(capabilities: &Capabilities, role: Role) -> Result<(), LifecycleError> {
    match role {
        Role::Creator if !capabilities.is_creator => Err(LifecycleError::IneligibleSigner(
            "Only the creator can sign as creator".into(),
        )),
        Role::Counterparty if !capabilities.is_counterparty => Err(
            LifecycleError::IneligibleSigner("You are not a counterparty on this agreement".into()),
        ),
        Role::Witness if capabilities.is_party() => Err(LifecycleError::IneligibleSigner(
            "Participants cannot witness their own agreement".into(),
        )),
        Role::Witness if !capabilities.is_witness => Err(LifecycleError::IneligibleSigner(
            "You are not designated as a witness".into(),
        )),
        _ => Ok(()),
    }
}

/// True once the rows hold a creator and a counterparty signature.
pub fn completes_pair(signatures: &[SignatureRecord]) -> bool {
    let signed = |role: Role| signatures.iter().any(|s| s.role == role);
    signed(Role::Creator) && signed(Role::Counterparty)
}
