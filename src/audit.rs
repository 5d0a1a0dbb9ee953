//! Append-only, hash-chained audit trail
use super::error::LifecycleError;
use super::types::{AgreementStatus, TimeStamp};
use chrono::Utc;
use std::fmt::Write;

/// What a transition wants recorded; the store fills in sequence and chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub action: String,
    pub details: String,
}

impl AuditDraft {
    pub fn new(action: &str, details: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            details: details.into(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditLogEntry {
    #[n(0)]
    pub agreement_id: String,
    #[n(1)]
    pub sequence: u64,
    #[n(2)]
    pub action: String,
    #[n(3)]
    pub performed_by: String,
    #[n(4)]
    pub performed_by_email: String,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>,
    #[n(6)]
    pub details: String,
    #[n(7)]
    pub from_status: Option<AgreementStatus>,
    #[n(8)]
    pub to_status: AgreementStatus,
    #[n(9)]
    pub prev_hash: Option<String>,
}

impl AuditLogEntry {
    pub fn build(&self) -> Result<(String, Vec<u8>), LifecycleError> {
        let cbor = minicbor::to_vec(self).map_err(|e| LifecycleError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    pub fn key(&self) -> Vec<u8> {
        audit_key(&self.agreement_id, self.sequence)
    }
}

/// Entries of one agreement sort by sequence under a shared `<id>/` prefix.
pub fn audit_key(agreement_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = audit_prefix(agreement_id).into_bytes();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

pub fn audit_prefix(agreement_id: &str) -> String {
    format!("{agreement_id}/")
}

/// Walks the chain and checks it ends at `head`.
///
/// Fails on the first entry whose sequence or `prev_hash` does not follow
/// from the one before it.
pub fn verify_chain(entries: &[AuditLogEntry], head: Option<&str>) -> Result<(), LifecycleError> {
    let mut prev: Option<String> = None;

    for (expected_seq, entry) in entries.iter().enumerate() {
        if entry.sequence != expected_seq as u64 {
            return Err(LifecycleError::AuditIntegrity(format!(
                "audit entry {} is out of sequence, expected {expected_seq}",
                entry.sequence
            )));
        }
        if entry.prev_hash != prev {
            return Err(LifecycleError::AuditIntegrity(format!(
                "audit entry {} does not chain to its predecessor",
                entry.sequence
            )));
        }
        let (hash, _) = entry.build()?;
        prev = Some(hash);
    }

    if prev.as_deref() != head {
        return Err(LifecycleError::AuditIntegrity(
            "audit trail head does not match the agreement record".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTrail {
    pub agreement_id: String,
    pub entries: Vec<AuditLogEntry>,
}

impl AuditTrail {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn actions(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.action.as_str()).collect()
    }

    /// Plain-text export, one line per entry.
    pub fn render(&self) -> String {
        let mut out = format!("Audit trail for {}\n", self.agreement_id);
        for entry in &self.entries {
            let transition = match entry.from_status {
                Some(from) if from != entry.to_status => format!("{from} -> {}", entry.to_status),
                _ => entry.to_status.to_string(),
            };
            let _ = write!(
                out,
                "#{} {} | {} | by {}",
                entry.sequence, entry.timestamp, entry.action, entry.performed_by
            );
            if !entry.performed_by_email.is_empty() {
                let _ = write!(out, " <{}>", entry.performed_by_email);
            }
            let _ = write!(out, " | {transition}");
            if !entry.details.is_empty() {
                let _ = write!(out, " | {}", entry.details);
            }
            out.push('\n');
        }
        out
    }
}
