//! Sled persistence for agreements, signatures, audit entries and case numbers
//!
//! Every write goes through one multi-tree transaction. The agreement row
//! is the serialization point: the transaction re-reads it, checks the
//! revision the caller saw, re-reads the signatures of the current version
//! and only then runs the state machine. Anything the machine rejects
//! aborts the transaction, so no partial write is ever visible.
use super::agreement::Agreement;
use super::audit::{audit_prefix, AuditDraft, AuditLogEntry};
use super::capability::Actor;
use super::error::LifecycleError;
use super::ledger::{version_prefix, SignatureRecord};
use super::machine::Transition;
use super::notify::NotificationEvent;
use super::types::{AgreementStatus, TimeStamp};
use super::utils;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Transactional;

const AGREEMENTS: &str = "agreements";
const SIGNATURES: &str = "signatures";
const AUDIT: &str = "audit";
const CASE_NUMBERS: &str = "case_numbers";

/// What a commit wrote, handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub agreement: Agreement,
    pub previous_status: Option<AgreementStatus>,
    pub signature: Option<SignatureRecord>,
    pub signatures: Vec<SignatureRecord>, // current version, after the commit
    pub audit: AuditLogEntry,
    pub event: NotificationEvent,
}

pub struct AgreementStore {
    agreements: sled::Tree,
    signatures: sled::Tree,
    audit: sled::Tree,
    case_numbers: sled::Tree,
    case_prefix: String,
    case_attempts: u32,
}

fn abort(error: LifecycleError) -> ConflictableTransactionError<LifecycleError> {
    ConflictableTransactionError::Abort(error)
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LifecycleError> {
    minicbor::to_vec(value).map_err(|e| LifecycleError::Codec(e.to_string()))
}

fn unwrap_transaction<T>(result: Result<T, TransactionError<LifecycleError>>) -> Result<T, LifecycleError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(error)) => Err(error),
        Err(TransactionError::Storage(error)) => Err(error.into()),
    }
}

impl AgreementStore {
    pub fn open(db: &sled::Db, case_prefix: &str, case_attempts: u32) -> Result<Self, LifecycleError> {
        Ok(Self {
            agreements: db.open_tree(AGREEMENTS)?,
            signatures: db.open_tree(SIGNATURES)?,
            audit: db.open_tree(AUDIT)?,
            case_numbers: db.open_tree(CASE_NUMBERS)?,
            case_prefix: case_prefix.to_string(),
            case_attempts: case_attempts.max(1),
        })
    }

    pub fn load(&self, agreement_id: &str) -> Result<Agreement, LifecycleError> {
        let bytes = self
            .agreements
            .get(agreement_id)?
            .ok_or_else(|| LifecycleError::AgreementNotFound(agreement_id.to_string()))?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Signature rows of one version, or of every version when `version` is `None`.
    pub fn load_signatures(&self, agreement_id: &str, version: Option<u32>) -> Result<Vec<SignatureRecord>, LifecycleError> {
        let prefix = match version {
            Some(version) => version_prefix(agreement_id, version),
            None => format!("{agreement_id}/"),
        };
        let mut rows = vec![];
        for row in self.signatures.scan_prefix(prefix) {
            let (_, bytes) = row?;
            rows.push(minicbor::decode(&bytes)?);
        }
        Ok(rows)
    }

    pub fn audit_entries(&self, agreement_id: &str) -> Result<Vec<AuditLogEntry>, LifecycleError> {
        let mut entries = vec![];
        for row in self.audit.scan_prefix(audit_prefix(agreement_id)) {
            let (_, bytes) = row?;
            entries.push(minicbor::decode(&bytes)?);
        }
        Ok(entries)
    }

    /// The agreement a case number was issued to.
    pub fn case_owner(&self, case_number: &str) -> Result<Option<String>, LifecycleError> {
        Ok(self
            .case_numbers
            .get(case_number)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Writes a new agreement row and its first audit entry.
    pub fn insert_new(&self, mut agreement: Agreement, actor: &Actor, draft: AuditDraft) -> Result<Committed, LifecycleError> {
        let entry = AuditLogEntry {
            agreement_id: agreement.id.clone(),
            sequence: 0,
            action: draft.action,
            performed_by: actor.id.clone(),
            performed_by_email: actor.email.clone(),
            timestamp: agreement.created_at.clone(),
            details: draft.details,
            from_status: None,
            to_status: agreement.status,
            prev_hash: None,
        };
        let (hash, entry_cbor) = entry.build()?;

        agreement.revision = 1;
        agreement.audit_len = 1;
        agreement.audit_head = Some(hash);
        let row = encode(&agreement)?;

        let result = (&self.agreements, &self.audit).transaction(|(agreements, audit)| {
            if agreements.get(agreement.id.as_bytes())?.is_some() {
                return Err(abort(LifecycleError::Conflict(format!(
                    "Agreement {} already exists",
                    agreement.id
                ))));
            }
            agreements.insert(agreement.id.as_bytes(), row.clone())?;
            audit.insert(entry.key(), entry_cbor.clone())?;
            Ok(())
        });
        unwrap_transaction(result)?;

        Ok(Committed {
            agreement,
            previous_status: None,
            signature: None,
            signatures: vec![],
            audit: entry,
            event: NotificationEvent::AgreementCreated,
        })
    }

    /// Runs `evaluate` against the stored row and writes its result atomically.
    ///
    /// `evaluate` may run more than once if sled retries the transaction, and
    /// receives the current-version signatures plus a reserved case number
    /// when `issue_case` is set. A stale `expected_revision` aborts with
    /// [`LifecycleError::ConcurrentModification`].
    pub fn commit<F>(
        &self,
        agreement_id: &str,
        actor: &Actor,
        expected_revision: Option<u64>,
        issue_case: bool,
        evaluate: F,
    ) -> Result<Committed, LifecycleError>
    where
        F: Fn(&Agreement, &[SignatureRecord], Option<&str>) -> Result<Transition, LifecycleError>,
    {
        let trees = (&self.agreements, &self.signatures, &self.audit, &self.case_numbers);
        let result = trees.transaction(|(agreements, signatures, audit, cases)| {
            let current = match agreements.get(agreement_id.as_bytes())? {
                Some(bytes) => minicbor::decode::<Agreement>(&bytes).map_err(|e| abort(e.into()))?,
                None => return Err(abort(LifecycleError::AgreementNotFound(agreement_id.to_string()))),
            };
            if let Some(expected) = expected_revision {
                if current.revision != expected {
                    return Err(abort(LifecycleError::ConcurrentModification {
                        agreement_id: agreement_id.to_string(),
                        expected,
                        found: current.revision,
                    }));
                }
            }

            let rows = current_signatures(signatures, &current)?;
            let case_number = if issue_case {
                Some(self.reserve_case_number(cases, &current)?)
            } else {
                None
            };

            let Transition {
                agreement: mut next,
                signature,
                audit: draft,
                event,
            } = evaluate(&current, &rows, case_number.as_deref()).map_err(abort)?;

            let mut next_rows = if next.version == current.version { rows } else { vec![] };
            if let Some(record) = &signature {
                let key = record.key();
                if signatures.get(key.as_bytes())?.is_some() {
                    return Err(abort(LifecycleError::AlreadySigned {
                        role: record.role,
                        version: record.agreement_version,
                    }));
                }
                let (_, cbor) = record.build().map_err(abort)?;
                signatures.insert(key.as_bytes(), cbor)?;
                if !next.signature_keys.contains(&key) {
                    next.signature_keys.push(key);
                }
                next_rows.push(record.clone());
            }

            if let Some(issued) = next.case_number() {
                if current.case_number() != Some(issued) {
                    if cases.get(issued.as_bytes())?.is_some() {
                        return Err(abort(LifecycleError::Conflict(format!(
                            "Case number {issued} is already in use"
                        ))));
                    }
                    cases.insert(issued.as_bytes(), agreement_id.as_bytes())?;
                }
            }

            let entry = AuditLogEntry {
                agreement_id: agreement_id.to_string(),
                sequence: current.audit_len,
                action: draft.action,
                performed_by: actor.id.clone(),
                performed_by_email: actor.email.clone(),
                timestamp: next.updated_at.clone(),
                details: draft.details,
                from_status: Some(current.status),
                to_status: next.status,
                prev_hash: current.audit_head.clone(),
            };
            let (hash, entry_cbor) = entry.build().map_err(abort)?;
            audit.insert(entry.key(), entry_cbor)?;

            next.revision = current.revision + 1;
            next.audit_len = current.audit_len + 1;
            next.audit_head = Some(hash);
            agreements.insert(agreement_id.as_bytes(), encode(&next).map_err(abort)?)?;

            Ok(Committed {
                agreement: next,
                previous_status: Some(current.status),
                signature,
                signatures: next_rows,
                audit: entry,
                event,
            })
        });

        unwrap_transaction(result)
    }

    fn reserve_case_number(
        &self,
        cases: &TransactionalTree,
        agreement: &Agreement,
    ) -> ConflictableTransactionResult<String, LifecycleError> {
        let year = TimeStamp::new().year();
        for _ in 0..self.case_attempts {
            let candidate = utils::new_case_number(&self.case_prefix, year);
            if cases.get(candidate.as_bytes())?.is_none() {
                return Ok(candidate);
            }
        }
        Err(abort(LifecycleError::Conflict(format!(
            "Could not issue a unique case number for {}",
            agreement.id
        ))))
    }
}

/// Reads the current version's signature rows by the keys the row lists.
fn current_signatures(
    signatures: &TransactionalTree,
    agreement: &Agreement,
) -> ConflictableTransactionResult<Vec<SignatureRecord>, LifecycleError> {
    let prefix = version_prefix(&agreement.id, agreement.version);
    let mut rows = vec![];
    for key in agreement.signature_keys.iter().filter(|k| k.starts_with(&prefix)) {
        let bytes = signatures.get(key.as_bytes())?.ok_or_else(|| {
            abort(LifecycleError::Storage(format!("signature row {key} is missing")))
        })?;
        rows.push(minicbor::decode(&bytes).map_err(|e| abort(e.into()))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::AgreementDraft;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, AgreementStore) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("store.db")).unwrap();
        let store = AgreementStore::open(&db, "LC", 8).unwrap();
        (dir, store)
    }

    fn seeded(store: &AgreementStore, actor: &Actor) -> Agreement {
        let agreement = AgreementDraft::new()
            .set_title("Store test")
            .validate_and_finalise("agr_store".into(), actor)
            .unwrap();
        store
            .insert_new(agreement, actor, AuditDraft::new("Agreement Created", ""))
            .unwrap()
            .agreement
    }

    fn retitle(agreement: &Agreement) -> Result<Transition, LifecycleError> {
        let mut next = agreement.clone();
        next.title = format!("{} (edited)", agreement.title);
        Ok(Transition::new(next, AuditDraft::new("Title Edited", ""), NotificationEvent::ContentUpdated))
    }

    #[test]
    fn commit_bumps_revision_and_chains_audit() {
        let (_dir, store) = store();
        let actor = Actor::new("user_a", "a@example.com");
        let created = seeded(&store, &actor);
        assert_eq!(created.revision, 1);

        let committed = store
            .commit(&created.id, &actor, Some(1), false, |a, _, _| retitle(a))
            .unwrap();
        assert_eq!(committed.agreement.revision, 2);
        assert_eq!(committed.audit.sequence, 1);
        assert_eq!(committed.audit.prev_hash, created.audit_head);

        let entries = store.audit_entries(&created.id).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(crate::audit::verify_chain(&entries, committed.agreement.audit_head.as_deref()).is_ok());
    }

    #[test]
    fn stale_revision_writes_nothing() {
        let (_dir, store) = store();
        let actor = Actor::new("user_a", "a@example.com");
        let created = seeded(&store, &actor);

        let err = store
            .commit(&created.id, &actor, Some(7), false, |a, _, _| retitle(a))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ConcurrentModification { expected: 7, found: 1, .. }));
        assert_eq!(store.load(&created.id).unwrap(), created);
        assert_eq!(store.audit_entries(&created.id).unwrap().len(), 1);
    }

    #[test]
    fn aborted_evaluation_writes_nothing() {
        let (_dir, store) = store();
        let actor = Actor::new("user_a", "a@example.com");
        let created = seeded(&store, &actor);

        let err = store
            .commit(&created.id, &actor, None, true, |_, _, _| {
                Err(LifecycleError::Validation("nope".into()))
            })
            .unwrap_err();
        assert_eq!(err, LifecycleError::Validation("nope".into()));
        assert_eq!(store.load(&created.id).unwrap(), created);
    }

    #[test]
    fn missing_agreement_is_not_found() {
        let (_dir, store) = store();
        let actor = Actor::new("user_a", "a@example.com");
        assert!(matches!(store.load("agr_missing"), Err(LifecycleError::AgreementNotFound(_))));
        assert!(matches!(
            store.commit("agr_missing", &actor, None, false, |a, _, _| retitle(a)),
            Err(LifecycleError::AgreementNotFound(_))
        ));
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (_dir, store) = store();
        let actor = Actor::new("user_a", "a@example.com");
        let created = seeded(&store, &actor);

        let again = AgreementDraft::new()
            .set_title("Other")
            .validate_and_finalise(created.id.clone(), &actor)
            .unwrap();
        assert!(matches!(
            store.insert_new(again, &actor, AuditDraft::new("Agreement Created", "")),
            Err(LifecycleError::Conflict(_))
        ));
    }
}
