//! Permission matrix
//!
//! A sled-backed table of `(role, status, action) -> enabled` with an
//! in-memory snapshot cached for a short TTL. Every write through
//! [`PermissionMatrix`] drops the cached snapshot, so the next evaluation
//! always sees it. Lookups that miss the table are disabled.
use super::error::LifecycleError;
use super::types::{AgreementStatus, PartyRole, UnknownName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionAction {
    SendForSignature,
    Cancel,
    Withdraw,
    Sign,
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
    ViewAudit,
    Edit,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 16] = [
        PermissionAction::SendForSignature,
        PermissionAction::Cancel,
        PermissionAction::Withdraw,
        PermissionAction::Sign,
        PermissionAction::Reject,
        PermissionAction::AcceptRejection,
        PermissionAction::DisputeRejection,
        PermissionAction::ProposeFriendlyArrangement,
        PermissionAction::RespondFriendlyArrangement,
        PermissionAction::TriggerLegalResolution,
        PermissionAction::RequestAmendment,
        PermissionAction::RespondAmendment,
        PermissionAction::RequestCompletion,
        PermissionAction::ConfirmCompletion,
        PermissionAction::ViewAudit,
        PermissionAction::Edit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::SendForSignature => "send_for_signature",
            PermissionAction::Cancel => "cancel",
            PermissionAction::Withdraw => "withdraw",
            PermissionAction::Sign => "sign",
            PermissionAction::Reject => "reject",
            PermissionAction::AcceptRejection => "accept_rejection",
            PermissionAction::DisputeRejection => "dispute_rejection",
            PermissionAction::ProposeFriendlyArrangement => "propose_friendly_arrangement",
            PermissionAction::RespondFriendlyArrangement => "respond_friendly_arrangement",
            PermissionAction::TriggerLegalResolution => "trigger_legal_resolution",
            PermissionAction::RequestAmendment => "request_amendment",
            PermissionAction::RespondAmendment => "respond_amendment",
            PermissionAction::RequestCompletion => "request_completion",
            PermissionAction::ConfirmCompletion => "confirm_completion",
            PermissionAction::ViewAudit => "view_audit",
            PermissionAction::Edit => "edit",
        }
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionAction {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

pub type PermissionKey = (PartyRole, AgreementStatus, PermissionAction);

fn encode_key(role: PartyRole, status: AgreementStatus, action: PermissionAction) -> String {
    format!("{role}/{status}/{action}")
}

fn decode_key(raw: &[u8]) -> Option<PermissionKey> {
    let raw = std::str::from_utf8(raw).ok()?;
    let mut parts = raw.split('/');
    let role = parts.next()?.parse().ok()?;
    let status = parts.next()?.parse().ok()?;
    let action = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((role, status, action))
}

/// An immutable copy of the table, shared by every evaluation made while it is fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    entries: HashMap<PermissionKey, bool>,
}

impl PermissionSnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = (PermissionKey, bool)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// A fresh snapshot of the built-in table.
    pub fn defaults() -> Self {
        Self::from_entries(default_entries().into_iter().map(|key| (key, true)))
    }

    pub fn is_action_enabled(&self, role: PartyRole, status: AgreementStatus, action: PermissionAction) -> bool {
        self.entries
            .get(&(role, status, action))
            .copied()
            .unwrap_or(false)
    }

    pub fn enabled_actions(&self, role: PartyRole, status: AgreementStatus) -> Vec<PermissionAction> {
        PermissionAction::ALL
            .into_iter()
            .filter(|action| self.is_action_enabled(role, status, *action))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct CachedSnapshot {
    snapshot: Arc<PermissionSnapshot>,
    loaded_at: Instant,
}

pub struct PermissionMatrix {
    tree: sled::Tree,
    ttl: Duration,
    cache: RwLock<Option<CachedSnapshot>>,
    generation: AtomicU64, // bumped by every write
}

impl PermissionMatrix {
    pub const TREE: &'static str = "permissions";

    pub fn open(db: &sled::Db, ttl: Duration) -> Result<Self, LifecycleError> {
        Ok(Self {
            tree: db.open_tree(Self::TREE)?,
            ttl,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the cached snapshot, reloading it once the TTL has passed.
    pub fn snapshot(&self) -> Result<Arc<PermissionSnapshot>, LifecycleError> {
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(cached.snapshot.clone());
            }
        }
        self.reload()
    }

    pub fn is_action_enabled(
        &self,
        role: PartyRole,
        status: AgreementStatus,
        action: PermissionAction,
    ) -> Result<bool, LifecycleError> {
        Ok(self.snapshot()?.is_action_enabled(role, status, action))
    }

    pub fn enabled_actions(&self, role: PartyRole, status: AgreementStatus) -> Result<Vec<PermissionAction>, LifecycleError> {
        Ok(self.snapshot()?.enabled_actions(role, status))
    }

    /// Reads the whole table from storage and replaces the cached snapshot.
    pub fn reload(&self) -> Result<Arc<PermissionSnapshot>, LifecycleError> {
        let generation = self.generation.load(Ordering::Acquire);
        let mut entries = HashMap::new();
        for row in self.tree.iter() {
            let (key, value) = row?;
            match decode_key(&key) {
                Some(decoded) => {
                    entries.insert(decoded, value.first() == Some(&1));
                }
                None => debug!(key = %String::from_utf8_lossy(&key), "skipping unrecognised permission row"),
            }
        }

        let snapshot = Arc::new(PermissionSnapshot { entries });
        debug!(entries = snapshot.len(), "permission matrix reloaded");

        // a write that raced this read must not be masked by the cache
        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = Some(CachedSnapshot {
                snapshot: snapshot.clone(),
                loaded_at: Instant::now(),
            });
        }
        Ok(snapshot)
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    pub fn set_permission(
        &self,
        role: PartyRole,
        status: AgreementStatus,
        action: PermissionAction,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        self.tree
            .insert(encode_key(role, status, action), vec![u8::from(enabled)])?;
        self.invalidate();
        debug!(%role, %status, %action, enabled, "permission updated");
        Ok(())
    }

    /// Deletes the row, which leaves the action disabled.
    pub fn remove_permission(
        &self,
        role: PartyRole,
        status: AgreementStatus,
        action: PermissionAction,
    ) -> Result<bool, LifecycleError> {
        let removed = self.tree.remove(encode_key(role, status, action))?.is_some();
        self.invalidate();
        Ok(removed)
    }

    /// Writes the built-in table for rows that are not present yet.
    ///
    /// Rows an administrator already set are left alone. Returns how many
    /// rows were written.
    pub fn seed_defaults(&self) -> Result<usize, LifecycleError> {
        let mut written = 0;
        for (role, status, action) in default_entries() {
            let swapped = self
                .tree
                .compare_and_swap(encode_key(role, status, action), None as Option<&[u8]>, Some(vec![1u8]))?;
            if swapped.is_ok() {
                written += 1;
            }
        }
        self.invalidate();
        Ok(written)
    }
}

/// The table shipped with the engine.
pub fn default_entries() -> Vec<PermissionKey> {
    use AgreementStatus::*;
    use PermissionAction::*;

    const ACTIVE: &[PermissionAction] = &[
        Reject,
        AcceptRejection,
        DisputeRejection,
        TriggerLegalResolution,
        RequestCompletion,
        ConfirmCompletion,
    ];

    let creator: &[(AgreementStatus, &[PermissionAction])] = &[
        (Draft, &[SendForSignature, Cancel, Withdraw, Edit]),
        (PendingSignature, &[Sign, Cancel, RequestAmendment]),
        (Active, ACTIVE),
        (Active, &[RequestAmendment]),
        (Rejected, &[DisputeRejection]),
        (Disputed, &[ProposeFriendlyArrangement, TriggerLegalResolution]),
        (FriendlyArrangementNegotiation, &[RespondFriendlyArrangement]),
    ];
    let counterparty: &[(AgreementStatus, &[PermissionAction])] = &[
        (PendingSignature, &[Sign, Reject]),
        (Active, ACTIVE),
        (Rejected, &[DisputeRejection]),
        (Disputed, &[ProposeFriendlyArrangement, TriggerLegalResolution]),
        (FriendlyArrangementNegotiation, &[RespondFriendlyArrangement]),
        (PendingAmendment, &[RespondAmendment]),
    ];

    let mut entries = vec![];
    for (role, table) in [(PartyRole::Creator, creator), (PartyRole::Counterparty, counterparty)] {
        for (status, actions) in table {
            entries.extend(actions.iter().map(|action| (role, *status, *action)));
        }
        entries.extend(AgreementStatus::ALL.into_iter().map(|status| (role, status, ViewAudit)));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn matrix(ttl: Duration) -> (tempfile::TempDir, sled::Db, PermissionMatrix) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("permissions.db")).unwrap();
        let matrix = PermissionMatrix::open(&db, ttl).unwrap();
        (dir, db, matrix)
    }

    #[test]
    fn missing_rows_are_disabled() {
        let (_dir, _db, matrix) = matrix(Duration::from_secs(60));
        assert!(!matrix
            .is_action_enabled(PartyRole::Creator, AgreementStatus::Draft, PermissionAction::SendForSignature)
            .unwrap());
    }

    #[test]
    fn writes_take_effect_before_ttl_expiry() {
        let (_dir, _db, matrix) = matrix(Duration::from_secs(3600));
        matrix.seed_defaults().unwrap();

        let role = PartyRole::Creator;
        let status = AgreementStatus::Draft;
        assert!(matrix.is_action_enabled(role, status, PermissionAction::Cancel).unwrap());

        matrix.set_permission(role, status, PermissionAction::Cancel, false).unwrap();
        assert!(!matrix.is_action_enabled(role, status, PermissionAction::Cancel).unwrap());

        matrix.set_permission(role, status, PermissionAction::Cancel, true).unwrap();
        assert!(matrix.remove_permission(role, status, PermissionAction::Cancel).unwrap());
        assert!(!matrix.is_action_enabled(role, status, PermissionAction::Cancel).unwrap());
    }

    #[test]
    fn seeding_keeps_admin_overrides() {
        let (_dir, _db, matrix) = matrix(Duration::from_secs(60));
        let seeded = matrix.seed_defaults().unwrap();
        assert_eq!(seeded, default_entries().len());

        matrix
            .set_permission(PartyRole::Counterparty, AgreementStatus::PendingSignature, PermissionAction::Reject, false)
            .unwrap();
        assert_eq!(matrix.seed_defaults().unwrap(), 0);
        assert!(!matrix
            .is_action_enabled(PartyRole::Counterparty, AgreementStatus::PendingSignature, PermissionAction::Reject)
            .unwrap());
    }

    #[test]
    fn stale_snapshot_is_served_until_invalidated() {
        let (_dir, db, matrix) = matrix(Duration::from_secs(3600));
        matrix.seed_defaults().unwrap();
        let before = matrix.snapshot().unwrap();

        // bypass the matrix API, the cache cannot know about this write
        let tree = db.open_tree(PermissionMatrix::TREE).unwrap();
        tree.insert("creator/draft/cancel", vec![0u8]).unwrap();
        assert!(Arc::ptr_eq(&before, &matrix.snapshot().unwrap()));

        matrix.invalidate();
        assert!(!matrix
            .is_action_enabled(PartyRole::Creator, AgreementStatus::Draft, PermissionAction::Cancel)
            .unwrap());
    }

    #[test]
    fn default_table_shape() {
        let snapshot = PermissionSnapshot::defaults();
        assert_eq!(
            snapshot.enabled_actions(PartyRole::Counterparty, AgreementStatus::PendingSignature),
            vec![PermissionAction::Sign, PermissionAction::Reject, PermissionAction::ViewAudit]
        );
        assert!(!snapshot.is_action_enabled(
            PartyRole::Counterparty,
            AgreementStatus::Draft,
            PermissionAction::SendForSignature
        ));
        assert!(snapshot.is_action_enabled(
            PartyRole::Counterparty,
            AgreementStatus::PendingAmendment,
            PermissionAction::RespondAmendment
        ));
    }

    #[test]
    fn keys_round_trip_through_storage_format() {
        let key = encode_key(PartyRole::Counterparty, AgreementStatus::FriendlyArrangementNegotiation, PermissionAction::RespondFriendlyArrangement);
        assert_eq!(key, "counterparty/friendly_arrangement_negotiation/respond_friendly_arrangement");
        assert!(decode_key(key.as_bytes()).is_some());
        assert!(decode_key(b"witness/active/sign").is_none());
    }
}
