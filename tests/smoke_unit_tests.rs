//! Smoke screen unit tests for agreement lifecycle components
//!
//! Unit tests that span the codebase, testing behavior in isolation from the
//! integration scenarios. These are intended as a smoke screen and mostly
//! test the happy path.
//!

use chrono::Datelike;
use agreement_lifecycle::{
    agreement::{AgreementDraft, ClientFingerprint, ParticipantInvite},
    audit::{AuditLogEntry, AuditTrail},
    capability::{Actor, Capabilities},
    config::EngineConfig,
    error::{ErrorKind, ErrorResponse, LifecycleError},
    permissions::{PermissionAction, PermissionKey, PermissionSnapshot},
    types::{AgreementStatus, DeviceClass, PartyRole, Role, TimeStamp},
    utils::{is_case_number, new_case_number, new_uuid_to_bech32, AGREEMENT_HRP},
};

// UTILS MODULE TESTS
mod utils_tests {
    use super::*;

    #[test]
    fn agreement_ids_carry_their_prefix() {
        let id = new_uuid_to_bech32(AGREEMENT_HRP).unwrap();
        assert!(id.starts_with("agr_1"));
        assert_ne!(id, new_uuid_to_bech32(AGREEMENT_HRP).unwrap());
    }

    #[test]
    fn case_numbers_follow_the_pattern() {
        let case = new_case_number("LC", 2026);
        assert!(case.starts_with("LC-2026-"));
        assert_eq!(case.len(), "LC-2026-".len() + 8);
        assert!(is_case_number("LC", &case));
        assert!(!is_case_number("LC", "LC-2026-short"));
    }
}

// TYPES MODULE TESTS
mod types_tests {
    use super::*;

    #[test]
    fn status_names_round_trip_through_strings() {
        for status in AgreementStatus::ALL {
            assert_eq!(status.as_str().parse::<AgreementStatus>(), Ok(status));
        }
        assert!("archived".parse::<AgreementStatus>().is_err());
    }

    #[test]
    fn timestamp_new_with_creates_specific_time() {
        let ts = TimeStamp::new_with(2026, 3, 14, 9, 30, 0).unwrap();
        assert_eq!(ts.year(), 2026);
        assert_eq!(ts.to_datetime_utc().month(), 3);
        assert!(TimeStamp::new_with(2026, 2, 30, 0, 0, 0).is_none());
    }

    #[test]
    fn witness_is_not_a_permission_role() {
        assert_eq!(PartyRole::try_from(Role::Counterparty), Ok(PartyRole::Counterparty));
        assert!(PartyRole::try_from(Role::Witness).is_err());
    }
}

// AGREEMENT MODULE TESTS
mod agreement_tests {
    use super::*;

    #[test]
    fn draft_requires_a_title() {
        let creator = Actor::new("user_a", "a@example.com");
        let err = AgreementDraft::new()
            .set_content("terms")
            .validate_and_finalise("agr_x".into(), &creator)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn fingerprint_takes_first_forwarded_hop() {
        let fp = ClientFingerprint::capture(" 203.0.113.9 , 10.0.0.2", "Mozilla/5.0 (Linux; Android 14)", "");
        assert_eq!(fp.ip_address, "203.0.113.9");
        assert_eq!(fp.platform, "unknown");
        assert_eq!(fp.device_class, DeviceClass::Mobile);
    }

    #[test]
    fn capabilities_resolve_by_email() {
        let creator = Actor::new("user_a", "a@example.com");
        let agreement = AgreementDraft::new()
            .set_title("Loan")
            .invite(ParticipantInvite::counterparty("B@Example.com"))
            .validate_and_finalise("agr_x".into(), &creator)
            .unwrap();

        let counterparty = Actor::new("user_b", "b@example.com");
        let caps = Capabilities::resolve(&agreement, &counterparty, &[]);
        assert!(caps.is_counterparty);
        assert_eq!(caps.party_role(), Some(PartyRole::Counterparty));

        let caps = Capabilities::resolve(&agreement, &creator, &[]);
        assert_eq!(caps.party_role(), Some(PartyRole::Creator));
    }
}

// PERMISSIONS MODULE TESTS
mod permission_tests {
    use super::*;

    #[test]
    fn defaults_allow_the_common_paths() {
        let snapshot = PermissionSnapshot::defaults();
        assert!(snapshot.is_action_enabled(
            PartyRole::Creator,
            AgreementStatus::Draft,
            PermissionAction::SendForSignature
        ));
        assert!(snapshot.is_action_enabled(
            PartyRole::Counterparty,
            AgreementStatus::PendingSignature,
            PermissionAction::Sign
        ));
        assert!(!snapshot.is_action_enabled(
            PartyRole::Counterparty,
            AgreementStatus::Draft,
            PermissionAction::SendForSignature
        ));
    }

    #[test]
    fn missing_rows_are_disabled() {
        let snapshot = PermissionSnapshot::from_entries(Vec::<(PermissionKey, bool)>::new());
        assert!(snapshot.is_empty());
        assert!(!snapshot.is_action_enabled(
            PartyRole::Creator,
            AgreementStatus::Draft,
            PermissionAction::Edit
        ));
    }
}

// ERROR MODULE TESTS
mod error_tests {
    use super::*;

    #[test]
    fn response_carries_message_and_status() {
        let response = ErrorResponse::from(LifecycleError::SelfAction(
            "Another party must confirm completion".into(),
        ));
        assert_eq!(response.kind, ErrorKind::Unauthorized);
        assert_eq!(response.status, 403);
        assert_eq!(response.message, "Another party must confirm completion");
    }
}

// CONFIG AND AUDIT TESTS
mod misc_tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.case_number_prefix, "LC");
    }

    #[test]
    fn trail_renders_one_line_per_entry() {
        let entry = AuditLogEntry {
            agreement_id: "agr_x".into(),
            sequence: 0,
            action: "Agreement Created".into(),
            performed_by: "user_a".into(),
            performed_by_email: "a@example.com".into(),
            timestamp: TimeStamp::new(),
            details: "Loan".into(),
            from_status: None,
            to_status: AgreementStatus::Draft,
            prev_hash: None,
        };
        let trail = AuditTrail {
            agreement_id: "agr_x".into(),
            entries: vec![entry],
        };
        assert_eq!(trail.len(), 1);
        assert_eq!(trail.actions(), vec!["Agreement Created"]);
        assert_eq!(trail.render().lines().count(), 2);
    }
}
