pub mod agreement;
pub mod amendment;
pub mod audit;
pub mod capability;
pub mod config;
pub mod dispute;
pub mod error;
pub mod ledger;
pub mod machine;
pub mod notify;
pub mod permissions;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use agreement::{Agreement, AgreementDraft, ClientFingerprint, EvidenceFile, ParticipantInvite};
pub use capability::Actor;
pub use config::EngineConfig;
pub use dispute::{FriendlyResponse, Grounds};
pub use error::{ErrorKind, ErrorResponse, LifecycleError};
pub use ledger::{SignatureMetadata, SignaturePayload};
pub use machine::{Action, ActionKind};
pub use service::{ActionOutcome, ActionRequest, AgreementService};
pub use types::{AgreementStatus, PartyRole, Role};
