//! Core value types shared by every record: timestamps, roles and statuses
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn year(&self) -> i32 {
        self.0.year()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The capacity in which someone takes part in (or signs) an agreement.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    #[n(0)]
    Creator,
    #[n(1)]
    Counterparty,
    #[n(2)]
    Witness,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Counterparty => "counterparty",
            Role::Witness => "witness",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(Role::Creator),
            "counterparty" => Ok(Role::Counterparty),
            "witness" => Ok(Role::Witness),
            other => Err(UnknownName(other.to_string())),
        }
    }
}

/// The two bound sides of an agreement, the only roles the permission matrix knows.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartyRole {
    #[n(0)]
    Creator,
    #[n(1)]
    Counterparty,
}

impl PartyRole {
    pub const ALL: [PartyRole; 2] = [PartyRole::Creator, PartyRole::Counterparty];

    pub fn as_str(&self) -> &'static str {
        Role::from(*self).as_str()
    }
}

impl From<PartyRole> for Role {
    fn from(value: PartyRole) -> Self {
        match value {
            PartyRole::Creator => Role::Creator,
            PartyRole::Counterparty => Role::Counterparty,
        }
    }
}

impl TryFrom<Role> for PartyRole {
    type Error = UnknownName;

    fn try_from(value: Role) -> Result<Self, Self::Error> {
        match value {
            Role::Creator => Ok(PartyRole::Creator),
            Role::Counterparty => Ok(PartyRole::Counterparty),
            Role::Witness => Err(UnknownName(value.as_str().to_string())),
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyRole {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartyRole::try_from(s.parse::<Role>()?)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown name '{0}'")]
pub struct UnknownName(pub String);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgreementStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingSignature,
    #[n(2)]
    Active,
    #[n(3)]
    Rejected,
    #[n(4)]
    PendingAmendment,
    #[n(5)]
    Disputed,
    #[n(6)]
    FriendlyArrangementNegotiation,
    #[n(7)]
    LegalResolution,
    #[n(8)]
    Completed,
    #[n(9)]
    Cancelled,
    #[n(10)]
    Withdrawn,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 11] = [
        AgreementStatus::Draft,
        AgreementStatus::PendingSignature,
        AgreementStatus::Active,
        AgreementStatus::Rejected,
        AgreementStatus::PendingAmendment,
        AgreementStatus::Disputed,
        AgreementStatus::FriendlyArrangementNegotiation,
        AgreementStatus::LegalResolution,
        AgreementStatus::Completed,
        AgreementStatus::Cancelled,
        AgreementStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementStatus::Draft => "draft",
            AgreementStatus::PendingSignature => "pending_signature",
            AgreementStatus::Active => "active",
            AgreementStatus::Rejected => "rejected",
            AgreementStatus::PendingAmendment => "pending_amendment",
            AgreementStatus::Disputed => "disputed",
            AgreementStatus::FriendlyArrangementNegotiation => "friendly_arrangement_negotiation",
            AgreementStatus::LegalResolution => "legal_resolution",
            AgreementStatus::Completed => "completed",
            AgreementStatus::Cancelled => "cancelled",
            AgreementStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgreementStatus::Completed | AgreementStatus::Cancelled | AgreementStatus::Withdrawn
        )
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgreementStatus {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgreementStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmendmentStatus {
    #[default]
    #[n(0)]
    None,
    #[n(1)]
    Pending,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    #[n(0)]
    Desktop,
    #[n(1)]
    Mobile,
}

impl DeviceClass {
    /// Classifies a user agent the way capture metadata is recorded on evidence.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ["mobile", "android", "iphone", "ipad"]
            .iter()
            .any(|marker| ua.contains(marker))
        {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn status_names_round_trip() {
        for status in AgreementStatus::ALL {
            assert_eq!(status.as_str().parse::<AgreementStatus>(), Ok(status));
        }
        assert!("pending".parse::<AgreementStatus>().is_err());
    }

    #[test]
    fn only_three_statuses_are_terminal() {
        let terminal: Vec<_> = AgreementStatus::ALL
            .into_iter()
            .filter(AgreementStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                AgreementStatus::Completed,
                AgreementStatus::Cancelled,
                AgreementStatus::Withdrawn
            ]
        );
    }

    #[test]
    fn witness_is_not_a_party_role() {
        assert_eq!("creator".parse::<PartyRole>(), Ok(PartyRole::Creator));
        assert!("witness".parse::<PartyRole>().is_err());
        assert!(PartyRole::try_from(Role::Witness).is_err());
    }

    #[test]
    fn device_class_from_user_agent() {
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"),
            DeviceClass::Mobile
        );
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"),
            DeviceClass::Desktop
        );
    }
}
