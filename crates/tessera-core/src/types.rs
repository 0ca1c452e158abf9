use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Calendar dates — YYYYMMDD integers, the wire form of expiry checks
// ---------------------------------------------------------------------------

/// The verification date a proof statement is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrentDate(pub u32);

impl CurrentDate {
    /// Today's date in the server's calendar.
    pub fn today() -> Self {
        let s = chrono::Utc::now().format("%Y%m%d").to_string();
        // %Y%m%d always yields eight digits for contemporary dates
        Self(s.parse().unwrap_or(0))
    }
}

impl fmt::Display for CurrentDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute expiry as a YYYYMMDD integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpiryDate(pub u32);

impl ExpiryDate {
    /// Expiry one protocol period (one year) from now.
    pub fn one_period_from_now() -> Self {
        let today = chrono::Utc::now().date_naive();
        let expiry = today
            .checked_add_months(chrono::Months::new(12))
            .unwrap_or(today);
        let s = expiry.format("%Y%m%d").to_string();
        Self(s.parse().unwrap_or(0))
    }

    pub fn is_valid_at(&self, date: CurrentDate) -> bool {
        self.0 >= date.0
    }
}

impl fmt::Display for ExpiryDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Numeric identifiers
// ---------------------------------------------------------------------------

/// One run of the protocol: parameter agreement, certification, issuance and
/// decryption all happen against a single process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessInstanceId(pub u64);

impl ProcessInstanceId {
    /// Sample a fresh process instance id from the high end of the u64 range,
    /// so ids are visually distinct from small counters.
    pub fn generate<R: rand::Rng>(rng: &mut R) -> Self {
        Self(rng.gen_range(10_000_000_000_000_000_000u64..=u64::MAX))
    }
}

impl fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessInstanceId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidInput(format!("bad process instance id: {s}")))
    }
}

/// Index of an independent key-issuing authority, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorityId(pub u32);

impl AuthorityId {
    /// The tag this authority prefixes its wire-protocol commands with.
    pub fn tag(&self) -> String {
        format!("Auth-{}", self.0)
    }
}

impl fmt::Display for AuthorityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SliceId(pub u64);

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Typed string identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(ReaderGid, "Global identifier of a reader across all authorities.");
define_id!(ContentId, "Content-addressed identifier: hex SHA-256 of the stored bytes.");

// ---------------------------------------------------------------------------
// AttrType — coarse classification of certified attributes
// ---------------------------------------------------------------------------

/// Attribute classification carried in registry keys and proof signals.
/// Numeric codes are part of the wire format: 1 = role, 2 = department,
/// 0 = everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttrType {
    Other,
    Role,
    Department,
}

impl AttrType {
    pub fn code(&self) -> u8 {
        match self {
            AttrType::Other => 0,
            AttrType::Role => 1,
            AttrType::Department => 2,
        }
    }

    pub fn from_code(code: u8) -> CoreResult<Self> {
        match code {
            0 => Ok(AttrType::Other),
            1 => Ok(AttrType::Role),
            2 => Ok(AttrType::Department),
            other => Err(CoreError::InvalidInput(format!(
                "unknown attribute type code: {other}"
            ))),
        }
    }

    /// Classify an attribute value by substring, the convention certifiers
    /// and readers must agree on.
    pub fn classify(value: &str) -> Self {
        let lower = value.to_lowercase();
        if lower.contains("role") {
            AttrType::Role
        } else if lower.contains("department") {
            AttrType::Department
        } else {
            AttrType::Other
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Other => write!(f, "other"),
            AttrType::Role => write!(f, "role"),
            AttrType::Department => write!(f, "department"),
        }
    }
}

// ---------------------------------------------------------------------------
// AttributeLabel — "VALUE@A<authority>" as used in policies and bundles
// ---------------------------------------------------------------------------

/// An attribute value bound to the authority that certifies it,
/// e.g. `MANUFACTURER@A1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeLabel {
    pub value: String,
    pub authority_id: AuthorityId,
}

impl AttributeLabel {
    pub fn new(value: impl Into<String>, authority_id: AuthorityId) -> Self {
        Self {
            value: value.into(),
            authority_id,
        }
    }

    pub fn attr_type(&self) -> AttrType {
        AttrType::classify(&self.value)
    }
}

impl fmt::Display for AttributeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@A{}", self.value, self.authority_id.0)
    }
}

impl FromStr for AttributeLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (value, auth) = s
            .rsplit_once('@')
            .ok_or_else(|| CoreError::InvalidLabel(format!("missing authority part: {s}")))?;
        if value.is_empty() {
            return Err(CoreError::InvalidLabel(format!("empty value part: {s}")));
        }
        let digits = auth
            .strip_prefix('A')
            .ok_or_else(|| CoreError::InvalidLabel(format!("authority part must be A<n>: {s}")))?;
        let id: u32 = digits
            .parse()
            .map_err(|_| CoreError::InvalidLabel(format!("bad authority index: {s}")))?;
        if id == 0 {
            return Err(CoreError::InvalidLabel(format!(
                "authority indices start at 1: {s}"
            )));
        }
        Ok(Self {
            value: value.to_string(),
            authority_id: AuthorityId(id),
        })
    }
}

impl Serialize for AttributeLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AttributeLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Hex serialization helper for fixed-size byte arrays
// ---------------------------------------------------------------------------

pub mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::from_seconds(100);
        let t2 = Timestamp::from_seconds(200);
        assert!(t1 < t2);
    }

    #[test]
    fn test_expiry_validity() {
        let expiry = ExpiryDate(20260101);
        assert!(expiry.is_valid_at(CurrentDate(20250101)));
        assert!(expiry.is_valid_at(CurrentDate(20260101)));
        assert!(!expiry.is_valid_at(CurrentDate(20270101)));
    }

    #[test]
    fn test_expiry_one_period_is_in_the_future() {
        let expiry = ExpiryDate::one_period_from_now();
        assert!(expiry.is_valid_at(CurrentDate::today()));
    }

    #[test]
    fn test_process_instance_id_range() {
        let mut rng = rand::thread_rng();
        let id = ProcessInstanceId::generate(&mut rng);
        assert!(id.0 >= 10_000_000_000_000_000_000);
    }

    #[test]
    fn test_authority_tag() {
        assert_eq!(AuthorityId(3).tag(), "Auth-3");
    }

    #[test]
    fn test_attr_type_codes_roundtrip() {
        for t in [AttrType::Other, AttrType::Role, AttrType::Department] {
            assert_eq!(AttrType::from_code(t.code()).unwrap(), t);
        }
        assert!(AttrType::from_code(7).is_err());
    }

    #[test]
    fn test_attr_type_classification() {
        assert_eq!(AttrType::classify("PRODUCTION_ROLE"), AttrType::Role);
        assert_eq!(AttrType::classify("sales_department"), AttrType::Department);
        assert_eq!(AttrType::classify("MANUFACTURER"), AttrType::Other);
    }

    #[test]
    fn test_label_roundtrip() {
        let label: AttributeLabel = "MANUFACTURER@A1".parse().unwrap();
        assert_eq!(label.value, "MANUFACTURER");
        assert_eq!(label.authority_id, AuthorityId(1));
        assert_eq!(label.to_string(), "MANUFACTURER@A1");
    }

    #[test]
    fn test_label_rejects_malformed() {
        assert!("MANUFACTURER".parse::<AttributeLabel>().is_err());
        assert!("@A1".parse::<AttributeLabel>().is_err());
        assert!("X@B1".parse::<AttributeLabel>().is_err());
        assert!("X@Azz".parse::<AttributeLabel>().is_err());
        assert!("X@A0".parse::<AttributeLabel>().is_err());
    }

    #[test]
    fn test_label_serde_as_string() {
        let label = AttributeLabel::new("CUSTOMS", AuthorityId(2));
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"CUSTOMS@A2\"");
        let back: AttributeLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
    }

    #[test]
    fn test_typed_ids() {
        let gid = ReaderGid::new("reader-1");
        let cid = ContentId::new("abc123");
        assert_ne!(gid.as_str(), cid.as_str());
    }
}
