use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::InvalidKeyError;

const ADDRESS_HEX_LEN: usize = 40;

/// A validated, lowercase `0x`-prefixed 20-byte address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressId(String);

impl AddressId {
    pub fn parse(input: &str) -> Result<Self, InvalidKeyError> {
        let invalid = |reason| InvalidKeyError {
            input: input.to_string(),
            reason,
        };
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .ok_or_else(|| invalid("missing 0x prefix"))?;
        if digits.len() != ADDRESS_HEX_LEN {
            return Err(invalid("expected 40 hex digits"));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("non-hex character"));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 20 address bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated in `parse`, so decoding cannot fail.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AddressId {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AddressId {
    type Error = InvalidKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AddressId> for String {
    fn from(id: AddressId) -> Self {
        id.0
    }
}

/// Cache key for an owner's balance of one token.
///
/// Structured rather than concatenated: `(owner, token)` and `(token, owner)`
/// are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub owner: AddressId,
    pub token: AddressId,
}

impl BalanceKey {
    pub fn new(owner: AddressId, token: AddressId) -> Self {
        Self { owner, token }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.token)
    }
}

/// Parse both identifiers and build the key. Fails fast on a malformed id.
pub fn make_key(owner: &str, token: &str) -> Result<BalanceKey, InvalidKeyError> {
    Ok(BalanceKey::new(AddressId::parse(owner)?, AddressId::parse(token)?))
}

/// Opaque allowance identifier, forwarded untouched to the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowanceId(pub String);

impl fmt::Display for AllowanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
