//! Credential data carried between the issuer, the claim store and the
//! holder engine.
//!
//! Claim semantics and proof formats belong to the holder engine; this
//! module only fixes the shapes that the runtime stores and forwards.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Number of leading SHA-256 bytes kept in a credential key (160 bits).
const CREDENTIAL_KEY_LEN: usize = 160 / 8;

/// Raw claim entry as issued. Serialized as a `0x`-prefixed hex string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Claim(Vec<u8>);

impl Claim {
    /// Wraps raw claim bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw claim bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the `0x`-prefixed hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Parses a hex string, with or without `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim_start_matches("0x")).map(Self)
    }
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Claim({})", self.to_hex())
    }
}

impl Serialize for Claim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Claim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Issuer state anchoring a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdenStateData {
    /// Timestamp of the block that published the state.
    pub block_ts: i64,
    /// Number of the block that published the state.
    pub block_n: u64,
    /// Issuer identity state.
    pub iden_state: String,
}

/// Proof that a claim exists in an issuer's claims tree, as delivered by
/// the issuer once the claim is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialExistence {
    /// Issuer identifier the claim is scoped to.
    pub id: String,
    /// Issuer state at issuance.
    pub iden_state_data: IdenStateData,
    /// Merkle tree proof of the claim.
    pub mtp_claim: String,
    /// The claim itself.
    pub claim: Claim,
    /// Revocations tree root at issuance.
    pub revocations_tree_root: String,
    /// Roots tree root at issuance.
    pub roots_tree_root: String,
    /// Where the issuer publishes its public state.
    pub iden_pub_url: String,
}

impl CredentialExistence {
    /// Content-derived store key: the first 160 bits of
    /// `SHA-256(id || claim)`, hex encoded.
    ///
    /// Identical issuer id and claim bytes always produce the same key.
    #[must_use]
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.claim.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..CREDENTIAL_KEY_LEN])
    }
}

/// Proof that a stored credential is still valid, built by the holder
/// engine and presented to a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialValidity {
    /// The credential being presented.
    pub credential_existence: CredentialExistence,
    /// Engine-specific validity proof (latest issuer state, roots proof).
    pub proof: serde_json::Value,
}
