//! Append-only audit entries, sealed by content hash
use chrono::Utc;

use crate::deal::TimeStamp;
use crate::error::EngineError;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub voucher_token: String,
    #[n(1)]
    pub business_id: String,
    #[n(2)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(3)]
    pub action: AuditAction,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum AuditAction {
    #[n(0)]
    Issued {
        #[n(0)]
        reference: String,
    },
    #[n(1)]
    Assigned {
        #[n(0)]
        purchase_id: String,
        #[n(1)]
        customer_id: String,
    },
    #[n(2)]
    Redeemed {
        #[n(0)]
        vendor_id: String,
    },
}

impl AuditAction {
    /// Position of the action in the voucher lifecycle. Entries recorded at
    /// the same instant sort by this rank.
    pub fn lifecycle_rank(&self) -> u8 {
        match self {
            AuditAction::Issued { .. } => 0,
            AuditAction::Assigned { .. } => 1,
            AuditAction::Redeemed { .. } => 2,
        }
    }
}

impl AuditEntry {
    pub fn new(
        voucher_token: String,
        business_id: String,
        recorded_at: TimeStamp<Utc>,
        action: AuditAction,
    ) -> Self {
        Self {
            voucher_token,
            business_id,
            recorded_at,
            action,
        }
    }
    /// Serialize the entry and derive its content hash. The hash becomes part
    /// of the storage key, so an entry can never be rewritten in place.
    pub fn seal(&self) -> Result<(String, Vec<u8>), EngineError> {
        let cbor = minicbor::to_vec(self).map_err(|e| EngineError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
