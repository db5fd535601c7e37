//! Tree layout and encoding helpers over the sled store
//!
//! All mutating operations run as multi-tree sled transactions driven from the
//! service layer; this module owns the tree handles, the cbor codec glue and
//! the index key formats.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::{Db, Tree};

use crate::audit::AuditEntry;
use crate::error::EngineError;

// Index keys are `<id> 0x00 <big-endian nanos> 0x00 <token>`. Bech32 ids never
// contain a NUL byte, so the separator is unambiguous and keys sort by id then
// issuance time.
const KEY_SEP: u8 = 0;

pub struct Store {
    pub businesses: Tree,
    pub deals: Tree,
    pub vouchers: Tree,
    /// Idempotency records, keyed by the externally supplied reference.
    pub registry: Tree,
    pub purchases: Tree,
    /// Consumed payment-provider references, keyed by reference.
    pub payment_refs: Tree,
    /// One redemption per voucher token; key presence is the uniqueness backstop.
    pub redemptions: Tree,
    /// Issuance-timestamp index per business, scanned for allowance windows.
    pub issued_by_business: Tree,
    /// Assignable vouchers per deal, oldest first; entries leave on assignment.
    pub issued_pool: Tree,
    pub audit: Tree,
}

impl Store {
    pub fn open(db: &Arc<Db>) -> Result<Self, EngineError> {
        Ok(Self {
            businesses: db.open_tree("businesses")?,
            deals: db.open_tree("deals")?,
            vouchers: db.open_tree("vouchers")?,
            registry: db.open_tree("registry")?,
            purchases: db.open_tree("purchases")?,
            payment_refs: db.open_tree("payment_refs")?,
            redemptions: db.open_tree("redemptions")?,
            issued_by_business: db.open_tree("issued_by_business")?,
            issued_pool: db.open_tree("issued_pool")?,
            audit: db.open_tree("audit")?,
        })
    }

    pub fn get<T>(tree: &Tree, key: &[u8]) -> Result<Option<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn put<T: minicbor::Encode<()>>(
        tree: &Tree,
        key: &[u8],
        value: &T,
    ) -> Result<(), EngineError> {
        tree.insert(key, encode(value)?)?;
        Ok(())
    }

    /// Vouchers issued by the business in `[from, until)`, counted from the
    /// issuance-timestamp index.
    pub fn count_issued_between(
        &self,
        business_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, EngineError> {
        let lo = index_bound(business_id, from);
        let hi = index_bound(business_id, until);

        let mut count = 0;
        for entry in self.issued_by_business.range(lo..hi) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Tokens of vouchers still in the deal's assignable pool, oldest-issued
    /// first. Candidates are re-validated inside the assignment transaction;
    /// this scan only fixes the selection order.
    pub fn issued_candidates(&self, deal_id: &str) -> Result<Vec<String>, EngineError> {
        let mut prefix = deal_id.as_bytes().to_vec();
        prefix.push(KEY_SEP);

        let mut tokens = Vec::new();
        for entry in self.issued_pool.scan_prefix(&prefix) {
            let (_, token) = entry?;
            tokens.push(String::from_utf8_lossy(&token).into_owned());
        }
        Ok(tokens)
    }

    /// All audit entries recorded for a voucher, oldest first.
    pub fn audit_trail(&self, voucher_token: &str) -> Result<Vec<AuditEntry>, EngineError> {
        let mut prefix = voucher_token.as_bytes().to_vec();
        prefix.push(KEY_SEP);

        let mut entries: Vec<AuditEntry> = Vec::new();
        for entry in self.audit.scan_prefix(&prefix) {
            let (_, bytes) = entry?;
            entries.push(decode(&bytes)?);
        }
        entries.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.action.lifecycle_rank().cmp(&b.action.lifecycle_rank()))
        });
        Ok(entries)
    }
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, EngineError> {
    minicbor::to_vec(value).map_err(|e| EngineError::Codec(e.to_string()))
}

pub fn decode<T>(bytes: &[u8]) -> Result<T, EngineError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| EngineError::Codec(e.to_string()))
}

/// Key in an issuance-timestamp index (`issued_by_business` keyed by business,
/// `issued_pool` keyed by deal).
pub fn issuance_key(id: &str, issued_at: DateTime<Utc>, token: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + token.len() + 10);
    key.extend_from_slice(id.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&timestamp_nanos(issued_at).to_be_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(token.as_bytes());
    key
}

/// Range bound for an issuance index scan: the shortest key at `at`, which
/// sorts before every real key carrying that timestamp.
fn index_bound(id: &str, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 9);
    key.extend_from_slice(id.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&timestamp_nanos(at).to_be_bytes());
    key
}

pub fn audit_key(voucher_token: &str, entry_hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(voucher_token.len() + entry_hash.len() + 1);
    key.extend_from_slice(voucher_token.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(entry_hash.as_bytes());
    key
}

fn timestamp_nanos(at: DateTime<Utc>) -> u64 {
    // engine timestamps are always well after the epoch
    at.timestamp_nanos_opt().map_or(0, |n| n.max(0) as u64)
}

// Transactional counterparts of `get`/`put`. Codec failures abort the whole
// transaction so a half-written record is never observable.

pub type TxError = ConflictableTransactionError<EngineError>;

pub fn abort(err: EngineError) -> TxError {
    ConflictableTransactionError::Abort(err)
}

pub fn tx_get<T>(tree: &TransactionalTree, key: &[u8]) -> Result<Option<T>, TxError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

pub fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> Result<(), TxError> {
    let bytes = encode(value).map_err(abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}
