//! Service layer API for the voucher lifecycle operations
//!
//! Every write path runs as a multi-tree sled transaction. Preconditions are
//! checked before the transaction for fast failure and re-checked inside it
//! immediately before the write, so the decision always reflects the state the
//! transaction commits against.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sled::Transactional;
use sled::transaction::TransactionError;
use tracing::{info, warn};

use crate::allowance::{self, AllowanceDecision};
use crate::audit::{AuditAction, AuditEntry};
use crate::clock::{Clock, SystemClock};
use crate::deal::{Business, Deal, DealStatus, TimeStamp};
use crate::error::EngineError;
use crate::money::Money;
use crate::store::{self, Store, abort, tx_get, tx_put};
use crate::utils::new_uuid_to_bech32;
use crate::voucher::{IdempotencyRecord, Purchase, Redemption, Voucher, VoucherStatus};

/// Downstream usage-pattern monitoring, notified after a purchase commits.
/// Best-effort only: a failing monitor never affects the committed purchase.
pub trait UsageMonitor: Send + Sync {
    fn purchase_confirmed(&self, purchase: &Purchase) -> anyhow::Result<()>;
}

/// Outcome of registering an idempotency reference. `created` is false when
/// the reference was already known, in which case `voucher` is the original
/// voucher, byte-for-byte what the first call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub created: bool,
    pub voucher: Voucher,
}

pub struct VoucherService {
    store: Store,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<dyn UsageMonitor>>,
    // Serializes the allowance check with its issuance per business; sled
    // transactions cannot scan the issuance index, so the read-then-decide
    // step has to be fenced here.
    issuance_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VoucherService {
    pub fn new(db: Arc<sled::Db>) -> Result<Self, EngineError> {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<sled::Db>, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        Ok(Self {
            store: Store::open(&db)?,
            clock,
            monitor: None,
            issuance_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn UsageMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    // CATALOG ADMINISTRATION

    /// Register a business owned by the given verified vendor identity.
    /// `monthly_allowance` of `None` means unlimited issuance.
    pub fn register_business(
        &self,
        name: &str,
        owner_id: &str,
        monthly_allowance: Option<u32>,
    ) -> Result<Business, EngineError> {
        if name.trim().is_empty() || owner_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "business name and owner must be non-empty".into(),
            ));
        }

        let business = Business {
            id: mint_id("biz")?,
            name: name.to_owned(),
            owner_id: owner_id.to_owned(),
            monthly_allowance,
        };
        Store::put(&self.store.businesses, business.id.as_bytes(), &business)?;

        info!(business = %business.id, owner = %owner_id, "business registered");
        Ok(business)
    }

    /// Create a deal in `Inactive` status. It accepts no vouchers until
    /// activated.
    #[allow(clippy::too_many_arguments)]
    pub fn create_deal(
        &self,
        business_id: &str,
        title: &str,
        original_value: Money,
        deal_price: Money,
        redeem_from: Option<TimeStamp<Utc>>,
        redeem_until: Option<TimeStamp<Utc>>,
        quantity_cap: Option<u32>,
    ) -> Result<Deal, EngineError> {
        Store::get::<Business>(&self.store.businesses, business_id.as_bytes())?
            .ok_or(EngineError::BusinessNotFound)?;
        if title.trim().is_empty() {
            return Err(EngineError::InvalidInput("deal title must be non-empty".into()));
        }
        if deal_price > original_value {
            return Err(EngineError::InvalidInput(
                "deal price exceeds original value".into(),
            ));
        }
        if let (Some(from), Some(until)) = (&redeem_from, &redeem_until)
            && until <= from
        {
            return Err(EngineError::InvalidInput(
                "redemption window ends before it starts".into(),
            ));
        }

        let deal = Deal {
            id: mint_id("deal")?,
            business_id: business_id.to_owned(),
            title: title.to_owned(),
            status: DealStatus::Inactive,
            original_value,
            deal_price,
            redeem_from,
            redeem_until,
            quantity_cap,
            issued_total: 0,
        };
        Store::put(&self.store.deals, deal.id.as_bytes(), &deal)?;

        info!(deal = %deal.id, business = %business_id, "deal created");
        Ok(deal)
    }

    pub fn activate_deal(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.transition_deal(deal_id, DealStatus::Active)
    }

    pub fn archive_deal(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.transition_deal(deal_id, DealStatus::Archived)
    }

    fn transition_deal(&self, deal_id: &str, to: DealStatus) -> Result<Deal, EngineError> {
        run_tx(self.store.deals.transaction(|deals| {
            let mut deal: Deal = tx_get(deals, deal_id.as_bytes())?
                .ok_or_else(|| abort(EngineError::DealNotFound))?;
            // the deal lifecycle is monotonic too: archived deals stay archived
            if deal.status == DealStatus::Archived {
                return Err(abort(EngineError::DealNotActive));
            }
            deal.status = to;
            tx_put(deals, deal_id.as_bytes(), &deal)?;
            Ok(deal)
        }))
    }

    /// Change a deal's value and price going forward. Existing redemption
    /// snapshots are untouched.
    pub fn reprice_deal(
        &self,
        deal_id: &str,
        original_value: Money,
        deal_price: Money,
    ) -> Result<Deal, EngineError> {
        if deal_price > original_value {
            return Err(EngineError::InvalidInput(
                "deal price exceeds original value".into(),
            ));
        }
        run_tx(self.store.deals.transaction(|deals| {
            let mut deal: Deal = tx_get(deals, deal_id.as_bytes())?
                .ok_or_else(|| abort(EngineError::DealNotFound))?;
            deal.original_value = original_value;
            deal.deal_price = deal_price;
            tx_put(deals, deal_id.as_bytes(), &deal)?;
            Ok(deal)
        }))
    }

    // IDEMPOTENCY REGISTRY

    /// Register an externally supplied reference against a deal, issuing the
    /// voucher it maps to when the reference is new. Re-registering an
    /// existing reference returns the original voucher with `created: false`.
    pub fn register(
        &self,
        reference: &str,
        business_id: &str,
        deal_id: &str,
    ) -> Result<Registration, EngineError> {
        let deal = Store::get::<Deal>(&self.store.deals, deal_id.as_bytes())?
            .ok_or(EngineError::ValidationNotFound)?;
        Store::get::<Business>(&self.store.businesses, business_id.as_bytes())?
            .ok_or(EngineError::ValidationNotFound)?;
        if deal.business_id != business_id {
            return Err(EngineError::ValidationNotFound);
        }

        let (voucher, created) = self.issue_inner(reference, &deal)?;
        Ok(Registration { created, voucher })
    }

    // ISSUANCE ENGINE

    /// Issue a voucher for the deal, idempotently per `reference`. Repeat
    /// calls with the same reference return the original voucher unchanged.
    pub fn issue(&self, reference: &str, deal_id: &str) -> Result<Voucher, EngineError> {
        let deal = Store::get::<Deal>(&self.store.deals, deal_id.as_bytes())?
            .ok_or(EngineError::ValidationNotFound)?;

        let (voucher, created) = self.issue_inner(reference, &deal)?;
        if created {
            info!(voucher = %voucher.token, deal = %deal_id, "voucher issued");
        }
        Ok(voucher)
    }

    fn issue_inner(&self, reference: &str, deal: &Deal) -> Result<(Voucher, bool), EngineError> {
        if reference.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "idempotency reference must be non-empty".into(),
            ));
        }

        // Fast path: a known reference resolves before any state checks, so a
        // retry succeeds even after the deal was archived or the cap filled.
        if let Some(voucher) = self.registered_voucher(reference)? {
            return Ok((voucher, false));
        }

        let business = Store::get::<Business>(&self.store.businesses, deal.business_id.as_bytes())?
            .ok_or(EngineError::ValidationNotFound)?;

        let lock = self.issuance_lock(&deal.business_id);
        let _guard = lock.lock().expect("issuance lock poisoned");

        // A duplicate reference that lost the race to the lock resolves here;
        // otherwise the allowance decision below could reject a retry whose
        // voucher already exists.
        if let Some(voucher) = self.registered_voucher(reference)? {
            return Ok((voucher, false));
        }

        let now = self.clock.now();
        let decision = self.allowance_at(&business, 1, now)?;
        if !decision.allowed {
            return Err(EngineError::AllowanceExceeded {
                issued: decision.current_month_issued,
                remaining: decision.remaining.unwrap_or(0),
            });
        }

        let token = mint_id("vch")?;
        let deal_id = deal.id.clone();
        let trees: &[&sled::Tree] = &[
            &self.store.deals,              // 0
            &self.store.registry,           // 1
            &self.store.vouchers,           // 2
            &self.store.issued_by_business, // 3
            &self.store.issued_pool,        // 4
            &self.store.audit,              // 5
        ];
        run_tx(trees.transaction(|tx| {
            let (deals, registry, vouchers, issued_idx, pool, audit) =
                (&tx[0], &tx[1], &tx[2], &tx[3], &tx[4], &tx[5]);

            // A concurrent call holding the same reference must resolve to the
            // same voucher: re-check the registry inside the transaction.
            if let Some(record) = tx_get::<IdempotencyRecord>(registry, reference.as_bytes())? {
                let voucher = tx_get::<Voucher>(vouchers, record.voucher_token.as_bytes())?
                    .ok_or_else(|| abort(EngineError::VoucherNotFound))?;
                return Ok((voucher, false));
            }

            let mut current: Deal = tx_get(deals, deal_id.as_bytes())?
                .ok_or_else(|| abort(EngineError::ValidationNotFound))?;
            if !current.is_active() {
                return Err(abort(EngineError::DealNotActive));
            }
            if current.sold_out() {
                return Err(abort(EngineError::DealSoldOut));
            }
            current.issued_total += 1;

            let issued_at = TimeStamp::from(now);
            let voucher = Voucher {
                token: token.clone(),
                deal_id: deal_id.clone(),
                business_id: current.business_id.clone(),
                status: VoucherStatus::Issued,
                issued_at: issued_at.clone(),
                expires_at: current.redeem_until.clone(),
                redeemed_at: None,
            };
            let record = IdempotencyRecord {
                reference: reference.to_owned(),
                voucher_token: token.clone(),
                business_id: current.business_id.clone(),
                deal_id: deal_id.clone(),
                registered_at: issued_at.clone(),
            };
            let entry = AuditEntry::new(
                token.clone(),
                current.business_id.clone(),
                issued_at,
                AuditAction::Issued {
                    reference: reference.to_owned(),
                },
            );
            let (entry_hash, entry_cbor) = entry.seal().map_err(abort)?;

            tx_put(deals, deal_id.as_bytes(), &current)?;
            tx_put(registry, reference.as_bytes(), &record)?;
            tx_put(vouchers, token.as_bytes(), &voucher)?;
            issued_idx.insert(
                store::issuance_key(&current.business_id, now, &token).as_slice(),
                token.as_bytes(),
            )?;
            pool.insert(
                store::issuance_key(&deal_id, now, &token).as_slice(),
                token.as_bytes(),
            )?;
            audit.insert(
                store::audit_key(&token, &entry_hash).as_slice(),
                entry_cbor,
            )?;

            Ok((voucher, true))
        }))
    }

    fn registered_voucher(&self, reference: &str) -> Result<Option<Voucher>, EngineError> {
        let Some(record) =
            Store::get::<IdempotencyRecord>(&self.store.registry, reference.as_bytes())?
        else {
            return Ok(None);
        };
        let voucher = Store::get(&self.store.vouchers, record.voucher_token.as_bytes())?
            .ok_or(EngineError::VoucherNotFound)?;
        Ok(Some(voucher))
    }

    // ALLOWANCE COUNTER

    /// How many vouchers the business issued in the current calendar month,
    /// and whether `requested` more would still fit under its cap.
    pub fn check_allowance(
        &self,
        business_id: &str,
        requested: u64,
    ) -> Result<AllowanceDecision, EngineError> {
        let business = Store::get::<Business>(&self.store.businesses, business_id.as_bytes())?
            .ok_or(EngineError::BusinessNotFound)?;
        self.allowance_at(&business, requested, self.clock.now())
    }

    fn allowance_at(
        &self,
        business: &Business,
        requested: u64,
        now: DateTime<Utc>,
    ) -> Result<AllowanceDecision, EngineError> {
        let (from, until) = allowance::month_window(now);
        let issued = self.store.count_issued_between(&business.id, from, until)?;
        Ok(allowance::decide(business.monthly_allowance, issued, requested))
    }

    // PURCHASE ASSIGNMENT ENGINE

    /// Bind a paying customer to exactly one issued voucher of the deal.
    ///
    /// Selection is oldest-issued-first. The voucher's status is re-read
    /// inside the transaction, so two concurrent confirmations can never be
    /// assigned the same voucher; the loser simply moves to the next
    /// candidate.
    pub fn confirm_purchase(
        &self,
        customer_id: &str,
        deal_id: &str,
        payment_reference: &str,
        amount_paid: Money,
    ) -> Result<(Purchase, Voucher), EngineError> {
        if customer_id.trim().is_empty() || payment_reference.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "customer and payment reference must be non-empty".into(),
            ));
        }

        let deal = Store::get::<Deal>(&self.store.deals, deal_id.as_bytes())?
            .ok_or(EngineError::DealNotFound)?;
        if !deal.is_active() {
            return Err(EngineError::DealNotActive);
        }
        if amount_paid != deal.deal_price {
            return Err(EngineError::AmountMismatch {
                paid: amount_paid,
                price: deal.deal_price,
            });
        }
        let now = self.clock.now();
        // availability means an unexpired voucher still in Issued state; a
        // pool holding only expired entries is as empty as no pool at all
        let mut candidates = Vec::new();
        for token in self.store.issued_candidates(deal_id)? {
            if let Some(voucher) = Store::get::<Voucher>(&self.store.vouchers, token.as_bytes())?
                && voucher.is_assignable(now)
            {
                candidates.push(token);
            }
        }
        if candidates.is_empty() {
            return Err(EngineError::NoVoucherAvailable);
        }
        if self.store.payment_refs.get(payment_reference.as_bytes())?.is_some() {
            return Err(EngineError::PaymentAlreadyUsed);
        }

        let purchase_id = mint_id("pur")?;
        let trees: &[&sled::Tree] = &[
            &self.store.deals,        // 0
            &self.store.vouchers,     // 1
            &self.store.purchases,    // 2
            &self.store.payment_refs, // 3
            &self.store.issued_pool,  // 4
            &self.store.audit,        // 5
        ];
        for token in candidates {
            let assigned = run_tx(trees.transaction(|tx| {
                let (deals, vouchers, purchases, payments, pool, audit) =
                    (&tx[0], &tx[1], &tx[2], &tx[3], &tx[4], &tx[5]);

                let current: Deal = tx_get(deals, deal_id.as_bytes())?
                    .ok_or_else(|| abort(EngineError::DealNotFound))?;
                if !current.is_active() {
                    return Err(abort(EngineError::DealNotActive));
                }
                if payments.get(payment_reference.as_bytes())?.is_some() {
                    return Err(abort(EngineError::PaymentAlreadyUsed));
                }

                let Some(mut voucher) = tx_get::<Voucher>(vouchers, token.as_bytes())? else {
                    return Ok(None);
                };
                let pool_key =
                    store::issuance_key(deal_id, voucher.issued_at.to_datetime_utc(), &token);
                if voucher.status != VoucherStatus::Issued {
                    // taken by a concurrent confirmation; try the next candidate
                    return Ok(None);
                }
                if voucher.is_expired(now) {
                    pool.remove(pool_key.as_slice())?;
                    return Ok(None);
                }

                voucher.status = VoucherStatus::Assigned;
                let purchased_at = TimeStamp::from(now);
                let purchase = Purchase {
                    id: purchase_id.clone(),
                    customer_id: customer_id.to_owned(),
                    deal_id: deal_id.to_owned(),
                    voucher_token: token.clone(),
                    payment_reference: payment_reference.to_owned(),
                    amount_paid,
                    purchased_at: purchased_at.clone(),
                };
                let entry = AuditEntry::new(
                    token.clone(),
                    current.business_id.clone(),
                    purchased_at,
                    AuditAction::Assigned {
                        purchase_id: purchase_id.clone(),
                        customer_id: customer_id.to_owned(),
                    },
                );
                let (entry_hash, entry_cbor) = entry.seal().map_err(abort)?;

                tx_put(vouchers, token.as_bytes(), &voucher)?;
                tx_put(purchases, purchase_id.as_bytes(), &purchase)?;
                payments.insert(payment_reference.as_bytes(), purchase_id.as_bytes())?;
                pool.remove(pool_key.as_slice())?;
                audit.insert(
                    store::audit_key(&token, &entry_hash).as_slice(),
                    entry_cbor,
                )?;

                Ok(Some((purchase, voucher)))
            }))?;

            if let Some((purchase, voucher)) = assigned {
                info!(
                    purchase = %purchase.id,
                    voucher = %voucher.token,
                    deal = %deal_id,
                    "purchase confirmed"
                );
                self.notify_monitor(&purchase);
                return Ok((purchase, voucher));
            }
        }

        Err(EngineError::NoVoucherAvailable)
    }

    fn notify_monitor(&self, purchase: &Purchase) {
        if let Some(monitor) = &self.monitor
            && let Err(err) = monitor.purchase_confirmed(purchase)
        {
            // best-effort: the purchase has already committed
            warn!(purchase = %purchase.id, %err, "usage monitor notification failed");
        }
    }

    // REDEMPTION ENGINE

    /// Irreversibly redeem a voucher on behalf of the vendor who owns its
    /// business. Exactly one of any number of concurrent calls succeeds; the
    /// rest fail with `AlreadyRedeemed`.
    pub fn redeem(
        &self,
        voucher_token: &str,
        vendor_identity_id: &str,
    ) -> Result<Redemption, EngineError> {
        if voucher_token.trim().is_empty() || vendor_identity_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "voucher token and vendor identity must be non-empty".into(),
            ));
        }

        let voucher = Store::get::<Voucher>(&self.store.vouchers, voucher_token.as_bytes())?
            .ok_or(EngineError::VoucherNotFound)?;
        let business = Store::get::<Business>(&self.store.businesses, voucher.business_id.as_bytes())?
            .ok_or(EngineError::VoucherNotFound)?;
        if business.owner_id != vendor_identity_id {
            return Err(EngineError::OwnershipMismatch);
        }

        let now = self.clock.now();
        let deal = Store::get::<Deal>(&self.store.deals, voucher.deal_id.as_bytes())?
            .ok_or(EngineError::DealNotFound)?;
        check_redeemable(&voucher, &deal, now)?;

        let trees: &[&sled::Tree] = &[
            &self.store.vouchers,    // 0
            &self.store.deals,       // 1
            &self.store.redemptions, // 2
            &self.store.issued_pool, // 3
            &self.store.audit,       // 4
        ];
        let redemption = run_tx(trees.transaction(|tx| {
            let (vouchers, deals, redemptions, pool, audit) =
                (&tx[0], &tx[1], &tx[2], &tx[3], &tx[4]);

            // Uniqueness backstop first: an existing redemption row means a
            // concurrent call won, whatever the voucher row still says.
            if redemptions.get(voucher_token.as_bytes())?.is_some() {
                return Err(abort(EngineError::AlreadyRedeemed));
            }

            let mut current: Voucher = tx_get(vouchers, voucher_token.as_bytes())?
                .ok_or_else(|| abort(EngineError::VoucherNotFound))?;
            let deal: Deal = tx_get(deals, current.deal_id.as_bytes())?
                .ok_or_else(|| abort(EngineError::DealNotFound))?;
            check_redeemable(&current, &deal, now).map_err(abort)?;

            let redeemed_at = TimeStamp::from(now);
            current.status = VoucherStatus::Redeemed;
            current.redeemed_at = Some(redeemed_at.clone());

            let redemption = Redemption {
                voucher_token: voucher_token.to_owned(),
                deal_id: current.deal_id.clone(),
                business_id: current.business_id.clone(),
                vendor_id: vendor_identity_id.to_owned(),
                redeemed_at: redeemed_at.clone(),
                // value snapshot at redemption time, decoupled from later edits
                original_value: deal.original_value,
                deal_price: deal.deal_price,
            };
            let entry = AuditEntry::new(
                voucher_token.to_owned(),
                current.business_id.clone(),
                redeemed_at,
                AuditAction::Redeemed {
                    vendor_id: vendor_identity_id.to_owned(),
                },
            );
            let (entry_hash, entry_cbor) = entry.seal().map_err(abort)?;

            tx_put(vouchers, voucher_token.as_bytes(), &current)?;
            tx_put(redemptions, voucher_token.as_bytes(), &redemption)?;
            // an unsold voucher redeemed straight from Issued leaves the pool
            pool.remove(
                store::issuance_key(
                    &current.deal_id,
                    current.issued_at.to_datetime_utc(),
                    voucher_token,
                )
                .as_slice(),
            )?;
            audit.insert(
                store::audit_key(voucher_token, &entry_hash).as_slice(),
                entry_cbor,
            )?;

            Ok(redemption)
        }))?;

        info!(voucher = %voucher_token, vendor = %vendor_identity_id, "voucher redeemed");
        Ok(redemption)
    }

    // READ ACCESSORS

    pub fn business(&self, business_id: &str) -> Result<Option<Business>, EngineError> {
        Store::get(&self.store.businesses, business_id.as_bytes())
    }

    pub fn deal(&self, deal_id: &str) -> Result<Option<Deal>, EngineError> {
        Store::get(&self.store.deals, deal_id.as_bytes())
    }

    pub fn voucher(&self, voucher_token: &str) -> Result<Option<Voucher>, EngineError> {
        Store::get(&self.store.vouchers, voucher_token.as_bytes())
    }

    pub fn purchase(&self, purchase_id: &str) -> Result<Option<Purchase>, EngineError> {
        Store::get(&self.store.purchases, purchase_id.as_bytes())
    }

    pub fn redemption(&self, voucher_token: &str) -> Result<Option<Redemption>, EngineError> {
        Store::get(&self.store.redemptions, voucher_token.as_bytes())
    }

    pub fn audit_trail(&self, voucher_token: &str) -> Result<Vec<AuditEntry>, EngineError> {
        self.store.audit_trail(voucher_token)
    }

    fn issuance_lock(&self, business_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .issuance_locks
            .lock()
            .expect("issuance lock table poisoned");
        locks.entry(business_id.to_owned()).or_default().clone()
    }
}

fn check_redeemable(voucher: &Voucher, deal: &Deal, now: DateTime<Utc>) -> Result<(), EngineError> {
    match voucher.status {
        VoucherStatus::Redeemed => return Err(EngineError::AlreadyRedeemed),
        VoucherStatus::Issued | VoucherStatus::Assigned => {}
    }
    if deal
        .redeem_from
        .as_ref()
        .is_some_and(|from| now < from.to_datetime_utc())
    {
        // the redemption window has not opened yet
        return Err(EngineError::NotRedeemable);
    }
    if voucher.is_expired(now) {
        return Err(EngineError::Expired);
    }
    Ok(())
}

fn mint_id(hrp: &'static str) -> Result<String, EngineError> {
    new_uuid_to_bech32(hrp).map_err(|e| EngineError::Internal(e.to_string()))
}

fn run_tx<T>(
    result: sled::transaction::TransactionResult<T, EngineError>,
) -> Result<T, EngineError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(EngineError::Storage(err)),
    }
}
