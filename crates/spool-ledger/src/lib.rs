// Spool Ledger - capacity accounting and placement for the storage network
mod ledger;
mod lifecycle;
mod placement;
mod quota;
mod storage;
mod types;

pub use ledger::CapacityLedger;
pub use lifecycle::AccountLifecycleManager;
pub use placement::{PlacementDecision, PlacementPolicy, ReservationMode};
pub use quota::{
    QuotaGrant, QuotaPolicy, QuotaRelease, FIXED_AMOUNT_1_STORAGE_GB, FIXED_AMOUNT_2_STORAGE_GB,
    MONTHLY_STORAGE_ALLOCATION_GB,
};
pub use spool_common::{CapacityError, PlanClass, Result, Tier};
pub use storage::{
    AccountStore, CounterStore, InMemoryAccountStore, InMemoryCounterStore, InMemoryUploadStore,
    UploadStore,
};
pub use types::*;

use std::sync::Arc;

/// Everything needed to serve capacity requests, wired to one set of stores.
#[derive(Clone)]
pub struct CapacityEngine {
    pub ledger: Arc<CapacityLedger>,
    pub lifecycle: Arc<AccountLifecycleManager>,
    pub placement: PlacementPolicy,
}

impl CapacityEngine {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        accounts: Arc<dyn AccountStore>,
        uploads: Arc<dyn UploadStore>,
        quota: QuotaPolicy,
        mode: ReservationMode,
    ) -> Self {
        let ledger = Arc::new(CapacityLedger::new(counters));
        let lifecycle = Arc::new(AccountLifecycleManager::new(
            ledger.clone(),
            accounts,
            uploads,
            quota,
        ));
        Self {
            ledger,
            lifecycle,
            placement: PlacementPolicy::new(quota, mode),
        }
    }

    pub fn in_memory(quota: QuotaPolicy, mode: ReservationMode) -> Self {
        Self::new(
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryUploadStore::new()),
            quota,
            mode,
        )
    }

    pub async fn place(&self, plan: PlanClass, file_size_gb: u64) -> Result<PlacementDecision> {
        self.placement
            .recommend(&self.ledger, plan, file_size_gb)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_wires_shared_ledger() {
        let engine = CapacityEngine::in_memory(QuotaPolicy::default(), ReservationMode::default());
        engine.ledger.bootstrap().await.unwrap();

        engine
            .lifecycle
            .create_account(NewAccount::new("0xabc", PlanClass::Monthly))
            .await
            .unwrap();

        let snapshot = engine.ledger.snapshot().await.unwrap();
        assert_eq!(snapshot.pool_tier_allocated, MONTHLY_STORAGE_ALLOCATION_GB);
        assert_eq!(
            engine.place(PlanClass::Monthly, 100).await.unwrap().tier,
            Tier::Pool
        );
    }
}
