use crate::{
    CapacityError, CounterDelta, CounterField, CounterGuard, CounterStore, NetworkCapacityState,
    QuotaGrant, QuotaRelease, Result, Tier, TierCapacity,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Sole writer of the network capacity record.
///
/// Holds no copy of the counters; every call goes to the store.
pub struct CapacityLedger {
    store: Arc<dyn CounterStore>,
}

fn to_delta(size_gb: u64) -> Result<i64> {
    i64::try_from(size_gb)
        .map_err(|_| CapacityError::InvalidArgument(format!("{size_gb} GB is out of range")))
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Creates the empty network record. Must run exactly once per network.
    pub async fn bootstrap(&self) -> Result<()> {
        self.store
            .initialise(NetworkCapacityState::default())
            .await?;
        info!("Network storage state initialised");
        Ok(())
    }

    pub async fn is_bootstrapped(&self) -> Result<bool> {
        self.store.is_initialised().await
    }

    /// Point-in-time view; may be stale by the time it is acted upon.
    pub async fn snapshot(&self) -> Result<NetworkCapacityState> {
        self.store.read_singleton().await
    }

    pub async fn tier_view(&self, tier: Tier) -> Result<TierCapacity> {
        Ok(self.snapshot().await?.tier_view(tier))
    }

    #[instrument(skip(self))]
    pub async fn increment_allocated(&self, tier: Tier, size_gb: u64) -> Result<()> {
        self.store
            .atomic_increment(CounterField::allocated(tier), to_delta(size_gb)?)
            .await?;
        debug!("Allocated {} GB on {} tier", size_gb, tier);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn decrement_allocated(&self, tier: Tier, size_gb: u64) -> Result<()> {
        self.store
            .atomic_conditional_increment(
                CounterField::allocated(tier),
                -to_delta(size_gb)?,
                CounterGuard::NotBelow(CounterField::used(tier)),
            )
            .await
            .map_err(|e| {
                warn!("Allocation release refused: {}", e);
                e
            })?;
        debug!("Released {} GB of {} tier allocation", size_gb, tier);
        Ok(())
    }

    /// The authoritative admission check for consuming tier space.
    #[instrument(skip(self))]
    pub async fn increment_used(&self, tier: Tier, size_gb: u64) -> Result<()> {
        self.store
            .atomic_conditional_increment(
                CounterField::used(tier),
                to_delta(size_gb)?,
                CounterGuard::NotAbove(CounterField::allocated(tier)),
            )
            .await
            .map_err(|e| {
                warn!("Charge refused: {}", e);
                e
            })?;
        debug!("Charged {} GB to {} tier", size_gb, tier);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn decrement_used(&self, tier: Tier, size_gb: u64) -> Result<()> {
        self.store
            .atomic_increment(CounterField::used(tier), -to_delta(size_gb)?)
            .await?;
        debug!("Freed {} GB on {} tier", size_gb, tier);
        Ok(())
    }

    /// Grows the plan's tier and subscriber count in one atomic step.
    #[instrument(skip(self), fields(plan = %grant.plan, tier = %grant.tier, size_gb = grant.size_gb))]
    pub async fn grant(&self, grant: QuotaGrant) -> Result<NetworkCapacityState> {
        let state = self
            .store
            .atomic_batch(&[
                CounterDelta::new(CounterField::allocated(grant.tier), to_delta(grant.size_gb)?),
                CounterDelta::new(grant.subscriber_field(), 1),
            ])
            .await?;
        info!(
            "Granted {} GB on {} tier for {} subscription",
            grant.size_gb, grant.tier, grant.plan
        );
        Ok(state)
    }

    /// Frees consumed space on both tiers, then shrinks the plan's tier, atomically.
    #[instrument(skip(self), fields(plan = %release.plan, tier = %release.tier))]
    pub async fn release(&self, release: QuotaRelease) -> Result<NetworkCapacityState> {
        let mut deltas = Vec::with_capacity(4);
        for tier in Tier::ALL {
            let used = release.used_gb(tier);
            if used > 0 {
                deltas.push(CounterDelta::new(CounterField::used(tier), -to_delta(used)?));
            }
        }
        if release.allocation_gb > 0 {
            deltas.push(CounterDelta::guarded(
                CounterField::allocated(release.tier),
                -to_delta(release.allocation_gb)?,
                CounterGuard::NotBelow(CounterField::used(release.tier)),
            ));
        }
        if release.release_subscription {
            deltas.push(CounterDelta::new(
                CounterField::subscribers(release.plan),
                -1,
            ));
        }

        let state = self.store.atomic_batch(&deltas).await?;
        info!(
            "Released {} GB allocation, {} GB pool usage, {} GB fixed usage",
            release.allocation_gb, release.pool_used_gb, release.fixed_used_gb
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryCounterStore, PlanClass, QuotaPolicy};

    async fn bootstrapped() -> CapacityLedger {
        let ledger = CapacityLedger::new(Arc::new(InMemoryCounterStore::new()));
        ledger.bootstrap().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_bootstrap_twice_fails() {
        let ledger = bootstrapped().await;
        assert!(ledger.is_bootstrapped().await.unwrap());
        assert!(matches!(
            ledger.bootstrap().await,
            Err(CapacityError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_before_bootstrap_fail() {
        let ledger = CapacityLedger::new(Arc::new(InMemoryCounterStore::new()));
        assert!(matches!(
            ledger.snapshot().await,
            Err(CapacityError::NotFound(_))
        ));
        assert!(matches!(
            ledger.increment_used(Tier::Pool, 1).await,
            Err(CapacityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_used_and_allocation_floors() {
        let ledger = bootstrapped().await;
        ledger.increment_allocated(Tier::Pool, 100).await.unwrap();
        ledger.increment_used(Tier::Pool, 60).await.unwrap();

        assert!(matches!(
            ledger.increment_used(Tier::Pool, 41).await,
            Err(CapacityError::CapacityExceeded { available: 40, .. })
        ));
        assert!(matches!(
            ledger.decrement_allocated(Tier::Pool, 41).await,
            Err(CapacityError::InsufficientAllocation { releasable: 40, .. })
        ));
        assert!(matches!(
            ledger.decrement_used(Tier::Pool, 61).await,
            Err(CapacityError::NegativeUsage { .. })
        ));

        let view = ledger.tier_view(Tier::Pool).await.unwrap();
        assert_eq!(view.allocated, 100);
        assert_eq!(view.used, 60);
        assert_eq!(view.available, 40);
    }

    #[tokio::test]
    async fn test_round_trip_restores_state_exactly() {
        let ledger = bootstrapped().await;
        ledger.increment_allocated(Tier::Fixed, 1000).await.unwrap();
        let before = ledger.snapshot().await.unwrap();

        ledger.increment_allocated(Tier::Fixed, 250).await.unwrap();
        ledger.increment_used(Tier::Fixed, 333).await.unwrap();
        ledger.decrement_used(Tier::Fixed, 333).await.unwrap();
        ledger.decrement_allocated(Tier::Fixed, 250).await.unwrap();

        assert_eq!(ledger.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_grant_then_release() {
        let ledger = bootstrapped().await;
        let policy = QuotaPolicy::default();

        let state = ledger.grant(policy.grant(PlanClass::Monthly)).await.unwrap();
        assert_eq!(state.pool_tier_allocated, 500);
        assert_eq!(state.monthly_subscribers, 1);

        let account = crate::Account::from(crate::NewAccount::new("a", PlanClass::Monthly));
        let state = ledger.release(policy.release(&account)).await.unwrap();
        assert_eq!(state, NetworkCapacityState::default());
    }

    #[tokio::test]
    async fn test_subscribers_move_only_with_their_allocation() {
        let ledger = bootstrapped().await;
        let policy = QuotaPolicy::default();

        ledger.grant(policy.grant(PlanClass::FixedAmount1)).await.unwrap();
        ledger.increment_used(Tier::Fixed, 600).await.unwrap();

        let account = crate::Account::from(crate::NewAccount::new("a", PlanClass::FixedAmount1));
        let refused = ledger.release(policy.release(&account)).await;
        assert!(matches!(
            refused,
            Err(CapacityError::InsufficientAllocation { .. })
        ));

        let state = ledger.snapshot().await.unwrap();
        assert_eq!(state.fixed_tier_allocated, 1000);
        assert_eq!(state.fixed_amount_1_subscribers, 1);
    }
}
