use crate::{
    CapacityError, CapacityLedger, NetworkCapacityState, PlanClass, QuotaPolicy, Result, Tier,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// How fixed-quota obligations are weighed against the pool for monthly files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationMode {
    /// Both fixed classes' obligations are summed into one reservation.
    #[default]
    Combined,
    /// Each fixed class is protected on its own against the same pool total.
    Independent,
}

impl FromStr for ReservationMode {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "combined" => Ok(ReservationMode::Combined),
            "independent" => Ok(ReservationMode::Independent),
            other => Err(CapacityError::InvalidArgument(format!(
                "unknown reservation mode [{other}]"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub tier: Tier,
    pub reason: String,
}

/// Advisory tier selection for a file that has not been uploaded yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlacementPolicy {
    quota: QuotaPolicy,
    mode: ReservationMode,
}

impl PlacementPolicy {
    pub fn new(quota: QuotaPolicy, mode: ReservationMode) -> Self {
        Self { quota, mode }
    }

    pub fn mode(&self) -> ReservationMode {
        self.mode
    }

    pub fn decide(
        &self,
        plan: PlanClass,
        file_size_gb: u64,
        snapshot: &NetworkCapacityState,
    ) -> Result<PlacementDecision> {
        if file_size_gb == 0 {
            return Err(CapacityError::InvalidArgument(
                "file size must be greater than zero".to_string(),
            ));
        }

        let pool_allocated = snapshot.pool_tier_allocated;
        let decision = match plan {
            // Fixed-quota customers already funded the fixed tier; only overflow goes there
            PlanClass::FixedAmount1 | PlanClass::FixedAmount2 => {
                if file_size_gb < pool_allocated {
                    PlacementDecision {
                        tier: Tier::Pool,
                        reason: format!("pool allocation {pool_allocated} GB can hold the file"),
                    }
                } else {
                    PlacementDecision {
                        tier: Tier::Fixed,
                        reason: format!("pool allocation {pool_allocated} GB is too small"),
                    }
                }
            }
            PlanClass::Monthly => self.decide_monthly(file_size_gb, snapshot),
        };

        debug!(
            "Placement for {} file of {} GB: {} ({})",
            plan, file_size_gb, decision.tier, decision.reason
        );
        Ok(decision)
    }

    fn owed_gb(&self, plan: PlanClass, snapshot: &NetworkCapacityState) -> u64 {
        snapshot
            .subscribers(plan)
            .saturating_mul(self.quota.reservation_gb(plan))
    }

    fn decide_monthly(&self, file_size_gb: u64, snapshot: &NetworkCapacityState) -> PlacementDecision {
        let prospective = snapshot.pool_tier_allocated.saturating_add(file_size_gb);
        let owed_1 = self.owed_gb(PlanClass::FixedAmount1, snapshot);
        let owed_2 = self.owed_gb(PlanClass::FixedAmount2, snapshot);

        let encroaches = match self.mode {
            ReservationMode::Combined => owed_1.saturating_add(owed_2) >= prospective,
            ReservationMode::Independent => owed_1 >= prospective || owed_2 >= prospective,
        };

        if encroaches {
            PlacementDecision {
                tier: Tier::Fixed,
                reason: format!(
                    "pool of {prospective} GB would not cover {owed_1} GB + {owed_2} GB owed to fixed-quota subscribers"
                ),
            }
        } else {
            PlacementDecision {
                tier: Tier::Pool,
                reason: format!("pool of {prospective} GB covers fixed-quota obligations"),
            }
        }
    }

    /// Reads a fresh snapshot and decides against it.
    pub async fn recommend(
        &self,
        ledger: &CapacityLedger,
        plan: PlanClass,
        file_size_gb: u64,
    ) -> Result<PlacementDecision> {
        let snapshot = ledger.snapshot().await?;
        self.decide(plan, file_size_gb, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pool: u64, fixed1: u64, fixed2: u64) -> NetworkCapacityState {
        NetworkCapacityState {
            pool_tier_allocated: pool,
            fixed_amount_1_subscribers: fixed1,
            fixed_amount_2_subscribers: fixed2,
            ..Default::default()
        }
    }

    #[test]
    fn test_monthly_goes_to_pool_without_fixed_subscribers() {
        let policy = PlacementPolicy::default();
        let decision = policy
            .decide(PlanClass::Monthly, 100, &state(500, 0, 0))
            .unwrap();
        assert_eq!(decision.tier, Tier::Pool);
    }

    #[test]
    fn test_fixed_plans_overflow_to_fixed_tier() {
        let policy = PlacementPolicy::default();
        for plan in [PlanClass::FixedAmount1, PlanClass::FixedAmount2] {
            assert_eq!(
                policy.decide(plan, 50, &state(0, 2, 0)).unwrap().tier,
                Tier::Fixed
            );
            assert_eq!(
                policy.decide(plan, 50, &state(50, 2, 0)).unwrap().tier,
                Tier::Fixed
            );
            assert_eq!(
                policy.decide(plan, 50, &state(51, 2, 0)).unwrap().tier,
                Tier::Pool
            );
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = PlacementPolicy::default();
        // 1 x 1000 owed against 900 + 100
        assert_eq!(
            policy
                .decide(PlanClass::Monthly, 100, &state(900, 1, 0))
                .unwrap()
                .tier,
            Tier::Fixed
        );
        assert_eq!(
            policy
                .decide(PlanClass::Monthly, 101, &state(900, 1, 0))
                .unwrap()
                .tier,
            Tier::Pool
        );
    }

    #[test]
    fn test_combined_and_independent_reservations_differ() {
        // 1 x 1000 + 1 x 2000 = 3000 owed, pool would be 2500
        let snapshot = state(2400, 1, 1);

        let combined = PlacementPolicy::new(QuotaPolicy::default(), ReservationMode::Combined);
        assert_eq!(
            combined.decide(PlanClass::Monthly, 100, &snapshot).unwrap().tier,
            Tier::Fixed
        );

        let independent =
            PlacementPolicy::new(QuotaPolicy::default(), ReservationMode::Independent);
        assert_eq!(
            independent
                .decide(PlanClass::Monthly, 100, &snapshot)
                .unwrap()
                .tier,
            Tier::Pool
        );
    }

    #[test]
    fn test_zero_sized_file_is_rejected() {
        let policy = PlacementPolicy::default();
        assert!(matches!(
            policy.decide(PlanClass::Monthly, 0, &state(500, 0, 0)),
            Err(CapacityError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reservation_mode_parsing() {
        assert_eq!(
            "independent".parse::<ReservationMode>().unwrap(),
            ReservationMode::Independent
        );
        assert!("summed".parse::<ReservationMode>().is_err());
    }
}
