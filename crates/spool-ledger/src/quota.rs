use crate::{Account, CounterField, PlanClass, Tier};
use serde::{Deserialize, Serialize};

pub const MONTHLY_STORAGE_ALLOCATION_GB: u64 = 500;
pub const FIXED_AMOUNT_1_STORAGE_GB: u64 = 1000;
pub const FIXED_AMOUNT_2_STORAGE_GB: u64 = 2000;

/// Capacity each plan class contributes to its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub monthly_gb: u64,
    pub fixed_amount_1_gb: u64,
    pub fixed_amount_2_gb: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            monthly_gb: MONTHLY_STORAGE_ALLOCATION_GB,
            fixed_amount_1_gb: FIXED_AMOUNT_1_STORAGE_GB,
            fixed_amount_2_gb: FIXED_AMOUNT_2_STORAGE_GB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGrant {
    pub plan: PlanClass,
    pub tier: Tier,
    pub size_gb: u64,
}

impl QuotaGrant {
    pub fn subscriber_field(&self) -> CounterField {
        CounterField::subscribers(self.plan)
    }
}

/// Everything an account gives back when it leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRelease {
    pub plan: PlanClass,
    pub tier: Tier,
    pub allocation_gb: u64,
    pub release_subscription: bool,
    pub pool_used_gb: u64,
    pub fixed_used_gb: u64,
}

impl QuotaRelease {
    /// Usage only, for accounts whose grant never reached the ledger.
    pub fn usage_only(self) -> Self {
        Self {
            allocation_gb: 0,
            release_subscription: false,
            ..self
        }
    }

    pub fn used_gb(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Pool => self.pool_used_gb,
            Tier::Fixed => self.fixed_used_gb,
        }
    }
}

impl QuotaPolicy {
    pub fn tier_for(&self, plan: PlanClass) -> Tier {
        match plan {
            PlanClass::Monthly => Tier::Pool,
            PlanClass::FixedAmount1 | PlanClass::FixedAmount2 => Tier::Fixed,
        }
    }

    pub fn size_for(&self, plan: PlanClass) -> u64 {
        match plan {
            PlanClass::Monthly => self.monthly_gb,
            PlanClass::FixedAmount1 => self.fixed_amount_1_gb,
            PlanClass::FixedAmount2 => self.fixed_amount_2_gb,
        }
    }

    pub fn grant(&self, plan: PlanClass) -> QuotaGrant {
        QuotaGrant {
            plan,
            tier: self.tier_for(plan),
            size_gb: self.size_for(plan),
        }
    }

    pub fn release(&self, account: &Account) -> QuotaRelease {
        QuotaRelease {
            plan: account.plan,
            tier: self.tier_for(account.plan),
            allocation_gb: self.size_for(account.plan),
            release_subscription: true,
            pool_used_gb: account.pool_used,
            fixed_used_gb: account.fixed_used,
        }
    }

    /// Guaranteed space a subscriber of `plan` is owed; zero for monthly plans.
    pub fn reservation_gb(&self, plan: PlanClass) -> u64 {
        match plan {
            PlanClass::Monthly => 0,
            PlanClass::FixedAmount1 | PlanClass::FixedAmount2 => self.size_for(plan),
        }
    }
}
