use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spool_common::{CapacityError, PlanClass, Result, Tier};
use std::fmt::Display;
use std::str::FromStr;

// Network-wide capacity record, all sizes in gigabytes
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCapacityState {
    pub fixed_tier_allocated: u64,
    pub fixed_tier_used: u64,
    pub pool_tier_allocated: u64,
    pub pool_tier_used: u64,

    // Active subscriptions per plan class
    pub fixed_amount_1_subscribers: u64,
    pub fixed_amount_2_subscribers: u64,
    pub monthly_subscribers: u64,
}

impl NetworkCapacityState {
    pub fn allocated(&self, tier: Tier) -> u64 {
        self.get(CounterField::allocated(tier))
    }

    pub fn used(&self, tier: Tier) -> u64 {
        self.get(CounterField::used(tier))
    }

    pub fn available(&self, tier: Tier) -> u64 {
        self.allocated(tier).saturating_sub(self.used(tier))
    }

    pub fn subscribers(&self, plan: PlanClass) -> u64 {
        self.get(CounterField::subscribers(plan))
    }

    pub fn tier_view(&self, tier: Tier) -> TierCapacity {
        TierCapacity {
            tier,
            allocated: self.allocated(tier),
            used: self.used(tier),
            available: self.available(tier),
        }
    }

    pub fn get(&self, field: CounterField) -> u64 {
        match field {
            CounterField::FixedAllocated => self.fixed_tier_allocated,
            CounterField::FixedUsed => self.fixed_tier_used,
            CounterField::PoolAllocated => self.pool_tier_allocated,
            CounterField::PoolUsed => self.pool_tier_used,
            CounterField::FixedAmount1Subscribers => self.fixed_amount_1_subscribers,
            CounterField::FixedAmount2Subscribers => self.fixed_amount_2_subscribers,
            CounterField::MonthlySubscribers => self.monthly_subscribers,
        }
    }

    fn slot(&mut self, field: CounterField) -> &mut u64 {
        match field {
            CounterField::FixedAllocated => &mut self.fixed_tier_allocated,
            CounterField::FixedUsed => &mut self.fixed_tier_used,
            CounterField::PoolAllocated => &mut self.pool_tier_allocated,
            CounterField::PoolUsed => &mut self.pool_tier_used,
            CounterField::FixedAmount1Subscribers => &mut self.fixed_amount_1_subscribers,
            CounterField::FixedAmount2Subscribers => &mut self.fixed_amount_2_subscribers,
            CounterField::MonthlySubscribers => &mut self.monthly_subscribers,
        }
    }

    /// Applies one guarded delta in place. On error `self` is untouched.
    pub fn apply(&mut self, change: &CounterDelta) -> Result<()> {
        let field = change.field;
        let current = self.get(field);
        let next = i128::from(current) + i128::from(change.delta);

        if next < 0 {
            return Err(floor_violation(field, current, change.delta.unsigned_abs()));
        }
        let next = u64::try_from(next).map_err(|_| {
            CapacityError::InvalidArgument(format!("{field} would overflow"))
        })?;

        match change.guard {
            CounterGuard::Unguarded => {}
            CounterGuard::NotAbove(bound) => {
                let limit = self.get(bound);
                if next > limit {
                    return Err(guard_violation(field, current, change.delta, limit));
                }
            }
            CounterGuard::NotBelow(bound) => {
                let limit = self.get(bound);
                if next < limit {
                    return Err(guard_violation(field, current, change.delta, limit));
                }
            }
        }

        *self.slot(field) = next;
        Ok(())
    }
}

fn floor_violation(field: CounterField, current: u64, requested: u64) -> CapacityError {
    match field.kind() {
        CounterKind::Allocated(tier) => CapacityError::InsufficientAllocation {
            tier,
            requested,
            releasable: current,
        },
        _ => CapacityError::NegativeUsage {
            field: field.to_string(),
            current,
            requested,
        },
    }
}

fn guard_violation(field: CounterField, current: u64, delta: i64, bound: u64) -> CapacityError {
    let requested = delta.unsigned_abs();
    match field.kind() {
        CounterKind::Used(tier) => CapacityError::CapacityExceeded {
            tier,
            requested,
            available: bound.saturating_sub(current),
        },
        CounterKind::Allocated(tier) => CapacityError::InsufficientAllocation {
            tier,
            requested,
            releasable: current.saturating_sub(bound),
        },
        CounterKind::Subscribers => CapacityError::InvalidArgument(format!(
            "{field} cannot move by {delta} from {current} (bound {bound})"
        )),
    }
}

/// Numeric fields of the network capacity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    FixedAllocated,
    FixedUsed,
    PoolAllocated,
    PoolUsed,
    FixedAmount1Subscribers,
    FixedAmount2Subscribers,
    MonthlySubscribers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Allocated(Tier),
    Used(Tier),
    Subscribers,
}

impl CounterField {
    pub fn allocated(tier: Tier) -> Self {
        match tier {
            Tier::Pool => CounterField::PoolAllocated,
            Tier::Fixed => CounterField::FixedAllocated,
        }
    }

    pub fn used(tier: Tier) -> Self {
        match tier {
            Tier::Pool => CounterField::PoolUsed,
            Tier::Fixed => CounterField::FixedUsed,
        }
    }

    pub fn subscribers(plan: PlanClass) -> Self {
        match plan {
            PlanClass::Monthly => CounterField::MonthlySubscribers,
            PlanClass::FixedAmount1 => CounterField::FixedAmount1Subscribers,
            PlanClass::FixedAmount2 => CounterField::FixedAmount2Subscribers,
        }
    }

    pub fn kind(&self) -> CounterKind {
        match self {
            CounterField::FixedAllocated => CounterKind::Allocated(Tier::Fixed),
            CounterField::PoolAllocated => CounterKind::Allocated(Tier::Pool),
            CounterField::FixedUsed => CounterKind::Used(Tier::Fixed),
            CounterField::PoolUsed => CounterKind::Used(Tier::Pool),
            CounterField::FixedAmount1Subscribers
            | CounterField::FixedAmount2Subscribers
            | CounterField::MonthlySubscribers => CounterKind::Subscribers,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::FixedAllocated => "fixed_tier_allocated",
            CounterField::FixedUsed => "fixed_tier_used",
            CounterField::PoolAllocated => "pool_tier_allocated",
            CounterField::PoolUsed => "pool_tier_used",
            CounterField::FixedAmount1Subscribers => "fixed_amount_1_subscribers",
            CounterField::FixedAmount2Subscribers => "fixed_amount_2_subscribers",
            CounterField::MonthlySubscribers => "monthly_subscribers",
        }
    }
}

impl Display for CounterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition evaluated against the post-update value of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterGuard {
    Unguarded,
    /// `field + delta <= other`
    NotAbove(CounterField),
    /// `field + delta >= other`
    NotBelow(CounterField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub field: CounterField,
    pub delta: i64,
    pub guard: CounterGuard,
}

impl CounterDelta {
    pub fn new(field: CounterField, delta: i64) -> Self {
        Self {
            field,
            delta,
            guard: CounterGuard::Unguarded,
        }
    }

    pub fn guarded(field: CounterField, delta: i64, guard: CounterGuard) -> Self {
        Self {
            field,
            delta,
            guard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCapacity {
    pub tier: Tier,
    pub allocated: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub plan: PlanClass,
    pub user_name: Option<String>,
    pub relay_address: Option<String>,
    pub timezone: Option<String>,

    // Usage charged by this account's uploads
    pub pool_used: u64,
    pub fixed_used: u64,
    pub files_uploaded: u64,

    // False until the plan's quota grant reached the ledger
    pub allocation_granted: bool,
    // Set once removal starts; usage is frozen from then on
    #[serde(default)]
    pub removal_pending: bool,
    /// Distinguishes this account from earlier ones at the same address.
    pub account_id: u64,
}

impl Account {
    pub fn used(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Pool => self.pool_used,
            Tier::Fixed => self.fixed_used,
        }
    }

    fn usage_slot(&mut self, field: UsageField) -> &mut u64 {
        match field {
            UsageField::PoolUsed => &mut self.pool_used,
            UsageField::FixedUsed => &mut self.fixed_used,
            UsageField::FilesUploaded => &mut self.files_uploaded,
        }
    }

    /// Applies one update in place. On error `self` is untouched.
    pub fn apply(&mut self, update: &AccountUpdate) -> Result<()> {
        match update {
            AccountUpdate::Set(field, value) => {
                let slot = match field {
                    ProfileField::UserName => &mut self.user_name,
                    ProfileField::RelayAddress => &mut self.relay_address,
                    ProfileField::Timezone => &mut self.timezone,
                };
                *slot = Some(value.clone());
            }
            AccountUpdate::Increment(field, delta) => {
                if self.removal_pending {
                    return Err(CapacityError::NotFound(format!(
                        "user {} is being removed",
                        self.address
                    )));
                }
                let slot = self.usage_slot(*field);
                let current = *slot;
                let next = i128::from(current) + i128::from(*delta);
                if next < 0 {
                    return Err(CapacityError::NegativeUsage {
                        field: field.to_string(),
                        current,
                        requested: delta.unsigned_abs(),
                    });
                }
                *slot = u64::try_from(next).map_err(|_| {
                    CapacityError::InvalidArgument(format!("{field} would overflow"))
                })?;
            }
            AccountUpdate::MarkAllocationGranted => self.allocation_granted = true,
            AccountUpdate::MarkRemovalPending => self.removal_pending = true,
            AccountUpdate::RequireAccountId(id) => {
                if self.account_id != *id {
                    return Err(CapacityError::NotFound(format!(
                        "user {} no longer holds account {id}",
                        self.address
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub address: String,
    pub plan: PlanClass,
    pub user_name: Option<String>,
    pub relay_address: Option<String>,
    pub timezone: Option<String>,
}

impl NewAccount {
    pub fn new(address: impl Into<String>, plan: PlanClass) -> Self {
        Self {
            address: address.into(),
            plan,
            user_name: None,
            relay_address: None,
            timezone: None,
        }
    }
}

impl From<NewAccount> for Account {
    fn from(new: NewAccount) -> Self {
        Self {
            address: new.address,
            plan: new.plan,
            user_name: new.user_name,
            relay_address: new.relay_address,
            timezone: new.timezone,
            pool_used: 0,
            fixed_used: 0,
            files_uploaded: 0,
            allocation_granted: false,
            removal_pending: false,
            account_id: rand::random(),
        }
    }
}

/// Free-form profile fields, replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    UserName,
    RelayAddress,
    Timezone,
}

impl FromStr for ProfileField {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_name" => Ok(ProfileField::UserName),
            "relay_address" => Ok(ProfileField::RelayAddress),
            "timezone" => Ok(ProfileField::Timezone),
            other => Err(CapacityError::InvalidArgument(format!(
                "field [{other}] cannot be set"
            ))),
        }
    }
}

/// Numeric account counters, only ever moved by deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageField {
    PoolUsed,
    FixedUsed,
    FilesUploaded,
}

impl UsageField {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Pool => UsageField::PoolUsed,
            Tier::Fixed => UsageField::FixedUsed,
        }
    }
}

impl Display for UsageField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UsageField::PoolUsed => "pool_used",
            UsageField::FixedUsed => "fixed_used",
            UsageField::FilesUploaded => "files_uploaded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountUpdate {
    Set(ProfileField, String),
    Increment(UsageField, i64),
    MarkAllocationGranted,
    MarkRemovalPending,
    /// Fails with `NotFound` unless the account is the given instance.
    RequireAccountId(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub file_name: String,
    pub size_gb: u64,
    pub uploaded_at: DateTime<Utc>,
    pub uploader: String,
    pub tier: Tier,
    pub hosts: Vec<Vec<String>>,
    pub shards: u32,
    pub backup_shards: u32,
    pub timezone: Option<String>,
    /// `account_id` of the uploader that was charged for this file
    #[serde(default)]
    pub account_id: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub reconciled: Vec<String>,
    pub failed: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    pub address: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_cannot_pass_allocated() {
        let mut state = NetworkCapacityState {
            pool_tier_allocated: 100,
            pool_tier_used: 90,
            ..Default::default()
        };

        let charge = CounterDelta::guarded(
            CounterField::PoolUsed,
            11,
            CounterGuard::NotAbove(CounterField::PoolAllocated),
        );
        let err = state.apply(&charge).unwrap_err();
        assert_eq!(
            err,
            CapacityError::CapacityExceeded {
                tier: Tier::Pool,
                requested: 11,
                available: 10,
            }
        );
        assert_eq!(state.pool_tier_used, 90);

        let exact = CounterDelta::guarded(
            CounterField::PoolUsed,
            10,
            CounterGuard::NotAbove(CounterField::PoolAllocated),
        );
        state.apply(&exact).unwrap();
        assert_eq!(state.available(Tier::Pool), 0);
    }

    #[test]
    fn test_allocation_cannot_drop_below_used() {
        let mut state = NetworkCapacityState {
            fixed_tier_allocated: 1000,
            fixed_tier_used: 700,
            ..Default::default()
        };

        let release = CounterDelta::guarded(
            CounterField::FixedAllocated,
            -400,
            CounterGuard::NotBelow(CounterField::FixedUsed),
        );
        assert!(matches!(
            state.apply(&release),
            Err(CapacityError::InsufficientAllocation {
                tier: Tier::Fixed,
                requested: 400,
                releasable: 300,
            })
        ));
        assert_eq!(state.fixed_tier_allocated, 1000);
    }

    #[test]
    fn test_counters_never_go_negative() {
        let mut state = NetworkCapacityState::default();
        let err = state
            .apply(&CounterDelta::new(CounterField::PoolUsed, -1))
            .unwrap_err();
        assert!(matches!(err, CapacityError::NegativeUsage { current: 0, requested: 1, .. }));

        let err = state
            .apply(&CounterDelta::new(CounterField::MonthlySubscribers, -1))
            .unwrap_err();
        assert_eq!(err.kind(), "negative_usage");
    }

    #[test]
    fn test_account_updates() {
        let mut account: Account = NewAccount::new("0xabc", PlanClass::Monthly).into();
        account
            .apply(&AccountUpdate::Set(ProfileField::Timezone, "UTC".into()))
            .unwrap();
        account
            .apply(&AccountUpdate::Increment(UsageField::PoolUsed, 25))
            .unwrap();
        assert_eq!(account.timezone.as_deref(), Some("UTC"));
        assert_eq!(account.used(Tier::Pool), 25);

        let err = account
            .apply(&AccountUpdate::Increment(UsageField::FixedUsed, -5))
            .unwrap_err();
        assert!(matches!(err, CapacityError::NegativeUsage { .. }));
        assert_eq!(account.fixed_used, 0);
    }

    #[test]
    fn test_usage_is_frozen_once_removal_starts() {
        let mut account: Account = NewAccount::new("0xabc", PlanClass::Monthly).into();
        account
            .apply(&AccountUpdate::Increment(UsageField::PoolUsed, 40))
            .unwrap();
        account.apply(&AccountUpdate::MarkRemovalPending).unwrap();

        for delta in [10, -10] {
            let err = account
                .apply(&AccountUpdate::Increment(UsageField::PoolUsed, delta))
                .unwrap_err();
            assert!(matches!(err, CapacityError::NotFound(_)));
        }
        assert_eq!(account.pool_used, 40);

        // Profile fields stay editable
        account
            .apply(&AccountUpdate::Set(ProfileField::UserName, "bob".into()))
            .unwrap();
    }

    #[test]
    fn test_account_id_check() {
        let first: Account = NewAccount::new("0xabc", PlanClass::Monthly).into();
        let mut second: Account = NewAccount::new("0xabc", PlanClass::Monthly).into();
        second.account_id = first.account_id.wrapping_add(1);

        assert!(second
            .apply(&AccountUpdate::RequireAccountId(second.account_id))
            .is_ok());
        assert!(matches!(
            second.apply(&AccountUpdate::RequireAccountId(first.account_id)),
            Err(CapacityError::NotFound(_))
        ));
    }

    #[test]
    fn test_profile_field_parsing() {
        assert_eq!("user_name".parse::<ProfileField>().unwrap(), ProfileField::UserName);
        assert!("pool_used".parse::<ProfileField>().is_err());
    }
}
