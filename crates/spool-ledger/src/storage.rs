use crate::{
    Account, AccountUpdate, CapacityError, CounterDelta, CounterField, CounterGuard,
    NetworkCapacityState, Result, UploadRecord,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::IteratorRandom;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable home of the network capacity record.
///
/// Every mutation is a store-level atomic operation: the guard and the write
/// happen in one step, so callers never read-modify-write the counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Creates the singleton record. Fails if it already exists.
    async fn initialise(&self, state: NetworkCapacityState) -> Result<()>;
    async fn is_initialised(&self) -> Result<bool>;
    async fn read_singleton(&self) -> Result<NetworkCapacityState>;

    async fn atomic_increment(&self, field: CounterField, delta: i64) -> Result<()> {
        self.atomic_batch(&[CounterDelta::new(field, delta)])
            .await
            .map(|_| ())
    }

    async fn atomic_conditional_increment(
        &self,
        field: CounterField,
        delta: i64,
        guard: CounterGuard,
    ) -> Result<()> {
        self.atomic_batch(&[CounterDelta::guarded(field, delta, guard)])
            .await
            .map(|_| ())
    }

    /// Applies all deltas in order, all-or-nothing, and returns the new record.
    async fn atomic_batch(&self, deltas: &[CounterDelta]) -> Result<NetworkCapacityState>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Account>;
    /// Inserts the account unless the address is already registered.
    async fn insert(&self, account: Account) -> Result<()>;
    /// Removes the account at `address` if it is the `account_id` instance;
    /// `NotFound` otherwise, so concurrent removals cannot both succeed.
    async fn delete(&self, address: &str, account_id: u64) -> Result<Account>;
    /// Applies the updates atomically and returns the resulting account.
    async fn update(&self, address: &str, updates: &[AccountUpdate]) -> Result<Account>;
    async fn list(&self) -> Result<Vec<Account>>;
    async fn sample(&self, amount: usize) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn insert(&self, record: UploadRecord) -> Result<()>;
    async fn find(&self, file_name: &str) -> Result<UploadRecord>;
    async fn delete(&self, file_name: &str) -> Result<UploadRecord>;
    /// Drops every record charged to the given account instance.
    async fn delete_by_account(&self, address: &str, account_id: u64) -> Result<Vec<UploadRecord>>;
}

fn network_state_missing() -> CapacityError {
    CapacityError::NotFound("network storage state has not been initialised".to_string())
}

// In-memory counter store for development/testing
#[derive(Default)]
pub struct InMemoryCounterStore {
    state: Arc<RwLock<Option<NetworkCapacityState>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: NetworkCapacityState) -> Self {
        Self {
            state: Arc::new(RwLock::new(Some(state))),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn initialise(&self, state: NetworkCapacityState) -> Result<()> {
        let mut slot = self.state.write().await;
        if slot.is_some() {
            return Err(CapacityError::AlreadyExists(
                "network storage state".to_string(),
            ));
        }
        *slot = Some(state);
        Ok(())
    }

    async fn is_initialised(&self) -> Result<bool> {
        Ok(self.state.read().await.is_some())
    }

    async fn read_singleton(&self) -> Result<NetworkCapacityState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or_else(network_state_missing)
    }

    async fn atomic_batch(&self, deltas: &[CounterDelta]) -> Result<NetworkCapacityState> {
        // The write lock spans check and apply
        let mut slot = self.state.write().await;
        let mut next = slot.clone().ok_or_else(network_state_missing)?;
        for change in deltas {
            next.apply(change)?;
        }
        *slot = Some(next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<DashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn account_missing(address: &str) -> CapacityError {
    CapacityError::NotFound(format!("user {address}"))
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_address(&self, address: &str) -> Result<Account> {
        self.accounts
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| account_missing(address))
    }

    async fn insert(&self, account: Account) -> Result<()> {
        match self.accounts.entry(account.address.clone()) {
            Entry::Occupied(_) => Err(CapacityError::AlreadyExists(format!(
                "user {}",
                account.address
            ))),
            Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }

    async fn delete(&self, address: &str, account_id: u64) -> Result<Account> {
        self.accounts
            .remove_if(address, |_, account| account.account_id == account_id)
            .map(|(_, account)| account)
            .ok_or_else(|| account_missing(address))
    }

    async fn update(&self, address: &str, updates: &[AccountUpdate]) -> Result<Account> {
        let mut entry = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| account_missing(address))?;

        let mut next = entry.value().clone();
        for update in updates {
            next.apply(update)?;
        }
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn list(&self) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn sample(&self, amount: usize) -> Result<Vec<Account>> {
        let mut rng = rand::rng();
        Ok(self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .choose_multiple(&mut rng, amount))
    }
}

#[derive(Default)]
pub struct InMemoryUploadStore {
    uploads: Arc<DashMap<String, UploadRecord>>,
}

impl InMemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for InMemoryUploadStore {
    async fn insert(&self, record: UploadRecord) -> Result<()> {
        match self.uploads.entry(record.file_name.clone()) {
            Entry::Occupied(_) => Err(CapacityError::AlreadyExists(format!(
                "file {}",
                record.file_name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn find(&self, file_name: &str) -> Result<UploadRecord> {
        self.uploads
            .get(file_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CapacityError::NotFound(format!("file {file_name}")))
    }

    async fn delete(&self, file_name: &str) -> Result<UploadRecord> {
        self.uploads
            .remove(file_name)
            .map(|(_, record)| record)
            .ok_or_else(|| CapacityError::NotFound(format!("file {file_name}")))
    }

    async fn delete_by_account(&self, address: &str, account_id: u64) -> Result<Vec<UploadRecord>> {
        let owned = |record: &UploadRecord| {
            record.uploader == address && record.account_id == account_id
        };
        let names: Vec<String> = self
            .uploads
            .iter()
            .filter(|entry| owned(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(names
            .iter()
            .filter_map(|name| self.uploads.remove_if(name, |_, record| owned(record)))
            .map(|(_, record)| record)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::PlanClass;

    #[tokio::test]
    async fn test_initialise_only_once() {
        let store = InMemoryCounterStore::new();
        assert!(!store.is_initialised().await.unwrap());
        assert!(matches!(
            store.read_singleton().await,
            Err(CapacityError::NotFound(_))
        ));

        store
            .initialise(NetworkCapacityState::default())
            .await
            .unwrap();
        assert!(store.is_initialised().await.unwrap());

        let again = store.initialise(NetworkCapacityState::default()).await;
        assert!(matches!(again, Err(CapacityError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = InMemoryCounterStore::with_state(NetworkCapacityState {
            pool_tier_allocated: 500,
            monthly_subscribers: 1,
            ..Default::default()
        });

        let result = store
            .atomic_batch(&[
                CounterDelta::new(CounterField::PoolAllocated, 500),
                CounterDelta::new(CounterField::MonthlySubscribers, -2),
            ])
            .await;
        assert!(result.is_err());

        let state = store.read_singleton().await.unwrap();
        assert_eq!(state.pool_tier_allocated, 500);
        assert_eq!(state.monthly_subscribers, 1);
    }

    #[tokio::test]
    async fn test_account_insert_rejects_duplicates() {
        let store = InMemoryAccountStore::new();
        let account: Account = crate::NewAccount::new("0x1", PlanClass::Monthly).into();

        store.insert(account.clone()).await.unwrap();
        assert!(matches!(
            store.insert(account).await,
            Err(CapacityError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_account_delete_matches_instance() {
        let store = InMemoryAccountStore::new();
        let account: Account = crate::NewAccount::new("0x1", PlanClass::Monthly).into();
        store.insert(account.clone()).await.unwrap();

        let stale = account.account_id.wrapping_add(1);
        assert!(matches!(
            store.delete("0x1", stale).await,
            Err(CapacityError::NotFound(_))
        ));

        let removed = store.delete("0x1", account.account_id).await.unwrap();
        assert_eq!(removed, account);
        assert!(matches!(
            store.delete("0x1", account.account_id).await,
            Err(CapacityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_account_update_is_atomic() {
        let store = InMemoryAccountStore::new();
        store
            .insert(crate::NewAccount::new("0x1", PlanClass::FixedAmount1).into())
            .await
            .unwrap();

        let result = store
            .update(
                "0x1",
                &[
                    AccountUpdate::Increment(crate::UsageField::FilesUploaded, 1),
                    AccountUpdate::Increment(crate::UsageField::PoolUsed, -10),
                ],
            )
            .await;
        assert!(result.is_err());

        let account = store.find_by_address("0x1").await.unwrap();
        assert_eq!(account.files_uploaded, 0);
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let store = InMemoryAccountStore::new();
        for i in 0..5 {
            store
                .insert(crate::NewAccount::new(format!("0x{i}"), PlanClass::Monthly).into())
                .await
                .unwrap();
        }

        assert_eq!(store.sample(3).await.unwrap().len(), 3);
        assert_eq!(store.sample(10).await.unwrap().len(), 5);
        assert!(store.sample(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_account_keeps_other_owners() {
        let store = InMemoryUploadStore::new();
        let record = |name: &str, uploader: &str, account_id: u64| UploadRecord {
            file_name: name.to_string(),
            size_gb: 10,
            uploaded_at: chrono::Utc::now(),
            uploader: uploader.to_string(),
            tier: crate::Tier::Pool,
            hosts: Vec::new(),
            shards: 0,
            backup_shards: 0,
            timezone: None,
            account_id,
        };

        store.insert(record("a1", "0xa", 1)).await.unwrap();
        store.insert(record("a2", "0xa", 1)).await.unwrap();
        store.insert(record("a-new", "0xa", 2)).await.unwrap();
        store.insert(record("b1", "0xb", 1)).await.unwrap();

        let mut removed: Vec<String> = store
            .delete_by_account("0xa", 1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["a1".to_string(), "a2".to_string()]);

        assert!(store.find("a-new").await.is_ok());
        assert!(store.find("b1").await.is_ok());
        assert!(store.find("a1").await.is_err());
    }
}
