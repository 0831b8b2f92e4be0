use crate::{
    Account, AccountStore, AccountUpdate, CapacityError, CapacityLedger, NewAccount,
    ProfileField, QuotaPolicy, ReconcileFailure, ReconcileReport, Result, Tier, UploadRecord,
    UploadStore, UsageField,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

fn partial(address: &str, operation: &str, err: CapacityError) -> CapacityError {
    error!(
        "{} for {} left account and ledger out of step: {}",
        operation, address, err
    );
    CapacityError::PartialFailure {
        address: address.to_string(),
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}

fn signed(size_gb: u64) -> Result<i64> {
    i64::try_from(size_gb)
        .map_err(|_| CapacityError::InvalidArgument(format!("{size_gb} GB is out of range")))
}

fn charge_updates(tier: Tier, size_gb: i64, files: i64) -> [AccountUpdate; 2] {
    [
        AccountUpdate::Increment(UsageField::for_tier(tier), size_gb),
        AccountUpdate::Increment(UsageField::FilesUploaded, files),
    ]
}

/// Keeps tier capacity in step with the set of accounts and their uploads.
pub struct AccountLifecycleManager {
    ledger: Arc<CapacityLedger>,
    accounts: Arc<dyn AccountStore>,
    uploads: Arc<dyn UploadStore>,
    quota: QuotaPolicy,
}

impl AccountLifecycleManager {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        accounts: Arc<dyn AccountStore>,
        uploads: Arc<dyn UploadStore>,
        quota: QuotaPolicy,
    ) -> Self {
        Self {
            ledger,
            accounts,
            uploads,
            quota,
        }
    }

    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.ledger
    }

    pub fn quota(&self) -> &QuotaPolicy {
        &self.quota
    }

    /// Registers the account, then grants its plan's quota.
    ///
    /// A failed grant leaves the account in place with
    /// `allocation_granted == false` and returns `PartialFailure`;
    /// [`reconcile_allocations`](Self::reconcile_allocations) retries it.
    #[instrument(skip(self, new), fields(address = %new.address, plan = %new.plan))]
    pub async fn create_account(&self, new: NewAccount) -> Result<Account> {
        match self.accounts.find_by_address(&new.address).await {
            Ok(_) => {
                return Err(CapacityError::AlreadyExists(format!("user {}", new.address)));
            }
            Err(CapacityError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let account = Account::from(new);
        self.accounts.insert(account.clone()).await?;
        info!("User {} added", account.address);

        self.grant(&account)
            .await
            .map_err(|e| partial(&account.address, "create_account", e))
    }

    async fn grant(&self, account: &Account) -> Result<Account> {
        self.ledger.grant(self.quota.grant(account.plan)).await?;
        self.accounts
            .update(&account.address, &[AccountUpdate::MarkAllocationGranted])
            .await
    }

    /// Operator path: retries the quota grant of every account that lacks one
    /// and finishes every removal that stopped half way.
    #[instrument(skip(self))]
    pub async fn reconcile_allocations(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for account in self.accounts.list().await? {
            let address = account.address.clone();
            let outcome = if account.removal_pending {
                self.finish_removal(account).await.map(|_| ())
            } else if !account.allocation_granted {
                self.grant(&account).await.map(|_| ())
            } else {
                continue;
            };

            match outcome {
                Ok(()) => {
                    info!("Reconciled {}", address);
                    report.reconciled.push(address);
                }
                Err(e) => {
                    warn!("{} still pending: {}", address, e);
                    report.failed.push(ReconcileFailure {
                        address,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Freezes the account's usage, then removes it and returns its usage
    /// and the plan's allocation to the ledger.
    ///
    /// If the ledger refuses the release the account is put back with
    /// `removal_pending` set and `PartialFailure` is returned; calling this
    /// again or [`reconcile_allocations`](Self::reconcile_allocations)
    /// finishes the job.
    #[instrument(skip(self))]
    pub async fn remove_account(&self, address: &str) -> Result<Account> {
        let marked = self
            .accounts
            .update(address, &[AccountUpdate::MarkRemovalPending])
            .await?;
        self.finish_removal(marked).await
    }

    async fn finish_removal(&self, marked: Account) -> Result<Account> {
        let address = marked.address.as_str();
        // Usage cannot change once removal is pending, so this copy is final
        let account = self.accounts.delete(address, marked.account_id).await?;

        let release = self.quota.release(&account);
        let release = if account.allocation_granted {
            release
        } else {
            release.usage_only()
        };

        if let Err(e) = self.ledger.release(release).await {
            if let Err(restore) = self.accounts.insert(account.clone()).await {
                error!("Account {} could not be put back: {}", address, restore);
            }
            return Err(partial(address, "remove_account", e));
        }
        info!("User {} deleted", address);

        // Left-over records never uncharge anyone: the account id no longer matches
        match self
            .uploads
            .delete_by_account(address, account.account_id)
            .await
        {
            Ok(files) if !files.is_empty() => {
                debug!("Dropped {} upload records of {}", files.len(), address)
            }
            Ok(_) => {}
            Err(e) => warn!("Upload records of {} not dropped: {}", address, e),
        }

        Ok(account)
    }

    /// Charges an upload against the tier first, then the account.
    ///
    /// The ledger charge is the admission decision. If the account update
    /// fails afterwards the charge is taken back.
    #[instrument(skip(self))]
    pub async fn charge_upload(&self, address: &str, tier: Tier, size_gb: u64) -> Result<Account> {
        self.accounts.find_by_address(address).await?;
        let delta = signed(size_gb)?;

        self.ledger.increment_used(tier, size_gb).await?;

        match self
            .accounts
            .update(address, &charge_updates(tier, delta, 1))
            .await
        {
            Ok(account) => Ok(account),
            Err(e) => {
                warn!("Account update failed, reverting {} GB charge: {}", size_gb, e);
                match self.ledger.decrement_used(tier, size_gb).await {
                    Ok(()) => Err(e),
                    Err(revert) => Err(partial(address, "charge_upload", revert)),
                }
            }
        }
    }

    #[instrument(skip(self, record), fields(file = %record.file_name, uploader = %record.uploader))]
    pub async fn record_upload(&self, record: UploadRecord) -> Result<UploadRecord> {
        match self.uploads.find(&record.file_name).await {
            Ok(_) => {
                return Err(CapacityError::AlreadyExists(format!(
                    "file {}",
                    record.file_name
                )));
            }
            Err(CapacityError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut record = record;
        let uploader = self
            .charge_upload(&record.uploader, record.tier, record.size_gb)
            .await?;
        record.account_id = uploader.account_id;

        if let Err(e) = self.uploads.insert(record.clone()).await {
            warn!("Upload record not stored, reverting charge: {}", e);
            self.uncharge(&record).await?;
            return Err(e);
        }

        info!("File upload success ({})", record.tier);
        Ok(record)
    }

    /// Drops the record and frees its space, unless the account that was
    /// charged for it is gone or being removed.
    #[instrument(skip(self))]
    pub async fn delete_upload(&self, file_name: &str) -> Result<UploadRecord> {
        let record = self.uploads.delete(file_name).await?;
        self.uncharge(&record).await?;
        info!("File {} deleted", file_name);
        Ok(record)
    }

    async fn uncharge(&self, record: &UploadRecord) -> Result<()> {
        let delta = signed(record.size_gb)?;
        let [usage, files] = charge_updates(record.tier, -delta, -1);
        let updates = [AccountUpdate::RequireAccountId(record.account_id), usage, files];

        match self.accounts.update(&record.uploader, &updates).await {
            Ok(_) => {}
            // removing the account releases its usage
            Err(CapacityError::NotFound(reason)) => {
                debug!("Not uncharging {}: {}", record.file_name, reason);
                return Ok(());
            }
            Err(e) => return Err(partial(&record.uploader, "uncharge", e)),
        }

        self.ledger
            .decrement_used(record.tier, record.size_gb)
            .await
            .map_err(|e| partial(&record.uploader, "uncharge", e))
    }

    pub async fn find_upload(&self, file_name: &str) -> Result<UploadRecord> {
        self.uploads.find(file_name).await
    }

    pub async fn update_profile(
        &self,
        address: &str,
        field: ProfileField,
        value: String,
    ) -> Result<Account> {
        self.accounts
            .update(address, &[AccountUpdate::Set(field, value)])
            .await
    }

    pub async fn get_account(&self, address: &str) -> Result<Account> {
        self.accounts.find_by_address(address).await
    }

    pub async fn sample_accounts(&self, amount: usize) -> Result<Vec<Account>> {
        self.accounts.sample(amount).await
    }
}
