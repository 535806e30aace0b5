//! Source of the accounts the monitor should look at.

use async_trait::async_trait;
use fleetwatch_core::error::CoreError;
use fleetwatch_core::types::AccountId;

/// Supplies the currently active accounts. The health-check cycle also
/// covers any account that has reported scans, so a registry may lag.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn active_accounts(&self) -> Result<Vec<AccountId>, CoreError>;
}

/// A fixed account list.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountRegistry {
    accounts: Vec<AccountId>,
}

impl StaticAccountRegistry {
    pub fn new(accounts: impl IntoIterator<Item = impl Into<AccountId>>) -> Self {
        let mut accounts: Vec<AccountId> = accounts
            .into_iter()
            .map(Into::into)
            .filter(|a: &AccountId| !a.trim().is_empty())
            .collect();
        accounts.sort();
        accounts.dedup();
        Self { accounts }
    }

    /// Read a comma-separated list from `MONITORED_ACCOUNTS` (empty if unset).
    pub fn from_env() -> Self {
        let raw = std::env::var("MONITORED_ACCOUNTS").unwrap_or_default();
        Self::new(raw.split(',').map(str::trim))
    }
}

#[async_trait]
impl AccountRegistry for StaticAccountRegistry {
    async fn active_accounts(&self) -> Result<Vec<AccountId>, CoreError> {
        Ok(self.accounts.clone())
    }
}
