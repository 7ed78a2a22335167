//! BudgetSettingsRepository port - Interface for tenant budget settings.

use async_trait::async_trait;

use crate::domain::budget::BudgetSetting;
use crate::domain::foundation::TenantId;

use super::LedgerError;

/// Port for reading and lazily creating budget settings.
///
/// The gate only reads settings, plus one insert the first time a tenant
/// is seen. Editing happens elsewhere in the console.
#[async_trait]
pub trait BudgetSettingsRepository: Send + Sync {
    async fn find(&self, tenant: &TenantId) -> Result<Option<BudgetSetting>, LedgerError>;

    /// Stores `setting` unless one already exists for the tenant, and returns
    /// whichever is stored.
    async fn insert_if_absent(&self, setting: BudgetSetting) -> Result<BudgetSetting, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn BudgetSettingsRepository) {}
}
