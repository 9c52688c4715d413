//! Isolation enforcement layer over the shared Postgres store.
//!
//! Two independent guards stand between application logic and tenant-owned
//! rows. The application-layer guard is structural: repositories can only
//! obtain a tenant id from the [`ScopedTx`] they run in, never from caller
//! input, so a query cannot "forget" the tenant filter. The storage-layer
//! guard is the row policy installed by [`schema::init_schema`], keyed on a
//! transaction-local session setting established here before any other
//! statement runs. Disabling the first guard alone still leaves the row
//! policy blocking cross-tenant reads.

pub mod schema;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::error;

use pd_common::{CoreError, Result, TenantId};
use pd_tenant::AccessContext;

/// Pool wrapper; the only way to open a transaction against tenant-owned
/// tables is through [`TenantPool::begin`], which requires an explicit
/// [`AccessContext`].
#[derive(Clone)]
pub struct TenantPool {
    pool: PgPool,
}

impl TenantPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction scoped to the given context. The session setting
    /// that drives the row policies is installed transaction-locally before
    /// the transaction is handed out, so no query can run unscoped.
    pub async fn begin(&self, context: &AccessContext) -> Result<ScopedTx> {
        let mut tx = self.pool.begin().await?;

        match context {
            AccessContext::Tenant(tenant) => {
                sqlx::query("SELECT set_config('podium.tenant_id', $1, true)")
                    .bind(tenant.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
            AccessContext::System { actor } => {
                sqlx::query("SELECT set_config('podium.system_actor', $1, true)")
                    .bind(actor)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        Ok(ScopedTx {
            tx,
            context: context.clone(),
        })
    }
}

/// A transaction bound to one access context.
///
/// Repositories bind `tenant_id()` into every statement they issue; under a
/// system context that call fails with `NoTenantContext`, so tenant-scoped
/// code structurally cannot run elevated.
pub struct ScopedTx {
    tx: Transaction<'static, Postgres>,
    context: AccessContext,
}

impl ScopedTx {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    pub fn context(&self) -> &AccessContext {
        &self.context
    }

    /// The tenant this transaction is scoped to. Fails closed under a system
    /// context.
    pub fn tenant_id(&self) -> Result<TenantId> {
        self.context.tenant_id().ok_or(CoreError::NoTenantContext)
    }

    /// Second-line ownership check on a row already fetched. A mismatch here
    /// should be unreachable (both guards would have had to fail); its
    /// occurrence indicates an attack or a bug and is logged accordingly.
    pub fn assert_owned(&self, row_tenant: TenantId, resource: &str) -> Result<()> {
        let tenant = self.tenant_id()?;
        if row_tenant != tenant {
            error!(
                tenant = %tenant,
                row_tenant = %row_tenant,
                resource = %resource,
                "cross-tenant access blocked"
            );
            return Err(CoreError::cross_tenant(tenant, resource));
        }
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
