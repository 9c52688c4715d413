//! Schema and row policies for the shared store.
//!
//! Every tenant-owned table carries two permissive row policies:
//! `tenant_isolation`, keyed on the transaction-local `podium.tenant_id`
//! setting, and `system_access`, keyed on `podium.system_actor`. When neither
//! setting is present `current_setting(..., true)` yields NULL and both
//! policies evaluate false, so an unscoped session sees zero rows.
//!
//! `FORCE ROW LEVEL SECURITY` keeps the policies active even for the table
//! owner, which is what makes the storage layer an independent guard: a query
//! that forgets the application-side tenant predicate still cannot leak
//! cross-tenant rows.

use sqlx::PgPool;

use pd_common::Result;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS competitions (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_competitions_tenant ON competitions(tenant_id);

CREATE TABLE IF NOT EXISTS entries (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    competition_id UUID NOT NULL,
    competitor TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_tenant_competition
    ON entries(tenant_id, competition_id);

CREATE TABLE IF NOT EXISTS outbox_events (
    event_id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    aggregate_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    publish_status TEXT NOT NULL DEFAULT 'PENDING',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TIMESTAMPTZ,
    last_error TEXT,
    locked_by TEXT,
    locked_until TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_outbox_claimable
    ON outbox_events(publish_status, locked_until);
CREATE INDEX IF NOT EXISTS idx_outbox_tenant_order
    ON outbox_events(tenant_id, occurred_at);

ALTER TABLE competitions ENABLE ROW LEVEL SECURITY;
ALTER TABLE competitions FORCE ROW LEVEL SECURITY;
ALTER TABLE entries ENABLE ROW LEVEL SECURITY;
ALTER TABLE entries FORCE ROW LEVEL SECURITY;
ALTER TABLE outbox_events ENABLE ROW LEVEL SECURITY;
ALTER TABLE outbox_events FORCE ROW LEVEL SECURITY;

DROP POLICY IF EXISTS tenant_isolation ON competitions;
CREATE POLICY tenant_isolation ON competitions
    USING (tenant_id = current_setting('podium.tenant_id', true)::uuid);
DROP POLICY IF EXISTS system_access ON competitions;
CREATE POLICY system_access ON competitions
    USING (coalesce(current_setting('podium.system_actor', true), '') <> '');

DROP POLICY IF EXISTS tenant_isolation ON entries;
CREATE POLICY tenant_isolation ON entries
    USING (tenant_id = current_setting('podium.tenant_id', true)::uuid);
DROP POLICY IF EXISTS system_access ON entries;
CREATE POLICY system_access ON entries
    USING (coalesce(current_setting('podium.system_actor', true), '') <> '');

DROP POLICY IF EXISTS tenant_isolation ON outbox_events;
CREATE POLICY tenant_isolation ON outbox_events
    USING (tenant_id = current_setting('podium.tenant_id', true)::uuid);
DROP POLICY IF EXISTS system_access ON outbox_events;
CREATE POLICY system_access ON outbox_events
    USING (coalesce(current_setting('podium.system_actor', true), '') <> '');
"#;

/// Create tables, indexes, and row policies. Idempotent.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(DDL).execute(pool).await?;
    Ok(())
}
