//! Postgres-backed stores.
//!
//! Every call runs under the configured datastore timeout. Mutations that carry
//! an audit entry write both inside one transaction.
//!
//! Row structs are mapped by hand (`FromRow`) so the crate does not depend on
//! sqlx's compile-time query macros.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use gatehouse_auth::{
    AuditAction, AuditEntry, ClientMeta, EntityKind, HandleName, Identity, LockoutPolicy,
    LockoutState, LockoutTransition, Page, PageName, Permission, PermissionName,
    RefreshTokenRecord, Role, RoleName, SessionRecord,
};
use gatehouse_core::{IdentityId, PageId, PermissionId, RefreshTokenId, RoleId, SessionId};

use super::{
    AuditQuery, AuditStore, IdentityStore, RbacStore, RefreshTokenStore, SessionStore, StoreError,
    bounded,
};

const SCHEMA: &str = include_str!("../../migrations/0001_auth_core.sql");

/// Postgres implementation of every store trait.
///
/// ## Thread Safety
///
/// Cheap to clone; all clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, timeout))
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        bounded(self.timeout, "migrate", async {
            sqlx::raw_sql(SCHEMA)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
            Ok(())
        })
        .await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self, operation: &'static str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// Write the audit rows into `tx` and commit.
async fn commit_with_audit(
    mut tx: Transaction<'static, Postgres>,
    audit: &[AuditEntry],
    operation: &'static str,
) -> Result<(), StoreError> {
    for entry in audit {
        insert_audit(&mut tx, entry)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
    }
    tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            id, identity_id, action, entity_type, entity_id, old_value, new_value,
            performed_by, ip_address, user_agent, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(*entry.id.as_uuid())
    .bind(entry.identity_id.map(|id| *id.as_uuid()))
    .bind(entry.action.as_str())
    .bind(entry.entity_type.as_str())
    .bind(entry.entity_id)
    .bind(entry.old_value.clone())
    .bind(entry.new_value.clone())
    .bind(entry.performed_by.map(|id| *id.as_uuid()))
    .bind(entry.client.ip_address.as_deref())
    .bind(entry.client.user_agent.as_deref())
    .bind(entry.recorded_at)
    .execute(conn)
    .await?;
    Ok(())
}

fn affected_or_not_found(result: sqlx::postgres::PgQueryResult) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

const IDENTITY_COLUMNS: &str = "id, handle, password_hash, active, failed_login_attempts, \
    locked_until, last_login_at, password_changed_at, created_at, updated_at";

struct IdentityRow {
    id: Uuid,
    handle: String,
    password_hash: String,
    active: bool,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    password_changed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for IdentityRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(IdentityRow {
            id: row.try_get("id")?,
            handle: row.try_get("handle")?,
            password_hash: row.try_get("password_hash")?,
            active: row.try_get("active")?,
            failed_login_attempts: row.try_get("failed_login_attempts")?,
            locked_until: row.try_get("locked_until")?,
            last_login_at: row.try_get("last_login_at")?,
            password_changed_at: row.try_get("password_changed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            id: IdentityId::from_uuid(row.id),
            handle: HandleName::parse(&row.handle).map_err(|e| corrupt("identity handle", e))?,
            password_hash: row.password_hash,
            active: row.active,
            failed_login_attempts: u32::try_from(row.failed_login_attempts)
                .map_err(|e| corrupt("failed_login_attempts", e))?,
            locked_until: row.locked_until,
            last_login_at: row.last_login_at,
            password_changed_at: row.password_changed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const REFRESH_COLUMNS: &str = "id, identity_id, session_id, token_hash, expires_at, created_at, \
    last_used_at, ip_address, user_agent, revoked, revoked_at";

struct RefreshTokenRow {
    id: Uuid,
    identity_id: Uuid,
    session_id: Option<Uuid>,
    token_hash: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for RefreshTokenRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RefreshTokenRow {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            session_id: row.try_get("session_id")?,
            token_hash: row.try_get("token_hash")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            revoked: row.try_get("revoked")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: RefreshTokenId::from_uuid(row.id),
            identity_id: IdentityId::from_uuid(row.identity_id),
            session_id: row.session_id.map(SessionId::from_uuid),
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            client: ClientMeta::new(row.ip_address, row.user_agent),
            revoked: row.revoked,
            revoked_at: row.revoked_at,
        }
    }
}

struct SessionRow {
    id: Uuid,
    identity_id: Uuid,
    token_hash: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            token_hash: row.try_get("token_hash")?,
            created_at: row.try_get("created_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
            expires_at: row.try_get("expires_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
        })
    }
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            id: SessionId::from_uuid(row.id),
            identity_id: IdentityId::from_uuid(row.identity_id),
            token_hash: row.token_hash,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
            expires_at: row.expires_at,
            client: ClientMeta::new(row.ip_address, row.user_agent),
        }
    }
}

struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    system_defined: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            system_defined: row.try_get("system_defined")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        Ok(Role {
            id: RoleId::from_uuid(row.id),
            name: RoleName::parse(row.name).map_err(|e| corrupt("role name", e))?,
            description: row.description,
            system_defined: row.system_defined,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct PermissionRow {
    id: Uuid,
    resource: String,
    action: String,
    description: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for PermissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PermissionRow {
            id: row.try_get("id")?,
            resource: row.try_get("resource")?,
            action: row.try_get("action")?,
            description: row.try_get("description")?,
        })
    }
}

impl TryFrom<PermissionRow> for Permission {
    type Error = StoreError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        Ok(Permission {
            id: PermissionId::from_uuid(row.id),
            name: PermissionName::new(&row.resource, &row.action)
                .map_err(|e| corrupt("permission name", e))?,
            description: row.description,
        })
    }
}

const PAGE_COLUMNS: &str =
    "id, name, label, route, parent_id, system_defined, sort_order, created_at, updated_at";

struct PageRow {
    id: Uuid,
    name: String,
    label: String,
    route: Option<String>,
    parent_id: Option<Uuid>,
    system_defined: bool,
    sort_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for PageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PageRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            label: row.try_get("label")?,
            route: row.try_get("route")?,
            parent_id: row.try_get("parent_id")?,
            system_defined: row.try_get("system_defined")?,
            sort_order: row.try_get("sort_order")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<PageRow> for Page {
    type Error = StoreError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        Ok(Page {
            id: PageId::from_uuid(row.id),
            name: PageName::parse(row.name).map_err(|e| corrupt("page name", e))?,
            label: row.label,
            route: row.route,
            parent_id: row.parent_id.map(PageId::from_uuid),
            system_defined: row.system_defined,
            sort_order: row.sort_order,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct AuditRow {
    id: Uuid,
    identity_id: Option<Uuid>,
    action: String,
    entity_type: String,
    entity_id: Option<Uuid>,
    old_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
    performed_by: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            action: row.try_get("action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            old_value: row.try_get("old_value")?,
            new_value: row.try_get("new_value")?,
            performed_by: row.try_get("performed_by")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id.into(),
            identity_id: row.identity_id.map(IdentityId::from_uuid),
            action: AuditAction::parse(&row.action)
                .ok_or_else(|| corrupt("audit action", &row.action))?,
            entity_type: EntityKind::parse(&row.entity_type)
                .ok_or_else(|| corrupt("audit entity type", &row.entity_type))?,
            entity_id: row.entity_id,
            old_value: row.old_value,
            new_value: row.new_value,
            performed_by: row.performed_by.map(IdentityId::from_uuid),
            client: ClientMeta::new(row.ip_address, row.user_agent),
            recorded_at: row.recorded_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Identities
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl IdentityStore for PostgresStore {
    #[instrument(skip(self), fields(identity_id = %id), err)]
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        bounded(self.timeout, "identity_get", async {
            let row: Option<IdentityRow> = sqlx::query_as(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("identity_get", e))?;
            row.map(Identity::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self), fields(handle = %handle), err)]
    async fn find_by_handle(&self, handle: &HandleName) -> Result<Option<Identity>, StoreError> {
        bounded(self.timeout, "identity_find_by_handle", async {
            let row: Option<IdentityRow> = sqlx::query_as(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities WHERE handle = $1"
            ))
            .bind(handle.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("identity_find_by_handle", e))?;
            row.map(Identity::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        bounded(self.timeout, "identity_list", async {
            let rows: Vec<IdentityRow> = sqlx::query_as(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY handle"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("identity_list", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self, identity, audit), fields(identity_id = %identity.id), err)]
    async fn create(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "identity_create", async {
            let mut tx = self.begin("identity_create").await?;
            sqlx::query(&format!(
                "INSERT INTO identities ({IDENTITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(*identity.id.as_uuid())
            .bind(identity.handle.as_str())
            .bind(&identity.password_hash)
            .bind(identity.active)
            .bind(i32::try_from(identity.failed_login_attempts).unwrap_or(i32::MAX))
            .bind(identity.locked_until)
            .bind(identity.last_login_at)
            .bind(identity.password_changed_at)
            .bind(identity.created_at)
            .bind(identity.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("identity_create", e))?;
            commit_with_audit(tx, &[audit], "identity_create").await
        })
        .await
    }

    #[instrument(skip(self, identity, audit), fields(identity_id = %identity.id), err)]
    async fn update(&self, identity: Identity, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "identity_update", async {
            let mut tx = self.begin("identity_update").await?;
            let result = sqlx::query(
                "UPDATE identities SET handle = $2, active = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(*identity.id.as_uuid())
            .bind(identity.handle.as_str())
            .bind(identity.active)
            .bind(identity.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("identity_update", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "identity_update").await
        })
        .await
    }

    #[instrument(skip(self, password_hash, audit), fields(identity_id = %id), err)]
    async fn set_password_hash(
        &self,
        id: IdentityId,
        password_hash: String,
        now: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        bounded(self.timeout, "identity_set_password", async {
            let mut tx = self.begin("identity_set_password").await?;
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET password_hash = $2, password_changed_at = $3, updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(*id.as_uuid())
            .bind(&password_hash)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("identity_set_password", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "identity_set_password").await
        })
        .await
    }

    /// Single statement: the `prev` CTE takes the row lock, so concurrent failures
    /// serialize, no increment is lost and exactly one of them observes the
    /// lock transition. `newly_locked` is decided in SQL against the row's
    /// previous `locked_until`.
    #[instrument(skip(self, policy), fields(identity_id = %id, operation), err)]
    async fn record_failed_attempt(
        &self,
        id: IdentityId,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutTransition, StoreError> {
        Span::current().record("operation", "record_failed_attempt");
        let until = now + policy.duration;
        let threshold = i32::try_from(policy.threshold).unwrap_or(i32::MAX);

        bounded(self.timeout, "record_failed_attempt", async {
            let row = sqlx::query(
                r#"
                WITH prev AS (
                    SELECT id, failed_login_attempts, locked_until
                    FROM identities
                    WHERE id = $1
                    FOR UPDATE
                ),
                bumped AS (
                    SELECT
                        prev.id,
                        prev.locked_until AS prev_locked_until,
                        CASE
                            WHEN prev.locked_until IS NOT NULL AND prev.locked_until <= $2 THEN 1
                            ELSE prev.failed_login_attempts + 1
                        END AS attempts
                    FROM prev
                )
                UPDATE identities AS i SET
                    failed_login_attempts = bumped.attempts,
                    locked_until = CASE
                        WHEN bumped.prev_locked_until IS NOT NULL AND bumped.prev_locked_until > $2
                            THEN bumped.prev_locked_until
                        WHEN bumped.attempts >= $3 THEN $4
                        ELSE NULL
                    END,
                    updated_at = $2
                FROM bumped
                WHERE i.id = bumped.id
                RETURNING
                    i.failed_login_attempts,
                    i.locked_until,
                    (
                        i.locked_until IS NOT NULL
                        AND NOT (bumped.prev_locked_until IS NOT NULL AND bumped.prev_locked_until > $2)
                    ) AS newly_locked
                "#,
            )
            .bind(*id.as_uuid())
            .bind(now)
            .bind(threshold)
            .bind(until)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_failed_attempt", e))?
            .ok_or(StoreError::NotFound)?;

            let attempts: i32 = row
                .try_get("failed_login_attempts")
                .map_err(|e| map_sqlx_error("record_failed_attempt", e))?;
            let locked_until: Option<DateTime<Utc>> = row
                .try_get("locked_until")
                .map_err(|e| map_sqlx_error("record_failed_attempt", e))?;
            let newly_locked: bool = row
                .try_get("newly_locked")
                .map_err(|e| map_sqlx_error("record_failed_attempt", e))?;

            Ok(LockoutTransition {
                state: LockoutState {
                    failed_attempts: u32::try_from(attempts)
                        .map_err(|e| corrupt("failed_login_attempts", e))?,
                    locked_until,
                },
                newly_locked,
            })
        })
        .await
    }

    #[instrument(skip(self), fields(identity_id = %id), err)]
    async fn record_successful_login(&self, id: IdentityId, now: DateTime<Utc>) -> Result<(), StoreError> {
        bounded(self.timeout, "record_successful_login", async {
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2, updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(*id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_successful_login", e))?;
            affected_or_not_found(result)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Refresh tokens
// ─────────────────────────────────────────────────────────────────────────────

async fn insert_refresh(conn: &mut PgConnection, record: &RefreshTokenRecord) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO refresh_tokens ({REFRESH_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    ))
    .bind(*record.id.as_uuid())
    .bind(*record.identity_id.as_uuid())
    .bind(record.session_id.map(|id| *id.as_uuid()))
    .bind(&record.token_hash)
    .bind(record.expires_at)
    .bind(record.created_at)
    .bind(record.last_used_at)
    .bind(record.client.ip_address.as_deref())
    .bind(record.client.user_agent.as_deref())
    .bind(record.revoked)
    .bind(record.revoked_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for PostgresStore {
    #[instrument(skip(self, record), fields(identity_id = %record.identity_id), err)]
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        bounded(self.timeout, "refresh_insert", async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("refresh_insert", e))?;
            insert_refresh(&mut conn, &record)
                .await
                .map_err(|e| map_sqlx_error("refresh_insert", e))
        })
        .await
    }

    #[instrument(skip(self, token_hash), err)]
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        bounded(self.timeout, "refresh_find", async {
            let row: Option<RefreshTokenRow> = sqlx::query_as(&format!(
                "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
            ))
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_find", e))?;
            Ok(row.map(RefreshTokenRecord::from))
        })
        .await
    }

    #[instrument(skip(self), fields(refresh_token_id = %id), err)]
    async fn mark_used(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError> {
        bounded(self.timeout, "refresh_mark_used", async {
            let result = sqlx::query("UPDATE refresh_tokens SET last_used_at = $2 WHERE id = $1")
                .bind(*id.as_uuid())
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("refresh_mark_used", e))?;
            affected_or_not_found(result)
        })
        .await
    }

    #[instrument(skip(self, replacement), fields(refresh_token_id = %presented), err)]
    async fn rotate(
        &self,
        presented: RefreshTokenId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        bounded(self.timeout, "refresh_rotate", async {
            let mut tx = self.begin("refresh_rotate").await?;
            let result = sqlx::query(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE id = $1 AND NOT revoked",
            )
            .bind(*presented.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("refresh_rotate", e))?;

            if result.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Ok(false);
            }

            insert_refresh(&mut tx, &replacement)
                .await
                .map_err(|e| map_sqlx_error("refresh_rotate", e))?;
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("refresh_rotate", e))?;
            Ok(true)
        })
        .await
    }

    #[instrument(skip(self), fields(refresh_token_id = %id), err)]
    async fn revoke(&self, id: RefreshTokenId, now: DateTime<Utc>) -> Result<(), StoreError> {
        bounded(self.timeout, "refresh_revoke", async {
            sqlx::query(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE id = $1 AND NOT revoked",
            )
            .bind(*id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_revoke", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn revoke_for_session(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        bounded(self.timeout, "refresh_revoke_session", async {
            let result = sqlx::query(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE session_id = $1 AND NOT revoked",
            )
            .bind(*session_id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_revoke_session", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn revoke_all_for(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        bounded(self.timeout, "refresh_revoke_all", async {
            let result = sqlx::query(
                "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE identity_id = $1 AND NOT revoked",
            )
            .bind(*identity_id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_revoke_all", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        bounded(self.timeout, "refresh_purge", async {
            let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("refresh_purge", e))?;
            Ok(result.rows_affected())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl SessionStore for PostgresStore {
    #[instrument(skip(self, session), fields(session_id = %session.id), err)]
    async fn insert(&self, session: SessionRecord) -> Result<(), StoreError> {
        bounded(self.timeout, "session_insert", async {
            sqlx::query(
                r#"
                INSERT INTO sessions (
                    id, identity_id, token_hash, created_at, last_activity_at, expires_at,
                    ip_address, user_agent
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(*session.id.as_uuid())
            .bind(*session.identity_id.as_uuid())
            .bind(&session.token_hash)
            .bind(session.created_at)
            .bind(session.last_activity_at)
            .bind(session.expires_at)
            .bind(session.client.ip_address.as_deref())
            .bind(session.client.user_agent.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("session_insert", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        bounded(self.timeout, "session_get", async {
            let row: Option<SessionRow> = sqlx::query_as(
                r#"
                SELECT id, identity_id, token_hash, created_at, last_activity_at, expires_at,
                       ip_address, user_agent
                FROM sessions
                WHERE id = $1
                "#,
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("session_get", e))?;
            Ok(row.map(SessionRecord::from))
        })
        .await
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn record_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError> {
        bounded(self.timeout, "session_activity", async {
            let result = sqlx::query(
                "UPDATE sessions SET last_activity_at = GREATEST(last_activity_at, $2) WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("session_activity", e))?;
            affected_or_not_found(result)
        })
        .await
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn delete(&self, id: SessionId) -> Result<bool, StoreError> {
        bounded(self.timeout, "session_delete", async {
            let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("session_delete", e))?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn delete_all_for(&self, identity_id: IdentityId) -> Result<u64, StoreError> {
        bounded(self.timeout, "session_delete_all", async {
            let result = sqlx::query("DELETE FROM sessions WHERE identity_id = $1")
                .bind(*identity_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("session_delete_all", e))?;
            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        idle_timeout: chrono::Duration,
    ) -> Result<u64, StoreError> {
        bounded(self.timeout, "session_purge", async {
            let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1 OR last_activity_at < $2")
                .bind(now)
                .bind(now - idle_timeout)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("session_purge", e))?;
            Ok(result.rows_affected())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RBAC catalog
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RbacStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        bounded(self.timeout, "role_list", async {
            let rows: Vec<RoleRow> = sqlx::query_as(
                "SELECT id, name, description, system_defined, created_at, updated_at FROM roles ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_list", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        bounded(self.timeout, "role_get", async {
            let row: Option<RoleRow> = sqlx::query_as(
                "SELECT id, name, description, system_defined, created_at, updated_at FROM roles WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_get", e))?;
            row.map(Role::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self), fields(role = %name), err)]
    async fn find_role_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError> {
        bounded(self.timeout, "role_find", async {
            let row: Option<RoleRow> = sqlx::query_as(
                "SELECT id, name, description, system_defined, created_at, updated_at FROM roles WHERE name = $1",
            )
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_find", e))?;
            row.map(Role::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self, role, audit), fields(role = %role.name), err)]
    async fn create_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "role_create", async {
            let mut tx = self.begin("role_create").await?;
            sqlx::query(
                r#"
                INSERT INTO roles (id, name, description, system_defined, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(*role.id.as_uuid())
            .bind(role.name.as_str())
            .bind(role.description.as_deref())
            .bind(role.system_defined)
            .bind(role.created_at)
            .bind(role.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("role_create", e))?;
            commit_with_audit(tx, &[audit], "role_create").await
        })
        .await
    }

    #[instrument(skip(self, role, audit), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: Role, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "role_update", async {
            let mut tx = self.begin("role_update").await?;
            let result = sqlx::query(
                "UPDATE roles SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(*role.id.as_uuid())
            .bind(role.name.as_str())
            .bind(role.description.as_deref())
            .bind(role.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("role_update", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "role_update").await
        })
        .await
    }

    #[instrument(skip(self, audit), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "role_delete", async {
            let mut tx = self.begin("role_delete").await?;
            let result = sqlx::query("DELETE FROM roles WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("role_delete", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "role_delete").await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        bounded(self.timeout, "permission_list", async {
            let rows: Vec<PermissionRow> = sqlx::query_as(
                "SELECT id, resource, action, description FROM permissions ORDER BY resource, action",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("permission_list", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        bounded(self.timeout, "permission_get", async {
            let row: Option<PermissionRow> = sqlx::query_as(
                "SELECT id, resource, action, description FROM permissions WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("permission_get", e))?;
            row.map(Permission::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self, permission, audit), fields(permission = %permission.name), err)]
    async fn create_permission(&self, permission: Permission, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "permission_create", async {
            let mut tx = self.begin("permission_create").await?;
            sqlx::query(
                "INSERT INTO permissions (id, resource, action, description) VALUES ($1, $2, $3, $4)",
            )
            .bind(*permission.id.as_uuid())
            .bind(permission.name.resource())
            .bind(permission.name.action())
            .bind(permission.description.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("permission_create", e))?;
            commit_with_audit(tx, &[audit], "permission_create").await
        })
        .await
    }

    #[instrument(skip(self, audit), fields(permission_id = %id), err)]
    async fn delete_permission(&self, id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "permission_delete", async {
            let mut tx = self.begin("permission_delete").await?;
            let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("permission_delete", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "permission_delete").await
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_pages(&self) -> Result<Vec<Page>, StoreError> {
        bounded(self.timeout, "page_list", async {
            let rows: Vec<PageRow> = sqlx::query_as(&format!(
                "SELECT {PAGE_COLUMNS} FROM pages ORDER BY sort_order, name"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("page_list", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self), fields(page_id = %id), err)]
    async fn get_page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        bounded(self.timeout, "page_get", async {
            let row: Option<PageRow> =
                sqlx::query_as(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1"))
                    .bind(*id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("page_get", e))?;
            row.map(Page::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self), fields(page = %name), err)]
    async fn find_page_by_name(&self, name: &PageName) -> Result<Option<Page>, StoreError> {
        bounded(self.timeout, "page_find", async {
            let row: Option<PageRow> =
                sqlx::query_as(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE name = $1"))
                    .bind(name.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("page_find", e))?;
            row.map(Page::try_from).transpose()
        })
        .await
    }

    #[instrument(skip(self, page, audit), fields(page = %page.name), err)]
    async fn create_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "page_create", async {
            let mut tx = self.begin("page_create").await?;
            sqlx::query(&format!(
                "INSERT INTO pages ({PAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
            ))
            .bind(*page.id.as_uuid())
            .bind(page.name.as_str())
            .bind(&page.label)
            .bind(page.route.as_deref())
            .bind(page.parent_id.map(|id| *id.as_uuid()))
            .bind(page.system_defined)
            .bind(page.sort_order)
            .bind(page.created_at)
            .bind(page.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("page_create", e))?;
            commit_with_audit(tx, &[audit], "page_create").await
        })
        .await
    }

    #[instrument(skip(self, page, audit), fields(page_id = %page.id), err)]
    async fn update_page(&self, page: Page, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "page_update", async {
            let mut tx = self.begin("page_update").await?;
            let result = sqlx::query(
                r#"
                UPDATE pages
                SET name = $2, label = $3, route = $4, parent_id = $5, sort_order = $6, updated_at = $7
                WHERE id = $1
                "#,
            )
            .bind(*page.id.as_uuid())
            .bind(page.name.as_str())
            .bind(&page.label)
            .bind(page.route.as_deref())
            .bind(page.parent_id.map(|id| *id.as_uuid()))
            .bind(page.sort_order)
            .bind(page.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("page_update", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "page_update").await
        })
        .await
    }

    #[instrument(skip(self, audit), fields(page_id = %id), err)]
    async fn delete_page(&self, id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "page_delete", async {
            let mut tx = self.begin("page_delete").await?;
            let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE parent_id = $1")
                .bind(*id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("page_delete", e))?;
            if children > 0 {
                return Err(StoreError::Conflict("page still has child pages".to_string()));
            }
            let result = sqlx::query("DELETE FROM pages WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("page_delete", e))?;
            affected_or_not_found(result)?;
            commit_with_audit(tx, &[audit], "page_delete").await
        })
        .await
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn roles_for_identity(&self, identity_id: IdentityId) -> Result<Vec<Role>, StoreError> {
        bounded(self.timeout, "roles_for_identity", async {
            let rows: Vec<RoleRow> = sqlx::query_as(
                r#"
                SELECT r.id, r.name, r.description, r.system_defined, r.created_at, r.updated_at
                FROM roles r
                JOIN identity_roles ir ON ir.role_id = r.id
                WHERE ir.identity_id = $1
                ORDER BY r.name
                "#,
            )
            .bind(*identity_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("roles_for_identity", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>, StoreError> {
        bounded(self.timeout, "permissions_for_role", async {
            let rows: Vec<PermissionRow> = sqlx::query_as(
                r#"
                SELECT p.id, p.resource, p.action, p.description
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                WHERE rp.role_id = $1
                ORDER BY p.resource, p.action
                "#,
            )
            .bind(*role_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("permissions_for_role", e))?;
            collect(rows)
        })
        .await
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn page_ids_for_role(&self, role_id: RoleId) -> Result<Vec<PageId>, StoreError> {
        bounded(self.timeout, "page_ids_for_role", async {
            let ids: Vec<Uuid> = sqlx::query_scalar("SELECT page_id FROM role_pages WHERE role_id = $1")
                .bind(*role_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("page_ids_for_role", e))?;
            Ok(ids.into_iter().map(PageId::from_uuid).collect())
        })
        .await
    }

    #[instrument(skip(self, audit), fields(identity_id = %identity_id, role_id = %role_id), err)]
    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "assign_role", "INSERT INTO identity_roles (identity_id, role_id) VALUES ($1, $2)",
            *identity_id.as_uuid(), *role_id.as_uuid(), audit).await
    }

    #[instrument(skip(self, audit), fields(identity_id = %identity_id, role_id = %role_id), err)]
    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "unassign_role", "DELETE FROM identity_roles WHERE identity_id = $1 AND role_id = $2",
            *identity_id.as_uuid(), *role_id.as_uuid(), audit).await
    }

    #[instrument(skip(self, audit), fields(role_id = %role_id, permission_id = %permission_id), err)]
    async fn grant_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "grant_permission", "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)",
            *role_id.as_uuid(), *permission_id.as_uuid(), audit).await
    }

    #[instrument(skip(self, audit), fields(role_id = %role_id, permission_id = %permission_id), err)]
    async fn revoke_permission(&self, role_id: RoleId, permission_id: PermissionId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "revoke_permission", "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2",
            *role_id.as_uuid(), *permission_id.as_uuid(), audit).await
    }

    #[instrument(skip(self, audit), fields(role_id = %role_id, page_id = %page_id), err)]
    async fn grant_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "grant_page", "INSERT INTO role_pages (role_id, page_id) VALUES ($1, $2)",
            *role_id.as_uuid(), *page_id.as_uuid(), audit).await
    }

    #[instrument(skip(self, audit), fields(role_id = %role_id, page_id = %page_id), err)]
    async fn revoke_page(&self, role_id: RoleId, page_id: PageId, audit: AuditEntry) -> Result<(), StoreError> {
        link(self, "revoke_page", "DELETE FROM role_pages WHERE role_id = $1 AND page_id = $2",
            *role_id.as_uuid(), *page_id.as_uuid(), audit).await
    }

    #[instrument(
        skip(self, grants, revocations),
        fields(role_id = %role_id, grants = grants.len(), revocations = revocations.len()),
        err
    )]
    async fn apply_page_changes(
        &self,
        role_id: RoleId,
        grants: Vec<(PageId, AuditEntry)>,
        revocations: Vec<(PageId, AuditEntry)>,
    ) -> Result<(), StoreError> {
        bounded(self.timeout, "apply_page_changes", async {
            let mut tx = self.begin("apply_page_changes").await?;
            let mut audit = Vec::with_capacity(grants.len() + revocations.len());

            for (page_id, entry) in revocations {
                sqlx::query("DELETE FROM role_pages WHERE role_id = $1 AND page_id = $2")
                    .bind(*role_id.as_uuid())
                    .bind(*page_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("apply_page_changes", e))?;
                audit.push(entry);
            }
            for (page_id, entry) in grants {
                sqlx::query(
                    "INSERT INTO role_pages (role_id, page_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(*role_id.as_uuid())
                .bind(*page_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("apply_page_changes", e))?;
                audit.push(entry);
            }

            commit_with_audit(tx, &audit, "apply_page_changes").await
        })
        .await
    }
}

/// Insert or delete one join-table row together with its audit entry.
///
/// Inserts map duplicate keys to `Conflict`; deletes that touch nothing map to
/// `NotFound`.
async fn link(
    store: &PostgresStore,
    operation: &'static str,
    sql: &'static str,
    left: Uuid,
    right: Uuid,
    audit: AuditEntry,
) -> Result<(), StoreError> {
    bounded(store.timeout, operation, async {
        let mut tx = store.begin(operation).await?;
        let result = sqlx::query(sql)
            .bind(left)
            .bind(right)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("{operation}: relation already exists"))
                } else {
                    map_sqlx_error(operation, e)
                }
            })?;
        affected_or_not_found(result)?;
        commit_with_audit(tx, &[audit], operation).await
    })
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuditStore for PostgresStore {
    #[instrument(skip(self, entry), fields(action = entry.action.as_str()), err)]
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        bounded(self.timeout, "audit_append", async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("audit_append", e))?;
            insert_audit(&mut conn, &entry)
                .await
                .map_err(|e| map_sqlx_error("audit_append", e))
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let limit = if query.limit == 0 {
            i64::MAX
        } else {
            i64::try_from(query.limit).unwrap_or(i64::MAX)
        };

        bounded(self.timeout, "audit_query", async {
            let rows: Vec<AuditRow> = sqlx::query_as(
                r#"
                SELECT id, identity_id, action, entity_type, entity_id, old_value, new_value,
                       performed_by, ip_address, user_agent, recorded_at
                FROM audit_log
                WHERE ($1::uuid IS NULL OR identity_id = $1)
                  AND ($2::text IS NULL OR action = $2)
                ORDER BY recorded_at DESC, id DESC
                LIMIT $3
                "#,
            )
            .bind(query.identity_id.map(|id| *id.as_uuid()))
            .bind(query.action.map(|a| a.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("audit_query", e))?;
            collect(rows)
        })
        .await
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                // Foreign key violation: a referenced row does not exist
                Some("23503") => StoreError::NotFound,
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
