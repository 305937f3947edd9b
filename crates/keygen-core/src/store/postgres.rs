//! PostgreSQL fixture store

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{DeleteLimit, FixtureStore, StoreError, StoreTx};
use crate::config::DatabaseSettings;
use crate::model::{EmailDomain, PolicyLink, Service, Subscription, Tenant};

/// Pooled PostgreSQL store. Tenant tasks each run their statements on a
/// pooled connection; no transaction spans tasks.
#[derive(Clone)]
pub struct PgFixtureStore {
    pool: PgPool,
}

impl PgFixtureStore {
    /// Connect with a pool of `max_connections`
    pub async fn connect(settings: &DatabaseSettings, max_connections: u32) -> Result<Self, StoreError> {
        let ssl_mode = PgSslMode::from_str(&settings.ssl_mode).map_err(StoreError::Connection)?;
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.db_name)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StoreError::Connection)?;

        tracing::info!(
            host = %settings.host,
            db = %settings.db_name,
            max_connections,
            "Fixture store connected"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FixtureStore for PgFixtureStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::Connection)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        insert_subscription(&self.pool, subscription).await
    }

    async fn insert_policy_link(&self, link: &PolicyLink) -> Result<(), StoreError> {
        insert_policy_link(&self.pool, link).await
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenant (id, name, company, email, address, source_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.company)
        .bind(&tenant.email)
        .bind(&tenant.address)
        .bind(tenant.source_id)
        .bind(tenant.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error("tenant"))?;
        Ok(())
    }

    async fn insert_service(&mut self, service: &Service) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO service (
                id, tenant_id, service_offer_id, name, plan_id, service_offer_plan_source_id,
                status, active, creator_type, updater_type, external_id,
                created_by, updated_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10, $10, $10, $11, $11)
            "#,
        )
        .bind(service.id)
        .bind(service.tenant_id)
        .bind(service.service_offer_id)
        .bind(&service.name)
        .bind(service.plan_id)
        .bind(service.service_offer_plan_source_id)
        .bind(&service.status)
        .bind(service.active)
        .bind(&service.creator_type)
        .bind(Uuid::nil())
        .bind(service.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error("service"))?;
        Ok(())
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), StoreError> {
        insert_subscription(&mut *self.tx, subscription).await
    }

    async fn insert_policy_link(&mut self, link: &PolicyLink) -> Result<(), StoreError> {
        insert_policy_link(&mut *self.tx, link).await
    }

    async fn product_external_id(&mut self, product_id: Uuid) -> Result<String, StoreError> {
        let external_id: Option<Option<String>> =
            sqlx::query_scalar("SELECT external_id FROM product WHERE id = $1")
                .bind(product_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(read_error("product"))?;

        external_id
            .flatten()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::NotFound(format!("external id of product {}", product_id)))
    }

    async fn subscription_external_ids(&mut self, domain: &EmailDomain) -> Result<Vec<String>, StoreError> {
        let ids: Vec<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT s.external_id
            FROM subscription s
            JOIN tenant t ON t.id = s.tenant_id
            WHERE t.email LIKE $1
            ORDER BY s.id
            "#,
        )
        .bind(domain.like_pattern())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(read_error("subscription"))?;

        Ok(ids.into_iter().flatten().filter(|id| !id.is_empty()).collect())
    }

    async fn delete_policy_links(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let query = r#"
            DELETE FROM subscription_policy
            WHERE tenant_id IN (
                SELECT id FROM tenant WHERE email LIKE $1 ORDER BY id LIMIT $2
            )
        "#;
        self.bulk_delete("subscription_policy", query, domain, limit).await
    }

    async fn delete_subscriptions(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let query = r#"
            DELETE FROM subscription
            WHERE tenant_id IN (
                SELECT id FROM tenant WHERE email LIKE $1 ORDER BY id LIMIT $2
            )
        "#;
        self.bulk_delete("subscription", query, domain, limit).await
    }

    async fn delete_services(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let query = r#"
            DELETE FROM service
            WHERE tenant_id IN (
                SELECT id FROM tenant WHERE email LIKE $1 ORDER BY id LIMIT $2
            )
        "#;
        self.bulk_delete("service", query, domain, limit).await
    }

    async fn delete_tenants(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let query = r#"
            DELETE FROM tenant
            WHERE id IN (
                SELECT id FROM tenant WHERE email LIKE $1 ORDER BY id LIMIT $2
            )
        "#;
        self.bulk_delete("tenant", query, domain, limit).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::Connection)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::Connection)
    }
}

impl PgTx {
    async fn bulk_delete(
        &mut self,
        table: &'static str,
        query: &'static str,
        domain: &EmailDomain,
        limit: DeleteLimit,
    ) -> Result<u64, StoreError> {
        // The ceiling picks tenants, never child rows, so a capped run takes
        // whole tenant graphs. LIMIT NULL is LIMIT ALL.
        let result = sqlx::query(query)
            .bind(domain.like_pattern())
            .bind(limit.as_sql())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                tracing::error!(table, domain = %domain, error = %e, "Bulk delete failed");
                write_error(table)(e)
            })?;

        let deleted = result.rows_affected();
        tracing::info!(table, domain = %domain, limit = %limit, deleted, "Rows deleted");
        Ok(deleted)
    }
}

async fn insert_subscription<'e, E: PgExecutor<'e>>(executor: E, subscription: &Subscription) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO subscription (
            id, service_id, product_id, tenant_id, status, name,
            creator_type, updater_type, created_by, updated_by,
            external_id, version, variable_key, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $8, $9, $10, $11, $12, $12)
        "#,
    )
    .bind(subscription.id)
    .bind(subscription.service_id)
    .bind(subscription.product_id)
    .bind(subscription.tenant_id)
    .bind(&subscription.status)
    .bind(&subscription.name)
    .bind(&subscription.creator_type)
    .bind(Uuid::nil())
    .bind(&subscription.external_id)
    .bind(&subscription.version)
    .bind(&subscription.variable_key)
    .bind(subscription.created_at)
    .execute(executor)
    .await
    .map_err(write_error("subscription"))?;
    Ok(())
}

async fn insert_policy_link<'e, E: PgExecutor<'e>>(executor: E, link: &PolicyLink) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO subscription_policy (
            tenant_id, subscription_id, policy_id, deleted,
            created_by, updated_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $5, $6, $6)
        "#,
    )
    .bind(link.tenant_id)
    .bind(link.subscription_id)
    .bind(link.policy_id)
    .bind(link.deleted)
    .bind(Uuid::nil())
    .bind(link.created_at)
    .execute(executor)
    .await
    .map_err(write_error("subscription_policy"))?;
    Ok(())
}

fn write_error(table: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        let violation = e
            .as_database_error()
            .filter(|db| db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation())
            .map(|db| db.message().to_string());
        match violation {
            Some(detail) => StoreError::Constraint { table, detail },
            None => StoreError::Query { table, source: e },
        }
    }
}

fn read_error(table: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |source| StoreError::Query { table, source }
}
