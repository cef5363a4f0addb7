//! Tenant settings and delivery credential storage (SQLite).

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// Per-tenant secret bundle for the outbound LINE channel.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    pub channel_secret: String,
    pub channel_access_token: String,
}

/// Display information for a tenant's storefront, used in the agent prompt.
#[derive(Debug, Clone)]
pub struct TenantProfile {
    pub tenant_id: String,
    pub store_name: String,
}

#[derive(Debug, Clone)]
pub struct TenantStore {
    pool: SqlitePool,
}

impl TenantStore {
    /// Fallback store name when a tenant row is missing or has no name set.
    const DEFAULT_STORE_NAME: &'static str = "ร้านอร่อยทุกวัน (ไม่ระบุ)";

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the auto-reply flag for a tenant.
    ///
    /// Best-effort: a missing row or a failed query defaults to enabled so a
    /// settings hiccup never blocks message processing.
    pub async fn auto_reply_enabled(&self, tenant_id: &str) -> bool {
        let lookup = sqlx::query_scalar::<_, i64>(
            "SELECT is_auto_reply_enabled FROM tenants WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await;

        match lookup {
            Ok(Some(flag)) => flag != 0,
            Ok(None) => true,
            Err(error) => {
                tracing::warn!(tenant_id, %error, "auto-reply lookup failed, defaulting to enabled");
                true
            }
        }
    }

    pub async fn set_auto_reply(&self, tenant_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenants (tenant_id, is_auto_reply_enabled) VALUES (?, ?) \
             ON CONFLICT(tenant_id) DO UPDATE SET is_auto_reply_enabled = excluded.is_auto_reply_enabled",
        )
        .bind(tenant_id)
        .bind(enabled as i64)
        .execute(&self.pool)
        .await
        .context("failed to update auto-reply setting")?;

        Ok(())
    }

    /// Fetch the tenant's outbound channel credentials, if enrolled.
    pub async fn credentials(&self, tenant_id: &str) -> Result<Option<ChannelCredentials>> {
        let row = sqlx::query(
            "SELECT channel_secret, channel_access_token FROM channel_credentials \
             WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch channel credentials")?;

        row.map(|row| {
            Ok(ChannelCredentials {
                channel_secret: row
                    .try_get("channel_secret")
                    .context("failed to read channel_secret")?,
                channel_access_token: row
                    .try_get("channel_access_token")
                    .context("failed to read channel_access_token")?,
            })
        })
        .transpose()
    }

    /// Store or replace a tenant's channel credentials, enrolling the tenant
    /// row (auto-reply on) if it doesn't exist yet.
    pub async fn upsert_credentials(
        &self,
        tenant_id: &str,
        secret: &str,
        access_token: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO channel_credentials (tenant_id, channel_secret, channel_access_token) \
             VALUES (?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(secret)
        .bind(access_token)
        .execute(&self.pool)
        .await
        .context("failed to upsert channel credentials")?;

        sqlx::query("INSERT OR IGNORE INTO tenants (tenant_id, is_auto_reply_enabled) VALUES (?, 1)")
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .context("failed to enroll tenant")?;

        Ok(())
    }

    /// Fetch the tenant's storefront profile, with a fallback display name.
    pub async fn profile(&self, tenant_id: &str) -> TenantProfile {
        let name = sqlx::query_scalar::<_, Option<String>>(
            "SELECT store_name FROM tenants WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await;

        let store_name = match name {
            Ok(Some(Some(name))) if !name.is_empty() => name,
            Ok(_) => Self::DEFAULT_STORE_NAME.to_string(),
            Err(error) => {
                tracing::warn!(tenant_id, %error, "store profile lookup failed");
                Self::DEFAULT_STORE_NAME.to_string()
            }
        };

        TenantProfile {
            tenant_id: tenant_id.to_string(),
            store_name,
        }
    }

    pub async fn set_store_name(&self, tenant_id: &str, store_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenants (tenant_id, store_name) VALUES (?, ?) \
             ON CONFLICT(tenant_id) DO UPDATE SET store_name = excluded.store_name",
        )
        .bind(tenant_id)
        .bind(store_name)
        .execute(&self.pool)
        .await
        .context("failed to update store name")?;

        Ok(())
    }
}
