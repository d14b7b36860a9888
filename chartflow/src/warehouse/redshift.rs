//! Redshift over the Postgres wire protocol.

use super::sql::{self, CopyCredentials};
use super::{TableKind, Warehouse};
use crate::config::{AwsConfig, WarehouseConfig};
use crate::errors::{ConfigError, WarehouseError};
use crate::quality::Metric;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// A Redshift cluster reached through a lazily connecting pool.
#[derive(Debug, Clone)]
pub struct RedshiftWarehouse {
    pool: PgPool,
    schema: String,
    credentials: CopyCredentials,
    copy_region: Option<String>,
}

impl RedshiftWarehouse {
    /// Builds the pool. No connection is made until the first statement.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if COPY has no way to authenticate.
    pub fn connect_lazy(config: &WarehouseConfig, aws: &AwsConfig) -> Result<Self, ConfigError> {
        let credentials = match (&config.iam_role, aws.credentials()) {
            (Some(role), _) => CopyCredentials::IamRole(role.clone()),
            (None, Some(keys)) => CopyCredentials::Keys(keys),
            (None, None) => {
                return Err(ConfigError::invalid(
                    "warehouse.iam_role",
                    "COPY needs either an IAM role or an AWS key pair",
                ))
            }
        };

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(config.password.expose());

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            schema: config.schema.clone(),
            credentials,
            copy_region: config.copy_region.clone(),
        })
    }

    async fn execute(&self, label: &str, statement: &str) -> Result<(), WarehouseError> {
        debug!(statement = label, "Executing warehouse statement");
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|source| WarehouseError::Query {
                statement: label.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn create_table(&self, table: TableKind) -> Result<(), WarehouseError> {
        self.execute(
            &format!("create {table}"),
            &sql::create_table(&self.schema, table),
        )
        .await
    }

    async fn copy_from_storage(
        &self,
        table: TableKind,
        bucket: &str,
        key: &str,
    ) -> Result<(), WarehouseError> {
        let statement = sql::copy_from_s3(
            &self.schema,
            table,
            bucket,
            key,
            &self.credentials,
            self.copy_region.as_deref(),
        );
        self.execute(&format!("copy {table}"), &statement).await?;
        info!(table = %table, bucket, key, "Loaded staged file");
        Ok(())
    }

    async fn truncate(&self, table: TableKind) -> Result<(), WarehouseError> {
        self.execute(&format!("truncate {table}"), &sql::truncate(&self.schema, table))
            .await
    }

    async fn measure(&self, table: TableKind, metric: &Metric) -> Result<Option<f64>, WarehouseError> {
        let statement = sql::metric(&self.schema, table, metric);
        sqlx::query_scalar::<_, Option<f64>>(&statement)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| WarehouseError::Query {
                statement: format!("measure {table}"),
                source,
            })
    }

    async fn row_count(&self, table: TableKind) -> Result<u64, WarehouseError> {
        let count = self.measure(table, &Metric::RowCount).await?.unwrap_or(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    #[tokio::test]
    async fn test_requires_copy_credentials() {
        let config = WarehouseConfig {
            host: "cluster.example.com".into(),
            user: "loader".into(),
            password: Secret::new("pw"),
            ..WarehouseConfig::default()
        };

        let err = RedshiftWarehouse::connect_lazy(&config, &AwsConfig::default()).unwrap_err();
        assert!(err.to_string().contains("warehouse.iam_role"));

        let with_role = WarehouseConfig {
            iam_role: Some("arn:aws:iam::1:role/copy".into()),
            ..config
        };
        let warehouse = RedshiftWarehouse::connect_lazy(&with_role, &AwsConfig::default()).unwrap();
        assert_eq!(warehouse.schema, "stage");
    }
}
