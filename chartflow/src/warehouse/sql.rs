//! SQL text for the staging tables.
//!
//! Identifiers come from [`TableKind`] and from check columns validated
//! against it, never from free-form input.

use super::TableKind;
use crate::config::AwsCredentials;
use crate::quality::Metric;

/// How COPY authenticates against the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyCredentials {
    /// An IAM role attached to the cluster.
    IamRole(String),
    /// An access key pair.
    Keys(AwsCredentials),
}

impl CopyCredentials {
    fn clause(&self) -> String {
        match self {
            Self::IamRole(arn) => format!("IAM_ROLE '{}'", escape(arn)),
            Self::Keys(creds) => {
                let mut value = format!(
                    "aws_access_key_id={};aws_secret_access_key={}",
                    creds.access_key_id,
                    creds.secret_access_key.expose()
                );
                if let Some(token) = &creds.session_token {
                    value.push_str(";token=");
                    value.push_str(token.expose());
                }
                format!("CREDENTIALS '{}'", escape(&value))
            }
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// `schema.table`.
#[must_use]
pub fn qualified(schema: &str, table: TableKind) -> String {
    format!("{schema}.{}", table.table_name())
}

/// `CREATE TABLE IF NOT EXISTS` with the fixed column list.
#[must_use]
pub fn create_table(schema: &str, table: TableKind) -> String {
    let columns = table
        .columns()
        .iter()
        .map(|(name, ty)| format!("    {name} {ty}"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{columns}\n)",
        qualified(schema, table)
    )
}

/// `COPY ... CSV IGNOREHEADER 1` from an object.
#[must_use]
pub fn copy_from_s3(
    schema: &str,
    table: TableKind,
    bucket: &str,
    key: &str,
    credentials: &CopyCredentials,
    region: Option<&str>,
) -> String {
    let mut sql = format!(
        "COPY {} FROM 's3://{}/{}' {} CSV IGNOREHEADER 1 DATEFORMAT 'YYYY-MM-DD'",
        qualified(schema, table),
        escape(bucket),
        escape(key),
        credentials.clause()
    );
    if let Some(region) = region {
        sql.push_str(&format!(" REGION '{}'", escape(region)));
    }
    sql
}

/// `TRUNCATE TABLE`.
#[must_use]
pub fn truncate(schema: &str, table: TableKind) -> String {
    format!("TRUNCATE TABLE {}", qualified(schema, table))
}

/// One-row, one-column query computing the metric as a double.
#[must_use]
pub fn metric(schema: &str, table: TableKind, metric: &Metric) -> String {
    let from = qualified(schema, table);
    match metric {
        Metric::RowCount => format!("SELECT CAST(COUNT(*) AS DOUBLE PRECISION) FROM {from}"),
        Metric::MissingCount(col) => format!(
            "SELECT CAST(COUNT(*) AS DOUBLE PRECISION) FROM {from} \
             WHERE {col} IS NULL OR TRIM(CAST({col} AS VARCHAR)) = ''"
        ),
        Metric::DuplicateCount(col) => format!(
            "SELECT CAST(COUNT({col}) - COUNT(DISTINCT {col}) AS DOUBLE PRECISION) FROM {from}"
        ),
        Metric::Min(col) => format!("SELECT CAST(MIN({col}) AS DOUBLE PRECISION) FROM {from}"),
        Metric::Max(col) => format!("SELECT CAST(MAX({col}) AS DOUBLE PRECISION) FROM {from}"),
        Metric::OrphanCount(col) => {
            let other = qualified(schema, table.other());
            format!(
                "SELECT CAST(COUNT(*) AS DOUBLE PRECISION) FROM {from} t \
                 WHERE t.{col} IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {other} o WHERE o.{col} = t.{col})"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_table() {
        let sql = create_table("stage", TableKind::SongAttributes);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS stage.stg_song_attributes (\n"));
        assert!(sql.contains("    song_id varchar(22),\n"));
        assert!(sql.ends_with("    duration_ms bigint\n)"));
    }

    #[test]
    fn test_copy_with_role() {
        let sql = copy_from_s3(
            "stage",
            TableKind::ChartSongs,
            "spotify-project1",
            "raw/chart_songs/2024-01-01/songs.csv",
            &CopyCredentials::IamRole("arn:aws:iam::1:role/copy".into()),
            None,
        );
        assert_eq!(
            sql,
            "COPY stage.stg_chart_songs FROM 's3://spotify-project1/raw/chart_songs/2024-01-01/songs.csv' \
             IAM_ROLE 'arn:aws:iam::1:role/copy' CSV IGNOREHEADER 1 DATEFORMAT 'YYYY-MM-DD'"
        );
    }

    #[test]
    fn test_copy_with_keys_and_region() {
        let creds = CopyCredentials::Keys(AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: Secret::new("SECRET"),
            session_token: Some(Secret::new("TOKEN")),
        });
        let sql = copy_from_s3("stage", TableKind::ChartSongs, "b", "k.csv", &creds, Some("eu-west-1"));
        assert!(sql.contains(
            "CREDENTIALS 'aws_access_key_id=AKID;aws_secret_access_key=SECRET;token=TOKEN'"
        ));
        assert!(sql.ends_with("REGION 'eu-west-1'"));
    }

    #[test]
    fn test_metric_sql() {
        assert_eq!(
            truncate("stage", TableKind::ChartSongs),
            "TRUNCATE TABLE stage.stg_chart_songs"
        );
        let sql = metric(
            "stage",
            TableKind::SongAttributes,
            &Metric::OrphanCount("song_id".into()),
        );
        assert!(sql.contains("FROM stage.stg_song_attributes t"));
        assert!(sql.contains("FROM stage.stg_chart_songs o"));
        assert!(metric("s", TableKind::ChartSongs, &Metric::DuplicateCount("song_id".into()))
            .contains("COUNT(song_id) - COUNT(DISTINCT song_id)"));
    }
}
