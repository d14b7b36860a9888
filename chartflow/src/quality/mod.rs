//! Declarative data-quality checks over the staging tables.
//!
//! A check is written `metric comparison value`, for example
//! `duplicate_count(song_id) = 0`. Metrics:
//!
//! - `row_count`
//! - `missing_count(col)`: NULL or empty values
//! - `duplicate_count(col)`: rows beyond the first per distinct value
//! - `min(col)` / `max(col)`
//! - `orphan_count(col)`: values with no match in the other staging table

use crate::errors::ConfigError;
use crate::warehouse::{TableKind, Warehouse};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

static CHECK_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(row_count)|(missing_count|duplicate_count|min|max|orphan_count)\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\))\s*(=|!=|<=|>=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$",
    )
    .ok()
});

/// What a check measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "metric", content = "column", rename_all = "snake_case")]
pub enum Metric {
    /// Rows in the table.
    RowCount,
    /// NULL or empty values in a column.
    MissingCount(String),
    /// Rows sharing a value with an earlier row.
    DuplicateCount(String),
    /// Smallest value.
    Min(String),
    /// Largest value.
    Max(String),
    /// Values absent from the same column of the other staging table.
    OrphanCount(String),
}

impl Metric {
    /// Column the metric reads, if any.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::RowCount => None,
            Self::MissingCount(c)
            | Self::DuplicateCount(c)
            | Self::Min(c)
            | Self::Max(c)
            | Self::OrphanCount(c) => Some(c),
        }
    }
}

/// Comparison between the measured value and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }

    /// Applies the comparison.
    #[must_use]
    pub fn holds(self, measured: f64, threshold: f64) -> bool {
        match self {
            Self::Eq => (measured - threshold).abs() < f64::EPSILON,
            Self::Ne => (measured - threshold).abs() >= f64::EPSILON,
            Self::Lt => measured < threshold,
            Self::Le => measured <= threshold,
            Self::Gt => measured > threshold,
            Self::Ge => measured >= threshold,
        }
    }
}

/// A parsed check bound to a staging table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityCheck {
    /// Table the check runs against.
    pub table: TableKind,
    /// Measured quantity.
    pub metric: Metric,
    /// How the measurement is compared.
    pub comparison: Comparison,
    /// Value compared against.
    pub threshold: f64,
    /// The expression as written.
    pub expression: String,
}

impl QualityCheck {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCheck`] for unknown syntax, metrics or
    /// columns that the table does not have.
    pub fn parse(table: TableKind, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidCheck {
            check: expression.to_string(),
            message: message.to_string(),
        };

        let pattern = CHECK_PATTERN
            .as_ref()
            .ok_or_else(|| invalid("check pattern failed to compile"))?;
        let caps = pattern
            .captures(expression)
            .ok_or_else(|| invalid("expected `metric comparison number`"))?;

        let metric = if caps.get(1).is_some() {
            Metric::RowCount
        } else {
            let name = caps.get(2).map_or("", |m| m.as_str());
            let column = caps.get(3).map_or("", |m| m.as_str()).to_string();
            if !table.has_column(&column) {
                return Err(invalid(&format!(
                    "{} has no column '{column}'",
                    table.table_name()
                )));
            }
            match name {
                "missing_count" => Metric::MissingCount(column),
                "duplicate_count" => Metric::DuplicateCount(column),
                "min" => Metric::Min(column),
                "max" => Metric::Max(column),
                "orphan_count" => {
                    if !table.other().has_column(&column) {
                        return Err(invalid(&format!(
                            "{} has no column '{column}' to match against",
                            table.other().table_name()
                        )));
                    }
                    Metric::OrphanCount(column)
                }
                _ => return Err(invalid("unknown metric")),
            }
        };

        let comparison = caps
            .get(4)
            .and_then(|m| Comparison::parse(m.as_str()))
            .ok_or_else(|| invalid("unknown comparison"))?;
        let threshold = caps
            .get(5)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .ok_or_else(|| invalid("threshold is not a number"))?;

        Ok(Self {
            table,
            metric,
            comparison,
            threshold,
            expression: expression.trim().to_string(),
        })
    }
}

impl fmt::Display for QualityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table.table_name(), self.expression)
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    /// `table: expression`.
    pub check: String,
    /// Measured value; `None` for an aggregate over no rows.
    pub measured: Option<f64>,
    /// Whether the check held.
    pub passed: bool,
    /// Evaluation error, if the check could not run.
    pub error: Option<String>,
}

/// Result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// One entry per check, in configuration order.
    pub outcomes: Vec<CheckOutcome>,
}

impl ScanReport {
    /// Checks that failed or could not be evaluated.
    #[must_use]
    pub fn failed(&self) -> Vec<&CheckOutcome> {
        self.outcomes.iter().filter(|o| !o.passed).collect()
    }

    /// True if every check held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }
}

/// Evaluates every check.
///
/// A check whose query errors, or whose aggregate is NULL, fails; the scan
/// itself never errors.
pub async fn scan(warehouse: &dyn Warehouse, checks: &[QualityCheck]) -> ScanReport {
    let mut outcomes = Vec::with_capacity(checks.len());

    for check in checks {
        let outcome = match warehouse.measure(check.table, &check.metric).await {
            Ok(measured) => CheckOutcome {
                check: check.to_string(),
                measured,
                passed: measured.is_some_and(|v| check.comparison.holds(v, check.threshold)),
                error: None,
            },
            Err(e) => CheckOutcome {
                check: check.to_string(),
                measured: None,
                passed: false,
                error: Some(e.to_string()),
            },
        };

        if outcome.passed {
            info!(check = %outcome.check, measured = ?outcome.measured, "Check passed");
        } else {
            warn!(
                check = %outcome.check,
                measured = ?outcome.measured,
                error = outcome.error.as_deref(),
                "Check failed"
            );
        }
        outcomes.push(outcome);
    }

    ScanReport { outcomes }
}
