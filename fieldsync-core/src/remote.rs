use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::RemoteError;

/// One row of a remote resource, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    In { column: String, values: Vec<String> },
}

/// Read request against a single resource.
///
/// Filters are combined with AND. A `timeout` bounds queries whose result size
/// is not known in advance; expiry surfaces as a [`RemoteError::Request`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub timeout: Option<Duration>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns(columns: &[&str]) -> Self {
        Self {
            columns: Some(columns.iter().map(|c| c.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn in_list<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// True when an `In` filter has no values, so no row can ever match.
    pub fn is_vacuous(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, Filter::In { values, .. } if values.is_empty()))
    }
}

/// Authenticated query/mutation capability against named remote resources.
///
/// Resource names may be schema-qualified (`common.customers`); unqualified
/// names use the implementation's default schema. `insert` must be idempotent
/// on the primary key so that replayed queue entries are absorbed.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, resource: &str, query: &Query) -> Result<Vec<Row>, RemoteError>;

    async fn insert(&self, resource: &str, row: &Row) -> Result<(), RemoteError>;

    async fn update(&self, resource: &str, id: &str, columns: &Row) -> Result<(), RemoteError>;

    async fn delete(&self, resource: &str, id: &str) -> Result<(), RemoteError>;
}

/// Reads a string column, ignoring nulls and non-string values.
pub fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}
