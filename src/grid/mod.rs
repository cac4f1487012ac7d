//! Remote grid store model and access trait.
//!
//! The grid is a hosted tabular store addressed by grid id. It exposes
//! row-level search/insert/update operations with per-column filters but no
//! cross-row transactions; every serialization the service needs is built on
//! top of these primitives.

pub mod client;

use crate::error::RidepoolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use client::GridClient;

/// Per-column filter operator supported by the grid search API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Exact cell equality
    #[serde(rename = "EQ")]
    Eq,
    /// Left-anchored prefix match
    #[serde(rename = "LIKE")]
    Like,
    /// Cell is empty
    #[serde(rename = "BLANK")]
    Blank,
}

/// A single column filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    /// Column name to filter on
    pub column: String,
    /// Keyword to compare against; omitted for `BLANK`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// Comparison operator
    pub operator: Operator,
}

impl Filter {
    /// Exact-match filter.
    pub fn eq(column: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            keyword: Some(keyword.into()),
            operator: Operator::Eq,
        }
    }

    /// Prefix-match filter.
    pub fn like(column: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            keyword: Some(keyword.into()),
            operator: Operator::Like,
        }
    }

    /// Empty-cell filter.
    pub fn blank(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            keyword: None,
            operator: Operator::Blank,
        }
    }
}

/// How multiple filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// A set of column filters joined by AND or OR.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFilter {
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters_join_operator: Option<JoinOperator>,
}

impl ColumnFilter {
    /// All filters must match.
    pub fn all(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            filters_join_operator: Some(JoinOperator::And),
        }
    }

    /// Any filter may match.
    pub fn any(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            filters_join_operator: Some(JoinOperator::Or),
        }
    }
}

/// Pagination window for a search, 1-based start row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub start_row: usize,
    pub row_count: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            start_row: 1,
            row_count: 50,
        }
    }
}

/// A search query against one grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_filter: Option<ColumnFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub send_row_ids_in_response: bool,
    pub show_column_names_in_response: bool,
}

impl Query {
    /// Query returning all rows matched by `filter`, row ids included.
    pub fn filtered(filter: ColumnFilter) -> Self {
        Self {
            column_filter: Some(filter),
            pagination: Some(Pagination::default()),
            send_row_ids_in_response: true,
            show_column_names_in_response: true,
        }
    }
}

/// One row as returned by search: the grid row id plus named cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Grid-assigned row identifier
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    /// Cell values keyed by column name
    #[serde(flatten)]
    pub columns: BTreeMap<String, String>,
}

impl Row {
    /// Cell value for `column`, treating missing and empty as absent.
    pub fn cell(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Search response: the page of rows plus the total match count.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub total_row_count: usize,
}

/// Column definition from grid metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub column_name: String,
    #[serde(default)]
    pub column_desc: String,
}

/// Grid metadata: the ordered column definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct GridMetadata {
    pub columns: Vec<ColumnMetadata>,
}

/// Column values for an insert or update, keyed by column name.
pub type ColumnValues = BTreeMap<String, String>;

/// Access to the remote grid store.
///
/// One implementation speaks the hosted HTTP API ([`GridClient`]); tests use
/// an in-memory fake. No method spans more than one grid call, mirroring the
/// store's lack of multi-row transactions.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Search `grid_id` for rows matching `query`.
    async fn search(&self, grid_id: &str, query: Query) -> Result<SearchResult, RidepoolError>;

    /// Insert new rows into `grid_id`.
    async fn insert(&self, grid_id: &str, rows: Vec<ColumnValues>) -> Result<(), RidepoolError>;

    /// Update the cells of one row identified by its grid row id.
    async fn update_by_row_id(
        &self,
        grid_id: &str,
        row_id: &str,
        columns: ColumnValues,
    ) -> Result<(), RidepoolError>;

    /// Update the given cells on every row matching `filter`; returns the
    /// number of rows the store reports as updated.
    async fn update_by_query(
        &self,
        grid_id: &str,
        filter: ColumnFilter,
        columns: ColumnValues,
    ) -> Result<usize, RidepoolError>;

    /// Fetch the ordered column definitions for `grid_id`.
    async fn get_metadata(&self, grid_id: &str) -> Result<GridMetadata, RidepoolError>;
}
