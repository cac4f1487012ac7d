//! HTTP client for the hosted grid API.
//!
//! Speaks the grid REST protocol: `POST /grid/{id}/search`,
//! `POST /grid/{id}/rows/create`, `PUT /grid/{id}/rows/update_by_rowIds`,
//! `PUT /grid/{id}/rows/update_by_queryObj`, `GET /grid/{id}/query_metadata`.
//! Every request carries the account's `authId` header.

use super::{
    ColumnFilter, ColumnValues, GridMetadata, GridStore, Query, SearchResult,
};
use crate::config::GridConfig;
use crate::error::RidepoolError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct SearchRequest {
    query: Query,
}

#[derive(Debug, Serialize)]
struct InsertRequest {
    insert: InsertRows,
}

#[derive(Debug, Serialize)]
struct InsertRows {
    rows: Vec<ColumnValues>,
}

#[derive(Debug, Serialize)]
struct UpdateByRowIdRequest {
    update: UpdateRows,
}

#[derive(Debug, Serialize)]
struct UpdateRows {
    rows: Vec<UpdateRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRow {
    row_id: String,
    columns: ColumnValues,
}

#[derive(Debug, Serialize)]
struct UpdateByQueryRequest {
    update: UpdateColumns,
    query: UpdateQuery,
}

#[derive(Debug, Serialize)]
struct UpdateColumns {
    columns: ColumnValues,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateQuery {
    column_filter: ColumnFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateByQueryResponse {
    #[serde(default)]
    no_of_rows_updated: usize,
}

/// Grid API client.
pub struct GridClient {
    client: Client,
    config: GridConfig,
}

impl GridClient {
    /// Creates a new grid client.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Store` if the HTTP client cannot be built.
    pub fn new(config: GridConfig) -> Result<Self, RidepoolError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RidepoolError::Store(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Builds a request with the grid auth header.
    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        self.client
            .request(method, &url)
            .header("authId", &self.config.auth_id)
            .header("Content-Type", "application/json")
    }

    /// Sends a request and fails non-2xx responses as `StoreError` with the
    /// response body as context.
    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
        operation: &str,
    ) -> Result<reqwest::Response, RidepoolError> {
        let response =
            response.map_err(|e| RidepoolError::Store(format!("{} failed: {}", operation, e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RidepoolError::Store(format!(
                "{} returned {}: {}",
                operation, status, body
            )))
        }
    }
}

#[async_trait]
impl GridStore for GridClient {
    async fn search(&self, grid_id: &str, query: Query) -> Result<SearchResult, RidepoolError> {
        let response = self
            .build_request(Method::POST, &format!("/grid/{}/search", grid_id))
            .json(&SearchRequest { query })
            .send()
            .await;
        let response = Self::check(response, "grid search").await?;
        let result: SearchResult = response
            .json()
            .await
            .map_err(|e| RidepoolError::Store(format!("grid search body: {}", e)))?;
        debug!(grid_id, total = result.total_row_count, "grid search");
        Ok(result)
    }

    async fn insert(&self, grid_id: &str, rows: Vec<ColumnValues>) -> Result<(), RidepoolError> {
        let count = rows.len();
        let response = self
            .build_request(Method::POST, &format!("/grid/{}/rows/create", grid_id))
            .json(&InsertRequest {
                insert: InsertRows { rows },
            })
            .send()
            .await;
        Self::check(response, "grid insert").await?;
        debug!(grid_id, count, "grid insert");
        Ok(())
    }

    async fn update_by_row_id(
        &self,
        grid_id: &str,
        row_id: &str,
        columns: ColumnValues,
    ) -> Result<(), RidepoolError> {
        let response = self
            .build_request(
                Method::PUT,
                &format!("/grid/{}/rows/update_by_rowIds", grid_id),
            )
            .json(&UpdateByRowIdRequest {
                update: UpdateRows {
                    rows: vec![UpdateRow {
                        row_id: row_id.to_string(),
                        columns,
                    }],
                },
            })
            .send()
            .await;
        Self::check(response, "grid update by row id").await?;
        debug!(grid_id, row_id, "grid update by row id");
        Ok(())
    }

    async fn update_by_query(
        &self,
        grid_id: &str,
        filter: ColumnFilter,
        columns: ColumnValues,
    ) -> Result<usize, RidepoolError> {
        let response = self
            .build_request(
                Method::PUT,
                &format!("/grid/{}/rows/update_by_queryObj", grid_id),
            )
            .json(&UpdateByQueryRequest {
                update: UpdateColumns { columns },
                query: UpdateQuery {
                    column_filter: filter,
                },
            })
            .send()
            .await;
        let response = Self::check(response, "grid update by query").await?;
        let result: UpdateByQueryResponse = response
            .json()
            .await
            .map_err(|e| RidepoolError::Store(format!("grid update body: {}", e)))?;
        debug!(
            grid_id,
            updated = result.no_of_rows_updated,
            "grid update by query"
        );
        Ok(result.no_of_rows_updated)
    }

    async fn get_metadata(&self, grid_id: &str) -> Result<GridMetadata, RidepoolError> {
        let response = self
            .build_request(Method::GET, &format!("/grid/{}/query_metadata", grid_id))
            .send()
            .await;
        let response = Self::check(response, "grid metadata").await?;
        response
            .json()
            .await
            .map_err(|e| RidepoolError::Store(format!("grid metadata body: {}", e)))
    }
}
