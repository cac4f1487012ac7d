//! In-memory fakes shared by unit tests.
//!
//! The grid fake implements the same filter semantics the hosted store
//! documents (EQ, left-anchored LIKE, BLANK, AND/OR joins), so state-machine
//! and coordinator tests exercise real query shapes.

use crate::error::RidepoolError;
use crate::geo::{Geocoder, LatLong};
use crate::grid::{
    ColumnFilter, ColumnMetadata, ColumnValues, Filter, GridMetadata, GridStore, JoinOperator,
    Operator, Query, Row, SearchResult,
};
use crate::queue::{CompletionEvent, CompletionQueue};
use crate::sms::SmsTransport;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A stored grid row: fake-assigned id plus cells.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: String,
    pub cells: BTreeMap<String, String>,
}

#[derive(Default)]
struct GridData {
    columns: Vec<ColumnMetadata>,
    rows: Vec<StoredRow>,
    next_id: usize,
}

/// In-memory [`GridStore`].
#[derive(Default)]
pub struct MemoryGrid {
    grids: Mutex<HashMap<String, GridData>>,
    fail_next_update_by_query: AtomicBool,
}

fn filter_matches(filter: &Filter, row: &StoredRow) -> bool {
    let cell = row
        .cells
        .get(&filter.column)
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty());
    match filter.operator {
        Operator::Eq => cell == filter.keyword.as_deref(),
        Operator::Like => match (cell, filter.keyword.as_deref()) {
            (Some(cell), Some(keyword)) => cell.starts_with(keyword),
            _ => false,
        },
        Operator::Blank => cell.is_none(),
    }
}

fn column_filter_matches(filter: &ColumnFilter, row: &StoredRow) -> bool {
    match filter.filters_join_operator.unwrap_or(JoinOperator::And) {
        JoinOperator::And => filter.filters.iter().all(|f| filter_matches(f, row)),
        JoinOperator::Or => filter.filters.iter().any(|f| filter_matches(f, row)),
    }
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a grid with its column metadata.
    pub fn define_grid(&self, grid_id: &str, columns: Vec<ColumnMetadata>) {
        self.grids.lock().unwrap().insert(
            grid_id.to_string(),
            GridData {
                columns,
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// Snapshot of all rows in a grid, in insertion order.
    pub fn rows(&self, grid_id: &str) -> Vec<StoredRow> {
        self.grids
            .lock()
            .unwrap()
            .get(grid_id)
            .map(|grid| grid.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, grid_id: &str) -> usize {
        self.rows(grid_id).len()
    }

    /// Fail the next update-by-query call before it touches any row.
    pub fn fail_next_update_by_query(&self) {
        self.fail_next_update_by_query.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GridStore for MemoryGrid {
    async fn search(&self, grid_id: &str, query: Query) -> Result<SearchResult, RidepoolError> {
        let grids = self.grids.lock().unwrap();
        let grid = grids
            .get(grid_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown grid {}", grid_id)))?;
        let matched: Vec<&StoredRow> = grid
            .rows
            .iter()
            .filter(|row| match &query.column_filter {
                Some(filter) => column_filter_matches(filter, row),
                None => true,
            })
            .collect();
        let total = matched.len();
        let page: Vec<Row> = match &query.pagination {
            Some(p) => matched
                .into_iter()
                .skip(p.start_row.saturating_sub(1))
                .take(p.row_count)
                .collect(),
            None => matched,
        }
        .into_iter()
        .map(|row| Row {
            row_id: Some(row.id.clone()),
            columns: row.cells.clone(),
        })
        .collect();
        Ok(SearchResult {
            rows: page,
            total_row_count: total,
        })
    }

    async fn insert(&self, grid_id: &str, rows: Vec<ColumnValues>) -> Result<(), RidepoolError> {
        let mut grids = self.grids.lock().unwrap();
        let grid = grids
            .get_mut(grid_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown grid {}", grid_id)))?;
        for cells in rows {
            let id = format!("row-{}", grid.next_id);
            grid.next_id += 1;
            grid.rows.push(StoredRow { id, cells });
        }
        Ok(())
    }

    async fn update_by_row_id(
        &self,
        grid_id: &str,
        row_id: &str,
        columns: ColumnValues,
    ) -> Result<(), RidepoolError> {
        let mut grids = self.grids.lock().unwrap();
        let grid = grids
            .get_mut(grid_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown grid {}", grid_id)))?;
        let row = grid
            .rows
            .iter_mut()
            .find(|row| row.id == row_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown row {}", row_id)))?;
        row.cells.extend(columns);
        Ok(())
    }

    async fn update_by_query(
        &self,
        grid_id: &str,
        filter: ColumnFilter,
        columns: ColumnValues,
    ) -> Result<usize, RidepoolError> {
        if self.fail_next_update_by_query.swap(false, Ordering::SeqCst) {
            return Err(RidepoolError::Store(
                "injected update-by-query failure".to_string(),
            ));
        }
        let mut grids = self.grids.lock().unwrap();
        let grid = grids
            .get_mut(grid_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown grid {}", grid_id)))?;
        let mut updated = 0;
        for row in grid.rows.iter_mut() {
            if column_filter_matches(&filter, row) {
                row.cells.extend(columns.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn get_metadata(&self, grid_id: &str) -> Result<GridMetadata, RidepoolError> {
        let grids = self.grids.lock().unwrap();
        let grid = grids
            .get(grid_id)
            .ok_or_else(|| RidepoolError::Store(format!("unknown grid {}", grid_id)))?;
        Ok(GridMetadata {
            columns: grid.columns.clone(),
        })
    }
}

/// In-memory [`CompletionQueue`] recording published events.
#[derive(Default)]
pub struct MemoryQueue {
    published: Mutex<Vec<CompletionEvent>>,
    fail_next: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next publish call.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<CompletionEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionQueue for MemoryQueue {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), RidepoolError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RidepoolError::Queue("injected publish failure".to_string()));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// In-memory [`SmsTransport`] recording sent messages.
#[derive(Default)]
pub struct MemorySms {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemorySms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `number` will fail.
    pub fn fail_number(&self, number: &str) {
        self.failing.lock().unwrap().insert(number.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SmsTransport for MemorySms {
    async fn send(&self, to: &str, body: &str) -> Result<(), RidepoolError> {
        if self.failing.lock().unwrap().contains(to) {
            return Err(RidepoolError::Transport(format!("injected failure for {}", to)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

/// In-memory [`Geocoder`] with a fixed location table.
pub struct MemoryGeocoder {
    locations: HashMap<String, LatLong>,
}

impl MemoryGeocoder {
    pub fn new(locations: Vec<(&str, LatLong)>) -> Self {
        Self {
            locations: locations
                .into_iter()
                .map(|(name, point)| (name.to_string(), point))
                .collect(),
        }
    }
}

#[async_trait]
impl Geocoder for MemoryGeocoder {
    async fn resolve(&self, location: &str) -> Result<LatLong, RidepoolError> {
        self.locations
            .get(location)
            .copied()
            .ok_or_else(|| RidepoolError::Resolution(format!("no results for {:?}", location)))
    }
}
