//! Per-view paginated loading.
//!
//! A [`TableView`] owns the Row Store, the total row count and the id list of
//! one table or card view. Every request is split in two: `begin_*` records the
//! request and returns a [`Ticket`] carrying the current query generation, and
//! `complete_*` applies the outcome only while that generation is still
//! current. Changing the query bumps the generation, so responses issued under
//! an older query fall through without side effects no matter when they land.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use crate::catalog::CatalogClient;
use crate::domain::{Entity, EntityType};
use crate::error::GatewayError;
use crate::query::{AdditionalFilter, ApiQuery, IndexRange, QueryState, encode};

/// Source of id-list revisions, shared by every view so two lists never share one.
static ID_LIST_REVISION: AtomicU64 = AtomicU64::new(0);

fn next_id_list_revision() -> u64 {
    ID_LIST_REVISION.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Count,
    Range(IndexRange),
    AllIds,
}

/// An issued request. Holds the wire query to send and the generation to check on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    generation: u64,
    kind: RequestKind,
    query: ApiQuery,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn query(&self) -> &ApiQuery {
        &self.query
    }
}

/// What happened to a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TableView {
    entity_type: EntityType,
    base_filters: Vec<AdditionalFilter>,
    query: QueryState,
    generation: u64,
    rows: BTreeMap<u64, Entity>,
    total_row_count: Option<u64>,
    phase: FetchPhase,
    in_flight: usize,
    error: Option<String>,
    all_ids: Option<Vec<u64>>,
    all_ids_revision: u64,
    all_ids_loading: bool,
}

impl TableView {
    pub fn new(entity_type: EntityType) -> Self {
        Self::with_base_filters(entity_type, Vec::new())
    }

    /// `base_filters` are appended to every request, e.g. a parent id restriction.
    pub fn with_base_filters(entity_type: EntityType, base_filters: Vec<AdditionalFilter>) -> Self {
        Self {
            entity_type,
            base_filters,
            query: QueryState::new(),
            generation: 0,
            rows: BTreeMap::new(),
            total_row_count: None,
            phase: FetchPhase::Idle,
            in_flight: 0,
            error: None,
            all_ids: None,
            all_ids_revision: 0,
            all_ids_loading: false,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn total_row_count(&self) -> Option<u64> {
        self.total_row_count
    }

    pub fn all_ids(&self) -> Option<&[u64]> {
        self.all_ids.as_deref()
    }

    /// Identifies the current id list across all views; `0` while there is none.
    pub fn all_ids_revision(&self) -> u64 {
        self.all_ids_revision
    }

    pub fn all_ids_loading(&self) -> bool {
        self.all_ids_loading
    }

    pub fn is_row_loaded(&self, index: u64) -> bool {
        self.row(index).is_some()
    }

    pub fn is_range_loaded(&self, range: IndexRange) -> bool {
        self.loaded_in(range).count() as u64 == range.row_count()
    }

    pub fn row(&self, index: u64) -> Option<&Entity> {
        self.rows.get(&index)
    }

    /// Loaded rows inside `range`, skipping absent slots.
    pub fn rows_in(&self, range: IndexRange) -> Vec<&Entity> {
        self.loaded_in(range).collect()
    }

    fn loaded_in(&self, range: IndexRange) -> impl Iterator<Item = &Entity> {
        let stop = range.stop_index.max(range.start_index);
        self.rows
            .range(range.start_index..=stop)
            .map(|(_, entity)| entity)
    }

    pub fn loaded_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Replaces the query. Rows, count and ids are dropped before anything new can land.
    pub fn set_query(&mut self, query: QueryState) {
        if query == self.query && self.generation > 0 {
            return;
        }
        self.query = query;
        self.generation += 1;
        self.rows.clear();
        self.total_row_count = None;
        self.all_ids = None;
        self.all_ids_revision = 0;
        self.all_ids_loading = false;
        self.in_flight = 0;
        self.error = None;
        self.phase = FetchPhase::Idle;
        tracing::debug!(
            entity_type = %self.entity_type,
            generation = self.generation,
            "query state changed"
        );
    }

    fn filtered_query(&self) -> ApiQuery {
        encode(&self.query).with_additional(&self.base_filters)
    }

    fn issue(&mut self, kind: RequestKind, query: ApiQuery) -> Ticket {
        self.in_flight += 1;
        self.phase = FetchPhase::Loading;
        Ticket {
            generation: self.generation,
            kind,
            query,
        }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        if ticket.generation == self.generation {
            return true;
        }
        tracing::warn!(
            entity_type = %self.entity_type,
            ticket_generation = ticket.generation,
            current_generation = self.generation,
            "discarding stale response"
        );
        false
    }

    fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 && self.phase == FetchPhase::Loading {
            self.phase = FetchPhase::Loaded;
        }
    }

    fn fail(&mut self, err: &GatewayError) {
        let message = err.to_string();
        tracing::error!(entity_type = %self.entity_type, "{message}");
        self.in_flight = self.in_flight.saturating_sub(1);
        self.error = Some(message);
        self.phase = FetchPhase::Failed;
    }

    pub fn begin_count(&mut self) -> Ticket {
        let query = self.filtered_query().for_count();
        self.issue(RequestKind::Count, query)
    }

    /// On failure the previous count stays visible next to the error.
    pub fn complete_count(
        &mut self,
        ticket: &Ticket,
        result: Result<u64, GatewayError>,
    ) -> Completion {
        if !self.is_current(ticket) {
            return Completion::Stale;
        }
        match result {
            Ok(count) => {
                self.total_row_count = Some(count);
                self.settle();
                Completion::Applied
            }
            Err(err) => {
                self.fail(&err);
                Completion::Failed
            }
        }
    }

    pub fn begin_range(&mut self, range: IndexRange) -> Ticket {
        let query = self.filtered_query().with_range(range);
        self.issue(RequestKind::Range(range), query)
    }

    /// Writes the batch at `start_index + offset`. A short batch leaves the tail absent.
    pub fn complete_range(
        &mut self,
        ticket: &Ticket,
        result: Result<Vec<Value>, GatewayError>,
    ) -> Completion {
        if !self.is_current(ticket) {
            return Completion::Stale;
        }
        let RequestKind::Range(range) = ticket.kind else {
            self.fail(&GatewayError::MalformedResponse(
                "range completion for a non-range ticket".to_string(),
            ));
            return Completion::Failed;
        };
        let entities = result.and_then(|rows| {
            rows.into_iter()
                .map(|row| Entity::from_value(self.entity_type, row))
                .collect::<Result<Vec<_>, _>>()
        });
        match entities {
            Ok(entities) => {
                for (offset, entity) in entities.into_iter().enumerate() {
                    let Some(index) = range.start_index.checked_add(offset as u64) else {
                        break;
                    };
                    self.rows.insert(index, entity);
                }
                self.settle();
                Completion::Applied
            }
            Err(err) => {
                self.fail(&err);
                Completion::Failed
            }
        }
    }

    /// Unpaginated id-only request for the current filters.
    pub fn begin_all_ids(&mut self) -> Ticket {
        let filtered = self.filtered_query();
        let query = ApiQuery {
            order: Vec::new(),
            distinct: Some(json!("ID")),
            skip: None,
            limit: None,
            ..filtered
        };
        self.all_ids_loading = true;
        Ticket {
            generation: self.generation,
            kind: RequestKind::AllIds,
            query,
        }
    }

    pub fn complete_all_ids(
        &mut self,
        ticket: &Ticket,
        result: Result<Vec<Value>, GatewayError>,
    ) -> Completion {
        if !self.is_current(ticket) {
            return Completion::Stale;
        }
        self.all_ids_loading = false;
        let ids = result.and_then(|rows| {
            rows.iter()
                .map(|row| {
                    row.get("ID").and_then(Value::as_u64).ok_or_else(|| {
                        GatewayError::MalformedResponse(format!("row without ID: {row}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        });
        match ids {
            Ok(ids) => {
                self.all_ids = Some(ids);
                self.all_ids_revision = next_id_list_revision();
                Completion::Applied
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(entity_type = %self.entity_type, "{message}");
                self.error = Some(message);
                Completion::Failed
            }
        }
    }
}

/// Runs view requests against a catalog in one blocking call each.
#[derive(Clone)]
pub struct FetchController<C: CatalogClient> {
    catalog: Arc<C>,
}

impl<C: CatalogClient> FetchController<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn request_count(&self, view: &mut TableView) -> Completion {
        let ticket = view.begin_count();
        let result = self.catalog.count(view.entity_type(), ticket.query());
        view.complete_count(&ticket, result)
    }

    /// Callers check [`TableView::is_range_loaded`] first; this always issues a request.
    pub fn request_range(&self, view: &mut TableView, range: IndexRange) -> Completion {
        let ticket = view.begin_range(range);
        tracing::debug!(
            entity_type = %view.entity_type(),
            start = range.start_index,
            stop = range.stop_index,
            "requesting rows"
        );
        let result = self.catalog.fetch(view.entity_type(), ticket.query());
        view.complete_range(&ticket, result)
    }

    pub fn fetch_all_ids(&self, view: &mut TableView) -> Completion {
        let ticket = view.begin_all_ids();
        let result = self.catalog.fetch(view.entity_type(), ticket.query());
        view.complete_all_ids(&ticket, result)
    }

    /// Switches the query, then issues the count before the first range.
    pub fn change_query(
        &self,
        view: &mut TableView,
        query: QueryState,
        first_range: IndexRange,
    ) -> (Completion, Completion) {
        view.set_query(query);
        let count_ticket = view.begin_count();
        let range_ticket = view.begin_range(first_range);
        let count = self.catalog.count(view.entity_type(), count_ticket.query());
        let count = view.complete_count(&count_ticket, count);
        let rows = self.catalog.fetch(view.entity_type(), range_ticket.query());
        let rows = view.complete_range(&range_ticket, rows);
        (count, rows)
    }
}
