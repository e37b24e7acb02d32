//! [`Gateway`] ties settings, collaborators and session state together for the CLI.

use std::sync::Arc;

use serde::Serialize;

use crate::cache::{EntityCaches, Lookup, resolve_child_count, resolve_size};
use crate::cart::{Cart, CartEngine, SelectionMemo};
use crate::catalog::CatalogClient;
use crate::config::ApiConfig;
use crate::controller::{Completion, FetchController, TableView};
use crate::domain::{CartEntityType, CartItem, Download, Entity, EntityType};
use crate::download_api::DownloadClient;
use crate::error::GatewayError;
use crate::events::{EventSink, Severity, notify, register_routes};
use crate::ids::InstantDownload;
use crate::query::{AdditionalFilter, IndexRange, QueryState};
use crate::tracker::{
    Clock, DownloadEstimate, DownloadStatusTable, DownloadSubmitter, SubmissionForm,
    SubmissionState, estimate_download_times,
};
use crate::url::ViewParams;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage {
    pub entity_type: EntityType,
    pub page: u64,
    pub results: u64,
    pub total_row_count: Option<u64>,
    pub rows: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResult {
    pub entity_type: EntityType,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub entity_type: CartEntityType,
    pub entity_id: u64,
    pub value: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResult {
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub items: usize,
    pub total_size: u64,
    pub estimate: Option<DownloadEstimate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadsResult {
    pub downloads: Vec<Download>,
}

/// Session-scoped state: settings, the shared caches, the cart and the collaborators.
pub struct Gateway<C: CatalogClient, D: DownloadClient> {
    config: ApiConfig,
    catalog: Arc<C>,
    downloads: Arc<D>,
    events: Arc<dyn EventSink>,
    caches: EntityCaches,
    cart: Cart,
    selection: SelectionMemo,
}

impl<C: CatalogClient, D: DownloadClient> Gateway<C, D> {
    pub fn new(config: ApiConfig, catalog: C, downloads: D, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            catalog: Arc::new(catalog),
            downloads: Arc::new(downloads),
            events,
            caches: EntityCaches::default(),
            cart: Cart::new(),
            selection: SelectionMemo::new(),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn caches(&self) -> &EntityCaches {
        &self.caches
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn announce_routes(&self) {
        register_routes(&self.config, self.events.as_ref());
    }

    pub fn open_view(&self, entity_type: EntityType, base_filters: Vec<AdditionalFilter>) -> TableView {
        TableView::with_base_filters(entity_type, base_filters)
    }

    pub fn fetch_controller(&self) -> FetchController<C> {
        FetchController::new(Arc::clone(&self.catalog))
    }

    pub fn cart_engine(&self) -> CartEngine<D> {
        CartEngine::new(Arc::clone(&self.downloads))
    }

    pub fn status_table(&self) -> DownloadStatusTable<D> {
        DownloadStatusTable::new(Arc::clone(&self.downloads))
    }

    pub fn submitter(
        &self,
        instant: Arc<dyn InstantDownload>,
        clock: Arc<dyn Clock>,
    ) -> DownloadSubmitter<D> {
        DownloadSubmitter::new(Arc::clone(&self.downloads), instant, clock, &self.config)
    }

    /// One page of rows, loaded the way a view loads after a query change.
    pub fn entities(
        &self,
        entity_type: EntityType,
        params: &ViewParams,
        base_filters: Vec<AdditionalFilter>,
    ) -> Result<EntityPage, GatewayError> {
        let page = params.page_or_default();
        let results = params.results_or_default();
        let range = IndexRange::page(page, results)?;
        let mut view = self.open_view(entity_type, base_filters);
        let (count, rows) = self
            .fetch_controller()
            .change_query(&mut view, params.query.clone(), range);
        if count == Completion::Failed || rows == Completion::Failed {
            return Err(view_failure(&view));
        }
        Ok(EntityPage {
            entity_type,
            page,
            results,
            total_row_count: view.total_row_count(),
            rows: view.rows_in(range).into_iter().cloned().collect(),
        })
    }

    pub fn count(
        &self,
        entity_type: EntityType,
        query: QueryState,
        base_filters: Vec<AdditionalFilter>,
    ) -> Result<CountResult, GatewayError> {
        let mut view = self.open_view(entity_type, base_filters);
        view.set_query(query);
        match self.fetch_controller().request_count(&mut view) {
            Completion::Applied => Ok(CountResult {
                entity_type,
                count: view.total_row_count().unwrap_or(0),
            }),
            _ => Err(view_failure(&view)),
        }
    }

    pub fn size(
        &mut self,
        entity_type: CartEntityType,
        entity_id: u64,
    ) -> Result<AggregateResult, GatewayError> {
        let lookup = resolve_size(&mut self.caches, self.downloads.as_ref(), entity_type, entity_id)?;
        Ok(aggregate(entity_type, entity_id, lookup))
    }

    pub fn child_count(
        &mut self,
        entity_type: CartEntityType,
        entity_id: u64,
    ) -> Result<AggregateResult, GatewayError> {
        let lookup =
            resolve_child_count(&mut self.caches, self.catalog.as_ref(), entity_type, entity_id)?;
        Ok(aggregate(entity_type, entity_id, lookup))
    }

    pub fn refresh_cart(&mut self) -> Result<&Cart, GatewayError> {
        self.cart_engine().refresh(&mut self.cart)?;
        Ok(&self.cart)
    }

    pub fn add_to_cart(
        &mut self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<&Cart, GatewayError> {
        if let Err(err) = self.cart_engine().add_to_cart(&mut self.cart, entity_type, ids) {
            notify(self.events.as_ref(), Severity::Error, &err.to_string());
            return Err(err);
        }
        Ok(&self.cart)
    }

    pub fn remove_from_cart(
        &mut self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<&Cart, GatewayError> {
        if let Err(err) = self
            .cart_engine()
            .remove_from_cart(&mut self.cart, entity_type, ids)
        {
            notify(self.events.as_ref(), Severity::Error, &err.to_string());
            return Err(err);
        }
        Ok(&self.cart)
    }

    pub fn clear_cart(&mut self) -> Result<&Cart, GatewayError> {
        self.cart_engine().clear(&mut self.cart)?;
        Ok(&self.cart)
    }

    /// Cart ids selected in `view`, recomputed only when the cart or the id list changed.
    pub fn selected_rows(&mut self, view: &TableView) -> Vec<u64> {
        let Ok(entity_type) = CartEntityType::try_from(view.entity_type()) else {
            return Vec::new();
        };
        let all_ids = view.all_ids().unwrap_or_default();
        self.selection
            .selected(&self.cart, all_ids, view.all_ids_revision(), entity_type)
            .to_vec()
    }

    /// Total cart size from per-item sizes; cached sizes are reused.
    pub fn cart_summary(&mut self, is_two_level: bool) -> Result<CartSummary, GatewayError> {
        let items: Vec<(CartEntityType, u64)> = self
            .cart
            .items()
            .iter()
            .map(|item| (item.entity_type, item.entity_id))
            .collect();
        let mut total_size = 0u64;
        for (entity_type, entity_id) in &items {
            let lookup =
                resolve_size(&mut self.caches, self.downloads.as_ref(), *entity_type, *entity_id)?;
            total_size = total_size.saturating_add(lookup.into_value());
        }
        Ok(CartSummary {
            items: items.len(),
            total_size,
            estimate: estimate_download_times(total_size, is_two_level),
        })
    }

    pub fn download(&self, download_id: u64) -> Result<Download, GatewayError> {
        self.downloads
            .download(download_id)?
            .ok_or(GatewayError::DownloadNotFound(download_id))
    }

    /// Submits the current cart; on success the local copy is refreshed from the server.
    pub fn submit(
        &mut self,
        instant: Arc<dyn InstantDownload>,
        clock: Arc<dyn Clock>,
        form: &SubmissionForm,
    ) -> Result<SubmissionState, GatewayError> {
        let mut submitter = self.submitter(instant, clock);
        let state = submitter.submit(&self.cart, form)?.clone();
        match &state {
            SubmissionState::SubmittedSuccess { file_name, .. } => {
                notify(
                    self.events.as_ref(),
                    Severity::Success,
                    &format!("Successfully submitted download request {file_name}"),
                );
                if let Err(err) = self.cart_engine().refresh(&mut self.cart) {
                    tracing::warn!("cart refresh after submission failed: {err}");
                }
            }
            SubmissionState::SubmittedFailure { reason, .. } => {
                notify(self.events.as_ref(), Severity::Error, reason);
            }
            _ => {}
        }
        Ok(state)
    }
}

fn aggregate(entity_type: CartEntityType, entity_id: u64, lookup: Lookup<u64>) -> AggregateResult {
    AggregateResult {
        entity_type,
        entity_id,
        cached: lookup.is_cached(),
        value: lookup.into_value(),
    }
}

fn view_failure(view: &TableView) -> GatewayError {
    GatewayError::Fetch(
        view.error()
            .unwrap_or("request failed without a message")
            .to_string(),
    )
}
