use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::{Value, json};

use datagateway_client::app::Gateway;
use datagateway_client::catalog::CatalogClient;
use datagateway_client::config::{ApiConfig, SettingsLoader};
use datagateway_client::controller::Completion;
use datagateway_client::domain::{CartEntityType, CartItem, Download, DownloadCart, EntityType};
use datagateway_client::download_api::{DownloadClient, SubmitRequest, SubmitResponse};
use datagateway_client::error::GatewayError;
use datagateway_client::events::{NOTIFICATION, REGISTER_ROUTE, RecordingEventSink};
use datagateway_client::ids::InstantDownload;
use datagateway_client::query::{AdditionalFilter, ApiQuery, Filter, QueryState};
use datagateway_client::tracker::{FixedClock, SubmissionForm, SubmissionState};
use datagateway_client::url::ViewParams;

fn config() -> ApiConfig {
    let settings = serde_json::from_value(json!({
        "facilityName": "LILS",
        "idsUrl": "https://ids.example.org/ids",
        "apiUrl": "https://api.example.org",
        "downloadApiUrl": "https://download.example.org",
        "routes": [
            {"section": "Browse", "link": "/browse/investigation", "displayName": "Browse", "order": 0}
        ]
    }))
    .unwrap();
    SettingsLoader::resolve_settings(settings).unwrap()
}

fn investigation(id: u64) -> Value {
    json!({"ID": id, "TITLE": format!("Title {id}"), "NAME": format!("INV-{id}"), "VISIT_ID": "1"})
}

#[derive(Default)]
struct MockCatalog {
    queries: Arc<Mutex<Vec<ApiQuery>>>,
}

impl CatalogClient for MockCatalog {
    fn fetch(&self, _entity_type: EntityType, query: &ApiQuery) -> Result<Vec<Value>, GatewayError> {
        self.queries.lock().unwrap().push(query.clone());
        if query.distinct.is_some() {
            return Ok([1, 2, 3, 4].iter().map(|id| json!({"ID": id})).collect());
        }
        Ok(vec![investigation(1), investigation(2)])
    }

    fn count(&self, _entity_type: EntityType, query: &ApiQuery) -> Result<u64, GatewayError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(2)
    }

    fn find_one(&self, entity_type: EntityType, _query: &ApiQuery) -> Result<Value, GatewayError> {
        Err(GatewayError::EntityNotFound(entity_type.to_string()))
    }
}

struct MockDownloads {
    items: Mutex<Vec<CartItem>>,
    add_calls: Arc<Mutex<usize>>,
    submitted: Arc<Mutex<Vec<SubmitRequest>>>,
    download_id: Option<i64>,
    status: &'static str,
    fail_add: bool,
}

impl MockDownloads {
    fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            add_calls: Arc::default(),
            submitted: Arc::default(),
            download_id: Some(7),
            status: "COMPLETE",
            fail_add: false,
        }
    }

    fn snapshot(&self) -> DownloadCart {
        DownloadCart {
            cart_items: self.items.lock().unwrap().clone(),
            facility_name: "LILS".to_string(),
            ..DownloadCart::default()
        }
    }
}

impl DownloadClient for MockDownloads {
    fn cart(&self) -> Result<DownloadCart, GatewayError> {
        Ok(self.snapshot())
    }

    fn add_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        *self.add_calls.lock().unwrap() += 1;
        if self.fail_add {
            return Err(GatewayError::DownloadStatus {
                status: 500,
                message: "cart unavailable".to_string(),
            });
        }
        {
            let mut items = self.items.lock().unwrap();
            for id in ids {
                if !items
                    .iter()
                    .any(|item| item.entity_type == entity_type && item.entity_id == *id)
                {
                    let row_id = items.len() as u64 + 1;
                    items.push(CartItem {
                        entity_id: *id,
                        entity_type,
                        id: row_id,
                        name: format!("item {id}"),
                        parent_entities: Vec::new(),
                    });
                }
            }
        }
        Ok(self.snapshot())
    }

    fn remove_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        self.items
            .lock()
            .unwrap()
            .retain(|item| !(item.entity_type == entity_type && ids.contains(&item.entity_id)));
        Ok(self.snapshot())
    }

    fn clear_cart(&self) -> Result<DownloadCart, GatewayError> {
        self.items.lock().unwrap().clear();
        Ok(self.snapshot())
    }

    fn submit_cart(&self, request: &SubmitRequest) -> Result<SubmitResponse, GatewayError> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(SubmitResponse {
            download_id: self.download_id,
            ..SubmitResponse::default()
        })
    }

    fn downloads(&self) -> Result<Vec<Download>, GatewayError> {
        Ok(Vec::new())
    }

    fn download(&self, download_id: u64) -> Result<Option<Download>, GatewayError> {
        let download = serde_json::from_value(json!({
            "id": download_id,
            "fileName": "archive",
            "preparedId": "prep-1",
            "status": self.status,
            "transport": "https",
        }))
        .map_err(|err| GatewayError::MalformedResponse(err.to_string()))?;
        Ok(Some(download))
    }

    fn set_download_deleted(&self, _download_id: u64, _deleted: bool) -> Result<(), GatewayError> {
        Ok(())
    }

    fn size(&self, _entity_type: CartEntityType, entity_id: u64) -> Result<u64, GatewayError> {
        Ok(entity_id * 1024)
    }
}

#[derive(Default)]
struct RecordingInstant {
    started: Mutex<Vec<u64>>,
}

impl InstantDownload for RecordingInstant {
    fn start(&self, download: &Download) -> Result<(), GatewayError> {
        self.started.lock().unwrap().push(download.id);
        Ok(())
    }
}

struct Harness {
    gateway: Gateway<MockCatalog, MockDownloads>,
    events: Arc<RecordingEventSink>,
    queries: Arc<Mutex<Vec<ApiQuery>>>,
    add_calls: Arc<Mutex<usize>>,
    submitted: Arc<Mutex<Vec<SubmitRequest>>>,
}

fn harness(downloads: MockDownloads) -> Harness {
    let events = Arc::new(RecordingEventSink::new());
    let catalog = MockCatalog::default();
    let queries = Arc::clone(&catalog.queries);
    let add_calls = Arc::clone(&downloads.add_calls);
    let submitted = Arc::clone(&downloads.submitted);
    let gateway = Gateway::new(config(), catalog, downloads, events.clone());
    Harness {
        gateway,
        events,
        queries,
        add_calls,
        submitted,
    }
}

fn clock() -> Arc<FixedClock> {
    let at = NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|day| day.and_hms_opt(1, 1, 1))
        .unwrap();
    Arc::new(FixedClock(at))
}

fn form(access_method: &str, email: &str) -> SubmissionForm {
    SubmissionForm {
        file_name: String::new(),
        access_method: access_method.to_string(),
        email: email.to_string(),
    }
}

#[test]
fn adding_the_same_item_twice_keeps_one_entry() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[5]).unwrap();
    let cart = h.gateway.add_to_cart(CartEntityType::Dataset, &[5]).unwrap();

    assert_eq!(cart.len(), 1);
    assert!(cart.contains(CartEntityType::Dataset, 5));
    assert!(!cart.contains(CartEntityType::Investigation, 5));
    assert_eq!(*h.add_calls.lock().unwrap(), 1);
}

#[test]
fn failed_add_leaves_cart_untouched_and_notifies() {
    let mut downloads = MockDownloads::new();
    downloads.fail_add = true;
    let mut h = harness(downloads);

    let err = h.gateway.add_to_cart(CartEntityType::Investigation, &[1]).unwrap_err();
    assert_matches!(err, GatewayError::DownloadStatus { status: 500, .. });
    assert!(h.gateway.cart().is_empty());

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, NOTIFICATION);
    assert_eq!(events[0].payload["severity"], "error");
}

#[test]
fn cached_size_is_not_requested_again() {
    let mut h = harness(MockDownloads::new());
    let first = h.gateway.size(CartEntityType::Dataset, 3).unwrap();
    let second = h.gateway.size(CartEntityType::Dataset, 3).unwrap();

    assert_eq!(first.value, 3072);
    assert!(!first.cached);
    assert_eq!(second.value, 3072);
    assert!(second.cached);
    assert_eq!(h.gateway.caches().dataset.size(3), Some(3072));
}

#[test]
fn datafile_sizes_are_not_cached() {
    let mut h = harness(MockDownloads::new());
    h.gateway.size(CartEntityType::Datafile, 2).unwrap();
    let again = h.gateway.size(CartEntityType::Datafile, 2).unwrap();
    assert!(!again.cached);
}

#[test]
fn child_count_filters_by_parent_and_caches() {
    let mut h = harness(MockDownloads::new());
    let first = h.gateway.child_count(CartEntityType::Investigation, 9).unwrap();
    let second = h.gateway.child_count(CartEntityType::Investigation, 9).unwrap();

    assert_eq!(first.value, 2);
    assert!(second.cached);
    assert_eq!(h.gateway.caches().investigation.count(9), Some(2));
    assert_matches!(
        h.gateway.child_count(CartEntityType::Datafile, 1),
        Err(GatewayError::InvalidEntityType(_))
    );
}

#[test]
fn default_file_name_uses_facility_and_clock() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Investigation, &[1]).unwrap();

    let instant = Arc::new(RecordingInstant::default());
    let state = h.gateway.submit(instant, clock(), &form("globus", "")).unwrap();

    assert_eq!(
        state,
        SubmissionState::SubmittedSuccess {
            download_id: 7,
            file_name: "LILS_2020-1-1_1-1-1".to_string(),
        }
    );
    let submitted = h.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].file_name, "LILS_2020-1-1_1-1-1");
    assert_eq!(submitted[0].transport, "globus");
}

#[test]
fn submitted_request_carries_form_fields() {
    let downloads = MockDownloads::new();
    let mut h = harness(downloads);
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let mut with_name = form("globus", "user@example.org");
    with_name.file_name = "  my-archive ".to_string();
    h.gateway
        .submit(Arc::new(RecordingInstant::default()), clock(), &with_name)
        .unwrap();

    let submitted = h.submitted.lock().unwrap();
    assert_eq!(submitted[0].file_name, "my-archive");
    assert_eq!(submitted[0].email, "user@example.org");

    let events = h.events.events();
    assert!(events.iter().any(|event| {
        event.event_type == NOTIFICATION
            && event.payload["severity"] == "success"
            && event.payload["message"]
                .as_str()
                .is_some_and(|message| message.contains("my-archive"))
    }));
}

#[test]
fn https_complete_download_starts_immediately() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let instant = Arc::new(RecordingInstant::default());
    h.gateway.submit(instant.clone(), clock(), &form("https", "")).unwrap();
    assert_eq!(*instant.started.lock().unwrap(), vec![7]);
}

#[test]
fn preparing_download_is_not_started() {
    let mut downloads = MockDownloads::new();
    downloads.status = "PREPARING";
    let mut h = harness(downloads);
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let instant = Arc::new(RecordingInstant::default());
    let state = h.gateway.submit(instant.clone(), clock(), &form("https", "")).unwrap();
    assert_matches!(state, SubmissionState::SubmittedSuccess { download_id: 7, .. });
    assert!(instant.started.lock().unwrap().is_empty());
}

#[test]
fn non_instant_transport_is_never_started() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let instant = Arc::new(RecordingInstant::default());
    h.gateway.submit(instant.clone(), clock(), &form("globus", "")).unwrap();
    assert!(instant.started.lock().unwrap().is_empty());
}

#[test]
fn sentinel_download_id_is_a_failure() {
    let mut downloads = MockDownloads::new();
    downloads.download_id = Some(-1);
    let mut h = harness(downloads);
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let instant = Arc::new(RecordingInstant::default());
    let state = h.gateway.submit(instant.clone(), clock(), &form("https", "")).unwrap();

    assert_matches!(state, SubmissionState::SubmittedFailure { .. });
    assert!(instant.started.lock().unwrap().is_empty());
    let events = h.events.events();
    assert!(events.iter().any(|event| event.payload["severity"] == "error"));
}

#[test]
fn invalid_email_is_rejected_before_sending() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[4]).unwrap();

    let result = h.gateway.submit(
        Arc::new(RecordingInstant::default()),
        clock(),
        &form("https", "not-an-email"),
    );
    assert_matches!(result, Err(GatewayError::InvalidEmail(_)));
    assert!(h.submitted.lock().unwrap().is_empty());
}

#[test]
fn empty_cart_cannot_be_submitted() {
    let mut h = harness(MockDownloads::new());
    let result = h.gateway.submit(
        Arc::new(RecordingInstant::default()),
        clock(),
        &form("https", ""),
    );
    assert_matches!(result, Err(GatewayError::EmptyCart));
}

#[test]
fn selection_is_limited_to_view_type_and_ids() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Investigation, &[2, 4, 9]).unwrap();
    h.gateway.add_to_cart(CartEntityType::Dataset, &[1]).unwrap();

    let mut view = h.gateway.open_view(EntityType::Investigation, Vec::new());
    view.set_query(QueryState::new());
    assert_eq!(h.gateway.fetch_controller().fetch_all_ids(&mut view), Completion::Applied);

    assert_eq!(h.gateway.selected_rows(&view), vec![2, 4]);
}

#[test]
fn selection_follows_each_views_own_ids() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[1, 7]).unwrap();

    let mut first = h.gateway.open_view(EntityType::Dataset, Vec::new());
    let ticket = first.begin_all_ids();
    first.complete_all_ids(&ticket, Ok(vec![json!({"ID": 1}), json!({"ID": 2})]));
    let mut second = h.gateway.open_view(EntityType::Dataset, Vec::new());
    let ticket = second.begin_all_ids();
    second.complete_all_ids(&ticket, Ok(vec![json!({"ID": 7}), json!({"ID": 8})]));

    assert_eq!(h.gateway.selected_rows(&first), vec![1]);
    assert_eq!(h.gateway.selected_rows(&second), vec![7]);
    assert_eq!(h.gateway.selected_rows(&first), vec![1]);

    first.set_query(QueryState::new().with_filter("NAME", Filter::include("x")));
    assert!(h.gateway.selected_rows(&first).is_empty());
}

#[test]
fn out_of_range_page_is_rejected_before_any_request() {
    let h = harness(MockDownloads::new());
    let params = ViewParams {
        page: Some(u64::MAX / 5),
        results: Some(10),
        ..ViewParams::default()
    };
    let err = h
        .gateway
        .entities(EntityType::Investigation, &params, Vec::new())
        .unwrap_err();

    assert_matches!(err, GatewayError::InvalidQueryString(_));
    assert!(h.queries.lock().unwrap().is_empty());
}

#[test]
fn entities_page_applies_parent_filter() {
    let h = harness(MockDownloads::new());
    let params = ViewParams {
        query: QueryState::new().with_filter("TITLE", Filter::include("Title")),
        ..ViewParams::default()
    };
    let page = h
        .gateway
        .entities(
            EntityType::Investigation,
            &params,
            vec![AdditionalFilter::eq("FACILITY_ID", 1)],
        )
        .unwrap();

    assert_eq!(page.total_row_count, Some(2));
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.page, 1);
    assert_eq!(page.results, 10);

    let queries = h.queries.lock().unwrap();
    assert_eq!(queries.len(), 2);
    for query in queries.iter() {
        assert!(query.where_clauses.contains(&json!({"FACILITY_ID": {"eq": 1}})));
    }
    assert_eq!(queries[1].skip, Some(0));
    assert_eq!(queries[1].limit, Some(10));
}

#[test]
fn routes_are_announced_once_per_entry() {
    let h = harness(MockDownloads::new());
    h.gateway.announce_routes();

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, REGISTER_ROUTE);
    assert_eq!(events[0].payload["link"], "/browse/investigation");
    assert_eq!(events[0].payload["plugin"], "datagateway-dataview");
}

#[test]
fn cart_summary_adds_item_sizes() {
    let mut h = harness(MockDownloads::new());
    h.gateway.add_to_cart(CartEntityType::Dataset, &[1, 2]).unwrap();

    let summary = h.gateway.cart_summary(false).unwrap();
    assert_eq!(summary.items, 2);
    assert_eq!(summary.total_size, 3 * 1024);
    assert!(summary.estimate.is_some());
    assert!(h.gateway.cart_summary(true).unwrap().estimate.is_none());
}
