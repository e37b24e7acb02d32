use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;

use datagateway_client::domain::{CartEntityType, Download, DownloadCart, DownloadStatus};
use datagateway_client::download_api::{DownloadClient, SubmitRequest, SubmitResponse};
use datagateway_client::error::GatewayError;
use datagateway_client::query::{Filter, Order};
use datagateway_client::tracker::{DownloadStatusTable, FixedClock, is_instant_downloadable};

fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap()
}

fn download(id: u64, file_name: &str, status: &str, transport: &str, created_at: &str) -> Download {
    serde_json::from_value(json!({
        "id": id,
        "fileName": file_name,
        "status": status,
        "transport": transport,
        "createdAt": created_at,
        "preparedId": format!("prep-{id}"),
        "isTwoLevel": false,
    }))
    .unwrap()
}

fn listing() -> Vec<Download> {
    vec![
        download(1, "alpha", "COMPLETE", "https", "2020-01-10T10:00:00Z"),
        download(2, "beta", "RESTORING", "globus", "2020-02-01T09:30:00Z"),
        download(3, "alpha", "PREPARING", "https", "2020-01-31T23:30:00Z"),
        download(4, "gamma", "EXPIRED", "globus", "2019-12-31T08:00:00Z"),
    ]
}

struct MockDownloads {
    rows: Vec<Download>,
    fail_list: bool,
    fail_delete: bool,
    deleted: Mutex<Vec<(u64, bool)>>,
}

impl MockDownloads {
    fn new() -> Self {
        Self {
            rows: listing(),
            fail_list: false,
            fail_delete: false,
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl DownloadClient for MockDownloads {
    fn cart(&self) -> Result<DownloadCart, GatewayError> {
        Ok(DownloadCart::default())
    }

    fn add_cart_items(
        &self,
        _entity_type: CartEntityType,
        _ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        Ok(DownloadCart::default())
    }

    fn remove_cart_items(
        &self,
        _entity_type: CartEntityType,
        _ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        Ok(DownloadCart::default())
    }

    fn clear_cart(&self) -> Result<DownloadCart, GatewayError> {
        Ok(DownloadCart::default())
    }

    fn submit_cart(&self, _request: &SubmitRequest) -> Result<SubmitResponse, GatewayError> {
        Ok(SubmitResponse::default())
    }

    fn downloads(&self) -> Result<Vec<Download>, GatewayError> {
        if self.fail_list {
            return Err(GatewayError::DownloadHttp("connection reset".to_string()));
        }
        Ok(self.rows.clone())
    }

    fn download(&self, download_id: u64) -> Result<Option<Download>, GatewayError> {
        Ok(self.rows.iter().find(|row| row.id == download_id).cloned())
    }

    fn set_download_deleted(&self, download_id: u64, deleted: bool) -> Result<(), GatewayError> {
        self.deleted.lock().unwrap().push((download_id, deleted));
        if self.fail_delete {
            return Err(GatewayError::DownloadStatus {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        Ok(())
    }

    fn size(&self, _entity_type: CartEntityType, _entity_id: u64) -> Result<u64, GatewayError> {
        Ok(0)
    }
}

fn loaded(downloads: MockDownloads) -> (DownloadStatusTable<MockDownloads>, Arc<MockDownloads>) {
    let downloads = Arc::new(downloads);
    let mut table = DownloadStatusTable::new(Arc::clone(&downloads));
    table.load(&FixedClock(at(2020, 3, 1)));
    (table, downloads)
}

fn ids(rows: &[&Download]) -> Vec<u64> {
    rows.iter().map(|row| row.id).collect()
}

#[test]
fn load_records_rows_and_check_time() {
    let (table, _) = loaded(MockDownloads::new());
    assert_eq!(table.rows().len(), 4);
    assert_eq!(table.error(), None);
    assert_eq!(table.last_checked(), Some(at(2020, 3, 1)));
}

#[test]
fn load_failure_leaves_empty_listing_with_error() {
    let mut downloads = MockDownloads::new();
    downloads.fail_list = true;
    let (table, _) = loaded(downloads);

    assert!(table.rows().is_empty());
    assert!(table.error().is_some_and(|err| err.contains("connection reset")));
    assert_eq!(table.last_checked(), None);
}

#[test]
fn restoring_globus_row_is_not_instant_and_can_be_deleted() {
    let (mut table, downloads) = loaded(MockDownloads::new());
    let restoring = table
        .rows()
        .iter()
        .find(|row| row.status == DownloadStatus::Restoring)
        .cloned()
        .unwrap();
    assert_eq!(restoring.status.label(), "Restoring from Tape");
    assert!(!is_instant_downloadable(&restoring.transport));

    table.delete(restoring.id).unwrap();
    assert!(table.rows().iter().all(|row| row.id != restoring.id));
    assert_eq!(*downloads.deleted.lock().unwrap(), vec![(2, true)]);
}

#[test]
fn failed_delete_keeps_the_row() {
    let mut downloads = MockDownloads::new();
    downloads.fail_delete = true;
    let (mut table, _) = loaded(downloads);

    assert_matches!(table.delete(1), Err(GatewayError::DownloadStatus { status: 403, .. }));
    assert!(table.rows().iter().any(|row| row.id == 1));
    assert!(table.error().is_some_and(|err| err.contains("forbidden")));
}

#[test]
fn sorts_by_several_columns_in_activation_order() {
    let (mut table, _) = loaded(MockDownloads::new());
    table.set_sort("fileName", Some(Order::Asc));
    table.set_sort("createdAt", Some(Order::Desc));

    let visible = table.visible(at(2020, 3, 1));
    assert_eq!(ids(&visible), vec![3, 1, 2, 4]);

    table.set_sort("fileName", None);
    let visible = table.visible(at(2020, 3, 1));
    assert_eq!(ids(&visible), vec![2, 3, 1, 4]);
}

#[test]
fn text_filters_include_exclude_and_exact() {
    let (mut table, _) = loaded(MockDownloads::new());

    table.set_filter("fileName", Some(Filter::include("a")));
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![1, 2, 3, 4]);

    table.set_filter("fileName", Some(Filter::exclude("alpha")));
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![2, 4]);

    table.set_filter("fileName", Some(Filter::exact("alph")));
    assert!(table.visible(at(2020, 3, 1)).is_empty());

    table.set_filter("fileName", None);
    table.set_filter(
        "status",
        Some(Filter::Set(vec!["COMPLETE".to_string(), "EXPIRED".to_string()])),
    );
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![1, 4]);
}

#[test]
fn date_filter_bounds() {
    let (mut table, _) = loaded(MockDownloads::new());

    table.set_filter(
        "createdAt",
        Some(Filter::date_range(Some("2020-01-01"), Some("2020-01-31"))),
    );
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![1, 3]);

    table.set_filter("createdAt", Some(Filter::date_range(Some("2020-01-15"), None)));
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![2, 3]);
    assert_eq!(ids(&table.visible(at(2020, 1, 20))), Vec::<u64>::new());
}

#[test]
fn date_filter_with_only_an_end_bound() {
    let (mut table, _) = loaded(MockDownloads::new());

    table.set_filter("createdAt", Some(Filter::date_range(None, Some("2000-01-01"))));
    assert!(table.visible(at(2020, 3, 1)).is_empty());

    table.set_filter("createdAt", Some(Filter::date_range(None, Some("2020-01-10"))));
    assert_eq!(ids(&table.visible(at(2020, 3, 1))), vec![1, 4]);
}

#[test]
fn filter_on_missing_column_hides_rows() {
    let (mut table, _) = loaded(MockDownloads::new());
    table.set_filter("email", Some(Filter::include("x")));
    assert!(table.visible(at(2020, 3, 1)).is_empty());
}
