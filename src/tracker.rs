//! Cart submission and the download status listing.

use std::cmp::Ordering;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::Serialize;

use crate::cart::Cart;
use crate::config::ApiConfig;
use crate::domain::{Download, DownloadStatus};
use crate::download_api::{DownloadClient, SubmitRequest};
use crate::error::GatewayError;
use crate::ids::InstantDownload;
use crate::query::{DateFilter, Filter, FilterValue, Order, QueryState, TextFilterKind};

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .ok()
});

static INSTANT_TRANSPORT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"https|http").ok());

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// `{facility}_{year}-{month}-{day}_{hour}-{minute}-{second}`, fields unpadded.
pub fn default_file_name(facility_name: &str, at: NaiveDateTime) -> String {
    format!(
        "{facility_name}_{}-{}-{}_{}-{}-{}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// An empty address is allowed (no notification email).
pub fn validate_email(email: &str) -> Result<(), GatewayError> {
    if email.is_empty() {
        return Ok(());
    }
    match EMAIL_RE.as_ref() {
        Some(re) if re.is_match(email) => Ok(()),
        _ => Err(GatewayError::InvalidEmail(email.to_string())),
    }
}

pub fn is_instant_downloadable(transport: &str) -> bool {
    INSTANT_TRANSPORT_RE
        .as_ref()
        .is_some_and(|re| re.is_match(transport))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEstimate {
    pub at_one_mbps: f64,
    pub at_thirty_mbps: f64,
    pub at_hundred_mbps: f64,
}

/// Seconds to transfer `total_size` bytes. Two-level storage gives no estimate.
pub fn estimate_download_times(total_size: u64, is_two_level: bool) -> Option<DownloadEstimate> {
    if is_two_level {
        return None;
    }
    let megabytes = total_size as f64 / (1024.0 * 1024.0);
    let at = |mbps: f64| megabytes / (mbps / 8.0);
    Some(DownloadEstimate {
        at_one_mbps: at(1.0),
        at_thirty_mbps: at(30.0),
        at_hundred_mbps: at(100.0),
    })
}

/// `"1 day, 2 hours, 3 min, 4 sec"`; zero parts are left out.
pub fn seconds_to_dhms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days} {}", if days == 1 { "day" } else { "days" }));
    }
    if hours > 0 {
        parts.push(format!("{hours} {}", if hours == 1 { "hour" } else { "hours" }));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} min"));
    }
    if secs > 0 {
        parts.push(format!("{secs} sec"));
    }
    if parts.is_empty() {
        "< 1 second".to_string()
    } else {
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubmissionForm {
    /// Blank means "generate one when submitting".
    pub file_name: String,
    pub access_method: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SubmissionState {
    Editing,
    Submitting,
    #[serde(rename_all = "camelCase")]
    SubmittedSuccess { download_id: u64, file_name: String },
    #[serde(rename_all = "camelCase")]
    SubmittedFailure { file_name: String, reason: String },
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::SubmittedSuccess { .. } | SubmissionState::SubmittedFailure { .. }
        )
    }
}

/// Drives one cart submission from the confirmation form to a terminal state.
pub struct DownloadSubmitter<D: DownloadClient> {
    downloads: Arc<D>,
    instant: Arc<dyn InstantDownload>,
    clock: Arc<dyn Clock>,
    facility_name: String,
    instant_access_method: String,
    state: SubmissionState,
}

impl<D: DownloadClient> DownloadSubmitter<D> {
    pub fn new(
        downloads: Arc<D>,
        instant: Arc<dyn InstantDownload>,
        clock: Arc<dyn Clock>,
        config: &ApiConfig,
    ) -> Self {
        Self {
            downloads,
            instant,
            clock,
            facility_name: config.facility_name.clone(),
            instant_access_method: config.instant_access_method().to_string(),
            state: SubmissionState::Editing,
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = SubmissionState::Editing;
    }

    /// Validation problems return `Err` and leave the form editable; nothing is sent.
    /// Every server outcome, failures included, ends in a terminal state.
    pub fn submit(
        &mut self,
        cart: &Cart,
        form: &SubmissionForm,
    ) -> Result<&SubmissionState, GatewayError> {
        validate_email(&form.email)?;
        if cart.is_empty() {
            return Err(GatewayError::EmptyCart);
        }

        self.state = SubmissionState::Submitting;
        let file_name = match form.file_name.trim() {
            "" => default_file_name(&self.facility_name, self.clock.now()),
            name => name.to_string(),
        };
        let request = SubmitRequest {
            file_name: file_name.clone(),
            transport: form.access_method.clone(),
            email: form.email.clone(),
        };
        tracing::info!(file_name = %file_name, transport = %request.transport, "submitting cart");

        let download_id = self.downloads.submit_cart(&request).and_then(|response| {
            response
                .download_id()
                .ok_or(GatewayError::MissingDownloadId)
        });
        self.state = match download_id {
            Ok(download_id) => {
                if request.transport == self.instant_access_method {
                    self.try_instant_download(download_id);
                }
                SubmissionState::SubmittedSuccess {
                    download_id,
                    file_name,
                }
            }
            Err(err) => {
                tracing::error!("download submission failed: {err}");
                SubmissionState::SubmittedFailure {
                    file_name,
                    reason: err.to_string(),
                }
            }
        };
        Ok(&self.state)
    }

    fn try_instant_download(&self, download_id: u64) {
        match self.downloads.download(download_id) {
            Ok(Some(download)) if download.status == DownloadStatus::Complete => {
                if let Err(err) = self.instant.start(&download) {
                    tracing::error!(download_id, "instant download failed: {err}");
                }
            }
            Ok(Some(download)) => {
                tracing::debug!(download_id, status = %download.status, "download not ready yet");
            }
            Ok(None) => tracing::warn!(download_id, "submitted download not found"),
            Err(err) => tracing::warn!(download_id, "could not fetch submitted download: {err}"),
        }
    }
}

/// Client-side sortable and filterable view over the user's downloads.
pub struct DownloadStatusTable<D: DownloadClient> {
    downloads: Arc<D>,
    rows: Vec<Download>,
    query: QueryState,
    error: Option<String>,
    last_checked: Option<NaiveDateTime>,
}

impl<D: DownloadClient> DownloadStatusTable<D> {
    pub fn new(downloads: Arc<D>) -> Self {
        Self {
            downloads,
            rows: Vec::new(),
            query: QueryState::new(),
            error: None,
            last_checked: None,
        }
    }

    /// Replaces the listing. On failure the listing is empty and `error` is set.
    pub fn load(&mut self, clock: &dyn Clock) {
        self.rows.clear();
        match self.downloads.downloads() {
            Ok(rows) => {
                self.rows = rows;
                self.error = None;
                self.last_checked = Some(clock.now());
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!("failed to list downloads: {message}");
                self.error = Some(message);
            }
        }
    }

    pub fn rows(&self) -> &[Download] {
        &self.rows
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_checked(&self) -> Option<NaiveDateTime> {
        self.last_checked
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn set_sort(&mut self, column: &str, order: Option<Order>) {
        self.query.set_sort(column, order);
    }

    pub fn set_filter(&mut self, column: &str, filter: Option<Filter>) {
        self.query.set_filter(column, filter);
    }

    /// Filtered and sorted rows; `now` closes date ranges without an end.
    pub fn visible(&self, now: NaiveDateTime) -> Vec<&Download> {
        let mut rows: Vec<&Download> = self
            .rows
            .iter()
            .filter(|row| {
                self.query
                    .filters()
                    .iter()
                    .all(|(column, filter)| matches_filter(row, column, filter, now))
            })
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, self.query.sort()));
        rows
    }

    /// The row disappears only once the server accepted the delete.
    pub fn delete(&mut self, download_id: u64) -> Result<(), GatewayError> {
        match self.downloads.set_download_deleted(download_id, true) {
            Ok(()) => {
                self.rows.retain(|row| row.id != download_id);
                Ok(())
            }
            Err(err) => {
                tracing::error!(download_id, "failed to delete download: {err}");
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

fn matches_filter(row: &Download, column: &str, filter: &Filter, now: NaiveDateTime) -> bool {
    let Some(value) = row.column(column) else {
        return false;
    };
    match filter {
        Filter::Plain(needle) => value.contains(needle.as_str()),
        Filter::Set(values) => values.iter().any(|candidate| *candidate == value),
        Filter::Text(text) => {
            let needle = match &text.value {
                Some(FilterValue::Text(needle)) => needle.clone(),
                Some(FilterValue::Number(number)) => number.to_string(),
                None => return true,
            };
            match text.kind {
                TextFilterKind::Include => value.contains(&needle),
                TextFilterKind::Exclude => !value.contains(&needle),
                TextFilterKind::Exact => value == needle,
            }
        }
        Filter::Date(range) => matches_date(&value, range, now),
    }
}

/// A missing start is unbounded below; a missing end stops at `now`. No bounds match everything.
fn matches_date(value: &str, range: &DateFilter, now: NaiveDateTime) -> bool {
    let start = range
        .start_date
        .as_deref()
        .and_then(parse_day)
        .and_then(|day| day.and_hms_opt(0, 0, 0));
    let end = range
        .end_date
        .as_deref()
        .and_then(parse_day)
        .and_then(|day| day.and_hms_opt(23, 59, 59));
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(timestamp) = parse_timestamp(value) else {
        return false;
    };
    start.is_none_or(|start| start <= timestamp) && timestamp <= end.unwrap_or(now)
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| parse_day(value).and_then(|day| day.and_hms_opt(0, 0, 0)))
}

fn compare_rows(a: &Download, b: &Download, sort: &[(String, Order)]) -> Ordering {
    for (column, order) in sort {
        let ordering = a.column(column).cmp(&b.column(column));
        let ordering = match order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
