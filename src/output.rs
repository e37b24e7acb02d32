use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AggregateResult, CartResult, CartSummary, CountResult, DownloadsResult, EntityPage};
use crate::domain::{DownloadStatus, Entity};
use crate::tracker::{SubmissionState, is_instant_downloadable, seconds_to_dhms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Text,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_page(page: &EntityPage) {
        let total = page
            .total_row_count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{} page {} ({} per page, {} total)",
            page.entity_type, page.page, page.results, total
        );
        for row in &page.rows {
            println!("  {}", entity_line(row));
        }
    }

    pub fn print_count(result: &CountResult) {
        println!("{}: {}", result.entity_type, result.count);
    }

    pub fn print_aggregate(label: &str, result: &AggregateResult) {
        let source = if result.cached { " (cached)" } else { "" };
        println!(
            "{} {} {label}: {}{source}",
            result.entity_type, result.entity_id, result.value
        );
    }

    pub fn print_cart(result: &CartResult) {
        if result.items.is_empty() {
            println!("cart is empty");
            return;
        }
        for item in &result.items {
            println!("  {} {} {}", item.entity_type, item.entity_id, item.name);
        }
    }

    pub fn print_cart_summary(summary: &CartSummary) {
        println!("{} items, {} bytes", summary.items, summary.total_size);
        if let Some(estimate) = &summary.estimate {
            println!("  @1 Mbps: {}", seconds_to_dhms(estimate.at_one_mbps));
            println!("  @30 Mbps: {}", seconds_to_dhms(estimate.at_thirty_mbps));
            println!("  @100 Mbps: {}", seconds_to_dhms(estimate.at_hundred_mbps));
        }
    }

    pub fn print_downloads(result: &DownloadsResult) {
        for download in &result.downloads {
            let instant = if is_instant_downloadable(&download.transport)
                && download.status == DownloadStatus::Complete
            {
                " [download ready]"
            } else {
                ""
            };
            println!(
                "  {:>6}  {:<40} {:<8} {:<20} {}{instant}",
                download.id,
                download.file_name,
                download.transport,
                download.status.label(),
                download.created_at
            );
        }
    }

    pub fn print_submission(state: &SubmissionState) {
        match state {
            SubmissionState::SubmittedSuccess {
                download_id,
                file_name,
            } => println!("submitted {file_name} as download {download_id}"),
            SubmissionState::SubmittedFailure { file_name, reason } => {
                println!("download request {file_name} was unsuccessful: {reason}")
            }
            SubmissionState::Editing | SubmissionState::Submitting => {}
        }
    }
}

fn entity_line(entity: &Entity) -> String {
    match entity.name() {
        Some(name) => format!("{:>8}  {name}", entity.id()),
        None => format!("{:>8}", entity.id()),
    }
}
