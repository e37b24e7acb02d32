use std::fs::File;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::domain::Download;
use crate::error::GatewayError;
use crate::tracker::is_instant_downloadable;

/// `getData` link for a prepared archive.
pub fn prepared_data_url(
    ids_url: &str,
    session_id: Option<&str>,
    prepared_id: &str,
    file_name: &str,
) -> Result<Url, GatewayError> {
    get_data_url(
        ids_url,
        &[
            ("sessionId", session_id.unwrap_or_default()),
            ("preparedId", prepared_id),
            ("outname", file_name),
        ],
    )
}

pub fn dataset_data_url(
    ids_url: &str,
    session_id: Option<&str>,
    dataset_id: u64,
    name: &str,
) -> Result<Url, GatewayError> {
    let id = dataset_id.to_string();
    get_data_url(
        ids_url,
        &[
            ("sessionId", session_id.unwrap_or_default()),
            ("datasetIds", id.as_str()),
            ("compress", "false"),
            ("zip", "true"),
            ("outname", name),
        ],
    )
}

pub fn datafile_data_url(
    ids_url: &str,
    session_id: Option<&str>,
    datafile_id: u64,
    name: &str,
) -> Result<Url, GatewayError> {
    let id = datafile_id.to_string();
    get_data_url(
        ids_url,
        &[
            ("sessionId", session_id.unwrap_or_default()),
            ("datafileIds", id.as_str()),
            ("compress", "false"),
            ("outname", name),
        ],
    )
}

fn get_data_url(ids_url: &str, params: &[(&str, &str)]) -> Result<Url, GatewayError> {
    let base = format!("{}/getData", ids_url.trim_end_matches('/'));
    Url::parse_with_params(&base, params).map_err(|err| GatewayError::IdsHttp(err.to_string()))
}

/// The client-side action that fetches a prepared archive.
pub trait InstantDownload: Send + Sync {
    fn start(&self, download: &Download) -> Result<(), GatewayError>;
}

/// Streams prepared archives from the IDS into a local directory.
#[derive(Clone)]
pub struct IdsHttpClient {
    client: Client,
    ids_url: String,
    session_id: Option<String>,
    destination_dir: Utf8PathBuf,
}

impl IdsHttpClient {
    pub fn new(
        ids_url: &str,
        session_id: Option<String>,
        destination_dir: Utf8PathBuf,
    ) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dgw/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GatewayError::IdsHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| GatewayError::IdsHttp(err.to_string()))?;
        Ok(Self {
            client,
            ids_url: ids_url.to_string(),
            session_id,
            destination_dir,
        })
    }

    pub fn download_to(&self, url: &Url, destination: &Utf8Path) -> Result<(), GatewayError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| GatewayError::IdsHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "IDS request failed".to_string());
            return Err(GatewayError::IdsStatus { status, message });
        }
        let parent = destination
            .parent()
            .ok_or_else(|| GatewayError::Filesystem("invalid destination path".to_string()))?;
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("dgw-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn archive_path(&self, download: &Download) -> Utf8PathBuf {
        let name = if download.file_name.ends_with(".zip") {
            download.file_name.clone()
        } else {
            format!("{}.zip", download.file_name)
        };
        self.destination_dir.join(name)
    }
}

impl InstantDownload for IdsHttpClient {
    fn start(&self, download: &Download) -> Result<(), GatewayError> {
        let url = prepared_data_url(
            &self.ids_url,
            self.session_id.as_deref(),
            &download.prepared_id,
            &download.file_name,
        )?;
        let destination = self.archive_path(download);
        tracing::info!(download_id = download.id, path = %destination, "starting instant download");
        self.download_to(&url, &destination)
    }
}

/// Result of [`unpack_download`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpackedArchive {
    pub directory: Utf8PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Unpacks the archive of `download` into `root/<fileName>`.
///
/// Entries land in a staging directory under `root` first and are moved into
/// place only when every entry was accepted, so an entry that escapes the
/// archive root leaves nothing behind.
pub fn unpack_download(
    download: &Download,
    archive: &Utf8Path,
    root: &Utf8Path,
) -> Result<UnpackedArchive, GatewayError> {
    if !is_instant_downloadable(&download.transport) {
        return Err(GatewayError::NotAnArchive {
            download_id: download.id,
            transport: download.transport.clone(),
        });
    }
    let directory = root.join(archive_dir_name(&download.file_name)?);
    if directory.exists() {
        return Err(GatewayError::Filesystem(format!("{directory} already exists")));
    }
    std::fs::create_dir_all(root.as_std_path()).map_err(fs_error)?;
    let staging = tempfile::Builder::new()
        .prefix(".dgw-unpack")
        .tempdir_in(root.as_std_path())
        .map_err(fs_error)?;

    let file = File::open(archive.as_std_path())
        .map_err(|err| GatewayError::Filesystem(format!("open {archive}: {err}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| GatewayError::Filesystem(format!("{archive}: {err}")))?;
    let mut files = 0;
    let mut bytes = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(fs_error)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(GatewayError::Filesystem(format!(
                "archive entry {} escapes the download directory",
                entry.name()
            )));
        };
        let path = staging.path().join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&path).map_err(fs_error)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(fs_error)?;
        }
        let mut out = File::create(&path).map_err(fs_error)?;
        bytes += std::io::copy(&mut entry, &mut out).map_err(fs_error)?;
        files += 1;
    }

    std::fs::rename(staging.keep(), directory.as_std_path()).map_err(fs_error)?;
    tracing::info!(download_id = download.id, %directory, files, bytes, "unpacked download");
    Ok(UnpackedArchive {
        directory,
        files,
        bytes,
    })
}

fn archive_dir_name(file_name: &str) -> Result<&str, GatewayError> {
    let name = file_name.trim();
    let name = name.strip_suffix(".zip").unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(GatewayError::Filesystem(format!(
            "download file name {file_name:?} cannot name a directory"
        )));
    }
    Ok(name)
}

fn fs_error(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Filesystem(err.to_string())
}
