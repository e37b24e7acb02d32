use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub const DEFAULT_SETTINGS_FILE: &str = "datagateway-dataview-settings.json";
pub const DEFAULT_PLUGIN_NAME: &str = "datagateway-dataview";
pub const SETTINGS_ERROR_PREFIX: &str = "Error loading settings: ";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub facility_name: Option<String>,
    #[serde(default)]
    pub ids_url: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub download_api_url: Option<String>,
    #[serde(default = "default_select_all")]
    pub select_all_setting: bool,
    #[serde(default)]
    pub breadcrumbs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub access_methods: Option<BTreeMap<String, AccessMethodEntry>>,
    #[serde(default)]
    pub plugin_name: Option<String>,
    /// Extra attempts for catalog requests that fail with 429, 5xx or a connection error.
    #[serde(default)]
    pub retries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessMethodEntry {
    #[serde(default)]
    pub ids_url: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Why a settings document cannot be used. Messages carry a stable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsProblem {
    MissingFacilityName,
    MissingUrl(&'static str),
    NoRoutes,
    IncompleteRoute(usize),
}

impl fmt::Display for SettingsProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsProblem::MissingFacilityName => {
                write!(f, "{SETTINGS_ERROR_PREFIX}facilityName is undefined in settings")
            }
            SettingsProblem::MissingUrl(name) => {
                write!(f, "{SETTINGS_ERROR_PREFIX}{name} is undefined in settings")
            }
            SettingsProblem::NoRoutes => {
                write!(f, "{SETTINGS_ERROR_PREFIX}No routes provided in the settings")
            }
            SettingsProblem::IncompleteRoute(index) => write!(
                f,
                "{SETTINGS_ERROR_PREFIX}Route {index} provided does not have all the required entries (section, link, displayName)"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub section: String,
    pub link: String,
    pub display_name: String,
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessMethod {
    pub name: String,
    pub ids_url: Option<String>,
    pub display_name: String,
    pub description: Option<String>,
}

/// Validated settings consumed by the clients and views.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub facility_name: String,
    pub ids_url: String,
    pub api_url: String,
    pub download_api_url: String,
    pub select_all: bool,
    pub routes: Vec<Route>,
    pub features: BTreeMap<String, bool>,
    pub access_methods: Vec<AccessMethod>,
    pub plugin_name: String,
    pub retries: usize,
}

impl ApiConfig {
    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    /// The transport that gets an immediate download after submission.
    pub fn instant_access_method(&self) -> &str {
        "https"
    }

    pub fn access_method(&self, name: &str) -> Option<&AccessMethod> {
        self.access_methods.iter().find(|method| method.name == name)
    }

    /// IDS base URL for a transport, falling back to the facility default.
    pub fn ids_url_for(&self, access_method: &str) -> &str {
        self.access_method(access_method)
            .and_then(|method| method.ids_url.as_deref())
            .unwrap_or(&self.ids_url)
    }
}

pub struct SettingsLoader;

impl SettingsLoader {
    pub fn resolve(path: Option<&str>) -> Result<ApiConfig, GatewayError> {
        let settings_path = match path {
            Some(path) => PathBuf::from(path),
            None => default_settings_path(),
        };

        let content = fs::read_to_string(&settings_path)
            .map_err(|_| GatewayError::SettingsRead(settings_path.display().to_string()))?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|err| GatewayError::SettingsParse(err.to_string()))?;

        Self::resolve_settings(settings)
    }

    /// Logs the failure and yields `None` so the caller can continue degraded.
    pub fn resolve_or_degraded(path: Option<&str>) -> Option<ApiConfig> {
        match Self::resolve(path) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::error!("{err}");
                None
            }
        }
    }

    pub fn resolve_settings(settings: Settings) -> Result<ApiConfig, GatewayError> {
        let invalid = GatewayError::InvalidSettings;

        let facility_name = settings
            .facility_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(invalid(SettingsProblem::MissingFacilityName))?;
        let ids_url = required_url(settings.ids_url, "idsUrl")?;
        let api_url = required_url(settings.api_url, "apiUrl")?;
        let download_api_url = required_url(settings.download_api_url, "downloadApiUrl")?;

        if settings.routes.is_empty() {
            return Err(invalid(SettingsProblem::NoRoutes));
        }
        let routes = settings
            .routes
            .into_iter()
            .enumerate()
            .map(|(index, route)| match (route.section, route.link, route.display_name) {
                (Some(section), Some(link), Some(display_name)) => Ok(Route {
                    section,
                    link,
                    display_name,
                    order: route.order,
                }),
                _ => Err(invalid(SettingsProblem::IncompleteRoute(index))),
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        let access_methods = settings
            .access_methods
            .unwrap_or_else(default_access_methods)
            .into_iter()
            .map(|(name, entry)| AccessMethod {
                display_name: entry
                    .display_name
                    .unwrap_or_else(|| name.to_ascii_uppercase()),
                ids_url: entry.ids_url.map(|url| url.trim_end_matches('/').to_string()),
                description: entry.description,
                name,
            })
            .collect();

        Ok(ApiConfig {
            facility_name,
            ids_url,
            api_url,
            download_api_url,
            select_all: settings.select_all_setting,
            routes,
            features: settings.features,
            access_methods,
            plugin_name: settings
                .plugin_name
                .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
            retries: settings.retries.unwrap_or(0),
        })
    }
}

fn required_url(value: Option<String>, name: &'static str) -> Result<String, GatewayError> {
    value
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .ok_or(GatewayError::InvalidSettings(SettingsProblem::MissingUrl(name)))
}

fn default_select_all() -> bool {
    true
}

pub fn default_access_methods() -> BTreeMap<String, AccessMethodEntry> {
    let mut methods = BTreeMap::new();
    methods.insert(
        "https".to_string(),
        AccessMethodEntry {
            ids_url: None,
            display_name: Some("HTTPS".to_string()),
            description: Some("HTTPS is the default access method.".to_string()),
        },
    );
    methods.insert(
        "globus".to_string(),
        AccessMethodEntry {
            ids_url: None,
            display_name: Some("Globus".to_string()),
            description: Some("Globus is a special access method.".to_string()),
        },
    );
    methods
}

fn default_settings_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_SETTINGS_FILE);
    if local.exists() {
        return local;
    }
    ProjectDirs::from("uk.ac", "stfc", "datagateway")
        .map(|dirs| dirs.config_dir().join(DEFAULT_SETTINGS_FILE))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn settings_json(extra: &str) -> String {
        format!(
            r#"{{
                "facilityName": "LILS",
                "idsUrl": "https://ids.example.org/ids/",
                "apiUrl": "https://api.example.org",
                "downloadApiUrl": "https://download.example.org"
                {extra}
            }}"#
        )
    }

    #[test]
    fn resolve_defaults() {
        let settings: Settings = serde_json::from_str(&settings_json(
            r#", "routes": [{"section": "Test", "link": "/browse/investigation", "displayName": "Browse"}]"#,
        ))
        .unwrap();
        let config = SettingsLoader::resolve_settings(settings).unwrap();
        assert_eq!(config.ids_url, "https://ids.example.org/ids");
        assert!(config.select_all);
        assert_eq!(config.plugin_name, DEFAULT_PLUGIN_NAME);
        assert!(config.access_method("globus").is_some());
        assert_eq!(config.ids_url_for("globus"), "https://ids.example.org/ids");
    }

    #[test]
    fn empty_routes_are_fatal() {
        let settings: Settings = serde_json::from_str(&settings_json("")).unwrap();
        let err = SettingsLoader::resolve_settings(settings).unwrap_err();
        assert_matches!(err, GatewayError::InvalidSettings(SettingsProblem::NoRoutes));
        assert!(err.to_string().starts_with(SETTINGS_ERROR_PREFIX));
    }
}
