//! Browser-URL form of a view: sort, filters, page, page size and view mode.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::query::QueryState;

const URL_BASE: &str = "http://localhost/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Table,
    Card,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Table => write!(f, "table"),
            ViewMode::Card => write!(f, "card"),
        }
    }
}

impl FromStr for ViewMode {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "table" => Ok(ViewMode::Table),
            "card" => Ok(ViewMode::Card),
            _ => Err(GatewayError::InvalidQueryString(format!("view={value}"))),
        }
    }
}

/// Every field is optional and defaulted independently of the others.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewParams {
    pub query: QueryState,
    pub page: Option<u64>,
    pub results: Option<u64>,
    pub view: Option<ViewMode>,
}

impl ViewParams {
    pub const DEFAULT_PAGE: u64 = 1;
    pub const DEFAULT_RESULTS: u64 = 10;

    /// Parses the query part of a URL, with or without the leading `?`.
    pub fn parse(query_string: &str) -> Result<Self, GatewayError> {
        let trimmed = query_string.trim().trim_start_matches('?');
        let url = Url::parse(&format!("{URL_BASE}?{trimmed}"))
            .map_err(|err| GatewayError::InvalidQueryString(err.to_string()))?;

        let mut sort = None;
        let mut filters = None;
        let mut params = ViewParams::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sort" => sort = Some(value.into_owned()),
                "filters" => filters = Some(value.into_owned()),
                "page" => params.page = Some(parse_number("page", &value)?),
                "results" => params.results = Some(parse_number("results", &value)?),
                "view" => params.view = Some(value.parse()?),
                _ => {}
            }
        }
        params.query = QueryState::from_json(sort.as_deref(), filters.as_deref())?;
        Ok(params)
    }

    pub fn to_query_string(&self) -> Result<String, GatewayError> {
        let mut url = Url::parse(URL_BASE)
            .map_err(|err| GatewayError::InvalidQueryString(err.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            if !self.query.filters().is_empty() {
                pairs.append_pair("filters", &self.query.filters_json()?.to_string());
            }
            if !self.query.sort().is_empty() {
                pairs.append_pair("sort", &self.query.sort_json().to_string());
            }
            if let Some(page) = self.page {
                pairs.append_pair("page", &page.to_string());
            }
            if let Some(results) = self.results {
                pairs.append_pair("results", &results.to_string());
            }
            if let Some(view) = self.view {
                pairs.append_pair("view", &view.to_string());
            }
        }
        Ok(url.query().unwrap_or_default().to_string())
    }

    pub fn page_or_default(&self) -> u64 {
        self.page.unwrap_or(Self::DEFAULT_PAGE)
    }

    pub fn results_or_default(&self) -> u64 {
        self.results.unwrap_or(Self::DEFAULT_RESULTS)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::InvalidQueryString(format!("{key}={value}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::query::{Filter, Order};

    #[test]
    fn missing_fields_default_independently() {
        let params = ViewParams::parse("?view=card").unwrap();
        assert_eq!(params.view, Some(ViewMode::Card));
        assert_eq!(params.page_or_default(), 1);
        assert_eq!(params.results_or_default(), 10);
        assert!(params.query.is_empty());
    }

    #[test]
    fn bad_page_is_rejected() {
        let err = ViewParams::parse("page=two").unwrap_err();
        assert_matches!(err, GatewayError::InvalidQueryString(_));
    }

    #[test]
    fn serializes_query_state() {
        let params = ViewParams {
            query: QueryState::new()
                .with_filter("NAME", Filter::include("test"))
                .with_sort("NAME", Order::Asc),
            page: Some(2),
            results: None,
            view: None,
        };
        let query = params.to_query_string().unwrap();
        assert!(query.starts_with("filters="));
        assert!(query.ends_with("page=2"));
        assert_eq!(ViewParams::parse(&query).unwrap(), params);
    }
}
