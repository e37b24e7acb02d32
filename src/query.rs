//! Table query state and its translation to catalog API parameters.
//!
//! A [`QueryState`] is what the user manipulates: ordered sort columns and
//! per-column filters. [`encode`] turns it into an [`ApiQuery`], the `where` /
//! `order` / `include` / `distinct` / `skip` / `limit` parameter set the catalog
//! API understands, each value JSON-encoded. [`decode`] reverses the
//! filter-derived subset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::GatewayError;

const UNBOUNDED_START: &str = "0000-01-01 00:00:00";
const UNBOUNDED_END: &str = "9999-12-31 23:59:59";
const DAY_START: &str = " 00:00:00";
const DAY_END: &str = " 23:59:59";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Order {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            _ => Err(GatewayError::InvalidSort(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFilterKind {
    Include,
    Exclude,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Number(serde_json::Number),
}

impl FilterValue {
    fn is_empty(&self) -> bool {
        matches!(self, FilterValue::Text(value) if value.is_empty())
    }

    fn to_json(&self) -> Value {
        match self {
            FilterValue::Text(value) => Value::String(value.clone()),
            FilterValue::Number(value) => Value::Number(value.clone()),
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(FilterValue::Text(text.clone())),
            Value::Number(number) => Some(FilterValue::Number(number.clone())),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
    #[serde(rename = "type")]
    pub kind: TextFilterKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DateFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// Legacy bare-string form, treated as an `include` text filter.
    Plain(String),
    Set(Vec<String>),
    Text(TextFilter),
    Date(DateFilter),
}

impl Filter {
    pub fn include(value: impl Into<FilterValue>) -> Self {
        Filter::Text(TextFilter {
            value: Some(value.into()),
            kind: TextFilterKind::Include,
        })
    }

    pub fn exclude(value: impl Into<FilterValue>) -> Self {
        Filter::Text(TextFilter {
            value: Some(value.into()),
            kind: TextFilterKind::Exclude,
        })
    }

    pub fn exact(value: impl Into<FilterValue>) -> Self {
        Filter::Text(TextFilter {
            value: Some(value.into()),
            kind: TextFilterKind::Exact,
        })
    }

    pub fn date_range(start: Option<&str>, end: Option<&str>) -> Self {
        Filter::Date(DateFilter {
            start_date: start.map(str::to_string),
            end_date: end.map(str::to_string),
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Filter::Plain(value) => value.is_empty(),
            Filter::Set(values) => values.is_empty(),
            Filter::Text(filter) => filter.value.as_ref().is_none_or(FilterValue::is_empty),
            Filter::Date(filter) => {
                filter.start_date.as_deref().is_none_or(str::is_empty)
                    && filter.end_date.as_deref().is_none_or(str::is_empty)
            }
        }
    }
}

/// The live sort and filter state of one table view.
///
/// Both collections keep insertion order: the first sort column is the
/// primary key, and filters encode in the order they were set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryState {
    sort: Vec<(String, Order)>,
    filters: Vec<(String, Filter)>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, column: &str, order: Order) -> Self {
        self.set_sort(column, Some(order));
        self
    }

    pub fn with_filter(mut self, column: &str, filter: Filter) -> Self {
        self.set_filter(column, Some(filter));
        self
    }

    pub fn sort(&self) -> &[(String, Order)] {
        &self.sort
    }

    pub fn filters(&self) -> &[(String, Filter)] {
        &self.filters
    }

    pub fn filter(&self, column: &str) -> Option<&Filter> {
        self.filters
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, filter)| filter)
    }

    pub fn is_empty(&self) -> bool {
        self.sort.is_empty() && self.filters.is_empty()
    }

    /// Re-sorting an active column keeps its priority; `None` removes it.
    pub fn set_sort(&mut self, column: &str, order: Option<Order>) {
        match order {
            Some(order) => match self.sort.iter_mut().find(|(name, _)| name == column) {
                Some(entry) => entry.1 = order,
                None => self.sort.push((column.to_string(), order)),
            },
            None => self.sort.retain(|(name, _)| name != column),
        }
    }

    /// An empty filter value removes the column's filter.
    pub fn set_filter(&mut self, column: &str, filter: Option<Filter>) {
        match filter.filter(|filter| !filter.is_empty()) {
            Some(filter) => match self.filters.iter_mut().find(|(name, _)| name == column) {
                Some(entry) => entry.1 = filter,
                None => self.filters.push((column.to_string(), filter)),
            },
            None => self.filters.retain(|(name, _)| name != column),
        }
    }

    pub fn sort_json(&self) -> Value {
        let map = self
            .sort
            .iter()
            .map(|(column, order)| (column.clone(), Value::String(order.as_str().to_string())))
            .collect::<Map<_, _>>();
        Value::Object(map)
    }

    pub fn filters_json(&self) -> Result<Value, GatewayError> {
        let mut map = Map::new();
        for (column, filter) in &self.filters {
            let value = serde_json::to_value(filter)
                .map_err(|err| GatewayError::InvalidFilter(err.to_string()))?;
            map.insert(column.clone(), value);
        }
        Ok(Value::Object(map))
    }

    pub fn from_json(sort: Option<&str>, filters: Option<&str>) -> Result<Self, GatewayError> {
        let mut state = QueryState::new();
        if let Some(sort) = sort {
            let map: Map<String, Value> = serde_json::from_str(sort)
                .map_err(|err| GatewayError::InvalidSort(err.to_string()))?;
            for (column, order) in map {
                let order = order
                    .as_str()
                    .ok_or_else(|| GatewayError::InvalidSort(column.clone()))?
                    .parse()?;
                state.set_sort(&column, Some(order));
            }
        }
        if let Some(filters) = filters {
            let map: Map<String, Value> = serde_json::from_str(filters)
                .map_err(|err| GatewayError::InvalidFilter(err.to_string()))?;
            for (column, value) in map {
                if value.is_null() {
                    continue;
                }
                let filter: Filter = serde_json::from_value(value)
                    .map_err(|err| GatewayError::InvalidFilter(format!("{column}: {err}")))?;
                state.set_filter(&column, Some(filter));
            }
        }
        Ok(state)
    }
}

/// Inclusive row index range requested by a virtualized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRange {
    pub start_index: u64,
    pub stop_index: u64,
}

impl IndexRange {
    pub fn new(start_index: u64, stop_index: u64) -> Self {
        Self {
            start_index,
            stop_index: stop_index.max(start_index),
        }
    }

    /// Range covering `page` (1-based) of `results` rows. Fails when the range does not fit in `u64`.
    pub fn page(page: u64, results: u64) -> Result<Self, GatewayError> {
        let results = results.max(1);
        page.saturating_sub(1)
            .checked_mul(results)
            .and_then(|start| Some(Self::new(start, start.checked_add(results - 1)?)))
            .ok_or_else(|| {
                GatewayError::InvalidQueryString(format!("page={page}&results={results}"))
            })
    }

    pub fn row_count(&self) -> u64 {
        self.stop_index
            .saturating_sub(self.start_index)
            .saturating_add(1)
    }
}

/// Caller-supplied predicates appended after the filter-derived ones.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalFilter {
    Where(Value),
    Include(Value),
    Distinct(Value),
}

impl AdditionalFilter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        AdditionalFilter::Where(json!({ column: { "eq": value.into() } }))
    }

    pub fn within(column: &str, ids: &[u64]) -> Self {
        AdditionalFilter::Where(json!({ column: { "in": ids } }))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiQuery {
    pub order: Vec<String>,
    pub where_clauses: Vec<Value>,
    pub include: Vec<Value>,
    pub distinct: Option<Value>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl ApiQuery {
    pub fn with_additional(mut self, filters: &[AdditionalFilter]) -> Self {
        for filter in filters {
            match filter {
                AdditionalFilter::Where(value) => self.where_clauses.push(value.clone()),
                AdditionalFilter::Include(value) => self.include.push(value.clone()),
                AdditionalFilter::Distinct(value) => self.distinct = Some(value.clone()),
            }
        }
        self
    }

    pub fn with_range(mut self, range: IndexRange) -> Self {
        self.skip = Some(range.start_index);
        self.limit = Some(range.row_count());
        self
    }

    /// Count queries ignore ordering and paging.
    pub fn for_count(&self) -> Self {
        Self {
            order: Vec::new(),
            where_clauses: self.where_clauses.clone(),
            include: self.include.clone(),
            distinct: self.distinct.clone(),
            skip: None,
            limit: None,
        }
    }

    /// Query-string pairs in wire order; every value is JSON-encoded.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for order in &self.order {
            params.push(("order".to_string(), Value::String(order.clone()).to_string()));
        }
        for clause in &self.where_clauses {
            params.push(("where".to_string(), clause.to_string()));
        }
        for include in &self.include {
            params.push(("include".to_string(), include.to_string()));
        }
        if let Some(distinct) = &self.distinct {
            params.push(("distinct".to_string(), distinct.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip".to_string(), skip.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

pub fn encode(state: &QueryState) -> ApiQuery {
    let order = state
        .sort
        .iter()
        .map(|(column, order)| format!("{column} {order}"))
        .collect();
    let where_clauses = state
        .filters
        .iter()
        .map(|(column, filter)| where_clause(column, filter))
        .collect();
    ApiQuery {
        order,
        where_clauses,
        ..ApiQuery::default()
    }
}

fn where_clause(column: &str, filter: &Filter) -> Value {
    match filter {
        Filter::Plain(value) => json!({ column: { "like": value } }),
        Filter::Set(values) => json!({ column: { "in": values } }),
        Filter::Text(filter) => {
            let op = match filter.kind {
                TextFilterKind::Include => "like",
                TextFilterKind::Exclude => "nlike",
                TextFilterKind::Exact => "eq",
            };
            let value = filter
                .value
                .as_ref()
                .map(FilterValue::to_json)
                .unwrap_or(Value::Null);
            json!({ column: { op: value } })
        }
        Filter::Date(filter) => {
            let start = filter
                .start_date
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| format!("{value}{DAY_START}"))
                .unwrap_or_else(|| UNBOUNDED_START.to_string());
            let end = filter
                .end_date
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| format!("{value}{DAY_END}"))
                .unwrap_or_else(|| UNBOUNDED_END.to_string());
            json!({ column: { "between": [start, end] } })
        }
    }
}

/// Rebuilds the sort and filter state from wire parameters.
///
/// Only `order` and `where` take part. Predicates that no filter encodes to
/// (for example `in` over numbers) are skipped.
pub fn decode(params: &[(String, String)]) -> Result<QueryState, GatewayError> {
    let mut state = QueryState::new();
    for (key, raw) in params {
        match key.as_str() {
            "order" => {
                let token: String = serde_json::from_str(raw)
                    .map_err(|err| GatewayError::InvalidSort(err.to_string()))?;
                let (column, order) = token
                    .rsplit_once(' ')
                    .ok_or_else(|| GatewayError::InvalidSort(token.clone()))?;
                state.set_sort(column, Some(order.parse()?));
            }
            "where" => {
                let clause: Map<String, Value> = serde_json::from_str(raw)
                    .map_err(|err| GatewayError::InvalidFilter(err.to_string()))?;
                for (column, predicate) in clause {
                    match filter_from_predicate(&predicate) {
                        Some(filter) => state.set_filter(&column, Some(filter)),
                        None => tracing::debug!(column = %column, "skipping non-filter predicate"),
                    }
                }
            }
            _ => {}
        }
    }
    Ok(state)
}

fn filter_from_predicate(predicate: &Value) -> Option<Filter> {
    let object = predicate.as_object()?;
    let (op, operand) = object.iter().next()?;
    match op.as_str() {
        "like" => FilterValue::from_json(operand).map(Filter::include),
        "nlike" => FilterValue::from_json(operand).map(Filter::exclude),
        "eq" => FilterValue::from_json(operand).map(Filter::exact),
        "in" => operand
            .as_array()?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(Filter::Set),
        "between" => {
            let bounds = operand.as_array()?;
            let start = bounds.first()?.as_str()?;
            let end = bounds.get(1)?.as_str()?;
            let start_date = (start != UNBOUNDED_START)
                .then(|| start.trim_end_matches(DAY_START).to_string());
            let end_date =
                (end != UNBOUNDED_END).then(|| end.trim_end_matches(DAY_END).to_string());
            Some(Filter::Date(DateFilter {
                start_date,
                end_date,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn sort_keeps_activation_order() {
        let mut state = QueryState::new()
            .with_sort("NAME", Order::Asc)
            .with_sort("TITLE", Order::Desc);
        state.set_sort("NAME", Some(Order::Desc));
        assert_eq!(
            encode(&state).order,
            vec!["NAME desc".to_string(), "TITLE desc".to_string()]
        );

        state.set_sort("NAME", None);
        assert_eq!(encode(&state).order, vec!["TITLE desc".to_string()]);
    }

    #[test]
    fn empty_filters_are_removed() {
        let mut state = QueryState::new().with_filter("NAME", Filter::include("abc"));
        state.set_filter("NAME", Some(Filter::include("")));
        assert!(state.filters().is_empty());

        state.set_filter("TYPE", Some(Filter::Set(Vec::new())));
        state.set_filter("DATE", Some(Filter::date_range(None, None)));
        state.set_filter("OTHER", None);
        assert!(state.is_empty());
        assert!(encode(&state).to_params().is_empty());
    }

    #[test]
    fn date_range_uses_open_bounds() {
        let state = QueryState::new().with_filter("STARTDATE", Filter::date_range(Some("2019-06-10"), None));
        assert_eq!(
            encode(&state).where_clauses,
            vec![json!({"STARTDATE": {"between": ["2019-06-10 00:00:00", "9999-12-31 23:59:59"]}})]
        );
    }

    #[test]
    fn range_maps_to_skip_and_limit() {
        let query = ApiQuery::default().with_range(IndexRange::new(50, 74));
        assert_eq!(query.skip, Some(50));
        assert_eq!(query.limit, Some(25));
        assert_eq!(IndexRange::page(3, 10).unwrap(), IndexRange::new(20, 29));
        assert_eq!(IndexRange::page(0, 0).unwrap(), IndexRange::new(0, 0));
    }

    #[test]
    fn paging_past_u64_is_rejected() {
        assert_matches!(
            IndexRange::page(u64::MAX / 5, 10),
            Err(GatewayError::InvalidQueryString(_))
        );
        assert_matches!(
            IndexRange::page(2, u64::MAX),
            Err(GatewayError::InvalidQueryString(_))
        );
        let last = IndexRange::page(u64::MAX, 1).unwrap();
        assert_eq!(last.start_index, u64::MAX - 1);
        assert_eq!(IndexRange::new(0, u64::MAX).row_count(), u64::MAX);
    }

    #[test]
    fn filter_json_shapes() {
        let plain: Filter = serde_json::from_value(json!("1")).unwrap();
        assert_eq!(plain, Filter::Plain("1".to_string()));
        let set: Filter = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(set, Filter::Set(vec!["a".to_string(), "b".to_string()]));
        let text: Filter = serde_json::from_value(json!({"value": 3, "type": "exact"})).unwrap();
        assert_eq!(text, Filter::exact(FilterValue::Number(3.into())));
        let date: Filter = serde_json::from_value(json!({"endDate": "2020-01-01"})).unwrap();
        assert_eq!(date, Filter::date_range(None, Some("2020-01-01")));
    }
}
