use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
#[value(rename_all = "camelCase")]
pub enum EntityType {
    Investigation,
    Dataset,
    Datafile,
    Instrument,
    FacilityCycle,
    Facility,
    Study,
    StudyInvestigation,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Investigation => "investigation",
            EntityType::Dataset => "dataset",
            EntityType::Datafile => "datafile",
            EntityType::Instrument => "instrument",
            EntityType::FacilityCycle => "facilityCycle",
            EntityType::Facility => "facility",
            EntityType::Study => "study",
            EntityType::StudyInvestigation => "studyInvestigation",
        }
    }

    /// Collection segment of the catalog API path.
    pub fn plural(self) -> &'static str {
        match self {
            EntityType::Investigation => "investigations",
            EntityType::Dataset => "datasets",
            EntityType::Datafile => "datafiles",
            EntityType::Instrument => "instruments",
            EntityType::FacilityCycle => "facilitycycles",
            EntityType::Facility => "facilities",
            EntityType::Study => "studies",
            EntityType::StudyInvestigation => "studyinvestigations",
        }
    }

    pub fn is_cartable(self) -> bool {
        matches!(
            self,
            EntityType::Investigation | EntityType::Dataset | EntityType::Datafile
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "investigation" => Ok(EntityType::Investigation),
            "dataset" => Ok(EntityType::Dataset),
            "datafile" => Ok(EntityType::Datafile),
            "instrument" => Ok(EntityType::Instrument),
            "facilityCycle" | "facilitycycle" => Ok(EntityType::FacilityCycle),
            "facility" => Ok(EntityType::Facility),
            "study" => Ok(EntityType::Study),
            "studyInvestigation" | "studyinvestigation" => Ok(EntityType::StudyInvestigation),
            _ => Err(GatewayError::InvalidEntityType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Investigation {
    pub id: u64,
    pub title: String,
    pub name: String,
    pub visit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rb_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub releasedate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub investigationinstrument: Vec<InvestigationInstrument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub investigationuser: Vec<InvestigationUser>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub studyinvestigation: Vec<StudyInvestigation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<Facility>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Dataset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub mod_time: String,
    #[serde(default)]
    pub create_time: String,
    pub investigation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datafile_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasettype: Option<DatasetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Datafile {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub mod_time: String,
    #[serde(default)]
    pub create_time: String,
    pub dataset_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Instrument {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "TYPE")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InvestigationInstrument {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InvestigationUser {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "USER_")]
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct User {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatasetType {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FacilityCycle {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Facility {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daysuntilrelease: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facilitycycle: Vec<FacilityCycle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Study {
    pub id: u64,
    pub pid: String,
    pub name: String,
    #[serde(default)]
    pub mod_time: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StudyInvestigation {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study: Option<Study>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation: Option<Box<Investigation>>,
}

/// Read-only snapshot of a catalog record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    Investigation(Investigation),
    Dataset(Dataset),
    Datafile(Datafile),
    Instrument(Instrument),
    FacilityCycle(FacilityCycle),
    Facility(Facility),
    Study(Study),
    StudyInvestigation(StudyInvestigation),
}

impl Entity {
    /// Decodes a catalog row; the entity type is known from the endpoint, never from the row.
    pub fn from_value(entity_type: EntityType, value: Value) -> Result<Self, GatewayError> {
        let malformed = |err: serde_json::Error| {
            GatewayError::MalformedResponse(format!("{entity_type}: {err}"))
        };
        let entity = match entity_type {
            EntityType::Investigation => {
                Entity::Investigation(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityType::Dataset => Entity::Dataset(serde_json::from_value(value).map_err(malformed)?),
            EntityType::Datafile => {
                Entity::Datafile(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityType::Instrument => {
                Entity::Instrument(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityType::FacilityCycle => {
                Entity::FacilityCycle(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityType::Facility => {
                Entity::Facility(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityType::Study => Entity::Study(serde_json::from_value(value).map_err(malformed)?),
            EntityType::StudyInvestigation => {
                Entity::StudyInvestigation(serde_json::from_value(value).map_err(malformed)?)
            }
        };
        Ok(entity)
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Investigation(_) => EntityType::Investigation,
            Entity::Dataset(_) => EntityType::Dataset,
            Entity::Datafile(_) => EntityType::Datafile,
            Entity::Instrument(_) => EntityType::Instrument,
            Entity::FacilityCycle(_) => EntityType::FacilityCycle,
            Entity::Facility(_) => EntityType::Facility,
            Entity::Study(_) => EntityType::Study,
            Entity::StudyInvestigation(_) => EntityType::StudyInvestigation,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Entity::Investigation(item) => item.id,
            Entity::Dataset(item) => item.id,
            Entity::Datafile(item) => item.id,
            Entity::Instrument(item) => item.id,
            Entity::FacilityCycle(item) => item.id,
            Entity::Facility(item) => item.id,
            Entity::Study(item) => item.id,
            Entity::StudyInvestigation(item) => item.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Entity::Investigation(item) => Some(&item.name),
            Entity::Dataset(item) => Some(&item.name),
            Entity::Datafile(item) => Some(&item.name),
            Entity::Instrument(item) => Some(&item.name),
            Entity::FacilityCycle(item) => Some(&item.name),
            Entity::Facility(item) => Some(&item.name),
            Entity::Study(item) => Some(&item.name),
            Entity::StudyInvestigation(item) => {
                item.study.as_ref().map(|study| study.name.as_str())
            }
        }
    }

    /// Walks a dot-separated column path such as `STUDYINVESTIGATION.STUDY.PID`.
    /// Array relations resolve through their first element.
    pub fn resolve(&self, path: &str) -> CellValue {
        match serde_json::to_value(self) {
            Ok(value) => resolve_path(&value, path),
            Err(_) => CellValue::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Absent,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, CellValue::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Absent => Ok(()),
            CellValue::Text(value) => write!(f, "{value}"),
            CellValue::Number(value) => write!(f, "{value}"),
            CellValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

pub fn resolve_path(root: &Value, path: &str) -> CellValue {
    let mut current = root;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        if let Value::Array(items) = current {
            match items.first() {
                Some(first) => current = first,
                None => return CellValue::Absent,
            }
        }
        match current.get(segment) {
            Some(next) => current = next,
            None => return CellValue::Absent,
        }
    }
    if let Value::Array(items) = current {
        match items.first() {
            Some(first) => current = first,
            None => return CellValue::Absent,
        }
    }
    match current {
        Value::String(value) => CellValue::Text(value.clone()),
        Value::Number(value) => value
            .as_f64()
            .map(CellValue::Number)
            .unwrap_or(CellValue::Absent),
        Value::Bool(value) => CellValue::Bool(*value),
        _ => CellValue::Absent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartEntityType {
    Investigation,
    Dataset,
    Datafile,
}

impl CartEntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            CartEntityType::Investigation => "investigation",
            CartEntityType::Dataset => "dataset",
            CartEntityType::Datafile => "datafile",
        }
    }
}

impl fmt::Display for CartEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<EntityType> for CartEntityType {
    type Error = GatewayError;

    fn try_from(value: EntityType) -> Result<Self, Self::Error> {
        match value {
            EntityType::Investigation => Ok(CartEntityType::Investigation),
            EntityType::Dataset => Ok(CartEntityType::Dataset),
            EntityType::Datafile => Ok(CartEntityType::Datafile),
            other => Err(GatewayError::InvalidEntityType(other.to_string())),
        }
    }
}

impl FromStr for CartEntityType {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<EntityType>()?.try_into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub entity_id: u64,
    pub entity_type: CartEntityType,
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_entities: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadCart {
    #[serde(default)]
    pub cart_items: Vec<CartItem>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub facility_name: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub entity_id: u64,
    pub entity_type: CartEntityType,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Preparing,
    Restoring,
    Paused,
    Complete,
    Expired,
    Other(String),
}

impl DownloadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DownloadStatus::Preparing => "PREPARING",
            DownloadStatus::Restoring => "RESTORING",
            DownloadStatus::Paused => "PAUSED",
            DownloadStatus::Complete => "COMPLETE",
            DownloadStatus::Expired => "EXPIRED",
            DownloadStatus::Other(value) => value,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DownloadStatus::Complete => "Available",
            DownloadStatus::Restoring => "Restoring from Tape",
            DownloadStatus::Preparing => "Preparing",
            DownloadStatus::Expired => "Expired",
            DownloadStatus::Paused => "Paused",
            DownloadStatus::Other(_) => "N/A",
        }
    }
}

impl From<&str> for DownloadStatus {
    fn from(value: &str) -> Self {
        match value {
            "PREPARING" => DownloadStatus::Preparing,
            "RESTORING" => DownloadStatus::Restoring,
            "PAUSED" => DownloadStatus::Paused,
            "COMPLETE" => DownloadStatus::Complete,
            "EXPIRED" => DownloadStatus::Expired,
            other => DownloadStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DownloadStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DownloadStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(DownloadStatus::from(value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id: u64,
    #[serde(default)]
    pub prepared_id: String,
    #[serde(default)]
    pub file_name: String,
    pub status: DownloadStatus,
    #[serde(default)]
    pub transport: String,
    #[serde(default)]
    pub is_two_level: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_email_sent: bool,
    #[serde(default)]
    pub download_items: Vec<DownloadItem>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub facility_name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Download {
    /// String view of a listing column, as filtered and sorted by the status table.
    pub fn column(&self, column: &str) -> Option<String> {
        match column {
            "fileName" => Some(self.file_name.clone()),
            "transport" => Some(self.transport.clone()),
            "status" => Some(self.status.as_str().to_string()),
            "createdAt" => Some(self.created_at.clone()),
            "preparedId" => Some(self.prepared_id.clone()),
            "facilityName" => Some(self.facility_name.clone()),
            "fullName" => Some(self.full_name.clone()),
            "userName" => Some(self.user_name.clone()),
            "email" => self.email.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_entity_type() {
        let kind: EntityType = "facilityCycle".parse().unwrap();
        assert_eq!(kind.plural(), "facilitycycles");
        let err = "sample".parse::<EntityType>().unwrap_err();
        assert_matches!(err, GatewayError::InvalidEntityType(_));
    }

    #[test]
    fn cart_type_rejects_non_cartable() {
        let err = CartEntityType::try_from(EntityType::Instrument).unwrap_err();
        assert_matches!(err, GatewayError::InvalidEntityType(_));
    }

    #[test]
    fn resolve_nested_path() {
        let entity = Entity::from_value(
            EntityType::Investigation,
            json!({
                "ID": 1,
                "TITLE": "Test 1",
                "NAME": "Test 1",
                "VISIT_ID": "1",
                "STUDYINVESTIGATION": [
                    {"ID": 6, "STUDY": {"ID": 7, "PID": "study pid", "NAME": "study"}}
                ]
            }),
        )
        .unwrap();

        assert_eq!(
            entity.resolve("STUDYINVESTIGATION.STUDY.PID"),
            CellValue::Text("study pid".to_string())
        );
        assert!(entity.resolve("INVESTIGATIONINSTRUMENT.INSTRUMENT.NAME").is_absent());
        assert!(entity.resolve("RB_NUMBER").is_absent());
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status: DownloadStatus = serde_json::from_value(json!("QUEUED")).unwrap();
        assert_eq!(status, DownloadStatus::Other("QUEUED".to_string()));
        assert_eq!(status.label(), "N/A");
    }
}
