//! Core types for the reconciliation engine.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::{self, BorrowedFormatItem};
use time::PrimitiveDateTime;

/// Stable identity of a row for the lifetime of a loaded set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column names known to the engine.
///
/// The wire names are the ones the backend emits. Columns the engine never
/// interprets are carried as [`Field::Other`] so a row survives a round trip.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    // --- Inventory ---
    DrugName,
    Barcode,
    StandardCode,
    Quantity,
    Unit,
    Cabinet,
    Row,
    Column,
    Position,
    Status,
    ExpirationDate,

    // --- Counting log ---
    Timestamp,
    DrugStandardCode,
    DrugReferCode,
    CountQuantity,
    Date,
    Time,

    // --- Order-list match results ---
    InputName,
    InputQuantity,
    MatchedName,
    MatchStandardCode,
    ProductCode,
    Manufacturer,
    ImageUrl,
    Similarity,
    MatchStatus,

    Other(String),
}

impl Field {
    /// Wire name of the column.
    pub fn as_str(&self) -> &str {
        match self {
            Field::DrugName => "drug_name",
            Field::Barcode => "barcode",
            Field::StandardCode => "standard_code",
            Field::Quantity => "quantity",
            Field::Unit => "unit",
            Field::Cabinet => "cabinet",
            Field::Row => "row",
            Field::Column => "column",
            Field::Position => "position",
            Field::Status => "status",
            Field::ExpirationDate => "expiration_date",
            Field::Timestamp => "timestamp",
            Field::DrugStandardCode => "drug_standard_code",
            Field::DrugReferCode => "drug_refer_code",
            Field::CountQuantity => "count_quantity",
            Field::Date => "date",
            Field::Time => "time",
            Field::InputName => "입력 약품명",
            Field::InputQuantity => "입력 수량",
            Field::MatchedName => "매핑 약품명",
            Field::MatchStandardCode => "표준코드",
            Field::ProductCode => "품목일련번호",
            Field::Manufacturer => "제조사",
            Field::ImageUrl => "약품 이미지",
            Field::Similarity => "유사도 점수",
            Field::MatchStatus => "매핑 여부",
            Field::Other(name) => name,
        }
    }

    /// Parse a wire name. Unknown names become [`Field::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "drug_name" => Field::DrugName,
            "barcode" => Field::Barcode,
            "standard_code" => Field::StandardCode,
            "quantity" => Field::Quantity,
            "unit" => Field::Unit,
            "cabinet" => Field::Cabinet,
            "row" => Field::Row,
            "column" => Field::Column,
            "position" => Field::Position,
            "status" => Field::Status,
            "expiration_date" => Field::ExpirationDate,
            "timestamp" => Field::Timestamp,
            "drug_standard_code" => Field::DrugStandardCode,
            "drug_refer_code" => Field::DrugReferCode,
            "count_quantity" => Field::CountQuantity,
            "date" => Field::Date,
            "time" => Field::Time,
            "입력 약품명" => Field::InputName,
            "입력 수량" => Field::InputQuantity,
            "매핑 약품명" => Field::MatchedName,
            "표준코드" => Field::MatchStandardCode,
            "품목일련번호" => Field::ProductCode,
            "제조사" => Field::Manufacturer,
            "약품 이미지" => Field::ImageUrl,
            "유사도 점수" => Field::Similarity,
            "매핑 여부" => Field::MatchStatus,
            other => Field::Other(other.to_string()),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field({})", self.as_str())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name == "id" {
            return Err(de::Error::custom("`id` is not a record field"));
        }
        Ok(Field::from_name(&name))
    }
}

/// Read a JSON value as an integer quantity.
///
/// Accepts numbers and numeric strings; fractional values are truncated.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Whether a JSON value counts as blank for key checks.
pub fn value_is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// One row of domain data.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Stable identity (assigned at load time).
    pub id: RowId,

    /// Column values.
    pub fields: BTreeMap<Field, Value>,

    /// Highlight flag for freshly pushed log rows. Not a field.
    pub is_new: bool,
}

impl Record {
    /// Create an empty record.
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            is_new: false,
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Build a record from a decoded JSON object.
    ///
    /// A non-negative integer `id` column wins; otherwise `fallback` is used.
    pub fn from_object(mut object: Map<String, Value>, fallback: RowId) -> Self {
        let id = object
            .remove("id")
            .and_then(|v| v.as_u64())
            .map(RowId)
            .unwrap_or(fallback);

        let fields = object
            .into_iter()
            .map(|(name, value)| (Field::from_name(&name), value))
            .collect();

        Self {
            id,
            fields,
            is_new: false,
        }
    }

    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.fields.insert(field, value.into());
    }

    /// String value of a field, if it holds one.
    pub fn text(&self, field: &Field) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Integer value of a field (numbers or numeric strings).
    pub fn integer(&self, field: &Field) -> Option<i64> {
        self.fields.get(field).and_then(value_as_i64)
    }

    /// True if both records carry exactly the same column set.
    pub fn same_shape(&self, other: &Record) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.keys().zip(other.fields.keys()).all(|(a, b)| a == b)
    }

    /// Columns whose values differ from `other`.
    pub fn changed_fields(&self, other: &Record) -> Vec<Field> {
        self.fields
            .iter()
            .filter(|(field, value)| other.fields.get(*field) != Some(*value))
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// True if the record carries exactly the given columns.
    pub fn has_columns(&self, columns: &[Field]) -> bool {
        self.fields.len() == columns.len() && columns.iter().all(|c| self.fields.contains_key(c))
    }

    /// Reshape this record to the given column set.
    ///
    /// Missing columns become `null`; columns outside the set are dropped.
    pub fn conform_to(&mut self, columns: &[Field]) {
        self.fields.retain(|field, _| columns.contains(field));
        for field in columns {
            self.fields.entry(field.clone()).or_insert(Value::Null);
        }
    }

    /// Column names in order.
    pub fn columns(&self) -> Vec<Field> {
        self.fields.keys().cloned().collect()
    }

    /// Encode as the flat JSON object the backend expects.
    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("id".to_string(), Value::from(self.id.0));
        for (field, value) in &self.fields {
            object.insert(field.as_str().to_string(), value.clone());
        }
        Value::Object(object)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

/// A server-pushed notification describing a change to the record set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Server-assigned id (present for log events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Device timestamp, `YYYYMMDD_HHMMSS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Everything else in the frame.
    #[serde(flatten)]
    pub fields: BTreeMap<Field, Value>,
}

impl MutationEvent {
    /// Decode a text frame.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &Field) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    pub fn integer(&self, field: &Field) -> Option<i64> {
        self.fields.get(field).and_then(value_as_i64)
    }
}

/// How a live event is merged into the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Decrement a quantity in place on the row matched by join key.
    Overlay,
    /// Insert as a new row at the head of a capped log.
    Prepend,
}

/// Real-time connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Connecting,
    Open,
    Closed,
}

impl ConnectivityState {
    /// Status chip label.
    pub fn indicator(self) -> &'static str {
        match self {
            ConnectivityState::Open => "LIVE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Closed => "DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Connecting => write!(f, "connecting"),
            ConnectivityState::Open => write!(f, "open"),
            ConnectivityState::Closed => write!(f, "closed"),
        }
    }
}

const DEVICE_TIMESTAMP: &str = "[year][month][day]_[hour][minute][second]";
const DISPLAY_DATE: &str = "[year]-[month]-[day]";
const DISPLAY_TIME: &str = "[hour repr:12 padding:zero]:[minute] [period case:upper]";

fn describe(format: &str) -> Option<Vec<BorrowedFormatItem<'_>>> {
    format_description::parse(format).ok()
}

/// Split a device timestamp into display date and 12-hour time.
///
/// `"20250314_134502"` becomes `("2025-03-14", "01:45 PM")`.
pub fn device_timestamp_display(raw: &str) -> Option<(String, String)> {
    let parsed = PrimitiveDateTime::parse(raw.trim(), &describe(DEVICE_TIMESTAMP)?).ok()?;
    let date = parsed.format(&describe(DISPLAY_DATE)?).ok()?;
    let time = parsed.format(&describe(DISPLAY_TIME)?).ok()?;
    Some((date, time))
}
