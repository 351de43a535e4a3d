//! Table schemas and attribute values.

use crate::error::{CoreError, CoreResult};
use crate::geometry::GeometryType;
use chrono::NaiveDate;
use geo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Storage type of an attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float. Also accepts integer values.
    Float,
    /// UTF-8 text.
    Text,
    /// Calendar date.
    Date,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Date => "date",
        };
        f.write_str(name)
    }
}

/// One attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name, unique within the table.
    pub name: String,
    /// Accepted value type.
    pub field_type: FieldType,
    /// Whether `Null` is accepted.
    pub nullable: bool,
}

impl FieldDef {
    /// Creates a nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }

    /// Marks the field as not accepting `Null`.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// No value.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Date value.
    Date(NaiveDate),
}

impl AttributeValue {
    /// Returns the field type this value naturally belongs to.
    #[must_use]
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(FieldType::Integer),
            Self::Float(_) => Some(FieldType::Float),
            Self::Text(_) => Some(FieldType::Text),
            Self::Date(_) => Some(FieldType::Date),
        }
    }

    /// Returns the integer, if this is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the numeric value as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Date(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for AttributeValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

/// Definition of a table: its layer, geometry kind, fields and extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Layer id on the remote service.
    pub layer_id: u32,
    /// Table name, unique within the dataset.
    pub name: String,
    /// Geometry kind every row must have.
    pub geometry_type: GeometryType,
    /// Attribute columns.
    pub fields: Vec<FieldDef>,
    /// Spatial extent of the table.
    pub extent: Rect<f64>,
}

impl TableSchema {
    /// Creates a schema with no fields.
    pub fn new(
        layer_id: u32,
        name: impl Into<String>,
        geometry_type: GeometryType,
        extent: Rect<f64>,
    ) -> Self {
        Self {
            layer_id,
            name: name.into(),
            geometry_type,
            fields: Vec::new(),
            extent,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks a value against a field and returns the value as stored.
    ///
    /// Integers written to a float field are stored as floats.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the field is unknown, the value is
    /// `Null` for a required field, or the value type is not accepted.
    pub fn coerce(&self, name: &str, value: AttributeValue) -> CoreResult<AttributeValue> {
        let field = self.field(name).ok_or_else(|| {
            CoreError::schema(format!("table {} has no field {name:?}", self.name))
        })?;

        match (field.field_type, value) {
            (_, AttributeValue::Null) if field.nullable => Ok(AttributeValue::Null),
            (_, AttributeValue::Null) => Err(CoreError::schema(format!(
                "field {name:?} does not accept null"
            ))),
            (FieldType::Float, AttributeValue::Integer(v)) => Ok(AttributeValue::Float(v as f64)),
            (expected, value) if value.field_type() == Some(expected) => Ok(value),
            (expected, value) => Err(CoreError::schema(format!(
                "field {name:?} expects {expected}, got {value}"
            ))),
        }
    }

    /// Checks a whole attribute map, as received from the remote source.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for the first attribute that does not fit.
    pub fn coerce_all(
        &self,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> CoreResult<BTreeMap<String, AttributeValue>> {
        attributes
            .into_iter()
            .map(|(name, value)| {
                let value = self.coerce(&name, value)?;
                Ok((name, value))
            })
            .collect()
    }
}
