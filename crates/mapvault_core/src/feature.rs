//! Tables, features and feature changes.

use crate::error::{CoreError, CoreResult};
use crate::geometry::{Geometry, GeometryType};
use crate::schema::{AttributeValue, FieldDef, TableSchema};
use crate::types::{FeatureId, GlobalId, TableId};
use geo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Handle to a table of a dataset.
///
/// Cheap to clone. All handles for the same table share one schema.
#[derive(Clone)]
pub struct Table {
    id: TableId,
    schema: Arc<TableSchema>,
}

impl Table {
    pub(crate) fn new(id: TableId, schema: Arc<TableSchema>) -> Self {
        Self { id, schema }
    }

    /// Returns the table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns the remote layer id.
    #[must_use]
    pub fn layer_id(&self) -> u32 {
        self.schema.layer_id
    }

    /// Returns the geometry type rows must have.
    #[must_use]
    pub fn geometry_type(&self) -> GeometryType {
        self.schema.geometry_type
    }

    /// Returns the spatial extent.
    #[must_use]
    pub fn extent(&self) -> Rect<f64> {
        self.schema.extent
    }

    /// Returns the attribute fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.schema.fields
    }

    /// Returns the full schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Returns true if both handles share the same loaded schema.
    #[must_use]
    pub fn same_schema(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.schema.name)
            .field("geometry_type", &self.schema.geometry_type)
            .finish_non_exhaustive()
    }
}

/// Geometry and attributes of a row, as persisted and exchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureData {
    /// The geometry, if one has been set.
    pub geometry: Option<Geometry>,
    /// Attribute values by field name.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl FeatureData {
    /// Creates row data with a geometry and no attributes.
    #[must_use]
    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute without checking it against a schema.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// One row of a table.
///
/// A feature created with [`crate::FeatureMutator::create_feature`] has no
/// [`FeatureId`] until it is added; its [`GlobalId`] is fixed at creation.
#[derive(Debug, Clone)]
pub struct Feature {
    table: Table,
    id: Option<FeatureId>,
    global_id: GlobalId,
    data: FeatureData,
}

impl Feature {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            id: None,
            global_id: GlobalId::new(),
            data: FeatureData::default(),
        }
    }

    pub(crate) fn stored(table: Table, id: FeatureId, global_id: GlobalId, data: FeatureData) -> Self {
        Self {
            table,
            id: Some(id),
            global_id,
            data,
        }
    }

    pub(crate) fn assign_id(&mut self, id: FeatureId) {
        self.id = Some(id);
    }

    /// Returns the owning table.
    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Returns the local id, or `None` if the feature was never added.
    #[must_use]
    pub fn id(&self) -> Option<FeatureId> {
        self.id
    }

    /// Returns the global id.
    #[must_use]
    pub fn global_id(&self) -> GlobalId {
        self.global_id
    }

    /// Returns the geometry.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.data.geometry.as_ref()
    }

    /// Sets the geometry. Validation happens when the feature is added.
    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.data.geometry = Some(geometry);
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.data.attributes.get(name)
    }

    /// Returns all attribute values.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.data.attributes
    }

    /// Sets an attribute after checking it against the table schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for an unknown field or a value of the
    /// wrong type.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) -> CoreResult<()> {
        let value = self.table.schema.coerce(name, value.into())?;
        self.data.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Returns the row data.
    #[must_use]
    pub fn data(&self) -> &FeatureData {
        &self.data
    }

    /// Checks geometry presence, shape and extent against the owning table.
    pub(crate) fn validate(&self, tolerance: f64) -> CoreResult<()> {
        let geometry = self
            .data
            .geometry
            .as_ref()
            .ok_or_else(|| CoreError::validation("feature has no geometry"))?;
        if geometry.geometry_type() != self.table.geometry_type() {
            return Err(CoreError::validation(format!(
                "table {} holds {} geometries, got {}",
                self.table.name(),
                self.table.geometry_type(),
                geometry.geometry_type()
            )));
        }
        geometry.validate()?;
        geometry.check_within(&self.table.extent(), tolerance)
    }
}

/// What happened to a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// The feature was created.
    Insert(FeatureData),
    /// The feature was modified.
    Update(FeatureData),
    /// The feature was removed.
    Delete,
}

impl ChangeOp {
    /// Returns the row data for inserts and updates.
    #[must_use]
    pub fn data(&self) -> Option<&FeatureData> {
        match self {
            Self::Insert(data) | Self::Update(data) => Some(data),
            Self::Delete => None,
        }
    }

    /// Short name of the operation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }
}

/// A change to one feature, keyed by table name and global id.
///
/// Used for the local delta and for changes exchanged with the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureChange {
    /// Table name.
    pub table: String,
    /// Global id of the feature.
    pub global_id: GlobalId,
    /// The change.
    pub op: ChangeOp,
}

impl FeatureChange {
    /// Creates an insert.
    pub fn insert(table: impl Into<String>, global_id: GlobalId, data: FeatureData) -> Self {
        Self {
            table: table.into(),
            global_id,
            op: ChangeOp::Insert(data),
        }
    }

    /// Creates an update.
    pub fn update(table: impl Into<String>, global_id: GlobalId, data: FeatureData) -> Self {
        Self {
            table: table.into(),
            global_id,
            op: ChangeOp::Update(data),
        }
    }

    /// Creates a delete.
    pub fn delete(table: impl Into<String>, global_id: GlobalId) -> Self {
        Self {
            table: table.into(),
            global_id,
            op: ChangeOp::Delete,
        }
    }
}
