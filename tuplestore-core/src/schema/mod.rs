//! Schema model: field trees and their decomposition into leaf columns
//!
//! A [`Model`] is frozen at construction. Writers and readers share it
//! immutably; the column list and annotated field nodes are computed once.

mod column;
mod field;

pub use column::{decompose, ColumnId, ColumnKind, ColumnSpec, FieldNode};
pub use field::{validate_name, Field, PrimitiveKind};

use crate::{Result, TupleError};
use std::collections::HashSet;

/// Ordered set of uniquely named top-level fields
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    fields: Vec<(String, Field)>,
    columns: Vec<ColumnSpec>,
    nodes: Vec<FieldNode>,
}

impl Model {
    /// Create a model from named fields
    pub fn new(fields: Vec<(String, Field)>) -> Result<Self> {
        let mut seen = HashSet::new();
        for (name, field) in &fields {
            validate_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(TupleError::Schema(format!("duplicate field name: {}", name)));
            }
            field.validate()?;
        }

        let mut columns = Vec::new();
        let nodes = fields
            .iter()
            .enumerate()
            .map(|(i, (name, field))| column::decompose_into(i, name.clone(), field, &mut columns))
            .collect();
        column::check_unique_paths(&columns)?;

        Ok(Self {
            fields,
            columns,
            nodes,
        })
    }

    /// Start building a model
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Copy of this model with one more field appended
    pub fn with_field(&self, name: impl Into<String>, field: Field) -> Result<Self> {
        let mut fields = self.fields.clone();
        fields.push((name.into(), field));
        Self::new(fields)
    }

    /// Top-level fields in declaration order
    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }

    /// Index of a top-level field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    /// Look up a top-level field
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// All leaf columns in decomposition order
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Look up a column by path
    pub fn column_by_path(&self, path: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.path == path)
    }

    /// Annotated node of a top-level field
    pub fn node(&self, field_index: usize) -> &FieldNode {
        &self.nodes[field_index]
    }

    /// Annotated nodes of all top-level fields
    pub fn nodes(&self) -> &[FieldNode] {
        &self.nodes
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the model has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON description of the field tree
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.fields)
            .map_err(|e| TupleError::Schema(e.to_string()))
    }

    /// Rebuild a model from a JSON description produced by [`Model::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let fields: Vec<(String, Field)> =
            serde_json::from_str(json).map_err(|e| TupleError::Schema(e.to_string()))?;
        Self::new(fields)
    }
}

/// Incremental model construction
#[derive(Debug, Default, Clone)]
pub struct ModelBuilder {
    fields: Vec<(String, Field)>,
}

impl ModelBuilder {
    /// Add a field
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Add a primitive field
    pub fn scalar(self, name: impl Into<String>, kind: PrimitiveKind) -> Self {
        self.field(name, Field::Scalar(kind))
    }

    /// Freeze the model
    pub fn build(self) -> Result<Model> {
        Model::new(self.fields)
    }
}
