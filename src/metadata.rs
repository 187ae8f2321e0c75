//! Dataset and field metadata collaborators
//!
//! The compiler never reads shard data; it only needs to know which concrete
//! field a name refers to in each dataset, and whether that field carries
//! integer or string terms. Both lookups are injected through the traits
//! defined here. `MapResolver` and `SchemaMetadata` are simple table-backed
//! implementations suitable for embedding callers and tests.

use crate::error::{CompileError, CompileResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// The term type of a field within one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Integer-valued terms
    Int,
    /// String-valued terms
    String,
}

/// A resolved field reference: the concrete field name per dataset
///
/// One bare name in a query may map to differently-named fields across the
/// datasets in scope. Keys are dataset display names, values are the actual
/// field names in that dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSet {
    /// Dataset display name -> actual field name
    pub fields: BTreeMap<String, String>,
}

impl FieldSet {
    /// Create a field set from an explicit mapping
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Create a field set covering a single dataset
    pub fn singleton(dataset: impl Into<String>, field: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(dataset.into(), field.into());
        Self { fields }
    }

    /// Datasets this field reference covers
    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Actual field name within one dataset
    pub fn field_for(&self, dataset: &str) -> Option<&str> {
        self.fields.get(dataset).map(String::as_str)
    }

    /// A display name for error messages and plan output
    pub fn name(&self) -> String {
        let mut names: Vec<&str> = self.fields.values().map(String::as_str).collect();
        names.dedup();
        names.join("/")
    }

    /// Restrict this field set to the given datasets
    pub fn restrict_to(&self, scope: &[String]) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(ds, _)| scope.iter().any(|s| s == *ds))
                .map(|(ds, f)| (ds.clone(), f.clone()))
                .collect(),
        }
    }
}

/// Resolves bare names from the query text to concrete fields and datasets
pub trait FieldResolver {
    /// Resolve a bare field name to per-dataset concrete fields
    fn resolve(&self, name: &str) -> CompileResult<FieldSet>;

    /// Resolve a raw FROM-clause token to a canonical dataset name
    fn resolve_dataset_token(&self, token: &str) -> CompileResult<String>;

    /// Canonicalize an already-known dataset name
    fn resolve_dataset(&self, name: &str) -> CompileResult<String>;
}

/// A resolver narrowed to a subset of datasets
///
/// Per-dataset clauses (field aliases, a dataset-local WHERE) must not see
/// fields from sibling datasets; they resolve through one of these.
pub struct ScopedFieldResolver<'a> {
    inner: &'a dyn FieldResolver,
    scope: Vec<String>,
}

impl<'a> ScopedFieldResolver<'a> {
    /// Narrow `inner` to the given dataset display names
    pub fn new(inner: &'a dyn FieldResolver, scope: Vec<String>) -> Self {
        Self { inner, scope }
    }
}

impl FieldResolver for ScopedFieldResolver<'_> {
    fn resolve(&self, name: &str) -> CompileResult<FieldSet> {
        let resolved = self.inner.resolve(name)?.restrict_to(&self.scope);
        if resolved.fields.is_empty() {
            return Err(CompileError::UnknownField(name.to_string()));
        }
        Ok(resolved)
    }

    fn resolve_dataset_token(&self, token: &str) -> CompileResult<String> {
        self.inner.resolve_dataset_token(token)
    }

    fn resolve_dataset(&self, name: &str) -> CompileResult<String> {
        self.inner.resolve_dataset(name)
    }
}

/// Table-backed field resolver
///
/// Maps each known field name to its concrete name per dataset. Dataset
/// tokens resolve case-insensitively against the dataset list.
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    /// Known dataset names
    pub datasets: Vec<String>,
    /// Field name -> (dataset -> actual field name)
    pub fields: BTreeMap<String, BTreeMap<String, String>>,
}

impl MapResolver {
    /// Create a resolver knowing the given datasets, with no fields yet
    pub fn new(datasets: &[&str]) -> Self {
        Self {
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
            fields: BTreeMap::new(),
        }
    }

    /// Register a field present under the same name in every dataset
    pub fn field(mut self, name: &str) -> Self {
        let per_dataset = self
            .datasets
            .iter()
            .map(|d| (d.clone(), name.to_string()))
            .collect();
        self.fields.insert(name.to_string(), per_dataset);
        self
    }

    /// Register a field with a dataset-specific concrete name
    pub fn field_in(mut self, name: &str, dataset: &str, actual: &str) -> Self {
        self.fields
            .entry(name.to_string())
            .or_default()
            .insert(dataset.to_string(), actual.to_string());
        self
    }
}

impl FieldResolver for MapResolver {
    fn resolve(&self, name: &str) -> CompileResult<FieldSet> {
        self.fields
            .get(name)
            .map(|per_dataset| FieldSet::new(per_dataset.clone()))
            .ok_or_else(|| CompileError::UnknownField(name.to_string()))
    }

    fn resolve_dataset_token(&self, token: &str) -> CompileResult<String> {
        self.datasets
            .iter()
            .find(|d| d.eq_ignore_ascii_case(token))
            .cloned()
            .ok_or_else(|| CompileError::UnknownDataset(token.to_string()))
    }

    fn resolve_dataset(&self, name: &str) -> CompileResult<String> {
        self.resolve_dataset_token(name)
    }
}

/// Schema lookup: the term type of a field within a dataset
pub trait DatasetsMetadata {
    /// Type of `field` in `dataset`, or `None` if unknown
    fn field_type(&self, dataset: &str, field: &str) -> Option<FieldType>;
}

/// Table-backed schema metadata
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    /// Dataset -> (field -> type)
    pub types: BTreeMap<String, BTreeMap<String, FieldType>>,
}

impl SchemaMetadata {
    /// Create empty metadata (every field unknown, treated as string-typed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the type of a field
    pub fn with_field(mut self, dataset: &str, field: &str, ty: FieldType) -> Self {
        self.types
            .entry(dataset.to_string())
            .or_default()
            .insert(field.to_string(), ty);
        self
    }
}

impl DatasetsMetadata for SchemaMetadata {
    fn field_type(&self, dataset: &str, field: &str) -> Option<FieldType> {
        self.types.get(dataset).and_then(|fields| fields.get(field)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_set_singleton() {
        let fs = FieldSet::singleton("logs", "country");
        assert_eq!(fs.field_for("logs"), Some("country"));
        assert_eq!(fs.field_for("other"), None);
        assert_eq!(fs.name(), "country");
    }

    #[test]
    fn test_field_set_name_joins_distinct() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), "ctry".to_string());
        m.insert("b".to_string(), "country".to_string());
        let fs = FieldSet::new(m);
        assert_eq!(fs.name(), "ctry/country");
    }

    #[test]
    fn test_map_resolver_resolves_registered_field() {
        let resolver = MapResolver::new(&["logs", "clicks"]).field("country");
        let fs = resolver.resolve("country").unwrap();
        assert_eq!(fs.field_for("logs"), Some("country"));
        assert_eq!(fs.field_for("clicks"), Some("country"));
    }

    #[test]
    fn test_map_resolver_unknown_field() {
        let resolver = MapResolver::new(&["logs"]);
        assert!(matches!(
            resolver.resolve("nope"),
            Err(CompileError::UnknownField(_))
        ));
    }

    #[test]
    fn test_dataset_token_case_insensitive() {
        let resolver = MapResolver::new(&["Logs"]);
        assert_eq!(resolver.resolve_dataset_token("logs").unwrap(), "Logs");
        assert!(resolver.resolve_dataset_token("missing").is_err());
    }

    #[test]
    fn test_scoped_resolver_narrows() {
        let resolver = MapResolver::new(&["logs", "clicks"]).field("country");
        let scoped = ScopedFieldResolver::new(&resolver, vec!["logs".to_string()]);
        let fs = scoped.resolve("country").unwrap();
        assert_eq!(fs.datasets().collect::<Vec<_>>(), vec!["logs"]);
    }

    #[test]
    fn test_scoped_resolver_empty_scope_is_unknown() {
        let resolver = MapResolver::new(&["logs"]).field_in("ctr", "logs", "ctr");
        let scoped = ScopedFieldResolver::new(&resolver, vec!["clicks".to_string()]);
        assert!(scoped.resolve("ctr").is_err());
    }

    #[test]
    fn test_schema_metadata_lookup() {
        let meta = SchemaMetadata::new()
            .with_field("logs", "clicks", FieldType::Int)
            .with_field("logs", "country", FieldType::String);
        assert_eq!(meta.field_type("logs", "clicks"), Some(FieldType::Int));
        assert_eq!(meta.field_type("logs", "country"), Some(FieldType::String));
        assert_eq!(meta.field_type("logs", "missing"), None);
    }
}
