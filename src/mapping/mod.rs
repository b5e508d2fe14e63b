//! Mapper metadata
//!
//! A [`Mapper`] describes one mapped entity type: its declared name, table,
//! columns, primary key, optional base type, hybrid properties, and the
//! relationship attributes and dependency processors instrumented onto it.
//! Mappers are collected in a [`MapperRegistry`], the scope in which
//! discriminator values are resolved back to types.

mod registry;

pub use registry::MapperRegistry;

use crate::dependency::{CascadeKind, DependencyProcessor};
use crate::error::{GenericRelationError, Result};
use crate::hybrid::HybridProperty;
use crate::instance::Instance;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// A mapped column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
	name: String,
	primary_key: bool,
	autoincrement: bool,
	nullable: bool,
}

impl Column {
	/// Create a nullable, non-key column
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::mapping::Column;
	///
	/// let id = Column::new("id").primary_key();
	/// assert!(id.is_primary_key());
	/// assert!(id.is_autoincrement());
	/// assert!(!id.is_nullable());
	/// ```
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			primary_key: false,
			autoincrement: false,
			nullable: true,
		}
	}

	/// Mark as (part of) the primary key.
	///
	/// Key columns are not nullable and autoincrement by default; composite
	/// keys should call [`Column::autoincrement`] with `false`.
	pub fn primary_key(mut self) -> Self {
		self.primary_key = true;
		self.autoincrement = true;
		self.nullable = false;
		self
	}

	pub fn autoincrement(mut self, autoincrement: bool) -> Self {
		self.autoincrement = autoincrement;
		self
	}

	pub fn nullable(mut self, nullable: bool) -> Self {
		self.nullable = nullable;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_primary_key(&self) -> bool {
		self.primary_key
	}

	pub fn is_autoincrement(&self) -> bool {
		self.autoincrement
	}

	pub fn is_nullable(&self) -> bool {
		self.nullable
	}
}

/// Instrumented relationship attribute on a mapper.
///
/// This is the per-attribute implementation that [`Instance::related`] and
/// [`Instance::set_related`] dispatch to.
pub trait RelationshipAttribute: Send + Sync {
	/// Attribute key on the parent type
	fn key(&self) -> &str;

	/// Resolve configuration that depends on other mappers. Idempotent.
	fn configure(&self) -> Result<()>;

	/// Read the related instance, loading it through the owning session if needed
	fn get(&self, instance: &Instance) -> Result<Option<Instance>>;

	/// Assign the related instance
	fn set(&self, instance: &Instance, value: Option<Instance>) -> Result<()>;

	/// Cascade targets reachable from `instance` without loading anything
	fn cascade_iterator(
		&self,
		kind: CascadeKind,
		instance: &Instance,
		visited: &mut HashSet<crate::instance::InstanceId>,
	) -> Vec<Instance>;
}

/// Metadata for one mapped type
pub struct Mapper {
	name: String,
	table: String,
	columns: IndexMap<String, Column>,
	primary_key: Vec<String>,
	inherits: Option<String>,
	hybrids: IndexMap<String, HybridProperty>,
	attributes: RwLock<IndexMap<String, Arc<dyn RelationshipAttribute>>>,
	processors: RwLock<Vec<Arc<dyn DependencyProcessor>>>,
	registry: OnceCell<Weak<MapperRegistry>>,
}

impl Mapper {
	/// Start declaring a mapped type
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::mapping::{Column, Mapper};
	///
	/// let document = Mapper::builder("Document")
	///     .table("documents")
	///     .column(Column::new("id").primary_key())
	///     .column(Column::new("title"))
	///     .build()
	///     .unwrap();
	///
	/// assert_eq!(document.name(), "Document");
	/// assert_eq!(document.table(), "documents");
	/// assert_eq!(document.primary_key(), ["id".to_string()]);
	/// ```
	pub fn builder(name: impl Into<String>) -> MapperBuilder {
		MapperBuilder::new(name)
	}

	/// Declared type name
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn columns(&self) -> impl Iterator<Item = &Column> {
		self.columns.values()
	}

	pub fn column(&self, name: &str) -> Option<&Column> {
		self.columns.get(name)
	}

	pub fn has_column(&self, name: &str) -> bool {
		self.columns.contains_key(name)
	}

	/// Primary-key column names in key order
	pub fn primary_key(&self) -> &[String] {
		&self.primary_key
	}

	/// Name of the base type this type inherits from
	pub fn inherits(&self) -> Option<&str> {
		self.inherits.as_deref()
	}

	pub fn hybrid(&self, name: &str) -> Option<&HybridProperty> {
		self.hybrids.get(name)
	}

	/// The registry this mapper was registered in
	pub fn registry(&self) -> Option<Arc<MapperRegistry>> {
		self.registry.get().and_then(Weak::upgrade)
	}

	pub(crate) fn attach_registry(&self, registry: Weak<MapperRegistry>) -> bool {
		self.registry.set(registry).is_ok()
	}

	/// Instrument a relationship attribute
	pub fn register_attribute(&self, attribute: Arc<dyn RelationshipAttribute>) -> Result<()> {
		let key = attribute.key().to_string();
		if self.columns.contains_key(&key) || self.hybrids.contains_key(&key) {
			return Err(GenericRelationError::Configuration(format!(
				"'{}' on '{}' is already mapped as a column or hybrid property",
				key, self.name
			)));
		}
		let mut attributes = self.attributes.write();
		if attributes.contains_key(&key) {
			return Err(GenericRelationError::Configuration(format!(
				"relationship '{}' is already bound on '{}'",
				key, self.name
			)));
		}
		attributes.insert(key, attribute);
		Ok(())
	}

	pub fn attribute(&self, key: &str) -> Option<Arc<dyn RelationshipAttribute>> {
		self.attributes.read().get(key).cloned()
	}

	pub fn attributes(&self) -> Vec<Arc<dyn RelationshipAttribute>> {
		self.attributes.read().values().cloned().collect()
	}

	pub(crate) fn add_processor(&self, processor: Arc<dyn DependencyProcessor>) {
		self.processors.write().push(processor);
	}

	/// Dependency processors whose parent is this type
	pub fn processors(&self) -> Vec<Arc<dyn DependencyProcessor>> {
		self.processors.read().clone()
	}
}

impl fmt::Debug for Mapper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Mapper")
			.field("name", &self.name)
			.field("table", &self.table)
			.field("primary_key", &self.primary_key)
			.field("inherits", &self.inherits)
			.finish_non_exhaustive()
	}
}

impl PartialEq for Mapper {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for Mapper {}

/// Builder for [`Mapper`]
#[derive(Debug)]
pub struct MapperBuilder {
	name: String,
	table: Option<String>,
	columns: Vec<Column>,
	inherits: Option<String>,
	hybrids: Vec<HybridProperty>,
}

impl MapperBuilder {
	fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			table: None,
			columns: Vec::new(),
			inherits: None,
			hybrids: Vec::new(),
		}
	}

	/// Table name; defaults to the lowercased type name
	pub fn table(mut self, table: impl Into<String>) -> Self {
		self.table = Some(table.into());
		self
	}

	pub fn column(mut self, column: Column) -> Self {
		self.columns.push(column);
		self
	}

	/// Declare the base type
	pub fn inherits(mut self, base: impl Into<String>) -> Self {
		self.inherits = Some(base.into());
		self
	}

	pub fn hybrid(mut self, property: HybridProperty) -> Self {
		self.hybrids.push(property);
		self
	}

	/// Validate and build.
	///
	/// A mapper needs at least one primary-key column, and column and hybrid
	/// names must be unique.
	pub fn build(self) -> Result<Arc<Mapper>> {
		let mut columns = IndexMap::new();
		for column in self.columns {
			let name = column.name().to_string();
			if columns.insert(name.clone(), column).is_some() {
				return Err(GenericRelationError::Configuration(format!(
					"duplicate column '{}' on '{}'",
					name, self.name
				)));
			}
		}

		let primary_key: Vec<String> = columns
			.values()
			.filter(|c| c.is_primary_key())
			.map(|c| c.name().to_string())
			.collect();
		if primary_key.is_empty() {
			return Err(GenericRelationError::Configuration(format!(
				"'{}' has no primary key column",
				self.name
			)));
		}

		let mut hybrids = IndexMap::new();
		for hybrid in self.hybrids {
			let name = hybrid.name().to_string();
			if columns.contains_key(&name) || hybrids.insert(name.clone(), hybrid).is_some() {
				return Err(GenericRelationError::Configuration(format!(
					"duplicate attribute '{}' on '{}'",
					name, self.name
				)));
			}
		}

		let table = self.table.unwrap_or_else(|| self.name.to_lowercase());

		Ok(Arc::new(Mapper {
			name: self.name,
			table,
			columns,
			primary_key,
			inherits: self.inherits,
			hybrids,
			attributes: RwLock::new(IndexMap::new()),
			processors: RwLock::new(Vec::new()),
			registry: OnceCell::new(),
		}))
	}
}
