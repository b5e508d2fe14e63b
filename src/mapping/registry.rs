//! Registry of mapped types
//!
//! The registry is the explicit replacement for runtime class introspection:
//! a name → [`Mapper`] table populated once at schema-setup time.

use super::Mapper;
use crate::error::{GenericRelationError, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Registry for mapped types
#[derive(Debug, Default)]
pub struct MapperRegistry {
	/// Type name -> Mapper mapping, in registration order
	mappers: RwLock<IndexMap<String, Arc<Mapper>>>,
}

impl MapperRegistry {
	/// Create a new, shareable registry
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::mapping::MapperRegistry;
	///
	/// let registry = MapperRegistry::new();
	/// assert_eq!(registry.count(), 0);
	/// ```
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Register a mapper.
	///
	/// Type names are unique within a registry, and a mapper can belong to
	/// only one registry.
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::mapping::{Column, Mapper, MapperRegistry};
	///
	/// let registry = MapperRegistry::new();
	/// let image = Mapper::builder("Image")
	///     .column(Column::new("id").primary_key())
	///     .build()
	///     .unwrap();
	/// registry.register(image).unwrap();
	///
	/// assert!(registry.get("Image").is_some());
	/// assert!(registry.get("Video").is_none());
	/// ```
	pub fn register(self: &Arc<Self>, mapper: Arc<Mapper>) -> Result<()> {
		let mut mappers = self.mappers.write();
		if mappers.contains_key(mapper.name()) {
			return Err(GenericRelationError::DuplicateType(mapper.name().to_string()));
		}
		if !mapper.attach_registry(Arc::downgrade(self)) {
			return Err(GenericRelationError::Configuration(format!(
				"'{}' is already registered in another registry",
				mapper.name()
			)));
		}
		tracing::trace!(type_name = mapper.name(), table = mapper.table(), "registered mapper");
		mappers.insert(mapper.name().to_string(), mapper);
		Ok(())
	}

	/// Get mapper by type name
	pub fn get(&self, name: &str) -> Option<Arc<Mapper>> {
		self.mappers.read().get(name).cloned()
	}

	/// All registered type names
	pub fn type_names(&self) -> Vec<String> {
		self.mappers.read().keys().cloned().collect()
	}

	pub fn mappers(&self) -> Vec<Arc<Mapper>> {
		self.mappers.read().values().cloned().collect()
	}

	/// Get count of registered types
	pub fn count(&self) -> usize {
		self.mappers.read().len()
	}

	/// Every registered type that inherits from `name`, directly or
	/// transitively, in registration order.
	pub fn subtypes_of(&self, name: &str) -> Vec<Arc<Mapper>> {
		let mappers = self.mappers.read();
		mappers
			.values()
			.filter(|m| m.name() != name && Self::inherits_from(&mappers, m, name))
			.cloned()
			.collect()
	}

	/// `true` when `mapper` is `ancestor` or one of its subtypes
	pub fn is_a(&self, mapper: &Mapper, ancestor: &str) -> bool {
		mapper.name() == ancestor || Self::inherits_from(&self.mappers.read(), mapper, ancestor)
	}

	fn inherits_from(mappers: &IndexMap<String, Arc<Mapper>>, mapper: &Mapper, ancestor: &str) -> bool {
		let mut current = mapper.inherits();
		let mut hops = 0;
		while let Some(base) = current {
			if base == ancestor {
				return true;
			}
			// inheritance chains longer than the registry can only be cycles
			hops += 1;
			if hops > mappers.len() {
				return false;
			}
			current = mappers.get(base).and_then(|m| m.inherits());
		}
		false
	}

	/// Configure every instrumented relationship attribute.
	///
	/// Call once after all mappers are registered so that configuration errors
	/// surface before any instance exists. Attributes not configured here are
	/// configured lazily on first use.
	pub fn configure(&self) -> Result<()> {
		for mapper in self.mappers() {
			for attribute in mapper.attributes() {
				attribute.configure()?;
			}
		}
		Ok(())
	}
}
