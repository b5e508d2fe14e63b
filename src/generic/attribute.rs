//! Instance-level access to a generic relationship
//!
//! [`GenericAttribute`] is what [`Instance::related`] and
//! [`Instance::set_related`] dispatch to for a polymorphic reference. Reads
//! resolve the stored discriminator to a target type and load the row through
//! the instance's session; writes store the discriminator and identifier
//! values without touching the database.

use super::relationship::GenericRelationship;
use crate::dependency::CascadeKind;
use crate::error::{GenericRelationError, Result};
use crate::hybrid::HybridProperty;
use crate::instance::{Instance, InstanceId};
use crate::mapping::RelationshipAttribute;
use crate::predicate::Operand;
use crate::value::{Identity, QueryValue};
use std::collections::HashSet;
use std::sync::Arc;

/// How the discriminator of a reference is read and written
#[derive(Debug, Clone)]
pub enum DiscriminatorAccessor {
	/// A stored column on the parent
	StoredColumn(String),
	/// A hybrid property computed from the parent's fields
	Computed(HybridProperty),
}

impl DiscriminatorAccessor {
	pub fn name(&self) -> &str {
		match self {
			DiscriminatorAccessor::StoredColumn(column) => column,
			DiscriminatorAccessor::Computed(property) => property.name(),
		}
	}

	/// Current discriminator value of `instance`
	pub fn read(&self, instance: &Instance) -> QueryValue {
		match self {
			DiscriminatorAccessor::StoredColumn(column) => instance.get(column),
			DiscriminatorAccessor::Computed(property) => instance.read_fields(|fields| property.get(fields)),
		}
	}

	/// Store a discriminator value.
	///
	/// Returns `false` when the accessor is a read-only computed property.
	pub fn write(&self, instance: &Instance, value: QueryValue) -> bool {
		match self {
			DiscriminatorAccessor::StoredColumn(column) => {
				instance.set(column, value);
				true
			}
			DiscriminatorAccessor::Computed(property) => {
				instance.write_fields(|fields| property.set(fields, value))
			}
		}
	}

	/// Query-level operand for predicates
	pub fn operand(&self) -> Operand {
		match self {
			DiscriminatorAccessor::StoredColumn(column) => Operand::Column(column.clone()),
			DiscriminatorAccessor::Computed(property) => Operand::Hybrid(property.clone()),
		}
	}
}

/// Load state of a reference on one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
	/// Bound to a session, nothing cached yet
	Unresolved,
	/// A value (possibly empty) is cached
	Loaded,
	/// Not bound to a session and nothing cached
	Detached,
}

/// Why a reference did not resolve to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
	/// Empty value cached by an assignment or a previous lookup
	Empty,
	/// The instance is not bound to a session
	Detached,
	NullDiscriminator,
	/// No registered (or permitted) type for the stored discriminator
	UnknownDiscriminator,
	/// Some identifier column is null
	IncompleteIdentity,
	/// Identifier column count differs from the target's primary key
	ArityMismatch,
	/// No row with the stored identity (dangling reference)
	NotFound,
}

/// Outcome of resolving a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Found(Instance),
	Unresolved(UnresolvedReason),
}

impl Resolution {
	pub fn into_instance(self) -> Option<Instance> {
		match self {
			Resolution::Found(instance) => Some(instance),
			Resolution::Unresolved(_) => None,
		}
	}
}

/// Relationship attribute implementation for a generic relationship
#[derive(Clone)]
pub struct GenericAttribute {
	relationship: Arc<GenericRelationship>,
}

impl GenericAttribute {
	pub fn new(relationship: Arc<GenericRelationship>) -> Self {
		Self { relationship }
	}

	pub fn relationship(&self) -> &Arc<GenericRelationship> {
		&self.relationship
	}

	pub fn load_state(&self, instance: &Instance) -> LoadState {
		if instance.has_cached_related(self.relationship.key()) {
			LoadState::Loaded
		} else if instance.session().is_none() {
			LoadState::Detached
		} else {
			LoadState::Unresolved
		}
	}

	/// Resolve the reference, reporting why it did not resolve.
	///
	/// Only backend failures (and configuration errors on first use) are
	/// returned as errors.
	pub fn resolve(&self, instance: &Instance) -> Result<Resolution> {
		let key = self.relationship.key();
		if let Some(cached) = instance.cached_related(key) {
			return Ok(match cached {
				Some(target) => Resolution::Found(target),
				None => Resolution::Unresolved(UnresolvedReason::Empty),
			});
		}

		let resolved = self.relationship.initialize()?;
		let unresolved = |reason: UnresolvedReason| {
			tracing::debug!(instance = %instance, key, ?reason, "reference not resolved");
			Ok(Resolution::Unresolved(reason))
		};

		let Some(session) = instance.session() else {
			return unresolved(UnresolvedReason::Detached);
		};

		let discriminator = resolved.discriminator().read(instance);
		if discriminator.is_null() {
			return unresolved(UnresolvedReason::NullDiscriminator);
		}
		let Some(target) = resolved.resolver().resolve(&discriminator) else {
			return unresolved(UnresolvedReason::UnknownDiscriminator);
		};

		let identity = Identity::new(resolved.id_columns().iter().map(|column| instance.get(column)));
		if identity.len() != target.primary_key().len() {
			tracing::warn!(
				instance = %instance,
				key,
				target = target.name(),
				"{} identifier column(s) cannot address a {}-column primary key",
				identity.len(),
				target.primary_key().len()
			);
			return unresolved(UnresolvedReason::ArityMismatch);
		}
		if !identity.is_complete() {
			return unresolved(UnresolvedReason::IncompleteIdentity);
		}

		let found = session.get(&target, &identity)?;
		instance.cache_related(key, found.clone());
		match found {
			Some(target) => Ok(Resolution::Found(target)),
			None => unresolved(UnresolvedReason::NotFound),
		}
	}

	/// Current target of the reference; `None` when it does not resolve
	pub fn get(&self, instance: &Instance) -> Result<Option<Instance>> {
		self.resolve(instance).map(Resolution::into_instance)
	}

	/// Assign the target of the reference.
	///
	/// A target whose primary key is not known yet leaves the identifier
	/// columns null until the next flush copies the key.
	pub fn set(&self, instance: &Instance, value: Option<Instance>) -> Result<()> {
		let key = self.relationship.key();
		let resolved = self.relationship.initialize()?;
		let id_columns = resolved.id_columns();

		match &value {
			None => {
				if !resolved.discriminator().write(instance, QueryValue::Null) {
					tracing::debug!(key, "computed discriminator is read-only; not cleared");
				}
				for column in id_columns {
					instance.set(column, QueryValue::Null);
				}
			}
			Some(target) => {
				let mapper = target.mapper();
				if !resolved.resolver().permits(mapper) {
					return Err(GenericRelationError::UnmappedType(mapper.name().to_string()));
				}
				if mapper.primary_key().len() != id_columns.len() {
					return Err(GenericRelationError::ArityMismatch {
						type_name: mapper.name().to_string(),
						declared: id_columns.len(),
						actual: mapper.primary_key().len(),
					});
				}
				let discriminator = self.relationship.type_mapper().class_to_value(mapper)?;

				let identity = target.identity();
				if identity.is_complete() {
					for (column, value) in id_columns.iter().zip(identity.iter()) {
						instance.set(column, value.clone());
					}
				} else {
					for column in id_columns {
						instance.set(column, QueryValue::Null);
					}
				}
				if !resolved.discriminator().write(instance, discriminator) {
					tracing::debug!(key, "computed discriminator is read-only; not written");
				}
			}
		}

		instance.cache_related(key, value);
		instance.mark_related_dirty(key);
		Ok(())
	}
}

impl RelationshipAttribute for GenericAttribute {
	fn key(&self) -> &str {
		self.relationship.key()
	}

	fn configure(&self) -> Result<()> {
		self.relationship.initialize().map(|_| ())
	}

	fn get(&self, instance: &Instance) -> Result<Option<Instance>> {
		GenericAttribute::get(self, instance)
	}

	fn set(&self, instance: &Instance, value: Option<Instance>) -> Result<()> {
		GenericAttribute::set(self, instance, value)
	}

	fn cascade_iterator(
		&self,
		kind: CascadeKind,
		instance: &Instance,
		visited: &mut HashSet<InstanceId>,
	) -> Vec<Instance> {
		if !self.relationship.cascade().includes(kind) {
			return Vec::new();
		}
		match instance.cached_related(self.relationship.key()) {
			Some(Some(target)) if visited.insert(target.id()) => vec![target],
			_ => Vec::new(),
		}
	}
}

impl std::fmt::Debug for GenericAttribute {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GenericAttribute")
			.field("key", &self.relationship.key())
			.finish()
	}
}
