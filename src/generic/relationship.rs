//! Declaring generic relationships
//!
//! A generic relationship is declared on a parent mapper with the
//! discriminator column and the identifier column(s) that together store a
//! reference to a row of any registered type:
//!
//! ```
//! use reinhardt_generic_relations::generic::polymorphic_reference;
//! use reinhardt_generic_relations::mapping::{Column, Mapper, MapperRegistry};
//!
//! let registry = MapperRegistry::new();
//! let comment = Mapper::builder("Comment")
//!     .column(Column::new("id").primary_key())
//!     .column(Column::new("object_type"))
//!     .column(Column::new("object_id"))
//!     .build()
//!     .unwrap();
//! registry.register(comment.clone()).unwrap();
//!
//! let subject = polymorphic_reference("object_type", "object_id")
//!     .doc("What the comment is about")
//!     .bind_to_class(&comment, "subject")
//!     .unwrap();
//! registry.configure().unwrap();
//!
//! assert_eq!(subject.key(), "subject");
//! assert_eq!(subject.id_columns().unwrap(), ["object_id".to_string()]);
//! ```

use super::attribute::{DiscriminatorAccessor, GenericAttribute, Resolution};
use super::processor::GenericDependencyProcessor;
use super::type_mapper::{NameTypeMapper, TypeMapper};
use crate::dependency::{CascadeOptions, ManyToOneProcessor};
use crate::error::{GenericRelationError, Result};
use crate::hybrid::HybridProperty;
use crate::instance::Instance;
use crate::mapping::{Column, Mapper, MapperRegistry};
use crate::predicate::{Operand, Predicate};
use crate::value::QueryValue;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::{Arc, Weak};

/// Reference to a column (or, for discriminators, a hybrid property) of the
/// parent mapper
#[derive(Debug, Clone)]
pub enum ColumnRef {
	/// Looked up by name at initialization
	Name(String),
	Column(Column),
	Hybrid(HybridProperty),
}

impl ColumnRef {
	pub fn name(&self) -> &str {
		match self {
			ColumnRef::Name(name) => name,
			ColumnRef::Column(column) => column.name(),
			ColumnRef::Hybrid(property) => property.name(),
		}
	}
}

impl From<&str> for ColumnRef {
	fn from(name: &str) -> Self {
		ColumnRef::Name(name.to_string())
	}
}

impl From<String> for ColumnRef {
	fn from(name: String) -> Self {
		ColumnRef::Name(name)
	}
}

impl From<Column> for ColumnRef {
	fn from(column: Column) -> Self {
		ColumnRef::Column(column)
	}
}

impl From<&Column> for ColumnRef {
	fn from(column: &Column) -> Self {
		ColumnRef::Column(column.clone())
	}
}

impl From<HybridProperty> for ColumnRef {
	fn from(property: HybridProperty) -> Self {
		ColumnRef::Hybrid(property)
	}
}

/// Identifier columns of a reference; a single column is a one-element list
#[derive(Debug, Clone)]
pub struct IdColumns(Vec<ColumnRef>);

impl IdColumns {
	pub fn as_slice(&self) -> &[ColumnRef] {
		&self.0
	}
}

impl From<&str> for IdColumns {
	fn from(name: &str) -> Self {
		IdColumns(vec![name.into()])
	}
}

impl From<String> for IdColumns {
	fn from(name: String) -> Self {
		IdColumns(vec![name.into()])
	}
}

impl From<Column> for IdColumns {
	fn from(column: Column) -> Self {
		IdColumns(vec![column.into()])
	}
}

impl From<Vec<ColumnRef>> for IdColumns {
	fn from(columns: Vec<ColumnRef>) -> Self {
		IdColumns(columns)
	}
}

impl From<Vec<&str>> for IdColumns {
	fn from(names: Vec<&str>) -> Self {
		IdColumns(names.into_iter().map(ColumnRef::from).collect())
	}
}

impl From<Vec<String>> for IdColumns {
	fn from(names: Vec<String>) -> Self {
		IdColumns(names.into_iter().map(ColumnRef::from).collect())
	}
}

impl<const N: usize> From<[&str; N]> for IdColumns {
	fn from(names: [&str; N]) -> Self {
		IdColumns(names.into_iter().map(ColumnRef::from).collect())
	}
}

/// Maps discriminator values back to registered types, honoring an optional
/// allow-list of target types
#[derive(Debug, Clone)]
pub struct TargetResolver {
	type_mapper: Arc<dyn TypeMapper>,
	registry: Weak<MapperRegistry>,
	targets: Option<Vec<String>>,
}

impl TargetResolver {
	pub(crate) fn new(
		type_mapper: Arc<dyn TypeMapper>,
		registry: &Arc<MapperRegistry>,
		targets: Option<Vec<String>>,
	) -> Self {
		Self {
			type_mapper,
			registry: Arc::downgrade(registry),
			targets,
		}
	}

	pub fn registry(&self) -> Option<Arc<MapperRegistry>> {
		self.registry.upgrade()
	}

	/// Target type for a stored discriminator value
	pub fn resolve(&self, value: &QueryValue) -> Option<Arc<Mapper>> {
		if value.is_null() {
			return None;
		}
		let registry = self.registry()?;
		let mapper = self.type_mapper.value_to_class(value, &registry)?;
		self.permits(&mapper).then_some(mapper)
	}

	/// `true` when the relationship may reference instances of `mapper`
	pub fn permits(&self, mapper: &Mapper) -> bool {
		let Some(targets) = &self.targets else {
			return true;
		};
		match self.registry() {
			Some(registry) => targets.iter().any(|target| registry.is_a(mapper, target)),
			None => targets.iter().any(|target| target == mapper.name()),
		}
	}
}

/// Names resolved against the parent mapper by [`GenericRelationship::initialize`]
#[derive(Debug)]
pub struct ResolvedRelationship {
	discriminator: DiscriminatorAccessor,
	id_columns: Vec<String>,
	resolver: TargetResolver,
}

impl ResolvedRelationship {
	pub fn discriminator(&self) -> &DiscriminatorAccessor {
		&self.discriminator
	}

	pub fn id_columns(&self) -> &[String] {
		&self.id_columns
	}

	pub fn resolver(&self) -> &TargetResolver {
		&self.resolver
	}
}

/// Start declaring a generic relationship
pub fn polymorphic_reference(
	discriminator: impl Into<ColumnRef>,
	id: impl Into<IdColumns>,
) -> GenericRelationshipBuilder {
	GenericRelationship::builder(discriminator, id)
}

/// Builder for [`GenericRelationship`]
pub struct GenericRelationshipBuilder {
	discriminator: ColumnRef,
	id: IdColumns,
	type_mapper: Arc<dyn TypeMapper>,
	cascade: CascadeOptions,
	doc: Option<String>,
	targets: Option<Vec<String>>,
}

impl GenericRelationshipBuilder {
	/// Discriminator strategy; [`NameTypeMapper`] by default
	pub fn type_mapper(mut self, type_mapper: impl TypeMapper + 'static) -> Self {
		self.type_mapper = Arc::new(type_mapper);
		self
	}

	/// Cascade behavior; save-update by default
	pub fn cascade(mut self, cascade: CascadeOptions) -> Self {
		self.cascade = cascade;
		self
	}

	pub fn doc(mut self, doc: impl Into<String>) -> Self {
		self.doc = Some(doc.into());
		self
	}

	/// Restrict the reference to these types and their subtypes.
	///
	/// Primary-key arity of the listed types is checked at initialization.
	pub fn targets<I, S>(mut self, targets: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.targets = Some(targets.into_iter().map(Into::into).collect());
		self
	}

	/// Instrument the relationship on `parent` under `key`
	pub fn bind_to_class(self, parent: &Arc<Mapper>, key: impl Into<String>) -> Result<Arc<GenericRelationship>> {
		let relationship = Arc::new(GenericRelationship {
			key: key.into(),
			parent: Arc::downgrade(parent),
			parent_name: parent.name().to_string(),
			discriminator: self.discriminator,
			id: self.id,
			type_mapper: self.type_mapper,
			cascade: self.cascade,
			doc: self.doc,
			targets: self.targets,
			resolved: OnceCell::new(),
		});
		parent.register_attribute(Arc::new(GenericAttribute::new(Arc::clone(&relationship))))?;
		tracing::trace!(parent = parent.name(), key = relationship.key(), "bound generic relationship");
		Ok(relationship)
	}
}

impl fmt::Debug for GenericRelationshipBuilder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GenericRelationshipBuilder")
			.field("discriminator", &self.discriminator.name())
			.field("type_mapper", &self.type_mapper)
			.field("cascade", &self.cascade)
			.field("targets", &self.targets)
			.finish_non_exhaustive()
	}
}

/// A polymorphic many-to-one reference stored as a discriminator plus
/// identifier columns on the parent row
pub struct GenericRelationship {
	key: String,
	parent: Weak<Mapper>,
	parent_name: String,
	discriminator: ColumnRef,
	id: IdColumns,
	type_mapper: Arc<dyn TypeMapper>,
	cascade: CascadeOptions,
	doc: Option<String>,
	targets: Option<Vec<String>>,
	resolved: OnceCell<ResolvedRelationship>,
}

impl GenericRelationship {
	pub fn builder(discriminator: impl Into<ColumnRef>, id: impl Into<IdColumns>) -> GenericRelationshipBuilder {
		GenericRelationshipBuilder {
			discriminator: discriminator.into(),
			id: id.into(),
			type_mapper: Arc::new(NameTypeMapper),
			cascade: CascadeOptions::default(),
			doc: None,
			targets: None,
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Type name of the parent mapper
	pub fn parent_name(&self) -> &str {
		&self.parent_name
	}

	pub fn doc(&self) -> Option<&str> {
		self.doc.as_deref()
	}

	pub fn cascade(&self) -> CascadeOptions {
		self.cascade
	}

	pub fn targets(&self) -> Option<&[String]> {
		self.targets.as_deref()
	}

	pub fn type_mapper(&self) -> &Arc<dyn TypeMapper> {
		&self.type_mapper
	}

	/// Identifier column names, initializing on first use
	pub fn id_columns(&self) -> Result<&[String]> {
		Ok(self.initialize()?.id_columns())
	}

	/// Resolve column names and register the dependency processor.
	///
	/// Runs once; later calls return the first result.
	pub fn initialize(&self) -> Result<&ResolvedRelationship> {
		self.resolved.get_or_try_init(|| self.resolve_names())
	}

	fn resolve_names(&self) -> Result<ResolvedRelationship> {
		let parent = self.parent.upgrade().ok_or_else(|| {
			GenericRelationError::Configuration(format!(
				"parent mapper '{}' of relationship '{}' no longer exists",
				self.parent_name, self.key
			))
		})?;
		let registry = parent.registry().ok_or_else(|| {
			GenericRelationError::Configuration(format!(
				"'{}' must be registered before relationship '{}' is initialized",
				parent.name(),
				self.key
			))
		})?;

		let discriminator = match &self.discriminator {
			ColumnRef::Hybrid(property) => DiscriminatorAccessor::Computed(property.clone()),
			reference if parent.has_column(reference.name()) => {
				DiscriminatorAccessor::StoredColumn(reference.name().to_string())
			}
			ColumnRef::Name(name) if parent.hybrid(name).is_some() => {
				let property = parent.hybrid(name).cloned().ok_or_else(|| self.missing_discriminator(&parent))?;
				DiscriminatorAccessor::Computed(property)
			}
			_ => return Err(self.missing_discriminator(&parent)),
		};

		if self.id.as_slice().is_empty() {
			return Err(GenericRelationError::Configuration(format!(
				"relationship '{}.{}' needs at least one identifier column",
				parent.name(),
				self.key
			)));
		}
		let mut id_columns = Vec::with_capacity(self.id.as_slice().len());
		for reference in self.id.as_slice() {
			if matches!(reference, ColumnRef::Hybrid(_)) || !parent.has_column(reference.name()) {
				return Err(GenericRelationError::Configuration(format!(
					"identifier column '{}' is not a column of '{}'",
					reference.name(),
					parent.name()
				)));
			}
			id_columns.push(reference.name().to_string());
		}

		if let Some(targets) = &self.targets {
			for name in targets {
				let target = registry.get(name).ok_or_else(|| {
					GenericRelationError::Configuration(format!(
						"target type '{}' of '{}.{}' is not registered",
						name,
						parent.name(),
						self.key
					))
				})?;
				if target.primary_key().len() != id_columns.len() {
					return Err(GenericRelationError::ArityMismatch {
						type_name: target.name().to_string(),
						declared: id_columns.len(),
						actual: target.primary_key().len(),
					});
				}
				self.type_mapper.class_to_value(&target)?;
			}
		}

		let resolver = TargetResolver::new(Arc::clone(&self.type_mapper), &registry, self.targets.clone());
		let processor = GenericDependencyProcessor::new(
			ManyToOneProcessor::new(parent.name(), &self.key, id_columns.clone(), self.cascade),
			discriminator.clone(),
			resolver.clone(),
		);
		parent.add_processor(Arc::new(processor));

		tracing::debug!(
			parent = parent.name(),
			key = %self.key,
			discriminator = discriminator.name(),
			"initialized generic relationship"
		);
		Ok(ResolvedRelationship {
			discriminator,
			id_columns,
			resolver,
		})
	}

	fn missing_discriminator(&self, parent: &Mapper) -> GenericRelationError {
		GenericRelationError::Configuration(format!(
			"Could not find discriminator descriptor '{}' on '{}'",
			self.discriminator.name(),
			parent.name()
		))
	}

	/// Read the reference on `instance`, with the reason when it does not resolve
	pub fn resolve(self: &Arc<Self>, instance: &Instance) -> Result<Resolution> {
		GenericAttribute::new(Arc::clone(self)).resolve(instance)
	}

	/// Rows referencing exactly `other`: discriminator and every identifier
	/// column equal.
	pub fn equality_predicate(&self, other: &Instance) -> Result<Predicate> {
		let resolved = self.initialize()?;
		let mapper = other.mapper();
		let identity = other.identity();
		if identity.len() != resolved.id_columns().len() {
			return Err(GenericRelationError::ArityMismatch {
				type_name: mapper.name().to_string(),
				declared: resolved.id_columns().len(),
				actual: identity.len(),
			});
		}

		let discriminator = self.type_mapper.class_to_value(mapper)?;
		let mut parts = vec![Predicate::eq(resolved.discriminator().operand(), discriminator)];
		parts.extend(
			resolved
				.id_columns()
				.iter()
				.zip(identity.iter())
				.map(|(column, value)| Predicate::eq(Operand::column(column.as_str()), value.clone())),
		);
		Ok(Predicate::And(parts))
	}

	/// Negation of [`equality_predicate`](Self::equality_predicate).
	///
	/// Rows with a null reference evaluate to unknown and do not match.
	pub fn inequality_predicate(&self, other: &Instance) -> Result<Predicate> {
		Ok(!self.equality_predicate(other)?)
	}

	/// Rows whose reference is empty
	pub fn null_predicate(&self) -> Result<Predicate> {
		let resolved = self.initialize()?;
		Ok(Predicate::IsNull(resolved.discriminator().operand()))
	}

	/// Rows referencing an instance of `mapper` or of one of its subtypes
	pub fn type_predicate(&self, mapper: &Mapper) -> Result<Predicate> {
		let resolved = self.initialize()?;
		let registry = resolved.resolver().registry().ok_or_else(|| {
			GenericRelationError::Configuration(format!("mapper registry of '{}' no longer exists", self.parent_name))
		})?;
		self.type_mapper
			.matches_type_or_subtype(&resolved.discriminator().operand(), mapper, &registry)
	}
}

impl fmt::Debug for GenericRelationship {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GenericRelationship")
			.field("parent", &self.parent_name)
			.field("key", &self.key)
			.field("discriminator", &self.discriminator.name())
			.field("cascade", &self.cascade)
			.field("initialized", &self.resolved.get().is_some())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::generic::TypeCodeMapper;
	use crate::value::Row;
	use rstest::{fixture, rstest};

	struct Fixture {
		registry: Arc<MapperRegistry>,
		document: Arc<Mapper>,
		image: Arc<Mapper>,
		comment: Arc<Mapper>,
	}

	fn entity(name: &str) -> Arc<Mapper> {
		Mapper::builder(name)
			.column(Column::new("id").primary_key())
			.build()
			.unwrap()
	}

	#[fixture]
	fn setup() -> Fixture {
		let registry = MapperRegistry::new();
		let document = entity("Document");
		let image = entity("Image");
		let line = Mapper::builder("Line")
			.column(Column::new("order_id").primary_key().autoincrement(false))
			.column(Column::new("position").primary_key().autoincrement(false))
			.build()
			.unwrap();
		let comment = Mapper::builder("Comment")
			.column(Column::new("id").primary_key())
			.column(Column::new("object_type"))
			.column(Column::new("object_id"))
			.build()
			.unwrap();
		for mapper in [&document, &image, &line, &comment] {
			registry.register(mapper.clone()).unwrap();
		}
		Fixture {
			registry,
			document,
			image,
			comment,
		}
	}

	fn row(object_type: QueryValue, object_id: QueryValue) -> Row {
		let mut row = Row::new();
		row.insert("object_type".to_string(), object_type);
		row.insert("object_id".to_string(), object_id);
		row
	}

	#[rstest]
	fn test_missing_discriminator(setup: Fixture) {
		let relationship = polymorphic_reference("kind", "object_id")
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		let err = relationship.initialize().unwrap_err();
		assert!(err.to_string().contains("Could not find discriminator descriptor"));
		assert!(setup.registry.configure().is_err());
	}

	#[rstest]
	#[case(IdColumns::from("missing"))]
	#[case(IdColumns::from(Vec::<ColumnRef>::new()))]
	#[case(IdColumns::from(vec![ColumnRef::from(HybridProperty::new("object_id", |_: &Row| QueryValue::Null))]))]
	fn test_invalid_identifier_columns(setup: Fixture, #[case] id: IdColumns) {
		let relationship = polymorphic_reference("object_type", id)
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		assert!(relationship.initialize().unwrap_err().is_configuration());
	}

	#[rstest]
	fn test_column_objects_are_accepted(setup: Fixture) {
		let discriminator = setup.comment.column("object_type").unwrap().clone();
		let id = setup.comment.column("object_id").unwrap().clone();
		let relationship = polymorphic_reference(discriminator, id)
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		assert_eq!(relationship.id_columns().unwrap(), ["object_id"]);
	}

	#[rstest]
	fn test_binding_twice_is_rejected(setup: Fixture) {
		polymorphic_reference("object_type", "object_id")
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		let err = polymorphic_reference("object_type", "object_id")
			.bind_to_class(&setup.comment, "subject")
			.unwrap_err();
		assert!(err.is_configuration());
	}

	#[rstest]
	fn test_initialize_is_idempotent(setup: Fixture) {
		let relationship = polymorphic_reference("object_type", "object_id")
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		relationship.initialize().unwrap();
		relationship.initialize().unwrap();
		setup.registry.configure().unwrap();
		assert_eq!(setup.comment.processors().len(), 1);
	}

	#[rstest]
	fn test_target_arity_checked_at_initialize(setup: Fixture) {
		let relationship = polymorphic_reference("object_type", "object_id")
			.targets(["Document", "Line"])
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		assert!(matches!(
			relationship.initialize(),
			Err(GenericRelationError::ArityMismatch { type_name, .. }) if type_name == "Line"
		));
	}

	#[rstest]
	fn test_target_allow_list(setup: Fixture) {
		let relationship = polymorphic_reference("object_type", "object_id")
			.targets(["Document"])
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		let resolver = relationship.initialize().unwrap().resolver();

		assert!(resolver.resolve(&QueryValue::from("Document")).is_some());
		assert!(resolver.resolve(&QueryValue::from("Image")).is_none());

		let comment = Instance::new(&setup.comment);
		let image = Instance::new(&setup.image);
		let err = comment.set_related("subject", Some(&image)).unwrap_err();
		assert!(matches!(err, GenericRelationError::UnmappedType(name) if name == "Image"));
	}

	#[rstest]
	fn test_equality_predicate_distinguishes_types(setup: Fixture) {
		let relationship = polymorphic_reference("object_type", "object_id")
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		let doc = Instance::new(&setup.document).with("id", 1);
		let predicate = relationship.equality_predicate(&doc).unwrap();

		assert!(predicate.matches(&row(QueryValue::from("Document"), QueryValue::from(1))));
		assert!(!predicate.matches(&row(QueryValue::from("Image"), QueryValue::from(1))));
		assert!(!predicate.matches(&row(QueryValue::from("Document"), QueryValue::from(2))));

		let inequality = relationship.inequality_predicate(&doc).unwrap();
		assert!(inequality.matches(&row(QueryValue::from("Image"), QueryValue::from(1))));
		assert!(!inequality.matches(&row(QueryValue::Null, QueryValue::Null)));

		let null = relationship.null_predicate().unwrap();
		assert!(null.matches(&row(QueryValue::Null, QueryValue::Null)));
		assert!(!null.matches(&row(QueryValue::from("Image"), QueryValue::from(1))));
	}

	#[rstest]
	fn test_type_code_discriminator(setup: Fixture) {
		let relationship = polymorphic_reference("object_type", "object_id")
			.type_mapper(TypeCodeMapper::new([("Document", 1), ("Image", 2)]).unwrap())
			.bind_to_class(&setup.comment, "subject")
			.unwrap();
		let comment = Instance::new(&setup.comment);
		let image = Instance::new(&setup.image).with("id", 4);
		comment.set_related("subject", Some(&image)).unwrap();

		assert_eq!(comment.get("object_type"), QueryValue::from(2));
		assert_eq!(comment.get("object_id"), QueryValue::from(4));
		assert!(
			relationship
				.type_predicate(&setup.image)
				.unwrap()
				.matches(&row(QueryValue::from(2), QueryValue::from(4)))
		);
	}

	#[rstest]
	fn test_computed_discriminator_renders_expression(setup: Fixture) {
		let tag = Mapper::builder("Tag")
			.column(Column::new("id").primary_key())
			.column(Column::new("object_type"))
			.column(Column::new("object_id"))
			.hybrid(
				HybridProperty::new("kind", |row: &Row| row.get("object_type").cloned().unwrap_or_default())
					.with_expression("COALESCE(object_type, 'none')"),
			)
			.build()
			.unwrap();
		setup.registry.register(tag.clone()).unwrap();
		let relationship = polymorphic_reference("kind", "object_id")
			.bind_to_class(&tag, "target")
			.unwrap();

		let resolved = relationship.initialize().unwrap();
		assert!(matches!(resolved.discriminator(), DiscriminatorAccessor::Computed(_)));
		assert!(relationship.null_predicate().unwrap().to_condition().is_ok());
	}
}
