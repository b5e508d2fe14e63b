//! Discriminator strategies
//!
//! A [`TypeMapper`] translates between mapped types and the discriminator
//! values stored alongside a polymorphic reference. The mapping must be
//! injective: two types never share a value.

use crate::error::{GenericRelationError, Result};
use crate::mapping::{Mapper, MapperRegistry};
use crate::predicate::{Operand, Predicate};
use crate::value::QueryValue;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Translation between mapped types and discriminator values
pub trait TypeMapper: Send + Sync + fmt::Debug {
	/// Discriminator value stored for instances of `mapper`
	fn class_to_value(&self, mapper: &Mapper) -> Result<QueryValue>;

	/// Type for a stored discriminator; `None` for unknown values
	fn value_to_class(&self, value: &QueryValue, registry: &MapperRegistry) -> Option<Arc<Mapper>>;

	/// Predicate matching rows whose discriminator names `mapper` or any of
	/// its currently registered subtypes.
	///
	/// Subtypes without a discriminator value are left out.
	fn matches_type_or_subtype(
		&self,
		operand: &Operand,
		mapper: &Mapper,
		registry: &MapperRegistry,
	) -> Result<Predicate> {
		let mut values = vec![self.class_to_value(mapper)?];
		values.extend(
			registry
				.subtypes_of(mapper.name())
				.iter()
				.filter_map(|subtype| self.class_to_value(subtype).ok()),
		);
		Ok(Predicate::is_in(operand.clone(), values))
	}
}

/// Stores the declared type name as text
///
/// # Examples
///
/// ```
/// use reinhardt_generic_relations::generic::{NameTypeMapper, TypeMapper};
/// use reinhardt_generic_relations::mapping::{Column, Mapper, MapperRegistry};
/// use reinhardt_generic_relations::value::QueryValue;
///
/// let registry = MapperRegistry::new();
/// let document = Mapper::builder("Document")
///     .column(Column::new("id").primary_key())
///     .build()
///     .unwrap();
/// registry.register(document.clone()).unwrap();
///
/// let value = NameTypeMapper.class_to_value(&document).unwrap();
/// assert_eq!(value, QueryValue::from("Document"));
/// assert_eq!(NameTypeMapper.value_to_class(&value, &registry), Some(document));
/// assert!(NameTypeMapper.value_to_class(&QueryValue::from("Video"), &registry).is_none());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NameTypeMapper;

impl TypeMapper for NameTypeMapper {
	fn class_to_value(&self, mapper: &Mapper) -> Result<QueryValue> {
		Ok(QueryValue::from(mapper.name()))
	}

	fn value_to_class(&self, value: &QueryValue, registry: &MapperRegistry) -> Option<Arc<Mapper>> {
		value.as_str().and_then(|name| registry.get(name))
	}
}

/// Stores an integer code per type
#[derive(Debug, Clone)]
pub struct TypeCodeMapper {
	codes: IndexMap<String, i64>,
	types: HashMap<i64, String>,
}

impl TypeCodeMapper {
	/// Build from (type name, code) pairs.
	///
	/// Fails with [`GenericRelationError::DuplicateDiscriminator`] when a
	/// code or a type name appears twice.
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::generic::TypeCodeMapper;
	///
	/// assert!(TypeCodeMapper::new([("Document", 1), ("Image", 2)]).is_ok());
	/// assert!(TypeCodeMapper::new([("Document", 1), ("Image", 1)]).is_err());
	/// ```
	pub fn new<I, S>(codes: I) -> Result<Self>
	where
		I: IntoIterator<Item = (S, i64)>,
		S: Into<String>,
	{
		let mut by_name = IndexMap::new();
		let mut types = HashMap::new();
		for (name, code) in codes {
			let name = name.into();
			if types.contains_key(&code) {
				return Err(GenericRelationError::DuplicateDiscriminator(code.to_string()));
			}
			if by_name.contains_key(&name) {
				return Err(GenericRelationError::DuplicateDiscriminator(format!("for type '{}'", name)));
			}
			types.insert(code, name.clone());
			by_name.insert(name, code);
		}
		Ok(Self {
			codes: by_name,
			types,
		})
	}

	pub fn code_for(&self, type_name: &str) -> Option<i64> {
		self.codes.get(type_name).copied()
	}
}

impl TypeMapper for TypeCodeMapper {
	fn class_to_value(&self, mapper: &Mapper) -> Result<QueryValue> {
		self.code_for(mapper.name())
			.map(QueryValue::Int)
			.ok_or_else(|| GenericRelationError::UnmappedType(mapper.name().to_string()))
	}

	fn value_to_class(&self, value: &QueryValue, registry: &MapperRegistry) -> Option<Arc<Mapper>> {
		value
			.as_i64()
			.and_then(|code| self.types.get(&code))
			.and_then(|name| registry.get(name))
	}
}
