//! Column values, rows and primary-key identities
//!
//! [`QueryValue`] is the in-memory representation of a single column value.
//! Unlike a general SQL value it is `Eq + Hash`, so identities built from it
//! can key identity maps and partition tables.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use uuid::Uuid;

/// Query value types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QueryValue {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(chrono::DateTime<chrono::Utc>),
	/// UUID value for PostgreSQL uuid columns
	Uuid(Uuid),
}

impl QueryValue {
	/// Returns `true` for SQL `NULL`
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::value::QueryValue;
	///
	/// assert!(QueryValue::Null.is_null());
	/// assert!(!QueryValue::from(0).is_null());
	/// ```
	pub fn is_null(&self) -> bool {
		matches!(self, QueryValue::Null)
	}

	/// Returns the text payload of a `String` value
	pub fn as_str(&self) -> Option<&str> {
		match self {
			QueryValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Returns the integer payload of an `Int` value
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			QueryValue::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Convert to a sea-query value for SQL rendering
	pub fn to_sea_value(&self) -> sea_query::Value {
		match self {
			QueryValue::Null => sea_query::Value::from(None::<String>),
			QueryValue::Bool(b) => (*b).into(),
			QueryValue::Int(i) => (*i).into(),
			QueryValue::String(s) => s.clone().into(),
			QueryValue::Bytes(b) => b.clone().into(),
			QueryValue::Timestamp(dt) => (*dt).into(),
			QueryValue::Uuid(u) => (*u).into(),
		}
	}
}

impl fmt::Display for QueryValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			QueryValue::Null => write!(f, "NULL"),
			QueryValue::Bool(b) => write!(f, "{}", b),
			QueryValue::Int(i) => write!(f, "{}", i),
			QueryValue::String(s) => write!(f, "'{}'", s),
			QueryValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
			QueryValue::Timestamp(dt) => write!(f, "{}", dt.to_rfc3339()),
			QueryValue::Uuid(u) => write!(f, "{}", u),
		}
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<Vec<u8>> for QueryValue {
	fn from(b: Vec<u8>) -> Self {
		QueryValue::Bytes(b)
	}
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
	fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

impl From<Uuid> for QueryValue {
	fn from(u: Uuid) -> Self {
		QueryValue::Uuid(u)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(QueryValue::Null)
	}
}

/// A row of column values keyed by column name, in declaration order
pub type Row = indexmap::IndexMap<String, QueryValue>;

/// Ordered primary-key values of a single row
///
/// Single-column keys are by far the common case, so the values are kept
/// inline for arity one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Identity(SmallVec<[QueryValue; 1]>);

impl Identity {
	/// Create an identity from its components
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::value::{Identity, QueryValue};
	///
	/// let identity = Identity::new([QueryValue::from(7)]);
	/// assert_eq!(identity.len(), 1);
	/// assert!(identity.is_complete());
	/// ```
	pub fn new(values: impl IntoIterator<Item = QueryValue>) -> Self {
		Self(values.into_iter().collect())
	}

	/// Number of components
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// `true` when the identity has at least one component and none is null.
	///
	/// An incomplete identity belongs to an entity that has not been flushed yet.
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::value::{Identity, QueryValue};
	///
	/// assert!(!Identity::new([QueryValue::Null]).is_complete());
	/// assert!(!Identity::default().is_complete());
	/// assert!(Identity::new([QueryValue::from("a"), QueryValue::from(1)]).is_complete());
	/// ```
	pub fn is_complete(&self) -> bool {
		!self.0.is_empty() && self.0.iter().all(|v| !v.is_null())
	}

	/// Component values in key order
	pub fn values(&self) -> &[QueryValue] {
		&self.0
	}

	pub fn iter(&self) -> impl Iterator<Item = &QueryValue> {
		self.0.iter()
	}
}

impl From<QueryValue> for Identity {
	fn from(value: QueryValue) -> Self {
		Self::new([value])
	}
}

impl From<i64> for Identity {
	fn from(value: i64) -> Self {
		Self::new([QueryValue::Int(value)])
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "(")?;
		for (i, value) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{}", value)?;
		}
		write!(f, ")")
	}
}
