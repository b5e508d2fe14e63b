//! Hybrid properties
//!
//! A hybrid property is a derived attribute of a mapped type: at instance
//! level it is computed from the live field values, at query level it renders
//! as a SQL expression. A generic relationship may use one as its
//! discriminator.

use crate::value::{QueryValue, Row};
use std::fmt;
use std::sync::Arc;

/// Type alias for instance getter function
type InstanceGetterFn = Arc<dyn Fn(&Row) -> QueryValue + Send + Sync>;

/// Type alias for instance setter function
type InstanceSetterFn = Arc<dyn Fn(&mut Row, QueryValue) + Send + Sync>;

/// A hybrid property that works at both instance and class level
#[derive(Clone)]
pub struct HybridProperty {
	name: String,
	instance_getter: InstanceGetterFn,
	instance_setter: Option<InstanceSetterFn>,
	expression: Option<String>,
}

impl HybridProperty {
	/// Creates a new hybrid property with an instance-level getter
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::hybrid::HybridProperty;
	/// use reinhardt_generic_relations::value::{QueryValue, Row};
	///
	/// let kind = HybridProperty::new("kind", |row: &Row| {
	///     row.get("kind_code").cloned().unwrap_or_default()
	/// });
	///
	/// let mut row = Row::new();
	/// row.insert("kind_code".to_string(), QueryValue::from("Document"));
	/// assert_eq!(kind.get(&row), QueryValue::from("Document"));
	/// ```
	pub fn new<F>(name: impl Into<String>, instance_getter: F) -> Self
	where
		F: Fn(&Row) -> QueryValue + Send + Sync + 'static,
	{
		Self {
			name: name.into(),
			instance_getter: Arc::new(instance_getter),
			instance_setter: None,
			expression: None,
		}
	}

	/// Adds an instance-level setter
	pub fn with_setter<F>(mut self, instance_setter: F) -> Self
	where
		F: Fn(&mut Row, QueryValue) + Send + Sync + 'static,
	{
		self.instance_setter = Some(Arc::new(instance_setter));
		self
	}

	/// Adds the SQL expression used when the property appears in a query
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::hybrid::HybridProperty;
	/// use reinhardt_generic_relations::value::{QueryValue, Row};
	///
	/// let kind = HybridProperty::new("kind", |_: &Row| QueryValue::Null)
	///     .with_expression("UPPER(kind_code)");
	/// assert_eq!(kind.expression(), Some("UPPER(kind_code)"));
	/// ```
	pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
		self.expression = Some(expression.into());
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Get the value for an instance's fields
	pub fn get(&self, fields: &Row) -> QueryValue {
		(self.instance_getter)(fields)
	}

	/// Write through the setter.
	///
	/// Returns `false` when the property is read-only.
	pub fn set(&self, fields: &mut Row, value: QueryValue) -> bool {
		match &self.instance_setter {
			Some(setter) => {
				setter(fields, value);
				true
			}
			None => false,
		}
	}

	pub fn is_writable(&self) -> bool {
		self.instance_setter.is_some()
	}

	/// Get the SQL expression
	pub fn expression(&self) -> Option<&str> {
		self.expression.as_deref()
	}
}

impl fmt::Debug for HybridProperty {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HybridProperty")
			.field("name", &self.name)
			.field("writable", &self.is_writable())
			.field("expression", &self.expression)
			.finish()
	}
}
