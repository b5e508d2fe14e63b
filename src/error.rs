//! Error types
//!
//! Only conditions that must stop the caller are errors. An unresolvable
//! polymorphic reference is not one of them: it reads back as "no value"
//! (see [`crate::generic::attribute::Resolution`]).

use thiserror::Error;

/// Errors raised by the storage backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
	#[error("Unknown table: {0}")]
	UnknownTable(String),

	#[error("Duplicate primary key {identity} in table '{table}'")]
	DuplicateKey { table: String, identity: String },

	#[error("Primary key for table '{table}' is incomplete: {identity}")]
	IncompleteKey { table: String, identity: String },

	#[error("Row {identity} not found in table '{table}'")]
	RowNotFound { table: String, identity: String },
}

/// Errors raised while configuring or flushing generic relationships
#[derive(Debug, Error)]
pub enum GenericRelationError {
	/// Raised at configuration time; aborts setup before any instance exists.
	#[error("Improperly configured: {0}")]
	Configuration(String),

	#[error(
		"Primary key arity mismatch for '{type_name}': {declared} identifier column(s) declared, target key has {actual}"
	)]
	ArityMismatch {
		type_name: String,
		declared: usize,
		actual: usize,
	},

	#[error("Type '{0}' is already registered")]
	DuplicateType(String),

	#[error("Discriminator value {0} is assigned to more than one type")]
	DuplicateDiscriminator(String),

	#[error("Type '{0}' has no discriminator value for this relationship")]
	UnmappedType(String),

	#[error("Unknown attribute '{attribute}' on '{type_name}'")]
	UnknownAttribute {
		type_name: String,
		attribute: String,
	},

	#[error("Invalid cascade option: {0}")]
	InvalidCascade(String),

	#[error("Hybrid property '{0}' has no SQL expression")]
	MissingExpression(String),

	/// An operation that is not valid for the instance's current state
	#[error("Invalid request: {0}")]
	InvalidRequest(String),

	#[error("Circular dependency detected during flush: {0}")]
	CircularDependency(String),

	#[error("Backend error: {0}")]
	Backend(#[from] BackendError),

	#[error("Settings error: {0}")]
	Settings(#[from] toml::de::Error),
}

impl GenericRelationError {
	/// `true` for errors raised while declaring mappers and relationships
	pub fn is_configuration(&self) -> bool {
		matches!(
			self,
			GenericRelationError::Configuration(_)
				| GenericRelationError::ArityMismatch { .. }
				| GenericRelationError::DuplicateType(_)
				| GenericRelationError::DuplicateDiscriminator(_)
				| GenericRelationError::InvalidCascade(_)
				| GenericRelationError::Settings(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, GenericRelationError>;
