//! Declaring generic relationships in TOML
//!
//! ```toml
//! [[relations]]
//! parent = "Comment"
//! key = "subject"
//! discriminator = "object_type"
//! id = "object_id"
//! cascade = "save-update, delete"
//! targets = ["Document", "Image"]
//!
//! [relations.type_codes]
//! Document = 1
//! Image = 2
//! ```
//!
//! `id` is a column name or a list of names. Without `type_codes` the
//! discriminator stores type names.

use crate::dependency::CascadeOptions;
use crate::error::{GenericRelationError, Result};
use crate::generic::{GenericRelationship, TypeCodeMapper, polymorphic_reference};
use crate::mapping::MapperRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Identifier column(s) of a configured relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdColumnsConfig {
	Single(String),
	Composite(Vec<String>),
}

impl IdColumnsConfig {
	pub fn names(&self) -> Vec<String> {
		match self {
			IdColumnsConfig::Single(name) => vec![name.clone()],
			IdColumnsConfig::Composite(names) => names.clone(),
		}
	}
}

/// One `[[relations]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericRelationConfig {
	/// Type name of the mapper the relationship is declared on
	pub parent: String,
	pub key: String,
	pub discriminator: String,
	pub id: IdColumnsConfig,
	/// Cascade string such as `"save-update, delete"`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cascade: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub doc: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targets: Option<Vec<String>>,
	/// Integer discriminators per type name
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub type_codes: Option<IndexMap<String, i64>>,
}

impl GenericRelationConfig {
	/// Bind this relationship onto its parent mapper in `registry`
	pub fn bind(&self, registry: &Arc<MapperRegistry>) -> Result<Arc<GenericRelationship>> {
		let parent = registry.get(&self.parent).ok_or_else(|| {
			GenericRelationError::Configuration(format!(
				"relationship '{}' is declared on unknown type '{}'",
				self.key, self.parent
			))
		})?;

		let mut builder = polymorphic_reference(self.discriminator.as_str(), self.id.names());
		if let Some(cascade) = &self.cascade {
			builder = builder.cascade(cascade.parse::<CascadeOptions>()?);
		}
		if let Some(doc) = &self.doc {
			builder = builder.doc(doc.clone());
		}
		if let Some(targets) = &self.targets {
			builder = builder.targets(targets.iter().cloned());
		}
		if let Some(codes) = &self.type_codes {
			builder = builder.type_mapper(TypeCodeMapper::new(
				codes.iter().map(|(name, code)| (name.clone(), *code)),
			)?);
		}
		builder.bind_to_class(&parent, self.key.clone())
	}
}

/// Relationship declarations loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSettings {
	#[serde(default)]
	pub relations: Vec<GenericRelationConfig>,
}

impl RelationSettings {
	/// Parse settings from a TOML string
	pub fn from_toml_str(content: &str) -> Result<Self> {
		Ok(toml::from_str(content)?)
	}

	/// Read and parse a TOML file
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| {
			GenericRelationError::Configuration(format!("cannot read {}: {}", path.display(), e))
		})?;
		Self::from_toml_str(&content)
	}

	/// Bind every relationship and configure the registry.
	///
	/// Configuration errors surface here rather than on first use.
	pub fn apply(&self, registry: &Arc<MapperRegistry>) -> Result<Vec<Arc<GenericRelationship>>> {
		let relationships = self
			.relations
			.iter()
			.map(|relation| relation.bind(registry))
			.collect::<Result<Vec<_>>>()?;
		registry.configure()?;
		tracing::debug!(count = relationships.len(), "applied relation settings");
		Ok(relationships)
	}
}
