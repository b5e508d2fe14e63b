use crate::error::{GenericRelationError, Result};
use std::fmt;
use std::str::FromStr;

/// Which session operation is being cascaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeKind {
	SaveUpdate,
	Delete,
}

/// Cascade behavior of a relationship
///
/// # Examples
///
/// ```
/// use reinhardt_generic_relations::dependency::{CascadeKind, CascadeOptions};
///
/// let cascade: CascadeOptions = "save-update, delete".parse().unwrap();
/// assert!(cascade.includes(CascadeKind::SaveUpdate));
/// assert!(cascade.includes(CascadeKind::Delete));
///
/// // "merge" is accepted and has no effect here
/// let default: CascadeOptions = "save-update, merge".parse().unwrap();
/// assert_eq!(default, CascadeOptions::default());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeOptions {
	save_update: bool,
	delete: bool,
}

impl CascadeOptions {
	/// No cascading at all
	pub const fn none() -> Self {
		Self {
			save_update: false,
			delete: false,
		}
	}

	pub const fn all() -> Self {
		Self {
			save_update: true,
			delete: true,
		}
	}

	pub fn save_update(&self) -> bool {
		self.save_update
	}

	pub fn delete(&self) -> bool {
		self.delete
	}

	pub fn includes(&self, kind: CascadeKind) -> bool {
		match kind {
			CascadeKind::SaveUpdate => self.save_update,
			CascadeKind::Delete => self.delete,
		}
	}
}

impl Default for CascadeOptions {
	fn default() -> Self {
		Self {
			save_update: true,
			delete: false,
		}
	}
}

impl FromStr for CascadeOptions {
	type Err = GenericRelationError;

	fn from_str(s: &str) -> Result<Self> {
		let mut options = Self::none();
		for option in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
			match option {
				"save-update" => options.save_update = true,
				"delete" => options.delete = true,
				"all" => options = Self::all(),
				// Merge is a session-level concern outside this crate
				"merge" => {}
				other => return Err(GenericRelationError::InvalidCascade(other.to_string())),
			}
		}
		Ok(options)
	}
}

impl fmt::Display for CascadeOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut parts = Vec::new();
		if self.save_update {
			parts.push("save-update");
		}
		if self.delete {
			parts.push("delete");
		}
		write!(f, "{}", parts.join(", "))
	}
}
