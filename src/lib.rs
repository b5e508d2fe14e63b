//! # Reinhardt Generic Relations
//!
//! Polymorphic many-to-one references for the Reinhardt ORM layer.
//!
//! A generic relationship lets one row point at a row of any registered type.
//! The reference is stored as a discriminator naming the target type plus
//! one or more identifier columns holding the target's primary key. This is
//! the pattern commonly used for comments, tags, and audit entries that can
//! attach to anything.
//!
//! ## Features
//!
//! - **Declaration**: [`polymorphic_reference`] on any [`Mapper`], or from
//!   TOML through [`config::RelationSettings`]
//! - **Discriminators**: type names ([`generic::NameTypeMapper`]), integer
//!   codes ([`generic::TypeCodeMapper`]), or a hybrid property computed from
//!   the row
//! - **Composite keys**: several identifier columns map onto a composite
//!   primary key
//! - **Flush coordination**: identifier values of targets inserted in the
//!   same flush are copied in before the referencing row is written
//! - **Query predicates**: equality, inequality, null, and type-or-subtype
//!   filters that evaluate in memory and render through `sea-query`
//!
//! ## Quick Start
//!
//! ```
//! use reinhardt_generic_relations::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let registry = MapperRegistry::new();
//! let document = Mapper::builder("Document")
//!     .column(Column::new("id").primary_key())
//!     .build()?;
//! let comment = Mapper::builder("Comment")
//!     .column(Column::new("id").primary_key())
//!     .column(Column::new("object_type"))
//!     .column(Column::new("object_id"))
//!     .build()?;
//! registry.register(document.clone())?;
//! registry.register(comment.clone())?;
//! polymorphic_reference("object_type", "object_id").bind_to_class(&comment, "subject")?;
//! registry.configure()?;
//!
//! let session = Session::new(Arc::new(MemoryBackend::for_registry(&registry)));
//! let doc = Instance::new(&document);
//! let note = Instance::new(&comment);
//! note.set_related("subject", Some(&doc))?;
//! session.add(&note)?;
//! session.flush()?;
//!
//! assert_eq!(note.get("object_type"), QueryValue::from("Document"));
//! assert_eq!(note.get("object_id"), doc.get("id"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod generic;
pub mod hybrid;
pub mod instance;
pub mod mapping;
pub mod predicate;
pub mod session;
pub mod value;

pub use error::{BackendError, GenericRelationError, Result};
pub use generic::{GenericRelationship, polymorphic_reference};
pub use instance::Instance;
pub use mapping::{Column, Mapper, MapperRegistry};
pub use session::Session;

/// Re-exports for common use
pub mod prelude {
	pub use crate::config::RelationSettings;
	pub use crate::dependency::CascadeOptions;
	pub use crate::error::{GenericRelationError, Result};
	pub use crate::generic::{
		GenericRelationship, NameTypeMapper, Resolution, TypeCodeMapper, TypeMapper, UnresolvedReason,
		polymorphic_reference,
	};
	pub use crate::hybrid::HybridProperty;
	pub use crate::instance::{Instance, ObjectState};
	pub use crate::mapping::{Column, Mapper, MapperRegistry};
	pub use crate::predicate::{Operand, Predicate};
	pub use crate::session::{Backend, MemoryBackend, Session};
	pub use crate::value::{Identity, QueryValue, Row};
}
