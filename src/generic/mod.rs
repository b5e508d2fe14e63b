//! Generic (polymorphic) relationships
//!
//! A generic relationship lets one row reference a row of any registered
//! type through a discriminator column and one or more identifier columns.
//! The pieces:
//!
//! - [`polymorphic_reference`] declares the relationship on a parent mapper
//! - [`TypeMapper`] translates between types and discriminator values
//! - [`GenericAttribute`] reads and assigns the reference on instances
//! - [`GenericDependencyProcessor`] copies keys and orders writes at flush

pub mod attribute;
pub mod processor;
pub mod relationship;
pub mod type_mapper;

pub use attribute::{DiscriminatorAccessor, GenericAttribute, LoadState, Resolution, UnresolvedReason};
pub use processor::{GenericDependencyProcessor, TypeGroups};
pub use relationship::{
	ColumnRef, GenericRelationship, GenericRelationshipBuilder, IdColumns, ResolvedRelationship, TargetResolver,
	polymorphic_reference,
};
pub use type_mapper::{NameTypeMapper, TypeCodeMapper, TypeMapper};
