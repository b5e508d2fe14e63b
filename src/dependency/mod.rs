//! Flush-time dependency processing
//!
//! A [`DependencyProcessor`] participates in [`Session::flush`]: it pulls
//! related instances into the flush (presort), declares which rows must be
//! written before which (flush actions), and copies key values between rows
//! once the rows they depend on have been written (process).
//!
//! [`Session::flush`]: crate::session::Session::flush

mod cascade;
mod many_to_one;

pub use cascade::{CascadeKind, CascadeOptions};
pub use many_to_one::ManyToOneProcessor;

use crate::error::Result;
use crate::instance::Instance;
use crate::session::UnitOfWork;

/// Why a key synchronization did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// The parent row is being deleted in this flush
	ParentDeleted,
	/// The referenced instance is not attached to the flushing session
	ChildNotInSession,
}

/// Result of synchronizing a parent's identifier columns with its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	/// Identifier columns were copied from the target's primary key
	Populated,
	/// Identifier columns were set to null
	Cleared,
	Skipped(SkipReason),
}

/// The stage of a flush a synchronization runs in, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
	Add,
	Delete,
}

impl SyncOperation {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncOperation::Add => "add",
			SyncOperation::Delete => "delete",
		}
	}
}

/// Participant in the unit-of-work flush.
///
/// `states` are always instances of the processor's parent type (or one of
/// its subtypes) taken from the current flush.
pub trait DependencyProcessor: Send + Sync {
	/// Relationship key this processor serves
	fn key(&self) -> &str;

	/// Type name of the parent mapper
	fn parent(&self) -> &str;

	/// `true` when any of `states` needs work from this processor
	fn has_pending_changes(&self, uow: &UnitOfWork, states: &[Instance], is_delete: bool) -> bool;

	/// Pull related instances into the flush for parents being saved
	fn presort_saves(&self, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()>;

	/// Pull related instances into the flush for parents being deleted
	fn presort_deletes(&self, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()>;

	/// Declare type-level ordering between the parent and its targets
	fn flush_actions_for_relationship(&self, uow: &mut UnitOfWork, states: &[Instance]);

	/// Declare row-level ordering, used when type-level ordering is cyclic
	fn flush_actions_for_instances(&self, uow: &mut UnitOfWork, states: &[Instance], is_delete: bool);

	/// Synchronize keys of parents about to be inserted or updated
	fn process_saves(&self, uow: &UnitOfWork, states: &[Instance]) -> Result<()>;

	/// Synchronize keys of parents about to be deleted
	fn process_deletes(&self, uow: &UnitOfWork, states: &[Instance]) -> Result<()>;
}
