use super::{CascadeKind, CascadeOptions, SkipReason, SyncOperation, SyncOutcome};
use crate::error::Result;
use crate::instance::Instance;
use crate::mapping::Mapper;
use crate::session::UnitOfWork;
use crate::value::{Identity, QueryValue};
use std::sync::Arc;

/// Conventional many-to-one dependency processing.
///
/// The parent row holds the identifier columns; the target is the row they
/// point at. Every operation takes the target mapper as an argument, so a
/// single processor can serve references whose target type varies per row.
#[derive(Debug, Clone)]
pub struct ManyToOneProcessor {
	parent: String,
	key: String,
	id_columns: Vec<String>,
	cascade: CascadeOptions,
}

impl ManyToOneProcessor {
	pub fn new(
		parent: impl Into<String>,
		key: impl Into<String>,
		id_columns: Vec<String>,
		cascade: CascadeOptions,
	) -> Self {
		Self {
			parent: parent.into(),
			key: key.into(),
			id_columns,
			cascade,
		}
	}

	pub fn parent(&self) -> &str {
		&self.parent
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Identifier columns on the parent, in target primary-key order
	pub fn id_columns(&self) -> &[String] {
		&self.id_columns
	}

	pub fn cascade(&self) -> CascadeOptions {
		self.cascade
	}

	/// Identifier values currently stored on `state`
	pub fn reference_identity(&self, state: &Instance) -> Identity {
		Identity::new(self.id_columns.iter().map(|column| state.get(column)))
	}

	fn cached_child(&self, state: &Instance) -> Option<Instance> {
		state.cached_related(&self.key).flatten()
	}

	fn conforms(target: &Mapper, child: &Instance) -> bool {
		let mapper = child.mapper();
		mapper.name() == target.name()
			|| target
				.registry()
				.is_some_and(|registry| registry.is_a(mapper, target.name()))
	}

	pub fn has_pending_changes(
		&self,
		target: &Arc<Mapper>,
		uow: &UnitOfWork,
		states: &[Instance],
		is_delete: bool,
	) -> bool {
		if is_delete {
			return self.cascade.delete()
				&& states.iter().any(|state| {
					let identity = self.reference_identity(state);
					self.cached_child(state).is_some()
						|| (identity.len() == target.primary_key().len() && identity.is_complete())
				});
		}
		states.iter().any(|state| {
			state.is_related_dirty(&self.key)
				|| self
					.cached_child(state)
					.is_some_and(|child| uow.is_saving(&child))
		})
	}

	/// Bring assigned targets into the flush when save-update cascades
	pub fn presort_saves(&self, target: &Arc<Mapper>, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()> {
		if !self.cascade.save_update() {
			return Ok(());
		}
		for state in states {
			if let Some(child) = self.cached_child(state)
				&& Self::conforms(target, &child)
			{
				uow.cascade_save(&child)?;
			}
		}
		Ok(())
	}

	/// Schedule referenced targets for deletion when delete cascades.
	///
	/// Targets that are not cached are loaded through the session.
	pub fn presort_deletes(&self, target: &Arc<Mapper>, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()> {
		if !self.cascade.delete() {
			return Ok(());
		}
		for state in states {
			let child = match state.cached_related(&self.key) {
				Some(cached) => cached,
				None => {
					let identity = self.reference_identity(state);
					uow.session().get(target, &identity)?
				}
			};
			if let Some(child) = child
				&& Self::conforms(target, &child)
				&& !uow.is_deleted(&child)
			{
				tracing::trace!(parent = %state, target = %child, "cascading delete");
				uow.cascade_delete(&child)?;
			}
		}
		Ok(())
	}

	/// Targets are inserted before parents and deleted after them
	pub fn flush_actions_for_relationship(&self, target: &Arc<Mapper>, uow: &mut UnitOfWork) {
		uow.add_mapper_dependency(CascadeKind::SaveUpdate, target.name(), &self.parent);
		uow.add_mapper_dependency(CascadeKind::Delete, &self.parent, target.name());
	}

	pub fn flush_actions_for_instances(
		&self,
		target: &Arc<Mapper>,
		uow: &mut UnitOfWork,
		states: &[Instance],
		is_delete: bool,
	) {
		for state in states {
			let Some(child) = self.cached_child(state) else {
				continue;
			};
			if !Self::conforms(target, &child) || child == *state {
				continue;
			}
			if is_delete {
				if uow.is_deleted(&child) {
					uow.add_instance_dependency(CascadeKind::Delete, state, &child);
				}
			} else if uow.is_saving(&child) {
				uow.add_instance_dependency(CascadeKind::SaveUpdate, &child, state);
			}
		}
	}

	/// Copy target keys into parents whose reference changed.
	///
	/// References cleared by assignment were already nulled at that time.
	pub fn process_saves(&self, target: &Arc<Mapper>, uow: &UnitOfWork, states: &[Instance]) -> Result<()> {
		for state in states {
			if !state.is_related_dirty(&self.key) {
				continue;
			}
			if let Some(child) = self.cached_child(state) {
				self.synchronize(target, uow, state, Some(&child), false, Some(SyncOperation::Add));
			}
		}
		Ok(())
	}

	/// The reference is stored on the row being deleted, so nothing is copied
	pub fn process_deletes(&self, target: &Arc<Mapper>, _uow: &UnitOfWork, states: &[Instance]) -> Result<()> {
		tracing::trace!(
			key = %self.key,
			target = target.name(),
			count = states.len(),
			"many-to-one deletes need no key synchronization"
		);
		Ok(())
	}

	/// Copy the child's primary key into the parent's identifier columns, or
	/// null them.
	///
	/// Never fails: parents being deleted and children outside the session
	/// are skipped, the latter with a warning.
	pub fn synchronize(
		&self,
		target: &Arc<Mapper>,
		uow: &UnitOfWork,
		parent: &Instance,
		child: Option<&Instance>,
		clear: bool,
		operation: Option<SyncOperation>,
	) -> SyncOutcome {
		if uow.is_deleted(parent) {
			return SyncOutcome::Skipped(SkipReason::ParentDeleted);
		}

		if let (Some(operation), Some(child)) = (operation, child)
			&& !uow.session().contains(child)
		{
			tracing::warn!(
				"Object of type {} not in session, {} operation along '{}.{}' won't proceed",
				child.mapper().name(),
				operation.as_str(),
				self.parent,
				self.key
			);
			return SyncOutcome::Skipped(SkipReason::ChildNotInSession);
		}

		match child {
			Some(child) if !clear => {
				let values: Vec<QueryValue> = target.primary_key().iter().map(|pk| child.get(pk)).collect();
				for (column, value) in self.id_columns.iter().zip(values) {
					parent.set(column, value);
				}
				let identity = self.reference_identity(parent);
				if !identity.is_complete() {
					tracing::warn!(
						parent = %parent,
						target = %child,
						"target primary key is incomplete; '{}' left partially null",
						self.key
					);
				}
				SyncOutcome::Populated
			}
			_ => {
				for column in &self.id_columns {
					parent.set(column, QueryValue::Null);
				}
				SyncOutcome::Cleared
			}
		}
	}
}
