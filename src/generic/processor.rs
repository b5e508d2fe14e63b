//! Flush coordination for generic relationships
//!
//! Parents referencing different target types need different key
//! synchronization. [`GenericDependencyProcessor`] partitions the parents of
//! a flush by the type their discriminator names and runs the conventional
//! many-to-one algorithm once per partition, with that partition's target
//! mapper passed in explicitly.

use super::attribute::DiscriminatorAccessor;
use super::relationship::TargetResolver;
use crate::dependency::{DependencyProcessor, ManyToOneProcessor, SyncOperation, SyncOutcome};
use crate::error::Result;
use crate::instance::Instance;
use crate::mapping::Mapper;
use crate::session::UnitOfWork;
use crate::value::QueryValue;
use std::sync::Arc;

/// Parents partitioned by resolved target type; `None` for unresolvable ones
pub type TypeGroups = Vec<(Option<Arc<Mapper>>, Vec<Instance>)>;

/// Dependency processor for one generic relationship
#[derive(Debug)]
pub struct GenericDependencyProcessor {
	inner: ManyToOneProcessor,
	discriminator: DiscriminatorAccessor,
	resolver: TargetResolver,
}

impl GenericDependencyProcessor {
	pub(crate) fn new(
		inner: ManyToOneProcessor,
		discriminator: DiscriminatorAccessor,
		resolver: TargetResolver,
	) -> Self {
		Self {
			inner,
			discriminator,
			resolver,
		}
	}

	/// Target type named by the parent's in-memory discriminator
	pub fn mapper_for_state(&self, state: &Instance) -> Option<Arc<Mapper>> {
		self.resolver.resolve(&self.discriminator.read(state))
	}

	/// Partition `states` by resolved target type, in first-seen order
	pub fn group_by_resolved_type(&self, states: &[Instance]) -> TypeGroups {
		let mut groups: TypeGroups = Vec::new();
		for state in states {
			let target = self.mapper_for_state(state);
			let position = groups.iter().position(|(mapper, _)| {
				mapper.as_ref().map(|m| m.name()) == target.as_ref().map(|m| m.name())
			});
			match position {
				Some(index) => groups[index].1.push(state.clone()),
				None => groups.push((target, vec![state.clone()])),
			}
		}
		groups
	}

	fn resolved_groups(&self, states: &[Instance]) -> impl Iterator<Item = (Arc<Mapper>, Vec<Instance>)> {
		self.group_by_resolved_type(states)
			.into_iter()
			.filter_map(|(target, members)| target.map(|target| (target, members)))
	}

	/// Copy identifier values from cached targets into parents whose
	/// identifier columns are still null. Targets outside the flushing
	/// session are left for `synchronize` to report.
	fn fill_deferred_identity(&self, target: &Mapper, uow: &UnitOfWork, states: &[Instance]) {
		for state in states {
			let identity = self.inner.reference_identity(state);
			if !identity.iter().any(QueryValue::is_null) {
				continue;
			}
			let Some(child) = state.cached_related(self.inner.key()).flatten() else {
				continue;
			};
			if !uow.session().contains(&child) {
				continue;
			}
			for (column, pk) in self.inner.id_columns().iter().zip(target.primary_key()) {
				state.set(column, child.get(pk));
			}
		}
	}

	pub fn synchronize(
		&self,
		target: &Arc<Mapper>,
		uow: &UnitOfWork,
		parent: &Instance,
		child: Option<&Instance>,
		clear: bool,
		operation: Option<SyncOperation>,
	) -> SyncOutcome {
		self.inner
			.synchronize(target, uow, parent, child, clear, operation)
	}
}

impl DependencyProcessor for GenericDependencyProcessor {
	fn key(&self) -> &str {
		self.inner.key()
	}

	fn parent(&self) -> &str {
		self.inner.parent()
	}

	fn has_pending_changes(&self, uow: &UnitOfWork, states: &[Instance], is_delete: bool) -> bool {
		self.group_by_resolved_type(states)
			.iter()
			.any(|(target, members)| match target {
				Some(target) => self
					.inner
					.has_pending_changes(target, uow, members, is_delete),
				None => !is_delete && members.iter().any(|s| s.is_related_dirty(self.inner.key())),
			})
	}

	fn presort_saves(&self, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()> {
		for (target, members) in self.resolved_groups(states) {
			self.inner.presort_saves(&target, uow, &members)?;
		}
		Ok(())
	}

	fn presort_deletes(&self, uow: &mut UnitOfWork, states: &[Instance]) -> Result<()> {
		for (target, members) in self.resolved_groups(states) {
			self.inner.presort_deletes(&target, uow, &members)?;
		}
		Ok(())
	}

	fn flush_actions_for_relationship(&self, uow: &mut UnitOfWork, states: &[Instance]) {
		for (target, _) in self.resolved_groups(states) {
			self.inner.flush_actions_for_relationship(&target, uow);
		}
	}

	fn flush_actions_for_instances(&self, uow: &mut UnitOfWork, states: &[Instance], is_delete: bool) {
		for (target, members) in self.resolved_groups(states) {
			self.inner
				.flush_actions_for_instances(&target, uow, &members, is_delete);
		}
	}

	fn process_saves(&self, uow: &UnitOfWork, states: &[Instance]) -> Result<()> {
		for (target, members) in self.resolved_groups(states) {
			self.fill_deferred_identity(&target, uow, &members);
			self.inner.process_saves(&target, uow, &members)?;
		}
		Ok(())
	}

	fn process_deletes(&self, uow: &UnitOfWork, states: &[Instance]) -> Result<()> {
		for (target, members) in self.resolved_groups(states) {
			self.inner.process_deletes(&target, uow, &members)?;
		}
		Ok(())
	}
}
