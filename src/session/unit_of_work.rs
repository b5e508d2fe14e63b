//! Flush planning and execution

use super::Session;
use crate::dependency::{CascadeKind, DependencyProcessor};
use crate::error::{GenericRelationError, Result};
use crate::instance::{Instance, InstanceId, ObjectState};
use crate::value::Row;
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::fmt;
use std::sync::Arc;

/// Row counts written by one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
	pub inserted: usize,
	pub updated: usize,
	pub deleted: usize,
}

type ProcessorGroup = (Arc<dyn DependencyProcessor>, Vec<Instance>);

/// State of a single flush: the instances being saved and deleted, and the
/// ordering constraints dependency processors declared between them.
pub struct UnitOfWork {
	session: Session,
	saves: IndexMap<InstanceId, Instance>,
	deletes: IndexMap<InstanceId, Instance>,
	mapper_edges: IndexSet<(CascadeKind, String, String)>,
	instance_edges: IndexSet<(CascadeKind, InstanceId, InstanceId)>,
}

impl UnitOfWork {
	pub(crate) fn new(session: Session) -> Self {
		Self {
			session,
			saves: IndexMap::new(),
			deletes: IndexMap::new(),
			mapper_edges: IndexSet::new(),
			instance_edges: IndexSet::new(),
		}
	}

	pub fn session(&self) -> &Session {
		&self.session
	}

	/// `true` when `instance` will be inserted or updated by this flush
	pub fn is_saving(&self, instance: &Instance) -> bool {
		self.saves.contains_key(&instance.id())
	}

	/// `true` when `instance` will be deleted by this flush
	pub fn is_deleted(&self, instance: &Instance) -> bool {
		self.deletes.contains_key(&instance.id())
	}

	/// Returns `false` when already registered or being deleted
	pub fn register_save(&mut self, instance: &Instance) -> bool {
		if self.is_deleted(instance) {
			return false;
		}
		self.saves.insert(instance.id(), instance.clone()).is_none()
	}

	pub fn register_delete(&mut self, instance: &Instance) -> bool {
		self.saves.shift_remove(&instance.id());
		self.deletes.insert(instance.id(), instance.clone()).is_none()
	}

	/// Attach `instance` to the session if needed and include it in the
	/// flush when it has changes.
	pub fn cascade_save(&mut self, instance: &Instance) -> Result<()> {
		if self.is_deleted(instance) || instance.object_state() == ObjectState::Deleted {
			return Ok(());
		}
		if !self.session.contains(instance) {
			self.session.add(instance)?;
		}
		match instance.object_state() {
			ObjectState::Pending => {
				self.register_save(instance);
			}
			ObjectState::Persistent if instance.is_modified() => {
				self.register_save(instance);
			}
			_ => {}
		}
		Ok(())
	}

	/// Mark `instance` deleted in the session and include it in the flush
	pub fn cascade_delete(&mut self, instance: &Instance) -> Result<()> {
		if !self.session.contains(instance) {
			return Ok(());
		}
		self.session.delete(instance)?;
		match instance.object_state() {
			ObjectState::Deleted => {
				self.register_delete(instance);
			}
			_ => {
				self.saves.shift_remove(&instance.id());
			}
		}
		Ok(())
	}

	/// Rows of `before` are written (or deleted) ahead of rows of `after`
	pub fn add_mapper_dependency(&mut self, kind: CascadeKind, before: &str, after: &str) {
		self.mapper_edges
			.insert((kind, before.to_string(), after.to_string()));
	}

	pub fn add_instance_dependency(&mut self, kind: CascadeKind, before: &Instance, after: &Instance) {
		self.instance_edges.insert((kind, before.id(), after.id()));
	}

	fn collect_from_session(&mut self) {
		for instance in self.session.instances() {
			match instance.object_state() {
				ObjectState::Pending => {
					self.register_save(&instance);
				}
				ObjectState::Persistent if instance.is_modified() => {
					self.register_save(&instance);
				}
				ObjectState::Deleted => {
					self.register_delete(&instance);
				}
				_ => {}
			}
		}
		let session = &self.session;
		self.saves.retain(|_, instance| session.contains(instance));
	}

	fn group_by_processor(instances: &IndexMap<InstanceId, Instance>) -> Vec<ProcessorGroup> {
		let mut groups: IndexMap<usize, ProcessorGroup> = IndexMap::new();
		for instance in instances.values() {
			for processor in instance.mapper().processors() {
				let key = Arc::as_ptr(&processor) as *const () as usize;
				groups
					.entry(key)
					.or_insert_with(|| (processor, Vec::new()))
					.1
					.push(instance.clone());
			}
		}
		groups.into_values().collect()
	}

	/// Let processors pull related instances in until nothing changes
	fn presort(&mut self) -> Result<()> {
		self.collect_from_session();
		loop {
			let before = (self.saves.len(), self.deletes.len());
			for (processor, states) in Self::group_by_processor(&self.saves) {
				processor.presort_saves(self, &states)?;
			}
			for (processor, states) in Self::group_by_processor(&self.deletes) {
				processor.presort_deletes(self, &states)?;
			}
			self.collect_from_session();
			if (self.saves.len(), self.deletes.len()) == before {
				return Ok(());
			}
		}
	}

	pub(crate) fn execute(mut self) -> Result<FlushSummary> {
		self.presort()?;
		let mut summary = FlushSummary::default();
		if self.saves.is_empty() && self.deletes.is_empty() {
			return Ok(summary);
		}
		tracing::trace!(saves = self.saves.len(), deletes = self.deletes.len(), "flush planned");

		let save_groups = Self::group_by_processor(&self.saves);
		let delete_groups = Self::group_by_processor(&self.deletes);
		for (processor, states) in save_groups.iter().chain(&delete_groups) {
			processor.flush_actions_for_relationship(&mut self, states);
		}

		for batch in self.batches(CascadeKind::SaveUpdate, &save_groups)? {
			self.write_saves(&batch, &save_groups, &mut summary)?;
		}
		for batch in self.batches(CascadeKind::Delete, &delete_groups)? {
			self.write_deletes(&batch, &delete_groups, &mut summary)?;
		}

		tracing::debug!(
			inserted = summary.inserted,
			updated = summary.updated,
			deleted = summary.deleted,
			"flush complete"
		);
		Ok(summary)
	}

	/// Split the flush into ordered batches.
	///
	/// One batch per mapper when the type-level graph is acyclic; otherwise
	/// one batch per instance, ordered by row-level dependencies.
	fn batches(&mut self, kind: CascadeKind, groups: &[ProcessorGroup]) -> Result<Vec<Vec<Instance>>> {
		let instances: Vec<Instance> = match kind {
			CascadeKind::SaveUpdate => self.saves.values().cloned().collect(),
			CascadeKind::Delete => self.deletes.values().cloned().collect(),
		};
		if instances.is_empty() {
			return Ok(Vec::new());
		}

		let mut graph = DiGraph::<String, ()>::new();
		let mut nodes: IndexMap<String, NodeIndex> = IndexMap::new();
		for instance in &instances {
			let name = instance.mapper().name();
			if !nodes.contains_key(name) {
				nodes.insert(name.to_string(), graph.add_node(name.to_string()));
			}
		}
		for (edge_kind, before, after) in &self.mapper_edges {
			if *edge_kind != kind {
				continue;
			}
			if let (Some(&a), Some(&b)) = (nodes.get(before), nodes.get(after)) {
				graph.update_edge(a, b, ());
			}
		}

		match toposort(&graph, None) {
			Ok(order) => Ok(order
				.into_iter()
				.map(|idx| {
					instances
						.iter()
						.filter(|instance| instance.mapper().name() == graph[idx])
						.cloned()
						.collect()
				})
				.collect()),
			Err(cycle) => {
				tracing::trace!(
					type_name = %graph[cycle.node_id()],
					"type-level dependency cycle; ordering rows individually"
				);
				for (processor, states) in groups {
					processor.flush_actions_for_instances(self, states, kind == CascadeKind::Delete);
				}
				self.instance_batches(kind, &instances)
			}
		}
	}

	fn instance_batches(&self, kind: CascadeKind, instances: &[Instance]) -> Result<Vec<Vec<Instance>>> {
		let mut graph = DiGraph::<Instance, ()>::new();
		let nodes: IndexMap<InstanceId, NodeIndex> = instances
			.iter()
			.map(|instance| (instance.id(), graph.add_node(instance.clone())))
			.collect();
		for (edge_kind, before, after) in &self.instance_edges {
			if *edge_kind != kind {
				continue;
			}
			if let (Some(&a), Some(&b)) = (nodes.get(before), nodes.get(after)) {
				graph.update_edge(a, b, ());
			}
		}
		let order = toposort(&graph, None).map_err(|cycle| {
			GenericRelationError::CircularDependency(format!(
				"{} depends on itself through its relationships",
				graph[cycle.node_id()]
			))
		})?;
		Ok(order.into_iter().map(|idx| vec![graph[idx].clone()]).collect())
	}

	fn members(batch: &[Instance], states: &[Instance]) -> Vec<Instance> {
		states
			.iter()
			.filter(|state| batch.contains(state))
			.cloned()
			.collect()
	}

	fn write_saves(&self, batch: &[Instance], groups: &[ProcessorGroup], summary: &mut FlushSummary) -> Result<()> {
		for (processor, states) in groups {
			let members = Self::members(batch, states);
			if !members.is_empty() && processor.has_pending_changes(self, &members, false) {
				processor.process_saves(self, &members)?;
			}
		}

		for instance in batch {
			let mapper = instance.mapper();
			match instance.object_state() {
				ObjectState::Pending => {
					let row: Row = instance
						.fields()
						.into_iter()
						.filter(|(name, _)| mapper.has_column(name))
						.collect();
					let stored = self.session.backend().insert(mapper, row)?;
					instance.write_fields(|fields| fields.extend(stored));
					instance.set_object_state(ObjectState::Persistent);
					summary.inserted += 1;
					tracing::trace!(instance = %instance, "inserted");
				}
				ObjectState::Persistent => {
					let changes = instance.changed_fields();
					if !changes.is_empty() {
						self.session.backend()
							.update(mapper, &instance.committed_identity(), changes)?;
						self.session.forget(instance);
						summary.updated += 1;
						tracing::trace!(instance = %instance, "updated");
					}
				}
				_ => continue,
			}
			instance.commit_state();
			self.session.remember(instance);
		}
		Ok(())
	}

	fn write_deletes(&self, batch: &[Instance], groups: &[ProcessorGroup], summary: &mut FlushSummary) -> Result<()> {
		for (processor, states) in groups {
			let members = Self::members(batch, states);
			if !members.is_empty() {
				processor.process_deletes(self, &members)?;
			}
		}

		for instance in batch {
			self.session
				.backend()
				.delete(instance.mapper(), &instance.committed_identity())?;
			self.session.expunge(instance);
			summary.deleted += 1;
			tracing::trace!(instance = %instance, "deleted");
		}
		Ok(())
	}
}

impl fmt::Debug for UnitOfWork {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UnitOfWork")
			.field("session", &self.session.id())
			.field("saves", &self.saves.len())
			.field("deletes", &self.deletes.len())
			.finish_non_exhaustive()
	}
}
