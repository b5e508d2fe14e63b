//! Sessions
//!
//! A [`Session`] tracks instances, keeps an identity map of loaded rows,
//! and writes pending changes to its [`Backend`] on [`Session::flush`].
//! Relationship attributes use it to lazily load the rows they reference.

mod backend;
mod unit_of_work;

pub use backend::{Backend, MemoryBackend};
pub use unit_of_work::{FlushSummary, UnitOfWork};

use crate::dependency::CascadeKind;
use crate::error::{GenericRelationError, Result};
use crate::instance::{Instance, InstanceId, ObjectState};
use crate::mapping::Mapper;
use crate::predicate::Predicate;
use crate::value::Identity;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

type IdentityKey = (String, Identity);

pub(crate) struct SessionInner {
	id: Uuid,
	backend: Arc<dyn Backend>,
	instances: RwLock<IndexMap<InstanceId, Instance>>,
	identity_map: RwLock<HashMap<IdentityKey, Instance>>,
}

/// Unit-of-work session over a [`Backend`]
///
/// Cloning a session yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl Session {
	/// Open a session
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::instance::{Instance, ObjectState};
	/// use reinhardt_generic_relations::mapping::{Column, Mapper, MapperRegistry};
	/// use reinhardt_generic_relations::session::{MemoryBackend, Session};
	/// use reinhardt_generic_relations::value::{Identity, QueryValue};
	/// use std::sync::Arc;
	///
	/// let registry = MapperRegistry::new();
	/// let image = Mapper::builder("Image")
	///     .column(Column::new("id").primary_key())
	///     .build()
	///     .unwrap();
	/// registry.register(image.clone()).unwrap();
	///
	/// let session = Session::new(Arc::new(MemoryBackend::for_registry(&registry)));
	/// let img = Instance::new(&image);
	/// session.add(&img).unwrap();
	/// assert_eq!(img.object_state(), ObjectState::Pending);
	///
	/// session.flush().unwrap();
	/// assert_eq!(img.object_state(), ObjectState::Persistent);
	/// assert_eq!(img.get("id"), QueryValue::from(1));
	///
	/// let loaded = session.get(&image, &Identity::from(1)).unwrap();
	/// assert_eq!(loaded, Some(img));
	/// ```
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self {
			inner: Arc::new(SessionInner {
				id: Uuid::new_v4(),
				backend,
				instances: RwLock::new(IndexMap::new()),
				identity_map: RwLock::new(HashMap::new()),
			}),
		}
	}

	pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
		Self { inner }
	}

	pub fn id(&self) -> Uuid {
		self.inner.id
	}

	pub fn backend(&self) -> &Arc<dyn Backend> {
		&self.inner.backend
	}

	/// `true` when `instance` is attached to this session
	pub fn contains(&self, instance: &Instance) -> bool {
		self.inner.instances.read().contains_key(&instance.id())
	}

	/// Every attached instance, in attachment order
	pub fn instances(&self) -> Vec<Instance> {
		self.inner.instances.read().values().cloned().collect()
	}

	/// Attach an instance, cascading along save-update relationships.
	///
	/// Transient instances become pending. An instance attached to another
	/// live session is rejected.
	pub fn add(&self, instance: &Instance) -> Result<()> {
		let mut visited = HashSet::from([instance.id()]);
		self.add_cascading(instance, &mut visited)
	}

	fn add_cascading(&self, instance: &Instance, visited: &mut HashSet<InstanceId>) -> Result<()> {
		self.attach(instance)?;
		for attribute in instance.mapper().attributes() {
			for related in attribute.cascade_iterator(CascadeKind::SaveUpdate, instance, visited) {
				self.add_cascading(&related, visited)?;
			}
		}
		Ok(())
	}

	fn attach(&self, instance: &Instance) -> Result<()> {
		if let Some(owner) = instance.session()
			&& owner.id() != self.id()
		{
			return Err(GenericRelationError::InvalidRequest(format!(
				"{} is already attached to session {}",
				instance,
				owner.id()
			)));
		}

		match instance.object_state() {
			ObjectState::Transient => instance.set_object_state(ObjectState::Pending),
			ObjectState::Detached => {
				let state = if instance.committed_identity().is_complete() {
					ObjectState::Persistent
				} else {
					ObjectState::Pending
				};
				instance.set_object_state(state);
			}
			ObjectState::Deleted => instance.set_object_state(ObjectState::Persistent),
			ObjectState::Pending | ObjectState::Persistent => {
				if self.contains(instance) {
					return Ok(());
				}
			}
		}

		instance.bind_session(Arc::downgrade(&self.inner));
		self.inner
			.instances
			.write()
			.insert(instance.id(), instance.clone());
		if instance.object_state() == ObjectState::Persistent {
			self.remember(instance);
		}
		tracing::trace!(session = %self.id(), instance = %instance, "attached");
		Ok(())
	}

	pub(crate) fn remember(&self, instance: &Instance) {
		let key = (instance.mapper().name().to_string(), instance.committed_identity());
		self.inner.identity_map.write().insert(key, instance.clone());
	}

	fn forget(&self, instance: &Instance) {
		let key = (instance.mapper().name().to_string(), instance.committed_identity());
		let mut identity_map = self.inner.identity_map.write();
		if identity_map.get(&key).is_some_and(|known| known == instance) {
			identity_map.remove(&key);
		}
	}

	/// Mark an instance for deletion on the next flush.
	///
	/// Pending instances are simply detached. Delete cascades follow
	/// relationship values already loaded; the rest are resolved at flush.
	pub fn delete(&self, instance: &Instance) -> Result<()> {
		if !self.contains(instance) {
			return Err(GenericRelationError::InvalidRequest(format!(
				"{} is not attached to this session",
				instance
			)));
		}
		let mut visited = HashSet::from([instance.id()]);
		self.delete_cascading(instance, &mut visited);
		Ok(())
	}

	fn delete_cascading(&self, instance: &Instance, visited: &mut HashSet<InstanceId>) {
		match instance.object_state() {
			ObjectState::Pending => {
				self.expunge(instance);
				return;
			}
			ObjectState::Persistent => instance.set_object_state(ObjectState::Deleted),
			_ => return,
		}
		for attribute in instance.mapper().attributes() {
			for related in attribute.cascade_iterator(CascadeKind::Delete, instance, visited) {
				if self.contains(&related) {
					self.delete_cascading(&related, visited);
				}
			}
		}
	}

	/// Load by primary key, consulting the identity map first.
	///
	/// Returns `Ok(None)` for incomplete identities and missing rows.
	pub fn get(&self, mapper: &Arc<Mapper>, identity: &Identity) -> Result<Option<Instance>> {
		if !identity.is_complete() || identity.len() != mapper.primary_key().len() {
			return Ok(None);
		}

		let key = (mapper.name().to_string(), identity.clone());
		if let Some(known) = self.inner.identity_map.read().get(&key).cloned() {
			return Ok(match known.object_state() {
				ObjectState::Deleted | ObjectState::Detached => None,
				_ => Some(known),
			});
		}

		let Some(row) = self.inner.backend.fetch(mapper, identity)? else {
			tracing::trace!(session = %self.id(), type_name = mapper.name(), %identity, "row not found");
			return Ok(None);
		};
		Ok(Some(self.load(mapper, row)))
	}

	fn load(&self, mapper: &Arc<Mapper>, row: crate::value::Row) -> Instance {
		let instance = Instance::from_row(mapper, row);
		let key = (mapper.name().to_string(), instance.identity());
		if let Some(known) = self.inner.identity_map.read().get(&key) {
			return known.clone();
		}
		instance.bind_session(Arc::downgrade(&self.inner));
		self.inner
			.instances
			.write()
			.insert(instance.id(), instance.clone());
		self.remember(&instance);
		instance
	}

	/// Run `predicate` against the mapper's stored rows.
	///
	/// Unflushed changes are not visible to the query.
	pub fn query(&self, mapper: &Arc<Mapper>, predicate: &Predicate) -> Result<Vec<Instance>> {
		let rows = self.inner.backend.select(mapper, predicate)?;
		Ok(rows.into_iter().map(|row| self.load(mapper, row)).collect())
	}

	/// Detach an instance without touching the database
	pub fn expunge(&self, instance: &Instance) {
		if self.inner.instances.write().shift_remove(&instance.id()).is_none() {
			return;
		}
		self.forget(instance);
		instance.unbind_session();
		instance.set_object_state(ObjectState::Detached);
	}

	/// Detach every instance
	pub fn close(&self) {
		for instance in self.instances() {
			self.expunge(&instance);
		}
	}

	/// Write pending changes to the backend.
	///
	/// Rows are written in dependency order; identifier columns of
	/// relationships are synchronized before their row is written.
	pub fn flush(&self) -> Result<FlushSummary> {
		let span = tracing::debug_span!("flush", session = %self.id());
		let _enter = span.enter();

		UnitOfWork::new(self.clone()).execute()
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.inner.id)
			.field("instances", &self.inner.instances.read().len())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mapping::{Column, MapperRegistry};
	use crate::value::QueryValue;
	use rstest::{fixture, rstest};

	struct Fixture {
		image: Arc<Mapper>,
		backend: Arc<MemoryBackend>,
		session: Session,
	}

	#[fixture]
	fn setup() -> Fixture {
		let registry = MapperRegistry::new();
		let image = Mapper::builder("Image")
			.column(Column::new("id").primary_key())
			.column(Column::new("path"))
			.build()
			.unwrap();
		registry.register(image.clone()).unwrap();
		let backend = Arc::new(MemoryBackend::for_registry(&registry));
		let session = Session::new(backend.clone());
		Fixture {
			image,
			backend,
			session,
		}
	}

	#[rstest]
	fn test_identity_map_returns_same_handle(setup: Fixture) {
		let img = Instance::new(&setup.image).with("path", "a.png");
		setup.session.add(&img).unwrap();
		setup.session.flush().unwrap();

		let other = Session::new(setup.backend.clone());
		let first = other.get(&setup.image, &Identity::from(1)).unwrap().unwrap();
		let second = other.get(&setup.image, &Identity::from(1)).unwrap().unwrap();

		assert_eq!(first, second);
		assert_ne!(first, img);
		assert_eq!(first.get("path"), QueryValue::from("a.png"));
	}

	#[rstest]
	fn test_get_with_incomplete_identity(setup: Fixture) {
		assert!(setup.session.get(&setup.image, &Identity::default()).unwrap().is_none());
		assert!(
			setup
				.session
				.get(&setup.image, &Identity::from(QueryValue::Null))
				.unwrap()
				.is_none()
		);
	}

	#[rstest]
	fn test_instance_cannot_join_two_sessions(setup: Fixture) {
		let img = Instance::new(&setup.image);
		setup.session.add(&img).unwrap();

		let other = Session::new(setup.backend.clone());
		let err = other.add(&img).unwrap_err();
		assert!(matches!(err, GenericRelationError::InvalidRequest(_)));
	}

	#[rstest]
	fn test_update_and_delete_flush(setup: Fixture) {
		let img = Instance::new(&setup.image).with("path", "a.png");
		setup.session.add(&img).unwrap();
		setup.session.flush().unwrap();

		img.set("path", "b.png");
		let summary = setup.session.flush().unwrap();
		assert_eq!(summary.updated, 1);
		assert_eq!(setup.backend.rows("image")[0].get("path"), Some(&QueryValue::from("b.png")));

		setup.session.delete(&img).unwrap();
		assert_eq!(img.object_state(), ObjectState::Deleted);
		let summary = setup.session.flush().unwrap();
		assert_eq!(summary.deleted, 1);
		assert_eq!(img.object_state(), ObjectState::Detached);
		assert!(setup.backend.rows("image").is_empty());
		assert!(!setup.session.contains(&img));
	}

	#[rstest]
	fn test_delete_pending_detaches(setup: Fixture) {
		let img = Instance::new(&setup.image);
		setup.session.add(&img).unwrap();
		setup.session.delete(&img).unwrap();

		assert_eq!(img.object_state(), ObjectState::Detached);
		assert_eq!(setup.session.flush().unwrap(), FlushSummary::default());
	}

	#[rstest]
	fn test_delete_unattached_is_rejected(setup: Fixture) {
		let img = Instance::new(&setup.image);
		assert!(setup.session.delete(&img).is_err());
	}

	#[rstest]
	fn test_close_detaches_everything(setup: Fixture) {
		let img = Instance::new(&setup.image);
		setup.session.add(&img).unwrap();
		setup.session.close();

		assert!(img.session().is_none());
		assert_eq!(img.object_state(), ObjectState::Detached);
		assert!(setup.session.instances().is_empty());
	}

	#[rstest]
	fn test_query_uses_identity_map(setup: Fixture) {
		let img = Instance::new(&setup.image).with("path", "a.png");
		setup.session.add(&img).unwrap();
		setup.session.flush().unwrap();

		let found = setup
			.session
			.query(
				&setup.image,
				&Predicate::eq(crate::predicate::Operand::column("path"), "a.png"),
			)
			.unwrap();
		assert_eq!(found, vec![img]);
	}
}
