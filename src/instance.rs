//! Mapped instances
//!
//! An [`Instance`] is a cheap, clonable handle to the state of one entity:
//! its current field values, the values last written to the backend, the
//! relationship cache, and the session it is bound to.

use crate::error::{GenericRelationError, Result};
use crate::mapping::Mapper;
use crate::session::{Session, SessionInner};
use crate::value::{Identity, QueryValue, Row};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an instance handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Lifecycle state of an instance with respect to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
	/// Not in a session
	Transient,
	/// In a session, not yet in the database
	Pending,
	/// In a session and in the database
	Persistent,
	/// Marked for deletion, not yet flushed
	Deleted,
	/// Was in a session, now removed
	Detached,
}

struct InstanceState {
	id: InstanceId,
	mapper: Arc<Mapper>,
	fields: RwLock<Row>,
	committed: RwLock<Row>,
	related: RwLock<HashMap<String, Option<Instance>>>,
	related_dirty: RwLock<HashSet<String>>,
	status: RwLock<ObjectState>,
	session: RwLock<Option<Weak<SessionInner>>>,
}

/// Handle to a mapped entity
#[derive(Clone)]
pub struct Instance(Arc<InstanceState>);

impl Instance {
	/// Create a transient instance with every column null
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::instance::{Instance, ObjectState};
	/// use reinhardt_generic_relations::mapping::{Column, Mapper};
	/// use reinhardt_generic_relations::value::QueryValue;
	///
	/// let document = Mapper::builder("Document")
	///     .column(Column::new("id").primary_key())
	///     .column(Column::new("title"))
	///     .build()
	///     .unwrap();
	///
	/// let doc = Instance::new(&document).with("title", "Spec");
	/// assert_eq!(doc.get("title"), QueryValue::from("Spec"));
	/// assert_eq!(doc.get("id"), QueryValue::Null);
	/// assert_eq!(doc.object_state(), ObjectState::Transient);
	/// assert!(!doc.identity().is_complete());
	/// ```
	pub fn new(mapper: &Arc<Mapper>) -> Self {
		let fields: Row = mapper
			.columns()
			.map(|c| (c.name().to_string(), QueryValue::Null))
			.collect();
		Self::with_state(mapper, fields, Row::new(), ObjectState::Transient)
	}

	/// Build a persistent instance from a stored row
	pub(crate) fn from_row(mapper: &Arc<Mapper>, row: Row) -> Self {
		let mut fields: Row = mapper
			.columns()
			.map(|c| (c.name().to_string(), QueryValue::Null))
			.collect();
		for (name, value) in row {
			if fields.contains_key(&name) {
				fields.insert(name, value);
			}
		}
		let committed = fields.clone();
		Self::with_state(mapper, fields, committed, ObjectState::Persistent)
	}

	fn with_state(mapper: &Arc<Mapper>, fields: Row, committed: Row, status: ObjectState) -> Self {
		Self(Arc::new(InstanceState {
			id: InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)),
			mapper: Arc::clone(mapper),
			fields: RwLock::new(fields),
			committed: RwLock::new(committed),
			related: RwLock::new(HashMap::new()),
			related_dirty: RwLock::new(HashSet::new()),
			status: RwLock::new(status),
			session: RwLock::new(None),
		}))
	}

	/// Builder-style field assignment
	pub fn with(self, field: &str, value: impl Into<QueryValue>) -> Self {
		self.set(field, value);
		self
	}

	pub fn id(&self) -> InstanceId {
		self.0.id
	}

	pub fn mapper(&self) -> &Arc<Mapper> {
		&self.0.mapper
	}

	/// Current value of a field; null when unset
	pub fn get(&self, field: &str) -> QueryValue {
		self.0.fields.read().get(field).cloned().unwrap_or_default()
	}

	pub fn set(&self, field: &str, value: impl Into<QueryValue>) {
		self.0.fields.write().insert(field.to_string(), value.into());
	}

	/// Snapshot of the current field values
	pub fn fields(&self) -> Row {
		self.0.fields.read().clone()
	}

	/// Run `f` against the live field values
	pub fn read_fields<R>(&self, f: impl FnOnce(&Row) -> R) -> R {
		f(&self.0.fields.read())
	}

	pub fn write_fields<R>(&self, f: impl FnOnce(&mut Row) -> R) -> R {
		f(&mut self.0.fields.write())
	}

	/// Primary-key values in key order
	pub fn identity(&self) -> Identity {
		let fields = self.0.fields.read();
		Identity::new(
			self.0
				.mapper
				.primary_key()
				.iter()
				.map(|name| fields.get(name).cloned().unwrap_or_default()),
		)
	}

	/// Primary key as of the last flush or load
	pub(crate) fn committed_identity(&self) -> Identity {
		let committed = self.0.committed.read();
		Identity::new(
			self.0
				.mapper
				.primary_key()
				.iter()
				.map(|name| committed.get(name).cloned().unwrap_or_default()),
		)
	}

	/// Mapped columns whose value differs from the last flushed state
	pub fn changed_fields(&self) -> Row {
		let fields = self.0.fields.read();
		let committed = self.0.committed.read();
		fields
			.iter()
			.filter(|(name, value)| {
				self.0.mapper.has_column(name) && committed.get(*name) != Some(*value)
			})
			.map(|(name, value)| (name.clone(), value.clone()))
			.collect()
	}

	/// `true` when a column or relationship changed since the last flush
	pub fn is_modified(&self) -> bool {
		!self.changed_fields().is_empty() || !self.0.related_dirty.read().is_empty()
	}

	pub fn object_state(&self) -> ObjectState {
		*self.0.status.read()
	}

	pub(crate) fn set_object_state(&self, state: ObjectState) {
		*self.0.status.write() = state;
	}

	/// The session this instance is bound to, if it is still alive
	pub fn session(&self) -> Option<Session> {
		self.0
			.session
			.read()
			.as_ref()
			.and_then(Weak::upgrade)
			.map(Session::from_inner)
	}

	pub(crate) fn bind_session(&self, session: Weak<SessionInner>) {
		*self.0.session.write() = Some(session);
	}

	pub(crate) fn unbind_session(&self) {
		*self.0.session.write() = None;
	}

	/// Read a relationship attribute.
	///
	/// Unresolvable references read as `Ok(None)`; only an unknown attribute
	/// key or a backend failure is an error.
	pub fn related(&self, key: &str) -> Result<Option<Instance>> {
		self.relationship(key)?.get(self)
	}

	/// Assign a relationship attribute
	pub fn set_related(&self, key: &str, value: Option<&Instance>) -> Result<()> {
		self.relationship(key)?.set(self, value.cloned())
	}

	fn relationship(&self, key: &str) -> Result<Arc<dyn crate::mapping::RelationshipAttribute>> {
		self.0
			.mapper
			.attribute(key)
			.ok_or_else(|| GenericRelationError::UnknownAttribute {
				type_name: self.0.mapper.name().to_string(),
				attribute: key.to_string(),
			})
	}

	/// Drop the cached value of a relationship so the next read reloads it
	pub fn expire(&self, key: &str) {
		self.0.related.write().remove(key);
	}

	/// Drop every cached relationship value
	pub fn expire_all(&self) {
		self.0.related.write().clear();
	}

	/// Cached relationship value; `None` when nothing is cached
	pub(crate) fn cached_related(&self, key: &str) -> Option<Option<Instance>> {
		self.0.related.read().get(key).cloned()
	}

	pub(crate) fn has_cached_related(&self, key: &str) -> bool {
		self.0.related.read().contains_key(key)
	}

	pub(crate) fn cache_related(&self, key: &str, value: Option<Instance>) {
		self.0.related.write().insert(key.to_string(), value);
	}

	pub(crate) fn mark_related_dirty(&self, key: &str) {
		self.0.related_dirty.write().insert(key.to_string());
	}

	pub(crate) fn is_related_dirty(&self, key: &str) -> bool {
		self.0.related_dirty.read().contains(key)
	}

	/// Record the current state as flushed
	pub(crate) fn commit_state(&self) {
		let fields = self.0.fields.read().clone();
		*self.0.committed.write() = fields;
		self.0.related_dirty.write().clear();
	}
}

impl PartialEq for Instance {
	fn eq(&self, other: &Self) -> bool {
		self.0.id == other.0.id
	}
}

impl Eq for Instance {}

impl Hash for Instance {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.id.hash(state);
	}
}

impl fmt::Debug for Instance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Instance")
			.field("id", &self.0.id)
			.field("type", &self.0.mapper.name())
			.field("identity", &self.identity())
			.field("state", &self.object_state())
			.finish()
	}
}

impl fmt::Display for Instance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.0.mapper.name(), self.identity())
	}
}
