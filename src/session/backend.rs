//! Row storage
//!
//! The [`Backend`] trait is the narrow interface a [`Session`](super::Session)
//! needs from the database: keyed row access plus filtered selection.
//! [`MemoryBackend`] implements it over in-process tables.

use crate::error::BackendError;
use crate::mapping::{Column, Mapper, MapperRegistry};
use crate::predicate::Predicate;
use crate::value::{Identity, QueryValue, Row};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage operations used by the unit of work
pub trait Backend: Send + Sync {
	/// Insert a row and return it with any generated key values filled in
	fn insert(&self, mapper: &Mapper, row: Row) -> Result<Row, BackendError>;

	/// Apply `changes` to the row stored under `identity`
	fn update(&self, mapper: &Mapper, identity: &Identity, changes: Row) -> Result<(), BackendError>;

	fn delete(&self, mapper: &Mapper, identity: &Identity) -> Result<(), BackendError>;

	/// Look a row up by primary key
	fn fetch(&self, mapper: &Mapper, identity: &Identity) -> Result<Option<Row>, BackendError>;

	/// Every row of the mapper's table matching `predicate`
	fn select(&self, mapper: &Mapper, predicate: &Predicate) -> Result<Vec<Row>, BackendError>;
}

#[derive(Debug, Default)]
struct MemoryTable {
	rows: IndexMap<Identity, Row>,
	last_id: i64,
}

/// In-memory backend with per-table autoincrement counters
///
/// # Examples
///
/// ```
/// use reinhardt_generic_relations::mapping::{Column, Mapper};
/// use reinhardt_generic_relations::session::{Backend, MemoryBackend};
/// use reinhardt_generic_relations::value::{Identity, QueryValue, Row};
///
/// let image = Mapper::builder("Image")
///     .column(Column::new("id").primary_key())
///     .column(Column::new("path"))
///     .build()
///     .unwrap();
/// let backend = MemoryBackend::new();
/// backend.create_table(&image);
///
/// let mut row = Row::new();
/// row.insert("path".to_string(), QueryValue::from("a.png"));
/// let stored = backend.insert(&image, row).unwrap();
/// assert_eq!(stored.get("id"), Some(&QueryValue::from(1)));
///
/// let fetched = backend.fetch(&image, &Identity::from(1)).unwrap();
/// assert_eq!(fetched, Some(stored));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
	tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Backend with a table for every registered mapper
	pub fn for_registry(registry: &MapperRegistry) -> Self {
		let backend = Self::new();
		for mapper in registry.mappers() {
			backend.create_table(&mapper);
		}
		backend
	}

	/// Create the mapper's table if it does not exist yet
	pub fn create_table(&self, mapper: &Mapper) {
		self.tables
			.write()
			.entry(mapper.table().to_string())
			.or_default();
	}

	/// Snapshot of every row in `table`, in insertion order
	pub fn rows(&self, table: &str) -> Vec<Row> {
		self.tables
			.read()
			.get(table)
			.map(|t| t.rows.values().cloned().collect())
			.unwrap_or_default()
	}

	fn identity_of(mapper: &Mapper, row: &Row) -> Identity {
		Identity::new(
			mapper
				.primary_key()
				.iter()
				.map(|name| row.get(name).cloned().unwrap_or_default()),
		)
	}
}

impl Backend for MemoryBackend {
	fn insert(&self, mapper: &Mapper, mut row: Row) -> Result<Row, BackendError> {
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(mapper.table())
			.ok_or_else(|| BackendError::UnknownTable(mapper.table().to_string()))?;

		for name in mapper.primary_key() {
			match row.get(name) {
				Some(QueryValue::Int(explicit)) => table.last_id = table.last_id.max(*explicit),
				None | Some(QueryValue::Null) if mapper.column(name).is_some_and(Column::is_autoincrement) => {
					table.last_id += 1;
					row.insert(name.clone(), QueryValue::Int(table.last_id));
				}
				_ => {}
			}
		}

		let identity = Self::identity_of(mapper, &row);
		if !identity.is_complete() {
			return Err(BackendError::IncompleteKey {
				table: mapper.table().to_string(),
				identity: identity.to_string(),
			});
		}
		if table.rows.contains_key(&identity) {
			return Err(BackendError::DuplicateKey {
				table: mapper.table().to_string(),
				identity: identity.to_string(),
			});
		}
		table.rows.insert(identity, row.clone());
		Ok(row)
	}

	fn update(&self, mapper: &Mapper, identity: &Identity, changes: Row) -> Result<(), BackendError> {
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(mapper.table())
			.ok_or_else(|| BackendError::UnknownTable(mapper.table().to_string()))?;
		let not_found = || BackendError::RowNotFound {
			table: mapper.table().to_string(),
			identity: identity.to_string(),
		};

		let mut row = table.rows.get(identity).cloned().ok_or_else(not_found)?;
		row.extend(changes);
		let new_identity = Self::identity_of(mapper, &row);
		if new_identity == *identity {
			table.rows.insert(new_identity, row);
			return Ok(());
		}

		if !new_identity.is_complete() {
			return Err(BackendError::IncompleteKey {
				table: mapper.table().to_string(),
				identity: new_identity.to_string(),
			});
		}
		if table.rows.contains_key(&new_identity) {
			return Err(BackendError::DuplicateKey {
				table: mapper.table().to_string(),
				identity: new_identity.to_string(),
			});
		}
		table.rows.shift_remove(identity);
		table.rows.insert(new_identity, row);
		Ok(())
	}

	fn delete(&self, mapper: &Mapper, identity: &Identity) -> Result<(), BackendError> {
		let mut tables = self.tables.write();
		let table = tables
			.get_mut(mapper.table())
			.ok_or_else(|| BackendError::UnknownTable(mapper.table().to_string()))?;
		table
			.rows
			.shift_remove(identity)
			.map(|_| ())
			.ok_or_else(|| BackendError::RowNotFound {
				table: mapper.table().to_string(),
				identity: identity.to_string(),
			})
	}

	fn fetch(&self, mapper: &Mapper, identity: &Identity) -> Result<Option<Row>, BackendError> {
		let tables = self.tables.read();
		let table = tables
			.get(mapper.table())
			.ok_or_else(|| BackendError::UnknownTable(mapper.table().to_string()))?;
		Ok(table.rows.get(identity).cloned())
	}

	fn select(&self, mapper: &Mapper, predicate: &Predicate) -> Result<Vec<Row>, BackendError> {
		let tables = self.tables.read();
		let table = tables
			.get(mapper.table())
			.ok_or_else(|| BackendError::UnknownTable(mapper.table().to_string()))?;
		Ok(table
			.rows
			.values()
			.filter(|row| predicate.matches(row))
			.cloned()
			.collect())
	}
}
