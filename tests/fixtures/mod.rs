//! Shared mappers for the scenario tests
//!
//! Documents, reports (a document subtype), images, invoices and composite-key
//! order lines are the possible targets; comments reference one of them
//! through the `subject` relationship.

#![allow(dead_code)]

use reinhardt_generic_relations::dependency::CascadeOptions;
use reinhardt_generic_relations::prelude::*;
use std::sync::Arc;

pub struct Catalog {
	pub registry: Arc<MapperRegistry>,
	pub backend: Arc<MemoryBackend>,
	pub document: Arc<Mapper>,
	pub report: Arc<Mapper>,
	pub image: Arc<Mapper>,
	pub invoice: Arc<Mapper>,
	pub line: Arc<Mapper>,
	pub comment: Arc<Mapper>,
	pub subject: Arc<GenericRelationship>,
}

impl Catalog {
	pub fn session(&self) -> Session {
		Session::new(self.backend.clone())
	}

	/// Register another mapper and create its table
	pub fn register(&self, mapper: Arc<Mapper>) {
		self.registry.register(mapper.clone()).unwrap();
		self.backend.create_table(&mapper);
	}
}

pub fn entity(name: &str) -> Arc<Mapper> {
	Mapper::builder(name)
		.column(Column::new("id").primary_key())
		.column(Column::new("title"))
		.build()
		.unwrap()
}

pub fn subtype(name: &str, base: &str) -> Arc<Mapper> {
	Mapper::builder(name)
		.column(Column::new("id").primary_key())
		.column(Column::new("title"))
		.inherits(base)
		.build()
		.unwrap()
}

/// Catalog whose `subject` relationship uses `cascade`
pub fn catalog_with(cascade: CascadeOptions) -> Catalog {
	let registry = MapperRegistry::new();
	let document = entity("Document");
	let report = subtype("Report", "Document");
	let image = entity("Image");
	let invoice = entity("Invoice");
	let line = Mapper::builder("Line")
		.column(Column::new("order_id").primary_key().autoincrement(false))
		.column(Column::new("position").primary_key().autoincrement(false))
		.column(Column::new("sku"))
		.build()
		.unwrap();
	let comment = Mapper::builder("Comment")
		.column(Column::new("id").primary_key())
		.column(Column::new("body"))
		.column(Column::new("object_type"))
		.column(Column::new("object_id"))
		.build()
		.unwrap();
	for mapper in [&document, &report, &image, &invoice, &line, &comment] {
		registry.register(mapper.clone()).unwrap();
	}
	let subject = polymorphic_reference("object_type", "object_id")
		.cascade(cascade)
		.doc("What the comment is about")
		.bind_to_class(&comment, "subject")
		.unwrap();
	registry.configure().unwrap();
	let backend = Arc::new(MemoryBackend::for_registry(&registry));

	Catalog {
		registry,
		backend,
		document,
		report,
		image,
		invoice,
		line,
		comment,
		subject,
	}
}

pub fn catalog() -> Catalog {
	catalog_with(CascadeOptions::default())
}

/// Insert a raw comment row, bypassing the relationship
pub fn stored_comment(catalog: &Catalog, object_type: QueryValue, object_id: QueryValue) -> Identity {
	let mut row = Row::new();
	row.insert("body".to_string(), QueryValue::from("raw"));
	row.insert("object_type".to_string(), object_type);
	row.insert("object_id".to_string(), object_id);
	let stored = catalog.backend.insert(&catalog.comment, row).unwrap();
	Identity::new([stored["id"].clone()])
}
