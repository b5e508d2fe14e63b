//! Scenario tests for reading, assigning, and querying generic relationships
//!
//! Each test builds its own catalog of mappers over a fresh in-memory
//! backend, writes through a session, and reads back either through the same
//! session or a new one.

mod fixtures;

use fixtures::{Catalog, catalog, catalog_with, stored_comment, subtype};
use reinhardt_generic_relations::dependency::CascadeOptions;
use reinhardt_generic_relations::prelude::*;
use rstest::*;
use sea_query::{Alias, Asterisk, PostgresQueryBuilder, Query, QueryStatementWriter};
use std::sync::Arc;

fn comment_on(c: &Catalog, session: &Session, body: &str, target: Option<&Instance>) -> Instance {
	let comment = Instance::new(&c.comment).with("body", body);
	comment.set_related("subject", target).unwrap();
	session.add(&comment).unwrap();
	comment
}

fn bodies(instances: &[Instance]) -> Vec<String> {
	instances
		.iter()
		.map(|i| i.get("body").as_str().unwrap_or_default().to_string())
		.collect()
}

// ============================================================================
// Round trip
// ============================================================================

/// Test: Assign, flush, and read back in the same and a fresh session
///
/// Category: Happy Path
/// Verifies that the stored discriminator and identifier resolve to the
/// assigned target.
#[rstest]
fn test_round_trip_through_flush() {
	let c = catalog();
	let session = c.session();
	let doc = Instance::new(&c.document).with("title", "Design notes");
	let note = comment_on(&c, &session, "Looks good", Some(&doc));

	let summary = session.flush().unwrap();

	assert_eq!(summary.inserted, 2);
	assert_eq!(note.get("object_type"), QueryValue::from("Document"));
	assert_eq!(note.get("object_id"), doc.get("id"));

	note.expire("subject");
	assert_eq!(note.related("subject").unwrap(), Some(doc.clone()));

	let fresh = c.session();
	let loaded = fresh.get(&c.comment, &note.identity()).unwrap().unwrap();
	let target = loaded.related("subject").unwrap().unwrap();
	assert_eq!(target.mapper().name(), "Document");
	assert_eq!(target.get("title"), QueryValue::from("Design notes"));
	assert_ne!(target, doc);
	assert_eq!(c.subject.resolve(&loaded).unwrap(), Resolution::Found(target));
}

/// Test: Reassigning to a target of another type
///
/// Category: Happy Path
/// Verifies that both the discriminator and the identifier change on
/// assignment and persist on flush.
#[rstest]
fn test_reassign_to_other_type() {
	let c = catalog();
	let session = c.session();
	let doc = Instance::new(&c.document);
	let image = Instance::new(&c.image).with("title", "diagram.png");
	session.add(&image).unwrap();
	let note = comment_on(&c, &session, "first", Some(&doc));
	session.flush().unwrap();

	note.set_related("subject", Some(&image)).unwrap();
	assert_eq!(note.get("object_type"), QueryValue::from("Image"));
	assert_eq!(note.get("object_id"), image.get("id"));
	let summary = session.flush().unwrap();
	assert_eq!(summary.updated, 1);

	let fresh = c.session();
	let loaded = fresh.get(&c.comment, &note.identity()).unwrap().unwrap();
	let target = loaded.related("subject").unwrap().unwrap();
	assert_eq!(target.get("title"), QueryValue::from("diagram.png"));
}

/// Test: Assigning `None` clears the reference
///
/// Category: Happy Path
/// Verifies that discriminator and identifier are nulled at assignment and
/// that a fresh read reports a null discriminator.
#[rstest]
fn test_assigning_none_clears_reference() {
	let c = catalog();
	let session = c.session();
	let doc = Instance::new(&c.document);
	let note = comment_on(&c, &session, "to be cleared", Some(&doc));
	session.flush().unwrap();

	note.set_related("subject", None).unwrap();

	assert!(note.get("object_type").is_null());
	assert!(note.get("object_id").is_null());
	assert_eq!(note.related("subject").unwrap(), None);
	assert_eq!(session.flush().unwrap().updated, 1);

	let fresh = c.session();
	let loaded = fresh.get(&c.comment, &note.identity()).unwrap().unwrap();
	assert_eq!(
		c.subject.resolve(&loaded).unwrap(),
		Resolution::Unresolved(UnresolvedReason::NullDiscriminator)
	);
}

// ============================================================================
// Deferred identity
// ============================================================================

/// Test: Target without a primary key yet
///
/// Category: Edge Case
/// Verifies the transient state (discriminator set, identifier null) after
/// assignment, and that the flush copies the generated key before the
/// comment row is written.
#[rstest]
fn test_identity_copied_when_target_is_inserted() {
	let c = catalog();
	let session = c.session();
	let doc = Instance::new(&c.document).with("title", "draft");
	let note = Instance::new(&c.comment).with("body", "early");

	note.set_related("subject", Some(&doc)).unwrap();
	assert_eq!(note.get("object_type"), QueryValue::from("Document"));
	assert!(note.get("object_id").is_null());

	session.add(&note).unwrap();
	session.flush().unwrap();

	assert!(!doc.get("id").is_null());
	assert_eq!(note.get("object_id"), doc.get("id"));
	let stored = c.backend.rows("comment");
	assert_eq!(stored.len(), 1);
	assert_eq!(stored[0]["object_id"], doc.get("id"));
}

/// Test: Target left outside the session
///
/// Category: Edge Case
/// Verifies that without save-update cascade the flush still succeeds,
/// leaves the identifier null, and does not insert the target.
#[rstest]
fn test_target_outside_session_is_skipped() {
	let c = catalog_with(CascadeOptions::none());
	let session = c.session();
	let doc = Instance::new(&c.document);
	let note = comment_on(&c, &session, "orphan", Some(&doc));

	let summary = session.flush().unwrap();

	assert_eq!(summary.inserted, 1);
	assert!(!session.contains(&doc));
	assert_eq!(doc.object_state(), ObjectState::Transient);
	assert_eq!(note.get("object_type"), QueryValue::from("Document"));
	assert!(note.get("object_id").is_null());
	assert!(c.backend.rows("document").is_empty());
}

/// Test: Target persisted by another session is still skipped
///
/// Category: Edge Case
/// Verifies that a target which gained its key through a different session
/// does not leak that key into the referencing row.
#[rstest]
fn test_target_flushed_by_other_session_is_skipped() {
	let c = catalog_with(CascadeOptions::none());
	let session = c.session();
	let doc = Instance::new(&c.document);
	let note = comment_on(&c, &session, "x", Some(&doc));
	let other = c.session();
	other.add(&doc).unwrap();
	other.flush().unwrap();
	assert!(!doc.get("id").is_null());

	let summary = session.flush().unwrap();

	assert_eq!(summary.inserted, 1);
	assert!(!session.contains(&doc));
	assert!(note.get("object_id").is_null());
	let stored = c.backend.rows("comment");
	assert_eq!(stored[0]["object_type"], QueryValue::from("Document"));
	assert_eq!(stored[0]["object_id"], QueryValue::Null);
}

// ============================================================================
// Unresolvable references
// ============================================================================

/// Test: Stored references that do not resolve
///
/// Category: Edge Case
/// Verifies that every kind of unresolvable reference reads back as `None`
/// with the matching reason, never as an error.
#[rstest]
#[case(QueryValue::from("Video"), QueryValue::from(1), UnresolvedReason::UnknownDiscriminator)]
#[case(QueryValue::from("Invoice"), QueryValue::from(42), UnresolvedReason::NotFound)]
#[case(QueryValue::Null, QueryValue::from(1), UnresolvedReason::NullDiscriminator)]
#[case(QueryValue::from("Document"), QueryValue::Null, UnresolvedReason::IncompleteIdentity)]
#[case(QueryValue::from("Line"), QueryValue::from(1), UnresolvedReason::ArityMismatch)]
#[case(QueryValue::from(7), QueryValue::from(1), UnresolvedReason::UnknownDiscriminator)]
fn test_unresolvable_reference(
	#[case] object_type: QueryValue,
	#[case] object_id: QueryValue,
	#[case] reason: UnresolvedReason,
) {
	let c = catalog();
	let identity = stored_comment(&c, object_type, object_id);
	let session = c.session();
	let loaded = session.get(&c.comment, &identity).unwrap().unwrap();

	assert_eq!(c.subject.resolve(&loaded).unwrap(), Resolution::Unresolved(reason));
	assert_eq!(loaded.related("subject").unwrap(), None);
}

/// Test: Dangling reference becomes resolvable after expiry
///
/// Category: Edge Case
/// Verifies that a cached miss is kept until the attribute is expired.
#[rstest]
fn test_dangling_reference_resolves_after_expire() {
	let c = catalog();
	let identity = stored_comment(&c, QueryValue::from("Invoice"), QueryValue::from(42));
	let session = c.session();
	let loaded = session.get(&c.comment, &identity).unwrap().unwrap();
	assert_eq!(loaded.related("subject").unwrap(), None);

	let mut row = Row::new();
	row.insert("id".to_string(), QueryValue::from(42));
	row.insert("title".to_string(), QueryValue::from("INV-42"));
	c.backend.insert(&c.invoice, row).unwrap();

	assert_eq!(loaded.related("subject").unwrap(), None);
	loaded.expire("subject");
	let invoice = loaded.related("subject").unwrap().unwrap();
	assert_eq!(invoice.get("title"), QueryValue::from("INV-42"));
}

/// Test: Reading a reference on a detached instance
///
/// Category: Edge Case
/// Verifies that a reference never loaded before detaching reads as `None`.
#[rstest]
fn test_detached_instance_reads_none() {
	let c = catalog();
	let identity = stored_comment(&c, QueryValue::from("Document"), QueryValue::from(1));
	let session = c.session();
	let loaded = session.get(&c.comment, &identity).unwrap().unwrap();
	session.close();

	assert_eq!(loaded.object_state(), ObjectState::Detached);
	assert_eq!(
		c.subject.resolve(&loaded).unwrap(),
		Resolution::Unresolved(UnresolvedReason::Detached)
	);
}

// ============================================================================
// Assignment errors
// ============================================================================

/// Test: Assigning a target whose primary key arity differs
///
/// Category: Error Path
/// Verifies that a composite-key target is rejected by a single-column
/// reference and that the instance is left unchanged.
#[rstest]
fn test_assigning_wrong_arity_fails() {
	let c = catalog();
	let line = Instance::new(&c.line).with("order_id", 1).with("position", 1);
	let note = Instance::new(&c.comment);

	let err = note.set_related("subject", Some(&line)).unwrap_err();

	assert!(matches!(err, GenericRelationError::ArityMismatch { ref type_name, .. } if type_name == "Line"));
	assert!(note.get("object_type").is_null());
}

/// Test: Unknown attribute key
///
/// Category: Error Path
#[rstest]
fn test_unknown_attribute_key() {
	let c = catalog();
	let note = Instance::new(&c.comment);
	assert!(matches!(
		note.related("target"),
		Err(GenericRelationError::UnknownAttribute { .. })
	));
}

// ============================================================================
// Composite keys
// ============================================================================

/// Test: Reference spanning a composite primary key
///
/// Category: Happy Path
/// Verifies that each identifier column receives the matching key component
/// and that targets outside the allow-list are rejected.
#[rstest]
fn test_composite_key_reference() {
	let c = catalog();
	let shipment = Mapper::builder("Shipment")
		.column(Column::new("id").primary_key())
		.column(Column::new("item_type"))
		.column(Column::new("item_order"))
		.column(Column::new("item_position"))
		.build()
		.unwrap();
	c.register(shipment.clone());
	let item = polymorphic_reference("item_type", ["item_order", "item_position"])
		.targets(["Line"])
		.bind_to_class(&shipment, "item")
		.unwrap();

	let session = c.session();
	let line = Instance::new(&c.line)
		.with("order_id", 5)
		.with("position", 2)
		.with("sku", "BOLT-M4");
	let parcel = Instance::new(&shipment);
	parcel.set_related("item", Some(&line)).unwrap();
	assert_eq!(parcel.get("item_order"), QueryValue::from(5));
	assert_eq!(parcel.get("item_position"), QueryValue::from(2));
	session.add(&parcel).unwrap();
	assert_eq!(session.flush().unwrap().inserted, 2);

	let fresh = c.session();
	let loaded = fresh.get(&shipment, &parcel.identity()).unwrap().unwrap();
	let target = item.resolve(&loaded).unwrap().into_instance().unwrap();
	assert_eq!(target.get("sku"), QueryValue::from("BOLT-M4"));

	let doc = Instance::new(&c.document).with("id", 1);
	assert!(matches!(
		parcel.set_related("item", Some(&doc)),
		Err(GenericRelationError::UnmappedType(name)) if name == "Document"
	));
}

// ============================================================================
// Computed discriminator
// ============================================================================

/// Test: Discriminator stored through a hybrid property
///
/// Category: Happy Path
/// Verifies that a writable hybrid is used for both assignment and
/// resolution.
#[rstest]
fn test_hybrid_discriminator() {
	let c = catalog();
	let attachment = Mapper::builder("Attachment")
		.column(Column::new("id").primary_key())
		.column(Column::new("owner_kind"))
		.column(Column::new("owner_id"))
		.hybrid(
			HybridProperty::new("owner_type", |row: &Row| match row.get("owner_kind") {
				Some(QueryValue::String(kind)) => QueryValue::from(kind.trim_start_matches("app.")),
				_ => QueryValue::Null,
			})
			.with_setter(|row: &mut Row, value| {
				let stored = match value.as_str() {
					Some(name) => QueryValue::from(format!("app.{}", name)),
					None => QueryValue::Null,
				};
				row.insert("owner_kind".to_string(), stored);
			})
			.with_expression("REPLACE(owner_kind, 'app.', '')"),
		)
		.build()
		.unwrap();
	c.register(attachment.clone());
	let owner = polymorphic_reference("owner_type", "owner_id")
		.bind_to_class(&attachment, "owner")
		.unwrap();

	let session = c.session();
	let image = Instance::new(&c.image).with("title", "cover");
	let file = Instance::new(&attachment);
	file.set_related("owner", Some(&image)).unwrap();
	assert_eq!(file.get("owner_kind"), QueryValue::from("app.Image"));
	session.add(&file).unwrap();
	session.flush().unwrap();

	let fresh = c.session();
	let loaded = fresh.get(&attachment, &file.identity()).unwrap().unwrap();
	let target = loaded.related("owner").unwrap().unwrap();
	assert_eq!(target.get("title"), QueryValue::from("cover"));

	let matching = fresh.query(&attachment, &owner.equality_predicate(&target).unwrap()).unwrap();
	assert_eq!(matching, vec![loaded]);
}

// ============================================================================
// Query predicates
// ============================================================================

struct Populated {
	catalog: Catalog,
	session: Session,
	doc: Instance,
	report: Instance,
	image: Instance,
}

#[fixture]
fn populated() -> Populated {
	let c = catalog();
	let session = c.session();
	let doc = Instance::new(&c.document);
	let report = Instance::new(&c.report);
	let image = Instance::new(&c.image);
	comment_on(&c, &session, "on document", Some(&doc));
	comment_on(&c, &session, "on report", Some(&report));
	comment_on(&c, &session, "on image", Some(&image));
	comment_on(&c, &session, "on nothing", None);
	session.flush().unwrap();
	Populated {
		catalog: c,
		session,
		doc,
		report,
		image,
	}
}

/// Test: Equality distinguishes targets of different types with equal keys
///
/// Category: Happy Path
/// Verifies that Document(1) and Image(1) are told apart.
#[rstest]
fn test_equality_predicate(populated: Populated) {
	let Populated {
		catalog: c,
		session,
		doc,
		image,
		..
	} = populated;
	assert_eq!(doc.get("id"), image.get("id"));

	let on_doc = session
		.query(&c.comment, &c.subject.equality_predicate(&doc).unwrap())
		.unwrap();
	let on_image = session
		.query(&c.comment, &c.subject.equality_predicate(&image).unwrap())
		.unwrap();

	assert_eq!(bodies(&on_doc), ["on document"]);
	assert_eq!(bodies(&on_image), ["on image"]);
}

/// Test: Inequality and null predicates
///
/// Category: Edge Case
/// Verifies that rows with an empty reference match neither equality nor
/// inequality, only the null predicate.
#[rstest]
fn test_inequality_and_null_predicates(populated: Populated) {
	let Populated {
		catalog: c,
		session,
		doc,
		..
	} = populated;

	let others = session
		.query(&c.comment, &c.subject.inequality_predicate(&doc).unwrap())
		.unwrap();
	let empty = session.query(&c.comment, &c.subject.null_predicate().unwrap()).unwrap();

	assert_eq!(bodies(&others), ["on report", "on image"]);
	assert_eq!(bodies(&empty), ["on nothing"]);
}

/// Test: Type predicate covers registered subtypes
///
/// Category: Happy Path
/// Verifies that filtering by a type also matches its subtypes, including
/// subtypes registered after the relationship was configured.
#[rstest]
fn test_type_predicate_with_subtypes(populated: Populated) {
	let Populated {
		catalog: c,
		session,
		report,
		..
	} = populated;

	let of_type = |mapper: &Arc<Mapper>| {
		let predicate = c.subject.type_predicate(mapper).unwrap();
		bodies(&session.query(&c.comment, &predicate).unwrap())
	};
	assert_eq!(of_type(&c.document), ["on document", "on report"]);
	assert_eq!(of_type(&c.report), ["on report"]);
	assert_eq!(of_type(&c.image), ["on image"]);
	assert_eq!(report.mapper().name(), "Report");

	let memo = subtype("Memo", "Report");
	c.register(memo.clone());
	let m = Instance::new(&memo);
	comment_on(&c, &session, "on memo", Some(&m));
	session.flush().unwrap();

	assert_eq!(of_type(&c.document), ["on document", "on report", "on memo"]);
	assert_eq!(of_type(&c.report), ["on report", "on memo"]);
}

/// Test: Predicates render as SQL
///
/// Category: Happy Path
#[rstest]
fn test_predicates_render_as_sql(populated: Populated) {
	let c = &populated.catalog;
	let render = |predicate: Predicate| {
		Query::select()
			.column(Asterisk)
			.from(Alias::new("comment"))
			.cond_where(predicate.to_condition().unwrap())
			.to_string(PostgresQueryBuilder)
	};

	let by_type = render(c.subject.type_predicate(&c.document).unwrap());
	assert!(by_type.contains(r#""object_type" IN ('Document', 'Report')"#));

	let by_target = render(c.subject.equality_predicate(&populated.image).unwrap());
	assert!(by_target.contains(r#""object_type" = 'Image'"#));
	assert!(by_target.contains(r#""object_id" = 1"#));
}
