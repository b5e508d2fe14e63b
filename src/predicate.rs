//! Query predicates
//!
//! Predicates built by relationship comparators. They evaluate against
//! in-memory rows with SQL three-valued logic and convert to
//! [`sea_query::Condition`] for rendering against a real database.

use crate::error::{GenericRelationError, Result};
use crate::hybrid::HybridProperty;
use crate::value::{QueryValue, Row};
use sea_query::{Alias, Condition, Expr, ExprTrait};
use std::ops::{BitAnd, BitOr, Not};

/// Left-hand side of a comparison
#[derive(Debug, Clone)]
pub enum Operand {
	/// A stored column, by name
	Column(String),
	/// A hybrid property, evaluated per row
	Hybrid(HybridProperty),
}

impl Operand {
	pub fn column(name: impl Into<String>) -> Self {
		Operand::Column(name.into())
	}

	fn evaluate(&self, row: &Row) -> QueryValue {
		match self {
			Operand::Column(name) => row.get(name).cloned().unwrap_or_default(),
			Operand::Hybrid(prop) => prop.get(row),
		}
	}

	fn to_expr(&self) -> Result<Expr> {
		match self {
			Operand::Column(name) => Ok(Expr::col(Alias::new(name.as_str()))),
			Operand::Hybrid(prop) => {
				let sql = prop
					.expression()
					.ok_or_else(|| GenericRelationError::MissingExpression(prop.name().to_string()))?;
				Ok(Expr::cust(sql.to_string()))
			}
		}
	}
}

/// A boolean filter over rows
#[derive(Debug, Clone)]
pub enum Predicate {
	Eq(Operand, QueryValue),
	In(Operand, Vec<QueryValue>),
	IsNull(Operand),
	And(Vec<Predicate>),
	Or(Vec<Predicate>),
	Not(Box<Predicate>),
}

impl Predicate {
	/// `operand = value`
	pub fn eq(operand: Operand, value: impl Into<QueryValue>) -> Self {
		Predicate::Eq(operand, value.into())
	}

	/// `operand IN (values...)`
	pub fn is_in(operand: Operand, values: impl IntoIterator<Item = QueryValue>) -> Self {
		Predicate::In(operand, values.into_iter().collect())
	}

	/// Three-valued evaluation: `None` is SQL `UNKNOWN`
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_generic_relations::predicate::{Operand, Predicate};
	/// use reinhardt_generic_relations::value::{QueryValue, Row};
	///
	/// let mut row = Row::new();
	/// row.insert("object_id".to_string(), QueryValue::Null);
	///
	/// let p = Predicate::eq(Operand::column("object_id"), 1);
	/// assert_eq!(p.evaluate(&row), None);
	/// // NOT UNKNOWN is still UNKNOWN
	/// assert_eq!((!p).evaluate(&row), None);
	/// ```
	pub fn evaluate(&self, row: &Row) -> Option<bool> {
		match self {
			Predicate::Eq(operand, value) => {
				let actual = operand.evaluate(row);
				if actual.is_null() || value.is_null() {
					None
				} else {
					Some(actual == *value)
				}
			}
			Predicate::In(operand, values) => {
				let actual = operand.evaluate(row);
				if actual.is_null() {
					return None;
				}
				if values.contains(&actual) {
					Some(true)
				} else if values.iter().any(QueryValue::is_null) {
					None
				} else {
					Some(false)
				}
			}
			Predicate::IsNull(operand) => Some(operand.evaluate(row).is_null()),
			Predicate::And(parts) => {
				let mut result = Some(true);
				for part in parts {
					match part.evaluate(row) {
						Some(false) => return Some(false),
						None => result = None,
						Some(true) => {}
					}
				}
				result
			}
			Predicate::Or(parts) => {
				let mut result = Some(false);
				for part in parts {
					match part.evaluate(row) {
						Some(true) => return Some(true),
						None => result = None,
						Some(false) => {}
					}
				}
				result
			}
			Predicate::Not(inner) => inner.evaluate(row).map(|b| !b),
		}
	}

	/// `true` only when the predicate evaluates to TRUE (not UNKNOWN)
	pub fn matches(&self, row: &Row) -> bool {
		self.evaluate(row) == Some(true)
	}

	/// Convert into a sea-query condition
	///
	/// Fails with [`GenericRelationError::MissingExpression`] when a hybrid
	/// operand has no SQL expression.
	pub fn to_condition(&self) -> Result<Condition> {
		Ok(match self {
			Predicate::And(parts) => {
				let mut cond = Condition::all();
				for part in parts {
					cond = cond.add(part.to_condition()?);
				}
				cond
			}
			Predicate::Or(parts) => {
				let mut cond = Condition::any();
				for part in parts {
					cond = cond.add(part.to_condition()?);
				}
				cond
			}
			Predicate::Not(inner) => inner.to_condition()?.not(),
			Predicate::Eq(operand, value) => {
				Condition::all().add(operand.to_expr()?.eq(value.to_sea_value()))
			}
			Predicate::In(operand, values) => Condition::all().add(
				operand
					.to_expr()?
					.is_in(values.iter().map(QueryValue::to_sea_value)),
			),
			Predicate::IsNull(operand) => Condition::all().add(operand.to_expr()?.is_null()),
		})
	}
}

impl BitAnd for Predicate {
	type Output = Predicate;

	fn bitand(self, rhs: Predicate) -> Predicate {
		match self {
			Predicate::And(mut parts) => {
				parts.push(rhs);
				Predicate::And(parts)
			}
			lhs => Predicate::And(vec![lhs, rhs]),
		}
	}
}

impl BitOr for Predicate {
	type Output = Predicate;

	fn bitor(self, rhs: Predicate) -> Predicate {
		match self {
			Predicate::Or(mut parts) => {
				parts.push(rhs);
				Predicate::Or(parts)
			}
			lhs => Predicate::Or(vec![lhs, rhs]),
		}
	}
}

impl Not for Predicate {
	type Output = Predicate;

	fn not(self) -> Predicate {
		Predicate::Not(Box::new(self))
	}
}
