//! Record reconciliation core: a change-tracking data model for business
//! records and their cross-record associations, with batched SQL statement
//! preparation for atomic persistence.
//!
//! Collections track per-row add/edit/delete state in memory; record
//! entries hold per-type identity and association rules; saves and deletes
//! walk the record graph into a [`statements::StatementSet`] that a
//! [`db::DbClient`] executes as a single transaction.

pub mod collection;
pub mod db;
pub mod entry;
pub mod error;
pub mod expr;
pub mod importer;
pub mod record;
pub mod records;
pub mod registry;
pub mod session;
pub mod statements;
pub mod value;

pub use collection::{CollectionSchema, DataCollection, RowFilter, RowState, RowValues};
pub use db::{DbClient, SqliteClient};
pub use entry::{AssociationRule, AssociationType, RecordEntry, RecordRegistry};
pub use error::{ReckonError, Result};
pub use record::{Component, DatabaseRecord};
pub use records::{RecordCollection, Reference, ReferenceCollection};
pub use registry::{IdRegistry, LocalIdRegistry};
pub use session::{SessionContext, Settings};
pub use statements::{SqlValue, StatementSet};
pub use value::{DataType, Value};
