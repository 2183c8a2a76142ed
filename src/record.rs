use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::collection::{RowFilter, RowValues};
use crate::db::DbClient;
use crate::entry::RecordRegistry;
use crate::error::{ReckonError, Result};
use crate::records::{RecordCollection, Reference, ReferenceCollection};
use crate::registry::IdRegistry;
use crate::session::SessionContext;
use crate::statements::StatementSet;
use crate::value::Value;

#[derive(Debug, Clone)]
struct Field {
    value: Value,
    saved: Value,
}

impl Field {
    fn edited(&self) -> bool {
        self.value != self.saved
    }
}

/// A nested collection of records owned by or attached to a parent record,
/// linked through one of the parent type's association rules.
#[derive(Debug, Clone)]
pub struct Component {
    pub rule: String,
    pub record_type: String,
    /// Component rows are wholly owned: deleting one deletes the record it
    /// stands for, and deleting the parent deletes them all.
    pub parent_child: bool,
    pub collection: RecordCollection,
}

/// A single record's editable view: an immutable identity header, tracked
/// metadata fields, nested component collections, and reference
/// associations. The record assembles statement batches for its whole
/// graph and submits them as one atomic write.
#[derive(Debug, Clone)]
pub struct DatabaseRecord {
    pub record_type: String,
    record_id: String,
    record_date: NaiveDateTime,
    new: bool,
    deleted: bool,
    fields: IndexMap<String, Field>,
    components: Vec<Component>,
    references: IndexMap<String, ReferenceCollection>,
}

impl DatabaseRecord {
    pub fn new(record_type: &str, record_id: &str, record_date: NaiveDateTime) -> Self {
        Self {
            record_type: record_type.to_string(),
            record_id: record_id.to_string(),
            record_date,
            new: true,
            deleted: false,
            fields: IndexMap::new(),
            components: Vec::new(),
            references: IndexMap::new(),
        }
    }

    /// Build a record from a loaded query row. The reserved ID and date
    /// columns form the identity header; everything else becomes a tracked
    /// field with the loaded value as its snapshot.
    pub fn from_row(record_type: &str, values: RowValues, session: &SessionContext) -> Result<Self> {
        let columns = &session.columns;
        let record_id = values
            .get(&columns.id_field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ReckonError::Other(format!(
                    "cannot build a {record_type} record - the loaded row has no {} value",
                    columns.id_field
                ))
            })?;
        let record_date = values
            .get(&columns.date_field)
            .and_then(Value::as_date)
            .ok_or_else(|| {
                ReckonError::Other(format!(
                    "cannot build a {record_type} record - the loaded row has no {} value",
                    columns.date_field
                ))
            })?;

        let mut record = Self::new(record_type, &record_id, record_date);
        record.new = false;
        for (name, value) in values {
            if name == columns.id_field || name == columns.date_field {
                continue;
            }
            record.fields.insert(
                name,
                Field {
                    saved: value.clone(),
                    value,
                },
            );
        }
        Ok(record)
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn record_date(&self) -> NaiveDateTime {
        self.record_date
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn field(&self, name: &str) -> &Value {
        self.fields
            .get(name)
            .map(|f| &f.value)
            .unwrap_or(&Value::Null)
    }

    /// Set a field value. Returns whether the field now differs from its
    /// saved snapshot; writing the snapshot value back clears the edit.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.value = value;
                field.edited()
            }
            None => {
                self.fields.insert(
                    name.to_string(),
                    Field {
                        saved: Value::Null,
                        value,
                    },
                );
                true
            }
        }
    }

    pub fn edited_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.edited())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_edited(&self) -> bool {
        self.new
            || self.fields.values().any(Field::edited)
            || self.components.iter().any(|c| {
                c.collection
                    .inner()
                    .rows(RowFilter::All)
                    .any(|(_, row)| row.state.is_edited() || row.state.is_added())
            })
            || self.references.values().any(|refs| {
                refs.iter(RowFilter::All)
                    .any(|(_, state)| state.is_edited() || state.is_added())
            })
    }

    /// Field values for export. Identity fields are always included; with
    /// `edited_only` the rest is restricted to fields differing from their
    /// snapshot.
    pub fn export_values(&self, session: &SessionContext, edited_only: bool) -> RowValues {
        let columns = &session.columns;
        let mut values = RowValues::new();
        values.insert(columns.id_field.clone(), Value::from(self.record_id.as_str()));
        values.insert(columns.date_field.clone(), Value::Date(self.record_date));
        for (name, field) in &self.fields {
            if !edited_only || field.edited() {
                values.insert(name.clone(), field.value.clone());
            }
        }
        values
    }

    pub fn add_component(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn component(&self, rule: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.rule == rule)
    }

    pub fn component_mut(&mut self, rule: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.rule == rule)
    }

    pub fn references(&self, rule: &str) -> Option<&ReferenceCollection> {
        self.references.get(rule)
    }

    pub fn references_mut(&mut self, rule: &str) -> &mut ReferenceCollection {
        self.references.entry(rule.to_string()).or_default()
    }

    /// Walk the record, its components, and its associations into one
    /// statement set. Nothing is executed; a preparation failure anywhere
    /// discards the whole batch.
    pub fn prepare_save_statements(
        &self,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
    ) -> Result<StatementSet> {
        let entry = record_types.entry(&self.record_type)?;
        let mut statements = StatementSet::new();

        let record_dirty = self.new || self.fields.values().any(Field::edited);
        if record_dirty {
            let values = self.export_values(session, !self.new);
            entry.save_record(
                &self.record_id,
                &values,
                session,
                db,
                record_types,
                id_registry,
                &mut statements,
            )?;
        }

        for component in &self.components {
            let component_entry = record_types.entry(&component.record_type)?;
            component_entry.save_database_records(
                &component.collection,
                session,
                db,
                record_types,
                id_registry,
                &mut statements,
            )?;

            if component.parent_child {
                let deleted: Vec<String> = component
                    .collection
                    .inner()
                    .rows(RowFilter::Deleted)
                    .filter(|(_, row)| !row.state.invisible_to_persistence())
                    .filter_map(|(_, row)| {
                        row.get(&component.collection.id_column)
                            .as_str()
                            .map(str::to_string)
                    })
                    .collect();
                if !deleted.is_empty() {
                    component_entry.delete_database_records(
                        &deleted,
                        session,
                        db,
                        record_types,
                        &mut statements,
                    )?;
                }
            }

            let links = self.component_links(component);
            entry.save_database_references(&links, &component.rule, &mut statements)?;
        }

        for (rule, references) in &self.references {
            entry.save_database_references(references, rule, &mut statements)?;
        }
        Ok(statements)
    }

    /// Association rows tying the parent record to its component rows:
    /// added component rows become new links, deleted persisted rows
    /// become link deletions, and discarded rows produce nothing.
    fn component_links(&self, component: &Component) -> ReferenceCollection {
        let mut links = ReferenceCollection::new();
        for (_, row) in component.collection.inner().rows(RowFilter::All) {
            if row.state.invisible_to_persistence() {
                continue;
            }
            let Some(component_id) = row.get(&component.collection.id_column).as_str() else {
                continue;
            };
            let mut reference = Reference::new(
                &self.record_id,
                component_id,
                &self.record_type,
                &component.record_type,
            );
            reference.reference_date = row.get(&component.collection.date_column).as_date();
            reference.is_child = component.parent_child;

            if row.state.is_deleted() {
                let key = (self.record_id.clone(), component_id.to_string());
                links.append(vec![reference], false);
                links.delete(&[key]);
            } else if row.state.is_added() {
                links.append(vec![reference], true);
            }
        }
        links
    }

    /// Build the logical-delete batch for this record and everything its
    /// associations cascade into. Returns the statements and the plan, so
    /// the caller can report what a delete will remove before executing.
    pub fn prepare_delete_statements(
        &self,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
    ) -> Result<(StatementSet, Vec<(String, String)>)> {
        let entry = record_types.entry(&self.record_type)?;
        let mut statements = StatementSet::new();
        let plan = entry.delete_database_records(
            &[self.record_id.clone()],
            session,
            db,
            record_types,
            &mut statements,
        )?;
        Ok((statements, plan))
    }

    /// Prepare and submit the save batch as one atomic write, then collapse
    /// all change tracking and release reservations that have landed.
    pub fn save(
        &mut self,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
    ) -> Result<()> {
        let statements = self.prepare_save_statements(session, db, record_types, id_registry)?;
        if statements.is_empty() {
            log::debug!("record {} has no changes to save", self.record_id);
            return Ok(());
        }
        db.execute(&statements)?;
        log::info!(
            "record {}: committed {} statements",
            self.record_id,
            statements.param_count()
        );

        for name in record_types.names() {
            if let Some(entry) = record_types.get(name) {
                entry.release_saved_ids(session, db, id_registry)?;
            }
        }

        self.new = false;
        for field in self.fields.values_mut() {
            field.saved = field.value.clone();
        }
        for component in &mut self.components {
            component.collection.commit();
        }
        for references in self.references.values_mut() {
            references.commit();
        }
        Ok(())
    }

    /// Logically delete the record and cascade per its association rules,
    /// as one atomic write. Returns the number of associated records the
    /// cascade removed. An unsaved record is simply discarded, releasing
    /// its reservation.
    pub fn delete(
        &mut self,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
    ) -> Result<usize> {
        if self.new {
            let entry = record_types.entry(&self.record_type)?;
            id_registry.remove_ids(&entry.id_code, &[self.record_id.clone()])?;
            self.deleted = true;
            return Ok(0);
        }

        let (statements, plan) = self.prepare_delete_statements(session, db, record_types)?;
        let cascaded = plan.len().saturating_sub(1);
        log::info!(
            "record {}: deleting with {cascaded} associated records",
            self.record_id
        );
        db.execute(&statements)?;
        self.deleted = true;
        Ok(cascaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionSchema;
    use crate::db::SqliteClient;
    use crate::entry::EntryConfig;
    use crate::registry::LocalIdRegistry;
    use crate::statements::SqlValue;
    use crate::value::DataType;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn test_db() -> SqliteClient {
        let client = SqliteClient::open_in_memory().unwrap();
        client
            .execute_batch_sql(
                "CREATE TABLE bank_records (
                    RecordID TEXT PRIMARY KEY, RecordDate TEXT, Amount REAL, Notes TEXT,
                    CreatorName TEXT, CreationTime TEXT, EditorName TEXT, EditTime TEXT,
                    Deleted INTEGER DEFAULT 0);
                 CREATE TABLE expense_records (
                    RecordID TEXT PRIMARY KEY, RecordDate TEXT, Amount REAL, Notes TEXT,
                    CreatorName TEXT, CreationTime TEXT, EditorName TEXT, EditTime TEXT,
                    Deleted INTEGER DEFAULT 0);
                 CREATE TABLE record_links (
                    DocNo TEXT, RefNo TEXT, RefDate TEXT, DocType TEXT, RefType TEXT,
                    IsChild INTEGER DEFAULT 0, IsHardLink INTEGER DEFAULT 0,
                    IsApproved INTEGER DEFAULT 0, IsDeleted INTEGER DEFAULT 0, Notes TEXT);",
            )
            .unwrap();
        client
    }

    fn test_registry() -> RecordRegistry {
        let config = r#"{
            "bank": {
                "id_code": "CA",
                "export_tables": [{
                    "table": "bank_records",
                    "columns": {
                        "RecordDate": "RecordDate",
                        "Amount": "Amount",
                        "Notes": "Notes"
                    }
                }],
                "association_rules": {
                    "expenses": {
                        "reference_table": "record_links",
                        "primary": true,
                        "association_type": "child"
                    }
                }
            },
            "expense": {
                "id_code": "EX",
                "export_tables": [{
                    "table": "expense_records",
                    "columns": {
                        "RecordDate": "RecordDate",
                        "Amount": "Amount",
                        "Notes": "Notes"
                    }
                }],
                "association_rules": {
                    "banking": {
                        "reference_table": "record_links",
                        "primary": false,
                        "association_type": "parent"
                    }
                }
            }
        }"#;
        let parsed: IndexMap<String, EntryConfig> = serde_json::from_str(config).unwrap();
        RecordRegistry::from_config(parsed).unwrap()
    }

    fn expense_component() -> Component {
        let schema = CollectionSchema::new()
            .column("RecordID", DataType::String)
            .column("RecordDate", DataType::Date)
            .column("Amount", DataType::Money)
            .column("Notes", DataType::String);
        Component {
            rule: "expenses".to_string(),
            record_type: "expense".to_string(),
            parent_child: true,
            collection: RecordCollection::new("expenses", schema, "RecordID", "RecordDate"),
        }
    }

    fn expense_row(id: &str, amount: f64) -> RowValues {
        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from(id));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(amount));
        values
    }

    #[test]
    fn test_field_edit_tracking() {
        let session = SessionContext::default();
        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(100.0));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        assert!(!record.set_field("Amount", Value::Float(100.0)));
        assert!(record.edited_fields().is_empty());
        assert!(record.set_field("Amount", Value::Float(150.0)));
        assert_eq!(record.edited_fields(), vec!["Amount"]);
        assert!(!record.set_field("Amount", Value::Float(100.0)));
    }

    #[test]
    fn test_export_values_edited_only() {
        let session = SessionContext::default();
        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(100.0));
        values.insert("Notes".to_string(), Value::from("unchanged"));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();
        record.set_field("Amount", Value::Float(150.0));

        let exported = record.export_values(&session, true);
        assert_eq!(exported.len(), 3);
        assert!(exported.contains_key("RecordID"));
        assert!(exported.contains_key("RecordDate"));
        assert_eq!(exported.get("Amount"), Some(&Value::Float(150.0)));
        assert!(!exported.contains_key("Notes"));
    }

    #[test]
    fn test_update_touches_only_edited_columns() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate, Amount, Notes) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00', 100.0, 'unchanged');",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(100.0));
        values.insert("Notes".to_string(), Value::from("unchanged"));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();
        record.set_field("Amount", Value::Float(150.0));

        let statements = record
            .prepare_save_statements(&session, &db, &registry, &ids)
            .unwrap();
        let (sql, _) = statements
            .iter()
            .find(|(sql, _)| sql.starts_with("UPDATE bank_records"))
            .unwrap();
        let set_clause = sql
            .split_once(" SET ")
            .and_then(|(_, rest)| rest.split_once(" WHERE "))
            .map(|(set, _)| set)
            .unwrap();
        assert_eq!(set_clause, "Amount=?,EditorName=?,EditTime=?");
    }

    #[test]
    fn test_from_row_requires_identity() {
        let session = SessionContext::default();
        let mut values = RowValues::new();
        values.insert("Amount".to_string(), Value::Float(100.0));
        assert!(DatabaseRecord::from_row("bank", values, &session).is_err());
    }

    #[test]
    fn test_new_record_save_round_trip() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let mut session = SessionContext::default();
        session.user = "ana".to_string();
        let registry = test_registry();

        ids.add_ids("CA", &[("CA2401-0001".to_string(), session.instance_id)])
            .unwrap();
        let mut record = DatabaseRecord::new("bank", "CA2401-0001", date(2024, 1, 15));
        record.set_field("Amount", Value::Float(100.0));
        record.save(&session, &db, &registry, &ids).unwrap();

        let rows = db
            .query(
                "SELECT Amount, CreatorName FROM bank_records WHERE RecordID = 'CA2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Float(100.0));
        assert_eq!(rows[0][1], SqlValue::Text("ana".to_string()));
        assert!(!record.is_new());
        // the reservation was released once the row landed
        assert!(ids.request_ids("CA", None).unwrap().is_empty());
    }

    #[test]
    fn test_clean_record_prepares_nothing() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate, Amount) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00', 100.0);",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(100.0));
        let record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        let statements = record
            .prepare_save_statements(&session, &db, &registry, &ids)
            .unwrap();
        assert!(statements.is_empty());
    }

    #[test]
    fn test_component_rows_saved_and_linked() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00');",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        let mut component = expense_component();
        component
            .collection
            .append(vec![expense_row("EX2401-0001", 25.0)], true);
        record.add_component(component);
        record.save(&session, &db, &registry, &ids).unwrap();

        let rows = db
            .query("SELECT RecordID FROM expense_records", &[])
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Text("EX2401-0001".to_string()));
        let links = db
            .query("SELECT DocNo, RefNo, IsChild FROM record_links", &[])
            .unwrap();
        assert_eq!(links[0][0], SqlValue::Text("CA2401-0001".to_string()));
        assert_eq!(links[0][1], SqlValue::Text("EX2401-0001".to_string()));
        assert_eq!(links[0][2], SqlValue::Int(1));

        // the commit collapsed component change tracking
        let component = record.component("expenses").unwrap();
        assert_eq!(
            component.collection.state_of("EX2401-0001"),
            Some(crate::collection::RowState::Unchanged)
        );
    }

    #[test]
    fn test_deleted_component_row_cascades() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00');
             INSERT INTO expense_records (RecordID, RecordDate) \
             VALUES ('EX2401-0001', '2024-01-15 00:00:00');
             INSERT INTO record_links (DocNo, RefNo, DocType, RefType, IsChild) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense', 1);",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        let mut component = expense_component();
        component
            .collection
            .append(vec![expense_row("EX2401-0001", 25.0)], false);
        component.collection.commit();
        component
            .collection
            .delete_ids(&["EX2401-0001".to_string()]);
        record.add_component(component);
        record.save(&session, &db, &registry, &ids).unwrap();

        let rows = db
            .query(
                "SELECT Deleted FROM expense_records WHERE RecordID = 'EX2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
        let links = db
            .query("SELECT IsDeleted FROM record_links", &[])
            .unwrap();
        assert_eq!(links[0][0], SqlValue::Int(1));
    }

    #[test]
    fn test_delete_reports_cascade_count() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00');
             INSERT INTO expense_records (RecordID, RecordDate) \
             VALUES ('EX2401-0001', '2024-01-15 00:00:00');
             INSERT INTO record_links (DocNo, RefNo, DocType, RefType, IsChild) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense', 1);",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        let cascaded = record.delete(&session, &db, &registry, &ids).unwrap();
        assert_eq!(cascaded, 1);
        assert!(record.is_deleted());

        let rows = db
            .query("SELECT Deleted FROM bank_records", &[])
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
    }

    #[test]
    fn test_delete_unsaved_record_releases_reservation() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();

        ids.add_ids("CA", &[("CA2401-0001".to_string(), session.instance_id)])
            .unwrap();
        let mut record = DatabaseRecord::new("bank", "CA2401-0001", date(2024, 1, 15));
        let cascaded = record.delete(&session, &db, &registry, &ids).unwrap();
        assert_eq!(cascaded, 0);
        assert!(ids.request_ids("CA", None).unwrap().is_empty());
        assert!(db.query("SELECT RecordID FROM bank_records", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_reference_box_saved() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, RecordDate) \
             VALUES ('CA2401-0001', '2024-01-15 00:00:00');",
        )
        .unwrap();

        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from("CA2401-0001"));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        let mut record = DatabaseRecord::from_row("bank", values, &session).unwrap();

        record.references_mut("expenses").append(
            vec![Reference::new("CA2401-0001", "EX2401-0009", "bank", "expense")],
            true,
        );
        record.save(&session, &db, &registry, &ids).unwrap();

        let links = db
            .query("SELECT DocNo, RefNo FROM record_links", &[])
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0][1], SqlValue::Text("EX2401-0009".to_string()));
    }
}
