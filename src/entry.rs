use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{Datelike, NaiveDateTime};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::collection::{RowFilter, RowValues};
use crate::db::DbClient;
use crate::error::{ReckonError, Result};
use crate::expr::Expr;
use crate::records::{RecordCollection, Reference, ReferenceCollection};
use crate::registry::IdRegistry;
use crate::session::SessionContext;
use crate::statements::{prepare_insert, prepare_update, SqlValue, StatementSet};
use crate::value::{DataType, Value};

/// Existence checks are batched to stay under typical SQL parameter limits.
const EXISTENCE_CHUNK: usize = 1000;

/// Columns of the generic reference table, in storage order.
const REFERENCE_COLUMNS: [&str; 10] = [
    "DocNo",
    "RefNo",
    "RefDate",
    "DocType",
    "RefType",
    "IsChild",
    "IsHardLink",
    "IsApproved",
    "IsDeleted",
    "Notes",
];

/// The role the counterpart record type plays relative to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationType {
    Parent,
    Child,
    Reference,
}

/// Auto-creation rule: saving a record of this type also creates or
/// updates a linked record of another type, carrying over mapped columns.
#[derive(Debug, Clone)]
pub struct HardLinkRule {
    pub record_type: String,
    pub column_map: IndexMap<String, String>,
    pub condition: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct AssociationRule {
    pub name: String,
    pub reference_table: String,
    /// Whether this type is the owning side of the stored pair, mapping
    /// its IDs to the `DocNo` column instead of `RefNo`.
    pub primary: bool,
    pub association_type: AssociationType,
    pub hard_links: Vec<HardLinkRule>,
}

/// One backing database table and its in-memory-field to column mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRule {
    pub table: String,
    pub columns: IndexMap<String, String>,
}

/// Per-record-type configuration: identity rules, export table mappings,
/// and association rules.
#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub name: String,
    pub id_code: String,
    pub export_tables: Vec<TableRule>,
    pub association_rules: IndexMap<String, AssociationRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardLinkConfig {
    pub record_type: String,
    pub column_map: IndexMap<String, String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociationRuleConfig {
    pub reference_table: String,
    #[serde(default)]
    pub primary: bool,
    pub association_type: AssociationType,
    #[serde(default)]
    pub hard_links: Vec<HardLinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    pub id_code: String,
    pub export_tables: Vec<TableRule>,
    #[serde(default)]
    pub association_rules: IndexMap<String, AssociationRuleConfig>,
}

impl RecordEntry {
    pub fn from_config(name: &str, config: EntryConfig) -> Result<Self> {
        if config.export_tables.is_empty() {
            return Err(ReckonError::Config(format!(
                "record type {name} has no export tables configured"
            )));
        }
        let mut rules = IndexMap::new();
        for (rule_name, rule) in config.association_rules {
            let mut hard_links = Vec::with_capacity(rule.hard_links.len());
            for link in rule.hard_links {
                let condition = link
                    .condition
                    .as_deref()
                    .map(Expr::parse)
                    .transpose()
                    .map_err(|e| {
                        ReckonError::Config(format!(
                            "record type {name}, rule {rule_name}: bad hard-link condition - {e}"
                        ))
                    })?;
                hard_links.push(HardLinkRule {
                    record_type: link.record_type,
                    column_map: link.column_map,
                    condition,
                });
            }
            rules.insert(
                rule_name.clone(),
                AssociationRule {
                    name: rule_name,
                    reference_table: rule.reference_table,
                    primary: rule.primary,
                    association_type: rule.association_type,
                    hard_links,
                },
            );
        }
        Ok(Self {
            name: name.to_string(),
            id_code: config.id_code,
            export_tables: config.export_tables,
            association_rules: rules,
        })
    }

    /// The table holding the record's identity row.
    pub fn primary_table(&self) -> &TableRule {
        &self.export_tables[0]
    }

    pub fn rule(&self, name: &str) -> Result<&AssociationRule> {
        self.association_rules
            .get(name)
            .ok_or_else(|| ReckonError::UnknownRule(name.to_string()))
    }

    /// Mint record IDs for the given dates, one per date, formatted
    /// `{IDCode}{YYMM}-{NNNN}`. Both the unsaved-ID registry and the
    /// backing table are consulted for the highest sequence in each date
    /// bucket, and the minted IDs are reserved before being returned. A
    /// failure anywhere reserves nothing.
    pub fn create_record_ids(
        &self,
        dates: &[NaiveDateTime],
        session: &SessionContext,
        id_registry: &dyn IdRegistry,
        db: &dyn DbClient,
    ) -> Result<Vec<String>> {
        let pattern = Regex::new(&format!(
            r"^{}(\d{{4}})-(\d+)$",
            regex::escape(&self.id_code)
        ))
        .map_err(|e| ReckonError::Config(format!("bad ID code {}: {e}", self.id_code)))?;

        let id_column = &session.columns.id_field;
        let mut next_sequence: HashMap<String, i64> = HashMap::new();
        let mut minted = Vec::with_capacity(dates.len());
        for date in dates {
            let bucket = date_component(*date, session.date_offset);
            let sequence = match next_sequence.get(&bucket) {
                Some(s) => *s,
                None => {
                    let prefix = format!("{}{}-", self.id_code, bucket);
                    let unsaved = id_registry.request_ids(&self.id_code, None)?;
                    let sql = format!(
                        "SELECT {id_column} FROM {table} WHERE {id_column} LIKE ?",
                        table = self.primary_table().table
                    );
                    let stored = db.query(&sql, &[SqlValue::Text(format!("{prefix}%"))])?;
                    let mut highest = 0i64;
                    let candidates = unsaved
                        .into_iter()
                        .filter(|id| id.starts_with(&prefix))
                        .chain(stored.into_iter().filter_map(|row| match row.into_iter().next() {
                            Some(SqlValue::Text(id)) => Some(id),
                            _ => None,
                        }));
                    for id in candidates {
                        let sequence = pattern
                            .captures(&id)
                            .and_then(|caps| caps[2].parse::<i64>().ok())
                            .ok_or_else(|| ReckonError::BadRecordId(id.clone()))?;
                        highest = highest.max(sequence);
                    }
                    highest + 1
                }
            };
            minted.push(format!("{}{}-{:04}", self.id_code, bucket, sequence));
            next_sequence.insert(bucket, sequence + 1);
        }

        let reservations: Vec<(String, u32)> = minted
            .iter()
            .map(|id| (id.clone(), session.instance_id))
            .collect();
        id_registry.add_ids(&self.id_code, &reservations)?;
        log::info!(
            "{}: minted and reserved {} record IDs",
            self.name,
            minted.len()
        );
        Ok(minted)
    }

    /// Batched existence check against the primary table. Returns one
    /// boolean per ID, in order.
    pub fn confirm_saved(
        &self,
        ids: &[String],
        session: &SessionContext,
        db: &dyn DbClient,
    ) -> Result<Vec<bool>> {
        let id_column = &session.columns.id_field;
        let mut found = HashSet::new();
        for chunk in ids.chunks(EXISTENCE_CHUNK) {
            let markers = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT {id_column} FROM {table} WHERE {id_column} IN ({markers})",
                table = self.primary_table().table
            );
            let params: Vec<SqlValue> = chunk.iter().map(|id| SqlValue::from(id.as_str())).collect();
            for row in db.query(&sql, &params)? {
                if let Some(SqlValue::Text(id)) = row.into_iter().next() {
                    found.insert(id);
                }
            }
        }
        Ok(ids.iter().map(|id| found.contains(id)).collect())
    }

    /// Release this instance's reservations that have landed in the
    /// backing table, after a successful batch commit.
    pub fn release_saved_ids(
        &self,
        session: &SessionContext,
        db: &dyn DbClient,
        id_registry: &dyn IdRegistry,
    ) -> Result<()> {
        let reserved = id_registry.request_ids(&self.id_code, Some(session.instance_id))?;
        if reserved.is_empty() {
            return Ok(());
        }
        let saved = self.confirm_saved(&reserved, session, db)?;
        let release: Vec<String> = reserved
            .into_iter()
            .zip(saved)
            .filter_map(|(id, saved)| saved.then_some(id))
            .collect();
        if !release.is_empty() {
            id_registry.remove_ids(&self.id_code, &release)?;
        }
        Ok(())
    }

    /// Load the stored associations for the given record IDs under one
    /// rule, mapping the generic `DocNo`/`RefNo` pair to record/reference
    /// IDs according to the rule's primary side.
    pub fn import_references(
        &self,
        record_ids: &[String],
        rule_name: &str,
        db: &dyn DbClient,
    ) -> Result<Vec<Reference>> {
        let rule = self.rule(rule_name)?;
        if record_ids.is_empty() {
            return Ok(Vec::new());
        }
        let (owner, other, owner_type, other_type) = if rule.primary {
            ("DocNo", "RefNo", "DocType", "RefType")
        } else {
            ("RefNo", "DocNo", "RefType", "DocType")
        };
        let markers = vec!["?"; record_ids.len()].join(",");
        let sql = format!(
            "SELECT {owner},{other},{owner_type},{other_type},RefDate,IsChild,IsHardLink,\
             IsApproved,IsDeleted,Notes FROM {table} WHERE {owner} IN ({markers}) AND \
             IsDeleted = 0",
            table = rule.reference_table
        );
        let params: Vec<SqlValue> = record_ids
            .iter()
            .map(|id| SqlValue::from(id.as_str()))
            .collect();

        let mut references = Vec::new();
        for row in db.query(&sql, &params)? {
            if row.len() != REFERENCE_COLUMNS.len() {
                return Err(ReckonError::Other(format!(
                    "reference table {} returned a row of unexpected width",
                    rule.reference_table
                )));
            }
            references.push(Reference {
                record_id: sql_text(&row[0]),
                reference_id: sql_text(&row[1]),
                record_type: sql_text(&row[2]),
                reference_type: sql_text(&row[3]),
                reference_date: sql_date(&row[4]),
                is_child: sql_bool(&row[5]),
                is_hard_link: sql_bool(&row[6]),
                is_approved: sql_bool(&row[7]),
                is_deleted: sql_bool(&row[8]),
                notes: sql_text(&row[9]),
                warnings: String::new(),
            });
        }
        Ok(references)
    }

    /// IDs of this type's records that have no stored counterpart under
    /// the given rule.
    pub fn search_unreferenced_ids(
        &self,
        rule_name: &str,
        session: &SessionContext,
        db: &dyn DbClient,
    ) -> Result<Vec<String>> {
        let rule = self.rule(rule_name)?;
        let owner = if rule.primary { "DocNo" } else { "RefNo" };
        let id_column = &session.columns.id_field;
        let deleted = &session.columns.delete_field;
        let sql = format!(
            "SELECT r.{id_column} FROM {table} r LEFT JOIN {reference_table} x ON \
             r.{id_column} = x.{owner} AND x.IsDeleted = 0 WHERE x.{owner} IS NULL AND \
             r.{deleted} = 0",
            table = self.primary_table().table,
            reference_table = rule.reference_table
        );
        let ids = db
            .query(&sql, &[])?
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(id)) => Some(id),
                _ => None,
            })
            .collect();
        Ok(ids)
    }

    /// Turn the collection's dirty rows into insert/update statements, one
    /// batch per export table, stamping creator metadata on new rows and
    /// editor metadata on existing ones. Hard-link rules are followed
    /// recursively, guarded by a visited set keyed (record type, record
    /// id). Rows created and deleted in the same session export nothing.
    pub fn save_database_records(
        &self,
        records: &RecordCollection,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
        statements: &mut StatementSet,
    ) -> Result<()> {
        let id_column = &session.columns.id_field;
        let dirty: Vec<(String, RowValues)> = records
            .inner()
            .rows(RowFilter::All)
            .filter(|(_, row)| {
                (row.state.is_edited() || row.state.is_added()) && !row.state.is_deleted()
            })
            .filter_map(|(_, row)| {
                let id = row.get(id_column).as_str()?.to_string();
                Some((id, row.values.clone()))
            })
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = dirty.iter().map(|(id, _)| id.clone()).collect();
        let exists = self.confirm_saved(&ids, session, db)?;

        let mut visited = HashSet::new();
        for ((id, values), exists) in dirty.iter().zip(exists) {
            self.export_record(
                id,
                values,
                exists,
                session,
                db,
                record_types,
                id_registry,
                statements,
                &mut visited,
            )?;
        }
        Ok(())
    }

    /// Export one record's values as insert or update statements, checking
    /// the backing table for existence and following hard-link rules.
    #[allow(clippy::too_many_arguments)]
    pub fn save_record(
        &self,
        record_id: &str,
        values: &RowValues,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
        statements: &mut StatementSet,
    ) -> Result<()> {
        let exists = self
            .confirm_saved(&[record_id.to_string()], session, db)?
            .into_iter()
            .next()
            .unwrap_or(false);
        let mut visited = HashSet::new();
        self.export_record(
            record_id,
            values,
            exists,
            session,
            db,
            record_types,
            id_registry,
            statements,
            &mut visited,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn export_record(
        &self,
        record_id: &str,
        values: &RowValues,
        exists: bool,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
        statements: &mut StatementSet,
        visited: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        if !visited.insert((self.name.clone(), record_id.to_string())) {
            return Ok(());
        }

        let columns = &session.columns;
        let user = SqlValue::Text(session.user.clone());
        let now = SqlValue::DateTime(session.timestamp());
        for table in &self.export_tables {
            let mut names: Vec<String> = Vec::new();
            let mut row: Vec<SqlValue> = Vec::new();
            for (field, column) in &table.columns {
                if field == &columns.id_field {
                    continue;
                }
                // the record date is identity, immutable once created
                if exists && field == &columns.date_field {
                    continue;
                }
                if let Some(value) = values.get(field) {
                    names.push(column.clone());
                    row.push(SqlValue::from(value));
                }
            }
            if exists {
                names.push(columns.editor_name.clone());
                row.push(user.clone());
                names.push(columns.edit_time.clone());
                row.push(now.clone());
                prepare_update(
                    &table.table,
                    &names,
                    vec![row],
                    &format!("{} = ?", columns.id_field),
                    vec![vec![SqlValue::from(record_id)]],
                    statements,
                )?;
            } else {
                names.push(columns.id_field.clone());
                row.push(SqlValue::from(record_id));
                names.push(columns.creator_name.clone());
                row.push(user.clone());
                names.push(columns.creation_time.clone());
                row.push(now.clone());
                prepare_insert(&table.table, &names, vec![row], statements)?;
            }
        }

        self.export_hard_links(
            record_id,
            values,
            session,
            db,
            record_types,
            id_registry,
            statements,
            visited,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn export_hard_links(
        &self,
        record_id: &str,
        values: &RowValues,
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        id_registry: &dyn IdRegistry,
        statements: &mut StatementSet,
        visited: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        for rule in self.association_rules.values() {
            for link in &rule.hard_links {
                if let Some(condition) = &link.condition {
                    // columns missing from a partial export count as NA
                    let lookup = |name: &str| Some(values.get(name).cloned().unwrap_or(Value::Null));
                    if !condition.evaluate_condition(&lookup)? {
                        continue;
                    }
                }
                let linked = record_types.entry(&link.record_type)?;
                let mut linked_values = RowValues::new();
                for (ours, theirs) in &link.column_map {
                    if let Some(value) = values.get(ours) {
                        linked_values.insert(theirs.clone(), value.clone());
                    }
                }

                let stored = self.import_references(&[record_id.to_string()], &rule.name, db)?;
                let existing = stored
                    .into_iter()
                    .find(|r| r.is_hard_link && r.reference_type == link.record_type);
                match existing {
                    Some(reference) => {
                        linked.export_record(
                            &reference.reference_id,
                            &linked_values,
                            true,
                            session,
                            db,
                            record_types,
                            id_registry,
                            statements,
                            visited,
                        )?;
                    }
                    None => {
                        let date = values
                            .get(&session.columns.date_field)
                            .and_then(Value::as_date)
                            .unwrap_or_else(|| session.timestamp());
                        let new_id = linked
                            .create_record_ids(&[date], session, id_registry, db)?
                            .pop()
                            .ok_or_else(|| {
                                ReckonError::Other(format!(
                                    "no record ID was minted for hard-linked type {}",
                                    link.record_type
                                ))
                            })?;
                        log::info!(
                            "{}: record {record_id} hard-links a new {} record {new_id}",
                            self.name,
                            link.record_type
                        );
                        linked.export_record(
                            &new_id,
                            &linked_values,
                            false,
                            session,
                            db,
                            record_types,
                            id_registry,
                            statements,
                            visited,
                        )?;

                        let mut reference =
                            Reference::new(record_id, &new_id, &self.name, &link.record_type);
                        reference.reference_date = Some(date);
                        reference.is_hard_link = true;
                        insert_reference_row(rule, &reference, statements)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk the association graph from the given IDs, collecting every
    /// (record type, record id) that a delete would remove: the records
    /// themselves plus child and hard-linked counterparts. Each node is
    /// visited at most once, so association cycles terminate.
    pub fn plan_delete(
        &self,
        record_ids: &[String],
        db: &dyn DbClient,
        record_types: &RecordRegistry,
    ) -> Result<Vec<(String, String)>> {
        let mut visited = HashSet::new();
        let mut plan = Vec::new();
        self.collect_delete_targets(record_ids, db, record_types, &mut visited, &mut plan)?;
        Ok(plan)
    }

    fn collect_delete_targets(
        &self,
        record_ids: &[String],
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        visited: &mut HashSet<(String, String)>,
        plan: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for id in record_ids {
            if !visited.insert((self.name.clone(), id.clone())) {
                continue;
            }
            plan.push((self.name.clone(), id.clone()));
            for rule in self.association_rules.values() {
                let references = self.import_references(&[id.clone()], &rule.name, db)?;
                for reference in references {
                    let cascade = reference.is_hard_link
                        || (reference.is_child
                            && rule.association_type == AssociationType::Child);
                    if !cascade {
                        continue;
                    }
                    match record_types.get(&reference.reference_type) {
                        Some(entry) => entry.collect_delete_targets(
                            &[reference.reference_id],
                            db,
                            record_types,
                            visited,
                            plan,
                        )?,
                        None => log::warn!(
                            "{}: cannot cascade delete into unknown record type {}",
                            self.name,
                            reference.reference_type
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    /// Logically delete records: the delete column is set on every backing
    /// table (rows are never physically removed), stored associations are
    /// flagged deleted, and child or hard-linked records are cascaded per
    /// the plan. Returns the plan that was exported.
    pub fn delete_database_records(
        &self,
        record_ids: &[String],
        session: &SessionContext,
        db: &dyn DbClient,
        record_types: &RecordRegistry,
        statements: &mut StatementSet,
    ) -> Result<Vec<(String, String)>> {
        let plan = self.plan_delete(record_ids, db, record_types)?;
        let columns = &session.columns;
        let user = SqlValue::Text(session.user.clone());
        let now = SqlValue::DateTime(session.timestamp());
        let update_names = vec![
            columns.delete_field.clone(),
            columns.editor_name.clone(),
            columns.edit_time.clone(),
        ];
        for (type_name, id) in &plan {
            let entry = record_types.entry(type_name)?;
            for table in &entry.export_tables {
                prepare_update(
                    &table.table,
                    &update_names,
                    vec![vec![SqlValue::Bool(true), user.clone(), now.clone()]],
                    &format!("{} = ?", columns.id_field),
                    vec![vec![SqlValue::from(id.as_str())]],
                    statements,
                )?;
            }
            for rule in entry.association_rules.values() {
                let owner = if rule.primary { "DocNo" } else { "RefNo" };
                prepare_update(
                    &rule.reference_table,
                    &["IsDeleted".to_string()],
                    vec![vec![SqlValue::Bool(true)]],
                    &format!("{owner} = ?"),
                    vec![vec![SqlValue::from(id.as_str())]],
                    statements,
                )?;
            }
        }
        log::info!(
            "{}: prepared logical delete of {} records",
            self.name,
            plan.len()
        );
        Ok(plan)
    }

    /// Export dirty association rows under one rule. New rows become
    /// inserts and stored rows updates, with the primary side deciding
    /// which ID lands in `DocNo` versus `RefNo`. An association created
    /// and deleted in the same session is dropped, never inserted.
    pub fn save_database_references(
        &self,
        references: &ReferenceCollection,
        rule_name: &str,
        statements: &mut StatementSet,
    ) -> Result<()> {
        let rule = self.rule(rule_name)?;
        for (reference, state) in references.iter(RowFilter::All) {
            if state.invisible_to_persistence() || !(state.is_edited() || state.is_added()) {
                continue;
            }
            if state.is_added() {
                insert_reference_row(rule, reference, statements)?;
            } else {
                update_reference_row(rule, reference, statements)?;
            }
        }
        Ok(())
    }
}

/// `YYMM` bucket for a record date, with the calendar-year offset applied
/// before formatting.
fn date_component(date: NaiveDateTime, offset: i32) -> String {
    let year = date.year() + offset;
    format!("{:02}{:02}", year.rem_euclid(100), date.month())
}

fn storage_order<'a>(rule: &AssociationRule, reference: &'a Reference) -> [&'a str; 4] {
    if rule.primary {
        [
            &reference.record_id,
            &reference.reference_id,
            &reference.record_type,
            &reference.reference_type,
        ]
    } else {
        [
            &reference.reference_id,
            &reference.record_id,
            &reference.reference_type,
            &reference.record_type,
        ]
    }
}

fn insert_reference_row(
    rule: &AssociationRule,
    reference: &Reference,
    statements: &mut StatementSet,
) -> Result<()> {
    let [doc_no, ref_no, doc_type, ref_type] = storage_order(rule, reference);
    let columns: Vec<String> = REFERENCE_COLUMNS.iter().map(|c| c.to_string()).collect();
    let row = vec![
        SqlValue::from(doc_no),
        SqlValue::from(ref_no),
        reference
            .reference_date
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        SqlValue::from(doc_type),
        SqlValue::from(ref_type),
        SqlValue::Bool(reference.is_child),
        SqlValue::Bool(reference.is_hard_link),
        SqlValue::Bool(reference.is_approved),
        SqlValue::Bool(reference.is_deleted),
        SqlValue::Text(reference.notes.clone()),
    ];
    prepare_insert(&rule.reference_table, &columns, vec![row], statements)
}

fn update_reference_row(
    rule: &AssociationRule,
    reference: &Reference,
    statements: &mut StatementSet,
) -> Result<()> {
    let [doc_no, ref_no, _, _] = storage_order(rule, reference);
    let columns: Vec<String> = ["RefDate", "IsChild", "IsHardLink", "IsApproved", "IsDeleted", "Notes"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let row = vec![
        reference
            .reference_date
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        SqlValue::Bool(reference.is_child),
        SqlValue::Bool(reference.is_hard_link),
        SqlValue::Bool(reference.is_approved),
        SqlValue::Bool(reference.is_deleted),
        SqlValue::Text(reference.notes.clone()),
    ];
    prepare_update(
        &rule.reference_table,
        &columns,
        vec![row],
        "DocNo = ? AND RefNo = ?",
        vec![vec![SqlValue::from(doc_no), SqlValue::from(ref_no)]],
        statements,
    )
}

fn sql_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Null => String::new(),
        other => format!("{other:?}"),
    }
}

fn sql_bool(value: &SqlValue) -> bool {
    match value {
        SqlValue::Bool(b) => *b,
        SqlValue::Int(i) => *i != 0,
        _ => false,
    }
}

fn sql_date(value: &SqlValue) -> Option<NaiveDateTime> {
    match value {
        SqlValue::DateTime(d) => Some(*d),
        SqlValue::Text(s) => Value::from(s.as_str()).coerce(DataType::Date).as_date(),
        _ => None,
    }
}

/// All configured record types, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct RecordRegistry {
    entries: IndexMap<String, RecordEntry>,
}

impl RecordRegistry {
    pub fn from_config(config: IndexMap<String, EntryConfig>) -> Result<Self> {
        let mut entries = IndexMap::new();
        for (name, entry) in config {
            entries.insert(name.clone(), RecordEntry::from_config(&name, entry)?);
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexMap<String, EntryConfig> =
            serde_json::from_str(&content).map_err(|e| ReckonError::Config(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn get(&self, name: &str) -> Option<&RecordEntry> {
        self.entries.get(name)
    }

    pub fn entry(&self, name: &str) -> Result<&RecordEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| ReckonError::UnknownRecordType(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionSchema;
    use crate::db::SqliteClient;
    use crate::registry::LocalIdRegistry;
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
                        "association_type": "child",
                        "hard_links": [{
                            "record_type": "expense",
                            "column_map": {
                                "RecordDate": "RecordDate",
                                "Amount": "Amount"
                            },
                            "condition": "Amount < 0"
                        }]
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

    fn bank_collection() -> RecordCollection {
        let schema = CollectionSchema::new()
            .column("RecordID", DataType::String)
            .column("RecordDate", DataType::Date)
            .column("Amount", DataType::Money)
            .column("Notes", DataType::String);
        RecordCollection::new("bank", schema, "RecordID", "RecordDate")
    }

    fn bank_row(id: &str, amount: f64) -> RowValues {
        let mut values = RowValues::new();
        values.insert("RecordID".to_string(), Value::from(id));
        values.insert("RecordDate".to_string(), Value::Date(date(2024, 1, 15)));
        values.insert("Amount".to_string(), Value::Float(amount));
        values
    }

    #[test]
    fn test_missing_config_keys_fatal() {
        let bad: std::result::Result<EntryConfig, _> = serde_json::from_str(r#"{"id_code": "CA"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_no_export_tables_rejected() {
        let config: EntryConfig =
            serde_json::from_str(r#"{"id_code": "CA", "export_tables": []}"#).unwrap();
        assert!(matches!(
            RecordEntry::from_config("bank", config),
            Err(ReckonError::Config(_))
        ));
    }

    #[test]
    fn test_create_record_ids_fresh_bucket() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let minted = bank
            .create_record_ids(&[date(2024, 1, 15)], &session, &ids, &db)
            .unwrap();
        assert_eq!(minted, vec!["CA2401-0001"]);
        assert_eq!(ids.request_ids("CA", None).unwrap(), vec!["CA2401-0001"]);
    }

    #[test]
    fn test_create_record_ids_sequential_within_call() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let minted = bank
            .create_record_ids(
                &[date(2024, 1, 15), date(2024, 1, 20), date(2024, 2, 1)],
                &session,
                &ids,
                &db,
            )
            .unwrap();
        assert_eq!(minted, vec!["CA2401-0001", "CA2401-0002", "CA2402-0001"]);
    }

    #[test]
    fn test_create_record_ids_skips_reserved_and_stored() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID) VALUES ('CA2401-0003');",
        )
        .unwrap();
        ids.add_ids("CA", &[("CA2401-0007".to_string(), 99)]).unwrap();

        let minted = bank
            .create_record_ids(&[date(2024, 1, 15)], &session, &ids, &db)
            .unwrap();
        assert_eq!(minted, vec!["CA2401-0008"]);
    }

    #[test]
    fn test_create_record_ids_applies_year_offset() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let mut session = SessionContext::default();
        session.date_offset = 543;
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let minted = bank
            .create_record_ids(&[date(2024, 1, 15)], &session, &ids, &db)
            .unwrap();
        // 2024 + 543 = 2567
        assert_eq!(minted, vec!["CA6701-0001"]);
    }

    #[test]
    fn test_create_record_ids_rejects_unparseable_prior_id() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID) VALUES ('CA2401-badseq');",
        )
        .unwrap();
        let result = bank.create_record_ids(&[date(2024, 1, 15)], &session, &ids, &db);
        assert!(matches!(result, Err(ReckonError::BadRecordId(_))));
        // A failed mint reserves nothing
        assert!(ids.request_ids("CA", None).unwrap().is_empty());
    }

    #[test]
    fn test_confirm_saved() {
        let db = test_db();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        db.execute_batch_sql("INSERT INTO bank_records (RecordID) VALUES ('CA2401-0001');")
            .unwrap();
        let saved = bank
            .confirm_saved(
                &["CA2401-0001".to_string(), "CA2401-0002".to_string()],
                &session,
                &db,
            )
            .unwrap();
        assert_eq!(saved, vec![true, false]);
    }

    #[test]
    fn test_save_new_record_inserts_with_creator() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let mut session = SessionContext::default();
        session.user = "ana".to_string();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let mut coll = bank_collection();
        coll.append(vec![bank_row("CA2401-0001", 100.0)], true);

        let mut statements = StatementSet::new();
        bank.save_database_records(&coll, &session, &db, &registry, &ids, &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        let rows = db
            .query(
                "SELECT Amount, CreatorName FROM bank_records WHERE RecordID = 'CA2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Float(100.0));
        assert_eq!(rows[0][1], SqlValue::Text("ana".to_string()));
    }

    #[test]
    fn test_save_existing_record_updates_editor() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let mut session = SessionContext::default();
        session.user = "ana".to_string();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID, Amount, CreatorName) \
             VALUES ('CA2401-0001', 100.0, 'ops');",
        )
        .unwrap();

        let mut coll = bank_collection();
        coll.append(vec![bank_row("CA2401-0001", 100.0)], false);
        coll.inner_mut()
            .update_field("Amount", &[Value::Float(150.0)], Some(&[0]))
            .unwrap();

        let mut statements = StatementSet::new();
        bank.save_database_records(&coll, &session, &db, &registry, &ids, &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        let rows = db
            .query(
                "SELECT Amount, CreatorName, EditorName FROM bank_records \
                 WHERE RecordID = 'CA2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Float(150.0));
        assert_eq!(rows[0][1], SqlValue::Text("ops".to_string()));
        assert_eq!(rows[0][2], SqlValue::Text("ana".to_string()));
    }

    #[test]
    fn test_added_then_deleted_row_exports_nothing() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let mut coll = bank_collection();
        coll.append(vec![bank_row("CA2401-0001", 100.0)], true);
        coll.delete_ids(&["CA2401-0001".to_string()]);

        let mut statements = StatementSet::new();
        bank.save_database_records(&coll, &session, &db, &registry, &ids, &mut statements)
            .unwrap();
        assert!(statements.is_empty());
    }

    #[test]
    fn test_hard_link_creates_linked_record_and_reference() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let mut coll = bank_collection();
        coll.append(vec![bank_row("CA2401-0001", -50.0)], true);

        let mut statements = StatementSet::new();
        bank.save_database_records(&coll, &session, &db, &registry, &ids, &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        let linked = db
            .query("SELECT RecordID, Amount FROM expense_records", &[])
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0][0], SqlValue::Text("EX2401-0001".to_string()));
        assert_eq!(linked[0][1], SqlValue::Float(-50.0));

        let links = db
            .query(
                "SELECT DocNo, RefNo, IsHardLink FROM record_links",
                &[],
            )
            .unwrap();
        assert_eq!(links[0][0], SqlValue::Text("CA2401-0001".to_string()));
        assert_eq!(links[0][1], SqlValue::Text("EX2401-0001".to_string()));
        assert_eq!(links[0][2], SqlValue::Int(1));
    }

    #[test]
    fn test_hard_link_condition_not_met() {
        let db = test_db();
        let ids = LocalIdRegistry::new();
        let session = SessionContext::default();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let mut coll = bank_collection();
        coll.append(vec![bank_row("CA2401-0001", 75.0)], true);

        let mut statements = StatementSet::new();
        bank.save_database_records(&coll, &session, &db, &registry, &ids, &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        assert!(db
            .query("SELECT RecordID FROM expense_records", &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_import_references_maps_primary_side() {
        let db = test_db();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO record_links (DocNo, RefNo, DocType, RefType, IsChild) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense', 1);",
        )
        .unwrap();

        let bank = registry.entry("bank").unwrap();
        let refs = bank
            .import_references(&["CA2401-0001".to_string()], "expenses", &db)
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].record_id, "CA2401-0001");
        assert_eq!(refs[0].reference_id, "EX2401-0001");
        assert!(refs[0].is_child);

        // The non-primary side sees the same row from the other direction
        let expense = registry.entry("expense").unwrap();
        let refs = expense
            .import_references(&["EX2401-0001".to_string()], "banking", &db)
            .unwrap();
        assert_eq!(refs[0].record_id, "EX2401-0001");
        assert_eq!(refs[0].reference_id, "CA2401-0001");
    }

    #[test]
    fn test_search_unreferenced_ids() {
        let db = test_db();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID) VALUES ('CA2401-0001'), ('CA2401-0002');
             INSERT INTO record_links (DocNo, RefNo, DocType, RefType) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense');",
        )
        .unwrap();

        let bank = registry.entry("bank").unwrap();
        let orphans = bank
            .search_unreferenced_ids("expenses", &session, &db)
            .unwrap();
        assert_eq!(orphans, vec!["CA2401-0002"]);
    }

    #[test]
    fn test_delete_cascades_and_terminates_on_cycle() {
        let db = test_db();
        let session = SessionContext::default();
        let registry = test_registry();
        db.execute_batch_sql(
            "INSERT INTO bank_records (RecordID) VALUES ('CA2401-0001');
             INSERT INTO expense_records (RecordID) VALUES ('EX2401-0001');
             INSERT INTO record_links (DocNo, RefNo, DocType, RefType, IsChild, IsHardLink) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense', 1, 1);",
        )
        .unwrap();

        let bank = registry.entry("bank").unwrap();
        let mut statements = StatementSet::new();
        let plan = bank
            .delete_database_records(
                &["CA2401-0001".to_string()],
                &session,
                &db,
                &registry,
                &mut statements,
            )
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(&("bank".to_string(), "CA2401-0001".to_string())));
        assert!(plan.contains(&("expense".to_string(), "EX2401-0001".to_string())));

        db.execute(&statements).unwrap();
        let rows = db
            .query("SELECT Deleted FROM bank_records WHERE RecordID = 'CA2401-0001'", &[])
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
        let rows = db
            .query(
                "SELECT Deleted FROM expense_records WHERE RecordID = 'EX2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
        let rows = db
            .query("SELECT IsDeleted FROM record_links", &[])
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
    }

    #[test]
    fn test_save_references_insert_and_update() {
        let db = test_db();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();
        db.execute_batch_sql(
            "INSERT INTO record_links (DocNo, RefNo, DocType, RefType) \
             VALUES ('CA2401-0001', 'EX2401-0001', 'bank', 'expense');",
        )
        .unwrap();

        let mut refs = ReferenceCollection::new();
        let mut existing = Reference::new("CA2401-0001", "EX2401-0001", "bank", "expense");
        existing.is_approved = false;
        refs.append(vec![existing.clone()], false);
        existing.is_approved = true;
        refs.append(vec![existing], false);
        refs.append(
            vec![Reference::new("CA2401-0002", "EX2401-0002", "bank", "expense")],
            true,
        );

        let mut statements = StatementSet::new();
        bank.save_database_references(&refs, "expenses", &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        let rows = db
            .query(
                "SELECT IsApproved FROM record_links WHERE RefNo = 'EX2401-0001'",
                &[],
            )
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(1));
        let rows = db
            .query("SELECT DocNo FROM record_links WHERE RefNo = 'EX2401-0002'", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_added_then_deleted_reference_never_inserted() {
        let db = test_db();
        let registry = test_registry();
        let bank = registry.entry("bank").unwrap();

        let mut refs = ReferenceCollection::new();
        refs.append(
            vec![Reference::new("CA2401-0001", "EX2401-0001", "bank", "expense")],
            true,
        );
        refs.delete(&[("CA2401-0001".to_string(), "EX2401-0001".to_string())]);

        let mut statements = StatementSet::new();
        bank.save_database_references(&refs, "expenses", &mut statements)
            .unwrap();
        assert!(statements.is_empty());
        db.execute(&statements).unwrap();
        assert!(db.query("SELECT DocNo FROM record_links", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_non_primary_side_writes_swapped_columns() {
        let db = test_db();
        let registry = test_registry();
        let expense = registry.entry("expense").unwrap();

        let mut refs = ReferenceCollection::new();
        refs.append(
            vec![Reference::new("EX2401-0001", "CA2401-0001", "expense", "bank")],
            true,
        );

        let mut statements = StatementSet::new();
        expense
            .save_database_references(&refs, "banking", &mut statements)
            .unwrap();
        db.execute(&statements).unwrap();

        let rows = db
            .query("SELECT DocNo, RefNo, DocType FROM record_links", &[])
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Text("CA2401-0001".to_string()));
        assert_eq!(rows[0][1], SqlValue::Text("EX2401-0001".to_string()));
        assert_eq!(rows[0][2], SqlValue::Text("bank".to_string()));
    }
}
