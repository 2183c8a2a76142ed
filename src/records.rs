use chrono::NaiveDateTime;

use crate::collection::{CollectionSchema, DataCollection, RowFilter, RowState, RowValues};
use crate::value::Value;

/// Tabular container of whole records of one type. Wraps a [`DataCollection`]
/// and adds identity semantics: one row per record ID, with re-appends of an
/// existing ID treated as modifications instead of duplicates.
#[derive(Debug, Clone)]
pub struct RecordCollection {
    collection: DataCollection,
    pub id_column: String,
    pub date_column: String,
}

impl RecordCollection {
    pub fn new(name: &str, schema: CollectionSchema, id_column: &str, date_column: &str) -> Self {
        Self {
            collection: DataCollection::new(name, schema),
            id_column: id_column.to_string(),
            date_column: date_column.to_string(),
        }
    }

    pub fn inner(&self) -> &DataCollection {
        &self.collection
    }

    pub fn inner_mut(&mut self) -> &mut DataCollection {
        &mut self.collection
    }

    pub fn record_index(&self, record_id: &str) -> Option<usize> {
        self.collection
            .rows(RowFilter::All)
            .find(|(_, row)| row.get(&self.id_column).as_str() == Some(record_id))
            .map(|(index, _)| index)
    }

    pub fn row_ids(&self, filter: RowFilter) -> Vec<String> {
        self.collection
            .rows(filter)
            .filter_map(|(_, row)| row.get(&self.id_column).as_str().map(str::to_string))
            .collect()
    }

    /// Append records, de-duplicating on record ID. Rows whose ID already
    /// exists overwrite the stored row in place and are tagged as edits; a
    /// pending deletion on the stored row is cleared. Only genuinely new
    /// IDs become new rows. Returns the IDs that were appended as new.
    pub fn append(&mut self, add_rows: Vec<RowValues>, new: bool) -> Vec<String> {
        let mut fresh = Vec::new();
        let mut appended_ids = Vec::new();
        for raw in add_rows {
            let values = self.collection.conform(&raw);
            let id = values
                .get(&self.id_column)
                .and_then(Value::as_str)
                .map(str::to_string);
            let existing = id.as_deref().and_then(|id| self.record_index(id));
            match existing {
                Some(index) => {
                    log::debug!(
                        "RecordCollection {}: record {id:?} already exists - treating as a \
                         modification",
                        self.collection.name
                    );
                    self.overwrite(index, &values);
                }
                None => {
                    if let Some(id) = id {
                        appended_ids.push(id);
                    }
                    fresh.push(values);
                }
            }
        }
        if !fresh.is_empty() {
            self.collection.append(fresh, new);
        }
        appended_ids
    }

    fn overwrite(&mut self, index: usize, values: &RowValues) {
        self.collection.restore(&[index]);
        let fields: Vec<(String, Value)> = values
            .iter()
            .filter(|(field, _)| *field != &self.id_column)
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        for (field, value) in fields {
            let _ = self
                .collection
                .update_field(&field, std::slice::from_ref(&value), Some(&[index]));
        }
        if let Some(row) = self.collection.rows_mut().get_mut(index) {
            row.state.mark_edited();
        }
    }

    /// Soft-delete records by ID. Unknown IDs are skipped.
    pub fn delete_ids(&mut self, record_ids: &[String]) {
        let indices: Vec<usize> = record_ids
            .iter()
            .filter_map(|id| self.record_index(id))
            .collect();
        self.collection.delete(&indices);
    }

    pub fn restore_ids(&mut self, record_ids: &[String]) {
        let indices: Vec<usize> = record_ids
            .iter()
            .filter_map(|id| self.record_index(id))
            .collect();
        self.collection.restore(&indices);
    }

    pub fn data(&self, filter: RowFilter) -> Vec<RowValues> {
        self.collection.data(filter)
    }

    pub fn state_of(&self, record_id: &str) -> Option<RowState> {
        self.record_index(record_id)
            .and_then(|index| self.collection.state(index))
    }

    pub fn commit(&mut self) {
        self.collection.commit();
    }

    /// Export the collection's rows as association stubs linking a parent
    /// record to each row. Rows created and deleted in the same session
    /// produce nothing.
    pub fn as_reference(
        &self,
        parent_id: &str,
        parent_type: &str,
        record_type: &str,
        is_child: bool,
    ) -> Vec<Reference> {
        self.collection
            .rows(RowFilter::All)
            .filter(|(_, row)| !row.state.invisible_to_persistence())
            .filter_map(|(_, row)| {
                let id = row.get(&self.id_column).as_str()?;
                let mut reference = Reference::new(parent_id, id, parent_type, record_type);
                reference.reference_date = row.get(&self.date_column).as_date();
                reference.is_child = is_child;
                reference.is_deleted = row.state.is_deleted();
                Some(reference)
            })
            .collect()
    }
}

/// One association row linking a pair of records. Symmetric in storage but
/// directional in meaning: `record_id` is the owning side as loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub record_id: String,
    pub reference_id: String,
    pub record_type: String,
    pub reference_type: String,
    pub reference_date: Option<NaiveDateTime>,
    pub is_child: bool,
    pub is_hard_link: bool,
    pub is_approved: bool,
    pub is_deleted: bool,
    pub notes: String,
    pub warnings: String,
}

impl Reference {
    pub fn new(record_id: &str, reference_id: &str, record_type: &str, reference_type: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            reference_id: reference_id.to_string(),
            record_type: record_type.to_string(),
            reference_type: reference_type.to_string(),
            reference_date: None,
            is_child: false,
            is_hard_link: false,
            is_approved: false,
            is_deleted: false,
            notes: String::new(),
            warnings: String::new(),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (self.record_id.as_str(), self.reference_id.as_str())
    }

    /// The same association viewed from the other side of the relationship.
    pub fn swapped(&self) -> Reference {
        let mut swapped = self.clone();
        std::mem::swap(&mut swapped.record_id, &mut swapped.reference_id);
        std::mem::swap(&mut swapped.record_type, &mut swapped.reference_type);
        swapped
    }
}

#[derive(Debug, Clone)]
struct RefRow {
    state: RowState,
    reference: Reference,
}

/// Tabular container of association rows, keyed by the composite
/// (record ID, reference ID) pair.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCollection {
    rows: Vec<RefRow>,
}

impl ReferenceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, record_id: &str, reference_id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.reference.key() == (record_id, reference_id))
    }

    /// Composite-key lookup.
    pub fn get(&self, record_id: &str, reference_id: &str) -> Option<(&Reference, RowState)> {
        self.position(record_id, reference_id)
            .map(|i| (&self.rows[i].reference, self.rows[i].state))
    }

    /// Append association rows, de-duplicating on the composite key. An
    /// existing pair is overwritten in place, tagged as an edit, and any
    /// pending deletion on it is cleared.
    pub fn append(&mut self, references: Vec<Reference>, new: bool) {
        for reference in references {
            match self.position(&reference.record_id, &reference.reference_id) {
                Some(index) => {
                    let row = &mut self.rows[index];
                    row.state.restore();
                    if row.reference != reference {
                        row.state.mark_edited();
                    }
                    row.reference = reference;
                }
                None => {
                    let state = if new { RowState::Added } else { RowState::Unchanged };
                    self.rows.push(RefRow { state, reference });
                }
            }
        }
    }

    /// Soft-delete associations by composite key. The persisted delete
    /// flag is set alongside the row state so that exports carry it.
    pub fn delete(&mut self, keys: &[(String, String)]) {
        for (record_id, reference_id) in keys {
            if let Some(index) = self.position(record_id, reference_id) {
                let row = &mut self.rows[index];
                row.state.mark_deleted();
                row.reference.is_deleted = true;
            }
        }
    }

    /// Soft-delete every association attached to a record ID on either side.
    pub fn delete_for_record(&mut self, record_id: &str) {
        for row in &mut self.rows {
            if row.reference.record_id == record_id || row.reference.reference_id == record_id {
                row.state.mark_deleted();
                row.reference.is_deleted = true;
            }
        }
    }

    pub fn restore(&mut self, keys: &[(String, String)]) {
        for (record_id, reference_id) in keys {
            if let Some(index) = self.position(record_id, reference_id) {
                let row = &mut self.rows[index];
                row.state.restore();
                row.reference.is_deleted = false;
            }
        }
    }

    pub fn iter(&self, filter: RowFilter) -> impl Iterator<Item = (&Reference, RowState)> {
        self.rows.iter().filter_map(move |row| {
            let visible = match filter {
                RowFilter::Current => !row.state.is_deleted(),
                RowFilter::All => true,
                RowFilter::Edited => {
                    (row.state.is_edited() || row.state.is_added()) && !row.state.is_deleted()
                }
                RowFilter::Added => row.state.is_added(),
                RowFilter::Deleted => row.state.is_deleted(),
            };
            visible.then_some((&row.reference, row.state))
        })
    }

    /// Rows for display. With `reference` set, each association is shown
    /// from the other side of the relationship, with the record and
    /// reference pairs swapped.
    pub fn display_rows(&self, reference: bool) -> Vec<Reference> {
        self.iter(RowFilter::Current)
            .map(|(r, _)| if reference { r.swapped() } else { r.clone() })
            .collect()
    }

    /// Collapse change tracking after a successful save.
    pub fn commit(&mut self) {
        self.rows.retain(|row| !row.state.is_deleted());
        for row in &mut self.rows {
            row.state = RowState::Unchanged;
        }
    }

    /// Associations whose counterpart record must be co-deleted with the
    /// owning record.
    pub fn cascade_targets(&self, record_id: &str) -> Vec<&Reference> {
        self.iter(RowFilter::All)
            .filter(|(r, state)| {
                !state.invisible_to_persistence()
                    && r.record_id == record_id
                    && (r.is_child || r.is_hard_link)
            })
            .map(|(r, _)| r)
            .collect()
    }
}
