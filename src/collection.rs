use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{ReckonError, Result};
use crate::expr::Expr;
use crate::value::{DataType, Value};

/// Lifecycle tag carried by every collection row, tracking how the row has
/// diverged from its last saved snapshot.
///
/// `Deleted { was_added: true }` marks a row that was created and removed
/// within the same edit session: it never existed in the backing store and
/// no statement export path may emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Unchanged,
    Edited,
    Added,
    AddedEdited,
    Deleted { was_added: bool },
}

impl RowState {
    pub fn is_added(self) -> bool {
        matches!(
            self,
            RowState::Added | RowState::AddedEdited | RowState::Deleted { was_added: true }
        )
    }

    /// Deleting a row counts as an edit, matching the interactive model
    /// where deletion is a pending change until saved.
    pub fn is_edited(self) -> bool {
        matches!(
            self,
            RowState::Edited | RowState::AddedEdited | RowState::Deleted { .. }
        )
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, RowState::Deleted { .. })
    }

    /// True when the row must not appear in any insert, update, or delete
    /// statement.
    pub fn invisible_to_persistence(self) -> bool {
        matches!(self, RowState::Deleted { was_added: true })
    }

    pub fn mark_edited(&mut self) {
        *self = match *self {
            RowState::Unchanged => RowState::Edited,
            RowState::Added => RowState::AddedEdited,
            other => other,
        };
    }

    pub fn mark_deleted(&mut self) {
        *self = RowState::Deleted {
            was_added: self.is_added(),
        };
    }

    /// Reinstate a soft-deleted row, preserving its added/edited history.
    pub fn restore(&mut self) {
        if let RowState::Deleted { was_added } = *self {
            *self = if was_added {
                RowState::AddedEdited
            } else {
                RowState::Edited
            };
        }
    }
}

/// One row of a collection: a state tag plus field values keyed by field
/// name in schema order.
#[derive(Debug, Clone)]
pub struct Row {
    pub state: RowState,
    pub values: RowValues,
}

impl Row {
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&Value::Null)
    }
}

pub type RowValues = IndexMap<String, Value>;

/// How a column obtains a value when none is supplied.
#[derive(Debug, Clone)]
pub enum DefaultRule {
    /// Single expression: a literal, another column, or a computation.
    Expr(Expr),
    /// Conditional rule set: the value of the first passing condition wins.
    Conditional(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DataType,
    pub default: Option<DefaultRule>,
    /// Recomputed from other columns whenever row values change.
    pub dependant: Option<Expr>,
    pub unique: bool,
}

/// Serde form of a column definition; expression strings are compiled when
/// the schema is built.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub dtype: DataType,
    #[serde(default)]
    pub default: Option<DefaultConfig>,
    #[serde(default)]
    pub dependant: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DefaultConfig {
    Expr(String),
    Rules(Vec<WhenValue>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhenValue {
    pub when: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionSchema {
    columns: IndexMap<String, ColumnSpec>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, dtype: DataType) -> Self {
        self.columns.insert(
            name.to_string(),
            ColumnSpec {
                name: name.to_string(),
                dtype,
                default: None,
                dependant: None,
                unique: false,
            },
        );
        self
    }

    pub fn unique(mut self, name: &str) -> Self {
        if let Some(spec) = self.columns.get_mut(name) {
            spec.unique = true;
        }
        self
    }

    pub fn default_value(mut self, name: &str, value: Value) -> Self {
        if let Some(spec) = self.columns.get_mut(name) {
            spec.default = Some(DefaultRule::Expr(Expr::Literal(value)));
        }
        self
    }

    pub fn default_expr(mut self, name: &str, expr: &str) -> Result<Self> {
        let compiled = Expr::parse(expr)?;
        if let Some(spec) = self.columns.get_mut(name) {
            spec.default = Some(DefaultRule::Expr(compiled));
        }
        Ok(self)
    }

    pub fn default_rules(mut self, name: &str, rules: &[(&str, &str)]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (when, value) in rules {
            compiled.push((Expr::parse(when)?, Expr::parse(value)?));
        }
        if let Some(spec) = self.columns.get_mut(name) {
            spec.default = Some(DefaultRule::Conditional(compiled));
        }
        Ok(self)
    }

    pub fn dependant(mut self, name: &str, expr: &str) -> Result<Self> {
        let compiled = Expr::parse(expr)?;
        if let Some(spec) = self.columns.get_mut(name) {
            spec.dependant = Some(compiled);
        }
        Ok(self)
    }

    /// Compile a serde configuration map into a schema. Missing data types
    /// or malformed expressions are configuration errors.
    pub fn from_config(config: &IndexMap<String, ColumnConfig>) -> Result<Self> {
        let mut schema = CollectionSchema::new();
        for (name, column) in config {
            schema = schema.column(name, column.dtype);
            if column.unique {
                schema = schema.unique(name);
            }
            if let Some(default) = &column.default {
                schema = match default {
                    DefaultConfig::Expr(expr) => schema.default_expr(name, expr)?,
                    DefaultConfig::Rules(rules) => {
                        let pairs: Vec<(&str, &str)> = rules
                            .iter()
                            .map(|r| (r.when.as_str(), r.value.as_str()))
                            .collect();
                        schema.default_rules(name, &pairs)?
                    }
                };
            }
            if let Some(dep) = &column.dependant {
                schema = schema.dependant(name, dep)?;
            }
        }
        Ok(schema)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.get(name)
    }

    pub fn dtype(&self, name: &str) -> Option<DataType> {
        self.columns.get(name).map(|c| c.dtype)
    }

    fn specs(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.values()
    }
}

/// Row selection filter for the data accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    /// Everything except soft-deleted rows.
    Current,
    All,
    /// Rows that were added or edited since the last snapshot and are
    /// still current. A row whose only pending change is its deletion
    /// belongs to the deleted view, not this one.
    Edited,
    Added,
    Deleted,
}

impl RowFilter {
    fn matches(self, state: RowState) -> bool {
        match self {
            RowFilter::Current => !state.is_deleted(),
            RowFilter::All => true,
            RowFilter::Edited => (state.is_edited() || state.is_added()) && !state.is_deleted(),
            RowFilter::Added => state.is_added(),
            RowFilter::Deleted => state.is_deleted(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMethod {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Sum,
    Count,
    Distinct,
    Min,
    Max,
    Mean,
}

impl Statistic {
    fn numeric_only(self) -> bool {
        matches!(self, Statistic::Sum | Statistic::Mean)
    }
}

/// In-memory tabular container with typed columns, default-value rules,
/// dependant-column recomputation, and per-row change tracking.
#[derive(Debug, Clone)]
pub struct DataCollection {
    pub name: String,
    schema: CollectionSchema,
    rows: Vec<Row>,
}

impl DataCollection {
    pub fn new(name: &str, schema: CollectionSchema) -> Self {
        Self {
            name: name.to_string(),
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn state(&self, index: usize) -> Option<RowState> {
        self.rows.get(index).map(|r| r.state)
    }

    /// Iterate rows matching the filter, with their real indices.
    pub fn rows(&self, filter: RowFilter) -> impl Iterator<Item = (usize, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .filter(move |(_, row)| filter.matches(row.state))
    }

    /// Copy out the field values of rows matching the filter, without the
    /// state tag.
    pub fn data(&self, filter: RowFilter) -> Vec<RowValues> {
        self.rows(filter).map(|(_, row)| row.values.clone()).collect()
    }

    /// Conform a set of incoming values to the schema: drop unknown
    /// columns, apply defaults to missing or NA cells, recompute dependant
    /// columns, and coerce every cell to its column type.
    pub fn conform(&self, values: &RowValues) -> RowValues {
        let mut out = RowValues::new();
        for spec in self.schema.specs() {
            let incoming = values.get(&spec.name).cloned().unwrap_or(Value::Null);
            out.insert(spec.name.clone(), incoming.coerce(spec.dtype));
        }
        self.apply_defaults(&mut out);
        self.apply_dependants(&mut out);
        for spec in self.schema.specs() {
            let v = out.get(&spec.name).cloned().unwrap_or(Value::Null);
            out.insert(spec.name.clone(), v.coerce(spec.dtype));
        }
        out
    }

    fn apply_defaults(&self, values: &mut RowValues) {
        for spec in self.schema.specs() {
            if !values.get(&spec.name).map_or(true, Value::is_null) {
                continue;
            }
            let Some(rule) = &spec.default else { continue };
            let lookup = |name: &str| values.get(name).cloned();
            let computed = match rule {
                DefaultRule::Expr(expr) => expr.evaluate(&lookup),
                DefaultRule::Conditional(rules) => {
                    let mut result = Ok(Value::Null);
                    for (when, value) in rules {
                        match when.evaluate_condition(&lookup) {
                            Ok(true) => {
                                result = value.evaluate(&lookup);
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => {
                                result = Err(e);
                                break;
                            }
                        }
                    }
                    result
                }
            };
            match computed {
                Ok(v) => {
                    values.insert(spec.name.clone(), v.coerce(spec.dtype));
                }
                Err(e) => {
                    log::warn!(
                        "DataCollection {}: failed to evaluate default for field \"{}\" - {e}",
                        self.name,
                        spec.name
                    );
                }
            }
        }
    }

    fn apply_dependants(&self, values: &mut RowValues) {
        for spec in self.schema.specs() {
            let Some(expr) = &spec.dependant else { continue };
            let lookup = |name: &str| values.get(name).cloned();
            match expr.evaluate(&lookup) {
                Ok(v) => {
                    values.insert(spec.name.clone(), v.coerce(spec.dtype));
                }
                Err(e) => {
                    log::warn!(
                        "DataCollection {}: failed to evaluate dependant field \"{}\" - {e}",
                        self.name,
                        spec.name
                    );
                }
            }
        }
    }

    fn violates_uniqueness(&self, values: &RowValues) -> bool {
        for spec in self.schema.specs().filter(|s| s.unique) {
            let candidate = values.get(&spec.name).cloned().unwrap_or(Value::Null);
            if candidate.is_null() {
                continue;
            }
            let clash = self
                .rows(RowFilter::Current)
                .any(|(_, row)| *row.get(&spec.name) == candidate);
            if clash {
                log::warn!(
                    "DataCollection {}: dropping row - value {candidate:?} already exists in \
                     unique field \"{}\"",
                    self.name,
                    spec.name
                );
                return true;
            }
        }
        false
    }

    /// Append rows to the collection. Rows violating a uniqueness
    /// constraint against existing rows are dropped. Returns the number of
    /// rows actually appended.
    pub fn append(&mut self, add_rows: Vec<RowValues>, new: bool) -> usize {
        let mut appended = 0;
        for raw in add_rows {
            let values = self.conform(&raw);
            if self.violates_uniqueness(&values) {
                continue;
            }
            let state = if new { RowState::Added } else { RowState::Unchanged };
            self.rows.push(Row { state, values });
            appended += 1;
        }
        log::debug!(
            "DataCollection {}: appended {appended} entries to the collection",
            self.name
        );
        appended
    }

    /// Soft-delete rows at the given real indices. Rows are never
    /// physically removed, so prior state is recoverable and persisted
    /// deletions can be exported later.
    pub fn delete(&mut self, indices: &[usize]) {
        log::info!(
            "DataCollection {}: deleting entries at indices {indices:?}",
            self.name
        );
        for &index in indices {
            if let Some(row) = self.rows.get_mut(index) {
                row.state.mark_deleted();
            }
        }
    }

    /// Reinstate soft-deleted rows at the given indices.
    pub fn restore(&mut self, indices: &[usize]) {
        for &index in indices {
            if let Some(row) = self.rows.get_mut(index) {
                row.state.restore();
            }
        }
    }

    /// Update one field across the given rows (all rows when `indices` is
    /// None). Values are broadcast when a single value is supplied. Rows
    /// are marked edited only when the stored value actually changes.
    pub fn update_field(
        &mut self,
        field: &str,
        values: &[Value],
        indices: Option<&[usize]>,
    ) -> Result<bool> {
        let dtype = self
            .schema
            .dtype(field)
            .ok_or_else(|| ReckonError::UnknownField(field.to_string()))?;

        let targets: Vec<usize> = match indices {
            Some(idx) => idx.to_vec(),
            None => (0..self.rows.len()).collect(),
        };
        if values.len() != targets.len() && values.len() != 1 {
            return Err(ReckonError::Other(format!(
                "DataCollection {}: the length of the update values must equal the number of \
                 indices to update",
                self.name
            )));
        }

        let mut edited = false;
        for (pos, &index) in targets.iter().enumerate() {
            let incoming = if values.len() == 1 { &values[0] } else { &values[pos] };
            let coerced = incoming.coerce(dtype);
            let row = self.rows.get_mut(index).ok_or_else(|| {
                ReckonError::Other(format!(
                    "DataCollection {}: no entry at index {index}",
                    self.name
                ))
            })?;
            let current = row.values.get(field).cloned().unwrap_or(Value::Null);
            if current != coerced {
                row.values.insert(field.to_string(), coerced);
                row.state.mark_edited();
                edited = true;
                let recomputed = {
                    let values_ref = &row.values;
                    self.schema
                        .specs()
                        .filter_map(|spec| {
                            let expr = spec.dependant.as_ref()?;
                            let lookup = |name: &str| values_ref.get(name).cloned();
                            match expr.evaluate(&lookup) {
                                Ok(v) => Some((spec.name.clone(), v.coerce(spec.dtype))),
                                Err(_) => None,
                            }
                        })
                        .collect::<Vec<_>>()
                };
                for (name, value) in recomputed {
                    row.values.insert(name, value);
                }
            }
        }
        Ok(edited)
    }

    /// Update several fields of one row. Only changed cells dirty the row.
    pub fn update_entry(&mut self, index: usize, values: &RowValues) -> Result<bool> {
        let mut edited = false;
        for (field, value) in values {
            if self.schema.dtype(field).is_none() {
                continue;
            }
            let changed =
                self.update_field(field, std::slice::from_ref(value), Some(&[index]))?;
            edited = edited || changed;
        }
        Ok(edited)
    }

    /// Forward- or back-fill NA values across the selected rows. A fill
    /// needs a neighbor to propagate from, so fewer than two selected rows
    /// is a logged no-op.
    pub fn fill(
        &mut self,
        indices: Option<&[usize]>,
        fields: Option<&[String]>,
        method: FillMethod,
    ) -> bool {
        let targets: Vec<usize> = match indices {
            Some(idx) => idx.to_vec(),
            None => (0..self.rows.len()).collect(),
        };
        if targets.len() <= 1 {
            log::warn!(
                "DataCollection {}: unable to fill values - too few rows selected for filling",
                self.name
            );
            return false;
        }

        let all_fields: Vec<String> = self.schema.fields().map(str::to_string).collect();
        let fields = fields.unwrap_or(&all_fields);

        let ordered: Vec<usize> = match method {
            FillMethod::Forward => targets.clone(),
            FillMethod::Backward => targets.iter().rev().copied().collect(),
        };

        let mut edited = false;
        for field in fields {
            if self.schema.dtype(field).is_none() {
                log::warn!(
                    "DataCollection {}: unable to fill field \"{field}\" - not in the schema",
                    self.name
                );
                continue;
            }
            let mut carry = Value::Null;
            for &index in &ordered {
                let Some(row) = self.rows.get_mut(index) else { continue };
                let current = row.values.get(field).cloned().unwrap_or(Value::Null);
                if current.is_null() {
                    if !carry.is_null() {
                        row.values.insert(field.clone(), carry.clone());
                        row.state.mark_edited();
                        edited = true;
                    }
                } else {
                    carry = current;
                }
            }
        }
        edited
    }

    /// Summarize a field over the current rows. Numeric fields default to
    /// sum; non-numeric fields default to distinct count. An explicit
    /// statistic that does not match the field's numeric class is ignored
    /// with a warning.
    pub fn summarize_field(&self, field: &str, statistic: Option<Statistic>) -> Value {
        let Some(dtype) = self.schema.dtype(field) else {
            log::error!(
                "DataCollection {}: unable to summarize field \"{field}\" - not found in the \
                 collection",
                self.name
            );
            return Value::Int(0);
        };

        let mut stat = statistic.unwrap_or(if dtype.is_numeric() {
            Statistic::Sum
        } else {
            Statistic::Distinct
        });
        if stat.numeric_only() && !dtype.is_numeric() {
            log::warn!(
                "DataCollection {}: statistic {stat:?} does not apply to non-numeric field \
                 \"{field}\" - using distinct count",
                self.name
            );
            stat = Statistic::Distinct;
        }

        let values: Vec<Value> = self
            .rows(RowFilter::Current)
            .map(|(_, row)| row.get(field).clone())
            .filter(|v| !v.is_null())
            .collect();
        if values.is_empty() {
            return Value::Int(0);
        }

        match stat {
            Statistic::Count => Value::Int(values.len() as i64),
            Statistic::Distinct => {
                let mut seen: Vec<String> = values.iter().map(Value::to_display_string).collect();
                seen.sort();
                seen.dedup();
                Value::Int(seen.len() as i64)
            }
            Statistic::Sum => {
                let total: f64 = values.iter().filter_map(Value::as_float).sum();
                Value::Float(total)
            }
            Statistic::Mean => {
                let nums: Vec<f64> = values.iter().filter_map(Value::as_float).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Statistic::Min | Statistic::Max => {
                let mut sorted = values;
                sorted.sort_by(|a, b| {
                    a.to_display_string()
                        .partial_cmp(&b.to_display_string())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                if dtype.is_numeric() {
                    let mut nums: Vec<f64> =
                        sorted.iter().filter_map(Value::as_float).collect();
                    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let pick = if stat == Statistic::Min {
                        nums.first()
                    } else {
                        nums.last()
                    };
                    pick.map(|f| Value::Float(*f)).unwrap_or(Value::Null)
                } else if stat == Statistic::Min {
                    sorted.into_iter().next().unwrap_or(Value::Null)
                } else {
                    sorted.into_iter().last().unwrap_or(Value::Null)
                }
            }
        }
    }

    /// Sort rows on the given fields. State tags travel with their rows.
    pub fn sort(&mut self, fields: &[String], ascending: bool) {
        let known: Vec<&String> = fields
            .iter()
            .filter(|f| {
                let ok = self.schema.dtype(f).is_some();
                if !ok {
                    log::warn!(
                        "DataCollection {}: sort field \"{f}\" not found in the header",
                        self.name
                    );
                }
                ok
            })
            .collect();
        if known.is_empty() {
            return;
        }
        self.rows.sort_by(|a, b| {
            for field in &known {
                let left = a.get(field).to_display_string();
                let right = b.get(field).to_display_string();
                let ord = left.cmp(&right);
                if ord != std::cmp::Ordering::Equal {
                    return if ascending { ord } else { ord.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    /// Drop all rows, returning the collection to its initial state.
    pub fn reset(&mut self) {
        self.rows.clear();
    }

    /// Collapse change tracking after a successful save: deleted rows are
    /// dropped and the remaining rows become the new snapshot.
    pub fn commit(&mut self) {
        self.rows.retain(|row| !row.state.is_deleted());
        for row in &mut self.rows {
            row.state = RowState::Unchanged;
        }
    }

    /// Format current rows for tabular display.
    pub fn format_display(&self) -> Vec<Vec<String>> {
        self.rows(RowFilter::Current)
            .map(|(_, row)| {
                self.schema
                    .specs()
                    .map(|spec| row.get(&spec.name).format_display(spec.dtype))
                    .collect()
            })
            .collect()
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }
}
