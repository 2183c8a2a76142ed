use std::path::Path;

use indexmap::IndexMap;

use crate::collection::{DataCollection, RowValues};
use crate::error::Result;
use crate::value::{DataType, Value};

/// Outcome of a flat-file intake run.
#[derive(Debug, Clone, Copy)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
}

/// Strip currency decoration before a money cell is parsed: `$`, quotes,
/// thousands separators, and parenthesized negatives.
pub fn clean_amount(raw: &str) -> String {
    let s = raw.replace(['"', '$', ','], "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return format!("-{}", inner.trim());
    }
    s.to_string()
}

/// Import a CSV file into a collection.
///
/// `header_map` maps CSV header cells to collection field names; when
/// empty, headers are matched against the field names directly. Statement
/// files often carry preamble lines before the real header, so the first
/// record containing every mapped header is taken as the header row and
/// everything above it is ignored. Cells that fail to parse for their
/// column type are logged and imported as NA. Returns how many rows the
/// collection accepted and how many it dropped.
pub fn import_csv(
    file_path: &Path,
    collection: &mut DataCollection,
    header_map: &IndexMap<String, String>,
    new: bool,
) -> Result<ImportOutcome> {
    let effective: IndexMap<String, String> = if header_map.is_empty() {
        collection
            .schema()
            .fields()
            .map(|f| (f.to_string(), f.to_string()))
            .collect()
    } else {
        header_map.clone()
    };

    let file = std::fs::File::open(file_path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));

    let mut positions: Option<Vec<(usize, String, DataType)>> = None;
    let mut rows: Vec<RowValues> = Vec::new();
    for result in reader.records() {
        let record = result?;
        match &positions {
            None => {
                let cells: Vec<&str> = record.iter().map(str::trim).collect();
                let mapped: Vec<(usize, String, DataType)> = effective
                    .iter()
                    .filter_map(|(header, field)| {
                        let index = cells.iter().position(|c| *c == header)?;
                        let dtype = collection.schema().dtype(field)?;
                        Some((index, field.clone(), dtype))
                    })
                    .collect();
                if mapped.len() == effective.len() && !mapped.is_empty() {
                    positions = Some(mapped);
                }
            }
            Some(mapped) => {
                if record.iter().all(|c| c.trim().is_empty()) {
                    continue;
                }
                let mut values = RowValues::new();
                for (index, field, dtype) in mapped {
                    let raw = record.get(*index).unwrap_or("");
                    let cleaned = match dtype {
                        DataType::Money => clean_amount(raw),
                        _ => raw.trim().to_string(),
                    };
                    let value = match Value::parse(&cleaned, *dtype) {
                        Ok(v) => v,
                        Err(e) => {
                            log::warn!(
                                "import of {}: field \"{field}\" - {e}",
                                file_path.display()
                            );
                            Value::Null
                        }
                    };
                    values.insert(field.clone(), value);
                }
                rows.push(values);
            }
        }
    }

    if positions.is_none() {
        log::warn!(
            "import of {}: no header row matched the configured columns",
            file_path.display()
        );
        return Ok(ImportOutcome {
            imported: 0,
            skipped: 0,
        });
    }

    let total = rows.len();
    let imported = collection.append(rows, new);
    log::info!(
        "import of {}: accepted {imported} of {total} rows",
        file_path.display()
    );
    Ok(ImportOutcome {
        imported,
        skipped: total - imported,
    })
}
