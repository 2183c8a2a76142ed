use std::path::Path;

use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ReckonError, Result};

/// Reserved database column names. Configurable, with the conventional
/// defaults used by the reference and record tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedColumns {
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default = "default_delete_field")]
    pub delete_field: String,
    #[serde(default = "default_creator_name")]
    pub creator_name: String,
    #[serde(default = "default_creation_time")]
    pub creation_time: String,
    #[serde(default = "default_editor_name")]
    pub editor_name: String,
    #[serde(default = "default_edit_time")]
    pub edit_time: String,
}

fn default_id_field() -> String {
    "RecordID".to_string()
}

fn default_date_field() -> String {
    "RecordDate".to_string()
}

fn default_delete_field() -> String {
    "Deleted".to_string()
}

fn default_creator_name() -> String {
    "CreatorName".to_string()
}

fn default_creation_time() -> String {
    "CreationTime".to_string()
}

fn default_editor_name() -> String {
    "EditorName".to_string()
}

fn default_edit_time() -> String {
    "EditTime".to_string()
}

impl Default for ReservedColumns {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            date_field: default_date_field(),
            delete_field: default_delete_field(),
            creator_name: default_creator_name(),
            creation_time: default_creation_time(),
            editor_name: default_editor_name(),
            edit_time: default_edit_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub user_name: String,
    /// Calendar-year offset applied to record dates before the YYMM date
    /// component of a new record ID is formatted.
    #[serde(default)]
    pub date_offset: i32,
    #[serde(default = "default_display_date_format")]
    pub display_date_format: String,
    #[serde(default)]
    pub columns: ReservedColumns,
}

fn default_display_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            date_offset: 0,
            display_date_format: default_display_date_format(),
            columns: ReservedColumns::default(),
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| ReckonError::Config(e.to_string()))
}

/// Per-process session state, constructed once and passed by reference to
/// every component that needs identity, localization, or column naming.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: String,
    pub instance_id: u32,
    pub date_offset: i32,
    pub display_date_format: String,
    pub columns: ReservedColumns,
}

impl SessionContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            user: settings.user_name,
            instance_id: rand::thread_rng().gen(),
            date_offset: settings.date_offset,
            display_date_format: settings.display_date_format,
            columns: settings.columns,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    /// Render a date for display using the configured format.
    pub fn format_date(&self, date: NaiveDateTime) -> String {
        date.format(&self.display_date_format).to_string()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
