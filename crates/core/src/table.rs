//! Table conversion: column specs and a converter that renders objects or
//! lists into rows.
//!
//! This module provides:
//! - Column kinds (namespace, name, age, spec fields addressed by JSON pointer)
//! - The default column set per scope
//! - A converter every store can delegate `convert_to_table` to

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::object::{Resource, ResourceList};
use crate::options::TableOptions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Namespace,
    Name,
    Age,
    /// JSON pointer into `spec`, e.g. `/title`.
    Field(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub label: String,
}

fn col(kind: ColumnKind, label: &str) -> ColumnSpec {
    ColumnSpec { kind, label: label.to_string() }
}

/// Namespace (when namespaced), Name and Age.
pub fn default_columns(namespaced: bool) -> Vec<ColumnSpec> {
    let mut cols = Vec::with_capacity(3);
    if namespaced {
        cols.push(col(ColumnKind::Namespace, "Namespace"));
    }
    cols.push(col(ColumnKind::Name, "Name"));
    cols.push(col(ColumnKind::Age, "Age"));
    cols
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub column_definitions: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum TableInput<'a> {
    Object(&'a Resource),
    List(&'a ResourceList),
}

/// Renders objects into a [`Table`] using a fixed column set.
#[derive(Debug, Clone)]
pub struct TableConverter {
    columns: Vec<ColumnSpec>,
}

impl TableConverter {
    pub fn new(namespaced: bool) -> Self {
        Self { columns: default_columns(namespaced) }
    }

    /// Append a spec-field column after the defaults.
    pub fn with_field(mut self, label: &str, pointer: &str) -> Self {
        self.columns.push(col(ColumnKind::Field(pointer.to_string()), label));
        self
    }

    pub fn columns(&self) -> &[ColumnSpec] { &self.columns }

    pub fn convert(&self, input: TableInput<'_>, opts: &TableOptions) -> Table {
        self.convert_at(input, opts, Utc::now())
    }

    pub fn convert_at(&self, input: TableInput<'_>, opts: &TableOptions, now: DateTime<Utc>) -> Table {
        let column_definitions = if opts.no_headers {
            Vec::new()
        } else {
            self.columns
                .iter()
                .map(|c| TableColumn {
                    name: c.label.clone(),
                    type_: "string".to_string(),
                    format: if c.kind == ColumnKind::Name { "name".to_string() } else { String::new() },
                })
                .collect()
        };
        let (items, resource_version, continue_token): (Vec<&Resource>, String, Option<String>) = match input {
            TableInput::Object(o) => (vec![o], o.resource_version().to_string(), None),
            TableInput::List(l) => (l.items.iter().collect(), l.resource_version.clone(), l.continue_token.clone()),
        };
        let rows = items
            .into_iter()
            .map(|o| TableRow {
                cells: self.columns.iter().map(|c| cell(c, o, now)).collect(),
                object: if opts.include_object { Some(o.clone()) } else { None },
            })
            .collect();
        Table { column_definitions, rows, resource_version, continue_token }
    }
}

fn cell(c: &ColumnSpec, o: &Resource, now: DateTime<Utc>) -> Json {
    match &c.kind {
        ColumnKind::Namespace => Json::String(o.namespace().unwrap_or("").to_string()),
        ColumnKind::Name => Json::String(o.name().to_string()),
        ColumnKind::Age => Json::String(
            o.metadata.creation_timestamp.map(|t| human_age(now, t)).unwrap_or_else(|| "<unknown>".to_string()),
        ),
        ColumnKind::Field(ptr) => o.spec.pointer(ptr).cloned().unwrap_or(Json::Null),
    }
}

/// kubectl-style age: largest unit only (`45s`, `12m`, `3h`, `9d`).
pub fn human_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}
