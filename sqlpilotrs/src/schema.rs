//! Schema descriptor loading and the digest handed to generation prompts.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlPilotError};

/// Digest used when the schema source does not exist.
pub const NO_SCHEMA_PLACEHOLDER: &str =
    "No schema loaded. Please check the configured schema path.";
/// Digest used when the schema source exists but cannot be parsed.
pub const SCHEMA_ERROR_PLACEHOLDER: &str = "Error loading schema. Check YAML format.";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchemaDescriptor {
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TableDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<FieldDescriptor>,
    #[serde(default)]
    pub facts: Vec<FieldDescriptor>,
    #[serde(default)]
    pub time_dimensions: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FieldDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    Dimension,
    Fact,
    TimeDimension,
}

impl TableDescriptor {
    /// All named fields with the group they were declared in.
    pub fn fields(&self) -> impl Iterator<Item = (FieldGroup, &FieldDescriptor)> {
        let dims = self.dimensions.iter().map(|f| (FieldGroup::Dimension, f));
        let facts = self.facts.iter().map(|f| (FieldGroup::Fact, f));
        let times = self
            .time_dimensions
            .iter()
            .map(|f| (FieldGroup::TimeDimension, f));
        dims.chain(facts)
            .chain(times)
            .filter(|(_, f)| !f.name.trim().is_empty())
    }

    pub fn field(&self, column: &str) -> Option<(FieldGroup, &FieldDescriptor)> {
        self.fields()
            .find(|(_, f)| f.name.eq_ignore_ascii_case(column))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.field(column).is_some()
    }

    /// Column names plus synonyms, deduplicated and sorted.
    fn keywords(&self) -> BTreeSet<&str> {
        let mut keywords = BTreeSet::new();
        for (_, field) in self.fields() {
            keywords.insert(field.name.as_str());
            for synonym in &field.synonyms {
                if !synonym.trim().is_empty() {
                    keywords.insert(synonym.as_str());
                }
            }
        }
        keywords
    }
}

impl SchemaDescriptor {
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let schema: SchemaDescriptor = serde_yaml::from_str(contents)?;
        schema.check_unique_tables()?;
        Ok(schema)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Load a single YAML file, or merge every `*.yml`/`*.yaml` file of a directory.
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Self::from_file(path);
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for pattern in ["*.yml", "*.yaml"] {
            let entries = glob(&format!("{}/{pattern}", path.display()))
                .map_err(|e| SqlPilotError::Other(e.into()))?;
            files.extend(entries.flatten());
        }
        files.sort();

        let mut merged = SchemaDescriptor::default();
        for file in files {
            let contents = fs::read_to_string(&file)?;
            let part: SchemaDescriptor = serde_yaml::from_str(&contents)?;
            merged.tables.extend(part.tables);
        }
        merged.check_unique_tables()?;
        Ok(merged)
    }

    fn check_unique_tables(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.to_ascii_uppercase()) {
                return Err(SqlPilotError::Schema(format!(
                    "duplicate table {} in schema descriptor",
                    table.name
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn field(&self, table: &str, column: &str) -> Option<(FieldGroup, &FieldDescriptor)> {
        self.table(table).and_then(|t| t.field(column))
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.field(table, column).is_some()
    }

    /// One line per table listing columns and synonyms. Tables without
    /// fields are left out.
    pub fn digest(&self) -> String {
        self.tables
            .iter()
            .filter(|t| !t.name.trim().is_empty())
            .filter_map(|t| {
                let keywords = t.keywords();
                if keywords.is_empty() {
                    return None;
                }
                let columns: Vec<&str> = keywords.into_iter().collect();
                Some(format!("- {} (Columns: {})", t.name, columns.join(", ")))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A loaded schema together with its prompt digest.
#[derive(Debug, Clone)]
pub struct SchemaDigest {
    pub descriptor: SchemaDescriptor,
    pub text: String,
}

impl SchemaDigest {
    pub fn from_descriptor(descriptor: SchemaDescriptor) -> Self {
        let text = descriptor.digest();
        Self { descriptor, text }
    }

    /// Load the schema, degrading to a placeholder digest on failure so the
    /// rest of the assistant can still start.
    pub fn load_or_placeholder<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::error!(path = %path.display(), "schema source not found");
            return Self::placeholder(NO_SCHEMA_PLACEHOLDER);
        }
        match SchemaDescriptor::load_path(path) {
            Ok(descriptor) => {
                tracing::info!(
                    path = %path.display(),
                    tables = descriptor.tables.len(),
                    "loaded schema descriptor"
                );
                Self::from_descriptor(descriptor)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load schema");
                Self::placeholder(SCHEMA_ERROR_PLACEHOLDER)
            }
        }
    }

    fn placeholder(text: &str) -> Self {
        Self {
            descriptor: SchemaDescriptor::default(),
            text: text.to_string(),
        }
    }
}
