//! BigQuery dialect implementation.

use super::Dialect;

/// BigQuery Standard SQL bound to one project and dataset.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BigQueryDialect {
    project: String,
    dataset: String,
}

impl BigQueryDialect {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }
}

impl Dialect for BigQueryDialect {
    fn quote_ident(&self, ident: &str) -> String {
        // BigQuery uses backticks for identifiers
        format!("`{}`", ident.replace('`', "\\`"))
    }

    fn qualify_table(&self, table: &str) -> String {
        // Backticks around the whole path, as the console writes it
        self.quote_ident(&format!("{}.{}.{}", self.project, self.dataset, table))
    }

    fn float_type(&self) -> &'static str {
        "FLOAT64"
    }

    fn int_type(&self) -> &'static str {
        "INT64"
    }
}
