//! SQL dialect abstractions.
//!
//! The rewriter and the pattern fixer only need a handful of fragments from
//! the target warehouse: identifier quoting, fully qualified table paths,
//! casts, and the case-folding function used for text comparisons.

mod bigquery;

pub use bigquery::BigQueryDialect;

/// Dialects render identifiers and primitive expression pieces.
pub trait Dialect {
    fn quote_ident(&self, ident: &str) -> String;
    fn qualify_table(&self, table: &str) -> String {
        self.quote_ident(table)
    }
    fn cast(&self, expr: &str, ty: &str) -> String {
        format!("CAST({expr} AS {ty})")
    }
    /// Function used to make text comparisons case-insensitive.
    fn case_fold_function(&self) -> &'static str {
        "UPPER"
    }
    fn float_type(&self) -> &'static str;
    fn int_type(&self) -> &'static str;
}
