//! Table alias assignment.
//!
//! Aliases come from a curated table of abbreviations for the known star
//! schema; anything else gets its lower-cased table name. The resulting
//! [`AliasMap`] never repeats an alias and never uses a reserved word.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;

/// Curated aliases for the procurement warehouse.
pub const CURATED_ALIASES: &[(&str, &str)] = &[
    ("DIL_SUPPLIERS_D", "sup"),
    ("DIL_PURCH_SCHEDULE_LINE_F", "psl"),
    ("DIL_PURCH_COST_F", "pc"),
    ("DIL_PURCHASE_ORDER_D", "po"),
    ("DIL_SUPPLIER_SITE_D", "site"),
    ("DIL_ITEMS_D", "itm"),
    ("DIL_CURRENCY_D", "cur"),
    ("DIL_ORG_D", "org"),
];

/// Words that must never be used as a bare alias.
pub static RESERVED_ALIASES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "select", "from", "where", "group", "order", "limit", "join", "union", "on", "inner",
        "outer", "as", "and", "or", "left", "right", "full", "by", "asc", "desc", "count", "sum",
        "avg", "min", "max",
    ]
    .into_iter()
    .collect()
});

const RESERVED_SUFFIX: &str = "_t";

/// Canonical table name -> alias, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    entries: Vec<(String, String)>,
}

impl AliasMap {
    pub fn get(&self, table: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table))
            .map(|(_, a)| a.as_str())
    }

    pub fn table_for_alias(&self, alias: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, a)| a.eq_ignore_ascii_case(alias))
            .map(|(t, _)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, a)| (t.as_str(), a.as_str()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, a)| a.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of preferred aliases plus the reserved-word guard.
#[derive(Debug, Clone)]
pub struct AliasCatalog {
    curated: BTreeMap<String, String>,
}

impl Default for AliasCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasCatalog {
    pub fn new() -> Self {
        let curated = CURATED_ALIASES
            .iter()
            .map(|(table, alias)| (table.to_ascii_uppercase(), alias.to_string()))
            .collect();
        Self { curated }
    }

    /// Merge extra curated aliases (e.g. from config) over the built-in table.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (table, alias) in overrides {
            self.curated
                .insert(table.to_ascii_uppercase(), alias.to_ascii_lowercase());
        }
        self
    }

    pub fn curated(&self) -> impl Iterator<Item = (&str, &str)> {
        self.curated.iter().map(|(t, a)| (t.as_str(), a.as_str()))
    }

    /// The alias a table would get in isolation.
    pub fn preferred(&self, table: &str) -> String {
        let alias = self
            .curated
            .get(&table.to_ascii_uppercase())
            .cloned()
            .unwrap_or_else(|| sanitize(table));
        if is_reserved(&alias) {
            format!("{alias}{RESERVED_SUFFIX}")
        } else {
            alias
        }
    }

    /// Assign one alias per distinct table (first spelling wins). `taken`
    /// holds names already in use in the query, such as CTE names.
    pub fn assign<'a, I>(&self, tables: I, taken: &HashSet<String>) -> AliasMap
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut used: HashSet<String> = taken.iter().map(|t| t.to_ascii_lowercase()).collect();
        let mut map = AliasMap::default();
        for table in tables {
            if map.get(table).is_some() {
                continue;
            }
            let preferred = self.preferred(table);
            let mut alias = preferred.clone();
            let mut suffix = 2;
            while used.contains(&alias) || is_reserved(&alias) {
                alias = format!("{preferred}{suffix}");
                suffix += 1;
            }
            if alias != preferred {
                tracing::debug!(table, preferred = %preferred, alias = %alias, "alias collision resolved");
            }
            used.insert(alias.clone());
            map.entries.push((table.to_string(), alias));
        }
        map
    }
}

pub fn is_reserved(alias: &str) -> bool {
    RESERVED_ALIASES.contains(alias.to_ascii_lowercase().as_str())
}

/// Lower-case and keep identifier characters only; aliases must start with a letter.
fn sanitize(table: &str) -> String {
    let mut alias: String = table
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase();
    if !alias.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        alias.insert(0, 't');
    }
    alias
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curated_aliases_take_priority() {
        let catalog = AliasCatalog::new();
        let map = catalog.assign(["DIL_PURCH_COST_F", "DIL_SUPPLIERS_D"], &HashSet::new());
        assert_eq!(map.get("DIL_PURCH_COST_F"), Some("pc"));
        assert_eq!(map.get("dil_suppliers_d"), Some("sup"));
        assert_eq!(map.table_for_alias("SUP"), Some("DIL_SUPPLIERS_D"));
    }

    #[test]
    fn fallback_is_lower_cased_name() {
        let map = AliasCatalog::new().assign(["DIL_APPROVAL_STATUS_D"], &HashSet::new());
        assert_eq!(map.get("DIL_APPROVAL_STATUS_D"), Some("dil_approval_status_d"));
    }

    #[test]
    fn reserved_words_get_suffix() {
        let catalog = AliasCatalog::new();
        assert_eq!(catalog.preferred("ORDER"), "order_t");
        assert_eq!(catalog.preferred("Sum"), "sum_t");
    }

    #[test]
    fn collisions_between_tables_are_resolved() {
        let mut overrides = BTreeMap::new();
        overrides.insert("DIL_PO_LINES_F".to_string(), "po".to_string());
        let catalog = AliasCatalog::new().with_overrides(&overrides);
        let map = catalog.assign(["DIL_PURCHASE_ORDER_D", "DIL_PO_LINES_F"], &HashSet::new());
        assert_eq!(map.get("DIL_PURCHASE_ORDER_D"), Some("po"));
        assert_eq!(map.get("DIL_PO_LINES_F"), Some("po2"));
    }

    #[test]
    fn taken_names_are_avoided() {
        let taken: HashSet<String> = ["SUP".to_string()].into_iter().collect();
        let map = AliasCatalog::new().assign(["DIL_SUPPLIERS_D"], &taken);
        assert_eq!(map.get("DIL_SUPPLIERS_D"), Some("sup2"));
    }

    #[test]
    fn repeated_tables_share_one_alias() {
        let map = AliasCatalog::new().assign(["DIL_ORG_D", "dil_org_d"], &HashSet::new());
        assert_eq!(map.len(), 1);
        assert_eq!(map.aliases().collect::<Vec<_>>(), vec!["org"]);
    }
}
