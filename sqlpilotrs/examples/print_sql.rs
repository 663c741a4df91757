use std::{env, sync::Arc};

use sqlpilot::config::SqlPilotConfig;
use sqlpilot::schema::SchemaDescriptor;
use sqlpilot::sql_format::format_sql;
use sqlpilot::AliasRewriter;

fn usage() {
    eprintln!("Usage: print_sql <schema_yaml> <sql>");
    eprintln!(
        "Example: cargo run --example print_sql -- tests/fixtures/procurement.yaml \"SELECT VENDOR_NAME FROM DIL_SUPPLIERS_D\""
    );
}

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let schema_path = args.remove(0);
    let sql = args.join(" ");

    let config = SqlPilotConfig::load_default();
    let schema = SchemaDescriptor::load_path(&schema_path)?;
    let rewriter = AliasRewriter::from_config(Arc::new(schema), &config);

    let output = rewriter.rewrite(&sql)?;
    for (table, alias) in output.alias_map.iter() {
        eprintln!("{table} AS {alias}");
    }
    println!("{}", output.sql);
    println!();
    println!("{}", format_sql(&output.sql));
    Ok(())
}
