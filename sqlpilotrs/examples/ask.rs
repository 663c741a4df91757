//! Ask questions against BigQuery from the command line.
//!
//! Needs `GCP_PROJECT_ID`, `BQ_DATASET_ID`, application default credentials
//! and a Vertex AI access token in the variable named by `model.access_token_env`.

use std::{env, sync::Arc};

use sqlpilot::backends::bigquery::BigQueryConnection;
use sqlpilot::config::SqlPilotConfig;
use sqlpilot::llm::GeminiClient;
use sqlpilot::{build_assistant, ConversationState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let questions = env::args().skip(1).collect::<Vec<_>>();
    if questions.is_empty() {
        eprintln!("Usage: ask <question> [<question> ...]");
        std::process::exit(1);
    }

    let config = SqlPilotConfig::load_default();
    let connection = BigQueryConnection::from_application_default_credentials(
        &config.warehouse.project_id,
        &config.warehouse.dataset_id,
        config.bigquery.clone(),
    )
    .await?;
    let model = GeminiClient::from_config(&config)?;
    let assistant = build_assistant(&config, Arc::new(model), Arc::new(connection), None);

    let mut state = ConversationState::new();
    for question in questions {
        let turn = assistant.process_turn(&mut state, &question).await;
        println!("> {question}\n");
        println!("{}\n", turn.text);
        if let Some(sql) = &turn.query_display {
            println!("```sql\n{sql}\n```\n");
        }
        if let Some(chart) = &turn.plot {
            println!("{}\n", serde_json::to_string_pretty(chart)?);
        }
    }
    Ok(())
}
