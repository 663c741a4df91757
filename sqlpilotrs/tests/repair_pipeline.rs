//! Database turns end to end with a scripted model and warehouse.

mod support;

use std::sync::Arc;

use serde_json::json;

use sqlpilot::chart::ChartKind;
use sqlpilot::pipeline::{DECLINED_TEXT, EMPTY_TEXT};
use sqlpilot::repair::{AttemptOutcome, REPHRASE_SUGGESTION};
use sqlpilot::{
    build_assistant, AnswerOutcome, AnswerSource, ConversationState, QueryResult, RepairStrategy,
    SqlAssistant, SqlPilotError,
};

use support::{config, digest, table, warehouse_error, ScriptedModel, ScriptedWarehouse};

const SUM_ERROR: &str = "No matching signature for aggregate function SUM for argument types: STRING. \
                         Supported signatures: SUM(INT64); SUM(FLOAT64) at [1:8]";

fn assistant(model: &Arc<ScriptedModel>, warehouse: &Arc<ScriptedWarehouse>) -> SqlAssistant {
    SqlAssistant::new(model.clone(), warehouse.clone(), digest(), &config())
}

fn scalar(value: f64) -> QueryResult {
    table(&[("f0_", "FLOAT64")], vec![json!({ "f0_": value })])
}

#[tokio::test]
async fn string_sum_failure_is_pattern_fixed() {
    let model = ScriptedModel::replying(&["SELECT SUM(AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F`"]);
    let warehouse = ScriptedWarehouse::new(vec![warehouse_error(SUM_ERROR), Ok(scalar(1234.5))]);

    let answer = assistant(&model, &warehouse)
        .answer("What is the total order amount?")
        .await;

    assert_eq!(answer.outcome, AnswerOutcome::Answered);
    assert_eq!(answer.text, "The total order amount is: **1234.5** (auto-fixed)");
    assert_eq!(
        warehouse.executed(),
        vec![
            "SELECT SUM(pc.AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F` pc".to_string(),
            "SELECT SUM(CAST(pc.AMOUNT_ORDERED AS FLOAT64)) FROM `proj.ds.DIL_PURCH_COST_F` pc".to_string(),
        ]
    );
    assert_eq!(answer.trace.len(), 1);
    assert_eq!(answer.trace[0].strategy, RepairStrategy::PatternFix);
    assert_eq!(answer.trace[0].outcome, AttemptOutcome::Success { rows: 1 });
    assert_eq!(model.prompts().len(), 1);
    assert_eq!(
        answer.sql_display.as_deref(),
        Some("SELECT SUM(CAST(pc.AMOUNT_ORDERED AS FLOAT64))\nFROM `proj.ds.DIL_PURCH_COST_F` pc")
    );
    let plot = answer.plot.unwrap();
    assert_eq!(plot.kind, ChartKind::Histogram);
    assert_eq!(plot.title, "What is the total order amount? (Auto-Fixed)");
}

#[tokio::test]
async fn untyped_failure_skips_pattern_fix_and_exhausts() {
    let model = ScriptedModel::replying(&[
        "SELECT SUM(AMOUNT) FROM `proj.ds.DIL_PURCH_COST_F`",
        "```sql\nSELECT SUM(AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F`\n```",
    ]);
    let warehouse = ScriptedWarehouse::new(vec![
        warehouse_error("Unrecognized name: AMOUNT at [1:12]"),
        warehouse_error("Access Denied: Table proj:ds.DIL_PURCH_COST_F"),
    ]);

    let answer = assistant(&model, &warehouse).answer("Total spend?").await;

    assert_eq!(answer.outcome, AnswerOutcome::Failed);
    assert_eq!(answer.trace.len(), 1);
    assert_eq!(answer.trace[0].strategy, RepairStrategy::ModelFix);
    assert_eq!(
        answer.text,
        format!(
            "An error occurred fetching data from the database: Unrecognized name: AMOUNT at [1:12]\n\
             All attempts to fix the query failed: Access Denied: Table proj:ds.DIL_PURCH_COST_F\n\
             {REPHRASE_SUGGESTION}"
        )
    );
    // The fenced model fix was stripped and rewritten before running.
    assert_eq!(
        warehouse.executed()[1],
        "SELECT SUM(pc.AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F` pc"
    );
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Broken SQL:\nSELECT SUM(pc.AMOUNT) FROM `proj.ds.DIL_PURCH_COST_F` pc"));
    assert!(prompts[1].contains("Error Message:\nUnrecognized name: AMOUNT at [1:12]"));
    assert!(answer.plot.is_none());
}

#[tokio::test]
async fn pattern_fix_without_changes_falls_through_to_model_fix() {
    let model = ScriptedModel::replying(&[
        "SELECT VENDOR_NAME FROM `proj.ds.DIL_SUPPLIERS_D` WHERE VENDOR_ID = 42",
        "SELECT VENDOR_NAME FROM `proj.ds.DIL_SUPPLIERS_D` WHERE VENDOR_ID = '42'",
    ]);
    let rows = table(
        &[("VENDOR_NAME", "STRING")],
        vec![json!({"VENDOR_NAME": "Acme"}), json!({"VENDOR_NAME": "Globex"})],
    );
    let warehouse = ScriptedWarehouse::new(vec![
        warehouse_error("No matching signature for function STARTS_WITH for argument types: STRING, INT64"),
        Ok(rows),
    ]);

    let answer = assistant(&model, &warehouse).answer("Supplier 42").await;

    assert_eq!(answer.outcome, AnswerOutcome::Answered);
    assert_eq!(answer.text, "Here are the results from the database (model-fixed):");
    assert_eq!(warehouse.executed().len(), 2);
    assert_eq!(
        warehouse.executed()[1],
        "SELECT sup.VENDOR_NAME FROM `proj.ds.DIL_SUPPLIERS_D` sup WHERE sup.VENDOR_ID = '42'"
    );
    let strategies: Vec<_> = answer.trace.iter().map(|a| (a.strategy, a.outcome.clone())).collect();
    assert_eq!(
        strategies,
        vec![
            (RepairStrategy::PatternFix, AttemptOutcome::NoChange),
            (RepairStrategy::ModelFix, AttemptOutcome::Success { rows: 2 }),
        ]
    );
    assert_eq!(answer.plot.map(|p| p.kind), Some(ChartKind::CountPlot));
}

#[tokio::test]
async fn no_answer_sentinel_short_circuits() {
    let model = ScriptedModel::replying(&["SORRY, this data is not available."]);
    let warehouse = ScriptedWarehouse::new(vec![]);

    let answer = assistant(&model, &warehouse).answer("What is the weather?").await;

    assert_eq!(answer.outcome, AnswerOutcome::Declined);
    assert_eq!(answer.text, DECLINED_TEXT);
    assert!(warehouse.executed().is_empty());
    assert!(answer.plot.is_none());
    assert!(answer.sql_display.is_none());
}

#[tokio::test]
async fn sentinel_after_a_fenced_query_still_declines() {
    let model = ScriptedModel::replying(&["```sql\nSELECT 1\n```\nSorry, this data is not available"]);
    let warehouse = ScriptedWarehouse::new(vec![]);

    let answer = assistant(&model, &warehouse).answer("What is the weather?").await;

    assert_eq!(answer.outcome, AnswerOutcome::Declined);
    assert_eq!(answer.text, DECLINED_TEXT);
    assert!(warehouse.executed().is_empty());
}

#[tokio::test]
async fn model_fix_after_pattern_fix_sees_the_original_query() {
    let model = ScriptedModel::replying(&[
        "SELECT SUM(AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F`",
        "SELECT SUM(SAFE_CAST(AMOUNT_ORDERED AS FLOAT64)) FROM `proj.ds.DIL_PURCH_COST_F`",
    ]);
    let warehouse = ScriptedWarehouse::new(vec![
        warehouse_error(SUM_ERROR),
        warehouse_error("Bad double value: 12,5"),
        Ok(scalar(99.5)),
    ]);

    let answer = assistant(&model, &warehouse).answer("What is the total order amount?").await;

    assert_eq!(answer.outcome, AnswerOutcome::Answered);
    assert_eq!(answer.text, "The total order amount is: **99.5** (model-fixed)");
    let strategies: Vec<_> = answer.trace.iter().map(|a| a.strategy).collect();
    assert_eq!(strategies, vec![RepairStrategy::PatternFix, RepairStrategy::ModelFix]);
    assert_eq!(
        warehouse.executed()[2],
        "SELECT SUM(SAFE_CAST(pc.AMOUNT_ORDERED AS FLOAT64)) FROM `proj.ds.DIL_PURCH_COST_F` pc"
    );
    let prompts = model.prompts();
    assert!(prompts[1].contains("Original SQL:\nSELECT SUM(pc.AMOUNT_ORDERED) FROM `proj.ds.DIL_PURCH_COST_F` pc"));
    assert!(prompts[1].contains("Original Error Message:\nNo matching signature for aggregate function SUM"));
    assert!(prompts[1].contains(
        "Broken SQL:\nSELECT SUM(CAST(pc.AMOUNT_ORDERED AS FLOAT64)) FROM `proj.ds.DIL_PURCH_COST_F` pc"
    ));
    assert!(prompts[1].contains("Error Message:\nBad double value: 12,5"));
}

#[tokio::test]
async fn empty_results_are_reported() {
    let model = ScriptedModel::replying(&["SELECT VENDOR_NAME FROM `proj.ds.DIL_SUPPLIERS_D` WHERE VENDOR_NAME = 'Nobody'"]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(QueryResult::default())]);

    let answer = assistant(&model, &warehouse).answer("Who is Nobody?").await;

    assert_eq!(answer.outcome, AnswerOutcome::Empty);
    assert_eq!(answer.text, EMPTY_TEXT);
    assert!(answer.trace.is_empty());
    assert!(warehouse.executed()[0].ends_with("WHERE UPPER(sup.VENDOR_NAME) = UPPER('Nobody')"));
}

#[tokio::test]
async fn model_errors_fail_the_turn() {
    let model = ScriptedModel::new(vec![Err(SqlPilotError::Model("quota exceeded".to_string()))]);
    let warehouse = ScriptedWarehouse::new(vec![]);

    let answer = assistant(&model, &warehouse).answer("Total spend?").await;
    assert_eq!(answer.outcome, AnswerOutcome::Failed);
    assert!(answer.text.ends_with("model error: quota exceeded"));
    assert!(warehouse.executed().is_empty());

    // A failing model-fix call exhausts the repair with the model's error.
    let model = ScriptedModel::new(vec![
        Ok("SELECT ORG_NAME FROM `proj.ds.DIL_ORG_D`".to_string()),
        Err(SqlPilotError::Model("quota exceeded".to_string())),
    ]);
    let warehouse = ScriptedWarehouse::new(vec![warehouse_error("Syntax error at [1:1]")]);
    let answer = assistant(&model, &warehouse).answer("Orgs").await;
    assert_eq!(answer.outcome, AnswerOutcome::Failed);
    assert!(answer.text.contains("All attempts to fix the query failed: model error: quota exceeded"));
    assert_eq!(warehouse.executed().len(), 1);
    assert!(matches!(answer.trace[0].outcome, AttemptOutcome::ModelError { .. }));
}

#[tokio::test]
async fn conversation_turn_combines_sources_and_keeps_last_result() {
    let model = ScriptedModel::replying(&[
        "SELECT VENDOR_NAME, SUM(QUANTITY_ORDERED) AS qty FROM `proj.ds.DIL_PURCH_COST_F` \
         JOIN `proj.ds.DIL_SUPPLIERS_D` ON DIL_PURCH_COST_F.VENDOR_ID = DIL_SUPPLIERS_D.VENDOR_ID \
         GROUP BY VENDOR_NAME",
    ]);
    let rows = table(
        &[("VENDOR_NAME", "STRING"), ("qty", "NUMERIC")],
        vec![json!({"VENDOR_NAME": "Acme", "qty": 3}), json!({"VENDOR_NAME": "Globex", "qty": 5})],
    );
    let warehouse = ScriptedWarehouse::new(vec![Ok(rows)]);
    let assistant = build_assistant(&config(), model.clone(), warehouse.clone(), None);

    let mut state = ConversationState::new();
    let turn = assistant.process_turn(&mut state, "Quantity by supplier").await;

    assert!(turn.text.starts_with("**Database Insights:**\nHere are the key insights from the database:"));
    assert!(turn
        .text
        .ends_with("**Document-Based Information:**\nSorry, the document knowledge base is not set up correctly."));
    assert_eq!(turn.sources, vec![AnswerSource::Database, AnswerSource::Document]);
    assert_eq!(turn.plot.as_ref().map(|c| c.kind), Some(ChartKind::Bar));
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.last_result.as_ref().map(|l| l.result.rows.len()), Some(2));
    assert!(turn.query_display.unwrap().contains("\nGROUP BY sup.VENDOR_NAME"));
}
