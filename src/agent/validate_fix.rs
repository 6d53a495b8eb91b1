use crate::agent::types::ValidateFixOutput;
use crate::agent::PLANNING_TEMPERATURE;
use crate::db::executor::QueryExecutor;
use crate::db::DbError;
use crate::llm::json::extract_json;
use crate::llm::prompts::{Prompts, FIX_SQL};
use crate::llm::LanguageModel;
use crate::schema::render::render_schema_markdown;
use crate::schema::SchemaSnapshot;
use minijinja::context;
use serde_json::{Map, Value};
use sqlformat::{FormatOptions, Indent, QueryParams};
use tracing::{debug, info, warn};

/// Default repair budget, counting the initial attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fields a repair response may carry the corrected statement in, by priority.
const CANDIDATE_FIELDS: [&str; 2] = ["validated_sql", "sql"];

/// Proves a draft executable, asking the model to repair it when it is not.
pub struct SqlValidator<'a> {
    executor: &'a QueryExecutor,
    llm: &'a dyn LanguageModel,
    prompts: &'a Prompts,
    validation_row_limit: usize,
}

impl<'a> SqlValidator<'a> {
    pub fn new(
        executor: &'a QueryExecutor,
        llm: &'a dyn LanguageModel,
        prompts: &'a Prompts,
        validation_row_limit: usize,
    ) -> Self {
        Self {
            executor,
            llm,
            prompts,
            validation_row_limit,
        }
    }

    /// Runs the draft through the safety gate, then repairs it sequentially
    /// until it passes or `max_attempts` is spent.
    pub async fn validate_fix(
        &self,
        sql_draft: &str,
        schema: &SchemaSnapshot,
        max_attempts: u32,
    ) -> ValidateFixOutput {
        let max_attempts = max_attempts.max(1);

        let mut last_error = match self.check(sql_draft).await {
            Ok(()) => {
                info!("Draft SQL passed validation on first attempt");
                return ValidateFixOutput {
                    validated_sql: Some(self.finalize(sql_draft).await),
                    attempts: 1,
                    last_error: None,
                };
            }
            Err(e) => e.to_string(),
        };
        warn!("Draft SQL failed validation: {}", last_error);

        let schema_text = render_schema_markdown(schema, true);
        let mut attempts = 1;
        let mut candidate = sql_draft.to_string();

        while attempts < max_attempts {
            attempts += 1;
            info!("Repair attempt {}/{}", attempts, max_attempts);

            if let Some(fixed) = self
                .request_repair(&candidate, &last_error, &schema_text, attempts)
                .await
            {
                candidate = fixed;
            }

            match self.check(&candidate).await {
                Ok(()) => {
                    info!("Repaired SQL passed validation on attempt {}", attempts);
                    return ValidateFixOutput {
                        validated_sql: Some(self.finalize(&candidate).await),
                        attempts,
                        last_error: None,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Attempt {} failed validation: {}", attempts, last_error);
                }
            }
        }

        warn!("Repair budget of {} attempts exhausted", max_attempts);
        ValidateFixOutput {
            validated_sql: None,
            attempts,
            last_error: Some(last_error),
        }
    }

    /// EXPLAIN first, then a bounded real execution.
    async fn check(&self, sql: &str) -> Result<(), DbError> {
        self.executor.explain(sql).await?;
        self.executor.run_select(sql, self.validation_row_limit).await?;
        Ok(())
    }

    /// The formatted statement when it still passes [`Self::check`],
    /// otherwise the statement exactly as validated.
    async fn finalize(&self, sql: &str) -> String {
        let pretty = pretty_sql(sql);
        if pretty == sql {
            return pretty;
        }
        match self.check(&pretty).await {
            Ok(()) => pretty,
            Err(e) => {
                warn!("Formatted SQL no longer validates, keeping original text: {}", e);
                sql.to_string()
            }
        }
    }

    /// Asks the model for a corrected statement. `None` keeps the previous candidate.
    async fn request_repair(
        &self,
        sql: &str,
        error: &str,
        schema_text: &str,
        attempts: u32,
    ) -> Option<String> {
        let prompt = match self.prompts.render(
            FIX_SQL,
            context! {
                sql => sql,
                error => error,
                schema_text => schema_text,
                attempts => attempts,
            },
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to render repair prompt: {}", e);
                return None;
            }
        };

        let raw = match self.llm.complete(&prompt, PLANNING_TEMPERATURE).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Repair request failed: {}", e);
                return None;
            }
        };
        debug!("Repair response: {}", raw);

        match extract_json(&raw) {
            Ok(obj) => pick_candidate(&obj),
            Err(e) => {
                warn!("Ignoring malformed repair response: {}", e);
                None
            }
        }
    }
}

fn pick_candidate(obj: &Map<String, Value>) -> Option<String> {
    CANDIDATE_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field).and_then(Value::as_str))
        .find(|sql| !sql.trim().is_empty())
        .map(str::to_string)
}

/// Reformats SQL for display: upper-case keywords, two-space indent.
pub fn pretty_sql(sql: &str) -> String {
    let options = FormatOptions {
        indent: Indent::Spaces(2),
        uppercase: true,
        ..FormatOptions::default()
    };
    let formatted = sqlformat::format(sql, &QueryParams::None, options);
    if formatted.trim().is_empty() {
        sql.to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{row, shop_snapshot, FakeBackend, ScriptedModel};
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        backend: Arc<FakeBackend>,
        executor: QueryExecutor,
        llm: ScriptedModel,
        prompts: Prompts,
    }

    impl Harness {
        fn new(backend: FakeBackend, responses: Vec<&str>) -> Self {
            let backend = Arc::new(backend);
            Self {
                executor: QueryExecutor::new(backend.clone()),
                backend,
                llm: ScriptedModel::new(responses),
                prompts: Prompts::new().unwrap(),
            }
        }

        async fn run(&self, draft: &str, max_attempts: u32) -> ValidateFixOutput {
            SqlValidator::new(&self.executor, &self.llm, &self.prompts, 3)
                .validate_fix(draft, &shop_snapshot(), max_attempts)
                .await
        }
    }

    fn broken_column_backend() -> FakeBackend {
        FakeBackend::new()
            .with_error("total_amount", "Binder Error: column \"total_amount\" not found")
            .with_rows("orders", vec![row(&[("total", json!(10.0))])])
    }

    #[tokio::test]
    async fn valid_draft_passes_without_model_call() {
        let h = Harness::new(broken_column_backend(), vec![]);

        let out = h.run("select total from orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.attempts, 1);
        assert_eq!(out.validated_sql, Some(pretty_sql("select total from orders")));
        assert!(out.last_error.is_none());
        assert_eq!(h.llm.calls(), 0);
        // Dry runs used the validation cap: once as drafted, once formatted
        let statements = h.backend.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "select total from orders\nLIMIT 3;");
        assert!(statements[1].starts_with("SELECT"));
        assert!(statements[1].ends_with("\nLIMIT 3;"));
        let explains = h.backend.explains();
        assert_eq!(explains[0], "select total from orders");
        assert_eq!(explains[1], pretty_sql("select total from orders"));
    }

    #[tokio::test]
    async fn formatting_that_breaks_the_query_keeps_the_validated_text() {
        // Only the formatted text carries the indented column
        let backend = FakeBackend::new()
            .with_error("  total", "Parser Error: syntax error at or near \"/\"")
            .with_rows("orders", vec![row(&[("total", json!(10.0))])]);
        let h = Harness::new(backend, vec![]);

        let out = h.run("select total from orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.attempts, 1);
        assert_eq!(out.validated_sql.as_deref(), Some("select total from orders"));
        assert!(out.last_error.is_none());
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn validated_sql_executes_against_duckdb() {
        let (_dir, backend) = crate::test_support::seeded_duckdb();
        let executor = QueryExecutor::new(Arc::new(backend));
        let llm = ScriptedModel::new(Vec::<String>::new());
        let prompts = Prompts::new().unwrap();

        for draft in [
            "SELECT qty // 2 AS half FROM orders",
            "SELECT id, total FROM orders WHERE total > 1 ORDER BY id",
        ] {
            let out = SqlValidator::new(&executor, &llm, &prompts, 3)
                .validate_fix(draft, &shop_snapshot(), 1)
                .await;
            let sql = out.validated_sql.expect(draft);
            let result = executor.execute(&sql, 100).await.unwrap();
            assert_eq!(result.rowcount, 3, "{}", sql);
        }
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn failing_draft_repaired_on_second_attempt() {
        let h = Harness::new(
            broken_column_backend(),
            vec![r#"{"validated_sql": "SELECT total FROM orders"}"#],
        );

        let out = h.run("SELECT total_amount FROM orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.attempts, 2);
        assert_eq!(out.validated_sql, Some(pretty_sql("SELECT total FROM orders")));
        assert!(out.last_error.is_none());

        let prompt = &h.llm.prompts()[0];
        assert!(prompt.contains("Attempt: 2"));
        assert!(prompt.contains("SELECT total_amount FROM orders"));
        assert!(prompt.contains("total_amount\" not found"));
        assert!(prompt.contains("## Schema: main"));
    }

    #[tokio::test]
    async fn exhausted_budget_returns_null_sql_and_last_error() {
        let h = Harness::new(
            broken_column_backend(),
            vec![
                r#"{"validated_sql": "SELECT total_amount, 1 FROM orders"}"#,
                r#"{"validated_sql": "SELECT total_amount, 2 FROM orders"}"#,
            ],
        );

        let out = h.run("SELECT total_amount FROM orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.validated_sql, None);
        assert_eq!(out.attempts, 3);
        assert!(out.last_error.unwrap().contains("total_amount"));
        assert_eq!(h.llm.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_repair_keeps_previous_candidate() {
        let h = Harness::new(
            broken_column_backend(),
            vec![
                "I think you should check the column name.",
                r#"{"sql": "SELECT total FROM orders"}"#,
            ],
        );

        let out = h.run("SELECT total_amount FROM orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.attempts, 3);
        assert_eq!(out.validated_sql, Some(pretty_sql("SELECT total FROM orders")));
        // The second repair prompt still shows the original candidate
        assert!(h.llm.prompts()[1].contains("SELECT total_amount FROM orders"));
    }

    #[tokio::test]
    async fn validated_sql_field_wins_over_sql() {
        let h = Harness::new(
            broken_column_backend(),
            vec![r#"{"sql": "SELECT total_amount FROM orders", "validated_sql": "SELECT total FROM orders"}"#],
        );

        let out = h.run("SELECT total_amount FROM orders", DEFAULT_MAX_ATTEMPTS).await;
        assert_eq!(out.attempts, 2);
        assert!(out.validated_sql.is_some());
    }

    #[tokio::test]
    async fn model_failure_does_not_abort_the_loop() {
        // Script runs dry after the first response, so the second call errors
        let h = Harness::new(
            broken_column_backend(),
            vec![r#"{"validated_sql": "SELECT total_amount + 0 FROM orders"}"#],
        );

        let out = h.run("SELECT total_amount FROM orders", DEFAULT_MAX_ATTEMPTS).await;
        assert_eq!(out.attempts, 3);
        assert!(out.validated_sql.is_none());
        assert!(out.last_error.is_some());
    }

    #[tokio::test]
    async fn non_select_draft_feeds_the_repair_loop() {
        let h = Harness::new(
            broken_column_backend(),
            vec![r#"{"validated_sql": "SELECT total FROM orders"}"#],
        );

        let out = h.run("DELETE FROM orders", DEFAULT_MAX_ATTEMPTS).await;

        assert_eq!(out.attempts, 2);
        assert!(h.llm.prompts()[0].contains("Only SELECT statements are allowed."));
    }

    #[tokio::test]
    async fn budget_of_one_never_calls_the_model() {
        let h = Harness::new(broken_column_backend(), vec![]);

        let out = h.run("SELECT total_amount FROM orders", 1).await;
        assert_eq!(out.attempts, 1);
        assert!(out.validated_sql.is_none());
        assert_eq!(h.llm.calls(), 0);

        let zero = h.run("SELECT total_amount FROM orders", 0).await;
        assert_eq!(zero.attempts, 1);
    }

    #[test]
    fn pretty_sql_uppercases_keywords() {
        let pretty = pretty_sql("select id from orders where total > 1");
        assert!(pretty.contains("SELECT"));
        assert!(pretty.contains("FROM"));
        assert!(pretty.contains("orders"));
    }
}
