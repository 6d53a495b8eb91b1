//! Conversation pipeline.
//!
//! Runs Rephrase → Plan → ValidateFix → Execute → Respond once per turn.
//! Every stage runs; a failed upstream stage leaves the SQL stages with
//! nothing to do and the Respond stage explains what went wrong. A turn
//! always yields a reply and exactly one new [`ConversationTurn`].

use crate::agent::plan::plan_sql;
use crate::agent::rephrase::rephrase;
use crate::agent::respond::{respond, RespondInput};
use crate::agent::types::{ConversationTurn, QueryContext, TURN_PREVIEW_ROWS};
use crate::agent::validate_fix::{SqlValidator, DEFAULT_MAX_ATTEMPTS};
use crate::db::executor::{QueryExecutor, DEFAULT_ROW_LIMIT, VALIDATION_ROW_LIMIT};
use crate::llm::prompts::Prompts;
use crate::llm::LanguageModel;
use crate::schema::{Row, SchemaCache, SchemaSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_repair_attempts: u32,
    pub row_limit: usize,
    pub validation_row_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_repair_attempts: DEFAULT_MAX_ATTEMPTS,
            row_limit: DEFAULT_ROW_LIMIT,
            validation_row_limit: VALIDATION_ROW_LIMIT,
        }
    }
}

/// Input for one turn. `previous_turns` is taken by value: the pipeline
/// appends to its own copy and hands it back in the output.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineInput {
    pub user_query: String,
    pub now_iso: String,
    pub timezone: String,
    #[serde(default)]
    pub previous_turns: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub reply_text: String,
    pub validated_sql: Option<String>,
    pub result_rows: Vec<Row>,
    pub rowcount: usize,
    pub previous_turns: Vec<ConversationTurn>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Rephrase,
    Plan,
    ValidateFix,
    Execute,
    Respond,
}

const STAGES: [Stage; 5] = [
    Stage::Rephrase,
    Stage::Plan,
    Stage::ValidateFix,
    Stage::Execute,
    Stage::Respond,
];

#[derive(Debug, Clone)]
enum TurnError {
    /// Rephrase or plan produced nothing usable.
    Unusable { stage: Stage, message: String },
    /// No schema to ground the plan on.
    SchemaUnavailable(String),
    /// Repair loop spent its budget.
    RepairExhausted { attempts: u32, last_error: String },
    /// Validated SQL failed at final execution.
    Execution(String),
}

impl TurnError {
    /// Fatal errors skip the SQL stages and get a canned reply.
    fn is_fatal(&self) -> bool {
        matches!(self, TurnError::Unusable { .. } | TurnError::SchemaUnavailable(_))
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Unusable { stage, message } => write!(f, "{:?} stage failed: {}", stage, message),
            TurnError::SchemaUnavailable(msg) => write!(f, "{}", msg),
            TurnError::RepairExhausted {
                attempts,
                last_error,
            } => write!(f, "no valid SQL after {} attempts: {}", attempts, last_error),
            TurnError::Execution(msg) => write!(f, "query execution failed: {}", msg),
        }
    }
}

/// Mutable record carried through the stages of a single turn.
struct TurnState {
    user_query: String,
    now_iso: String,
    timezone: String,
    previous_turns: Vec<ConversationTurn>,
    rephrased: Option<String>,
    schema: Option<SchemaSnapshot>,
    sql_draft: Option<String>,
    validated_sql: Option<String>,
    result_rows: Vec<Row>,
    rowcount: usize,
    reply_text: String,
    error: Option<TurnError>,
}

impl TurnState {
    fn new(input: PipelineInput) -> Self {
        Self {
            user_query: input.user_query,
            now_iso: input.now_iso,
            timezone: input.timezone,
            previous_turns: input.previous_turns,
            rephrased: None,
            schema: None,
            sql_draft: None,
            validated_sql: None,
            result_rows: Vec::new(),
            rowcount: 0,
            reply_text: String::new(),
            error: None,
        }
    }

    fn halted(&self) -> bool {
        self.error.as_ref().is_some_and(TurnError::is_fatal)
    }

    fn rephrased_or_original(&self) -> &str {
        self.rephrased.as_deref().unwrap_or(&self.user_query)
    }

    fn final_sql(&self) -> &str {
        self.validated_sql
            .as_deref()
            .or(self.sql_draft.as_deref())
            .unwrap_or("")
    }

    fn into_output(self) -> PipelineOutput {
        PipelineOutput {
            reply_text: self.reply_text,
            validated_sql: self.validated_sql,
            result_rows: self.result_rows,
            rowcount: self.rowcount,
            previous_turns: self.previous_turns,
            error: self.error.map(|e| e.to_string()),
        }
    }
}

/// The question → SQL → answer state machine.
///
/// Holds no per-conversation state, so one instance serves any number of
/// concurrent sessions.
pub struct Pipeline {
    llm: Arc<dyn LanguageModel>,
    executor: QueryExecutor,
    schema_cache: Arc<SchemaCache>,
    prompts: Arc<Prompts>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        executor: QueryExecutor,
        schema_cache: Arc<SchemaCache>,
        prompts: Arc<Prompts>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            llm,
            executor,
            schema_cache,
            prompts,
            settings,
        }
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub async fn run(&self, input: PipelineInput) -> PipelineOutput {
        info!("Starting turn: {}", input.user_query);
        let mut state = TurnState::new(input);

        for stage in STAGES {
            self.advance(stage, &mut state).await;
        }

        if let Some(err) = &state.error {
            warn!("Turn finished with error: {}", err);
        } else {
            info!("Turn finished with {} rows", state.rowcount);
        }
        state.into_output()
    }

    async fn advance(&self, stage: Stage, state: &mut TurnState) {
        match stage {
            Stage::Rephrase => self.rephrase_stage(state).await,
            Stage::Plan => self.plan_stage(state).await,
            Stage::ValidateFix => self.validate_fix_stage(state).await,
            Stage::Execute => self.execute_stage(state).await,
            Stage::Respond => self.respond_stage(state).await,
        }
    }

    async fn rephrase_stage(&self, state: &mut TurnState) {
        let ctx = QueryContext {
            user_query: &state.user_query,
            now_iso: &state.now_iso,
            timezone: &state.timezone,
            previous_turns: &state.previous_turns,
        };

        match rephrase(self.llm.as_ref(), &self.prompts, &ctx).await {
            Ok(out) => state.rephrased = Some(out.rephrased_query),
            Err(e) => {
                error!("Rephrase failed: {}", e);
                state.error = Some(TurnError::Unusable {
                    stage: Stage::Rephrase,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn plan_stage(&self, state: &mut TurnState) {
        if state.halted() {
            return;
        }

        let schema = match self.schema_cache.get_schema_snapshot().await {
            Ok(schema) => schema,
            Err(e) => {
                error!("Schema unavailable: {}", e);
                state.error = Some(TurnError::SchemaUnavailable(e.to_string()));
                return;
            }
        };

        let plan = plan_sql(
            self.llm.as_ref(),
            &self.prompts,
            &state.user_query,
            state.rephrased_or_original(),
            &schema,
        )
        .await;
        state.schema = Some(schema);

        match plan {
            Ok(plan) => state.sql_draft = Some(plan.sql_draft),
            Err(e) => {
                error!("Planning failed: {}", e);
                state.error = Some(TurnError::Unusable {
                    stage: Stage::Plan,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn validate_fix_stage(&self, state: &mut TurnState) {
        if state.halted() {
            return;
        }
        let (Some(draft), Some(schema)) = (&state.sql_draft, &state.schema) else {
            return;
        };

        let validator = SqlValidator::new(
            &self.executor,
            self.llm.as_ref(),
            &self.prompts,
            self.settings.validation_row_limit,
        );
        let out = validator
            .validate_fix(draft, schema, self.settings.max_repair_attempts)
            .await;

        match out.validated_sql {
            Some(sql) => state.validated_sql = Some(sql),
            None => {
                state.error = Some(TurnError::RepairExhausted {
                    attempts: out.attempts,
                    last_error: out.last_error.unwrap_or_default(),
                });
            }
        }
    }

    async fn execute_stage(&self, state: &mut TurnState) {
        let Some(sql) = &state.validated_sql else {
            state.result_rows.clear();
            state.rowcount = 0;
            return;
        };

        match self.executor.execute(sql, self.settings.row_limit).await {
            Ok(result) => {
                state.rowcount = result.rowcount;
                state.result_rows = result.rows;
            }
            Err(e) => {
                error!("Execution of validated SQL failed: {}", e);
                state.result_rows.clear();
                state.rowcount = 0;
                state.error = Some(TurnError::Execution(e.to_string()));
            }
        }
    }

    async fn respond_stage(&self, state: &mut TurnState) {
        state.reply_text = match &state.error {
            Some(err) if err.is_fatal() => fatal_reply(err),
            _ => self.narrate(state).await,
        };

        let turn = ConversationTurn {
            original_question: state.user_query.clone(),
            rephrased_question: state.rephrased_or_original().to_string(),
            final_sql: state.final_sql().to_string(),
            result_preview: state
                .result_rows
                .iter()
                .take(TURN_PREVIEW_ROWS)
                .cloned()
                .collect(),
            rowcount: state.rowcount,
            timestamp_iso: state.now_iso.clone(),
        };
        state.previous_turns.push(turn);
    }

    async fn narrate(&self, state: &TurnState) -> String {
        let error = state.error.as_ref().map(|e| match e {
            TurnError::RepairExhausted { last_error, .. } => last_error.clone(),
            other => other.to_string(),
        });

        let input = RespondInput {
            now_iso: &state.now_iso,
            timezone: &state.timezone,
            original_question: &state.user_query,
            rephrased_question: state.rephrased_or_original(),
            final_sql: state.final_sql(),
            result_rows: &state.result_rows,
            rowcount: state.rowcount,
            previous_turns: &state.previous_turns,
            error: error.as_deref(),
            execution_failed: matches!(state.error, Some(TurnError::Execution(_))),
        };

        match respond(self.llm.as_ref(), &self.prompts, &input).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => fallback_reply(state),
            Err(e) => {
                error!("Narration failed: {}", e);
                fallback_reply(state)
            }
        }
    }
}

fn fatal_reply(err: &TurnError) -> String {
    match err {
        TurnError::Unusable {
            stage: Stage::Rephrase,
            message,
        } => format!(
            "Sorry, I could not make sense of that question ({}). Could you rephrase it?",
            message
        ),
        TurnError::SchemaUnavailable(message) => format!(
            "Sorry, I could not read the database structure, so I cannot answer right now ({}).",
            message
        ),
        other => format!(
            "Sorry, I could not turn that question into a database query ({}).",
            other
        ),
    }
}

fn fallback_reply(state: &TurnState) -> String {
    match (&state.validated_sql, &state.error) {
        (Some(sql), None) => format!(
            "The query returned {} row(s).\n\nSQL:\n{}",
            state.rowcount, sql
        ),
        _ => format!(
            "Sorry, I could not produce a valid SQL query for that question. Last attempt:\n{}",
            state.final_sql()
        ),
    }
}
