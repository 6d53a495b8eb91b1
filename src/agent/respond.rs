use crate::agent::types::{summarize_history, ConversationTurn, RESPOND_PREVIEW_ROWS};
use crate::agent::{AgentError, NARRATION_TEMPERATURE};
use crate::llm::prompts::{Prompts, RESPOND};
use crate::llm::LanguageModel;
use crate::schema::Row;
use minijinja::context;
use tracing::debug;

pub struct RespondInput<'a> {
    pub now_iso: &'a str,
    pub timezone: &'a str,
    pub original_question: &'a str,
    pub rephrased_question: &'a str,
    /// Validated SQL if any, else the last draft.
    pub final_sql: &'a str,
    pub result_rows: &'a [Row],
    pub rowcount: usize,
    pub previous_turns: &'a [ConversationTurn],
    /// Set when no valid SQL could be produced or execution failed.
    pub error: Option<&'a str>,
    /// `error` came from running validated SQL, not from the repair loop.
    pub execution_failed: bool,
}

/// Narrates the outcome of the turn. The model's text is returned as-is.
pub async fn respond(
    llm: &dyn LanguageModel,
    prompts: &Prompts,
    input: &RespondInput<'_>,
) -> Result<String, AgentError> {
    let preview_len = input.result_rows.len().min(RESPOND_PREVIEW_ROWS);
    let preview = &input.result_rows[..preview_len];
    let history = summarize_history(input.previous_turns);

    let prompt = prompts.render(
        RESPOND,
        context! {
            now_iso => input.now_iso,
            timezone => input.timezone,
            original_question => input.original_question,
            rephrased_question => input.rephrased_question,
            final_sql => input.final_sql,
            rowcount => input.rowcount,
            preview_len => preview_len,
            result_preview_json => serde_json::to_string(preview)?,
            history_json => serde_json::to_string(&history)?,
            error => input.error,
            execution_failed => input.execution_failed,
        },
    )?;
    debug!("Respond prompt: {}", prompt);

    let text = llm.complete(&prompt, NARRATION_TEMPERATURE).await?;
    Ok(text.trim().to_string())
}
