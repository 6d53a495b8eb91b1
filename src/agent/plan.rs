use crate::agent::types::PlanOutput;
use crate::agent::{AgentError, PLANNING_TEMPERATURE};
use crate::llm::json::{extract_as, ModelOutputParseError};
use crate::llm::prompts::{Prompts, PLAN_SQL};
use crate::llm::LanguageModel;
use crate::schema::render::render_schema_markdown;
use crate::schema::SchemaSnapshot;
use minijinja::context;
use tracing::{debug, info};

/// Drafts a SQL statement for the question. Pure generation, nothing is run.
pub async fn plan_sql(
    llm: &dyn LanguageModel,
    prompts: &Prompts,
    original_question: &str,
    rephrased_question: &str,
    schema: &SchemaSnapshot,
) -> Result<PlanOutput, AgentError> {
    let schema_text = render_schema_markdown(schema, true);

    let prompt = prompts.render(
        PLAN_SQL,
        context! {
            user_query => original_question,
            rephrased_query => rephrased_question,
            schema_text => schema_text,
        },
    )?;
    debug!("Plan prompt: {}", prompt);

    let raw = llm.complete(&prompt, PLANNING_TEMPERATURE).await?;
    debug!("Plan response: {}", raw);

    let plan: PlanOutput = extract_as(&raw)?;
    if plan.sql_draft.trim().is_empty() {
        return Err(ModelOutputParseError("empty sql_draft".to_string()).into());
    }

    info!(
        "Planned SQL over tables {:?}: {}",
        plan.target_tables, plan.sql_draft
    );
    Ok(plan)
}
