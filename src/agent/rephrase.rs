use crate::agent::types::{summarize_history, QueryContext, RephraseOutput};
use crate::agent::{AgentError, PLANNING_TEMPERATURE};
use crate::llm::json::{extract_as, ModelOutputParseError};
use crate::llm::prompts::{Prompts, REPHRASE};
use crate::llm::LanguageModel;
use minijinja::context;
use tracing::{debug, info};

/// Turns the latest utterance plus history into a self-contained question.
pub async fn rephrase(
    llm: &dyn LanguageModel,
    prompts: &Prompts,
    ctx: &QueryContext<'_>,
) -> Result<RephraseOutput, AgentError> {
    let history = summarize_history(ctx.previous_turns);
    let history_json = serde_json::to_string_pretty(&history)?;

    let prompt = prompts.render(
        REPHRASE,
        context! {
            now_iso => ctx.now_iso,
            timezone => ctx.timezone,
            user_query => ctx.user_query,
            history_json => history_json,
        },
    )?;
    debug!("Rephrase prompt: {}", prompt);

    let raw = llm.complete(&prompt, PLANNING_TEMPERATURE).await?;
    debug!("Rephrase response: {}", raw);

    let out: RephraseOutput = extract_as(&raw)?;
    if out.rephrased_query.trim().is_empty() {
        return Err(ModelOutputParseError("empty rephrased_query".to_string()).into());
    }

    info!("Rephrased '{}' as '{}'", ctx.user_query, out.rephrased_query);
    Ok(out)
}
