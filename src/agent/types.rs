use crate::schema::Row;
use serde::{Deserialize, Deserializer, Serialize};

/// Number of most recent turns fed into prompts.
pub const HISTORY_WINDOW: usize = 10;
/// Rows kept on a recorded turn.
pub const TURN_PREVIEW_ROWS: usize = 10;
/// Rows shown to the model when narrating.
pub const RESPOND_PREVIEW_ROWS: usize = 20;

/// Immutable per-turn input to the stages.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub user_query: &'a str,
    pub now_iso: &'a str,
    pub timezone: &'a str,
    /// Oldest first.
    pub previous_turns: &'a [ConversationTurn],
}

/// One completed question/answer cycle. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub original_question: String,
    pub rephrased_question: String,
    pub final_sql: String,
    #[serde(default)]
    pub result_preview: Vec<Row>,
    pub rowcount: usize,
    pub timestamp_iso: String,
}

/// A turn without its row preview, as shown to the model.
#[derive(Debug, Serialize)]
pub struct TurnSummary<'a> {
    pub original_question: &'a str,
    pub rephrased_question: &'a str,
    pub final_sql: &'a str,
    pub rowcount: usize,
    pub timestamp_iso: &'a str,
}

impl<'a> From<&'a ConversationTurn> for TurnSummary<'a> {
    fn from(turn: &'a ConversationTurn) -> Self {
        Self {
            original_question: &turn.original_question,
            rephrased_question: &turn.rephrased_question,
            final_sql: &turn.final_sql,
            rowcount: turn.rowcount,
            timestamp_iso: &turn.timestamp_iso,
        }
    }
}

/// The last [`HISTORY_WINDOW`] turns, still oldest first.
pub fn recent_turns(turns: &[ConversationTurn]) -> &[ConversationTurn] {
    let start = turns.len().saturating_sub(HISTORY_WINDOW);
    &turns[start..]
}

pub fn summarize_history(turns: &[ConversationTurn]) -> Vec<TurnSummary<'_>> {
    recent_turns(turns).iter().map(TurnSummary::from).collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RephraseOutput {
    pub rephrased_query: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanOutput {
    pub sql_draft: String,
    #[serde(default)]
    pub target_tables: Vec<String>,
    #[serde(default, deserialize_with = "text_or_list")]
    pub assumptions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidateFixOutput {
    /// `None` when no executable SQL was found within the attempt budget.
    pub validated_sql: Option<String>,
    pub attempts: u32,
    /// Present iff `validated_sql` is `None`.
    pub last_error: Option<String>,
}

// Models sometimes return assumptions as a list of bullet strings.
fn text_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrList {
        Text(String),
        List(Vec<String>),
        Null(()),
    }

    Ok(match TextOrList::deserialize(deserializer)? {
        TextOrList::Text(s) => s,
        TextOrList::List(items) => items.join("; "),
        TextOrList::Null(()) => String::new(),
    })
}
