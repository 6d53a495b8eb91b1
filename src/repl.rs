use crate::agent::{ConversationTurn, Pipeline, PipelineInput, PipelineOutput};
use crate::util::time::now_iso;
use chrono_tz::Tz;
use std::io::{self, BufRead, Write};

/// Rows printed under each answer.
const PREVIEW_ROWS: usize = 10;

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Quit,
    Reset,
    Skip,
    Question(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => Input::Skip,
        "exit" | "quit" => Input::Quit,
        "reset" => Input::Reset,
        _ => Input::Question(line),
    }
}

async fn ask(
    pipeline: &Pipeline,
    tz: Tz,
    question: &str,
    previous_turns: Vec<ConversationTurn>,
) -> PipelineOutput {
    pipeline
        .run(PipelineInput {
            user_query: question.to_string(),
            now_iso: now_iso(tz),
            timezone: tz.name().to_string(),
            previous_turns,
        })
        .await
}

fn print_output<W: Write>(out: &mut W, output: &PipelineOutput) -> io::Result<()> {
    writeln!(out, "\n{}\n", output.reply_text)?;

    if let Some(sql) = &output.validated_sql {
        writeln!(out, "SQL:\n{}\n", sql)?;
        let preview = &output.result_rows[..output.result_rows.len().min(PREVIEW_ROWS)];
        if !preview.is_empty() {
            let pretty = serde_json::to_string_pretty(preview).map_err(io::Error::other)?;
            writeln!(out, "{}", pretty)?;
        }
        writeln!(out, "({} rows)", output.rowcount)?;
    }
    out.flush()
}

/// Answers one question and prints the result.
pub async fn ask_once(pipeline: &Pipeline, tz: Tz, question: &str) -> io::Result<()> {
    let output = ask(pipeline, tz, question, Vec::new()).await;
    print_output(&mut io::stdout().lock(), &output)
}

/// Interactive loop over stdin. History lives only as long as the loop.
pub async fn chat(pipeline: &Pipeline, tz: Tz) -> io::Result<()> {
    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = io::stdin().lock().lines();

    println!("Ask a question about your data. Type 'reset' to forget context, 'exit' to leave.");
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        match classify(&line) {
            Input::Quit => break,
            Input::Skip => continue,
            Input::Reset => {
                history.clear();
                println!("Context cleared.");
            }
            Input::Question(question) => {
                let output = ask(pipeline, tz, question, std::mem::take(&mut history)).await;
                print_output(&mut io::stdout().lock(), &output)?;
                history = output.previous_turns;
            }
        }
    }
    Ok(())
}
