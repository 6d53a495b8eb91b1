use minijinja::Environment;
use serde::Serialize;

pub const REPHRASE: &str = "rephrase.md";
pub const PLAN_SQL: &str = "plan_sql.md";
pub const FIX_SQL: &str = "fix_sql.md";
pub const RESPOND: &str = "respond.md";

/// Prompt templates compiled into the binary.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();

        env.add_template(REPHRASE, include_str!("../../prompts/rephrase.md"))?;
        env.add_template(PLAN_SQL, include_str!("../../prompts/plan_sql.md"))?;
        env.add_template(FIX_SQL, include_str!("../../prompts/fix_sql.md"))?;
        env.add_template(RESPOND, include_str!("../../prompts/respond.md"))?;

        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn all_templates_compile() {
        let prompts = Prompts::new().unwrap();
        for name in [REPHRASE, PLAN_SQL, FIX_SQL, RESPOND] {
            assert!(prompts.render(name, context! {}).is_ok(), "{} failed", name);
        }
    }

    #[test]
    fn fix_prompt_carries_error_and_attempt() {
        let prompts = Prompts::new().unwrap();
        let text = prompts
            .render(
                FIX_SQL,
                context! {
                    sql => "SELECT nme FROM customers",
                    error => "column nme does not exist",
                    schema_text => "## Schema: main",
                    attempts => 2,
                },
            )
            .unwrap();
        assert!(text.contains("Attempt: 2"));
        assert!(text.contains("column nme does not exist"));
        assert!(text.contains("SELECT nme FROM customers"));
    }

    #[test]
    fn respond_prompt_switches_on_error() {
        let prompts = Prompts::new().unwrap();
        let failed = prompts
            .render(RESPOND, context! { error => "no such table", rowcount => 0 })
            .unwrap();
        assert!(failed.contains("No valid SQL could be produced"));

        let ok = prompts
            .render(RESPOND, context! { rowcount => 1, preview_len => 1 })
            .unwrap();
        assert!(ok.contains("Rows returned: 1"));
        assert!(!ok.contains("No valid SQL"));
    }
}
