//! SQL text helpers
//!
//! Completion services wrap SQL in markdown fences, prepend prose, or append
//! explanations. These helpers recover the statement itself.

use regex::Regex;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"))
}

// Statement openers only count at the start of a line or sentence.
fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)(?:^\s*|[:.!?]\s+)(select)\b").expect("valid regex"))
}

fn cte_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)(?:^\s*|[:.!?]\s+)(with\s+(?:recursive\s+)?\w+\s*(?:\([^)]*\)\s*)?as\s*\()")
            .expect("valid regex")
    })
}

fn from_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bfrom\b").expect("valid regex"))
}

/// Remove surrounding markdown code fences and whitespace from a query.
pub fn clean_sql(query: &str) -> String {
    let trimmed = query.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().map_or(false, |l| l.trim_start().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().map_or(false, |l| l.trim_start().starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Find a SQL statement inside free-form completion text.
///
/// Prefers the first fenced block; otherwise takes everything from the first
/// `SELECT` or CTE opener that begins a line or sentence, cut after the last
/// semicolon when prose follows. Outside a fence the statement must also
/// have a `FROM` clause, so prose that merely says "select" is rejected.
pub fn recover_sql(text: &str) -> Option<String> {
    let (body, fenced) = match fence_regex().captures(text) {
        Some(caps) => (caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string(), true),
        None => (text.to_string(), false),
    };

    let start = [select_regex().captures(&body), cte_regex().captures(&body)]
        .into_iter()
        .flatten()
        .filter_map(|caps| caps.get(1))
        .map(|m| m.start())
        .min()?;

    let mut statement = body[start..].trim();
    if let Some(end) = statement.rfind(';') {
        if !statement[end + 1..].trim().is_empty() {
            statement = &statement[..=end];
        }
    }

    let statement = statement.trim();
    if statement.is_empty() || (!fenced && !from_regex().is_match(statement)) {
        None
    } else {
        Some(statement.to_string())
    }
}

/// Drop trailing semicolons so the statement can be embedded in another query.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_sql_strips_fences() {
        let raw = "```sql\nSELECT COUNT(*) FROM orders;\n```";
        assert_eq!(clean_sql(raw), "SELECT COUNT(*) FROM orders;");
        assert_eq!(clean_sql("  SELECT 1  \n"), "SELECT 1");
    }

    #[test]
    fn test_recover_sql_from_fenced_block() {
        let text = "Here you go:\n```sql\nSELECT city FROM customers LIMIT 10;\n```\nThis lists cities.";
        assert_eq!(
            recover_sql(text).as_deref(),
            Some("SELECT city FROM customers LIMIT 10;")
        );
    }

    #[test]
    fn test_recover_sql_from_prose() {
        let text = "The query with the join is: SELECT o.id FROM orders o; It returns ids.";
        assert_eq!(recover_sql(text).as_deref(), Some("SELECT o.id FROM orders o;"));
    }

    #[test]
    fn test_recover_sql_keeps_cte() {
        let text = "WITH totals AS (SELECT 1 AS x) SELECT x FROM totals";
        assert_eq!(recover_sql(text).as_deref(), Some(text));
    }

    #[test]
    fn test_recover_sql_rejects_non_sql() {
        assert_eq!(recover_sql("I'm sorry, I cannot help with that."), None);
        assert_eq!(recover_sql(""), None);
    }

    #[test]
    fn test_recover_sql_ignores_select_in_refusals() {
        assert_eq!(
            recover_sql("I'm sorry, please select a question about the retail data."),
            None
        );
        assert_eq!(recover_sql("Select a topic and I will help."), None);
        assert_eq!(
            recover_sql("Sure.\nSELECT store_id FROM transactions").as_deref(),
            Some("SELECT store_id FROM transactions")
        );
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("SELECT 1;;  \n"), "SELECT 1");
    }

    #[test]
    fn test_recover_sql_fenced_without_from() {
        assert_eq!(recover_sql("```sql\nSELECT 1\n```").as_deref(), Some("SELECT 1"));
    }
}
