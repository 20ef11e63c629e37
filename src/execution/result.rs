//! Query Result - tabular rows returned by a database backend

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered rows with column labels, as returned by a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub execution_time_ms: u64,
}

/// Broad column type, inferred from the cell values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Temporal,
    Categorical,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The only cell of a 1x1 result.
    pub fn single_value(&self) -> Option<&Value> {
        if self.rows.len() == 1 && self.columns.len() == 1 {
            self.rows[0].first()
        } else {
            None
        }
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Infer a column's kind from its non-null cells. All numbers make it
    /// numeric, all date-like strings temporal, anything else categorical.
    pub fn column_kind(&self, index: usize) -> ColumnKind {
        let mut seen = false;
        let mut all_numeric = true;
        let mut all_temporal = true;

        for value in self.column_values(index).filter(|v| !v.is_null()) {
            seen = true;
            match value {
                Value::Number(_) => all_temporal = false,
                Value::String(s) => {
                    all_numeric = false;
                    if !looks_temporal(s) {
                        all_temporal = false;
                    }
                }
                _ => {
                    all_numeric = false;
                    all_temporal = false;
                }
            }
        }

        if !seen {
            ColumnKind::Categorical
        } else if all_numeric {
            ColumnKind::Numeric
        } else if all_temporal {
            ColumnKind::Temporal
        } else {
            ColumnKind::Categorical
        }
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> Vec<String> {
        (0..self.columns.len())
            .filter(|&i| self.column_kind(i) == kind)
            .map(|i| self.columns[i].clone())
            .collect()
    }

    /// First `n` rows as JSON objects keyed by column name.
    pub fn sample_records(&self, n: usize) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Aligned text table, truncated after `max_rows` rows.
    pub fn render_table(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_string();
        }

        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| row.iter().map(format_cell).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &shown {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let format_row = |cells: &[String]| -> String {
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let width = widths.get(i).copied().unwrap_or(0);
                    format!("{:<width$}", cell, width = width)
                })
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![format_row(&self.columns)];
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &shown {
            lines.push(format_row(row));
        }

        if self.rows.len() > max_rows {
            lines.push(format!("… {} more rows", self.rows.len() - max_rows));
        }
        lines.push(format!("({} rows)", self.rows.len()));
        lines.join("\n")
    }
}

pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn looks_temporal(s: &str) -> bool {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales_by_month() -> ResultSet {
        ResultSet::new(
            vec!["month".into(), "state".into(), "revenue".into()],
            vec![
                vec![json!("2018-01-01"), json!("SP"), json!(1200.5)],
                vec![json!("2018-02-01"), json!("RJ"), json!(980)],
                vec![json!("2018-03-01 00:00:00"), Value::Null, json!(1010.0)],
            ],
        )
    }

    #[test]
    fn test_column_kinds() {
        let rs = sales_by_month();
        assert_eq!(rs.column_kind(0), ColumnKind::Temporal);
        assert_eq!(rs.column_kind(1), ColumnKind::Categorical);
        assert_eq!(rs.column_kind(2), ColumnKind::Numeric);
        assert_eq!(rs.columns_of_kind(ColumnKind::Numeric), vec!["revenue".to_string()]);
    }

    #[test]
    fn test_single_value() {
        let rs = ResultSet::new(vec!["avg".into()], vec![vec![json!(42.5)]]);
        assert_eq!(rs.single_value(), Some(&json!(42.5)));
        assert_eq!(sales_by_month().single_value(), None);
    }

    #[test]
    fn test_sample_records_keep_column_order() {
        let records = sales_by_month().sample_records(2);
        assert_eq!(records.len(), 2);
        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, vec!["month", "state", "revenue"]);
    }

    #[test]
    fn test_render_table_truncates() {
        let table = sales_by_month().render_table(2);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "month      | state | revenue");
        assert!(lines[1].starts_with("-----"));
        assert!(table.contains("… 1 more rows"));
        assert!(table.ends_with("(3 rows)"));
    }
}
