//! Visualization selection
//!
//! Picks a chart for a result from the intent expressed in the question and
//! SQL, and from the kinds of the result columns.

use crate::execution::result::{format_cell, ColumnKind, ResultSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Below this a front end should offer other chart types.
pub const LOW_CONFIDENCE: f64 = 0.7;

const PIE_MAX_ROWS: usize = 10;

const SQL_TIME_PATTERNS: &[&str] = &[
    "date_trunc", "extract", "datepart", "strftime", "year", "month", "day", "week",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Temporal,
    Comparison,
    Distribution,
    Relationship,
    Composition,
}

impl Intent {
    const ALL: [Intent; 5] = [
        Intent::Temporal,
        Intent::Comparison,
        Intent::Distribution,
        Intent::Relationship,
        Intent::Composition,
    ];

    /// Keywords by weight: high (1.0), medium (0.6), low (0.3).
    fn keywords(&self) -> [&'static [&'static str]; 3] {
        match self {
            Intent::Temporal => [
                &["trend", "over time", "historical", "timeline"],
                &["daily", "monthly", "yearly", "period", "seasonal"],
                &["date", "time", "when"],
            ],
            Intent::Comparison => [
                &["compare", "versus", "vs", "difference between"],
                &["against", "relative to", "higher than", "lower than"],
                &["more", "less", "greater", "smaller"],
            ],
            Intent::Distribution => [
                &["distribution", "spread", "histogram", "frequency"],
                &["range", "variance", "deviation"],
                &["across", "among", "between"],
            ],
            Intent::Relationship => [
                &["correlation", "relationship", "scatter", "impact of"],
                &["affects", "influences", "depends on"],
                &["between", "with"],
            ],
            Intent::Composition => [
                &["breakdown", "composition", "pie chart", "percentage of total"],
                &["share", "ratio", "proportion"],
                &["part", "segment", "split"],
            ],
        }
    }

    /// Explicit chart mentions that vote for this intent.
    fn chart_mentions(&self) -> &'static [&'static str] {
        match self {
            Intent::Temporal => &["line chart", "trend line", "time series"],
            Intent::Comparison => &["bar chart", "bar graph", "histogram"],
            Intent::Composition => &["pie chart", "donut chart", "pie graph"],
            Intent::Relationship => &["scatter plot", "scatter graph", "correlation plot"],
            Intent::Distribution => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Value,
    Line,
    Bar,
    Box,
    Histogram,
    Scatter,
    Pie,
    Table,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Value => "value",
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Box => "box",
            ChartKind::Histogram => "histogram",
            ChartKind::Scatter => "scatter",
            ChartKind::Pie => "pie",
            ChartKind::Table => "table",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationConfig {
    pub kind: ChartKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub confidence: f64,
}

impl VisualizationConfig {
    fn new(kind: ChartKind, confidence: f64) -> Self {
        Self {
            kind,
            x: None,
            y: None,
            color: None,
            names: None,
            values: None,
            value: None,
            confidence,
        }
    }

    fn axes(mut self, x: &str, y: Option<&String>) -> Self {
        self.x = Some(x.to_string());
        self.y = y.cloned();
        self
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence < LOW_CONFIDENCE
    }

    /// One-line description for terminal output.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("{} chart", self.kind.as_str())];
        match self.kind {
            ChartKind::Value => {
                if let Some(value) = &self.value {
                    parts = vec![format!("value: {}", format_cell(value))];
                }
            }
            ChartKind::Pie => {
                if let (Some(names), Some(values)) = (&self.names, &self.values) {
                    parts.push(format!("slices {} sized by {}", names, values));
                }
            }
            _ => {
                if let Some(x) = &self.x {
                    parts.push(format!("x={}", x));
                }
                if let Some(y) = &self.y {
                    parts.push(format!("y={}", y));
                }
                if let Some(color) = &self.color {
                    parts.push(format!("color={}", color));
                }
            }
        }
        let mut text = parts.join(", ");
        if self.is_low_confidence() {
            text.push_str(&format!(" (low confidence: {:.0}%)", self.confidence * 100.0));
        }
        text
    }
}

struct KeywordMatcher {
    patterns: Vec<(Regex, f64)>,
}

impl KeywordMatcher {
    fn new(weighted: &[(&[&str], f64)]) -> Self {
        let patterns = weighted
            .iter()
            .flat_map(|(words, weight)| {
                words.iter().map(move |w| {
                    let pattern = format!(r"\b{}\b", regex::escape(w));
                    (Regex::new(&pattern).expect("escaped keyword is a valid regex"), *weight)
                })
            })
            .collect();
        Self { patterns }
    }

    fn score(&self, text: &str) -> f64 {
        self.patterns
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, weight)| weight)
            .sum()
    }
}

pub struct VisualizationSelector {
    intents: Vec<(Intent, KeywordMatcher, KeywordMatcher)>,
    sql_time: KeywordMatcher,
}

impl VisualizationSelector {
    pub fn new() -> Self {
        let intents = Intent::ALL
            .iter()
            .map(|intent| {
                let [high, medium, low] = intent.keywords();
                (
                    *intent,
                    KeywordMatcher::new(&[(high, 1.0), (medium, 0.6), (low, 0.3)]),
                    KeywordMatcher::new(&[(intent.chart_mentions(), 1.0)]),
                )
            })
            .collect();
        Self {
            intents,
            sql_time: KeywordMatcher::new(&[(SQL_TIME_PATTERNS, 0.3)]),
        }
    }

    /// Intent scores normalised by the highest one, in `Intent::ALL` order.
    pub fn analyze_intent(&self, text: &str) -> Vec<(Intent, f64)> {
        let text = text.to_lowercase();
        let mut scores: Vec<(Intent, f64)> = self
            .intents
            .iter()
            .map(|(intent, keywords, mentions)| {
                let mut score = keywords.score(&text);
                if mentions.score(&text) > 0.0 {
                    score += 1.0;
                }
                if *intent == Intent::Temporal {
                    score += self.sql_time.score(&text);
                }
                (*intent, score)
            })
            .collect();

        let max = scores.iter().map(|(_, s)| *s).fold(0.0, f64::max);
        let max = if max > 0.0 { max } else { 1.0 };
        for (_, score) in scores.iter_mut() {
            *score /= max;
        }
        scores
    }

    /// Select a chart for `result`. `text` is the question and SQL together.
    pub fn select(&self, result: &ResultSet, text: &str) -> VisualizationConfig {
        if let Some(value) = result.single_value() {
            let mut config = VisualizationConfig::new(ChartKind::Value, 1.0);
            config.value = Some(value.clone());
            return config;
        }

        // First maximum wins ties
        let (intent, confidence) = self
            .analyze_intent(text)
            .into_iter()
            .fold(None, |best: Option<(Intent, f64)>, (intent, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((intent, score)),
            })
            .unwrap_or((Intent::Temporal, 0.0));

        let numeric = result.columns_of_kind(ColumnKind::Numeric);
        let categorical = result.columns_of_kind(ColumnKind::Categorical);
        let temporal = result.columns_of_kind(ColumnKind::Temporal);

        let chosen = match intent {
            Intent::Temporal if !temporal.is_empty() => {
                let mut config =
                    VisualizationConfig::new(ChartKind::Line, confidence).axes(&temporal[0], numeric.first());
                if !numeric.is_empty() {
                    config.color = categorical.first().cloned();
                }
                Some(config)
            }
            Intent::Comparison if !categorical.is_empty() && !numeric.is_empty() => {
                let mut config =
                    VisualizationConfig::new(ChartKind::Bar, confidence).axes(&categorical[0], numeric.first());
                config.color = categorical.get(1).cloned();
                Some(config)
            }
            Intent::Distribution if !numeric.is_empty() => Some(match categorical.first() {
                Some(category) => {
                    VisualizationConfig::new(ChartKind::Box, confidence).axes(category, numeric.first())
                }
                None => VisualizationConfig::new(ChartKind::Histogram, confidence).axes(&numeric[0], None),
            }),
            Intent::Relationship if numeric.len() >= 2 => {
                let mut config =
                    VisualizationConfig::new(ChartKind::Scatter, confidence).axes(&numeric[0], numeric.get(1));
                config.color = categorical.first().cloned();
                Some(config)
            }
            Intent::Composition if !numeric.is_empty() && !categorical.is_empty() => {
                if result.row_count() <= PIE_MAX_ROWS {
                    let mut config = VisualizationConfig::new(ChartKind::Pie, confidence);
                    config.names = Some(categorical[0].clone());
                    config.values = Some(numeric[0].clone());
                    Some(config)
                } else {
                    Some(VisualizationConfig::new(ChartKind::Bar, confidence).axes(&categorical[0], numeric.first()))
                }
            }
            _ => None,
        };

        chosen.unwrap_or_else(|| {
            let fallback = confidence * 0.5;
            if !numeric.is_empty() && !categorical.is_empty() {
                VisualizationConfig::new(ChartKind::Bar, fallback).axes(&categorical[0], numeric.first())
            } else if numeric.len() >= 2 {
                VisualizationConfig::new(ChartKind::Scatter, fallback).axes(&numeric[0], numeric.get(1))
            } else if numeric.len() == 1 {
                VisualizationConfig::new(ChartKind::Histogram, fallback).axes(&numeric[0], None)
            } else {
                VisualizationConfig::new(ChartKind::Table, fallback)
            }
        })
    }
}

impl Default for VisualizationSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn by_state(rows: usize) -> ResultSet {
        ResultSet::new(
            vec!["customer_state".into(), "revenue".into()],
            (0..rows)
                .map(|i| vec![json!(format!("S{}", i)), json!(100.0 + i as f64)])
                .collect(),
        )
    }

    #[test]
    fn test_single_cell_is_value() {
        let result = ResultSet::new(vec!["avg".into()], vec![vec![json!(154.1)]]);
        let config = VisualizationSelector::new().select(&result, "average transaction value");
        assert_eq!(config.kind, ChartKind::Value);
        assert_eq!(config.confidence, 1.0);
        assert_eq!(config.describe(), "value: 154.1");
    }

    #[test]
    fn test_temporal_question_gives_line() {
        let result = ResultSet::new(
            vec!["month".into(), "revenue".into()],
            vec![
                vec![json!("2018-01-01"), json!(10.0)],
                vec![json!("2018-02-01"), json!(12.5)],
            ],
        );
        let config = VisualizationSelector::new().select(
            &result,
            "show the monthly revenue trend\nSELECT date(order_date, 'start of month') AS month, SUM(payment_value) AS revenue FROM orders GROUP BY month",
        );
        assert_eq!(config.kind, ChartKind::Line);
        assert_eq!(config.x.as_deref(), Some("month"));
        assert_eq!(config.y.as_deref(), Some("revenue"));
        assert_eq!(config.confidence, 1.0);
    }

    #[test]
    fn test_comparison_gives_bar() {
        let config = VisualizationSelector::new().select(&by_state(5), "compare revenue by state");
        assert_eq!(config.kind, ChartKind::Bar);
        assert_eq!(config.x.as_deref(), Some("customer_state"));
        assert!(!config.is_low_confidence());
    }

    #[test]
    fn test_composition_pie_limited_to_ten_rows() {
        let selector = VisualizationSelector::new();
        let pie = selector.select(&by_state(10), "revenue breakdown by state");
        assert_eq!(pie.kind, ChartKind::Pie);
        assert_eq!(pie.names.as_deref(), Some("customer_state"));
        assert_eq!(pie.values.as_deref(), Some("revenue"));

        let bar = selector.select(&by_state(11), "revenue breakdown by state");
        assert_eq!(bar.kind, ChartKind::Bar);
    }

    #[test]
    fn test_unmet_intent_falls_back_with_halved_confidence() {
        // Temporal intent, but no date-like column
        let config = VisualizationSelector::new().select(&by_state(3), "revenue trend by state");
        assert_eq!(config.kind, ChartKind::Bar);
        assert_eq!(config.confidence, 0.5);
        assert!(config.describe().contains("low confidence: 50%"));
    }

    #[test]
    fn test_distribution_without_categories_is_histogram() {
        let result = ResultSet::new(
            vec!["payment_value".into()],
            vec![vec![json!(1.0)], vec![json!(2.0)], vec![json!(3.5)]],
        );
        let config = VisualizationSelector::new().select(&result, "distribution of payment values");
        assert_eq!(config.kind, ChartKind::Histogram);
        assert_eq!(config.x.as_deref(), Some("payment_value"));
    }

    #[test]
    fn test_intent_scores_are_normalised() {
        let scores = VisualizationSelector::new().analyze_intent("compare sales versus last year");
        let comparison = scores.iter().find(|(i, _)| *i == Intent::Comparison).unwrap().1;
        assert_eq!(comparison, 1.0);
        assert!(scores.iter().all(|(_, s)| *s <= 1.0));
    }
}
