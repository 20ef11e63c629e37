//! Schema Graph
//!
//! In-memory graph over structured metadata. Nodes are tables and columns;
//! edges are table-has-column, column foreign keys and semantic relations.
//! Used to pick the part of the schema a question is about.

use crate::error::{ChatError, Result};
use crate::metadata::{ColumnMetadata, RelationKind, SchemaMetadata, TableMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does",
    "each", "for", "from", "give", "had", "has", "have", "how", "i", "in", "is", "it", "list",
    "many", "me", "much", "my", "of", "on", "or", "our", "per", "show", "tell", "than", "that",
    "the", "their", "there", "these", "this", "to", "was", "we", "were", "what", "when", "where",
    "which", "who", "with", "you",
];

const NAME_WEIGHT: f64 = 3.0;
const SYNONYM_WEIGHT: f64 = 2.0;
const BUSINESS_CONTEXT_WEIGHT: f64 = 1.5;
const DESCRIPTION_WEIGHT: f64 = 1.0;
const TABLE_NAME_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse `table.column` (a leading schema is ignored).
    fn parse(reference: &str) -> Option<Self> {
        let (table, column) = reference.rsplit_once('.')?;
        let table = table.rsplit('.').next().unwrap_or(table);
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ForeignKey,
    Semantic(RelationKind),
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::ForeignKey => "foreign_key",
            EdgeKind::Semantic(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: ColumnRef,
    pub to: ColumnRef,
    pub kind: EdgeKind,
}

/// A column scored against the question.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnMatch {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub score: f64,
    pub matched_terms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedColumn {
    pub from: String,
    pub to: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStep {
    pub from: String,
    pub to: String,
    pub on: String,
}

/// The slice of the schema relevant to one question.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphContext {
    pub question_terms: Vec<String>,
    pub matches: Vec<ColumnMatch>,
    pub tables: Vec<TableSummary>,
    pub related_columns: Vec<RelatedColumn>,
    pub join_paths: Vec<Vec<JoinStep>>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn to_prompt_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStat {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: usize,
}

/// Counts fed to the graph-mode database summary.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub table_count: usize,
    pub total_columns: usize,
    pub total_relationships: usize,
    pub tables: Vec<TableStat>,
    pub relationships: BTreeMap<String, usize>,
}

pub struct SchemaGraph {
    metadata: SchemaMetadata,
    edges: Vec<GraphEdge>,
}

impl SchemaGraph {
    /// Build the graph. Semantic relations must point at known columns.
    pub fn build(metadata: &SchemaMetadata) -> Result<Self> {
        let mut edges = Vec::new();

        for table in &metadata.tables {
            for fk in &table.foreign_keys {
                let target = metadata.table(&fk.references_table).ok_or_else(|| {
                    ChatError::Graph(format!(
                        "Foreign key {}.{} references unknown table {}",
                        table.name, fk.column, fk.references_table
                    ))
                })?;
                edges.push(GraphEdge {
                    from: ColumnRef::new(&table.name, &fk.column),
                    to: ColumnRef::new(&target.name, &fk.references_column),
                    kind: EdgeKind::ForeignKey,
                });
            }
        }

        for relation in &metadata.semantic_relations {
            let from = resolve(metadata, &relation.from)?;
            let to = resolve(metadata, &relation.to)?;
            edges.push(GraphEdge {
                from,
                to,
                kind: EdgeKind::Semantic(relation.kind),
            });
        }

        debug!(
            "Built schema graph: {} tables, {} columns, {} edges",
            metadata.tables.len(),
            metadata.column_count(),
            edges.len()
        );

        Ok(Self {
            metadata: metadata.clone(),
            edges,
        })
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn stats(&self) -> GraphStats {
        let mut relationships = BTreeMap::new();
        for edge in &self.edges {
            *relationships.entry(edge.kind.label().to_string()).or_insert(0) += 1;
        }

        GraphStats {
            table_count: self.metadata.tables.len(),
            total_columns: self.metadata.column_count(),
            total_relationships: self.edges.len(),
            tables: self
                .metadata
                .tables
                .iter()
                .map(|t| TableStat {
                    name: t.name.clone(),
                    schema: t.schema.clone(),
                    columns: t.columns.len(),
                })
                .collect(),
            relationships,
        }
    }

    /// Score every column against the question and keep the best `top_k`,
    /// with their tables, neighbouring columns and join paths between them.
    pub fn relevant_context(&self, question: &str, top_k: usize) -> GraphContext {
        let terms = tokenize(question);
        if terms.is_empty() {
            return GraphContext::default();
        }

        let terms_ref = &terms;
        let mut matches: Vec<ColumnMatch> = self
            .metadata
            .tables
            .iter()
            .flat_map(|table| {
                table
                    .columns
                    .iter()
                    .filter_map(move |column| score_column(table, column, terms_ref))
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.table.cmp(&b.table))
                .then_with(|| a.column.cmp(&b.column))
        });
        matches.truncate(top_k);

        let mut table_names: Vec<String> = Vec::new();
        for m in &matches {
            if !table_names.contains(&m.table) {
                table_names.push(m.table.clone());
            }
        }

        let tables = table_names
            .iter()
            .filter_map(|name| self.metadata.table(name))
            .map(|t| TableSummary {
                name: t.name.clone(),
                description: t.description.clone(),
                primary_key: t.primary_key.clone(),
            })
            .collect();

        let hits: HashSet<ColumnRef> = matches
            .iter()
            .map(|m| ColumnRef::new(&m.table, &m.column))
            .collect();
        let related_columns = self
            .edges
            .iter()
            .filter(|e| hits.contains(&e.from) || hits.contains(&e.to))
            .map(|e| RelatedColumn {
                from: e.from.to_string(),
                to: e.to.to_string(),
                relationship: e.kind.label().to_string(),
            })
            .collect();

        let join_paths = match table_names.split_first() {
            Some((anchor, others)) => others
                .iter()
                .filter_map(|other| self.find_join_path(anchor, other))
                .filter(|path| !path.is_empty())
                .collect(),
            None => Vec::new(),
        };

        GraphContext {
            question_terms: terms,
            matches,
            tables,
            related_columns,
            join_paths,
        }
    }

    /// Shortest chain of foreign-key joins between two tables, in either
    /// direction.
    pub fn find_join_path(&self, from: &str, to: &str) -> Option<Vec<JoinStep>> {
        let from = self.metadata.table(from)?.name.clone();
        let to = self.metadata.table(to)?.name.clone();

        let mut adjacency: HashMap<&str, Vec<(&str, String)>> = HashMap::new();
        for edge in self.edges.iter().filter(|e| e.kind == EdgeKind::ForeignKey) {
            let on = format!("{} = {}", edge.from, edge.to);
            adjacency
                .entry(edge.from.table.as_str())
                .or_default()
                .push((edge.to.table.as_str(), on.clone()));
            adjacency
                .entry(edge.to.table.as_str())
                .or_default()
                .push((edge.from.table.as_str(), on));
        }

        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        queue.push_back((from.as_str(), Vec::new()));
        visited.insert(from.as_str());

        while let Some((current, path)) = queue.pop_front() {
            if current == to {
                return Some(path);
            }
            for (next, on) in adjacency.get(current).into_iter().flatten() {
                let next: &str = next;
                if visited.insert(next) {
                    let mut next_path = path.clone();
                    next_path.push(JoinStep {
                        from: current.to_string(),
                        to: next.to_string(),
                        on: on.clone(),
                    });
                    queue.push_back((next, next_path));
                }
            }
        }

        None
    }
}

fn resolve(metadata: &SchemaMetadata, reference: &str) -> Result<ColumnRef> {
    let parsed = ColumnRef::parse(reference)
        .ok_or_else(|| ChatError::Graph(format!("Malformed column reference: {}", reference)))?;
    let table = metadata
        .table(&parsed.table)
        .ok_or_else(|| ChatError::Graph(format!("Unknown table in relation: {}", reference)))?;
    let column = table
        .column(&parsed.column)
        .ok_or_else(|| ChatError::Graph(format!("Unknown column in relation: {}", reference)))?;
    Ok(ColumnRef::new(&table.name, &column.name))
}

fn normalize(word: &str) -> String {
    let word = word.to_lowercase();
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(normalize)
}

/// Lower-case, de-pluralised question words with stop words removed.
pub fn tokenize(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .map(normalize)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn score_column(table: &TableMetadata, column: &ColumnMetadata, terms: &[String]) -> Option<ColumnMatch> {
    let name_words: HashSet<String> = words(&column.name).collect();
    let table_words: HashSet<String> = words(&table.name).collect();
    let synonym_words: HashSet<String> = column.synonyms.iter().flat_map(|s| words(s)).collect();
    let description_words: HashSet<String> = column.description.iter().flat_map(|d| words(d)).collect();
    let context_words: HashSet<String> = column.business_context.iter().flat_map(|c| words(c)).collect();

    let mut score = 0.0;
    let mut matched_terms = Vec::new();
    for term in terms {
        let mut term_score = 0.0;
        if name_words.contains(term) {
            term_score += NAME_WEIGHT;
        }
        if synonym_words.contains(term) {
            term_score += SYNONYM_WEIGHT;
        }
        if context_words.contains(term) {
            term_score += BUSINESS_CONTEXT_WEIGHT;
        }
        if description_words.contains(term) {
            term_score += DESCRIPTION_WEIGHT;
        }
        if term_score > 0.0 {
            matched_terms.push(term.clone());
        }
        if table_words.contains(term) {
            term_score += TABLE_NAME_WEIGHT;
        }
        score += term_score;
    }

    // Table-name hits alone do not make a column relevant
    if matched_terms.is_empty() {
        return None;
    }

    Some(ColumnMatch {
        table: table.name.clone(),
        column: column.name.clone(),
        data_type: column.data_type.clone(),
        score,
        matched_terms,
        description: column.description.clone(),
        business_context: column.business_context.clone(),
    })
}
