use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub business_context: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Equivalent,
    Related,
    Derived,
    Component,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Equivalent => "equivalent",
            RelationKind::Related => "related",
            RelationKind::Derived => "derived",
            RelationKind::Component => "component",
        }
    }
}

/// A business-level link between two columns, written as `table.column`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticRelation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaMetadata {
    #[serde(default)]
    pub database: Option<String>,
    pub tables: Vec<TableMetadata>,
    #[serde(default)]
    pub semantic_relations: Vec<SemanticRelation>,
}

impl SchemaMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: SchemaMetadata = serde_json::from_str(json)
            .map_err(|e| ChatError::Metadata(format!("Invalid metadata JSON: {}", e)))?;
        metadata.check()?;
        Ok(metadata)
    }

    fn check(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(ChatError::Metadata("Metadata describes no tables".to_string()));
        }
        for table in &self.tables {
            for fk in &table.foreign_keys {
                if table.column(&fk.column).is_none() {
                    return Err(ChatError::Metadata(format!(
                        "Foreign key column {}.{} is not a column of {}",
                        table.name, fk.column, table.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    pub fn foreign_key_count(&self) -> usize {
        self.tables.iter().map(|t| t.foreign_keys.len()).sum()
    }

    /// Render as DDL-style text for prompts: one CREATE TABLE per table with
    /// descriptions and business context as comments.
    pub fn to_ddl(&self) -> String {
        let mut out = String::new();
        if let Some(db) = &self.database {
            let _ = writeln!(out, "-- Database: {}", db);
        }

        for table in &self.tables {
            if let Some(desc) = &table.description {
                let _ = writeln!(out, "-- {}", desc);
            }
            let _ = writeln!(out, "CREATE TABLE {} (", table.qualified_name());

            let mut lines: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    format!(
                        "    {} {} {}",
                        c.name,
                        c.data_type,
                        if c.nullable { "NULL" } else { "NOT NULL" }
                    )
                })
                .collect();

            if !table.primary_key.is_empty() {
                lines.push(format!("    PRIMARY KEY ({})", table.primary_key.join(", ")));
            }
            for fk in &table.foreign_keys {
                lines.push(format!(
                    "    FOREIGN KEY ({}) REFERENCES {} ({})",
                    fk.column, fk.references_table, fk.references_column
                ));
            }
            let _ = writeln!(out, "{}\n);", lines.join(",\n"));

            let described: Vec<&ColumnMetadata> = table
                .columns
                .iter()
                .filter(|c| c.description.is_some() || c.business_context.is_some() || !c.synonyms.is_empty())
                .collect();
            if !described.is_empty() {
                let _ = writeln!(out, "-- Column descriptions for {}", table.name);
                for column in described {
                    let mut note = column.description.clone().unwrap_or_default();
                    if let Some(ctx) = &column.business_context {
                        if !note.is_empty() {
                            note.push_str(" ");
                        }
                        let _ = write!(note, "(business context: {})", ctx);
                    }
                    if !column.synonyms.is_empty() {
                        let _ = write!(note, " [synonyms: {}]", column.synonyms.join(", "));
                    }
                    let _ = writeln!(out, "--   {}.{}: {}", table.name, column.name, note.trim());
                }
            }
            out.push('\n');
        }

        if !self.semantic_relations.is_empty() {
            let _ = writeln!(out, "-- Semantic relations");
            for rel in &self.semantic_relations {
                let _ = writeln!(out, "--   {} -[{}]-> {}", rel.from, rel.kind.as_str(), rel.to);
            }
        }

        out.trim_end().to_string()
    }
}

/// The schema description handed to the assistant. Structured JSON enables
/// graph mode; free text (a DDL dump, notes) is passed to prompts as-is.
#[derive(Debug, Clone)]
pub enum MetadataDocument {
    Structured(SchemaMetadata),
    Text(String),
}

impl MetadataDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Metadata(format!("Failed to read metadata {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(MetadataDocument::Structured(SchemaMetadata::from_json(&content)?))
        } else if content.trim().is_empty() {
            Err(ChatError::Metadata(format!("Metadata file {} is empty", path.display())))
        } else {
            Ok(MetadataDocument::Text(content))
        }
    }

    pub fn structured(&self) -> Option<&SchemaMetadata> {
        match self {
            MetadataDocument::Structured(m) => Some(m),
            MetadataDocument::Text(_) => None,
        }
    }

    pub fn prompt_text(&self) -> String {
        match self {
            MetadataDocument::Structured(m) => m.to_ddl(),
            MetadataDocument::Text(t) => t.trim().to_string(),
        }
    }
}
