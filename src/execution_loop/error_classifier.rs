//! Error Classifier
//!
//! Classifies database driver errors so the correction prompt can point the
//! completion service at the likely fix.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    SyntaxError,
    InvalidAggregation,
    TypeMismatch,
    Other,
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            SqlErrorClass::TableNotFound => write!(f, "TableNotFound"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::SyntaxError => write!(f, "SyntaxError"),
            SqlErrorClass::InvalidAggregation => write!(f, "InvalidAggregation"),
            SqlErrorClass::TypeMismatch => write!(f, "TypeMismatch"),
            SqlErrorClass::Other => write!(f, "Other"),
        }
    }
}

impl SqlErrorClass {
    /// One-line instruction appended to the correction prompt.
    pub fn hint(&self) -> &'static str {
        match self {
            SqlErrorClass::ColumnNotFound => {
                "A referenced column does not exist. Use only column names listed in the schema."
            }
            SqlErrorClass::TableNotFound => {
                "A referenced table does not exist. Use only table names listed in the schema."
            }
            SqlErrorClass::AmbiguousColumn => {
                "A column name is ambiguous. Qualify every column with its table alias."
            }
            SqlErrorClass::SyntaxError => {
                "The statement does not parse. Check the syntax against the target dialect."
            }
            SqlErrorClass::InvalidAggregation => {
                "Aggregates and GROUP BY do not line up. Group by every non-aggregated column."
            }
            SqlErrorClass::TypeMismatch => {
                "Operand types do not match. Cast values to compatible types."
            }
            SqlErrorClass::Other => "Rewrite the query so that it runs on the target database.",
        }
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a driver message. Covers SQLite, PostgreSQL and SQL Server wording.
    pub fn classify(&self, driver_message: &str) -> SqlErrorClass {
        let msg = driver_message.to_lowercase();

        if msg.contains("ambiguous") && msg.contains("column") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if msg.contains("no such column")
            || msg.contains("invalid column name")
            || (msg.contains("column") && (msg.contains("does not exist") || msg.contains("not found")))
        {
            return SqlErrorClass::ColumnNotFound;
        }

        if msg.contains("no such table")
            || msg.contains("invalid object name")
            || ((msg.contains("table") || msg.contains("relation"))
                && (msg.contains("does not exist") || msg.contains("not found")))
        {
            return SqlErrorClass::TableNotFound;
        }

        if msg.contains("group by") || msg.contains("aggregate") || msg.contains("misuse of aggregate") {
            return SqlErrorClass::InvalidAggregation;
        }

        if msg.contains("syntax error") || msg.contains("incorrect syntax") || msg.contains("near \"") {
            return SqlErrorClass::SyntaxError;
        }

        if msg.contains("operator does not exist")
            || msg.contains("conversion failed")
            || msg.contains("invalid input syntax")
            || msg.contains("datatype mismatch")
        {
            return SqlErrorClass::TypeMismatch;
        }

        SqlErrorClass::Other
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
