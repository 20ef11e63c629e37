pub mod result;

pub use result::{format_cell, ColumnKind, ResultSet};
