//! Statement tags and the CommandComplete text derived from them.

/// The categories of statement tag the connection treats differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    CreateTableAs,
    Move,
    Fetch,
    Copy,
    Show,
    ShowTables,
    Explain,
    Other,
}

impl StatementKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "SELECT" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "MERGE" => StatementKind::Merge,
            "CREATE TABLE AS" => StatementKind::CreateTableAs,
            "MOVE" => StatementKind::Move,
            "FETCH" => StatementKind::Fetch,
            "COPY" => StatementKind::Copy,
            "SHOW" => StatementKind::Show,
            "SHOW TABLES" => StatementKind::ShowTables,
            "EXPLAIN" => StatementKind::Explain,
            _ => StatementKind::Other,
        }
    }

    /// Whether the statement sends a RowDescription and DataRows.
    pub fn returns_rows(self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Show
                | StatementKind::ShowTables
                | StatementKind::Fetch
                | StatementKind::Explain
        )
    }

    /// Whether the CommandComplete tag carries a row count.
    pub fn has_row_count(self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::Merge
                | StatementKind::CreateTableAs
                | StatementKind::Move
                | StatementKind::Fetch
                | StatementKind::Copy
        )
    }
}

/// Builds the CommandComplete tag for a finished statement.
///
/// `INSERT` keeps the historical zero OID column: `INSERT 0 <rows>`.
pub fn command_complete_tag(tag: &str, rows: u64) -> String {
    let kind = StatementKind::from_tag(tag);
    if !kind.has_row_count() {
        return tag.to_string();
    }
    match kind {
        StatementKind::Insert => format!("INSERT 0 {rows}"),
        _ => format!("{tag} {rows}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(StatementKind::from_tag("SELECT").returns_rows());
        assert!(StatementKind::from_tag("SHOW").returns_rows());
        assert!(StatementKind::from_tag("EXPLAIN").returns_rows());
        assert!(!StatementKind::from_tag("INSERT").returns_rows());
        assert!(!StatementKind::from_tag("CREATE TABLE").returns_rows());
        assert!(!StatementKind::from_tag("").returns_rows());
    }

    #[test]
    fn test_command_complete_tag() {
        assert_eq!(command_complete_tag("INSERT", 3), "INSERT 0 3");
        assert_eq!(command_complete_tag("SELECT", 0), "SELECT 0");
        assert_eq!(command_complete_tag("DELETE", 7), "DELETE 7");
        assert_eq!(command_complete_tag("COPY", 2), "COPY 2");
        assert_eq!(command_complete_tag("CREATE TABLE", 0), "CREATE TABLE");
        assert_eq!(command_complete_tag("BEGIN", 0), "BEGIN");
        assert_eq!(command_complete_tag("SHOW", 1), "SHOW");
    }
}
