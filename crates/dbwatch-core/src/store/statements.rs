//! Closed set of statements the core store runs.
//!
//! Every hot query is a variant here, so the prepared-statement cache is
//! bounded by `Statement::ALL.len()` and nothing builds SQL at runtime.

/// Column list shared by every registry SELECT, in `ManagedDatabaseRecord::from_row` order.
macro_rules! record_columns {
    () => {
        "id, path, name, size, status, created_at, last_modified, last_checked"
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    UpsertConfig,
    SeedConfig,
    SelectConfig,
    InsertDatabase,
    ResurrectDatabase,
    SelectDatabaseByPath,
    ListDatabases,
    ListActiveDatabases,
    CountDatabases,
    UpdateDatabase,
    MarkRemoved,
}

impl Statement {
    pub const ALL: &'static [Statement] = &[
        Statement::UpsertConfig,
        Statement::SeedConfig,
        Statement::SelectConfig,
        Statement::InsertDatabase,
        Statement::ResurrectDatabase,
        Statement::SelectDatabaseByPath,
        Statement::ListDatabases,
        Statement::ListActiveDatabases,
        Statement::CountDatabases,
        Statement::UpdateDatabase,
        Statement::MarkRemoved,
    ];

    pub fn sql(self) -> &'static str {
        match self {
            Statement::UpsertConfig => {
                "INSERT INTO system_config (config_key, config_value, last_modified)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(config_key) DO UPDATE SET
                     config_value = excluded.config_value,
                     last_modified = excluded.last_modified"
            }
            Statement::SeedConfig => {
                "INSERT OR IGNORE INTO system_config (config_key, config_value, last_modified)
                 VALUES (?1, ?2, ?3)"
            }
            Statement::SelectConfig => {
                "SELECT config_value FROM system_config WHERE config_key = ?1"
            }
            Statement::InsertDatabase => {
                "INSERT INTO managed_databases
                     (path, name, size, status, created_at, last_modified, last_checked)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?4, ?4)"
            }
            Statement::ResurrectDatabase => {
                "UPDATE managed_databases
                 SET name = ?2, size = ?3, status = 'active', last_modified = ?4, last_checked = ?4
                 WHERE path = ?1 AND status = 'removed'"
            }
            Statement::SelectDatabaseByPath => concat!(
                "SELECT ",
                record_columns!(),
                " FROM managed_databases WHERE path = ?1"
            ),
            Statement::ListDatabases => concat!(
                "SELECT ",
                record_columns!(),
                " FROM managed_databases WHERE status != 'removed'",
                " ORDER BY last_modified DESC, id DESC"
            ),
            Statement::ListActiveDatabases => concat!(
                "SELECT ",
                record_columns!(),
                " FROM managed_databases WHERE status = 'active' ORDER BY id"
            ),
            Statement::CountDatabases => {
                "SELECT COUNT(*) FROM managed_databases WHERE status != 'removed'"
            }
            Statement::UpdateDatabase => {
                "UPDATE managed_databases
                 SET size = COALESCE(?2, size),
                     status = COALESCE(?3, status),
                     last_checked = COALESCE(?4, last_checked),
                     last_modified = ?5
                 WHERE path = ?1"
            }
            Statement::MarkRemoved => {
                "UPDATE managed_databases SET status = 'removed', last_modified = ?2 WHERE path = ?1"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_all_lists_every_statement_once() {
        let unique: HashSet<_> = Statement::ALL.iter().collect();
        assert_eq!(unique.len(), Statement::ALL.len());
    }

    #[test]
    fn test_select_statements_share_column_list() {
        for stmt in [
            Statement::SelectDatabaseByPath,
            Statement::ListDatabases,
            Statement::ListActiveDatabases,
        ] {
            assert!(stmt.sql().starts_with(concat!("SELECT ", record_columns!())));
        }
    }
}
