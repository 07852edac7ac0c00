//! Storage write-guard policy
//!
//! DDL that makes persisted ledger rows write-once. UPDATE is always
//! rejected. [`DeletePolicy::Block`] adds a DELETE guard; `Allow` installs
//! nothing and never removes a guard already in place, so a database that
//! was ever opened with `Block` stays guarded. Without a guard, deletions
//! surface in chain verification as sequence gaps.

use serde::{Deserialize, Serialize};

pub const LEDGER_TABLE: &str = "ledger_entries";

/// Initial SQLite schema for the ledger table
pub const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger_entries.sql");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    #[default]
    Allow,
    Block,
}

impl DeletePolicy {
    pub fn from_flag(block_delete: bool) -> Self {
        if block_delete {
            DeletePolicy::Block
        } else {
            DeletePolicy::Allow
        }
    }
}

/// Statements enforcing immutability of the ledger table, in execution order
pub fn immutability_sql(dialect: Dialect, delete: DeletePolicy) -> Vec<String> {
    match dialect {
        Dialect::Sqlite => sqlite_statements(delete),
        Dialect::Postgres => postgres_statements(delete),
    }
}

fn sqlite_statements(delete: DeletePolicy) -> Vec<String> {
    let mut statements = vec![format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_no_update \
         BEFORE UPDATE ON {table} \
         BEGIN \
             SELECT RAISE(ABORT, 'Ledger entries are immutable and cannot be updated'); \
         END;",
        table = LEDGER_TABLE
    )];

    if delete == DeletePolicy::Block {
        statements.push(format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_no_delete \
             BEFORE DELETE ON {table} \
             BEGIN \
                 SELECT RAISE(ABORT, 'Ledger entries cannot be deleted'); \
             END;",
            table = LEDGER_TABLE
        ));
    }

    statements
}

fn postgres_statements(delete: DeletePolicy) -> Vec<String> {
    let mut statements = vec![
        r#"
        CREATE OR REPLACE FUNCTION prevent_ledger_entry_update()
        RETURNS TRIGGER AS $$
        BEGIN
            RAISE EXCEPTION 'Ledger entries are immutable and cannot be updated. '
                'Attempted to modify entry: %', OLD.id;
        END;
        $$ LANGUAGE plpgsql;
        "#
        .to_string(),
        format!(
            "DROP TRIGGER IF EXISTS {table}_no_update ON {table};\n\
             CREATE TRIGGER {table}_no_update\n\
             BEFORE UPDATE ON {table}\n\
             FOR EACH ROW\n\
             EXECUTE FUNCTION prevent_ledger_entry_update();",
            table = LEDGER_TABLE
        ),
    ];

    if delete == DeletePolicy::Block {
        statements.push(
            r#"
        CREATE OR REPLACE FUNCTION prevent_ledger_entry_delete()
        RETURNS TRIGGER AS $$
        BEGIN
            RAISE EXCEPTION 'Ledger entries cannot be deleted. Entry: %', OLD.id;
        END;
        $$ LANGUAGE plpgsql;
        "#
            .to_string(),
        );
        statements.push(format!(
            "DROP TRIGGER IF EXISTS {table}_no_delete ON {table};\n\
             CREATE TRIGGER {table}_no_delete\n\
             BEFORE DELETE ON {table}\n\
             FOR EACH ROW\n\
             EXECUTE FUNCTION prevent_ledger_entry_delete();",
            table = LEDGER_TABLE
        ));
    }

    statements
}
