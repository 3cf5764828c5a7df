// pgbackuptool/src/engine/mod.rs
pub(crate) mod docker;

pub use docker::DockerEngine;

use std::io::Write;
use std::path::Path;

use crate::errors::Result;

/// What a single dump operation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    /// One logical database, dumped with pg_dump.
    Database(String),
    /// The whole cluster, dumped with pg_dumpall.
    Cluster,
}

impl DumpTarget {
    /// Name used in artifact filenames and reports.
    pub fn label(&self) -> &str {
        match self {
            DumpTarget::Database(name) => name,
            DumpTarget::Cluster => crate::catalog::CLUSTER_SCOPE,
        }
    }
}

/// Dump variants supported by the backup executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    Full,
    SchemaOnly,
    TableSubset(Vec<String>),
}

/// The process boundary to the database engine. Everything the workflows
/// need from PostgreSQL goes through these six operations; how they are
/// carried out (which tool, which flags) is the implementation's concern.
pub trait DatabaseEngine {
    /// Runs a dump for `target` in the requested `mode`, streaming the raw
    /// (uncompressed) dump bytes into `sink`.
    fn dump(&self, target: &DumpTarget, mode: &BackupMode, sink: &mut dyn Write) -> Result<()>;

    /// Replays a decompressed artifact into `database`. Plain `.sql` bodies
    /// go through psql, custom-format `.backup` bodies through pg_restore.
    fn replay(&self, database: &str, artifact_path: &Path) -> Result<()>;

    /// Lists all non-template, connectable databases on the server.
    fn list_databases(&self) -> Result<Vec<String>>;

    fn database_exists(&self, database: &str) -> Result<bool>;

    fn create_database(&self, database: &str) -> Result<()>;

    /// Terminates every other session on `database` so a restore does not
    /// trip over open locks.
    fn terminate_sessions(&self, database: &str) -> Result<()>;
}

/// Database identifiers end up embedded in shell arguments and SQL
/// statements, so only a conservative character set is accepted.
pub fn is_valid_database_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name
            .contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
}

/// Table references may additionally be schema-qualified.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name
            .contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '.')
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_name_validation() {
        assert!(is_valid_database_name("shop"));
        assert!(is_valid_database_name("shop_2024"));
        assert!(is_valid_database_name("hotel-prod"));
        assert!(!is_valid_database_name(""));
        assert!(!is_valid_database_name("  "));
        assert!(!is_valid_database_name("shop;drop"));
        assert!(!is_valid_database_name("shop prod"));
        assert!(!is_valid_database_name("shop'--"));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("orders"));
        assert!(is_valid_table_name("public.orders"));
        assert!(!is_valid_table_name("orders; --"));
        assert!(!is_valid_table_name(""));
    }

    #[test]
    fn test_dump_target_label() {
        assert_eq!(DumpTarget::Database("shop".into()).label(), "shop");
        assert_eq!(DumpTarget::Cluster.label(), "ALL");
    }
}
