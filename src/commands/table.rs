//! Command table
//!
//! A static map from verb to command classification, consulted before
//! dispatch. Writes are the commands that get propagated to replicas.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Classification of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Reads or computes, never mutates the keyspace
    Read,

    /// Mutates the keyspace; propagated to replicas on success
    Write,

    /// Server administration and replication control
    Admin,
}

lazy_static! {
    static ref COMMAND_TABLE: HashMap<&'static str, CommandKind> = {
        let mut table = HashMap::new();

        table.insert("PING", CommandKind::Read);
        table.insert("ECHO", CommandKind::Read);
        table.insert("GET", CommandKind::Read);
        table.insert("TYPE", CommandKind::Read);
        table.insert("KEYS", CommandKind::Read);
        table.insert("LRANGE", CommandKind::Read);
        table.insert("XRANGE", CommandKind::Read);
        table.insert("XREAD", CommandKind::Read);

        table.insert("SET", CommandKind::Write);
        table.insert("DEL", CommandKind::Write);
        table.insert("INCR", CommandKind::Write);
        table.insert("RPUSH", CommandKind::Write);
        table.insert("XADD", CommandKind::Write);

        table.insert("MULTI", CommandKind::Admin);
        table.insert("EXEC", CommandKind::Admin);
        table.insert("DISCARD", CommandKind::Admin);
        table.insert("REPLCONF", CommandKind::Admin);
        table.insert("PSYNC", CommandKind::Admin);
        table.insert("WAIT", CommandKind::Admin);
        table.insert("CONFIG", CommandKind::Admin);
        table.insert("INFO", CommandKind::Admin);

        table
    };
}

/// Look up a verb; None means the command is unknown
pub fn lookup_command(verb: &str) -> Option<CommandKind> {
    COMMAND_TABLE.get(verb).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup_command("SET"), Some(CommandKind::Write));
        assert_eq!(lookup_command("GET"), Some(CommandKind::Read));
        assert_eq!(lookup_command("PSYNC"), Some(CommandKind::Admin));
        assert_eq!(lookup_command("FLUSHALL"), None);
    }

    #[test]
    fn test_all_writes_classified() {
        for verb in ["SET", "DEL", "INCR", "RPUSH", "XADD"] {
            assert_eq!(lookup_command(verb), Some(CommandKind::Write));
        }
    }
}
