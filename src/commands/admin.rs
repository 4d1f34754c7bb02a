//! Administration and replication control commands:
//! REPLCONF, PSYNC, WAIT, CONFIG GET, INFO

use super::{arg_str, arg_u64, CommandOutcome, ServerContext, Session, TxnState};
use crate::error::{CommandError, Result};
use crate::protocol::RespFrame;
use std::time::{Duration, Instant};

/// REPLCONF, as seen by a master. Handshake subcommands are acknowledged;
/// ACK carries a replica's processed offset and gets no reply.
pub fn replconf(ctx: &ServerContext, session: &Session, parts: &[Vec<u8>]) -> Result<CommandOutcome> {
    if parts.len() < 2 {
        return Err(CommandError::WrongNumberOfArgs("replconf".into()).into());
    }

    match arg_str(parts, 1)?.to_ascii_uppercase().as_str() {
        "LISTENING-PORT" | "CAPA" => Ok(CommandOutcome::Reply(RespFrame::ok())),
        "ACK" => {
            if parts.len() != 3 {
                return Err(CommandError::WrongNumberOfArgs("replconf".into()).into());
            }
            let offset = arg_u64(parts, 2)?;
            ctx.repl.record_ack(session.id, offset);
            Ok(CommandOutcome::NoReply)
        }
        "GETACK" => {
            // Only ever sent master-to-replica; the replica link answers it
            Err(CommandError::Generic("GETACK is only valid on a replica link".into()).into())
        }
        other => Err(CommandError::SyntaxError(format!("unknown REPLCONF option '{}'", other)).into()),
    }
}

/// PSYNC ? -1: the connection becomes a replica. The event loop sends
/// FULLRESYNC and the snapshot, then registers the replica handle.
pub fn psync(parts: &[Vec<u8>]) -> Result<CommandOutcome> {
    if parts.len() != 3 {
        return Err(CommandError::WrongNumberOfArgs("psync".into()).into());
    }
    Ok(CommandOutcome::BeginReplicaSync)
}

/// WAIT numreplicas timeout-ms.
///
/// Answers immediately when the quorum is already met or no replicas are
/// asked for; otherwise the session parks and the event loop probes
/// replicas with GETACK until the quorum or the deadline is reached. A
/// timeout of 0 waits forever. Inside EXEC the wait degrades to an
/// immediate count.
pub fn wait(ctx: &ServerContext, session: &Session, parts: &[Vec<u8>]) -> Result<CommandOutcome> {
    if parts.len() != 3 {
        return Err(CommandError::WrongNumberOfArgs("wait".into()).into());
    }
    let needed = arg_u64(parts, 1)? as usize;
    let timeout_ms = arg_u64(parts, 2)?;

    let caught_up = ctx.repl.caught_up_count();
    if needed == 0 || caught_up >= needed || matches!(session.txn, TxnState::Executing) {
        return Ok(CommandOutcome::Reply(RespFrame::Integer(caught_up as i64)));
    }

    let deadline = if timeout_ms == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms))
    };
    Ok(CommandOutcome::Wait { needed, deadline })
}

/// CONFIG GET parameter. Only dir and dbfilename are exposed.
pub fn config_get(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 3 {
        return Err(CommandError::WrongNumberOfArgs("config".into()).into());
    }
    if !arg_str(parts, 1)?.eq_ignore_ascii_case("GET") {
        return Err(CommandError::SyntaxError("only CONFIG GET is supported".into()).into());
    }

    let param = arg_str(parts, 2)?.to_ascii_lowercase();
    let value = match param.as_str() {
        "dir" => Some(ctx.config.dir.clone()),
        "dbfilename" => Some(ctx.config.dbfilename.clone()),
        _ => None,
    };

    let frames = match value {
        Some(value) => vec![RespFrame::from_string(param), RespFrame::from_string(value)],
        None => Vec::new(),
    };
    Ok(RespFrame::Array(Some(frames)))
}

/// INFO [section]. Only the replication section is populated.
pub fn info(ctx: &ServerContext, _parts: &[Vec<u8>]) -> Result<RespFrame> {
    Ok(RespFrame::from_string(ctx.repl.info()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::{assert_error_contains, assert_ok, run, test_context};
    use crate::commands::{execute_parts, testutil};

    #[test]
    fn test_replconf_handshake_acknowledged() {
        let ctx = test_context();
        let mut session = Session::new(1);
        assert_ok(&run(&ctx, &mut session, &["REPLCONF", "listening-port", "6380"]));
        assert_ok(&run(&ctx, &mut session, &["REPLCONF", "capa", "psync2"]));
    }

    #[test]
    fn test_replconf_ack_records_offset_silently() {
        let ctx = test_context();
        let replica = ctx.repl.register_replica(1, "peer".to_string());
        replica.queue_bytes(&[0u8; 88]);

        let mut session = Session::new(1);
        let outcome = execute_parts(
            &ctx,
            &mut session,
            testutil::parts(&["REPLCONF", "ACK", "88"]),
        )
        .unwrap();

        assert!(matches!(outcome, CommandOutcome::NoReply));
        assert_eq!(replica.acked_bytes(), 88);
        assert!(replica.is_caught_up());
    }

    #[test]
    fn test_psync_starts_replica_sync() {
        let ctx = test_context();
        let mut session = Session::new(1);
        let outcome = execute_parts(&ctx, &mut session, testutil::parts(&["PSYNC", "?", "-1"])).unwrap();
        assert!(matches!(outcome, CommandOutcome::BeginReplicaSync));
    }

    #[test]
    fn test_wait_zero_replicas_immediate() {
        let ctx = test_context();
        let mut session = Session::new(1);
        assert_eq!(run(&ctx, &mut session, &["WAIT", "0", "100"]), RespFrame::Integer(0));
    }

    #[test]
    fn test_wait_satisfied_quorum_immediate() {
        let ctx = test_context();
        ctx.repl.register_replica(2, "a".to_string());
        ctx.repl.register_replica(3, "b".to_string());

        let mut session = Session::new(1);
        assert_eq!(run(&ctx, &mut session, &["WAIT", "2", "100"]), RespFrame::Integer(2));
    }

    #[test]
    fn test_wait_parks_when_replicas_lag() {
        let ctx = test_context();
        let replica = ctx.repl.register_replica(2, "a".to_string());
        replica.queue_bytes(&[0u8; 10]);

        let mut session = Session::new(1);
        let outcome =
            execute_parts(&ctx, &mut session, testutil::parts(&["WAIT", "1", "500"])).unwrap();
        match outcome {
            CommandOutcome::Wait { needed, deadline } => {
                assert_eq!(needed, 1);
                assert!(deadline.is_some());
            }
            other => panic!("expected wait outcome, got {:?}", other),
        }

        let outcome =
            execute_parts(&ctx, &mut session, testutil::parts(&["WAIT", "1", "0"])).unwrap();
        assert!(matches!(outcome, CommandOutcome::Wait { deadline: None, .. }));
    }

    #[test]
    fn test_config_get() {
        let ctx = test_context();
        let mut session = Session::new(1);

        let reply = run(&ctx, &mut session, &["CONFIG", "GET", "dbfilename"]);
        match reply {
            RespFrame::Array(Some(pair)) => {
                assert_eq!(pair[0].as_bytes(), Some(b"dbfilename".as_ref()));
                assert_eq!(pair[1].as_bytes(), Some(b"dump.rdb".as_ref()));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        let reply = run(&ctx, &mut session, &["CONFIG", "GET", "maxmemory"]);
        assert_eq!(reply, RespFrame::Array(Some(vec![])));

        assert_error_contains(
            &run(&ctx, &mut session, &["CONFIG", "SET", "dir"]),
            "only CONFIG GET",
        );
    }

    #[test]
    fn test_info_replication() {
        let ctx = test_context();
        let mut session = Session::new(1);
        let reply = run(&ctx, &mut session, &["INFO", "replication"]);
        let text = String::from_utf8_lossy(reply.as_bytes().unwrap()).to_string();
        assert!(text.contains("role:master"));
        assert!(text.contains("master_replid:"));
    }
}
