//! Transaction commands: MULTI, EXEC, DISCARD
//!
//! MULTI flips the session into queuing mode; later commands are stored
//! verbatim and answered with +QUEUED. EXEC drains the queue through the
//! normal dispatch path, so writes inside the transaction propagate to
//! replicas exactly as they would outside one.

use super::{executor, CommandOutcome, ServerContext, Session, TxnState};
use crate::error::{CommandError, Result};
use crate::protocol::RespFrame;

pub fn multi(session: &mut Session) -> Result<RespFrame> {
    if session.in_transaction() {
        return Err(CommandError::InvalidState("MULTI calls can not be nested".into()).into());
    }
    session.txn = TxnState::Queuing(Vec::new());
    Ok(RespFrame::ok())
}

pub fn discard(session: &mut Session) -> Result<RespFrame> {
    match session.txn {
        TxnState::Queuing(_) => {
            session.txn = TxnState::Idle;
            Ok(RespFrame::ok())
        }
        _ => Err(CommandError::InvalidState("DISCARD without MULTI".into()).into()),
    }
}

pub fn exec(ctx: &ServerContext, session: &mut Session) -> Result<RespFrame> {
    let queued = match std::mem::take(&mut session.txn) {
        TxnState::Queuing(queued) => queued,
        other => {
            session.txn = other;
            return Err(CommandError::InvalidState("EXEC without MULTI".into()).into());
        }
    };

    session.txn = TxnState::Executing;
    let mut replies = Vec::with_capacity(queued.len());
    for parts in queued {
        let frame = match executor::execute_parts(ctx, session, parts) {
            Ok(CommandOutcome::Reply(frame)) => frame,
            Ok(_) => RespFrame::error("ERR command not allowed in transactions"),
            Err(err) => {
                session.txn = TxnState::Idle;
                return Err(err);
            }
        };
        replies.push(frame);
    }
    session.txn = TxnState::Idle;

    Ok(RespFrame::Array(Some(replies)))
}

#[cfg(test)]
mod tests {
    use crate::commands::testutil::{assert_error_contains, assert_ok, run, test_context};
    use crate::commands::Session;
    use crate::network::StreamWaiter;
    use crate::protocol::RespFrame;
    use crate::storage::StreamId;

    #[test]
    fn test_queue_and_exec() {
        let ctx = test_context();
        let mut session = Session::new(1);

        assert_ok(&run(&ctx, &mut session, &["MULTI"]));
        assert_eq!(
            run(&ctx, &mut session, &["SET", "k", "v"]),
            RespFrame::simple_string("QUEUED")
        );
        assert_eq!(
            run(&ctx, &mut session, &["INCR", "n"]),
            RespFrame::simple_string("QUEUED")
        );

        // Nothing executed yet
        assert_eq!(ctx.store.get(b"k").unwrap(), None);

        let reply = run(&ctx, &mut session, &["EXEC"]);
        match reply {
            RespFrame::Array(Some(replies)) => {
                assert_eq!(replies.len(), 2);
                assert_eq!(replies[0], RespFrame::ok());
                assert_eq!(replies[1], RespFrame::Integer(1));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(ctx.store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_exec_leaves_no_queued_state() {
        let ctx = test_context();
        let mut session = Session::new(1);

        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["SET", "a", "1"]);
        run(&ctx, &mut session, &["INCR", "a"]);

        match run(&ctx, &mut session, &["EXEC"]) {
            RespFrame::Array(Some(replies)) => {
                assert_eq!(replies.len(), 2);
                assert_eq!(replies[1], RespFrame::Integer(2));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        // The next command executes immediately instead of queueing
        assert_eq!(run(&ctx, &mut session, &["GET", "a"]), RespFrame::from_string("2"));
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_exec_empty_transaction() {
        let ctx = test_context();
        let mut session = Session::new(1);
        run(&ctx, &mut session, &["MULTI"]);
        assert_eq!(run(&ctx, &mut session, &["EXEC"]), RespFrame::Array(Some(vec![])));
    }

    #[test]
    fn test_exec_without_multi() {
        let ctx = test_context();
        let mut session = Session::new(1);
        assert_error_contains(&run(&ctx, &mut session, &["EXEC"]), "EXEC without MULTI");
    }

    #[test]
    fn test_discard() {
        let ctx = test_context();
        let mut session = Session::new(1);

        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["SET", "k", "v"]);
        assert_ok(&run(&ctx, &mut session, &["DISCARD"]));

        assert_eq!(ctx.store.get(b"k").unwrap(), None);
        assert_error_contains(&run(&ctx, &mut session, &["DISCARD"]), "DISCARD without MULTI");
    }

    #[test]
    fn test_nested_multi_rejected() {
        let ctx = test_context();
        let mut session = Session::new(1);
        run(&ctx, &mut session, &["MULTI"]);
        assert_error_contains(&run(&ctx, &mut session, &["MULTI"]), "can not be nested");
    }

    #[test]
    fn test_errors_inside_exec_do_not_abort() {
        let ctx = test_context();
        let mut session = Session::new(1);
        run(&ctx, &mut session, &["SET", "s", "text"]);

        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["INCR", "s"]);
        run(&ctx, &mut session, &["SET", "after", "1"]);

        let reply = run(&ctx, &mut session, &["EXEC"]);
        match reply {
            RespFrame::Array(Some(replies)) => {
                assert!(matches!(replies[0], RespFrame::Error(_)));
                assert_eq!(replies[1], RespFrame::ok());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(ctx.store.get(b"after").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_blocking_read_degrades_inside_exec() {
        let ctx = test_context();
        let mut session = Session::new(1);

        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["XREAD", "BLOCK", "0", "STREAMS", "s", "$"]);

        let reply = run(&ctx, &mut session, &["EXEC"]);
        match reply {
            RespFrame::Array(Some(replies)) => {
                assert_eq!(replies[0], RespFrame::null_array());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_xadd_inside_exec_wakes_blocked_readers() {
        let ctx = test_context();
        ctx.blocking.register(StreamWaiter {
            conn_id: 7,
            keys: vec![b"q".to_vec()],
            after: vec![StreamId::zero()],
            deadline: None,
        });

        let mut session = Session::new(1);
        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["XADD", "q", "7-7", "job", "run"]);
        run(&ctx, &mut session, &["EXEC"]);

        let wakeups = ctx.blocking.process_wakeups();
        assert_eq!(wakeups.len(), 1);
        assert_eq!(wakeups[0].conn_id, 7);
    }

    #[test]
    fn test_writes_inside_exec_propagate() {
        let ctx = test_context();
        let replica = ctx.repl.register_replica(99, "peer".to_string());
        let mut session = Session::new(1);

        run(&ctx, &mut session, &["MULTI"]);
        run(&ctx, &mut session, &["SET", "a", "1"]);
        run(&ctx, &mut session, &["SET", "b", "2"]);
        assert!(replica.take_outbox().is_empty());

        run(&ctx, &mut session, &["EXEC"]);
        let sent = replica.take_outbox();
        let text = String::from_utf8_lossy(&sent);
        assert_eq!(text.matches("SET").count(), 2);
    }
}
