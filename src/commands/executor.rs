//! Command dispatch
//!
//! Resolves the verb, enforces MULTI queuing, runs the handler and fans
//! successful writes out to replicas. Command-level failures become error
//! replies; protocol-level failures propagate and kill the connection.

use super::{
    admin, frame_to_parts, lists, lookup_command, streams, strings, transactions, verb_of,
    CommandKind, CommandOutcome, ServerContext, Session, TxnState,
};
use crate::error::{CommandError, Result, RubidiumError};
use crate::protocol::RespFrame;
use crate::replication::Role;

/// Dispatch a client command frame
pub fn execute(ctx: &ServerContext, session: &mut Session, frame: &RespFrame) -> Result<CommandOutcome> {
    let parts = frame_to_parts(frame)?;
    execute_parts(ctx, session, parts)
}

/// Dispatch a command already flattened into its arguments
pub fn execute_parts(
    ctx: &ServerContext,
    session: &mut Session,
    parts: Vec<Vec<u8>>,
) -> Result<CommandOutcome> {
    match dispatch(ctx, session, parts) {
        Ok(outcome) => Ok(outcome),
        Err(RubidiumError::Command(err)) => {
            Ok(CommandOutcome::Reply(RespFrame::error(err.to_string())))
        }
        Err(RubidiumError::Storage(err)) => {
            Ok(CommandOutcome::Reply(RespFrame::error(format!("ERR {}", err))))
        }
        Err(fatal) => Err(fatal),
    }
}

/// Apply a command received over the replication link. Only writes touch
/// the keyspace; everything else on the link merely advances the offset.
pub fn apply_replicated(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<()> {
    match verb_of(parts).as_str() {
        "SET" => strings::set(ctx, parts).map(|_| ()),
        "DEL" => strings::del(ctx, parts).map(|_| ()),
        "INCR" => strings::incr(ctx, parts).map(|_| ()),
        "RPUSH" => lists::rpush(ctx, parts).map(|_| ()),
        "XADD" => streams::xadd(ctx, parts).map(|_| ()),
        _ => Ok(()),
    }
}

fn dispatch(
    ctx: &ServerContext,
    session: &mut Session,
    parts: Vec<Vec<u8>>,
) -> Result<CommandOutcome> {
    let verb = verb_of(&parts);
    let kind = lookup_command(&verb)
        .ok_or_else(|| CommandError::UnknownCommand(String::from_utf8_lossy(&parts[0]).to_string()))?;

    // Inside MULTI everything except transaction control queues
    if session.in_transaction() && !matches!(verb.as_str(), "MULTI" | "EXEC" | "DISCARD") {
        if let TxnState::Queuing(queue) = &mut session.txn {
            queue.push(parts);
        }
        return Ok(CommandOutcome::Reply(RespFrame::simple_string("QUEUED")));
    }

    let outcome = match verb.as_str() {
        "PING" => CommandOutcome::Reply(strings::ping(&parts)?),
        "ECHO" => CommandOutcome::Reply(strings::echo(&parts)?),
        "SET" => CommandOutcome::Reply(strings::set(ctx, &parts)?),
        "GET" => CommandOutcome::Reply(strings::get(ctx, &parts)?),
        "INCR" => CommandOutcome::Reply(strings::incr(ctx, &parts)?),
        "DEL" => CommandOutcome::Reply(strings::del(ctx, &parts)?),
        "TYPE" => CommandOutcome::Reply(strings::type_of(ctx, &parts)?),
        "KEYS" => CommandOutcome::Reply(strings::keys(ctx, &parts)?),

        "RPUSH" => CommandOutcome::Reply(lists::rpush(ctx, &parts)?),
        "LRANGE" => CommandOutcome::Reply(lists::lrange(ctx, &parts)?),

        "XADD" => CommandOutcome::Reply(streams::xadd(ctx, &parts)?),
        "XRANGE" => CommandOutcome::Reply(streams::xrange(ctx, &parts)?),
        "XREAD" => {
            let allow_block = !matches!(session.txn, TxnState::Executing);
            match streams::xread(ctx, &parts, allow_block)? {
                streams::XreadOutcome::Reply(frame) => CommandOutcome::Reply(frame),
                streams::XreadOutcome::Block { keys, after, deadline } => {
                    CommandOutcome::BlockXread { keys, after, deadline }
                }
            }
        }

        "MULTI" => CommandOutcome::Reply(transactions::multi(session)?),
        "EXEC" => CommandOutcome::Reply(transactions::exec(ctx, session)?),
        "DISCARD" => CommandOutcome::Reply(transactions::discard(session)?),

        "REPLCONF" => admin::replconf(ctx, session, &parts)?,
        "PSYNC" => admin::psync(&parts)?,
        "WAIT" => admin::wait(ctx, session, &parts)?,
        "CONFIG" => CommandOutcome::Reply(admin::config_get(ctx, &parts)?),
        "INFO" => CommandOutcome::Reply(admin::info(ctx, &parts)?),

        _ => return Err(CommandError::UnknownCommand(verb).into()),
    };

    // Successful writes fan out to replicas as the original command
    if kind == CommandKind::Write && *ctx.repl.role() == Role::Master {
        if let CommandOutcome::Reply(reply) = &outcome {
            if !matches!(reply, RespFrame::Error(_)) {
                ctx.repl.propagate(&parts_frame(&parts));
            }
        }
    }

    Ok(outcome)
}

/// Re-encode command arguments as a RESP array of bulk strings
fn parts_frame(parts: &[Vec<u8>]) -> RespFrame {
    RespFrame::Array(Some(
        parts.iter().map(|p| RespFrame::bulk_string(p.clone())).collect(),
    ))
}
