//! Stream commands: XADD, XRANGE, XREAD
//!
//! XREAD with BLOCK cannot always answer immediately; it hands a block
//! request back to the executor, which the event loop turns into a parked
//! session woken by the next matching XADD or its timeout.

use super::{arg_str, arg_u64, ServerContext};
use crate::error::{CommandError, Result};
use crate::protocol::RespFrame;
use crate::storage::{AppendId, StreamEntry, StreamId};
use std::time::{Duration, Instant};

/// Result of XREAD parsing and the immediate read attempt
pub enum XreadOutcome {
    Reply(RespFrame),
    Block {
        keys: Vec<Vec<u8>>,
        after: Vec<StreamId>,
        deadline: Option<Instant>,
    },
}

/// XADD key id field value [field value ...]
///
/// Waiter notification happens here, at the append site, so a blocked
/// XREAD wakes whether the append came from a client, an EXEC drain or
/// the replication link.
pub fn xadd(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() < 5 || (parts.len() - 3) % 2 != 0 {
        return Err(CommandError::WrongNumberOfArgs("xadd".into()).into());
    }

    let id = parse_append_id(arg_str(parts, 2)?)?;
    let fields: Vec<(Vec<u8>, Vec<u8>)> = parts[3..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let assigned = ctx.store.xadd(&parts[1], id, fields)?;
    ctx.blocking.notify_key(&parts[1]);
    Ok(RespFrame::from_string(assigned.to_string()))
}

/// XRANGE key start end
pub fn xrange(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 4 {
        return Err(CommandError::WrongNumberOfArgs("xrange".into()).into());
    }

    let start = parse_bound(arg_str(parts, 2)?, true)?;
    let end = parse_bound(arg_str(parts, 3)?, false)?;

    let entries = ctx.store.xrange(&parts[1], start, end)?;
    Ok(entries_frame(&entries))
}

/// XREAD [BLOCK milliseconds] STREAMS key [key ...] id [id ...]
///
/// `allow_block` is false while EXEC drains a transaction queue; the read
/// then degrades to an immediate one.
pub fn xread(ctx: &ServerContext, parts: &[Vec<u8>], allow_block: bool) -> Result<XreadOutcome> {
    let mut i = 1;
    let mut block_ms: Option<u64> = None;

    while i < parts.len() {
        match arg_str(parts, i)?.to_ascii_uppercase().as_str() {
            "BLOCK" => {
                if i + 1 >= parts.len() {
                    return Err(CommandError::SyntaxError("BLOCK requires a value".into()).into());
                }
                block_ms = Some(arg_u64(parts, i + 1)?);
                i += 2;
            }
            "STREAMS" => {
                i += 1;
                break;
            }
            other => {
                return Err(CommandError::SyntaxError(format!("unexpected option '{}'", other)).into());
            }
        }
    }

    let rest = &parts[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CommandError::Generic(
            "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be provided."
                .into(),
        )
        .into());
    }

    let count = rest.len() / 2;
    let keys: Vec<Vec<u8>> = rest[..count].to_vec();
    let mut after = Vec::with_capacity(count);
    for (idx, id_part) in rest[count..].iter().enumerate() {
        let id_str = std::str::from_utf8(id_part)
            .map_err(|_| CommandError::SyntaxError("invalid UTF-8 argument".into()))?;
        let id = if id_str == "$" {
            // Resolved to the stream's last id at call time; only entries
            // appended after this command count
            ctx.store.stream_last_id(&keys[idx])?
        } else {
            parse_bound(id_str, true)?
        };
        after.push(id);
    }

    // Immediate attempt first
    let reply = read_streams(ctx, &keys, &after)?;
    if let Some(frame) = reply {
        return Ok(XreadOutcome::Reply(frame));
    }

    match block_ms {
        Some(ms) if allow_block => {
            let deadline = if ms == 0 {
                None
            } else {
                Some(Instant::now() + Duration::from_millis(ms))
            };
            Ok(XreadOutcome::Block { keys, after, deadline })
        }
        _ => Ok(XreadOutcome::Reply(RespFrame::null_array())),
    }
}

/// Read each stream past its id; None if no stream has new entries
pub fn read_streams(
    ctx: &ServerContext,
    keys: &[Vec<u8>],
    after: &[StreamId],
) -> Result<Option<RespFrame>> {
    let mut per_key = Vec::new();
    for (key, id) in keys.iter().zip(after.iter()) {
        let entries = ctx.store.xread_after(key, *id)?;
        if !entries.is_empty() {
            per_key.push((key.clone(), entries));
        }
    }
    if per_key.is_empty() {
        return Ok(None);
    }
    Ok(Some(xread_reply(per_key)))
}

/// Reply shape: array of [key, entries] pairs, keys without new entries
/// omitted
pub fn xread_reply(per_key: Vec<(Vec<u8>, Vec<StreamEntry>)>) -> RespFrame {
    let frames = per_key
        .into_iter()
        .map(|(key, entries)| {
            RespFrame::Array(Some(vec![RespFrame::bulk_string(key), entries_frame(&entries)]))
        })
        .collect();
    RespFrame::Array(Some(frames))
}

/// Entries as an array of [id, [field, value, ...]] pairs
fn entries_frame(entries: &[StreamEntry]) -> RespFrame {
    let frames = entries
        .iter()
        .map(|entry| {
            let mut flat = Vec::with_capacity(entry.fields.len() * 2);
            for (field, value) in &entry.fields {
                flat.push(RespFrame::bulk_string(field.clone()));
                flat.push(RespFrame::bulk_string(value.clone()));
            }
            RespFrame::Array(Some(vec![
                RespFrame::from_string(entry.id.to_string()),
                RespFrame::Array(Some(flat)),
            ]))
        })
        .collect();
    RespFrame::Array(Some(frames))
}

fn parse_append_id(s: &str) -> Result<AppendId> {
    if s == "*" {
        return Ok(AppendId::Auto);
    }
    if let Some(millis_str) = s.strip_suffix("-*") {
        let millis = millis_str
            .parse::<u64>()
            .map_err(|_| invalid_id())?;
        return Ok(AppendId::AtMillis(millis));
    }
    if s.contains('-') {
        return StreamId::from_string(s)
            .map(AppendId::Explicit)
            .ok_or_else(|| invalid_id().into());
    }
    // Bare millisecond: sequence auto-generated
    s.parse::<u64>()
        .map(AppendId::AtMillis)
        .map_err(|_| invalid_id().into())
}

fn parse_bound(s: &str, is_start: bool) -> Result<StreamId> {
    StreamId::parse_bound(s, is_start).ok_or_else(|| invalid_id().into())
}

fn invalid_id() -> CommandError {
    CommandError::InvalidStreamId("Invalid stream ID specified as stream command argument".into())
}
