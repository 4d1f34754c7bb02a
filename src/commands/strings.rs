//! String and key commands: PING, ECHO, SET, GET, INCR, DEL, TYPE, KEYS

use super::{arg_str, arg_u64, ServerContext};
use crate::error::{CommandError, Result};
use crate::protocol::RespFrame;

pub fn ping(parts: &[Vec<u8>]) -> Result<RespFrame> {
    match parts.len() {
        1 => Ok(RespFrame::simple_string("PONG")),
        2 => Ok(RespFrame::bulk_string(parts[1].clone())),
        _ => Err(CommandError::WrongNumberOfArgs("ping".into()).into()),
    }
}

pub fn echo(parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 2 {
        return Err(CommandError::WrongNumberOfArgs("echo".into()).into());
    }
    Ok(RespFrame::bulk_string(parts[1].clone()))
}

/// SET key value [PX milliseconds] [EX seconds]
pub fn set(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() < 3 {
        return Err(CommandError::WrongNumberOfArgs("set".into()).into());
    }

    let mut ttl_ms: Option<u64> = None;
    let mut i = 3;
    while i < parts.len() {
        match arg_str(parts, i)?.to_ascii_uppercase().as_str() {
            "PX" => {
                if i + 1 >= parts.len() {
                    return Err(CommandError::SyntaxError("PX requires a value".into()).into());
                }
                ttl_ms = Some(arg_u64(parts, i + 1)?);
                i += 2;
            }
            "EX" => {
                if i + 1 >= parts.len() {
                    return Err(CommandError::SyntaxError("EX requires a value".into()).into());
                }
                ttl_ms = Some(arg_u64(parts, i + 1)? * 1000);
                i += 2;
            }
            other => {
                return Err(CommandError::SyntaxError(format!("unexpected option '{}'", other)).into());
            }
        }
    }

    ctx.store.set(parts[1].clone(), parts[2].clone(), ttl_ms)?;
    Ok(RespFrame::ok())
}

pub fn get(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 2 {
        return Err(CommandError::WrongNumberOfArgs("get".into()).into());
    }
    match ctx.store.get(&parts[1])? {
        Some(value) => Ok(RespFrame::bulk_string(value)),
        None => Ok(RespFrame::null_bulk()),
    }
}

pub fn incr(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 2 {
        return Err(CommandError::WrongNumberOfArgs("incr".into()).into());
    }
    Ok(RespFrame::Integer(ctx.store.incr(&parts[1])?))
}

pub fn del(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() < 2 {
        return Err(CommandError::WrongNumberOfArgs("del".into()).into());
    }
    Ok(RespFrame::Integer(ctx.store.del(&parts[1..])?))
}

/// TYPE key. Missing keys report "none".
pub fn type_of(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 2 {
        return Err(CommandError::WrongNumberOfArgs("type".into()).into());
    }
    let name = match ctx.store.value_type(&parts[1])? {
        Some(vt) => vt.name(),
        None => "none",
    };
    Ok(RespFrame::simple_string(name))
}

/// KEYS pattern. Only the `*` pattern is supported.
pub fn keys(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 2 {
        return Err(CommandError::WrongNumberOfArgs("keys".into()).into());
    }
    if parts[1] != b"*" {
        return Err(CommandError::SyntaxError("only the '*' pattern is supported".into()).into());
    }
    let frames = ctx
        .store
        .keys()?
        .into_iter()
        .map(RespFrame::bulk_string)
        .collect();
    Ok(RespFrame::Array(Some(frames)))
}
