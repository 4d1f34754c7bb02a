//! List commands: RPUSH, LRANGE

use super::{arg_i64, ServerContext};
use crate::error::{CommandError, Result};
use crate::protocol::RespFrame;

pub fn rpush(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() < 3 {
        return Err(CommandError::WrongNumberOfArgs("rpush".into()).into());
    }
    let values: Vec<Vec<u8>> = parts[2..].to_vec();
    Ok(RespFrame::Integer(ctx.store.rpush(&parts[1], values)?))
}

pub fn lrange(ctx: &ServerContext, parts: &[Vec<u8>]) -> Result<RespFrame> {
    if parts.len() != 4 {
        return Err(CommandError::WrongNumberOfArgs("lrange".into()).into());
    }
    let start = arg_i64(parts, 2)?;
    let stop = arg_i64(parts, 3)?;

    let frames = ctx
        .store
        .lrange(&parts[1], start, stop)?
        .into_iter()
        .map(RespFrame::bulk_string)
        .collect();
    Ok(RespFrame::Array(Some(frames)))
}
