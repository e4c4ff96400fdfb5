//! Canonical encoding of the request/response/context structs that cross
//! the sandbox boundary. Same deterministic layout rules as the consensus
//! codec: fixed field order, big-endian prefixes, no trailing bytes.

use crate::execution::types::{
    Event, EventAttribute, ExecutionContext, ExecutionLimits, ExecutionRequest,
    ExecutionResponse, ExecutionStatus, LogLine, Receipt,
};
use crate::types::codec::{CodecError, Decoder, Encoder};
use crate::types::Hash;

fn put_opt_hash(e: &mut Encoder, h: &Option<Hash>) {
    match h {
        None => e.put_u8(0),
        Some(h) => {
            e.put_u8(1);
            e.put_bytes32(&h.0);
        }
    }
}

fn get_opt_hash(d: &mut Decoder<'_>) -> Result<Option<Hash>, CodecError> {
    match d.get_u8()? {
        0 => Ok(None),
        1 => Ok(Some(Hash(d.get_bytes32()?))),
        _ => Err(CodecError::Invalid("bad option tag")),
    }
}

fn get_string(d: &mut Decoder<'_>) -> Result<String, CodecError> {
    String::from_utf8(d.get_vec()?).map_err(|_| CodecError::Invalid("non-utf8 string"))
}

pub fn encode_request(req: &ExecutionRequest) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u32(req.api_version);
    e.put_vec(&req.chain_id);
    e.put_u64(req.block_height);
    e.put_u64(req.block_time);
    e.put_bytes32(&req.block_hash.0);
    e.put_bytes32(&req.prev_state_root.0);
    e.put_u32(req.transactions.len() as u32);
    for tx in &req.transactions {
        e.put_vec(tx);
    }
    e.put_u64(req.limits.gas_limit);
    e.put_u32(req.limits.max_events);
    e.put_u32(req.limits.max_write_bytes);
    put_opt_hash(&mut e, &req.execution_seed);
    e.into_bytes()
}

pub fn decode_request(data: &[u8]) -> Result<ExecutionRequest, CodecError> {
    let mut d = Decoder::new(data);
    let api_version = d.get_u32()?;
    let chain_id = d.get_vec()?;
    let block_height = d.get_u64()?;
    let block_time = d.get_u64()?;
    let block_hash = Hash(d.get_bytes32()?);
    let prev_state_root = Hash(d.get_bytes32()?);
    let n = d.get_u32()? as usize;
    let mut transactions = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        transactions.push(d.get_vec()?);
    }
    let limits = ExecutionLimits {
        gas_limit: d.get_u64()?,
        max_events: d.get_u32()?,
        max_write_bytes: d.get_u32()?,
    };
    let execution_seed = get_opt_hash(&mut d)?;
    d.finish()?;
    Ok(ExecutionRequest {
        api_version,
        chain_id,
        block_height,
        block_time,
        block_hash,
        prev_state_root,
        transactions,
        limits,
        execution_seed,
    })
}

fn put_event(e: &mut Encoder, ev: &Event) {
    e.put_u32(ev.tx_index);
    e.put_vec(ev.event_type.as_bytes());
    e.put_u32(ev.attributes.len() as u32);
    for attr in &ev.attributes {
        e.put_vec(attr.key.as_bytes());
        e.put_vec(&attr.value);
    }
}

fn get_event(d: &mut Decoder<'_>) -> Result<Event, CodecError> {
    let tx_index = d.get_u32()?;
    let event_type = get_string(d)?;
    let n = d.get_u32()? as usize;
    let mut attributes = Vec::with_capacity(n.min(256));
    for _ in 0..n {
        attributes.push(EventAttribute { key: get_string(d)?, value: d.get_vec()? });
    }
    Ok(Event { tx_index, event_type, attributes })
}

/// Decode one event as emitted by the guest through `emit_event`.
pub fn decode_single_event(data: &[u8]) -> Result<Event, CodecError> {
    let mut d = Decoder::new(data);
    let ev = get_event(&mut d)?;
    d.finish()?;
    Ok(ev)
}

pub fn encode_response(resp: &ExecutionResponse) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u32(resp.api_version);
    e.put_u8(resp.status as u8);
    e.put_bytes32(&resp.new_state_root.0);
    e.put_u64(resp.gas_used);
    e.put_u32(resp.receipts.len() as u32);
    for r in &resp.receipts {
        e.put_u32(r.tx_index);
        e.put_u8(u8::from(r.success));
        e.put_u64(r.gas_used);
        e.put_u32(r.result_code);
        e.put_vec(&r.return_data);
    }
    e.put_u32(resp.events.len() as u32);
    for ev in &resp.events {
        put_event(&mut e, ev);
    }
    e.put_u32(resp.logs.len() as u32);
    for l in &resp.logs {
        e.put_u32(l.level);
        e.put_vec(l.message.as_bytes());
    }
    e.into_bytes()
}

pub fn decode_response(data: &[u8]) -> Result<ExecutionResponse, CodecError> {
    let mut d = Decoder::new(data);
    let api_version = d.get_u32()?;
    let status = ExecutionStatus::from_u8(d.get_u8()?)
        .ok_or(CodecError::Invalid("unknown execution status"))?;
    let new_state_root = Hash(d.get_bytes32()?);
    let gas_used = d.get_u64()?;

    let n = d.get_u32()? as usize;
    let mut receipts = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        receipts.push(Receipt {
            tx_index: d.get_u32()?,
            success: d.get_u8()? != 0,
            gas_used: d.get_u64()?,
            result_code: d.get_u32()?,
            return_data: d.get_vec()?,
        });
    }

    let n = d.get_u32()? as usize;
    let mut events = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        events.push(get_event(&mut d)?);
    }

    let n = d.get_u32()? as usize;
    let mut logs = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        logs.push(LogLine { level: d.get_u32()?, message: get_string(&mut d)? });
    }

    d.finish()?;
    Ok(ExecutionResponse {
        api_version,
        status,
        new_state_root,
        gas_used,
        receipts,
        events,
        logs,
    })
}

pub fn encode_context(ctx: &ExecutionContext) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_vec(&ctx.chain_id);
    e.put_u64(ctx.block_height);
    e.put_u64(ctx.block_time);
    e.put_bytes32(&ctx.block_hash.0);
    e.put_u64(ctx.gas_limit);
    e.put_u32(ctx.max_events);
    e.put_u32(ctx.max_write_bytes);
    e.put_u32(ctx.api_version);
    put_opt_hash(&mut e, &ctx.execution_seed);
    e.into_bytes()
}
