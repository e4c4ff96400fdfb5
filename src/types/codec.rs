//! Canonical binary codec for every wire type.
//!
//! One deterministic layout per type: fixed field order, big-endian length
//! prefixes, no optional skipping. Every message that is hashed or signed
//! is re-encoded through this path, and decoding rejects trailing bytes so
//! a frame cannot smuggle extra data past the hash.

use crate::types::{
    Address, Block, BlockHeader, EvidenceKind, Hash, Proposal, QuorumCertificate,
    SlashingEvidence, TimeoutMessage, Vote,
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected eof")]
    Eof,
    #[error("trailing bytes after message")]
    TrailingBytes,
    #[error("invalid data: {0}")]
    Invalid(&'static str),
}

pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_bytes64(&mut self, v: &[u8; 64]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_vec(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Eof);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_bytes32(&mut self) -> Result<[u8; 32], CodecError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn get_bytes64(&mut self) -> Result<[u8; 64], CodecError> {
        let b = self.take(64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn get_vec(&mut self) -> Result<Vec<u8>, CodecError> {
        let n = self.get_u32()? as usize;
        Ok(self.take(n)?.to_vec())
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.data.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}

// ---- BlockHeader ----

fn put_block_header(e: &mut Encoder, h: &BlockHeader) {
    e.put_u64(h.height);
    e.put_u64(h.round);
    e.put_bytes32(&h.parent_hash.0);
    e.put_bytes32(&h.state_root.0);
    e.put_bytes32(&h.tx_root.0);
    e.put_bytes32(&h.proposer_id.0);
    e.put_u64(h.block_time);
    e.put_vec(&h.chain_id);
    e.put_bytes32(&h.block_hash.0);
}

fn get_block_header(d: &mut Decoder<'_>) -> Result<BlockHeader, CodecError> {
    Ok(BlockHeader {
        height: d.get_u64()?,
        round: d.get_u64()?,
        parent_hash: Hash(d.get_bytes32()?),
        state_root: Hash(d.get_bytes32()?),
        tx_root: Hash(d.get_bytes32()?),
        proposer_id: Address(d.get_bytes32()?),
        block_time: d.get_u64()?,
        chain_id: d.get_vec()?,
        block_hash: Hash(d.get_bytes32()?),
    })
}

// ---- Vote ----

fn put_vote(e: &mut Encoder, v: &Vote) {
    e.put_bytes32(&v.block_hash.0);
    e.put_u64(v.height);
    e.put_u64(v.round);
    e.put_bytes32(&v.voter_id.0);
    e.put_bytes64(&v.signature);
}

fn get_vote(d: &mut Decoder<'_>) -> Result<Vote, CodecError> {
    Ok(Vote {
        block_hash: Hash(d.get_bytes32()?),
        height: d.get_u64()?,
        round: d.get_u64()?,
        voter_id: Address(d.get_bytes32()?),
        signature: d.get_bytes64()?,
    })
}

pub fn encode_vote(v: &Vote) -> Vec<u8> {
    let mut e = Encoder::new();
    put_vote(&mut e, v);
    e.into_bytes()
}

pub fn decode_vote(data: &[u8]) -> Result<Vote, CodecError> {
    let mut d = Decoder::new(data);
    let v = get_vote(&mut d)?;
    d.finish()?;
    Ok(v)
}

// ---- QuorumCertificate ----

fn put_qc(e: &mut Encoder, qc: &QuorumCertificate) {
    e.put_bytes32(&qc.block_hash.0);
    e.put_u64(qc.round);
    e.put_u32(qc.votes.len() as u32);
    for v in &qc.votes {
        put_vote(e, v);
    }
}

fn get_qc(d: &mut Decoder<'_>) -> Result<QuorumCertificate, CodecError> {
    let block_hash = Hash(d.get_bytes32()?);
    let round = d.get_u64()?;
    let n = d.get_u32()? as usize;
    let mut votes = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        votes.push(get_vote(d)?);
    }
    Ok(QuorumCertificate { block_hash, round, votes })
}

fn put_opt_qc(e: &mut Encoder, qc: &Option<QuorumCertificate>) {
    match qc {
        None => e.put_u8(0),
        Some(qc) => {
            e.put_u8(1);
            put_qc(e, qc);
        }
    }
}

fn get_opt_qc(d: &mut Decoder<'_>) -> Result<Option<QuorumCertificate>, CodecError> {
    match d.get_u8()? {
        0 => Ok(None),
        1 => Ok(Some(get_qc(d)?)),
        _ => Err(CodecError::Invalid("bad option tag")),
    }
}

pub fn encode_qc(qc: &QuorumCertificate) -> Vec<u8> {
    let mut e = Encoder::new();
    put_qc(&mut e, qc);
    e.into_bytes()
}

pub fn decode_qc(data: &[u8]) -> Result<QuorumCertificate, CodecError> {
    let mut d = Decoder::new(data);
    let qc = get_qc(&mut d)?;
    d.finish()?;
    Ok(qc)
}

// ---- Block ----

fn put_block(e: &mut Encoder, b: &Block) {
    put_block_header(e, &b.header);
    e.put_u32(b.transactions.len() as u32);
    for tx in &b.transactions {
        e.put_vec(tx);
    }
    put_opt_qc(e, &b.qc);
}

fn get_block(d: &mut Decoder<'_>) -> Result<Block, CodecError> {
    let header = get_block_header(d)?;
    let n = d.get_u32()? as usize;
    let mut transactions = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        transactions.push(d.get_vec()?);
    }
    let qc = get_opt_qc(d)?;
    Ok(Block { header, transactions, qc })
}

pub fn encode_block(b: &Block) -> Vec<u8> {
    let mut e = Encoder::new();
    put_block(&mut e, b);
    e.into_bytes()
}

pub fn decode_block(data: &[u8]) -> Result<Block, CodecError> {
    let mut d = Decoder::new(data);
    let b = get_block(&mut d)?;
    d.finish()?;
    Ok(b)
}

// ---- Proposal ----

pub fn encode_proposal(p: &Proposal) -> Vec<u8> {
    let mut e = Encoder::new();
    put_block(&mut e, &p.block);
    e.put_u64(p.round);
    e.put_bytes32(&p.proposer_id.0);
    e.put_bytes64(&p.signature);
    e.into_bytes()
}

pub fn decode_proposal(data: &[u8]) -> Result<Proposal, CodecError> {
    let mut d = Decoder::new(data);
    let block = get_block(&mut d)?;
    let round = d.get_u64()?;
    let proposer_id = Address(d.get_bytes32()?);
    let signature = d.get_bytes64()?;
    d.finish()?;
    Ok(Proposal { block, round, proposer_id, signature })
}

// ---- TimeoutMessage ----

pub fn encode_timeout(tm: &TimeoutMessage) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_u64(tm.height);
    e.put_u64(tm.round);
    e.put_bytes32(&tm.voter_id.0);
    e.put_bytes64(&tm.signature);
    put_opt_qc(&mut e, &tm.high_qc);
    e.into_bytes()
}

pub fn decode_timeout(data: &[u8]) -> Result<TimeoutMessage, CodecError> {
    let mut d = Decoder::new(data);
    let tm = TimeoutMessage {
        height: d.get_u64()?,
        round: d.get_u64()?,
        voter_id: Address(d.get_bytes32()?),
        signature: d.get_bytes64()?,
        high_qc: get_opt_qc(&mut d)?,
    };
    d.finish()?;
    Ok(tm)
}

// ---- SlashingEvidence ----

const EVIDENCE_DOUBLE_VOTE: u8 = 1;
const EVIDENCE_DOUBLE_PROPOSAL: u8 = 2;

pub fn encode_evidence(ev: &SlashingEvidence) -> Vec<u8> {
    let mut e = Encoder::new();
    match &ev.kind {
        EvidenceKind::DoubleVote { vote_a, vote_b, validator_id } => {
            e.put_u8(EVIDENCE_DOUBLE_VOTE);
            put_vote(&mut e, vote_a);
            put_vote(&mut e, vote_b);
            e.put_bytes32(&validator_id.0);
        }
        EvidenceKind::DoubleProposal { proposal_a, proposal_b, validator_id } => {
            e.put_u8(EVIDENCE_DOUBLE_PROPOSAL);
            e.put_vec(&encode_proposal(proposal_a));
            e.put_vec(&encode_proposal(proposal_b));
            e.put_bytes32(&validator_id.0);
        }
    }
    e.put_u64(ev.height);
    e.put_u64(ev.timestamp);
    e.into_bytes()
}

pub fn decode_evidence(data: &[u8]) -> Result<SlashingEvidence, CodecError> {
    let mut d = Decoder::new(data);
    let kind = match d.get_u8()? {
        EVIDENCE_DOUBLE_VOTE => {
            let vote_a = get_vote(&mut d)?;
            let vote_b = get_vote(&mut d)?;
            let validator_id = Address(d.get_bytes32()?);
            EvidenceKind::DoubleVote { vote_a, vote_b, validator_id }
        }
        EVIDENCE_DOUBLE_PROPOSAL => {
            let a = d.get_vec()?;
            let b = d.get_vec()?;
            let validator_id = Address(d.get_bytes32()?);
            EvidenceKind::DoubleProposal {
                proposal_a: Box::new(decode_proposal(&a)?),
                proposal_b: Box::new(decode_proposal(&b)?),
                validator_id,
            }
        }
        _ => return Err(CodecError::Invalid("unknown evidence kind")),
    };
    let height = d.get_u64()?;
    let timestamp = d.get_u64()?;
    d.finish()?;
    Ok(SlashingEvidence { kind, height, timestamp })
}

// ---- Transport frames ----

/// Wire frame tag: one byte prefix on every gossiped payload.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Proposal = 0x01,
    Vote = 0x02,
    Timeout = 0x03,
}

impl FrameType {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => FrameType::Proposal,
            0x02 => FrameType::Vote,
            0x03 => FrameType::Timeout,
            _ => return None,
        })
    }
}

/// A decoded inbound consensus message.
#[derive(Clone, Debug)]
pub enum WireMessage {
    Proposal(Proposal),
    Vote(Vote),
    Timeout(TimeoutMessage),
}

pub fn encode_frame(msg: &WireMessage) -> Vec<u8> {
    let (tag, payload) = match msg {
        WireMessage::Proposal(p) => (FrameType::Proposal, encode_proposal(p)),
        WireMessage::Vote(v) => (FrameType::Vote, encode_vote(v)),
        WireMessage::Timeout(tm) => (FrameType::Timeout, encode_timeout(tm)),
    };
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag as u8);
    out.extend_from_slice(&payload);
    out
}

pub fn decode_frame(data: &[u8]) -> Result<WireMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Eof);
    }
    let tag = FrameType::from_u8(data[0]).ok_or(CodecError::Invalid("unknown frame type"))?;
    let payload = &data[1..];
    Ok(match tag {
        FrameType::Proposal => WireMessage::Proposal(decode_proposal(payload)?),
        FrameType::Vote => WireMessage::Vote(decode_vote(payload)?),
        FrameType::Timeout => WireMessage::Timeout(decode_timeout(payload)?),
    })
}
