//! The key-issuance wire protocol.
//!
//! Message-oriented, over an authenticated stream. Each frame is a
//! fixed-width 8-byte ASCII-decimal header (space padded) declaring the
//! payload byte length, followed by a UTF-8 command or response string.
//! Commands are `§`-separated fields prefixed with the authority tag;
//! `!DISCONNECT` ends the session.

use std::io::{Read, Write};

use tessera_core::{AuthorityId, ProcessInstanceId, ReaderGid};
use tessera_policy::PartialKey;
use tessera_zk::{Proof, PublicSignals};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 8;
pub const DISCONNECT_MESSAGE: &str = "!DISCONNECT";
const FIELD_SEPARATOR: char = '§';
/// Upper bound on a single frame; proofs and partial keys are small.
const MAX_FRAME_LEN: usize = 1 << 20;

const CMD_START_HANDSHAKE: &str = "Start handshake";
const CMD_GENERATE_KEY: &str = "Generate your part of my key";
const CMD_ZK_GENERATE_KEY: &str = "ZK-Generate your part of my key";

const RSP_NUMBER_TO_SIGN: &str = "Number to sign: ";
const RSP_PARTIAL_KEY: &str = "Here is my partial key: ";
const RSP_ERROR: &str = "Error: ";

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(stream: &mut W, message: &str) -> Result<(), ProtocolError> {
    let bytes = message.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(bytes.len()));
    }
    let header = format!("{:<width$}", bytes.len(), width = HEADER_LEN);
    stream.write_all(header.as_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream before any
/// header byte arrives.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = stream.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated);
        }
        filled += n;
    }
    let header_str =
        std::str::from_utf8(&header).map_err(|_| ProtocolError::InvalidHeader)?;
    let len: usize = header_str
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidHeader)?;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .map_err(|_| ProtocolError::Truncated)?;
    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| ProtocolError::MalformedCommand("frame is not UTF-8".into()))
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    StartHandshake {
        process_instance: ProcessInstanceId,
        reader: ReaderGid,
    },
    GenerateKey {
        gid: ReaderGid,
        process_instance: ProcessInstanceId,
        reader: ReaderGid,
        signature: [u8; 64],
    },
    ZkGenerateKey {
        gid: ReaderGid,
        process_instance: ProcessInstanceId,
        reader: ReaderGid,
        proof: Proof,
        signals: PublicSignals,
    },
    Disconnect,
}

impl Request {
    /// Render for the wire, addressed to the given authority.
    pub fn to_wire(&self, authority_id: AuthorityId) -> String {
        let tag = authority_id.tag();
        match self {
            Request::StartHandshake {
                process_instance,
                reader,
            } => format!("{tag} - {CMD_START_HANDSHAKE}§{process_instance}§{reader}"),
            Request::GenerateKey {
                gid,
                process_instance,
                reader,
                signature,
            } => format!(
                "{tag} - {CMD_GENERATE_KEY}§{gid}§{process_instance}§{reader}§{}",
                hex::encode(signature)
            ),
            Request::ZkGenerateKey {
                gid,
                process_instance,
                reader,
                proof,
                signals,
            } => {
                let proof_json = serde_json::to_string(proof).unwrap_or_default();
                let signals_json = serde_json::to_string(signals).unwrap_or_default();
                format!(
                    "{tag} - {CMD_ZK_GENERATE_KEY}§{gid}§{process_instance}§{reader}§{proof_json}§{signals_json}"
                )
            }
            Request::Disconnect => DISCONNECT_MESSAGE.to_string(),
        }
    }

    /// Parse a command addressed to the given authority. A command with a
    /// different tag is rejected before any field is interpreted.
    pub fn parse(authority_id: AuthorityId, raw: &str) -> Result<Self, ProtocolError> {
        if raw == DISCONNECT_MESSAGE {
            return Ok(Request::Disconnect);
        }
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let head = fields[0];
        let (tag, command) = head
            .split_once(" - ")
            .ok_or_else(|| ProtocolError::MalformedCommand(format!("missing tag: {head}")))?;
        if tag != authority_id.tag() {
            return Err(ProtocolError::MalformedCommand(format!(
                "command addressed to {tag}, this server is {}",
                authority_id.tag()
            )));
        }
        match command {
            CMD_START_HANDSHAKE => {
                let [_, process, reader] = fields[..] else {
                    return Err(ProtocolError::MalformedCommand(
                        "start handshake takes 2 fields".into(),
                    ));
                };
                Ok(Request::StartHandshake {
                    process_instance: parse_process(process)?,
                    reader: ReaderGid::new(reader),
                })
            }
            CMD_GENERATE_KEY => {
                let [_, gid, process, reader, signature] = fields[..] else {
                    return Err(ProtocolError::MalformedCommand(
                        "generate key takes 4 fields".into(),
                    ));
                };
                let bytes = hex::decode(signature).map_err(|_| {
                    ProtocolError::MalformedCommand("signature is not hex".into())
                })?;
                let signature: [u8; 64] = bytes.try_into().map_err(|_| {
                    ProtocolError::MalformedCommand("signature must be 64 bytes".into())
                })?;
                Ok(Request::GenerateKey {
                    gid: ReaderGid::new(gid),
                    process_instance: parse_process(process)?,
                    reader: ReaderGid::new(reader),
                    signature,
                })
            }
            CMD_ZK_GENERATE_KEY => {
                let [_, gid, process, reader, proof_json, signals_json] = fields[..] else {
                    return Err(ProtocolError::MalformedCommand(
                        "zk generate key takes 5 fields".into(),
                    ));
                };
                let proof: Proof = serde_json::from_str(proof_json).map_err(|e| {
                    ProtocolError::MalformedCommand(format!("bad proof json: {e}"))
                })?;
                let signals: PublicSignals = serde_json::from_str(signals_json).map_err(|e| {
                    ProtocolError::MalformedCommand(format!("bad signals json: {e}"))
                })?;
                Ok(Request::ZkGenerateKey {
                    gid: ReaderGid::new(gid),
                    process_instance: parse_process(process)?,
                    reader: ReaderGid::new(reader),
                    proof,
                    signals,
                })
            }
            other => Err(ProtocolError::MalformedCommand(format!(
                "unknown command: {other}"
            ))),
        }
    }
}

fn parse_process(raw: &str) -> Result<ProcessInstanceId, ProtocolError> {
    raw.parse()
        .map_err(|_| ProtocolError::MalformedCommand(format!("bad process instance: {raw}")))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    NumberToSign(u64),
    PartialKey(PartialKey),
    Error(String),
}

impl Response {
    pub fn to_wire(&self) -> String {
        match self {
            Response::NumberToSign(n) => format!("{RSP_NUMBER_TO_SIGN}{n}"),
            Response::PartialKey(key) => {
                let json = serde_json::to_string(key).unwrap_or_default();
                format!("{RSP_PARTIAL_KEY}{}", BASE64.encode(json))
            }
            Response::Error(reason) => format!("{RSP_ERROR}{reason}"),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = raw.strip_prefix(RSP_NUMBER_TO_SIGN) {
            let n: u64 = rest.trim().parse().map_err(|_| {
                ProtocolError::UnexpectedResponse(format!("bad number to sign: {rest}"))
            })?;
            return Ok(Response::NumberToSign(n));
        }
        if let Some(rest) = raw.strip_prefix(RSP_PARTIAL_KEY) {
            let json = BASE64.decode(rest.trim()).map_err(|e| {
                ProtocolError::UnexpectedResponse(format!("bad partial key encoding: {e}"))
            })?;
            let key: PartialKey = serde_json::from_slice(&json).map_err(|e| {
                ProtocolError::UnexpectedResponse(format!("bad partial key json: {e}"))
            })?;
            return Ok(Response::PartialKey(key));
        }
        if let Some(rest) = raw.strip_prefix(RSP_ERROR) {
            return Ok(Response::Error(rest.to_string()));
        }
        Err(ProtocolError::UnexpectedResponse(raw.to_string()))
    }
}
