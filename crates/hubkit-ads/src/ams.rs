//! AMS/TCP wire format
//!
//! Every packet on the wire is
//!
//! ```text
//! ┌──────────┬──────────────┬───────────────────────────────┬──────────────┐
//! │ reserved │ length (u32) │ AMS header (32 bytes)         │ ADS payload  │
//! │ 2 bytes  │ hdr+payload  │ target, source, cmd, flags,   │              │
//! │          │              │ length, error, invoke id      │              │
//! └──────────┴──────────────┴───────────────────────────────┴──────────────┘
//! ```
//!
//! All integers are little endian. This module is pure: it builds and parses
//! byte buffers and never touches a socket.

use crate::types::AdsState;
use chrono::{DateTime, TimeZone, Utc};
use hubkit_core::{Error, Result};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// TCP port of the ADS router
pub const ADS_TCP_PORT: u16 = 48898;

/// Length of the AMS/TCP prefix (reserved + length)
pub const AMS_TCP_HEADER_LEN: usize = 6;

/// Length of the AMS header
pub const AMS_HEADER_LEN: usize = 32;

/// Largest packet we accept from a PLC
pub const MAX_PACKET_LEN: usize = 1024 * 1024;

/// Index group: get a symbol handle by name
pub const ADSIGRP_SYM_HNDBYNAME: u32 = 0xF003;
/// Index group: read/write a symbol value by handle
pub const ADSIGRP_SYM_VALBYHND: u32 = 0xF005;
/// Index group: release a symbol handle
pub const ADSIGRP_SYM_RELEASEHND: u32 = 0xF006;
/// Index group: upload the symbol table
pub const ADSIGRP_SYM_UPLOAD: u32 = 0xF00B;
/// Index group: size of the symbol table
pub const ADSIGRP_SYM_UPLOADINFO2: u32 = 0xF00F;

/// Length of the symbol upload info block
pub const SYM_UPLOAD_INFO_LEN: u32 = 24;

/// Fixed part of a symbol table entry, including its length field
const SYMBOL_ENTRY_HEADER_LEN: usize = 30;

/// Notification transmission mode: send on change
const ADSTRANS_SERVERONCHA: u32 = 4;

/// State flags of a request sent over TCP
pub const STATE_FLAG_REQUEST: u16 = 0x0004;
/// Response bit of the state flags
pub const STATE_FLAG_RESPONSE: u16 = 0x0001;

/// ADS command ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AmsCommand {
    ReadDeviceInfo = 1,
    Read = 2,
    Write = 3,
    ReadState = 4,
    WriteControl = 5,
    AddNotification = 6,
    DeleteNotification = 7,
    DeviceNotification = 8,
    ReadWrite = 9,
}

impl AmsCommand {
    /// Map a raw command id
    pub fn from_u16(id: u16) -> Option<Self> {
        Some(match id {
            1 => AmsCommand::ReadDeviceInfo,
            2 => AmsCommand::Read,
            3 => AmsCommand::Write,
            4 => AmsCommand::ReadState,
            5 => AmsCommand::WriteControl,
            6 => AmsCommand::AddNotification,
            7 => AmsCommand::DeleteNotification,
            8 => AmsCommand::DeviceNotification,
            9 => AmsCommand::ReadWrite,
            _ => return None,
        })
    }
}

/// AMS net id (`a.b.c.d.e.f`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmsNetId(pub [u8; 6]);

impl AmsNetId {
    /// Conventional net id of a host: its IPv4 address followed by `.1.1`
    pub fn from_ip(ip: Ipv4Addr) -> Self {
        let [a, b, c, d] = ip.octets();
        AmsNetId([a, b, c, d, 1, 1])
    }

    /// IPv4 address formed by the first four octets
    pub fn to_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl FromStr for AmsNetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_input(format!("Invalid AMS net id: {}", s));

        let mut octets = [0u8; 6];
        let mut parts = s.trim().split('.');
        for octet in octets.iter_mut() {
            *octet = parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(invalid)?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(AmsNetId(octets))
    }
}

impl std::fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{}.{}.{}.{}.{}.{}", a, b, c, d, e, g)
    }
}

/// Net id plus AMS port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmsAddr {
    pub net_id: AmsNetId,
    pub port: u16,
}

/// Decoded AMS header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsHeader {
    pub target: AmsAddr,
    pub source: AmsAddr,
    pub command: u16,
    pub state_flags: u16,
    pub data_length: u32,
    pub error_code: u32,
    pub invoke_id: u32,
}

impl AmsHeader {
    /// Whether this packet answers one of our requests
    pub fn is_response(&self) -> bool {
        self.state_flags & STATE_FLAG_RESPONSE != 0
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.target.net_id.0);
        buf.extend_from_slice(&self.target.port.to_le_bytes());
        buf.extend_from_slice(&self.source.net_id.0);
        buf.extend_from_slice(&self.source.port.to_le_bytes());
        buf.extend_from_slice(&self.command.to_le_bytes());
        buf.extend_from_slice(&self.state_flags.to_le_bytes());
        buf.extend_from_slice(&self.data_length.to_le_bytes());
        buf.extend_from_slice(&self.error_code.to_le_bytes());
        buf.extend_from_slice(&self.invoke_id.to_le_bytes());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let target_id = r.array::<6>()?;
        let target_port = r.u16()?;
        let source_id = r.array::<6>()?;
        let source_port = r.u16()?;
        Ok(Self {
            target: AmsAddr {
                net_id: AmsNetId(target_id),
                port: target_port,
            },
            source: AmsAddr {
                net_id: AmsNetId(source_id),
                port: source_port,
            },
            command: r.u16()?,
            state_flags: r.u16()?,
            data_length: r.u32()?,
            error_code: r.u32()?,
            invoke_id: r.u32()?,
        })
    }
}

/// A parsed AMS packet (without the TCP prefix)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsPacket {
    pub header: AmsHeader,
    pub payload: Vec<u8>,
}

/// One sample of a device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Notification handle returned by AddNotification
    pub handle: u32,
    /// Windows FILETIME (100 ns ticks since 1601-01-01)
    pub timestamp: u64,
    /// Sample bytes
    pub data: Vec<u8>,
}

/// 100 ns ticks between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

impl RawNotification {
    /// Sample time as UTC, `None` for stamps before 1970
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let ticks = self.timestamp.checked_sub(FILETIME_UNIX_OFFSET)?;
        let secs = (ticks / 10_000_000) as i64;
        let nanos = ((ticks % 10_000_000) * 100) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }
}

/// One entry of the PLC symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsSymbol {
    /// Full symbol name, e.g. `GVL.Kitchen`
    pub name: String,
    /// PLC type name, e.g. `ST_Light` or `BOOL`
    pub type_name: String,
    pub comment: String,
    pub index_group: u32,
    pub index_offset: u32,
    /// Size of the value in bytes
    pub size: u32,
    /// ADS data type id
    pub data_type: u32,
}

impl AdsSymbol {
    /// Symbol of `type_name` with empty addressing fields
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            comment: String::new(),
            index_group: 0,
            index_offset: 0,
            size: 0,
            data_type: 0,
        }
    }
}

/// Bounds-checked little-endian reader
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(Error::decode(format!(
                "AMS packet truncated: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )));
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// NUL-terminated text of `len` bytes plus its terminator
    fn text(&mut self, len: usize) -> Result<String> {
        let text = String::from_utf8_lossy(self.bytes(len)?).into_owned();
        self.bytes(1)?;
        Ok(text)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Build a complete request frame (TCP prefix, AMS header, payload)
pub fn encode_request(
    target: AmsAddr,
    source: AmsAddr,
    command: AmsCommand,
    invoke_id: u32,
    payload: &[u8],
) -> Vec<u8> {
    let header = AmsHeader {
        target,
        source,
        command: command as u16,
        state_flags: STATE_FLAG_REQUEST,
        data_length: payload.len() as u32,
        error_code: 0,
        invoke_id,
    };
    encode_packet(&header, payload)
}

/// Build a frame from an explicit header
pub fn encode_packet(header: &AmsHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(AMS_TCP_HEADER_LEN + AMS_HEADER_LEN + payload.len());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&((AMS_HEADER_LEN + payload.len()) as u32).to_le_bytes());
    header.write(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// Length of the packet following an AMS/TCP prefix
///
/// # Errors
///
/// `Error::Decode` for lengths shorter than an AMS header or larger than
/// [`MAX_PACKET_LEN`].
pub fn packet_length(prefix: &[u8; AMS_TCP_HEADER_LEN]) -> Result<usize> {
    let len = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]) as usize;
    if !(AMS_HEADER_LEN..=MAX_PACKET_LEN).contains(&len) {
        return Err(Error::decode(format!("Invalid AMS packet length {}", len)));
    }
    Ok(len)
}

/// Parse an AMS packet (the bytes after the TCP prefix)
pub fn parse_packet(body: &[u8]) -> Result<AmsPacket> {
    let mut r = Reader::new(body);
    let header = AmsHeader::read(&mut r)?;
    let payload = r.bytes(header.data_length as usize)?.to_vec();
    Ok(AmsPacket { header, payload })
}

/// Payload of a Read request
pub fn read_request(index_group: u32, index_offset: u32, length: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&index_group.to_le_bytes());
    buf.extend_from_slice(&index_offset.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf
}

/// Payload of a Write request
pub fn write_request(index_group: u32, index_offset: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + data.len());
    buf.extend_from_slice(&index_group.to_le_bytes());
    buf.extend_from_slice(&index_offset.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Payload of a ReadWrite request
pub fn read_write_request(
    index_group: u32,
    index_offset: u32,
    read_length: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + data.len());
    buf.extend_from_slice(&index_group.to_le_bytes());
    buf.extend_from_slice(&index_offset.to_le_bytes());
    buf.extend_from_slice(&read_length.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Payload of an AddNotification request (send on change)
pub fn add_notification_request(
    index_group: u32,
    index_offset: u32,
    length: u32,
    max_delay: u32,
    cycle_time: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(&index_group.to_le_bytes());
    buf.extend_from_slice(&index_offset.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&ADSTRANS_SERVERONCHA.to_le_bytes());
    buf.extend_from_slice(&max_delay.to_le_bytes());
    buf.extend_from_slice(&cycle_time.to_le_bytes());
    buf.extend_from_slice(&[0u8; 16]);
    buf
}

/// Payload of a DeleteNotification request
pub fn delete_notification_request(handle: u32) -> Vec<u8> {
    handle.to_le_bytes().to_vec()
}

/// Check the ADS result code that starts every response payload
fn check_result(r: &mut Reader<'_>) -> Result<()> {
    match r.u32()? {
        0 => Ok(()),
        code => Err(ads_error(code)),
    }
}

/// Parse a response that carries only a result code (Write, DeleteNotification)
pub fn parse_status_response(payload: &[u8]) -> Result<()> {
    check_result(&mut Reader::new(payload))
}

/// Parse a Read or ReadWrite response
pub fn parse_read_response(payload: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::new(payload);
    check_result(&mut r)?;
    let len = r.u32()? as usize;
    Ok(r.bytes(len)?.to_vec())
}

/// Parse a ReadState response into (ADS state, device state)
pub fn parse_read_state_response(payload: &[u8]) -> Result<(AdsState, u16)> {
    let mut r = Reader::new(payload);
    check_result(&mut r)?;
    let ads_state = AdsState::from_code(r.u16()?);
    let device_state = r.u16()?;
    Ok((ads_state, device_state))
}

/// Parse an AddNotification response into the notification handle
pub fn parse_add_notification_response(payload: &[u8]) -> Result<u32> {
    let mut r = Reader::new(payload);
    check_result(&mut r)?;
    r.u32()
}

/// Parse the payload of a DeviceNotification packet
///
/// ```text
/// length u32, stamps u32,
///   { timestamp u64, samples u32, { handle u32, size u32, data[size] }* }*
/// ```
pub fn parse_notification_stream(payload: &[u8]) -> Result<Vec<RawNotification>> {
    let mut r = Reader::new(payload);
    let _length = r.u32()?;
    let stamps = r.u32()?;

    let mut out = Vec::new();
    for _ in 0..stamps {
        let timestamp = r.u64()?;
        let samples = r.u32()?;
        for _ in 0..samples {
            let handle = r.u32()?;
            let size = r.u32()? as usize;
            let data = r.bytes(size)?.to_vec();
            out.push(RawNotification {
                handle,
                timestamp,
                data,
            });
        }
    }
    Ok(out)
}

/// Build a DeviceNotification payload with one stamp
pub fn encode_notification_stream(timestamp: u64, samples: &[(u32, &[u8])]) -> Vec<u8> {
    let mut stamp = Vec::new();
    stamp.extend_from_slice(&timestamp.to_le_bytes());
    stamp.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    for (handle, data) in samples {
        stamp.extend_from_slice(&handle.to_le_bytes());
        stamp.extend_from_slice(&(data.len() as u32).to_le_bytes());
        stamp.extend_from_slice(data);
    }

    let mut buf = Vec::with_capacity(8 + stamp.len());
    buf.extend_from_slice(&((4 + stamp.len()) as u32).to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&stamp);
    buf
}

/// Parse the symbol upload info into (symbol count, table size in bytes)
pub fn parse_upload_info(data: &[u8]) -> Result<(u32, u32)> {
    let mut r = Reader::new(data);
    let symbols = r.u32()?;
    let table_len = r.u32()?;
    Ok((symbols, table_len))
}

/// Parse an uploaded symbol table
///
/// ```text
/// { entry_len u32, group u32, offset u32, size u32, data_type u32, flags u32,
///   name_len u16, type_len u16, comment_len u16,
///   name\0, type\0, comment\0, padding to entry_len }*
/// ```
pub fn parse_symbol_table(data: &[u8]) -> Result<Vec<AdsSymbol>> {
    let mut r = Reader::new(data);
    let mut out = Vec::new();
    while r.remaining() > 0 {
        let entry_len = r.u32()? as usize;
        if entry_len < SYMBOL_ENTRY_HEADER_LEN {
            return Err(Error::decode(format!("Invalid symbol entry length {}", entry_len)));
        }
        let mut e = Reader::new(r.bytes(entry_len - 4)?);
        let index_group = e.u32()?;
        let index_offset = e.u32()?;
        let size = e.u32()?;
        let data_type = e.u32()?;
        let _flags = e.u32()?;
        let name_len = e.u16()? as usize;
        let type_len = e.u16()? as usize;
        let comment_len = e.u16()? as usize;
        out.push(AdsSymbol {
            name: e.text(name_len)?,
            type_name: e.text(type_len)?,
            comment: e.text(comment_len)?,
            index_group,
            index_offset,
            size,
            data_type,
        });
    }
    Ok(out)
}

/// Build a symbol table as the PLC uploads it
pub fn encode_symbol_table(symbols: &[AdsSymbol]) -> Vec<u8> {
    let mut buf = Vec::new();
    for symbol in symbols {
        let strings = symbol.name.len() + symbol.type_name.len() + symbol.comment.len() + 3;
        let entry_len = SYMBOL_ENTRY_HEADER_LEN + strings;
        buf.extend_from_slice(&(entry_len as u32).to_le_bytes());
        buf.extend_from_slice(&symbol.index_group.to_le_bytes());
        buf.extend_from_slice(&symbol.index_offset.to_le_bytes());
        buf.extend_from_slice(&symbol.size.to_le_bytes());
        buf.extend_from_slice(&symbol.data_type.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        for text in [&symbol.name, &symbol.type_name, &symbol.comment] {
            buf.extend_from_slice(&(text.len() as u16).to_le_bytes());
        }
        for text in [&symbol.name, &symbol.type_name, &symbol.comment] {
            buf.extend_from_slice(text.as_bytes());
            buf.push(0);
        }
    }
    buf
}

/// Map an ADS error code to an [`Error`]
///
/// Routing errors mean the PLC is unreachable and are transient; unknown
/// symbols are `NotFound`; everything else is reported as an ADS error.
pub fn ads_error(code: u32) -> Error {
    match code {
        0x0006 | 0x0007 => Error::cannot_connect(format!(
            "ADS error {:#x}: target {} not found",
            code,
            if code == 0x0006 { "port" } else { "machine" }
        )),
        0x0745 | 0x0746 => Error::transient(format!("ADS error {:#x}: device timeout", code)),
        0x0710 => Error::not_found(format!("ADS error {:#x}: symbol not found", code)),
        0x0701 => Error::integration("ads", format!("ADS error {:#x}: service not supported", code)),
        0x0705 => Error::invalid_input(format!("ADS error {:#x}: invalid data size", code)),
        0x0711 => Error::integration("ads", format!("ADS error {:#x}: invalid device state", code)),
        _ => Error::integration("ads", format!("ADS error {:#x}", code)),
    }
}
