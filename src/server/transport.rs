//! Minimal 104 APCI framing: start byte, length, control fields, and the
//! I/S/U frame distinction.
//!
//! Spec.md §1 treats the full link layer (k/w windowing, S/U frames, the
//! t1/t2/t3 timers) as the job of "an underlying 104 transport library" the
//! gateway's core only calls into. This module stands in for that library's
//! surface: it frames and unframes APDUs over a TCP stream so the
//! connection handler above it only ever deals in ASDU bytes. It
//! acknowledges every I-frame immediately with an S-frame rather than
//! implementing the windowed acknowledgement and retransmission timers a
//! conformant 104 stack would run.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::ServerError;

const START_BYTE: u8 = 0x68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApciKind {
    IFrame { send_seq: u16, recv_seq: u16 },
    SFrame { recv_seq: u16 },
    UFrame(u8),
}

pub struct FrameWriter {
    write_half: OwnedWriteHalf,
    send_seq: u16,
}

impl FrameWriter {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            write_half,
            send_seq: 0,
        }
    }

    /// Wrap `asdu_bytes` in an I-frame and write it, advancing the local
    /// send sequence counter.
    pub async fn send_asdu(&mut self, asdu_bytes: &[u8], recv_seq: u16) -> Result<(), ServerError> {
        let mut buf = Vec::with_capacity(6 + asdu_bytes.len());
        buf.push(START_BYTE);
        buf.push(0); // length placeholder

        let send_seq = self.send_seq;
        buf.push(((send_seq << 1) & 0xFE) as u8);
        buf.push((send_seq >> 7) as u8);
        buf.push(((recv_seq << 1) & 0xFE) as u8);
        buf.push((recv_seq >> 7) as u8);
        buf.extend_from_slice(asdu_bytes);

        let length = (buf.len() - 2) as u8;
        buf[1] = length;

        self.write_half.write_all(&buf).await?;
        self.send_seq = send_seq.wrapping_add(1);
        Ok(())
    }

    /// Acknowledge a received I-frame with an S-frame (no windowing delay).
    pub async fn send_ack(&mut self, recv_seq: u16) -> Result<(), ServerError> {
        let buf = [
            START_BYTE,
            4,
            0x01,
            0x00,
            ((recv_seq << 1) & 0xFE) as u8,
            (recv_seq >> 7) as u8,
        ];
        self.write_half.write_all(&buf).await?;
        Ok(())
    }
}

pub struct FrameReader {
    read_half: OwnedReadHalf,
    recv_seq: u16,
}

/// One decoded inbound APDU: the APCI kind plus, for I-frames, the raw ASDU
/// bytes (undecoded -- the connection handler parses only the header
/// fields it needs for command dispatch).
pub struct InboundFrame {
    pub kind: ApciKind,
    pub asdu_bytes: Option<Vec<u8>>,
}

impl FrameReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            read_half,
            recv_seq: 0,
        }
    }

    pub fn recv_seq(&self) -> u16 {
        self.recv_seq
    }

    /// Reads one APDU. Returns `Ok(None)` on clean EOF.
    pub async fn read_frame(&mut self) -> Result<Option<InboundFrame>, ServerError> {
        let mut header = [0u8; 2];
        match self.read_half.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ServerError::Io(e)),
        }

        if header[0] != START_BYTE {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid start byte: {:#04x}", header[0]),
            )));
        }

        let length = header[1] as usize;
        let mut body = vec![0u8; length];
        self.read_half.read_exact(&mut body).await?;

        if body.len() < 4 {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "APDU control field too short",
            )));
        }

        let control1 = body[0];
        if control1 & 0x01 == 0 {
            let send_seq = (((body[1] as u16) << 7) | ((control1 as u16) >> 1)) & 0x7FFF;
            let recv_seq = (((body[3] as u16) << 7) | ((body[2] as u16) >> 1)) & 0x7FFF;
            self.recv_seq = send_seq.wrapping_add(1);
            let asdu_bytes = if body.len() > 4 {
                Some(body[4..].to_vec())
            } else {
                None
            };
            Ok(Some(InboundFrame {
                kind: ApciKind::IFrame { send_seq, recv_seq },
                asdu_bytes,
            }))
        } else if control1 & 0x03 == 0x01 {
            let recv_seq = (((body[3] as u16) << 7) | ((body[2] as u16) >> 1)) & 0x7FFF;
            Ok(Some(InboundFrame {
                kind: ApciKind::SFrame { recv_seq },
                asdu_bytes: None,
            }))
        } else {
            Ok(Some(InboundFrame {
                kind: ApciKind::UFrame(control1),
                asdu_bytes: None,
            }))
        }
    }
}

/// Header fields of an inbound ASDU, parsed without decoding the
/// information object -- enough for the command dispatch table in
/// spec.md §4.5.
#[derive(Debug, Clone, Copy)]
pub struct AsduHeader {
    pub type_code: u8,
    pub cot_code: u8,
    pub originator_address: u8,
    pub common_address: u16,
    pub ioa: u32,
}

pub fn parse_asdu_header(bytes: &[u8]) -> Option<AsduHeader> {
    if bytes.len() < 9 {
        return None;
    }
    let type_code = bytes[0];
    let cot_code = bytes[2] & 0x3F;
    let originator_address = bytes[3];
    let common_address = u16::from_le_bytes([bytes[4], bytes[5]]);
    let ioa = (bytes[6] as u32) | ((bytes[7] as u32) << 8) | ((bytes[8] as u32) << 16);
    Some(AsduHeader {
        type_code,
        cot_code,
        originator_address,
        common_address,
        ioa,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_general_interrogation_header() {
        // TI=100 (C_IC_NA_1), VSQ, COT=6 (Activation), OA=0, CA=1, IOA=0
        let bytes = [100u8, 0x01, 6, 0, 1, 0, 0, 0, 0, 20];
        let header = parse_asdu_header(&bytes).unwrap();
        assert_eq!(header.type_code, 100);
        assert_eq!(header.common_address, 1);
    }

    #[test]
    fn short_bytes_fail_to_parse() {
        assert!(parse_asdu_header(&[1, 2, 3]).is_none());
    }
}
