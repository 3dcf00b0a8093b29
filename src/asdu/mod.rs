//! ASDU builder: bit-exact encoding of a [`crate::point::Point`] into an IEC
//! 60870-5-104 Application Service Data Unit.
//!
//! APCI framing (start byte, length, control fields) is the transport
//! library's job (see `crate::server::transport`); this module only ever
//! produces the ASDU bytes that ride inside an I-frame.

pub mod time;

use tracing::error;

use crate::error::AsduError;
use crate::point::{Point, PointValue};
pub use time::Cp56Time2a;

/// Emitted ASDU type identifiers. Only the types this gateway produces are
/// represented; an unknown/unset `asdu_type` on a `Point` falls back to
/// `MMeNc1` at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    /// M_SP_NA_1 -- single point information
    MSpNa1,
    /// M_SP_TB_1 -- single point information with CP56Time2a
    MSpTb1,
    /// M_ME_NB_1 -- measured value, scaled
    MMeNb1,
    /// M_ME_NC_1 -- measured value, short floating point
    MMeNc1,
    /// M_ME_TF_1 -- measured value, short floating point with CP56Time2a
    MMeTf1,
}

impl TypeId {
    pub fn code(self) -> u8 {
        match self {
            TypeId::MSpNa1 => 1,
            TypeId::MSpTb1 => 30,
            TypeId::MMeNb1 => 11,
            TypeId::MMeNc1 => 13,
            TypeId::MMeTf1 => 36,
        }
    }

    pub fn has_time(self) -> bool {
        matches!(self, TypeId::MSpTb1 | TypeId::MMeTf1)
    }
}

/// Cause of Transmission. Only the causes this gateway emits or echoes are
/// represented; `code()` matches IEC 60870-5-101 Table 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cot {
    Spontaneous,
    InterrogatedByStation,
    ActivationConfirmation,
    ActivationTermination,
    UnknownTypeId,
}

impl Cot {
    pub fn code(self) -> u8 {
        match self {
            Cot::Spontaneous => 3,
            Cot::InterrogatedByStation => 20,
            Cot::ActivationConfirmation => 7,
            Cot::ActivationTermination => 10,
            Cot::UnknownTypeId => 44,
        }
    }
}

/// Quality descriptor bits. `NT`/`SB`/`BL`/`OV` are always clear in this
/// gateway -- there is no source for them -- `IV` mirrors `Point::valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    pub invalid: bool,
    pub not_topical: bool,
    pub substituted: bool,
    pub blocked: bool,
    pub overflow: bool,
}

impl Quality {
    pub fn from_point(point: &Point) -> Self {
        Self {
            invalid: !point.valid,
            ..Default::default()
        }
    }

    /// SIQ byte layout: bit0 = SPI, bits 4-7 = BL/SB/NT/IV.
    fn to_siq(self, spi: bool) -> u8 {
        let mut b = 0u8;
        if spi {
            b |= 0x01;
        }
        if self.blocked {
            b |= 0x10;
        }
        if self.substituted {
            b |= 0x20;
        }
        if self.not_topical {
            b |= 0x40;
        }
        if self.invalid {
            b |= 0x80;
        }
        b
    }

    /// QDS byte layout: bits 4-7 = BL/SB/NT/IV (OV is bit 0, always clear
    /// here since the gateway has no overflow source).
    fn to_qds(self) -> u8 {
        let mut b = 0u8;
        if self.overflow {
            b |= 0x01;
        }
        if self.blocked {
            b |= 0x10;
        }
        if self.substituted {
            b |= 0x20;
        }
        if self.not_topical {
            b |= 0x40;
        }
        if self.invalid {
            b |= 0x80;
        }
        b
    }
}

/// One information object's payload, already coerced to the wire
/// representation for its ASDU type.
#[derive(Debug, Clone, PartialEq)]
pub enum AsduPayload {
    /// M_SP_*: single-bit SPI.
    SinglePoint(bool),
    /// M_ME_NB_1: INT16, clamped to [-32768, 32767].
    ScaledValue(i16),
    /// M_ME_NC_1 / M_ME_TF_1: IEEE-754 f32.
    FloatValue(f32),
}

/// A fully-formed ASDU: exactly one information object, per this gateway's
/// contract (no sequence/SQ-bit encoding).
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub type_id: TypeId,
    pub cot: Cot,
    pub test: bool,
    pub negative: bool,
    pub originator_address: u8,
    pub common_address: u16,
    pub ioa: u32,
    pub payload: AsduPayload,
    pub quality: Quality,
    pub time: Option<Cp56Time2a>,
}

impl Asdu {
    /// Encode to the TI/VSQ/COT/OA/CA/IOA/payload/time byte layout.
    /// VSQ is always 0x01 (SQ clear, 1 object).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.push(self.type_id.code());
        buf.push(0x01); // VSQ: SQ=0, number of objects=1

        let mut cot_byte = self.cot.code() & 0x3F;
        if self.test {
            cot_byte |= 0x80;
        }
        if self.negative {
            cot_byte |= 0x40;
        }
        buf.push(cot_byte);
        buf.push(self.originator_address);

        buf.extend_from_slice(&self.common_address.to_le_bytes());

        buf.push((self.ioa & 0xFF) as u8);
        buf.push(((self.ioa >> 8) & 0xFF) as u8);
        buf.push(((self.ioa >> 16) & 0xFF) as u8);

        match self.payload {
            AsduPayload::SinglePoint(spi) => {
                buf.push(self.quality.to_siq(spi));
            }
            AsduPayload::ScaledValue(v) => {
                buf.extend_from_slice(&v.to_le_bytes());
                buf.push(self.quality.to_qds());
            }
            AsduPayload::FloatValue(v) => {
                buf.extend_from_slice(&v.to_le_bytes());
                buf.push(self.quality.to_qds());
            }
        }

        if let Some(time) = self.time {
            buf.extend_from_slice(&time.encode());
        }

        buf
    }
}

/// Builds an ASDU from a point and a cause of transmission. Returns `None`
/// on an encoding error (unsupported type/value combination); the caller
/// must skip the point rather than propagate a failure, per the gateway's
/// error taxonomy.
pub fn build_asdu(point: &Point, cot: Cot) -> Option<Asdu> {
    match try_build_asdu(point, cot) {
        Ok(asdu) => Some(asdu),
        Err(e) => {
            error!(ioa = point.ioa, ca = point.common_address, error = %e, "ASDU encode failed");
            None
        }
    }
}

fn try_build_asdu(point: &Point, cot: Cot) -> Result<Asdu, AsduError> {
    // Unknown/unset asdu_type falls back to M_ME_NC_1 -- in this enum
    // representation every constructed Point already carries a concrete
    // TypeId, so the fallback only matters for adapters that don't set one
    // explicitly; they're expected to default-construct with MMeNc1.
    let type_id = point.asdu_type;
    let quality = Quality::from_point(point);

    let time = if type_id.has_time() {
        let millis = if point.timestamp > 0 {
            point.timestamp
        } else {
            crate::point::now_millis()
        };
        Some(Cp56Time2a::from_millis(millis))
    } else {
        None
    };

    let payload = match type_id {
        TypeId::MSpNa1 | TypeId::MSpTb1 => {
            let spi = match &point.value {
                PointValue::Bool(b) => *b,
                PointValue::I16(v) => *v != 0,
                PointValue::I32(v) => *v != 0,
                PointValue::I64(v) => *v != 0,
                PointValue::F32(v) => *v != 0.0,
                PointValue::F64(v) => *v != 0.0,
                _ => false,
            };
            AsduPayload::SinglePoint(spi)
        }
        TypeId::MMeNb1 => {
            let raw = point.value.as_float().unwrap_or(0.0);
            let clamped = raw.round().clamp(i16::MIN as f64, i16::MAX as f64);
            AsduPayload::ScaledValue(clamped as i16)
        }
        TypeId::MMeNc1 | TypeId::MMeTf1 => {
            let v = point.value.as_float().unwrap_or(0.0) as f32;
            AsduPayload::FloatValue(v)
        }
    };

    Ok(Asdu {
        type_id,
        cot,
        test: false,
        negative: false,
        originator_address: 0,
        common_address: point.common_address,
        ioa: point.ioa,
        payload,
        quality,
        time,
    })
}

/// Encodes a command-reply ASDU carrying a single qualifier byte (the
/// layout used by `C_IC_NA_1`/`C_CI_NA_1`/`C_CS_NA_1` replies: IOA + one
/// qualifier byte, no quality descriptor, no time tag). This sits outside
/// the measurement-type table in this module's `TypeId` because command
/// type identifiers are never stored on a `Point` -- they only ever appear
/// on the wire as echoes of what a client sent.
#[allow(clippy::too_many_arguments)]
pub fn encode_command_reply(
    type_code: u8,
    cot: Cot,
    negative: bool,
    originator_address: u8,
    common_address: u16,
    ioa: u32,
    qualifier: u8,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    buf.push(type_code);
    buf.push(0x01);

    let mut cot_byte = cot.code() & 0x3F;
    if negative {
        cot_byte |= 0x40;
    }
    buf.push(cot_byte);
    buf.push(originator_address);
    buf.extend_from_slice(&common_address.to_le_bytes());
    buf.push((ioa & 0xFF) as u8);
    buf.push(((ioa >> 8) & 0xFF) as u8);
    buf.push(((ioa >> 16) & 0xFF) as u8);
    buf.push(qualifier);
    buf
}

/// Builds the `COT = UNKNOWN_TYPE_ID` reply to an unsupported inbound
/// command, echoing the requester's originator address.
pub fn build_unknown_type_reply(
    common_address: u16,
    ioa: u32,
    originator_address: u8,
) -> Asdu {
    Asdu {
        type_id: TypeId::MMeNc1,
        cot: Cot::UnknownTypeId,
        test: false,
        negative: true,
        originator_address,
        common_address,
        ioa,
        payload: AsduPayload::FloatValue(0.0),
        quality: Quality::default(),
        time: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn point(asdu_type: TypeId, value: PointValue) -> Point {
        Point::with_value(1001, 1, asdu_type, value)
    }

    #[test]
    fn float_point_encodes_quality_clear_when_valid() {
        let p = point(TypeId::MMeNc1, PointValue::F32(123.45));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert_eq!(asdu.type_id, TypeId::MMeNc1);
        assert_eq!(asdu.cot, Cot::Spontaneous);
        assert_eq!(asdu.ioa, 1001);
        assert_eq!(asdu.common_address, 1);
        assert_eq!(asdu.quality.invalid, false);
        match asdu.payload {
            AsduPayload::FloatValue(v) => assert!((v - 123.45).abs() < 0.001),
            _ => panic!("expected float payload"),
        }
    }

    #[test]
    fn invalid_point_sets_iv_bit() {
        let mut p = point(TypeId::MMeNc1, PointValue::F32(1.0));
        p.valid = false;
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert!(asdu.quality.invalid);
    }

    #[test]
    fn scaled_value_clamps_out_of_range() {
        // 123456 * 0.1 = 12345.6, well within range -- use a genuinely
        // out-of-range value to exercise clamping.
        let p = point(TypeId::MMeNb1, PointValue::F64(400000.0));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        match asdu.payload {
            AsduPayload::ScaledValue(v) => assert_eq!(v, i16::MAX),
            _ => panic!("expected scaled payload"),
        }
    }

    #[test]
    fn scaled_modbus_example_from_spec_scenario_e() {
        // raw 123456, factor 0.1 -> 12345.6 -> int -> clamp -> 32767 stays
        // within range so no clamping actually occurs here; verify exact
        // rounding behaviour instead.
        let scaled = 123456.0 * 0.1;
        let p = point(TypeId::MMeNb1, PointValue::F64(scaled));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        match asdu.payload {
            AsduPayload::ScaledValue(v) => assert_eq!(v, 12346), // rounds 12345.6
            _ => panic!("expected scaled payload"),
        }
    }

    #[test]
    fn boolean_point_from_numeric_nonzero() {
        let p = point(TypeId::MSpNa1, PointValue::I32(7));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert_eq!(asdu.payload, AsduPayload::SinglePoint(true));
    }

    #[test]
    fn boolean_point_from_string_is_false() {
        let p = point(TypeId::MSpNa1, PointValue::String("on".into()));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert_eq!(asdu.payload, AsduPayload::SinglePoint(false));
    }

    #[test]
    fn time_tagged_types_carry_cp56time2a() {
        let mut p = point(TypeId::MMeTf1, PointValue::F32(1.0));
        p.timestamp = 1_700_000_000_000;
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert!(asdu.time.is_some());
    }

    #[test]
    fn non_time_tagged_types_carry_no_time() {
        let p = point(TypeId::MMeNc1, PointValue::F32(1.0));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        assert!(asdu.time.is_none());
    }

    #[test]
    fn encode_layout_has_vsq_one_object() {
        let p = point(TypeId::MMeNc1, PointValue::F32(1.0));
        let asdu = build_asdu(&p, Cot::Spontaneous).unwrap();
        let bytes = asdu.encode();
        assert_eq!(bytes[0], TypeId::MMeNc1.code());
        assert_eq!(bytes[1], 0x01);
    }
}
