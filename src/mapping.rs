//! Immutable, process-wide lookup from source channel ID to 104 addressing
//! and scaling. Built once at startup, never mutated afterwards.

use std::collections::HashMap;

use crate::asdu::TypeId;

/// A source-side data-type hint, informational only -- the ASDU builder
/// decides encoding from `Mapping::asdu_type`, not this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeHint {
    Boolean,
    Analog,
    Counter,
}

/// One addressing/scaling entry. `scaling_factor`/`offset` are applied only
/// by the Modbus adapter (`scaled = raw * factor + offset`), never inside
/// the point store or ASDU builder.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub ioa: u32,
    pub common_address: u16,
    pub asdu_type: TypeId,
    pub data_type_hint: DataTypeHint,
    pub scaling_factor: f64,
    pub offset: f64,
    pub description: String,
}

impl Mapping {
    pub fn new(ioa: u32, common_address: u16, asdu_type: TypeId) -> Self {
        Self {
            ioa,
            common_address,
            asdu_type,
            data_type_hint: DataTypeHint::Analog,
            scaling_factor: 1.0,
            offset: 0.0,
            description: String::new(),
        }
    }

    pub fn scaled(mut self, factor: f64, offset: f64) -> Self {
        self.scaling_factor = factor;
        self.offset = offset;
        self
    }

    pub fn hint(mut self, hint: DataTypeHint) -> Self {
        self.data_type_hint = hint;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `scaled = raw * factor + offset`.
    pub fn apply_scaling(&self, raw: f64) -> f64 {
        raw * self.scaling_factor + self.offset
    }
}

/// Two disjoint sub-tables, one per source protocol. Missing entries are
/// not errors -- callers silently skip unmapped channels.
#[derive(Debug, Default)]
pub struct MappingTable {
    iec61850: HashMap<String, Mapping>,
    modbus: HashMap<String, Mapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iec61850(mut self, channel_id: impl Into<String>, mapping: Mapping) -> Self {
        self.iec61850.insert(channel_id.into(), mapping);
        self
    }

    pub fn with_modbus(mut self, channel_id: impl Into<String>, mapping: Mapping) -> Self {
        self.modbus.insert(channel_id.into(), mapping);
        self
    }

    pub fn lookup_iec61850(&self, channel_id: &str) -> Option<&Mapping> {
        self.iec61850.get(channel_id)
    }

    pub fn lookup_modbus(&self, channel_id: &str) -> Option<&Mapping> {
        self.modbus.get(channel_id)
    }

    /// Build from CSV rows of the form
    /// `protocol,channel_id,ioa,common_address,asdu_type,factor,offset,description`.
    /// Unparseable rows are skipped with a `tracing::warn!`, matching the
    /// gateway's "never crash on bad field config" posture.
    pub fn from_csv_str(data: &str) -> Self {
        let mut table = Self::new();
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_bytes());

        for result in rdr.records() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable mapping row");
                    continue;
                }
            };
            let Some(row) = parse_row(&record) else {
                tracing::warn!(row = ?record, "skipping invalid mapping row");
                continue;
            };
            let (protocol, channel_id, mapping) = row;
            match protocol.as_str() {
                "IEC61850" => table = table.with_iec61850(channel_id, mapping),
                "MODBUS_TCP" => table = table.with_modbus(channel_id, mapping),
                other => tracing::warn!(protocol = other, "unknown source protocol in mapping row"),
            }
        }

        table
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<(String, String, Mapping)> {
    let protocol = record.get(0)?.to_string();
    let channel_id = record.get(1)?.to_string();
    let ioa: u32 = record.get(2)?.parse().ok()?;
    let common_address: u16 = record.get(3)?.parse().ok()?;
    let asdu_type = parse_type_id(record.get(4)?)?;
    let factor: f64 = record.get(5).unwrap_or("1.0").parse().unwrap_or(1.0);
    let offset: f64 = record.get(6).unwrap_or("0.0").parse().unwrap_or(0.0);
    let description = record.get(7).unwrap_or("").to_string();

    let mapping = Mapping::new(ioa, common_address, asdu_type)
        .scaled(factor, offset)
        .described(description);

    Some((protocol, channel_id, mapping))
}

fn parse_type_id(s: &str) -> Option<TypeId> {
    match s {
        "M_SP_NA_1" => Some(TypeId::MSpNa1),
        "M_SP_TB_1" => Some(TypeId::MSpTb1),
        "M_ME_NB_1" => Some(TypeId::MMeNb1),
        "M_ME_NC_1" => Some(TypeId::MMeNc1),
        "M_ME_TF_1" => Some(TypeId::MMeTf1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_is_disjoint_per_protocol() {
        let table = MappingTable::new()
            .with_modbus("register5", Mapping::new(3005, 1, TypeId::MMeNb1).scaled(0.1, 0.0));

        assert!(table.lookup_modbus("register5").is_some());
        assert!(table.lookup_iec61850("register5").is_none());
    }

    #[test]
    fn missing_entry_is_none_not_error() {
        let table = MappingTable::new();
        assert!(table.lookup_modbus("nonexistent").is_none());
    }

    #[test]
    fn scaling_applies_factor_and_offset() {
        let mapping = Mapping::new(3005, 1, TypeId::MMeNb1).scaled(0.1, 5.0);
        assert_eq!(mapping.apply_scaling(100.0), 15.0);
    }

    #[test]
    fn from_csv_parses_rows() {
        let csv = "protocol,channel_id,ioa,common_address,asdu_type,factor,offset,description\n\
                   MODBUS_TCP,modbus_register5,3005,1,M_ME_NB_1,0.1,0.0,Active power\n\
                   IEC61850,GGIO1.Ind1,1001,1,M_SP_NA_1,1.0,0.0,Breaker status\n";
        let table = MappingTable::from_csv_str(csv);

        let m = table.lookup_modbus("modbus_register5").unwrap();
        assert_eq!(m.ioa, 3005);
        assert_eq!(m.scaling_factor, 0.1);

        let s = table.lookup_iec61850("GGIO1.Ind1").unwrap();
        assert_eq!(s.asdu_type, TypeId::MSpNa1);
    }

    #[test]
    fn from_csv_skips_unparseable_rows() {
        let csv = "protocol,channel_id,ioa,common_address,asdu_type,factor,offset,description\n\
                   MODBUS_TCP,bad_row,not_a_number,1,M_ME_NB_1,0.1,0.0,broken\n\
                   MODBUS_TCP,good_row,3006,1,M_ME_NB_1,1.0,0.0,ok\n";
        let table = MappingTable::from_csv_str(csv);
        assert!(table.lookup_modbus("bad_row").is_none());
        assert!(table.lookup_modbus("good_row").is_some());
    }
}
