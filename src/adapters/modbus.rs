//! Modbus holding-register ingress: applies the mapping's scaling rule
//! before publishing, per §6 ("adapters apply any scaling before calling
//! update"). The core store and ASDU builder never see a raw register
//! value, only the already-scaled float.

use tracing::warn;

use crate::point::{Point, PointValue};

use super::AdapterContext;

/// One raw holding-register read, as delivered by the upstream Modbus
/// client library this adapter would normally wrap.
#[derive(Debug, Clone)]
pub struct ModbusSample {
    pub channel_id: String,
    pub raw_value: i64,
    pub valid: bool,
}

/// Looks up `sample.channel_id` in the Modbus half of the mapping table,
/// applies `scaled = raw * factor + offset`, and publishes a `Point`.
/// Unmapped channels are skipped with a WARN, matching the "missing
/// entries are not errors" posture of the mapping table.
pub fn ingest(ctx: &AdapterContext, sample: ModbusSample) {
    let Some(mapping) = ctx.mapping.lookup_modbus(&sample.channel_id) else {
        warn!(channel = %sample.channel_id, "no mapping for modbus channel, dropping sample");
        return;
    };

    let scaled = mapping.apply_scaling(sample.raw_value as f64);

    let point = Point::new(
        sample.channel_id.clone(),
        "MODBUS_TCP",
        sample.channel_id,
        mapping.ioa,
        mapping.common_address,
        mapping.asdu_type,
        PointValue::F64(scaled),
        sample.valid,
        0,
    )
    .with_description(mapping.description.clone());

    ctx.store.update(point);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asdu::TypeId;
    use crate::config::GatewayConfig;
    use crate::mapping::{Mapping, MappingTable};
    use crate::store::PointStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn scaled_sample_is_published_with_scaling_applied() {
        let mapping = MappingTable::new()
            .with_modbus("modbus_register5", Mapping::new(3005, 1, TypeId::MMeNb1).scaled(0.1, 0.0));
        let store = PointStore::new(GatewayConfig::default());
        let ctx = AdapterContext::new(Arc::new(mapping), store.clone());

        ingest(
            &ctx,
            ModbusSample {
                channel_id: "modbus_register5".to_string(),
                raw_value: 123456,
                valid: true,
            },
        );

        let point = store.get(1, 3005).unwrap();
        match point.value {
            PointValue::F64(v) => assert!((v - 12345.6).abs() < 0.001),
            other => panic!("unexpected value variant: {other:?}"),
        }
        store.shutdown().await;
    }

    #[tokio::test]
    async fn unmapped_channel_is_dropped() {
        let store = PointStore::new(GatewayConfig::default());
        let ctx = AdapterContext::new(Arc::new(MappingTable::new()), store.clone());

        ingest(
            &ctx,
            ModbusSample {
                channel_id: "nonexistent".to_string(),
                raw_value: 1,
                valid: true,
            },
        );

        assert!(store.snapshot().is_empty());
        store.shutdown().await;
    }
}
