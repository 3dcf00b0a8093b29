//! IEC 61850 report ingress: reports already carry typed, pre-scaled
//! values (unlike Modbus registers), so this adapter only resolves
//! addressing and forwards the value as-is.

use tracing::warn;

use crate::point::{Point, PointValue};

use super::AdapterContext;

/// One data-attribute report, as delivered by the upstream 61850 client
/// library this adapter would normally wrap.
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub channel_id: String,
    pub value: PointValue,
    pub quality_valid: bool,
}

/// Looks up `item.channel_id` in the 61850 half of the mapping table and
/// publishes a `Point` carrying the report's value unchanged. Unmapped
/// channels are skipped with a WARN.
pub fn ingest(ctx: &AdapterContext, item: ReportItem) {
    let Some(mapping) = ctx.mapping.lookup_iec61850(&item.channel_id) else {
        warn!(channel = %item.channel_id, "no mapping for iec61850 channel, dropping report");
        return;
    };

    let point = Point::new(
        item.channel_id.clone(),
        "IEC61850",
        item.channel_id,
        mapping.ioa,
        mapping.common_address,
        mapping.asdu_type,
        item.value,
        item.quality_valid,
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
    async fn report_is_published_without_scaling() {
        let mapping =
            MappingTable::new().with_iec61850("GGIO1.Ind1", Mapping::new(1001, 1, TypeId::MSpNa1));
        let store = PointStore::new(GatewayConfig::default());
        let ctx = AdapterContext::new(Arc::new(mapping), store.clone());

        ingest(
            &ctx,
            ReportItem {
                channel_id: "GGIO1.Ind1".to_string(),
                value: PointValue::Bool(true),
                quality_valid: true,
            },
        );

        let point = store.get(1, 1001).unwrap();
        assert_eq!(point.value, PointValue::Bool(true));
        assert_eq!(point.source_protocol, "IEC61850");
        store.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_quality_is_carried_through() {
        let mapping =
            MappingTable::new().with_iec61850("GGIO1.Ind2", Mapping::new(1002, 1, TypeId::MSpNa1));
        let store = PointStore::new(GatewayConfig::default());
        let ctx = AdapterContext::new(Arc::new(mapping), store.clone());

        ingest(
            &ctx,
            ReportItem {
                channel_id: "GGIO1.Ind2".to_string(),
                value: PointValue::Bool(false),
                quality_valid: false,
            },
        );

        let point = store.get(1, 1002).unwrap();
        assert!(!point.valid);
        store.shutdown().await;
    }
}
