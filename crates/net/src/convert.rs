//! Conversions between proto types and domain types.

use abd_common::StampedValue;
use abd_proto::kv as pb;

pub fn stamped_value_to_proto(sv: &StampedValue) -> pb::StampedValue {
    pb::StampedValue {
        value: sv.value.clone(),
        timestamp: sv.timestamp,
        writer_id: sv.writer_id.clone(),
    }
}

pub fn stamped_value_from_proto(proto: pb::StampedValue) -> StampedValue {
    StampedValue {
        value: proto.value,
        timestamp: proto.timestamp,
        writer_id: proto.writer_id,
    }
}
