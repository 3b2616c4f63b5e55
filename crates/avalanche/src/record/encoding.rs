//! Protobuf payload encoding.
//!
//! Payloads use the `UserApps` message consumers already read:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1;
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use bytes::Bytes;
use prost::Message;

use super::Record;

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserApps {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

pub(super) fn encode(record: &Record) -> Bytes {
    let message = UserApps {
        apps: record.app_ids.clone(),
        lat: Some(record.lat),
        lon: Some(record.lon),
    };
    Bytes::from(message.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(app_ids: Vec<u32>) -> Record {
        Record {
            category: "idfa".to_string(),
            id: "1rfw452y52g2gq4g".to_string(),
            lat: 55.55,
            lon: 42.42,
            app_ids,
        }
    }

    #[test]
    fn test_payload_decodes_to_same_fields() {
        let kv = record(vec![1423, 43, 567, 3, 7, 23]).to_key_value();

        assert_eq!(kv.key, "idfa:1rfw452y52g2gq4g");
        let decoded = UserApps::decode(kv.payload).unwrap();
        assert_eq!(decoded.apps, vec![1423, 43, 567, 3, 7, 23]);
        assert_eq!(decoded.lat, Some(55.55));
        assert_eq!(decoded.lon, Some(42.42));
    }

    #[test]
    fn test_empty_app_list_still_carries_coordinates() {
        let kv = record(Vec::new()).to_key_value();
        let decoded = UserApps::decode(kv.payload).unwrap();
        assert!(decoded.apps.is_empty());
        assert_eq!(decoded.lat, Some(55.55));
    }

    #[test]
    fn test_apps_are_not_packed() {
        // Unpacked repeated field: one tag byte (field 1, varint) per element.
        let payload = encode(&record(vec![5, 6]));
        assert_eq!(&payload[..4], &[0x08, 0x05, 0x08, 0x06]);
    }
}
