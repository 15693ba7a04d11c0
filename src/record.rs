//! Advertisement record parsing.
//!
//! Splits a legacy advertisement payload into its AD structures. This is a
//! generic structural parse; interpreting vendor-specific manufacturer data is
//! left to the host.

use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::trace;
use uuid::Uuid;

use crate::error::{Error, Result};

/// AD structure type codes from the Bluetooth Assigned Numbers document.
pub mod ad_type {
    /// Flags.
    pub const FLAGS: u8 = 0x01;
    /// Incomplete list of 16-bit service UUIDs.
    pub const SERVICE_UUIDS_16_PARTIAL: u8 = 0x02;
    /// Complete list of 16-bit service UUIDs.
    pub const SERVICE_UUIDS_16_COMPLETE: u8 = 0x03;
    /// Incomplete list of 32-bit service UUIDs.
    pub const SERVICE_UUIDS_32_PARTIAL: u8 = 0x04;
    /// Complete list of 32-bit service UUIDs.
    pub const SERVICE_UUIDS_32_COMPLETE: u8 = 0x05;
    /// Incomplete list of 128-bit service UUIDs.
    pub const SERVICE_UUIDS_128_PARTIAL: u8 = 0x06;
    /// Complete list of 128-bit service UUIDs.
    pub const SERVICE_UUIDS_128_COMPLETE: u8 = 0x07;
    /// Shortened local name.
    pub const LOCAL_NAME_SHORT: u8 = 0x08;
    /// Complete local name.
    pub const LOCAL_NAME_COMPLETE: u8 = 0x09;
    /// TX power level.
    pub const TX_POWER_LEVEL: u8 = 0x0A;
    /// Service data with a 16-bit UUID.
    pub const SERVICE_DATA_16: u8 = 0x16;
    /// Service data with a 32-bit UUID.
    pub const SERVICE_DATA_32: u8 = 0x20;
    /// Service data with a 128-bit UUID.
    pub const SERVICE_DATA_128: u8 = 0x21;
    /// Manufacturer specific data.
    pub const MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;
}

/// The Bluetooth base UUID that short UUIDs are expanded into.
pub const BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Expand a 16- or 32-bit assigned number into a full UUID.
pub fn uuid_from_short(value: u32) -> Uuid {
    Uuid::from_u128(BASE_UUID.as_u128() | ((value as u128) << 96))
}

/// Parsed AD structures from one advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanRecord {
    /// Advertising flags, if present.
    pub advertise_flags: Option<u8>,
    /// Advertised service UUIDs, expanded to 128 bits.
    pub service_uuids: Vec<Uuid>,
    /// Complete or shortened local name.
    pub local_name: Option<String>,
    /// Advertised TX power in dBm.
    pub tx_power_level: Option<i8>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// The raw bytes this record was parsed from.
    pub bytes: Bytes,
}

impl ScanRecord {
    /// Parse a record from raw advertisement bytes.
    ///
    /// A zero length byte terminates the payload, since controllers pad
    /// advertisements with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] for an empty payload or a structure that
    /// runs past the end of the buffer.
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidData {
                context: "Advertisement payload is empty".to_string(),
            });
        }

        let mut record = ScanRecord {
            bytes: Bytes::copy_from_slice(data),
            ..Default::default()
        };

        let mut offset = 0;
        while offset < data.len() {
            let length = data[offset] as usize;
            if length == 0 {
                break;
            }

            let end = offset + 1 + length;
            if end > data.len() {
                return Err(Error::InvalidData {
                    context: format!(
                        "AD structure at offset {} needs {} bytes, {} available",
                        offset,
                        length,
                        data.len() - offset - 1
                    ),
                });
            }

            let field_type = data[offset + 1];
            let field = &data[offset + 2..end];
            record.apply_field(field_type, field)?;

            offset = end;
        }

        Ok(record)
    }

    fn apply_field(&mut self, field_type: u8, field: &[u8]) -> Result<()> {
        match field_type {
            ad_type::FLAGS => {
                self.advertise_flags = field.first().copied();
            }
            ad_type::SERVICE_UUIDS_16_PARTIAL | ad_type::SERVICE_UUIDS_16_COMPLETE => {
                self.service_uuids.extend(Self::parse_uuid_list(field, 2)?);
            }
            ad_type::SERVICE_UUIDS_32_PARTIAL | ad_type::SERVICE_UUIDS_32_COMPLETE => {
                self.service_uuids.extend(Self::parse_uuid_list(field, 4)?);
            }
            ad_type::SERVICE_UUIDS_128_PARTIAL | ad_type::SERVICE_UUIDS_128_COMPLETE => {
                self.service_uuids.extend(Self::parse_uuid_list(field, 16)?);
            }
            ad_type::LOCAL_NAME_SHORT | ad_type::LOCAL_NAME_COMPLETE => {
                self.local_name = Some(String::from_utf8_lossy(field).into_owned());
            }
            ad_type::TX_POWER_LEVEL => {
                self.tx_power_level = field.first().map(|b| *b as i8);
            }
            ad_type::SERVICE_DATA_16 => self.insert_service_data(field, 2)?,
            ad_type::SERVICE_DATA_32 => self.insert_service_data(field, 4)?,
            ad_type::SERVICE_DATA_128 => self.insert_service_data(field, 16)?,
            ad_type::MANUFACTURER_SPECIFIC_DATA => {
                if field.len() < 2 {
                    return Err(Error::InvalidData {
                        context: "Manufacturer data shorter than company identifier".to_string(),
                    });
                }
                let company_id = u16::from_le_bytes([field[0], field[1]]);
                self.manufacturer_data
                    .insert(company_id, field[2..].to_vec());
            }
            other => {
                trace!("Skipping AD structure type {:#04x}", other);
            }
        }
        Ok(())
    }

    fn insert_service_data(&mut self, field: &[u8], uuid_len: usize) -> Result<()> {
        if field.len() < uuid_len {
            return Err(Error::InvalidData {
                context: format!("Service data shorter than its {}-byte UUID", uuid_len),
            });
        }
        let uuid = Self::parse_uuid(&field[..uuid_len]);
        self.service_data.insert(uuid, field[uuid_len..].to_vec());
        Ok(())
    }

    fn parse_uuid_list(field: &[u8], uuid_len: usize) -> Result<Vec<Uuid>> {
        if field.len() % uuid_len != 0 {
            return Err(Error::InvalidData {
                context: format!(
                    "Service UUID list of {} bytes is not a multiple of {}",
                    field.len(),
                    uuid_len
                ),
            });
        }
        Ok(field.chunks_exact(uuid_len).map(Self::parse_uuid).collect())
    }

    /// Parse a little-endian UUID of 2, 4 or 16 bytes.
    fn parse_uuid(bytes: &[u8]) -> Uuid {
        match bytes.len() {
            2 => uuid_from_short(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
            4 => uuid_from_short(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            _ => {
                let mut be = [0u8; 16];
                for (dst, src) in be.iter_mut().zip(bytes.iter().rev()) {
                    *dst = *src;
                }
                Uuid::from_bytes(be)
            }
        }
    }

    /// Encode the parsed fields back into AD structures.
    ///
    /// UUIDs are always written in their 128-bit form. Fields that would not
    /// fit a single AD structure are skipped.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();

        fn push(out: &mut Vec<u8>, field_type: u8, body: &[u8]) {
            if body.len() < u8::MAX as usize {
                out.push(body.len() as u8 + 1);
                out.push(field_type);
                out.extend_from_slice(body);
            }
        }

        fn uuid_le(uuid: &Uuid) -> [u8; 16] {
            let mut le = *uuid.as_bytes();
            le.reverse();
            le
        }

        if let Some(flags) = self.advertise_flags {
            push(&mut out, ad_type::FLAGS, &[flags]);
        }
        if !self.service_uuids.is_empty() {
            let body: Vec<u8> = self.service_uuids.iter().flat_map(uuid_le).collect();
            push(&mut out, ad_type::SERVICE_UUIDS_128_COMPLETE, &body);
        }
        if let Some(name) = &self.local_name {
            push(&mut out, ad_type::LOCAL_NAME_COMPLETE, name.as_bytes());
        }
        if let Some(tx_power) = self.tx_power_level {
            push(&mut out, ad_type::TX_POWER_LEVEL, &[tx_power as u8]);
        }
        for (uuid, data) in &self.service_data {
            let mut body = uuid_le(uuid).to_vec();
            body.extend_from_slice(data);
            push(&mut out, ad_type::SERVICE_DATA_128, &body);
        }
        for (company_id, data) in &self.manufacturer_data {
            let mut body = company_id.to_le_bytes().to_vec();
            body.extend_from_slice(data);
            push(&mut out, ad_type::MANUFACTURER_SPECIFIC_DATA, &body);
        }

        Bytes::from(out)
    }

    /// Manufacturer data for a company identifier.
    pub fn manufacturer_specific_data(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }

    /// Service data for a service UUID.
    pub fn service_data_for(&self, uuid: &Uuid) -> Option<&[u8]> {
        self.service_data.get(uuid).map(Vec::as_slice)
    }

    /// Check whether a service UUID is advertised.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid) || self.service_data.contains_key(uuid)
    }
}

/// Converts raw advertisement bytes into a structured record.
pub trait RecordParser: Send + Sync {
    /// Parse `bytes`, returning `None` when the payload is not understood.
    fn parse(&self, bytes: &[u8]) -> Option<ScanRecord>;
}

/// Parser for standard AD structures.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvertisementParser;

impl RecordParser for AdvertisementParser {
    fn parse(&self, bytes: &[u8]) -> Option<ScanRecord> {
        match ScanRecord::parse_from_bytes(bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!("Unparsable advertisement: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);

    #[test]
    fn test_uuid_from_short() {
        assert_eq!(uuid_from_short(0x180d), HEART_RATE_SERVICE);
        assert_eq!(
            uuid_from_short(0x1234_5678),
            Uuid::from_u128(0x1234_5678_0000_1000_8000_00805f9b34fb)
        );
    }

    #[test]
    fn test_parse_typical_advertisement() {
        let data = [
            0x02, 0x01, 0x06, // flags
            0x03, 0x03, 0x0d, 0x18, // 16-bit service UUID 0x180D
            0x05, 0x09, b'P', b'o', b'l', b'r', // complete local name
            0x02, 0x0A, 0xF4, // tx power -12
            0x05, 0xFF, 0x4C, 0x00, 0x02, 0x15, // Apple manufacturer data
        ];

        let record = ScanRecord::parse_from_bytes(&data).unwrap();
        assert_eq!(record.advertise_flags, Some(0x06));
        assert_eq!(record.service_uuids, vec![HEART_RATE_SERVICE]);
        assert_eq!(record.local_name.as_deref(), Some("Polr"));
        assert_eq!(record.tx_power_level, Some(-12));
        assert_eq!(record.manufacturer_specific_data(0x004C), Some(&[0x02, 0x15][..]));
        assert_eq!(record.bytes.as_ref(), &data[..]);
        assert!(record.advertises_service(&HEART_RATE_SERVICE));
    }

    #[test]
    fn test_parse_service_data_and_128_bit_uuid() {
        let service = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        let mut le = *service.as_bytes();
        le.reverse();

        let mut data = vec![0x11, ad_type::SERVICE_UUIDS_128_COMPLETE];
        data.extend_from_slice(&le);
        data.extend_from_slice(&[0x04, ad_type::SERVICE_DATA_16, 0x0f, 0x18, 0x64]);

        let record = ScanRecord::parse_from_bytes(&data).unwrap();
        assert_eq!(record.service_uuids, vec![service]);
        assert_eq!(record.service_data_for(&uuid_from_short(0x180f)), Some(&[0x64][..]));
    }

    #[test]
    fn test_zero_padding_terminates() {
        let mut data = vec![0x02, 0x01, 0x1a];
        data.resize(31, 0);

        let record = ScanRecord::parse_from_bytes(&data).unwrap();
        assert_eq!(record.advertise_flags, Some(0x1a));
        assert!(record.service_uuids.is_empty());
    }

    #[test]
    fn test_truncated_structure_is_rejected() {
        let data = [0x05, 0x09, b'a', b'b'];
        assert!(ScanRecord::parse_from_bytes(&data).is_err());
        assert!(AdvertisementParser.parse(&data).is_none());
    }

    #[test]
    fn test_malformed_fields_are_rejected() {
        // odd-length 16-bit UUID list
        assert!(ScanRecord::parse_from_bytes(&[0x04, 0x03, 0x0d, 0x18, 0x0f]).is_err());
        // manufacturer data without a company id
        assert!(ScanRecord::parse_from_bytes(&[0x02, 0xFF, 0x4C]).is_err());
        // empty payload
        assert!(AdvertisementParser.parse(&[]).is_none());
    }

    #[test]
    fn test_unknown_types_are_skipped() {
        let data = [0x03, 0x19, 0x40, 0x02, 0x02, 0x01, 0x02];
        let record = ScanRecord::parse_from_bytes(&data).unwrap();
        assert_eq!(record.advertise_flags, Some(0x02));
    }

    #[test]
    fn test_encoded_record_parses_back() {
        let mut record = ScanRecord {
            advertise_flags: Some(0x06),
            service_uuids: vec![HEART_RATE_SERVICE],
            local_name: Some("Sensor".to_string()),
            tx_power_level: Some(4),
            ..Default::default()
        };
        record.manufacturer_data.insert(0x0059, vec![1, 2, 3]);
        record.service_data.insert(HEART_RATE_SERVICE, vec![0x48]);

        let bytes = record.to_bytes();
        let parsed = ScanRecord::parse_from_bytes(&bytes).unwrap();

        assert_eq!(parsed.service_uuids, record.service_uuids);
        assert_eq!(parsed.local_name, record.local_name);
        assert_eq!(parsed.manufacturer_data, record.manufacturer_data);
        assert_eq!(parsed.service_data, record.service_data);
        assert_eq!(parsed.tx_power_level, Some(4));
    }
}
