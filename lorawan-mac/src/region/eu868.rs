//! EU868 channel plan: the one concrete regional table this crate carries.
//!
//! Grounded on `lorawan-device::region::dynamic_channel_plans::eu868` (same
//! datarate table, same three default join channels, same RX2 default) but
//! flattened out of the teacher's generic `DynamicChannelPlan<N, M, R>`
//! machinery, which exists there to support nine regions at once. Spec §1's
//! Non-goal ("specific regional plan enumeration") and §2's REAL budget note
//! ("stubbed against a table") license keeping exactly one region and
//! dropping that generality.

use super::Datarate;
use lora_modulation::{Bandwidth, CodingRate, SpreadingFactor};

pub(crate) const NUM_DATARATES: usize = 7;
pub(crate) const MIN_DR: u8 = 0;
pub(crate) const MAX_DR: u8 = 5;

pub(crate) const DEFAULT_JOIN_CHANNELS: [u32; 3] = [868_100_000, 868_300_000, 868_500_000];
pub(crate) const DEFAULT_RX2_FREQ: u32 = 869_525_000;
pub(crate) const DEFAULT_RX2_DR: u8 = 0;
pub(crate) const FREQ_MIN: u32 = 863_000_000;
pub(crate) const FREQ_MAX: u32 = 870_000_000;
pub(crate) const DEFAULT_EIRP_DBM: i8 = 14;

pub(crate) const DATARATES: [Datarate; NUM_DATARATES] = [
    Datarate {
        spreading_factor: SpreadingFactor::_12,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_11,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_10,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
        max_mac_payload_size_with_dwell_time: 59,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_9,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 123,
        max_mac_payload_size_with_dwell_time: 123,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    },
    Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_250KHz,
        max_mac_payload_size: 250,
        max_mac_payload_size_with_dwell_time: 250,
    },
];

pub(crate) const DEFAULT_CODING_RATE: CodingRate = CodingRate::_4_5;

/// Power index -> dBm, EU868's fixed step table (index 0 is max EIRP, -2 dBm
/// per step, per LoRaWAN Regional Parameters §2.1). Index 7 is RFU.
pub(crate) fn tx_power_dbm(index: u8) -> Option<i8> {
    match index {
        0 => Some(14),
        1 => Some(12),
        2 => Some(10),
        3 => Some(8),
        4 => Some(6),
        5 => Some(4),
        6 => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn power_table_monotonic() {
        let mut last = i8::MAX;
        for i in 0..7 {
            let dbm = tx_power_dbm(i).unwrap();
            assert!(dbm <= last);
            last = dbm;
        }
        assert_eq!(tx_power_dbm(7), None);
    }
}
