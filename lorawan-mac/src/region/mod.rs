//! Regional Abstraction (REAL): the parameter oracle named in spec §4.4
//! ("Regional Abstraction (REAL)... stubbed against a table"). This module
//! answers static questions about the regulatory plan (valid data rates,
//! default channels, EIRP table, symbol time); it owns no mutable session
//! state. Mutable per-session regional parameters (channel mask, RX1/RX2
//! offset and frequency, current DR, TX power index, dwell-time flags) live
//! in [`crate::mac::session::Session`] per spec §3's data model, exactly the
//! fields MAC commands like `LinkADRReq`/`NewChannelReq` mutate.
//!
//! Only EU868 is implemented (spec §1 Non-goal: "specific regional plan
//! enumeration"); the trait below is the seam a second region would plug
//! into without touching the MAC engine.

pub(crate) mod constants;
mod eu868;

use lora_modulation::{Bandwidth, BaseBandModulationParams, CodingRate, SpreadingFactor};
use lorawan::parser::CfList;

pub use constants::*;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Datarate {
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
    pub max_mac_payload_size: u8,
    pub max_mac_payload_size_with_dwell_time: u8,
}

/// Every region this crate could support implements this; EU868 is the only
/// one provided. All methods are static (no mutable per-session data lives
/// behind REAL) to mirror the teacher's `ChannelRegion`/`DynamicChannelRegion`
/// static dispatch, collapsed to a single implementor.
pub trait RegionalDatabase {
    fn datarate(dr: u8) -> Option<Datarate>;
    fn min_dr() -> u8;
    fn max_dr() -> u8;
    fn default_join_channels() -> &'static [u32];
    fn default_rx2() -> (u32, u8);
    fn frequency_valid(freq_hz: u32) -> bool;
    fn tx_power_dbm(index: u8) -> Option<i8>;
    fn coding_rate() -> CodingRate;
    fn default_eirp_dbm() -> i8;
    fn join_accept_delay1_ms() -> u32;
    fn join_accept_delay2_ms() -> u32;

    fn max_payload_size(dr: u8, dwell_time: bool) -> u8 {
        match Self::datarate(dr) {
            Some(d) if dwell_time => d.max_mac_payload_size_with_dwell_time,
            Some(d) => d.max_mac_payload_size,
            None => 0,
        }
    }

    /// RX1 data rate as a function of TX data rate and the RX1DROffset MAC
    /// parameter. EU868's table is monotonic, so the relationship is a
    /// simple clamped subtraction (regions with a non-monotonic table, e.g.
    /// US915, would override this).
    fn rx1_datarate(tx_dr: u8, rx1_dr_offset: u8) -> u8 {
        let min = Self::min_dr();
        let lowered = tx_dr.saturating_sub(rx1_dr_offset);
        if lowered < min {
            min
        } else {
            lowered
        }
    }

    fn rx1_dr_offset_valid(offset: u8) -> bool {
        offset <= 5
    }

    /// Decodes a dynamic-channel CFList into its up-to-5 extra uplink/
    /// downlink frequencies (EU868 CFList is always the dynamic-channel
    /// variant; a fixed-channel-mask region would decode the other arm).
    fn decode_cf_list(cf_list: &CfList<'_>) -> heapless::Vec<u32, 5> {
        let mut out = heapless::Vec::new();
        if let CfList::DynamicChannel(freqs) = cf_list {
            for f in freqs.iter() {
                let hz = f.value();
                if hz != 0 {
                    let _ = out.push(hz);
                }
            }
        }
        out
    }

    /// Symbol duration, rounded up to whole milliseconds, for the RX window
    /// width/offset formula (spec §4.3). `lora-modulation` keeps its
    /// pre-computed `t_sym_us` private, so this recomputes the same
    /// `2^SF / BW` quantity its constructor derives.
    fn symbol_time_ms(bb: BaseBandModulationParams) -> u32 {
        let t_sym_us = 2u32.pow(bb.sf.factor()) * 1_000_000 / bb.bw.hz();
        (t_sym_us + 999) / 1000
    }

    /// Maps a `DutyCycleReq`'s `MaxDCycle` index to the mandatory silence
    /// after a transmission of `toa_ms`, per spec §4.9 /
    /// `network_next_free_duty_cycle_ms()`. Index 0 means unrestricted
    /// (network-imposed duty cycle off); index N means a duty cycle of
    /// `1/2^N`, so the radio must stay off for `toa_ms * (2^N - 1)` to keep
    /// that ratio.
    fn duty_cycle_off_ms(index: u8, toa_ms: u32) -> u32 {
        if index == 0 {
            return 0;
        }
        let divisor = 1u32 << index.min(15);
        toa_ms.saturating_mul(divisor - 1)
    }
}

pub struct Eu868;

impl RegionalDatabase for Eu868 {
    fn datarate(dr: u8) -> Option<Datarate> {
        eu868::DATARATES.get(dr as usize).copied()
    }
    fn min_dr() -> u8 {
        eu868::MIN_DR
    }
    fn max_dr() -> u8 {
        eu868::MAX_DR
    }
    fn default_join_channels() -> &'static [u32] {
        &eu868::DEFAULT_JOIN_CHANNELS
    }
    fn default_rx2() -> (u32, u8) {
        (eu868::DEFAULT_RX2_FREQ, eu868::DEFAULT_RX2_DR)
    }
    fn frequency_valid(freq_hz: u32) -> bool {
        (eu868::FREQ_MIN..=eu868::FREQ_MAX).contains(&freq_hz)
    }
    fn tx_power_dbm(index: u8) -> Option<i8> {
        eu868::tx_power_dbm(index)
    }
    fn coding_rate() -> CodingRate {
        eu868::DEFAULT_CODING_RATE
    }
    fn default_eirp_dbm() -> i8 {
        eu868::DEFAULT_EIRP_DBM
    }
    fn join_accept_delay1_ms() -> u32 {
        JOIN_ACCEPT_DELAY1_MS
    }
    fn join_accept_delay2_ms() -> u32 {
        JOIN_ACCEPT_DELAY2_MS
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rx1_datarate_clamps_at_min() {
        assert_eq!(Eu868::rx1_datarate(1, 3), 0);
        assert_eq!(Eu868::rx1_datarate(5, 1), 4);
    }

    #[test]
    fn eu868_frequency_range() {
        assert!(Eu868::frequency_valid(868_100_000));
        assert!(!Eu868::frequency_valid(862_000_000));
        assert!(!Eu868::frequency_valid(871_000_000));
    }
}
