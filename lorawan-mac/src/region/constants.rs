#![allow(dead_code)]
use lora_modulation::{Bandwidth, CodingRate, SpreadingFactor};

pub(crate) const RECEIVE_DELAY1_MS: u32 = 1000;
pub(crate) const JOIN_ACCEPT_DELAY1_MS: u32 = 5000;
pub(crate) const JOIN_ACCEPT_DELAY2_MS: u32 = 6000;
pub(crate) const MAX_FCNT_GAP: u32 = 16384;

pub(crate) const ADR_ACK_LIMIT: u32 = 64;
pub(crate) const ADR_ACK_DELAY: u32 = 32;

/// Confirmed uplinks without a downlink before the ADR loop forces DR down a
/// step and resets the confirmed counter. Not standardized by LoRaWAN itself
/// (it's a stack-specific watchdog, per spec §4.6); the reference C firmware
/// this crate's ADR loop is grounded on doesn't ship a value in the files
/// retained for this exercise, so this follows the same spirit as
/// `ADR_ACK_LIMIT`/`ADR_ACK_DELAY` but scaled down for the confirmed-traffic
/// case, which is expected to be far less frequent than unconfirmed uplinks.
pub(crate) const ADR_LIMIT_CONF_UP: u32 = 4;

/// Combined unconfirmed+confirmed count with no valid downlink at which the
/// link is declared lost (spec §4.6, §7 `LinkLost`). Chosen generously above
/// `ADR_ACK_LIMIT + ADR_ACK_DELAY` so ADR fallback gets a full chance to find
/// a working DR before the engine gives up and asks the host to re-Join.
pub(crate) const NO_RX_PACKET_CNT: u32 = 192;

/// Receiver clock error budget, in parts-per-thousand, used by the RX window
/// width/offset formula (spec §4.3). 10 ppt (1%) matches a typical crystal
/// oscillator's post-calibration drift.
pub(crate) const CLOCK_ACCURACY_PPT: u32 = 10;

/// Minimum receive window width, in symbols (spec §4.3's `MIN_SYMB`).
pub(crate) const MIN_SYMB: u32 = 6;

pub(crate) const DEFAULT_BANDWIDTH: Bandwidth = Bandwidth::_125KHz;
pub(crate) const DEFAULT_SPREADING_FACTOR: SpreadingFactor = SpreadingFactor::_7;
pub(crate) const DEFAULT_CODING_RATE: CodingRate = CodingRate::_4_5;
pub(crate) const DEFAULT_DBM: i8 = 14;
