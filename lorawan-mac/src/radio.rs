//! Radio Abstraction Layer (RAL): the chip-level capability surface the MAC
//! engine drives through the planner. Out of scope per spec §6 ("the radio
//! abstraction that writes registers") — this module only defines the
//! parameter bundles and the trait a concrete driver implements; no chip
//! register access lives here.

pub use lora_modulation::BaseBandModulationParams;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RfConfig {
    pub frequency: u32,
    pub bb: BaseBandModulationParams,
}

/// GFSK (FSK) modulation parameters, used by a handful of regions for the
/// beacon/ping-slot channel; carried here as a parameter bundle only (spec
/// §6's "GFSK TX/RX" params) even though this crate's one concrete region
/// (EU868) never selects it.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfskConfig {
    pub frequency: u32,
    pub bitrate_bps: u32,
    pub bw_ssb_hz: u32,
    pub preamble_len: u16,
    pub sync_word: [u8; 3],
    pub whitening_seed: u16,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modulation {
    Lora(RfConfig),
    Gfsk(GfskConfig),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxParams {
    pub modulation: Modulation,
    /// dBm, after board EIRP adjustment.
    pub power_dbm: i8,
    pub payload_len: u8,
    pub invert_iq: bool,
    pub crc: bool,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxParams {
    pub modulation: Modulation,
    /// `None` = continuous reception (used for Class-A RX2 fallback windows
    /// that never time out on their own; the planner still bounds duration).
    pub symb_timeout: Option<u16>,
    pub timeout_ms: u32,
    pub invert_iq: bool,
    pub crc: bool,
    pub max_payload: u8,
}

/// Outcome of a radio task as reported by an IRQ, latched by the planner
/// before the owning hook's callback runs (spec §4.1).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqStatus {
    TxDone,
    RxDone,
    RxTimeout,
    RxCrcError,
    /// A higher-priority scheduled task preempted this one, or the window
    /// closed before the radio could be armed.
    Aborted,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxQuality {
    pub rssi: i16,
    pub snr: i8,
}

/// The capability surface a chip driver implements. The planner is the only
/// caller; the MAC engine never touches a `Ral` directly.
pub trait Ral {
    /// Maximum bytes the driver's internal TX/RX buffer can hold.
    const MAX_PAYLOAD: usize;

    fn configure_tx(&mut self, params: &TxParams, payload: &[u8]);
    fn configure_rx(&mut self, params: &RxParams);
    fn start_tx(&mut self);
    fn start_rx(&mut self);
    fn stop(&mut self);

    /// Non-blocking poll of the radio's IRQ line; returns `None` if nothing
    /// happened since the last poll.
    fn irq_status(&mut self) -> Option<IrqStatus>;

    fn rx_quality(&self) -> RxQuality;
    /// Length of the last received payload, and a scratch copy into `out`.
    /// Returns the number of bytes written.
    fn read_rx_payload(&mut self, out: &mut [u8]) -> usize;
}
