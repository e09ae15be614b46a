//! Error kinds surfaced by the MAC engine.
//!
//! The engine is a `no_std` crate with no dynamic allocation story, so, like
//! `lorawan-device::mac::Error`, this is a plain tagged enum rather than a
//! `thiserror`/`anyhow`-style object. Every variant carries whatever context
//! a trace line needs; nothing here requires the caller to downcast.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// MType received on downlink was an uplink-only type, or DevAddr didn't match the session.
    WrongFrameType,
    /// MIC verification failed.
    BadMic,
    /// 16-bit FCnt could not be reconstructed against the stored 32-bit counter (replay or
    /// out-of-window).
    FcntReplay,
    /// Frame shorter than the minimum FHDR+MIC size for its MType.
    PayloadTooShort,
    /// FPort 0 with nonzero FOptsLen (MAC commands may not appear in both places at once).
    ReservedPortWithFopts,
    /// Accumulated MAC answers would not fit in FOpts and no FRMPayload fallback was possible.
    FoptsOverflow,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    InvalidDataRate,
    InvalidFrequency,
    InvalidPowerIndex,
    InvalidDrOffset,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Protocol(ProtocolError),
    Config(ConfigError),
    /// The radio planner's slot was occupied; retry next tick.
    SchedulerBusy,
    /// `adr_ack_cnt + adr_ack_cnt_confirmed_frame` exceeded `NO_RX_PACKET_CNT`.
    LinkLost,
    /// Not joined when a data frame send was attempted.
    NotJoined,
    /// The regulatory/network duty-cycle gate (spec §4.9) has not yet
    /// elapsed; the caller should retry after the wait.
    DutyCycle,
    /// Unknown planner status or unsupported modulation: not locally recoverable.
    Fatal,
}

pub type Result<T = ()> = core::result::Result<T, Error>;

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}
