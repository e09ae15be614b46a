#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A LoRaWAN 1.0.x Class A MAC engine.
//!
//! This crate implements the protocol layer of a LoRaWAN end-device: frame
//! build/encrypt, downlink authentication and frame-counter windowing, MAC
//! command parsing, the ADR control loop, the Join procedure with
//! regulatory back-off, and the RX1/RX2 window-timing state machine. It owns
//! no radio hardware itself; a [`radio::Ral`] implementation and a single
//! [`region::RegionalDatabase`] are supplied by the host application, the
//! same split `lorawan-device` uses between its MAC state and its
//! `radio::PhyRxTx` trait.
//!
//! ## Feature flags
//!
//! - `default-crypto` (default): pure-Rust AES/CMAC via [`lorawan::default_crypto`].
//! - `defmt`: implement [`defmt::Format`] on public types for embedded trace output.
//! - `serde`: implement `serde::{Serialize, Deserialize}` on [`mac::session::Session`]
//!   and [`nvm::JoinState`] so a host can persist them across reboots.

pub mod clock;
pub mod error;
pub mod mac;
pub mod nvm;
pub mod planner;
pub mod radio;
pub mod region;

pub use error::Error;
pub use mac::{Configuration, Event, Frame, Mac, State, Window};
pub use mac::otaa::JoinCredentials;
pub use mac::session::Session;
pub use planner::{HookId, Planner};
pub use radio::Ral;
pub use region::{Eu868, RegionalDatabase};
