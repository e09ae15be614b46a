//! The Class A MAC engine: ties the radio planner, the regional database
//! and the session/OTAA/command/ADR logic into one state machine per spec
//! §4. One TX hook and two RX hooks are registered on the shared
//! [`Planner`]; everything else is an explicit `enum State` transition,
//! following the teacher's `nb_device::state` idiom of modeling the
//! protocol as data rather than as a tangle of booleans.

pub mod adr;
pub mod commands;
pub mod otaa;
pub mod session;

use heapless::Vec;
use lora_modulation::{Bandwidth, SpreadingFactor};
use lorawan::parser::DataHeader;
use rand_core::RngCore;

use crate::clock::{self, TimestampMs};
use crate::error::Error;
use crate::planner::{HookId, Planner, Task, TaskKind, TaskState};
use crate::radio::{Modulation, RfConfig, Ral, RxParams, TxParams};
use crate::region::{
    Eu868, RegionalDatabase, CLOCK_ACCURACY_PPT, JOIN_ACCEPT_DELAY2_MS, MIN_SYMB,
    RECEIVE_DELAY1_MS,
};

use commands::LinkStatus;
use otaa::{JoinBackoff, JoinCredentials};
use session::Session;

/// Frames the engine can hand to the application layer on the RX path.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Uplink,
    JoinRequest,
}

/// Which receive window a radio event belongs to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Rx1,
    Rx2,
}

/// Fixed radio/regulatory parameters the device was built with; everything
/// mutable lives on [`Session`] once joined.
#[derive(Debug, Clone, Copy)]
pub struct Configuration {
    pub board_delay_ms: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self { board_delay_ms: 10 }
    }
}

/// The explicit per-uplink state machine (teacher's enum-state idiom,
/// applied to the Class A send/receive cycle of spec §4.1-4.3).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    TxOn,
    WaitingRx1,
    WaitingRx2,
    Done,
}

/// Outcome surfaced to the application after a call to [`Mac::poll`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TxDone,
    Downlink { confirmed_ack: bool },
    NoDownlink,
    Joined,
    JoinRejected,
    LinkLost,
}

/// Computes an RX window's width (in symbols) and its start offset relative
/// to `rx_delay_ms` after the uplink's end, per spec §4.3's exact formula
/// (grounded on `compute_rx_window_parameters` in the reference C stack):
///
/// ```text
/// rx_error_ms   = CLOCK_ACCURACY_PPT * rx_delay_ms / 1000
/// rx_window_symb = max((2*MIN_SYMB-8) + ((2*rx_error_ms*bw) >> sf), MIN_SYMB) + 1
/// rx_offset_ms  = -ceil(4*t_sym - (rx_window_symb*t_sym/2) - board_delay_ms)
/// ```
pub fn rx_window_params(
    rx_delay_ms: u32,
    sf: SpreadingFactor,
    bw: Bandwidth,
    board_delay_ms: u32,
) -> (u32, i32) {
    let rx_error_ms = CLOCK_ACCURACY_PPT * rx_delay_ms / 1000;
    let bw_khz = bw.hz() / 1000;
    let sf_factor = sf.factor();
    let widened = (2 * rx_error_ms * bw_khz) >> sf_factor;
    let rx_window_symb = core::cmp::max((2 * MIN_SYMB).saturating_sub(8) + widened + 1, MIN_SYMB);

    let t_sym_us = 2u32.pow(sf.factor()) * 1_000_000 / bw.hz();
    let t_sym_ms = (t_sym_us + 999) / 1000;
    let half_window_ms = (rx_window_symb * t_sym_ms) / 2;
    let four_sym_ms = 4 * t_sym_ms;
    let raw = four_sym_ms as i64 - half_window_ms as i64 - board_delay_ms as i64;
    let offset_ms = -(raw.max(0) as i32);

    (rx_window_symb, offset_ms)
}

/// The MAC engine itself. `HOOKS` is fixed at 3: TX, RX1, RX2.
pub struct Mac<R: Ral> {
    planner: Planner<R, 3>,
    tx_hook: HookId,
    rx1_hook: HookId,
    rx2_hook: HookId,
    config: Configuration,
    session: Option<Session>,
    dev_nonce: u16,
    join_attempts: u32,
    pending_join: Option<JoinCredentials>,
    state: State,
    tx_started_ms: TimestampMs,
    tx_confirmed: bool,
    /// Frequency the most recent frame was transmitted on, so RX1 can listen
    /// on the same channel (EU868's join/uplink channels are symmetric),
    /// mirroring the teacher's `last_tx_channel` bookkeeping.
    tx_freq_hz: u32,
    rx_buf: Vec<u8, 255>,
    tx_buf: [u8; 255],
    /// Regulatory/network duty-cycle gate state (spec §3, §4.9): the radio
    /// must stay silent for `tx_duty_cycle_time_off_ms` after
    /// `tx_duty_cycle_timestamp_ms`.
    tx_duty_cycle_time_off_ms: u32,
    tx_duty_cycle_timestamp_ms: TimestampMs,
}

impl<R: Ral> Mac<R> {
    pub fn new(ral: R, config: Configuration) -> Self {
        let mut planner = Planner::new(ral);
        let tx_hook = planner.register_hook().expect("3 hook slots reserved");
        let rx1_hook = planner.register_hook().expect("3 hook slots reserved");
        let rx2_hook = planner.register_hook().expect("3 hook slots reserved");
        Self {
            planner,
            tx_hook,
            rx1_hook,
            rx2_hook,
            config,
            session: None,
            dev_nonce: 0,
            join_attempts: 0,
            pending_join: None,
            state: State::Idle,
            tx_started_ms: 0,
            tx_confirmed: false,
            tx_freq_hz: Eu868::default_join_channels()[0],
            rx_buf: Vec::new(),
            tx_buf: [0u8; 255],
            tx_duty_cycle_time_off_ms: 0,
            tx_duty_cycle_timestamp_ms: 0,
        }
    }

    /// Milliseconds until the next transmission is allowed by the
    /// network-imposed duty cycle (spec §4.9's
    /// `network_next_free_duty_cycle_ms()`); `0` means the radio is free
    /// now. A scheduler above this layer must not submit a TX while this is
    /// positive — [`Mac::start_uplink`]/[`Mac::start_join`] enforce it.
    pub fn next_free_duty_cycle_ms(&self, now: TimestampMs) -> u32 {
        clock::remaining_ms(now, self.tx_duty_cycle_timestamp_ms, self.tx_duty_cycle_time_off_ms)
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Minimum wait, in ms, before the next Join attempt is regulatorily
    /// allowed (spec §4.7).
    pub fn join_backoff_ms(&self, sf: u8) -> u32 {
        JoinBackoff { attempts_in_window: self.join_attempts, spreading_factor: sf }
            .min_silence_ms()
    }

    /// Starts a Join Request transmission.
    pub fn start_join<RNG: RngCore>(
        &mut self,
        now: TimestampMs,
        creds: &JoinCredentials,
        rng: &mut RNG,
    ) -> Result<(), Error> {
        if self.next_free_duty_cycle_ms(now) > 0 {
            return Err(Error::DutyCycle);
        }
        let bytes = otaa::build_join_request(&mut self.tx_buf, creds, &mut self.dev_nonce)?;
        let len = bytes.len();
        self.join_attempts += 1;
        self.pending_join = Some(*creds);
        self.transmit(now, len, rng)
    }

    /// Starts an application uplink transmission.
    pub fn start_uplink<RNG: RngCore>(
        &mut self,
        now: TimestampMs,
        f_port: u8,
        payload: &[u8],
        confirmed: bool,
        rng: &mut RNG,
    ) -> Result<(), Error> {
        if self.next_free_duty_cycle_ms(now) > 0 {
            return Err(Error::DutyCycle);
        }
        let session = self.session.as_mut().ok_or(Error::NotJoined)?;
        let adr = true;
        let adr_ack_req = adr::adr_ack_req(session);
        adr::arm_retransmission(session);
        session.fcnt_up = session.fcnt_up.wrapping_add(1);

        let mut buf = [0u8; 255];
        let len = {
            let out = session.build_uplink(&mut buf, f_port, payload, confirmed, adr, adr_ack_req)?;
            out.len()
        };
        self.tx_buf[..len].copy_from_slice(&buf[..len]);
        self.tx_confirmed = confirmed;
        self.transmit(now, len, rng)
    }

    /// Picks an uplink channel among those currently enabled, the way a
    /// multi-channel end-device must rather than always using the first
    /// (teacher's `DynamicChannelPlan::get_tx_dr_and_frequency`); before a
    /// session exists, only the three default join channels are candidates.
    fn pick_tx_channel<RNG: RngCore>(&self, rng: &mut RNG) -> u32 {
        match &self.session {
            Some(session) => {
                let channels = session.enabled_tx_channels();
                if channels.is_empty() {
                    Eu868::default_join_channels()[0]
                } else {
                    channels[rng.next_u32() as usize % channels.len()]
                }
            }
            None => {
                let channels = Eu868::default_join_channels();
                channels[rng.next_u32() as usize % channels.len()]
            }
        }
    }

    fn transmit<RNG: RngCore>(
        &mut self,
        now: TimestampMs,
        len: usize,
        rng: &mut RNG,
    ) -> Result<(), Error> {
        let tx_dr = self.session.as_ref().map(|s| s.tx_dr).unwrap_or(5);
        let datarate = Eu868::datarate(tx_dr).ok_or(Error::Fatal)?;
        let freq = self.pick_tx_channel(rng);
        self.tx_freq_hz = freq;
        let bb = lora_modulation::BaseBandModulationParams::new(
            datarate.spreading_factor,
            datarate.bandwidth,
            Eu868::coding_rate(),
        );
        let power = self.session.as_ref().and_then(|s| Eu868::tx_power_dbm(s.tx_power_index)).unwrap_or(14);

        let toa_us = bb.time_on_air_us(Some(8), true, len as u8);
        let toa_ms = (toa_us + 999) / 1000;
        let duty_cycle_index = self.session.as_ref().map(|s| s.max_duty_cycle_index).unwrap_or(0);
        self.tx_duty_cycle_time_off_ms = Eu868::duty_cycle_off_ms(duty_cycle_index, toa_ms);
        self.tx_duty_cycle_timestamp_ms = now;

        let task = Task {
            kind: TaskKind::Tx {
                params: TxParams {
                    modulation: Modulation::Lora(RfConfig { frequency: freq, bb }),
                    power_dbm: power,
                    payload_len: len as u8,
                    invert_iq: false,
                    crc: true,
                },
                payload: &self.tx_buf[..len],
            },
            state: TaskState::Asap,
            start_time_ms: now,
            duration_time_ms: 0,
        };
        self.planner.enqueue(self.tx_hook, task, now).map_err(|_| Error::SchedulerBusy)?;
        self.tx_started_ms = now;
        self.state = State::TxOn;
        Ok(())
    }

    /// Drives the state machine and the radio; call this from the
    /// supervisor loop as often as practical.
    pub fn poll(&mut self, now: TimestampMs) -> Option<Event> {
        let mut scratch = [0u8; 255];
        if let Some((hook, len)) = self.planner.poll(now, &mut scratch) {
            if hook == self.tx_hook {
                self.on_tx_done(now);
                return Some(Event::TxDone);
            }
            if hook == self.rx1_hook || hook == self.rx2_hook {
                let window = if hook == self.rx1_hook { Window::Rx1 } else { Window::Rx2 };
                return self.on_rx_irq(window, &mut scratch[..len]);
            }
        }
        None
    }

    fn on_tx_done(&mut self, now: TimestampMs) {
        let rx_delay_ms = self
            .session
            .as_ref()
            .map(|s| s.rx_delay_s as u32 * 1000)
            .unwrap_or(RECEIVE_DELAY1_MS);
        let (rx2_freq, rx2_dr) =
            self.session.as_ref().map(|s| (s.rx2_freq, s.rx2_dr)).unwrap_or_else(Eu868::default_rx2);

        let dr1 = self
            .session
            .as_ref()
            .map(|s| Eu868::rx1_datarate(s.tx_dr, s.rx1_dr_offset))
            .unwrap_or(0);

        self.schedule_rx(now, rx_delay_ms, dr1, Some(self.tx_freq_hz), Window::Rx1);
        let rx2_delay = if self.session.is_some() { rx_delay_ms + 1000 } else { JOIN_ACCEPT_DELAY2_MS };
        self.schedule_rx(now, rx2_delay, rx2_dr, Some(rx2_freq), Window::Rx2);
        self.state = State::WaitingRx1;
    }

    fn schedule_rx(
        &mut self,
        tx_done_ms: TimestampMs,
        delay_ms: u32,
        dr: u8,
        freq_override: Option<u32>,
        window: Window,
    ) {
        let datarate = match Eu868::datarate(dr) {
            Some(d) => d,
            None => return,
        };
        let (symb, offset_ms) = rx_window_params(
            delay_ms,
            datarate.spreading_factor,
            datarate.bandwidth,
            self.config.board_delay_ms,
        );
        let start = clock::offset_ms(clock::add_ms(tx_done_ms, delay_ms), offset_ms);
        let freq = freq_override.unwrap_or(Eu868::default_join_channels()[0]);
        let bb = lora_modulation::BaseBandModulationParams::new(
            datarate.spreading_factor,
            datarate.bandwidth,
            Eu868::coding_rate(),
        );
        let hook = match window {
            Window::Rx1 => self.rx1_hook,
            Window::Rx2 => self.rx2_hook,
        };
        let task = Task {
            kind: TaskKind::Rx {
                params: RxParams {
                    modulation: Modulation::Lora(RfConfig { frequency: freq, bb }),
                    symb_timeout: Some(symb as u16),
                    timeout_ms: delay_ms + 2000,
                    invert_iq: true,
                    crc: false,
                    max_payload: 255,
                },
            },
            state: TaskState::Scheduled,
            start_time_ms: start,
            duration_time_ms: 0,
        };
        let _ = self.planner.enqueue(hook, task, tx_done_ms);
    }

    fn on_rx_irq(&mut self, window: Window, data: &mut [u8]) -> Option<Event> {
        if data.is_empty() {
            if window == Window::Rx2 {
                self.state = State::Done;
                return Some(self.finish_uplink_without_downlink());
            }
            self.state = State::WaitingRx2;
            return None;
        }

        if self.session.is_none() {
            return self.handle_join_accept(data);
        }

        let outcome = self.handle_data_downlink(data);
        self.state = State::Done;
        Some(outcome)
    }

    fn handle_join_accept(&mut self, data: &mut [u8]) -> Option<Event> {
        self.state = State::Done;
        let creds = match self.pending_join.take() {
            Some(creds) => creds,
            None => return Some(Event::JoinRejected),
        };
        let dev_nonce_sent = self.dev_nonce.wrapping_sub(1);
        match otaa::handle_join_accept(data, &creds.app_key, dev_nonce_sent) {
            Ok(session) => {
                self.session = Some(session);
                self.join_attempts = 0;
                Some(Event::Joined)
            }
            Err(_) => Some(Event::JoinRejected),
        }
    }

    fn handle_data_downlink(&mut self, data: &mut [u8]) -> Event {
        let session = match self.session.as_mut() {
            Some(s) => s,
            None => return Event::JoinRejected,
        };

        let (fcnt_down, ack) = match session.receive_downlink(data) {
            Ok((dec, fcnt_down, _confirmed)) => {
                let ack = dec.fhdr().fctrl().ack();
                let fopts_len = dec.fhdr().fopts_len() as usize;
                let mut cmd_buf = [0u8; 16];
                let mut cmd_len = 0;
                if fopts_len > 0 {
                    cmd_len = fopts_len.min(cmd_buf.len());
                    cmd_buf[..cmd_len].copy_from_slice(&dec.fhdr().data()[..cmd_len]);
                } else if let Some(mac_bytes) = session::extract_mac_payload(&dec.frm_payload()) {
                    cmd_len = mac_bytes.len().min(cmd_buf.len());
                    cmd_buf[..cmd_len].copy_from_slice(&mac_bytes[..cmd_len]);
                }
                drop(dec);

                session.on_valid_downlink(fcnt_down, ack);

                if cmd_len > 0 {
                    let link = LinkStatus { battery: 255, margin_db: 0 };
                    let _ = commands::process_downlink_commands(session, &cmd_buf[..cmd_len], link);
                }

                (fcnt_down, ack)
            }
            Err(_) => {
                let confirmed = self.tx_confirmed;
                let _ = adr::on_uplink_without_downlink(session, confirmed);
                return Event::NoDownlink;
            }
        };
        let _ = fcnt_down;
        Event::Downlink { confirmed_ack: ack }
    }

    fn finish_uplink_without_downlink(&mut self) -> Event {
        let confirmed = self.tx_confirmed;
        if let Some(session) = self.session.as_mut() {
            match adr::on_uplink_without_downlink(session, confirmed) {
                adr::AdrAction::LinkLost => return Event::LinkLost,
                _ => {}
            }
        }
        Event::NoDownlink
    }

    /// Persists join/session state through `store` (spec §6). The host
    /// decides when to call this; the engine never writes to storage on
    /// its own.
    pub fn persist<S: crate::nvm::Store>(&self, store: &mut S) -> Result<(), Error> {
        store.put_join_state(&crate::nvm::JoinState {
            dev_nonce: self.dev_nonce,
            join_attempts: self.join_attempts,
        })?;
        if let Some(session) = &self.session {
            store.put_session(session)?;
        }
        Ok(())
    }

    /// Restores join/session state previously written by [`Mac::persist`],
    /// typically right after boot before the first Join attempt.
    pub fn restore<S: crate::nvm::Store>(&mut self, store: &mut S) -> Result<(), Error> {
        if let Some(join) = store.get_join_state()? {
            self.dev_nonce = join.dev_nonce;
            self.join_attempts = join.join_attempts;
        }
        self.session = store.get_session()?;
        Ok(())
    }

    pub fn ral(&self) -> &R {
        self.planner.ral()
    }

    pub fn ral_mut(&mut self) -> &mut R {
        self.planner.ral_mut()
    }

    pub fn state(&self) -> State {
        self.state
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::radio::{IrqStatus, RxQuality};

    #[test]
    fn rx_window_widens_with_rx_delay() {
        let (symb_short, _) =
            rx_window_params(1000, SpreadingFactor::_7, Bandwidth::_125KHz, 10);
        let (symb_long, _) =
            rx_window_params(5000, SpreadingFactor::_7, Bandwidth::_125KHz, 10);
        assert!(symb_long >= symb_short);
    }

    struct NullRadio;

    impl Ral for NullRadio {
        const MAX_PAYLOAD: usize = 255;
        fn configure_tx(&mut self, _: &TxParams, _: &[u8]) {}
        fn configure_rx(&mut self, _: &RxParams) {}
        fn start_tx(&mut self) {}
        fn start_rx(&mut self) {}
        fn stop(&mut self) {}
        fn irq_status(&mut self) -> Option<IrqStatus> {
            None
        }
        fn rx_quality(&self) -> RxQuality {
            RxQuality { rssi: 0, snr: 0 }
        }
        fn read_rx_payload(&mut self, _: &mut [u8]) -> usize {
            0
        }
    }

    struct NoHopRng;

    impl RngCore for NoHopRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            dest.fill(0);
            Ok(())
        }
    }

    #[test]
    fn duty_cycle_gate_blocks_until_time_off_elapses() {
        use lorawan::keys::{AppSKey, NewSKey};
        use lorawan::parser::DevAddr;
        use session::Keys;

        let mut mac = Mac::new(NullRadio, Configuration::default());
        let dev_addr: DevAddr<[u8; 4]> = [0, 0, 0, 0].into();
        let keys = Keys { nwk_skey: NewSKey::from([0u8; 16]), app_skey: AppSKey::from([0u8; 16]) };
        let mut session = Session::new(dev_addr, keys);
        // A restrictive duty cycle (1/16) so a single short uplink still
        // imposes a measurable silence.
        session.max_duty_cycle_index = 4;
        mac.session = Some(session);

        let mut rng = NoHopRng;
        mac.start_uplink(0, 1, &[0xAA, 0xBB], false, &mut rng).unwrap();
        assert!(mac.tx_duty_cycle_time_off_ms > 0);

        let gated_at = mac.tx_duty_cycle_timestamp_ms;
        let wait = mac.next_free_duty_cycle_ms(gated_at);
        assert!(wait > 0);
        assert_eq!(
            mac.start_uplink(gated_at, 1, &[0xAA, 0xBB], false, &mut rng),
            Err(Error::DutyCycle)
        );

        let free_at = clock::add_ms(gated_at, wait);
        assert_eq!(mac.next_free_duty_cycle_ms(free_at), 0);
        assert!(mac.start_uplink(free_at, 1, &[0xAA, 0xBB], false, &mut rng).is_ok());
    }
}
