//! Radio Planner: the single-radio scheduler described in spec §4.1.
//!
//! A fixed number of "hooks" (owners — in practice, the MAC engine's TX path
//! and RX1/RX2 windows) register once and thereafter enqueue tasks. At most
//! one task runs at a time; a `Scheduled` task wins over whatever else is
//! running, and the loser is reported `Aborted` to its own hook. All mutation
//! of the task table and the "radio busy" flag happens inside
//! [`critical_section::with`], matching the `no_std` idiom the `lora-rs`
//! board examples already use for ISR-shared state.

use crate::clock::TimestampMs;
use crate::radio::{IrqStatus, Ral, RxParams, RxQuality, TxParams};
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HookId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Asap,
    Scheduled,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskKind<'a> {
    Tx { params: TxParams, payload: &'a [u8] },
    Rx { params: RxParams },
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Task<'a> {
    pub kind: TaskKind<'a>,
    pub state: TaskState,
    pub start_time_ms: TimestampMs,
    pub duration_time_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueueError {
    /// The radio (or the hook's own slot) is occupied by another task.
    Busy,
    UnknownHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    OutOfSlots,
}

/// Outcome latched by the planner before the owning hook's callback runs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    TxDone,
    RxPacket { quality: RxQuality, len: u8 },
    RxTimeout,
    RxCrcError,
    Aborted,
}

#[derive(Clone, Copy)]
struct Slot {
    occupied: bool,
    pending: Option<PendingMeta>,
    queued: Option<QueuedKind>,
    last_outcome: Option<Outcome>,
}

#[derive(Clone, Copy)]
struct PendingMeta {
    state: TaskState,
    start_time_ms: TimestampMs,
    #[allow(dead_code)]
    is_tx: bool,
    /// Whether the RAL call for this task has already been issued. A task
    /// stays unarmed (and the radio untouched) until `start_time_ms` is
    /// actually reached, per spec §4.1's "SCHEDULED tasks MUST start at
    /// start_time_ms ± tolerance" — enqueuing a future window must not key
    /// the radio the instant it's requested.
    armed: bool,
}

/// The physical parameters needed to actually arm a task's radio operation,
/// captured at enqueue time since `TaskKind`'s payload slice doesn't outlive
/// the `enqueue` call.
#[derive(Clone, Copy)]
enum QueuedKind {
    Tx { params: TxParams, len: usize },
    Rx { params: RxParams },
}

impl Default for Slot {
    fn default() -> Self {
        Self { occupied: false, pending: None, queued: None, last_outcome: None }
    }
}

/// A payload staging buffer large enough for any LoRaWAN PHYPayload.
const MAX_TX_PAYLOAD: usize = 255;

/// The planner itself, generic over the concrete [`Ral`] driver and the
/// number of hooks it serves.
pub struct Planner<R: Ral, const HOOKS: usize> {
    ral: R,
    slots: [Slot; HOOKS],
    registered: usize,
    /// Guarded the same way the teacher's board examples guard shared ISR
    /// state: all reads/writes happen inside `critical_section::with`.
    radio_busy: bool,
    running_hook: Option<usize>,
    running_is_scheduled: bool,
    tx_scratch: Vec<u8, MAX_TX_PAYLOAD>,
}

impl<R: Ral, const HOOKS: usize> Planner<R, HOOKS> {
    pub fn new(ral: R) -> Self {
        Self {
            ral,
            slots: [Slot::default(); HOOKS],
            registered: 0,
            radio_busy: false,
            running_hook: None,
            running_is_scheduled: false,
            tx_scratch: Vec::new(),
        }
    }

    /// Registers a new hook owner. Hooks are never unregistered: the MAC
    /// engine registers exactly its fixed set (TX, RX1, RX2) at construction.
    pub fn register_hook(&mut self) -> Result<HookId, RegisterError> {
        if self.registered >= HOOKS {
            return Err(RegisterError::OutOfSlots);
        }
        let id = self.registered;
        self.registered += 1;
        Ok(HookId(id))
    }

    /// Enqueues a task on behalf of `hook`, to run no earlier than
    /// `task.start_time_ms`. `now` is the caller's current time, used to
    /// decide whether the task is due immediately (an `Asap` task always
    /// is, by construction) or must wait: a task whose `start_time_ms` is
    /// still in the future is only recorded here and armed later, from
    /// [`Planner::poll`], once `now >= start_time_ms` (spec §4.1).
    ///
    /// A `Scheduled` task that *is* due now preempts whatever is currently
    /// running (the loser's hook later observes `Outcome::Aborted`); an
    /// `Asap` task due now is refused with `Busy` if the radio is occupied
    /// by anything, scheduled or not.
    pub fn enqueue(
        &mut self,
        hook: HookId,
        task: Task<'_>,
        now: TimestampMs,
    ) -> Result<(), EnqueueError> {
        if hook.0 >= self.registered {
            return Err(EnqueueError::UnknownHook);
        }

        let is_tx = matches!(task.kind, TaskKind::Tx { .. });
        let due_now = task.start_time_ms <= now;

        let queued = match task.kind {
            TaskKind::Tx { params, payload } => {
                self.tx_scratch.clear();
                // payload is bounded by LoRaWAN's own max PHYPayload size; a
                // larger slice here means the caller built an oversize frame.
                let _ = self.tx_scratch.extend_from_slice(payload);
                QueuedKind::Tx { params, len: payload.len() }
            }
            TaskKind::Rx { params } => QueuedKind::Rx { params },
        };

        critical_section::with(|_| -> Result<(), EnqueueError> {
            if due_now && self.radio_busy {
                match task.state {
                    TaskState::Scheduled if !self.running_is_scheduled => {
                        if let Some(running) = self.running_hook {
                            self.slots[running].last_outcome = Some(Outcome::Aborted);
                            self.slots[running].occupied = false;
                            self.slots[running].pending = None;
                            self.slots[running].queued = None;
                        }
                        self.ral.stop();
                        self.radio_busy = false;
                        self.running_hook = None;
                        self.running_is_scheduled = false;
                    }
                    _ => return Err(EnqueueError::Busy),
                }
            }

            self.slots[hook.0].occupied = true;
            self.slots[hook.0].pending =
                Some(PendingMeta { state: task.state, start_time_ms: task.start_time_ms, is_tx, armed: false });
            self.slots[hook.0].queued = Some(queued);
            Ok(())
        })?;

        if due_now && !self.radio_busy {
            self.arm(hook.0);
        }
        Ok(())
    }

    /// Issues the RAL calls for the task queued on slot `idx` and claims the
    /// radio on its behalf.
    fn arm(&mut self, idx: usize) {
        if let Some(queued) = self.slots[idx].queued {
            match queued {
                QueuedKind::Tx { params, len } => {
                    self.ral.configure_tx(&params, &self.tx_scratch[..len]);
                    self.ral.start_tx();
                }
                QueuedKind::Rx { params } => {
                    self.ral.configure_rx(&params);
                    self.ral.start_rx();
                }
            }
        }
        let scheduled = match &mut self.slots[idx].pending {
            Some(p) => {
                p.armed = true;
                matches!(p.state, TaskState::Scheduled)
            }
            None => false,
        };
        self.radio_busy = true;
        self.running_hook = Some(idx);
        self.running_is_scheduled = scheduled;
    }

    /// Index of the not-yet-armed pending task whose `start_time_ms` has
    /// arrived and is earliest among those, if any.
    fn earliest_due_unarmed(&self, now: TimestampMs) -> Option<usize> {
        let mut best: Option<usize> = None;
        for i in 0..HOOKS {
            let Some(p) = self.slots[i].pending else { continue };
            if p.armed || p.start_time_ms > now {
                continue;
            }
            best = match best {
                Some(b) if self.slots[b].pending.unwrap().start_time_ms <= p.start_time_ms => Some(b),
                _ => Some(i),
            };
        }
        best
    }

    /// Polls the radio for a completed IRQ and, if one occurred, resolves it
    /// to the owning hook's outcome. Also arms the earliest due pending task
    /// once the radio is free, since that is the only point this crate lets
    /// time actually advance. Call this from the supervisor loop; it is not
    /// itself blocking.
    pub fn poll(&mut self, now: TimestampMs, rx_buf: &mut [u8]) -> Option<(HookId, usize)> {
        if !self.radio_busy {
            if let Some(idx) = self.earliest_due_unarmed(now) {
                self.arm(idx);
            }
        }

        let irq = self.ral.irq_status()?;
        let hook = self.running_hook?;

        let outcome = match irq {
            IrqStatus::TxDone => Outcome::TxDone,
            IrqStatus::RxDone => {
                let len = self.ral.read_rx_payload(rx_buf);
                Outcome::RxPacket { quality: self.ral.rx_quality(), len: len as u8 }
            }
            IrqStatus::RxTimeout => Outcome::RxTimeout,
            IrqStatus::RxCrcError => Outcome::RxCrcError,
            IrqStatus::Aborted => Outcome::Aborted,
        };

        critical_section::with(|_| {
            self.slots[hook].last_outcome = Some(outcome);
            self.slots[hook].occupied = false;
            self.slots[hook].pending = None;
            self.slots[hook].queued = None;
            self.radio_busy = false;
            self.running_hook = None;
            self.running_is_scheduled = false;
        });

        let _ = now;
        Some((HookId(hook), len_from(outcome)))
    }

    /// Latest latched outcome for `hook`, if any completed since the last
    /// call. Consumes the outcome (subsequent calls return `None` until the
    /// next completion).
    pub fn take_status(&mut self, hook: HookId) -> Option<Outcome> {
        self.slots.get_mut(hook.0).and_then(|s| s.last_outcome.take())
    }

    /// Whether the radio is currently in use by any hook.
    pub fn is_busy(&self) -> bool {
        self.radio_busy
    }

    pub fn ral(&self) -> &R {
        &self.ral
    }

    pub fn ral_mut(&mut self) -> &mut R {
        &mut self.ral
    }
}

fn len_from(outcome: Outcome) -> usize {
    match outcome {
        Outcome::RxPacket { len, .. } => len as usize,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::radio::{Modulation, RfConfig, RxParams, TxParams};
    use lora_modulation::{Bandwidth, BaseBandModulationParams, CodingRate, SpreadingFactor};

    struct FakeRadio {
        irq: Option<IrqStatus>,
        rx_len: usize,
    }

    impl Ral for FakeRadio {
        const MAX_PAYLOAD: usize = 255;
        fn configure_tx(&mut self, _params: &TxParams, _payload: &[u8]) {}
        fn configure_rx(&mut self, _params: &RxParams) {}
        fn start_tx(&mut self) {
            self.irq = Some(IrqStatus::TxDone);
        }
        fn start_rx(&mut self) {
            self.irq = Some(IrqStatus::RxTimeout);
        }
        fn stop(&mut self) {}
        fn irq_status(&mut self) -> Option<IrqStatus> {
            self.irq.take()
        }
        fn rx_quality(&self) -> RxQuality {
            RxQuality { rssi: -80, snr: 5 }
        }
        fn read_rx_payload(&mut self, _out: &mut [u8]) -> usize {
            self.rx_len
        }
    }

    fn rf() -> RfConfig {
        RfConfig {
            frequency: 868_100_000,
            bb: BaseBandModulationParams::new(
                SpreadingFactor::_7,
                Bandwidth::_125KHz,
                CodingRate::_4_5,
            ),
        }
    }

    #[test]
    fn second_asap_enqueue_is_busy_while_first_runs() {
        let mut p: Planner<FakeRadio, 2> = Planner::new(FakeRadio { irq: None, rx_len: 0 });
        let tx_hook = p.register_hook().unwrap();
        let rx_hook = p.register_hook().unwrap();

        let tx = Task {
            kind: TaskKind::Tx {
                params: TxParams {
                    modulation: Modulation::Lora(rf()),
                    power_dbm: 14,
                    payload_len: 10,
                    invert_iq: false,
                    crc: true,
                },
                payload: &[0u8; 10],
            },
            state: TaskState::Asap,
            start_time_ms: 0,
            duration_time_ms: 100,
        };
        p.enqueue(tx_hook, tx, 0).unwrap();

        let rx = Task {
            kind: TaskKind::Rx {
                params: RxParams {
                    modulation: Modulation::Lora(rf()),
                    symb_timeout: Some(8),
                    timeout_ms: 1000,
                    invert_iq: true,
                    crc: false,
                    max_payload: 255,
                },
            },
            state: TaskState::Asap,
            start_time_ms: 0,
            duration_time_ms: 1000,
        };
        assert_eq!(p.enqueue(rx_hook, rx, 0), Err(EnqueueError::Busy));
    }

    #[test]
    fn scheduled_task_preempts_running_asap() {
        let mut p: Planner<FakeRadio, 2> = Planner::new(FakeRadio { irq: None, rx_len: 0 });
        let a = p.register_hook().unwrap();
        let b = p.register_hook().unwrap();

        let asap = Task {
            kind: TaskKind::Rx {
                params: RxParams {
                    modulation: Modulation::Lora(rf()),
                    symb_timeout: None,
                    timeout_ms: 5000,
                    invert_iq: true,
                    crc: false,
                    max_payload: 255,
                },
            },
            state: TaskState::Asap,
            start_time_ms: 0,
            duration_time_ms: 5000,
        };
        p.enqueue(a, asap, 0).unwrap();

        let scheduled = Task {
            kind: TaskKind::Tx {
                params: TxParams {
                    modulation: Modulation::Lora(rf()),
                    power_dbm: 14,
                    payload_len: 5,
                    invert_iq: false,
                    crc: true,
                },
                payload: &[0u8; 5],
            },
            state: TaskState::Scheduled,
            start_time_ms: 10,
            duration_time_ms: 100,
        };
        // `now` has reached the scheduled start time, so this preempts
        // immediately instead of waiting for a later `poll`.
        p.enqueue(b, scheduled, 10).unwrap();
        assert_eq!(p.take_status(a), Some(Outcome::Aborted));
    }

    #[test]
    fn scheduled_task_waits_for_start_time_ms() {
        let mut p: Planner<FakeRadio, 1> = Planner::new(FakeRadio { irq: None, rx_len: 0 });
        let hook = p.register_hook().unwrap();

        let rx = Task {
            kind: TaskKind::Rx {
                params: RxParams {
                    modulation: Modulation::Lora(rf()),
                    symb_timeout: Some(8),
                    timeout_ms: 1000,
                    invert_iq: true,
                    crc: false,
                    max_payload: 255,
                },
            },
            state: TaskState::Scheduled,
            start_time_ms: 100,
            duration_time_ms: 1000,
        };
        p.enqueue(hook, rx, 0).unwrap();

        let mut scratch = [0u8; 16];
        // Not due yet: the RAL must not be touched, so the fake radio's
        // synchronous "RX armed" IRQ never appears.
        assert_eq!(p.poll(50, &mut scratch), None);
        assert!(!p.is_busy());

        // Once `now` reaches `start_time_ms`, `poll` arms it itself.
        assert_eq!(p.poll(100, &mut scratch), Some((hook, 0)));
    }
}
