//! Non-volatile persistence surface (spec §6). The session and join state
//! are already `serde`-serializable behind the `serde` feature, the same
//! convention `lorawan-device::mac::Session`/`SessionKeys` use; this module
//! adds the narrow get/put contract a host backs with flash or EEPROM. Two
//! groups are split out because they change at different rates: join state
//! (DevNonce, attempt counter) is written once per Join, the session is
//! written roughly once per uplink.

use crate::error::Error;
use crate::mac::session::Session;

/// Join-time state a host must keep across power cycles so `DevNonce` never
/// repeats for a given AppKey (spec §4.7) and the regulatory back-off
/// window survives a reset.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinState {
    pub dev_nonce: u16,
    pub join_attempts: u32,
}

/// Minimal persistence contract. A host implements this over whatever
/// storage it has; the engine itself never calls it automatically (no
/// background flash writes on a `no_std` target without the host's
/// consent) — [`crate::mac::Mac::snapshot`]/[`crate::mac::Mac::restore`]
/// are the explicit load/save points the host wires to this trait.
pub trait Store {
    fn get_join_state(&mut self) -> Result<Option<JoinState>, Error>;
    fn put_join_state(&mut self, state: &JoinState) -> Result<(), Error>;

    fn get_session(&mut self) -> Result<Option<Session>, Error>;
    fn put_session(&mut self, session: &Session) -> Result<(), Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    struct MemStore {
        join: Option<JoinState>,
        session: Option<Session>,
    }

    impl Store for MemStore {
        fn get_join_state(&mut self) -> Result<Option<JoinState>, Error> {
            Ok(self.join)
        }
        fn put_join_state(&mut self, state: &JoinState) -> Result<(), Error> {
            self.join = Some(*state);
            Ok(())
        }
        fn get_session(&mut self) -> Result<Option<Session>, Error> {
            Ok(self.session.clone())
        }
        fn put_session(&mut self, session: &Session) -> Result<(), Error> {
            self.session = Some(session.clone());
            Ok(())
        }
    }

    #[test]
    fn round_trips_join_state() {
        let mut store = MemStore { join: None, session: None };
        assert_eq!(store.get_join_state().unwrap(), None);
        let state = JoinState { dev_nonce: 42, join_attempts: 3 };
        store.put_join_state(&state).unwrap();
        assert_eq!(store.get_join_state().unwrap(), Some(state));
    }
}
