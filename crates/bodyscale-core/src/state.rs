//! Connection lifecycle states and their legal transitions.
//!
//! [`ConnectionState::apply`] is the whole state machine: it has no side
//! effects and performs no I/O. The engine decides *when* a transition
//! happens and what to do around it; this module decides *whether* it may.
//!
//! ```text
//! Disconnected  --StartScan-------------> Scanning
//! Scanning      --DeviceFound-----------> Connecting
//! Scanning      --ScanEnded-------------> Disconnected
//! Connecting    --LinkEstablished-------> Connected
//! Connected     --SubscribeSucceeded----> Reading
//! Connecting, Connected, Reading --LinkLost--> Disconnected
//! Disconnected, Error --ReconnectAttempt--> Connecting
//! Error         --AcknowledgeError------> Disconnected
//! Error         --GiveUp----------------> Disconnected
//! any           --TransportError--------> Error
//! any           --Reset-----------------> Disconnected
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use bodyscale_types::{DeviceIdentity, MeasurementCharacteristic};

/// Lifecycle state of the scale connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Idle; the initial state.
    #[default]
    Disconnected,
    /// Looking for a scale.
    Scanning,
    /// Establishing the link.
    Connecting,
    /// Linked, notifications not yet enabled.
    Connected,
    /// Receiving measurements.
    Reading,
    /// A transport failure ended the session.
    Error,
}

impl ConnectionState {
    /// Whether a link to the scale is up.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Connected | Self::Reading)
    }

    /// Whether the engine is actively working towards or holding a link.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Connected | Self::Reading
        )
    }

    /// Compute the state that follows `transition`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the transition is not legal from
    /// this state. The caller's state is left untouched.
    pub fn apply(self, transition: Transition) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        use Transition as T;

        let next = match (self, transition) {
            (Disconnected, T::StartScan) => Scanning,
            (Scanning, T::DeviceFound) => Connecting,
            (Scanning, T::ScanEnded) => Disconnected,
            (Disconnected | Error, T::ReconnectAttempt) => Connecting,
            (Connecting, T::LinkEstablished) => Connected,
            (Connected, T::SubscribeSucceeded) => Reading,
            (Connecting | Connected | Reading, T::LinkLost) => Disconnected,
            (_, T::TransportError) => Error,
            (Error, T::AcknowledgeError) => Disconnected,
            (Error | Disconnected, T::GiveUp) => Disconnected,
            (_, T::Reset) => Disconnected,
            (from, transition) => return Err(InvalidTransition { from, transition }),
        };
        Ok(next)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reading => "reading",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A scan was requested.
    StartScan,
    /// A scan result was chosen for connection.
    DeviceFound,
    /// The scan stopped without a chosen device.
    ScanEnded,
    /// The reconnection policy is retrying a remembered device.
    ReconnectAttempt,
    /// The link came up.
    LinkEstablished,
    /// At least one measurement characteristic is notifying.
    SubscribeSucceeded,
    /// The link dropped without being asked to.
    LinkLost,
    /// A transport-level operation failed.
    TransportError,
    /// The caller dismissed the error.
    AcknowledgeError,
    /// The reconnection policy stopped retrying.
    GiveUp,
    /// Explicit disconnect or forget.
    Reset,
}

/// A transition that is not legal from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transition {transition:?} not allowed from {from}")]
pub struct InvalidTransition {
    /// State the transition was attempted from.
    pub from: ConnectionState,
    /// The rejected transition.
    pub transition: Transition,
}

/// Read-only view of the live session, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Device the session targets, if any.
    pub device: Option<DeviceIdentity>,
    /// Current reconnection attempt (0 outside a reconnect episode).
    pub attempt: u32,
    /// Characteristics currently notifying.
    pub subscribed: Vec<MeasurementCharacteristic>,
    /// Device the registry remembers.
    pub remembered: Option<DeviceIdentity>,
    /// Whether auto-connect is enabled.
    pub auto_connect: bool,
}

/// The single live connection session.
///
/// Every new connection attempt gets a fresh epoch and cancellation token.
/// Work spawned for an older epoch is stale: its result is discarded and
/// anything it established is torn down.
#[derive(Debug)]
pub struct ConnectionSession {
    state: ConnectionState,
    device: Option<DeviceIdentity>,
    attempt: u32,
    subscribed: BTreeSet<MeasurementCharacteristic>,
    epoch: u64,
    cancel: CancellationToken,
    explicit_disconnect: bool,
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSession {
    /// A fresh, disconnected session.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            device: None,
            attempt: 0,
            subscribed: BTreeSet::new(),
            epoch: 0,
            cancel: CancellationToken::new(),
            explicit_disconnect: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Device the session targets.
    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether work tagged with `epoch` belongs to this session.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Token cancelled when the current epoch ends.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Characteristics currently notifying.
    pub fn subscribed(&self) -> &BTreeSet<MeasurementCharacteristic> {
        &self.subscribed
    }

    /// Record a successful subscription.
    pub fn mark_subscribed(&mut self, characteristic: MeasurementCharacteristic) {
        self.subscribed.insert(characteristic);
    }

    /// Set the reconnection attempt shown in snapshots.
    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Whether the caller asked for the current teardown.
    pub fn explicit_disconnect(&self) -> bool {
        self.explicit_disconnect
    }

    /// Apply a transition, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged when the
    /// transition is not legal.
    pub fn transition(&mut self, transition: Transition) -> Result<ConnectionState, InvalidTransition> {
        self.state = self.state.apply(transition)?;
        Ok(self.state)
    }

    /// Start a new epoch targeting `device`.
    ///
    /// Cancels all work of the previous epoch.
    pub fn begin(&mut self, device: DeviceIdentity) -> (u64, CancellationToken) {
        self.end_epoch();
        self.device = Some(device);
        self.explicit_disconnect = false;
        (self.epoch, self.cancel.clone())
    }

    /// End the current epoch without choosing a new target.
    ///
    /// The device is kept so a reconnect knows where to go.
    pub fn end_epoch(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch = self.epoch.wrapping_add(1);
        self.subscribed.clear();
    }

    /// Tear down at the caller's request.
    pub fn end_explicitly(&mut self) {
        self.end_epoch();
        self.explicit_disconnect = true;
    }

    /// Forget the target device entirely.
    pub fn clear_device(&mut self) {
        self.device = None;
        self.attempt = 0;
    }

    /// Build the published view.
    pub fn snapshot(&self, remembered: Option<DeviceIdentity>, auto_connect: bool) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            device: self.device.clone(),
            attempt: self.attempt,
            subscribed: self.subscribed.iter().copied().collect(),
            remembered,
            auto_connect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL_STATES: [ConnectionState; 6] =
        [Disconnected, Scanning, Connecting, Connected, Reading, Error];

    #[test]
    fn test_happy_path() {
        let mut state = Disconnected;
        for transition in [
            Transition::StartScan,
            Transition::DeviceFound,
            Transition::LinkEstablished,
            Transition::SubscribeSucceeded,
        ] {
            state = state.apply(transition).unwrap();
        }
        assert_eq!(state, Reading);
    }

    #[test]
    fn test_start_scan_only_from_disconnected() {
        for state in ALL_STATES {
            let result = state.apply(Transition::StartScan);
            if state == Disconnected {
                assert_eq!(result, Ok(Scanning));
            } else {
                assert_eq!(
                    result,
                    Err(InvalidTransition {
                        from: state,
                        transition: Transition::StartScan
                    })
                );
            }
        }
    }

    #[test]
    fn test_start_scan_while_connecting_leaves_state() {
        let mut session = ConnectionSession::new();
        session.transition(Transition::StartScan).unwrap();
        session.transition(Transition::DeviceFound).unwrap();
        assert!(session.transition(Transition::StartScan).is_err());
        assert_eq!(session.state(), Connecting);
    }

    #[test]
    fn test_transport_error_from_any_state() {
        for state in ALL_STATES {
            assert_eq!(state.apply(Transition::TransportError), Ok(Error));
        }
    }

    #[test]
    fn test_error_exits() {
        assert_eq!(Error.apply(Transition::AcknowledgeError), Ok(Disconnected));
        assert_eq!(Error.apply(Transition::GiveUp), Ok(Disconnected));
        assert_eq!(Error.apply(Transition::ReconnectAttempt), Ok(Connecting));
        assert!(Reading.apply(Transition::AcknowledgeError).is_err());
    }

    #[test]
    fn test_link_lost() {
        assert_eq!(Reading.apply(Transition::LinkLost), Ok(Disconnected));
        assert_eq!(Connected.apply(Transition::LinkLost), Ok(Disconnected));
        assert!(Scanning.apply(Transition::LinkLost).is_err());
        assert!(Disconnected.apply(Transition::LinkLost).is_err());
    }

    #[test]
    fn test_reset_from_any_state() {
        for state in ALL_STATES {
            assert_eq!(state.apply(Transition::Reset), Ok(Disconnected));
        }
    }

    #[test]
    fn test_subscribe_requires_connected() {
        assert!(Connecting.apply(Transition::SubscribeSucceeded).is_err());
        assert!(Reading.apply(Transition::SubscribeSucceeded).is_err());
    }

    #[test]
    fn test_session_epochs() {
        let mut session = ConnectionSession::new();
        let (first, token) = session.begin(DeviceIdentity::new("AA", "MIBFS"));
        assert!(session.is_current(first));
        assert!(!token.is_cancelled());

        session.mark_subscribed(MeasurementCharacteristic::WeightScale);
        let (second, _) = session.begin(DeviceIdentity::new("AA", "MIBFS"));
        assert_ne!(first, second);
        assert!(!session.is_current(first));
        assert!(token.is_cancelled());
        assert!(session.subscribed().is_empty());
    }

    #[test]
    fn test_explicit_end_keeps_device() {
        let mut session = ConnectionSession::new();
        session.begin(DeviceIdentity::new("AA", "MIBFS"));
        session.end_explicitly();
        assert!(session.explicit_disconnect());
        assert_eq!(session.device().map(|d| d.id.as_str()), Some("AA"));

        session.clear_device();
        assert!(session.device().is_none());
    }

    #[test]
    fn test_snapshot() {
        let mut session = ConnectionSession::new();
        session.begin(DeviceIdentity::new("AA", "MIBFS"));
        session.mark_subscribed(MeasurementCharacteristic::BodyComposition);
        session.set_attempt(2);
        let snapshot = session.snapshot(None, true);
        assert_eq!(snapshot.state, Disconnected);
        assert_eq!(snapshot.attempt, 2);
        assert_eq!(
            snapshot.subscribed,
            vec![MeasurementCharacteristic::BodyComposition]
        );
        assert!(snapshot.auto_connect);
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&Reading).unwrap();
        assert_eq!(json, "\"reading\"");
    }
}
