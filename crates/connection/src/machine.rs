//! Deterministic connection state machine.
//!
//! The machine is pure: it consumes [`Trigger`]s and returns the
//! [`Action`]s the event loop must carry out. It owns the
//! [`ConnectionState`], the identity of the one socket it may hold, and
//! the [`ReconnectPlan`].
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──opened──▶ Connected
//!      ▲  ▲                       │   │                 │   │
//!      │  │                     error close           error close
//!      │  │                       ▼   │                 ▼   │
//!      │  └────────close───────  Error ◀────────────────┘   │
//!      └──────────────close (retry if code ≠ 1000)──────────┘
//!
//! any ──disconnect()──▶ Disconnected
//! ```

use std::time::Duration;

use realtime_protocol::constants::WS_CLOSE_NORMAL;

use crate::reconnection::{ReconnectPlan, RetryDecision, TimerId};
use crate::types::{ConnectionState, ReconnectConfig};

/// Identifier of one socket handle. A new id is issued for every open.
pub type SocketId = u64;

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Caller asked to connect.
    Connect,
    /// Caller asked to disconnect.
    Disconnect,
    /// A scheduled retry timer fired.
    RetryElapsed(TimerId),
    /// The socket finished opening.
    Opened(SocketId),
    /// The socket reported a transport error.
    Error(SocketId),
    /// The socket closed with the given code.
    Closed(SocketId, u16),
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start opening a new socket.
    Open(SocketId),
    /// Close the socket with the given code and release it.
    Close { socket: SocketId, code: u16 },
    /// Release a socket the peer already closed.
    Release(SocketId),
    /// Send the authentication handshake.
    Handshake,
    StartHeartbeat,
    StopHeartbeat,
    ScheduleRetry {
        timer: TimerId,
        attempt: u32,
        delay: Duration,
    },
    CancelRetry(TimerId),
    RetriesExhausted { attempts: u32 },
}

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct Machine {
    state: ConnectionState,
    socket: Option<SocketId>,
    next_socket: SocketId,
    plan: ReconnectPlan,
}

impl Machine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            socket: None,
            next_socket: 0,
            plan: ReconnectPlan::new(config),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The socket currently held, if any.
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn plan(&self) -> &ReconnectPlan {
        &self.plan
    }

    /// Applies a trigger and returns the actions it requires, in order.
    pub fn handle(&mut self, trigger: Trigger) -> Vec<Action> {
        let mut actions = Vec::new();
        match trigger {
            Trigger::Connect => {
                if let Some(timer) = self.plan.cancel() {
                    actions.push(Action::CancelRetry(timer));
                }
                self.open(&mut actions);
            }
            Trigger::RetryElapsed(timer) => {
                if self.plan.fire(timer) {
                    self.open(&mut actions);
                }
            }
            Trigger::Disconnect => {
                if let Some(timer) = self.plan.cancel() {
                    actions.push(Action::CancelRetry(timer));
                }
                if let Some(socket) = self.socket.take() {
                    actions.push(Action::Close {
                        socket,
                        code: WS_CLOSE_NORMAL,
                    });
                }
                self.transition(ConnectionState::Disconnected, &mut actions);
            }
            Trigger::Opened(socket) => {
                if self.is_current(socket) && self.state == ConnectionState::Connecting {
                    self.plan.reset();
                    self.transition(ConnectionState::Connected, &mut actions);
                    actions.push(Action::Handshake);
                }
            }
            Trigger::Error(socket) => {
                if self.is_current(socket) {
                    self.transition(ConnectionState::Error, &mut actions);
                }
            }
            Trigger::Closed(socket, code) => {
                if self.is_current(socket) {
                    self.socket = None;
                    actions.push(Action::Release(socket));
                    self.transition(ConnectionState::Disconnected, &mut actions);
                    if code != WS_CLOSE_NORMAL {
                        actions.push(match self.plan.on_unexpected_close() {
                            RetryDecision::Scheduled {
                                timer,
                                attempt,
                                delay,
                            } => Action::ScheduleRetry {
                                timer,
                                attempt,
                                delay,
                            },
                            RetryDecision::Exhausted { attempts } => {
                                Action::RetriesExhausted { attempts }
                            }
                        });
                    }
                }
            }
        }
        actions
    }

    /// Opens a socket unless one is already held.
    fn open(&mut self, actions: &mut Vec<Action>) {
        if self.socket.is_some() {
            return;
        }
        self.next_socket += 1;
        let socket = self.next_socket;
        self.socket = Some(socket);
        self.transition(ConnectionState::Connecting, actions);
        actions.push(Action::Open(socket));
    }

    fn is_current(&self, socket: SocketId) -> bool {
        self.socket == Some(socket)
    }

    /// Changes state, keeping the heartbeat running iff `Connected`.
    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<Action>) {
        let prev = self.state;
        if prev == next {
            return;
        }
        if prev == ConnectionState::Connected {
            actions.push(Action::StopHeartbeat);
        }
        self.state = next;
        if next == ConnectionState::Connected {
            actions.push(Action::StartHeartbeat);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime_protocol::constants::WS_CLOSE_ABNORMAL;

    fn machine() -> Machine {
        Machine::new(ReconnectConfig::default())
    }

    /// Drives the machine to `Connected` and returns the socket id.
    fn connect(m: &mut Machine) -> SocketId {
        m.handle(Trigger::Connect);
        let socket = m.socket().unwrap();
        m.handle(Trigger::Opened(socket));
        socket
    }

    fn scheduled(actions: &[Action]) -> Option<(TimerId, u32, Duration)> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleRetry {
                timer,
                attempt,
                delay,
            } => Some((*timer, *attempt, *delay)),
            _ => None,
        })
    }

    #[test]
    fn connect_opens_one_socket() {
        let mut m = machine();
        let actions = m.handle(Trigger::Connect);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![Action::Open(1)]);
    }

    #[test]
    fn connect_is_idempotent_while_socket_held() {
        let mut m = machine();
        m.handle(Trigger::Connect);
        assert!(m.handle(Trigger::Connect).is_empty());

        m.handle(Trigger::Opened(1));
        assert!(m.handle(Trigger::Connect).is_empty());
        assert_eq!(m.socket(), Some(1));
    }

    #[test]
    fn opened_starts_heartbeat_then_handshakes() {
        let mut m = machine();
        m.handle(Trigger::Connect);
        let actions = m.handle(Trigger::Opened(1));
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(actions, vec![Action::StartHeartbeat, Action::Handshake]);
    }

    #[test]
    fn error_while_connecting() {
        let mut m = machine();
        m.handle(Trigger::Connect);
        let actions = m.handle(Trigger::Error(1));
        assert_eq!(m.state(), ConnectionState::Error);
        assert!(actions.is_empty());
        // The handle is still held until the close arrives.
        assert_eq!(m.socket(), Some(1));
    }

    #[test]
    fn error_while_connected_stops_heartbeat() {
        let mut m = machine();
        connect(&mut m);
        let actions = m.handle(Trigger::Error(1));
        assert_eq!(m.state(), ConnectionState::Error);
        assert_eq!(actions, vec![Action::StopHeartbeat]);
    }

    #[test]
    fn normal_close_does_not_retry() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_NORMAL));

        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(
            actions,
            vec![Action::Release(socket), Action::StopHeartbeat]
        );
        assert_eq!(m.plan().attempt(), 0);
    }

    #[test]
    fn unexpected_close_schedules_retry() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));

        assert_eq!(m.state(), ConnectionState::Disconnected);
        let (_, attempt, delay) = scheduled(&actions).unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_millis(2000));
    }

    #[test]
    fn retry_timer_reconnects() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
        let (timer, _, _) = scheduled(&actions).unwrap();

        let actions = m.handle(Trigger::RetryElapsed(timer));
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![Action::Open(2)]);
    }

    #[test]
    fn consecutive_failures_back_off_then_exhaust() {
        let mut m = machine();
        m.handle(Trigger::Connect);

        let mut delays = Vec::new();
        let mut exhausted = 0;
        for _ in 0..6 {
            let socket = m.socket().unwrap();
            let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
            if let Some((timer, _, delay)) = scheduled(&actions) {
                delays.push(delay.as_millis());
                m.handle(Trigger::RetryElapsed(timer));
            }
            if actions.contains(&Action::RetriesExhausted { attempts: 5 }) {
                exhausted += 1;
            }
        }

        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
        assert_eq!(exhausted, 1);
        assert_eq!(m.plan().attempt(), 5);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(m.plan().pending().is_none());
    }

    #[test]
    fn attempt_tracks_consecutive_closures() {
        for n in 1..=7u32 {
            let mut m = machine();
            m.handle(Trigger::Connect);
            for _ in 0..n {
                let socket = m.socket().unwrap_or(0);
                let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
                if let Some((timer, _, _)) = scheduled(&actions) {
                    m.handle(Trigger::RetryElapsed(timer));
                } else {
                    m.handle(Trigger::Connect);
                }
            }
            assert_eq!(m.plan().attempt(), n.min(5), "after {n} closures");
        }
    }

    #[test]
    fn success_resets_attempts() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
        let (timer, _, _) = scheduled(&actions).unwrap();
        m.handle(Trigger::RetryElapsed(timer));
        let actions = m.handle(Trigger::Closed(2, WS_CLOSE_ABNORMAL));
        let (timer, attempt, _) = scheduled(&actions).unwrap();
        assert_eq!(attempt, 2);

        m.handle(Trigger::RetryElapsed(timer));
        m.handle(Trigger::Opened(3));
        assert_eq!(m.plan().attempt(), 0);

        let actions = m.handle(Trigger::Closed(3, WS_CLOSE_ABNORMAL));
        let (_, attempt, delay) = scheduled(&actions).unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_millis(2000));
    }

    #[test]
    fn disconnect_closes_normally_and_cancels_retry() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Disconnect);
        assert_eq!(
            actions,
            vec![
                Action::Close {
                    socket,
                    code: WS_CLOSE_NORMAL
                },
                Action::StopHeartbeat,
            ]
        );

        // A pending retry is cancelled and its timer becomes stale.
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
        let (timer, _, _) = scheduled(&actions).unwrap();
        let actions = m.handle(Trigger::Disconnect);
        assert_eq!(actions, vec![Action::CancelRetry(timer)]);
        assert!(m.handle(Trigger::RetryElapsed(timer)).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_twice_equals_once() {
        let mut m = machine();
        connect(&mut m);
        m.handle(Trigger::Disconnect);
        let state_once = m.state();
        let second = m.handle(Trigger::Disconnect);

        assert!(second.is_empty());
        assert_eq!(m.state(), state_once);
        assert!(m.socket().is_none());
    }

    #[test]
    fn manual_connect_cancels_pending_retry() {
        let mut m = machine();
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
        let (timer, _, _) = scheduled(&actions).unwrap();

        let actions = m.handle(Trigger::Connect);
        assert_eq!(actions, vec![Action::CancelRetry(timer), Action::Open(2)]);
        // The old timer no longer opens a second socket.
        assert!(m.handle(Trigger::RetryElapsed(timer)).is_empty());
    }

    #[test]
    fn events_from_released_socket_are_ignored() {
        let mut m = machine();
        let socket = connect(&mut m);
        m.handle(Trigger::Disconnect);

        assert!(m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL)).is_empty());
        assert!(m.handle(Trigger::Error(socket)).is_empty());
        assert!(m.handle(Trigger::Opened(socket)).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.plan().attempt(), 0);
    }

    #[test]
    fn disconnect_while_connecting_ignores_late_open() {
        let mut m = machine();
        m.handle(Trigger::Connect);
        m.handle(Trigger::Disconnect);
        assert!(m.handle(Trigger::Opened(1)).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn exhausted_still_allows_manual_connect() {
        let mut m = Machine::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        let socket = connect(&mut m);
        let actions = m.handle(Trigger::Closed(socket, WS_CLOSE_ABNORMAL));
        assert!(actions.contains(&Action::RetriesExhausted { attempts: 0 }));

        let actions = m.handle(Trigger::Connect);
        assert_eq!(actions, vec![Action::Open(2)]);
    }

    #[test]
    fn heartbeat_runs_iff_connected() {
        // Replay a mixed event sequence and track heartbeat start/stop.
        let mut m = machine();
        let mut running = false;
        let mut apply = |m: &mut Machine, t: Trigger| {
            for a in m.handle(t) {
                match a {
                    Action::StartHeartbeat => {
                        assert!(!running);
                        running = true;
                    }
                    Action::StopHeartbeat => {
                        assert!(running);
                        running = false;
                    }
                    _ => {}
                }
            }
            assert_eq!(running, m.state() == ConnectionState::Connected);
        };

        apply(&mut m, Trigger::Connect);
        apply(&mut m, Trigger::Opened(1));
        apply(&mut m, Trigger::Error(1));
        apply(&mut m, Trigger::Closed(1, WS_CLOSE_ABNORMAL));
        apply(&mut m, Trigger::Connect);
        apply(&mut m, Trigger::Opened(2));
        apply(&mut m, Trigger::Disconnect);
        apply(&mut m, Trigger::Connect);
        apply(&mut m, Trigger::Opened(3));
        apply(&mut m, Trigger::Closed(3, WS_CLOSE_NORMAL));
    }

    #[test]
    fn same_events_same_state() {
        let script = [
            Trigger::Connect,
            Trigger::Opened(1),
            Trigger::Closed(1, WS_CLOSE_ABNORMAL),
            Trigger::Connect,
            Trigger::Error(2),
            Trigger::Closed(2, 4001),
        ];
        let mut a = machine();
        let mut b = machine();
        for t in &script {
            assert_eq!(a.handle(t.clone()), b.handle(t.clone()));
            assert_eq!(a.state(), b.state());
        }
        assert_eq!(a.state(), ConnectionState::Disconnected);
        assert_eq!(a.plan().attempt(), 2);
    }
}
