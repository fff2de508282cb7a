//! Link negotiation automaton - RFC 1661
//!
//! One automaton instance per negotiable PPP sub-protocol (LCP, and by the
//! same engine IPCP/CCP). The automaton owns no sockets: packet sends and
//! layer notifications go through the injected [`LayerHooks`], and the
//! restart timer is an `Instant` deadline the owning reactor sleeps on.
//!
//! Every (state, event) pair resolves to exactly one outcome; combinations
//! not listed in the transition tables are deliberate no-ops, never errors.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Automaton states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    /// Link down, negotiation not requested
    Initial,
    /// Negotiation requested, link still down
    Starting,
    /// Link up, negotiation not requested
    Closed,
    /// Link up, negotiation gave up or finished closing from our side
    Stopped,
    /// Terminate-Request sent after an administrative close
    Closing,
    /// Terminate-Request sent, will settle in Stopped
    Stopping,
    /// Configure-Request sent, nothing agreed yet
    ReqSent,
    /// Our request was acked, peer's not yet
    AckRcvd,
    /// Peer's request was acked, ours not yet
    AckSent,
    /// Both sides agreed
    Opened,
}

/// Callback set a negotiable sub-protocol supplies to the automaton.
///
/// Configure-class packets are built by the layer (it owns the option
/// content); terminate, code-reject and echo replies are requested by the
/// automaton with the identifier to echo.
pub trait LayerHooks {
    fn send_configure_request(&mut self);
    fn send_configure_ack(&mut self);
    fn send_configure_reject(&mut self);
    fn send_terminate_request(&mut self, id: u8);
    fn send_terminate_ack(&mut self, id: u8);
    fn send_code_reject(&mut self);
    fn send_echo_reply(&mut self, id: u8);
    fn layer_up(&mut self);
    fn layer_down(&mut self);
    fn layer_started(&mut self);
    fn layer_finished(&mut self);
}

/// Retry ceilings and timer tuning
#[derive(Debug, Clone)]
pub struct AutomatonSettings {
    /// Restart timer period
    pub restart_period: Duration,
    /// Retry budget for Terminate-Request
    pub max_terminate: u32,
    /// Retry budget for Configure-Request
    pub max_configure: u32,
    /// Reduced budget after a Configure-Reject
    pub max_failure: u32,
    /// `open` while Opened or mid-teardown cycles the lower layer to
    /// restart negotiation cleanly
    pub restart_on_reopen: bool,
}

impl Default for AutomatonSettings {
    fn default() -> Self {
        Self {
            restart_period: Duration::from_secs(3),
            max_terminate: 2,
            max_configure: 10,
            max_failure: 5,
            restart_on_reopen: false,
        }
    }
}

/// RFC 1661 option negotiation automaton
#[derive(Debug)]
pub struct LinkAutomaton<H: LayerHooks> {
    name: &'static str,
    state: FsmState,
    hooks: H,
    settings: AutomatonSettings,
    restart_counter: u32,
    deadline: Option<Instant>,
    seq: u8,
    /// Peer may be slow rather than rejecting; a future `open` should wait
    /// instead of resending. Set when negotiation times out unanswered.
    passive: bool,
}

impl<H: LayerHooks> LinkAutomaton<H> {
    pub fn new(name: &'static str, settings: AutomatonSettings, hooks: H) -> Self {
        Self {
            name,
            state: FsmState::Initial,
            hooks,
            settings,
            restart_counter: 0,
            deadline: None,
            seq: 0,
            passive: false,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn passive(&self) -> bool {
        self.passive
    }

    #[cfg(test)]
    fn restart_counter(&self) -> u32 {
        self.restart_counter
    }

    /// When the restart timer next fires, if armed.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // -- administrative events ----------------------------------------------

    /// Request negotiation start.
    pub fn open(&mut self) {
        use FsmState::*;
        match self.state {
            Initial => {
                self.hooks.layer_started();
                self.transition(Starting);
            }
            Closed => {
                self.load_counter(self.settings.max_configure);
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            Closing | Stopping => {
                self.transition(Stopping);
                self.maybe_restart_cycle();
            }
            Stopped | Opened => self.maybe_restart_cycle(),
            Starting | ReqSent | AckRcvd | AckSent => {}
        }
        self.sync_timer();
    }

    /// Request teardown.
    pub fn close(&mut self) {
        use FsmState::*;
        match self.state {
            Starting => {
                self.hooks.layer_finished();
                self.transition(Initial);
            }
            Stopped => self.transition(Closed),
            Stopping => self.transition(Closing),
            Opened => {
                self.hooks.layer_down();
                self.begin_terminate();
            }
            ReqSent | AckRcvd | AckSent => self.begin_terminate(),
            Initial | Closed | Closing => {}
        }
        self.sync_timer();
    }

    // -- lower layer events -------------------------------------------------

    pub fn lower_up(&mut self) {
        use FsmState::*;
        match self.state {
            Initial => self.transition(Closed),
            Starting => {
                self.load_counter(self.settings.max_configure);
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            Closed | Stopped | Closing | Stopping | ReqSent | AckRcvd | AckSent | Opened => {}
        }
        self.sync_timer();
    }

    pub fn lower_down(&mut self) {
        use FsmState::*;
        match self.state {
            Closed | Closing => self.transition(Initial),
            Stopped => {
                self.hooks.layer_started();
                self.transition(Starting);
            }
            Stopping | ReqSent | AckRcvd | AckSent => self.transition(Starting),
            Opened => {
                self.hooks.layer_down();
                self.transition(Starting);
            }
            Initial | Starting => {}
        }
        self.sync_timer();
    }

    // -- restart timer -------------------------------------------------------

    /// The restart timer fired. Decrements the counter once; while it is
    /// still nonzero the outstanding request is retransmitted and the timer
    /// stays armed, otherwise the terminal timeout transition runs.
    pub fn timer_expired(&mut self) {
        if self.deadline.is_none() {
            return;
        }

        if self.restart_counter > 0 {
            self.restart_counter -= 1;
        }

        if self.restart_counter > 0 {
            self.rearm();
            self.timeout_retransmit();
        } else {
            self.timeout_exhausted();
        }
        self.sync_timer();
    }

    fn timeout_retransmit(&mut self) {
        use FsmState::*;
        trace!("{}: restart timer, {} retries left", self.name, self.restart_counter);
        match self.state {
            Closing | Stopping => {
                let id = self.next_id();
                self.hooks.send_terminate_request(id);
            }
            AckRcvd => {
                self.transition(ReqSent);
                self.hooks.send_configure_request();
            }
            ReqSent | AckSent => self.hooks.send_configure_request(),
            Initial | Starting | Closed | Stopped | Opened => {}
        }
    }

    fn timeout_exhausted(&mut self) {
        use FsmState::*;
        debug!("{}: restart counter exhausted in {:?}", self.name, self.state);
        match self.state {
            Closing => {
                self.hooks.layer_finished();
                self.transition(Closed);
            }
            Stopping => {
                self.hooks.layer_finished();
                self.transition(Stopped);
            }
            ReqSent | AckRcvd | AckSent => {
                self.hooks.layer_finished();
                self.passive = true;
                self.transition(Stopped);
            }
            Initial | Starting | Closed | Stopped | Opened => {}
        }
    }

    // -- received packets ----------------------------------------------------

    /// Configure-Request whose options were all acceptable.
    pub fn recv_configure_req_good(&mut self, id: u8) {
        use FsmState::*;
        match self.state {
            Closed => self.hooks.send_terminate_ack(id),
            Stopped => {
                self.load_counter(self.settings.max_configure);
                self.hooks.send_configure_request();
                self.hooks.send_configure_ack();
                self.transition(AckSent);
            }
            ReqSent | AckSent => {
                self.hooks.send_configure_ack();
                self.transition(AckSent);
            }
            AckRcvd => {
                self.hooks.send_configure_ack();
                self.hooks.layer_up();
                self.transition(Opened);
            }
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_configure_request();
                self.hooks.send_configure_ack();
                self.transition(AckSent);
            }
            Initial | Starting | Closing | Stopping => {}
        }
        self.sync_timer();
    }

    /// Configure-Request carrying options we reject.
    pub fn recv_configure_req_bad(&mut self, id: u8) {
        use FsmState::*;
        match self.state {
            Closed => self.hooks.send_terminate_ack(id),
            Stopped => {
                self.load_counter(self.settings.max_configure);
                self.hooks.send_configure_request();
                self.hooks.send_configure_reject();
                self.transition(ReqSent);
            }
            AckSent => {
                self.hooks.send_configure_reject();
                self.transition(ReqSent);
            }
            ReqSent | AckRcvd => self.hooks.send_configure_reject(),
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_configure_request();
                self.hooks.send_configure_reject();
                self.transition(ReqSent);
            }
            Initial | Starting | Closing | Stopping => {}
        }
        self.sync_timer();
    }

    pub fn recv_configure_ack(&mut self, id: u8) {
        use FsmState::*;
        match self.state {
            Closed | Stopped => self.hooks.send_terminate_ack(id),
            ReqSent => {
                self.load_counter(self.settings.max_configure);
                self.transition(AckRcvd);
            }
            AckRcvd => {
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            AckSent => {
                self.load_counter(self.settings.max_configure);
                self.hooks.layer_up();
                self.transition(Opened);
            }
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            Initial | Starting | Closing | Stopping => {}
        }
        self.sync_timer();
    }

    pub fn recv_configure_reject(&mut self, id: u8) {
        use FsmState::*;
        match self.state {
            Closed | Stopped => self.hooks.send_terminate_ack(id),
            ReqSent => {
                // Limited retry budget on persistent rejection.
                self.load_counter(self.settings.max_failure);
                self.hooks.send_configure_request();
            }
            AckRcvd => {
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            AckSent => {
                self.load_counter(self.settings.max_configure);
                self.hooks.send_configure_request();
            }
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            Initial | Starting | Closing | Stopping => {}
        }
        self.sync_timer();
    }

    pub fn recv_terminate_request(&mut self, id: u8) {
        use FsmState::*;
        match self.state {
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_terminate_ack(id);
                // Graceful remote teardown, no retries left to spend.
                self.zero_counter();
                self.transition(Stopping);
            }
            ReqSent | AckRcvd | AckSent => {
                self.hooks.send_terminate_ack(id);
                self.transition(ReqSent);
            }
            Initial | Starting | Closed | Stopped | Closing | Stopping => {
                self.hooks.send_terminate_ack(id);
            }
        }
        self.sync_timer();
    }

    pub fn recv_terminate_ack(&mut self) {
        use FsmState::*;
        match self.state {
            Closing => {
                self.hooks.layer_finished();
                self.transition(Closed);
            }
            Stopping => {
                self.hooks.layer_finished();
                self.transition(Stopped);
            }
            // The ack answered a stale terminate, not the current request.
            AckRcvd => self.transition(ReqSent),
            Opened => {
                self.hooks.layer_down();
                self.hooks.send_configure_request();
                self.transition(ReqSent);
            }
            Initial | Starting | Closed | Stopped | ReqSent | AckSent => {}
        }
        self.sync_timer();
    }

    /// Packet with a code this automaton does not know.
    pub fn recv_unknown_code(&mut self) {
        self.hooks.send_code_reject();
    }

    /// Code-Reject for a code class that is never usable; negotiation can
    /// continue without it.
    pub fn recv_code_reject_permanent(&mut self) {
        use FsmState::*;
        match self.state {
            AckRcvd => self.transition(ReqSent),
            Initial | Starting | Closed | Stopped | Closing | Stopping | ReqSent | AckSent
            | Opened => {}
        }
        self.sync_timer();
    }

    /// Code-Reject for a code negotiation cannot proceed without.
    pub fn recv_code_reject_catastrophic(&mut self) {
        use FsmState::*;
        match self.state {
            Opened => {
                self.hooks.layer_down();
                self.begin_terminate();
                self.transition(Stopping);
            }
            Closing => {
                self.hooks.layer_finished();
                self.transition(Closed);
            }
            Stopping | ReqSent | AckRcvd | AckSent => {
                self.hooks.layer_finished();
                self.transition(Stopped);
            }
            Initial | Starting | Closed | Stopped => {}
        }
        self.sync_timer();
    }

    /// Echo-Request is answered only while the link is fully negotiated.
    pub fn recv_echo_request(&mut self, id: u8) {
        if self.state == FsmState::Opened {
            self.hooks.send_echo_reply(id);
        }
    }

    // -- shared transitions --------------------------------------------------

    fn begin_terminate(&mut self) {
        self.load_counter(self.settings.max_terminate);
        let id = self.next_id();
        self.hooks.send_terminate_request(id);
        self.transition(FsmState::Closing);
    }

    fn maybe_restart_cycle(&mut self) {
        if self.settings.restart_on_reopen {
            self.lower_down();
            self.lower_up();
        }
    }

    fn transition(&mut self, to: FsmState) {
        if self.state != to {
            debug!("{}: {:?} -> {:?}", self.name, self.state, to);
            self.state = to;
        }
    }

    fn next_id(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn load_counter(&mut self, n: u32) {
        self.restart_counter = n;
        self.rearm();
    }

    fn zero_counter(&mut self) {
        self.restart_counter = 0;
        self.rearm();
    }

    /// Cancel-then-reinsert: a fresh deadline, never a reset in place.
    fn rearm(&mut self) {
        self.deadline = Some(Instant::now() + self.settings.restart_period);
    }

    fn timer_should_run(&self) -> bool {
        matches!(
            self.state,
            FsmState::Closing
                | FsmState::Stopping
                | FsmState::ReqSent
                | FsmState::AckRcvd
                | FsmState::AckSent
        )
    }

    /// The restart timer is armed exactly while the state needs it.
    fn sync_timer(&mut self) {
        if self.timer_should_run() {
            if self.deadline.is_none() {
                self.rearm();
            }
        } else {
            self.deadline = None;
        }
    }
}
