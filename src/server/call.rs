//! PPP call context
//!
//! One call per control connection: owns the data-plane channel handed over
//! by the outgoing-call handler and the LCP instance of the link negotiation
//! automaton. IPCP/CCP would register further automaton instances here.

use crate::protocol::ppp::{self, codes, options, protocols, NegBuilder, NegPacket, PppFrame};
use crate::server::fsm::{AutomatonSettings, FsmState, LayerHooks, LinkAutomaton};
use crate::Result;
use std::io;
use std::time::Instant;
use tracing::{debug, info};

/// MRU proposed in our Configure-Request; leaves room for the tunnel overhead
const LCP_MRU: u16 = 1400;

/// Data-plane channel carrying PPP frames for one call.
pub trait CallChannel {
    /// Local call identifier assigned when the channel was opened
    fn call_id(&self) -> u16;
    /// Send one PPP frame
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
    /// Non-blocking receive of one PPP frame; `WouldBlock` when drained
    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens the data-plane channel for an outgoing call.
pub trait ChannelFactory {
    type Channel: CallChannel;

    fn open_channel(&mut self, peer_call_id: u16) -> io::Result<Self::Channel>;
}

/// LCP side of the [`LayerHooks`] contract.
///
/// Builds the configure-class packets (it owns the option content), queues
/// every outbound frame in `outbox` for the call to flush, and remembers the
/// pieces of the last received request needed for ack/reject replies.
#[derive(Debug, Default)]
struct LcpLayer {
    /// Identifier of our last Configure-Request
    ident: u8,
    magic: u32,
    /// Identifier of the peer's last Configure-Request
    req_id: u8,
    /// Option bytes of the peer's last request, echoed in the ack
    req_data: Vec<u8>,
    /// Raw rejected options, echoed in the reject
    reject_data: Vec<u8>,
    /// Offending packet, echoed inside a Code-Reject
    bad_packet: Vec<u8>,
    /// Peer's magic number, once seen
    peer_magic: u32,
    /// Outbound PPP frames awaiting flush to the channel
    outbox: Vec<Vec<u8>>,
    up: bool,
    finished: bool,
}

impl LcpLayer {
    fn new() -> Self {
        Self {
            magic: generate_magic(),
            ..Self::default()
        }
    }

    fn push(&mut self, packet: Vec<u8>) {
        self.outbox.push(ppp::wrap_frame(protocols::LCP, &packet));
    }

    /// Split the peer's request into acceptable and rejected options,
    /// remembering what the ack or reject must echo. Returns true when
    /// anything was rejected.
    fn triage_request(&mut self, packet: &NegPacket<'_>) -> bool {
        self.req_id = packet.identifier();
        self.req_data = packet.data().to_vec();
        self.reject_data.clear();

        for opt in packet.iter_options() {
            match opt.opt_type {
                options::MRU if opt.data.len() >= 2 => {}
                options::MAGIC_NUMBER if opt.data.len() >= 4 => {
                    self.peer_magic =
                        u32::from_be_bytes([opt.data[0], opt.data[1], opt.data[2], opt.data[3]]);
                }
                _ => self.reject_data.extend_from_slice(opt.raw),
            }
        }

        !self.reject_data.is_empty()
    }

    fn note_bad_packet(&mut self, packet: &[u8]) {
        self.bad_packet = packet.to_vec();
    }

    fn next_ident(&mut self) -> u8 {
        self.ident = self.ident.wrapping_add(1);
        self.ident
    }
}

impl LayerHooks for LcpLayer {
    fn send_configure_request(&mut self) {
        let id = self.next_ident();
        let packet = NegBuilder::configure_request(id)
            .option(options::MRU, &LCP_MRU.to_be_bytes())
            .option(options::MAGIC_NUMBER, &self.magic.to_be_bytes())
            .build();
        debug!("lcp: sending Configure-Request (id={})", id);
        self.push(packet);
    }

    fn send_configure_ack(&mut self) {
        debug!("lcp: sending Configure-Ack (id={})", self.req_id);
        let packet = NegBuilder::configure_ack(self.req_id)
            .raw_data(&self.req_data)
            .build();
        self.push(packet);
    }

    fn send_configure_reject(&mut self) {
        debug!("lcp: sending Configure-Reject (id={})", self.req_id);
        let packet = NegBuilder::configure_reject(self.req_id)
            .raw_data(&self.reject_data)
            .build();
        self.push(packet);
    }

    fn send_terminate_request(&mut self, id: u8) {
        debug!("lcp: sending Terminate-Request (id={})", id);
        self.push(NegBuilder::terminate_request(id).build());
    }

    fn send_terminate_ack(&mut self, id: u8) {
        debug!("lcp: sending Terminate-Ack (id={})", id);
        self.push(NegBuilder::terminate_ack(id).build());
    }

    fn send_code_reject(&mut self) {
        let id = self.next_ident();
        let packet = NegBuilder::code_reject(id)
            .raw_data(&self.bad_packet)
            .build();
        self.push(packet);
    }

    fn send_echo_reply(&mut self, id: u8) {
        self.push(NegBuilder::echo_reply(id, self.magic).build());
    }

    fn layer_up(&mut self) {
        info!("lcp: link up");
        self.up = true;
    }

    fn layer_down(&mut self) {
        info!("lcp: link down");
        self.up = false;
    }

    fn layer_started(&mut self) {
        debug!("lcp: layer started");
    }

    fn layer_finished(&mut self) {
        info!("lcp: negotiation finished");
        self.finished = true;
    }
}

/// Pseudo-random magic number, seeded from the clock
fn generate_magic() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u32;
    seed.wrapping_mul(1664525).wrapping_add(1013904223)
}

/// One PPP call inside a PPTP tunnel.
#[derive(Debug)]
pub struct PppCall<C> {
    channel: Option<C>,
    lcp: LinkAutomaton<LcpLayer>,
}

impl<C: CallChannel> PppCall<C> {
    pub fn new(settings: AutomatonSettings) -> Self {
        Self {
            channel: None,
            lcp: LinkAutomaton::new("lcp", settings, LcpLayer::new()),
        }
    }

    pub fn is_established(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    pub fn lcp_state(&self) -> FsmState {
        self.lcp.state()
    }

    /// Whether link negotiation gave up without ever hearing the peer.
    pub fn lcp_passive(&self) -> bool {
        self.lcp.passive()
    }

    /// Take ownership of an opened data-plane channel and begin link
    /// negotiation on it.
    pub fn establish(&mut self, channel: C) -> Result<()> {
        info!("ppp: call {} established", channel.call_id());
        self.channel = Some(channel);
        self.lcp.open();
        self.lcp.lower_up();
        self.flush()
    }

    /// Process one inbound PPP frame from the data path.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        let frame = match PppFrame::parse(frame) {
            Ok(f) => f,
            Err(e) => {
                debug!("ppp: dropping malformed frame: {}", e);
                return Ok(());
            }
        };

        match frame.protocol() {
            protocols::LCP => self.handle_lcp(frame.payload()),
            other => {
                debug!("ppp: ignoring protocol 0x{:04x}", other);
            }
        }
        self.flush()
    }

    fn handle_lcp(&mut self, payload: &[u8]) {
        let packet = match NegPacket::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                debug!("lcp: dropping malformed packet: {}", e);
                return;
            }
        };

        let id = packet.identifier();
        match packet.code() {
            codes::CONFIGURE_REQUEST => {
                let rejected = self.lcp.hooks_mut().triage_request(&packet);
                if rejected {
                    self.lcp.recv_configure_req_bad(id);
                } else {
                    self.lcp.recv_configure_req_good(id);
                }
            }
            codes::CONFIGURE_ACK => self.lcp.recv_configure_ack(id),
            // A nak suggests alternatives we do not act on; both demote the
            // retry budget the same way.
            codes::CONFIGURE_NAK | codes::CONFIGURE_REJECT => self.lcp.recv_configure_reject(id),
            codes::TERMINATE_REQUEST => self.lcp.recv_terminate_request(id),
            codes::TERMINATE_ACK => self.lcp.recv_terminate_ack(),
            codes::CODE_REJECT => {
                if code_reject_is_catastrophic(packet.data()) {
                    self.lcp.recv_code_reject_catastrophic();
                } else {
                    self.lcp.recv_code_reject_permanent();
                }
            }
            codes::ECHO_REQUEST => self.lcp.recv_echo_request(id),
            codes::ECHO_REPLY | codes::DISCARD_REQUEST | codes::PROTOCOL_REJECT => {}
            _ => {
                self.lcp.hooks_mut().note_bad_packet(packet.as_bytes());
                self.lcp.recv_unknown_code();
            }
        }
    }

    /// Drain the data-plane channel, feeding each frame through the link.
    pub fn pump_channel(&mut self) -> Result<()> {
        let mut buf = [0u8; 2048];
        loop {
            let n = match self.channel.as_mut() {
                Some(ch) => match ch.recv_frame(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                None => return Ok(()),
            };
            self.handle_frame(&buf[..n])?;
        }
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        self.lcp.timer_deadline()
    }

    pub fn on_timer(&mut self) -> Result<()> {
        self.lcp.timer_expired();
        self.flush()
    }

    /// Graceful teardown of the negotiated link.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.channel.is_some() {
            self.lcp.close();
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let frames = std::mem::take(&mut self.lcp.hooks_mut().outbox);
        if let Some(ch) = self.channel.as_mut() {
            for frame in &frames {
                ch.send_frame(frame)?;
            }
        }
        Ok(())
    }
}

/// A Code-Reject is catastrophic when the rejected packet carried a code
/// negotiation cannot proceed without.
fn code_reject_is_catastrophic(rejected: &[u8]) -> bool {
    match rejected.first() {
        Some(&code) => matches!(
            code,
            codes::CONFIGURE_REQUEST
                | codes::CONFIGURE_ACK
                | codes::CONFIGURE_NAK
                | codes::CONFIGURE_REJECT
                | codes::TERMINATE_REQUEST
                | codes::TERMINATE_ACK
        ),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct MockChannel {
        sent: Vec<Vec<u8>>,
        inbox: VecDeque<Vec<u8>>,
    }

    impl CallChannel for MockChannel {
        fn call_id(&self) -> u16 {
            42
        }

        fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbox.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    fn call() -> PppCall<MockChannel> {
        let mut call = PppCall::new(AutomatonSettings::default());
        call.establish(MockChannel::default()).unwrap();
        call
    }

    fn sent(call: &mut PppCall<MockChannel>) -> Vec<Vec<u8>> {
        std::mem::take(&mut call.channel.as_mut().unwrap().sent)
    }

    /// Strip the PPP header and parse what follows as LCP.
    fn lcp_code(frame: &[u8]) -> (u8, u8) {
        let ppp = PppFrame::parse(frame).unwrap();
        assert_eq!(ppp.protocol(), protocols::LCP);
        let packet = NegPacket::parse(ppp.payload()).unwrap();
        (packet.code(), packet.identifier())
    }

    fn lcp_frame(packet: Vec<u8>) -> Vec<u8> {
        ppp::wrap_frame(protocols::LCP, &packet)
    }

    #[test]
    fn test_establish_sends_configure_request() {
        let mut call = call();
        assert_eq!(call.lcp_state(), FsmState::ReqSent);

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        assert_eq!(lcp_code(&frames[0]), (codes::CONFIGURE_REQUEST, 1));
    }

    #[test]
    fn test_acceptable_request_is_acked_with_same_options() {
        let mut call = call();
        sent(&mut call);

        let req = NegBuilder::configure_request(9)
            .option(options::MRU, &1492u16.to_be_bytes())
            .option(options::MAGIC_NUMBER, &0x0102_0304u32.to_be_bytes())
            .build();
        call.handle_frame(&lcp_frame(req.clone())).unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        let ppp = PppFrame::parse(&frames[0]).unwrap();
        let ack = NegPacket::parse(ppp.payload()).unwrap();
        assert_eq!(ack.code(), codes::CONFIGURE_ACK);
        assert_eq!(ack.identifier(), 9);
        assert_eq!(ack.data(), &req[4..]);
        assert_eq!(call.lcp_state(), FsmState::AckSent);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let mut call = call();
        sent(&mut call);

        // Authentication-Protocol (3) is not in the accepted set.
        let req = NegBuilder::configure_request(2)
            .option(options::MRU, &1492u16.to_be_bytes())
            .option(3, &0xc023u16.to_be_bytes())
            .build();
        call.handle_frame(&lcp_frame(req)).unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        let ppp = PppFrame::parse(&frames[0]).unwrap();
        let rej = NegPacket::parse(ppp.payload()).unwrap();
        assert_eq!(rej.code(), codes::CONFIGURE_REJECT);
        assert_eq!(rej.identifier(), 2);
        // Only the offending option is echoed.
        assert_eq!(rej.data(), &[3, 4, 0xc0, 0x23]);
        assert_eq!(call.lcp_state(), FsmState::ReqSent);
    }

    fn negotiate_to_opened(call: &mut PppCall<MockChannel>) {
        let req = NegBuilder::configure_request(1)
            .option(options::MAGIC_NUMBER, &0xabcd_ef01u32.to_be_bytes())
            .build();
        call.handle_frame(&lcp_frame(req)).unwrap();
        call.handle_frame(&lcp_frame(NegBuilder::configure_ack(1).build()))
            .unwrap();
        assert_eq!(call.lcp_state(), FsmState::Opened);
        sent(call);
    }

    #[test]
    fn test_full_negotiation_then_echo() {
        let mut call = call();
        sent(&mut call);
        negotiate_to_opened(&mut call);

        let echo = NegBuilder::new(codes::ECHO_REQUEST, 7).build();
        call.handle_frame(&lcp_frame(echo)).unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        assert_eq!(lcp_code(&frames[0]), (codes::ECHO_REPLY, 7));
    }

    #[test]
    fn test_echo_ignored_before_opened() {
        let mut call = call();
        sent(&mut call);

        let echo = NegBuilder::new(codes::ECHO_REQUEST, 7).build();
        call.handle_frame(&lcp_frame(echo)).unwrap();
        assert!(sent(&mut call).is_empty());
    }

    #[test]
    fn test_terminate_request_is_acked() {
        let mut call = call();
        sent(&mut call);
        negotiate_to_opened(&mut call);

        let term = NegBuilder::terminate_request(3).build();
        call.handle_frame(&lcp_frame(term)).unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        assert_eq!(lcp_code(&frames[0]), (codes::TERMINATE_ACK, 3));
        assert_eq!(call.lcp_state(), FsmState::Stopping);
    }

    #[test]
    fn test_unknown_code_gets_code_reject() {
        let mut call = call();
        sent(&mut call);

        let bogus = NegBuilder::new(0x55, 9).build();
        call.handle_frame(&lcp_frame(bogus.clone())).unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        let ppp = PppFrame::parse(&frames[0]).unwrap();
        let rej = NegPacket::parse(ppp.payload()).unwrap();
        assert_eq!(rej.code(), codes::CODE_REJECT);
        assert_eq!(rej.data(), bogus.as_slice());
    }

    #[test]
    fn test_pump_channel_drains_inbox() {
        let mut call = call();
        sent(&mut call);

        let req = NegBuilder::configure_request(1).build();
        call.channel
            .as_mut()
            .unwrap()
            .inbox
            .push_back(lcp_frame(req));
        call.pump_channel().unwrap();

        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        assert_eq!(lcp_code(&frames[0]), (codes::CONFIGURE_ACK, 1));
    }

    #[test]
    fn test_shutdown_sends_terminate_request() {
        let mut call = call();
        sent(&mut call);
        negotiate_to_opened(&mut call);

        call.shutdown().unwrap();
        let frames = sent(&mut call);
        assert_eq!(frames.len(), 1);
        assert_eq!(lcp_code(&frames[0]).0, codes::TERMINATE_REQUEST);
        assert_eq!(call.lcp_state(), FsmState::Closing);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let mut call = call();
        sent(&mut call);

        call.handle_frame(&[0xc0]).unwrap();
        call.handle_frame(&ppp::wrap_frame(protocols::LCP, &[0x01, 0x01, 0x00]))
            .unwrap();
        assert!(sent(&mut call).is_empty());
        assert_eq!(call.lcp_state(), FsmState::ReqSent);
    }
}
