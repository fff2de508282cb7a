//! PPTP control connection engine
//!
//! Pure protocol state over an abstract transport: the reactor owns the
//! socket and feeds bytes in, the engine hands bytes back through
//! [`ControlTransport`] and reports when the connection must close. One
//! engine instance per TCP peer.

use crate::protocol::pptp::{
    self, bearer, call_results, conn_results, errors, framing, stop_reasons, stop_results,
    CtrlMessage, OutCall, StartCtrlConn, StopCtrlConn, CTRL_SIZE_MAX, PPTP_VERSION,
};
use crate::protocol::CodecError;
use crate::server::call::{CallChannel, ChannelFactory, PppCall};
use crate::server::fsm::AutomatonSettings;
use crate::{Error, Result};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Byte sink backed by a non-blocking socket.
pub trait ControlTransport {
    /// Attempt a write, returning how many bytes were taken.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
    /// Tell the reactor whether writability should wake us.
    fn set_write_interest(&mut self, enabled: bool);
}

/// Control connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// TCP accepted, Start-Control-Connection not yet exchanged
    Idle,
    /// Control channel up, calls may be placed
    Established,
    /// Stop exchanged, holding the TCP connection briefly so the
    /// reply can drain before close
    Finishing,
}

/// Per-connection tunables, lifted from the server config.
#[derive(Debug, Clone)]
pub struct ConnSettings {
    pub hostname: String,
    pub vendor: String,
    /// Logged when no control traffic arrives for this long
    pub idle_timeout: Duration,
    /// Linger after the stop exchange before dropping TCP
    pub finish_holddown: Duration,
    pub lcp: AutomatonSettings,
}

impl Default for ConnSettings {
    fn default() -> Self {
        Self {
            hostname: String::from("pptpd"),
            vendor: String::from("pptpd"),
            idle_timeout: Duration::from_secs(10),
            finish_holddown: Duration::from_secs(1),
            lcp: AutomatonSettings::default(),
        }
    }
}

/// One PPTP control connection and its single call.
pub struct PptpConn<T, F: ChannelFactory> {
    transport: T,
    factory: F,
    settings: ConnSettings,
    state: ConnState,
    /// Reassembly buffer for inbound control messages
    in_buf: Vec<u8>,
    /// Reply bytes the transport would not take yet
    out_buf: Vec<u8>,
    out_pos: usize,
    call: PppCall<F::Channel>,
    idle_deadline: Instant,
    finish_deadline: Option<Instant>,
    calls_refused: u32,
}

impl<T: ControlTransport, F: ChannelFactory> PptpConn<T, F> {
    pub fn new(transport: T, factory: F, settings: ConnSettings) -> Self {
        let call = PppCall::new(settings.lcp.clone());
        let idle_deadline = Instant::now() + settings.idle_timeout;
        Self {
            transport,
            factory,
            settings,
            state: ConnState::Idle,
            in_buf: Vec::with_capacity(CTRL_SIZE_MAX),
            out_buf: Vec::new(),
            out_pos: 0,
            call,
            idle_deadline,
            finish_deadline: None,
            calls_refused: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn call(&self) -> &PppCall<F::Channel> {
        &self.call
    }

    pub fn call_mut(&mut self) -> &mut PppCall<F::Channel> {
        &mut self.call
    }

    /// True while a reply waits for the transport to become writable.
    pub fn wants_write(&self) -> bool {
        self.out_pos < self.out_buf.len()
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) wants a wakeup.
    pub fn next_deadline(&self) -> Instant {
        let mut deadline = self.finish_deadline.unwrap_or(self.idle_deadline);
        if let Some(lcp) = self.call.timer_deadline() {
            deadline = deadline.min(lcp);
        }
        deadline
    }

    /// Feed bytes read from the control socket. Decodes and dispatches as
    /// many complete messages as arrived, returning how many; a framing
    /// violation is fatal.
    pub fn handle_data(&mut self, data: &[u8]) -> Result<usize> {
        self.in_buf.extend_from_slice(data);

        let mut dispatched = 0;
        loop {
            match pptp::decode(&self.in_buf) {
                Ok(msg) => {
                    let consumed = pptp::peek_header(&self.in_buf)?.length as usize;
                    self.in_buf.drain(..consumed);
                    self.idle_deadline = Instant::now() + self.settings.idle_timeout;
                    self.dispatch(msg)?;
                    dispatched += 1;
                }
                Err(CodecError::Truncated { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        // A partial message can never legitimately exceed one maximal frame.
        if self.in_buf.len() > CTRL_SIZE_MAX {
            return Err(Error::Protocol(format!(
                "control buffer overflow ({} bytes)",
                self.in_buf.len()
            )));
        }
        Ok(dispatched)
    }

    /// Drain buffered reply bytes after the transport became writable.
    pub fn handle_writable(&mut self) -> Result<()> {
        while self.out_pos < self.out_buf.len() {
            match self.transport.try_write(&self.out_buf[self.out_pos..]) {
                Ok(0) => return Err(Error::Protocol("peer closed during write".into())),
                Ok(n) => self.out_pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        self.out_buf.clear();
        self.out_pos = 0;
        self.transport.set_write_interest(false);
        Ok(())
    }

    /// Check expired deadlines. Returns true when the connection is done and
    /// the reactor should drop it.
    pub fn on_timer(&mut self, now: Instant) -> Result<bool> {
        if let Some(finish) = self.finish_deadline {
            if now >= finish {
                info!("control connection finished");
                return Ok(true);
            }
        }
        if self.finish_deadline.is_none() && now >= self.idle_deadline {
            warn!("no control traffic for {:?}", self.settings.idle_timeout);
            self.idle_deadline = now + self.settings.idle_timeout;
        }
        if let Some(lcp) = self.call.timer_deadline() {
            if now >= lcp {
                self.call.on_timer()?;
            }
        }
        Ok(false)
    }

    /// Local shutdown: ask the peer to stop the control connection.
    pub fn initiate_stop(&mut self) -> Result<()> {
        if self.state == ConnState::Finishing {
            return Ok(());
        }
        info!("stopping control connection (local shutdown)");
        self.call.shutdown()?;
        self.post_msg(&CtrlMessage::StopRequest(StopCtrlConn {
            reason: stop_reasons::STOP_LOCAL_SHUTDOWN,
            result: 0,
            error: 0,
        }))?;
        self.enter_finishing();
        Ok(())
    }

    fn dispatch(&mut self, msg: CtrlMessage) -> Result<()> {
        match msg {
            CtrlMessage::StartRequest(req) => self.on_start_request(req),
            CtrlMessage::OutCallRequest(req) => self.on_out_call_request(req),
            CtrlMessage::StopRequest(req) => self.on_stop_request(req),
            CtrlMessage::StopReply(_) => {
                // Arrives when we initiated the stop; the hold-down timer
                // already covers the close.
                debug!("stop reply received");
                Ok(())
            }
            CtrlMessage::StartReply(_) | CtrlMessage::OutCallReply(_) => {
                warn!("ignoring reply message a client should not send");
                Ok(())
            }
            CtrlMessage::Unknown { msg_type, .. } => {
                debug!("ignoring unhandled control message type {}", msg_type);
                Ok(())
            }
        }
    }

    fn on_start_request(&mut self, req: StartCtrlConn) -> Result<()> {
        let (result, error) = if self.state != ConnState::Idle {
            warn!("duplicate start request");
            (conn_results::ALREADY_EXISTS, errors::NONE)
        } else if req.version != PPTP_VERSION {
            warn!("protocol version mismatch: peer 0x{:04x}", req.version);
            (conn_results::VERSION_MISMATCH, errors::NONE)
        } else if req.framing_cap & framing::SYNC == 0 {
            warn!("peer offers no synchronous framing");
            (conn_results::GENERAL_ERROR, errors::NONE)
        } else {
            info!(
                hostname = %req.hostname,
                vendor = %req.vendor,
                "control connection established"
            );
            self.state = ConnState::Established;
            (conn_results::SUCCESS, errors::NONE)
        };

        self.post_msg(&CtrlMessage::StartReply(StartCtrlConn {
            version: PPTP_VERSION,
            result,
            error,
            framing_cap: framing::SYNC,
            bearer_cap: bearer::ANALOG | bearer::DIGITAL,
            max_channels: 1,
            firmware_rev: pptp::FIRMWARE_REVISION,
            hostname: self.settings.hostname.clone(),
            vendor: self.settings.vendor.clone(),
        }))
    }

    fn on_out_call_request(&mut self, req: OutCall) -> Result<()> {
        if self.state != ConnState::Established {
            warn!("outgoing call before control connection established");
            return self.post_out_call_error(req.call_id, errors::NOT_CONNECTED);
        }
        if self.call.is_established() {
            warn!("second outgoing call on a single-call connection");
            return self.post_out_call_error(req.call_id, errors::NONE);
        }

        let channel = match self.factory.open_channel(req.call_id) {
            Ok(ch) => ch,
            Err(e) => {
                warn!("failed to open call channel: {}", e);
                return self.post_out_call_error(req.call_id, errors::NONE);
            }
        };

        let call_id = channel.call_id();
        info!(call_id, peer_call_id = req.call_id, "outgoing call connected");
        self.post_msg(&CtrlMessage::OutCallReply(OutCall {
            call_id,
            peer_call_id: req.call_id,
            result: call_results::CONNECTED,
            error: errors::NONE,
            cause: 0,
            speed: req.speed,
            recv_window: req.recv_window,
            delay: 0,
            channel: 0,
        }))?;
        self.call.establish(channel)
    }

    /// Outgoing call attempts that were refused or failed to open.
    pub fn calls_refused(&self) -> u32 {
        self.calls_refused
    }

    fn post_out_call_error(&mut self, peer_call_id: u16, error: u8) -> Result<()> {
        self.calls_refused += 1;
        self.post_msg(&CtrlMessage::OutCallReply(OutCall {
            call_id: 0,
            peer_call_id,
            result: call_results::GENERAL_ERROR,
            error,
            cause: 0,
            speed: 0,
            recv_window: 0,
            delay: 0,
            channel: 0,
        }))
    }

    fn on_stop_request(&mut self, req: StopCtrlConn) -> Result<()> {
        info!(reason = req.reason, "stop request received");
        self.call.shutdown()?;
        self.post_msg(&CtrlMessage::StopReply(StopCtrlConn {
            reason: 0,
            result: stop_results::OK,
            error: errors::NONE,
        }))?;
        self.enter_finishing();
        Ok(())
    }

    fn enter_finishing(&mut self) {
        self.state = ConnState::Finishing;
        self.finish_deadline = Some(Instant::now() + self.settings.finish_holddown);
    }

    /// Queue a reply: write straight to the transport, buffering whatever it
    /// would not take. Refuses to queue behind an undrained reply so a stuck
    /// peer cannot grow the buffer without bound.
    fn post_msg(&mut self, msg: &CtrlMessage) -> Result<()> {
        if self.wants_write() {
            return Err(Error::Internal(
                "reply posted while the previous one is still buffered".into(),
            ));
        }

        let wire = pptp::encode(msg);
        let mut written = 0;
        while written < wire.len() {
            match self.transport.try_write(&wire[written..]) {
                Ok(0) => return Err(Error::Protocol("peer closed during write".into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        if written < wire.len() {
            self.out_buf = wire;
            self.out_pos = written;
            self.transport.set_write_interest(true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ppp::{codes, NegPacket, PppFrame};
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct MockTransport {
        written: Vec<u8>,
        /// Bytes accepted before WouldBlock; None = unlimited
        budget: Option<usize>,
        write_interest: bool,
    }

    impl ControlTransport for MockTransport {
        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let take = match self.budget {
                Some(0) => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(b) => b.min(buf.len()),
                None => buf.len(),
            };
            if let Some(b) = self.budget.as_mut() {
                *b -= take;
            }
            self.written.extend_from_slice(&buf[..take]);
            Ok(take)
        }

        fn set_write_interest(&mut self, enabled: bool) {
            self.write_interest = enabled;
        }
    }

    #[derive(Debug, Default)]
    struct MockChannel {
        call_id: u16,
        sent: Vec<Vec<u8>>,
        inbox: VecDeque<Vec<u8>>,
    }

    impl CallChannel for MockChannel {
        fn call_id(&self) -> u16 {
            self.call_id
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

    #[derive(Debug, Default)]
    struct MockFactory {
        fail: bool,
        opened: Vec<u16>,
    }

    impl ChannelFactory for MockFactory {
        type Channel = MockChannel;

        fn open_channel(&mut self, peer_call_id: u16) -> io::Result<MockChannel> {
            if self.fail {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.opened.push(peer_call_id);
            Ok(MockChannel {
                call_id: 777,
                ..MockChannel::default()
            })
        }
    }

    type TestConn = PptpConn<MockTransport, MockFactory>;

    fn conn() -> TestConn {
        PptpConn::new(
            MockTransport::default(),
            MockFactory::default(),
            ConnSettings::default(),
        )
    }

    fn start_request() -> Vec<u8> {
        pptp::encode(&CtrlMessage::StartRequest(StartCtrlConn {
            version: PPTP_VERSION,
            result: 0,
            error: 0,
            framing_cap: framing::ASYNC | framing::SYNC,
            bearer_cap: bearer::DIGITAL,
            max_channels: 4,
            firmware_rev: 0x0203,
            hostname: "client".into(),
            vendor: "test".into(),
        }))
    }

    fn out_call_request(call_id: u16) -> Vec<u8> {
        pptp::encode(&CtrlMessage::OutCallRequest(OutCall {
            call_id,
            peer_call_id: 0,
            result: 0,
            error: 0,
            cause: 0,
            speed: 100_000_000,
            recv_window: 64,
            delay: 0,
            channel: 0,
        }))
    }

    fn stop_request() -> Vec<u8> {
        pptp::encode(&CtrlMessage::StopRequest(StopCtrlConn {
            reason: stop_reasons::NONE,
            result: 0,
            error: 0,
        }))
    }

    /// Decode everything the mock transport captured.
    fn replies(conn: &mut TestConn) -> Vec<CtrlMessage> {
        let mut out = Vec::new();
        let mut buf = std::mem::take(&mut conn.transport.written);
        while !buf.is_empty() {
            let msg = pptp::decode(&buf).unwrap();
            let len = pptp::peek_header(&buf).unwrap().length as usize;
            buf.drain(..len);
            out.push(msg);
        }
        out
    }

    fn establish(conn: &mut TestConn) {
        conn.handle_data(&start_request()).unwrap();
        replies(conn);
        assert_eq!(conn.state(), ConnState::Established);
    }

    #[test]
    fn test_start_success() {
        let mut conn = conn();
        conn.handle_data(&start_request()).unwrap();

        let replies = replies(&mut conn);
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CtrlMessage::StartReply(r) => {
                assert_eq!(r.result, conn_results::SUCCESS);
                assert_eq!(r.version, PPTP_VERSION);
                assert_eq!(r.framing_cap, framing::SYNC);
                assert_eq!(r.hostname, "pptpd");
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Established);
    }

    #[test]
    fn test_start_version_mismatch() {
        let mut conn = conn();
        let req = pptp::encode(&CtrlMessage::StartRequest(StartCtrlConn {
            version: 0x0200,
            result: 0,
            error: 0,
            framing_cap: framing::SYNC,
            bearer_cap: 0,
            max_channels: 1,
            firmware_rev: 0,
            hostname: String::new(),
            vendor: String::new(),
        }));
        conn.handle_data(&req).unwrap();

        match &replies(&mut conn)[0] {
            CtrlMessage::StartReply(r) => assert_eq!(r.result, conn_results::VERSION_MISMATCH),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Idle);
    }

    #[test]
    fn test_start_without_sync_framing() {
        let mut conn = conn();
        let req = pptp::encode(&CtrlMessage::StartRequest(StartCtrlConn {
            version: PPTP_VERSION,
            result: 0,
            error: 0,
            framing_cap: framing::ASYNC,
            bearer_cap: 0,
            max_channels: 1,
            firmware_rev: 0,
            hostname: String::new(),
            vendor: String::new(),
        }));
        conn.handle_data(&req).unwrap();

        match &replies(&mut conn)[0] {
            CtrlMessage::StartReply(r) => assert_eq!(r.result, conn_results::GENERAL_ERROR),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Idle);
    }

    #[test]
    fn test_duplicate_start() {
        let mut conn = conn();
        establish(&mut conn);

        conn.handle_data(&start_request()).unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::StartReply(r) => assert_eq!(r.result, conn_results::ALREADY_EXISTS),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Established);
    }

    #[test]
    fn test_out_call_before_start() {
        let mut conn = conn();
        conn.handle_data(&out_call_request(5)).unwrap();

        match &replies(&mut conn)[0] {
            CtrlMessage::OutCallReply(r) => {
                assert_eq!(r.result, call_results::GENERAL_ERROR);
                assert_eq!(r.error, errors::NOT_CONNECTED);
                assert_eq!(r.peer_call_id, 5);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(!conn.call().is_established());
    }

    #[test]
    fn test_out_call_success_starts_negotiation() {
        let mut conn = conn();
        establish(&mut conn);

        conn.handle_data(&out_call_request(9)).unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::OutCallReply(r) => {
                assert_eq!(r.result, call_results::CONNECTED);
                assert_eq!(r.call_id, 777);
                assert_eq!(r.peer_call_id, 9);
                assert_eq!(r.speed, 100_000_000);
                assert_eq!(r.recv_window, 64);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.factory.opened, vec![9]);

        // Negotiation kicked off on the fresh channel.
        let channel = conn.call().channel().unwrap();
        assert_eq!(channel.sent.len(), 1);
        let frame = PppFrame::parse(&channel.sent[0]).unwrap();
        let packet = NegPacket::parse(frame.payload()).unwrap();
        assert_eq!(packet.code(), codes::CONFIGURE_REQUEST);
        assert!(conn.call().timer_deadline().is_some());
    }

    #[test]
    fn test_out_call_factory_failure() {
        let mut conn = conn();
        establish(&mut conn);
        conn.factory.fail = true;

        conn.handle_data(&out_call_request(3)).unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::OutCallReply(r) => {
                assert_eq!(r.result, call_results::GENERAL_ERROR);
                assert_eq!(r.peer_call_id, 3);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(!conn.call().is_established());
    }

    #[test]
    fn test_second_out_call_refused() {
        let mut conn = conn();
        establish(&mut conn);
        conn.handle_data(&out_call_request(1)).unwrap();
        replies(&mut conn);

        conn.handle_data(&out_call_request(2)).unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::OutCallReply(r) => assert_eq!(r.result, call_results::GENERAL_ERROR),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.factory.opened, vec![1]);
    }

    #[test]
    fn test_stop_enters_finishing_and_closes() {
        let mut conn = conn();
        establish(&mut conn);

        conn.handle_data(&stop_request()).unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::StopReply(r) => assert_eq!(r.result, stop_results::OK),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Finishing);

        let now = Instant::now();
        assert!(!conn.on_timer(now).unwrap());
        assert!(conn.on_timer(now + Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut conn = conn();
        let mut req = start_request();
        req[0] = 0xff;
        assert!(matches!(
            conn.handle_data(&req),
            Err(Error::Codec(CodecError::BadMagic(_)))
        ));
    }

    #[test]
    fn test_split_delivery() {
        let mut conn = conn();
        let req = start_request();

        conn.handle_data(&req[..5]).unwrap();
        assert!(replies(&mut conn).is_empty());
        conn.handle_data(&req[5..20]).unwrap();
        assert!(replies(&mut conn).is_empty());
        conn.handle_data(&req[20..]).unwrap();

        assert_eq!(replies(&mut conn).len(), 1);
        assert_eq!(conn.state(), ConnState::Established);
    }

    #[test]
    fn test_pipelined_messages() {
        let mut conn = conn();
        let mut bytes = start_request();
        bytes.extend_from_slice(&out_call_request(4));

        conn.handle_data(&bytes).unwrap();
        let replies = replies(&mut conn);
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], CtrlMessage::StartReply(_)));
        assert!(matches!(replies[1], CtrlMessage::OutCallReply(_)));
    }

    #[test]
    fn test_partial_write_buffers_and_drains() {
        let mut conn = conn();
        conn.transport.budget = Some(10);

        conn.handle_data(&start_request()).unwrap();
        assert!(conn.wants_write());
        assert!(conn.transport.write_interest);
        assert_eq!(conn.transport.written.len(), 10);

        conn.transport.budget = None;
        conn.handle_writable().unwrap();
        assert!(!conn.wants_write());
        assert!(!conn.transport.write_interest);

        let replies = replies(&mut conn);
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], CtrlMessage::StartReply(_)));
    }

    #[test]
    fn test_reply_posted_behind_stuck_peer_is_fatal() {
        let mut conn = conn();
        conn.transport.budget = Some(0);

        conn.handle_data(&start_request()).unwrap();
        assert!(conn.wants_write());
        assert!(conn.handle_data(&stop_request()).is_err());
    }

    #[test]
    fn test_unknown_message_ignored() {
        let mut conn = conn();
        let msg = pptp::encode(&CtrlMessage::Unknown {
            msg_type: 14, // Call-Disconnect-Notify
            body: vec![0; 16],
        });
        conn.handle_data(&msg).unwrap();
        assert!(replies(&mut conn).is_empty());
        assert_eq!(conn.state(), ConnState::Idle);
    }

    #[test]
    fn test_initiate_stop() {
        let mut conn = conn();
        establish(&mut conn);

        conn.initiate_stop().unwrap();
        match &replies(&mut conn)[0] {
            CtrlMessage::StopRequest(r) => {
                assert_eq!(r.reason, stop_reasons::STOP_LOCAL_SHUTDOWN)
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Finishing);

        // Peer's reply is accepted quietly while finishing.
        let reply = pptp::encode(&CtrlMessage::StopReply(StopCtrlConn {
            reason: 0,
            result: stop_results::OK,
            error: 0,
        }));
        conn.handle_data(&reply).unwrap();
    }

    #[test]
    fn test_idle_timer_rearms_without_closing() {
        let mut conn = conn();
        establish(&mut conn);

        let late = Instant::now() + Duration::from_secs(60);
        assert!(!conn.on_timer(late).unwrap());
        assert!(conn.next_deadline() > late);
    }
}
