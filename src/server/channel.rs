//! Kernel PPTP data-plane channel
//!
//! Wraps an AF_PPPOX/PX_PROTO_PPTP socket. Binding with a zero call id makes
//! the kernel pick the local id, which the outgoing-call reply then carries
//! back to the peer; connecting ties the socket to the peer's call id so the
//! kernel demultiplexes GRE for us.

use crate::server::call::{CallChannel, ChannelFactory};
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::debug;

const AF_PPPOX: libc::c_int = 24;
const PX_PROTO_PPTP: libc::c_int = 2;

/// struct pptp_addr from linux/if_pppox.h
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct PptpAddr {
    call_id: u16,
    /// in_addr, network byte order
    sin_addr: u32,
}

/// struct sockaddr_pppox, PPTP flavor of the address union
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct SockaddrPppox {
    sa_family: u16,
    sa_protocol: u32,
    pptp: PptpAddr,
}

impl SockaddrPppox {
    fn new(call_id: u16, addr: Ipv4Addr) -> Self {
        Self {
            sa_family: AF_PPPOX as u16,
            sa_protocol: PX_PROTO_PPTP as u32,
            pptp: PptpAddr {
                call_id,
                sin_addr: u32::from(addr).to_be(),
            },
        }
    }
}

/// PPTP socket wrapper carrying the PPP frames of one call
pub struct KernelChannel {
    async_fd: AsyncFd<RawFd>,
    call_id: u16,
}

impl KernelChannel {
    /// Open a channel toward `peer`, claiming a kernel-assigned local call id.
    pub fn open(local: Ipv4Addr, peer: Ipv4Addr, peer_call_id: u16) -> io::Result<Self> {
        let fd = unsafe { libc::socket(AF_PPPOX, libc::SOCK_STREAM, PX_PROTO_PPTP) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // Bind with call id 0 and read back what the kernel assigned.
        let src = SockaddrPppox::new(0, local);
        let ret = unsafe {
            libc::bind(
                fd,
                &src as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrPppox>() as u32,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mut bound: SockaddrPppox = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<SockaddrPppox>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(fd, &mut bound as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let call_id = bound.pptp.call_id;

        let dst = SockaddrPppox::new(peer_call_id, peer);
        let ret = unsafe {
            libc::connect(
                fd,
                &dst as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrPppox>() as u32,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        // Set non-blocking
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        debug!(call_id, peer_call_id, "pptp channel opened");
        let async_fd = AsyncFd::new(fd)?;
        Ok(Self { async_fd, call_id })
    }

    /// Wait until frames may be waiting, then clear readiness. The caller
    /// must drain until WouldBlock afterwards or risk stalling.
    pub async fn readable(&self) -> io::Result<()> {
        let mut guard = self.async_fd.readable().await?;
        guard.clear_ready();
        Ok(())
    }
}

impl CallChannel for KernelChannel {
    fn call_id(&self) -> u16 {
        self.call_id
    }

    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let fd = *self.async_fd.get_ref();
        let n = unsafe { libc::send(fd, frame.as_ptr() as *const _, frame.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = *self.async_fd.get_ref();
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl AsRawFd for KernelChannel {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for KernelChannel {
    fn drop(&mut self) {
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

/// Opens kernel channels for one control connection's calls.
pub struct KernelChannelFactory {
    local: Ipv4Addr,
    peer: Ipv4Addr,
}

impl KernelChannelFactory {
    pub fn new(local: Ipv4Addr, peer: Ipv4Addr) -> Self {
        Self { local, peer }
    }
}

impl ChannelFactory for KernelChannelFactory {
    type Channel = KernelChannel;

    fn open_channel(&mut self, peer_call_id: u16) -> io::Result<KernelChannel> {
        KernelChannel::open(self.local, self.peer, peer_call_id)
    }
}
