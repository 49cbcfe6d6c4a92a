//! Nonblocking UDP stand-in for a shared broadcast medium. Each node binds
//! one socket and "broadcasts" by unicasting the frame to every configured
//! peer; readiness is driven through a poller so hosts can sleep until
//! either a frame or a timer deadline.

use std::net;
use std::sync::Arc;
use std::time;

const SOCKET_POLLING_KEY: usize = 0;

pub struct LinkTx {
    // Nonblocking socket, shared with the rx half
    socket: Arc<net::UdpSocket>,
    // Everyone in earshot
    peers: Box<[net::SocketAddr]>,
}

pub struct LinkRx {
    socket: Arc<net::UdpSocket>,
    // Cached at bind time
    local_addr: net::SocketAddr,
    poller: polling::Poller,
    poller_events: polling::Events,
    // Sized for the largest frame once, up front
    recv_buffer: Box<[u8]>,
}

impl LinkTx {
    /// Hands the frame to every peer. Send errors are ignored the way a
    /// radio ignores them: a broadcast medium gives no delivery feedback.
    pub fn broadcast(&self, frame: &[u8]) {
        for peer in self.peers.iter() {
            let _ = self.socket.send_to(frame, peer);
        }
    }

    pub fn peers(&self) -> &[net::SocketAddr] {
        &self.peers
    }
}

impl LinkRx {
    /// If a frame can be read from the socket, returns it. Returns Ok(None)
    /// otherwise.
    pub fn try_read_frame(&mut self) -> std::io::Result<Option<&[u8]>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((frame_len, _sender_addr)) => {
                let frame_bytes = &self.recv_buffer[..frame_len];
                Ok(Some(frame_bytes))
            }
            Err(err) => match err.kind() {
                // WouldBlock just means the socket is drained
                std::io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    /// Blocks for up to `timeout` waiting for an incoming frame and returns
    /// it. Returns Ok(None) on timeout or a spurious wakeup.
    pub fn wait_for_frame(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> std::io::Result<Option<&[u8]>> {
        // Readability interest must be re-armed before every wait() call
        self.poller
            .modify(&*self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            self.try_read_frame()
        } else {
            Ok(None)
        }
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}

pub fn new<A>(
    bind_address: A,
    peers: &[net::SocketAddr],
    frame_size_max: usize,
) -> std::io::Result<(LinkTx, LinkRx)>
where
    A: net::ToSocketAddrs,
{
    let socket = net::UdpSocket::bind(bind_address)?;
    socket.set_nonblocking(true)?;

    let local_addr = socket.local_addr()?;

    let poller = polling::Poller::new()?;

    unsafe {
        poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
    }

    let socket_rc = Arc::new(socket);

    let tx = LinkTx {
        socket: Arc::clone(&socket_rc),
        peers: peers.into(),
    };

    let rx = LinkRx {
        socket: socket_rc,
        local_addr,
        poller,
        poller_events: polling::Events::new(),
        recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
    };

    Ok((tx, rx))
}
