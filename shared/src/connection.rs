//! Length-framed duplex transport over TCP sockets or in-process pipes
//!
//! Every message on the wire is a 4-byte big-endian length followed by that
//! many payload bytes. A zero length is never a message: it is the close
//! signal, sent by [`Connection::close`] and turned into an invalid
//! connection by the receiving [`Connection::receive`].
//!
//! Failures never propagate to the caller. Any I/O error closes the
//! descriptors and leaves the connection invalid, which is observable only
//! through [`Connection::is_valid`].
//!
//! [`Connection::send`] and [`Connection::receive`] block until a whole frame
//! has moved. A connection switched to non-blocking mode is driven instead
//! with [`Connection::try_receive`] and [`Connection::try_send`], which keep
//! a partly transferred frame in a [`FrameReader`] or [`FrameWriter`] and
//! resume it on the next call.

use log::{debug, warn};
use std::io::{self, ErrorKind, PipeReader, PipeWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

/// Size of the frame header carrying the payload length.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const CLOSE_FRAME: [u8; LENGTH_PREFIX_LEN] = [0; LENGTH_PREFIX_LEN];

/// Physical carrier behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    Pipe,
}

#[derive(Debug)]
enum Transport {
    Socket(TcpStream),
    /// Two unrelated pipes: one we read from, one the peer reads from.
    Pipe {
        reader: PipeReader,
        writer: PipeWriter,
    },
}

impl Transport {
    fn kind(&self) -> TransportKind {
        match self {
            Transport::Socket(_) => TransportKind::Socket,
            Transport::Pipe { .. } => TransportKind::Pipe,
        }
    }

    fn reader(&mut self) -> &mut dyn Read {
        match self {
            Transport::Socket(stream) => stream,
            Transport::Pipe { reader, .. } => reader,
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Transport::Socket(stream) => stream,
            Transport::Pipe { writer, .. } => writer,
        }
    }

    fn read_fd(&self) -> RawFd {
        match self {
            Transport::Socket(stream) => stream.as_raw_fd(),
            Transport::Pipe { reader, .. } => reader.as_raw_fd(),
        }
    }

    fn write_fd(&self) -> RawFd {
        match self {
            Transport::Socket(stream) => stream.as_raw_fd(),
            Transport::Pipe { writer, .. } => writer.as_raw_fd(),
        }
    }

    /// Releases the descriptors. A socket is shut down in both directions
    /// first; the two pipe ends are simply dropped.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Transport::Socket(stream) => stream.set_nonblocking(nonblocking),
            Transport::Pipe { reader, writer } => {
                set_fd_nonblocking(reader.as_raw_fd(), nonblocking)?;
                set_fd_nonblocking(writer.as_raw_fd(), nonblocking)
            }
        }
    }

    fn shutdown(self) {
        match self {
            Transport::Socket(stream) => {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!("Socket shutdown failed: {}", e);
                }
            }
            Transport::Pipe { reader, writer } => {
                drop(reader);
                drop(writer);
            }
        }
    }
}

/// One logical duplex byte channel with message framing.
///
/// A connection holds its descriptors until it becomes invalid, at which
/// point they are closed exactly once. The default value is an invalid
/// connection that owns nothing.
#[derive(Debug, Default)]
pub struct Connection {
    transport: Option<Transport>,
}

impl Connection {
    /// Wraps a connected TCP stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        // The header and payload go out as separate writes.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Self {
            transport: Some(Transport::Socket(stream)),
        }
    }

    pub(crate) fn from_pipe(reader: PipeReader, writer: PipeWriter) -> Self {
        Self {
            transport: Some(Transport::Pipe { reader, writer }),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.transport.is_some()
    }

    pub fn kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(Transport::kind)
    }

    /// Descriptor to watch for readability. Same as [`Self::write_fd`] for sockets.
    pub fn read_fd(&self) -> Option<RawFd> {
        self.transport.as_ref().map(Transport::read_fd)
    }

    /// Descriptor to watch for writability. Same as [`Self::read_fd`] for sockets.
    pub fn write_fd(&self) -> Option<RawFd> {
        self.transport.as_ref().map(Transport::write_fd)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Some(Transport::Socket(stream)) => stream.peer_addr().ok(),
            _ => None,
        }
    }

    /// Duplicates the descriptors so one thread can send while another
    /// receives. Each copy tracks its own validity; closing either shuts the
    /// channel for both. Returns `None` on an invalid connection or if the
    /// descriptors cannot be duplicated.
    pub fn try_clone(&self) -> Option<Connection> {
        let transport = match self.transport.as_ref()? {
            Transport::Socket(stream) => Transport::Socket(stream.try_clone().ok()?),
            Transport::Pipe { reader, writer } => Transport::Pipe {
                reader: reader.try_clone().ok()?,
                writer: writer.try_clone().ok()?,
            },
        };

        Some(Connection {
            transport: Some(transport),
        })
    }

    /// Sends one frame carrying `payload`.
    ///
    /// An empty payload is the close signal, so sending one is the same as
    /// calling [`Self::close`]. Write failures invalidate the connection
    /// silently. Does nothing on an invalid connection.
    pub fn send(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            self.close();
            return;
        }

        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        if payload.len() > MAX_FRAME_LEN {
            warn!(
                "Refusing to send {} byte frame (limit {}), closing connection",
                payload.len(),
                MAX_FRAME_LEN
            );
            self.close_streams();
            return;
        }

        let prefix = (payload.len() as u32).to_be_bytes();
        let writer = transport.writer();
        let result = writer
            .write_all(&prefix)
            .and_then(|()| writer.write_all(payload));

        if let Err(e) = result {
            debug!("Send failed, closing connection: {}", e);
            self.close_streams();
        }
    }

    /// Reads one frame and returns its payload.
    ///
    /// Returns an empty vector when the connection is (or becomes) invalid:
    /// on an invalid connection, a short length prefix, an oversized
    /// length, or the peer's close signal. If the stream fails part way
    /// through a payload, the connection is invalidated and the bytes read
    /// so far are returned.
    pub fn receive(&mut self) -> Vec<u8> {
        let Some(transport) = self.transport.as_mut() else {
            return Vec::new();
        };
        let reader = transport.reader();

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let (filled, err) = read_full(reader, &mut prefix);
        if let Some(e) = err {
            debug!(
                "Length prefix read failed after {} bytes, closing connection: {}",
                filled, e
            );
            self.close_streams();
            return Vec::new();
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            debug!("Peer sent close signal");
            self.close_streams();
            return Vec::new();
        }
        if len > MAX_FRAME_LEN {
            warn!(
                "Peer announced {} byte frame (limit {}), closing connection",
                len, MAX_FRAME_LEN
            );
            self.close_streams();
            return Vec::new();
        }

        let mut payload = vec![0u8; len];
        let (got, err) = read_full(reader, &mut payload);
        if let Some(e) = err {
            warn!(
                "Connection failed mid-frame ({} of {} bytes): {}",
                got, len, e
            );
            payload.truncate(got);
            self.close_streams();
        }

        payload
    }

    /// Sends the close signal (best effort) and releases the descriptors.
    /// Does nothing if the connection is already invalid.
    pub fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        if let Err(e) = transport.writer().write_all(&CLOSE_FRAME) {
            debug!("Close signal not delivered: {}", e);
        }
        transport.shutdown();
    }

    /// Switches the descriptors between blocking and non-blocking mode.
    /// The blocking `send`/`receive` treat `WouldBlock` as a failure, so a
    /// non-blocking connection should only be driven with `try_*`.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.transport {
            Some(transport) => transport.set_nonblocking(nonblocking),
            None => Ok(()),
        }
    }

    /// Reads whatever is available towards the frame held in `frame`.
    ///
    /// Returns [`ReadProgress::Pending`] when the descriptor has no more data
    /// and the frame is still incomplete. On end of stream, an I/O error, the
    /// close signal or an oversized length the connection is invalidated and
    /// [`ReadProgress::Closed`] carries whatever payload bytes had arrived.
    pub fn try_receive(&mut self, frame: &mut FrameReader) -> ReadProgress {
        let Some(transport) = self.transport.as_mut() else {
            return ReadProgress::Closed(Vec::new());
        };
        let reader = transport.reader();

        loop {
            match reader.read(frame.unfilled()) {
                Ok(0) => {
                    debug!("Peer hung up");
                    break;
                }
                Ok(n) => match frame.advance(n) {
                    Filled::Partial => {}
                    Filled::Payload(payload) => return ReadProgress::Frame(payload),
                    Filled::Prefix(0) => {
                        debug!("Peer sent close signal");
                        frame.reset();
                        self.close_streams();
                        return ReadProgress::Closed(Vec::new());
                    }
                    Filled::Prefix(len) if len > MAX_FRAME_LEN => {
                        warn!(
                            "Peer announced {} byte frame (limit {}), closing connection",
                            len, MAX_FRAME_LEN
                        );
                        frame.reset();
                        self.close_streams();
                        return ReadProgress::Closed(Vec::new());
                    }
                    Filled::Prefix(len) => frame.expect_payload(len),
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return ReadProgress::Pending,
                Err(e) => {
                    debug!("Receive failed, closing connection: {}", e);
                    break;
                }
            }
        }

        let partial = frame.take_partial();
        if !partial.is_empty() {
            warn!("Connection failed mid-frame after {} bytes", partial.len());
        }
        self.close_streams();
        ReadProgress::Closed(partial)
    }

    /// Loads `payload` into an idle `frame` for [`Self::try_send`].
    ///
    /// An empty payload is the close signal: the connection closes once
    /// [`Self::try_send`] has written it. An oversized payload invalidates
    /// the connection without writing anything.
    pub fn begin_frame(&mut self, frame: &mut FrameWriter, payload: &[u8]) {
        if payload.len() > MAX_FRAME_LEN {
            warn!(
                "Refusing to send {} byte frame (limit {}), closing connection",
                payload.len(),
                MAX_FRAME_LEN
            );
            self.close_streams();
            return;
        }
        frame.load(payload);
    }

    /// Writes as much of the frame in `frame` as the descriptor accepts.
    pub fn try_send(&mut self, frame: &mut FrameWriter) -> WriteProgress {
        let Some(transport) = self.transport.as_mut() else {
            frame.clear();
            return WriteProgress::Closed;
        };
        let writer = transport.writer();
        let closing = frame.closing;

        while !frame.is_idle() {
            match writer.write(frame.unwritten()) {
                Ok(0) => {
                    debug!("Peer stopped accepting data, closing connection");
                    frame.clear();
                    self.close_streams();
                    return WriteProgress::Closed;
                }
                Ok(n) => frame.advance(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return WriteProgress::Pending,
                Err(e) => {
                    debug!("Send failed, closing connection: {}", e);
                    frame.clear();
                    self.close_streams();
                    return WriteProgress::Closed;
                }
            }
        }

        if closing {
            self.close_streams();
            return WriteProgress::Closed;
        }
        WriteProgress::Done
    }

    fn close_streams(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
    }
}

/// Outcome of one [`Connection::try_receive`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadProgress {
    /// No complete frame yet; call again when the descriptor is readable.
    Pending,
    Frame(Vec<u8>),
    /// The connection is now invalid. Holds the payload bytes of a frame cut
    /// short by a failure, if any.
    Closed(Vec<u8>),
}

/// Outcome of one [`Connection::try_send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    Pending,
    Done,
    Closed,
}

enum Filled {
    Partial,
    Prefix(usize),
    Payload(Vec<u8>),
}

/// Receive-side state of a frame that arrives over several reads.
#[derive(Debug, Default)]
pub struct FrameReader {
    prefix: [u8; LENGTH_PREFIX_LEN],
    prefix_filled: usize,
    payload: Option<Vec<u8>>,
    payload_filled: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// True between frames.
    pub fn is_idle(&self) -> bool {
        self.prefix_filled == 0
    }

    fn unfilled(&mut self) -> &mut [u8] {
        match &mut self.payload {
            Some(payload) => &mut payload[self.payload_filled..],
            None => &mut self.prefix[self.prefix_filled..],
        }
    }

    fn advance(&mut self, n: usize) -> Filled {
        match &mut self.payload {
            Some(payload) => {
                self.payload_filled += n;
                if self.payload_filled < payload.len() {
                    return Filled::Partial;
                }
                let payload = std::mem::take(payload);
                self.reset();
                Filled::Payload(payload)
            }
            None => {
                self.prefix_filled += n;
                if self.prefix_filled < LENGTH_PREFIX_LEN {
                    return Filled::Partial;
                }
                Filled::Prefix(u32::from_be_bytes(self.prefix) as usize)
            }
        }
    }

    fn expect_payload(&mut self, len: usize) {
        self.payload = Some(vec![0; len]);
        self.payload_filled = 0;
    }

    fn take_partial(&mut self) -> Vec<u8> {
        let partial = match self.payload.take() {
            Some(mut payload) => {
                payload.truncate(self.payload_filled);
                payload
            }
            None => Vec::new(),
        };
        self.reset();
        partial
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Send-side state: one encoded frame and how much of it has been written.
#[derive(Debug, Default)]
pub struct FrameWriter {
    bytes: Vec<u8>,
    written: usize,
    /// The loaded frame is the close signal.
    closing: bool,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no frame is loaded or the loaded one has gone out.
    pub fn is_idle(&self) -> bool {
        self.written >= self.bytes.len()
    }

    /// Bytes of the current frame still to be written.
    pub fn pending_len(&self) -> usize {
        self.bytes.len().saturating_sub(self.written)
    }

    fn load(&mut self, payload: &[u8]) {
        self.bytes.clear();
        self.bytes.reserve(LENGTH_PREFIX_LEN + payload.len());
        self.bytes
            .extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(payload);
        self.written = 0;
        self.closing = payload.is_empty();
    }

    fn unwritten(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    fn advance(&mut self, n: usize) {
        self.written += n;
        if self.is_idle() {
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.written = 0;
        self.closing = false;
    }
}

fn set_fd_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: `fd` belongs to a pipe end owned by the caller and stays open
    // for the duration of both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };

    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reads until `buf` is full, the stream ends, or an error occurs.
///
/// Returns how many bytes were filled, plus the error that stopped the read
/// early. End of stream before `buf` is full counts as `UnexpectedEof`.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> (usize, Option<io::Error>) {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return (filled, Some(ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }

    (filled, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::net::TcpListener;
    use std::thread;

    fn pipe_pair() -> (Connection, Connection) {
        let (r1, w1) = io::pipe().unwrap();
        let (r2, w2) = io::pipe().unwrap();
        (Connection::from_pipe(r1, w2), Connection::from_pipe(r2, w1))
    }

    fn socket_pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Connection::from_stream(client), Connection::from_stream(server))
    }

    /// Pipe connection whose far side is a raw writer, for hand-made frames.
    fn raw_feed() -> (Connection, PipeWriter) {
        let (reader, feed) = io::pipe().unwrap();
        let (_, writer) = io::pipe().unwrap();
        (Connection::from_pipe(reader, writer), feed)
    }

    #[test]
    fn test_default_is_invalid() {
        let mut conn = Connection::default();
        assert!(!conn.is_valid());
        assert_eq!(conn.kind(), None);
        assert_eq!(conn.read_fd(), None);

        conn.send(b"ignored");
        assert!(conn.receive().is_empty());
        conn.close();
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_pipe_send_receive() {
        let (mut a, mut b) = pipe_pair();
        let data: Vec<u8> = (0..10).collect();

        a.send(&data);
        assert_eq!(b.receive(), data);
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert_eq!(a.kind(), Some(TransportKind::Pipe));
    }

    #[test]
    fn test_pipe_directions_are_independent() {
        let (mut a, mut b) = pipe_pair();

        a.send(b"ping");
        b.send(b"pong");

        assert_eq!(a.receive(), b"pong");
        assert_eq!(b.receive(), b"ping");
        assert_ne!(a.read_fd(), a.write_fd());
    }

    #[test]
    fn test_socket_send_receive() {
        let (mut a, mut b) = socket_pair();
        let data: Vec<u8> = (0..10).collect();

        a.send(&data);
        assert_eq!(b.receive(), data);

        b.send(b"reply");
        assert_eq!(a.receive(), b"reply");
        assert_eq!(a.kind(), Some(TransportKind::Socket));
        assert_eq!(a.read_fd(), a.write_fd());
        assert!(a.peer_addr().is_some());
    }

    #[test]
    fn test_large_payload_over_socket() {
        let (mut a, mut b) = socket_pair();
        let mut data = vec![0u8; 1024 * 1024];
        rand::thread_rng().fill(&mut data[..]);

        let expected = data.clone();
        let writer = thread::spawn(move || {
            a.send(&data);
            a
        });

        assert_eq!(b.receive(), expected);
        assert!(writer.join().unwrap().is_valid());
    }

    #[test]
    fn test_large_payload_over_pipe() {
        // Well past the 64 KiB pipe buffer, so the writer must block midway.
        let (mut a, mut b) = pipe_pair();
        let mut data = vec![0u8; 512 * 1024];
        rand::thread_rng().fill(&mut data[..]);

        let expected = data.clone();
        let writer = thread::spawn(move || {
            a.send(&data);
            a
        });

        assert_eq!(b.receive(), expected);
        assert!(writer.join().unwrap().is_valid());
        assert!(b.is_valid());
    }

    #[test]
    fn test_try_receive_resumes_partial_frame() {
        let (mut conn, mut feed) = raw_feed();
        conn.set_nonblocking(true).unwrap();
        let mut frame = FrameReader::new();

        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Pending);
        assert!(frame.is_idle());

        feed.write_all(&[0, 0]).unwrap();
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Pending);
        assert!(!frame.is_idle());

        feed.write_all(&[0, 3, 1, 2]).unwrap();
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Pending);

        feed.write_all(&[3, 0, 0, 0, 1, 9]).unwrap();
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Frame(vec![1, 2, 3]));
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Frame(vec![9]));
        assert!(frame.is_idle());
        assert!(conn.is_valid());
    }

    #[test]
    fn test_try_receive_hangup_mid_payload() {
        let (mut conn, mut feed) = raw_feed();
        conn.set_nonblocking(true).unwrap();
        let mut frame = FrameReader::new();

        feed.write_all(&10u32.to_be_bytes()).unwrap();
        feed.write_all(&[5, 6]).unwrap();
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Pending);

        drop(feed);
        assert_eq!(conn.try_receive(&mut frame), ReadProgress::Closed(vec![5, 6]));
        assert!(!conn.is_valid());
        assert!(frame.is_idle());
    }

    #[test]
    fn test_try_receive_close_signal() {
        let (mut a, mut b) = pipe_pair();
        b.set_nonblocking(true).unwrap();
        let mut frame = FrameReader::new();

        a.close();
        assert_eq!(b.try_receive(&mut frame), ReadProgress::Closed(Vec::new()));
        assert!(!b.is_valid());
        assert_eq!(b.try_receive(&mut frame), ReadProgress::Closed(Vec::new()));
    }

    #[test]
    fn test_try_send_resumes_when_peer_drains() {
        let (mut a, mut b) = pipe_pair();
        a.set_nonblocking(true).unwrap();
        let mut frame = FrameWriter::new();
        let data = vec![0x5a; 256 * 1024];

        a.begin_frame(&mut frame, &data);
        assert!(!frame.is_idle());
        // Nobody reads yet, so the pipe fills and the write parks.
        assert_eq!(a.try_send(&mut frame), WriteProgress::Pending);
        assert!(frame.pending_len() > 0);
        assert!(frame.pending_len() < data.len() + LENGTH_PREFIX_LEN);

        let reader = thread::spawn(move || b.receive());
        while a.try_send(&mut frame) == WriteProgress::Pending {
            thread::yield_now();
        }

        assert!(frame.is_idle());
        assert_eq!(reader.join().unwrap(), data);
        assert!(a.is_valid());
    }

    #[test]
    fn test_begin_frame_empty_closes() {
        let (mut a, mut b) = pipe_pair();
        let mut frame = FrameWriter::new();

        a.begin_frame(&mut frame, &[]);
        assert!(a.is_valid());
        assert_eq!(frame.pending_len(), LENGTH_PREFIX_LEN);

        assert_eq!(a.try_send(&mut frame), WriteProgress::Closed);
        assert!(!a.is_valid());
        assert!(frame.is_idle());

        assert!(b.receive().is_empty());
        assert!(!b.is_valid());
    }

    #[test]
    fn test_close_propagates_to_peer() {
        let (mut a, mut b) = pipe_pair();

        a.close();
        assert!(!a.is_valid());

        assert!(b.receive().is_empty());
        assert!(!b.is_valid());

        // Sending on a closed connection is a silent no-op.
        a.send(b"late");
        assert!(!a.is_valid());
    }

    #[test]
    fn test_close_propagates_over_socket() {
        let (mut a, mut b) = socket_pair();

        b.close();
        assert!(a.receive().is_empty());
        assert!(!a.is_valid());
        assert!(!b.is_valid());
    }

    #[test]
    fn test_cloned_halves_share_the_socket() {
        let (a, mut b) = socket_pair();
        let mut a_send = a.try_clone().unwrap();
        let mut a_recv = a;

        let reader = thread::spawn(move || a_recv.receive());

        a_send.send(b"request");
        assert_eq!(b.receive(), b"request");
        b.send(b"reply");

        assert_eq!(reader.join().unwrap(), b"reply");
        assert!(Connection::default().try_clone().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut a, _b) = pipe_pair();
        a.close();
        a.close();
        assert!(!a.is_valid());
    }

    #[test]
    fn test_empty_send_is_close_signal() {
        let (mut a, mut b) = pipe_pair();

        a.send(&[]);
        assert!(!a.is_valid());

        assert!(b.receive().is_empty());
        assert!(!b.is_valid());
    }

    #[test]
    fn test_truncated_prefix_invalidates() {
        let (mut conn, mut feed) = raw_feed();
        feed.write_all(&[0, 0]).unwrap();
        drop(feed);

        assert!(conn.receive().is_empty());
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_partial_payload_is_returned() {
        let (mut conn, mut feed) = raw_feed();
        feed.write_all(&10u32.to_be_bytes()).unwrap();
        feed.write_all(&[1, 2, 3, 4]).unwrap();
        drop(feed);

        assert_eq!(conn.receive(), vec![1, 2, 3, 4]);
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let (mut conn, mut feed) = raw_feed();
        feed.write_all(&u32::MAX.to_be_bytes()).unwrap();

        assert!(conn.receive().is_empty());
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_wire_format_is_big_endian() {
        let (reader, mut feed) = io::pipe().unwrap();
        let (mut tap, writer) = io::pipe().unwrap();
        let mut conn = Connection::from_pipe(reader, writer);

        conn.send(&[7u8; 258]);
        let mut header = [0u8; LENGTH_PREFIX_LEN];
        tap.read_exact(&mut header).unwrap();
        assert_eq!(header, [0, 0, 1, 2]);

        feed.write_all(&[0; 4]).unwrap();
        assert!(conn.receive().is_empty());
        assert!(!conn.is_valid());
    }
}
