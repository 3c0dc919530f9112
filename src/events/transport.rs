use super::{EventDispatcher, EventFrame, Handshake, HANDSHAKE_EVENT};
use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use serde_json::json;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Line-delimited JSON event transport.
///
/// Each connection must open with a handshake frame; afterwards one coroutine
/// reads and dispatches inbound frames while another drains the outbound
/// channel to the socket.
pub struct EventServer {
    dispatcher: EventDispatcher,
}

/// Handle to a running event server.
pub struct EventServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl EventServerHandle {
    /// Bound address; the real port when started on port 0.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Open connections run until their peers close.
    pub fn stop(self) {
        // SAFETY: cancelling the accept coroutine is the intended shutdown path;
        // the handle is valid because we own it.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl EventServer {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<EventServerHandle> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let dispatcher = self.dispatcher;
        info!(%addr, "Event server listening");

        let handle = may::go!(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let dispatcher = dispatcher.clone();
                        may::go!(move || {
                            if let Err(e) = serve_connection(&dispatcher, stream) {
                                debug!(error = %e, "Event connection closed with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept event connection"),
                }
            }
        });
        Ok(EventServerHandle { addr, handle })
    }
}

fn write_frame(stream: &mut TcpStream, frame: &EventFrame) -> io::Result<()> {
    let line = frame
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(line.as_bytes())
}

/// Longest inbound frame accepted, newline included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One read from the inbound side of a connection.
#[derive(Debug, PartialEq)]
enum Inbound {
    Frame(Vec<u8>),
    /// A line longer than the cap; its bytes were discarded up to the next newline.
    Oversized,
    Eof,
}

/// Read one newline-terminated frame of at most `max` bytes.
fn read_frame<R: BufRead>(reader: &mut R, max: usize) -> io::Result<Inbound> {
    let mut line = Vec::new();
    let read = reader.by_ref().take(max as u64 + 1).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(Inbound::Eof);
    }
    if line.last() == Some(&b'\n') || line.len() <= max {
        return Ok(Inbound::Frame(line));
    }
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(Inbound::Oversized);
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(Inbound::Oversized);
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

fn decode_frame(bytes: &[u8]) -> Option<EventFrame> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.trim(),
        Err(e) => {
            debug!(error = %e, "Non UTF-8 event frame ignored");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    match EventFrame::decode(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, "Malformed event frame ignored");
            None
        }
    }
}

fn serve_connection(dispatcher: &EventDispatcher, stream: TcpStream) -> io::Result<()> {
    let peer = stream.peer_addr().ok();
    let mut control = stream.try_clone()?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let handshake = match read_frame(&mut reader, MAX_FRAME_BYTES)? {
        Inbound::Eof => return Ok(()),
        Inbound::Frame(bytes) => match decode_frame(&bytes) {
            Some(frame) if frame.event == HANDSHAKE_EVENT => Handshake::from_frame_data(&frame.data),
            _ => {
                debug!(?peer, "Connection without handshake refused");
                return control.shutdown(Shutdown::Both);
            }
        },
        Inbound::Oversized => {
            debug!(?peer, "Oversized handshake refused");
            return control.shutdown(Shutdown::Both);
        }
    };

    let (mut session, outbound) = match dispatcher.connect(&handshake) {
        Ok(opened) => opened,
        Err(e) => {
            info!(?peer, error = %e.message(), "Connection refused");
            let refusal = EventFrame::outbound(
                "error",
                json!({ "code": e.code().unwrap_or(500), "message": e.message() }),
            );
            let _ = write_frame(&mut control, &refusal);
            return control.shutdown(Shutdown::Both);
        }
    };

    let mut writer = stream;
    may::go!(move || {
        while let Some(frame) = outbound.recv() {
            if let Err(e) = write_frame(&mut writer, &frame) {
                debug!(error = %e, "Event write failed");
                break;
            }
        }
    });

    loop {
        match read_frame(&mut reader, MAX_FRAME_BYTES) {
            Ok(Inbound::Frame(bytes)) => {
                if let Some(frame) = decode_frame(&bytes) {
                    session.handle(&frame);
                }
            }
            Ok(Inbound::Oversized) => {
                debug!(connection = %session.connection().id(), "Oversized event frame dropped");
            }
            Ok(Inbound::Eof) => break,
            Err(e) => {
                debug!(error = %e, "Event read failed");
                break;
            }
        }
    }

    session.disconnect();
    let _ = control.shutdown(Shutdown::Both);
    Ok(())
}
