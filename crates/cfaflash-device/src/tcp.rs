//! Register bridge over TCP
//!
//! A bridge exposes the registers of a board on a TCP port. Every request
//! starts with a 10-byte header, all integers little-endian:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | command |
//! | 1 | register width in bits (16 or 32) |
//! | 2 | register address (u32) |
//! | 6 | value (single access) or count (repeated access) |
//!
//! A repeated write is followed by `count` u32 values. Every response
//! starts with a status byte ([`STATUS_OK`] or [`STATUS_FAILED`]); reads
//! follow it with their u32 values. A repeated access carries at most
//! [`MAX_REPEATED_WORDS`] values; the client splits longer transfers.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use cfaflash_core::error::{Error, Result};
use cfaflash_core::transport::{RegisterAccess, RegisterDevice, RegisterWidth};

use crate::error::DeviceError;

/// Default bridge port
pub const DEFAULT_PORT: u16 = 5025;

/// Read one register
pub const CMD_READ: u8 = b'R';
/// Write one register
pub const CMD_WRITE: u8 = b'W';
/// Read one register `count` times
pub const CMD_READ_REPEATED: u8 = b'r';
/// Write `count` values to one register
pub const CMD_WRITE_REPEATED: u8 = b'w';
/// End the connection; the board stays open on the serving side
pub const CMD_CLOSE: u8 = b'Q';

/// Largest `count` accepted in one repeated access (four 1056-byte pages)
pub const MAX_REPEATED_WORDS: usize = 4 * 1056;

/// Request succeeded
pub const STATUS_OK: u8 = 0x00;
/// Request failed on the board side
pub const STATUS_FAILED: u8 = 0x01;

const HEADER_LEN: usize = 10;
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn header(command: u8, width: RegisterWidth, address: u32, arg: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0] = command;
    buf[1] = width.bits() as u8;
    buf[2..6].copy_from_slice(&address.to_le_bytes());
    buf[6..10].copy_from_slice(&arg.to_le_bytes());
    buf
}

/// Client side of a register bridge
pub struct TcpBridge {
    stream: TcpStream,
}

impl TcpBridge {
    /// Connect to a bridge at the specified host and port
    pub fn connect(host: &str, port: u16) -> std::result::Result<Self, DeviceError> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to register bridge at {}", addr);

        let stream =
            TcpStream::connect(&addr).map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;

        // Every access is a round trip; don't let Nagle batch them
        stream.set_nodelay(true).map_err(|e| {
            DeviceError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        log::info!("Connected to register bridge at {}", addr);
        Ok(Self { stream })
    }

    /// Send a request and read the status byte plus `values.len()` words
    fn request(&mut self, request: &[u8], values: &mut [u32]) -> io::Result<u8> {
        self.stream.write_all(request)?;
        let mut status = [0u8; 1];
        self.stream.read_exact(&mut status)?;
        if status[0] != STATUS_OK {
            return Ok(status[0]);
        }
        let mut word = [0u8; 4];
        for value in values.iter_mut() {
            self.stream.read_exact(&mut word)?;
            *value = u32::from_le_bytes(word);
        }
        Ok(STATUS_OK)
    }

    fn exchange(&mut self, request: &[u8], values: &mut [u32], address: u32, write: bool) -> Result<()> {
        match self.request(request, values) {
            Ok(STATUS_OK) => Ok(()),
            Ok(status) => {
                log::error!(
                    "Bridge rejected {} of register 0x{:X} (status 0x{:02X})",
                    if write { "write" } else { "read" },
                    address,
                    status
                );
                Err(Error::RegisterIo { address, write })
            }
            Err(e) => {
                log::error!("Bridge I/O error at register 0x{:X}: {}", address, e);
                Err(Error::RegisterIo { address, write })
            }
        }
    }
}

impl RegisterAccess for TcpBridge {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        let mut value = [0u32; 1];
        self.exchange(&header(CMD_READ, width, address, 0), &mut value, address, false)?;
        Ok(value[0])
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        self.exchange(&header(CMD_WRITE, width, address, value), &mut [], address, true)
    }

    fn read_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &mut [u32],
    ) -> Result<()> {
        for chunk in values.chunks_mut(MAX_REPEATED_WORDS) {
            let request = header(CMD_READ_REPEATED, width, address, chunk.len() as u32);
            self.exchange(&request, chunk, address, false)?;
        }
        Ok(())
    }

    fn write_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &[u32],
    ) -> Result<()> {
        for chunk in values.chunks(MAX_REPEATED_WORDS) {
            let mut request = Vec::with_capacity(HEADER_LEN + chunk.len() * 4);
            request.extend_from_slice(&header(CMD_WRITE_REPEATED, width, address, chunk.len() as u32));
            for value in chunk {
                request.extend_from_slice(&value.to_le_bytes());
            }
            self.exchange(&request, &mut [], address, true)?;
        }
        Ok(())
    }
}

impl RegisterDevice for TcpBridge {
    fn close(&mut self) -> Result<()> {
        let request = header(CMD_CLOSE, RegisterWidth::W32, 0, 0);
        let status = self.request(&request, &mut []).map_err(|e| {
            log::error!("Bridge I/O error on close: {}", e);
            Error::DeviceClose
        })?;
        if status != STATUS_OK {
            return Err(Error::DeviceClose);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }
}

/// Serve one bridge connection from a local device
///
/// Runs until the client sends [`CMD_CLOSE`] or disconnects. Register
/// failures are reported to the client; transport failures end the
/// connection. The device is never closed here: it outlives the
/// connection and belongs to whoever called `serve`.
pub fn serve<S: Read + Write, D: RegisterDevice + ?Sized>(
    stream: &mut S,
    device: &mut D,
) -> io::Result<()> {
    serve_until(stream, device, || false)
}

/// Like [`serve`], but also returns once `stop` reports true
///
/// `stop` is polled whenever a read on `stream` times out, so the stream
/// needs a read timeout for it to be checked while the client is idle.
pub fn serve_until<S, D, F>(stream: &mut S, device: &mut D, stop: F) -> io::Result<()>
where
    S: Read + Write,
    D: RegisterDevice + ?Sized,
    F: Fn() -> bool,
{
    let mut head = [0u8; HEADER_LEN];
    let mut payload = Vec::new();
    loop {
        if !read_full(stream, &mut head, &stop)? {
            return Ok(());
        }
        let command = head[0];
        let address = u32::from_le_bytes([head[2], head[3], head[4], head[5]]);
        let arg = u32::from_le_bytes([head[6], head[7], head[8], head[9]]);
        let count = arg as usize;
        let Ok(width) = RegisterWidth::from_bits(head[1] as u32) else {
            stream.write_all(&[STATUS_FAILED])?;
            continue;
        };

        let repeated = matches!(command, CMD_READ_REPEATED | CMD_WRITE_REPEATED);
        if repeated && count > MAX_REPEATED_WORDS {
            log::warn!(
                "Bridge: repeated access of {} words at 0x{:X} exceeds {}",
                count,
                address,
                MAX_REPEATED_WORDS
            );
            stream.write_all(&[STATUS_FAILED])?;
            if command == CMD_WRITE_REPEATED {
                // The oversized payload cannot be skipped reliably
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("repeated write of {} words", count),
                ));
            }
            continue;
        }

        let result = match command {
            CMD_READ => device.read_register(address, width).map(|v| vec![v]),
            CMD_WRITE => device.write_register(address, width, arg).map(|()| Vec::new()),
            CMD_READ_REPEATED => {
                let mut values = vec![0u32; count];
                device
                    .read_register_repeated(address, width, &mut values)
                    .map(|()| values)
            }
            CMD_WRITE_REPEATED => {
                payload.resize(count * 4, 0);
                if !read_full(stream, &mut payload, &stop)? {
                    return Ok(());
                }
                let values: Vec<u32> = payload
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect();
                device
                    .write_register_repeated(address, width, &values)
                    .map(|()| Vec::new())
            }
            CMD_CLOSE => {
                stream.write_all(&[STATUS_OK])?;
                return Ok(());
            }
            other => {
                log::warn!("Bridge: unknown command 0x{:02X}", other);
                Err(Error::RegisterIo {
                    address,
                    write: false,
                })
            }
        };

        let mut reply = Vec::new();
        match result {
            Ok(values) => {
                reply.push(STATUS_OK);
                for value in values {
                    reply.extend_from_slice(&value.to_le_bytes());
                }
            }
            Err(e) => {
                log::debug!("Bridge: {}", e);
                reply.push(STATUS_FAILED);
            }
        }
        stream.write_all(&reply)?;
    }
}

/// Fill `buf` from `stream`, polling `stop` on read timeouts
///
/// Returns `Ok(false)` when the client disconnected before sending the
/// first byte or when `stop` fired.
fn read_full<S: Read, F: Fn() -> bool>(stream: &mut S, buf: &mut [u8], stop: &F) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if stop() {
                    return Ok(false);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Register file that fails on one address and records its close
    #[derive(Default)]
    struct Registers {
        values: std::collections::HashMap<u32, u32>,
        closed: bool,
    }

    const BAD_ADDRESS: u32 = 0xDEAD;

    impl RegisterAccess for Registers {
        fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
            if address == BAD_ADDRESS {
                return Err(Error::RegisterIo {
                    address,
                    write: false,
                });
            }
            Ok(self.values.get(&address).copied().unwrap_or(0) & width.mask())
        }

        fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
            self.values.insert(address, value & width.mask());
            Ok(())
        }
    }

    impl RegisterDevice for Registers {
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn spawn_bridge() -> (u16, thread::JoinHandle<Registers>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut registers = Registers::default();
            registers.values.insert(0x10, 0x1234_5678);
            serve(&mut stream, &mut registers).unwrap();
            registers
        });
        (port, handle)
    }

    #[test]
    fn test_single_accesses() {
        let (port, server) = spawn_bridge();
        let mut bridge = TcpBridge::connect("127.0.0.1", port).unwrap();

        assert_eq!(bridge.read_register(0x10, RegisterWidth::W32).unwrap(), 0x1234_5678);
        assert_eq!(bridge.read_register(0x10, RegisterWidth::W16).unwrap(), 0x5678);
        bridge.write_register(0x20, RegisterWidth::W32, 99).unwrap();
        assert_eq!(bridge.read_register(0x20, RegisterWidth::W32).unwrap(), 99);
        bridge.close().unwrap();

        let registers = server.join().unwrap();
        // Closing the connection leaves the served device open
        assert!(!registers.closed);
        assert_eq!(registers.values.get(&0x20), Some(&99));
    }

    #[test]
    fn test_long_transfers_are_split() {
        let (port, server) = spawn_bridge();
        let mut bridge = TcpBridge::connect("127.0.0.1", port).unwrap();

        let values: Vec<u32> = (0..MAX_REPEATED_WORDS as u32 + 10).collect();
        bridge
            .write_register_repeated(0x30, RegisterWidth::W32, &values)
            .unwrap();
        let mut read_back = vec![0u32; MAX_REPEATED_WORDS + 1];
        bridge
            .read_register_repeated(0x30, RegisterWidth::W32, &mut read_back)
            .unwrap();
        assert!(read_back.iter().all(|&v| v == MAX_REPEATED_WORDS as u32 + 9));
        bridge.close().unwrap();
        server.join().unwrap();
    }

    /// In-memory connection replaying `input` and recording the replies
    struct Pipe {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
        /// Time out instead of reporting EOF once `input` is drained
        idle: bool,
    }

    impl Pipe {
        fn new(requests: &[[u8; HEADER_LEN]]) -> Self {
            Self {
                input: io::Cursor::new(requests.concat()),
                output: Vec::new(),
                idle: false,
            }
        }
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.input.read(buf)?;
            if n == 0 && self.idle {
                return Err(ErrorKind::TimedOut.into());
            }
            Ok(n)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_oversized_repeated_read_is_rejected() {
        let mut pipe = Pipe::new(&[
            header(CMD_READ_REPEATED, RegisterWidth::W32, 0x10, u32::MAX),
            header(CMD_READ, RegisterWidth::W32, 0x10, 0),
        ]);
        let mut registers = Registers::default();
        registers.values.insert(0x10, 7);

        serve(&mut pipe, &mut registers).unwrap();

        // Rejected without touching the device; the connection stays usable
        assert_eq!(pipe.output, [STATUS_FAILED, STATUS_OK, 7, 0, 0, 0]);
    }

    #[test]
    fn test_oversized_repeated_write_ends_connection() {
        let mut pipe = Pipe::new(&[
            header(CMD_WRITE_REPEATED, RegisterWidth::W32, 0x10, u32::MAX),
            header(CMD_WRITE, RegisterWidth::W32, 0x20, 1),
        ]);
        let mut registers = Registers::default();

        let err = serve(&mut pipe, &mut registers).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(pipe.output, [STATUS_FAILED]);
        assert!(registers.values.is_empty());
        assert!(!registers.closed);
    }

    #[test]
    fn test_idle_connection_stops_on_request() {
        let mut pipe = Pipe::new(&[header(CMD_WRITE, RegisterWidth::W32, 0x20, 5)]);
        pipe.idle = true;
        let mut registers = Registers::default();
        let polls = std::cell::Cell::new(0);

        serve_until(&mut pipe, &mut registers, || {
            polls.set(polls.get() + 1);
            polls.get() == 3
        })
        .unwrap();

        assert_eq!(polls.get(), 3);
        assert_eq!(pipe.output, [STATUS_OK]);
        assert_eq!(registers.values.get(&0x20), Some(&5));
    }

    #[test]
    fn test_repeated_accesses() {
        let (port, server) = spawn_bridge();
        let mut bridge = TcpBridge::connect("127.0.0.1", port).unwrap();

        bridge
            .write_register_repeated(0x30, RegisterWidth::W32, &[1, 2, 3])
            .unwrap();
        let mut values = [0u32; 4];
        bridge
            .read_register_repeated(0x30, RegisterWidth::W32, &mut values)
            .unwrap();
        assert_eq!(values, [3, 3, 3, 3]);
        bridge.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_register_failure_is_reported() {
        let (port, server) = spawn_bridge();
        let mut bridge = TcpBridge::connect("127.0.0.1", port).unwrap();

        assert_eq!(
            bridge.read_register(BAD_ADDRESS, RegisterWidth::W32),
            Err(Error::RegisterIo {
                address: BAD_ADDRESS,
                write: false
            })
        );
        // The connection survives a failed access
        assert_eq!(bridge.read_register(0x10, RegisterWidth::W32).unwrap(), 0x1234_5678);
        bridge.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(matches!(
            TcpBridge::connect("127.0.0.1", port),
            Err(DeviceError::ConnectionFailed(_))
        ));
    }
}
