//! Serve command implementation

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use cfaflash_core::transport::{CancelToken, RegisterDevice};
use cfaflash_device::tcp;

/// Interval between accept attempts while idle
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout on a connected client, bounding how late a cancel is seen
const CLIENT_POLL: Duration = Duration::from_millis(200);

/// Expose `device` as a TCP register bridge on `listen`
///
/// Clients are served one at a time and share the device; a client
/// ending its connection does not close it. Returns after `connections`
/// clients (if given) or once `cancel` fires. The device is closed exactly
/// once on the way out, also when the listener cannot be set up.
pub fn cmd_serve<D: RegisterDevice>(
    mut device: D,
    listen: &str,
    connections: Option<usize>,
    cancel: CancelToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let served = bind(listen)
        .and_then(|listener| accept_loop(&listener, &mut device, connections, &cancel));
    let closed = device.close();
    let served = served?;
    closed?;
    log::info!("Register bridge served {} client(s)", served);
    Ok(())
}

fn bind(listen: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(listen)?;
    listener.set_nonblocking(true)?;
    log::info!("Register bridge listening on {}", listener.local_addr()?);
    Ok(listener)
}

fn accept_loop<D: RegisterDevice>(
    listener: &TcpListener,
    device: &mut D,
    connections: Option<usize>,
    cancel: &CancelToken,
) -> std::io::Result<usize> {
    let mut served = 0;
    while connections.map_or(true, |max| served < max) {
        if cancel.is_cancelled() {
            log::info!("Register bridge stopped");
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("Client {} connected", peer);
                if let Err(e) = serve_client(stream, device, cancel) {
                    log::warn!("Client {}: {}", peer, e);
                }
                log::info!("Client {} disconnected", peer);
                served += 1;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => return Err(e),
        }
    }
    Ok(served)
}

fn serve_client<D: RegisterDevice>(
    mut stream: TcpStream,
    device: &mut D,
    cancel: &CancelToken,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(CLIENT_POLL))?;
    tcp::serve_until(&mut stream, device, || cancel.is_cancelled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfaflash_core::transport::{RegisterAccess, RegisterWidth};
    use cfaflash_core::Result;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::thread;

    const ID_REGISTER: u32 = 0x10;

    /// Register file counting how often it is closed
    #[derive(Default)]
    struct Board {
        values: HashMap<u32, u32>,
        closes: usize,
    }

    impl Board {
        fn new() -> Self {
            let mut board = Self::default();
            board.values.insert(ID_REGISTER, 0x1234);
            board
        }
    }

    impl RegisterAccess for Board {
        fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
            Ok(self.values.get(&address).copied().unwrap_or(0) & width.mask())
        }

        fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
            self.values.insert(address, value & width.mask());
            Ok(())
        }
    }

    impl RegisterDevice for Board {
        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let port = listener.local_addr().expect("addr").port();
        (listener, port)
    }

    /// Connect, read the id register, then end the connection
    fn client(port: u16) -> thread::JoinHandle<u32> {
        thread::spawn(move || {
            let mut bridge = tcp::TcpBridge::connect("127.0.0.1", port).expect("connect");
            let value = bridge
                .read_register(ID_REGISTER, RegisterWidth::W32)
                .expect("read");
            bridge.close().expect("close");
            value
        })
    }

    #[test]
    fn test_accept_loop_serves_one_client() {
        let mut board = Board::new();
        let (listener, port) = listener();

        let client = client(port);
        let served = accept_loop(&listener, &mut board, Some(1), &CancelToken::new())
            .expect("serve");

        assert_eq!(served, 1);
        assert_eq!(client.join().expect("client"), 0x1234);
        assert_eq!(board.closes, 0);
    }

    #[test]
    fn test_clients_share_device_closed_once() {
        let (listener, port) = listener();
        drop(listener);
        let listen = format!("127.0.0.1:{}", port);

        let clients = thread::spawn(move || {
            let mut values = Vec::new();
            for _ in 0..2 {
                // Wait for the bridge to bind before connecting
                let value = (0..100)
                    .find_map(|_| {
                        let mut bridge = tcp::TcpBridge::connect("127.0.0.1", port)
                            .map_err(|_| thread::sleep(Duration::from_millis(20)))
                            .ok()?;
                        let value = bridge.read_register(ID_REGISTER, RegisterWidth::W32).ok();
                        bridge.close().expect("close");
                        value
                    })
                    .expect("bridge");
                values.push(value);
            }
            values
        });

        let mut board = Board::new();
        cmd_serve(&mut board, &listen, Some(2), CancelToken::new()).expect("serve");

        assert_eq!(clients.join().expect("clients"), [0x1234, 0x1234]);
        assert_eq!(board.closes, 1);
    }

    #[test]
    fn test_bind_failure_closes_device() {
        let mut board = Board::new();
        let result = cmd_serve(&mut board, "127.0.0.1:not-a-port", None, CancelToken::new());
        assert!(result.is_err());
        assert_eq!(board.closes, 1);
    }

    #[test]
    fn test_accept_loop_stops_when_cancelled() {
        let mut board = Board::new();
        let (listener, _) = listener();

        let cancel = CancelToken::new();
        cancel.cancel();
        let served = accept_loop(&listener, &mut board, None, &cancel).expect("serve");
        assert_eq!(served, 0);
    }

    #[test]
    fn test_cancel_ends_idle_connection() {
        let mut board = Board::new();
        let (listener, port) = listener();
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let client_cancel = cancel.clone();
        let client = thread::spawn(move || {
            let mut bridge = tcp::TcpBridge::connect("127.0.0.1", port).expect("connect");
            let value = bridge
                .read_register(ID_REGISTER, RegisterWidth::W32)
                .expect("read");
            client_cancel.cancel();
            // Stay connected until the bridge has returned
            let _ = done_rx.recv();
            value
        });

        let served = accept_loop(&listener, &mut board, None, &cancel).expect("serve");
        done_tx.send(()).expect("client waiting");

        assert_eq!(served, 1);
        assert_eq!(client.join().expect("client"), 0x1234);
    }
}
