use std::net::UdpSocket;

/// Finds an even `(port, port + 1)` pair that's free to bind, mirroring the
/// control/data port convention (§4.1). The base port must be even since
/// `Session::send_to`'s channel-selection logic assumes it.
pub fn find_consecutive_ports() -> (u16, u16) {
    loop {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        if port % 2 != 0 {
            continue;
        }
        let next_port = port + 1;
        if let Ok(socket2) = UdpSocket::bind(("127.0.0.1", next_port)) {
            drop(socket);
            drop(socket2);
            return (port, next_port);
        }
    }
}
