use std::{
    net::{
        SocketAddr,
        UdpSocket,
    },
    time::Duration,
};

use etherbone::RetryPolicy;

// The ctrl_scratch CSR of a stock LiteX SoC
const SCRATCH: u32 = 0xe000_0004;

fn main() -> anyhow::Result<()> {
    // Setup the socket
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    // Set a default timeout
    let timeout = Duration::from_secs_f32(0.5);
    socket.set_write_timeout(Some(timeout))?;
    socket.set_read_timeout(Some(timeout))?;
    // Connect
    let host_addr: SocketAddr = "192.168.0.50:1234".parse()?;
    socket.connect(host_addr)?;
    let policy = RetryPolicy::default();
    etherbone::write_words(SCRATCH, &[0xdead_beef], &socket, policy)?;
    let readback = etherbone::read_words(&[SCRATCH], &socket, policy)?;
    println!("Value at {SCRATCH:08x}: {:08x}", readback[0]);
    Ok(())
}
