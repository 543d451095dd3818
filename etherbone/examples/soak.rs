//! Hammers one address with random write/readback pairs to shake out
//! transport problems.

use std::{
    net::{
        SocketAddr,
        UdpSocket,
    },
    time::Duration,
};

use anyhow::bail;
use etherbone::RetryPolicy;
use rand::prelude::*;

// A word of main RAM well clear of anything the SoC itself touches
const TEST_ADDR: u32 = 0x1000_2000;
const LOOPS: u32 = 10_000;

fn main() -> anyhow::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let timeout = Duration::from_secs_f32(0.5);
    socket.set_write_timeout(Some(timeout))?;
    socket.set_read_timeout(Some(timeout))?;
    let host_addr: SocketAddr = "192.168.0.50:1234".parse()?;
    socket.connect(host_addr)?;
    let policy = RetryPolicy::default();
    println!("writing random values to {TEST_ADDR:08x}");
    for loop_counter in 0..LOOPS {
        let val = random::<u32>();
        etherbone::write_words(TEST_ADDR, &[val], &socket, policy)?;
        let cmp = etherbone::read_words(&[TEST_ADDR], &socket, policy)?[0];
        if cmp != val {
            bail!("loop {loop_counter}: expected {val:08x}, got {cmp:08x}");
        }
        if loop_counter % 1000 == 0 {
            println!("loop: {loop_counter} ({val:08x})");
        }
    }
    println!("no errors encountered");
    Ok(())
}
