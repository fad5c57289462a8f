//! Write to an RS232 Bricklet 2.0 with RX wired to TX and print what comes back.
//!
//! Run with: `cargo run --example loopback -- <UID> [host] [port]`

use std::io;
use std::time::Duration;

use tfwire::ipcon::{ConnectionConfig, IpConnection, Rs232V2Bricklet};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let uid = args.next().unwrap_or_else(|| "XYZ".to_string());
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(4223);

    let ipcon = IpConnection::new(
        ConnectionConfig::new(host, port).with_response_timeout(Duration::from_secs(1)),
    );
    let rs232 = Rs232V2Bricklet::new(&uid, &ipcon)?;
    ipcon.connect()?;

    rs232.add_read_listener(|message| match message {
        Some(bytes) => println!(
            "Message (Length: {}) {}",
            bytes.len(),
            String::from_utf8_lossy(&bytes)
        ),
        None => println!("Stream was out of sync."),
    });
    rs232.enable_read_callback()?;

    let written = rs232.write(b"test")?;
    println!("Wrote {written} bytes. Press enter to exit.");

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    ipcon.disconnect();
    Ok(())
}
