//! Heuristic response collection.
//!
//! The device replies without any length field or terminator, so a message is
//! considered complete as soon as the line goes quiet after data was seen.
//! A reply that trickles in slower than the poll interval will be cut short.

use crate::port::Port;
use log::trace;
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

/// Default poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `port` for up to `timeout` and return whatever arrived.
///
/// Returns early once data has been received and a subsequent poll finds the
/// input buffer empty. Transport errors end collection and keep the bytes
/// gathered so far.
pub fn collect_response<P: Port + ?Sized>(
    port: &mut P,
    timeout: Duration,
    poll: Duration,
) -> Vec<u8> {
    let start = Instant::now();
    let mut response = Vec::new();

    while start.elapsed() < timeout {
        let available = match port.bytes_to_read() {
            Ok(n) => n,
            Err(e) => {
                trace!("Input query failed, treating as silence: {e}");
                break;
            },
        };

        if available > 0 {
            let mut buf = vec![0u8; available];
            match port.read(&mut buf) {
                Ok(n) => {
                    trace!("Received {n} bytes");
                    response.extend_from_slice(&buf[..n]);
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) => {
                    trace!("Read error, treating as silence: {e}");
                    break;
                },
            }
            thread::sleep(poll);
        } else if !response.is_empty() {
            break;
        }
        thread::sleep(poll);
    }

    response
}

/// Lowercase hex rendering used for diagnostics.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    #[test]
    fn test_returns_pending_bytes() {
        let reply = [0xAA, 0x55, 0x00, 0x55, 0xAA];
        let mut port = MockPort::with_input(&reply);

        let got = collect_response(&mut port, Duration::from_millis(500), POLL_INTERVAL);
        assert_eq!(got, reply);
    }

    #[test]
    fn test_timeout_equal_to_poll_interval_still_collects() {
        let mut port = MockPort::with_input(b"ok");
        let got = collect_response(&mut port, POLL_INTERVAL, POLL_INTERVAL);
        assert_eq!(got, b"ok");
    }

    #[test]
    fn test_quiet_line_returns_early() {
        let mut port = MockPort::with_input(&[1, 2, 3]);
        let start = Instant::now();

        let got = collect_response(&mut port, Duration::from_secs(5), POLL_INTERVAL);
        assert_eq!(got, vec![1, 2, 3]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_silent_line_waits_full_timeout() {
        let mut port = MockPort::new();
        let timeout = Duration::from_millis(80);
        let start = Instant::now();

        let got = collect_response(&mut port, timeout, POLL_INTERVAL);
        let elapsed = start.elapsed();

        assert!(got.is_empty());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xAA, 0x55, 0x0F]), "aa550f");
        assert_eq!(to_hex(&[]), "");
    }
}
