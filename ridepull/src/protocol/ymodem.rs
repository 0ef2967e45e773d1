//! YMODEM receiver.
//!
//! Many data loggers export their recordings over YMODEM-1K: the host polls
//! with 'C', the logger answers with a header block naming the file, streams
//! 1024-byte (STX) or 128-byte (SOH) blocks, and closes with EOT followed by
//! an empty header block.
//!
//! ```text
//! Block format:
//! +-----+-----+------+---------------+--------+
//! | STX | SEQ | ~SEQ | DATA (1024)   | CRC16  |
//! +-----+-----+------+---------------+--------+
//! | 1   | 1   | 1    | 1024 (or 128) | 2      |
//! +-----+-----+------+---------------+--------+
//! ```
//!
//! Every received packet is one protocol step; the progress callback is
//! consulted before each one so a cancellation request is honored within a
//! single port timeout.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Padding byte used by senders that do not announce a size.
    pub const SUB: u8 = 0x1A;
}

/// Block size for SOH packets.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Block size for STX packets (YMODEM-1K).
pub const STX_BLOCK_SIZE: usize = 1024;

/// Upper bound on bytes discarded while waiting for a quiet line.
const MAX_PURGE: usize = 8 * (3 + STX_BLOCK_SIZE + 2);

/// YMODEM receiver configuration.
#[derive(Debug, Clone)]
pub struct YmodemConfig {
    /// How long to keep polling with 'C' for the sender's header block.
    pub start_timeout: Duration,
    /// Consecutive bad or missing packets tolerated before giving up.
    pub max_retries: u32,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(60),
            max_retries: 10,
        }
    }
}

/// File announced by the sender in block 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// File name as sent (may contain a path).
    pub name: String,
    /// Declared size in bytes, if the sender provided one.
    pub size: Option<u64>,
}

impl FileHeader {
    /// Parse block 0 payload: `name\0size[ mtime ...]\0`.
    ///
    /// Returns `None` for the empty header that ends a batch.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let name_end = data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(data.len());
        if name_end == 0 {
            return None;
        }
        let name = String::from_utf8_lossy(&data[..name_end]).into_owned();

        let size = data
            .get(name_end + 1..)
            .and_then(|rest| {
                let field = rest
                    .split(|&b| b == 0 || b == b' ')
                    .next()?;
                std::str::from_utf8(field)
                    .ok()?
                    .parse()
                    .ok()
            });

        Some(Self { name, size })
    }
}

/// A packet as seen on the wire.
#[derive(Debug)]
enum Packet {
    Block { seq: u8, data: Vec<u8> },
    Eot,
    Cancel,
    Corrupt,
}

/// YMODEM receive handler.
pub struct YmodemReceiver<'a, P: Read + Write + ?Sized> {
    port: &'a mut P,
    config: YmodemConfig,
}

impl<'a, P: Read + Write + ?Sized> YmodemReceiver<'a, P> {
    /// Create a new receiver with default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: YmodemConfig::default(),
        }
    }

    /// Create a new receiver with custom configuration.
    pub fn with_config(port: &'a mut P, config: YmodemConfig) -> Self {
        Self { port, config }
    }

    /// Receive one file into `sink`.
    ///
    /// `progress` is called with `(bytes_received, declared_size)` before
    /// every protocol step; returning `false` cancels the transfer, notifies
    /// the sender and yields [`Error::Canceled`].
    pub fn receive<W: Write>(
        &mut self,
        sink: &mut W,
        progress: &mut dyn FnMut(u64, Option<u64>) -> bool,
    ) -> Result<FileHeader> {
        let header = self.wait_for_header(progress)?;
        debug!(
            "Receiving {} ({} bytes)",
            header.name,
            header
                .size
                .map_or_else(|| "unknown".to_string(), |s| s.to_string())
        );

        // Ask for the data blocks.
        self.send(control::C)?;

        let mut expected: u8 = 1;
        let mut received: u64 = 0;
        let mut errors = 0;
        // Without a declared size the last block's padding is only known at EOT.
        let mut pending: Option<Vec<u8>> = None;

        loop {
            if !progress(received, header.size) {
                self.abort()?;
                return Err(Error::Canceled);
            }

            match self.read_packet()? {
                Some(Packet::Block { seq, data }) if seq == expected => {
                    let data = match header.size {
                        Some(size) => {
                            let remaining = size.saturating_sub(received);
                            let take = usize::try_from(remaining)
                                .unwrap_or(usize::MAX)
                                .min(data.len());
                            sink.write_all(&data[..take])?;
                            received += take as u64;
                            None
                        },
                        None => {
                            if let Some(prev) = pending.take() {
                                sink.write_all(&prev)?;
                            }
                            received += data.len() as u64;
                            Some(data)
                        },
                    };
                    pending = data;
                    trace!("Block {seq} ACKed ({received} bytes)");
                    self.send(control::ACK)?;
                    expected = expected.wrapping_add(1);
                    errors = 0;
                },
                Some(Packet::Block { seq, .. }) if seq == expected.wrapping_sub(1) => {
                    debug!("Duplicate block {seq}, re-ACKing");
                    self.send(control::ACK)?;
                },
                Some(Packet::Block { seq, .. }) => {
                    self.abort()?;
                    return Err(Error::Ymodem(format!(
                        "Block sequence mismatch: expected {expected}, got {seq}"
                    )));
                },
                Some(Packet::Eot) => {
                    if let Some(size) = header.size.filter(|&size| received < size) {
                        self.abort()?;
                        return Err(Error::Ymodem(format!(
                            "Sender ended at {received} of {size} bytes"
                        )));
                    }
                    self.send(control::ACK)?;
                    break;
                },
                Some(Packet::Cancel) => {
                    return Err(Error::Ymodem("Transfer cancelled by sender".into()));
                },
                Some(Packet::Corrupt) | None => {
                    errors += 1;
                    if errors > self.config.max_retries {
                        self.abort()?;
                        return Err(Error::Ymodem(format!(
                            "Giving up after {} consecutive errors",
                            self.config.max_retries
                        )));
                    }
                    debug!("Bad or missing block, sending NAK ({errors})");
                    self.purge()?;
                    self.send(control::NAK)?;
                },
            }
        }

        if let Some(mut last) = pending {
            while last.last() == Some(&control::SUB) {
                last.pop();
            }
            sink.write_all(&last)?;
        }
        sink.flush()?;

        self.finish_batch()?;
        debug!("YMODEM receive complete");
        Ok(header)
    }

    /// Poll with 'C' until the sender's header block arrives.
    fn wait_for_header(
        &mut self,
        progress: &mut dyn FnMut(u64, Option<u64>) -> bool,
    ) -> Result<FileHeader> {
        debug!("Polling for YMODEM sender...");
        let start = Instant::now();

        while start.elapsed() < self.config.start_timeout {
            if !progress(0, None) {
                self.abort()?;
                return Err(Error::Canceled);
            }

            self.send(control::C)?;
            match self.read_packet()? {
                Some(Packet::Block { seq: 0, data }) => {
                    self.send(control::ACK)?;
                    return FileHeader::parse(&data)
                        .ok_or_else(|| Error::Ymodem("Sender has no file to send".into()));
                },
                Some(Packet::Cancel) => {
                    return Err(Error::Ymodem("Transfer cancelled by sender".into()));
                },
                Some(other) => {
                    trace!("Ignoring {other:?} while waiting for header");
                    self.purge()?;
                },
                None => {},
            }
        }

        Err(Error::Timeout(format!(
            "No YMODEM sender responded within {} seconds",
            self.config.start_timeout.as_secs()
        )))
    }

    /// Acknowledge the empty header block that closes the batch.
    fn finish_batch(&mut self) -> Result<()> {
        self.send(control::C)?;
        match self.read_packet()? {
            Some(Packet::Block { seq: 0, .. }) => {
                self.send(control::ACK)?;
            },
            other => {
                // Some senders stop after EOT; the file is complete either way.
                trace!("No closing header block ({other:?})");
            },
        }
        Ok(())
    }

    /// Tell the sender to stop.
    fn abort(&mut self) -> Result<()> {
        debug!("Sending CAN to sender");
        self.port
            .write_all(&[control::CAN, control::CAN])?;
        self.port.flush()?;
        Ok(())
    }

    /// Discard input until the line has been quiet for one port timeout, so
    /// the rest of a damaged packet is not parsed as new packets.
    fn purge(&mut self) -> Result<()> {
        let mut buf = [0u8; STX_BLOCK_SIZE];
        let mut discarded = 0;
        while discarded < MAX_PURGE {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if discarded > 0 {
            trace!("Discarded {discarded} bytes of line noise");
        }
        Ok(())
    }

    fn send(&mut self, byte: u8) -> Result<()> {
        self.port.write_all(&[byte])?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one packet. `None` means nothing arrived within the port timeout.
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut first = [0u8; 1];
        if !self.read_exact_or_timeout(&mut first)? {
            return Ok(None);
        }

        let block_size = match first[0] {
            control::SOH => SOH_BLOCK_SIZE,
            control::STX => STX_BLOCK_SIZE,
            control::EOT => return Ok(Some(Packet::Eot)),
            control::CAN => return Ok(Some(Packet::Cancel)),
            other => {
                trace!("Unexpected byte: 0x{other:02X}");
                return Ok(Some(Packet::Corrupt));
            },
        };

        // seq, ~seq, payload, crc
        let mut rest = vec![0u8; 2 + block_size + 2];
        if !self.read_exact_or_timeout(&mut rest)? {
            return Ok(Some(Packet::Corrupt));
        }

        let (seq, seq_inv) = (rest[0], rest[1]);
        let data = &rest[2..2 + block_size];
        let crc = BigEndian::read_u16(&rest[2 + block_size..]);

        if seq != !seq_inv {
            debug!("Sequence complement mismatch: {seq:02X}/{seq_inv:02X}");
            return Ok(Some(Packet::Corrupt));
        }
        if crc16_xmodem(data) != crc {
            debug!("CRC mismatch on block {seq}");
            return Ok(Some(Packet::Corrupt));
        }

        Ok(Some(Packet::Block {
            seq,
            data: data.to_vec(),
        }))
    }

    /// Fill `buf`, returning `false` if the line went quiet first.
    fn read_exact_or_timeout(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    /// Build a sender-side block.
    fn build_block(seq: u8, data: &[u8], use_stx: bool) -> Vec<u8> {
        let block_size = if use_stx {
            STX_BLOCK_SIZE
        } else {
            SOH_BLOCK_SIZE
        };
        let header = if use_stx { control::STX } else { control::SOH };

        let mut block = Vec::with_capacity(3 + block_size + 2);
        block.push(header);
        block.push(seq);
        block.push(!seq);
        block.extend_from_slice(data);
        block.resize(3 + block_size, 0x00);

        let crc = crc16_xmodem(&block[3..3 + block_size]);
        block.extend_from_slice(&crc.to_be_bytes());
        block
    }

    fn header_block(name: &str, size: Option<usize>) -> Vec<u8> {
        let mut data = name.as_bytes().to_vec();
        data.push(0);
        if let Some(size) = size {
            data.extend_from_slice(size.to_string().as_bytes());
            data.push(0);
        }
        build_block(0, &data, false)
    }

    fn fast_config() -> YmodemConfig {
        YmodemConfig {
            start_timeout: Duration::from_millis(200),
            max_retries: 2,
        }
    }

    #[test]
    fn test_parse_header() {
        let header = FileHeader::parse(b"ride001.dat\x00512 14567123 0\x00").unwrap();
        assert_eq!(header.name, "ride001.dat");
        assert_eq!(header.size, Some(512));

        let no_size = FileHeader::parse(b"ride.raw\x00\x00").unwrap();
        assert_eq!(no_size.size, None);

        assert!(FileHeader::parse(&[0u8; 128]).is_none());
    }

    #[test]
    fn test_receive_single_block_truncates_to_declared_size() {
        let payload = vec![0x42; 100];
        let mut script = header_block("ride001.dat", Some(payload.len()));
        script.extend(build_block(1, &payload, true));
        script.push(control::EOT);
        script.extend(build_block(0, &[], false));

        let mut port = MockPort::new(&script);
        let mut sink = Vec::new();
        let header = YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |_, _| true)
            .unwrap();

        assert_eq!(header.name, "ride001.dat");
        assert_eq!(sink, payload);
        assert_eq!(port.write_buf.first(), Some(&control::C));
        assert_eq!(
            port.write_buf
                .iter()
                .filter(|&&b| b == control::ACK)
                .count(),
            4,
            "header, data, EOT and closing block are all ACKed"
        );
    }

    #[test]
    fn test_receive_early_eot_is_an_error() {
        let mut script = header_block("ride001.dat", Some(2 * STX_BLOCK_SIZE));
        script.extend(build_block(1, &[0x42; STX_BLOCK_SIZE], true));
        script.push(control::EOT);

        let mut port = MockPort::new(&script);
        let mut sink = Vec::new();
        let result = YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |_, _| true);

        match result {
            Err(Error::Ymodem(msg)) => assert!(msg.contains("1024 of 2048"), "{msg}"),
            other => panic!("expected a YMODEM error, got {other:?}"),
        }
        assert!(port.write_buf.ends_with(&[control::CAN, control::CAN]));
    }

    #[test]
    fn test_receive_multi_block_ignores_duplicates() {
        let first = vec![0xAA; STX_BLOCK_SIZE];
        let second = vec![0xBB; 10];
        let mut script = header_block("multi.bin", Some(STX_BLOCK_SIZE + 10));
        script.extend(build_block(1, &first, true));
        script.extend(build_block(1, &first, true));
        script.extend(build_block(2, &second, true));
        script.push(control::EOT);

        let mut port = MockPort::new(&script);
        let mut sink = Vec::new();
        let mut calls = Vec::new();
        YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |received, total| {
                calls.push((received, total));
                true
            })
            .unwrap();

        assert_eq!(sink.len(), STX_BLOCK_SIZE + 10);
        assert!(sink[..STX_BLOCK_SIZE].iter().all(|&b| b == 0xAA));
        assert!(sink[STX_BLOCK_SIZE..].iter().all(|&b| b == 0xBB));
        assert_eq!(calls.last(), Some(&(STX_BLOCK_SIZE as u64 + 10, Some(STX_BLOCK_SIZE as u64 + 10))));
    }

    #[test]
    fn test_receive_recovers_from_corrupt_block() {
        let payload = vec![0x11; 64];
        let mut corrupt = build_block(1, &payload, false);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut resend = build_block(1, &payload, false);
        resend.push(control::EOT);

        let mut port = MockPort::bursts(&[
            &[header_block("r.dat", Some(64)), corrupt].concat(),
            &resend,
        ]);
        let mut sink = Vec::new();
        YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |_, _| true)
            .unwrap();

        assert_eq!(sink, payload);
        assert_eq!(
            port.write_buf
                .iter()
                .filter(|&&b| b == control::NAK)
                .count(),
            1
        );
    }

    #[test]
    fn test_receive_discards_rest_of_mangled_block() {
        let first = vec![0x21; SOH_BLOCK_SIZE];
        let second = vec![0x22; SOH_BLOCK_SIZE];
        let mut mangled = build_block(1, &first, false);
        mangled[0] = 0xFF;

        let mut resend = build_block(1, &first, false);
        resend.extend(build_block(2, &second, false));
        resend.push(control::EOT);

        let mut port = MockPort::bursts(&[
            &[header_block("ride.dat", Some(2 * SOH_BLOCK_SIZE)), mangled].concat(),
            &resend,
        ]);
        let mut sink = Vec::new();
        YmodemReceiver::new(&mut port)
            .receive(&mut sink, &mut |_, _| true)
            .unwrap();

        assert_eq!(sink, [first, second].concat());
        assert_eq!(
            port.write_buf
                .iter()
                .filter(|&&b| b == control::NAK)
                .count(),
            1
        );
    }

    #[test]
    fn test_receive_without_size_strips_padding() {
        let mut script = header_block("nosize.raw", None);
        let mut padded = b"hello".to_vec();
        padded.resize(SOH_BLOCK_SIZE, control::SUB);
        script.extend(build_block(1, &padded, false));
        script.push(control::EOT);

        let mut port = MockPort::new(&script);
        let mut sink = Vec::new();
        YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |_, _| true)
            .unwrap();

        assert_eq!(sink, b"hello");
    }

    #[test]
    fn test_progress_false_cancels_and_notifies_sender() {
        let mut script = header_block("ride.dat", Some(2048));
        script.extend(build_block(1, &[0u8; STX_BLOCK_SIZE], true));
        script.extend(build_block(2, &[0u8; STX_BLOCK_SIZE], true));

        let mut port = MockPort::new(&script);
        let mut sink = Vec::new();
        let result = YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut sink, &mut |received, _| received == 0);

        assert!(matches!(result, Err(Error::Canceled)));
        assert!(port.write_buf.ends_with(&[control::CAN, control::CAN]));
    }

    #[test]
    fn test_sender_cancel_is_a_protocol_error() {
        let mut script = header_block("ride.dat", Some(10));
        script.extend([control::CAN, control::CAN]);

        let mut port = MockPort::new(&script);
        let result = YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut Vec::new(), &mut |_, _| true);

        assert!(matches!(result, Err(Error::Ymodem(_))));
    }

    #[test]
    fn test_no_sender_times_out() {
        let mut port = MockPort::new(&[]);
        let result = YmodemReceiver::with_config(&mut port, fast_config())
            .receive(&mut Vec::new(), &mut |_, _| true);

        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
