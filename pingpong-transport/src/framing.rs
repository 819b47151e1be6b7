//! Fixed-size frame reads for stream transports.
//!
//! Pipe and TCP streams carry frames with no length prefix. Both ends agree on
//! the frame size up front, so a reader only has to tell a clean end of stream
//! (peer finished) apart from a stream that ends mid-frame.

use std::io::{self, ErrorKind, Read};

/// Reads exactly `buf.len()` bytes.
///
/// # Returns
/// `Ok(true)` when a full frame was read, `Ok(false)` when the stream ended
/// cleanly before the first byte of the frame.
///
/// # Errors
/// Returns `UnexpectedEof` if the stream ends inside a frame, or any other
/// IO error from the underlying reader.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("stream ended after {filled} of {} frame bytes", buf.len()),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader handing out one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((first, rest)) if !buf.is_empty() => {
                    buf[0] = *first;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_read_frame_full() {
        let mut reader = Cursor::new(b"pingpong".to_vec());
        let mut buf = [0u8; 4];
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert_eq!(&buf, b"ping");
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert_eq!(&buf, b"pong");
        assert!(!read_frame(&mut reader, &mut buf).unwrap());
    }

    #[test]
    fn test_read_frame_partial_reads() {
        let mut reader = Trickle(b"pong\n");
        let mut buf = [0u8; 5];
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert_eq!(&buf, b"pong\n");
    }

    #[test]
    fn test_read_frame_truncated() {
        let mut reader = Cursor::new(b"pi".to_vec());
        let mut buf = [0u8; 4];
        let err = read_frame(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
