//! Per-connection buffers and the read/write paths that drive them.
//!
//! [`ConnectionState`] knows nothing about sockets or the reactor: the read
//! path pulls from any [`io::Read`], the write path pushes into any
//! [`io::Write`]. The handler that owns the socket decides what to do with the
//! outcome and keeps the reactor registration in line with [`ConnectionState::interest`].

use crate::error::{Error, classify};
use crate::reactor::event::Interest;
use crate::transform::Transform;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;

/// Where completed lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRoute {
    /// Queue every completed line for transmission back to the peer.
    Echo,
    /// Keep completed lines in an inbox for the owner to drain.
    Collect,
}

/// Counters for one pass over the read path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadReport {
    pub bytes: usize,
    pub lines: usize,
    pub forced_flushes: usize,
}

impl ReadReport {
    fn absorb(&mut self, other: ReadReport) {
        self.bytes += other.bytes;
        self.lines += other.lines;
        self.forced_flushes += other.forced_flushes;
    }
}

/// Result of draining a readable socket.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Everything available was consumed; the connection stays up.
    Open(ReadReport),
    /// The peer closed its side. Bytes read before the EOF are in the report.
    Closed(ReadReport),
    /// A terminal error; the connection must be torn down.
    Failed(Error),
}

/// Result of flushing pending output.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Nothing was queued.
    Idle,
    /// The output buffer was fully written and reset.
    Drained(usize),
    /// The socket stopped accepting bytes; the rest stays queued.
    Pending(usize),
    /// A terminal error; the connection must be torn down.
    Failed(Error),
}

/// Buffers and watermark bookkeeping for one live socket.
pub struct ConnectionState {
    input: Vec<u8>,
    output: Vec<u8>,
    bytes_sent: usize,
    high_watermark: usize,
    delimiter: u8,
    route: LineRoute,
    inbox: VecDeque<Vec<u8>>,
    scratch: Vec<u8>,
}

impl ConnectionState {
    /// Creates an empty state.
    ///
    /// # Arguments
    /// * `high_watermark` - Bytes allowed in the input buffer before a forced flush (at least 1)
    /// * `delimiter` - The byte that terminates a line
    /// * `read_chunk` - Size of the scratch buffer used per receive call (at least 1)
    /// * `route` - Where completed lines go
    pub fn new(high_watermark: usize, delimiter: u8, read_chunk: usize, route: LineRoute) -> Self {
        Self {
            input: Vec::new(),
            output: Vec::new(),
            bytes_sent: 0,
            high_watermark: high_watermark.max(1),
            delimiter,
            route,
            inbox: VecDeque::new(),
            scratch: vec![0; read_chunk.max(1)],
        }
    }

    /// The interest this connection needs registered right now.
    ///
    /// Reads are always wanted. Write interest is derived from the output
    /// buffer, so it is set exactly when unsent bytes exist.
    pub fn interest(&self) -> Interest {
        Interest::new(true, self.has_pending_output())
    }

    pub fn has_pending_output(&self) -> bool {
        self.bytes_sent < self.output.len()
    }

    /// Bytes queued but not yet written.
    pub fn pending_output(&self) -> &[u8] {
        &self.output[self.bytes_sent..]
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Bytes of the line currently being accumulated.
    pub fn buffered_input(&self) -> &[u8] {
        &self.input
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// Appends raw bytes to the output, bypassing the transform.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    /// Drains lines collected under [`LineRoute::Collect`].
    pub fn take_lines(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.inbox.drain(..)
    }

    /// Runs received bytes through `transform` and assembles lines.
    ///
    /// The delimiter itself is never transformed. Reaching the high watermark
    /// without a delimiter flushes the accumulated bytes as a line of their own
    /// with a delimiter appended.
    pub fn ingest(&mut self, bytes: &[u8], transform: &dyn Transform) -> ReadReport {
        let mut report = ReadReport {
            bytes: bytes.len(),
            ..ReadReport::default()
        };

        for &byte in bytes {
            if byte == self.delimiter {
                self.input.push(byte);
                self.complete_line();
                report.lines += 1;
                continue;
            }

            self.input.push(transform.apply(byte));

            if self.input.len() >= self.high_watermark {
                self.input.push(self.delimiter);
                self.complete_line();
                report.forced_flushes += 1;
            }
        }

        report
    }

    /// Receives until the reader would block, reports EOF, or fails.
    ///
    /// A retriable error ends the pass but leaves read interest enabled:
    /// readiness is level-triggered, so the reactor calls back as soon as the
    /// socket is readable again.
    pub fn read_from<R: Read>(&mut self, reader: &mut R, transform: &dyn Transform) -> ReadOutcome {
        let mut scratch = mem::take(&mut self.scratch);
        let outcome = self.read_with(reader, transform, &mut scratch);
        self.scratch = scratch;
        outcome
    }

    fn read_with<R: Read>(
        &mut self,
        reader: &mut R,
        transform: &dyn Transform,
        scratch: &mut [u8],
    ) -> ReadOutcome {
        let mut report = ReadReport::default();

        loop {
            match reader.read(scratch) {
                Ok(0) => return ReadOutcome::Closed(report),
                Ok(n) => report.absorb(self.ingest(&scratch[..n], transform)),
                Err(err) if classify(&err).is_retriable() => return ReadOutcome::Open(report),
                Err(err) => return ReadOutcome::Failed(Error::read(err)),
            }
        }
    }

    /// Sends pending output until it is drained or the writer would block.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> WriteOutcome {
        if !self.has_pending_output() {
            return WriteOutcome::Idle;
        }

        let mut written = 0;

        loop {
            if self.bytes_sent == self.output.len() {
                self.output.clear();
                self.bytes_sent = 0;
                return WriteOutcome::Drained(written);
            }

            match writer.write(&self.output[self.bytes_sent..]) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "socket accepted zero bytes");
                    return WriteOutcome::Failed(Error::write(err));
                }
                Ok(n) => {
                    self.bytes_sent += n;
                    written += n;
                }
                Err(err) if classify(&err).is_retriable() => return WriteOutcome::Pending(written),
                Err(err) => return WriteOutcome::Failed(Error::write(err)),
            }
        }
    }

    fn complete_line(&mut self) {
        match self.route {
            LineRoute::Echo => self.output.append(&mut self.input),
            LineRoute::Collect => self.inbox.push_back(mem::take(&mut self.input)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::transform::{Identity, Rot13};

    /// Hands out scripted chunks, then reports would-block.
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Err(err)) => Err(err),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.steps.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    /// Accepts at most the scripted number of bytes per call.
    struct ScriptedWriter {
        steps: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
    }

    impl ScriptedWriter {
        fn new(steps: Vec<io::Result<usize>>) -> Self {
            Self {
                steps: steps.into(),
                written: Vec::new(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Err(err)) => Err(err),
                Some(Ok(limit)) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn echo_state(watermark: usize) -> ConnectionState {
        ConnectionState::new(watermark, b'\n', 4, LineRoute::Echo)
    }

    #[test]
    fn complete_line_is_transformed_and_queued() {
        let mut state = echo_state(64);
        let mut reader = ScriptedReader::new(vec![Ok(b"Hello\n".to_vec())]);

        match state.read_from(&mut reader, &Rot13) {
            ReadOutcome::Open(report) => {
                assert_eq!(report.bytes, 6);
                assert_eq!(report.lines, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(state.pending_output(), b"Uryyb\n");
        assert!(state.buffered_input().is_empty());
        assert_eq!(state.interest(), Interest::BOTH);
    }

    #[test]
    fn partial_line_produces_no_output() {
        let mut state = echo_state(64);
        let mut reader = ScriptedReader::new(vec![Ok(b"abc".to_vec())]);

        assert!(matches!(state.read_from(&mut reader, &Rot13), ReadOutcome::Open(_)));
        assert!(!state.has_pending_output());
        assert_eq!(state.buffered_input(), b"nop");
        assert_eq!(state.interest(), Interest::READABLE);

        let mut reader = ScriptedReader::new(vec![Ok(b"d\n".to_vec())]);
        state.read_from(&mut reader, &Rot13);
        assert_eq!(state.pending_output(), b"nopq\n");
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut state = echo_state(64);
        let report = state.ingest(b"a\nb\n2\n", &Rot13);

        assert_eq!(report.lines, 3);
        assert_eq!(state.pending_output(), b"n\no\n2\n");
    }

    #[test]
    fn watermark_forces_flush_with_delimiter() {
        let mut state = echo_state(4);
        let report = state.ingest(b"abcd", &Identity);

        assert_eq!(report.forced_flushes, 1);
        assert_eq!(report.lines, 0);
        assert_eq!(state.pending_output(), b"abcd\n");
        assert!(state.buffered_input().is_empty());

        state.ingest(b"ef", &Identity);
        assert_eq!(state.buffered_input(), b"ef");
        assert_eq!(state.pending_output(), b"abcd\n");
    }

    #[test]
    fn watermark_counts_across_reads() {
        let mut state = echo_state(5);
        let mut reader = ScriptedReader::new(vec![Ok(b"ab".to_vec()), Ok(b"cdefg".to_vec())]);

        match state.read_from(&mut reader, &Rot13) {
            ReadOutcome::Open(report) => assert_eq!(report.forced_flushes, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(state.pending_output(), b"nopqr\n");
        assert_eq!(state.buffered_input(), b"st");
    }

    #[test]
    fn zero_length_read_reports_close() {
        let mut state = echo_state(64);
        let mut reader = ScriptedReader::new(vec![Ok(b"x\n".to_vec()), Ok(Vec::new())]);

        match state.read_from(&mut reader, &Identity) {
            ReadOutcome::Closed(report) => assert_eq!(report.lines, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn retriable_read_error_keeps_read_interest() {
        let mut state = echo_state(64);
        let mut reader = ScriptedReader::new(vec![
            Ok(b"a".to_vec()),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"\n".to_vec()),
        ]);

        assert!(matches!(state.read_from(&mut reader, &Identity), ReadOutcome::Open(_)));
        assert!(state.interest().readable);

        state.read_from(&mut reader, &Identity);
        assert_eq!(state.pending_output(), b"a\n");
    }

    #[test]
    fn reset_during_read_is_terminal() {
        let mut state = echo_state(64);
        let mut reader = ScriptedReader::new(vec![Err(io::ErrorKind::ConnectionReset.into())]);

        match state.read_from(&mut reader, &Identity) {
            ReadOutcome::Failed(err) => assert_eq!(err.class(), Some(ErrorClass::PeerReset)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn partial_writes_advance_the_cursor() {
        let mut state = echo_state(64);
        state.queue(b"hello\n");

        let mut writer = ScriptedWriter::new(vec![Ok(2), Ok(1)]);
        match state.write_to(&mut writer) {
            WriteOutcome::Pending(n) => assert_eq!(n, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(state.bytes_sent(), 3);
        assert_eq!(state.pending_output(), b"lo\n");
        assert!(state.interest().writable);

        let mut writer = ScriptedWriter::new(vec![Ok(16)]);
        assert!(matches!(state.write_to(&mut writer), WriteOutcome::Drained(3)));
        assert_eq!(writer.written, b"lo\n");
        assert_eq!(state.bytes_sent(), 0);
        assert!(!state.interest().writable);
    }

    #[test]
    fn empty_output_is_idle() {
        let mut state = echo_state(64);
        let mut writer = ScriptedWriter::new(vec![Ok(16)]);

        assert!(matches!(state.write_to(&mut writer), WriteOutcome::Idle));
        assert!(writer.written.is_empty());
        assert_eq!(state.interest(), Interest::READABLE);
    }

    #[test]
    fn reads_stay_wanted_while_output_comes_and_goes() {
        let mut state = echo_state(64);
        assert_eq!(state.interest(), Interest::READABLE);

        state.ingest(b"abc\n", &Rot13);
        assert_eq!(state.interest(), Interest::BOTH);

        let mut writer = ScriptedWriter::new(vec![Ok(16)]);
        state.write_to(&mut writer);
        assert_eq!(state.interest(), Interest::READABLE);
    }

    #[test]
    fn write_errors_are_classified() {
        let mut state = echo_state(64);
        state.queue(b"x\n");

        let mut writer = ScriptedWriter::new(vec![Err(io::ErrorKind::BrokenPipe.into())]);
        match state.write_to(&mut writer) {
            WriteOutcome::Failed(err) => assert_eq!(err.class(), Some(ErrorClass::PeerReset)),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut writer = ScriptedWriter::new(vec![Ok(0)]);
        match state.write_to(&mut writer) {
            WriteOutcome::Failed(err) => assert_eq!(err.class(), Some(ErrorClass::Fatal)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn collect_route_fills_the_inbox() {
        let mut state = ConnectionState::new(64, b'\n', 8, LineRoute::Collect);
        state.ingest(b"Uryyb\n2\n", &Rot13);

        let lines: Vec<Vec<u8>> = state.take_lines().collect();
        assert_eq!(lines, vec![b"Hello\n".to_vec(), b"2\n".to_vec()]);
        assert!(!state.has_pending_output());
    }
}
