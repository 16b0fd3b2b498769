/*!
    frame reassembly from the chunks delivered by the UART receive events

    ```text
    WaitHeader --data >= header--> Accumulating --length reached--> ChecksumOk | ChecksumFail
        |                              |
        +--bad sync / length-----------+--> SyncInvalid | LengthInvalid
    any state --timeout--> QueueTimeout,  --non data event--> EventInvalid
    ```
*/

use packbytes::FromBytes;
use log::*;

use crate::{
    error::Error,
    frame::{Frame, FrameError, Header, HEADER, MAX_PAYLOAD, SYNC},
    };


/// reader progress
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// nothing received yet, chunks shorter than a header are ignored
    WaitHeader,
    /// header accepted, waiting for the rest of the payload
    Accumulating,
    /// complete frame with a valid checksum
    ChecksumOk,
    ChecksumFail,
    SyncInvalid,
    LengthInvalid,
    QueueTimeout,
    /// the driver reported something else than received data
    EventInvalid,
}

impl State {
    pub fn is_terminal(self) -> bool {
        !matches!(self, State::WaitHeader | State::Accumulating)
    }
}

/// receive event, as given by the UART driver
#[derive(Copy, Clone, Debug)]
pub enum Event<'a> {
    /// a chunk of received bytes
    Data(&'a [u8]),
    /// any non data event, like a fifo overflow or a framing error
    Fault,
    /// no event arrived in time
    Timeout,
}

/// frame reader state machine, free of any IO
#[derive(Debug, Default)]
pub struct Reader {
    state: State,
    frame: Frame,
    /// bytes received after the declared payload, dropped
    discarded: usize,
}
impl Default for State {
    fn default() -> Self {State::WaitHeader}
}

impl Reader {
    pub fn new() -> Self {Self::default()}

    pub fn state(&self) -> State {self.state}
    /// frame being received, complete once state is [State::ChecksumOk]
    pub fn frame(&self) -> &Frame {&self.frame}
    /// bytes following the declared payload in the last chunk
    pub fn discarded(&self) -> usize {self.discarded}

    pub fn reset(&mut self) {
        self.state = State::WaitHeader;
        self.frame = Frame::default();
        self.discarded = 0;
    }

    /// single transition function, a terminal reader is reset before consuming the event
    pub fn feed(&mut self, event: Event<'_>) -> State {
        if self.state.is_terminal()
            {self.reset()}
        self.state = match (self.state, event) {
            (_, Event::Timeout) => State::QueueTimeout,
            (_, Event::Fault) => State::EventInvalid,
            (State::WaitHeader, Event::Data(chunk)) => self.start(chunk),
            (_, Event::Data(chunk)) => self.append(chunk),
        };
        self.state
    }

    fn start(&mut self, chunk: &[u8]) -> State {
        let Some(Ok(header)) = chunk.get(.. HEADER).map(<[u8; HEADER]>::try_from)
            else {return State::WaitHeader};
        let header = Header::from_le_bytes(header);
        self.frame.header = header;
        if header.sync != SYNC
            {return State::SyncInvalid}
        if usize::from(header.length) > MAX_PAYLOAD
            {return State::LengthInvalid}
        self.append(&chunk[HEADER ..])
    }

    fn append(&mut self, chunk: &[u8]) -> State {
        let length = usize::from(self.frame.header.length);
        let wanted = length.saturating_sub(self.frame.payload.len());
        let (used, extra) = chunk.split_at(chunk.len().min(wanted));
        if self.frame.payload.extend_from_slice(used).is_err()
            {return State::LengthInvalid}
        self.discarded += extra.len();

        if self.frame.payload.len() < length
            {State::Accumulating}
        else if self.frame.verify().is_ok()
            {State::ChecksumOk}
        else
            {State::ChecksumFail}
    }

    /// error matching a failed terminal state
    pub fn error(&self) -> Option<Error> {
        let header = &self.frame.header;
        match self.state {
            State::WaitHeader | State::Accumulating | State::ChecksumOk => None,
            State::ChecksumFail => Some(match self.frame.verify() {
                Err(error) => error.into(),
                Ok(()) => FrameError::Checksum {received: header.checksum, expected: header.checksum}.into(),
                }),
            State::SyncInvalid => Some(FrameError::Sync(header.sync).into()),
            State::LengthInvalid => Some(FrameError::Length(header.length).into()),
            State::QueueTimeout => Some(Error::Timeout),
            State::EventInvalid => Some(Error::Event),
        }
    }
}

pub(crate) fn log_failure(reader: &Reader) {
    let header = &reader.frame().header;
    match reader.state() {
        State::SyncInvalid | State::LengthInvalid =>
            error!("invalid header frame: sync {:#04x}, length {}", header.sync, header.length),
        State::ChecksumFail =>
            error!("invalid checksum: {:#04x}, expected: {:#04x}",
                header.checksum, crate::frame::checksum(header, &reader.frame().payload)),
        State::QueueTimeout => debug!("timeout error"),
        State::EventInvalid => error!("event type error"),
        _ => {},
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Flags, MAX_FRAME};

    fn wire(frame: &Frame) -> Vec<u8> {
        let mut out = vec![0; MAX_FRAME];
        let size = frame.encode(&mut out).unwrap();
        out.truncate(size);
        out
    }

    #[test]
    fn single_chunk() {
        let frame = Frame::new(0x10, Flags::to(3), &[1, 2, 3, 4]).unwrap();
        let mut reader = Reader::new();
        assert_eq!(reader.state(), State::WaitHeader);
        assert_eq!(reader.feed(Event::Data(&wire(&frame))), State::ChecksumOk);
        assert_eq!(reader.frame(), &frame);
        assert!(reader.error().is_none());
    }

    #[test]
    fn empty_payload_completes_on_header() {
        let frame = Frame::new(0x10, Flags::to(3), &[]).unwrap();
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&wire(&frame))), State::ChecksumOk);
    }

    #[test]
    fn accumulates_chunks() {
        let payload: Vec<u8> = (0 .. MAX_PAYLOAD).map(|i| i as u8).collect();
        let frame = Frame::new(0x10, Flags::to(3), &payload).unwrap();
        let bytes = wire(&frame);
        let mut reader = Reader::new();
        let mut chunks = bytes.chunks(100).peekable();
        while let Some(chunk) = chunks.next() {
            let state = reader.feed(Event::Data(chunk));
            if chunks.peek().is_some()
                {assert_eq!(state, State::Accumulating)}
            else
                {assert_eq!(state, State::ChecksumOk)}
        }
        assert_eq!(reader.frame().payload.as_slice(), payload.as_slice());
    }

    #[test]
    fn short_first_chunk_is_ignored() {
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&[SYNC, 1, 2])), State::WaitHeader);
        let frame = Frame::new(0x10, Flags::to(3), &[5]).unwrap();
        assert_eq!(reader.feed(Event::Data(&wire(&frame))), State::ChecksumOk);
    }

    #[test]
    fn rejects_bad_sync() {
        let frame = Frame::new(0x10, Flags::to(3), &[5]).unwrap();
        let mut bytes = wire(&frame);
        bytes[0] = 0x55;
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&bytes)), State::SyncInvalid);
        assert!(matches!(reader.error(), Some(Error::Frame(FrameError::Sync(0x55)))));
    }

    #[test]
    fn rejects_bad_length() {
        let mut bytes = vec![SYNC, 0x10, 0, 0];
        bytes.extend_from_slice(&(MAX_PAYLOAD as u16 + 1).to_le_bytes());
        bytes.push(0);
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&bytes)), State::LengthInvalid);
    }

    #[test]
    fn rejects_bad_checksum() {
        let frame = Frame::new(0x10, Flags::to(3), &[5, 6]).unwrap();
        let mut bytes = wire(&frame);
        bytes[8] ^= 0x01;
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&bytes)), State::ChecksumFail);
        assert!(matches!(reader.error(), Some(Error::Frame(FrameError::Checksum {..}))));
    }

    #[test]
    fn mutated_length_never_validates() {
        // zero payload bytes, so dropping some of them leaves only the length in the checksum
        let frame = Frame::new(0x10, Flags::to(3), &[0; 20]).unwrap();
        let bytes = wire(&frame);
        for index in [4, 5] {
            for mask in 1 ..= u8::MAX {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= mask;
                let mut reader = Reader::new();
                let mut state = reader.feed(Event::Data(&corrupted));
                // a longer length waits for bytes that never come
                if state == State::Accumulating
                    {state = reader.feed(Event::Timeout)}
                assert!(
                    matches!(state, State::ChecksumFail | State::LengthInvalid | State::QueueTimeout),
                    "length mutation {:#04x} at {} gave {:?}", mask, index, state);
            }
        }
    }

    #[test]
    fn timeout_and_fault_are_terminal() {
        let frame = Frame::new(0x10, Flags::to(3), &[0; 20]).unwrap();
        let bytes = wire(&frame);
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&bytes[.. 10])), State::Accumulating);
        assert_eq!(reader.feed(Event::Timeout), State::QueueTimeout);
        assert!(matches!(reader.error(), Some(Error::Timeout)));
        // fresh start after a terminal state
        assert_eq!(reader.feed(Event::Data(&bytes[.. 10])), State::Accumulating);
        assert_eq!(reader.feed(Event::Fault), State::EventInvalid);
    }

    #[test]
    fn trailing_bytes_are_discarded() {
        let frame = Frame::new(0x10, Flags::to(3), &[1, 2]).unwrap();
        let mut bytes = wire(&frame);
        bytes.extend_from_slice(&[7, 7, 7]);
        let mut reader = Reader::new();
        assert_eq!(reader.feed(Event::Data(&bytes)), State::ChecksumOk);
        assert_eq!(reader.frame().payload.as_slice(), &[1, 2]);
        assert_eq!(reader.discarded(), 3);
    }
}
