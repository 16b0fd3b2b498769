/*!
    in-memory buses, for running several nodes in one process

    a [Rail] is a multi-drop serial line: everything written by a node is received by all the
    others. A [CanHub] does the same with CAN frames.
*/

use core::sync::atomic::{AtomicUsize, Ordering::*};
use std::{
    io,
    sync::Arc,
    vec::Vec,
    };
use tokio::sync::{mpsc, Mutex};

use crate::{
    mutex::BusyMutex,
    frame::MAX_FRAME,
    can::{CanDriver, CanFrame},
    serial::{UartRx, UartTx, UartEvent},
    };


enum Piece {
    Data(Vec<u8>),
    Fault,
}

struct Line<P> {
    nodes: Vec<(usize, mpsc::UnboundedSender<P>)>,
    next: usize,
}

impl<P> Line<P> {
    fn new() -> Self {
        Self {nodes: Vec::new(), next: 0}
    }
    fn attach(&mut self) -> (usize, mpsc::UnboundedReceiver<P>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let node = self.next;
        self.next += 1;
        self.nodes.push((node, sender));
        (node, receiver)
    }
    /// send to all nodes but `from`, forgetting the nodes that were dropped
    fn broadcast(&mut self, from: Option<usize>, mut piece: impl FnMut() -> P) {
        self.nodes.retain(|(node, sender)|
            Some(*node) == from || sender.send(piece()).is_ok()
            );
    }
}


/// simulated RS-485 line
#[derive(Clone)]
pub struct Rail {
    line: Arc<BusyMutex<Line<Piece>>>,
    chunk: usize,
}

impl Rail {
    pub fn new() -> Self {Self::with_chunk(MAX_FRAME)}
    /// rail delivering received bytes by chunks of at most `chunk` bytes
    pub fn with_chunk(chunk: usize) -> Self {
        Self {
            line: Arc::new(BusyMutex::new(Line::new())),
            chunk: chunk.clamp(1, MAX_FRAME),
        }
    }
    /// new node plugged on the line
    pub fn attach(&self) -> (SimRx, SimTx) {
        let (node, queue) = self.line.blocking_lock().attach();
        (
            SimRx {queue},
            SimTx {rail: self.clone(), node, writes: Arc::new(AtomicUsize::new(0))},
        )
    }
    /// bytes appearing on the line from outside any node, received by all nodes
    pub fn inject(&self, bytes: &[u8]) {
        self.deliver(None, bytes)
    }
    /// make all nodes receive a line fault
    pub fn fault(&self) {
        self.line.blocking_lock().broadcast(None, || Piece::Fault)
    }

    fn deliver(&self, from: Option<usize>, bytes: &[u8]) {
        let mut line = self.line.blocking_lock();
        for chunk in bytes.chunks(self.chunk) {
            line.broadcast(from, || Piece::Data(chunk.to_vec()));
        }
    }
}

impl Default for Rail {
    fn default() -> Self {Self::new()}
}

/// receive half of a node on a [Rail]
pub struct SimRx {
    queue: mpsc::UnboundedReceiver<Piece>,
}

/// transmit half of a node on a [Rail]
pub struct SimTx {
    rail: Rail,
    node: usize,
    writes: Arc<AtomicUsize>,
}

impl SimTx {
    /// counter of write calls on this node, shared with its clones
    pub fn writes(&self) -> Arc<AtomicUsize> {self.writes.clone()}
}

impl UartRx for SimRx {
    async fn event(&mut self, buffer: &mut [u8]) -> io::Result<UartEvent> {
        match self.queue.recv().await {
            Some(Piece::Data(bytes)) => {
                let size = bytes.len().min(buffer.len());
                buffer[.. size].copy_from_slice(&bytes[.. size]);
                Ok(UartEvent::Data(size))
            },
            Some(Piece::Fault) => Ok(UartEvent::Fault),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
    fn flush_input(&mut self) -> io::Result<()> {
        while self.queue.try_recv().is_ok() {}
        Ok(())
    }
}

impl UartTx for SimTx {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writes.fetch_add(1, Relaxed);
        self.rail.deliver(Some(self.node), data);
        Ok(())
    }
}


/// simulated CAN bus
#[derive(Clone)]
pub struct CanHub {
    line: Arc<BusyMutex<Line<CanFrame>>>,
}

impl CanHub {
    pub fn new() -> Self {
        Self {line: Arc::new(BusyMutex::new(Line::new()))}
    }
    /// new controller plugged on the bus
    pub fn attach(&self) -> SimCan {
        let (node, queue) = self.line.blocking_lock().attach();
        SimCan {hub: self.clone(), node, queue: Mutex::new(queue)}
    }
}

impl Default for CanHub {
    fn default() -> Self {Self::new()}
}

/// CAN controller on a [CanHub]
pub struct SimCan {
    hub: CanHub,
    node: usize,
    queue: Mutex<mpsc::UnboundedReceiver<CanFrame>>,
}

impl CanDriver for SimCan {
    async fn transmit(&self, frame: &CanFrame) -> io::Result<()> {
        self.hub.line.blocking_lock().broadcast(Some(self.node), || *frame);
        Ok(())
    }
    async fn receive(&self) -> io::Result<CanFrame> {
        self.queue.lock().await.recv().await
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}
