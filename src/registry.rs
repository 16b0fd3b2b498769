use std::{
    collections::BTreeMap,
    sync::Arc,
    vec::Vec,
    };
use log::*;

use crate::{
    message::Message,
    mutex::BusyMutex,
    };


/// command implementation, receiving the message and giving the result to answer
pub type Handler = Arc<dyn Fn(Message) -> u32 + Send + Sync>;

/**
    handlers of the commands a node can execute

    handlers are keyed by opcode then by module id. When an opcode has a single handler it runs
    for any id, when it has several the message `id` selects one.
*/
#[derive(Default)]
pub struct Registry {
    table: BusyMutex<BTreeMap<u8, Vec<(u8, Handler)>>>,
}

impl Registry {
    pub fn new() -> Self {Self::default()}

    /// register a handler for the opcode and id of `message`
    pub fn add(&self, message: Message, handler: impl Fn(Message) -> u32 + Send + Sync + 'static) {
        let handler: Handler = Arc::new(handler);
        let mut table = self.table.blocking_lock();
        let entries = table.entry(message.opcode).or_default();
        match entries.iter_mut().find(|(id, _)| *id == message.id) {
            Some(entry) => {
                debug!("replacing handler of command {:#04x} for id {}", message.opcode, message.id);
                entry.1 = handler;
            },
            None => entries.push((message.id, handler)),
        }
    }
    /// drop all handlers of the opcode of `message`, returning how many there were
    pub fn remove(&self, message: Message) -> usize {
        self.table.blocking_lock()
            .remove(&message.opcode)
            .map_or(0, |entries| entries.len())
    }
    /// whether the opcode of `message` has any handler
    pub fn exist(&self, message: Message) -> bool {
        self.table.blocking_lock().contains_key(&message.opcode)
    }

    /// run the handler selected by `message`, if any
    pub fn dispatch(&self, message: Message) -> Option<u32> {
        let handler = {
            let table = self.table.blocking_lock();
            match table.get(&message.opcode)?.as_slice() {
                [(_, handler)] => handler.clone(),
                entries => entries.iter()
                    .find(|(id, _)| *id == message.id)
                    .map(|(_, handler)| handler.clone())?,
            }
        };
        // the table is free while the handler runs, so it can register commands
        Some(handler(message))
    }
    /// run the handler selected by `message`, giving 0 if there is none
    pub fn run(&self, message: Message) -> u32 {
        self.dispatch(message).unwrap_or_else(|| {
            warn!("no handler for command {:#04x} from id {}", message.opcode, message.id);
            0
        })
    }
}
