/*!
    module identity: the logical id used on the buses, its persisted hardware value, and the
    OI-ID reading telling the module position on the rail
*/

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering::*};
use std::{
    boxed::Box,
    collections::BTreeMap,
    fs,
    io,
    path::PathBuf,
    string::{String, ToString},
    };
use log::*;

use crate::{
    error::Error,
    message::{BROADCAST_ID, UNDEFINED_ID},
    mutex::BusyMutex,
    system::Board,
    };


/// key of the hardware id in the store
pub const HARDWARE_ID_KEY: &str = "id";

/// non volatile storage of small values
pub trait KeyValueStore: Send + Sync + 'static {
    /// stored value, `None` if the key was never set
    fn get_u8(&self, key: &str) -> io::Result<Option<u8>>;
    fn set_u8(&self, key: &str, value: u8) -> io::Result<()>;
}

/// volatile store, lost with the process
#[derive(Default)]
pub struct MemoryStore {
    values: BusyMutex<BTreeMap<String, u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {Self::default()}
}

impl KeyValueStore for MemoryStore {
    fn get_u8(&self, key: &str) -> io::Result<Option<u8>> {
        Ok(self.values.blocking_lock().get(key).copied())
    }
    fn set_u8(&self, key: &str, value: u8) -> io::Result<()> {
        self.values.blocking_lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// store keeping one file per key in a directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// use the given directory, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {root})
    }
}

impl KeyValueStore for FileStore {
    fn get_u8(&self, key: &str) -> io::Result<Option<u8>> {
        match fs::read(self.root.join(key)) {
            Ok(content) => Ok(content.first().copied()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }
    fn set_u8(&self, key: &str, value: u8) -> io::Result<()> {
        // a partially written value must never be read back
        let path = self.root.join(key);
        let temporary = path.with_extension("new");
        fs::write(&temporary, [value])?;
        fs::rename(&temporary, &path)
    }
}


/// identity of the running module
pub struct Identity {
    store: Box<dyn KeyValueStore>,
    id: AtomicU8,
    oi_id: AtomicU32,
}

impl Identity {
    pub fn new(store: impl KeyValueStore) -> Self {
        Self {
            store: Box::new(store),
            id: AtomicU8::new(UNDEFINED_ID),
            oi_id: AtomicU32::new(0),
        }
    }

    /// take the stored hardware id as logical id, [UNDEFINED_ID] if none was ever stored
    pub fn load(&self) -> Result<u8, Error> {
        let id = self.hardware_id()?;
        self.id.store(id, Relaxed);
        info!("module id is {}", id);
        Ok(id)
    }
    /// logical id currently used on the buses
    pub fn id(&self) -> u8 {self.id.load(Relaxed)}
    /// change the logical id until next load, without storing it
    pub fn set_id(&self, id: u8) {self.id.store(id, Relaxed)}

    /// stored hardware id
    pub fn hardware_id(&self) -> Result<u8, Error> {
        Ok(self.store.get_u8(HARDWARE_ID_KEY)?.unwrap_or(UNDEFINED_ID))
    }
    /// store a new hardware id and use it as logical id
    pub fn set_hardware_id(&self, id: u8) -> Result<(), Error> {
        if id == BROADCAST_ID
            {return Err(Error::ReservedId(id))}
        self.store.set_u8(HARDWARE_ID_KEY, id)?;
        debug!("hardware id updated to {}", id);
        self.id.store(id, Relaxed);
        Ok(())
    }

    /// last OI-ID reading
    pub fn oi_id(&self) -> u32 {self.oi_id.load(Relaxed)}
    /// read the OI-ID from the board and keep it
    pub fn measure(&self, board: &dyn Board) -> u32 {
        let reading = board.read_oi_id();
        self.oi_id.store(reading, Relaxed);
        debug!("OI-ID reading is {}", reading);
        reading
    }
}
