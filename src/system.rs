/*!
    node orchestration: bus receivers, command routing and automatic addressing

    every node runs a [System] over one serial and one CAN [Bus]. Received commands are routed
    to the [Registry] according to their kind:

    - SET commands are acknowledged by an echo before running
    - GET commands run then their result is sent back
    - SEND commands run silently

    broadcast commands are never answered
*/

use core::time::Duration;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    sync::Arc,
    vec::Vec,
    };
use log::*;
use tokio::task::JoinHandle;

use crate::{
    bus::{Bus, RETRY_DELAY},
    error::Error,
    frame::FrameError,
    identity::Identity,
    message::{opcode, Kind, Message, BROADCAST_ID},
    mutex::BusyMutex,
    registry::Registry,
    transport::{Envelope, Transport},
    };


/// logical id of the coordinator once addressing is done
pub const COORDINATOR_ID: u8 = 0;
/// time modules are given to answer a discovery broadcast
pub const SETTLE: Duration = Duration::from_millis(100);

/// hardware of the running node
pub trait Board: Send + Sync + 'static {
    /// prepare the board peripherals, called once by [System::init]
    fn init(&self) -> io::Result<()> {Ok(())}
    /// board type code answered to [opcode::GET_TYPE]
    fn module_type(&self) -> u32;
    /// OI-ID reading, the position dependent voltage of the rail
    fn read_oi_id(&self) -> u32;
}

/// place of a node on the rail
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// the board driving the rail, addressing the modules
    Coordinator,
    /// a board executing the coordinator commands
    Module,
}

/// behavior of a [System]
#[derive(Copy, Clone, Debug)]
pub struct SystemConfig {
    pub role: Role,
    /// run the serial receiver
    pub receive_serial: bool,
    /// run the CAN receiver
    pub receive_can: bool,
    /// run automatic addressing on start, only on a coordinator
    pub auto_id: bool,
    /// time waited for OI-ID and type answers
    pub settle: Duration,
    /// receive wait of the receivers before looping
    pub receive_timeout: Duration,
}

impl SystemConfig {
    /**
        coordinator settings

        the coordinator does not run a serial receiver, its requests read their own replies
    */
    pub fn coordinator() -> Self {
        Self {
            role: Role::Coordinator,
            receive_serial: false,
            receive_can: true,
            auto_id: false,
            settle: SETTLE,
            receive_timeout: Duration::MAX,
        }
    }
    pub fn module() -> Self {
        Self {
            role: Role::Module,
            receive_serial: true,
            .. Self::coordinator()
        }
    }
    pub fn with_receive_serial(self, receive_serial: bool) -> Self {Self {receive_serial, .. self}}
    pub fn with_receive_can(self, receive_can: bool) -> Self {Self {receive_can, .. self}}
    pub fn with_auto_id(self, auto_id: bool) -> Self {Self {auto_id, .. self}}
    pub fn with_settle(self, settle: Duration) -> Self {Self {settle, .. self}}
    pub fn with_receive_timeout(self, receive_timeout: Duration) -> Self {Self {receive_timeout, .. self}}
}

impl Default for SystemConfig {
    fn default() -> Self {Self::module()}
}


/// a node on the rail
pub struct System<S, C> {
    serial: Arc<Bus<S>>,
    can: Arc<Bus<C>>,
    registry: Arc<Registry>,
    identity: Arc<Identity>,
    board: Arc<dyn Board>,
    config: SystemConfig,
    /// logical ids expected for the modules, on a coordinator
    submodules: BusyMutex<BTreeSet<u8>>,
    /// OI-ID readings collected during addressing
    oi_ids: Arc<BusyMutex<Vec<u32>>>,
    /// board types collected during discovery
    types: Arc<BusyMutex<BTreeMap<u8, u32>>>,
    tasks: BusyMutex<Vec<JoinHandle<()>>>,
}

impl<S: Transport, C: Transport> System<S, C> {
    pub fn new(serial: Bus<S>, can: Bus<C>, identity: Identity, board: impl Board, config: SystemConfig) -> Self {
        Self {
            serial: Arc::new(serial),
            can: Arc::new(can),
            registry: Arc::new(Registry::new()),
            identity: Arc::new(identity),
            board: Arc::new(board),
            config,
            submodules: BusyMutex::default(),
            oi_ids: Arc::default(),
            types: Arc::default(),
            tasks: BusyMutex::default(),
        }
    }

    pub fn serial(&self) -> &Arc<Bus<S>> {&self.serial}
    pub fn can(&self) -> &Arc<Bus<C>> {&self.can}
    pub fn registry(&self) -> &Arc<Registry> {&self.registry}
    pub fn identity(&self) -> &Arc<Identity> {&self.identity}
    pub fn config(&self) -> &SystemConfig {&self.config}
    /// logical id of this node
    pub fn id(&self) -> u8 {self.identity.id()}

    /// prepare the board, load the node id, read the OI-ID and register the system commands
    pub fn init(&self) -> Result<(), Error> {
        self.board.init()?;
        let id = self.identity.load()?;
        self.identity.measure(&*self.board);
        self.register_system_commands();
        info!("{:?} {} initialized", self.config.role, id);
        Ok(())
    }

    /**
        spawn the enabled receivers, then on a coordinator with `auto_id` run [Self::automatic_id]

        the receivers keep running if addressing fails
    */
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        info!("start the system");
        {
            let mut tasks = self.tasks.blocking_lock();
            if self.config.receive_serial {
                let system = self.clone();
                tasks.push(tokio::spawn(async move {system.receive_serial().await}));
            }
            if self.config.receive_can {
                let system = self.clone();
                tasks.push(tokio::spawn(async move {system.receive_can().await}));
            }
        }
        if self.config.role == Role::Coordinator && self.config.auto_id {
            self.automatic_id().await?;
        }
        Ok(())
    }
    /// abort the receivers
    pub fn stop(&self) {
        info!("stop the system");
        for task in self.tasks.blocking_lock().drain(..) {
            task.abort();
        }
    }

    /// expect a module with this logical id on the rail
    pub fn add_submodule(&self, id: u8) {
        if ! self.submodules.blocking_lock().insert(id)
            {warn!("submodule {} already exists", id)}
    }
    /// expected module ids, ascending
    pub fn submodules(&self) -> Vec<u8> {
        self.submodules.blocking_lock().iter().copied().collect()
    }
    /// OI-ID readings received during the last addressing
    pub fn oi_ids(&self) -> Vec<u32> {
        self.oi_ids.blocking_lock().clone()
    }

    /**
        give every module a logical id according to its position on the rail

        modules are asked their OI-ID, the highest reading, nearest to the coordinator, gets the
        lowest expected id. Nothing is assigned if the count of answers does not match the
        expected modules. The coordinator takes [COORDINATOR_ID] in any case.
    */
    pub async fn automatic_id(&self) -> Result<(), Error> {
        self.oi_ids.blocking_lock().clear();
        // answers are addressed to the coordinator id
        self.identity.set_id(COORDINATOR_ID);

        let assignment = async {
            self.serial.send_message(Message::new(opcode::GET_ALL_OI_ID, COORDINATOR_ID, 0, 0), BROADCAST_ID).await?;
            tokio::time::sleep(self.config.settle).await;

            let mut readings = self.oi_ids();
            readings.sort_unstable_by(|a, b| b.cmp(a));
            let submodules = self.submodules();
            if readings.len() != submodules.len() {
                warn!("the number of modules does not match: {} expected, {} answered",
                    submodules.len(), readings.len());
                return Err(Error::ModuleCount {expected: submodules.len(), found: readings.len()})
            }
            for (&id, &reading) in submodules.iter().zip(&readings) {
                info!("module with OI-ID {} gets id {}", reading, id);
                let message = Message::new(opcode::SET_AUTO_ID, COORDINATOR_ID, id.into(), reading);
                self.serial.set_message(message, BROADCAST_ID).await?;
            }
            Ok(())
        }.await;

        self.identity.set_hardware_id(COORDINATOR_ID)?;
        assignment
    }

    /// ask every module its board type over CAN, giving the answers by module id
    pub async fn discover_types(&self) -> Result<BTreeMap<u8, u32>, Error> {
        self.types.blocking_lock().clear();
        self.can.send_message(Message::new(opcode::GET_TYPE_ALL, self.id(), 0, 0), BROADCAST_ID).await?;
        tokio::time::sleep(self.config.settle).await;
        Ok(self.types.blocking_lock().clone())
    }

    fn register_system_commands(&self) {
        let id = self.identity.id();
        self.registry.add(Message::new(opcode::PING, id, 0, 0), |_| opcode::PING_ANSWER);
        self.registry.add(Message::new(opcode::GET_TYPE, id, 0, 0), {
            let board = self.board.clone();
            move |_| board.module_type()
            });

        match self.config.role {
            Role::Coordinator => {
                self.registry.add(Message::new(opcode::SEND_OI_ID, id, 0, 0), {
                    let oi_ids = self.oi_ids.clone();
                    move |message| {
                        debug!("module {} has OI-ID {}", message.id, message.data);
                        oi_ids.blocking_lock().push(message.data);
                        0
                    }});
                self.registry.add(Message::new(opcode::GET_TYPE_ALL, id, 0, 0), {
                    let types = self.types.clone();
                    move |message| {
                        info!("board id {} has type {}", message.id, message.data);
                        types.blocking_lock().insert(message.id, message.data);
                        0
                    }});
            },
            Role::Module => {
                self.registry.add(Message::new(opcode::GET_ALL_OI_ID, id, 0, 0), {
                    let identity = self.identity.clone();
                    let can = self.can.clone();
                    move |message| {
                        let reading = identity.oi_id();
                        let answer = Message::new(opcode::SEND_OI_ID, identity.id(), 0, reading);
                        answer_over(&can, answer, message.id);
                        reading
                    }});
                self.registry.add(Message::new(opcode::GET_TYPE_ALL, id, 0, 0), {
                    let identity = self.identity.clone();
                    let board = self.board.clone();
                    let can = self.can.clone();
                    move |message| {
                        let kind = board.module_type();
                        answer_over(&can, Message::new(opcode::GET_TYPE_ALL, identity.id(), 0, kind), message.id);
                        kind
                    }});
                self.registry.add(Message::new(opcode::SET_AUTO_ID, id, 0, 0), {
                    let identity = self.identity.clone();
                    move |message| {
                        if message.data == identity.oi_id() {
                            match u8::try_from(message.conf)
                                .map_err(|_| Error::from(FrameError::Address(message.conf)))
                                .and_then(|id| identity.set_hardware_id(id))
                            {
                                Ok(()) => info!("OI-ID {} takes id {}", message.data, message.conf),
                                Err(error) => error!("cannot take id {}: {}", message.conf, error),
                            }
                        }
                        0
                    }});
            },
        }
    }

    async fn receive_serial(&self) {
        debug!("run serial receiver");
        loop {
            match self.serial.receive_message(self.config.receive_timeout).await {
                Ok(envelope) => if let Err(error) = self.route_serial(envelope).await {
                    warn!("cannot answer command {:#04x}: {}", envelope.message.opcode, error);
                },
                Err(Error::Timeout) => {},
                Err(Error::Bus(error)) => {
                    error!("serial bus: {}", error);
                    tokio::time::sleep(RETRY_DELAY).await;
                },
                Err(error) => debug!("serial receive: {}", error),
            }
        }
    }

    async fn route_serial(&self, envelope: Envelope) -> Result<(), Error> {
        let id = self.identity.id();
        let message = envelope.message;
        if envelope.destination != id && envelope.destination != BROADCAST_ID
            {return Ok(())}
        if envelope.response {
            debug!("ignoring response {:#04x} from {}", message.opcode, message.id);
            return Ok(())
        }
        let broadcast = envelope.destination == BROADCAST_ID;

        match message.kind() {
            Kind::Set => {
                debug!("received set message {:#04x}", message.opcode);
                if ! broadcast {
                    let known = self.registry.exist(message);
                    let echo = Message::new(message.opcode, id, message.conf, 0);
                    self.serial.send_reply(echo, message.id, ! known).await?;
                }
                self.registry.run(message);
            },
            Kind::Get => {
                debug!("received get message {:#04x}", message.opcode);
                let result = self.registry.dispatch(message);
                if result.is_none()
                    {warn!("no handler for command {:#04x} from id {}", message.opcode, message.id)}
                if ! broadcast {
                    let reply = Message::new(message.opcode, id, message.conf, result.unwrap_or(0));
                    self.serial.send_reply(reply, message.id, result.is_none()).await?;
                }
            },
            Kind::Send => {
                debug!("received send message {:#04x}", message.opcode);
                self.registry.run(message);
            },
        }
        Ok(())
    }

    async fn receive_can(&self) {
        debug!("run can receiver");
        loop {
            match self.can.receive_message(self.config.receive_timeout).await {
                Ok(envelope) => {
                    let id = self.identity.id();
                    if envelope.destination != id && envelope.destination != BROADCAST_ID
                        {continue}
                    match envelope.message.kind() {
                        Kind::Send => {self.registry.run(envelope.message);},
                        _ => warn!("unknown can message {:#04x}", envelope.message.opcode),
                    }
                },
                Err(Error::Timeout) => {},
                Err(Error::Bus(error)) => {
                    error!("can bus: {}", error);
                    tokio::time::sleep(RETRY_DELAY).await;
                },
                Err(error) => debug!("can receive: {}", error),
            }
        }
    }
}

/// send a message over `can` from a synchronous handler, without waiting for it to leave
fn answer_over<C: Transport>(can: &Arc<Bus<C>>, message: Message, destination: u8) {
    let Ok(runtime) = tokio::runtime::Handle::try_current()
        else {return error!("no runtime to send {:#04x} to {}", message.opcode, destination)};
    let can = can.clone();
    runtime.spawn(async move {
        if let Err(error) = can.send_message(message, destination).await {
            error!("cannot send {:#04x} to {}: {}", message.opcode, destination, error);
        }
    });
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering::*};
    use crate::{
        can::CanBus,
        identity::MemoryStore,
        message::{set, get, send},
        serial::SerialBus,
        sim::{CanHub, Rail, SimCan, SimRx, SimTx},
        };

    type Node = System<SerialBus<SimRx, SimTx>, CanBus<SimCan>>;

    struct Fixed(u32);
    impl Board for Fixed {
        fn module_type(&self) -> u32 {7}
        fn read_oi_id(&self) -> u32 {self.0}
    }

    /// node with its serial write counter
    fn node(rail: &Rail, hub: &CanHub, config: SystemConfig, id: Option<u8>) -> (Arc<Node>, Arc<AtomicUsize>) {
        let (rx, tx) = rail.attach();
        let writes = tx.writes();
        let identity = Identity::new(MemoryStore::new());
        if let Some(id) = id
            {identity.set_hardware_id(id).unwrap()}
        let system = System::new(
            Bus::new(SerialBus::new(rx, tx)),
            Bus::new(CanBus::new(hub.attach())),
            identity,
            Fixed(1000),
            config.with_settle(Duration::from_millis(20)),
            );
        system.init().unwrap();
        (Arc::new(system), writes)
    }

    async fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0 .. 100 {
            if condition() {return true}
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        condition()
    }

    /// a coordinator with id 0 and a module with id 2, both started
    async fn pair() -> (Arc<Node>, Arc<Node>, Arc<AtomicUsize>) {
        let rail = Rail::new();
        let hub = CanHub::new();
        let (coordinator, _) = node(&rail, &hub, SystemConfig::coordinator(), Some(COORDINATOR_ID));
        let (module, writes) = node(&rail, &hub, SystemConfig::module(), Some(2));
        coordinator.start().await.unwrap();
        module.start().await.unwrap();
        (coordinator, module, writes)
    }

    #[tokio::test]
    async fn set_and_get_are_answered() {
        let (coordinator, module, _) = pair().await;
        let value = Arc::new(AtomicU32::new(0));
        module.registry().add(Message::new(set(0x01), 2, 0, 0), {
            let value = value.clone();
            move |message| {value.store(message.data, Relaxed); 0}
            });

        coordinator.serial().set_message(Message::new(set(0x01), 0, 0, 55), 2).await.unwrap();
        assert!(eventually(|| value.load(Relaxed) == 55).await);
        assert_eq!(coordinator.serial().get_message(Message::new(opcode::PING, 0, 0, 0), 2).await.unwrap(), 0xAA);
        assert_eq!(coordinator.serial().get_message(Message::new(opcode::GET_TYPE, 0, 0, 0), 2).await.unwrap(), 7);
        // nobody else answers for module 2
        assert!(matches!(
            coordinator.serial().get_message(Message::new(opcode::PING, 0, 0, 0), 3).await,
            Err(Error::NoReply {..}),
            ));
    }

    #[tokio::test]
    async fn unknown_commands_are_flagged() {
        let (coordinator, _module, _) = pair().await;
        assert!(matches!(
            coordinator.serial().set_message(Message::new(set(0x22), 0, 0, 0), 2).await,
            Err(Error::Remote(0x22)),
            ));
        assert!(matches!(
            coordinator.serial().get_message(Message::new(get(0x22), 0, 0, 0), 2).await,
            Err(Error::Remote(opcode)) if opcode == get(0x22),
            ));
    }

    #[tokio::test]
    async fn broadcasts_are_not_answered() {
        let (coordinator, module, writes) = pair().await;
        let runs = Arc::new(AtomicU32::new(0));
        for opcode in [set(0x01), get(0x01), send(0x01)] {
            module.registry().add(Message::new(opcode, 2, 0, 0), {
                let runs = runs.clone();
                move |_| {runs.fetch_add(1, Relaxed); 0}
                });
            coordinator.serial().send_message(Message::new(opcode, 0, 0, 0), BROADCAST_ID).await.unwrap();
        }
        assert!(eventually(|| runs.load(Relaxed) == 3).await);
        assert_eq!(writes.load(Relaxed), 0);
    }

    #[tokio::test]
    async fn can_only_runs_send_commands() {
        let (coordinator, module, _) = pair().await;
        let runs = Arc::new(AtomicU32::new(0));
        for opcode in [set(0x01), send(0x01)] {
            module.registry().add(Message::new(opcode, 2, 0, 0), {
                let runs = runs.clone();
                move |message| {runs.fetch_add(message.data, Relaxed); 0}
                });
        }
        coordinator.can().send_message(Message::new(set(0x01), 0, 0, 1), 2).await.unwrap();
        coordinator.can().send_message(Message::new(send(0x01), 0, 0, 10), 3).await.unwrap();
        coordinator.can().send_message(Message::new(send(0x01), 0, 0, 100), 2).await.unwrap();
        assert!(eventually(|| runs.load(Relaxed) != 0).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Relaxed), 100);
    }

    #[tokio::test]
    async fn types_are_discovered() {
        let (coordinator, _module, _) = pair().await;
        let types = coordinator.discover_types().await.unwrap();
        assert_eq!(types, BTreeMap::from([(2, 7)]));
    }

    #[tokio::test]
    async fn stopped_module_is_silent() {
        let (coordinator, module, _) = pair().await;
        let ping = Message::new(opcode::PING, 0, 0, 0);
        assert_eq!(coordinator.serial().get_message(ping, 2).await.unwrap(), 0xAA);
        module.stop();
        assert!(matches!(
            coordinator.serial().get_message(ping, 2).await,
            Err(Error::NoReply {..}),
            ));
    }

    #[tokio::test]
    async fn count_mismatch_skips_assignment() {
        let (coordinator, module, _) = pair().await;
        coordinator.add_submodule(1);
        coordinator.add_submodule(2);
        assert!(matches!(
            coordinator.automatic_id().await,
            Err(Error::ModuleCount {expected: 2, found: 1}),
            ));
        assert_eq!(coordinator.oi_ids(), [1000]);
        assert_eq!(coordinator.id(), COORDINATOR_ID);
        assert_eq!(module.id(), 2);
    }
}
