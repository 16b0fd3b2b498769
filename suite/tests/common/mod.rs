#![allow(unused)]

use std::{
    sync::{Arc, atomic::{AtomicUsize, Ordering::*}},
    time::Duration,
    };
use futures_concurrency::future::Race;

use railbus::{
    bus::Bus,
    can::CanBus,
    identity::{Identity, KeyValueStore},
    serial::SerialBus,
    sim::{CanHub, Rail, SimCan, SimRx, SimTx},
    system::{Board, System, SystemConfig},
    };


pub type Node = System<SerialBus<SimRx, SimTx>, CanBus<SimCan>>;

/// run a scenario on a fresh runtime, next to a peer running forever
pub fn test<T, P>(scenario: T, peer: P)
where
    T: Future,
    P: Future,
{
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        (
            async {
                tokio::time::timeout(Duration::from_secs(10), scenario)
                .await.expect("aborted test because took too long");
            },
            async {
                peer.await;
                peer_stopped();
            },
        ).race().await;
    });
}

fn peer_stopped() {
    panic!("peer stopped before the scenario")
}

/// board with a fixed OI-ID reading
pub struct Fixed {
    pub kind: u32,
    pub oi_id: u32,
}
impl Board for Fixed {
    fn module_type(&self) -> u32 {self.kind}
    fn read_oi_id(&self) -> u32 {self.oi_id}
}

/// node plugged on both buses, initialized but not started, with its serial write counter
pub fn node(rail: &Rail, hub: &CanHub, store: impl KeyValueStore, board: Fixed, config: SystemConfig) -> (Arc<Node>, Arc<AtomicUsize>) {
    let (rx, tx) = rail.attach();
    let writes = tx.writes();
    let system = System::new(
        Bus::new(SerialBus::new(rx, tx)),
        Bus::new(CanBus::new(hub.attach())),
        Identity::new(store),
        board,
        config.with_settle(Duration::from_millis(50)),
        );
    system.init().expect("node initialization failed");
    (Arc::new(system), writes)
}

/// wait for a condition to become true, giving up after a second
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0 .. 1000 {
        if condition() {return true}
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

pub fn count(writes: &AtomicUsize) -> usize {writes.load(Relaxed)}
