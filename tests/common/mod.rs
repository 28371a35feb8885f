#![allow(dead_code)]

use std::{
    sync::Arc,
    time::Duration,
    };

use pmlin::{
    master::*,
    slave::Slave,
    emulator::*,
    };


pub type DemoMaster = Master<PartyLine<DemoDevice>>;

/// run a test against a master connected to the given emulated slaves
pub fn test<T, F>(slaves: impl IntoIterator<Item=Slave<DemoDevice>>, test: T)
where
    T: FnOnce(Arc<DemoMaster>) -> F,
    F: Future,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let master = Arc::new(Master::new(PartyLine::new(slaves)));
    tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .expect("failed to create runtime")
    .block_on(async move {
        tokio::time::timeout(Duration::from_secs(10), test(master))
        .await.expect("aborted test because took too long");
    });
}

/// addresses of all emulated slaves, sorted
pub async fn addresses(master: &DemoMaster) -> Vec<u8> {
    master.with_transport(|line| {
        let mut addresses = line.slaves().iter()
            .map(|slave| slave.address())
            .collect::<Vec<_>>();
        addresses.sort();
        addresses
    }).await
}
