use std::{
    sync::Arc,
    time::Duration,
    };
use pmlin::{
    BusyMutex,
    catalog::{Declaration, Direction},
    master::{Master, Mirror, SerialTransport},
    };

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    // devices expected on the bus, one output module at address 1
    let output = Declaration::new(1, 2)
        .message(0, Direction::ToMaster, 2)
        .message(1, Direction::ToSlave, 2);
    // initialize a master on some uart port
    let master = Master::new(SerialTransport::open_default("/dev/ttyUSB0").unwrap());
    master.define_devices(&[output]).await.unwrap();
    println!("auto configuration: {:?}", master.auto_config().await.unwrap());

    let status = Arc::new(BusyMutex::new(vec![0; 2]));
    let control = Arc::new(BusyMutex::new(vec![0; 2]));
    master.define_mirroring([
        Mirror::new(1, 0, status.clone(), 10, 0),
        Mirror::new(1, 1, control.clone(), 1, 0),
        ]).await;

    for tick in 0 .. 100u32 {
        // blink the output
        control.lock().await[0] = (tick / 10 % 2) as u8;
        if let Err(failure) = master.mirror_tick().await {
            println!("{}", failure);
        }
        if tick % 10 == 1 {
            println!("status: {:?}", &status.lock().await[..]);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
