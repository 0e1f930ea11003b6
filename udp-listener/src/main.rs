use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use pulse::net::{self, Listener};
use pulse::{HOST, LISTEN_PORT};

fn main() -> Result<(), pulse::Error> {
    pulse::logging::setup_logger().expect("setting up logging with fern failed");

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .expect("installing the Ctrl-C handler failed");

    let mut listener = Listener::bind(net::resolve_v4(HOST, LISTEN_PORT)?)?;

    info!("Starting to listen at {HOST}:{LISTEN_PORT}.");
    listener.run(&stop, |_, value| println!("{value}"))?;
    info!("User exit.");

    Ok(())
}
