use log::info;
use pulse::{net, Pulse, HOST, PULSE_PORT};

fn main() -> Result<(), pulse::Error> {
    pulse::logging::setup_logger().expect("setting up logging with fern failed");

    let dest = net::resolve_v4(HOST, PULSE_PORT)?;
    let message = Pulse::default();
    net::send_pulse(&message, dest)?;

    info!("Sent message {message} to {HOST}:{PULSE_PORT}");

    Ok(())
}
