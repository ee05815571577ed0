//! Drives one client session from the logic thread at a fixed tick rate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ark_config::NetworkConfig;
use ark_net::{
    ClientConfig, FrameConfig, NetError, NetEvent, PlayerId, SocketOptions, TcpClient,
};
use tracing::{info, warn};

/// Body sent by `--ping`.
pub const PING_BODY: &[u8] = b"PING";

/// Map the persisted network settings onto the session configuration.
pub fn client_config(network: &NetworkConfig) -> ClientConfig {
    ClientConfig {
        frame: FrameConfig {
            max_body_size: network.max_body_size,
        },
        recv_buffer_capacity: network.recv_buffer_capacity,
        socket: SocketOptions {
            tcp_nodelay: network.tcp_nodelay,
            keepalive: (network.keepalive_secs > 0)
                .then(|| Duration::from_secs(network.keepalive_secs)),
            ..SocketOptions::default()
        },
    }
}

/// Interval between ticks for a rate in Hz; a rate of 0 is treated as 1 Hz.
pub fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_secs(1) / tick_rate.max(1)
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Ticks executed.
    pub ticks: u64,
    /// Data frames dispatched.
    pub frames: u64,
}

/// Connect, optionally ping, then tick until the server closes the connection.
pub fn run(network: &NetworkConfig, ping: Option<u16>) -> Result<RunStats, NetError> {
    let frames = Arc::new(AtomicU64::new(0));
    let mut client = TcpClient::new(client_config(network));

    let frame_counter = Arc::clone(&frames);
    client.set_data_handler(move |header, message_id, body, id| {
        frame_counter.fetch_add(1, Ordering::Relaxed);
        info!(
            "Frame {message_id} on {id}: {} bytes from player {:#x}",
            body.len(),
            header.player_id.0
        );
    });
    client.set_event_handler(|event, id, target| match event {
        NetEvent::Connected => info!("Connected {id} to target {target}"),
        NetEvent::Disconnected => warn!("Disconnected {id} from target {target}"),
    });

    let id = client.start(
        network.target_id,
        &network.server_address,
        network.server_port,
        Duration::from_millis(network.connect_timeout_ms),
    )?;

    if let Some(message_id) = ping {
        client.send_message(message_id, PING_BODY, id, PlayerId::default())?;
        info!("Sent ping {message_id} on {id}");
    }

    let interval = tick_interval(network.tick_rate);
    let mut ticks = 0;
    while client.connection_id().is_some() {
        let started = Instant::now();
        client.tick();
        ticks += 1;
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    client.shutdown();
    Ok(RunStats {
        ticks,
        frames: frames.load(Ordering::Relaxed),
    })
}
