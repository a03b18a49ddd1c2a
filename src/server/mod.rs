// RTMP server

mod config;
mod connection_handle;
mod context;
mod ip_count;
mod session_id_generator;
mod tcp;

use std::sync::Arc;

pub use config::*;
pub use connection_handle::*;
pub use context::*;
pub use ip_count::*;
pub use session_id_generator::*;
pub use tcp::*;

use tokio::sync::Mutex;

use crate::{dispatch::ApplicationRegistry, log::Logger};

/// Runs the RTMP server until its listener dies
pub async fn run_server(
    logger: Logger,
    config: Arc<RtmpServerConfiguration>,
    applications: Arc<ApplicationRegistry>,
) {
    let ip_counter = Arc::new(Mutex::new(IpConnectionCounter::new(config.as_ref())));
    let session_id_generator = Arc::new(Mutex::new(SessionIdGenerator::new()));

    let server_context = RtmpServerContextExtended {
        config: config.clone(),
        applications,
        ip_counter,
        session_id_generator,
    };

    let (end_notifier, mut end_receiver) = tokio::sync::mpsc::channel::<()>(1);

    tcp_server(
        Arc::new(logger.make_child_logger("[SERVER:TCP] ")),
        server_context,
        end_notifier,
    );

    end_receiver
        .recv()
        .await
        .expect("could not receive signal from TCP server task");
}
