// TCP server

use std::{net::IpAddr, sync::Arc};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::mpsc::Sender,
};

use crate::log::Logger;

use super::{handle_connection, RtmpServerContextExtended};

/// Run the TCP server
pub fn tcp_server(logger: Arc<Logger>, server_context: RtmpServerContextExtended, end_notifier: Sender<()>) {
    tokio::spawn(async move {
        let listen_addr = server_context.config.get_tcp_listen_addr();

        let listener = match TcpListener::bind(&listen_addr).await {
            Ok(l) => l,
            Err(e) => {
                logger.log_error(&format!("Could not create TCP listener: {}", e));
                let _ = end_notifier.send(()).await;
                return;
            }
        };

        logger.log_info(&format!("Listening on {}", listen_addr));

        loop {
            match listener.accept().await {
                Ok((connection, addr)) => {
                    handle_connection_tcp(connection, addr.ip(), server_context.clone(), logger.clone());
                }
                Err(e) => {
                    logger.log_error(&format!("Could not accept connection: {}", e));
                    let _ = end_notifier.send(()).await;
                    return;
                }
            }
        }
    });
}

fn handle_connection_tcp(
    mut connection: TcpStream,
    ip: IpAddr,
    server_context: RtmpServerContextExtended,
    logger: Arc<Logger>,
) {
    tokio::spawn(async move {
        let is_exempted = server_context
            .config
            .max_concurrent_connections_whitelist
            .contains(&ip);

        let should_accept = if is_exempted {
            true
        } else {
            let mut ip_counter = server_context.ip_counter.lock().await;
            ip_counter.add(&ip)
        };

        if should_accept {
            let (read_half, write_half) = connection.split();
            handle_connection(logger.clone(), server_context.clone(), read_half, write_half, ip).await;

            let _ = connection.shutdown().await;

            if !is_exempted {
                let mut ip_counter = server_context.ip_counter.lock().await;
                ip_counter.remove(&ip);
            }
        } else {
            if server_context.config.log_requests {
                logger.log_info(&format!("Rejected connection from {} due to connection limit", ip));
            }
            let _ = connection.shutdown().await;
        }
    });
}
