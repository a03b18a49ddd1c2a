// Connection handling logic

use std::{net::IpAddr, sync::Arc};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    dispatch::{Connection, ConnectionContext},
    log::Logger,
};

use super::RtmpServerContextExtended;

const READ_BUFFER_SIZE: usize = 4096;

/// Handles an incoming connection, from the moment it's accepted until it's closed.
///
/// # Arguments
///
/// * `logger` - The server logger
/// * `server_context` - The server context
/// * `read_stream` - The stream to read from the client
/// * `write_stream` - The stream to write to the client
/// * `ip` - The client IP address
pub async fn handle_connection<
    TR: AsyncRead + AsyncReadExt + Send + Sync + Unpin,
    TW: AsyncWrite + AsyncWriteExt + Send + Sync + Unpin,
>(
    logger: Arc<Logger>,
    server_context: RtmpServerContextExtended,
    mut read_stream: TR,
    mut write_stream: TW,
    ip: IpAddr,
) {
    let session_id = {
        let mut generator = server_context.session_id_generator.lock().await;
        generator.generate_id()
    };

    let session_logger = logger.make_child_logger(&format!("[#{}] ", session_id));

    if server_context.config.log_requests {
        session_logger.log_info(&format!("Connection accepted from {}", ip));
    }

    let mut connection = Connection::new_server(
        session_id,
        ConnectionContext {
            applications: server_context.applications.clone(),
            logger: session_logger.make_child_logger(""),
            initial_frame_size: server_context.config.initial_frame_size,
        },
    );

    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read_res = read_stream.read(&mut read_buf).await;

        let n = match read_res {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                session_logger.log_debug(&format!("Read error: {}", e));
                break;
            }
        };

        let reply = match connection.data_received(&read_buf[..n]).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_fatal() {
                    session_logger.log_debug(&format!("Closing connection: {}", e));
                    break;
                }
                session_logger.log_warning(&format!("Non-fatal protocol error: {}", e));
                continue;
            }
        };

        if !reply.is_empty() && write_stream.write_all(&reply).await.is_err() {
            break;
        }
    }

    if server_context.config.log_requests {
        session_logger.log_info("Connection closed");
    }
}
