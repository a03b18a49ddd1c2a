// RTMP server configuration

use std::net::IpAddr;

use crate::{
    log::Logger,
    rtmp::{RTMP_DEFAULT_FRAME_SIZE, RTMP_MAX_CHUNK_SIZE, RTMP_MIN_CHUNK_SIZE, RTMP_PORT_DEFAULT},
    utils::{get_env_bool, get_env_string, get_env_u32},
};

const MAX_PORT: u32 = 65535;

/// RTMP server configuration, loaded once at startup from the process environment.
#[derive(Clone)]
pub struct RtmpServerConfiguration {
    /// TCP port to listen on
    pub port: u32,

    /// Bind address
    pub bind_address: String,

    /// Frame size advertised to the client via a FRAME_SIZE event right after the
    /// handshake completes
    pub initial_frame_size: u32,

    /// Max number of concurrent connections per IP address
    pub max_concurrent_connections_per_ip: u32,

    /// Exact IP addresses exempt from the per-IP connection limit
    pub max_concurrent_connections_whitelist: Vec<IpAddr>,

    /// True to log each accepted/rejected connection
    pub log_requests: bool,
}

impl RtmpServerConfiguration {
    /// Loads configuration from environment variables
    pub fn load_from_env(logger: &Logger) -> Result<RtmpServerConfiguration, ()> {
        let port = get_env_u32("RTMP_PORT", RTMP_PORT_DEFAULT);

        if port == 0 || port > MAX_PORT {
            logger.log_error(&format!("RTMP_PORT has an invalid value: {}", port));
            return Err(());
        }

        let bind_address = get_env_string("BIND_ADDRESS", "0.0.0.0");

        let initial_frame_size = get_env_u32("RTMP_FRAME_SIZE", RTMP_DEFAULT_FRAME_SIZE);

        if !(RTMP_MIN_CHUNK_SIZE as u32..=RTMP_MAX_CHUNK_SIZE as u32).contains(&initial_frame_size)
        {
            logger.log_error(&format!(
                "RTMP_FRAME_SIZE has an invalid value: {}. Min: {}. Max: {}",
                initial_frame_size, RTMP_MIN_CHUNK_SIZE, RTMP_MAX_CHUNK_SIZE
            ));
            return Err(());
        }

        let max_concurrent_connections_per_ip = get_env_u32("MAX_IP_CONCURRENT_CONNECTIONS", 8);

        let max_concurrent_connections_whitelist =
            parse_ip_whitelist(&get_env_string("CONCURRENT_LIMIT_WHITELIST", ""));

        let log_requests = get_env_bool("LOG_REQUESTS", true);

        Ok(RtmpServerConfiguration {
            port,
            bind_address,
            initial_frame_size,
            max_concurrent_connections_per_ip,
            max_concurrent_connections_whitelist,
            log_requests,
        })
    }

    /// Address to bind the TCP listener to
    pub fn get_tcp_listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Parses a comma-separated list of IP addresses exempt from the connection limit.
/// Malformed entries are skipped rather than failing configuration load.
fn parse_ip_whitelist(raw: &str) -> Vec<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}
