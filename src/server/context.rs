// Context types to group parameters

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dispatch::ApplicationRegistry;

use super::{IpConnectionCounter, RtmpServerConfiguration, SessionIdGenerator};

/// Everything a connection needs to be handled, bundled for passing down from the
/// accept loop
#[derive(Clone)]
pub struct RtmpServerContext {
    /// Server configuration
    pub config: Arc<RtmpServerConfiguration>,

    /// Applications, keyed by name, consulted on `connect`/`publish`
    pub applications: Arc<ApplicationRegistry>,
}

/// [`RtmpServerContext`] plus the per-listener bookkeeping that doesn't belong on a
/// per-connection clone
#[derive(Clone)]
pub struct RtmpServerContextExtended {
    /// Server configuration
    pub config: Arc<RtmpServerConfiguration>,

    /// Applications, keyed by name, consulted on `connect`/`publish`
    pub applications: Arc<ApplicationRegistry>,

    /// IP counter
    pub ip_counter: Arc<Mutex<IpConnectionCounter>>,

    /// Session ID generator
    pub session_id_generator: Arc<Mutex<SessionIdGenerator>>,
}
