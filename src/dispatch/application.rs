// Application hooks: the external collaborator consulted for publish authorization

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::named_stream::NamedStreamRegistry;

/// An RTMP application (the path component of a publish/play URL up to the stream
/// name). Holds the named-stream registry for everything published under it and is
/// consulted before a publish is accepted.
pub trait Application: Send + Sync {
    fn streams(&self) -> &NamedStreamRegistry;

    /// Authorization hook for an incoming publish. Recording, transcoding, and auth
    /// policy live entirely behind this call; the core only honors its answer.
    fn on_publish(&self, client_id: u64, stream_name: &str) -> bool;

    /// Notified once a publisher's binding is torn down (`closeStream` or connection
    /// loss).
    fn on_unpublish(&self, client_id: u64, stream_name: &str);
}

/// An application with no authorization policy: every publish is accepted. Used as
/// the default when no application-specific hook is wired in.
#[derive(Default)]
pub struct OpenApplication {
    streams: NamedStreamRegistry,
}

impl OpenApplication {
    pub fn new() -> OpenApplication {
        OpenApplication::default()
    }
}

impl Application for OpenApplication {
    fn streams(&self) -> &NamedStreamRegistry {
        &self.streams
    }

    fn on_publish(&self, _client_id: u64, _stream_name: &str) -> bool {
        true
    }

    fn on_unpublish(&self, _client_id: u64, _stream_name: &str) {}
}

/// Registry of applications by name, as named in a publish/play URL
/// (`rtmp://host/appName/streamName`).
#[derive(Default)]
pub struct ApplicationRegistry {
    applications: Mutex<HashMap<String, Arc<dyn Application>>>,
}

impl ApplicationRegistry {
    pub fn new() -> ApplicationRegistry {
        ApplicationRegistry::default()
    }

    /// Returns the application registered under `name`, creating an `OpenApplication`
    /// on first reference if none was explicitly registered.
    pub async fn get_application(&self, name: &str) -> Arc<dyn Application> {
        let mut apps = self.applications.lock().await;

        apps.entry(name.to_string())
            .or_insert_with(|| Arc::new(OpenApplication::new()))
            .clone()
    }

    pub async fn register(&self, name: &str, app: Arc<dyn Application>) {
        let mut apps = self.applications.lock().await;
        apps.insert(name.to_string(), app);
    }
}
