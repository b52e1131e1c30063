//! Session lifecycle: the entry point for connecting to a grid.

use std::sync::Arc;

use gridmap_core::{GridError, Result, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::connection::Channel;
use crate::proxy::NamedMap;

/// A connection to one grid endpoint.
///
/// The session owns the single multiplexed channel every map facade shares.
/// Closing the session fails all in-flight calls and releases the maps'
/// event streams; facades obtained from a closed session fail on use.
///
/// # Example
///
/// ```rust,no_run
/// use gridmap_client::{Session, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = Session::connect(SessionConfig::builder().build()?).await?;
///
///     let map = session.get_map::<String, String>("greetings");
///     map.put(&"hello".to_string(), &"world".to_string()).await?;
///
///     session.close();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Session {
    channel: Arc<Channel>,
    config: SessionConfig,
    serializer: Serializer,
}

impl Session {
    /// Connects to the endpoint in `config`.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let channel = Channel::connect(&config).await?;
        let serializer = Serializer::new(config.format());
        tracing::debug!(address = %config.address(), "session established");
        Ok(Self {
            channel: Arc::new(channel),
            config,
            serializer,
        })
    }

    /// Builds a session over an established channel.
    ///
    /// Exposed for tests that drive the protocol over an in-process socket.
    pub fn from_channel(channel: Channel, config: SessionConfig) -> Self {
        let serializer = Serializer::new(config.format());
        Self {
            channel: Arc::new(channel),
            config,
            serializer,
        }
    }

    /// Returns this session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns a facade over the named server-held map.
    ///
    /// Facades are cheap; calling this twice for one name yields independent
    /// handles over independent event streams.
    pub fn get_map<K, V>(&self, name: &str) -> NamedMap<K, V>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        NamedMap::new(
            Arc::clone(&self.channel),
            self.config.scope(),
            name,
            self.serializer.clone(),
        )
    }

    /// Returns a facade over the named server-held cache.
    ///
    /// Identical to [`get_map`](Session::get_map); kept for callers that
    /// think in NamedCache terms.
    pub fn get_cache<K, V>(&self, name: &str) -> NamedMap<K, V>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.get_map(name)
    }

    /// Returns `true` once the session is closed or its transport broke.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Closes the session. In-flight calls fail with `Cancelled`; further
    /// calls fail with an illegal-state error.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Fails when the session can no longer issue requests.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GridError::IllegalState("session is closed".to_string()));
        }
        Ok(())
    }
}
