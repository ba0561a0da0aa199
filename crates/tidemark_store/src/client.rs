//! The client: configuration, shared state, and the store factory.

use crate::error::{StoreError, StoreResult};
use crate::offline::OfflineRepository;
use crate::options::{
    validate_tag, CollectionRef, PendingSyncPolicy, StoreMode, StoreOptions, SyncLimits,
};
use crate::processor::{CacheProcessor, DataProcessor, NetworkProcessor, SyncProcessor};
use crate::query_cache::QueryCache;
use crate::store::DataStore;
use crate::sync_manager::SyncManager;
use crate::sync_state::SyncStateManager;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tidemark_net::{
    ActiveUser, ActiveUserStore, AppCredentials, HttpClient, NetConfig, NetworkRepository,
    RequestExecutor,
};
use tidemark_persist::KeyValuePersister;

const DEFAULT_API_HOST: &str = "https://baas.kinvey.com";
const DEFAULT_AUTH_HOST: &str = "https://auth.kinvey.com";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The app key.
    pub app_key: String,
    /// The app secret.
    pub app_secret: String,
    /// The master secret, for elevated operations.
    pub master_secret: Option<String>,
    /// OAuth client id; defaults to the app key.
    pub client_id: Option<String>,
    /// Base URL of the data API.
    pub api_host: String,
    /// Base URL of the OAuth token endpoint host.
    pub auth_host: String,
    /// Default request timeout.
    pub timeout: Duration,
    /// Custom request properties forwarded on every request.
    pub custom_properties: Option<Value>,
    /// Client application version forwarded for server-side hooks.
    pub client_app_version: Option<String>,
    /// Sync concurrency limits and policies.
    pub limits: SyncLimits,
}

impl ClientConfig {
    /// Creates a configuration from an app key and secret.
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            master_secret: None,
            client_id: None,
            api_host: DEFAULT_API_HOST.into(),
            auth_host: DEFAULT_AUTH_HOST.into(),
            timeout: Duration::from_secs(60),
            custom_properties: None,
            client_app_version: None,
            limits: SyncLimits::default(),
        }
    }

    /// Sets the master secret.
    #[must_use]
    pub fn with_master_secret(mut self, secret: impl Into<String>) -> Self {
        self.master_secret = Some(secret.into());
        self
    }

    /// Sets the OAuth client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Points the client at a different API host.
    #[must_use]
    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    /// Points the client at a different auth host.
    #[must_use]
    pub fn with_auth_host(mut self, host: impl Into<String>) -> Self {
        self.auth_host = host.into();
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the custom request properties.
    #[must_use]
    pub fn with_custom_properties(mut self, properties: Value) -> Self {
        self.custom_properties = Some(properties);
        self
    }

    /// Sets the client app version header.
    #[must_use]
    pub fn with_client_app_version(mut self, version: impl Into<String>) -> Self {
        self.client_app_version = Some(version.into());
        self
    }

    /// Sets the pending-sync policy applied by pulls.
    #[must_use]
    pub fn with_pending_policy(mut self, policy: PendingSyncPolicy) -> Self {
        self.limits.pending_policy = policy;
        self
    }

    /// Sets the sync concurrency limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SyncLimits) -> Self {
        self.limits = limits;
        self
    }
}

struct ClientInner {
    app_key: String,
    executor: Arc<RequestExecutor>,
    offline: Arc<OfflineRepository>,
    sync_state: Arc<SyncStateManager>,
    query_cache: Arc<QueryCache>,
    sync_manager: Arc<SyncManager>,
    timeout: Duration,
}

/// The entry point of the SDK core.
///
/// A client owns the credentials, the persister, the HTTP transport, and
/// the shared local-state singletons (offline repository, sync state,
/// query cache, sync manager). [`Client::collection`] is the only way to
/// obtain a [`DataStore`]; every store handle created from one client
/// shares the same local state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client.
    ///
    /// Fails when the configuration is invalid (e.g. oversized custom
    /// request properties).
    pub fn new(
        config: ClientConfig,
        persister: Arc<dyn KeyValuePersister>,
        http: Arc<dyn HttpClient>,
    ) -> StoreResult<Self> {
        let mut credentials = AppCredentials::new(&config.app_key, &config.app_secret);
        if let Some(secret) = &config.master_secret {
            credentials = credentials.with_master_secret(secret);
        }
        if let Some(client_id) = &config.client_id {
            credentials = credentials.with_client_id(client_id);
        }

        let mut net_config =
            NetConfig::new(&config.api_host, &config.auth_host).with_timeout(config.timeout);
        if let Some(properties) = &config.custom_properties {
            net_config = net_config.with_custom_properties(properties);
        }
        if let Some(version) = &config.client_app_version {
            net_config = net_config.with_client_app_version(version);
        }

        let session = Arc::new(ActiveUserStore::new(&config.app_key, persister.clone()));
        let executor = Arc::new(RequestExecutor::new(net_config, credentials, http, session)?);

        let offline = Arc::new(OfflineRepository::new(&config.app_key, persister));
        let sync_state = Arc::new(SyncStateManager::new(offline.clone()));
        let query_cache = Arc::new(QueryCache::new(offline.clone()));
        let sync_manager = Arc::new(SyncManager::new(
            offline.clone(),
            sync_state.clone(),
            query_cache.clone(),
            Arc::new(NetworkRepository::new(executor.clone())),
            config.limits.clone(),
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                app_key: config.app_key,
                executor,
                offline,
                sync_state,
                query_cache,
                sync_manager,
                timeout: config.timeout,
            }),
        })
    }

    /// Returns the app key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.inner.app_key
    }

    /// Returns the active-user session store.
    #[must_use]
    pub fn session(&self) -> &Arc<ActiveUserStore> {
        self.inner.executor.session()
    }

    /// Returns the shared offline repository.
    #[must_use]
    pub fn offline(&self) -> &Arc<OfflineRepository> {
        &self.inner.offline
    }

    /// Returns the shared sync state manager.
    #[must_use]
    pub fn sync_state(&self) -> &Arc<SyncStateManager> {
        &self.inner.sync_state
    }

    /// Returns the shared query cache.
    #[must_use]
    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.inner.query_cache
    }

    /// Stores the active user.
    pub fn set_active_user(&self, user: &ActiveUser) -> StoreResult<()> {
        self.session().set(user).map_err(StoreError::from)
    }

    /// Loads the active user, if any.
    pub fn active_user(&self) -> StoreResult<Option<ActiveUser>> {
        self.session().get().map_err(StoreError::from)
    }

    /// Creates a store handle for a collection.
    ///
    /// This is the only store constructor. The collection name must be
    /// non-empty and must not contain `.` (reserved for tag namespacing);
    /// tags are validated per [`validate_tag`].
    pub fn collection(
        &self,
        name: &str,
        mode: StoreMode,
        options: StoreOptions,
    ) -> StoreResult<DataStore> {
        if name.is_empty() {
            return Err(StoreError::invalid("collection name must not be empty"));
        }
        if name.contains('.') {
            return Err(StoreError::invalid(
                "collection names must not contain '.'",
            ));
        }
        let collection = match &options.tag {
            Some(tag) => {
                validate_tag(tag)?;
                CollectionRef::tagged(name, tag.clone())
            }
            None => CollectionRef::new(name),
        };

        let network = Arc::new(
            NetworkRepository::new(self.inner.executor.clone())
                .with_file_ttl(options.ttl)
                .with_file_tls(options.file_tls)
                .with_timeout(options.timeout.or(Some(self.inner.timeout))),
        );

        let processor: Arc<dyn DataProcessor> = match mode {
            StoreMode::Network => Arc::new(NetworkProcessor::new(network, name)),
            StoreMode::Sync => Arc::new(SyncProcessor::new(
                self.inner.offline.clone(),
                self.inner.sync_state.clone(),
                collection.clone(),
            )),
            StoreMode::Cache => {
                let local = SyncProcessor::new(
                    self.inner.offline.clone(),
                    self.inner.sync_state.clone(),
                    collection.clone(),
                );
                Arc::new(CacheProcessor::new(
                    self.inner.offline.clone(),
                    network,
                    self.inner.sync_manager.clone(),
                    local,
                    collection.clone(),
                ))
            }
        };

        Ok(DataStore::new(
            collection,
            mode,
            processor,
            self.inner.offline.clone(),
            self.inner.sync_state.clone(),
            self.inner.query_cache.clone(),
            self.inner.sync_manager.clone(),
            options,
        ))
    }

    /// Empties every collection for this app key - entities, sync items
    /// and cached queries alike. The active-user slot is preserved, and
    /// the next delta-set pull falls back to a full fetch.
    pub fn clear_cache(&self) -> StoreResult<()> {
        self.inner.offline.clear(None)
    }
}
