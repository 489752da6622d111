//! Process orchestration: store, backend and handlers under one lifecycle.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use focalors_runtime::FocalorsRuntime;
//!
//! let runtime = FocalorsRuntime::builder()
//!     .config_file("focalors.toml")
//!     .profile("production")
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ConfigLoader, FocalorsConfig, StoreConfig, StoreKind};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use focalors_adapter_onebot::OneBotBackend;
use focalors_clients::{
    DalleClient, GifClient, GptClient, JandanClient, RandomAbyssClient, SystemClient,
};
use focalors_core::{BoxedBackend, BoxedClient, ClientError};
use focalors_framework::{AccessManagerFactory, Program, ShutdownReport};
use focalors_store::Store;

/// Builds the store named by the configuration. Nothing is connected yet.
pub fn build_store(config: &StoreConfig) -> RuntimeResult<Store> {
    match config.backend {
        StoreKind::Memory => {
            warn!("Using the in-memory store; state is lost on restart");
            Ok(Store::memory())
        }
        #[cfg(feature = "redis")]
        StoreKind::Redis => Ok(Store::new(focalors_store::RedisStore::new(
            config.redis_uri.clone(),
        ))),
        #[cfg(not(feature = "redis"))]
        StoreKind::Redis => Err(ConfigError::validation(
            "store.backend is 'redis' but redis support is not compiled in",
        )
        .into()),
    }
}

/// Constructs the configured handlers, in order, around `backend`.
///
/// Every handler gets its own access topic from one shared factory.
pub fn build_program(
    config: &FocalorsConfig,
    store: &Store,
    backend: BoxedBackend,
    shutdown: CancellationToken,
) -> RuntimeResult<Program> {
    let access = AccessManagerFactory::new(
        store.clone(),
        backend.clone(),
        config.master_id().map(str::to_string),
    );

    let mut clients: Vec<BoxedClient> = Vec::with_capacity(config.clients.len());
    for name in &config.clients {
        let client: BoxedClient = match name.as_str() {
            "system" => Arc::new(SystemClient::new(
                backend.clone(),
                access.make(SystemClient::TOPIC),
                shutdown.clone(),
            )),
            "abyss" => Arc::new(RandomAbyssClient::new(
                backend.clone(),
                access.make(RandomAbyssClient::TOPIC),
                store.clone(),
            )),
            "dalle" => Arc::new(
                DalleClient::new(
                    config.openai.clone(),
                    backend.clone(),
                    access.make(DalleClient::TOPIC),
                )
                .map_err(|e| client_error(name, e))?,
            ),
            "gpt" => Arc::new(GptClient::new(
                config.openai.clone(),
                backend.clone(),
                access.make(GptClient::TOPIC),
                store.clone(),
            )),
            "jandan" => Arc::new(
                JandanClient::new(
                    config.jandan.clone(),
                    backend.clone(),
                    access.make(JandanClient::TOPIC),
                    store.clone(),
                )
                .map_err(|e| client_error(name, e))?,
            ),
            "gif" => Arc::new(GifClient::new(backend.clone()).map_err(|e| client_error(name, e))?),
            other => {
                return Err(ConfigError::validation(format!("Unknown client '{other}'")).into());
            }
        };
        debug!(client = %name, "Client constructed");
        clients.push(client);
    }

    Ok(Program::new(backend, clients))
}

fn client_error(name: &str, source: ClientError) -> RuntimeError {
    RuntimeError::Client {
        name: name.to_string(),
        source,
    }
}

/// A configured Focalors process.
pub struct FocalorsRuntime {
    config: FocalorsConfig,
    store: Store,
    program: Program,
    shutdown: CancellationToken,
}

impl FocalorsRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Initializes logging, then builds the store, the OneBot backend and
    /// every configured handler.
    pub fn from_config(config: FocalorsConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let store = build_store(&config.store)?;
        let backend: BoxedBackend =
            Arc::new(OneBotBackend::new(config.backend.clone(), store.clone()));

        info!(
            log_level = %config.logging.level,
            store = ?config.store.backend,
            url = %config.backend.url,
            "Runtime initialized from configuration"
        );

        Self::with_backend(config, store, backend)
    }

    /// Builds the runtime around an existing store and backend.
    pub fn with_backend(
        config: FocalorsConfig,
        store: Store,
        backend: BoxedBackend,
    ) -> RuntimeResult<Self> {
        let shutdown = CancellationToken::new();
        let program = build_program(&config, &store, backend, shutdown.clone())?;
        Ok(Self {
            config,
            store,
            program,
            shutdown,
        })
    }

    pub fn config(&self) -> &FocalorsConfig {
        &self.config
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Cancelling this token makes [`run`](Self::run) shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connects the store, then starts the program and waits for the first
    /// successful group listing.
    ///
    /// Fails with [`RuntimeError::StartupTimeout`] when the backend is not
    /// ready within `backend.startup_timeout_secs`.
    pub async fn start(&self) -> RuntimeResult<()> {
        self.store.start().await?;
        info!("Store connected");

        let limit = self.config.backend.startup_timeout();
        match tokio::time::timeout(limit, self.wait_ready()).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?limit, "Backend did not become ready");
                Err(RuntimeError::StartupTimeout(limit))
            }
        }
    }

    async fn wait_ready(&self) -> RuntimeResult<()> {
        self.program.start().await?;
        let backend = self.program.backend();
        let poll = self.config.backend.startup_poll_interval();
        loop {
            match backend.get_groups(false).await {
                Ok(groups) => {
                    info!(groups = groups.len(), "Backend ready");
                    return Ok(());
                }
                Err(e) => {
                    debug!(error = %e, "Backend not ready yet");
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Stops the program, then disconnects the store.
    pub async fn stop(&self) -> ShutdownReport {
        info!("Stopping Focalors");
        let report = self.program.stop().await;
        if !report.is_clean() {
            warn!(failures = ?report.failures, "Shutdown finished with failures");
        }
        if let Err(e) = self.store.stop().await {
            warn!(error = %e, "Store did not disconnect cleanly");
        }
        info!("Focalors stopped");
        report
    }

    /// Runs until Ctrl+C, SIGTERM or the shutdown token fires.
    pub async fn run(&self) -> RuntimeResult<ShutdownReport> {
        self.run_until(wait_for_signal()).await
    }

    /// Runs until `signal` completes or the shutdown token fires.
    pub async fn run_until<F>(&self, signal: F) -> RuntimeResult<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            self.stop().await;
            return Err(e);
        }

        info!("Focalors is now running. Press Ctrl+C to stop.");

        tokio::select! {
            () = signal => {}
            () = self.shutdown.cancelled() => {
                info!("Shutdown requested from chat");
            }
        }

        Ok(self.stop().await)
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`FocalorsRuntime`] loaded through [`ConfigLoader`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Overrides one dotted key, e.g. `("logging.level", "debug")`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<FocalorsRuntime> {
        let config = self.config_loader.load()?;
        FocalorsRuntime::from_config(config)
    }

    /// Loads and validates the configuration without building anything.
    pub fn load_config(self) -> RuntimeResult<FocalorsConfig> {
        Ok(self.config_loader.load()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use focalors_core::{
        Backend, BackendError, BackendResult, FileDescriptor, FriendInfo, GroupInfo, Message,
        SelfInfo, Subscriber, Target, async_trait,
    };
    use focalors_framework::ClientState;
    use focalors_framework::testing::MockBackend;

    fn config(clients: &[&str]) -> FocalorsConfig {
        let mut config = FocalorsConfig::default();
        config.master_id = Some("boss".into());
        config.store.backend = StoreKind::Memory;
        config.clients = clients.iter().map(|c| c.to_string()).collect();
        config
    }

    /// A backend whose `start` never completes.
    struct HangingBackend;

    #[async_trait]
    impl Backend for HangingBackend {
        fn self_info(&self) -> BackendResult<SelfInfo> {
            Err(BackendError::NotStarted)
        }

        async fn start(&self) -> BackendResult<()> {
            std::future::pending().await
        }

        async fn stop(&self) -> BackendResult<()> {
            Ok(())
        }

        fn subscribe(&self, _subscriber: Subscriber) {}

        async fn send(&self, _message: &Message, _target: &Target) -> BackendResult<bool> {
            Err(BackendError::NotStarted)
        }

        async fn get_friends(&self, _with_avatar: bool) -> BackendResult<Vec<FriendInfo>> {
            Err(BackendError::NotStarted)
        }

        async fn get_groups(&self, _with_avatar: bool) -> BackendResult<Vec<GroupInfo>> {
            Err(BackendError::NotStarted)
        }

        async fn get_group_members(
            &self,
            _group_id: &str,
        ) -> BackendResult<HashMap<String, String>> {
            Err(BackendError::NotStarted)
        }

        async fn get_friend(
            &self,
            _user_id: &str,
            _group_id: Option<&str>,
        ) -> BackendResult<FriendInfo> {
            Err(BackendError::NotStarted)
        }

        async fn upload_file(&self, _file: FileDescriptor) -> BackendResult<String> {
            Err(BackendError::NotStarted)
        }

        async fn download_image(&self, _message_id: &str) -> BackendResult<String> {
            Err(BackendError::NotStarted)
        }
    }

    #[test]
    fn test_build_program_keeps_order() {
        let backend = MockBackend::new();
        let program = build_program(
            &config(&["gpt", "system", "abyss"]),
            &Store::memory(),
            backend,
            CancellationToken::new(),
        )
        .unwrap();
        let names: Vec<_> = program.states().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["gpt", "system", "abyss"]);
    }

    #[test]
    fn test_build_program_rejects_unknown_client() {
        let result = build_program(
            &config(&["system", "weather"]),
            &Store::memory(),
            MockBackend::new(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_store_needs_feature() {
        let store = StoreConfig {
            backend: StoreKind::Redis,
            ..Default::default()
        };
        assert!(build_store(&store).is_err());
    }

    #[tokio::test]
    async fn test_start_activates_clients() {
        let backend = MockBackend::new();
        let runtime =
            FocalorsRuntime::with_backend(config(&["system", "abyss"]), Store::memory(), backend.clone())
                .unwrap();
        tokio_test::assert_ok!(runtime.start().await);

        assert_eq!(backend.start_calls(), 1);
        assert!(backend.list_calls() >= 1);
        assert!(
            runtime
                .program()
                .states()
                .iter()
                .all(|(_, state)| *state == ClientState::Active)
        );

        let report = runtime.stop().await;
        assert!(report.is_clean());
        assert_eq!(backend.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout() {
        let mut config = config(&["system"]);
        config.backend.startup_timeout_secs = 2;
        let runtime =
            FocalorsRuntime::with_backend(config, Store::memory(), Arc::new(HangingBackend)).unwrap();

        let result = runtime.start().await;
        assert!(matches!(
            result,
            Err(RuntimeError::StartupTimeout(d)) if d == Duration::from_secs(2)
        ));
    }

    #[tokio::test]
    async fn test_chat_shutdown_ends_run() {
        let backend = MockBackend::new();
        let runtime = Arc::new(
            FocalorsRuntime::with_backend(config(&["system"]), Store::memory(), backend.clone())
                .unwrap(),
        );

        let task = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run_until(std::future::pending()).await }
        });

        while backend.list_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(backend.emit(Message::from("/shutdown"), Target::private("boss")).await);

        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(runtime.shutdown_token().is_cancelled());
        assert!(report.stopped.contains(&"system".to_string()));
    }

    #[tokio::test]
    async fn test_run_until_signal() {
        let backend = MockBackend::new();
        let runtime =
            FocalorsRuntime::with_backend(config(&["system"]), Store::memory(), backend.clone())
                .unwrap();
        let report = runtime.run_until(async {}).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(backend.stop_calls(), 1);
    }
}
