use crate::config::SurgeConfig;
use crate::entity::TickId;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::coordinator::{JoinError, Server};
use crate::server::rules::GameRules;
use crate::transport::ConnectionProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Cloneable facade over the shared server, handed to transports and
/// rule-external code. Every call locks the server for its duration, so
/// acknowledgement handling can never interleave with an in-flight tick.
pub struct ServerHandle<R: GameRules> {
    inner: Arc<Mutex<Server<R>>>,
}

impl<R: GameRules> Clone for ServerHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: GameRules> ServerHandle<R> {
    /// Register a joining client with its outgoing message channel.
    pub async fn client_connected(
        &self,
        name: &str,
        sender: UnboundedSender<ServerMessage<R::Event>>,
    ) -> Result<(), JoinError> {
        self.inner.lock().await.add_client(name, sender)
    }

    pub async fn client_disconnected(&self, name: &str) {
        self.inner.lock().await.remove_client(name);
    }

    /// Route one inbound client message.
    pub async fn receive(&self, client: &str, message: ClientMessage<R::Command>) {
        self.inner.lock().await.receive_message(client, message);
    }

    pub async fn send_event(&self, client: Option<&str>, event: R::Event) {
        self.inner.lock().await.send_event(client, event);
    }

    /// Run arbitrary code against the locked server (entity mutation,
    /// recalculation requests, inspection).
    pub async fn with_server<T>(&self, f: impl FnOnce(&mut Server<R>) -> T) -> T {
        f(&mut *self.inner.lock().await)
    }
}

/// Owns the shared server, its tick timer, and the connection providers.
///
/// The tick task is the only place ticks originate; pausing aborts the
/// timer without touching replication state, so resuming continues the
/// same streaming cursors.
pub struct ServerHost<R: GameRules> {
    inner: Arc<Mutex<Server<R>>>,
    tick_interval: Duration,
    epoch: Instant,
    tick_task: Option<JoinHandle<()>>,
    providers: Vec<Box<dyn ConnectionProvider<R>>>,
}

impl<R: GameRules> ServerHost<R> {
    pub fn new(rules: R, config: SurgeConfig) -> Self {
        let tick_interval = Duration::from_millis(config.server.tick_interval_ms.max(1));

        Self {
            inner: Arc::new(Mutex::new(Server::new(rules, config.server))),
            tick_interval,
            epoch: Instant::now(),
            tick_task: None,
            providers: Vec::new(),
        }
    }

    pub fn handle(&self) -> ServerHandle<R> {
        ServerHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn ConnectionProvider<R>>) {
        self.providers.push(provider);
    }

    /// Fire the startup hook, connect every provider, and start ticking.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.inner.lock().await.start();

        let handle = self.handle();
        for provider in &mut self.providers {
            let session = provider.connect(handle.clone())?;
            info!(session = %session, "connection provider attached");
        }

        self.resume();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.tick_task.is_some()
    }

    /// Start the tick timer if it is not already running.
    pub fn resume(&mut self) {
        if self.tick_task.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let epoch = self.epoch;
        let interval = self.tick_interval;

        self.tick_task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; consume it
            // so ticks start one interval from now.
            timer.tick().await;

            let mut last_tick = Instant::now();

            loop {
                timer.tick().await;

                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f64();
                last_tick = now;

                let tick: TickId = epoch.elapsed().as_millis() as TickId;
                inner.lock().await.tick(dt, tick);
            }
        }));
    }

    /// Stop the tick timer without clearing any replication state.
    pub fn pause(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
    }

    /// Deliberate shutdown: stop ticking, notify every client, tear down
    /// the transports, and fire the stop hook.
    pub async fn stop(&mut self, message: &str) {
        self.pause();

        self.inner.lock().await.stop(message);

        for provider in &mut self.providers {
            provider.disconnect();
        }

        info!("server stopped");
    }

    /// Milliseconds since this host was created; the timestamp space the
    /// tick task stamps outgoing state with.
    pub fn now(&self) -> TickId {
        self.epoch.elapsed().as_millis() as TickId
    }
}

impl<R: GameRules> Drop for ServerHost<R> {
    fn drop(&mut self) {
        self.pause();
    }
}
