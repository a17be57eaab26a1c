use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::codec::{RegisterCodec, ValueCodec};
use crate::config::{ConnectionConfig, LinkConfig, DEFAULT_TICK};
use crate::decode::DecodeLevel;
use crate::error::{RequestError, Shutdown, WriteError};
use crate::group::build_groups;
use crate::link::{Link, Transport};
use crate::point::PointSpec;
use crate::types::{DeviceId, PointSample, PointValue};

use self::listener::NullListener;
use self::task::ConnectionTask;
use self::write::WriteTrace;

pub(crate) mod listener;
pub(crate) mod liveness;
pub(crate) mod task;
pub(crate) mod write;

pub use listener::{LinkState, Listener, MaybeAsync};
pub use liveness::{LivenessSink, NullLiveness};

/// Maximum number of queued settings changes per connection
const MAX_QUEUED_COMMANDS: usize = 16;

pub(crate) enum Command {
    Setting(Setting),
    Close,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Setting {
    Enable,
    Disable,
    DecodeLevel(DecodeLevel),
}

/// Collaborators of a connection
pub struct ConnectionHandlers {
    /// converts wire values to and from point values
    pub codec: Arc<dyn ValueCodec>,
    /// receives every decoded point value
    pub samples: Box<dyn Listener<PointSample>>,
    /// receives communication symptoms per device
    pub liveness: Arc<dyn LivenessSink>,
    /// receives link state changes
    pub link_state: Box<dyn Listener<LinkState>>,
}

impl ConnectionHandlers {
    /// Handlers with the [`RegisterCodec`], no liveness reporting and no link state listener
    pub fn new(samples: Box<dyn Listener<PointSample>>) -> Self {
        Self {
            codec: Arc::new(RegisterCodec),
            samples,
            liveness: Arc::new(NullLiveness),
            link_state: NullListener::create(),
        }
    }

    /// Replace the value codec
    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the liveness sink
    pub fn with_liveness(mut self, liveness: Arc<dyn LivenessSink>) -> Self {
        self.liveness = liveness;
        self
    }

    /// Replace the link state listener
    pub fn with_link_state(mut self, listener: Box<dyn Listener<LinkState>>) -> Self {
        self.link_state = listener;
        self
    }
}

/// Name and new value of one point of a write
#[derive(Clone, Debug, PartialEq)]
pub struct PointWrite {
    /// point name
    pub name: String,
    /// value to write
    pub value: PointValue,
}

impl PointWrite {
    /// Create a point write
    pub fn new(name: impl Into<String>, value: PointValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Handle to a running connection task
///
/// Cloning is cheap. The task ends when every handle is dropped or [`Connection::close`]
/// is called.
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

/// State shared by the poll scheduler and the writers of one connection
pub(crate) struct Shared {
    link: tokio::sync::Mutex<Link>,
    write_section: tokio::sync::Mutex<()>,
    trace: WriteTrace,
    closing: AtomicBool,
    points: HashMap<(DeviceId, String), PointSpec>,
    codec: Arc<dyn ValueCodec>,
    config: LinkConfig,
}

impl Shared {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Acquire exclusive use of the link unless the connection is closing
    pub(crate) async fn lock_link(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Link>, RequestError> {
        if self.is_closing() {
            return Err(RequestError::Closed);
        }
        let guard = self.link.lock().await;
        // closing may have started while waiting
        if self.is_closing() {
            return Err(RequestError::Closed);
        }
        Ok(guard)
    }

    /// Stop new transactions, then wait for the one in flight and close the transport
    pub(crate) async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        self.link.lock().await.shutdown().await;
    }
}

impl Connection {
    /// Write point values of one device
    ///
    /// Returns once every register touched by the write has been acknowledged, or with
    /// the first error that could not be recovered by the configured retries.
    pub async fn write(&self, device: &DeviceId, points: Vec<PointWrite>) -> Result<(), WriteError> {
        write::write(&self.shared, device, points).await
    }

    /// Start polling
    pub async fn enable(&self) -> Result<(), Shutdown> {
        self.send(Command::Setting(Setting::Enable)).await
    }

    /// Stop polling, writes are still served
    pub async fn disable(&self) -> Result<(), Shutdown> {
        self.send(Command::Setting(Setting::Disable)).await
    }

    /// Change the decode level of the connection
    pub async fn set_decode_level(&self, level: DecodeLevel) -> Result<(), Shutdown> {
        self.send(Command::Setting(Setting::DecodeLevel(level)))
            .await
    }

    /// Tear down the connection
    ///
    /// No transaction starts after this is called. A transaction already in flight is
    /// allowed to complete or time out before the transport is closed.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        // the task may already be gone
        self.send(Command::Close).await.ok();
        self.shared.shutdown().await;
    }

    async fn send(&self, command: Command) -> Result<(), Shutdown> {
        self.tx.send(command).await.map_err(|_| Shutdown)
    }
}

/// Spawns a connection task onto the runtime that polls the groups built from `points`
/// and serves writes through the returned handle. The task completes when the handle and
/// all its clones are dropped, or when [`Connection::close`] is called.
///
/// Invalid points are dropped with a warning, the rest of the connection still starts.
///
/// * `config` - Name, tick, link parameters and initial decode level
/// * `points` - Every point of every device on this physical connection
/// * `transport` - Physical channel and byte-level protocol
/// * `handlers` - Value codec and downstream collaborators
///
/// Must be called from within a Tokio runtime.
pub fn spawn_connection_task(
    config: ConnectionConfig,
    points: Vec<PointSpec>,
    transport: Box<dyn Transport>,
    handlers: ConnectionHandlers,
) -> Connection {
    let (handle, task) = create_connection_handle_and_task(config, points, transport, handlers);
    tokio::spawn(task);
    handle
}

/// Creates a connection task, but does not spawn it. Most users will prefer
/// [`spawn_connection_task`], unless they are using the library from outside the Tokio
/// runtime and need to spawn it using a Runtime handle instead of the `tokio::spawn` function.
pub fn create_connection_handle_and_task(
    config: ConnectionConfig,
    points: Vec<PointSpec>,
    transport: Box<dyn Transport>,
    handlers: ConnectionHandlers,
) -> (Connection, impl std::future::Future<Output = ()>) {
    let (tx, rx) = mpsc::channel(MAX_QUEUED_COMMANDS);
    let (shared, mut task) = create(config, points, transport, handlers, rx);
    let name = task.name().to_string();
    let future = async move {
        task.run()
            .instrument(tracing::info_span!("Connection", name = %name))
            .await
    };
    (Connection { tx, shared }, future)
}

pub(crate) fn create(
    config: ConnectionConfig,
    points: Vec<PointSpec>,
    transport: Box<dyn Transport>,
    handlers: ConnectionHandlers,
    rx: mpsc::Receiver<Command>,
) -> (Arc<Shared>, ConnectionTask) {
    let mut config = config;
    if config.tick.is_zero() {
        tracing::warn!(
            "{} has a zero tick, using {:?} instead",
            config.name,
            DEFAULT_TICK
        );
        config.tick = DEFAULT_TICK;
    }

    let mut valid: Vec<PointSpec> = Vec::with_capacity(points.len());
    let mut index: HashMap<(DeviceId, String), PointSpec> = HashMap::new();
    for point in points {
        if let Err(err) = point.validate() {
            tracing::warn!(
                "dropping point {} of device {}: {}",
                point.name,
                point.device,
                err
            );
            continue;
        }
        let key = (point.device.clone(), point.name.clone());
        if index.contains_key(&key) {
            tracing::warn!(
                "device {} declares point {} more than once, keeping the first",
                point.device,
                point.name
            );
            continue;
        }
        index.insert(key, point.clone());
        valid.push(point);
    }

    let mut devices: Vec<DeviceId> = Vec::new();
    for point in &valid {
        if !devices.contains(&point.device) {
            devices.push(point.device.clone());
        }
    }

    let groups = build_groups(&valid, config.link.max_batch_span);
    if groups.is_empty() {
        tracing::warn!("{} has no readable points, only writes are served", config.name);
    }

    let link = Link::new(transport, &config.link, config.decode, handlers.link_state);

    let shared = Arc::new(Shared {
        link: tokio::sync::Mutex::new(link),
        write_section: tokio::sync::Mutex::new(()),
        trace: WriteTrace::default(),
        closing: AtomicBool::new(false),
        points: index,
        codec: handlers.codec.clone(),
        config: config.link.clone(),
    });

    let task = ConnectionTask::new(
        &config,
        rx.into(),
        shared.clone(),
        groups,
        devices,
        handlers.codec,
        handlers.samples,
        handlers.liveness,
    );

    (shared, task)
}
