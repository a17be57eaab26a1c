use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::{Instant, MissedTickBehavior};

use crate::channel::Receiver;
use crate::codec::ValueCodec;
use crate::config::ConnectionConfig;
use crate::connection::{Command, LivenessSink, Listener, Setting, Shared};
use crate::decode::DecodeLevel;
use crate::error::{RequestError, Shutdown};
use crate::group::{GroupId, TaskGroup};
use crate::link::{Request, Response};
use crate::types::{DeviceId, PointSample};

/// Result of visiting one group during a scheduler tick
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PollOutcome {
    /// the effective period has not elapsed
    NotDue,
    /// a write is pending or ended within the quiet window
    Deferred,
    /// the group was read and its points were published
    Polled,
    /// the read failed
    Failed(RequestError),
}

/// Poll scheduler of one connection
pub(crate) struct ConnectionTask {
    name: String,
    enabled: bool,
    tick: Duration,
    max_backoff: Duration,
    min_interval: Duration,
    decode: DecodeLevel,
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    groups: Vec<TaskGroup>,
    devices: Vec<DeviceId>,
    codec: Arc<dyn ValueCodec>,
    samples: Box<dyn Listener<PointSample>>,
    liveness: Arc<dyn LivenessSink>,
}

impl ConnectionTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &ConnectionConfig,
        rx: Receiver<Command>,
        shared: Arc<Shared>,
        groups: Vec<TaskGroup>,
        devices: Vec<DeviceId>,
        codec: Arc<dyn ValueCodec>,
        samples: Box<dyn Listener<PointSample>>,
        liveness: Arc<dyn LivenessSink>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            enabled: config.enabled,
            tick: config.tick,
            max_backoff: config.link.max_backoff,
            min_interval: config.link.min_interval,
            decode: config.decode,
            rx,
            shared,
            groups,
            devices,
            codec,
            samples,
            liveness,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub(crate) fn groups(&self) -> &[TaskGroup] {
        &self.groups
    }

    pub(crate) async fn run(&mut self) {
        // the only way out is a shutdown
        let _ = self.run_until_shutdown().await;
        self.shared.shutdown().await;
        tracing::info!("shutdown");
    }

    async fn run_until_shutdown(&mut self) -> Result<(), Shutdown> {
        loop {
            self.wait_for_enabled().await?;
            self.poll_while_enabled().await?;
        }
    }

    async fn wait_for_enabled(&mut self) -> Result<(), Shutdown> {
        while !self.enabled {
            let command = self.rx.recv().await?;
            self.handle_command(command).await?;
        }
        Ok(())
    }

    async fn poll_while_enabled(&mut self) -> Result<(), Shutdown> {
        tracing::info!("polling {} group(s) every {:?}", self.groups.len(), self.tick);

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.enabled {
            tokio::select! {
                command = self.rx.recv() => {
                    self.handle_command(command?).await?;
                }
                now = interval.tick() => {
                    self.tick(now).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), Shutdown> {
        match command {
            Command::Setting(setting) => {
                self.change_setting(setting).await;
                Ok(())
            }
            Command::Close => Err(Shutdown),
        }
    }

    async fn change_setting(&mut self, setting: Setting) {
        match setting {
            Setting::Enable => {
                if !self.enabled {
                    self.enabled = true;
                    tracing::info!("connection enabled");
                }
            }
            Setting::Disable => {
                if self.enabled {
                    self.enabled = false;
                    tracing::info!("connection disabled");
                }
            }
            Setting::DecodeLevel(level) => {
                self.decode = level;
                self.shared.link.lock().await.set_decode_level(level);
                tracing::info!("Decode level changed: {:?}", level);
            }
        }
    }

    /// Visit every group once and poll the ones that are due
    pub(crate) async fn tick(
        &mut self,
        now: Instant,
    ) -> Result<Vec<(GroupId, PollOutcome)>, Shutdown> {
        let mut outcomes = Vec::with_capacity(self.groups.len());
        let mut offline: HashSet<DeviceId> = HashSet::new();
        let mut open_failure: Option<RequestError> = None;

        for index in 0..self.groups.len() {
            while let Some(command) = self.rx.poll_pending()? {
                self.handle_command(command).await?;
            }
            if !self.enabled || self.shared.is_closing() {
                break;
            }

            let outcome = match &open_failure {
                // the link is down for every group of this tick
                Some(err) => {
                    let group = &mut self.groups[index];
                    if group.is_due(now, self.max_backoff) {
                        group.record_failure(now);
                        PollOutcome::Failed(err.clone())
                    } else {
                        PollOutcome::NotDue
                    }
                }
                None => self.poll_group(index, now, &mut offline).await,
            };

            if let PollOutcome::Failed(err) = &outcome {
                if err.is_open_failure() {
                    open_failure = Some(err.clone());
                }
            }

            outcomes.push((self.groups[index].id(), outcome));
        }

        Ok(outcomes)
    }

    async fn poll_group(
        &mut self,
        index: usize,
        now: Instant,
        offline: &mut HashSet<DeviceId>,
    ) -> PollOutcome {
        if !self.groups[index].is_due(now, self.max_backoff) {
            return PollOutcome::NotDue;
        }

        if self
            .shared
            .trace
            .should_defer(Instant::now(), self.min_interval)
        {
            tracing::debug!("{} deferred by a write", self.groups[index].id());
            return PollOutcome::Deferred;
        }

        let request = Request::Read(self.groups[index].read_request());
        let result = match self.shared.lock_link().await {
            Ok(mut link) => link.transact(&request).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => {
                self.groups[index].record_success(now);
                self.publish(index, &response).await;
                PollOutcome::Polled
            }
            Err(err @ (RequestError::Closed | RequestError::Shutdown)) => PollOutcome::Failed(err),
            Err(err) => {
                let group = &mut self.groups[index];
                group.record_failure(now);
                tracing::warn!(
                    "{} ({}) failed {} time(s) in a row: {}",
                    group.id(),
                    group.range(),
                    group.consecutive_timeouts(),
                    err
                );

                let devices = if err.is_open_failure() {
                    self.devices.clone()
                } else {
                    group.devices()
                };
                for device in devices {
                    if offline.insert(device.clone()) {
                        self.liveness.may_be_offline(&device);
                    }
                }

                PollOutcome::Failed(err)
            }
        }
    }

    /// Decode every point of a group and forward the values
    async fn publish(&mut self, index: usize, response: &Response) {
        let group = &self.groups[index];
        let start = group.range().start;
        let timestamp = SystemTime::now();
        let mut online: Vec<&DeviceId> = Vec::new();

        for point in group.points() {
            let offset = (point.address - start) as usize;
            let values = response.slice(offset, point.quantity() as usize);
            match self.codec.decode(point, values) {
                Ok(value) => {
                    if self.decode.app.data_values() {
                        tracing::info!("{}/{} = {}", point.device, point.name, value);
                    }
                    self.samples
                        .update(PointSample {
                            device: point.device.clone(),
                            point: point.name.clone(),
                            value,
                            raw_type: point.raw_type,
                            timestamp,
                        })
                        .get()
                        .await;
                    if !online.contains(&&point.device) {
                        online.push(&point.device);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "unable to decode {} of device {}: {}",
                        point.name,
                        point.device,
                        err
                    );
                }
            }
        }

        for device in online {
            self.liveness.set_online(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::LinkConfig;
    use crate::connection::listener::LinkState;
    use crate::connection::{
        create, create_connection_handle_and_task, Connection, ConnectionHandlers,
    };
    use crate::mock::{mock, Event, Handle};
    use crate::point::PointSpec;
    use crate::types::{PointValue, RawType, RegisterClass, UnitId};

    #[derive(Debug, PartialEq)]
    enum Signal {
        Offline(DeviceId),
        Online(DeviceId),
    }

    #[derive(Default)]
    struct LivenessLog(Mutex<Vec<Signal>>);

    impl LivenessLog {
        fn take(&self) -> Vec<Signal> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl LivenessSink for LivenessLog {
        fn may_be_offline(&self, device: &DeviceId) {
            self.0
                .lock()
                .unwrap()
                .push(Signal::Offline(device.clone()));
        }

        fn set_online(&self, device: &DeviceId) {
            self.0.lock().unwrap().push(Signal::Online(device.clone()));
        }
    }

    struct Fixture {
        task: ConnectionTask,
        shared: Arc<Shared>,
        io: Handle,
        tx: mpsc::Sender<Command>,
        samples: mpsc::UnboundedReceiver<PointSample>,
        liveness: Arc<LivenessLog>,
    }

    impl Fixture {
        fn new(points: Vec<PointSpec>) -> Self {
            let (transport, io) = mock();
            let (tx, rx) = mpsc::channel(16);
            let (sample_tx, samples) = mpsc::unbounded_channel();
            let liveness = Arc::new(LivenessLog::default());
            let handlers =
                ConnectionHandlers::new(Box::new(sample_tx)).with_liveness(liveness.clone());
            let (shared, task) = create(
                ConnectionConfig::new("test").with_link(LinkConfig::default()),
                points,
                Box::new(transport),
                handlers,
                rx,
            );
            Self {
                task,
                shared,
                io,
                tx,
                samples,
                liveness,
            }
        }

        async fn tick(&mut self) -> Vec<PollOutcome> {
            self.task
                .tick(Instant::now())
                .await
                .unwrap()
                .into_iter()
                .map(|(_, x)| x)
                .collect()
        }

        fn samples(&mut self) -> Vec<(String, PointValue)> {
            let mut samples = Vec::new();
            while let Ok(x) = self.samples.try_recv() {
                samples.push((x.point, x.value));
            }
            samples
        }
    }

    fn holding(device: &str, unit: u8, name: &str, address: u16, raw_type: RawType) -> PointSpec {
        PointSpec::new(
            device,
            name,
            UnitId::new(unit),
            RegisterClass::HoldingRegister,
            address,
            raw_type,
        )
    }

    fn three_devices() -> Vec<PointSpec> {
        vec![
            holding("meter", 1, "a", 0, RawType::Uint16),
            holding("pump", 1, "b", 1, RawType::Uint16),
            holding("valve", 2, "c", 0, RawType::Uint16),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn due_group_is_read_and_every_point_published() {
        let mut fixture = Fixture::new(vec![
            holding("meter", 1, "a", 0, RawType::Uint16),
            holding("meter", 1, "b", 1, RawType::Uint32),
        ]);
        fixture.io.respond(Response::Registers(vec![7, 0, 0x10]));

        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
        assert_eq!(
            fixture.samples(),
            vec![
                ("a".to_string(), PointValue::Int(7)),
                ("b".to_string(), PointValue::Int(16)),
            ]
        );
        assert_eq!(
            fixture.liveness.take(),
            vec![Signal::Online(DeviceId::from("meter"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn group_waits_for_its_period() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.io.respond(Response::Registers(vec![1]));
        fixture.io.respond(Response::Registers(vec![2]));

        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(fixture.tick().await, vec![PollOutcome::NotDue]);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_defer_polling() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.io.respond(Response::Registers(vec![1]));

        let shared = fixture.shared.clone();
        let guard = shared.trace.begin();
        assert_eq!(fixture.tick().await, vec![PollOutcome::Deferred]);
        drop(guard);

        // quiet window after the write
        assert_eq!(fixture.tick().await, vec![PollOutcome::Deferred]);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
        assert_eq!(fixture.io.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_write_defers_every_due_group_of_the_tick() {
        let mut fixture = Fixture::new(three_devices());
        fixture.io.respond(Response::Registers(vec![1, 2]));
        fixture.io.respond(Response::Registers(vec![3]));

        let shared = fixture.shared.clone();
        let guard = shared.trace.begin();
        assert_eq!(
            fixture.tick().await,
            vec![PollOutcome::Deferred, PollOutcome::Deferred]
        );
        assert!(fixture.io.requests().is_empty());
        assert!(fixture.samples().is_empty());
        assert!(fixture.liveness.take().is_empty());

        drop(guard);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(
            fixture.tick().await,
            vec![PollOutcome::Polled, PollOutcome::Polled]
        );
        assert_eq!(fixture.io.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_marks_only_the_devices_of_the_group() {
        let mut fixture = Fixture::new(three_devices());
        fixture
            .io
            .fail(RequestError::Io(std::io::ErrorKind::ConnectionReset));
        fixture.io.respond(Response::Registers(vec![5]));

        let outcomes = fixture.tick().await;
        assert_eq!(
            outcomes,
            vec![
                PollOutcome::Failed(RequestError::Io(std::io::ErrorKind::ConnectionReset)),
                PollOutcome::Polled,
            ]
        );
        assert_eq!(
            fixture.liveness.take(),
            vec![
                Signal::Offline(DeviceId::from("meter")),
                Signal::Offline(DeviceId::from("pump")),
                Signal::Online(DeviceId::from("valve")),
            ]
        );
        assert_eq!(fixture.task.groups()[0].consecutive_timeouts(), 1);
        assert_eq!(fixture.task.groups()[1].consecutive_timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_marks_every_device_once() {
        let mut fixture = Fixture::new(three_devices());
        fixture
            .io
            .fail_open(std::io::ErrorKind::ConnectionRefused);

        let failed = PollOutcome::Failed(RequestError::Open(
            std::io::ErrorKind::ConnectionRefused,
        ));
        assert_eq!(fixture.tick().await, vec![failed.clone(), failed]);
        assert_eq!(
            fixture.liveness.take(),
            vec![
                Signal::Offline(DeviceId::from("meter")),
                Signal::Offline(DeviceId::from("pump")),
                Signal::Offline(DeviceId::from("valve")),
            ]
        );
        // one attempt to open per tick
        assert_eq!(fixture.io.drain(), vec![Event::Open, Event::Close]);
        assert!(fixture
            .task
            .groups()
            .iter()
            .all(|x| x.consecutive_timeouts() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_and_success_resets() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.io.fail(RequestError::ResponseTimeout);
        fixture.io.respond(Response::Registers(vec![1]));

        assert_eq!(
            fixture.tick().await,
            vec![PollOutcome::Failed(RequestError::ResponseTimeout)]
        );
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(fixture.tick().await, vec![PollOutcome::NotDue]);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
        assert_eq!(fixture.task.groups()[0].consecutive_timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_settings_apply_before_polling() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.io.respond(Response::Registers(vec![1]));

        fixture
            .tx
            .send(Command::Setting(Setting::Disable))
            .await
            .unwrap();
        assert!(fixture.tick().await.is_empty());

        fixture
            .tx
            .send(Command::Setting(Setting::Enable))
            .await
            .unwrap();
        assert_eq!(fixture.tick().await, vec![PollOutcome::Polled]);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_connection_polls_nothing() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.shared.shutdown().await;

        assert!(fixture.tick().await.is_empty());
        assert!(fixture.io.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_command_ends_the_tick() {
        let mut fixture = Fixture::new(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        fixture.tx.send(Command::Close).await.unwrap();
        assert_eq!(fixture.task.tick(Instant::now()).await, Err(Shutdown));
    }

    fn spawn(points: Vec<PointSpec>) -> (Connection, Handle, tokio::task::JoinHandle<()>) {
        let (transport, io) = mock();
        let (connection, task) = create_connection_handle_and_task(
            ConnectionConfig::new("test"),
            points,
            Box::new(transport),
            ConnectionHandlers::new(crate::connection::listener::NullListener::create()),
        );
        (connection, io, tokio::spawn(task))
    }

    #[tokio::test(start_paused = true)]
    async fn task_shuts_down_when_every_handle_is_dropped() {
        let (connection, mut io, join) =
            spawn(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        io.respond(Response::Registers(vec![1]));

        assert_eq!(io.next_event().await, Event::Open);
        assert!(matches!(io.next_event().await, Event::Exchange(_)));

        drop(connection);
        join.await.unwrap();
        assert_eq!(io.drain(), vec![Event::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_polling_and_rejects_writes() {
        let (connection, mut io, join) =
            spawn(vec![holding("meter", 1, "a", 0, RawType::Uint16)]);
        io.respond(Response::Registers(vec![1]));

        assert_eq!(io.next_event().await, Event::Open);
        assert!(matches!(io.next_event().await, Event::Exchange(_)));

        connection.close().await;
        join.await.unwrap();

        assert_eq!(io.drain(), vec![Event::Close]);
        assert_eq!(
            connection
                .write(
                    &DeviceId::from("meter"),
                    vec![crate::connection::PointWrite::new("a", PointValue::Int(1))]
                )
                .await,
            Err(crate::error::WriteError::Closed)
        );
        assert!(connection.enable().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_polls_at_the_default_rate() {
        let (transport, mut io) = mock();
        let mut config = ConnectionConfig::new("test");
        config.tick = Duration::ZERO;
        let (connection, task) = create_connection_handle_and_task(
            config,
            vec![holding("meter", 1, "a", 0, RawType::Uint16)],
            Box::new(transport),
            ConnectionHandlers::new(crate::connection::listener::NullListener::create()),
        );
        let join = tokio::spawn(task);
        io.respond(Response::Registers(vec![1]));
        io.respond(Response::Registers(vec![2]));

        assert_eq!(io.next_event().await, Event::Open);
        assert!(matches!(io.next_event().await, Event::Exchange(_)));
        let first = Instant::now();
        assert!(matches!(io.next_event().await, Event::Exchange(_)));
        assert_eq!(first.elapsed(), Duration::from_secs(1));

        connection.close().await;
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn link_state_follows_the_connection() {
        let (transport, _io) = mock();
        let (states_tx, mut states) = mpsc::unbounded_channel();
        let (connection, task) = create_connection_handle_and_task(
            ConnectionConfig::new("test"),
            vec![holding("meter", 1, "a", 0, RawType::Uint16)],
            Box::new(transport),
            ConnectionHandlers::new(crate::connection::listener::NullListener::create())
                .with_link_state(Box::new(states_tx)),
        );
        let join = tokio::spawn(task);

        // the unanswered read times out and closes the link
        assert_eq!(states.recv().await, Some(LinkState::Open));
        assert_eq!(states.recv().await, Some(LinkState::Closed));

        connection.close().await;
        join.await.unwrap();
        assert_eq!(states.recv().await, Some(LinkState::Shutdown));
    }
}
