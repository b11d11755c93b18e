//! # Polling Scheduler Module
//!
//! Refreshes the dataset on a fixed cadence, one refresh at a time.
//!
//! ## Key Components
//! - `PollingScheduler`: start/stop control, consumer registry, latest dataset
//! - Worker thread: owns the refresh source, runs refreshes and notifies consumers
//! - Timer thread: exists while running, fires on a `crossbeam_channel::tick`
//!   and hands refresh requests to the worker
//!
//! ## Back-pressure
//! Refreshes run one after another on the single worker thread. A pending
//! counter goes up when a refresh is handed to the worker and down once its
//! consumers have been notified. A tick that finds anything pending is
//! dropped, never queued, so a slow file system delays refreshes instead of
//! piling them up.

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::dataset::Dataset;
use crate::error::PollError;

/// Produces a fresh dataset on request
pub trait RefreshSource: Send {
    fn refresh(&mut self) -> Result<Dataset, PollError>;
}

impl<F> RefreshSource for F
where
    F: FnMut() -> Result<Dataset, PollError> + Send,
{
    fn refresh(&mut self) -> Result<Dataset, PollError> {
        self()
    }
}

/// Receives the outcome of every refresh cycle
///
/// Called on the scheduler's worker thread, in registration order. Keep the
/// callbacks short: the next refresh cannot start until they return.
pub trait DatasetConsumer: Send {
    fn on_dataset_updated(&mut self, dataset: Arc<Dataset>);
    fn on_poll_error(&mut self, error: &PollError);
}

/// Message form of a refresh outcome
#[derive(Debug, Clone)]
pub enum PollEvent {
    Updated(Arc<Dataset>),
    Error(String),
}

/// Forwards refresh outcomes into a channel, for consumers living on
/// another thread
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    sender: Sender<PollEvent>,
}

impl ChannelConsumer {
    pub fn new(sender: Sender<PollEvent>) -> Self {
        Self { sender }
    }

    /// Consumer plus the receiving end of an unbounded channel
    pub fn pair() -> (Self, Receiver<PollEvent>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender), receiver)
    }
}

impl DatasetConsumer for ChannelConsumer {
    fn on_dataset_updated(&mut self, dataset: Arc<Dataset>) {
        if self.sender.send(PollEvent::Updated(dataset)).is_err() {
            log::debug!("Dataset receiver dropped");
        }
    }

    fn on_poll_error(&mut self, error: &PollError) {
        if self.sender.send(PollEvent::Error(error.to_string())).is_err() {
            log::debug!("Dataset receiver dropped");
        }
    }
}

/// Observable scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingState {
    pub interval: Duration,
    pub running: bool,
    pub refreshing: bool,
    /// Message of the most recent failed refresh, cleared on success
    pub last_error: Option<String>,
    pub refresh_count: u64,
    pub skipped_ticks: u64,
}

enum WorkerCommand {
    Install(Box<dyn RefreshSource>),
    Refresh,
    Shutdown,
}

struct Shared {
    state: Mutex<PollingState>,
    /// Refreshes handed to the worker and not yet finished
    pending: AtomicUsize,
    consumers: Mutex<Vec<Box<dyn DatasetConsumer>>>,
    latest: RwLock<Option<Arc<Dataset>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Timer tick: hand a refresh to the worker unless one is in flight
    ///
    /// The state lock is held from the `running` check until the request is
    /// queued, so no tick gets through once `stop` has cleared `running`.
    fn tick(&self, worker: &Sender<WorkerCommand>) {
        let mut state = lock(&self.state);
        if !state.running {
            return;
        }
        if self
            .pending
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            state.skipped_ticks += 1;
            log::debug!("Refresh still in flight, skipping tick");
            return;
        }
        state.refreshing = true;
        if worker.send(WorkerCommand::Refresh).is_err() {
            log::error!("Refresh worker is gone");
            drop(state);
            self.finish();
        }
    }

    /// Queue a refresh behind whatever the worker is doing
    fn refresh_now(&self, worker: &Sender<WorkerCommand>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.send_refresh(worker);
    }

    fn send_refresh(&self, worker: &Sender<WorkerCommand>) {
        lock(&self.state).refreshing = true;
        if worker.send(WorkerCommand::Refresh).is_err() {
            log::error!("Refresh worker is gone");
            self.finish();
        }
    }

    fn finish(&self) {
        let mut state = lock(&self.state);
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.refreshing = false;
        }
    }

    fn publish(&self, outcome: Result<Dataset, PollError>) {
        let mut consumers = lock(&self.consumers);
        match outcome {
            Ok(dataset) => {
                let dataset = Arc::new(dataset);
                *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(dataset.clone());
                {
                    let mut state = lock(&self.state);
                    state.refresh_count += 1;
                    state.last_error = None;
                }
                for consumer in consumers.iter_mut() {
                    consumer.on_dataset_updated(dataset.clone());
                }
            }
            Err(error) => {
                log::warn!("Refresh failed: {}", error);
                {
                    let mut state = lock(&self.state);
                    state.refresh_count += 1;
                    state.last_error = Some(error.to_string());
                }
                for consumer in consumers.iter_mut() {
                    consumer.on_poll_error(&error);
                }
            }
        }
    }
}

struct Timer {
    stop: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Start/stop controllable refresh loop
///
/// Owns a worker thread for its whole lifetime and a timer thread while
/// running. Dropping the scheduler stops polling, waits for an in-flight
/// refresh and joins both threads.
pub struct PollingScheduler {
    shared: Arc<Shared>,
    worker_tx: Sender<WorkerCommand>,
    worker: Option<thread::JoinHandle<()>>,
    timer: Option<Timer>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PollingState::default()),
            pending: AtomicUsize::new(0),
            consumers: Mutex::new(Vec::new()),
            latest: RwLock::new(None),
        });
        let (worker_tx, worker_rx) = unbounded();
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || worker_loop(worker_rx, worker_shared));

        Self {
            shared,
            worker_tx,
            worker: Some(worker),
            timer: None,
        }
    }

    /// Register a consumer; it sees every refresh completed from now on
    pub fn subscribe(&self, consumer: impl DatasetConsumer + 'static) {
        lock(&self.shared.consumers).push(Box::new(consumer));
    }

    /// Start polling `source` every `interval`, refreshing immediately
    ///
    /// Does nothing if already running. If a refresh from a previous run is
    /// still in flight, the immediate refresh runs right after it.
    pub fn start(&mut self, interval: Duration, source: impl RefreshSource + 'static) {
        {
            let mut state = lock(&self.shared.state);
            if state.running {
                log::debug!("Polling already running");
                return;
            }
            state.running = true;
            state.interval = interval;
        }

        log::info!("Polling started every {:?}", interval);
        if self.worker_tx.send(WorkerCommand::Install(Box::new(source))).is_err() {
            log::error!("Refresh worker is gone");
        }
        self.shared.refresh_now(&self.worker_tx);

        let (stop, stop_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        let worker_tx = self.worker_tx.clone();
        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => shared.tick(&worker_tx),
                }
            }
        });
        self.timer = Some(Timer { stop, handle });
    }

    /// Stop issuing refreshes. An in-flight refresh still completes and is
    /// delivered.
    pub fn stop(&mut self) {
        lock(&self.shared.state).running = false;
        if let Some(timer) = self.timer.take() {
            // a send error means the timer already exited
            let _ = timer.stop.send(());
            if timer.handle.join().is_err() {
                log::error!("Polling timer thread panicked");
            }
            log::info!("Polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    pub fn state(&self) -> PollingState {
        lock(&self.shared.state).clone()
    }

    /// Most recently published dataset
    pub fn latest(&self) -> Option<Arc<Dataset>> {
        self.shared
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
        // a send error means the worker already exited
        let _ = self.worker_tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Refresh worker thread panicked");
            }
        }
    }
}

fn worker_loop(commands: Receiver<WorkerCommand>, shared: Arc<Shared>) {
    let mut source: Option<Box<dyn RefreshSource>> = None;

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Install(new_source) => source = Some(new_source),
            WorkerCommand::Refresh => {
                if let Some(source) = source.as_mut() {
                    let started = Instant::now();
                    let outcome = source.refresh();
                    log::debug!("Refresh took {:?}", started.elapsed());
                    shared.publish(outcome);
                }
                shared.finish();
            }
            WorkerCommand::Shutdown => break,
        }
    }

    log::debug!("Refresh worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TailError;

    /// Source that sleeps like slow I/O and counts its calls
    fn slow_source(delay: Duration, calls: Arc<AtomicUsize>) -> impl RefreshSource {
        move || -> Result<Dataset, PollError> {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            Ok(Dataset::default())
        }
    }

    fn updates(events: &Receiver<PollEvent>) -> usize {
        events
            .try_iter()
            .filter(|event| matches!(event, PollEvent::Updated(_)))
            .count()
    }

    #[test]
    fn test_start_refreshes_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_secs(60), slow_source(Duration::ZERO, calls.clone()));
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, PollEvent::Updated(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.latest().is_some());
        scheduler.stop();
    }

    #[test]
    fn test_slow_refresh_skips_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        // refresh takes 1.5 intervals: the first tick lands mid-refresh
        scheduler.start(
            Duration::from_millis(400),
            slow_source(Duration::from_millis(600), calls.clone()),
        );
        thread::sleep(Duration::from_millis(700));

        assert_eq!(updates(&events), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = scheduler.state();
        assert!(state.skipped_ticks >= 1);
        assert!(state.running);
        scheduler.stop();
    }

    #[test]
    fn test_stop_lets_in_flight_refresh_finish() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(
            Duration::from_millis(100),
            slow_source(Duration::from_millis(300), calls.clone()),
        );
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();
        assert!(!scheduler.is_running());

        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, PollEvent::Updated(_)));

        thread::sleep(Duration::from_millis(400));
        assert_eq!(updates(&events), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.state().refreshing);
    }

    fn wait_until_idle(scheduler: &PollingScheduler) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.state().refreshing {
            assert!(Instant::now() < deadline, "refresh never finished");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_no_refresh_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();

        for _ in 0..50 {
            scheduler.start(
                Duration::from_micros(200),
                slow_source(Duration::ZERO, calls.clone()),
            );
            thread::sleep(Duration::from_millis(2));
            scheduler.stop();
            wait_until_idle(&scheduler);

            let settled = calls.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(3));
            assert_eq!(calls.load(Ordering::SeqCst), settled);
        }
        assert!(calls.load(Ordering::SeqCst) >= 50);
    }

    #[test]
    fn test_failures_are_reported_and_polling_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_millis(50), move || -> Result<Dataset, PollError> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(TailError::parse("garbage", "not a data line").into())
            } else {
                Ok(Dataset::default())
            }
        });

        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            PollEvent::Error(message) => assert!(message.contains("not a data line")),
            other => panic!("expected an error event, got {other:?}"),
        }
        let next = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(next, PollEvent::Updated(_)));
        scheduler.stop();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.state().last_error, None);
    }

    #[test]
    fn test_last_error_recorded() {
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_secs(60), || -> Result<Dataset, PollError> {
            Err(TailError::parse("x", "broken").into())
        });
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.stop();

        let state = scheduler.state();
        assert!(state.last_error.unwrap().contains("broken"));
        assert_eq!(state.refresh_count, 1);
        assert!(scheduler.latest().is_none());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_secs(60), slow_source(Duration::ZERO, first.clone()));
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.start(Duration::from_millis(10), slow_source(Duration::ZERO, second.clone()));
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state().interval, Duration::from_secs(60));
    }

    #[test]
    fn test_restart_uses_new_source() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollingScheduler::new();
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_secs(60), slow_source(Duration::ZERO, first.clone()));
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.stop();

        scheduler.start(Duration::from_secs(60), slow_source(Duration::ZERO, second.clone()));
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.stop();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DatasetConsumer for Recorder {
        fn on_dataset_updated(&mut self, _dataset: Arc<Dataset>) {
            self.log.lock().unwrap().push(self.name);
        }

        fn on_poll_error(&mut self, _error: &PollError) {}
    }

    #[test]
    fn test_consumers_notified_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = PollingScheduler::new();
        for name in ["plot", "table", "status"] {
            scheduler.subscribe(Recorder {
                name,
                log: log.clone(),
            });
        }
        let (consumer, events) = ChannelConsumer::pair();
        scheduler.subscribe(consumer);

        scheduler.start(Duration::from_secs(60), || -> Result<Dataset, PollError> {
            Ok(Dataset::default())
        });
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.stop();

        assert_eq!(*log.lock().unwrap(), vec!["plot", "table", "status"]);
    }
}
