//! The task that owns a pool's state.
//!
//! Every mutation happens inside [`PoolCore::run`], which selects over handle
//! commands, per-worker process events and timer firings. Replies to `start`
//! and `stop` are parked as oneshot senders until the pool reaches the
//! corresponding state.

use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use warden_config::PoolConfig;
use warden_ipc::{ChannelMessage, HandshakeStatus, Sentinel, WORKER_ID_ENV};
use warden_process::{ExitInfo, ProcessEvent, ProcessHandle, ProgramSpec, Signal};
use warden_resilience::RestartBackoff;

use crate::error::{PoolError, PoolResult};
use crate::events::PoolEvent;
use crate::pool::{PoolSnapshot, WorkerSnapshot};
use crate::worker::{Worker, WorkerId};

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Start(Reply<PoolResult<()>>),
    Stop(Reply<PoolResult<()>>),
    Fork(Reply<PoolResult<Worker>>),
    Send(JsonValue),
    Kill(Signal),
    Workers(Reply<Vec<Worker>>),
    Snapshot(Reply<PoolSnapshot>),
}

enum WorkerInput {
    /// The OS process exists; plain-mode workers are online from here
    Spawned,
    Process(ProcessEvent),
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Respawn { exit: ExitInfo, epoch: u64 },
    DrainExpired(WorkerId),
    StopPoll(u64),
    StopBackstop(u64),
}

/// Why a worker was forked, settled once it comes online
enum Replacement {
    Recycle { retiring: WorkerId },
    Respawn { exit: ExitInfo },
}

struct WorkerSlot {
    worker: Worker,
    online: bool,
    recycling: bool,
    /// Exit was requested by the pool and must not trigger a respawn
    voluntary: bool,
    drain: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    fn new(worker: Worker) -> Self {
        Self {
            worker,
            online: false,
            recycling: false,
            voluntary: false,
            drain: None,
        }
    }
}

struct PendingStart {
    members: HashSet<WorkerId>,
    online: usize,
    reply: Reply<PoolResult<()>>,
}

struct PendingStop {
    generation: u64,
    replies: Vec<Reply<PoolResult<()>>>,
    poll: Option<JoinHandle<()>>,
    backstop: JoinHandle<()>,
}

impl PendingStop {
    fn cancel_timers(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        self.backstop.abort();
    }
}

/// Spawn the pool task and return its command channel
pub(crate) fn spawn(
    spec: ProgramSpec,
    config: PoolConfig,
    events: broadcast::Sender<PoolEvent>,
) -> mpsc::UnboundedSender<Command> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (worker_tx, worker_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let core = PoolCore::new(spec, config, events, worker_tx, timer_tx);
    tokio::spawn(core.run(command_rx, worker_rx, timer_rx));

    command_tx
}

struct PoolCore {
    spec: ProgramSpec,
    config: PoolConfig,
    count: usize,
    events: broadcast::Sender<PoolEvent>,

    workers: BTreeMap<WorkerId, WorkerSlot>,
    counters: HashMap<WorkerId, u64>,
    replacements: HashMap<WorkerId, Replacement>,
    requests: u64,
    next_id: u64,

    running: bool,
    stopping: bool,
    /// Bumped on every start so respawns scheduled by an earlier run are dropped
    epoch: u64,
    stop_generation: u64,
    pending_start: Option<PendingStart>,
    pending_stop: Option<PendingStop>,
    backoff: RestartBackoff,

    worker_tx: mpsc::UnboundedSender<(WorkerId, WorkerInput)>,
    timer_tx: mpsc::UnboundedSender<Timer>,
}

impl PoolCore {
    fn new(
        spec: ProgramSpec,
        config: PoolConfig,
        events: broadcast::Sender<PoolEvent>,
        worker_tx: mpsc::UnboundedSender<(WorkerId, WorkerInput)>,
        timer_tx: mpsc::UnboundedSender<Timer>,
    ) -> Self {
        let count = config.count.unwrap_or_else(num_cpus::get);
        let backoff = RestartBackoff::for_respawn(
            config.respawn_backoff.clone(),
            config.respawn_delay,
            config.max_respawn_delay,
            config.respawn_jitter,
        );

        Self {
            spec,
            config,
            count,
            events,
            workers: BTreeMap::new(),
            counters: HashMap::new(),
            replacements: HashMap::new(),
            requests: 0,
            next_id: 1,
            running: false,
            stopping: false,
            epoch: 0,
            stop_generation: 0,
            pending_start: None,
            pending_stop: None,
            backoff,
            worker_tx,
            timer_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_events: mpsc::UnboundedReceiver<(WorkerId, WorkerInput)>,
        mut timers: mpsc::UnboundedReceiver<Timer>,
    ) {
        debug!("Pool for {} ready with {} workers", self.spec.display_name(), self.count);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((id, input)) = worker_events.recv() => self.handle_worker(id, input),
                Some(timer) = timers.recv() => self.handle_timer(timer),
            }
        }

        self.abandon();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.start(reply),
            Command::Stop(reply) => self.stop(reply),
            Command::Fork(reply) => {
                let _ = reply.send(self.fork_worker());
            }
            Command::Send(message) => self.broadcast(message),
            Command::Kill(signal) => self.kill_all(signal),
            Command::Workers(reply) => {
                let workers = self.workers.values().map(|slot| slot.worker.clone()).collect();
                let _ = reply.send(workers);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_worker(&mut self, id: WorkerId, input: WorkerInput) {
        match input {
            WorkerInput::Spawned => {
                if !self.config.enhanced {
                    self.mark_online(id);
                }
            }
            WorkerInput::Process(ProcessEvent::Message(message)) => self.on_message(id, message),
            WorkerInput::Process(ProcessEvent::Disconnect) => self.on_disconnect(id),
            WorkerInput::Process(ProcessEvent::Exit(exit)) => self.on_exit(id, exit),
            WorkerInput::Process(ProcessEvent::Close) => trace!("Worker {} closed", id),
        }
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Respawn { exit, epoch } => self.respawn(exit, epoch),
            Timer::DrainExpired(id) => {
                if let Some(slot) = self.workers.get_mut(&id) {
                    if slot.drain.take().is_some() {
                        warn!("Worker {} did not drain in time, killing", id);
                        let _ = slot.worker.kill(Signal::SIGKILL);
                    }
                }
            }
            Timer::StopPoll(generation) => {
                if self.is_current_stop(generation) {
                    if self.workers.is_empty() {
                        self.finish_stop();
                    } else {
                        debug!("Waiting for {} workers to exit", self.workers.len());
                    }
                }
            }
            Timer::StopBackstop(generation) => {
                if self.is_current_stop(generation) {
                    warn!(
                        "Stop timeout reached, killing {} remaining workers",
                        self.workers.len()
                    );
                    for slot in self.workers.values() {
                        let _ = slot.worker.kill(Signal::SIGKILL);
                    }
                    self.finish_stop();
                }
            }
        }
    }

    fn start(&mut self, reply: Reply<PoolResult<()>>) {
        let refused = if self.running {
            Some(PoolError::AlreadyRunning)
        } else if self.pending_start.is_some() {
            Some(PoolError::StartInProgress)
        } else if self.stopping {
            Some(PoolError::Stopping)
        } else {
            None
        };
        if let Some(err) = refused {
            let _ = reply.send(Err(err));
            return;
        }

        info!("Starting {} workers of {}", self.count, self.spec.display_name());
        self.epoch += 1;
        self.backoff.reset();
        self.pending_start = Some(PendingStart {
            members: HashSet::new(),
            online: 0,
            reply,
        });

        for _ in 0..self.count {
            match self.fork_worker() {
                Ok(worker) => {
                    if let Some(pending) = self.pending_start.as_mut() {
                        pending.members.insert(worker.id());
                    }
                }
                Err(e) => {
                    error!("Failed to fork worker: {}", e);
                    self.fail_start(e);
                    return;
                }
            }
        }
    }

    fn finish_start(&mut self) {
        let Some(pending) = self.pending_start.take() else {
            return;
        };
        self.running = true;
        info!("Pool started with {} workers", pending.members.len());
        self.emit(PoolEvent::Started);
        let _ = pending.reply.send(Ok(()));
    }

    /// Abandon a pending start, killing the workers it forked
    fn fail_start(&mut self, err: PoolError) {
        let Some(pending) = self.pending_start.take() else {
            return;
        };
        warn!("Pool start failed: {}", err);
        for id in &pending.members {
            if let Some(slot) = self.workers.get_mut(id) {
                slot.voluntary = true;
                let _ = slot.worker.kill(Signal::SIGKILL);
            }
        }
        let _ = pending.reply.send(Err(err));
    }

    fn stop(&mut self, reply: Reply<PoolResult<()>>) {
        if let Some(pending) = self.pending_stop.as_mut() {
            pending.replies.push(reply);
            return;
        }

        if let Some(pending) = self.pending_start.take() {
            warn!("Stop requested while starting, aborting start");
            let _ = pending.reply.send(Err(PoolError::StartAborted));
        } else if !self.running {
            let _ = reply.send(Ok(()));
            return;
        }

        info!("Stopping pool ({} workers)", self.workers.len());
        self.stopping = true;
        self.stop_generation += 1;
        let generation = self.stop_generation;
        self.emit(PoolEvent::Stopping);

        for slot in self.workers.values_mut() {
            slot.voluntary = true;
        }
        self.replacements.clear();

        let poll = if self.config.enhanced {
            self.broadcast(Sentinel::Stop.to_value());
            Some(self.schedule_every(self.config.stop_poll_interval, Timer::StopPoll(generation)))
        } else {
            None
        };
        let backstop = self.schedule(
            self.config.effective_stop_timeout(),
            Timer::StopBackstop(generation),
        );

        self.pending_stop = Some(PendingStop {
            generation,
            replies: vec![reply],
            poll,
            backstop,
        });

        if self.workers.is_empty() {
            self.finish_stop();
        }
    }

    fn is_current_stop(&self, generation: u64) -> bool {
        matches!(&self.pending_stop, Some(pending) if pending.generation == generation)
    }

    fn finish_stop(&mut self) {
        let Some(mut pending) = self.pending_stop.take() else {
            return;
        };
        pending.cancel_timers();

        info!("Pool stopped");
        self.emit(PoolEvent::Stopped);
        self.running = false;
        self.stopping = false;

        for reply in pending.replies.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    fn fork_worker(&mut self) -> PoolResult<Worker> {
        let id = WorkerId(self.next_id);
        self.next_id += 1;

        let spec = self.spec.clone().with_env(WORKER_ID_ENV, id.to_string());
        let (process, process_events) = ProcessHandle::spawn(&spec)?;
        let worker = Worker::new(id, process);
        debug!("Forked worker {} (pid {})", id, worker.pid());

        self.counters.insert(id, 0);
        self.workers.insert(id, WorkerSlot::new(worker.clone()));
        tokio::spawn(forward_worker_events(id, process_events, self.worker_tx.clone()));

        Ok(worker)
    }

    fn mark_online(&mut self, id: WorkerId) {
        let worker = match self.workers.get_mut(&id) {
            Some(slot) if !slot.online => {
                slot.online = true;
                slot.worker.clone()
            }
            _ => return,
        };

        info!("Worker {} (pid {}) is online", id, worker.pid());
        self.emit(PoolEvent::Online(worker.clone()));

        match self.replacements.remove(&id) {
            Some(Replacement::Recycle { retiring }) => self.retire(retiring),
            Some(Replacement::Respawn { exit }) => {
                info!("Worker {} respawned after exit with {}", id, exit);
                self.emit(PoolEvent::Respawn { worker, exit });
            }
            None => {}
        }

        let complete = match self.pending_start.as_mut() {
            Some(pending) if pending.members.contains(&id) => {
                pending.online += 1;
                pending.online == pending.members.len()
            }
            _ => false,
        };
        if complete {
            self.finish_start();
        }
    }

    fn on_message(&mut self, id: WorkerId, message: JsonValue) {
        match ChannelMessage::classify(message) {
            ChannelMessage::Status(status) => match status.status {
                HandshakeStatus::Started if self.config.enhanced => self.mark_online(id),
                HandshakeStatus::Error => self.on_worker_error(id, status.error_text()),
                other => debug!("Ignoring {} status from worker {}", other, id),
            },
            ChannelMessage::Sentinel(Sentinel::Request) => self.record_request(id),
            ChannelMessage::Sentinel(Sentinel::Stop) => {
                debug!("Ignoring stop sentinel from worker {}", id)
            }
            ChannelMessage::Payload(payload) => trace!("Worker {} sent {}", id, payload),
        }
    }

    fn on_worker_error(&mut self, id: WorkerId, message: String) {
        let Some(slot) = self.workers.get(&id) else {
            return;
        };
        let worker = slot.worker.clone();
        let online = slot.online;

        warn!("Worker {} reported an error: {}", id, message);
        self.emit(PoolEvent::Error {
            worker,
            message: message.clone(),
        });

        let starting = matches!(&self.pending_start, Some(pending) if pending.members.contains(&id));
        if starting && !online {
            self.fail_start(PoolError::Startup(message));
        } else if let Some(pending) = self.pending_stop.as_mut() {
            for reply in pending.replies.drain(..) {
                let _ = reply.send(Err(PoolError::StopFailed(message.clone())));
            }
        }
    }

    fn record_request(&mut self, id: WorkerId) {
        let Some(counter) = self.counters.get_mut(&id) else {
            debug!("Request from unknown worker {}", id);
            return;
        };
        *counter += 1;
        let count = *counter;
        self.requests += 1;
        trace!("Worker {} served {} requests", id, count);

        if let Some(max) = self.config.max_connections {
            if count >= max {
                self.recycle(id, count);
            }
        }
    }

    /// Fork a replacement for `id`; the old worker is retired once it is online
    fn recycle(&mut self, id: WorkerId, count: u64) {
        if self.stopping {
            return;
        }
        match self.workers.get_mut(&id) {
            Some(slot) if !slot.recycling => {
                slot.recycling = true;
                slot.voluntary = true;
            }
            _ => return,
        }

        info!("Worker {} reached {} requests, forking replacement", id, count);
        match self.fork_worker() {
            Ok(replacement) => {
                self.replacements
                    .insert(replacement.id(), Replacement::Recycle { retiring: id });
            }
            Err(e) => {
                error!("Failed to fork replacement for worker {}: {}", id, e);
                self.clear_recycling(id);
            }
        }
    }

    fn clear_recycling(&mut self, id: WorkerId) {
        if let Some(slot) = self.workers.get_mut(&id) {
            slot.recycling = false;
            slot.voluntary = false;
        }
    }

    fn retire(&mut self, id: WorkerId) {
        let Some(worker) = self.workers.get(&id).map(|slot| slot.worker.clone()) else {
            debug!("Worker {} exited before it could be retired", id);
            return;
        };
        let count = self.counters.get(&id).copied().unwrap_or_default();

        info!("Retiring worker {} after {} requests", id, count);
        self.emit(PoolEvent::Recycle {
            worker: worker.clone(),
            count,
        });

        if self.config.enhanced {
            if let Err(e) = worker.send(Sentinel::Stop.to_value()) {
                debug!("Could not send stop to worker {}: {}", id, e);
            }
            worker.disconnect();
            let timer = self.schedule(self.config.effective_recycle_timeout(), Timer::DrainExpired(id));
            if let Some(slot) = self.workers.get_mut(&id) {
                slot.drain = Some(timer);
            }
        } else {
            let _ = worker.kill(Signal::SIGKILL);
        }
    }

    fn on_disconnect(&mut self, id: WorkerId) {
        let Some(slot) = self.workers.get_mut(&id) else {
            return;
        };
        match slot.drain.take() {
            Some(timer) => {
                timer.abort();
                debug!("Worker {} drained, killing", id);
                let _ = slot.worker.kill(Signal::SIGKILL);
            }
            None => debug!("Worker {} disconnected", id),
        }
    }

    fn on_exit(&mut self, id: WorkerId, exit: ExitInfo) {
        let Some(mut slot) = self.workers.remove(&id) else {
            debug!("Exit from unknown worker {}", id);
            return;
        };
        self.counters.remove(&id);
        if let Some(timer) = slot.drain.take() {
            timer.abort();
        }

        info!("Worker {} (pid {}) exited with {}", id, slot.worker.pid(), exit);
        self.emit(PoolEvent::Exit {
            worker: slot.worker.clone(),
            exit,
        });

        // A recycle replacement that never came online leaves the old worker in service
        let mut failed_replacement = false;
        if let Some(Replacement::Recycle { retiring }) = self.replacements.remove(&id) {
            warn!(
                "Replacement worker {} for {} exited before coming online",
                id, retiring
            );
            self.clear_recycling(retiring);
            failed_replacement = true;
        }

        let starting = matches!(&self.pending_start, Some(pending) if pending.members.contains(&id));
        if starting {
            self.fail_start(PoolError::WorkerExited { worker: id, exit });
        }

        let respawn = self.config.respawn
            && self.running
            && !self.stopping
            && !slot.voluntary
            && !failed_replacement;
        if respawn {
            let delay = self.backoff.next_delay();
            info!(
                "Respawning worker {} in {:?} (crash {} of streak)",
                id,
                delay,
                self.backoff.streak()
            );
            self.schedule(
                delay,
                Timer::Respawn {
                    exit,
                    epoch: self.epoch,
                },
            );
        }

        if self.stopping && self.workers.is_empty() {
            self.finish_stop();
        }
    }

    fn respawn(&mut self, exit: ExitInfo, epoch: u64) {
        if epoch != self.epoch || !self.running || self.stopping {
            debug!("Dropping stale respawn");
            return;
        }

        match self.fork_worker() {
            Ok(worker) => {
                self.replacements
                    .insert(worker.id(), Replacement::Respawn { exit });
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                error!("Failed to respawn worker, retrying in {:?}: {}", delay, e);
                self.schedule(delay, Timer::Respawn { exit, epoch });
            }
        }
    }

    fn broadcast(&self, message: JsonValue) {
        for slot in self.workers.values() {
            if !slot.worker.is_connected() {
                trace!("Skipping disconnected worker {}", slot.worker.id());
                continue;
            }
            if let Err(e) = slot.worker.send(message.clone()) {
                warn!("Failed to send to worker {}: {}", slot.worker.id(), e);
            }
        }
    }

    fn kill_all(&mut self, signal: Signal) {
        info!("Sending {} to {} workers", signal, self.workers.len());
        for slot in self.workers.values_mut() {
            slot.voluntary = true;
            if let Err(e) = slot.worker.kill(signal) {
                warn!("Failed to signal worker {}: {}", slot.worker.id(), e);
            }
        }
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            running: self.running,
            stopping: self.stopping,
            requests: self.requests,
            workers: self
                .workers
                .iter()
                .map(|(id, slot)| WorkerSnapshot {
                    worker: slot.worker.clone(),
                    online: slot.online,
                    recycling: slot.recycling,
                    requests: self.counters.get(id).copied().unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Every handle is gone: nothing can stop the workers any more
    fn abandon(&mut self) {
        if !self.workers.is_empty() {
            warn!("Pool handle dropped, killing {} workers", self.workers.len());
        }
        for slot in self.workers.values_mut() {
            slot.voluntary = true;
            if let Some(timer) = slot.drain.take() {
                timer.abort();
            }
            let _ = slot.worker.kill(Signal::SIGKILL);
        }
        if let Some(mut pending) = self.pending_stop.take() {
            pending.cancel_timers();
        }
    }

    fn emit(&self, event: PoolEvent) {
        trace!("Pool event: {}", event.name());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn schedule(&self, delay: Duration, timer: Timer) -> JoinHandle<()> {
        let timers = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(timer);
        })
    }

    fn schedule_every(&self, period: Duration, timer: Timer) -> JoinHandle<()> {
        let timers = self.timer_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if timers.send(timer).is_err() {
                    break;
                }
            }
        })
    }
}

/// Tag a worker's process events with its id and feed them to the pool task
async fn forward_worker_events(
    id: WorkerId,
    mut process_events: mpsc::UnboundedReceiver<ProcessEvent>,
    pool: mpsc::UnboundedSender<(WorkerId, WorkerInput)>,
) {
    if pool.send((id, WorkerInput::Spawned)).is_err() {
        return;
    }
    while let Some(event) = process_events.recv().await {
        if pool.send((id, WorkerInput::Process(event))).is_err() {
            break;
        }
    }
}
