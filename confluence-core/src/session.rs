//! Session orchestration: wiring, worker threads and shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use sluice::{INITIAL_SEQUENCE, OrderedRelease, Sequence, SequencedRing};
use snafu::{ResultExt, ensure};

use crate::channel::{ChannelCursor, InputChannel, OutputChannel};
use crate::config::{BuildMode, SessionConfig};
use crate::control::{ControlCoordinator, Phase};
use crate::distribute::OutputDistributor;
use crate::error::{BuildError, ConfigurationSnafu, Result, SpawnSnafu};
use crate::payload::PayloadPool;
use crate::round_robin::RoundRobinWorker;
use crate::slice::{PeerSet, SliceBuilder};
use crate::sorter::{SliceItem, TimeFrameSorter};

/// Per-worker counters, reported when the session joins.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Worker index; the streaming sorter reports as index `workers`.
    pub worker: usize,
    /// Composite records published; stays zero for the sorter, which only
    /// dispatches.
    pub built: u64,
    /// Composite payload bytes published.
    pub bytes: u64,
    /// Side records forwarded downstream.
    pub side_forwarded: u64,
    /// Records whose source id did not match their channel.
    pub id_mismatches: u64,
}

/// Final accounting for a completed (or interrupted) session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Per-worker counters, ordered by worker index.
    pub workers: Vec<WorkerStats>,
}

impl SessionReport {
    /// Total composite records published.
    #[must_use]
    pub fn built(&self) -> u64 {
        self.workers.iter().map(|w| w.built).sum()
    }

    /// Total composite payload bytes published.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.workers.iter().map(|w| w.bytes).sum()
    }
}

/// A running event-building session.
///
/// [`prepare`](Self::prepare) validates the wiring and spawns the worker
/// threads; the session then runs until END completes the run, an error
/// stops it, or [`reset`](Self::reset) interrupts it. [`join`](Self::join)
/// harvests the workers and reports.
pub struct AggregatorSession {
    coordinator: Arc<ControlCoordinator>,
    inputs: Vec<Arc<dyn InputChannel>>,
    outputs: Vec<Arc<dyn OutputChannel>>,
    worker_rings: Vec<Arc<SequencedRing<SliceItem>>>,
    handles: Vec<(usize, JoinHandle<Result<WorkerStats>>)>,
}

impl std::fmt::Debug for AggregatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorSession")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("worker_rings", &self.worker_rings.len())
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl AggregatorSession {
    /// Validate the wiring and spawn the build threads.
    pub fn prepare(
        inputs: Vec<Arc<dyn InputChannel>>,
        outputs: Vec<Arc<dyn OutputChannel>>,
        config: SessionConfig,
    ) -> Result<Self> {
        ensure!(
            !inputs.is_empty(),
            ConfigurationSnafu {
                message: "at least one input channel is required",
            }
        );
        ensure!(
            !outputs.is_empty(),
            ConfigurationSnafu {
                message: "at least one output channel is required",
            }
        );
        ensure!(
            config.workers >= 1,
            ConfigurationSnafu {
                message: "at least one build worker is required",
            }
        );
        for output in &outputs {
            ensure!(
                output.rings().len() == config.workers,
                ConfigurationSnafu {
                    message: format!(
                        "output channel {} has {} rings, expected one per worker ({})",
                        output.info().name,
                        output.rings().len(),
                        config.workers
                    ),
                }
            );
        }
        if config.mode == BuildMode::Triggered {
            for input in &inputs {
                ensure!(
                    input.ring().capacity() >= config.workers,
                    ConfigurationSnafu {
                        message: format!(
                            "input channel {} ring holds {} slots, fewer than {} workers",
                            input.info().name,
                            input.ring().capacity(),
                            config.workers
                        ),
                    }
                );
            }
        }

        let coordinator = Arc::new(ControlCoordinator::new());
        let pool = PayloadPool::new(config.pool_buffers, config.pool_buffer_capacity);

        let mut session = Self {
            coordinator: Arc::clone(&coordinator),
            inputs,
            outputs,
            worker_rings: Vec::new(),
            handles: Vec::new(),
        };
        match config.mode {
            BuildMode::Triggered => session.spawn_triggered(&config, &pool)?,
            BuildMode::Streaming => session.spawn_streaming(&config, &pool)?,
        }
        tracing::info!(
            name = %config.name,
            mode = ?config.mode,
            workers = config.workers,
            inputs = session.inputs.len(),
            outputs = session.outputs.len(),
            "session prepared"
        );
        Ok(session)
    }

    fn spawn_triggered(&mut self, config: &SessionConfig, pool: &PayloadPool) -> Result<()> {
        // every worker gates every input ring with its own sequence
        let peer_sequences: Arc<Vec<Vec<Arc<Sequence>>>> = Arc::new(
            (0..config.workers)
                .map(|_| {
                    self.inputs
                        .iter()
                        .map(|input| {
                            let sequence = Arc::new(Sequence::new(INITIAL_SEQUENCE));
                            input.ring().add_gating_sequence(Arc::clone(&sequence));
                            sequence
                        })
                        .collect()
                })
                .collect(),
        );

        for worker in 0..config.workers {
            let cursors: Vec<ChannelCursor> = self
                .inputs
                .iter()
                .enumerate()
                .map(|(channel, input)| {
                    ChannelCursor::new(input, Arc::clone(&peer_sequences[worker][channel]))
                })
                .collect();
            let dist = OutputDistributor::new(self.outputs.clone(), worker, config.workers);
            let task = RoundRobinWorker::new(
                worker,
                cursors,
                dist,
                pool.clone(),
                Arc::clone(&peer_sequences),
                Arc::clone(&self.coordinator),
                config.clone(),
            );
            let handle = std::thread::Builder::new()
                .name(format!("{}:builder{}", config.name, worker))
                .spawn(move || task.run())
                .context(SpawnSnafu)?;
            self.handles.push((worker, handle));
        }
        Ok(())
    }

    fn spawn_streaming(&mut self, config: &SessionConfig, pool: &PayloadPool) -> Result<()> {
        // one shared gating sequence per input ring, advanced in order
        let mut shared_sequences = Vec::with_capacity(self.inputs.len());
        let mut ordered = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let sequence = Arc::new(Sequence::new(INITIAL_SEQUENCE));
            input.ring().add_gating_sequence(Arc::clone(&sequence));
            ordered.push(Arc::new(OrderedRelease::new(Arc::clone(&sequence))));
            shared_sequences.push(sequence);
        }

        let mut consumers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let ring = Arc::new(SequencedRing::<SliceItem>::new(
                config.sorter_ring_size,
                config.wait.strategy(),
            ));
            let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
            ring.add_gating_sequence(Arc::clone(&consumer));
            self.worker_rings.push(ring);
            consumers.push(consumer);
        }
        let peers: Arc<PeerSet> = Arc::new(
            self.worker_rings
                .iter()
                .cloned()
                .zip(consumers.iter().cloned())
                .collect(),
        );

        let input_rings: Vec<Arc<SequencedRing<_>>> = self
            .inputs
            .iter()
            .map(|input| Arc::clone(input.ring()))
            .collect();

        for worker in 0..config.workers {
            let task = SliceBuilder::new(
                worker,
                Arc::clone(&self.worker_rings[worker]),
                Arc::clone(&consumers[worker]),
                input_rings.clone(),
                ordered.clone(),
                Arc::clone(&peers),
                OutputDistributor::new(self.outputs.clone(), worker, config.workers),
                pool.clone(),
                Arc::clone(&self.coordinator),
                config.clone(),
            );
            let handle = std::thread::Builder::new()
                .name(format!("{}:slicer{}", config.name, worker))
                .spawn(move || task.run())
                .context(SpawnSnafu)?;
            self.handles.push((worker, handle));
        }

        let cursors: Vec<ChannelCursor> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(channel, input)| {
                ChannelCursor::new(input, Arc::clone(&shared_sequences[channel]))
            })
            .collect();
        let sorter = TimeFrameSorter::new(
            cursors,
            ordered,
            self.worker_rings.clone(),
            OutputDistributor::new(self.outputs.clone(), 0, config.workers),
            pool.clone(),
            Arc::clone(&self.coordinator),
            config.clone(),
        );
        let handle = std::thread::Builder::new()
            .name(format!("{}:sorter", config.name))
            .spawn(move || sorter.run())
            .context(SpawnSnafu)?;
        self.handles.push((config.workers, handle));
        Ok(())
    }

    /// Current run phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    /// Interrupt the session: every blocked producer and worker unwinds.
    ///
    /// Workers interrupted this way report their stats normally through
    /// [`join`](Self::join).
    pub fn reset(&self) {
        tracing::info!("session reset");
        self.alert_all();
    }

    /// Wait for every worker to finish and collect the report.
    ///
    /// The first worker failure interrupts the rest; the error is returned
    /// after all threads have been reaped.
    pub fn join(mut self) -> Result<SessionReport> {
        let mut handles = core::mem::take(&mut self.handles);
        let mut stats = Vec::with_capacity(handles.len());
        let mut first_error: Option<BuildError> = None;

        while !handles.is_empty() {
            let mut i = 0;
            while i < handles.len() {
                if !handles[i].1.is_finished() {
                    i += 1;
                    continue;
                }
                let (worker, handle) = handles.swap_remove(i);
                match handle.join() {
                    Ok(Ok(worker_stats)) => stats.push(worker_stats),
                    Ok(Err(error)) => {
                        if first_error.is_none() {
                            first_error = Some(error);
                            self.alert_all();
                        }
                    }
                    Err(_) => {
                        if first_error.is_none() {
                            first_error = Some(BuildError::WorkerPanicked { worker });
                            self.alert_all();
                        }
                    }
                }
            }
            if !handles.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        stats.sort_by_key(|s| s.worker);
        Ok(SessionReport { workers: stats })
    }

    fn alert_all(&self) {
        for input in &self.inputs {
            input.ring().alert();
        }
        for output in &self.outputs {
            for ring in output.rings() {
                ring.alert();
            }
        }
        for ring in &self.worker_rings {
            ring.alert();
        }
    }
}
