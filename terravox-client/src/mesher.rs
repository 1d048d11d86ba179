//! The mesh worker pool: a fixed set of workers fed from a priority and a
//! regular queue, with transfer-based recycling of the 34-cubed sample
//! grids so steady-state meshing allocates nothing.
//!
//! Ownership flow: a dispatch moves a grid buffer into the pool, a worker
//! moves it into its task, and the completion event moves it back into the
//! spare pool. Nothing is shared mutably across threads; results and
//! buffers travel by message.

use parking_lot::Mutex;
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use terravox_common::{
    material::MaterialRegistry,
    mesh::{ChunkMesh, SkipHighBoundary, SurfaceNetsMesher, SAMPLE_VOLUME},
    util::Completions,
    world::ChunkPos,
};

/// Worker panics tolerated before the pool gives up on its threads and
/// falls back to caller-thread meshing.
const MAX_WORKER_PANICS: u32 = 4;

pub type GridBuffer = Box<[u16]>;

pub struct MeshRequest {
    pub key: ChunkPos,
    pub grid: GridBuffer,
    pub skip: SkipHighBoundary,
}

#[derive(Debug)]
pub struct MeshResultData {
    pub key: ChunkPos,
    pub mesh: ChunkMesh,
}

pub enum MeshEvent {
    /// A single-chunk dispatch finished.
    Chunk(MeshResultData),
    /// Every job of a batch finished (cancelled batches never emit).
    Batch {
        batch_id: u64,
        results: Vec<MeshResultData>,
    },
}

pub type CancelFn = Box<dyn FnOnce() + Send>;

struct Job {
    key: ChunkPos,
    grid: GridBuffer,
    skip: SkipHighBoundary,
    request_id: u64,
    batch: Option<u64>,
}

struct BatchState {
    remaining: usize,
    canceled: bool,
    results: Vec<MeshResultData>,
}

enum WorkerEvent {
    Done {
        key: ChunkPos,
        request_id: u64,
        batch: Option<u64>,
        grid: GridBuffer,
        mesh: ChunkMesh,
    },
    Panicked {
        key: ChunkPos,
        request_id: u64,
        batch: Option<u64>,
    },
}

#[derive(Default)]
struct Shared {
    priority: VecDeque<Job>,
    regular: VecDeque<Job>,
    /// newest request id per chunk; stale completions are dropped silently
    active: HashMap<ChunkPos, u64>,
    preview: HashSet<ChunkPos>,
    batches: HashMap<u64, BatchState>,
    spare_grids: Vec<GridBuffer>,
    next_request: u64,
    next_batch: u64,
    panic_count: u32,
}

impl Shared {
    fn pop_job(&mut self) -> Option<Job> {
        self.priority.pop_front().or_else(|| self.regular.pop_front())
    }

    fn recycle(&mut self, grid: GridBuffer) {
        self.spare_grids.push(grid);
    }

    /// Remove queued jobs matching `predicate`, recycling their grids.
    /// Batch accounting: callers that drop batch members must fix the
    /// batch's `remaining` themselves (only the cancel closure does).
    fn drop_queued<F: Fn(&Job) -> bool>(&mut self, predicate: F) -> usize {
        let mut dropped = 0;
        for queue in [&mut self.priority, &mut self.regular] {
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(job) = queue.pop_front() {
                if predicate(&job) {
                    if self.active.get(&job.key) == Some(&job.request_id) {
                        self.active.remove(&job.key);
                    }
                    if job.batch.is_some() {
                        self.preview.remove(&job.key);
                    }
                    self.spare_grids.push(job.grid);
                    dropped += 1;
                } else {
                    kept.push_back(job);
                }
            }
            *queue = kept;
        }
        dropped
    }
}

pub struct MeshWorkerPool {
    pool: Option<rayon::ThreadPool>,
    shared: Arc<Mutex<Shared>>,
    events: Completions<WorkerEvent>,
    registry: Arc<MaterialRegistry>,
}

thread_local! {
    static MESHER: RefCell<SurfaceNetsMesher> = RefCell::new(SurfaceNetsMesher::new());
}

fn run_job(registry: &MaterialRegistry, job: &Job) -> std::thread::Result<ChunkMesh> {
    catch_unwind(AssertUnwindSafe(|| {
        MESHER.with(|mesher| mesher.borrow_mut().mesh(&job.grid, registry.type_lut(), job.skip))
    }))
}

impl MeshWorkerPool {
    pub fn new(workers: usize, registry: Arc<MaterialRegistry>) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("mesh-worker-{}", index))
            .build()
            .map_err(|err| log::error!("mesh pool failed to start, falling back: {}", err))
            .ok();

        Self {
            pool,
            shared: Arc::new(Mutex::new(Shared::default())),
            events: Completions::new(),
            registry,
        }
    }

    /// A zeroed sample grid, reusing a recycled one when available.
    pub fn take_grid(&self) -> GridBuffer {
        let recycled = self.shared.lock().spare_grids.pop();
        match recycled {
            Some(mut grid) => {
                grid.iter_mut().for_each(|slot| *slot = 0);
                grid
            }
            None => vec![0u16; SAMPLE_VOLUME].into_boxed_slice(),
        }
    }

    pub fn spare_grid_count(&self) -> usize {
        self.shared.lock().spare_grids.len()
    }

    pub fn in_flight(&self, key: ChunkPos) -> bool {
        self.shared.lock().active.contains_key(&key)
    }

    pub fn is_preview_chunk(&self, key: ChunkPos) -> bool {
        self.shared.lock().preview.contains(&key)
    }

    /// Queue one chunk. `priority` puts it ahead of streaming re-meshes. A
    /// newer dispatch for the same chunk supersedes anything queued or in
    /// flight.
    pub fn dispatch(&self, request: MeshRequest, priority: bool) {
        {
            let mut shared = self.shared.lock();
            // a queued older job for this chunk is now pointless; batch
            // members stay queued, their batches account for them
            shared.drop_queued(|job| job.key == request.key && job.batch.is_none());

            let request_id = shared.next_request;
            shared.next_request += 1;
            shared.active.insert(request.key, request_id);

            let job = Job {
                key: request.key,
                grid: request.grid,
                skip: request.skip,
                request_id,
                batch: None,
            };
            if priority {
                shared.priority.push_back(job);
            } else {
                shared.regular.push_back(job);
            }
        }
        self.spawn_worker();
    }

    /// Queue a batch (a build preview re-mesh). The batch completes
    /// atomically: one [`MeshEvent::Batch`] once every member finished.
    /// The returned closure cancels it: queued members are recycled,
    /// in-flight results are dropped on arrival.
    pub fn dispatch_batch(&self, requests: Vec<MeshRequest>) -> (u64, CancelFn) {
        let batch_id;
        let count = requests.len();
        {
            let mut shared = self.shared.lock();
            batch_id = shared.next_batch;
            shared.next_batch += 1;
            shared.batches.insert(
                batch_id,
                BatchState {
                    remaining: count,
                    canceled: false,
                    results: Vec::with_capacity(count),
                },
            );

            for request in requests {
                shared.drop_queued(|job| job.key == request.key && job.batch.is_none());
                let request_id = shared.next_request;
                shared.next_request += 1;
                shared.active.insert(request.key, request_id);
                shared.preview.insert(request.key);
                shared.priority.push_back(Job {
                    key: request.key,
                    grid: request.grid,
                    skip: request.skip,
                    request_id,
                    batch: Some(batch_id),
                });
            }
        }
        for _ in 0..count {
            self.spawn_worker();
        }

        let shared = Arc::clone(&self.shared);
        let cancel: CancelFn = Box::new(move || {
            let mut shared = shared.lock();
            let dropped = shared.drop_queued(|job| job.batch == Some(batch_id));
            if let Some(batch) = shared.batches.get_mut(&batch_id) {
                batch.canceled = true;
                batch.remaining -= dropped;
                batch.results.clear();
                if batch.remaining == 0 {
                    shared.batches.remove(&batch_id);
                }
            }
        });
        (batch_id, cancel)
    }

    /// Forget a chunk: queued work is recycled, an in-flight result will be
    /// dropped when it lands. Batch members survive in their queue; with
    /// the chunk retired they complete as silent batch entries.
    pub fn cancel_chunk(&self, key: ChunkPos) {
        let mut shared = self.shared.lock();
        shared.drop_queued(|job| job.key == key && job.batch.is_none());
        shared.active.remove(&key);
    }

    fn spawn_worker(&self) {
        let pool = match &self.pool {
            Some(pool) if self.shared.lock().panic_count < MAX_WORKER_PANICS => pool,
            _ => return, // fallback: poll() drains the queues inline
        };

        let shared = Arc::clone(&self.shared);
        let registry = Arc::clone(&self.registry);
        let tx = self.events.sender();
        pool.spawn(move || {
            let job = match shared.lock().pop_job() {
                Some(job) => job,
                None => return,
            };

            match run_job(&registry, &job) {
                Ok(mesh) => {
                    let _ = tx.send(WorkerEvent::Done {
                        key: job.key,
                        request_id: job.request_id,
                        batch: job.batch,
                        grid: job.grid,
                        mesh,
                    });
                }
                Err(_) => {
                    log::error!("mesh worker panicked on chunk {}", job.key);
                    shared.lock().panic_count += 1;
                    let _ = tx.send(WorkerEvent::Panicked {
                        key: job.key,
                        request_id: job.request_id,
                        batch: job.batch,
                    });
                }
            }
        });
    }

    /// True once the pool stopped trusting its workers; jobs then run on
    /// the polling thread, one per call, so the caller keeps yielding
    /// between chunks.
    pub fn is_fallback(&self) -> bool {
        self.pool.is_none() || self.shared.lock().panic_count >= MAX_WORKER_PANICS
    }

    /// Drain finished work. Call once per frame; also runs one queued job
    /// inline when the pool is in fallback mode.
    pub fn poll(&self) -> Vec<MeshEvent> {
        if self.is_fallback() {
            let job = self.shared.lock().pop_job();
            if let Some(job) = job {
                if let Ok(mesh) = run_job(&self.registry, &job) {
                    self.events.push(WorkerEvent::Done {
                        key: job.key,
                        request_id: job.request_id,
                        batch: job.batch,
                        grid: job.grid,
                        mesh,
                    });
                }
            }
        }

        let mut out = Vec::new();
        for event in self.events.drain() {
            let mut shared = self.shared.lock();
            match event {
                WorkerEvent::Done {
                    key,
                    request_id,
                    batch,
                    grid,
                    mesh,
                } => {
                    shared.recycle(grid);

                    // a cancel or a newer dispatch retired this request
                    let current = shared.active.get(&key) == Some(&request_id);
                    if current {
                        shared.active.remove(&key);
                    }

                    match batch {
                        None => {
                            if current {
                                out.push(MeshEvent::Chunk(MeshResultData { key, mesh }));
                            }
                        }
                        Some(batch_id) => {
                            shared.preview.remove(&key);
                            if let Some(state) = shared.batches.get_mut(&batch_id) {
                                state.remaining -= 1;
                                if current && !state.canceled {
                                    state.results.push(MeshResultData { key, mesh });
                                }
                                if state.remaining == 0 {
                                    let state = shared.batches.remove(&batch_id).unwrap();
                                    if !state.canceled {
                                        out.push(MeshEvent::Batch {
                                            batch_id,
                                            results: state.results,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
                WorkerEvent::Panicked {
                    key,
                    request_id,
                    batch,
                } => {
                    if shared.active.get(&key) == Some(&request_id) {
                        shared.active.remove(&key);
                    }
                    if let Some(batch_id) = batch {
                        shared.preview.remove(&key);
                        if let Some(state) = shared.batches.get_mut(&batch_id) {
                            state.remaining -= 1;
                            if state.remaining == 0 {
                                let state = shared.batches.remove(&batch_id).unwrap();
                                if !state.canceled {
                                    out.push(MeshEvent::Batch {
                                        batch_id,
                                        results: state.results,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use terravox_common::{
        mesh::fill_sample_grid,
        world::chunk::{Chunk, HighNeighbors},
    };

    fn pool() -> MeshWorkerPool {
        MeshWorkerPool::new(2, MaterialRegistry::with_default_materials())
    }

    fn flat_request(pool: &MeshWorkerPool, pos: ChunkPos) -> MeshRequest {
        let chunk = Chunk::flat(pos, 16, 3);
        let mut grid = pool.take_grid();
        fill_sample_grid(&chunk, &HighNeighbors::default(), &mut grid);
        MeshRequest {
            key: pos,
            grid,
            skip: SkipHighBoundary::all(),
        }
    }

    fn poll_until<F: FnMut(&mut Vec<MeshEvent>) -> bool>(
        pool: &MeshWorkerPool,
        mut done: F,
    ) -> Vec<MeshEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            events.extend(pool.poll());
            if done(&mut events) {
                return events;
            }
            std::thread::yield_now();
        }
        panic!("mesh pool did not finish in time; events so far: {}", events.len());
    }

    #[test]
    fn dispatch_completes_and_recycles_the_grid() {
        let pool = pool();
        let pos = ChunkPos::new([0, 0, 0]);
        pool.dispatch(flat_request(&pool, pos), false);
        assert!(pool.in_flight(pos));

        let events = poll_until(&pool, |events| !events.is_empty());
        match &events[0] {
            MeshEvent::Chunk(result) => {
                assert_eq!(result.key, pos);
                assert!(result.mesh.solid.triangle_count() > 0);
            }
            MeshEvent::Batch { .. } => panic!("expected a chunk event"),
        }

        assert!(!pool.in_flight(pos));
        assert_eq!(pool.spare_grid_count(), 1);

        // the next take reuses the recycled buffer
        let grid = pool.take_grid();
        assert_eq!(grid.len(), SAMPLE_VOLUME);
        assert_eq!(pool.spare_grid_count(), 0);
    }

    #[test]
    fn cancel_chunk_silences_the_result() {
        let pool = pool();
        let pos = ChunkPos::new([1, 0, 0]);
        pool.dispatch(flat_request(&pool, pos), false);
        pool.cancel_chunk(pos);
        assert!(!pool.in_flight(pos));

        // wait for the buffer to come home; no chunk event may surface
        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.spare_grid_count() == 0 && Instant::now() < deadline {
            let events = pool.poll();
            assert!(events.is_empty(), "cancelled chunk produced an event");
            std::thread::yield_now();
        }
        assert_eq!(pool.spare_grid_count(), 1);
    }

    #[test]
    fn batches_complete_atomically() {
        let pool = pool();
        let requests: Vec<_> = (0..4)
            .map(|i| flat_request(&pool, ChunkPos::new([i, 0, 0])))
            .collect();
        let keys: Vec<_> = requests.iter().map(|r| r.key).collect();

        let (batch_id, _cancel) = pool.dispatch_batch(requests);
        for &key in keys.iter() {
            assert!(pool.is_preview_chunk(key));
        }

        let events = poll_until(&pool, |events| {
            events.iter().any(|e| matches!(e, MeshEvent::Batch { .. }))
        });
        let (id, results) = events
            .iter()
            .find_map(|event| match event {
                MeshEvent::Batch { batch_id, results } => Some((*batch_id, results)),
                _ => None,
            })
            .unwrap();

        assert_eq!(id, batch_id);
        assert_eq!(results.len(), 4);
        for &key in keys.iter() {
            assert!(!pool.is_preview_chunk(key));
            assert!(results.iter().any(|r| r.key == key));
        }
    }

    #[test]
    fn cancelled_batches_never_emit() {
        let pool = pool();
        let requests: Vec<_> = (0..8)
            .map(|i| flat_request(&pool, ChunkPos::new([i, 2, 0])))
            .collect();

        let (_batch_id, cancel) = pool.dispatch_batch(requests);
        cancel();

        // grids must all come home, with no batch event ever surfacing
        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.spare_grid_count() < 8 && Instant::now() < deadline {
            for event in pool.poll() {
                assert!(
                    !matches!(event, MeshEvent::Batch { .. }),
                    "cancelled batch emitted"
                );
            }
            std::thread::yield_now();
        }
        assert_eq!(pool.spare_grid_count(), 8);
    }

    #[test]
    fn redispatch_supersedes_the_older_request() {
        let pool = pool();
        let pos = ChunkPos::new([5, 0, 0]);
        pool.dispatch(flat_request(&pool, pos), false);
        pool.dispatch(flat_request(&pool, pos), true);

        // exactly one result surfaces no matter how the two raced
        let events = poll_until(&pool, |events| {
            events
                .iter()
                .filter(|e| matches!(e, MeshEvent::Chunk(_)))
                .count()
                >= 1
                && pool.spare_grid_count() == 2
        });
        let results = events
            .iter()
            .filter(|e| matches!(e, MeshEvent::Chunk(_)))
            .count();
        assert_eq!(results, 1);
        assert!(!pool.in_flight(pos));
    }
}
