// Execution context: the single thread that serializes registry mutations.
//
// Architecture: one worker thread with a central `mpsc` channel.
//
// - **Context thread** (`run_context`): owns the `Registry`, receives
//   `ContextEvent`s from the channel, and executes each `Job` to completion
//   before looking at the next one. Jobs therefore run in submission order
//   and never race each other.
// - **Callers** (any thread, through a cloned `ContextHandle`): submit jobs
//   either synchronously (`send_sync`: the job carries a reply channel and
//   the caller blocks on it) or asynchronously (`send_async`: fire and
//   forget).
// - **Endpoints** each register a mailbox with the context. When a session
//   is kicked out, the context routes `EndpointEvent::SessionClosed` to the
//   owning endpoint's mailbox; the endpoint's owner applies it on its own
//   thread via `Endpoint::process_events`.
//
// Jobs are a closed enum dispatched by one `match` in `execute`. Adding a
// registry operation means adding a variant there.
//
// Lifetime: `ExecutionContext::start` spawns the thread; `stop` (or drop)
// queues a shutdown behind any pending jobs and joins. Submissions after
// that fail with `ContextError::Stopped`. The context must outlive every
// endpoint registered with it; an endpoint dropped after the context stops
// just logs that it could not unregister.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use ipcbus_protocol::types::{EndpointId, SessionId, SocketId};
use tracing::{debug, info};

use crate::config::ContextConfig;
use crate::error::ContextError;
use crate::registry::{Registry, RegistryStats, SessionRecord};

/// Messages the context sends to an endpoint's mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointEvent {
    /// The session was kicked out; the owner should detach it.
    SessionClosed(SessionId),
}

/// A unit of work for the context thread.
#[derive(Debug)]
pub enum Job {
    /// Assign an endpoint id. Output: `JobOutput::Endpoint`.
    RegisterEndpoint {
        name: String,
        mailbox: Sender<EndpointEvent>,
    },
    /// Release an endpoint id and any sessions still filed under it.
    UnregisterEndpoint { endpoint: EndpointId },
    /// Record a newly attached session in the cross-endpoint table.
    TrackSession(SessionRecord),
    /// Drop a detached session from the cross-endpoint table.
    ForgetSession { session: SessionId },
    /// Ask the session's owner to close it.
    DeleteSession { session: SessionId },
    /// Look up a session. Output: `JobOutput::Session`.
    GetSession { session: SessionId },
    /// Table sizes. Output: `JobOutput::Stats`.
    Stats,
    /// No-op; a sync barrier waits for everything queued before it.
    Barrier,
}

/// What a job hands back to a synchronous caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutput {
    Endpoint(EndpointId),
    Session(Option<SessionRecord>),
    Stats(RegistryStats),
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Block until the job has run.
    Sync,
    /// Queue the job and return immediately.
    Async,
}

enum ContextEvent {
    Run {
        job: Job,
        reply: Option<Sender<JobOutput>>,
    },
    Shutdown,
}

struct Shared {
    thread_id: OnceLock<ThreadId>,
    next_session_id: AtomicU32,
    next_socket_id: AtomicU32,
    jobs_submitted: AtomicU64,
}

/// Clonable handle for submitting jobs. Every endpoint holds one.
#[derive(Clone)]
pub struct ContextHandle {
    tx: Sender<ContextEvent>,
    shared: Arc<Shared>,
}

impl ContextHandle {
    /// Submit a job in the given mode. Sync submissions return the job's
    /// output; async ones return `None` once queued.
    pub fn submit(&self, job: Job, mode: SubmitMode) -> Result<Option<JobOutput>, ContextError> {
        match mode {
            SubmitMode::Sync => self.send_sync(job).map(Some),
            SubmitMode::Async => self.send_async(job).map(|()| None),
        }
    }

    /// Run `job` on the context thread and wait for its output.
    pub fn send_sync(&self, job: Job) -> Result<JobOutput, ContextError> {
        if self.on_context_thread() {
            return Err(ContextError::Reentrant);
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.enqueue(ContextEvent::Run {
            job,
            reply: Some(reply_tx),
        })?;
        // The reply sender is dropped unanswered if the context shuts down
        // with this job still queued.
        reply_rx.recv().map_err(|_| ContextError::Stopped)
    }

    /// Queue `job` without waiting.
    pub fn send_async(&self, job: Job) -> Result<(), ContextError> {
        self.enqueue(ContextEvent::Run { job, reply: None })
    }

    pub fn register_endpoint(
        &self,
        name: &str,
        mailbox: Sender<EndpointEvent>,
    ) -> Result<EndpointId, ContextError> {
        match self.send_sync(Job::RegisterEndpoint {
            name: name.to_string(),
            mailbox,
        })? {
            JobOutput::Endpoint(id) => Ok(id),
            _ => Err(ContextError::UnexpectedOutput {
                expected: "endpoint id",
            }),
        }
    }

    pub fn unregister_endpoint(&self, endpoint: EndpointId) -> Result<(), ContextError> {
        self.send_sync(Job::UnregisterEndpoint { endpoint })
            .map(|_| ())
    }

    /// Request that `session` be closed by whichever endpoint owns it. Does
    /// not wait, and does not guarantee the session is gone on return.
    pub fn delete_session(&self, session: SessionId) -> Result<(), ContextError> {
        self.send_async(Job::DeleteSession { session })
    }

    pub fn get_session(&self, session: SessionId) -> Result<Option<SessionRecord>, ContextError> {
        match self.send_sync(Job::GetSession { session })? {
            JobOutput::Session(record) => Ok(record),
            _ => Err(ContextError::UnexpectedOutput {
                expected: "session record",
            }),
        }
    }

    pub fn stats(&self) -> Result<RegistryStats, ContextError> {
        match self.send_sync(Job::Stats)? {
            JobOutput::Stats(stats) => Ok(stats),
            _ => Err(ContextError::UnexpectedOutput { expected: "stats" }),
        }
    }

    /// Wait until every job submitted before this call has run.
    pub fn flush(&self) -> Result<(), ContextError> {
        self.send_sync(Job::Barrier).map(|_| ())
    }

    pub(crate) fn track_session(&self, record: SessionRecord) -> Result<(), ContextError> {
        self.send_async(Job::TrackSession(record))
    }

    pub(crate) fn forget_session(&self, session: SessionId) -> Result<(), ContextError> {
        self.send_async(Job::ForgetSession { session })
    }

    /// Process-unique session id for a transport to stamp a new session with.
    pub fn next_session_id(&self) -> SessionId {
        SessionId(next_counter(&self.shared.next_session_id))
    }

    /// Process-unique socket id for a new session container.
    pub fn next_socket_id(&self) -> SocketId {
        SocketId(next_counter(&self.shared.next_socket_id))
    }

    /// Number of jobs accepted so far, sync and async.
    pub fn jobs_submitted(&self) -> u64 {
        self.shared.jobs_submitted.load(Ordering::SeqCst)
    }

    fn on_context_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    fn enqueue(&self, event: ContextEvent) -> Result<(), ContextError> {
        self.tx.send(event).map_err(|_| ContextError::Stopped)?;
        self.shared.jobs_submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out 0, 1, 2, ... skipping the `u32::MAX` invalid sentinel.
fn next_counter(counter: &AtomicU32) -> u32 {
    loop {
        let value = counter.fetch_add(1, Ordering::Relaxed);
        if value != u32::MAX {
            return value;
        }
    }
}

/// The running context thread. Dropping it stops the thread.
pub struct ExecutionContext {
    handle: ContextHandle,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    /// Spawn the context thread.
    pub fn start(config: ContextConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            thread_id: OnceLock::new(),
            next_session_id: AtomicU32::new(0),
            next_socket_id: AtomicU32::new(0),
            jobs_submitted: AtomicU64::new(0),
        });
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_context(rx, thread_shared))?;
        info!(thread = %config.thread_name, "execution context started");

        Ok(Self {
            handle: ContextHandle { tx, shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Let queued jobs finish, then stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.tx.send(ContextEvent::Shutdown);
        let _ = thread.join();
        info!("execution context stopped");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Context thread body. Runs until `Shutdown` or until every handle is gone.
fn run_context(rx: Receiver<ContextEvent>, shared: Arc<Shared>) {
    let _ = shared.thread_id.set(thread::current().id());
    let mut registry = Registry::new();

    while let Ok(event) = rx.recv() {
        match event {
            ContextEvent::Run { job, reply } => {
                let output = execute(&mut registry, job);
                if let Some(reply) = reply {
                    // Caller may have given up; nothing to do about it here.
                    let _ = reply.send(output);
                }
            }
            ContextEvent::Shutdown => break,
        }
    }
    debug!(stats = ?registry.stats(), "context thread exiting");
}

fn execute(registry: &mut Registry, job: Job) -> JobOutput {
    match job {
        Job::RegisterEndpoint { name, mailbox } => {
            JobOutput::Endpoint(registry.register_endpoint(name, mailbox))
        }
        Job::UnregisterEndpoint { endpoint } => {
            registry.unregister_endpoint(endpoint);
            JobOutput::Done
        }
        Job::TrackSession(record) => {
            registry.track_session(record);
            JobOutput::Done
        }
        Job::ForgetSession { session } => {
            registry.forget_session(session);
            JobOutput::Done
        }
        Job::DeleteSession { session } => {
            registry.delete_session(session);
            JobOutput::Done
        }
        Job::GetSession { session } => JobOutput::Session(registry.get_session(session)),
        Job::Stats => JobOutput::Stats(registry.stats()),
        Job::Barrier => JobOutput::Done,
    }
}
