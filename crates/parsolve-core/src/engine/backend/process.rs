use super::{ExecutionBackend, OutcomeSink};
use crate::engine::config::BackendKind;
use crate::engine::error::{BackendError, TaskError, TaskTransportError};
use crate::engine::progress::Progress;
use crate::engine::task::{Task, TaskOutcome, TaskOutput};
use crate::engine::worker::{self, WorkerReply};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const STDERR_TAIL_LINES: usize = 20;

/// Program (plus arguments) that serves one worker request on stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The running executable invoked with its `worker` subcommand.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// One child process per task, at most `worker_count` alive at a time.
///
/// Only payloads that can be serialized are admitted; anything holding a live workspace
/// is rejected before a single process starts. A child that exits abnormally, or exits
/// without a well-formed reply, becomes a [`TaskError::WorkerCrash`] for its own task
/// only. Children still running when the batch is cancelled are killed.
#[derive(Debug, Clone)]
pub struct IsolatedProcessBackend {
    command: WorkerCommand,
    task_timeout: Option<Duration>,
}

struct Job {
    index: usize,
    request: String,
}

impl IsolatedProcessBackend {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            task_timeout: None,
        }
    }

    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.task_timeout = limit;
        self
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    fn supervise(&self, slot: usize, queue: &Mutex<VecDeque<Job>>, sink: &OutcomeSink) {
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(job) = next else { break };
            if sink.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let (pid, result) = self.run_child(&job, sink);
            let worker = match pid {
                Some(pid) => format!("supervisor-{slot}/pid-{pid}"),
                None => format!("supervisor-{slot}"),
            };
            sink.record(TaskOutcome {
                index: job.index,
                result,
                wall_time: started.elapsed(),
                worker: Some(worker),
                returned: None,
            });
        }
    }

    fn run_child(&self, job: &Job, sink: &OutcomeSink) -> (Option<u32>, Result<TaskOutput, TaskError>) {
        let mut command = self.command.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return (
                    None,
                    Err(TaskError::WorkerCrash {
                        exit_code: None,
                        stderr: format!("failed to spawn '{}': {e}", self.command),
                    }),
                );
            }
        };
        let pid = child.id();
        debug!(task = job.index, pid, "Worker process spawned");

        let mut guard = ChildGuard::new(child);
        let stdin = guard.child.stdin.take();
        let stdout = guard.child.stdout.take();
        let stderr = guard.child.stderr.take();

        let (exit, stdout, stderr) = thread::scope(|scope| {
            let writer = stdin.map(|mut pipe| {
                scope.spawn(move || -> io::Result<()> {
                    pipe.write_all(job.request.as_bytes())?;
                    pipe.write_all(b"\n")?;
                    pipe.flush()
                })
            });
            let out_reader = stdout.map(|pipe| scope.spawn(move || drain(pipe)));
            let err_reader = stderr.map(|pipe| scope.spawn(move || drain(pipe)));

            let exit = self.wait(&mut guard, sink);

            if let Some(Ok(Err(e))) = writer.map(|h| h.join()) {
                debug!(task = job.index, error = %e, "Worker did not take its whole request");
            }
            (exit, join_text(out_reader), join_text(err_reader))
        });

        let result = match exit {
            Exit::Finished(status) => self.interpret(job.index, status, &stdout, &stderr, sink),
            Exit::Cancelled => Err(TaskError::Cancelled),
            Exit::TimedOut(limit) => {
                warn!(task = job.index, pid, ?limit, "Worker process timed out and was killed");
                Err(TaskError::Timeout { limit })
            }
            Exit::Lost(e) => Err(TaskError::WorkerCrash {
                exit_code: None,
                stderr: format!("lost track of worker process: {e}"),
            }),
        };
        (Some(pid), result)
    }

    fn wait(&self, guard: &mut ChildGuard, sink: &OutcomeSink) -> Exit {
        let started = Instant::now();
        loop {
            match guard.child.try_wait() {
                Ok(Some(status)) => {
                    guard.reaped = true;
                    return Exit::Finished(status);
                }
                Ok(None) => {}
                Err(e) => return Exit::Lost(e),
            }
            if sink.is_cancelled() {
                guard.kill();
                return Exit::Cancelled;
            }
            if let Some(limit) = self.task_timeout {
                if started.elapsed() >= limit {
                    guard.kill();
                    return Exit::TimedOut(limit);
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn interpret(
        &self,
        index: usize,
        status: ExitStatus,
        stdout: &str,
        stderr: &str,
        sink: &OutcomeSink,
    ) -> Result<TaskOutput, TaskError> {
        let reply = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<WorkerReply>);

        let crash = |detail: String| TaskError::WorkerCrash {
            exit_code: status.code(),
            stderr: detail,
        };
        if !status.success() {
            return Err(crash(format!("{status}; {}", stderr_tail(stderr))));
        }
        let reply = match reply {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => return Err(crash(format!("malformed reply ({e}); {}", stderr_tail(stderr)))),
            None => return Err(crash(format!("no reply on stdout; {}", stderr_tail(stderr)))),
        };
        if reply.index() != index {
            return Err(crash(format!(
                "reply is for task {} instead of {index}",
                reply.index()
            )));
        }

        match reply {
            WorkerReply::Solved {
                result, messages, ..
            } => {
                for message in messages {
                    sink.reporter().report(Progress::Message(message));
                }
                Ok(TaskOutput::Solved(result))
            }
            WorkerReply::Failed { error, .. } => Err(TaskError::from(error)),
        }
    }
}

impl ExecutionBackend for IsolatedProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IsolatedProcess
    }

    fn admit(&self, tasks: &[Task]) -> Result<(), TaskTransportError> {
        for task in tasks {
            if let Some(reason) = task.payload.transport_barrier() {
                return Err(TaskTransportError {
                    index: task.index,
                    task: task.payload.kind(),
                    reason,
                });
            }
        }
        Ok(())
    }

    fn run(
        &self,
        tasks: Vec<Task>,
        worker_count: NonZeroUsize,
        sink: &OutcomeSink,
    ) -> Result<(), BackendError> {
        // Encode everything up front so a bad payload fails before any process exists.
        let mut queue = VecDeque::with_capacity(tasks.len());
        for task in &tasks {
            queue.push_back(Job {
                index: task.index,
                request: worker::encode_request(task.index, &task.payload)?,
            });
        }
        drop(tasks);

        let supervisors = worker_count.get().min(queue.len());
        debug!(supervisors, worker = %self.command, "Starting worker supervisors");
        let queue = Mutex::new(queue);
        thread::scope(|scope| {
            for slot in 0..supervisors {
                let queue = &queue;
                thread::Builder::new()
                    .name(format!("parsolve-supervisor-{slot}"))
                    .spawn_scoped(scope, move || self.supervise(slot, queue, sink))
                    .map_err(BackendError::Supervisor)?;
            }
            Ok(())
        })
    }
}

enum Exit {
    Finished(ExitStatus),
    Cancelled,
    TimedOut(Duration),
    Lost(io::Error),
}

/// Kills and reaps the child on drop unless it has already been waited for.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn kill(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

fn drain(mut pipe: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    buf
}

fn join_text(handle: Option<thread::ScopedJoinHandle<'_, Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "stderr was empty".to_string();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
