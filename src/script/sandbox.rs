//! Sandboxed script execution.
//!
//! Each script gets an isolated Lua VM with the dangerous standard library
//! entry points stripped, living on its own worker thread (the VM is not
//! `Send`, so the thread owns it for the script's whole lifetime). The
//! control thread submits hook invocations over a channel and blocks on the
//! reply with a timeout, so a runaway script can never stall the host tick.
//!
//! Cancellation is best-effort: on timeout the control thread raises a shared
//! flag that an instruction-count hook inside the VM checks periodically. The
//! caller is always unblocked at the deadline; the worker may run on briefly
//! until the next instruction-count check, and a native call that never
//! yields instructions is not interruptible at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, Value, VmState};
use tracing::debug;

use super::api::{self, ApiBindings};
use super::faults::ErrorKind;
use crate::config::LimitsConfig;

/// Instructions executed between cancellation checks.
const CANCEL_CHECK_INSTRUCTIONS: u32 = 8192;

/// Extra allowance for compiling and running a script's top-level chunk.
const CHUNK_SLACK: Duration = Duration::from_millis(1000);

/// Globals removed from every script VM.
const STRIPPED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "load",
    "loadfile",
    "dofile",
    "require",
    "package",
    "debug",
    "collectgarbage",
];

/// Globals whose use is rejected by the pre-execution source scan.
const BLOCKED_REFERENCES: &[&str] = &[
    "os",
    "io",
    "package",
    "require",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "getfenv",
    "setfenv",
];

/// Per-invocation resource limits.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    /// Wall-clock budget for one hook invocation.
    pub hook_timeout: Duration,
    /// Memory growth budget for one hook invocation, in bytes.
    pub memory_budget: usize,
}

impl From<&LimitsConfig> for SandboxLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            hook_timeout: limits.hook_timeout(),
            memory_budget: limits.memory_budget_bytes(),
        }
    }
}

/// A fault raised by a bounded invocation.
#[derive(Debug, Clone)]
pub struct ScriptFault {
    /// Fault classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ScriptFault {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The optional lifecycle hooks a script may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Load,
    Tick,
    Enable,
    Disable,
    Cleanup,
}

impl HookKind {
    /// The global function name a script defines for this hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Load => "on_load",
            HookKind::Tick => "on_tick",
            HookKind::Enable => "on_enable",
            HookKind::Disable => "on_disable",
            HookKind::Cleanup => "on_cleanup",
        }
    }
}

/// Result of a hook invocation that did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutput {
    /// The script does not define this hook.
    NoHook,
    /// The hook ran and the script wants to keep going.
    Continue,
    /// The hook returned `false`, reporting that its work is done.
    Finished,
}

/// Static pre-execution scan of a script source.
///
/// This is a best-effort heuristic gate, not a soundness guarantee; the
/// stripped VM environment and the invocation timeout are the real fences.
/// Rejects references to capability globals that the sandbox removes, and
/// `while true` loops with no reachable `break` or yield.
pub fn validate_source(source: &str) -> Result<(), String> {
    let stripped = strip_comments(source);

    for name in BLOCKED_REFERENCES {
        if references_global(&stripped, name) {
            return Err(format!("use of restricted global '{name}'"));
        }
    }

    if stripped.contains("while true")
        && !stripped.contains("break")
        && !stripped.contains("coroutine.yield")
    {
        return Err("unbounded 'while true' loop with no break".to_string());
    }

    Ok(())
}

/// Remove Lua line comments so metadata blocks and commented-out code do not
/// trip the scan.
fn strip_comments(source: &str) -> String {
    source
        .lines()
        .map(|line| match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether `source` references `name` as a global table or function: the name
/// must stand alone (not part of a longer identifier) and be followed by a
/// call or an index. `pos.x` does not count as a reference to `os`.
fn references_global(source: &str, name: &str) -> bool {
    let bytes = source.as_bytes();
    let mut start = 0;

    while let Some(found) = source[start..].find(name) {
        let at = start + found;
        let end = at + name.len();

        let boundary_before = at == 0 || {
            let c = bytes[at - 1] as char;
            !(c.is_ascii_alphanumeric() || c == '_' || c == '.')
        };
        let used_after = source[end..]
            .chars()
            .find(|c| !c.is_whitespace())
            .map(|c| matches!(c, '.' | '[' | '(' | '"' | '\''))
            .unwrap_or(false);

        if boundary_before && used_after {
            return true;
        }
        start = end;
    }

    false
}

/// Remove dangerous capability globals from a VM.
fn apply_sandbox(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in STRIPPED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }
    Ok(())
}

enum WorkerRequest {
    Invoke { seq: u64, hook: HookKind },
}

struct WorkerReply {
    seq: u64,
    result: Result<HookOutput, ScriptFault>,
    vm_memory: usize,
}

/// An isolated script VM plus the channel pair used to drive it.
///
/// Owned by exactly one script record; dropping it releases the worker. The
/// control thread is the only caller of [`ExecutionContext::invoke`], so at
/// most one invocation is ever in flight.
pub struct ExecutionContext {
    calls: Sender<WorkerRequest>,
    replies: Receiver<WorkerReply>,
    cancel: Arc<AtomicBool>,
    limits: SandboxLimits,
    next_seq: u64,
    /// Sequence number of an invocation that timed out and has not resolved.
    pending: Option<u64>,
    last_vm_memory: usize,
    _worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pending", &self.pending)
            .field("last_vm_memory", &self.last_vm_memory)
            .finish()
    }
}

impl ExecutionContext {
    /// Spawn a worker for a script: build the sandboxed VM, bind the API
    /// surface, and run the top-level chunk (under the same time budget as a
    /// hook, plus compile slack). Fails with a Syntax fault if the source
    /// does not compile, and a Timeout fault if the chunk never finishes.
    pub fn spawn(
        name: &str,
        source: &str,
        bindings: ApiBindings,
        limits: SandboxLimits,
    ) -> Result<Self, ScriptFault> {
        let (call_tx, call_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (load_tx, load_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker_name = name.to_string();
        let worker_source = source.to_string();
        let worker_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name(format!("script-{name}"))
            .spawn(move || {
                worker_main(
                    worker_name,
                    worker_source,
                    bindings,
                    limits,
                    worker_cancel,
                    call_rx,
                    reply_tx,
                    load_tx,
                )
            })
            .map_err(|e| {
                ScriptFault::new(ErrorKind::Runtime, format!("failed to spawn worker: {e}"))
            })?;

        match load_rx.recv_timeout(limits.hook_timeout + CHUNK_SLACK) {
            Ok(Ok(vm_memory)) => Ok(Self {
                calls: call_tx,
                replies: reply_rx,
                cancel,
                limits,
                next_seq: 0,
                pending: None,
                last_vm_memory: vm_memory,
                _worker: Some(handle),
            }),
            Ok(Err(fault)) => Err(fault),
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                Err(ScriptFault::new(
                    ErrorKind::Timeout,
                    "top-level chunk exceeded its time budget",
                ))
            }
        }
    }

    /// Invoke a lifecycle hook, blocking up to the configured timeout.
    ///
    /// On timeout the worker is asked to cancel and the previous invocation
    /// is remembered; further invocations fail fast with a Timeout fault
    /// until the worker actually resolves, so hook calls never queue up
    /// behind a runaway one.
    pub fn invoke(&mut self, hook: HookKind) -> Result<HookOutput, ScriptFault> {
        self.drain_stale();
        if self.pending.is_some() {
            return Err(ScriptFault::new(
                ErrorKind::Timeout,
                format!(
                    "{} skipped: a previous invocation is still running",
                    hook.as_str()
                ),
            ));
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        if self.calls.send(WorkerRequest::Invoke { seq, hook }).is_err() {
            return Err(ScriptFault::new(ErrorKind::Runtime, "script worker is gone"));
        }

        let deadline = Instant::now() + self.limits.hook_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => {
                    self.last_vm_memory = reply.vm_memory;
                    return reply.result;
                }
                Ok(_stale) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    self.cancel.store(true, Ordering::SeqCst);
                    self.pending = Some(seq);
                    return Err(ScriptFault::new(
                        ErrorKind::Timeout,
                        format!(
                            "{} exceeded its {}ms budget",
                            hook.as_str(),
                            self.limits.hook_timeout.as_millis()
                        ),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScriptFault::new(ErrorKind::Runtime, "script worker is gone"));
                }
            }
        }
    }

    /// VM memory in bytes as of the last resolved invocation.
    pub fn vm_memory(&self) -> usize {
        self.last_vm_memory
    }

    fn drain_stale(&mut self) {
        while let Ok(reply) = self.replies.try_recv() {
            if Some(reply.seq) == self.pending {
                self.pending = None;
                self.last_vm_memory = reply.vm_memory;
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Ask a possibly-running invocation to stop; the worker exits once
        // the call channel closes. Never joined: a worker stuck in a native
        // call must not block the control thread.
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_main(
    name: String,
    source: String,
    bindings: ApiBindings,
    limits: SandboxLimits,
    cancel: Arc<AtomicBool>,
    calls: Receiver<WorkerRequest>,
    replies: Sender<WorkerReply>,
    load_result: Sender<Result<usize, ScriptFault>>,
) {
    let lua = Lua::new();

    if let Err(e) = prepare_vm(&lua, &bindings, &cancel) {
        let _ = load_result.send(Err(ScriptFault::new(
            ErrorKind::Runtime,
            format!("environment setup failed: {e}"),
        )));
        return;
    }

    // The top-level chunk establishes the script's globals; it runs under the
    // same cancellation hook as later invocations.
    if let Err(e) = lua.load(&source).set_name(&name).exec() {
        let _ = load_result.send(Err(classify(&e)));
        return;
    }
    cancel.store(false, Ordering::SeqCst);

    let hooks = HookTable::resolve(&lua);
    if load_result.send(Ok(lua.used_memory())).is_err() {
        return;
    }

    while let Ok(WorkerRequest::Invoke { seq, hook }) = calls.recv() {
        // A cancel raised against a previous call must not abort this one.
        cancel.store(false, Ordering::SeqCst);
        let result = run_hook(&lua, &hooks, hook, limits);
        cancel.store(false, Ordering::SeqCst);

        let reply = WorkerReply {
            seq,
            result,
            vm_memory: lua.used_memory(),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }

    debug!(script = %name, "script worker stopped");
}

fn prepare_vm(lua: &Lua, bindings: &ApiBindings, cancel: &Arc<AtomicBool>) -> mlua::Result<()> {
    apply_sandbox(lua)?;
    api::bind_api(lua, bindings)?;

    let flag = Arc::clone(cancel);
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(CANCEL_CHECK_INSTRUCTIONS),
        move |_lua, _debug| {
            if flag.load(Ordering::Relaxed) {
                Err(mlua::Error::RuntimeError(
                    "execution cancelled after exceeding its time budget".to_string(),
                ))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    Ok(())
}

/// The strategy table of optional lifecycle callbacks, resolved once after
/// the top-level chunk has run. A missing hook stays a no-op.
struct HookTable {
    on_load: Option<Function>,
    on_tick: Option<Function>,
    on_enable: Option<Function>,
    on_disable: Option<Function>,
    on_cleanup: Option<Function>,
}

impl HookTable {
    fn resolve(lua: &Lua) -> Self {
        let get = |name: &str| match lua.globals().get::<Value>(name) {
            Ok(Value::Function(f)) => Some(f),
            _ => None,
        };

        Self {
            on_load: get("on_load"),
            on_tick: get("on_tick"),
            on_enable: get("on_enable"),
            on_disable: get("on_disable"),
            on_cleanup: get("on_cleanup"),
        }
    }

    fn get(&self, kind: HookKind) -> Option<&Function> {
        match kind {
            HookKind::Load => self.on_load.as_ref(),
            HookKind::Tick => self.on_tick.as_ref(),
            HookKind::Enable => self.on_enable.as_ref(),
            HookKind::Disable => self.on_disable.as_ref(),
            HookKind::Cleanup => self.on_cleanup.as_ref(),
        }
    }
}

fn run_hook(
    lua: &Lua,
    hooks: &HookTable,
    kind: HookKind,
    limits: SandboxLimits,
) -> Result<HookOutput, ScriptFault> {
    let Some(func) = hooks.get(kind) else {
        return Ok(HookOutput::NoHook);
    };

    let before = lua.used_memory();
    match func.call::<Value>(()) {
        Err(e) => Err(classify(&e)),
        Ok(value) => {
            let delta = lua.used_memory().saturating_sub(before);
            if delta > limits.memory_budget {
                let _ = lua.gc_collect();
                return Err(ScriptFault::new(
                    ErrorKind::ResourceExceeded,
                    format!(
                        "hook allocated {delta} bytes, budget is {} bytes",
                        limits.memory_budget
                    ),
                ));
            }

            Ok(match value {
                Value::Boolean(false) => HookOutput::Finished,
                _ => HookOutput::Continue,
            })
        }
    }
}

fn classify(error: &mlua::Error) -> ScriptFault {
    let kind = match error {
        mlua::Error::SyntaxError { .. } => ErrorKind::Syntax,
        _ => ErrorKind::Runtime,
    };
    ScriptFault::new(kind, error.to_string())
}
