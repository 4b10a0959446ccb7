//! One-shot WASM sandbox execution.

use crate::fuel::FuelMeter;
use crate::memory::MemoryCeiling;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use warden_core::limits::ResourceLimits;
use warden_core::{WardenError, WardenResult};
use wasmtime::{Config, Engine, Linker, Module, Store, Trap};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};

/// Epoch tick granularity for the wall-clock guard
const EPOCH_TICK_MS: u64 = 10;

/// Output channel capacity; a guest writing past this sees write errors
const STDOUT_CAPACITY: usize = 1 << 20;
const STDERR_CAPACITY: usize = 256 * 1024;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Ran to completion
    Completed,
    /// Fuel budget exhausted
    FuelExhausted,
    /// A memory growth request was refused by the ceiling
    MemoryExceeded,
    /// Wall-clock deadline interrupted the run
    WallTimeout,
    /// The entry export is missing or has the wrong signature
    BadEntry,
    /// The instance trapped or failed to link
    Faulted(String),
}

/// Raw result of one sandbox execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    /// How it ended
    pub outcome: SandboxOutcome,
    /// Captured output channel bytes
    pub stdout: Vec<u8>,
    /// Captured stderr bytes (diagnostics only)
    pub stderr: Vec<u8>,
    /// Fuel consumed
    pub fuel_used: u64,
    /// Peak linear memory in pages
    pub mem_pages: u64,
    /// Wall time spent, in milliseconds
    pub elapsed_ms: u64,
}

struct StoreState {
    wasi: WasiP1Ctx,
    ceiling: MemoryCeiling,
}

/// A sandbox bound to one compiled module.
///
/// Each run gets its own engine and store; instances are never pooled or
/// reused across runs, so no module state survives a run.
pub struct Sandbox {
    engine: Engine,
    module: Module,
    limits: ResourceLimits,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Compile module bytes under fuel and epoch interruption.
    ///
    /// # Errors
    ///
    /// Returns a runtime error if the engine cannot be built or the bytes
    /// are not a valid module
    pub fn new(module_bytes: &[u8], limits: ResourceLimits) -> WardenResult<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|err| WardenError::Runtime {
            reason: format!("engine: {err}"),
        })?;
        let module = Module::from_binary(&engine, module_bytes).map_err(|_| {
            WardenError::Runtime {
                reason: "invalid_module".to_string(),
            }
        })?;
        Ok(Self {
            engine,
            module,
            limits,
        })
    }

    /// Execute the entry export to completion or truncation.
    ///
    /// Blocks the calling thread; callers run this on a blocking task.
    /// The input bytes are the module's entire input channel. Budget
    /// enforcement: fuel via the engine, memory via the store limiter,
    /// wall-clock via an epoch ticker thread that dies with this call.
    #[must_use]
    pub fn execute(&self, entry: &str, input: &[u8]) -> SandboxRun {
        let stdout_pipe = MemoryOutputPipe::new(STDOUT_CAPACITY);
        let stderr_pipe = MemoryOutputPipe::new(STDERR_CAPACITY);
        let wasi = WasiCtxBuilder::new()
            .stdin(MemoryInputPipe::new(input.to_vec()))
            .stdout(stdout_pipe.clone())
            .stderr(stderr_pipe.clone())
            .build_p1();

        let state = StoreState {
            wasi,
            ceiling: MemoryCeiling::new(self.limits.memory_bytes()),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.ceiling);

        let mut meter = FuelMeter::new(self.limits.fuel);
        if store.set_fuel(self.limits.fuel).is_err() {
            return SandboxRun {
                outcome: SandboxOutcome::Faulted("fuel_unsupported".to_string()),
                stdout: Vec::new(),
                stderr: Vec::new(),
                fuel_used: 0,
                mem_pages: 0,
                elapsed_ms: 0,
            };
        }

        let deadline_ticks = self.limits.wall_ms.div_ceil(EPOCH_TICK_MS).max(1) + 1;
        store.set_epoch_deadline(deadline_ticks);

        let stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let engine = self.engine.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(EPOCH_TICK_MS));
                    engine.increment_epoch();
                }
            })
        };

        let started = Instant::now();
        let call_result = self.instantiate_and_call(&mut store, entry);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        stop.store(true, Ordering::Relaxed);
        let _ = ticker.join();

        meter.reconcile(store.get_fuel().unwrap_or(0));
        let ceiling = &store.data().ceiling;
        let mem_pages = ceiling.peak_pages();
        let memory_denied = ceiling.denied();

        let outcome = match call_result {
            Ok(()) if memory_denied => SandboxOutcome::MemoryExceeded,
            Ok(()) => SandboxOutcome::Completed,
            Err(err) => classify_error(&err, memory_denied),
        };
        debug!(?outcome, fuel_used = meter.consumed, mem_pages, "sandbox finished");

        SandboxRun {
            outcome,
            stdout: stdout_pipe.contents().to_vec(),
            stderr: stderr_pipe.contents().to_vec(),
            fuel_used: meter.consumed,
            mem_pages,
            elapsed_ms,
        }
    }

    fn instantiate_and_call(&self, store: &mut Store<StoreState>, entry: &str) -> CallResult {
        let mut linker: Linker<StoreState> = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |s: &mut StoreState| &mut s.wasi)
            .map_err(CallError::Other)?;
        let instance = linker
            .instantiate(&mut *store, &self.module)
            .map_err(CallError::Other)?;
        let func = instance
            .get_typed_func::<(), ()>(&mut *store, entry)
            .map_err(|_| CallError::BadEntry)?;
        func.call(&mut *store, ()).map_err(CallError::Other)
    }
}

type CallResult = Result<(), CallError>;

enum CallError {
    BadEntry,
    Other(wasmtime::Error),
}

fn classify_error(err: &CallError, memory_denied: bool) -> SandboxOutcome {
    let err = match err {
        CallError::BadEntry => return SandboxOutcome::BadEntry,
        CallError::Other(err) => err,
    };
    if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
        return if exit.0 == 0 {
            SandboxOutcome::Completed
        } else {
            SandboxOutcome::Faulted(format!("exit_{}", exit.0))
        };
    }
    if let Some(trap) = err.downcast_ref::<Trap>() {
        return match trap {
            Trap::OutOfFuel => SandboxOutcome::FuelExhausted,
            Trap::Interrupt => SandboxOutcome::WallTimeout,
            _ if memory_denied => SandboxOutcome::MemoryExceeded,
            other => SandboxOutcome::Faulted(format!("trap_{other:?}")),
        };
    }
    if memory_denied {
        return SandboxOutcome::MemoryExceeded;
    }
    SandboxOutcome::Faulted("instantiate_or_call_failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits::new(4, 5_000_000, 5_000)
    }

    fn compile(wat_text: &str) -> Vec<u8> {
        wat::parse_str(wat_text).unwrap()
    }

    const HELLO_WAT: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "hello\n")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 6))
            (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))
            drop))
    "#;

    const SPIN_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "_start")
            (loop $spin (br $spin))))
    "#;

    const GROW_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "_start")
            (loop $grow
              (if (i32.ne (memory.grow (i32.const 1)) (i32.const -1))
                (then (br $grow))))))
    "#;

    #[test]
    fn test_hello_completes_with_output() {
        let sandbox = Sandbox::new(&compile(HELLO_WAT), limits()).unwrap();
        let run = sandbox.execute("_start", b"");
        assert_eq!(run.outcome, SandboxOutcome::Completed);
        assert_eq!(run.stdout, b"hello\n");
        assert!(run.fuel_used > 0);
        assert!(run.mem_pages >= 1);
    }

    #[test]
    fn test_fuel_exhaustion() {
        let mut tight = limits();
        tight.fuel = 10_000;
        let sandbox = Sandbox::new(&compile(SPIN_WAT), tight).unwrap();
        let run = sandbox.execute("_start", b"");
        assert_eq!(run.outcome, SandboxOutcome::FuelExhausted);
        // partial usage still reported
        assert!(run.fuel_used > 0);
    }

    #[test]
    fn test_memory_growth_denied() {
        let sandbox = Sandbox::new(&compile(GROW_WAT), limits()).unwrap();
        let run = sandbox.execute("_start", b"");
        assert_eq!(run.outcome, SandboxOutcome::MemoryExceeded);
        assert!(run.mem_pages <= limits().memory_pages);
    }

    #[test]
    fn test_wall_clock_timeout() {
        let mut short = limits();
        short.wall_ms = 100;
        short.fuel = u64::MAX / 2;
        let sandbox = Sandbox::new(&compile(SPIN_WAT), short).unwrap();
        let started = Instant::now();
        let run = sandbox.execute("_start", b"");
        assert_eq!(run.outcome, SandboxOutcome::WallTimeout);
        // terminated within budget plus epsilon, not the fuel horizon
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(run.fuel_used > 0);
    }

    #[test]
    fn test_missing_entry_is_bad_entry() {
        let sandbox = Sandbox::new(&compile(HELLO_WAT), limits()).unwrap();
        let run = sandbox.execute("main", b"");
        assert_eq!(run.outcome, SandboxOutcome::BadEntry);
    }

    #[test]
    fn test_invalid_module_bytes_rejected() {
        let err = Sandbox::new(b"not wasm", limits()).unwrap_err();
        assert_eq!(err.public_reason(), "invalid_module");
    }

    #[test]
    fn test_instances_do_not_share_state() {
        // two executions of the same sandbox get fresh stores
        let sandbox = Sandbox::new(&compile(HELLO_WAT), limits()).unwrap();
        let first = sandbox.execute("_start", b"");
        let second = sandbox.execute("_start", b"");
        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.outcome, SandboxOutcome::Completed);
        assert_eq!(second.outcome, SandboxOutcome::Completed);
    }
}
