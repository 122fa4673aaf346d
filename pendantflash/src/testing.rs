//! Instrumented fakes for the port, opener, operator gate and flash tool.
//!
//! All fakes share one [`Bench`] so tests can assert on the global order of
//! events and on how many port handles were open at any moment.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::flasher::{FlashJob, FlashTool, Invocation, ToolExit};
use crate::operator::{OperatorGate, OperatorPrompt};
use crate::passthrough::STATUS_QUERY;
use crate::port::{Port, PortOpener, SerialConfig};

/// Route `log` output through the test harness; `RUST_LOG=trace` shows the wire bytes.
pub(crate) fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Open(String),
    Write(Vec<u8>),
    ClearAll,
    ClearInput,
    Close,
    Prompt,
    Locate,
    Flash { ports_open: usize },
}

#[derive(Debug, Default)]
pub(crate) struct Bench {
    pub events: Vec<Event>,
    pub open_now: usize,
    pub max_open: usize,
    /// Replies released one per status query, in order.
    pub replies: VecDeque<Vec<u8>>,
    /// Bytes the host has sent that we have not read yet.
    pub pending: Vec<u8>,
    /// Open attempts fail while this is non-zero, decrementing each time.
    pub fail_opens: usize,
    pub fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBench(Arc<Mutex<Bench>>);

impl SharedBench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Bench> {
        self.0
            .lock()
            .unwrap()
    }

    pub fn push_reply(&self, reply: &[u8]) {
        self.lock()
            .replies
            .push_back(reply.to_vec());
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock()
            .events
            .clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| pred(e))
            .count()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn opener(&self) -> FakeOpener {
        FakeOpener { bench: self.clone() }
    }
}

pub(crate) struct FakeOpener {
    bench: SharedBench,
}

impl PortOpener for FakeOpener {
    type Port = FakePort;

    fn open(&mut self, config: &SerialConfig) -> Result<FakePort> {
        let mut bench = self.bench.lock();
        if bench.fail_opens > 0 {
            bench.fail_opens -= 1;
            return Err(Error::PortUnavailable {
                port: config
                    .port_name
                    .clone(),
                reason: "Device or resource busy".to_string(),
            });
        }
        bench
            .events
            .push(Event::Open(config.port_name.clone()));
        bench.open_now += 1;
        bench.max_open = bench.max_open.max(bench.open_now);
        drop(bench);

        Ok(FakePort {
            bench: self.bench.clone(),
            name: config
                .port_name
                .clone(),
            open: true,
        })
    }
}

pub(crate) struct FakePort {
    bench: SharedBench,
    name: String,
    open: bool,
}

impl Port for FakePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut bench = self.bench.lock();
        bench.pending.clear();
        bench.events.push(Event::ClearAll);
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut bench = self.bench.lock();
        bench.pending.clear();
        bench.events.push(Event::ClearInput);
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(u32::try_from(self.bench.lock().pending.len()).unwrap())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            let mut bench = self.bench.lock();
            bench.open_now -= 1;
            bench.events.push(Event::Close);
        }
        Ok(())
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut bench = self.bench.lock();
        if bench.pending.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(bench.pending.len());
        buf[..n].copy_from_slice(&bench.pending[..n]);
        bench.pending.drain(..n);
        Ok(n)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut bench = self.bench.lock();
        if bench.fail_writes {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"));
        }
        bench.events.push(Event::Write(buf.to_vec()));
        if buf == STATUS_QUERY {
            if let Some(reply) = bench.replies.pop_front() {
                bench.pending.extend_from_slice(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) struct FakeGate {
    bench: SharedBench,
    answer: bool,
}

impl FakeGate {
    pub fn new(bench: &SharedBench, answer: bool) -> Self {
        Self {
            bench: bench.clone(),
            answer,
        }
    }
}

impl OperatorGate for FakeGate {
    fn confirm(&mut self, prompt: &OperatorPrompt) -> Result<bool> {
        assert!(!prompt.steps.is_empty());
        self.bench
            .lock()
            .events
            .push(Event::Prompt);
        Ok(self.answer)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeOutcome {
    Exit(i32),
    LaunchError,
}

pub(crate) struct FakeTool {
    bench: SharedBench,
    found: bool,
    outcome: FakeOutcome,
    pub invocations: Vec<Invocation>,
}

impl FakeTool {
    pub fn new(bench: &SharedBench, outcome: FakeOutcome) -> Self {
        Self {
            bench: bench.clone(),
            found: true,
            outcome,
            invocations: Vec::new(),
        }
    }

    pub fn missing(bench: &SharedBench) -> Self {
        Self {
            found: false,
            ..Self::new(bench, FakeOutcome::Exit(0))
        }
    }
}

impl FlashTool for FakeTool {
    fn locate(&self) -> Result<PathBuf> {
        self.bench
            .lock()
            .events
            .push(Event::Locate);
        if self.found {
            Ok(PathBuf::from("/opt/fake/esptool"))
        } else {
            Err(Error::ToolNotFound {
                searched: "esptool.py, esptool".to_string(),
            })
        }
    }

    fn build_invocation(&self, program: &Path, job: &FlashJob) -> Invocation {
        crate::flasher::Esptool::default().build_invocation(program, job)
    }

    fn run(&mut self, invocation: &Invocation) -> Result<ToolExit> {
        let mut bench = self.bench.lock();
        let ports_open = bench.open_now;
        bench
            .events
            .push(Event::Flash { ports_open });
        drop(bench);

        self.invocations
            .push(invocation.clone());
        match self.outcome {
            FakeOutcome::Exit(code) => Ok(ToolExit::from_code(Some(code))),
            FakeOutcome::LaunchError => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            ))),
        }
    }
}

/// Write a throwaway firmware image and return its directory guard and path.
pub(crate) fn firmware_file() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join("pendant.bin");
    std::fs::write(&path, [0xE9, 0x03, 0x02, 0x20]).unwrap();
    (dir, path)
}
