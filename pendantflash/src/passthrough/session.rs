//! Link session: one owned port handle and the pass-through dialogue on it.

use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::operator::{BOOTLOADER_PROMPT, OperatorGate};
use crate::passthrough::protocol::{
    ExitAck, INTERRUPT, PassthroughCommand, STATUS_QUERY, TunnelState, classify_exit_response,
};
use crate::port::{Port, PortOpener, SerialConfig};

/// Delays inside the pass-through dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    /// Wait after the activation command while the host retargets its UART.
    pub enter_settle: Duration,
    /// Wait after the interrupt byte before discarding input.
    pub interrupt_settle: Duration,
    /// Wait after the status query before reading the reply.
    pub reply_wait: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            enter_settle: Duration::from_secs(1),
            interrupt_settle: Duration::from_millis(500),
            reply_wait: Duration::from_millis(500),
        }
    }
}

impl LinkTimings {
    /// No delays at all.
    pub const fn none() -> Self {
        Self {
            enter_settle: Duration::ZERO,
            interrupt_settle: Duration::ZERO,
            reply_wait: Duration::ZERO,
        }
    }
}

/// An open connection to the host controller.
///
/// The port is released on [`close`](Self::close) or on drop, whichever
/// comes first.
pub struct LinkSession<P: Port> {
    port: Option<P>,
    name: String,
    state: TunnelState,
    timings: LinkTimings,
}

impl<P: Port> LinkSession<P> {
    /// Open the port through `opener`.
    pub fn open<O>(opener: &mut O, config: &SerialConfig, timings: LinkTimings) -> Result<Self>
    where
        O: PortOpener<Port = P>,
    {
        let port = opener.open(config)?;
        debug!("Link session opened on {}", config.port_name);
        Ok(Self::from_port(port, timings))
    }

    /// Wrap an already open port.
    pub fn from_port(port: P, timings: LinkTimings) -> Self {
        Self {
            name: port
                .name()
                .to_string(),
            port: Some(port),
            state: TunnelState::Closed,
            timings,
        }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known tunnel state.
    pub fn tunnel_state(&self) -> TunnelState {
        self.state
    }

    /// Whether the port handle is still held.
    pub fn is_open(&self) -> bool {
        self.port
            .is_some()
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port
            .as_mut()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "link session already closed",
                ))
            })
    }

    /// Ask the host to start relaying to the pendant UART.
    ///
    /// Nothing is read back: the host's UART is being retargeted and may not
    /// echo. The tunnel is assumed open from here on.
    pub fn enter_passthrough(&mut self, command: &PassthroughCommand) -> Result<()> {
        info!(
            "Entering pass-through to {} ({}s auto-revert)",
            command.uart(),
            command.timeout_secs()
        );
        let settle = self.timings.enter_settle;
        let bytes = command.encode();

        let port = self.port_mut()?;
        port.clear_buffers()?;
        trace!("TX {:?}", String::from_utf8_lossy(&bytes));
        port.write_all_bytes(&bytes)?;

        thread::sleep(settle);
        self.state = TunnelState::Open;
        Ok(())
    }

    /// Show the bootloader-entry instructions and block until the operator
    /// answers.
    pub fn request_operator_precondition<G: OperatorGate + ?Sized>(
        &self,
        gate: &mut G,
    ) -> Result<()> {
        info!("Waiting for operator to put the pendant in bootloader mode");
        if gate.confirm(&BOOTLOADER_PROMPT)? {
            debug!("Operator confirmed bootloader mode");
            Ok(())
        } else {
            Err(Error::OperatorAborted)
        }
    }

    /// Interrupt pass-through and check whether the host answers again.
    ///
    /// An [`ExitAck::Uncertain`] result is not an error; the tunnel state is
    /// set to [`TunnelState::Unknown`].
    pub fn exit_passthrough(&mut self) -> Result<ExitAck> {
        info!("Exiting pass-through mode");
        let timings = self.timings;

        let port = self.port_mut()?;
        port.write_all_bytes(&[INTERRUPT])?;
        thread::sleep(timings.interrupt_settle);

        port.clear_input()?;
        port.write_all_bytes(STATUS_QUERY)?;
        thread::sleep(timings.reply_wait);

        let reply = read_available(port)?;
        trace!("RX {:?}", String::from_utf8_lossy(&reply));

        let ack = classify_exit_response(&reply);
        self.state = ack.tunnel_state();
        match ack {
            ExitAck::Confirmed => info!("Host is back in command mode"),
            ExitAck::Uncertain => {
                debug!("No recognizable reply after pass-through exit ({} bytes)", reply.len());
            },
        }
        Ok(ack)
    }

    /// Release the port. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut port) = self
            .port
            .take()
        {
            if let Err(e) = port.close() {
                warn!("Error closing {}: {e}", self.name);
            }
            debug!("Link session on {} closed", self.name);
        }
    }
}

impl<P: Port> Drop for LinkSession<P> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read whatever is already buffered, without waiting for more.
fn read_available<P: Port>(port: &mut P) -> Result<Vec<u8>> {
    let waiting = port.bytes_to_read()? as usize;
    let mut reply = vec![0u8; waiting];
    let mut filled = 0;

    while filled < waiting {
        match port.read(&mut reply[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    reply.truncate(filled);
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, FakeGate, SharedBench};

    fn session(bench: &SharedBench) -> LinkSession<crate::testing::FakePort> {
        let config = SerialConfig::new("/dev/ttyUSB0", 115200);
        LinkSession::open(&mut bench.opener(), &config, LinkTimings::none()).unwrap()
    }

    #[test]
    fn test_open_failure_is_port_unavailable() {
        let bench = SharedBench::new();
        bench.lock().fail_opens = 1;
        let config = SerialConfig::new("COM7", 115200);

        let result = LinkSession::open(&mut bench.opener(), &config, LinkTimings::none());
        assert!(matches!(result, Err(Error::PortUnavailable { .. })));
        assert_eq!(bench.lock().open_now, 0);
    }

    #[test]
    fn test_enter_passthrough_clears_then_writes_command() {
        let bench = SharedBench::new();
        let mut link = session(&bench);

        link.enter_passthrough(&PassthroughCommand::default())
            .unwrap();

        assert_eq!(link.tunnel_state(), TunnelState::Open);
        assert_eq!(
            bench.events(),
            vec![
                Event::Open("/dev/ttyUSB0".to_string()),
                Event::ClearAll,
                Event::Write(b"$Uart/Passthrough=Uart1:120s\n".to_vec()),
            ]
        );
    }

    #[test]
    fn test_exit_passthrough_confirmed() {
        let bench = SharedBench::new();
        bench.push_reply(b"ok\r\n");
        let mut link = session(&bench);
        link.enter_passthrough(&PassthroughCommand::default())
            .unwrap();

        let ack = link
            .exit_passthrough()
            .unwrap();

        assert_eq!(ack, ExitAck::Confirmed);
        assert_eq!(link.tunnel_state(), TunnelState::Closed);
        let writes = bench.writes();
        assert_eq!(writes[1], vec![INTERRUPT]);
        assert_eq!(writes[2], STATUS_QUERY.to_vec());
    }

    #[test]
    fn test_exit_passthrough_discards_bytes_before_status_query() {
        let bench = SharedBench::new();
        let mut link = session(&bench);
        // Stale pendant output sitting in the buffer must not count as a reply.
        bench
            .lock()
            .pending
            .extend_from_slice(b"ok");

        let ack = link
            .exit_passthrough()
            .unwrap();

        assert_eq!(ack, ExitAck::Uncertain);
        assert_eq!(link.tunnel_state(), TunnelState::Unknown);
        let events = bench.events();
        let clear = events
            .iter()
            .position(|e| *e == Event::ClearInput)
            .unwrap();
        let query = events
            .iter()
            .position(|e| *e == Event::Write(STATUS_QUERY.to_vec()))
            .unwrap();
        assert!(clear < query);
    }

    #[test]
    fn test_exit_passthrough_garbled_reply_is_uncertain() {
        let bench = SharedBench::new();
        bench.push_reply(&[0xFF, 0x00, 0xA5]);
        let mut link = session(&bench);

        assert_eq!(
            link.exit_passthrough()
                .unwrap(),
            ExitAck::Uncertain
        );
    }

    #[test]
    fn test_operator_precondition() {
        let bench = SharedBench::new();
        let link = session(&bench);

        assert!(
            link.request_operator_precondition(&mut FakeGate::new(&bench, true))
                .is_ok()
        );
        assert!(matches!(
            link.request_operator_precondition(&mut FakeGate::new(&bench, false)),
            Err(Error::OperatorAborted)
        ));
        assert_eq!(bench.count(|e| *e == Event::Prompt), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let bench = SharedBench::new();
        let mut link = session(&bench);

        link.close();
        link.close();
        drop(link);

        assert_eq!(bench.count(|e| *e == Event::Close), 1);
        assert_eq!(bench.lock().open_now, 0);
    }

    #[test]
    fn test_drop_releases_port() {
        let bench = SharedBench::new();
        {
            let _link = session(&bench);
            assert_eq!(bench.lock().open_now, 1);
        }
        assert_eq!(bench.lock().open_now, 0);
    }

    #[test]
    fn test_io_after_close_fails() {
        let bench = SharedBench::new();
        let mut link = session(&bench);
        link.close();

        assert!(!link.is_open());
        assert!(
            link.enter_passthrough(&PassthroughCommand::default())
                .is_err()
        );
    }
}
