//! Per-device flow actor.
//!
//! [`FlowRunner`] owns an [`ActionFlow`] inside a spawned tokio task. Commands
//! from the caller and events from the transport are processed one at a time
//! in that task, so a flow never sees two events concurrently and events are
//! handled in arrival order. Flows for different devices run in independent
//! tasks.
//!
//! [`ChannelListener`] turns flow callbacks into [`FlowSignal`]s on a channel,
//! which is the usual way to observe a runner from async code.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use sensorlink_types::{CharProperties, DeviceAddress, DiscoveredDevice, ServiceInfo};

use crate::error::FlowError;
use crate::events::event_channel;
use crate::flow::{ActionFlow, FlowListener, Step};
use crate::transport::Transport;

/// A flow callback, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowSignal {
    ScanFinished(Vec<DiscoveredDevice>),
    Connected,
    ServicesDiscovered(Vec<ServiceInfo>),
    Notification {
        uuid: Uuid,
        flags: CharProperties,
        value: Bytes,
    },
    CharacteristicRead {
        uuid: Uuid,
        flags: CharProperties,
        value: Bytes,
    },
    DescriptorRead {
        uuid: Uuid,
        value: Bytes,
    },
    CharacteristicWritten(Uuid),
    Subscribed(Uuid),
    Unsubscribed(Uuid),
    Disconnected,
    Success,
    Failure(FlowError),
}

impl FlowSignal {
    /// Whether this signal ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowSignal::Success | FlowSignal::Failure(_))
    }
}

/// Listener that forwards every callback as a [`FlowSignal`].
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<FlowSignal>,
}

impl ChannelListener {
    /// Create a listener and the receiver its signals arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlowSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, signal: FlowSignal) {
        if self.tx.send(signal).is_err() {
            debug!("Flow signal receiver dropped");
        }
    }
}

impl FlowListener for ChannelListener {
    fn on_scan_finished(&mut self, devices: &[DiscoveredDevice]) {
        self.send(FlowSignal::ScanFinished(devices.to_vec()));
    }

    fn on_connect(&mut self) {
        self.send(FlowSignal::Connected);
    }

    fn on_services_discovered(&mut self, services: &[ServiceInfo]) {
        self.send(FlowSignal::ServicesDiscovered(services.to_vec()));
    }

    fn on_notification(&mut self, uuid: Uuid, flags: CharProperties, value: &[u8]) {
        self.send(FlowSignal::Notification {
            uuid,
            flags,
            value: Bytes::copy_from_slice(value),
        });
    }

    fn on_characteristic_read(&mut self, uuid: Uuid, flags: CharProperties, value: &[u8]) {
        self.send(FlowSignal::CharacteristicRead {
            uuid,
            flags,
            value: Bytes::copy_from_slice(value),
        });
    }

    fn on_descriptor_read(&mut self, uuid: Uuid, value: &[u8]) {
        self.send(FlowSignal::DescriptorRead {
            uuid,
            value: Bytes::copy_from_slice(value),
        });
    }

    fn on_characteristic_write(&mut self, uuid: Uuid) {
        self.send(FlowSignal::CharacteristicWritten(uuid));
    }

    fn on_notification_subscribed(&mut self, uuid: Uuid) {
        self.send(FlowSignal::Subscribed(uuid));
    }

    fn on_notification_unsubscribed(&mut self, uuid: Uuid) {
        self.send(FlowSignal::Unsubscribed(uuid));
    }

    fn on_disconnect(&mut self) {
        self.send(FlowSignal::Disconnected);
    }

    fn on_success(&mut self) {
        self.send(FlowSignal::Success);
    }

    fn on_failure(&mut self, error: &FlowError) {
        self.send(FlowSignal::Failure(error.clone()));
    }
}

#[derive(Debug)]
enum Command {
    Build(Vec<Step>),
    Run,
    Reset,
    Close,
}

/// Handle to a flow running in its own task.
///
/// Dropping the handle cancels the task, which detaches the flow from the
/// transport. Use [`close`](Self::close) to wait for that to finish.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sensorlink_core::flow::FlowBuilder;
/// use sensorlink_core::mock::MockTransport;
/// use sensorlink_core::runner::{ChannelListener, FlowRunner, FlowSignal};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mock = Arc::new(MockTransport::new());
/// let (listener, mut signals) = ChannelListener::new();
/// let runner = FlowRunner::spawn(mock, "AA:BB:CC:DD:EE:FF", listener);
/// runner.build(FlowBuilder::new().connect().disconnect().build());
/// runner.run();
///
/// while let Some(signal) = signals.recv().await {
///     if signal.is_terminal() {
///         assert_eq!(signal, FlowSignal::Success);
///         break;
///     }
/// }
/// runner.close().await;
/// # }
/// ```
pub struct FlowRunner {
    address: DeviceAddress,
    commands: mpsc::UnboundedSender<Command>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FlowRunner {
    /// Spawn a flow for `address` on the current tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        address: impl Into<DeviceAddress>,
        listener: impl FlowListener + 'static,
    ) -> Self {
        let address = address.into();
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let (events, mut event_rx) = event_channel();
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let mut flow = ActionFlow::new(transport, address.clone(), events, listener);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        debug!("Flow runner for {} cancelled", flow.address());
                        break;
                    }
                    command = command_rx.recv() => match command {
                        Some(Command::Build(steps)) => flow.build(steps),
                        Some(Command::Run) => flow.run(),
                        Some(Command::Reset) => flow.reset(),
                        Some(Command::Close) | None => break,
                    },
                    Some(event) = event_rx.recv() => flow.handle_event(event),
                }
            }
            flow.close();
            debug!("Flow runner for {} stopped", flow.address());
        });

        Self {
            address,
            commands,
            cancel_token,
            handle: Some(handle),
        }
    }

    /// The address the runner was spawned for.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Replace the step list. Returns `false` if the runner has stopped.
    pub fn build(&self, steps: Vec<Step>) -> bool {
        self.commands.send(Command::Build(steps)).is_ok()
    }

    /// Start a run. Returns `false` if the runner has stopped.
    pub fn run(&self) -> bool {
        self.commands.send(Command::Run).is_ok()
    }

    /// Reset the flow. Returns `false` if the runner has stopped.
    pub fn reset(&self) -> bool {
        self.commands.send(Command::Reset).is_ok()
    }

    /// Whether the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Detach the flow from the transport and wait for the task to end.
    ///
    /// Commands sent before this call are processed first.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            debug!("Flow runner task ended abnormally: {}", e);
        }
    }
}

impl Drop for FlowRunner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRunner")
            .field("address", &self.address)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowBuilder;
    use crate::mock::{MockTransport, RequestKind};
    use std::time::Duration;

    async fn outcome(rx: &mut mpsc::UnboundedReceiver<FlowSignal>) -> FlowSignal {
        loop {
            let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("flow did not finish")
                .expect("listener dropped");
            if signal.is_terminal() {
                return signal;
            }
        }
    }

    #[tokio::test]
    async fn test_runner_executes_flow() {
        let mock = Arc::new(MockTransport::new());
        let (listener, mut signals) = ChannelListener::new();
        let runner = FlowRunner::spawn(mock.clone(), "AA:BB:CC:DD:EE:FF", listener);

        runner.build(FlowBuilder::new().connect().disconnect().build());
        runner.run();
        assert_eq!(outcome(&mut signals).await, FlowSignal::Success);
        assert_eq!(mock.request_count(RequestKind::Connect), 1);
        assert_eq!(mock.request_count(RequestKind::Disconnect), 1);

        runner.close().await;
        assert!(!mock.is_attached(&DeviceAddress::new("AA:BB:CC:DD:EE:FF")));
    }

    #[tokio::test]
    async fn test_runner_drop_detaches() {
        let mock = Arc::new(MockTransport::new());
        let address = DeviceAddress::new("AA:BB:CC:DD:EE:FF");
        let (listener, _signals) = ChannelListener::new();
        let runner = FlowRunner::spawn(mock.clone(), address.clone(), listener);
        assert!(mock.is_attached(&address));

        drop(runner);
        for _ in 0..50 {
            if !mock.is_attached(&address) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!mock.is_attached(&address));
    }

    #[test]
    fn test_signal_terminal() {
        assert!(FlowSignal::Success.is_terminal());
        assert!(FlowSignal::Failure(FlowError::ConnectionLost).is_terminal());
        assert!(!FlowSignal::Connected.is_terminal());
    }
}
