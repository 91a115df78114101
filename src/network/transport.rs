use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::connection::{
    ConnectionManager, ConnectionStatus, Delivery, TransportCommand, TransportEvent,
};
use crate::config::TransportConfig;
use crate::error::PulseError;
use crate::model::Envelope;

/// Cheap, cloneable handle to the connection actor.
///
/// Every call is a non-blocking command; results surface as
/// [`TransportEvent`]s and [`ConnectionStatus`] updates.
#[derive(Clone)]
pub struct Transport {
    commands: mpsc::UnboundedSender<TransportCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl Transport {
    /// Start the actor on the current runtime.
    pub fn spawn(
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>, JoinHandle<()>), PulseError> {
        let (tx_cmd, rx_cmd) = mpsc::unbounded_channel();
        let (tx_event, rx_event) = mpsc::channel(config.event_channel_capacity.max(1));
        let (tx_status, rx_status) = watch::channel(ConnectionStatus::default());

        let manager = ConnectionManager::new(config, rx_cmd, tx_event, tx_status)?;
        let worker = tokio::spawn(manager.run());

        Ok((
            Self {
                commands: tx_cmd,
                status: rx_status,
            },
            rx_event,
            worker,
        ))
    }

    /// A handle wired to bare channels instead of an actor.
    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<TransportCommand>,
        watch::Sender<ConnectionStatus>,
    ) {
        let (tx_cmd, rx_cmd) = mpsc::unbounded_channel();
        let (tx_status, rx_status) = watch::channel(ConnectionStatus::default());
        (
            Self {
                commands: tx_cmd,
                status: rx_status,
            },
            rx_cmd,
            tx_status,
        )
    }

    pub fn connect(&self) -> Result<(), PulseError> {
        self.command(TransportCommand::Connect)
    }

    pub fn disconnect(&self) -> Result<(), PulseError> {
        self.command(TransportCommand::Disconnect)
    }

    /// Send now, or queue until the next successful connect.
    pub fn send(&self, envelope: Envelope) -> Result<(), PulseError> {
        self.command(TransportCommand::Send {
            envelope,
            delivery: Delivery::Reliable,
        })
    }

    /// Send now, or drop if the socket is not open.
    pub fn send_ephemeral(&self, envelope: Envelope) -> Result<(), PulseError> {
        self.command(TransportCommand::Send {
            envelope,
            delivery: Delivery::Ephemeral,
        })
    }

    pub fn shutdown(&self) -> Result<(), PulseError> {
        self.command(TransportCommand::Shutdown)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn connection_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    fn command(&self, command: TransportCommand) -> Result<(), PulseError> {
        self.commands
            .send(command)
            .map_err(|_| PulseError::ChannelClosed)
    }
}
