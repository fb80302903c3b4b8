use anyhow::{Context, Result};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    connection::{ConnectionManager, ConnectionState, Connector},
    feed::FeedSnapshot,
    history::InspectionSummary,
    models::Measurement,
    session::{InspectionSession, SessionController, SessionError},
    settings::ClientSettings,
};

use super::loop_worker::{event_loop, ClientCommand};

/// Handle to a running inspection session. Commands are forwarded to the
/// event loop; state is read through the `watch` receivers.
pub struct InspectionClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    connection: watch::Receiver<ConnectionState>,
    session: watch::Receiver<InspectionSession>,
    feed: watch::Receiver<FeedSnapshot>,
    latest: watch::Receiver<Option<Measurement>>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl InspectionClient {
    /// Spawns the event loop on the current tokio runtime and starts
    /// connecting to `settings.backend_url`.
    pub fn spawn(settings: &ClientSettings, connector: impl Connector + 'static) -> Self {
        Self::spawn_with_token(settings, connector, CancellationToken::new())
    }

    pub fn spawn_with_token(
        settings: &ClientSettings,
        connector: impl Connector + 'static,
        cancel_token: CancellationToken,
    ) -> Self {
        let (manager, notices) = ConnectionManager::new(
            settings.backend_url.clone(),
            Box::new(connector),
            settings.reconnect_policy(),
        );
        let controller = SessionController::new(manager, settings.controller_options());

        let connection = controller.subscribe_connection();
        let session = controller.subscribe_session();
        let feed = controller.subscribe_feed();
        let latest = controller.subscribe_latest();

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(event_loop(
            controller,
            notices,
            commands_rx,
            cancel_token.clone(),
        ));

        Self {
            commands,
            connection,
            session,
            feed,
            latest,
            cancel_token,
            handle: Some(handle),
        }
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn session(&self) -> watch::Receiver<InspectionSession> {
        self.session.clone()
    }

    pub fn feed(&self) -> watch::Receiver<FeedSnapshot> {
        self.feed.clone()
    }

    pub fn latest(&self) -> watch::Receiver<Option<Measurement>> {
        self.latest.clone()
    }

    pub fn connect(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::Connect)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::Disconnect)
    }

    pub fn retry_now(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::RetryNow)
    }

    pub async fn start_listening(&self, model_id: Option<i64>) -> Result<Uuid, SessionError> {
        self.request(|reply| ClientCommand::StartListening { model_id, reply })
            .await?
    }

    pub async fn submit_barcode(
        &self,
        barcode: impl Into<String>,
        model_id: Option<i64>,
    ) -> Result<Uuid, SessionError> {
        let barcode = barcode.into();
        self.request(|reply| ClientCommand::SubmitBarcode {
            barcode,
            model_id,
            reply,
        })
        .await?
    }

    pub async fn stop(&self) -> Result<Option<Uuid>, SessionError> {
        self.request(|reply| ClientCommand::Stop { reply }).await?
    }

    pub fn pause_feed(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::PauseFeed)
    }

    pub fn resume_feed(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::ResumeFeed)
    }

    pub fn clear_feed(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::ClearFeed)
    }

    pub fn clear_history(&self) -> Result<(), SessionError> {
        self.send(ClientCommand::ClearHistory)
    }

    pub async fn history(&self) -> Result<Vec<Measurement>, SessionError> {
        self.request(|reply| ClientCommand::History { reply }).await
    }

    pub async fn summary_for(
        &self,
        barcode: impl Into<String>,
    ) -> Result<Option<InspectionSummary>, SessionError> {
        let barcode = barcode.into();
        self.request(|reply| ClientCommand::Summary { barcode, reply })
            .await
    }

    /// Cancels the event loop and waits for it to close the link.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel_token.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.context("inspection event loop failed to join"),
            None => Ok(()),
        }
    }

    fn send(&self, command: ClientCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::RuntimeClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| SessionError::RuntimeClosed)
    }
}

impl Drop for InspectionClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
