use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    connection::LinkNotice,
    history::InspectionSummary,
    models::Measurement,
    session::{SessionController, SessionError},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum ClientCommand {
    Connect,
    Disconnect,
    RetryNow,
    StartListening {
        model_id: Option<i64>,
        reply: Reply<Result<Uuid, SessionError>>,
    },
    SubmitBarcode {
        barcode: String,
        model_id: Option<i64>,
        reply: Reply<Result<Uuid, SessionError>>,
    },
    Stop {
        reply: Reply<Result<Option<Uuid>, SessionError>>,
    },
    PauseFeed,
    ResumeFeed,
    ClearFeed,
    ClearHistory,
    History {
        reply: Reply<Vec<Measurement>>,
    },
    Summary {
        barcode: String,
        reply: Reply<Option<InspectionSummary>>,
    },
}

/// Runs until `cancel_token` fires or every client handle is dropped.
pub(crate) async fn event_loop(
    mut controller: SessionController,
    mut notices: mpsc::UnboundedReceiver<LinkNotice>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    cancel_token: CancellationToken,
) {
    log_info!("inspection event loop started");
    controller.connect();

    loop {
        let deadline = controller.next_deadline();
        tokio::select! {
            Some(notice) = notices.recv() => controller.handle_notice(notice),
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut controller, command),
                None => {
                    log_debug!("all client handles dropped");
                    break;
                }
            },
            _ = wait_for(deadline) => controller.on_timer(Instant::now()),
            _ = cancel_token.cancelled() => {
                log_info!("inspection event loop shutting down");
                break;
            }
        }
    }

    controller.disconnect();
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn dispatch(controller: &mut SessionController, command: ClientCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        ClientCommand::Connect => controller.connect(),
        ClientCommand::Disconnect => controller.disconnect(),
        ClientCommand::RetryNow => controller.retry_now(),
        ClientCommand::StartListening { model_id, reply } => {
            let _ = reply.send(controller.start_listening(model_id));
        }
        ClientCommand::SubmitBarcode {
            barcode,
            model_id,
            reply,
        } => {
            let _ = reply.send(controller.submit_barcode(&barcode, model_id));
        }
        ClientCommand::Stop { reply } => {
            let _ = reply.send(controller.stop());
        }
        ClientCommand::PauseFeed => controller.pause_feed(),
        ClientCommand::ResumeFeed => controller.resume_feed(),
        ClientCommand::ClearFeed => controller.clear_feed(),
        ClientCommand::ClearHistory => controller.clear_history(),
        ClientCommand::History { reply } => {
            let _ = reply.send(controller.history().to_vec());
        }
        ClientCommand::Summary { barcode, reply } => {
            let _ = reply.send(controller.summary_for(&barcode));
        }
    }
}
