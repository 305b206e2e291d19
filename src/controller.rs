use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::common::UNKNOWN_NAME;
use crate::presentation::Presentation;
use crate::radio::Radio;
use crate::registry::PeripheralRegistry;
use crate::scanner::{ScanConfig, ScanController, ScanEvent, ScanStart};
use crate::session::{Outcome, SessionEvent, SessionMachine, UartProfile};
use crate::{Config, Error, Message, MessageStore, Peripheral, Result};

/// User intents.
#[derive(Debug)]
pub enum Command {
    StartScan,
    StopScan,
    /// Connect to, or disconnect from, the peripheral with this address.
    Select(String),
    ListMessages(oneshot::Sender<Result<Vec<Message>>>),
    Shutdown,
}

/// Cloneable front end of a running [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    command_sender: UnboundedSender<Command>,
}

impl ControllerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.command_sender
            .send(command)
            .map_err(|_| Error::ControllerStopped)
    }

    pub fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    pub fn select(&self, address: impl Into<String>) -> Result<()> {
        self.send(Command::Select(address.into()))
    }

    /// All stored messages, most recent first.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ListMessages(reply))?;
        response.await.map_err(|_| Error::ControllerStopped)?
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Owns all mutable state and applies every transition, one event at a time.
pub struct Controller<R: Radio, P: Presentation> {
    radio: Arc<R>,
    presentation: P,
    registry: PeripheralRegistry,
    scanner: ScanController,
    session: SessionMachine<R>,
    store: MessageStore,
    commands: UnboundedReceiver<Command>,
    scan_events: UnboundedReceiver<ScanEvent>,
    session_events: UnboundedReceiver<SessionEvent<R::Link>>,
    session_sender: UnboundedSender<SessionEvent<R::Link>>,
}

impl<R: Radio, P: Presentation> Controller<R, P> {
    pub fn new(
        radio: R,
        presentation: P,
        store: MessageStore,
        scan_config: ScanConfig,
        profile: UartProfile,
    ) -> (Self, ControllerHandle) {
        let (command_sender, commands) = mpsc::unbounded_channel();
        let (scan_sender, scan_events) = mpsc::unbounded_channel();
        let (session_sender, session_events) = mpsc::unbounded_channel();

        let radio = Arc::new(radio);

        let controller = Self {
            session: SessionMachine::new(radio.clone(), profile, session_sender.clone()),
            scanner: ScanController::new(scan_config, scan_sender),
            radio,
            presentation,
            registry: PeripheralRegistry::new(),
            store,
            commands,
            scan_events,
            session_events,
            session_sender,
        };

        (controller, ControllerHandle { command_sender })
    }

    pub fn from_config(
        radio: R,
        presentation: P,
        store: MessageStore,
        config: &Config,
    ) -> (Self, ControllerHandle) {
        Self::new(
            radio,
            presentation,
            store,
            config.scan_config(),
            config.profile(),
        )
    }

    /// Runs until [`Command::Shutdown`] arrives or every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut disconnections = self.radio.disconnections().await?;
        let sender = self.session_sender.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(address) = disconnections.next().await {
                if sender.send(SessionEvent::LinkDown { address }).is_err() {
                    break;
                }
            }
        });

        log::info!("Controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(event) = self.scan_events.recv() => self.on_scan_event(event).await,
                Some(event) = self.session_events.recv() => {
                    let outcomes = self.session.handle(event);
                    self.apply(outcomes);
                }
            }
        }

        forwarder.abort();

        if let Err(e) = self.scanner.stop(self.radio.as_ref()).await {
            log::warn!("Could not stop the scan: {}", e);
        }
        let outcomes = self.session.shutdown();
        self.apply(outcomes);

        log::info!("Controller stopped");

        Ok(())
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartScan => match self.scanner.start(&self.radio).await {
                Ok(ScanStart::Started) => self.on_scan_started(),
                Ok(ScanStart::AwaitingRadio) => {}
                Err(e) => self.report(e),
            },
            Command::StopScan => {
                if let Err(e) = self.scanner.stop(self.radio.as_ref()).await {
                    self.report(e);
                }
            }
            Command::Select(address) => self.select(&address),
            Command::ListMessages(reply) => {
                reply.send(self.store.list_all()).ok();
            }
            Command::Shutdown => {}
        }
    }

    async fn on_scan_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Discovered {
                generation,
                advertisement,
            } => {
                if !self.scanner.accepts(generation, &advertisement)
                    || self.registry.contains(&advertisement.address)
                {
                    log::trace!("Skipping device {}", advertisement.address);
                    return;
                }

                let peripheral = Peripheral::new(advertisement.address, advertisement.local_name);
                log::info!("Found device: {}", peripheral);

                self.registry.insert(peripheral);
                self.presentation
                    .on_registry_changed(self.registry.peripherals());
            }
            ScanEvent::Deadline { generation } => {
                if let Err(e) = self
                    .scanner
                    .on_deadline(self.radio.as_ref(), generation)
                    .await
                {
                    self.report(e);
                }
            }
            ScanEvent::RadioEnabled(answer) => {
                match self
                    .scanner
                    .on_radio_enabled(self.radio.as_ref(), answer)
                    .await
                {
                    Ok(true) => self.on_scan_started(),
                    Ok(false) => {}
                    Err(e) => self.report(e),
                }
            }
        }
    }

    fn on_scan_started(&mut self) {
        self.registry.reset_for_rescan();
        self.presentation
            .on_registry_changed(self.registry.peripherals());
    }

    fn select(&mut self, address: &str) {
        if !self.registry.contains(address) {
            self.report(Error::UnknownPeripheral(address.to_owned()));
            return;
        }

        match self.session.select(address) {
            Ok(outcomes) => self.apply(outcomes),
            Err(e) => self.report(e),
        }
    }

    fn apply(&mut self, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            match outcome {
                Outcome::Status { address, status } => {
                    if let Some(peripheral) = self.registry.set_status(&address, status) {
                        self.presentation
                            .on_session_status_changed(peripheral, status);
                    }
                }
                Outcome::Failed(e) => self.report(e),
                Outcome::Received { address, payload } => self.store_message(&address, payload),
            }
        }
    }

    fn store_message(&mut self, address: &str, payload: String) {
        let name = self
            .registry
            .get(address)
            .map_or(UNKNOWN_NAME, Peripheral::display_name)
            .to_owned();

        match self.store.append(&name, address, &payload) {
            Ok(id) => {
                let message = Message {
                    id,
                    name,
                    address: address.to_owned(),
                    payload,
                };
                self.presentation.on_message_received(&message);
            }
            Err(e) => {
                log::error!("Could not store message from {}: {}", address, e);
                self.report(e);
            }
        }
    }

    fn report(&mut self, error: Error) {
        let reason = error.reason();
        log::warn!("{}", error);
        self.presentation.on_failure(reason, &error);
    }
}
