//! Connection lifecycle of the one peripheral we talk to.
//!
//! Every asynchronous step (opening the link, discovering services, enabling
//! notifications, writing the descriptor, closing) runs in its own task and
//! reports back as a [`SessionEvent`] tagged with the epoch of the attempt
//! that started it. Events of an earlier epoch are stale and ignored.

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{descriptors, uart};
use crate::radio::{Link, Notification, Radio};
use crate::{ConnectionStatus, Error, Result, Service};

/// Where to find the data characteristic and how to subscribe to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartProfile {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
    pub descriptor_value: [u8; 2],
}

impl Default for UartProfile {
    fn default() -> Self {
        Self {
            service: uart::SERVICE,
            characteristic: uart::TX_CHARACTERISTIC,
            descriptor: descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
            descriptor_value: descriptors::ENABLE_INDICATION_VALUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Active,
    Disconnecting,
}

pub enum SessionEvent<L> {
    Opened {
        epoch: u64,
        result: Result<L>,
    },
    ServicesDiscovered {
        epoch: u64,
        result: Result<Vec<Service>>,
    },
    /// Notifications are enabled locally; carries the stream they arrive on.
    NotificationsEnabled {
        epoch: u64,
        result: Result<BoxStream<'static, Notification>>,
    },
    DescriptorWritten {
        epoch: u64,
        result: Result<()>,
    },
    Data {
        epoch: u64,
        notification: Notification,
    },
    /// The notification stream of an active session ended.
    NotificationsEnded {
        epoch: u64,
    },
    /// A user-requested close completed.
    Closed {
        epoch: u64,
    },
    /// The adapter reported that the link to this address went down.
    LinkDown {
        address: String,
    },
}

/// What the owner of the machine has to act on after a transition.
#[derive(Debug)]
pub enum Outcome {
    Status {
        address: String,
        status: ConnectionStatus,
    },
    Failed(Error),
    Received {
        address: String,
        payload: String,
    },
}

struct Session<L> {
    address: String,
    state: SessionState,
    epoch: u64,
    link: Option<Arc<L>>,
    characteristic: Option<Uuid>,
    subscribed: bool,
    /// Opened before subscribing, handed to the forwarder once active.
    notifications: Option<BoxStream<'static, Notification>>,
    /// The step in flight, or the notification forwarder once active.
    task: Option<JoinHandle<()>>,
}

impl<L> Session<L> {
    fn release(&mut self) -> Option<Arc<L>> {
        if let Some(task) = self.task.take() {
            // A pending open runs to completion and its link is closed as stale.
            if self.state != SessionState::Connecting {
                task.abort();
            }
        }
        self.notifications = None;
        self.subscribed = false;
        self.link.take()
    }
}

fn spawn_step<L, F>(sender: &UnboundedSender<SessionEvent<L>>, step: F) -> JoinHandle<()>
where
    L: Send + 'static,
    F: Future<Output = SessionEvent<L>> + Send + 'static,
{
    let sender = sender.clone();
    tokio::spawn(async move {
        sender.send(step.await).ok();
    })
}

/// Opens the notification stream, then enables notifications, so that
/// nothing pushed right after the subscription lands is missed.
async fn subscribe<L: Link>(
    link: &L,
    characteristic: Uuid,
) -> Result<BoxStream<'static, Notification>> {
    let notifications = link.notifications().await?;
    link.enable_notifications(characteristic).await?;
    Ok(notifications)
}

fn close_detached<L: Link>(link: Arc<L>) {
    tokio::spawn(async move {
        if let Err(e) = link.close().await {
            log::warn!("Could not disconnect from {}: {}", link.address(), e);
        }
    });
}

pub struct SessionMachine<R: Radio> {
    radio: Arc<R>,
    profile: UartProfile,
    event_sender: UnboundedSender<SessionEvent<R::Link>>,
    epoch: u64,
    current: Option<Session<R::Link>>,
}

impl<R: Radio> SessionMachine<R> {
    pub fn new(
        radio: Arc<R>,
        profile: UartProfile,
        event_sender: UnboundedSender<SessionEvent<R::Link>>,
    ) -> Self {
        Self {
            radio,
            profile,
            event_sender,
            epoch: 0,
            current: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.current
            .as_ref()
            .map_or(SessionState::Idle, |session| session.state)
    }

    /// Address of the peripheral of the current session.
    pub fn address(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.address.as_str())
    }

    pub fn has_link(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |session| session.link.is_some())
    }

    pub fn is_subscribed(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |session| session.subscribed)
    }

    /// The user picked a peripheral.
    ///
    /// Picking the peripheral of the current session disconnects it. Picking
    /// another one replaces the current session, unless that session is still
    /// connecting or disconnecting, in which case the request is refused.
    pub fn select(&mut self, address: &str) -> Result<Vec<Outcome>> {
        let Some(session) = self.current.as_ref() else {
            return Ok(self.connect(address));
        };

        if session.address == address {
            return Ok(self.disconnect());
        }

        match session.state {
            SessionState::Connecting | SessionState::Disconnecting => Err(Error::Busy),
            _ => {
                let mut outcomes = self.teardown();
                outcomes.extend(self.connect(address));
                Ok(outcomes)
            }
        }
    }

    /// Ends the current session without waiting for the link to close.
    pub fn shutdown(&mut self) -> Vec<Outcome> {
        self.teardown()
    }

    pub fn handle(&mut self, event: SessionEvent<R::Link>) -> Vec<Outcome> {
        match event {
            SessionEvent::Opened { epoch, result } => self.on_opened(epoch, result),
            SessionEvent::ServicesDiscovered { epoch, result } => {
                self.on_services_discovered(epoch, result)
            }
            SessionEvent::NotificationsEnabled { epoch, result } => {
                self.on_notifications_enabled(epoch, result)
            }
            SessionEvent::DescriptorWritten { epoch, result } => {
                self.on_descriptor_written(epoch, result)
            }
            SessionEvent::Data {
                epoch,
                notification,
            } => self.on_data(epoch, notification),
            SessionEvent::NotificationsEnded { epoch } => self.on_notifications_ended(epoch),
            SessionEvent::Closed { epoch } => self.on_closed(epoch),
            SessionEvent::LinkDown { address } => self.on_link_down(&address),
        }
    }

    fn is_step(&self, epoch: u64, state: SessionState) -> bool {
        self.current
            .as_ref()
            .map_or(false, |session| session.epoch == epoch && session.state == state)
    }

    fn connect(&mut self, address: &str) -> Vec<Outcome> {
        self.epoch += 1;
        let epoch = self.epoch;

        log::info!("Connecting to device {}", address);

        let radio = self.radio.clone();
        let target = address.to_owned();
        let task = spawn_step(&self.event_sender, async move {
            SessionEvent::Opened {
                epoch,
                result: radio.open_connection(&target).await,
            }
        });

        self.current = Some(Session {
            address: address.to_owned(),
            state: SessionState::Connecting,
            epoch,
            link: None,
            characteristic: None,
            subscribed: false,
            notifications: None,
            task: Some(task),
        });

        vec![Outcome::Status {
            address: address.to_owned(),
            status: ConnectionStatus::Connecting,
        }]
    }

    fn disconnect(&mut self) -> Vec<Outcome> {
        let Some(state) = self.current.as_ref().map(|session| session.state) else {
            return Vec::new();
        };

        match state {
            SessionState::Idle | SessionState::Disconnecting => Vec::new(),
            // No link yet, nothing to wait for.
            SessionState::Connecting => self.teardown(),
            _ => {
                let Some(session) = self.current.as_mut() else {
                    return Vec::new();
                };
                let Some(link) = session.release() else {
                    return self.teardown();
                };

                log::info!("Disconnecting from {}", session.address);

                session.state = SessionState::Disconnecting;
                let epoch = session.epoch;
                session.task = Some(spawn_step(&self.event_sender, async move {
                    if let Err(e) = link.close().await {
                        log::warn!("Could not disconnect from {}: {}", link.address(), e);
                    }
                    SessionEvent::Closed { epoch }
                }));

                Vec::new()
            }
        }
    }

    /// Drops the current session, releasing its link.
    fn teardown(&mut self) -> Vec<Outcome> {
        let Some(mut session) = self.current.take() else {
            return Vec::new();
        };

        if let Some(link) = session.release() {
            close_detached(link);
        }

        log::info!("Session with {} ended", session.address);

        vec![Outcome::Status {
            address: session.address,
            status: ConnectionStatus::Disconnected,
        }]
    }

    fn fail(&mut self, error: Error) -> Vec<Outcome> {
        log::warn!("Session failed: {}", error);

        let mut outcomes = self.teardown();
        outcomes.push(Outcome::Failed(error));
        outcomes
    }

    fn on_opened(&mut self, epoch: u64, result: Result<R::Link>) -> Vec<Outcome> {
        if !self.is_step(epoch, SessionState::Connecting) {
            if let Ok(link) = result {
                if self.address() == Some(link.address()) {
                    // Same peripheral as the current attempt, closing it would drop that one too.
                    log::debug!("Dropping stale link to {}", link.address());
                } else {
                    log::debug!("Closing stale link to {}", link.address());
                    close_detached(Arc::new(link));
                }
            }
            return Vec::new();
        }

        let link = match result {
            Ok(link) => Arc::new(link),
            Err(e) => return self.fail(Error::ConnectionFailed(e.to_string())),
        };

        let Some(session) = self.current.as_mut() else {
            return Vec::new();
        };

        log::info!("Link to {} is up, discovering services", session.address);

        session.link = Some(link.clone());
        session.state = SessionState::ServiceDiscovery;
        session.task = Some(spawn_step(&self.event_sender, async move {
            SessionEvent::ServicesDiscovered {
                epoch,
                result: link.discover_services().await,
            }
        }));

        vec![Outcome::Status {
            address: session.address.clone(),
            status: ConnectionStatus::Connected,
        }]
    }

    fn on_services_discovered(
        &mut self,
        epoch: u64,
        result: Result<Vec<Service>>,
    ) -> Vec<Outcome> {
        if !self.is_step(epoch, SessionState::ServiceDiscovery) {
            log::trace!("Ignoring stale service discovery result");
            return Vec::new();
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => return self.fail(Error::ConnectionFailed(e.to_string())),
        };

        let profile = self.profile;
        let Some(service) = services.iter().find(|s| s.uuid() == profile.service) else {
            return self.fail(Error::MissingCapability(format!(
                "service {}",
                profile.service
            )));
        };
        let Some(characteristic) = service.characteristic(profile.characteristic) else {
            return self.fail(Error::MissingCapability(format!(
                "characteristic {}",
                profile.characteristic
            )));
        };
        if !characteristic.has_descriptor(profile.descriptor) {
            return self.fail(Error::MissingCapability(format!(
                "descriptor {}",
                profile.descriptor
            )));
        }

        let Some(session) = self.current.as_mut() else {
            return Vec::new();
        };
        let Some(link) = session.link.clone() else {
            return Vec::new();
        };

        log::debug!("Enabling notifications on {}", session.address);

        session.state = SessionState::Subscribing;
        session.characteristic = Some(profile.characteristic);
        session.task = Some(spawn_step(&self.event_sender, async move {
            SessionEvent::NotificationsEnabled {
                epoch,
                result: subscribe(link.as_ref(), profile.characteristic).await,
            }
        }));

        Vec::new()
    }

    fn on_notifications_enabled(
        &mut self,
        epoch: u64,
        result: Result<BoxStream<'static, Notification>>,
    ) -> Vec<Outcome> {
        if !self.is_step(epoch, SessionState::Subscribing) {
            return Vec::new();
        }
        let notifications = match result {
            Ok(notifications) => notifications,
            Err(e) => return self.fail(Error::SubscriptionFailed(e.to_string())),
        };

        let profile = self.profile;
        let Some(session) = self.current.as_mut() else {
            return Vec::new();
        };
        let Some(link) = session.link.clone() else {
            return Vec::new();
        };

        session.notifications = Some(notifications);

        // The local flag alone does not make the peripheral push anything.
        session.task = Some(spawn_step(&self.event_sender, async move {
            SessionEvent::DescriptorWritten {
                epoch,
                result: link
                    .write_descriptor(
                        profile.characteristic,
                        profile.descriptor,
                        &profile.descriptor_value,
                    )
                    .await,
            }
        }));

        Vec::new()
    }

    fn on_descriptor_written(&mut self, epoch: u64, result: Result<()>) -> Vec<Outcome> {
        if !self.is_step(epoch, SessionState::Subscribing) {
            return Vec::new();
        }
        if let Err(e) = result {
            return self.fail(Error::SubscriptionFailed(e.to_string()));
        }

        let Some(session) = self.current.as_mut() else {
            return Vec::new();
        };
        let Some(mut notifications) = session.notifications.take() else {
            return Vec::new();
        };

        log::info!("Receiving messages from {}", session.address);

        session.state = SessionState::Active;
        session.subscribed = true;

        let sender = self.event_sender.clone();
        session.task = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let event = SessionEvent::Data {
                    epoch,
                    notification,
                };
                if sender.send(event).is_err() {
                    return;
                }
            }

            sender.send(SessionEvent::NotificationsEnded { epoch }).ok();
        }));

        Vec::new()
    }

    fn on_data(&mut self, epoch: u64, notification: Notification) -> Vec<Outcome> {
        let Some(session) = self
            .current
            .as_ref()
            .filter(|session| session.epoch == epoch && session.state == SessionState::Active)
        else {
            log::trace!("Ignoring notification of a closed session");
            return Vec::new();
        };

        if session.characteristic != Some(notification.uuid) {
            log::trace!("Ignoring notification on {}", notification.uuid);
            return Vec::new();
        }

        let payload = String::from_utf8_lossy(&notification.value).into_owned();
        log::debug!("Received from {}: {}", session.address, payload);

        vec![Outcome::Received {
            address: session.address.clone(),
            payload,
        }]
    }

    fn on_notifications_ended(&mut self, epoch: u64) -> Vec<Outcome> {
        if self.is_step(epoch, SessionState::Active) {
            // The link-down event follows and ends the session.
            log::debug!("Notification stream ended");
        }
        Vec::new()
    }

    fn on_closed(&mut self, epoch: u64) -> Vec<Outcome> {
        if !self.is_step(epoch, SessionState::Disconnecting) {
            return Vec::new();
        }

        log::info!("Disconnected");
        self.teardown()
    }

    fn on_link_down(&mut self, address: &str) -> Vec<Outcome> {
        let Some(state) = self
            .current
            .as_ref()
            .filter(|session| session.address == address)
            .map(|session| session.state)
        else {
            log::trace!("Ignoring disconnect of {}", address);
            return Vec::new();
        };

        match state {
            // Left over from an earlier link. A failing attempt ends with its open result.
            SessionState::Connecting => {
                log::debug!("Ignoring disconnect of {} while connecting", address);
                return Vec::new();
            }
            SessionState::Disconnecting => log::info!("Disconnected from {}", address),
            _ => log::info!("{} disconnected unexpectedly", address),
        }

        let Some(mut session) = self.current.take() else {
            return Vec::new();
        };
        // The link is already gone, drop it without closing.
        session.release();

        vec![Outcome::Status {
            address: session.address,
            status: ConnectionStatus::Disconnected,
        }]
    }
}
