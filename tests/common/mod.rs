#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blelog::common::{descriptors, uart};
use blelog::{
    Advertisement, Characteristic, ConnectionStatus, Controller, ControllerHandle, Error,
    EventBroadcaster, Link, MessageStore, Notification, Radio, Result, ScanConfig, Service,
    UartProfile, UiEvent,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RequestEnable,
    StartDiscovery,
    StopDiscovery,
    Open(String),
    Discover(String),
    EnableNotifications(String, Uuid),
    WriteDescriptor(String, Uuid, Uuid, Vec<u8>),
    Close(String),
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub services: Vec<Service>,
    pub hold_connect: bool,
    pub hold_discovery: bool,
    pub fail_connect: bool,
    pub fail_descriptor: bool,
    pub connect_delay: Option<Duration>,
    /// Pushed on the TX characteristic as soon as the descriptor is written.
    pub greeting: Option<Vec<u8>>,
}

impl MockDevice {
    pub fn uart() -> Self {
        Self {
            services: uart_services(),
            hold_connect: false,
            hold_discovery: false,
            fail_connect: false,
            fail_descriptor: false,
            connect_delay: None,
            greeting: None,
        }
    }

    pub fn without_uart() -> Self {
        Self {
            // Battery service only
            services: vec![Service::new(
                Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
                vec![Characteristic::new(
                    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb),
                    Vec::new(),
                )],
            )],
            ..Self::uart()
        }
    }

    pub fn holding_connect(mut self) -> Self {
        self.hold_connect = true;
        self
    }

    pub fn holding_discovery(mut self) -> Self {
        self.hold_discovery = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn delaying_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn greeting_on_subscribe(mut self, greeting: &[u8]) -> Self {
        self.greeting = Some(greeting.to_vec());
        self
    }

    pub fn failing_descriptor(mut self) -> Self {
        self.fail_descriptor = true;
        self
    }
}

pub fn uart_services() -> Vec<Service> {
    vec![Service::new(
        uart::SERVICE,
        vec![
            Characteristic::new(
                uart::TX_CHARACTERISTIC,
                vec![descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION],
            ),
            Characteristic::new(uart::RX_CHARACTERISTIC, Vec::new()),
        ],
    )]
}

struct Inner {
    enabled: Mutex<bool>,
    enable_answer: Mutex<bool>,
    devices: Mutex<HashMap<String, MockDevice>>,
    discovery: Mutex<Option<UnboundedSender<Advertisement>>>,
    notifiers: Mutex<HashMap<String, UnboundedSender<Notification>>>,
    disconnect_sender: UnboundedSender<String>,
    disconnect_receiver: Mutex<Option<UnboundedReceiver<String>>>,
    calls: Mutex<Vec<Call>>,
}

impl Inner {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn device(&self, address: &str) -> Result<MockDevice> {
        self.devices
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::UnknownPeripheral(address.to_owned()))
    }
}

pub struct MockRadio {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct MockControl {
    inner: Arc<Inner>,
}

pub fn mock_radio() -> (MockRadio, MockControl) {
    let (disconnect_sender, disconnect_receiver) = mpsc::unbounded_channel();
    let inner = Arc::new(Inner {
        enabled: Mutex::new(true),
        enable_answer: Mutex::new(true),
        devices: Mutex::new(HashMap::new()),
        discovery: Mutex::new(None),
        notifiers: Mutex::new(HashMap::new()),
        disconnect_sender,
        disconnect_receiver: Mutex::new(Some(disconnect_receiver)),
        calls: Mutex::new(Vec::new()),
    });

    (
        MockRadio {
            inner: inner.clone(),
        },
        MockControl { inner },
    )
}

impl MockControl {
    pub fn add_device(&self, address: &str, device: MockDevice) {
        self.inner
            .devices
            .lock()
            .unwrap()
            .insert(address.to_owned(), device);
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.inner.enabled.lock().unwrap() = enabled;
    }

    pub fn set_enable_answer(&self, answer: bool) {
        *self.inner.enable_answer.lock().unwrap() = answer;
    }

    /// Reports an advertisement to a running discovery. Returns `false` if none runs.
    pub fn advertise(&self, address: &str, name: Option<&str>) -> bool {
        match self.inner.discovery.lock().unwrap().as_ref() {
            Some(sender) => sender.send(Advertisement::new(address, name)).is_ok(),
            None => false,
        }
    }

    pub fn notify(&self, address: &str, uuid: Uuid, value: &[u8]) -> bool {
        match self.inner.notifiers.lock().unwrap().get(address) {
            Some(sender) => sender
                .send(Notification {
                    uuid,
                    value: value.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// The peripheral drops the link on its own.
    pub fn drop_link(&self, address: &str) {
        self.inner.notifiers.lock().unwrap().remove(address);
        self.inner.disconnect_sender.send(address.to_owned()).ok();
    }

    pub fn is_streaming(&self, address: &str) -> bool {
        self.inner.notifiers.lock().unwrap().contains_key(address)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn link(&self, address: &str) -> MockLink {
        MockLink {
            address: address.to_owned(),
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl Radio for MockRadio {
    type Link = MockLink;

    async fn is_enabled(&self) -> Result<bool> {
        Ok(*self.inner.enabled.lock().unwrap())
    }

    async fn request_enable(&self) -> Result<bool> {
        self.inner.record(Call::RequestEnable);
        let answer = *self.inner.enable_answer.lock().unwrap();
        *self.inner.enabled.lock().unwrap() = answer;
        Ok(answer)
    }

    async fn start_discovery(&self) -> Result<BoxStream<'static, Advertisement>> {
        self.inner.record(Call::StartDiscovery);
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.inner.discovery.lock().unwrap() = Some(sender);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.inner.record(Call::StopDiscovery);
        self.inner.discovery.lock().unwrap().take();
        Ok(())
    }

    async fn open_connection(&self, address: &str) -> Result<MockLink> {
        self.inner.record(Call::Open(address.to_owned()));
        let device = self.inner.device(address)?;

        if device.hold_connect {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = device.connect_delay {
            sleep(delay).await;
        }
        if device.fail_connect {
            return Err(Error::ConnectionFailed("refused".to_owned()));
        }

        Ok(MockLink {
            address: address.to_owned(),
            inner: self.inner.clone(),
        })
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, String>> {
        let receiver = self
            .inner
            .disconnect_receiver
            .lock()
            .unwrap()
            .take()
            .expect("disconnections are taken once");
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

pub struct MockLink {
    address: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl Link for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        self.inner.record(Call::Discover(self.address.clone()));
        let device = self.inner.device(&self.address)?;

        if device.hold_discovery {
            futures::future::pending::<()>().await;
        }

        Ok(device.services)
    }

    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.inner.record(Call::EnableNotifications(
            self.address.clone(),
            characteristic,
        ));
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.inner.record(Call::WriteDescriptor(
            self.address.clone(),
            characteristic,
            descriptor,
            value.to_vec(),
        ));

        let device = self.inner.device(&self.address)?;
        if device.fail_descriptor {
            return Err(Error::ConnectionFailed("write rejected".to_owned()));
        }
        if let Some(greeting) = device.greeting {
            if let Some(sender) = self.inner.notifiers.lock().unwrap().get(&self.address) {
                sender
                    .send(Notification {
                        uuid: uart::TX_CHARACTERISTIC,
                        value: greeting,
                    })
                    .ok();
            }
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .notifiers
            .lock()
            .unwrap()
            .insert(self.address.clone(), sender);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn close(&self) -> Result<()> {
        self.inner.record(Call::Close(self.address.clone()));
        self.inner.notifiers.lock().unwrap().remove(&self.address);
        self.inner.disconnect_sender.send(self.address.clone()).ok();
        Ok(())
    }
}

pub type Events = Pin<Box<dyn Stream<Item = UiEvent> + Send>>;

pub async fn next_event(events: &mut Events) -> UiEvent {
    timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for a ui event")
        .expect("ui event stream ended")
}

pub async fn wait_for(events: &mut Events, mut matches: impl FnMut(&UiEvent) -> bool) -> UiEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

pub fn is_status(event: &UiEvent, address: &str, status: ConnectionStatus) -> bool {
    matches!(event, UiEvent::StatusChanged(p, s) if p.address() == address && *s == status)
}

pub struct Fixture {
    pub handle: ControllerHandle,
    pub control: MockControl,
    pub events: Events,
    pub task: JoinHandle<Result<()>>,
}

impl Fixture {
    pub fn start(scan_config: ScanConfig) -> Self {
        Self::with_store(scan_config, MessageStore::open_in_memory().unwrap())
    }

    pub fn with_store(scan_config: ScanConfig, store: MessageStore) -> Self {
        let (radio, control) = mock_radio();
        let broadcaster = EventBroadcaster::new(256);
        let events = broadcaster.event_stream();

        let (controller, handle) = Controller::new(
            radio,
            broadcaster,
            store,
            scan_config,
            UartProfile::default(),
        );
        let task = tokio::spawn(controller.run());

        Self {
            handle,
            control,
            events,
            task,
        }
    }

    /// Waits until every command sent so far has been handled.
    pub async fn settle(&self) {
        self.handle.messages().await.unwrap();
    }

    pub async fn start_scan(&mut self) {
        self.handle.start_scan().unwrap();
        wait_for(&mut self.events, |e| matches!(e, UiEvent::RegistryChanged(_))).await;
    }

    /// Scans and waits until all the given devices are in the registry.
    pub async fn discover(&mut self, devices: &[(&str, &str, MockDevice)]) {
        for (address, _, device) in devices {
            self.control.add_device(address, device.clone());
        }

        self.start_scan().await;

        for (address, name, _) in devices {
            assert!(self.control.advertise(address, Some(name)));
        }

        let expected = devices.len();
        wait_for(&mut self.events, |e| {
            matches!(e, UiEvent::RegistryChanged(list) if list.len() == expected)
        })
        .await;
    }

    /// Selects an idle peripheral and waits until its notifications flow.
    pub async fn connect(&mut self, address: &str) {
        self.handle.select(address).unwrap();
        wait_for(&mut self.events, |e| {
            is_status(e, address, ConnectionStatus::Connected)
        })
        .await;

        let control = self.control.clone();
        let address = address.to_owned();
        wait_until(move || control.is_streaming(&address)).await;
    }
}
