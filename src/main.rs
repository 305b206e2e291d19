//! Console front end: scans, connects and prints what the device sends.

use std::env;

use blelog::{
    BtleRadio, Config, Controller, ControllerHandle, EventBroadcaster, MessageFeed, MessageStore,
    Peripheral, Result, UiEvent,
};
use futures::StreamExt;
use tokio::io::{self, AsyncBufReadExt, BufReader};

const USAGE: &str =
    "commands: scan | stop | connect <n> | messages | reset | history | devices | quit";

struct Console {
    handle: ControllerHandle,
    devices: Vec<Peripheral>,
    feed: MessageFeed,
    show_devices: bool,
    show_history: bool,
}

impl Console {
    fn new(handle: ControllerHandle) -> Self {
        Self {
            handle,
            devices: Vec::new(),
            feed: MessageFeed::default(),
            show_devices: true,
            show_history: false,
        }
    }

    /// Returns `false` when the user asked to quit.
    async fn execute(&mut self, line: &str) -> Result<bool> {
        let mut words = line.split_whitespace();

        match words.next() {
            None => {}
            Some("scan") => self.handle.start_scan()?,
            Some("stop") => self.handle.stop_scan()?,
            Some("connect") => {
                let device = words
                    .next()
                    .and_then(|index| index.parse::<usize>().ok())
                    .and_then(|index| self.devices.get(index));

                match device {
                    Some(device) => self.handle.select(device.address())?,
                    None => println!("No such device, see `devices`"),
                }
            }
            Some("messages") => {
                for message in self.feed.iter() {
                    println!("{}", message.payload);
                }
            }
            Some("reset") => {
                self.feed.clear();
                println!("Display cleared");
            }
            Some("history") => {
                self.show_history = !self.show_history;
                if self.show_history {
                    for message in self.handle.messages().await? {
                        println!(
                            "#{} {} ({}): {}",
                            message.id, message.name, message.address, message.payload
                        );
                    }
                } else {
                    println!("History hidden");
                }
            }
            Some("devices") => {
                self.show_devices = !self.show_devices;
                if self.show_devices {
                    self.print_devices();
                }
            }
            Some("quit") => return Ok(false),
            Some(_) => println!("{}", USAGE),
        }

        Ok(true)
    }

    fn render(&mut self, event: UiEvent) {
        match event {
            UiEvent::RegistryChanged(peripherals) => {
                self.devices = peripherals;
                if self.show_devices {
                    self.print_devices();
                }
            }
            UiEvent::StatusChanged(peripheral, status) => {
                println!("{} is {}", peripheral.display_name(), status);
                if let Some(device) = self
                    .devices
                    .iter_mut()
                    .find(|device| device.address() == peripheral.address())
                {
                    *device = peripheral;
                }
            }
            UiEvent::MessageReceived(message) => {
                println!("{}: {}", message.name, message.payload);
                self.feed.push(message);
            }
            UiEvent::Failure(reason, text) => eprintln!("{:?}: {}", reason, text),
        }
    }

    fn print_devices(&self) {
        if self.devices.is_empty() {
            println!("No devices found yet");
        }
        for (index, device) in self.devices.iter().enumerate() {
            println!("[{}] {}", index, device);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "blelog.toml".to_owned());
    let config = Config::load_or_default(&path)?;

    let store = MessageStore::open(&config.database)?;
    let radio = BtleRadio::new(config.adapter_index).await?;

    let broadcaster = EventBroadcaster::default();
    let mut events = broadcaster.event_stream();
    let (controller, handle) = Controller::from_config(radio, broadcaster, store, &config);
    let controller = tokio::spawn(controller.run());

    let mut console = Console::new(handle.clone());
    let mut lines = BufReader::new(io::stdin()).lines();

    println!("{}", USAGE);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !console.execute(line.trim()).await? {
                        break;
                    }
                }
                None => break,
            },
            Some(event) = events.next() => console.render(event),
        }
    }

    handle.shutdown().ok();

    match controller.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Controller task failed: {}", e);
            Ok(())
        }
    }
}
