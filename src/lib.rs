//! BLE UART message logger.
//!
//! Scans for peripherals whose advertised name contains a pattern (by default
//! `micro:bit`), connects to the one the user picks, subscribes to its UART
//! characteristic and stores every received text message in SQLite.
//!
//! All state lives in one [`Controller`] task. User intents reach it through
//! a [`ControllerHandle`]; state changes leave it through a [`Presentation`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use blelog::{BtleRadio, Config, Controller, EventBroadcaster, MessageStore, UiEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> blelog::Result<()> {
//!     pretty_env_logger::init();
//!
//!     let config = Config::load_or_default("blelog.toml")?;
//!     let radio = BtleRadio::new(config.adapter_index).await?;
//!     let store = MessageStore::open(&config.database)?;
//!
//!     let broadcaster = EventBroadcaster::default();
//!     let mut events = broadcaster.event_stream();
//!     let (controller, handle) = Controller::from_config(radio, broadcaster, store, &config);
//!     tokio::spawn(controller.run());
//!
//!     handle.start_scan()?;
//!
//!     // Connect to the first matching device and print what it sends
//!     while let Some(event) = events.next().await {
//!         match event {
//!             UiEvent::RegistryChanged(peripherals) => {
//!                 if let Some(peripheral) = peripherals.first() {
//!                     handle.select(peripheral.address())?;
//!                 }
//!             }
//!             UiEvent::MessageReceived(message) => println!("{}", message.payload),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use btle::{BtleLink, BtleRadio};
pub use characteristic::Characteristic;
pub use config::{Config, Subscription, UartConfig};
pub use controller::{Command, Controller, ControllerHandle};
pub use error::{Error, FailureReason, Result};
pub use feed::MessageFeed;
pub use peripheral::{ConnectionStatus, Peripheral};
pub use presentation::{EventBroadcaster, Presentation, UiEvent};
pub use radio::{Advertisement, Link, Notification, Radio};
pub use registry::PeripheralRegistry;
pub use scanner::{ScanConfig, ScanController, ScanEvent, ScanStart};
pub use service::Service;
pub use session::{Outcome, SessionEvent, SessionMachine, SessionState, UartProfile};
pub use store::{Message, MessageStore};

mod btle;
mod controller;
mod error;
mod peripheral;
mod registry;
mod scanner;
mod session;
mod store;

mod characteristic;
pub mod common;
mod config;
mod feed;
mod presentation;
pub mod radio;
mod service;
