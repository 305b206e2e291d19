use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stream_cancel::{Trigger, Valved};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::common::{DEFAULT_NAME_FILTER, DEFAULT_SCAN_TIMEOUT};
use crate::radio::{Advertisement, Radio};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Devices are accepted only if their local name contains this, ignoring case.
    name_filter: String,
    /// The scan is stopped when timeout duration is reached.
    timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.to_owned(),
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ScanConfig {
    /// Filter scanned devices on a case-insensitive substring of the device name
    pub fn filter_by_name(mut self, pattern: impl Into<String>) -> Self {
        self.name_filter = pattern.into();
        self
    }

    /// Stop the scan after given duration
    pub fn stop_after_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name_filter(&self) -> &str {
        &self.name_filter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Devices without a name never match.
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) if !name.is_empty() => name
                .to_lowercase()
                .contains(&self.name_filter.to_lowercase()),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum ScanEvent {
    Discovered {
        generation: u64,
        advertisement: Advertisement,
    },
    Deadline {
        generation: u64,
    },
    /// Answer to a request to switch the radio on.
    RadioEnabled(Result<bool>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    Started,
    AwaitingRadio,
}

struct ActiveScan {
    generation: u64,
    _stopper: Trigger,
    deadline: JoinHandle<()>,
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        self.deadline.abort();
    }
}

/// Time-bounded discovery sessions.
///
/// Every scan gets a new generation number; discovery and deadline events
/// carry it so that events of a stopped scan can be told apart.
pub struct ScanController {
    config: ScanConfig,
    generation: u64,
    active: Option<ActiveScan>,
    awaiting_radio: bool,
    event_sender: UnboundedSender<ScanEvent>,
}

impl ScanController {
    pub fn new(config: ScanConfig, event_sender: UnboundedSender<ScanEvent>) -> Self {
        Self {
            config,
            generation: 0,
            active: None,
            awaiting_radio: false,
            event_sender,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn is_scanning(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| active.generation == generation)
    }

    /// Whether a discovery event should be offered to the registry.
    pub fn accepts(&self, generation: u64, advertisement: &Advertisement) -> bool {
        self.is_current(generation)
            && self
                .config
                .matches_name(advertisement.local_name.as_deref())
    }

    /// Start scanning for ble devices. A running scan is restarted.
    pub async fn start<R: Radio>(&mut self, radio: &Arc<R>) -> Result<ScanStart> {
        if self.active.is_some() {
            log::info!("Restarting the scan");
            self.stop(radio.as_ref()).await?;
        }

        if self.awaiting_radio {
            log::info!("Still waiting for the radio to be enabled");
            return Ok(ScanStart::AwaitingRadio);
        }

        if !radio.is_enabled().await? {
            log::info!("Radio is disabled, requesting enable");
            self.awaiting_radio = true;

            let radio = radio.clone();
            let sender = self.event_sender.clone();
            tokio::spawn(async move {
                let answer = radio.request_enable().await;
                sender.send(ScanEvent::RadioEnabled(answer)).ok();
            });

            return Ok(ScanStart::AwaitingRadio);
        }

        self.begin(radio.as_ref()).await?;
        Ok(ScanStart::Started)
    }

    /// Handles the answer to an enable request. Returns whether a scan was started.
    pub async fn on_radio_enabled<R: Radio>(
        &mut self,
        radio: &R,
        answer: Result<bool>,
    ) -> Result<bool> {
        if !self.awaiting_radio {
            log::debug!("Ignoring enable answer, scan was cancelled");
            return Ok(false);
        }
        self.awaiting_radio = false;

        match answer {
            Ok(true) => {
                self.begin(radio).await?;
                Ok(true)
            }
            Ok(false) => Err(Error::RadioDisabled),
            Err(e) => {
                log::warn!("Enable request failed: {}", e);
                Err(Error::RadioDisabled)
            }
        }
    }

    /// Stop scanning for ble devices. Returns whether a scan was running.
    pub async fn stop<R: Radio>(&mut self, radio: &R) -> Result<bool> {
        self.awaiting_radio = false;

        if let Some(active) = self.active.take() {
            // Aborts the deadline and closes the discovery valve.
            drop(active);
            radio.stop_discovery().await?;
            log::info!("Scanner was stopped.");
            Ok(true)
        } else {
            log::info!("Scanner is already stopped");
            Ok(false)
        }
    }

    /// Handles a deadline. Only the deadline of the running scan stops it.
    pub async fn on_deadline<R: Radio>(&mut self, radio: &R, generation: u64) -> Result<bool> {
        if !self.is_current(generation) {
            log::trace!("Ignoring deadline of scan {}", generation);
            return Ok(false);
        }

        log::info!("Scanner stop condition reached.");
        self.stop(radio).await
    }

    async fn begin<R: Radio>(&mut self, radio: &R) -> Result<()> {
        log::info!("Starting the scan");

        let discoveries = radio.start_discovery().await?;

        self.generation += 1;
        let generation = self.generation;

        let (stopper, mut discoveries) = Valved::new(discoveries);
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            while let Some(advertisement) = discoveries.next().await {
                let event = ScanEvent::Discovered {
                    generation,
                    advertisement,
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
            log::trace!("Discovery stream of scan {} ended", generation);
        });

        let timeout = self.config.timeout;
        let sender = self.event_sender.clone();
        let deadline = tokio::spawn(async move {
            sleep(timeout).await;
            sender.send(ScanEvent::Deadline { generation }).ok();
        });

        self.active = Some(ActiveScan {
            generation,
            _stopper: stopper,
            deadline,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_filter_is_a_case_insensitive_substring() {
        let config = ScanConfig::default();

        assert!(config.matches_name(Some("BBC micro:bit [zatig]")));
        assert!(config.matches_name(Some("BBC MICRO:BIT")));
        assert!(!config.matches_name(Some("BBC microbit")));
        assert!(!config.matches_name(Some("OtherDevice")));
    }

    #[test]
    fn nameless_devices_never_match() {
        let config = ScanConfig::default().filter_by_name("micro");

        assert!(!config.matches_name(None));
        assert!(!config.matches_name(Some("")));
    }

    #[test]
    fn only_the_matching_advertisement_is_accepted() {
        let config = ScanConfig::default().filter_by_name("micro");

        assert!(config.matches_name(Some("microbit_v1 [gz1]")));
        assert!(!config.matches_name(Some("OtherDevice")));
    }

    #[test]
    fn idle_scanner_accepts_nothing() {
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let scanner = ScanController::new(ScanConfig::default(), sender);

        let advertisement = Advertisement::new("AA:AA", Some("BBC micro:bit"));
        assert!(!scanner.is_scanning());
        assert!(!scanner.accepts(0, &advertisement));
    }
}
