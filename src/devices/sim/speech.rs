//! Simulated speech synthesizer: write only, logs what it is told to say

use crate::core::driver::Driver;
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::Interface;
use crate::error::Result;
use crate::interfaces::Payload;
use crate::interfaces::speech::{MAX_TEXT_LEN, SpeechCommand};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimSpeechParams {
    /// Phrases remembered
    pub history: usize,
}

impl Default for SimSpeechParams {
    fn default() -> Self {
        Self { history: 4 }
    }
}

pub struct SimSpeech {
    params: SimSpeechParams,
    port: Option<DevicePort>,
    spoken: Arc<Mutex<VecDeque<String>>>,
}

impl SimSpeech {
    pub fn new(params: SimSpeechParams) -> Self {
        Self {
            params,
            port: None,
            spoken: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Most recent phrases, oldest first
    pub fn spoken(&self) -> Arc<Mutex<VecDeque<String>>> {
        Arc::clone(&self.spoken)
    }
}

impl Driver for SimSpeech {
    fn name(&self) -> &str {
        "sim_speech"
    }

    fn command_size(&self, interface: Interface) -> Option<usize> {
        (interface == Interface::SPEECH).then_some(MAX_TEXT_LEN)
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        self.port = Some(ports.require(Interface::SPEECH)?);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn update(&mut self) {
        let Some(bytes) = self.port.as_ref().and_then(DevicePort::take_command) else {
            return;
        };
        match SpeechCommand::decode(&bytes) {
            Ok(SpeechCommand { text }) if !text.is_empty() => {
                log::info!("sim_speech: \"{}\"", text);
                let mut spoken = self.spoken.lock();
                spoken.push_back(text);
                while spoken.len() > self.params.history {
                    spoken.pop_front();
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("sim_speech: bad command: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeviceAddress;

    #[test]
    fn test_phrases_kept_in_order() {
        let mut driver = SimSpeech::new(SimSpeechParams { history: 2 });
        let port = DevicePort::new(
            DeviceAddress::new(Interface::SPEECH, 0),
            driver.command_size(Interface::SPEECH),
            None,
        );
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();
        let spoken = driver.spoken();

        for phrase in ["one", "two", "three"] {
            port.put_command(&SpeechCommand::new(phrase).encode()).unwrap();
            driver.update();
        }
        // nothing new: nothing said
        driver.update();
        assert_eq!(*spoken.lock(), VecDeque::from(vec!["two".to_string(), "three".to_string()]));
        assert!(port.timestamp().is_none());
    }
}
