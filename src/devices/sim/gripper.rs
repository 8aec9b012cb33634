//! Simulated paddle gripper with lift
//!
//! Polled by the client manager while subscribed. Motions complete within
//! one update; the state is republished whenever it changes.

use crate::core::driver::Driver;
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::Interface;
use crate::error::Result;
use crate::interfaces::Payload;
use crate::interfaces::gripper::{self, GripperCommand, GripperData, beams, state};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimGripperParams {
    /// An object sits between the paddles, breaking the beams when closed
    pub object_present: bool,
}

pub struct SimGripper {
    params: SimGripperParams,
    port: Option<DevicePort>,
    data: GripperData,
    published: bool,
}

impl SimGripper {
    pub fn new(params: SimGripperParams) -> Self {
        Self {
            params,
            port: None,
            data: GripperData {
                state: state::OPEN | state::LIFT_DOWN,
                beams: 0,
            },
            published: false,
        }
    }

    fn apply(&mut self, command: GripperCommand) {
        let s = &mut self.data.state;
        match command.cmd {
            gripper::OPEN => *s = (*s & !(state::CLOSED | state::MOVING)) | state::OPEN,
            gripper::CLOSE => *s = (*s & !(state::OPEN | state::MOVING)) | state::CLOSED,
            gripper::LIFT_UP => {
                *s = (*s & !(state::LIFT_DOWN | state::LIFT_MOVING)) | state::LIFT_UP
            }
            gripper::LIFT_DOWN => {
                *s = (*s & !(state::LIFT_UP | state::LIFT_MOVING)) | state::LIFT_DOWN
            }
            gripper::STORE => *s = state::CLOSED | state::LIFT_UP,
            gripper::DEPLOY => *s = state::OPEN | state::LIFT_DOWN,
            gripper::STOP => *s &= !state::MOVING,
            gripper::LIFT_STOP => *s &= !state::LIFT_MOVING,
            gripper::HALT => *s &= !(state::MOVING | state::LIFT_MOVING),
            other => {
                log::warn!("sim_gripper: unknown command {}", other);
                return;
            }
        }
        let holding = self.params.object_present && self.data.has(state::CLOSED);
        self.data.beams = if holding {
            beams::LEFT_PADDLE | beams::RIGHT_PADDLE | beams::INNER
        } else {
            0
        };
        log::debug!("sim_gripper: state {:#04x}", self.data.state);
    }
}

impl Driver for SimGripper {
    fn name(&self) -> &str {
        "sim_gripper"
    }

    fn command_size(&self, interface: Interface) -> Option<usize> {
        (interface == Interface::GRIPPER).then_some(2)
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        self.port = Some(ports.require(Interface::GRIPPER)?);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn update(&mut self) {
        let Some(port) = self.port.clone() else {
            return;
        };
        let before = self.data;
        if let Some(bytes) = port.take_command() {
            match GripperCommand::decode(&bytes) {
                Ok(command) => self.apply(command),
                Err(e) => log::warn!("sim_gripper: bad command: {}", e),
            }
        }
        if !self.published || self.data != before {
            port.put_data(&self.data.encode(), None);
            self.published = true;
        }
    }

    fn stop_command(&self, interface: Interface) -> Option<Vec<u8>> {
        (interface == Interface::GRIPPER).then(|| GripperCommand::new(gripper::HALT).encode())
    }
}
