//! midir-backed device access

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::debug;

use super::{InputCallback, MidiDevices, MidiError, MidiInputHandle, MidiOutputSink};

pub struct MidirDevices {
    client_name: String,
}

impl MidirDevices {
    /// Probe the platform MIDI stack once; an error here means no MIDI at all
    pub fn new(client_name: &str) -> Result<Self, MidiError> {
        MidiInput::new(client_name).map_err(|e| MidiError::Init(e.to_string()))?;
        MidiOutput::new(client_name).map_err(|e| MidiError::Init(e.to_string()))?;
        Ok(Self {
            client_name: client_name.to_string(),
        })
    }

    fn input(&self) -> Result<MidiInput, MidiError> {
        MidiInput::new(&format!("{}-in", self.client_name))
            .map_err(|e| MidiError::Init(e.to_string()))
    }

    fn output(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&format!("{}-out", self.client_name))
            .map_err(|e| MidiError::Init(e.to_string()))
    }
}

struct InputConnection {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl MidiInputHandle for InputConnection {
    fn name(&self) -> &str {
        &self.name
    }
}

struct OutputConnection {
    name: String,
    conn: MidiOutputConnection,
}

impl MidiOutputSink for OutputConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, data: &[u8]) -> Result<(), MidiError> {
        self.conn
            .send(data)
            .map_err(|e| MidiError::Send(format!("{}: {}", self.name, e)))
    }
}

impl MidiDevices for MidirDevices {
    fn input_ports(&self) -> Result<Vec<String>, MidiError> {
        let midi_in = self.input()?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    fn output_ports(&self) -> Result<Vec<String>, MidiError> {
        let midi_out = self.output()?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }

    fn open_input(
        &self,
        name: &str,
        mut callback: InputCallback,
    ) -> Result<Box<dyn MidiInputHandle>, MidiError> {
        let midi_in = self.input()?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|port| midi_in.port_name(port).is_ok_and(|n| n == name))
            .ok_or_else(|| MidiError::PortNotFound(name.to_string()))?;

        let conn = midi_in
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, data, _| callback(data),
                (),
            )
            .map_err(|e| MidiError::Connect {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("MIDI input opened: '{}'", name);
        Ok(Box::new(InputConnection {
            name: name.to_string(),
            _conn: conn,
        }))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn MidiOutputSink>, MidiError> {
        let midi_out = self.output()?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|port| midi_out.port_name(port).is_ok_and(|n| n == name))
            .ok_or_else(|| MidiError::PortNotFound(name.to_string()))?;

        let conn = midi_out
            .connect(&port, &self.client_name)
            .map_err(|e| MidiError::Connect {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("MIDI output opened: '{}'", name);
        Ok(Box::new(OutputConnection {
            name: name.to_string(),
            conn,
        }))
    }
}
