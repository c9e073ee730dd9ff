//! MIDI Bridge
//!
//! Selects the hardware input/output pair, routes incoming Control-Change
//! messages either to learn capture or to live-value forwarding, and echoes
//! values back to the hardware LEDs.
//!
//! The bridge is owned by the state dispatcher and only touched from there.
//! Device callbacks run on the driver thread and just hand raw bytes to the
//! [`InputSink`] supplied at construction.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::backend::PortList;
use crate::learn::{LearnCapture, LearnMachine};
use crate::midi::{decode, format_hex, Channel, ControlChange};

pub mod midir_devices;

pub use midir_devices::MidirDevices;

/// Fixed channel of the bank-select echo (wire channel 3)
pub const BANK_SELECT_CHANNEL: u8 = 4;

/// Value sent with the bank-select echo
pub const BANK_SELECT_VALUE: u8 = 127;

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI initialization failed: {0}")]
    Init(String),
    #[error("MIDI port '{0}' not found")]
    PortNotFound(String),
    #[error("failed to connect to MIDI port '{port}': {reason}")]
    Connect { port: String, reason: String },
    #[error("MIDI send failed: {0}")]
    Send(String),
}

/// Raw bytes from the input device
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Where the bridge delivers input bytes
pub type InputSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Open output port
pub trait MidiOutputSink: Send {
    fn name(&self) -> &str;
    fn send(&mut self, data: &[u8]) -> Result<(), MidiError>;
}

/// Open input port; dropping it closes the connection
pub trait MidiInputHandle: Send {
    fn name(&self) -> &str;
}

/// Device enumeration and port opening
pub trait MidiDevices: Send + Sync {
    fn input_ports(&self) -> Result<Vec<String>, MidiError>;
    fn output_ports(&self) -> Result<Vec<String>, MidiError>;
    fn open_input(
        &self,
        name: &str,
        callback: InputCallback,
    ) -> Result<Box<dyn MidiInputHandle>, MidiError>;
    fn open_output(&self, name: &str) -> Result<Box<dyn MidiOutputSink>, MidiError>;
}

/// Whether MIDI I/O is usable, and which ports are open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiAvailability {
    Available {
        input: Option<String>,
        output: Option<String>,
    },
    Unavailable(String),
}

impl MidiAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, MidiAvailability::Available { .. })
    }
}

/// Device-selection and echo settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub product_name: String,
    pub led_echo: bool,
    pub preferred_input: Option<String>,
    pub preferred_output: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            product_name: "Midi Fighter Twister".to_string(),
            led_echo: true,
            preferred_input: None,
            preferred_output: None,
        }
    }
}

/// Pick a port: exact saved preference, then a name containing the product
/// name (case-insensitive), then the first port
pub fn choose_port<'a>(
    ports: &'a [String],
    preferred: Option<&str>,
    product: &str,
) -> Option<&'a str> {
    if let Some(preferred) = preferred.filter(|p| !p.is_empty()) {
        if let Some(port) = ports.iter().find(|p| p.as_str() == preferred) {
            return Some(port);
        }
        debug!("Preferred MIDI port '{}' not present", preferred);
    }

    let product = product.to_lowercase();
    if !product.is_empty() {
        if let Some(port) = ports.iter().find(|p| p.to_lowercase().contains(&product)) {
            return Some(port);
        }
    }

    ports.first().map(String::as_str)
}

/// What the dispatcher should do with an incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Captured by learn mode; stage this mapping
    Learn(LearnCapture),
    /// Forward as a live value
    Forward(ControlChange),
    /// Not a Control-Change
    Ignore,
}

pub struct MidiBridge {
    devices: Option<Arc<dyn MidiDevices>>,
    settings: BridgeSettings,
    sink: InputSink,
    input: Option<Box<dyn MidiInputHandle>>,
    output: Option<Box<dyn MidiOutputSink>>,
    known_inputs: Vec<String>,
    known_outputs: Vec<String>,
    unavailable: Option<String>,
}

impl MidiBridge {
    /// Build the bridge. A device initialization error leaves the bridge in
    /// backend-only mode for the lifetime of the process.
    pub fn new(
        devices: Result<Arc<dyn MidiDevices>, MidiError>,
        settings: BridgeSettings,
        sink: InputSink,
    ) -> Self {
        let (devices, unavailable) = match devices {
            Ok(devices) => (Some(devices), None),
            Err(e) => {
                info!("MIDI unavailable, continuing without hardware: {}", e);
                (None, Some(e.to_string()))
            }
        };

        Self {
            devices,
            settings,
            sink,
            input: None,
            output: None,
            known_inputs: Vec::new(),
            known_outputs: Vec::new(),
            unavailable,
        }
    }

    pub fn availability(&self) -> MidiAvailability {
        match &self.unavailable {
            Some(reason) => MidiAvailability::Unavailable(reason.clone()),
            None => MidiAvailability::Available {
                input: self.input.as_ref().map(|i| i.name().to_string()),
                output: self.output.as_ref().map(|o| o.name().to_string()),
            },
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Apply new settings and re-run device selection
    pub fn reconfigure(&mut self, settings: BridgeSettings) {
        if settings == self.settings {
            return;
        }
        let ports_changed = settings.preferred_input != self.settings.preferred_input
            || settings.preferred_output != self.settings.preferred_output
            || settings.product_name != self.settings.product_name;
        self.settings = settings;
        if ports_changed {
            self.select_devices();
        }
    }

    /// Enumerate ports and open the chosen pair
    pub fn select_devices(&mut self) {
        let Some(devices) = self.devices.clone() else {
            return;
        };
        let (inputs, outputs) = match (devices.input_ports(), devices.output_ports()) {
            (Ok(inputs), Ok(outputs)) => (inputs, outputs),
            (Err(e), _) | (_, Err(e)) => {
                warn!("MIDI port enumeration failed: {}", e);
                return;
            }
        };
        self.open_chosen(devices.as_ref(), &inputs, &outputs);
        self.known_inputs = inputs;
        self.known_outputs = outputs;
    }

    /// Re-select devices when the port lists changed since the last look,
    /// or reopen a chosen port that was dropped after an error
    pub fn poll_devices(&mut self) {
        let Some(devices) = self.devices.clone() else {
            return;
        };
        let (Ok(inputs), Ok(outputs)) = (devices.input_ports(), devices.output_ports()) else {
            return;
        };
        if inputs == self.known_inputs && outputs == self.known_outputs {
            if !self.has_closed_port(&inputs, &outputs) {
                return;
            }
            debug!("Reopening closed MIDI ports");
        } else {
            info!(
                "MIDI ports changed ({} in, {} out), re-selecting devices",
                inputs.len(),
                outputs.len()
            );
        }
        self.open_chosen(devices.as_ref(), &inputs, &outputs);
        self.known_inputs = inputs;
        self.known_outputs = outputs;
    }

    fn has_closed_port(&self, inputs: &[String], outputs: &[String]) -> bool {
        let product = &self.settings.product_name;
        let input_closed = self.input.is_none()
            && choose_port(inputs, self.settings.preferred_input.as_deref(), product).is_some();
        let output_closed = self.output.is_none()
            && choose_port(outputs, self.settings.preferred_output.as_deref(), product).is_some();
        input_closed || output_closed
    }

    fn open_chosen(&mut self, devices: &dyn MidiDevices, inputs: &[String], outputs: &[String]) {
        let product = self.settings.product_name.clone();

        let wanted_in = choose_port(inputs, self.settings.preferred_input.as_deref(), &product);
        let current_in = self.input.as_ref().map(|i| i.name().to_string());
        if wanted_in != current_in.as_deref() {
            // Close first so a re-open of the same device does not collide
            self.input = None;
            if let Some(name) = wanted_in {
                let sink = self.sink.clone();
                let callback: InputCallback = Box::new(move |data: &[u8]| sink(data.to_vec()));
                match devices.open_input(name, callback) {
                    Ok(handle) => {
                        info!("MIDI input: {}", name);
                        self.input = Some(handle);
                    }
                    Err(e) => warn!("Failed to open MIDI input: {}", e),
                }
            } else {
                debug!("No MIDI input ports");
            }
        }

        let wanted_out = choose_port(outputs, self.settings.preferred_output.as_deref(), &product);
        let current_out = self.output.as_ref().map(|o| o.name().to_string());
        if wanted_out != current_out.as_deref() {
            self.output = None;
            if let Some(name) = wanted_out {
                match devices.open_output(name) {
                    Ok(sink) => {
                        info!("MIDI output: {}", name);
                        self.output = Some(sink);
                    }
                    Err(e) => warn!("Failed to open MIDI output: {}", e),
                }
            } else {
                debug!("No MIDI output ports");
            }
        }
    }

    /// Ports visible on this machine
    pub fn local_ports(&self) -> PortList {
        let Some(devices) = self.devices.as_ref() else {
            return PortList::default();
        };
        PortList {
            inputs: devices.input_ports().unwrap_or_default(),
            outputs: devices.output_ports().unwrap_or_default(),
        }
    }

    /// Decode raw input and decide where it goes
    pub fn route(&mut self, data: &[u8], learn: &mut LearnMachine) -> Route {
        let Some(message) = decode(data) else {
            trace!("Ignoring non-CC MIDI: {}", format_hex(data));
            return Route::Ignore;
        };
        debug!("MIDI in: {}", message);

        if learn.is_armed() {
            if let Some(capture) = learn.capture(&message) {
                return Route::Learn(capture);
            }
        }

        if self.settings.led_echo {
            self.send(&message);
        }
        Route::Forward(message)
    }

    /// Send a Control-Change to the output; failures drop the output handle
    pub fn send(&mut self, message: &ControlChange) -> bool {
        let Some(output) = self.output.as_mut() else {
            trace!("MIDI out skipped (no output): {}", message);
            return false;
        };
        let bytes = message.encode();
        match output.send(&bytes) {
            Ok(()) => {
                trace!("MIDI out: {}", format_hex(&bytes));
                true
            }
            Err(e) => {
                warn!("{}", e);
                self.output = None;
                false
            }
        }
    }

    /// Tell the hardware which bank is active
    pub fn send_bank_select(&mut self, bank: u8) -> bool {
        let channel = Channel::new(BANK_SELECT_CHANNEL).unwrap_or_default();
        let message = ControlChange::new(bank.saturating_sub(1), BANK_SELECT_VALUE, channel);
        debug!("Bank select echo for bank {}", bank);
        self.send(&message)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory devices recording everything sent and opened
    #[derive(Default)]
    pub struct FakeDevices {
        pub inputs: Mutex<Vec<String>>,
        pub outputs: Mutex<Vec<String>>,
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub callbacks: Mutex<Vec<(String, InputCallback)>>,
        pub opened_inputs: Mutex<Vec<String>>,
        pub fail_send: Arc<Mutex<bool>>,
        pub fail_open_input: Mutex<bool>,
    }

    impl FakeDevices {
        pub fn with_ports(inputs: &[&str], outputs: &[&str]) -> Arc<Self> {
            let devices = Self::default();
            *devices.inputs.lock() = inputs.iter().map(|s| s.to_string()).collect();
            *devices.outputs.lock() = outputs.iter().map(|s| s.to_string()).collect();
            Arc::new(devices)
        }

        /// Deliver bytes through the most recently opened input callback
        pub fn feed(&self, data: &[u8]) {
            if let Some((_, callback)) = self.callbacks.lock().last_mut() {
                callback(data);
            }
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }
    }

    struct FakeInput(String);

    impl MidiInputHandle for FakeInput {
        fn name(&self) -> &str {
            &self.0
        }
    }

    struct FakeOutput {
        name: String,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl MidiOutputSink for FakeOutput {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&mut self, data: &[u8]) -> Result<(), MidiError> {
            if *self.fail.lock() {
                return Err(MidiError::Send("device gone".into()));
            }
            self.sent.lock().push(data.to_vec());
            Ok(())
        }
    }

    impl MidiDevices for FakeDevices {
        fn input_ports(&self) -> Result<Vec<String>, MidiError> {
            Ok(self.inputs.lock().clone())
        }

        fn output_ports(&self) -> Result<Vec<String>, MidiError> {
            Ok(self.outputs.lock().clone())
        }

        fn open_input(
            &self,
            name: &str,
            callback: InputCallback,
        ) -> Result<Box<dyn MidiInputHandle>, MidiError> {
            if !self.inputs.lock().iter().any(|p| p == name) {
                return Err(MidiError::PortNotFound(name.to_string()));
            }
            if *self.fail_open_input.lock() {
                return Err(MidiError::Connect {
                    port: name.to_string(),
                    reason: "busy".to_string(),
                });
            }
            self.opened_inputs.lock().push(name.to_string());
            self.callbacks.lock().push((name.to_string(), callback));
            Ok(Box::new(FakeInput(name.to_string())))
        }

        fn open_output(&self, name: &str) -> Result<Box<dyn MidiOutputSink>, MidiError> {
            if !self.outputs.lock().iter().any(|p| p == name) {
                return Err(MidiError::PortNotFound(name.to_string()));
            }
            Ok(Box::new(FakeOutput {
                name: name.to_string(),
                sent: self.sent.clone(),
                fail: self.fail_send.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDevices;
    use super::*;
    use crate::learn::EncoderRef;
    use parking_lot::Mutex;

    fn ports(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn collecting_sink() -> (InputSink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let clone = received.clone();
        (Arc::new(move |bytes| clone.lock().push(bytes)), received)
    }

    fn bridge(devices: Arc<FakeDevices>, settings: BridgeSettings) -> MidiBridge {
        let (sink, _) = collecting_sink();
        let devices: Arc<dyn MidiDevices> = devices;
        let mut bridge = MidiBridge::new(Ok(devices), settings, sink);
        bridge.select_devices();
        bridge
    }

    #[test]
    fn test_choose_port_preference_order() {
        let list = ports(&["IAC Bus 1", "Midi Fighter Twister", "Other"]);

        assert_eq!(
            choose_port(&list, Some("Other"), "Midi Fighter Twister"),
            Some("Other")
        );
        assert_eq!(
            choose_port(&list, Some("Missing"), "midi fighter"),
            Some("Midi Fighter Twister")
        );
        assert_eq!(choose_port(&list, None, "nothing"), Some("IAC Bus 1"));
        assert_eq!(choose_port(&[], None, "twister"), None);
    }

    #[test]
    fn test_selects_product_ports() {
        let devices = FakeDevices::with_ports(
            &["IAC Bus 1", "Midi Fighter Twister"],
            &["Midi Fighter Twister", "IAC Bus 1"],
        );
        let bridge = bridge(devices, BridgeSettings::default());

        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: Some("Midi Fighter Twister".into()),
                output: Some("Midi Fighter Twister".into()),
            }
        );
    }

    #[test]
    fn test_unavailable_devices_report_reason() {
        let (sink, _) = collecting_sink();
        let mut bridge = MidiBridge::new(
            Err(MidiError::Init("no driver".into())),
            BridgeSettings::default(),
            sink,
        );
        bridge.select_devices();
        bridge.poll_devices();

        assert!(!bridge.availability().is_available());
        assert!(!bridge.send(&ControlChange::new(1, 1, Channel::default())));
        assert_eq!(bridge.local_ports(), PortList::default());
    }

    #[test]
    fn test_input_bytes_reach_sink() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let (sink, received) = collecting_sink();
        let dyn_devices: Arc<dyn MidiDevices> = devices.clone();
        let mut bridge = MidiBridge::new(Ok(dyn_devices), BridgeSettings::default(), sink);
        bridge.select_devices();

        devices.feed(&[0xB0, 1, 2]);
        assert_eq!(*received.lock(), vec![vec![0xB0, 1, 2]]);
    }

    #[test]
    fn test_forward_echoes_to_output() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        let mut learn = LearnMachine::new();

        let route = bridge.route(&[0xB2, 7, 64], &mut learn);
        assert_eq!(route, Route::Forward(decode(&[0xB2, 7, 64]).unwrap()));
        assert_eq!(devices.sent(), vec![vec![0xB2, 7, 64]]);
    }

    #[test]
    fn test_echo_disabled() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let settings = BridgeSettings {
            led_echo: false,
            ..Default::default()
        };
        let mut bridge = bridge(devices.clone(), settings);

        let route = bridge.route(&[0xB0, 7, 64], &mut LearnMachine::new());
        assert!(matches!(route, Route::Forward(_)));
        assert!(devices.sent().is_empty());
    }

    #[test]
    fn test_armed_learn_consumes_message() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        let mut learn = LearnMachine::new();
        learn.set_enabled(true);
        learn.arm(EncoderRef::new(1, 7).unwrap());

        let route = bridge.route(&[0xB0, 42, 90], &mut learn);
        match route {
            Route::Learn(capture) => {
                assert_eq!(capture.target, EncoderRef::new(1, 7).unwrap());
                assert_eq!(capture.cc, 42);
                assert_eq!(capture.channel.get(), 1);
            }
            other => panic!("expected learn capture, got {other:?}"),
        }
        assert!(devices.sent().is_empty());
        assert!(learn.is_enabled());
    }

    #[test]
    fn test_non_cc_input_is_ignored() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        assert_eq!(
            bridge.route(&[0x90, 60, 100], &mut LearnMachine::new()),
            Route::Ignore
        );
        assert!(devices.sent().is_empty());
    }

    #[test]
    fn test_bank_select_uses_channel_four() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        assert!(bridge.send_bank_select(3));
        assert_eq!(devices.sent(), vec![vec![0xB3, 2, 127]]);
    }

    #[test]
    fn test_send_failure_drops_output() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        *devices.fail_send.lock() = true;

        assert!(!bridge.send(&ControlChange::new(1, 1, Channel::default())));
        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: Some("Twister".into()),
                output: None,
            }
        );
    }

    #[test]
    fn test_poll_reopens_output_after_send_failure() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        *devices.fail_send.lock() = true;
        assert!(!bridge.send(&ControlChange::new(1, 1, Channel::default())));

        *devices.fail_send.lock() = false;
        bridge.poll_devices();

        assert!(bridge.send(&ControlChange::new(1, 2, Channel::default())));
        assert_eq!(devices.sent(), vec![vec![0xB0, 1, 2]]);
        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: Some("Twister".into()),
                output: Some("Twister".into()),
            }
        );
        // The input was never dropped, so it is not reopened
        assert_eq!(devices.opened_inputs.lock().len(), 1);
    }

    #[test]
    fn test_poll_retries_failed_input_open() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        *devices.fail_open_input.lock() = true;
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        assert!(devices.opened_inputs.lock().is_empty());

        *devices.fail_open_input.lock() = false;
        bridge.poll_devices();
        assert_eq!(*devices.opened_inputs.lock(), vec!["Twister".to_string()]);

        bridge.poll_devices();
        assert_eq!(devices.opened_inputs.lock().len(), 1);
    }

    #[test]
    fn test_hot_plug_reselects() {
        let devices = FakeDevices::with_ports(&["IAC Bus 1"], &["IAC Bus 1"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());
        assert_eq!(devices.opened_inputs.lock().len(), 1);

        // Unchanged lists: nothing reopened
        bridge.poll_devices();
        assert_eq!(devices.opened_inputs.lock().len(), 1);

        devices.inputs.lock().push("Midi Fighter Twister".into());
        devices.outputs.lock().push("Midi Fighter Twister".into());
        bridge.poll_devices();

        assert_eq!(
            *devices.opened_inputs.lock(),
            vec!["IAC Bus 1".to_string(), "Midi Fighter Twister".to_string()]
        );
        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: Some("Midi Fighter Twister".into()),
                output: Some("Midi Fighter Twister".into()),
            }
        );
    }

    #[test]
    fn test_removal_closes_ports() {
        let devices = FakeDevices::with_ports(&["Twister"], &["Twister"]);
        let mut bridge = bridge(devices.clone(), BridgeSettings::default());

        devices.inputs.lock().clear();
        devices.outputs.lock().clear();
        bridge.poll_devices();

        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: None,
                output: None
            }
        );
    }

    #[test]
    fn test_reconfigure_applies_saved_preference() {
        let devices = FakeDevices::with_ports(&["A", "B"], &["A", "B"]);
        let mut bridge = bridge(devices, BridgeSettings::default());

        bridge.reconfigure(BridgeSettings {
            preferred_input: Some("B".into()),
            preferred_output: Some("B".into()),
            ..Default::default()
        });
        assert_eq!(
            bridge.availability(),
            MidiAvailability::Available {
                input: Some("B".into()),
                output: Some("B".into()),
            }
        );
    }
}
