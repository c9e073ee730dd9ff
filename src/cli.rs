//! Command-line interface and REPL
//!
//! The REPL runs on its own OS thread (rustyline blocks) and talks to the
//! state actor through its handle.

use colored::*;
use parking_lot::RwLock;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::PortList;
use crate::bridge::MidiAvailability;
use crate::connection::ConnectionStatus;
use crate::learn::LearnState;
use crate::paths::AppPaths;
use crate::presets::{display_name, LoadOutcome};
use crate::state::{MappingEdit, PortReport, StateActorHandle, StoreSnapshot};

const HELP: &str = "\
Commands:
  state                          show the current bank
  bank <1-4>                     select a bank
  learn on|off                   enable or disable learn mode
  arm <bank> <encoder>           capture the next CC for an encoder
  map <bank> <enc> <cc> [ch=<n>] [label]
                                 stage a temporary mapping
  persist <bank> <enc> <cc> [label]
                                 write a mapping to the base table
  presets                        list presets
  load <name>                    load a preset
  save [name]                    save the active preset, or save as <name>
  download <name>                download a preset file
  ports                          list MIDI ports
  quit                           exit";

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Empty,
    Help,
    Quit,
    State,
    Ports,
    Bank(i64),
    Learn(bool),
    Arm { bank: i64, encoder: i64 },
    Map(MappingEdit),
    Persist(MappingEdit),
    Presets,
    Load(String),
    Save(Option<String>),
    Download(String),
}

fn int(token: Option<&str>, what: &str) -> Result<i64, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    token
        .parse()
        .map_err(|_| format!("{what} must be a number, got '{token}'"))
}

fn rest(tokens: &[&str]) -> Option<String> {
    let joined = tokens.join(" ");
    (!joined.is_empty()).then_some(joined)
}

pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = tokens.split_first() else {
        return Ok(ReplCommand::Empty);
    };
    let mut it = args.iter().copied();

    let command = match head.to_ascii_lowercase().as_str() {
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        "state" | "show" => ReplCommand::State,
        "ports" => ReplCommand::Ports,
        "presets" => ReplCommand::Presets,
        "bank" => ReplCommand::Bank(int(it.next(), "bank")?),
        "learn" => match it.next().map(str::to_ascii_lowercase).as_deref() {
            Some("on") => ReplCommand::Learn(true),
            Some("off") => ReplCommand::Learn(false),
            _ => return Err("usage: learn on|off".to_string()),
        },
        "arm" => ReplCommand::Arm {
            bank: int(it.next(), "bank")?,
            encoder: int(it.next(), "encoder")?,
        },
        "map" => {
            let mut edit = MappingEdit::new(
                int(it.next(), "bank")?,
                int(it.next(), "encoder")?,
                int(it.next(), "cc")?,
            );
            let mut remaining = &args[3..];
            if let Some(value) = remaining.first().and_then(|t| t.strip_prefix("ch=")) {
                edit = edit.with_channel(int(Some(value), "channel")?);
                remaining = &remaining[1..];
            }
            if let Some(label) = rest(remaining) {
                edit = edit.with_label(label);
            }
            ReplCommand::Map(edit)
        }
        "persist" => {
            let mut edit = MappingEdit::new(
                int(it.next(), "bank")?,
                int(it.next(), "encoder")?,
                int(it.next(), "cc")?,
            );
            if let Some(label) = rest(&args[3..]) {
                edit = edit.with_label(label);
            }
            ReplCommand::Persist(edit)
        }
        "load" => ReplCommand::Load(rest(args).ok_or("usage: load <name>")?),
        "save" => ReplCommand::Save(rest(args)),
        "download" => ReplCommand::Download(rest(args).ok_or("usage: download <name>")?),
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(command)
}

fn describe_midi(midi: &MidiAvailability) -> String {
    match midi {
        MidiAvailability::Available { input, output } => format!(
            "in={} out={}",
            input.as_deref().unwrap_or("-"),
            output.as_deref().unwrap_or("-")
        ),
        MidiAvailability::Unavailable(reason) => format!("unavailable ({reason})"),
    }
}

fn describe_learn(learn: &LearnState) -> String {
    match learn {
        LearnState::Off => "off".to_string(),
        LearnState::Idle => "on".to_string(),
        LearnState::Armed(target) => format!("armed for {target}"),
    }
}

/// Plain-text rendering of the current bank
pub fn render_snapshot(snapshot: &StoreSnapshot, status: &ConnectionStatus) -> String {
    let mut out = String::new();
    let preset = snapshot.current_preset.as_deref().map(display_name).unwrap_or("-");
    let dirty = if snapshot.dirty { " (unsaved changes)" } else { "" };
    let _ = writeln!(
        out,
        "Bank {} | preset {}{} | {}",
        snapshot.current_bank(),
        preset,
        dirty,
        status
    );
    let _ = writeln!(
        out,
        "learn: {} | midi: {}",
        describe_learn(&snapshot.learn),
        describe_midi(&snapshot.midi)
    );
    if snapshot.state.is_none() {
        let _ = writeln!(out, "(no state received yet)");
        return out;
    }
    for view in snapshot.encoder_views() {
        let _ = writeln!(
            out,
            "  E{:<2} {:<16} {:>3} ({:>3}%)  cc {:>3} ch {:>2}",
            view.encoder, view.label, view.value, view.percent, view.cc, view.channel
        );
    }
    if let Some(at) = snapshot.last_push_at {
        let _ = writeln!(out, "last update {}", at.format("%H:%M:%S"));
    }
    out
}

fn render_port_list(out: &mut String, title: &str, ports: &PortList) {
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "  inputs:  {}", join_or_none(&ports.inputs));
    let _ = writeln!(out, "  outputs: {}", join_or_none(&ports.outputs));
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

pub fn render_ports(report: &PortReport) -> String {
    let mut out = String::new();
    render_port_list(&mut out, "Local ports", &report.local);
    match &report.backend {
        Some(ports) => render_port_list(&mut out, "Backend ports", ports),
        None => {
            let _ = writeln!(out, "Backend ports: unavailable");
        }
    }
    let _ = writeln!(out, "Selected: {}", describe_midi(&report.selected));
    out
}

/// Everything the REPL needs from the running application
pub struct ReplContext {
    pub handle: StateActorHandle,
    pub status: Arc<RwLock<ConnectionStatus>>,
    pub paths: AppPaths,
    pub runtime: Handle,
}

/// Start the REPL thread; the receiver resolves when the user quits
pub fn spawn_repl(ctx: ReplContext) -> std::io::Result<oneshot::Receiver<()>> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || {
            if let Err(e) = run_repl(&ctx) {
                warn!("REPL stopped: {}", e);
            }
            let _ = done_tx.send(());
        })?;
    Ok(done_rx)
}

fn run_repl(ctx: &ReplContext) -> Result<(), ReadlineError> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "twister-sync ready, type 'help' for commands".bright_black());

    loop {
        match rl.readline("twister> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match parse_command(&line) {
                    Ok(ReplCommand::Quit) => break,
                    Ok(command) => execute(ctx, &mut rl, command),
                    Err(message) => println!("{}", message.yellow()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn report(ok: bool, success: &str, failure: &str) {
    if ok {
        println!("{}", success.green());
    } else {
        println!("{}", failure.red());
    }
}

fn confirm(rl: &mut DefaultEditor, prompt: &str) -> bool {
    matches!(
        rl.readline(prompt).map(|a| a.trim().to_ascii_lowercase()),
        Ok(answer) if answer == "y" || answer == "yes"
    )
}

fn execute(ctx: &ReplContext, rl: &mut DefaultEditor, command: ReplCommand) {
    let handle = &ctx.handle;
    let rt = &ctx.runtime;
    debug!("REPL command: {:?}", command);

    match command {
        ReplCommand::Empty | ReplCommand::Quit => {}
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::State => match rt.block_on(handle.snapshot()) {
            Some(snapshot) => print!("{}", render_snapshot(&snapshot, &ctx.status.read())),
            None => println!("{}", "state unavailable".red()),
        },
        ReplCommand::Ports => match rt.block_on(handle.list_ports()) {
            Some(report) => print!("{}", render_ports(&report)),
            None => println!("{}", "ports unavailable".red()),
        },
        ReplCommand::Bank(bank) => report(
            rt.block_on(handle.select_bank(bank)),
            &format!("bank {bank} selected"),
            "bank change failed",
        ),
        ReplCommand::Learn(enabled) => {
            handle.set_learn(enabled);
            println!("learn {}", if enabled { "on" } else { "off" });
        }
        ReplCommand::Arm { bank, encoder } => {
            handle.arm_learn(bank, encoder);
            println!("waiting for a CC for bank {bank} encoder {encoder}");
        }
        ReplCommand::Map(edit) => report(
            rt.block_on(handle.stage_mapping(edit)),
            "mapping staged",
            "mapping rejected",
        ),
        ReplCommand::Persist(edit) => report(
            rt.block_on(handle.persist_mapping(edit)),
            "mapping saved",
            "mapping rejected",
        ),
        ReplCommand::Presets => match rt.block_on(handle.list_presets()) {
            Some(listing) => {
                for name in &listing.presets {
                    let marker = if listing.is_current(name) { "*" } else { " " };
                    println!(" {} {}", marker.green(), display_name(name));
                }
            }
            None => println!("{}", "could not list presets".red()),
        },
        ReplCommand::Load(name) => {
            let mut outcome = rt.block_on(handle.load_preset(&name, false));
            if outcome == LoadOutcome::ConfirmationRequired {
                if !confirm(rl, "Discard unsaved changes? [y/N] ") {
                    println!("load cancelled");
                    return;
                }
                outcome = rt.block_on(handle.load_preset(&name, true));
            }
            match outcome {
                LoadOutcome::Loaded(active) => {
                    println!("{}", format!("loaded {}", display_name(&active)).green())
                }
                _ => println!("{}", format!("could not load '{name}'").red()),
            }
        }
        ReplCommand::Save(name) => report(
            rt.block_on(handle.save_preset(name)),
            "preset saved",
            "save failed",
        ),
        ReplCommand::Download(name) => match rt.block_on(handle.download_preset(&name)) {
            Some(bytes) => {
                let target = ctx.paths.download_target(&name);
                match std::fs::write(&target, &bytes) {
                    Ok(()) => println!("{}", format!("saved to {}", target.display()).green()),
                    Err(e) => println!("{}", format!("write failed: {e}").red()),
                }
            }
            None => println!("{}", "download failed".red()),
        },
    }
}
