//! Interactive cruise-control call console.
//!
//! Drives the call controller from stdin commands: dial a target, hand the
//! call to the agent with a mode and goal, take it back on alert, and save
//! the finished recording to disk.

use anyhow::{Context, Result};
use cruisecall::audio::list_input_devices;
use cruisecall::config::AppConfig;
use cruisecall::{
    init_logging, init_tracing, log_debug, log_file_path, log_panic, AgentMode, CallController,
    CallState, CallSummary,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::panic;
use std::path::Path;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    panic::set_hook(Box::new(|info| log_panic(info)));
    log_debug("=== cruisecall started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    if config.list_input_devices {
        for name in list_input_devices().context("listing input devices")? {
            println!("{name}");
        }
        return Ok(());
    }

    run_console(config)
}

fn run_console(config: AppConfig) -> Result<()> {
    let mut controller = CallController::new(&config);
    println!("cruisecall console. Type 'help' for commands.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let rest = line[command.len()..].trim();

        match command {
            "call" => {
                if let Err(err) = controller.start_call(rest) {
                    eprintln!("call failed: {err}");
                } else {
                    println!("call active: {}", controller.target());
                }
            }
            "engage" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let mode = args.next().and_then(AgentMode::parse);
                let goal = args.next().unwrap_or("");
                let Some(mode) = mode else {
                    eprintln!("usage: engage <monitor|casual|negotiate|filibuster> [goal]");
                    continue;
                };
                match controller.engage(mode, goal) {
                    Ok(()) => println!("agent engaged ({})", mode.label()),
                    Err(err) => eprintln!("engage failed: {err}"),
                }
            }
            "disengage" => match controller.disengage() {
                Ok(()) => println!("you are back on the line"),
                Err(err) => eprintln!("disengage failed: {err}"),
            },
            "mute" => match rest {
                "on" => {
                    controller.set_muted(true);
                    println!("microphone muted");
                }
                "off" => {
                    controller.set_muted(false);
                    println!("microphone live");
                }
                _ => eprintln!("usage: mute <on|off>"),
            },
            "status" => print_status(&controller),
            "end" => {
                let summary = controller.end_call();
                report_summary(summary, &config.recording_dir);
            }
            "help" => print_help(),
            "quit" | "exit" => {
                if controller.state() != CallState::Idle {
                    let summary = controller.end_call();
                    report_summary(summary, &config.recording_dir);
                }
                break;
            }
            other => eprintln!("unknown command '{other}'; type 'help'"),
        }

        if controller.state() == CallState::Alert {
            println!("** ALERT: a human is on the line; 'disengage' to take over **");
        }
    }

    Ok(())
}

fn print_status(controller: &CallController) {
    println!("state:  {}", controller.state().label());
    if !controller.target().is_empty() {
        println!("target: {}", controller.target());
    }
    println!("mode:   {}", controller.mode().label());
    if !controller.goal().is_empty() {
        println!("goal:   {}", controller.goal());
    }
    println!("muted:  {}", controller.is_muted());
    let volumes = controller.volumes();
    println!("volume: user={:>5.1} agent={:>5.1}", volumes.user, volumes.agent);
    if let Some(error) = controller.last_session_error() {
        println!("last session error: {error}");
    }
}

fn report_summary(summary: CallSummary, recording_dir: &Path) {
    if let Some(error) = summary.recorder_error {
        eprintln!("recording could not be flushed: {error}");
    }
    let Some(artifact) = summary.artifact else {
        println!("call ended (no recording)");
        return;
    };
    let path = recording_dir.join(&artifact.file_name);
    match fs::write(&path, &artifact.bytes) {
        Ok(()) => println!("call ended; recording saved to {}", path.display()),
        Err(err) => eprintln!("call ended; failed to save {}: {err}", path.display()),
    }
}

fn print_help() {
    println!("commands:");
    println!("  call <target>                 dial a target and acquire audio");
    println!("  engage <mode> [goal]          hand the call to the agent");
    println!("                                modes: monitor casual negotiate filibuster");
    println!("  disengage                     take the call back from the agent");
    println!("  mute <on|off>                 gate the outbound microphone leg");
    println!("  status                        show call state and volume levels");
    println!("  end                           end the call and save the recording");
    println!("  quit                          end any call and exit");
}
