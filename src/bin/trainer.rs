use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use libtrainer::{PatchState, Session, SystemProcess, TargetProfile};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is not set
const DEFAULT_LOG_FILTER: &str = "libtrainer=info,trainer=info";

#[derive(Parser)]
#[command(name = "trainer")]
#[command(about = "Reads, writes and patches the memory of a running game")]
struct Args {
    /// Target profile, the built-in Plants vs. Zombies profile if not given
    #[arg(short, long, env = "TRAINER_PROFILE")]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find the target process and show where it is loaded
    Status,
    /// Read a value
    Read {
        /// Value name from the profile
        name: String,
    },
    /// Write a value
    Write {
        /// Value name from the profile
        name: String,
        /// New value, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_number)]
        value: u64,
    },
    /// Apply, revert or inspect a patch
    Patch {
        /// Patch name from the profile
        name: String,
        #[arg(value_enum)]
        action: PatchAction,
    },
    /// Install or uninstall a trampoline
    Hook {
        /// Trampoline name from the profile
        name: String,
        #[arg(value_enum)]
        action: HookAction,
    },
    /// Show what the profile defines
    Profile,
}

#[derive(Clone, Copy, ValueEnum)]
enum PatchAction {
    On,
    Off,
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum HookAction {
    Install,
    Uninstall,
}

/// Parses decimal or `0x` hex numbers
fn parse_number(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number {text:?}: {e}"))
}

fn main() -> Result<()> {
    // Initialize logging, RUST_LOG replaces the defaults entirely
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    let profile = match &args.profile {
        Some(path) => TargetProfile::load(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?,
        None => TargetProfile::builtin().context("Built-in profile is invalid")?,
    };
    info!("Using profile {}", profile.name);

    match args.command {
        Command::Profile => print_profile(&profile),
        command => {
            let session = Session::attach(SystemProcess::new(), profile)
                .context("Failed to attach to the target process")?;
            run(&session, command)?;
        }
    }

    Ok(())
}

fn run(session: &Session<SystemProcess>, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let handle = session.handle();
            println!("Process: {} (pid {})", handle.name, handle.pid);
            match &session.profile().module {
                Some(module) => println!("Module:  {} at 0x{:X}", module, session.module_base()),
                None => println!("Module:  absolute addresses"),
            }
            println!("Width:   {}", session.profile().pointer_width);
        }
        Command::Read { name } => {
            let value = session.read_value(&name)?;
            println!("{name} = {value} (0x{value:X})");
        }
        Command::Write { name, value } => {
            session.write_value(&name, value)?;
            println!("{name} <- {value}");
        }
        Command::Patch { name, action } => match action {
            PatchAction::On => {
                session.set_patch(&name, true)?;
                println!("{name}: on");
            }
            PatchAction::Off => {
                session.set_patch(&name, false)?;
                println!("{name}: off");
            }
            PatchAction::Status => match session.probe_patch(&name)? {
                Some(PatchState::Active) => println!("{name}: on"),
                Some(PatchState::Inactive) => println!("{name}: off"),
                None => println!("{name}: unknown bytes, wrong game version?"),
            },
        },
        Command::Hook { name, action } => match action {
            HookAction::Install => {
                let cave = session.install_hook(&name)?;
                println!("{name}: installed, cave at 0x{cave:X}");
            }
            HookAction::Uninstall => {
                session.uninstall_hook(&name)?;
                println!("{name}: uninstalled");
            }
        },
        Command::Profile => print_profile(session.profile()),
    }

    Ok(())
}

fn print_profile(profile: &TargetProfile) {
    println!("{} ({}, {})", profile.name, profile.process, profile.pointer_width);
    if let Some(module) = &profile.module {
        println!("Addresses relative to {module}");
    }

    println!();
    println!("Values:");
    for (name, value) in &profile.values {
        let offsets: Vec<_> = value
            .offsets
            .iter()
            .map(|o| {
                let sign = if *o < 0 { "-" } else { "" };
                format!("{sign}{:#x}", o.unsigned_abs())
            })
            .collect();
        println!(
            "  {name}: 0x{:X} [{}], {} bytes",
            value.base,
            offsets.join(", "),
            value.size
        );
    }

    println!("Patches:");
    for (name, patch) in &profile.patches {
        println!("  {name}: 0x{:X}, {} bytes", patch.address, patch.len());
    }

    println!("Trampolines:");
    for (name, trampoline) in &profile.trampolines {
        println!(
            "  {name}: 0x{:X}, {} byte cave",
            trampoline.hook_address, trampoline.cave_size
        );
    }
}

#[cfg(test)]
mod tests {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    /// An explicit filter can raise the library's level above the default
    fn test_log_filter_override() {
        let subscriber = tracing_subscriber::registry().with(EnvFilter::new("libtrainer=debug"));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "libtrainer::patcher", Level::DEBUG));
            assert!(!tracing::enabled!(target: "libtrainer::pointer", Level::TRACE));
        });

        let subscriber = tracing_subscriber::registry().with(EnvFilter::new(DEFAULT_LOG_FILTER));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "libtrainer::session", Level::INFO));
            assert!(!tracing::enabled!(target: "libtrainer::patcher", Level::DEBUG));
        });
    }

    #[test]
    /// Numbers are accepted in decimal and hex
    fn test_parse_number() {
        assert_eq!(parse_number("9990").unwrap(), 9990);
        assert_eq!(parse_number("0x2706").unwrap(), 0x2706);
        assert!(parse_number("0xZZ").is_err());
    }
}
