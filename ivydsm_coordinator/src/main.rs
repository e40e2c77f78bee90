//! IvyDSM central coordinator executable.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use color_print::{cprint, cprintln};

use log::{self, LevelFilter};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;
use tokio::sync::watch;

use ivydsm::{
    Coordinator, CoordinatorRole, DsmError, FileRegistry, Registry, RpcServer,
    TcpTransport, logger_init, pf_error, pf_info, tcp_bind_with_retry,
};

/// Prompt string at the start of line.
const PROMPT: &str = "cm> ";

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Local IP to bind the RPC listener to; also the address registered.
    #[arg(short, long, default_value_t = Ipv4Addr::LOCALHOST)]
    bind_ip: Ipv4Addr,

    /// RPC port. 0 picks any free port.
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Directory holding the shared node registry files.
    #[arg(short, long, default_value = "./registry")]
    registry_dir: PathBuf,

    /// Restart a crashed coordinator at its registered address: 'primary'
    /// or 'backup'.
    #[arg(long)]
    restart: Option<String>,

    /// Coordinator configuration TOML string, '+' standing for newline.
    #[arg(short, long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(restart_role)` on success
    /// or `Err(DsmError)` on any error.
    fn sanitize(&self) -> Result<Option<CoordinatorRole>, DsmError> {
        if self.port != 0 && self.port <= 1024 {
            Err(DsmError::msg(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(DsmError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            match self.restart.as_deref().map(str::to_lowercase).as_deref() {
                None => Ok(None),
                Some("primary") => Ok(Some(CoordinatorRole::Primary)),
                Some("backup") => Ok(Some(CoordinatorRole::Backup)),
                Some(other) => Err(DsmError::msg(format!(
                    "restart role '{}' unrecognized",
                    other
                ))),
            }
        }
    }
}

/// Console commands.
enum ConsoleCommand {
    /// Print page metadata.
    Data,

    /// Print current role.
    Role,

    /// Print help message.
    PrintHelp,

    /// Coordinator exit.
    Exit,

    /// Nothing read.
    Nothing,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, DsmError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleCommand::Nothing);
    }
    match &line.to_lowercase()[..] {
        "data" => Ok(ConsoleCommand::Data),
        "role" => Ok(ConsoleCommand::Role),
        "help" => Ok(ConsoleCommand::PrintHelp),
        "exit" => Ok(ConsoleCommand::Exit),
        _ => Err(DsmError::msg(format!("unrecognized command: {}", line))),
    }
}

fn print_prompt() {
    cprint!("<bright-yellow>{}</>", PROMPT);
    let _ = io::stdout().flush();
}

fn print_help(err: Option<&DsmError>) {
    if let Some(e) = err {
        cprintln!("<bright-red>✗</> {}", e);
    }
    println!("HELP: Supported commands are:");
    println!("          data");
    println!("          role");
    println!("          help");
    println!("          exit");
}

fn print_data(coordinator: &Coordinator) {
    let metadata = coordinator.metadata();
    if metadata.is_empty() {
        cprintln!("<bright-blue>#</> no pages");
    }
    for (page_id, info) in metadata {
        let copies: Vec<String> =
            info.copy_set.iter().map(|c| c.to_string()).collect();
        cprintln!(
            "<bright-blue>#</> {} owner {} copies [{}]",
            page_id,
            info.owner,
            copies.join(", ")
        );
    }
}

/// Resolves my address and initial role, binding the RPC listener.
async fn bind_and_register(
    args: &CliArgs,
    restart: Option<CoordinatorRole>,
    registry: &FileRegistry,
) -> Result<(tokio::net::TcpListener, CoordinatorRole), DsmError> {
    match restart {
        None => {
            let bind_addr = SocketAddr::new(IpAddr::V4(args.bind_ip), args.port);
            let listener = tcp_bind_with_retry(bind_addr, 10).await?;
            let record = registry.register_coordinator(listener.local_addr()?)?;
            let role = if record.is_primary {
                CoordinatorRole::Primary
            } else {
                CoordinatorRole::Backup
            };
            Ok((listener, role))
        }

        Some(role) => {
            let addr = match role {
                CoordinatorRole::Primary => registry.lookup_primary()?,
                CoordinatorRole::Backup => registry.lookup_backup()?,
            }
            .ok_or_else(|| {
                DsmError::msg(format!("no {} registered to restart", role))
            })?;
            let listener = tcp_bind_with_retry(addr, 10).await?;
            // a restarted primary serves nothing until it has reclaimed
            // primacy
            Ok((listener, CoordinatorRole::Backup))
        }
    }
}

/// Runs the console until `exit`, end of input, or termination signal.
async fn console_loop(
    coordinator: &Coordinator,
    mut rx_term: watch::Receiver<bool>,
) -> Result<(), DsmError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(ConsoleCommand::Data) => print_data(coordinator),
                    Ok(ConsoleCommand::Role) => {
                        cprintln!("<bright-blue>#</> {}", coordinator.role());
                    }
                    Ok(ConsoleCommand::PrintHelp) => print_help(None),
                    Ok(ConsoleCommand::Exit) => break,
                    Ok(ConsoleCommand::Nothing) => {}
                    Err(e) => print_help(Some(&e)),
                }
            },

            _ = rx_term.changed() => {
                println!();
                break;
            }
        }
    }
    println!("Exitting...");
    Ok(())
}

/// Actual main function of IvyDSM coordinator.
fn coordinator_main() -> Result<(), DsmError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let restart = args.sanitize()?;
    let config = args.config.replace('+', "\n");

    let registry = Arc::new(FileRegistry::new_and_setup(&args.registry_dir)?);

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("cm"; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-coordinator")
            .build()?;

        runtime.block_on(async move {
            let (listener, role) =
                bind_and_register(&args, restart, &registry).await?;
            let addr = listener.local_addr()?;
            let tag = format!("cm@{}", addr);

            let coordinator = Coordinator::new_and_setup(
                addr,
                role,
                Arc::new(TcpTransport::new(tag.clone())),
                registry.clone(),
                Some(config.as_str()),
            )?;
            let _server =
                RpcServer::new_and_setup(listener, coordinator.clone(), &tag)?;
            pf_info!(tag; "serving RPCs on '{}'", addr);

            if restart == Some(CoordinatorRole::Primary) {
                coordinator.recover_primacy().await;
            } else if coordinator.role() == CoordinatorRole::Backup {
                coordinator.start_heartbeat();
            }

            console_loop(&coordinator, rx_term).await?;
            coordinator.stop_heartbeat();

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), DsmError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of IvyDSM coordinator.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = coordinator_main() {
        pf_error!("cm"; "coordinator_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn args(port: u16, restart: Option<&str>, threads: usize) -> CliArgs {
        CliArgs {
            bind_ip: Ipv4Addr::LOCALHOST,
            port,
            registry_dir: "./registry".into(),
            restart: restart.map(String::from),
            config: "".into(),
            threads,
        }
    }

    #[test]
    fn sanitize_valid() {
        assert_eq!(args(0, None, 2).sanitize(), Ok(None));
        assert_eq!(args(50000, None, 4).sanitize(), Ok(None));
    }

    #[test]
    fn sanitize_restart_roles() {
        assert_eq!(
            args(0, Some("primary"), 2).sanitize(),
            Ok(Some(CoordinatorRole::Primary))
        );
        assert_eq!(
            args(0, Some("Backup"), 2).sanitize(),
            Ok(Some(CoordinatorRole::Backup))
        );
        assert!(args(0, Some("leader"), 2).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_port() {
        assert!(args(1023, None, 2).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        assert!(args(0, None, 1).sanitize().is_err());
    }

    #[test]
    fn console_commands() {
        assert!(matches!(parse_command(" DATA "), Ok(ConsoleCommand::Data)));
        assert!(matches!(parse_command("role"), Ok(ConsoleCommand::Role)));
        assert!(matches!(parse_command(""), Ok(ConsoleCommand::Nothing)));
        assert!(matches!(parse_command("exit"), Ok(ConsoleCommand::Exit)));
        assert!(parse_command("drop P1").is_err());
    }
}
