//! IvyDSM client node executable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use log::{self, LevelFilter};

use tokio::runtime::Builder;
use tokio::sync::watch;

use ivydsm::{
    DsmClient, DsmError, FileRegistry, Registry, RpcServer, TcpTransport,
    WorkloadConfig, logger_init, pf_error, pf_info, tcp_bind_with_retry,
};

mod repl;

use repl::ClientRepl;

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

    /// Workload parameters TOML string for `seed` and `run`, '+' standing
    /// for newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(params)` on success or
    /// `Err(DsmError)` on any error.
    fn sanitize(&self) -> Result<WorkloadConfig, DsmError> {
        if self.port != 0 && self.port <= 1024 {
            Err(DsmError::msg(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(DsmError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            let params = self.params.replace('+', "\n");
            WorkloadConfig::from_config_str(Some(&params))
        }
    }
}

/// Actual main function of IvyDSM client.
fn client_main() -> Result<(), DsmError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let params = args.sanitize()?;

    let registry = FileRegistry::new_and_setup(&args.registry_dir)?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("c"; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-client")
            .build()?;

        runtime.block_on(async move {
            let bind_addr =
                SocketAddr::new(IpAddr::V4(args.bind_ip), args.port);
            let listener = tcp_bind_with_retry(bind_addr, 10).await?;
            let coordinator = registry.lookup_primary()?.ok_or_else(|| {
                DsmError::msg("no primary coordinator registered")
            })?;
            let me = registry.register_client(listener.local_addr()?)?;
            let tag = format!("c{}", me.id);

            let client = Arc::new(DsmClient::new(
                me,
                coordinator,
                Arc::new(TcpTransport::new(tag.clone())),
            ));
            let _server =
                RpcServer::new_and_setup(listener, client.clone(), &tag)?;
            pf_info!(tag; "serving RPCs on '{}'", me.addr);

            ClientRepl::new(&client, params).run(rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), DsmError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of IvyDSM client.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn args(port: u16, params: &str, threads: usize) -> CliArgs {
        CliArgs {
            bind_ip: Ipv4Addr::LOCALHOST,
            port,
            registry_dir: "./registry".into(),
            params: params.into(),
            threads,
        }
    }

    #[test]
    fn sanitize_valid() -> Result<(), DsmError> {
        assert_eq!(args(0, "", 2).sanitize()?, WorkloadConfig::default());
        let params = args(50010, "num_pages=3+write_ratio=90", 4).sanitize()?;
        assert_eq!(params.num_pages, 3);
        assert_eq!(params.write_ratio, 90);
        Ok(())
    }

    #[test]
    fn sanitize_invalid_port() {
        assert!(args(80, "", 2).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        assert!(args(0, "", 1).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_params() {
        assert!(args(0, "num_keys=3", 2).sanitize().is_err());
        assert!(args(0, "write_ratio=200", 2).sanitize().is_err());
    }
}
