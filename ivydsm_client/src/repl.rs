//! Interactive REPL-style command-line interface of a client node.

use std::io::{self, Write};
use std::str::SplitWhitespace;

use color_print::{cprint, cprintln};

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tokio::time::Instant;

use ivydsm::{DsmClient, DsmError, WorkloadConfig, run_random, seed_pages};

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable command types.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    /// Ask for a read copy of a page.
    ReadPage(String),

    /// Write a page.
    WritePage(String, String),

    /// Print all local pages.
    Print,

    /// Write every workload page once.
    Seed,

    /// Run the random workload.
    Run,

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

/// Interactive REPL-style client struct.
pub(crate) struct ClientRepl<'c> {
    /// The client node driven.
    client: &'c DsmClient,

    /// Workload parameters for `seed` and `run`.
    params: WorkloadConfig,

    /// Lines of user input.
    input: Lines<BufReader<Stdin>>,
}

impl<'c> ClientRepl<'c> {
    pub(crate) fn new(client: &'c DsmClient, params: WorkloadConfig) -> Self {
        ClientRepl {
            client,
            params,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    fn print_prompt() {
        cprint!("<bright-yellow>{}</>", PROMPT);
        let _ = io::stdout().flush();
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&DsmError>) {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported commands are:");
        println!("          readpg <page>");
        println!("          writepg <page> <content>");
        println!("          print");
        println!("          seed");
        println!("          run");
        println!("          help");
        println!("          exit");
        let _ = io::stdout().flush();
    }

    /// Expect to get the next segment string from parsed segs.
    fn expect_next_seg<'s>(
        segs: &mut SplitWhitespace<'s>,
    ) -> Result<&'s str, DsmError> {
        segs.next()
            .ok_or_else(|| DsmError("not enough args".into()))
    }

    /// Parses one input line into a command.
    pub(crate) fn parse_command(line: &str) -> Result<ReplCommand, DsmError> {
        let mut segs = line.split_whitespace();
        let Some(cmd_type) = segs.next() else {
            return Ok(ReplCommand::Nothing);
        };

        match &cmd_type.to_lowercase()[..] {
            "readpg" => {
                let page_id = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::ReadPage(page_id.into()))
            }

            "writepg" => {
                // content is the rest of the line, inner spaces kept
                let page_id = Self::expect_next_seg(&mut segs)?;
                Self::expect_next_seg(&mut segs)?;
                let content = line
                    .trim_start()
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim_start())
                    .and_then(|rest| rest.strip_prefix(page_id))
                    .map(str::trim)
                    .unwrap_or_default();
                Ok(ReplCommand::WritePage(page_id.into(), content.into()))
            }

            "print" => Ok(ReplCommand::Print),
            "seed" => Ok(ReplCommand::Seed),
            "run" => Ok(ReplCommand::Run),
            "help" => Ok(ReplCommand::PrintHelp),
            "exit" => Ok(ReplCommand::Exit),

            _ => Err(DsmError(format!("unrecognized command: {}", cmd_type))),
        }
    }

    fn print_page(&self, page_id: &str) {
        match self.client.page(page_id) {
            Some(page) => cprintln!(
                "<bright-green>✓</> {} [{}] {}",
                page.id,
                page.access,
                page.content
            ),
            None => cprintln!("<bright-red>✗</> page {} not held", page_id),
        }
    }

    fn print_ack(ack: bool, what: &str) {
        if !ack {
            cprintln!("<bright-red>✗</> {} not acknowledged", what);
        }
    }

    /// Executes one command; returns false on exit.
    async fn eval_command(&mut self, cmd: ReplCommand) -> bool {
        match cmd {
            ReplCommand::ReadPage(page_id) => {
                let ack = self.client.send_read_request(&page_id).await;
                Self::print_ack(ack, "READ_REQUEST");
                self.print_page(&page_id);
            }

            ReplCommand::WritePage(page_id, content) => {
                let ack =
                    self.client.send_write_request(&page_id, &content).await;
                Self::print_ack(ack, "WRITE_REQUEST");
                self.print_page(&page_id);
            }

            ReplCommand::Print => {
                let pages = self.client.pages();
                if pages.is_empty() {
                    cprintln!("<bright-blue>#</> no pages held");
                }
                for page in pages {
                    cprintln!(
                        "<bright-blue>#</> {} [{}] {}",
                        page.id,
                        page.access,
                        page.content
                    );
                }
            }

            ReplCommand::Seed => {
                let start = Instant::now();
                let acked =
                    seed_pages(self.client, self.params.num_pages).await;
                cprintln!(
                    "<bright-green>✓</> seeded {}/{} pages <<took {:.2} ms>>",
                    acked,
                    self.params.num_pages,
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }

            ReplCommand::Run => {
                let stats = run_random(self.client, &self.params).await;
                cprintln!(
                    "<bright-green>✓</> {}/{} acked in {:.2} s, latency {:.2} ± {:.2} ms",
                    stats.acked,
                    stats.total,
                    stats.elapsed.as_secs_f64(),
                    stats.mean_ms,
                    stats.stdev_ms
                );
            }

            ReplCommand::PrintHelp => Self::print_help(None),

            ReplCommand::Exit => {
                println!("Exitting...");
                return false;
            }

            ReplCommand::Nothing => {}
        }

        let _ = io::stdout().flush();
        true
    }

    /// Runs the REPL loop until `exit`, end of input, or termination signal.
    pub(crate) async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), DsmError> {
        loop {
            Self::print_prompt();
            let line = tokio::select! {
                line = self.input.next_line() => line?,
                _ = rx_term.changed() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match Self::parse_command(&line) {
                Ok(cmd) => {
                    if !self.eval_command(cmd).await {
                        break;
                    }
                }
                Err(e) => Self::print_help(Some(&e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod repl_tests {
    use super::*;

    #[test]
    fn parse_commands() -> Result<(), DsmError> {
        assert_eq!(
            ClientRepl::parse_command("readpg P1")?,
            ReplCommand::ReadPage("P1".into())
        );
        assert_eq!(
            ClientRepl::parse_command("  WritePg P2  hello  big world ")?,
            ReplCommand::WritePage("P2".into(), "hello  big world".into())
        );
        assert_eq!(ClientRepl::parse_command("print")?, ReplCommand::Print);
        assert_eq!(ClientRepl::parse_command("seed")?, ReplCommand::Seed);
        assert_eq!(ClientRepl::parse_command("run")?, ReplCommand::Run);
        assert_eq!(ClientRepl::parse_command("   ")?, ReplCommand::Nothing);
        assert_eq!(ClientRepl::parse_command("exit")?, ReplCommand::Exit);
        Ok(())
    }

    #[test]
    fn parse_bad_commands() {
        assert!(ClientRepl::parse_command("readpg").is_err());
        assert!(ClientRepl::parse_command("writepg P1").is_err());
        assert!(ClientRepl::parse_command("delete P1").is_err());
    }
}
