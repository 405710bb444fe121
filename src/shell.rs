//! Interactive command shell.
//!
//! Reads whitespace-separated commands from stdin until `shutdown` (or
//! stdin closes). Commands are case-insensitive. The scan command is
//! mutually exclusive with serving: a running server is stopped first and
//! restarted after the catalog swap.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::FilterHandle;
use crate::config::{Config, Verbosity};
use crate::ingest;
use crate::server::ServerTask;
use crate::state::AppState;

const HELP: &str = "\
commands:
  help                 show this text
  clear                clear the screen
  start                start the HTTP server
  stop                 stop the HTTP server
  restart              stop and start the HTTP server
  scan                 rebuild the catalog from the packages directory
  list                 list catalogued packages and versions
  verbosity [<level>]  show or set log verbosity (None..Debug or 0-6)
  shutdown|quit|exit   stop the server and leave";

pub struct Shell {
    state: Arc<AppState>,
    config: Config,
    server: Option<ServerTask>,
    verbosity: Verbosity,
    filter: FilterHandle,
}

impl Shell {
    pub fn new(state: Arc<AppState>, config: Config, filter: FilterHandle) -> Self {
        let verbosity = config.verbosity;
        Shell {
            state,
            config,
            server: None,
            verbosity,
            filter,
        }
    }

    /// Process commands until shutdown or end of input.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt();
        while let Some(line) = lines.next_line().await? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(&command) = tokens.first() else {
                prompt();
                continue;
            };
            match command.to_ascii_lowercase().as_str() {
                "help" => println!("{HELP}"),
                "clear" => print!("\x1b[2J\x1b[1;1H"),
                "start" => self.start().await,
                "stop" => self.stop().await,
                "restart" => {
                    self.stop().await;
                    self.start().await;
                }
                "scan" => self.scan().await,
                "list" => self.list(),
                "verbosity" => self.verbosity(tokens.get(1).copied()),
                "shutdown" | "quit" | "exit" => {
                    self.stop().await;
                    println!("bye");
                    return Ok(());
                }
                other => println!("unknown command: {other} (try 'help')"),
            }
            prompt();
        }
        // stdin closed; drain the server before exiting.
        self.stop().await;
        Ok(())
    }

    pub async fn start(&mut self) {
        if self.server.is_some() {
            println!("server is already running");
            return;
        }
        match ServerTask::start(self.state.clone(), &self.config.endpoints).await {
            Ok(task) => {
                self.server = Some(task);
                println!("✅ serving on {}", self.config.endpoints.join(", "));
            }
            Err(err) => {
                error!(error = %err, "failed to start server");
                println!("failed to start: {err}");
            }
        }
    }

    async fn stop(&mut self) {
        match self.server.take() {
            Some(task) => {
                task.stop().await;
                println!("server stopped");
            }
            None => println!("server is not running"),
        }
    }

    async fn scan(&mut self) {
        let was_running = self.server.is_some();
        if was_running {
            self.stop().await;
        }
        let dir = self.state.packages_dir.clone();
        let extensions = self.config.extensions.clone();
        match tokio::task::spawn_blocking(move || ingest::scan(&dir, &extensions)).await {
            Ok((catalog, stats)) => {
                println!(
                    "scan: {} files, {} packages, {} versions, {} errors",
                    stats.files,
                    catalog.len(),
                    stats.versions,
                    stats.errors
                );
                self.state.replace_catalog(catalog);
            }
            Err(err) => {
                error!(error = %err, "scan task failed");
                println!("scan failed: {err}");
            }
        }
        if was_running {
            self.start().await;
        }
    }

    fn list(&self) {
        let catalog = self.state.catalog();
        if catalog.is_empty() {
            println!("no packages");
            return;
        }
        for entry in catalog.packages() {
            println!("{} (latest {})", entry.name, entry.latest);
            for (version, time) in &entry.time {
                println!("  {version}  {time}");
            }
        }
    }

    fn verbosity(&mut self, token: Option<&str>) {
        let Some(token) = token else {
            println!("verbosity is {}", self.verbosity);
            return;
        };
        match token.parse::<Verbosity>() {
            Ok(level) => {
                let directive = level.filter_directive();
                match self.filter.reload(EnvFilter::new(directive)) {
                    Ok(()) => {
                        self.verbosity = level;
                        println!("verbosity set to {level}");
                    }
                    Err(err) => {
                        error!(error = %err, "failed to reload log filter");
                        println!("failed to change verbosity: {err}");
                    }
                }
            }
            Err(err) => println!("{err}"),
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
