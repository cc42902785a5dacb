// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::error;

mod client;
mod config;
mod consts;
mod daemon;
pub mod error;
mod fingerprinting;
mod log;
mod runner;

use config::{FramingOptions, Timeouts};

/// The command line arguments that viasock expects. These can be
/// directly parsed with clap or manually constructed to present some
/// other user interface.
#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct Args {
    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Commands,
}

/// The subcommands viasock supports: one per role (§2).
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Run a command behind a pooled server, starting one if needed")]
    Run {
        #[clap(flatten)]
        framing: FramingArgs,
        #[clap(flatten)]
        timeouts: TimeoutArgs,
        #[clap(short, long, action, help = "Server log file path (rotating, ~1MiB x 5)")]
        log_file: Option<PathBuf>,
        #[clap(help = "The program to run")]
        program: String,
        #[clap(help = "Arguments to pass to the program")]
        args: Vec<String>,
    },

    #[clap(
        about = "Starts a server for a single fingerprinted command",
        long_about = "Starts a server for a single fingerprinted command.

Not normally invoked directly -- the `run` subcommand spawns this itself
when no server is already listening for the given command."
    )]
    Server {
        #[clap(flatten)]
        framing: FramingArgs,
        #[clap(flatten)]
        timeouts: TimeoutArgs,
        #[clap(short, long, action, help = "Server log file path (rotating, ~1MiB x 5)")]
        log_file: Option<PathBuf>,
        #[clap(help = "The unix socket path to listen on")]
        socket: PathBuf,
        #[clap(help = "The fingerprint this server was started for")]
        hash: String,
        #[clap(help = "The program to run")]
        program: String,
        #[clap(help = "Arguments to pass to the program")]
        args: Vec<String>,
    },

    #[clap(about = "Talk to an already-running server over its socket")]
    Client {
        #[clap(flatten)]
        framing: FramingArgs,
        #[clap(short, long, action, help = "Log file path")]
        log_file: Option<PathBuf>,
        #[clap(help = "The unix socket path to connect to")]
        socket: PathBuf,
    },
}

/// Framing flags shared by all three subcommands (§6).
#[derive(ClapArgs, Debug, Clone)]
pub struct FramingArgs {
    #[clap(
        short = 't',
        long = "input-terminator",
        default_value = "",
        long_help = "Regex matched against each chomped input line to decide where a record ends.

An empty pattern (the default) matches every line, so each line is its
own record."
    )]
    pub input_terminator: String,

    #[clap(
        short = 'T',
        long = "output-terminator",
        default_value = "",
        long_help = "Regex matched against each chomped output line to decide where a record ends.

An empty pattern (the default) matches every line."
    )]
    pub output_terminator: String,

    #[clap(
        short = 'P',
        long = "prelude",
        default_value_t = 0,
        long_help = "Number of output records to capture from the child at startup and replay to
every client before its own responses begin."
    )]
    pub prelude: usize,
}

/// Timeout flags shared by `run` and `server` (§6).
#[derive(ClapArgs, Debug, Clone)]
pub struct TimeoutArgs {
    #[clap(
        short = 'w',
        long = "process-timeout",
        long_help = "Maximum number of seconds to wait for the child to respond to a single
input record. Unset by default, meaning no bound."
    )]
    pub process_timeout: Option<u64>,

    #[clap(
        short = 'W',
        long = "server-timeout",
        default_value_t = consts::DEFAULT_SERVER_TIMEOUT_SECS,
        long_help = "Number of seconds of inactivity after which an idle server exits and
removes its socket."
    )]
    pub server_timeout: u64,
}

impl TimeoutArgs {
    fn resolve(&self) -> Timeouts {
        Timeouts {
            process_timeout: self.process_timeout.map(Duration::from_secs),
            server_timeout: Duration::from_secs(self.server_timeout),
        }
    }
}

/// Runs viasock with the given arguments.
pub fn run(args: Args) -> anyhow::Result<()> {
    let res: anyhow::Result<()> = match args.command {
        Commands::Run { framing, timeouts, log_file, program, args: cmd_args } => {
            log::init(log_file.as_deref(), args.verbose)?;
            let framing = FramingOptions::compile(
                &framing.input_terminator,
                &framing.output_terminator,
                framing.prelude,
            )?;
            let timeouts = timeouts.resolve();
            runner::run(&program, &cmd_args, &framing, &timeouts, log_file.as_deref(), args.verbose)
        }
        Commands::Server { framing, timeouts, log_file, socket, hash, program, args: cmd_args } => {
            log::init(log_file.as_deref(), args.verbose)?;
            let framing = FramingOptions::compile(
                &framing.input_terminator,
                &framing.output_terminator,
                framing.prelude,
            )?;
            let timeouts = timeouts.resolve();
            daemon::run(socket, hash, program, cmd_args, framing, timeouts, log_file)
        }
        Commands::Client { framing, log_file, socket } => {
            log::init(log_file.as_deref(), args.verbose)?;
            let framing = FramingOptions::compile(
                &framing.input_terminator,
                &framing.output_terminator,
                framing.prelude,
            )?;
            client::run(&socket, &framing)
        }
    };

    if let Err(err) = &res {
        error!("{:?}", err);
    }

    res
}

