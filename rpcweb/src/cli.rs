use crate::config::LaunchOverrides;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rpcweb",
    version,
    about = "Start a websocat proxy to an RPC server, serve the debug UI and open it in a browser"
)]
pub struct Cli {
    /// Config file (default: ~/.config/rpcweb/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Machine-readable output on stdout
    #[arg(long, global = true)]
    pub json: bool,
    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(flatten)]
    pub launch: LaunchArgs,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// RPC server address [default: localhost]
    #[arg(long, global = true)]
    pub host: Option<String>,
    /// RPC server TCP port [default: 12345]
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub rpc_port: Option<u16>,
    /// WebSocket proxy listen port [default: 12346]
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub ws_port: Option<u16>,
    /// HTTP server port [default: 8080]
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub http_port: Option<u16>,
    /// Directory with the debug UI files [default: directory containing rpcweb]
    #[arg(long, global = true)]
    pub web_dir: Option<PathBuf>,
    /// Do not open a browser
    #[arg(long, global = true)]
    pub no_browser: bool,
    /// Use this websocat binary instead of searching for one
    #[arg(long, global = true)]
    pub proxy_bin: Option<PathBuf>,
}

impl LaunchArgs {
    pub fn overrides(&self) -> LaunchOverrides {
        LaunchOverrides {
            host: self.host.clone(),
            rpc_port: self.rpc_port,
            ws_port: self.ws_port,
            http_port: self.http_port,
            web_dir: self.web_dir.clone(),
            proxy_bin: self.proxy_bin.clone(),
            no_browser: self.no_browser,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Check that everything needed for a launch is in place
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default config file if none exists
    Init,
    /// Parse and validate the config file
    Validate,
    /// Print the settings a launch would use
    Show,
}
