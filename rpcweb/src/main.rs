mod browser;
mod cli;
mod config;
mod doctor;
mod error;
mod lifecycle;
mod locator;
mod logging;
mod output;
mod proxy;
mod server;

use crate::browser::SystemOpener;
use crate::cli::{Cli, Commands, ConfigCommand};
use crate::config::{ConfigLocation, LaunchSettings};
use crate::error::LaunchError;
use crate::lifecycle::{Launcher, StopReason};
use crate::locator::SearchEnv;
use clap::Parser;
use log::info;
use serde_json::json;
use std::fs;
use std::path::Path;

#[derive(Debug)]
struct Context {
    config: ConfigLocation,
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let ctx = Context {
        config: config::resolve_config_path(cli.config.as_ref()),
        json: cli.json,
    };

    let result = logging::init(cli.verbose).and_then(|()| match &cli.command {
        None => handle_launch(&ctx, &cli),
        Some(Commands::Config { command }) => handle_config(&ctx, &cli, command),
        Some(Commands::Doctor) => handle_doctor(&ctx, &cli),
    });

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            output::report_error(ctx.json, &err);
            std::process::exit(1);
        }
    }
}

fn load_settings(ctx: &Context, cli: &Cli) -> Result<LaunchSettings, LaunchError> {
    let cfg = config::load_config(&ctx.config)?;
    LaunchSettings::resolve(&cfg, &ctx.config.path, &cli.launch.overrides())
}

fn handle_launch(ctx: &Context, cli: &Cli) -> Result<bool, LaunchError> {
    let settings = load_settings(ctx, cli)?;
    let shutdown = lifecycle::install_signal_handlers()?;
    let mut launcher = Launcher::new(
        settings,
        SearchEnv::current(),
        SystemOpener,
        ctx.json,
        shutdown,
    );
    let reason = launcher.run()?;
    match reason {
        StopReason::Interrupted => info!("stopped by signal ({:?})", launcher.state()),
        StopReason::ProxyExited => info!("stopped after proxy exit ({:?})", launcher.state()),
    }
    Ok(true)
}

fn ensure_parent(path: &Path) -> Result<(), LaunchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn handle_config(ctx: &Context, cli: &Cli, command: &ConfigCommand) -> Result<bool, LaunchError> {
    let path = &ctx.config.path;
    match command {
        ConfigCommand::Init => {
            if path.exists() {
                output::output(ctx.json, json!({"path": path, "created": false}))?;
                return Ok(true);
            }
            ensure_parent(path)?;
            fs::write(path, config::default_config_yaml())?;
            output::output(ctx.json, json!({"path": path, "created": true}))?;
        }
        ConfigCommand::Validate => {
            config::read_config(path)?;
            output::output(ctx.json, json!({"path": path, "valid": true}))?;
        }
        ConfigCommand::Show => {
            let settings = load_settings(ctx, cli)?;
            output::output(
                ctx.json,
                json!({
                    "config_path": path,
                    "config_exists": path.exists(),
                    "settings": settings,
                }),
            )?;
        }
    }
    Ok(true)
}

fn handle_doctor(ctx: &Context, cli: &Cli) -> Result<bool, LaunchError> {
    let settings = load_settings(ctx, cli)?;
    doctor::handle_doctor(&settings, &SearchEnv::current(), ctx.json)
}
