// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use homelab_srv::{
    ops, path,
    site::{unit::ComposeUnit, HomelabSite},
    HostContext, Invoker, ProcessInvoker, Severity,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about = "Manage a small fleet of dockerized services",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Log what would run without executing anything.
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Simulate a role:host identity for troubleshooting (implies dry-run).
    #[arg(short, long, global = true, value_name = "role:host")]
    simulate: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Start target units.
    #[command(override_usage = "homelab-srv start [host:][units]")]
    Start { target: Option<String> },

    /// Stop target units, then snapshot their persisted state.
    #[command(override_usage = "homelab-srv stop [options] [host:][units]")]
    Stop {
        /// Use 'docker-compose down' instead of a simple stop.
        #[arg(short, long)]
        down: bool,

        target: Option<String>,
    },

    /// Restart target units.
    #[command(override_usage = "homelab-srv restart [host:][units]")]
    Restart { target: Option<String> },

    /// Pull newer images and redeploy target units.
    #[command(override_usage = "homelab-srv upgrade [options] [host:][units]")]
    Upgrade {
        /// Redeploy even when no newer image is available.
        #[arg(short, long)]
        force: bool,

        target: Option<String>,
    },

    /// Backup persisted files of target units.
    #[command(override_usage = "homelab-srv backup [host:][units]")]
    Backup { target: Option<String> },

    /// Restore persisted files of target units from the backup store.
    #[command(override_usage = "homelab-srv restore [host:][units]")]
    Restore { target: Option<String> },

    /// Show where the site was found and what a target would select.
    Status {
        /// Also list used host ports across all units.
        #[arg(short, long)]
        ports: bool,

        target: Option<String>,
    },

    /// Push the site folder to remote hosts.
    Push { hosts: Option<String> },

    /// Configure where your _config.yml lives.
    SetFolder { folder: Option<PathBuf> },
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let site = HomelabSite::discover();

    let mut ctx = HostContext::detect(site.folder());
    let dry_run = cli.dry_run || cli.simulate.is_some();
    if let Some(spec) = &cli.simulate {
        ctx = ctx.simulate(spec);
    }
    let invoker = ProcessInvoker::new(dry_run);

    // Configuration problems gate every operational command; the meta ones
    // stay reachable so a broken site can still be inspected and fixed.
    if !matches!(
        cli.command,
        Command::SetFolder { .. } | Command::Status { .. }
    ) {
        sanity_gate(&site)?;
    }

    match cli.command {
        Command::Start { target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            dispatch(&site, &ctx, &invoker, &target, "start", &[], |unit| {
                Ok(ops::start(unit, &invoker)?)
            })
        }
        Command::Stop { down, target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            let flags = down.then(|| "--down".to_owned()).into_iter().collect::<Vec<_>>();
            dispatch(&site, &ctx, &invoker, &target, "stop", &flags, |unit| {
                Ok(ops::stop(unit, &site, &ctx, &invoker, down)?)
            })
        }
        Command::Restart { target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            dispatch(&site, &ctx, &invoker, &target, "restart", &[], |unit| {
                Ok(ops::restart(unit, &invoker)?)
            })
        }
        Command::Upgrade { force, target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            let flags = force.then(|| "--force".to_owned()).into_iter().collect::<Vec<_>>();
            dispatch(&site, &ctx, &invoker, &target, "upgrade", &flags, |unit| {
                Ok(ops::upgrade(unit, &site, &ctx, &invoker, force)?)
            })
        }
        Command::Backup { target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            dispatch(&site, &ctx, &invoker, &target, "backup", &[], |unit| {
                Ok(ops::backup(unit, &site, &ctx, &invoker, false)?)
            })
        }
        Command::Restore { target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            dispatch(&site, &ctx, &invoker, &target, "restore", &[], |unit| {
                Ok(ops::restore(unit, &site, &ctx, &invoker, false)?)
            })
        }
        Command::Status { ports, target } => {
            let target = Target::resolve(&site, &ctx, target.as_deref())?;
            run_status(&site, &ctx, &invoker, &target, ports)
        }
        Command::Push { hosts } => run_push(&site, &ctx, &invoker, hosts.as_deref()),
        Command::SetFolder { folder } => run_set_folder(&site, &ctx, folder),
    }
}

/// Print every configuration problem, then refuse to continue past fatal
/// ones.
fn sanity_gate(site: &HomelabSite) -> Result<()> {
    let mut fatal = 0;
    for problem in site.sanity_check() {
        match problem.severity() {
            Severity::Advisory => warn!("{problem}"),
            Severity::Fatal => {
                fatal += 1;
                error!("{problem}");
            }
        }
    }

    if fatal > 0 {
        bail!("please fix reported issues first");
    }

    Ok(())
}

/// Resolved `[host:]units` command target.
struct Target<'a> {
    /// Hosts to dispatch to; empty on an executor (it only acts locally).
    hosts: Vec<String>,

    /// Selected units.
    units: Vec<&'a ComposeUnit>,

    /// Unit selector as given, for ssh re-dispatch.
    selector: Option<String>,
}

impl<'a> Target<'a> {
    fn resolve(site: &'a HomelabSite, ctx: &HostContext, given: Option<&str>) -> Result<Self> {
        let (host_part, unit_part) = match given {
            Some(value) => match value.rsplit_once(':') {
                Some((hosts, units)) => (Some(hosts.to_owned()), Some(units.to_owned())),
                None => (None, Some(value.to_owned())),
            },
            None => (None, None),
        };

        let unit_selector = unit_part.as_deref().filter(|part| !part.is_empty());
        let units = site.get_dcs(unit_selector)?;

        if ctx.is_executor() {
            if let Some(hosts) = host_part.as_deref().filter(|part| !part.is_empty()) {
                if hosts != ctx.hostname {
                    bail!("target host on an executor must be the executor itself");
                }
            }

            return Ok(Self {
                hosts: Vec::new(),
                units,
                selector: unit_part,
            });
        }

        let hosts = site.get_hosts(host_part.as_deref().filter(|part| !part.is_empty()))?;
        Ok(Self {
            hosts,
            units,
            selector: unit_part,
        })
    }
}

/// Run an operation locally for every selected unit assigned to this host,
/// or re-dispatch it over ssh to every selected host that runs one.
fn dispatch<F>(
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    target: &Target,
    command: &str,
    flags: &[String],
    local: F,
) -> Result<()>
where
    F: Fn(&ComposeUnit) -> Result<()>,
{
    if ctx.is_executor() {
        let assigned = site
            .run()
            .units_for_host(&ctx.hostname)
            .unwrap_or_default();
        for unit in target.units.iter().copied() {
            if assigned.iter().any(|name| name == unit.name()) {
                local(unit)?;
            } else {
                info!(
                    "'{}' is not configured to run on host '{}'",
                    unit.name(),
                    ctx.hostname
                );
            }
        }

        return Ok(());
    }

    for hostname in &target.hosts {
        let assigned = site.run().units_for_host(hostname).unwrap_or_default();
        let relevant = target
            .units
            .iter()
            .any(|unit| assigned.iter().any(|name| name == unit.name()));
        if !relevant {
            continue;
        }

        let mut args = vec![path::SCRIPT_NAME.to_owned(), command.to_owned()];
        if let Some(selector) = target.selector.as_deref().filter(|part| !part.is_empty()) {
            args.push(selector.to_owned());
        }
        args.extend(flags.iter().cloned());
        ops::run_ssh(invoker, hostname, &args)?;
    }

    Ok(())
}

fn run_status(
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    target: &Target,
    ports: bool,
) -> Result<()> {
    let folder = match site.folder() {
        Some(folder) => folder.display().to_string(),
        None => "-not configured-".to_owned(),
    };
    let origin = site
        .folder_origin()
        .map(|origin| format!(" (from: {origin})"))
        .unwrap_or_default();
    println!("Base: {folder}{origin}");

    let role = if ctx.is_executor() {
        "[executor]"
    } else {
        "[orchestrator]"
    };
    let dry = if invoker.is_dry_run() { " [dry-run]" } else { "" };
    println!("Hostname: {} {role}{dry}", ctx.hostname);

    if ctx.is_orchestrator() {
        println!("Hosts: {}", target.hosts.join(", "));
    }

    let selected: Vec<&str> = target.units.iter().map(|unit| unit.name()).collect();
    println!("Selected: {}", selected.join(", "));

    if ports {
        let conflicting: Vec<u16> = site.conflicting_ports().map(|(port, _)| port).collect();

        println!();
        println!("Port: Service(s)");
        for (port, units) in site.used_host_ports() {
            let names = units.iter().cloned().collect::<Vec<_>>().join(" ");
            let marker = if conflicting.contains(port) {
                " [conflict]"
            } else {
                ""
            };
            println!("{port}: {names}{marker}");
        }

        println!();
        println!("Service: Port(s)");
        for (unit, unit_ports) in site.ports_by_unit() {
            let listed = unit_ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("{unit}: {listed}");
        }
    }

    Ok(())
}

fn run_push(
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    hosts: Option<&str>,
) -> Result<()> {
    if ctx.is_executor() {
        bail!("this command can only be run from an orchestrator");
    }

    for hostname in site.get_hosts(hosts)? {
        ops::push(site, &hostname, invoker)?;
    }

    Ok(())
}

fn run_set_folder(site: &HomelabSite, ctx: &HostContext, folder: Option<PathBuf>) -> Result<()> {
    if ctx.is_executor() {
        bail!("this command can only be run from an orchestrator");
    }

    let Some(folder) = folder else {
        match (site.folder(), site.folder_origin()) {
            (Some(folder), Some(origin)) => {
                println!("Currently configured folder (from: {origin}): {}", folder.display());
            }
            _ => println!("No folder is currently configured"),
        }
        return Ok(());
    };

    let folder = std::path::absolute(&folder)?;
    if !folder.is_dir() {
        bail!("folder '{}' does not exist", folder.display());
    }

    let cfg = folder.join(path::CONFIG_YML);
    if !cfg.exists() {
        bail!("'{}' does not exist", cfg.display());
    }

    path::write_configured_folder(&folder)?;
    info!("configured {} as the site folder", folder.display());
    Ok(())
}
