//! sharefs binary
//!
//! ## Usage
//!
//! ```bash
//! # Validate a configuration and show the user server plan
//! sharefs check /etc/sharefs.toml
//!
//! # What a user server is started as (see `check` for the full plan)
//! sharefs serve-remote-fs docs /srv/docs
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use sharefs_server::user_server::group_by_identity;
use sharefs_server::{Config, ServeArgs, telemetry};

fn print_usage() {
    eprintln!(
        r#"sharefs - share local directories with remote peers

USAGE:
    sharefs <COMMAND>

COMMANDS:
    check <config>                Validate a config file and print the
                                  per-identity launch plan
    serve-remote-fs <name> <path>...
                                  Validate user server arguments; this
                                  build has no file protocol server

OPTIONS:
    --help, -h                    Show this help

ENVIRONMENT:
    RUST_LOG                      Log filter (default: info)
"#
    );
}

fn main() -> ExitCode {
    telemetry::init_tracing();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        print_usage();
        return ExitCode::FAILURE;
    };

    match command.as_str() {
        "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "check" => match cmd_check(&args[2..]) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        "serve-remote-fs" => match cmd_serve_remote_fs(&args[1..]) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

/// Validate the config and print what would be launched.
fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let [path] = args else {
        anyhow::bail!("usage: sharefs check <config>");
    };
    let config = Config::load(path).with_context(|| format!("loading {path}"))?;

    println!("{}: {} share(s)", path, config.shares.len());
    if !config.server.share_as {
        match &config.server.file_server_addr {
            Some(addr) => println!("shared file server: {addr}"),
            None => println!("shared file server: (unset, shares will be omitted)"),
        }
        for share in &config.shares {
            println!("  {} -> {}", share.name, share.path.display());
        }
        return Ok(());
    }

    let launcher = config.launcher().context("resolving user server executable")?;
    let shares: Vec<Arc<_>> = config.shares.iter().cloned().map(Arc::new).collect();
    for (identity, group) in group_by_identity(&shares) {
        let names: Vec<&str> = group.iter().map(|s| s.name.as_str()).collect();
        println!("{identity}: {}", names.join(", "));
        println!(
            "  {} {}",
            launcher.program(),
            launcher.command_args(&identity, &group).join(" ")
        );
    }
    Ok(())
}

/// Act as a user server. Arguments are checked and the share tree is
/// assembled, but no file protocol server is linked into this binary, so
/// this always fails before announcing an address.
fn cmd_serve_remote_fs(args: &[String]) -> anyhow::Result<()> {
    let serve = ServeArgs::parse(args).context("parsing user server arguments")?;
    let tree = serve.filesystem();
    anyhow::bail!(
        "no file protocol server is compiled into this binary; cannot serve {}",
        tree.child_names().join(", ")
    )
}
