// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_mirror::{
        config::MirrorConfig,
        error::MirrorError,
        package_version::compare_versions,
        reconcile::{IntervalScheduler, Reconciler},
    },
    log::{info, warn, LevelFilter},
    std::{cmp::Ordering, path::PathBuf},
    thiserror::Error,
    tokio_util::sync::CancellationToken,
};

const ABOUT: &str = "\
Keep a signed Debian repository in sync with upstream releases.

The daemon tracks a set of upstream channels (a download endpoint that
redirects to the newest build, GitHub releases with a single .deb asset, and
GitHub releases with kernel image/headers pairs per CPU profile). New
artifacts are downloaded into pool/, and whenever the pool changes the
Packages indices and the signed Release, InRelease and Release.gpg files are
regenerated.

The signing key must already exist in the GnuPG keyring; the daemon refuses
to start without it.
";

const CONFIG_ABOUT: &str = "\
Path to a YAML configuration file.

Every key is optional. Without a file the built-in channel set is used.
Top-level keys include root, distribution, component, architectures,
primary_architecture, check_interval_secs, signing_identity, gnupg_home,
github_token and channels. GITHUB_TOKEN is consulted when github_token is
not set.
";

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("argument parsing error: {0}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Mirror(#[from] MirrorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("cycle finished with {0} failure(s)")]
    CycleFailed(usize),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

fn init_logging(args: &ArgMatches) {
    let log_level = match args.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // These spew connection details at info level.
    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
        builder.filter_module("reqwest", LevelFilter::Warn);
        builder.filter_module("hyper", LevelFilter::Warn);
    }

    builder.init();
}

fn load_config(args: &ArgMatches) -> Result<MirrorConfig> {
    let mut config = match args.value_of_os("config") {
        Some(path) => MirrorConfig::from_yaml_path(&PathBuf::from(path))?,
        None => MirrorConfig::default(),
    };

    if let Some(root) = args.value_of_os("root") {
        config.root = PathBuf::from(root);
    }

    if args.is_present("interval") {
        config.check_interval_secs = args.value_of_t::<u64>("interval")?;
    }

    let config = config.with_environment();
    config.validate()?;

    Ok(config)
}

pub async fn run_cli() -> Result<()> {
    let app = Command::new("debian-mirrord")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mirror upstream release channels into a signed Debian repository")
        .long_about(ABOUT)
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML configuration file")
                .long_help(CONFIG_ABOUT),
        )
        .arg(
            Arg::new("root")
                .long("root")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Repository root directory (overrides the configuration)"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .takes_value(true)
                .global(true)
                .help("Seconds between upstream checks (overrides the configuration)"),
        );

    let mut app = app
        .subcommand(
            Command::new("run")
                .about("Publish once, then check upstream channels at a fixed interval"),
        )
        .subcommand(
            Command::new("cycle").about("Run a single reconciliation cycle and exit"),
        )
        .subcommand(Command::new("publish").about(
            "Rebuild meta-packages and indices, then sign and publish the release",
        ))
        .subcommand(
            Command::new("prune")
                .about("Apply every channel's retention policy and republish if anything was removed"),
        )
        .subcommand(
            Command::new("compare-versions")
                .about("Compare two Debian package versions")
                .arg(Arg::new("a").required(true).help("First version"))
                .arg(Arg::new("b").required(true).help("Second version")),
        );

    let matches = app.clone().get_matches();

    let (command, args) = match matches.subcommand() {
        Some(x) => x,
        None => {
            app.print_help()?;
            return Ok(());
        }
    };

    init_logging(args);

    match command {
        "run" => command_run(args).await,
        "cycle" => command_cycle(args).await,
        "publish" => command_publish(args).await,
        "prune" => command_prune(args).await,
        "compare-versions" => command_compare_versions(args),
        command => Err(DaemonError::InvalidSubCommand(command.to_string())),
    }
}

async fn command_run(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let interval = config.check_interval();
    let mut reconciler = Reconciler::from_config(config)?;

    let cancel = CancellationToken::new();
    let mut scheduler = IntervalScheduler::new(interval, cancel.clone());

    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown requested; stopping after the current cycle");
        cancel.cancel();
    });

    reconciler.run(&mut scheduler).await?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn command_cycle(args: &ArgMatches) -> Result<()> {
    let mut reconciler = Reconciler::from_config(load_config(args)?)?;
    reconciler.initialize().await?;

    let report = reconciler.run_cycle().await;

    for channel in &report.changed_channels {
        println!("changed: {}", channel);
    }
    for (channel, e) in &report.failures {
        println!("failed: {}: {}", channel, e);
    }
    if let Some(e) = &report.publish_error {
        println!("publish failed: {}", e);
    }

    let failures = report.failures.len() + usize::from(report.publish_error.is_some());
    if failures > 0 {
        Err(DaemonError::CycleFailed(failures))
    } else {
        Ok(())
    }
}

async fn command_publish(args: &ArgMatches) -> Result<()> {
    let reconciler = Reconciler::from_config(load_config(args)?)?;
    reconciler.prepare().await?;

    let report = reconciler.publish().await?;
    println!(
        "published {} package(s); built {} meta-package(s)",
        report.index.entries,
        report.synthesis.built.len()
    );

    Ok(())
}

async fn command_prune(args: &ArgMatches) -> Result<()> {
    let reconciler = Reconciler::from_config(load_config(args)?)?;
    reconciler.prepare().await?;

    let report = reconciler.prune_all();
    for path in &report.removed {
        println!("removed {}", path.display());
    }

    if !report.is_empty() {
        reconciler.publish().await?;
    }

    Ok(())
}

fn command_compare_versions(args: &ArgMatches) -> Result<()> {
    let a = args.value_of("a").unwrap_or_default();
    let b = args.value_of("b").unwrap_or_default();

    let symbol = match compare_versions(a, b) {
        Ordering::Less => "<",
        Ordering::Equal => "=",
        Ordering::Greater => ">",
    };

    println!("{} {} {}", a, symbol, b);

    Ok(())
}
