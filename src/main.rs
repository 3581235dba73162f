/*!
Command line front end: update the application installed in the current
directory, log to `UpdaterLog.txt`, and wait for a keypress when something
went wrong.
*/
#[macro_use]
extern crate inplace_update;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use inplace_update::{FailureKind, RunOutcome, Updater};

#[derive(Parser, Debug)]
#[command(
    name = "inplace-update",
    version,
    about = "Update an installed application to its latest release, in place"
)]
struct Cli {
    /// Owner of the repository releases are published on.
    #[arg(long, value_name = "OWNER")]
    repo_owner: String,

    /// Repository releases are published on.
    #[arg(long, value_name = "REPO")]
    repo_name: String,

    /// File name of the release archive asset.
    #[arg(long, value_name = "FILE", default_value = "Release.zip")]
    asset_name: String,

    /// Release host.
    #[arg(long, value_name = "URL", default_value = "https://github.com")]
    host: String,

    /// Display name of the application's process (no `.exe`).
    #[arg(long, value_name = "NAME")]
    process_name: String,

    /// Executable to relaunch after updating [default: <PROCESS_NAME> in the working dir].
    #[arg(long, value_name = "PATH")]
    executable: Option<PathBuf>,

    /// Argument passed to the relaunched application; repeat for more.
    #[arg(
        long = "relaunch-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        default_values_t = ["-NoUpdate".to_string(), "-PostUpdate".to_string()]
    )]
    relaunch_args: Vec<String>,

    /// Directory under the per-user local data dir holding the application's config.json.
    #[arg(long, value_name = "DIR", required_unless_present = "config_file")]
    app_dir: Option<String>,

    /// Explicit path of the application's config.json.
    #[arg(long, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Installation directory [default: current directory].
    #[arg(long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Milliseconds between checks for the application having exited.
    #[arg(long, value_name = "MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Give up waiting for the application to exit after this many seconds.
    #[arg(long, value_name = "SECS")]
    exit_timeout_secs: Option<u64>,

    /// Don't show the download percentage.
    #[arg(long)]
    no_progress: bool,

    /// Don't wait for a keypress after an error.
    #[arg(long)]
    no_pause: bool,

    /// Log file, recreated on every run.
    #[arg(long, value_name = "PATH", default_value = "UpdaterLog.txt")]
    log_file: PathBuf,
}

fn init_logging(path: &Path) -> io::Result<()> {
    let file = fs::File::create(path)?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .write_style(env_logger::WriteStyle::Never)
        .init();
    Ok(())
}

fn run(cli: &Cli) -> inplace_update::Result<RunOutcome> {
    let mut builder = Updater::configure();
    builder
        .repo_owner(&cli.repo_owner)
        .repo_name(&cli.repo_name)
        .asset_name(&cli.asset_name)
        .host(&cli.host)
        .process_name(&cli.process_name)
        .relaunch_args(&cli.relaunch_args)
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .termination_timeout(cli.exit_timeout_secs.map(Duration::from_secs))
        .show_download_progress(!cli.no_progress);
    if let Some(ref path) = cli.config_file {
        builder.config_file(path);
    }
    if let Some(ref dir) = cli.app_dir {
        builder.app_dir(dir);
    }
    if let Some(ref exe) = cli.executable {
        builder.executable(exe);
    }
    if let Some(ref dir) = cli.working_dir {
        builder.working_dir(dir);
    }
    builder.build()?.run()
}

fn wait_for_keypress() {
    println!("Press any key to close...");
    let mut s = String::new();
    let _ = io::stdin().read_line(&mut s);
}

pub fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_file) {
        eprintln!("[WARN] unable to create log file {:?}: {}", cli.log_file, e);
    }
    info!("inplace-update v{}", cargo_crate_version!());

    match run(&cli) {
        Ok(outcome) => info!("Finished: {:?}", outcome),
        Err(e) => {
            error!("{}", e);
            let msg = match e.kind() {
                FailureKind::Download => "Error while downloading.",
                FailureKind::Extraction => "Error while extracting.",
                FailureKind::Process => "Error while closing the running application.",
                FailureKind::Resolution | FailureKind::Other => "Error while updating.",
            };
            println!("{}", msg);
            if !cli.no_pause {
                wait_for_keypress();
            }
        }
    }
}
