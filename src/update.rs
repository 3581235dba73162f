use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::backends::github::GitHubReleases;
use crate::config::{default_config_path, InstalledConfig};
use crate::errors::*;
use crate::process::{
    Launcher, ProcessControl, Sleeper, SystemLauncher, SystemProcesses, Terminate, ThreadSleeper,
    DEFAULT_POLL_INTERVAL,
};
use crate::version::VersionIdentifier;
use crate::{EntryOutcome, Extract, Fetch, HttpFetch, UpdateDecision};

/// Archive file name used when none is configured
pub const DEFAULT_ARCHIVE_NAME: &str = "Release.zip";

/// Arguments the application is relaunched with: skip its own update check,
/// then run its post-update step
pub const DEFAULT_RELAUNCH_ARGS: &[&str] = &["-NoUpdate", "-PostUpdate"];

/// Where releases are published
pub trait ReleaseSource {
    /// Latest released version string
    fn latest_version(&self) -> Result<String>;

    /// Download url of the release archive for `version`
    fn download_url(&self, version: &str) -> String;
}

/// Everything one update needs to know, built fresh per check
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateManifest {
    pub current: String,
    pub latest: String,
    pub download_url: String,
}

/// Decides whether the installed application is outdated
pub struct VersionResolver<'a> {
    source: &'a dyn ReleaseSource,
    config: &'a InstalledConfig,
}

impl<'a> VersionResolver<'a> {
    pub fn new(source: &'a dyn ReleaseSource, config: &'a InstalledConfig) -> Self {
        Self { source, config }
    }

    /// Compare the installed version against the latest release
    ///
    /// * Errors:
    ///     * Resolution - latest or installed version unavailable or unparsable
    pub fn check_for_update(&self) -> Result<UpdateDecision> {
        let latest = self.source.latest_version().map_err(as_resolution)?;
        let current = self.config.installed_version()?;
        debug!("Installed version: {}, latest version: {}", current, latest);

        let latest_id = VersionIdentifier::parse(&latest)?;
        let current_id = VersionIdentifier::parse(&current)?;
        if current_id >= latest_id {
            return Ok(UpdateDecision::UpToDate(current));
        }
        let download_url = self.source.download_url(&latest);
        Ok(UpdateDecision::Outdated(UpdateManifest {
            current,
            latest,
            download_url,
        }))
    }
}

fn as_resolution(e: Error) -> Error {
    match e {
        Error::Resolution(s) => Error::Resolution(s),
        other => Error::Resolution(other.to_string()),
    }
}

fn as_download(e: Error) -> Error {
    match e {
        Error::Download(s) => Error::Download(s),
        other => Error::Download(other.to_string()),
    }
}

fn as_extraction(e: Error) -> Error {
    match e {
        Error::Extraction(s) => Error::Extraction(s),
        other => Error::Extraction(other.to_string()),
    }
}

/// `UpdateExecutor` builder
pub struct ExecutorBuilder {
    process_name: Option<String>,
    executable: Option<PathBuf>,
    relaunch_args: Vec<String>,
    working_dir: Option<PathBuf>,
    archive_name: String,
    poll_interval: Duration,
    termination_timeout: Option<Duration>,
    show_output: bool,
    processes: Option<Box<dyn ProcessControl>>,
    sleeper: Option<Box<dyn Sleeper>>,
    fetcher: Option<Box<dyn Fetch>>,
    launcher: Option<Box<dyn Launcher>>,
}

impl ExecutorBuilder {
    /// Name of the application's process, without any `.exe` suffix
    pub fn process_name(&mut self, name: &str) -> &mut Self {
        self.process_name = Some(name.to_owned());
        self
    }

    /// Executable to relaunch. Defaults to `<process_name><EXE_SUFFIX>` in the working dir
    pub fn executable<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    /// Arguments to relaunch with, defaults to `-NoUpdate -PostUpdate`
    pub fn relaunch_args(&mut self, args: &[String]) -> &mut Self {
        self.relaunch_args = args.to_vec();
        self
    }

    /// Installation directory the archive is downloaded to and extracted over.
    /// Defaults to the current directory.
    pub fn working_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// File name the archive is saved under; its extension selects the archive format
    pub fn archive_name(&mut self, name: &str) -> &mut Self {
        self.archive_name = name.to_owned();
        self
    }

    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    /// Give up waiting for the application to exit after `timeout`. No limit by default.
    pub fn termination_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.termination_timeout = timeout;
        self
    }

    /// Toggle console status lines, defaults to `true`
    pub fn show_output(&mut self, show: bool) -> &mut Self {
        self.show_output = show;
        self
    }

    pub fn process_control(&mut self, control: Box<dyn ProcessControl>) -> &mut Self {
        self.processes = Some(control);
        self
    }

    pub fn sleeper(&mut self, sleeper: Box<dyn Sleeper>) -> &mut Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn fetcher(&mut self, fetcher: Box<dyn Fetch>) -> &mut Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn launcher(&mut self, launcher: Box<dyn Launcher>) -> &mut Self {
        self.launcher = Some(launcher);
        self
    }

    /// Confirm config and create a ready-to-use `UpdateExecutor`
    ///
    /// * Errors:
    ///     * Config - missing process name
    ///     * Io - determining the current directory
    pub fn build(&mut self) -> Result<UpdateExecutor> {
        let process_name = if let Some(ref name) = self.process_name {
            name.to_owned()
        } else {
            bail!(Error::Config, "`process_name` required")
        };
        let working_dir = match self.working_dir {
            Some(ref dir) => dir.to_owned(),
            None => std::env::current_dir()?,
        };
        let executable = match self.executable {
            Some(ref exe) => exe.to_owned(),
            None => working_dir.join(format!("{}{}", process_name, std::env::consts::EXE_SUFFIX)),
        };
        Ok(UpdateExecutor {
            process_name,
            executable,
            relaunch_args: self.relaunch_args.clone(),
            working_dir,
            archive_name: self.archive_name.clone(),
            poll_interval: self.poll_interval,
            termination_timeout: self.termination_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
            show_output: self.show_output,
            processes: self.processes.take().unwrap_or_else(|| Box::new(SystemProcesses)),
            sleeper: self.sleeper.take().unwrap_or_else(|| Box::new(ThreadSleeper)),
            fetcher: self.fetcher.take().unwrap_or_else(|| Box::new(HttpFetch::new(true))),
            launcher: self.launcher.take().unwrap_or_else(|| Box::new(SystemLauncher)),
        })
    }
}

/// Stops the application, replaces it with a downloaded release, and restarts it
pub struct UpdateExecutor {
    process_name: String,
    executable: PathBuf,
    relaunch_args: Vec<String>,
    working_dir: PathBuf,
    archive_name: String,
    poll_interval: Duration,
    termination_timeout: Option<Duration>,
    cancel: Arc<AtomicBool>,
    show_output: bool,
    processes: Box<dyn ProcessControl>,
    sleeper: Box<dyn Sleeper>,
    fetcher: Box<dyn Fetch>,
    launcher: Box<dyn Launcher>,
}

impl UpdateExecutor {
    /// Initialize a new `UpdateExecutor` builder
    pub fn configure() -> ExecutorBuilder {
        ExecutorBuilder {
            process_name: None,
            executable: None,
            relaunch_args: DEFAULT_RELAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            archive_name: DEFAULT_ARCHIVE_NAME.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            termination_timeout: None,
            show_output: true,
            processes: None,
            sleeper: None,
            fetcher: None,
            launcher: None,
        }
    }

    /// Raising this flag stops the wait for the application to exit
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.working_dir.join(&self.archive_name)
    }

    /// Stop the application, download and extract the release, relaunch.
    ///
    /// The application is not restarted if any step fails.
    ///
    /// * Errors:
    ///     * Process - waiting for the application to exit failed
    ///     * Download - the archive could not be fetched; nothing was written
    ///     * Extraction - the archive could not be read; it is left on disk
    pub fn perform_update(&self, manifest: &UpdateManifest) -> Result<()> {
        Terminate::processes_named(&self.process_name)
            .poll_interval(self.poll_interval)
            .timeout(self.termination_timeout)
            .cancel_flag(self.cancel_handle())
            .run(&*self.processes, &*self.sleeper)?;

        println(self.show_output, "Downloading Latest Version...");
        let archive_path = self.archive_path();
        self.download(&manifest.download_url, &archive_path)
            .map_err(as_download)?;
        info!("Downloaded {} to {:?}", manifest.download_url, archive_path);

        println(self.show_output, "Extracting File...");
        let entries = Extract::from_source(&archive_path)
            .extract_into(&self.working_dir)
            .map_err(as_extraction)?;
        for entry in &entries {
            match entry.outcome {
                EntryOutcome::Written(ref path) | EntryOutcome::WrittenAside(ref path) => {
                    println(self.show_output, &path.display().to_string())
                }
                EntryOutcome::Failed(ref e) => error!("Unable to extract {}: {}", entry.name, e),
            }
        }

        print_flush(self.show_output, "Deleting Temporary Files... ")?;
        match fs::remove_file(&archive_path) {
            Ok(()) => println(self.show_output, "Done"),
            Err(e) => {
                println(self.show_output, "Failed");
                warn!("Unable to delete {:?}: {}", archive_path, e);
            }
        }

        if let Err(e) = self
            .launcher
            .launch(&self.executable, &self.relaunch_args, &self.working_dir)
        {
            warn!("Unable to relaunch {:?}: {}", self.executable, e);
        }
        Ok(())
    }

    // Write to a temp file beside the archive so a failed download never
    // leaves a partial archive under the real name
    fn download(&self, url: &str, archive_path: &Path) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".download")
            .tempfile_in(&self.working_dir)?;
        self.fetcher.fetch(url, tmp.as_file_mut())?;
        tmp.persist(archive_path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// What a full `Updater::run` did
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Installed version is current; wraps it
    UpToDate(String),
    /// Versions could not be resolved, nothing was done
    Skipped(FailureKind),
    /// The release for the wrapped version was installed
    Updated(String),
}

/// `Updater` builder
pub struct UpdaterBuilder {
    repo_owner: Option<String>,
    repo_name: Option<String>,
    asset_name: Option<String>,
    host: Option<String>,
    config_file: Option<PathBuf>,
    app_dir: Option<String>,
    executor: ExecutorBuilder,
}

impl UpdaterBuilder {
    /// Set the repo owner, used to build release urls
    pub fn repo_owner(&mut self, owner: &str) -> &mut Self {
        self.repo_owner = Some(owner.to_owned());
        self
    }

    /// Set the repo name, used to build release urls
    pub fn repo_name(&mut self, name: &str) -> &mut Self {
        self.repo_name = Some(name.to_owned());
        self
    }

    /// Set the release asset's file name. The archive is saved locally under the same name.
    pub fn asset_name(&mut self, name: &str) -> &mut Self {
        self.asset_name = Some(name.to_owned());
        self
    }

    /// Override the release host, defaults to `https://github.com`
    pub fn host(&mut self, host: &str) -> &mut Self {
        self.host = Some(host.to_owned());
        self
    }

    /// Path of the application's config document
    pub fn config_file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Directory name under the per-user local data dir holding `config.json`.
    /// Ignored when `config_file` is set.
    pub fn app_dir(&mut self, name: &str) -> &mut Self {
        self.app_dir = Some(name.to_owned());
        self
    }

    pub fn process_name(&mut self, name: &str) -> &mut Self {
        self.executor.process_name(name);
        self
    }

    pub fn executable<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.executor.executable(path);
        self
    }

    pub fn relaunch_args(&mut self, args: &[String]) -> &mut Self {
        self.executor.relaunch_args(args);
        self
    }

    pub fn working_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.executor.working_dir(dir);
        self
    }

    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.executor.poll_interval(interval);
        self
    }

    pub fn termination_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.executor.termination_timeout(timeout);
        self
    }

    /// Toggle the download percentage on the console, defaults to `true`
    pub fn show_download_progress(&mut self, show: bool) -> &mut Self {
        self.executor.fetcher(Box::new(HttpFetch::new(show)));
        self
    }

    /// Toggle console status lines, defaults to `true`
    pub fn show_output(&mut self, show: bool) -> &mut Self {
        self.executor.show_output(show);
        self
    }

    /// Confirm config and create a ready-to-use `Updater`
    ///
    /// * Errors:
    ///     * Config - missing repo, asset, config location, or process name
    pub fn build(&mut self) -> Result<Updater> {
        let mut releases = GitHubReleases::configure();
        if let Some(ref owner) = self.repo_owner {
            releases.repo_owner(owner);
        }
        if let Some(ref name) = self.repo_name {
            releases.repo_name(name);
        }
        if let Some(ref asset) = self.asset_name {
            releases.asset_name(asset);
            self.executor.archive_name(asset);
        }
        if let Some(ref host) = self.host {
            releases.host(host);
        }
        let releases = releases.build()?;

        let config_file = match (&self.config_file, &self.app_dir) {
            (Some(path), _) => path.to_owned(),
            (None, Some(dir)) => default_config_path(dir)?,
            (None, None) => bail!(Error::Config, "`config_file` or `app_dir` required"),
        };

        Ok(Updater {
            source: Box::new(releases),
            config: InstalledConfig::at(config_file),
            executor: self.executor.build()?,
        })
    }
}

/// Checks for a newer release and installs it
pub struct Updater {
    source: Box<dyn ReleaseSource>,
    config: InstalledConfig,
    executor: UpdateExecutor,
}

impl Updater {
    /// Initialize a new `Updater` builder
    pub fn configure() -> UpdaterBuilder {
        UpdaterBuilder {
            repo_owner: None,
            repo_name: None,
            asset_name: None,
            host: None,
            config_file: None,
            app_dir: None,
            executor: UpdateExecutor::configure(),
        }
    }

    /// Assemble an `Updater` from already configured parts
    pub fn from_parts(
        source: Box<dyn ReleaseSource>,
        config: InstalledConfig,
        executor: UpdateExecutor,
    ) -> Self {
        Self {
            source,
            config,
            executor,
        }
    }

    pub fn executor(&self) -> &UpdateExecutor {
        &self.executor
    }

    /// Check for an update and install it if the application is outdated.
    ///
    /// Version resolution failures are logged and reported as
    /// `RunOutcome::Skipped`, never as errors.
    ///
    /// * Errors:
    ///     * Process, Download, Extraction - from `UpdateExecutor::perform_update`
    pub fn run(&self) -> Result<RunOutcome> {
        let show_output = self.executor.show_output;
        let decision = match VersionResolver::new(&*self.source, &self.config).check_for_update() {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Skipping update: {}", e);
                return Ok(RunOutcome::Skipped(e.kind()));
            }
        };

        match decision {
            UpdateDecision::UpToDate(current) => {
                println(show_output, "The Program is Up to date");
                Ok(RunOutcome::UpToDate(current))
            }
            UpdateDecision::Outdated(manifest) => {
                println(show_output, "Outdated");
                info!("Updating {} -> {}", manifest.current, manifest.latest);
                self.executor.perform_update(&manifest)?;
                Ok(RunOutcome::Updated(manifest.latest))
            }
        }
    }
}

// Print out message based on provided flag and flush the output buffer
fn print_flush(show_output: bool, msg: &str) -> Result<()> {
    if show_output {
        print_flush!("{}", msg);
    }
    Ok(())
}

// Print out message based on provided flag
fn println(show_output: bool, msg: &str) {
    if show_output {
        println!("{}", msg);
    }
}
