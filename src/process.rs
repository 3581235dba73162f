/*!
Stopping and starting the application being updated

Processes are matched by display name. Stopping is a single graceful request
per process followed by polling until none are left; there is no escalation.
*/
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::errors::*;

/// Default delay between process list polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Lists and terminates processes
pub trait ProcessControl {
    /// Running processes whose display name is exactly `name`
    fn find(&self, name: &str) -> Result<Vec<ProcessInfo>>;

    /// Ask `process` to exit. A process that is already gone is not an error.
    fn terminate(&self, process: &ProcessInfo) -> Result<()>;
}

/// Blocks the calling thread
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Stop every process with a given name and wait until they are gone.
///
/// Waits forever unless a `timeout` is set or the `cancel_flag` is raised.
///
/// * Errors:
///     * Process - listing failed, timeout elapsed, or cancelled
#[derive(Debug, Clone)]
pub struct Terminate {
    name: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Terminate {
    pub fn processes_named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            cancel: None,
        }
    }

    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel_flag(&mut self, flag: Arc<AtomicBool>) -> &mut Self {
        self.cancel = Some(flag);
        self
    }

    /// Returns the number of processes asked to exit
    pub fn run(&self, control: &dyn ProcessControl, sleeper: &dyn Sleeper) -> Result<usize> {
        let running = control.find(&self.name)?;
        for process in &running {
            info!("Terminating {} (pid {})", process.name, process.pid);
            if let Err(e) = control.terminate(process) {
                warn!("Unable to terminate pid {}: {}", process.pid, e);
            }
        }

        let mut waited = Duration::from_secs(0);
        loop {
            let remaining = control.find(&self.name)?;
            if remaining.is_empty() {
                break;
            }
            if self.is_cancelled() {
                bail!(Error::Process, "Cancelled while waiting for {:?} to exit", self.name);
            }
            if let Some(timeout) = self.timeout {
                if waited >= timeout {
                    bail!(
                        Error::Process,
                        "{} {:?} process(es) still running after {:?}",
                        remaining.len(),
                        self.name,
                        timeout
                    );
                }
            }
            debug!("{} {:?} process(es) still running", remaining.len(), self.name);
            sleeper.sleep(self.poll_interval);
            waited += self.poll_interval;
        }
        Ok(running.len())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// `ProcessControl` backed by the platform's process tools.
///
/// Windows lists with `tasklist` and stops with `taskkill`. Linux reads `/proc`,
/// matching the executable's file name, `argv[0]` and `comm`, so names longer
/// than the kernel's 15 byte `comm` still match. Other unixes use `pgrep -x`.
/// Everything but windows stops with `kill`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    #[cfg(windows)]
    fn find(&self, name: &str) -> Result<Vec<ProcessInfo>> {
        let image = format!("{}.exe", name);
        let filter = format!("IMAGENAME eq {}", image);
        let output = Command::new("tasklist")
            .args(["/FI", filter.as_str(), "/FO", "CSV", "/NH"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| format_err!(Error::Process, "Unable to run tasklist: {}", e))?;
        if !output.status.success() {
            bail!(Error::Process, "tasklist failed with status: {}", output.status);
        }
        Ok(parse_tasklist(&String::from_utf8_lossy(&output.stdout), &image))
    }

    #[cfg(target_os = "linux")]
    fn find(&self, name: &str) -> Result<Vec<ProcessInfo>> {
        let entries = fs::read_dir("/proc")
            .map_err(|e| format_err!(Error::Process, "Unable to list /proc: {}", e))?;
        let mut found = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
                Some((pid, entry.path()))
            })
            .filter(|(_, dir)| proc_names(dir).iter().any(|n| n == name))
            .map(|(pid, _)| ProcessInfo {
                pid,
                name: name.to_owned(),
            })
            .collect::<Vec<_>>();
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    fn find(&self, name: &str) -> Result<Vec<ProcessInfo>> {
        let output = Command::new("pgrep")
            .args(["-x", name])
            .output()
            .map_err(|e| format_err!(Error::Process, "Unable to run pgrep: {}", e))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) => Ok(parse_pgrep(&String::from_utf8_lossy(&output.stdout), name)),
            // exit 1 is "no match", unless pgrep complained about the pattern
            Some(1) if stderr.trim().is_empty() => Ok(vec![]),
            _ => bail!(
                Error::Process,
                "pgrep failed with status {}: {}",
                output.status,
                stderr.trim()
            ),
        }
    }

    fn terminate(&self, process: &ProcessInfo) -> Result<()> {
        let pid = process.pid.to_string();
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("taskkill");
            cmd.args(["/PID", pid.as_str()]);
            cmd
        } else {
            let mut cmd = Command::new("kill");
            cmd.arg(&pid);
            cmd
        };
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format_err!(Error::Process, "Unable to signal pid {}: {}", pid, e))?;

        if status.success() {
            return Ok(());
        }
        let name = process.name.trim_end_matches(".exe");
        if self.find(name)?.iter().any(|p| p.pid == process.pid) {
            bail!(Error::Process, "Terminate request for pid {} failed: {}", pid, status);
        }
        debug!("pid {} exited before it could be terminated", pid);
        Ok(())
    }
}

/// Parse `tasklist /FO CSV /NH` output, keeping rows whose image name is `image`
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_tasklist(stdout: &str, image: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter(|line| line.starts_with('"'))
        .filter_map(|line| {
            let fields = line
                .split("\",\"")
                .map(|f| f.trim_matches('"'))
                .collect::<Vec<_>>();
            let name = *fields.first()?;
            let pid = fields.get(1)?.parse::<u32>().ok()?;
            if name.eq_ignore_ascii_case(image) {
                Some(ProcessInfo {
                    pid,
                    name: name.to_owned(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Parse `pgrep` output: one pid per line
#[cfg_attr(any(windows, target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_pgrep(stdout: &str, name: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .map(|pid| ProcessInfo {
            pid,
            name: name.to_owned(),
        })
        .collect()
}

/// Names a live `/proc/<pid>` entry answers to. Zombies and unreadable
/// entries answer to nothing.
#[cfg(target_os = "linux")]
fn proc_names(dir: &Path) -> Vec<String> {
    match fs::read_to_string(dir.join("stat")) {
        Ok(stat) if proc_state(&stat) != Some('Z') => {}
        _ => return vec![],
    }
    let mut names = vec![];
    if let Ok(exe) = fs::read_link(dir.join("exe")) {
        if let Some(base) = exe.file_name().and_then(|n| n.to_str()) {
            names.push(base.trim_end_matches(" (deleted)").to_owned());
        }
    }
    if let Ok(cmdline) = fs::read(dir.join("cmdline")) {
        names.extend(program_name(&cmdline));
    }
    if let Ok(comm) = fs::read_to_string(dir.join("comm")) {
        names.push(comm.trim_end_matches('\n').to_owned());
    }
    names
}

/// State letter from `/proc/<pid>/stat`, which follows the parenthesised `comm`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn proc_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Base name of `argv[0]` from a NUL separated `/proc/<pid>/cmdline`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn program_name(cmdline: &[u8]) -> Option<String> {
    let argv0 = cmdline.split(|b| *b == 0).next()?;
    let argv0 = String::from_utf8_lossy(argv0);
    let base = argv0.rsplit('/').next()?;
    if base.is_empty() {
        None
    } else {
        Some(base.to_owned())
    }
}

/// Starts the updated application
pub trait Launcher {
    fn launch(&self, executable: &Path, args: &[String], working_dir: &Path) -> Result<()>;
}

/// Spawns the application and lets it outlive the updater
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, executable: &Path, args: &[String], working_dir: &Path) -> Result<()> {
        let child = Command::new(executable)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!("Launched {:?} {:?} (pid {})", executable, args, child.id());
        Ok(())
    }
}
