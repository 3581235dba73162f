/*!

`inplace_update` replaces an installed desktop application with its latest
release, in place.

The workflow is a straight line:

1. Resolve the latest released version (from the `releases/latest` redirect)
   and the installed version (from the application's `config.json`).
2. If the installed version is older, stop every running instance of the
   application and wait for them to exit.
3. Download the release archive, extract it over the working directory, and
   relaunch the application with its post-update flags.

## Usage

```no_run
# fn run() -> inplace_update::Result<()> {
use inplace_update::{RunOutcome, Updater};

let outcome = Updater::configure()
    .repo_owner("acme")
    .repo_name("widget")
    .asset_name("Widget.zip")
    .app_dir("Widget")
    .process_name("Widget")
    .build()?
    .run()?;
if let RunOutcome::Updated(version) = outcome {
    println!("updated to v{}", version);
}
# Ok(())
# }
```

The pieces are usable on their own as well:

```no_run
# fn run() -> inplace_update::Result<()> {
use std::path::Path;

let mut archive = std::fs::File::create("Release.zip")?;
inplace_update::Download::from_url("https://example.com/Release.zip")
    .show_progress(true)
    .download_to(&mut archive)?;

let entries = inplace_update::Extract::from_source(Path::new("Release.zip"))
    .extract_into(Path::new("."))?;
println!("{} entries written", entries.len());
# Ok(())
# }
```

*/
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use either::Either;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use reqwest::header;

#[macro_use]
mod macros;
pub mod backends;
pub mod config;
pub mod errors;
pub mod process;
pub mod update;
pub mod version;

pub use crate::errors::{Error, FailureKind, Result};
pub use crate::update::{
    ReleaseSource, RunOutcome, UpdateExecutor, UpdateManifest, Updater, VersionResolver,
};

/// Prefix used when an extracted file cannot overwrite its destination
pub const CONFLICT_PREFIX: &str = "new_";

/// Outcome of a version check
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDecision {
    /// Installed version is the latest (or newer); wraps the installed version
    UpToDate(String),
    /// A newer release exists
    Outdated(UpdateManifest),
}

impl UpdateDecision {
    /// The version that is (or should be) installed after this decision
    pub fn version(&self) -> &str {
        match *self {
            UpdateDecision::UpToDate(ref s) => s,
            UpdateDecision::Outdated(ref m) => &m.latest,
        }
    }

    /// Returns `true` if `UpdateDecision::UpToDate`
    pub fn uptodate(&self) -> bool {
        matches!(*self, UpdateDecision::UpToDate(_))
    }

    /// Returns `true` if `UpdateDecision::Outdated`
    pub fn outdated(&self) -> bool {
        !self.uptodate()
    }
}

impl std::fmt::Display for UpdateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            UpdateDecision::UpToDate(ref s) => write!(f, "UpToDate({})", s),
            UpdateDecision::Outdated(ref m) => write!(f, "Outdated({} -> {})", m.current, m.latest),
        }
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArchiveKind {
    Tar(Option<Compression>),
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {
    Gz,
}

fn detect_archive(path: &Path) -> Result<ArchiveKind> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".zip") {
        Ok(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(ArchiveKind::Tar(Some(Compression::Gz)))
    } else if name.ends_with(".tar") {
        Ok(ArchiveKind::Tar(None))
    } else {
        bail!(Error::Extraction, "Unsupported archive type: {:?}", path)
    }
}

/// Name an archive entry is written under: the entry path with its top-level
/// directory removed, reduced to its final component.
///
/// Returns `None` for the top-level directory itself, for entries with no
/// top-level directory, and for names that would step outside the target.
pub fn flattened_name(entry_path: &str) -> Option<String> {
    let mut components = entry_path.split(|c| c == '/' || c == '\\');
    components.next()?;
    let base = components.filter(|c| !c.is_empty()).last()?;
    // a drive prefix such as `C:` would escape the target dir on windows
    if base.contains(':') {
        return None;
    }
    let mut parts = Path::new(base).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(_)), None) => Some(base.to_owned()),
        _ => None,
    }
}

/// Where a single archive entry ended up
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Written over (or created at) its regular destination
    Written(PathBuf),
    /// Regular destination refused the write; written under the `new_` name
    WrittenAside(PathBuf),
    /// Neither destination could be written
    Failed(String),
}

/// Result of extracting one archive entry
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntry {
    pub name: String,
    pub outcome: EntryOutcome,
}

/// Extract the files of a release archive into a directory, dropping the
/// archive's top-level directory and any nesting below it.
///
/// Per-entry write failures are not errors: the entry is written under a
/// `new_` prefixed name instead.
///
/// * Errors:
///     * Io - opening the archive, decoding an entry
///     * Zip - reading the zip directory
///     * Extraction - unsupported archive type
#[derive(Debug)]
pub struct Extract<'a> {
    source: &'a Path,
    archive: Option<ArchiveKind>,
}

impl<'a> Extract<'a> {
    pub fn from_source(source: &'a Path) -> Extract<'a> {
        Self {
            source,
            archive: None,
        }
    }

    /// Override archive detection, which is based on the source's file name
    pub fn archive(&mut self, kind: ArchiveKind) -> &mut Self {
        self.archive = Some(kind);
        self
    }

    pub fn extract_into(&self, into_dir: &Path) -> Result<Vec<ExtractedEntry>> {
        let kind = match self.archive {
            Some(kind) => kind,
            None => detect_archive(self.source)?,
        };
        let source = fs::File::open(self.source)?;
        let mut extracted = vec![];

        match kind {
            ArchiveKind::Zip => {
                let mut archive = zip::ZipArchive::new(source)?;
                for i in 0..archive.len() {
                    let mut file = archive.by_index(i)?;
                    if file.is_dir() {
                        continue;
                    }
                    let entry_path = file.name().to_owned();
                    if let Some(name) = flattened_name(&entry_path) {
                        let mut data = Vec::with_capacity(file.size() as usize);
                        io::Read::read_to_end(&mut file, &mut data)?;
                        extracted.push(write_entry(into_dir, name, &data));
                    } else {
                        debug!("Skipping archive entry {:?}", entry_path);
                    }
                }
            }
            ArchiveKind::Tar(compression) => {
                let reader = match compression {
                    Some(Compression::Gz) => Either::Left(flate2::read::GzDecoder::new(source)),
                    None => Either::Right(source),
                };
                let mut archive = tar::Archive::new(reader);
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    if entry.header().entry_type().is_dir() {
                        continue;
                    }
                    let entry_path = entry.path()?.to_string_lossy().into_owned();
                    if let Some(name) = flattened_name(&entry_path) {
                        let mut data = vec![];
                        io::Read::read_to_end(&mut entry, &mut data)?;
                        extracted.push(write_entry(into_dir, name, &data));
                    } else {
                        debug!("Skipping archive entry {:?}", entry_path);
                    }
                }
            }
        }
        Ok(extracted)
    }
}

fn write_entry(into_dir: &Path, name: String, data: &[u8]) -> ExtractedEntry {
    let dest = into_dir.join(&name);
    let outcome = match fs::write(&dest, data) {
        Ok(()) => EntryOutcome::Written(dest),
        Err(e) => {
            warn!("Unable to write {:?} ({}), writing it aside", dest, e);
            let aside = into_dir.join(format!("{}{}", CONFLICT_PREFIX, name));
            match fs::write(&aside, data) {
                Ok(()) => EntryOutcome::WrittenAside(aside),
                Err(e) => {
                    warn!("Unable to write {:?}: {}", aside, e);
                    EntryOutcome::Failed(e.to_string())
                }
            }
        }
    };
    ExtractedEntry { name, outcome }
}

/// Receives download progress
pub trait ProgressObserver {
    /// Called after every chunk; `total` is `None` when the server sent no length
    fn progress(&mut self, downloaded: u64, total: Option<u64>);

    fn finish(&mut self) {}
}

/// Percentage of `total` covered by `downloaded`, capped at 100
pub fn percent(downloaded: u64, total: Option<u64>) -> Option<u64> {
    match total {
        Some(0) | None => None,
        Some(total) => Some((downloaded.saturating_mul(100) / total).min(100)),
    }
}

/// Ignores all progress
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn progress(&mut self, _downloaded: u64, _total: Option<u64>) {}
}

/// Console progress: a percentage that overwrites its own line
pub struct ConsoleProgress {
    style: ProgressStyle,
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new(style: ProgressStyle) -> Self {
        Self { style, bar: None }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new(default_progress_style())
    }
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{percent}%").unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl ProgressObserver for ConsoleProgress {
    fn progress(&mut self, downloaded: u64, total: Option<u64>) {
        if percent(downloaded, total).is_none() {
            return;
        }
        let style = &self.style;
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total.unwrap_or(0));
            bar.set_style(style.clone());
            bar
        });
        bar.set_position(downloaded);
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

/// Fetches a url into a writer
pub trait Fetch {
    fn fetch(&self, url: &str, dest: &mut dyn io::Write) -> Result<()>;
}

/// `Fetch` over HTTP, with optional console progress
#[derive(Debug, Clone)]
pub struct HttpFetch {
    show_progress: bool,
}

impl HttpFetch {
    pub fn new(show_progress: bool) -> Self {
        Self { show_progress }
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, url: &str, dest: &mut dyn io::Write) -> Result<()> {
        Download::from_url(url)
            .show_progress(self.show_progress)
            .download_to(dest)
    }
}

/// Download things into files
///
/// Never goes through a proxy. Progress goes to a `ProgressObserver`.
pub struct Download {
    show_progress: bool,
    url: String,
    headers: header::HeaderMap,
    progress_style: ProgressStyle,
}

impl Download {
    /// Specify download url
    pub fn from_url(url: &str) -> Self {
        Self {
            show_progress: false,
            url: url.to_owned(),
            headers: header::HeaderMap::new(),
            progress_style: default_progress_style(),
        }
    }

    /// Toggle download progress on the console
    pub fn show_progress(&mut self, b: bool) -> &mut Self {
        self.show_progress = b;
        self
    }

    /// Set the console progress style
    pub fn set_progress_style(&mut self, progress_style: ProgressStyle) -> &mut Self {
        self.progress_style = progress_style;
        self
    }

    /// Set the download request headers
    pub fn set_headers(&mut self, headers: header::HeaderMap) -> &mut Self {
        self.headers = headers;
        self
    }

    /// Download the file behind the given `url` into the specified `dest`,
    /// reporting console progress if enabled.
    ///
    /// * Errors:
    ///     * `reqwest` network errors
    ///     * Unsuccessful response status
    ///     * Reading from response / writing to `dest`
    pub fn download_to<T: io::Write>(&self, dest: T) -> Result<()> {
        if self.show_progress {
            let mut progress = ConsoleProgress::new(self.progress_style.clone());
            self.download_observed(dest, &mut progress)
        } else {
            self.download_observed(dest, &mut NoProgress)
        }
    }

    /// Same as `download_to`, reporting progress to `observer`
    pub fn download_observed<T: io::Write>(
        &self,
        mut dest: T,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        use io::BufRead;

        let mut headers = self.headers.clone();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                header::HeaderValue::from_static(concat!("inplace_update/", env!("CARGO_PKG_VERSION"))),
            );
        }

        let client = reqwest::blocking::Client::builder().no_proxy().build()?;
        let resp = client.get(&self.url).headers(headers).send()?;
        if !resp.status().is_success() {
            bail!(
                Error::Download,
                "Download request failed with status: {:?} - for: {:?}",
                resp.status(),
                self.url
            )
        }
        let size = resp.content_length();

        let mut src = io::BufReader::new(resp);
        let mut downloaded = 0u64;
        loop {
            let n = {
                let buf = src.fill_buf()?;
                dest.write_all(buf)?;
                buf.len()
            };
            if n == 0 {
                break;
            }
            src.consume(n);
            downloaded += n as u64;
            observer.progress(downloaded, size);
        }
        dest.flush()?;
        observer.finish();
        debug!("Downloaded {} bytes from {}", downloaded, self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, Option<&[u8]>)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            match content {
                Some(data) => {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(data).unwrap();
                }
                None => {
                    zip.add_directory(*name, options).unwrap();
                }
            }
        }
        zip.finish().unwrap();
    }

    fn build_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn detect_zip() {
        assert_eq!(ArchiveKind::Zip, detect_archive(Path::new("Release.zip")).unwrap());
        assert_eq!(ArchiveKind::Zip, detect_archive(Path::new("Release.ZIP")).unwrap());
    }

    #[test]
    fn detect_tar_gz() {
        assert_eq!(
            ArchiveKind::Tar(Some(Compression::Gz)),
            detect_archive(Path::new("Release.tar.gz")).unwrap()
        );
        assert_eq!(
            ArchiveKind::Tar(Some(Compression::Gz)),
            detect_archive(Path::new("Release.tgz")).unwrap()
        );
    }

    #[test]
    fn detect_plain_tar() {
        assert_eq!(ArchiveKind::Tar(None), detect_archive(Path::new("Release.tar")).unwrap());
    }

    #[test]
    fn detect_unsupported() {
        let err = detect_archive(Path::new("Release.exe")).unwrap_err();
        assert_eq!(FailureKind::Extraction, err.kind());
    }

    #[test]
    fn flattening_drops_top_level_and_nesting() {
        assert_eq!(Some("app.exe".to_owned()), flattened_name("Release/app.exe"));
        assert_eq!(Some("data.bin".to_owned()), flattened_name("Release/sub/data.bin"));
        assert_eq!(None, flattened_name("Release/"));
        assert_eq!(None, flattened_name("Release"));
        assert_eq!(None, flattened_name("Release/sub/.."));
        assert_eq!(Some("a.dll".to_owned()), flattened_name("Release\\a.dll"));
        assert_eq!(None, flattened_name("Release/."));
        assert_eq!(None, flattened_name("Release/C:"));
        assert_eq!(None, flattened_name("Release/sub/C:evil.exe"));
        assert_eq!(None, flattened_name("Release\\D:\\"));
    }

    #[test]
    fn percent_is_capped_and_needs_length() {
        assert_eq!(Some(50), percent(50, Some(100)));
        assert_eq!(Some(100), percent(150, Some(100)));
        assert_eq!(None, percent(10, None));
        assert_eq!(None, percent(10, Some(0)));
    }

    #[test]
    fn extracts_zip_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Release.zip");
        build_zip(
            &archive,
            &[
                ("Release/", None),
                ("Release/app.exe", Some(b"exe")),
                ("Release/sub/data.bin", Some(b"data")),
            ],
        );
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let entries = Extract::from_source(&archive).extract_into(&out).unwrap();
        assert_eq!(2, entries.len());
        assert_eq!(b"exe".to_vec(), fs::read(out.join("app.exe")).unwrap());
        assert_eq!(b"data".to_vec(), fs::read(out.join("data.bin")).unwrap());
        assert!(!out.join("Release").exists());
        assert!(!out.join("sub").exists());
        assert_eq!(2, fs::read_dir(&out).unwrap().count());
    }

    #[test]
    fn blocked_destination_is_written_aside() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Release.zip");
        build_zip(
            &archive,
            &[
                ("Release/app.exe", Some(b"new exe")),
                ("Release/lib.dll", Some(b"lib")),
            ],
        );
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        // a directory in the way makes the regular write fail
        fs::create_dir(out.join("app.exe")).unwrap();

        let entries = Extract::from_source(&archive).extract_into(&out).unwrap();
        assert_eq!(
            EntryOutcome::WrittenAside(out.join("new_app.exe")),
            entries[0].outcome
        );
        assert_eq!(b"new exe".to_vec(), fs::read(out.join("new_app.exe")).unwrap());
        assert_eq!(EntryOutcome::Written(out.join("lib.dll")), entries[1].outcome);
        assert_eq!(b"lib".to_vec(), fs::read(out.join("lib.dll")).unwrap());
    }

    #[test]
    fn overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Release.zip");
        build_zip(&archive, &[("Release/app.exe", Some(b"v2"))]);
        fs::write(dir.path().join("app.exe"), b"v1").unwrap();

        Extract::from_source(&archive).extract_into(dir.path()).unwrap();
        assert_eq!(b"v2".to_vec(), fs::read(dir.path().join("app.exe")).unwrap());
    }

    #[test]
    fn extracts_tar_gz_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Release.tar.gz");
        build_tar_gz(
            &archive,
            &[("Release/app", b"bin"), ("Release/share/readme.txt", b"hi")],
        );
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let entries = Extract::from_source(&archive).extract_into(&out).unwrap();
        assert_eq!(2, entries.len());
        assert_eq!(b"bin".to_vec(), fs::read(out.join("app")).unwrap());
        assert_eq!(b"hi".to_vec(), fs::read(out.join("readme.txt")).unwrap());
    }

    #[test]
    fn corrupt_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Release.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();
        let err = Extract::from_source(&archive)
            .extract_into(dir.path())
            .unwrap_err();
        assert_eq!(FailureKind::Extraction, err.kind());
    }

    #[test]
    fn decision_accessors() {
        let up = UpdateDecision::UpToDate("1.2".into());
        assert!(up.uptodate());
        assert_eq!("1.2", up.version());

        let out = UpdateDecision::Outdated(UpdateManifest {
            current: "1.2".into(),
            latest: "1.3".into(),
            download_url: "https://example.com/v1.3/Release.zip".into(),
        });
        assert!(out.outdated());
        assert_eq!("1.3", out.version());
        assert_eq!("Outdated(1.2 -> 1.3)", out.to_string());
    }

    #[derive(Default)]
    struct Recorded {
        calls: Vec<(u64, Option<u64>)>,
        finished: bool,
    }

    impl ProgressObserver for Recorded {
        fn progress(&mut self, downloaded: u64, total: Option<u64>) {
            self.calls.push((downloaded, total));
        }

        fn finish(&mut self) {
            self.finished = true;
        }
    }

    /// Mounts `response` at `route` on a server with its own runtime, so the
    /// blocking client is used from outside any async context
    fn serve(route: &str, response: ResponseTemplate) -> (tokio::runtime::Runtime, MockServer) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(response)
                .mount(&server),
        );
        (rt, server)
    }

    #[test]
    fn download_reports_progress_to_the_end() {
        let body = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let (_rt, server) = serve(
            "/acme/widget/releases/download/v1.3.10/Release.zip",
            ResponseTemplate::new(200).set_body_bytes(body.clone()),
        );
        let url = format!("{}/acme/widget/releases/download/v1.3.10/Release.zip", server.uri());

        let mut recorded = Recorded::default();
        let mut dest = vec![];
        Download::from_url(&url)
            .download_observed(&mut dest, &mut recorded)
            .unwrap();

        assert_eq!(body, dest);
        assert!(recorded.finished);
        assert!(!recorded.calls.is_empty());
        let len = body.len() as u64;
        assert!(recorded.calls.iter().all(|(_, total)| *total == Some(len)));
        assert!(recorded.calls.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(Some(&(len, Some(len))), recorded.calls.last());
        assert_eq!(Some(100), percent(len, Some(len)));
    }

    #[test]
    fn download_not_found_is_download_failure() {
        let (_rt, server) = serve("/missing.zip", ResponseTemplate::new(404));
        let url = format!("{}/missing.zip", server.uri());

        let mut recorded = Recorded::default();
        let mut dest = vec![];
        let err = Download::from_url(&url)
            .download_observed(&mut dest, &mut recorded)
            .unwrap_err();
        assert_eq!(FailureKind::Download, err.kind());
        assert!(dest.is_empty());
        assert!(recorded.calls.is_empty());
        assert!(!recorded.finished);
    }
}
