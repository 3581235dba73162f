/*!
GitHub releases

The latest version is read from where `https://github.com/<owner>/<repo>/releases/latest`
redirects to (`.../releases/tag/v1.3.10`), so no API token or JSON parsing is
involved. Archives are fetched from
`https://github.com/<owner>/<repo>/releases/download/v{version}/<asset>`.
*/
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use reqwest::header;

use crate::errors::*;
use crate::update::ReleaseSource;

const DEFAULT_HOST: &str = "https://github.com";

/// Placeholder replaced by the resolved version in download url templates
pub const VERSION_PLACEHOLDER: &str = "{version}";

static RELEASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[vV]?(\d+(?:\.\d+)*)$").expect("release tag pattern is valid"));

/// Pull the version out of a release url's final path segment,
/// e.g. `https://github.com/o/r/releases/tag/v1.3.10` -> `1.3.10`
///
/// * Errors:
///     * Resolution - last segment is not a dotted numeric version
pub fn version_from_release_url(url: &str) -> Result<String> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or("");
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    match RELEASE_TAG.captures(segment).and_then(|c| c.get(1)) {
        Some(m) => Ok(m.as_str().to_owned()),
        None => bail!(
            Error::Resolution,
            "Release url does not end in a version: {:?}",
            url
        ),
    }
}

/// Substitute `version` into a download url template
pub fn render_download_url(template: &str, version: &str) -> String {
    template.replace(VERSION_PLACEHOLDER, version)
}

/// `ReleaseSource` builder
#[derive(Clone, Debug)]
pub struct ReleaseSourceBuilder {
    host: String,
    repo_owner: Option<String>,
    repo_name: Option<String>,
    asset_name: Option<String>,
}

impl ReleaseSourceBuilder {
    /// Set the host, defaults to `https://github.com`
    pub fn host(&mut self, host: &str) -> &mut Self {
        self.host = host.trim_end_matches('/').to_owned();
        self
    }

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

    /// Set the file name of the release asset, e.g. `MyApp.zip`
    pub fn asset_name(&mut self, name: &str) -> &mut Self {
        self.asset_name = Some(name.to_owned());
        self
    }

    /// Verify builder args, returning a `GitHubReleases`
    ///
    /// * Errors:
    ///     * Config - missing repo owner, repo name, or asset name
    pub fn build(&self) -> Result<GitHubReleases> {
        Ok(GitHubReleases {
            host: self.host.clone(),
            repo_owner: if let Some(ref owner) = self.repo_owner {
                owner.to_owned()
            } else {
                bail!(Error::Config, "`repo_owner` required")
            },
            repo_name: if let Some(ref name) = self.repo_name {
                name.to_owned()
            } else {
                bail!(Error::Config, "`repo_name` required")
            },
            asset_name: if let Some(ref name) = self.asset_name {
                name.to_owned()
            } else {
                bail!(Error::Config, "`asset_name` required")
            },
        })
    }
}

/// Releases published on a GitHub repo
#[derive(Clone, Debug)]
pub struct GitHubReleases {
    host: String,
    repo_owner: String,
    repo_name: String,
    asset_name: String,
}

impl GitHubReleases {
    /// Initialize a `ReleaseSourceBuilder`
    pub fn configure() -> ReleaseSourceBuilder {
        ReleaseSourceBuilder {
            host: DEFAULT_HOST.to_owned(),
            repo_owner: None,
            repo_name: None,
            asset_name: None,
        }
    }

    /// Url that redirects to the latest release's tag page
    pub fn latest_url(&self) -> String {
        format!(
            "{}/{}/{}/releases/latest",
            self.host, self.repo_owner, self.repo_name
        )
    }

    /// Download url with a `{version}` placeholder
    pub fn download_url_template(&self) -> String {
        format!(
            "{}/{}/{}/releases/download/v{}/{}",
            self.host, self.repo_owner, self.repo_name, VERSION_PLACEHOLDER, self.asset_name
        )
    }

    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }
}

impl ReleaseSource for GitHubReleases {
    fn latest_version(&self) -> Result<String> {
        let api_url = self.latest_url();
        let client = reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Resolution(e.to_string()))?;
        let resp = client
            .get(&api_url)
            .header(
                header::USER_AGENT,
                concat!("inplace_update/", env!("CARGO_PKG_VERSION")),
            )
            .send()
            .map_err(|e| format_err!(Error::Resolution, "Request to {:?} failed: {}", api_url, e))?;
        if !resp.status().is_success() {
            bail!(
                Error::Resolution,
                "api request failed with status: {:?} - for: {:?}",
                resp.status(),
                api_url
            )
        }
        debug!("{} resolved to {}", api_url, resp.url());
        version_from_release_url(resp.url().as_str())
    }

    fn download_url(&self, version: &str) -> String {
        render_download_url(&self.download_url_template(), version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn releases() -> GitHubReleases {
        GitHubReleases::configure()
            .repo_owner("acme")
            .repo_name("widget")
            .asset_name("Widget.zip")
            .build()
            .unwrap()
    }

    #[test]
    fn version_is_last_segment() {
        assert_eq!(
            "1.3.10",
            version_from_release_url("https://github.com/acme/widget/releases/tag/v1.3.10").unwrap()
        );
        assert_eq!(
            "2.0",
            version_from_release_url("https://github.com/acme/widget/releases/tag/2.0/").unwrap()
        );
        assert_eq!(
            "4.1",
            version_from_release_url("https://github.com/acme/widget/releases/tag/v4.1?x=1").unwrap()
        );
    }

    #[test]
    fn unexpected_redirect_shape() {
        // no releases: github leaves you on the release listing
        let err = version_from_release_url("https://github.com/acme/widget/releases").unwrap_err();
        assert_eq!(FailureKind::Resolution, err.kind());
        assert!(version_from_release_url("https://github.com/acme/widget/releases/tag/nightly").is_err());
    }

    #[test]
    fn urls() {
        let r = releases();
        assert_eq!("https://github.com/acme/widget/releases/latest", r.latest_url());
        assert_eq!(
            "https://github.com/acme/widget/releases/download/v1.3.10/Widget.zip",
            r.download_url("1.3.10")
        );
    }

    #[test]
    fn custom_host() {
        let r = GitHubReleases::configure()
            .host("http://127.0.0.1:8080/")
            .repo_owner("acme")
            .repo_name("widget")
            .asset_name("Widget.tar.gz")
            .build()
            .unwrap();
        assert_eq!(
            "http://127.0.0.1:8080/acme/widget/releases/download/v{version}/Widget.tar.gz",
            r.download_url_template()
        );
    }

    #[test]
    fn missing_config() {
        let err = GitHubReleases::configure()
            .repo_owner("acme")
            .asset_name("Widget.zip")
            .build()
            .unwrap_err();
        assert_eq!("ConfigError: `repo_name` required", err.to_string());
    }

    /// The server runs on its own runtime; requests are made from the
    /// blocking test thread, outside of it.
    fn serve() -> (tokio::runtime::Runtime, MockServer) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        (rt, server)
    }

    fn releases_at(host: &str) -> GitHubReleases {
        GitHubReleases::configure()
            .host(host)
            .repo_owner("acme")
            .repo_name("widget")
            .asset_name("Widget.zip")
            .build()
            .unwrap()
    }

    #[test]
    fn latest_follows_redirect_to_tag() {
        let (rt, server) = serve();
        let tag_url = format!("{}/acme/widget/releases/tag/v1.3.10", server.uri());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/acme/widget/releases/latest"))
                .respond_with(ResponseTemplate::new(302).insert_header("Location", tag_url.as_str()))
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/acme/widget/releases/tag/v1.3.10"))
                .respond_with(ResponseTemplate::new(200).set_body_string("release page"))
                .mount(&server),
        );

        assert_eq!("1.3.10", releases_at(&server.uri()).latest_version().unwrap());
    }

    #[test]
    fn latest_not_found_is_resolution_failure() {
        let (rt, server) = serve();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/acme/widget/releases/latest"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server),
        );

        let err = releases_at(&server.uri()).latest_version().unwrap_err();
        assert_eq!(FailureKind::Resolution, err.kind());
    }

    #[test]
    fn latest_without_redirect_is_resolution_failure() {
        // no redirect leaves the url ending in `latest`
        let (rt, server) = serve();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/acme/widget/releases/latest"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server),
        );

        let err = releases_at(&server.uri()).latest_version().unwrap_err();
        assert_eq!(FailureKind::Resolution, err.kind());
    }
}
