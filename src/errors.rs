/*!
Error type, conversions, and failure classification

*/
use zip::result::ZipError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Resolution(String),
    Download(String),
    Extraction(String),
    Process(String),
    Config(String),
    Io(std::io::Error),
    Zip(ZipError),
    Json(serde_json::Error),
    Reqwest(reqwest::Error),
}

/// Which stage of the update workflow an `Error` belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Latest or installed version could not be determined
    Resolution,
    /// Fetching the release archive failed
    Download,
    /// The release archive could not be opened or decoded
    Extraction,
    /// Waiting for the running application to exit failed or was cancelled
    Process,
    Other,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        use Error::*;
        match *self {
            Resolution(_) => FailureKind::Resolution,
            Download(_) | Reqwest(_) => FailureKind::Download,
            Extraction(_) | Zip(_) => FailureKind::Extraction,
            Process(_) => FailureKind::Process,
            Config(_) | Io(_) | Json(_) => FailureKind::Other,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use Error::*;
        match *self {
            Resolution(ref s) => write!(f, "ResolutionError: {}", s),
            Download(ref s) => write!(f, "DownloadError: {}", s),
            Extraction(ref s) => write!(f, "ExtractionError: {}", s),
            Process(ref s) => write!(f, "ProcessError: {}", s),
            Config(ref s) => write!(f, "ConfigError: {}", s),
            Io(ref e) => write!(f, "IoError: {}", e),
            Zip(ref e) => write!(f, "ZipError: {}", e),
            Json(ref e) => write!(f, "JsonError: {}", e),
            Reqwest(ref e) => write!(f, "ReqwestError: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;
        Some(match *self {
            Io(ref e) => e,
            Zip(ref e) => e,
            Json(ref e) => e,
            Reqwest(ref e) => e,
            _ => return None,
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Error {
        Error::Reqwest(e)
    }
}

impl From<ZipError> for Error {
    fn from(e: ZipError) -> Error {
        Error::Zip(e)
    }
}
