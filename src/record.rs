use std::error::Error;
use std::fmt;
use std::fs::{
    create_dir_all,
    File,
};
use std::io;
use std::path::{
    Path,
    PathBuf,
};

use tempfile::NamedTempFile;

use log::{debug, error};

use crate::name::is_safe_segment;

/// Name of the directory below the root that holds both stores.
pub const FILES_DIR: &str = "files";

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RequestErrorType {
    /// Malformed or incomplete client input.
    InputError,
    /// Upload key missing from the allow-list.
    AuthError,
    /// No record for the requested key.
    RecordError,
    /// Method not served by the route.
    MethodError,
    ReadError,
    WriteError,
}

pub struct RequestError {
    pub typ: RequestErrorType,
    pub v: Option<String>,
}

impl RequestError {
    pub fn new(typ: RequestErrorType) -> RequestError {
        RequestError {
            typ,
            v: None,
        }
    }

    pub fn with_detail(typ: RequestErrorType, detail: impl fmt::Display) -> RequestError {
        RequestError {
            typ,
            v: Some(detail.to_string()),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.v {
            Some(v) => write!(fmt, "{:?}: {}", self.typ, v),
            None => write!(fmt, "{:?}", self.typ),
        }
    }
}

impl fmt::Debug for RequestError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, fmt)
    }
}

impl Error for RequestError {}

/// Which of the two stores a key lives in.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Mode {
    /// Keyed by sanitized filename, replaced on every upload.
    Latest,
    /// Keyed by content digest, never changes once written.
    Versioned,
}

impl Mode {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Mode::Latest => "unversioned",
            Mode::Versioned => "versioned",
        }
    }
}

/// A stored file.
#[derive(Debug)]
pub struct Record {
    pub mode: Mode,
    pub key: String,
    pub path: PathBuf,
}

/// Owns the on-disk layout below a root directory:
///
/// ``` ignore,
/// <root>/files/unversioned/<sanitized name>
/// <root>/files/versioned/<sha256 hex>
/// ```
///
/// Uploads are staged in temporary files directly below `<root>/files` and renamed into place,
/// so a key never points to a partially written file.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: &Path) -> Store {
        Store {
            root: root.to_path_buf(),
        }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn dir(&self, mode: Mode) -> PathBuf {
        self.files_dir().join(mode.dir_name())
    }

    /// Create the store directories if they are missing.
    pub fn prepare(&self) -> io::Result<()> {
        create_dir_all(self.dir(Mode::Latest))?;
        create_dir_all(self.dir(Mode::Versioned))?;
        Ok(())
    }

    /// Resolve `key` to its path in the store for `mode`.
    ///
    /// Fails with an input error if `key` is not a single safe path segment, and with a record
    /// error if the store directory itself does not exist.
    pub fn resolve(&self, mode: Mode, key: &str) -> Result<PathBuf, RequestError> {
        if !is_safe_segment(key) {
            return Err(RequestError::with_detail(RequestErrorType::InputError, format!("unsafe key {:?}", key)));
        }
        let dir = match self.dir(mode).canonicalize() {
            Ok(v) => v,
            Err(e) => {
                error!("store directory for {:?} unavailable: {}", mode, e);
                return Err(RequestError::with_detail(RequestErrorType::RecordError, e));
            },
        };
        let p = dir.join(key);
        if p.parent() != Some(dir.as_path()) {
            return Err(RequestError::with_detail(RequestErrorType::InputError, format!("key {:?} leaves store", key)));
        }
        debug!("key {} resolved to {:?}", key, &p);
        Ok(p)
    }

    /// A new staging file on the same filesystem as the stores.
    pub fn spool(&self) -> Result<NamedTempFile, RequestError> {
        match NamedTempFile::new_in(self.files_dir()) {
            Ok(v) => {
                debug!("spooling to {:?}", v.path());
                Ok(v)
            },
            Err(e) => {
                error!("cannot create spool file: {}", e);
                Err(RequestError::with_detail(RequestErrorType::WriteError, e))
            },
        }
    }

    /// Move a completed spool file into place under `key`.
    ///
    /// In [Mode::Latest] any previous file under the same key is replaced. In
    /// [Mode::Versioned] an existing file already holds the same content and the spool is
    /// discarded.
    pub fn put(&self, mode: Mode, key: &str, spool: NamedTempFile) -> Result<Record, RequestError> {
        let path = match self.resolve(mode, key) {
            Ok(v) => v,
            Err(e) if e.typ == RequestErrorType::RecordError => {
                return Err(RequestError::with_detail(RequestErrorType::WriteError, e));
            },
            Err(e) => return Err(e),
        };
        if mode == Mode::Versioned && path.is_file() {
            debug!("already have {}, discarding spool", key);
            return Ok(Record {
                mode,
                key: key.to_string(),
                path,
            });
        }

        if let Err(e) = spool.as_file().sync_all() {
            error!("cannot flush spool for {}: {}", key, e);
            return Err(RequestError::with_detail(RequestErrorType::WriteError, e));
        }
        match spool.persist(&path) {
            Ok(_) => {
                debug!("stored {:?} {} at {:?}", mode, key, &path);
                Ok(Record {
                    mode,
                    key: key.to_string(),
                    path,
                })
            },
            Err(e) => {
                error!("cannot store {:?} {}: {}", mode, key, e.error);
                Err(RequestError::with_detail(RequestErrorType::WriteError, e.error))
            },
        }
    }

    /// Open the file stored under `key` for reading.
    pub fn open(&self, mode: Mode, key: &str) -> Result<File, RequestError> {
        let path = match self.resolve(mode, key) {
            Ok(v) => v,
            Err(e) if e.typ == RequestErrorType::InputError => {
                return Err(RequestError::with_detail(RequestErrorType::RecordError, e));
            },
            Err(e) => return Err(e),
        };
        let path_canon = match path.canonicalize() {
            Ok(v) => v,
            Err(e) => {
                return Err(not_found_or_read(e));
            },
        };
        if path_canon.parent() != path.parent() {
            return Err(RequestError::with_detail(RequestErrorType::RecordError, format!("{} links outside store", key)));
        }
        if !path_canon.is_file() {
            return Err(RequestError::with_detail(RequestErrorType::RecordError, format!("{} is not a file", key)));
        }
        File::open(&path_canon).map_err(not_found_or_read)
    }
}

fn not_found_or_read(e: io::Error) -> RequestError {
    match e.kind() {
        io::ErrorKind::NotFound => RequestError::with_detail(RequestErrorType::RecordError, e),
        _ => {
            error!("cannot read record: {}", e);
            RequestError::with_detail(RequestErrorType::ReadError, e)
        },
    }
}
