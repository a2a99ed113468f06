use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{
    App,
    Arg,
    ArgMatches,
};

use shelf::auth::env::DEFAULT_KEYS_VAR;
use shelf::upload::DEFAULT_UPLOAD_LIMIT;

const BIND_HOST: &str = "0.0.0.0";
const WORKERS: usize = 4;

/// Environment variable holding the port to listen on.
pub const PORT_VAR: &str = "CDN_PORT";

#[derive(Debug)]
pub enum SettingsError {
    MissingPort,
    Invalid(&'static str, String),
    Root(std::io::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::MissingPort => write!(fmt, "{} environment variable is not set and no --port given", PORT_VAR),
            SettingsError::Invalid(k, v) => write!(fmt, "invalid value for {}: {:?}", k, v),
            SettingsError::Root(e) => write!(fmt, "cannot determine root directory: {}", e),
        }
    }
}

impl Error for SettingsError {}

pub struct Settings {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub workers: usize,
    pub max_upload: u64,
    pub keys_var: String,
}

fn parse<T: FromStr>(k: &'static str, v: &str) -> Result<T, SettingsError> {
    T::from_str(v).map_err(|_| SettingsError::Invalid(k, v.to_string()))
}

fn app<'a, 'b>() -> App<'a, 'b> {
    let mut o = App::new("shelf");
    o = o.version(env!("CARGO_PKG_VERSION"));
    o = o.about("Minimal content-delivery server for latest and versioned files");
    o = o.arg(
        Arg::with_name("host")
            .long("host")
            .value_name("HOST")
            .help("Host or ip to bind server to")
            .takes_value(true)
            );
    o = o.arg(
        Arg::with_name("port")
            .long("port")
            .short("p")
            .value_name("PORT")
            .help("Port to bind server to, overrides CDN_PORT")
            .takes_value(true)
            );
    o = o.arg(
        Arg::with_name("root")
            .long("root")
            .short("d")
            .value_name("DIR")
            .help("Directory holding the files/ tree, defaults to the working directory")
            .takes_value(true)
            );
    o = o.arg(
        Arg::with_name("workers")
            .long("workers")
            .short("w")
            .value_name("N")
            .help("Number of request worker threads")
            .takes_value(true)
            );
    o = o.arg(
        Arg::with_name("max_upload")
            .long("max-upload")
            .value_name("BYTES")
            .help("Largest accepted upload request body")
            .takes_value(true)
            );
    o = o.arg(
        Arg::with_name("keys_env")
            .long("keys-env")
            .value_name("VAR")
            .help("Environment variable holding the ;-separated upload keys")
            .takes_value(true)
            );
    o
}

impl Settings {

    pub fn new(root: PathBuf) -> Settings {
        Settings {
            host: BIND_HOST.to_string(),
            port: 0,
            root,
            workers: WORKERS,
            max_upload: DEFAULT_UPLOAD_LIMIT,
            keys_var: DEFAULT_KEYS_VAR.to_string(),
        }
    }

    fn bind_from_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<bool, SettingsError> {
        match lookup(PORT_VAR) {
            Some(v) if !v.is_empty() => {
                self.port = parse(PORT_VAR, &v)?;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> Result<bool, SettingsError> {
        if let Some(v) = arg.value_of("host") {
            self.host = v.to_string();
        }
        if let Some(v) = arg.value_of("root") {
            self.root = PathBuf::from(v);
        }
        if let Some(v) = arg.value_of("workers") {
            self.workers = parse("workers", v)?;
            if self.workers == 0 {
                return Err(SettingsError::Invalid("workers", v.to_string()));
            }
        }
        if let Some(v) = arg.value_of("max_upload") {
            self.max_upload = parse("max-upload", v)?;
        }
        if let Some(v) = arg.value_of("keys_env") {
            self.keys_var = v.to_string();
        }
        match arg.value_of("port") {
            Some(v) => {
                self.port = parse("port", v)?;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Settings from command line flags, falling back to the environment for the port.
    ///
    /// The port is mandatory.
    pub fn from_matches(arg: &ArgMatches, lookup: &dyn Fn(&str) -> Option<String>, root: PathBuf) -> Result<Settings, SettingsError> {
        let mut settings = Settings::new(root);
        let have_arg_port = settings.bind_from_args(arg)?;
        if !have_arg_port && !settings.bind_from_env(lookup)? {
            return Err(SettingsError::MissingPort);
        }
        Ok(settings)
    }

    pub fn from_args() -> Result<Settings, SettingsError> {
        let arg_matches = app().get_matches();
        let root = env::current_dir().map_err(SettingsError::Root)?;
        Settings::from_matches(&arg_matches, &|k| env::var(k).ok(), root)
    }
}
