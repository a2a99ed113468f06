use std::fs::File;
use std::io::Read;

use mime::Mime;
use percent_encoding::{
    percent_decode_str,
    utf8_percent_encode,
    AsciiSet,
    CONTROLS,
};
use tiny_http::Method;
use url::Url;

use crate::auth::Authorizer;
use crate::digest::is_digest_hex;
use crate::name::sanitize;
use crate::page::{
    render_uploaded,
    INDEX_PAGE,
    UPLOAD_PAGE,
};
use crate::record::{
    Mode,
    Store,
    RequestError,
    RequestErrorType,
};
use crate::upload::read_form;

use log::{
    debug,
    info,
};

/// Characters escaped when a filename is placed in a link.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub const LATEST_PREFIX: &str = "/files/latest/";
pub const VERSIONED_PREFIX: &str = "/files/versioned/";

#[derive(Debug, PartialEq)]
pub enum RequestResultType {
    /// A stored file is returned.
    Found,
    /// An upload was stored.
    Changed,
    /// A static page is returned.
    Page,
    /// Answer to a CORS preflight.
    Preflight,
}

pub struct RequestResult {
    pub typ: RequestResultType,
    /// Page body.
    pub v: Option<String>,
    /// File body.
    pub f: Option<File>,
    /// Content type.
    pub m: Option<Mime>,
    /// Filename to suggest for an attachment download.
    pub n: Option<String>,
    /// Link to a stored upload.
    pub link: Option<String>,
}

impl RequestResult {
    fn new(typ: RequestResultType) -> RequestResult {
        RequestResult {
            typ,
            v: None,
            f: None,
            m: None,
            n: None,
            link: None,
        }
    }

    fn page(v: &str) -> RequestResult {
        let mut r = RequestResult::new(RequestResultType::Page);
        r.v = Some(v.to_string());
        r.m = Some(mime::TEXT_HTML_UTF_8);
        r
    }
}

/// Where a request URL points. File routes keep their remaining path segments undecoded.
#[derive(Debug, PartialEq)]
pub enum Route {
    Index,
    Upload,
    Latest(Vec<String>),
    Versioned(Vec<String>),
    Unknown,
}

impl Route {
    pub fn from_url(url: &str) -> Route {
        if !url.starts_with('/') {
            return Route::Unknown;
        }
        let u = match Url::parse(&format!("http://localhost{}", url)) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable url {}: {}", url, e);
                return Route::Unknown;
            },
        };
        let segments: Vec<&str> = match u.path_segments() {
            Some(v) => v.collect(),
            None => return Route::Unknown,
        };
        match segments.as_slice() {
            [""] => Route::Index,
            ["upload"] => Route::Upload,
            ["files", "latest", rest @ ..] => Route::Latest(rest.iter().map(|v| v.to_string()).collect()),
            ["files", "versioned", rest @ ..] => Route::Versioned(rest.iter().map(|v| v.to_string()).collect()),
            _ => Route::Unknown,
        }
    }
}

fn decode_segment(raw: &str) -> Option<String> {
    percent_decode_str(raw).decode_utf8().ok().map(|v| v.into_owned())
}

/// The download name for an attachment: the decoded segment if it is printable ASCII,
/// otherwise the segment as it appeared in the URL.
fn attachment_name(raw: &str) -> String {
    match decode_segment(raw) {
        Some(v) if v.chars().all(|c| (' '..='~').contains(&c)) => v,
        _ => raw.to_string(),
    }
}

/// Path under which a stored upload can be retrieved.
pub fn link_for(mode: Mode, key: &str, name: &str) -> String {
    let name_enc = utf8_percent_encode(name, SEGMENT);
    match mode {
        Mode::Latest => format!("{}{}", LATEST_PREFIX, name_enc),
        Mode::Versioned => format!("{}{}/{}", VERSIONED_PREFIX, key, name_enc),
    }
}

fn method_error(method: &Method) -> RequestError {
    RequestError::with_detail(RequestErrorType::MethodError, method)
}

/// Serves the upload form and the two stores.
///
/// Holds no per-request state, so a single instance is shared by all workers.
pub struct Endpoint {
    store: Store,
    auth: Authorizer,
    limit: u64,
}

impl Endpoint {
    /// # Arguments
    ///
    /// * `store` - Storage for uploaded files.
    /// * `auth` - Decides which upload keys are accepted.
    /// * `limit` - Maximum size of an upload request body.
    pub fn new(store: Store, auth: Authorizer, limit: u64) -> Endpoint {
        Endpoint {
            store,
            auth,
            limit,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handle a client request.
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method of the client request.
    /// * `url` - The local part of the URL of the client request.
    /// * `content_type` - The `Content-Type` header of the request, if any.
    /// * `body_length` - Declared size of the request body, if known.
    /// * `body` - Reader providing the request body.
    pub fn process(&self, method: &Method, url: &str, content_type: Option<&str>, body_length: Option<usize>, body: impl Read) -> Result<RequestResult, RequestError> {
        let route = Route::from_url(url);
        debug!("{} {} routed to {:?}", method, url, route);
        match route {
            Route::Index => match method {
                Method::Get | Method::Options => Ok(RequestResult::page(INDEX_PAGE)),
                _ => Err(method_error(method)),
            },
            Route::Upload => match method {
                Method::Options => Ok(RequestResult::new(RequestResultType::Preflight)),
                Method::Get => Ok(RequestResult::page(UPLOAD_PAGE)),
                Method::Post => self.process_upload(content_type, body_length, body),
                _ => Err(method_error(method)),
            },
            Route::Latest(rest) => match method {
                Method::Options => Ok(RequestResult::new(RequestResultType::Preflight)),
                Method::Get => self.process_latest(&rest),
                _ => Err(method_error(method)),
            },
            Route::Versioned(rest) => match method {
                Method::Options => Ok(RequestResult::new(RequestResultType::Preflight)),
                Method::Get => self.process_versioned(&rest),
                _ => Err(method_error(method)),
            },
            Route::Unknown => Err(RequestError::with_detail(RequestErrorType::RecordError, "no route")),
        }
    }

    fn process_upload(&self, content_type: Option<&str>, body_length: Option<usize>, body: impl Read) -> Result<RequestResult, RequestError> {
        if let Some(v) = body_length {
            if v as u64 > self.limit {
                return Err(RequestError::with_detail(RequestErrorType::InputError, format!("body of {} bytes over limit", v)));
            }
        }

        let form = read_form(body, content_type, self.limit, &self.store, |k| self.auth.authorize(k))?;
        let versioned = form.is_versioned();
        let part = match form.file {
            Some(v) => v,
            None => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, "no file"));
            },
        };
        let apikey = match form.apikey {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, "no apikey"));
            },
        };
        if !self.auth.authorize(&apikey) {
            return Err(RequestError::with_detail(RequestErrorType::AuthError, "apikey refused"));
        }

        let display = match form.file_name {
            Some(v) if !v.is_empty() => v,
            _ => part.filename.clone(),
        };
        let name = match sanitize(&display) {
            Some(v) => v,
            None => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, format!("no usable filename in {:?}", display)));
            },
        };

        let size = part.size;
        let (mode, key) = match versioned {
            true => (Mode::Versioned, part.digest.clone()),
            false => (Mode::Latest, name.clone()),
        };
        let spool = part.stage(&self.store)?;
        let record = self.store.put(mode, &key, spool)?;

        let link = link_for(record.mode, &record.key, &name);
        info!("stored {} bytes as {:?} {} -> {}", size, record.mode, record.key, &link);

        let mut res = RequestResult::page(&render_uploaded(&link, &name));
        res.typ = RequestResultType::Changed;
        res.link = Some(link);
        Ok(res)
    }

    fn process_latest(&self, rest: &[String]) -> Result<RequestResult, RequestError> {
        let raw = match rest {
            [v] if !v.is_empty() => v,
            _ => {
                return Err(RequestError::with_detail(RequestErrorType::RecordError, "no single name"));
            },
        };
        let name = match decode_segment(raw) {
            Some(v) => v,
            None => {
                return Err(RequestError::with_detail(RequestErrorType::RecordError, "undecodable name"));
            },
        };
        let f = self.store.open(Mode::Latest, &name)?;

        let mut res = RequestResult::new(RequestResultType::Found);
        res.f = Some(f);
        res.m = Some(mime_guess::from_path(&name).first_or_octet_stream());
        Ok(res)
    }

    fn process_versioned(&self, rest: &[String]) -> Result<RequestResult, RequestError> {
        if rest.len() > 2 {
            return Err(RequestError::with_detail(RequestErrorType::RecordError, "no route"));
        }
        let hash = match rest.get(0) {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, "no hash"));
            },
        };
        let raw_name = match rest.get(1) {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, "no filename"));
            },
        };
        // the hash never needs decoding, anything else cannot name a record
        if !is_digest_hex(hash) {
            return Err(RequestError::with_detail(RequestErrorType::RecordError, format!("not a digest: {}", hash)));
        }
        let f = self.store.open(Mode::Versioned, hash)?;

        let mut res = RequestResult::new(RequestResultType::Found);
        res.f = Some(f);
        res.m = Some(mime::APPLICATION_OCTET_STREAM);
        res.n = Some(attachment_name(raw_name));
        Ok(res)
    }
}
