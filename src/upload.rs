use std::io::{
    self,
    Read,
    Write,
};

use mime::Mime;
use multipart::server::Multipart;
use tempfile::NamedTempFile;

use log::{debug, error};

use crate::digest::ContentHasher;
use crate::record::{
    Store,
    RequestError,
    RequestErrorType,
};

/// Default ceiling for an upload request body.
pub const DEFAULT_UPLOAD_LIMIT: u64 = 1024 * 1024 * 1024;

/// Ceiling for a single text field of the upload form.
pub const FIELD_LIMIT: u64 = 64 * 1024;

const FIELD_FILE: &str = "file";
const FIELD_VERSIONED: &str = "versioned";
const FIELD_FILENAME: &str = "fileName";
const FIELD_APIKEY: &str = "apikey";

/// Where the content of the file part is held.
pub enum Payload {
    /// In memory, while the upload key is not yet known to be valid.
    Buffered(Vec<u8>),
    /// In a spool file in the store.
    Staged(NamedTempFile),
}

/// The uploaded file, read but not yet placed under a key.
pub struct FilePart {
    pub content: Payload,
    /// SHA256 of the content.
    pub digest: String,
    pub size: u64,
    /// Filename declared by the multipart part.
    pub filename: String,
}

impl FilePart {
    /// Move the content into a spool file in `store`.
    ///
    /// Must only be called once the upload is authorized.
    pub fn stage(self, store: &Store) -> Result<NamedTempFile, RequestError> {
        match self.content {
            Payload::Staged(f) => Ok(f),
            Payload::Buffered(v) => {
                let mut of = store.spool()?;
                if let Err(e) = of.write_all(&v) {
                    error!("cannot write to spool file: {}", e);
                    return Err(RequestError::with_detail(RequestErrorType::WriteError, e));
                }
                debug!("staged {} buffered bytes of {}", v.len(), self.filename);
                Ok(of)
            },
        }
    }
}

/// Fields of a parsed upload form.
#[derive(Default)]
pub struct UploadForm {
    pub file: Option<FilePart>,
    pub versioned: Option<String>,
    pub file_name: Option<String>,
    pub apikey: Option<String>,
}

impl UploadForm {
    /// Only the literal value `on` selects versioned storage.
    pub fn is_versioned(&self) -> bool {
        self.versioned.as_deref() == Some("on")
    }
}

/// Fails the read once more than `left` bytes have come through.
struct Capped<R> {
    inner: R,
    left: u64,
}

impl<R: Read> Read for Capped<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n as u64 > self.left {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "upload exceeds size limit"));
        }
        self.left -= n as u64;
        Ok(n)
    }
}

/// Extract the multipart boundary from a `Content-Type` header value.
pub fn boundary(content_type: &str) -> Option<String> {
    let m: Mime = content_type.parse().ok()?;
    if m.type_() != mime::MULTIPART || m.subtype() != mime::FORM_DATA {
        return None;
    }
    m.get_param(mime::BOUNDARY).map(|v| v.as_str().to_string())
}

fn read_field(data: impl Read, name: &str) -> Result<String, RequestError> {
    let mut v = String::new();
    if let Err(e) = data.take(FIELD_LIMIT + 1).read_to_string(&mut v) {
        return Err(RequestError::with_detail(RequestErrorType::InputError, format!("field {}: {}", name, e)));
    }
    if v.len() as u64 > FIELD_LIMIT {
        return Err(RequestError::with_detail(RequestErrorType::InputError, format!("field {} too long", name)));
    }
    Ok(v)
}

/// Copy the content of a file part to `w`, hashing it on the way.
fn copy_part(mut f: impl Read, w: &mut impl Write) -> Result<ContentHasher, RequestError> {
    let mut buf: [u8; 65535] = [0; 65535];
    let mut h = ContentHasher::new();
    loop {
        match f.read(&mut buf[..]) {
            Ok(0) => {
                break;
            },
            Ok(v) => {
                let data = &buf[..v];
                h.update(data);
                if let Err(e) = w.write_all(data) {
                    error!("cannot write upload content: {}", e);
                    return Err(RequestError::with_detail(RequestErrorType::WriteError, e));
                }
            },
            Err(e) => {
                debug!("cannot read upload body: {}", e);
                return Err(RequestError::with_detail(RequestErrorType::InputError, e));
            },
        }
    }
    Ok(h)
}

/// Read a file part, into a spool file when `authorized`, otherwise into memory.
fn read_part(store: &Store, f: impl Read, filename: &str, authorized: bool) -> Result<FilePart, RequestError> {
    let (h, content) = match authorized {
        true => {
            let mut of = store.spool()?;
            let h = copy_part(f, &mut of)?;
            (h, Payload::Staged(of))
        },
        false => {
            let mut v: Vec<u8> = vec!();
            let h = copy_part(f, &mut v)?;
            (h, Payload::Buffered(v))
        },
    };
    let size = h.size();
    let digest = h.finalize_hex();
    debug!("have hash {} for {} bytes of {}", digest, size, filename);
    Ok(FilePart {
        content,
        digest,
        size,
        filename: filename.to_string(),
    })
}

/// Read a `multipart/form-data` upload body.
///
/// The first `file` part with a filename is read; further file parts are skipped. For each text
/// field only the first occurrence counts.
///
/// If the `apikey` field precedes the file part, `check_key` is consulted first. An accepted key
/// lets the content stream into a spool file in `store`, a refused key ends the read with an auth
/// error. Without a key the content is held in memory, bounded by `limit`, and nothing is
/// written to `store`.
///
/// # Arguments
///
/// * `body` - Request body.
/// * `content_type` - Value of the request's `Content-Type` header.
/// * `limit` - Maximum number of body bytes to accept.
/// * `store` - Store to spool an authorized file part into.
/// * `check_key` - Authorization check for an upload key.
pub fn read_form(body: impl Read, content_type: Option<&str>, limit: u64, store: &Store, check_key: impl Fn(&str) -> bool) -> Result<UploadForm, RequestError> {
    let boundary = match content_type.and_then(boundary) {
        Some(v) => v,
        None => {
            return Err(RequestError::with_detail(RequestErrorType::InputError, "not a multipart form"));
        },
    };

    let mut form = UploadForm::default();
    let mut multipart = Multipart::with_body(Capped { inner: body, left: limit }, boundary);
    loop {
        let field = match multipart.read_entry() {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(e) => {
                return Err(RequestError::with_detail(RequestErrorType::InputError, e));
            },
        };
        let name = field.headers.name.to_string();
        match name.as_str() {
            FIELD_FILE => {
                if form.file.is_some() {
                    continue;
                }
                let filename = match field.headers.filename.clone() {
                    Some(v) if !v.is_empty() => v,
                    _ => {
                        debug!("file field without filename, ignoring");
                        continue;
                    },
                };
                let authorized = match form.apikey.as_deref() {
                    Some(k) if !k.is_empty() => {
                        if !check_key(k) {
                            return Err(RequestError::with_detail(RequestErrorType::AuthError, "key refused before content"));
                        }
                        true
                    },
                    _ => false,
                };
                form.file = Some(read_part(store, field.data, &filename, authorized)?);
            },
            FIELD_VERSIONED if form.versioned.is_none() => {
                form.versioned = Some(read_field(field.data, &name)?);
            },
            FIELD_FILENAME if form.file_name.is_none() => {
                form.file_name = Some(read_field(field.data, &name)?);
            },
            FIELD_APIKEY if form.apikey.is_none() => {
                form.apikey = Some(read_field(field.data, &name)?);
            },
            _ => {
                debug!("skipping form field {}", name);
            },
        }
    }
    Ok(form)
}

/// Build a `multipart/form-data` body. Each part is `(name, filename, content)`.
#[cfg(test)]
pub(crate) fn form_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut b: Vec<u8> = vec!();
    for (name, filename, content) in parts {
        b.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match filename {
            Some(v) => {
                b.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n", name, v).as_bytes());
                b.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            },
            None => {
                b.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes());
            },
        }
        b.extend_from_slice(b"\r\n");
        b.extend_from_slice(content);
        b.extend_from_slice(b"\r\n");
    }
    b.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    b
}

/// Records the most files seen in the store's files directory between reads.
#[cfg(test)]
pub(crate) struct WatchDir<'a, R> {
    pub inner: R,
    pub store: &'a Store,
    pub most: &'a std::cell::Cell<usize>,
}

#[cfg(test)]
impl<R: Read> Read for WatchDir<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = std::fs::read_dir(self.store.files_dir())?
            .filter(|e| e.as_ref().map(|v| v.path().is_file()).unwrap_or(false))
            .count();
        if n > self.most.get() {
            self.most.set(n);
        }
        let end = buf.len().min(4096);
        self.inner.read(&mut buf[..end])
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs::{
        read,
        read_dir,
    };
    use tempfile::tempdir;
    use super::{
        boundary,
        form_body,
        read_form,
        Payload,
        WatchDir,
        DEFAULT_UPLOAD_LIMIT,
        FIELD_LIMIT,
    };
    use crate::digest::digest_hex;
    use crate::record::{
        Store,
        RequestErrorType,
    };

    const CT: &str = "multipart/form-data; boundary=xyzzy";

    fn staged(store: &Store) -> usize {
        read_dir(store.files_dir()).unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_file())
            .count()
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary(CT).unwrap(), "xyzzy");
        assert!(boundary("multipart/form-data").is_none());
        assert!(boundary("application/json").is_none());
        assert!(boundary("garbage").is_none());
    }

    #[test]
    fn test_read_form() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let body = form_body("xyzzy", &[
            ("file", Some("foo.txt"), b"foobar"),
            ("versioned", None, b"on"),
            ("fileName", None, b"my name.txt"),
            ("apikey", None, b"secret"),
        ]);
        let form = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |_| false).unwrap();
        assert!(form.is_versioned());
        assert_eq!(form.file_name.as_deref(), Some("my name.txt"));
        assert_eq!(form.apikey.as_deref(), Some("secret"));

        let part = form.file.unwrap();
        assert_eq!(part.digest, digest_hex(b"foobar"));
        assert_eq!(part.size, 6);
        assert_eq!(part.filename, "foo.txt");
        match &part.content {
            Payload::Buffered(v) => assert_eq!(v, b"foobar"),
            Payload::Staged(_) => panic!("content staged before key was seen"),
        }
        assert_eq!(staged(&store), 0);

        let f = part.stage(&store).unwrap();
        assert_eq!(read(f.path()).unwrap(), b"foobar".to_vec());
        assert_eq!(staged(&store), 1);
    }

    #[test]
    fn test_read_form_streams_after_key() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let body = form_body("xyzzy", &[
            ("apikey", None, b"secret"),
            ("file", Some("foo.txt"), b"foobar"),
        ]);
        let form = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |k| k == "secret").unwrap();
        let part = form.file.unwrap();
        match &part.content {
            Payload::Staged(f) => assert_eq!(read(f.path()).unwrap(), b"foobar".to_vec()),
            Payload::Buffered(_) => panic!("accepted key should stream to disk"),
        }
        assert_eq!(staged(&store), 1);
    }

    #[test]
    fn test_read_form_file_before_refused_key() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let content = vec![0x2a; 200000];
        let body = form_body("xyzzy", &[
            ("file", Some("foo.bin"), &content),
            ("apikey", None, b"wrong"),
        ]);
        let seen = Cell::new(0);
        let watched = WatchDir {
            inner: &body[..],
            store: &store,
            most: &seen,
        };
        let form = read_form(watched, Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |k| k == "secret").unwrap();
        assert_eq!(seen.get(), 0);
        assert_eq!(staged(&store), 0);
        assert!(matches!(form.file.unwrap().content, Payload::Buffered(_)));
    }

    #[test]
    fn test_read_form_first_value_wins() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let body = form_body("xyzzy", &[
            ("versioned", None, b"off"),
            ("versioned", None, b"on"),
            ("file", Some("a.txt"), b"first"),
            ("file", Some("b.txt"), b"second"),
        ]);
        let form = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |_| true).unwrap();
        assert!(!form.is_versioned());
        let part = form.file.unwrap();
        assert_eq!(part.filename, "a.txt");
        assert_eq!(read(part.stage(&store).unwrap().path()).unwrap(), b"first".to_vec());
        assert_eq!(staged(&store), 1);
    }

    #[test]
    fn test_read_form_file_without_filename() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let body = form_body("xyzzy", &[
            ("file", None, b"just a value"),
            ("apikey", None, b"secret"),
        ]);
        let form = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |_| true).unwrap();
        assert!(form.file.is_none());
        assert_eq!(staged(&store), 0);
    }

    #[test]
    fn test_read_form_refuses_key_before_content() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let body = form_body("xyzzy", &[
            ("apikey", None, b"wrong"),
            ("file", Some("foo.txt"), b"foobar"),
        ]);
        let e = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |k| k == "secret").err().unwrap();
        assert_eq!(e.typ, RequestErrorType::AuthError);
        assert_eq!(staged(&store), 0);
    }

    #[test]
    fn test_read_form_field_too_long() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let key = vec![b'k'; FIELD_LIMIT as usize + 1];
        let body = form_body("xyzzy", &[
            ("apikey", None, &key),
            ("file", Some("foo.txt"), b"foobar"),
        ]);
        let e = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |_| true).err().unwrap();
        assert_eq!(e.typ, RequestErrorType::InputError);

        let key = vec![b'k'; FIELD_LIMIT as usize];
        let body = form_body("xyzzy", &[
            ("apikey", None, &key),
        ]);
        let form = read_form(&body[..], Some(CT), DEFAULT_UPLOAD_LIMIT, &store, |_| true).unwrap();
        assert_eq!(form.apikey.unwrap().len(), FIELD_LIMIT as usize);
    }

    #[test]
    fn test_read_form_not_multipart() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let e = read_form(&b"foo"[..], Some("text/plain"), DEFAULT_UPLOAD_LIMIT, &store, |_| true).err().unwrap();
        assert_eq!(e.typ, RequestErrorType::InputError);
        let e = read_form(&b"foo"[..], None, DEFAULT_UPLOAD_LIMIT, &store, |_| true).err().unwrap();
        assert_eq!(e.typ, RequestErrorType::InputError);
    }

    #[test]
    fn test_read_form_over_limit() {
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();

        let content = vec![0x2a; 4096];
        let body = form_body("xyzzy", &[
            ("file", Some("big.bin"), &content),
            ("apikey", None, b"secret"),
        ]);
        let r = read_form(&body[..], Some(CT), 1024, &store, |_| true);
        assert!(r.is_err());
        assert_eq!(staged(&store), 0);
    }
}
