use std::str::FromStr;

use log::{debug, error};

use tiny_http::{
    StatusCode,
    Request,
    Response,
    ResponseBox,
    Header,
    HeaderField,
};
use ascii::AsciiString;

use crate::record::{
    RequestError,
    RequestErrorType,
};
use crate::request::{
    RequestResult,
    RequestResultType,
};

fn header(field: &str, value: &str) -> Option<Header> {
    let field = HeaderField::from_str(field).ok()?;
    let value = AsciiString::from_ascii(value).ok()?;
    Some(Header {
        field,
        value,
    })
}

/// Cross-origin headers sent with every response.
pub fn origin_headers() -> Vec<Header> {
    let server_header_v = format!("shelf/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    [
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
        ("Server", server_header_v.as_str()),
    ].iter()
        .filter_map(|(k, v)| header(k, v))
        .collect()
}

pub fn status_for(typ: RequestErrorType) -> StatusCode {
    match typ {
        RequestErrorType::InputError => StatusCode(400),
        RequestErrorType::AuthError => StatusCode(401),
        RequestErrorType::RecordError => StatusCode(404),
        RequestErrorType::MethodError => StatusCode(405),
        RequestErrorType::ReadError => StatusCode(500),
        RequestErrorType::WriteError => StatusCode(500),
    }
}

/// Content headers for a successful result, apart from the length.
pub fn content_headers(r: &RequestResult) -> Vec<Header> {
    let mut headers: Vec<Header> = vec!();
    if let Some(m) = &r.m {
        headers.extend(header("Content-Type", m.as_ref()));
    }
    if let Some(n) = &r.n {
        let s = format!("attachment; filename={}", n);
        match header("Content-Disposition", &s) {
            Some(v) => headers.push(v),
            None => {
                error!("cannot send attachment name {:?}", n);
            },
        }
        headers.extend(header("Content-Transfer-Encoding", "binary"));
    }
    headers
}

/// Render the outcome of a request. Errors become a bare status code.
///
/// Bodies of known length are never sent chunked, so downloads always carry `Content-Length`.
pub fn build_response(r: Result<RequestResult, RequestError>) -> ResponseBox {
    let res = match r {
        Ok(v) => {
            let headers = content_headers(&v);
            let mut res = match v.typ {
                RequestResultType::Preflight => {
                    Response::empty(StatusCode(200)).boxed()
                },
                _ => match (v.f, v.v) {
                    (Some(f), _) => Response::from_file(f).boxed(),
                    (None, Some(s)) => Response::from_data(s.into_bytes()).boxed(),
                    (None, None) => Response::empty(StatusCode(200)).boxed(),
                },
            };
            for h in headers {
                res.add_header(h);
            }
            res
        },
        Err(e) => {
            Response::empty(status_for(e.typ)).boxed()
        },
    };
    // boxed() resets the threshold, so it is set on the boxed response.
    let mut res = res.with_chunked_threshold(usize::MAX);
    for h in origin_headers() {
        res.add_header(h);
    }
    res
}

/// Respond to `req` and return the status code sent.
pub fn exec_response(req: Request, r: Result<RequestResult, RequestError>) -> StatusCode {
    let status = match &r {
        Ok(_) => StatusCode(200),
        Err(e) => status_for(e.typ),
    };
    let res = build_response(r);
    match req.respond(res) {
        Ok(_) => {
            debug!("responded {}", status.0);
        },
        Err(e) => {
            error!("cannot send response: {}", e);
        },
    };
    status
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::{
        Read,
        Write,
    };
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;
    use tempfile::{
        tempdir,
        NamedTempFile,
    };
    use tiny_http::{
        Method,
        Server,
    };
    use super::{
        content_headers,
        exec_response,
        origin_headers,
        status_for,
    };
    use crate::auth::{
        Authorizer,
        FixedKeys,
    };
    use crate::digest::digest_hex;
    use crate::record::{
        Store,
        RequestErrorType,
    };
    use crate::request::Endpoint;
    use crate::upload::{
        form_body,
        DEFAULT_UPLOAD_LIMIT,
    };
    use crate::request::{
        RequestResult,
        RequestResultType,
    };

    fn value_of(headers: &[tiny_http::Header], field: &'static str) -> Option<String> {
        headers.iter()
            .find(|h| h.field.equiv(field))
            .map(|h| h.value.as_str().to_string())
    }

    #[test]
    fn test_origin_headers() {
        let h = origin_headers();
        assert_eq!(value_of(&h, "Access-Control-Allow-Origin").unwrap(), "*");
        assert_eq!(value_of(&h, "Access-Control-Allow-Methods").unwrap(), "GET, POST, OPTIONS");
        assert_eq!(value_of(&h, "Access-Control-Allow-Headers").unwrap(), "Content-Type, Authorization");
        assert!(value_of(&h, "Server").unwrap().starts_with("shelf/"));
    }

    #[test]
    fn test_status() {
        assert_eq!(status_for(RequestErrorType::InputError).0, 400);
        assert_eq!(status_for(RequestErrorType::AuthError).0, 401);
        assert_eq!(status_for(RequestErrorType::RecordError).0, 404);
        assert_eq!(status_for(RequestErrorType::MethodError).0, 405);
        assert_eq!(status_for(RequestErrorType::ReadError).0, 500);
        assert_eq!(status_for(RequestErrorType::WriteError).0, 500);
    }

    #[test]
    fn test_attachment_headers() {
        let mut tf = NamedTempFile::new().unwrap();
        tf.write_all(b"foo").unwrap();
        let f = File::open(tf.path()).unwrap();
        let r = RequestResult {
            typ: RequestResultType::Found,
            v: None,
            f: Some(f),
            m: Some(mime::APPLICATION_OCTET_STREAM),
            n: Some(String::from("other name.bin")),
            link: None,
        };
        let h = content_headers(&r);
        assert_eq!(value_of(&h, "Content-Type").unwrap(), "application/octet-stream");
        assert_eq!(value_of(&h, "Content-Disposition").unwrap(), "attachment; filename=other name.bin");
        assert_eq!(value_of(&h, "Content-Transfer-Encoding").unwrap(), "binary");
    }

    #[test]
    fn test_page_headers() {
        let r = RequestResult {
            typ: RequestResultType::Page,
            v: Some(String::from("<html></html>")),
            f: None,
            m: Some(mime::TEXT_HTML_UTF_8),
            n: None,
            link: None,
        };
        let h = content_headers(&r);
        assert_eq!(value_of(&h, "Content-Type").unwrap(), "text/html; charset=utf-8");
        assert!(value_of(&h, "Content-Disposition").is_none());
    }

    #[test]
    fn test_download_has_length() {
        let _ = env_logger::builder().is_test(true).try_init();
        let d = tempdir().unwrap();
        let store = Store::new(d.path());
        store.prepare().unwrap();
        let e = Endpoint::new(store, Authorizer::new(FixedKeys::from_list("secret")), DEFAULT_UPLOAD_LIMIT);

        let content: Vec<u8> = (0..100000u32).map(|i| (i % 251) as u8).collect();
        let body = form_body("xyzzy", &[
            ("apikey", None, b"secret"),
            ("versioned", None, b"on"),
            ("file", Some("big.bin"), &content),
        ]);
        e.process(&Method::Post, "/upload", Some("multipart/form-data; boundary=xyzzy"), Some(body.len()), &body[..]).unwrap();
        let url = format!("/files/versioned/{}/big.bin", digest_hex(&content));
        let r = e.process(&Method::Get, &url, None, None, std::io::empty());

        let srv = Server::http("127.0.0.1:0").unwrap();
        let addr = srv.server_addr();
        let t = thread::spawn(move || {
            let req = srv.recv().unwrap();
            exec_response(req, r).0
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        write!(conn, "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", url).unwrap();

        let mut got: Vec<u8> = vec!();
        let mut buf = [0u8; 4096];
        let head_end = loop {
            if let Some(i) = got.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            let n = conn.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before headers");
            got.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&got[..head_end]).to_lowercase();
        assert!(head.starts_with("http/1.1 200"));
        assert!(head.contains("\r\ncontent-length: 100000\r\n"));
        assert!(!head.contains("transfer-encoding: chunked"));
        assert!(head.contains("\r\ncontent-disposition: attachment; filename=big.bin\r\n"));
        assert!(head.contains("\r\naccess-control-allow-origin: *\r\n"));

        while got.len() - head_end < content.len() {
            let n = conn.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before body");
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&got[head_end..], &content[..]);
        assert_eq!(t.join().unwrap(), 200);
    }
}
