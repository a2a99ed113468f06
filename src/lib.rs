#![crate_name = "shelf"]

//! shelf is a minimal content-delivery HTTP server.
//!
//! Files are uploaded with a `multipart/form-data` `POST` to `/upload` and stored in one of two
//! ways:
//!
//! * As a _latest_ file, under its sanitized filename. Uploading again under the same name
//!   replaces the content. These are served at `/files/latest/<name>`.
//! * As a _versioned_ file, under the SHA256 hash of the content, in hex, lowercase, without a 0x
//!   prefix. The same content always gets the same hash, and stored content never changes.
//!   These are served at `/files/versioned/<hash>/<name>`, where `<name>` is only used as the
//!   suggested filename for the download.
//!
//! ## Upload form
//!
//! | field | |
//! |---|---|
//! | `file` | the content, required |
//! | `apikey` | upload key, required, see [auth](crate::auth) |
//! | `versioned` | `on` to store a versioned file |
//! | `fileName` | display name, defaults to the filename of the `file` part |
//!
//! A successful upload answers with a page linking to the stored file.
//!
//! ## Running the daemon
//!
//! The port is taken from the `CDN_PORT` environment variable or `--port`, and files are kept
//! below `files/` in the current directory unless `--root` says otherwise. Upload keys are read
//! from `API_KEYS`, separated by `;`. See `cargo run -- --help` for details.
//!
//! ``` ignore,
//! CDN_PORT=8000 API_KEYS='foo;bar' shelf
//! curl -F apikey=foo -F versioned=on -F file=@foo.txt http://localhost:8000/upload
//! ```

/// Check upload keys against an allow-list.
pub mod auth;

/// Content identifiers.
pub mod digest;

/// Turn client supplied filenames into safe path segments.
pub mod name;

/// The on-disk layout of both stores.
pub mod record;

/// Read the upload form.
pub mod upload;

/// Static pages.
pub mod page;

/// Route and handle an incoming request.
pub mod request;

/// Encapsulates an outgoing response to remote.
pub mod response;
