use std::process;
use std::sync::Arc;
use std::thread;

use tiny_http::{
    Server,
    Request,
};

mod arg;

use arg::Settings;

use shelf::auth::{
    Authorizer,
    EnvKeys,
};
use shelf::record::{
    Store,
    RequestErrorType,
};
use shelf::request::Endpoint;
use shelf::response::exec_response;

use log::{debug, info, error};

fn serve(endpoint: &Endpoint, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_string();
    let remote = format!("{:?}", req.remote_addr());
    let content_type = req.headers().iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());
    let body_length = req.body_length();

    let r = endpoint.process(&method, &url, content_type.as_deref(), body_length, req.as_reader());
    if let Err(e) = &r {
        match e.typ {
            RequestErrorType::ReadError | RequestErrorType::WriteError => {
                error!("{} {} failed: {}", method, url, e);
            },
            _ => {
                debug!("{} {} refused: {}", method, url, e);
            },
        }
    }

    let status = exec_response(req, r);
    info!("{} {} {} {}", remote, method, url, status.0);
}

fn main() {
    env_logger::init();

    let settings = match Settings::from_args() {
        Ok(v) => v,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        },
    };

    let store = Store::new(&settings.root);
    if let Err(e) = store.prepare() {
        error!("cannot prepare store in {:?}: {}", &settings.root, e);
        process::exit(1);
    }
    let auth = Authorizer::new(EnvKeys::new(&settings.keys_var));
    let endpoint = Arc::new(Endpoint::new(store, auth, settings.max_upload));

    let addr = format!("{}:{}", settings.host, settings.port);
    let srv = match Server::http(&addr) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            error!("cannot listen on {}: {}", addr, e);
            process::exit(1);
        },
    };
    info!("started server on {} serving {:?}", addr, endpoint.store().files_dir());

    let mut workers = vec!();
    for i in 0..settings.workers {
        let srv = srv.clone();
        let endpoint = endpoint.clone();
        workers.push(thread::spawn(move || {
            loop {
                match srv.recv() {
                    Ok(req) => serve(&endpoint, req),
                    Err(e) => {
                        error!("worker {} stopped: {}", i, e);
                        break;
                    },
                }
            }
        }));
    }
    for w in workers {
        if w.join().is_err() {
            error!("worker panicked");
        }
    }
}
