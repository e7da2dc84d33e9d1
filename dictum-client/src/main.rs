//! DICTUM client command line.
//!
//! ```text
//! dictum-client --config client.toml login <api-key> <user-id> [role...]
//! dictum-client --config client.toml <entity> <action> [subname] [json-body]
//! ```

use dictum_client::{CancellationToken, ClientConfig, ClientError, Dispatcher};
use dictum_core::{ImportRequest, Operation, Outcome, RequestEnvelope};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dictum_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn positional_args() -> Vec<String> {
    let mut out = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
        } else {
            out.push(arg);
        }
    }
    out
}

fn usage() -> ClientError {
    ClientError::Config(dictum_client::ConfigError::InvalidValue {
        field: "arguments",
        reason: "usage: <entity> <action> [subname] [json-body] | login <api-key> <user-id> [role...]"
            .to_string(),
    })
}

async fn run() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    let dispatcher = with_redirect_notice(Dispatcher::from_config(&config)?, &config);
    let args = positional_args();

    if args.first().map(String::as_str) == Some("login") {
        let (api_key, user_id) = match (args.get(1), args.get(2)) {
            (Some(key), Some(user)) => (key, user),
            _ => return Err(usage()),
        };
        let session = dispatcher.login(api_key, user_id, &args[3..]).await?;
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    let (entity, action) = match (args.first(), args.get(1)) {
        (Some(entity), Some(action)) => (entity, action),
        _ => return Err(usage()),
    };
    let operation: Operation = action.parse().map_err(|_| usage())?;
    // A trailing JSON argument is the body; anything else is the subname.
    let (subname, body) = match &args[2..] {
        [] => (None, None),
        [one] if one.trim_start().starts_with('{') => (None, Some(one)),
        [one] => (Some(one.as_str()), None),
        [sub, json, ..] => (Some(sub.as_str()), Some(json)),
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let outcome = if operation == Operation::Import {
        let request: ImportRequest = match body {
            Some(json) => serde_json::from_str(json)?,
            None => return Err(usage()),
        };
        let import_proc = subname.ok_or_else(usage)?;
        dispatcher
            .import(entity, import_proc, &request, &cancel)
            .await?
            .map(|summary| serde_json::to_value(summary).unwrap_or_default())
    } else {
        let envelope: RequestEnvelope = match body {
            Some(json) => serde_json::from_str(json)?,
            None => RequestEnvelope::new(),
        };
        dispatcher
            .dispatch(entity, operation, subname, &envelope, &cancel)
            .await?
    };

    match outcome {
        Outcome::Completed(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Outcome::Cancelled => eprintln!("cancelled"),
        Outcome::NotPerformed => println!("null"),
    }
    Ok(())
}

/// Print where to log in once the session is given up.
fn with_redirect_notice(dispatcher: Dispatcher, config: &ClientConfig) -> Dispatcher {
    match &config.login_redirect_url {
        Some(url) => dispatcher.with_login_redirect(url.clone(), |login_url| {
            eprintln!("session expired; log in again at {}", login_url);
        }),
        None => dispatcher,
    }
}
