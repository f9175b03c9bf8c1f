//! Turns the command line into the set of canister to port bindings.
//!
//! Arguments are scanned once, front to back. Known flags take the token
//! after them as their value; everything else is collected and reported.
//! Bindings given by canister name are resolved through the canister ids
//! file only after the whole command line has been read, so flag order
//! never matters.

use std::{fmt, path::PathBuf};

use http::Uri;

use crate::lookup::{CanisterIds, LookupError};

pub const USAGE: &str = "USAGE: proxy --replica-host http://... [<canister-id>:<port>]";

const HELP: &str = "--help";
const REPLICA_HOST: &str = "--replica-host";
const CANISTER_IDS_FILE: &str = "--canister-ids-file";
const BY_ID: &str = "--by-id";
const BY_NAME: &str = "--by-name";

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("missing value for '{0}'")]
    MissingValue(&'static str),
    #[error("'{0}' given more than once")]
    Repeated(&'static str),
    #[error("could not parse '{0}'")]
    MalformedBinding(String),
    #[error("could not parse port '{0}' as number")]
    InvalidPort(String),
    #[error("port 0 in '{0}' is not a fixed port")]
    ZeroPort(String),
    #[error("unknown arguments ({}): {}", .0.len(), .0.join(" "))]
    UnknownArguments(Vec<String>),
    #[error("canister '{canister_id}' is mapped to both port {first} and port {second}")]
    DuplicateCanister {
        canister_id: String,
        first: u16,
        second: u16,
    },
    #[error("port {port} is assigned to both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },
    #[error("no canister ids file given to resolve '{0}'")]
    NoCanisterIdsFile(String),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("could not find canister id for '{name}' (port {port})")]
    UnknownName { name: String, port: u16 },
    #[error(
        "'{name}:{port}' resolves to canister '{canister_id}', which is already forwarded on port {existing_port}"
    )]
    NameConflict {
        name: String,
        port: u16,
        canister_id: String,
        existing_port: u16,
    },
    #[error("no services to proxy")]
    NoServices,
    #[error("no upstream to proxy to")]
    NoUpstream,
    #[error("could not parse replica host '{0}'")]
    ReplicaHost(String),
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Run(ProxyConfig),
}

/// A canister and the local port it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub canister_id: String,
    pub port: u16,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.canister_id, self.port)
    }
}

/// Validated result of the command line. Never empty, and no canister or
/// port appears twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    replica_host: String,
    bindings: Vec<Binding>,
}

impl ProxyConfig {
    pub fn replica_host(&self) -> &str {
        &self.replica_host
    }

    /// Bindings given by id in argument order, followed by the resolved name
    /// bindings in argument order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

#[derive(Debug)]
struct NamedBinding {
    name: String,
    port: u16,
}

#[derive(Debug, Default)]
struct RawArgs {
    replica_host: Option<String>,
    canister_ids_file: Option<PathBuf>,
    by_id: Vec<Binding>,
    by_name: Vec<NamedBinding>,
    unknown: Vec<String>,
}

#[derive(Debug, Default)]
struct BindingSet {
    bindings: Vec<Binding>,
}

impl BindingSet {
    fn port_of(&self, canister_id: &str) -> Option<u16> {
        self.bindings
            .iter()
            .find(|binding| binding.canister_id == canister_id)
            .map(|binding| binding.port)
    }

    fn insert(&mut self, binding: Binding) -> Result<(), MappingError> {
        if let Some(first) = self.port_of(&binding.canister_id) {
            return Err(MappingError::DuplicateCanister {
                canister_id: binding.canister_id,
                first,
                second: binding.port,
            });
        }

        if let Some(holder) = self.bindings.iter().find(|held| held.port == binding.port) {
            return Err(MappingError::DuplicatePort {
                port: binding.port,
                first: holder.canister_id.clone(),
                second: binding.canister_id,
            });
        }

        self.bindings.push(binding);
        Ok(())
    }
}

/// Parses the arguments that follow the program name.
///
/// `--help` anywhere wins over everything else, including arguments that
/// would otherwise be errors.
pub fn parse_args<I, S>(args: I) -> Result<Command, MappingError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();

    if args.iter().any(|arg| arg == HELP) {
        return Ok(Command::Help);
    }

    let raw = scan(args)?;

    if !raw.unknown.is_empty() {
        return Err(MappingError::UnknownArguments(raw.unknown));
    }

    resolve(raw).map(Command::Run)
}

fn scan(args: Vec<String>) -> Result<RawArgs, MappingError> {
    let mut raw = RawArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let flag = match arg.as_str() {
            REPLICA_HOST => Some(REPLICA_HOST),
            CANISTER_IDS_FILE => Some(CANISTER_IDS_FILE),
            BY_ID => Some(BY_ID),
            BY_NAME => Some(BY_NAME),
            _ => None,
        };

        let Some(flag) = flag else {
            raw.unknown.push(arg);
            continue;
        };

        let value = args.next().ok_or(MappingError::MissingValue(flag))?;

        match flag {
            REPLICA_HOST => {
                if raw.replica_host.replace(value).is_some() {
                    return Err(MappingError::Repeated(REPLICA_HOST));
                }
            }
            CANISTER_IDS_FILE => {
                if raw.canister_ids_file.replace(value.into()).is_some() {
                    return Err(MappingError::Repeated(CANISTER_IDS_FILE));
                }
            }
            BY_ID => {
                let (canister_id, port) = parse_binding(&value)?;
                raw.by_id.push(Binding { canister_id, port });
            }
            _ => {
                let (name, port) = parse_binding(&value)?;
                raw.by_name.push(NamedBinding { name, port });
            }
        }
    }

    Ok(raw)
}

/// Splits `<key>:<port>`.
fn parse_binding(value: &str) -> Result<(String, u16), MappingError> {
    let mut segments = value.split(':');

    let (Some(key), Some(port), None) = (segments.next(), segments.next(), segments.next()) else {
        return Err(MappingError::MalformedBinding(value.to_owned()));
    };

    if key.is_empty() {
        return Err(MappingError::MalformedBinding(value.to_owned()));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| MappingError::InvalidPort(port.to_owned()))?;

    if port == 0 {
        return Err(MappingError::ZeroPort(value.to_owned()));
    }

    Ok((key.to_owned(), port))
}

fn resolve(raw: RawArgs) -> Result<ProxyConfig, MappingError> {
    let mut set = BindingSet::default();

    for binding in raw.by_id {
        set.insert(binding)?;
    }

    if let Some(first) = raw.by_name.first() {
        let path = raw
            .canister_ids_file
            .ok_or_else(|| MappingError::NoCanisterIdsFile(first.name.clone()))?;
        let canister_ids = CanisterIds::load(&path)?;

        tracing::debug!(
            "loaded {} canister ids from {}",
            canister_ids.len(),
            path.display()
        );

        for NamedBinding { name, port } in raw.by_name {
            let Some(canister_id) = canister_ids.resolve(&name) else {
                return Err(MappingError::UnknownName { name, port });
            };

            if let Some(existing_port) = set.port_of(canister_id) {
                return Err(MappingError::NameConflict {
                    canister_id: canister_id.to_owned(),
                    name,
                    port,
                    existing_port,
                });
            }

            set.insert(Binding {
                canister_id: canister_id.to_owned(),
                port,
            })?;
        }
    }

    if set.bindings.is_empty() {
        return Err(MappingError::NoServices);
    }

    let replica_host = raw.replica_host.ok_or(MappingError::NoUpstream)?;
    validate_replica_host(&replica_host)?;

    Ok(ProxyConfig {
        replica_host,
        bindings: set.bindings,
    })
}

fn validate_replica_host(replica_host: &str) -> Result<(), MappingError> {
    let uri: Uri = replica_host
        .parse()
        .map_err(|_| MappingError::ReplicaHost(replica_host.to_owned()))?;

    if uri.scheme_str() != Some("http") || uri.authority().is_none() {
        return Err(MappingError::ReplicaHost(replica_host.to_owned()));
    }

    Ok(())
}
