//! INI configuration loading.
//!
//! Forwarder options live in an `[opentsdb]` section and statname options in
//! an optional `[names]` section:
//!
//! ```ini
//! [opentsdb]
//! host = tsdb.internal
//! port = 4242
//! max_reconnects = 60
//! reconnect_delay = 1
//! backoff_factor = 1.5
//! backoff_max = 60
//! tags = env=prod dc=east
//!
//! [names]
//! prefix = servers
//! host_trim = .example.com
//! ```

use std::{fs, path::Path, str::FromStr};

use ini::{Ini, Properties};

use crate::{error::ForwarderError, forwarder::ForwarderBuilder, naming::HostNamer};

const FORWARDER_SECTION: &str = "opentsdb";
const NAMES_SECTION: &str = "names";

impl ForwarderBuilder {
    /// Load a builder from the INI file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::Io`] when the file cannot be read and
    /// [`ForwarderError::InvalidConfig`] when it cannot be parsed.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ForwarderError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_ini_str(&text).map_err(|err| match err {
            ForwarderError::InvalidConfig(msg) => {
                ForwarderError::InvalidConfig(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Load a builder from INI text.
    ///
    /// Missing keys keep the builder defaults. Values are validated again
    /// when the forwarder is built.
    pub fn from_ini_str(text: &str) -> Result<Self, ForwarderError> {
        let ini = Ini::load_from_str(text)
            .map_err(|err| ForwarderError::InvalidConfig(format!("invalid ini: {err}")))?;
        let mut builder = ForwarderBuilder::new();
        if let Some(section) = ini.section(Some(FORWARDER_SECTION)) {
            builder = apply_forwarder_section(builder, section)?;
        }
        if let Some(section) = ini.section(Some(NAMES_SECTION)) {
            builder = builder.with_namer(parse_namer(section));
        }
        Ok(builder)
    }
}

fn apply_forwarder_section(
    mut builder: ForwarderBuilder,
    section: &Properties,
) -> Result<ForwarderBuilder, ForwarderError> {
    if let Some(debug) = section.get("debug") {
        builder = builder.with_debug(parse_bool("debug", debug)?);
    }
    let host = section.get("host").or_else(|| section.get("ip"));
    let port = parse_opt::<u16>(section, "port")?;
    if host.is_some() || port.is_some() {
        let defaults = crate::forwarder::ConnectionTarget::default();
        builder = builder.with_target(
            host.map_or(defaults.host, str::to_owned),
            port.unwrap_or(defaults.port),
        );
    }
    if let Some(attempts) = parse_opt::<i64>(section, "max_reconnects")? {
        builder = builder.with_max_attempts(attempts);
    }
    if let Some(delay) = parse_opt::<f64>(section, "reconnect_delay")? {
        builder = builder.with_reconnect_delay_secs(delay);
    }
    if let Some(factor) = parse_opt::<f64>(section, "backoff_factor")? {
        builder = builder.with_backoff_factor(factor);
    }
    if let Some(max) = parse_opt::<f64>(section, "backoff_max")? {
        builder = builder.with_backoff_max_secs(max);
    }
    if let Some(timeout) = parse_opt::<f64>(section, "connect_timeout")? {
        builder = builder.with_connect_timeout_secs(timeout);
    }
    if let Some(timeout) = parse_opt::<f64>(section, "write_timeout")? {
        builder = builder.with_write_timeout_secs(timeout);
    }
    if let Some(tags) = section.get("tags") {
        builder = builder.with_tags(split_list(tags));
    }
    Ok(builder)
}

fn parse_namer(section: &Properties) -> HostNamer {
    let mut namer = HostNamer::new();
    if let Some(prefix) = section.get("prefix") {
        namer = namer.with_prefix(prefix.trim());
    }
    if let Some(postfix) = section.get("postfix") {
        namer = namer.with_postfix(postfix.trim());
    }
    if let Some(domains) = section.get("host_trim") {
        namer = namer.with_host_trim(split_list(domains));
    }
    namer
}

fn parse_opt<T: FromStr>(section: &Properties, key: &str) -> Result<Option<T>, ForwarderError> {
    section
        .get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                ForwarderError::InvalidConfig(format!("{key} has invalid value {raw:?}"))
            })
        })
        .transpose()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ForwarderError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ForwarderError::InvalidConfig(format!(
            "{key} has invalid boolean {raw:?}"
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
