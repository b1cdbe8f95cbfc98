use log::{info, warn};
use std::{fs, io, path::Path};

use crate::{
    errors::{Error, Result},
    models::{PortSpec, Protocol},
    services::ManifestFrontend,
};

/// Reads exposed ports out of a Dockerfile. Only `EXPOSE` is interpreted.
pub struct DockerfileFrontend;

impl DockerfileFrontend {
    pub fn new() -> DockerfileFrontend {
        DockerfileFrontend
    }
}

impl ManifestFrontend for DockerfileFrontend {
    fn exposed_ports(&mut self, manifest_path: &Path) -> Result<Vec<PortSpec>> {
        let contents = match fs::read_to_string(manifest_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no manifest at {:?}, exposing no ports", manifest_path);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let ports = parse_exposed_ports(&contents)?;
        info!("found exposed ports: {:?}", ports);

        Ok(ports)
    }
}

pub fn parse_exposed_ports(contents: &str) -> Result<Vec<PortSpec>> {
    let mut ports = Vec::new();

    for (line, instruction) in instructions(contents) {
        let mut words = instruction.split_whitespace();
        let keyword = match words.next() {
            Some(keyword) => keyword,
            None => continue,
        };
        if !keyword.eq_ignore_ascii_case("EXPOSE") {
            continue;
        }

        for word in words {
            if word.contains('$') {
                warn!("skipping unresolved port {:?} on line {}", word, line);
                continue;
            }

            for port in parse_port(word).map_err(|message| Error::Manifest { line, message })? {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
    }

    Ok(ports)
}

/// Joins `\` continuations and drops comment lines. Yields each logical
/// instruction with the line it starts on.
fn instructions(contents: &str) -> Vec<(usize, String)> {
    let mut instructions = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (index, raw) in contents.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && current.is_some()) {
            continue;
        }

        let (text, continues) = match trimmed.strip_suffix('\\') {
            Some(text) => (text, true),
            None => (trimmed, false),
        };

        let (_, buffer) = current.get_or_insert_with(|| (index + 1, String::new()));
        buffer.push(' ');
        buffer.push_str(text);

        if !continues {
            instructions.extend(current.take());
        }
    }

    instructions.extend(current);
    instructions
}

fn parse_port(word: &str) -> Result<Vec<PortSpec>, String> {
    let (range, protocol) = match word.split_once('/') {
        Some((range, protocol)) => (range, protocol),
        None => (word, "tcp"),
    };

    let protocol = match protocol.to_ascii_lowercase().as_str() {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => return Err(format!("unsupported protocol {:?}", other)),
    };

    let number = |text: &str| {
        text.parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| format!("invalid port {:?}", word))
    };

    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (number(start)?, number(end)?),
        None => {
            let port = number(range)?;
            (port, port)
        }
    };

    if start > end {
        return Err(format!("invalid port range {:?}", word));
    }

    Ok((start..=end)
        .map(|port| PortSpec { port, protocol })
        .collect())
}
