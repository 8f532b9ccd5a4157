//! Decoding of docker/podman CLI JSON output into [`Container`] values.

use crate::types::{Container, PortMapping};
use crate::{Result, RuntimeError};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

const SHORT_ID_LEN: usize = 12;

pub(crate) fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(|x| x.as_str()).unwrap_or("")
}

/// Accepts RFC 3339, docker's `2024-05-01 10:00:00 +0000 UTC`, or unix seconds.
fn parse_created(v: Option<&Value>) -> Option<DateTime<Utc>> {
    match v? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            let head: Vec<&str> = s.split_whitespace().take(3).collect();
            DateTime::parse_from_str(&head.join(" "), "%Y-%m-%d %H:%M:%S %z")
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn labels_from_map(v: Option<&Value>) -> BTreeMap<String, String> {
    v.and_then(|x| x.as_object())
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or("").to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// `a=b,c=d` as printed by `docker ps`.
fn labels_from_csv(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect()
}

/// `0.0.0.0:8080->3000/tcp, :::8080->3000/tcp, 7681/tcp` as printed by `docker ps`.
/// Unpublished ports and the duplicate IPv6 binding are dropped.
pub(crate) fn ports_from_docker_summary(s: &str) -> Vec<PortMapping> {
    let mut out: Vec<PortMapping> = Vec::new();
    for part in s.split(',').map(str::trim) {
        let Some((host, container)) = part.split_once("->") else {
            continue;
        };
        let host_port = host.rsplit(':').next().and_then(|p| p.parse::<u16>().ok());
        let (cport, proto) = container.split_once('/').unwrap_or((container, "tcp"));
        let (Some(host_port), Ok(container_port)) = (host_port, cport.parse::<u16>()) else {
            continue;
        };
        let mapping = PortMapping {
            host_port,
            container_port,
            protocol: proto.to_string(),
        };
        if !out.contains(&mapping) {
            out.push(mapping);
        }
    }
    out
}

/// Podman reports `{host_port, container_port, range, protocol}`; a range expands to consecutive ports.
fn ports_from_podman(v: Option<&Value>) -> Vec<PortMapping> {
    let mut out = Vec::new();
    for entry in v.and_then(|x| x.as_array()).into_iter().flatten() {
        let host = entry.get("host_port").and_then(|x| x.as_u64()).unwrap_or(0);
        let container = entry
            .get("container_port")
            .and_then(|x| x.as_u64())
            .unwrap_or(0);
        let range = entry.get("range").and_then(|x| x.as_u64()).unwrap_or(1);
        let proto = entry
            .get("protocol")
            .and_then(|x| x.as_str())
            .unwrap_or("tcp");
        if host == 0 {
            continue;
        }
        for i in 0..range {
            let (Ok(h), Ok(c)) = (u16::try_from(host + i), u16::try_from(container + i)) else {
                break;
            };
            out.push(PortMapping {
                host_port: h,
                container_port: c,
                protocol: proto.to_string(),
            });
        }
    }
    out
}

/// One JSON object per line, from `docker ps --format '{{json .}}'`.
pub(crate) fn parse_docker_ps(stdout: &str) -> Result<Vec<Container>> {
    let mut out = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let v: Value = serde_json::from_str(line)
            .map_err(|e| RuntimeError::parse("container list", e.to_string()))?;
        let name = str_field(&v, "Names")
            .split(',')
            .next()
            .unwrap_or("")
            .to_string();
        out.push(Container {
            id: short_id(str_field(&v, "ID")),
            name,
            image: str_field(&v, "Image").to_string(),
            status: str_field(&v, "Status").to_string(),
            created: parse_created(v.get("CreatedAt")),
            ports: ports_from_docker_summary(str_field(&v, "Ports")),
            labels: labels_from_csv(str_field(&v, "Labels")),
        });
    }
    Ok(out)
}

/// A single JSON array, from `podman ps --format json`.
pub(crate) fn parse_podman_ps(stdout: &str) -> Result<Vec<Container>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<Value> = serde_json::from_str(stdout)
        .map_err(|e| RuntimeError::parse("container list", e.to_string()))?;
    Ok(entries
        .iter()
        .map(|v| {
            let name = v
                .get("Names")
                .and_then(|n| n.as_array())
                .and_then(|n| n.first())
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string();
            let status = match str_field(v, "Status") {
                "" => str_field(v, "State"),
                s => s,
            };
            Container {
                id: short_id(str_field(v, "Id")),
                name,
                image: str_field(v, "Image").to_string(),
                status: status.to_string(),
                created: parse_created(v.get("Created")),
                ports: ports_from_podman(v.get("Ports")),
                labels: labels_from_map(v.get("Labels")),
            }
        })
        .collect())
}

/// Output of `<cli> inspect <id>`, a JSON array whose first element describes the container.
pub(crate) fn parse_inspect(stdout: &str, id_or_name: &str) -> Result<Container> {
    let entries: Vec<Value> = serde_json::from_str(stdout)
        .map_err(|e| RuntimeError::parse("container inspect", e.to_string()))?;
    let v = entries
        .first()
        .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))?;
    let config = v.get("Config").cloned().unwrap_or(Value::Null);

    let mut ports = Vec::new();
    if let Some(map) = v.pointer("/NetworkSettings/Ports").and_then(|p| p.as_object()) {
        for (key, bindings) in map {
            let (cport, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let Ok(container_port) = cport.parse::<u16>() else {
                continue;
            };
            for b in bindings.as_array().into_iter().flatten() {
                if let Ok(host_port) = str_field(b, "HostPort").parse::<u16>() {
                    let mapping = PortMapping {
                        host_port,
                        container_port,
                        protocol: proto.to_string(),
                    };
                    if !ports.contains(&mapping) {
                        ports.push(mapping);
                    }
                }
            }
        }
    }
    ports.sort_by_key(|p| (p.host_port, p.container_port));

    Ok(Container {
        id: short_id(str_field(v, "Id")),
        name: str_field(v, "Name").trim_start_matches('/').to_string(),
        image: str_field(&config, "Image").to_string(),
        status: v
            .pointer("/State/Status")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_string(),
        created: parse_created(v.get("Created")),
        ports,
        labels: labels_from_map(config.get("Labels")),
    })
}
