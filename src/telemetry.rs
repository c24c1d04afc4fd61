//! Remote system telemetry: RAM, per-drive usage, and boot-media summary.
//!
//! Everything is assembled from three remote commands: `/proc/meminfo` for
//! memory, `df -B1` for per-mount usage, and `lsblk -J` for the block-device
//! tree. FUSE mounts (the union pool among them) never appear in lsblk, so
//! they are appended from the df rows afterwards.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};
use crate::session::Session;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

const DF_COMMAND: &str = "df -B1 --output=source,fstype,size,used,avail,target | tail -n +2";
const LSBLK_COMMAND: &str = "lsblk -J -b -o NAME,TYPE,FSTYPE,LABEL,UUID,SIZE,MOUNTPOINT";

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub ram: UsageSummary,
    pub drives: Vec<DriveSummary>,
    pub boot_media: BootMediaSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_gib: f64,
    pub used_gib: f64,
    pub free_gib: f64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveSummary {
    pub label: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total_gib: f64,
    pub used_gib: f64,
    pub free_gib: f64,
    pub used_percent: f64,
}

/// Boot/root partition usage, keyed off the conventional `rootfs`/`bootfs`
/// labels. Fields stay `None` when the labels are absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootMediaSummary {
    pub root_total_gib: Option<f64>,
    pub root_used_gib: Option<f64>,
    pub boot_total_gib: Option<f64>,
    pub boot_used_gib: Option<f64>,
}

/// One row of `df -B1` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountUsage {
    pub source: String,
    pub fstype: String,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub avail_bytes: u64,
    pub mountpoint: String,
}

#[derive(Debug, Deserialize)]
struct BlockDeviceTree {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, deserialize_with = "de_size")]
    size: u64,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<BlockDevice>,
}

/// lsblk emits sizes as JSON numbers on current util-linux and as quoted
/// strings on older releases; accept both.
fn de_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
        Null,
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => s.trim().parse().unwrap_or(0),
        Raw::Null => 0,
    })
}

/// Flattened block device enriched with usage from the matching df row.
#[derive(Debug, Clone, Default)]
struct DriveNode {
    name: String,
    fstype: Option<String>,
    label: Option<String>,
    size_bytes: u64,
    mountpoint: Option<String>,
    total_bytes: Option<u64>,
    used_bytes: Option<u64>,
    avail_bytes: Option<u64>,
}

pub fn system_info(session: &Session) -> Result<SystemInfo> {
    let transport = session.transport();

    let meminfo = transport.exec("cat /proc/meminfo", Some(COMMAND_TIMEOUT))?;
    let (ram_total, ram_available) = parse_meminfo(&meminfo.stdout);
    let ram_used = ram_total.saturating_sub(ram_available);

    let df = transport.exec(DF_COMMAND, Some(COMMAND_TIMEOUT))?;
    let mounts = parse_df(&df.stdout);

    let lsblk = transport.exec(LSBLK_COMMAND, Some(COMMAND_TIMEOUT))?;
    let tree: BlockDeviceTree = serde_json::from_str(&lsblk.stdout).map_err(|err| {
        GatewayError::Transport(format!("unparseable lsblk output: {err}"))
    })?;

    let drives = collect_drives(&tree, &mounts);

    Ok(SystemInfo {
        ram: UsageSummary {
            total_gib: to_gib(ram_total),
            used_gib: to_gib(ram_used),
            free_gib: to_gib(ram_available),
            used_percent: percent(ram_used, ram_total),
        },
        drives: summarize_drives(&drives),
        boot_media: boot_media_summary(&drives),
    })
}

/// Returns `(MemTotal, MemAvailable)` in bytes from `/proc/meminfo` text.
fn parse_meminfo(text: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key.trim() {
            "MemTotal" => total = kb * 1024,
            "MemAvailable" => available = kb * 1024,
            _ => {}
        }
    }
    (total, available)
}

/// Parses `df -B1` rows. Mountpoints may contain spaces, so everything past
/// the fifth column is re-joined into the target path.
fn parse_df(text: &str) -> Vec<MountUsage> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        rows.push(MountUsage {
            source: parts[0].to_string(),
            fstype: parts[1].to_string(),
            size_bytes: parts[2].parse().unwrap_or(0),
            used_bytes: parts[3].parse().unwrap_or(0),
            avail_bytes: parts[4].parse().unwrap_or(0),
            mountpoint: parts[5..].join(" "),
        });
    }
    rows
}

fn collect_drives(tree: &BlockDeviceTree, mounts: &[MountUsage]) -> Vec<DriveNode> {
    let by_mountpoint: HashMap<&str, &MountUsage> = mounts
        .iter()
        .filter(|m| !m.mountpoint.is_empty())
        .map(|m| (m.mountpoint.as_str(), m))
        .collect();

    let mut drives = Vec::new();
    fn walk(nodes: &[BlockDevice], by_mountpoint: &HashMap<&str, &MountUsage>, out: &mut Vec<DriveNode>) {
        for node in nodes {
            let mut entry = DriveNode {
                name: node.name.clone().unwrap_or_default(),
                fstype: node.fstype.clone(),
                label: node.label.clone(),
                size_bytes: node.size,
                mountpoint: node.mountpoint.clone(),
                ..DriveNode::default()
            };
            if let Some(mp) = entry.mountpoint.as_deref() {
                if let Some(usage) = by_mountpoint.get(mp) {
                    entry.total_bytes = Some(usage.size_bytes);
                    entry.used_bytes = Some(usage.used_bytes);
                    entry.avail_bytes = Some(usage.avail_bytes);
                }
            }
            out.push(entry);
            walk(&node.children, by_mountpoint, out);
        }
    }
    walk(&tree.blockdevices, &by_mountpoint, &mut drives);

    // FUSE mounts (the union pool among them) are not block devices.
    for mount in mounts {
        let already_listed = drives
            .iter()
            .any(|d| d.mountpoint.as_deref() == Some(mount.mountpoint.as_str()));
        if mount.fstype.starts_with("fuse") && !already_listed {
            drives.push(DriveNode {
                name: mount.source.clone(),
                fstype: Some(mount.fstype.clone()),
                label: None,
                size_bytes: mount.size_bytes,
                mountpoint: Some(mount.mountpoint.clone()),
                total_bytes: Some(mount.size_bytes),
                used_bytes: Some(mount.used_bytes),
                avail_bytes: Some(mount.avail_bytes),
            });
        }
    }
    drives
}

/// Concise per-drive list: pseudo-filesystems, unmounted devices, and the
/// boot media's own partitions are excluded. Sorted by mountpoint.
fn summarize_drives(drives: &[DriveNode]) -> Vec<DriveSummary> {
    let mut summary: Vec<DriveSummary> = drives
        .iter()
        .filter_map(|d| {
            let fstype = d.fstype.as_deref()?;
            if matches!(fstype, "tmpfs" | "devtmpfs") {
                return None;
            }
            let mountpoint = d.mountpoint.as_deref()?;
            if d.name.starts_with("mmcblk") {
                return None;
            }
            let total = d.total_bytes.unwrap_or(d.size_bytes);
            let used = d.used_bytes.unwrap_or(0);
            let avail = d.avail_bytes.unwrap_or(0);
            Some(DriveSummary {
                label: d.label.clone().unwrap_or_else(|| d.name.clone()),
                mountpoint: mountpoint.to_string(),
                fstype: fstype.to_string(),
                total_gib: to_gib(total),
                used_gib: to_gib(used),
                free_gib: to_gib(avail),
                used_percent: percent(used, total),
            })
        })
        .collect();
    summary.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
    summary
}

fn boot_media_summary(drives: &[DriveNode]) -> BootMediaSummary {
    let mut boot = BootMediaSummary::default();
    for d in drives {
        match d.label.as_deref() {
            Some("rootfs") => {
                boot.root_total_gib = d.total_bytes.map(to_gib);
                boot.root_used_gib = d.used_bytes.map(to_gib);
            }
            Some("bootfs") => {
                boot.boot_total_gib = d.total_bytes.map(to_gib);
                boot.boot_used_gib = d.used_bytes.map(to_gib);
            }
            _ => {}
        }
    }
    boot
}

fn to_gib(bytes: u64) -> f64 {
    (bytes as f64 / GIB * 100.0).round() / 100.0
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 1000.0).round() / 10.0
}
