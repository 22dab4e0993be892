//! Disk extraction from libvirt domain XML.
//!
//! Only `<disk device='disk'>` elements count as volumes; cdrom, floppy and
//! lun devices are skipped, as are disks without a source (empty drives).
//!
//! The source locator depends on the disk type:
//!
//! | `<source>`                    | `DiskVolume::source` | `pool`  |
//! |-------------------------------|----------------------|---------|
//! | `file='/path'`                | `/path`              | -       |
//! | `dev='/dev/x'`                | `/dev/x`             | -       |
//! | `pool='p' volume='v'`         | `v`                  | `p`     |
//! | `protocol='rbd' name='p/img'` | `p/img`              | -       |

use crate::types::DiskVolume;

/// Parse the disk volumes out of a domain XML description.
pub fn parse_disks(xml: &str) -> Vec<DiskVolume> {
    let mut disks = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find("<disk") {
        let after = &rest[start..];
        // "<disks" or similar would not be a disk element
        if !after[5..].starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            rest = &after[5..];
            continue;
        }
        let Some(open_end) = after.find('>') else {
            break;
        };
        let open_tag = &after[..open_end];

        // <disk .../> has no children and therefore no source
        if open_tag.ends_with('/') {
            rest = &after[open_end + 1..];
            continue;
        }
        let Some(end) = after.find("</disk>") else {
            break;
        };
        let element = &after[..end];
        rest = &after[end + "</disk>".len()..];

        if attribute(open_tag, "device").unwrap_or("disk") != "disk" {
            continue;
        }
        let target = tag(element, "<target").and_then(|t| attribute(t, "dev")).unwrap_or_default();
        if let Some(volume) = tag(element, "<source").and_then(|t| source(target, t)) {
            disks.push(volume);
        }
    }

    disks
}

fn source(target: &str, tag: &str) -> Option<DiskVolume> {
    if let Some(path) = attribute(tag, "file").or_else(|| attribute(tag, "dev")) {
        return Some(DiskVolume::new(target, path));
    }
    if let Some(volume) = attribute(tag, "volume") {
        let disk = DiskVolume::new(target, volume);
        return Some(match attribute(tag, "pool") {
            Some(pool) => disk.in_pool(pool),
            None => disk,
        });
    }
    attribute(tag, "name").map(|name| DiskVolume::new(target, name))
}

/// Text of the first `<name ...>` start tag inside `element`.
fn tag<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let start = element.find(name)?;
    let section = &element[start..];
    let end = section.find('>')?;
    Some(&section[..end])
}

/// Value of `name='...'` or `name="..."` inside a start tag.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut search = tag;
    loop {
        let idx = search.find(name)?;
        let preceded_by_space =
            idx > 0 && search[..idx].ends_with(|c: char| c.is_whitespace());
        let after = &search[idx + name.len()..];
        if preceded_by_space && after.starts_with('=') {
            let quote = after[1..].chars().next()?;
            if quote != '\'' && quote != '"' {
                return None;
            }
            let value = &after[2..];
            let close = value.find(quote)?;
            return Some(&value[..close]);
        }
        search = after;
    }
}
