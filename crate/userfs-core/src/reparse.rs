//! Resolution of reparse points in paths.
//!
//! Paths use `\` as separator and are absolute within the volume.
//! Indexes into paths are expressed in UTF-16 code units, as the host
//! counts them.

use crate::error::{FsError, FsResult};
use userfs_types::ReparseBuffer;
use userfs_types::reparse::ReparseTag;

/// Number of reparse points a single resolution may go through.
pub const DEFAULT_MAX_REPARSE_HOPS: u32 = 31;

const SEP: u8 = b'\\';

/// Resolve the reparse points of `file_name`.
///
/// `get_reparse_point` is called with successive path prefixes and
/// whether more components follow. It answers with the reparse point
/// at that prefix or [FsError::NotAReparsePoint].
///
/// `reparse_point_index` is a hint: resolution starts at the component
/// containing that index. If `resolve_last` is false, the last
/// component is left as is.
///
/// Only symbolic links are followed; other tags fail with
/// [FsError::ForeignReparseTag]. More than `max_hops` reparse points
/// fail with [FsError::ReparseHopLimit].
pub fn resolve_reparse_points<F>(
    file_name: &str,
    reparse_point_index: usize,
    resolve_last: bool,
    max_hops: u32,
    mut get_reparse_point: F,
) -> FsResult<String>
where
    F: FnMut(&str, bool) -> FsResult<ReparseBuffer>,
{
    let mut path = file_name.to_string();
    let mut pos = component_start(&path, byte_index(&path, reparse_point_index));
    let mut hops = 0;
    loop {
        let bytes = path.as_bytes();
        while pos < bytes.len() && bytes[pos] == SEP {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        let start = pos;
        let end = bytes[start..]
            .iter()
            .position(|b| *b == SEP)
            .map(|i| start + i)
            .unwrap_or(bytes.len());
        let is_last = bytes[end..].iter().all(|b| *b == SEP);
        if is_last && !resolve_last {
            break;
        }

        let reparse = match get_reparse_point(&path[..end], !is_last) {
            Ok(buf) => buf,
            Err(FsError::NotAReparsePoint) => {
                pos = end;
                continue;
            }
            Err(FsError::NotFound) if is_last => return Err(FsError::NotFound),
            Err(err) => {
                log::debug!("{:?}: lookup failed: {err:?}", &path[..end]);

                return Err(FsError::PathNotFound);
            }
        };

        hops += 1;
        if hops > max_hops {
            return Err(FsError::ReparseHopLimit);
        }
        let Some(target) = reparse.symlink_target()? else {
            return Err(FsError::ForeignReparseTag(reparse.tag.0));
        };
        let absolute = target.substitute_name.starts_with('\\');
        if target.substitute_name.is_empty() || target.relative == absolute {
            log::debug!(
                "{:?}: bad symlink {:?} (relative: {})",
                &path[..end],
                target.substitute_name,
                target.relative
            );

            return Err(FsError::InvalidReparseData);
        }
        let target = target.substitute_name;
        log::trace!("{:?} -> {target:?}", &path[..end]);

        let base = if absolute { "\\" } else { &path[..start] };
        let (mut resolved, unchanged) = splice(base, &target);
        let rest = &path[end..];
        if resolved.ends_with('\\') {
            resolved.push_str(rest.trim_start_matches('\\'));
        } else {
            resolved.push_str(rest);
        }
        path = resolved;
        pos = if absolute { 0 } else { unchanged };
    }

    Ok(path)
}

/// Find the first component of `file_name` that is a reparse point.
///
/// Returns the index of that component, in UTF-16 code units, or
/// `None` if there is no reparse point along the path.
pub fn find_reparse_point<F>(file_name: &str, mut get_reparse_point: F) -> Option<usize>
where
    F: FnMut(&str, bool) -> FsResult<ReparseBuffer>,
{
    let bytes = file_name.as_bytes();
    let mut pos = 0;
    loop {
        while pos < bytes.len() && bytes[pos] == SEP {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos] != SEP {
            pos += 1;
        }
        let is_last = bytes[pos..].iter().all(|b| *b == SEP);
        if get_reparse_point(&file_name[..pos], !is_last).is_ok() {
            return Some(file_name[..start].encode_utf16().count());
        }
    }
}

/// Check whether the raw reparse data `replacement` may overwrite
/// `current`.
///
/// The tags must be identical. Third-party tags must also carry the
/// same GUID. Payloads are not compared.
pub fn can_replace_reparse_point(current: &[u8], replacement: &[u8]) -> FsResult<()> {
    if current.len() < 4 || replacement.len() < 4 {
        return Err(FsError::InvalidReparseData);
    }
    let tag = ReparseTag(u32::from_le_bytes([
        current[0], current[1], current[2], current[3],
    ]));
    if current[..4] != replacement[..4] {
        return Err(FsError::ReparseTagMismatch);
    }
    if !tag.is_microsoft() {
        let guid = ReparseBuffer::HEADER_SIZE..ReparseBuffer::GUID_HEADER_SIZE;
        if current.len() < guid.end
            || replacement.len() < guid.end
            || current[guid.clone()] != replacement[guid]
        {
            return Err(FsError::ReparseGuidMismatch);
        }
    }

    Ok(())
}

/// Append the components of `target` to `base`, applying `.` and `..`.
///
/// `base` ends with a separator. `..` never goes above the root.
/// Returns the new path, without trailing separator unless it is the
/// root, and the length of `base` that was kept untouched.
fn splice(base: &str, target: &str) -> (String, usize) {
    let mut out = base.to_string();
    let mut unchanged = out.len();
    for component in target.split('\\') {
        match component {
            "" | "." => {}
            ".." => {
                let trimmed = out.trim_end_matches('\\');
                if let Some(idx) = trimmed.rfind('\\') {
                    out.truncate(idx + 1);
                    unchanged = unchanged.min(out.len());
                }
            }
            name => {
                out.push_str(name);
                out.push('\\');
            }
        }
    }
    if out.len() > 1 && out.ends_with('\\') && !out.trim_end_matches('\\').is_empty() {
        out.pop();
    }

    (out, unchanged)
}

/// Byte offset in `s` of the UTF-16 index `index`, clamped to the end
/// of `s`.
fn byte_index(s: &str, index: usize) -> usize {
    let mut units = 0;
    for (idx, c) in s.char_indices() {
        if units >= index {
            return idx;
        }
        units += c.len_utf16();
    }

    s.len()
}

/// Start of the component containing `pos`.
fn component_start(s: &str, pos: usize) -> usize {
    s.as_bytes()[..pos]
        .iter()
        .rposition(|b| *b == SEP)
        .map(|i| i + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    /// A namespace of symbolic links, everything else is a plain file.
    fn links(links: &[(&str, &str)]) -> HashMap<String, String> {
        links
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect()
    }

    fn resolve(
        links: &HashMap<String, String>,
        name: &str,
        resolve_last: bool,
        max_hops: u32,
    ) -> FsResult<String> {
        resolve_reparse_points(name, 0, resolve_last, max_hops, |path, _| {
            match links.get(path) {
                Some(target) => Ok(ReparseBuffer::symlink(target, !target.starts_with('\\'))?),
                None => Err(FsError::NotAReparsePoint),
            }
        })
    }

    #[test]
    fn chain_within_budget() -> anyhow::Result<()> {
        let links = links(&[("\\A", "B"), ("\\B", "C")]);
        assert_eq!("\\C", resolve(&links, "\\A", true, 2)?);

        Ok(())
    }

    #[test]
    fn chain_over_budget() {
        let links = links(&[("\\A", "B"), ("\\B", "C")]);
        assert!(matches!(
            resolve(&links, "\\A", true, 1),
            Err(FsError::ReparseHopLimit)
        ));
    }

    #[test]
    fn loop_hits_limit() {
        let links = links(&[("\\A", "B"), ("\\B", "A")]);
        assert!(matches!(
            resolve(&links, "\\A", true, DEFAULT_MAX_REPARSE_HOPS),
            Err(FsError::ReparseHopLimit)
        ));
    }

    #[test]
    fn intermediate_components() -> anyhow::Result<()> {
        let links = links(&[("\\dir\\link", "other"), ("\\abs", "\\root\\x")]);
        assert_eq!(
            "\\dir\\other\\file",
            resolve(&links, "\\dir\\link\\file", true, 4)?
        );
        assert_eq!("\\root\\x\\y", resolve(&links, "\\abs\\y", true, 4)?);
        assert_eq!("\\plain\\path", resolve(&links, "\\plain\\path", true, 4)?);

        Ok(())
    }

    #[test]
    fn separators_are_collapsed_for_lookup() -> anyhow::Result<()> {
        let links = links(&[("\\\\A", "B")]);
        assert_eq!("\\\\B", resolve(&links, "\\\\A", true, 4)?);

        Ok(())
    }

    #[test]
    fn leave_last_component() -> anyhow::Result<()> {
        let links = links(&[("\\A", "B"), ("\\B", "C")]);
        assert_eq!("\\A", resolve(&links, "\\A", false, 4)?);
        assert_eq!("\\C\\x", resolve(&links, "\\A\\x", false, 4)?);

        Ok(())
    }

    #[test]
    fn dot_components() -> anyhow::Result<()> {
        let links = links(&[
            ("\\d\\up", "..\\t"),
            ("\\d\\here", ".\\x"),
            ("\\d\\e\\up2", "..\\..\\t"),
            ("\\d\\above", "..\\..\\..\\t"),
            ("\\d\\parent", ".."),
            ("\\abs", "\\a\\.\\b\\..\\c"),
        ]);
        assert_eq!("\\t", resolve(&links, "\\d\\up", true, 4)?);
        assert_eq!("\\t\\f", resolve(&links, "\\d\\up\\f", true, 4)?);
        assert_eq!("\\d\\x", resolve(&links, "\\d\\here", true, 4)?);
        assert_eq!("\\t", resolve(&links, "\\d\\e\\up2", true, 4)?);
        assert_eq!("\\t", resolve(&links, "\\d\\above", true, 4)?);
        assert_eq!("\\", resolve(&links, "\\d\\parent", true, 4)?);
        assert_eq!("\\f", resolve(&links, "\\d\\parent\\f", true, 4)?);
        assert_eq!("\\a\\c", resolve(&links, "\\abs", true, 4)?);

        Ok(())
    }

    #[test]
    fn dot_dot_target_is_resolved_again() -> anyhow::Result<()> {
        // \d\l goes up to \t, itself a link.
        let links = links(&[("\\d\\l", "..\\t"), ("\\t", "u")]);
        assert_eq!("\\u\\f", resolve(&links, "\\d\\l\\f", true, 4)?);

        Ok(())
    }

    #[test]
    fn relative_flag_must_match_target() {
        let lookup = |target: &'static str, relative: bool| {
            resolve_reparse_points("\\A", 0, true, 4, move |_, _| {
                ReparseBuffer::symlink(target, relative).map_err(FsError::from)
            })
        };
        assert!(matches!(
            lookup("\\abs", true),
            Err(FsError::InvalidReparseData)
        ));
        assert!(matches!(
            lookup("rel", false),
            Err(FsError::InvalidReparseData)
        ));
        assert!(matches!(lookup("", true), Err(FsError::InvalidReparseData)));
    }

    #[test]
    fn foreign_tag() {
        let result = resolve_reparse_points("\\A", 0, true, 4, |_, _| {
            Ok(ReparseBuffer::with_guid(
                ReparseTag(0x1234),
                Uuid::nil(),
                vec![],
            ))
        });
        assert!(matches!(result, Err(FsError::ForeignReparseTag(0x1234))));
    }

    #[test]
    fn lookup_errors() {
        let result = resolve_reparse_points("\\A\\B", 0, true, 4, |path, _| {
            if path == "\\A" {
                Err(FsError::NotAReparsePoint)
            } else {
                Err(FsError::NotFound)
            }
        });
        assert!(matches!(result, Err(FsError::NotFound)));

        let result =
            resolve_reparse_points("\\A\\B", 0, true, 4, |_, _| Err(FsError::NotFound));
        assert!(matches!(result, Err(FsError::PathNotFound)));
    }

    #[test]
    fn directory_flag() -> anyhow::Result<()> {
        let mut calls = vec![];
        resolve_reparse_points("\\a\\b", 0, true, 4, |path, is_dir| {
            calls.push((path.to_string(), is_dir));
            Err(FsError::NotAReparsePoint)
        })?;
        assert_eq!(
            vec![("\\a".to_string(), true), ("\\a\\b".to_string(), false)],
            calls
        );

        Ok(())
    }

    #[test]
    fn start_at_hint() -> anyhow::Result<()> {
        let mut calls = vec![];
        // Index 4 points into "bb".
        resolve_reparse_points("\\a\\bb\\c", 4, true, 4, |path, _| {
            calls.push(path.to_string());
            Err(FsError::NotAReparsePoint)
        })?;
        assert_eq!(vec!["\\a\\bb", "\\a\\bb\\c"], calls);

        Ok(())
    }

    #[test]
    fn find() {
        let links = links(&[("\\d\u{e9}j\u{e0}\\link", "x")]);
        let lookup = |path: &str, _| match links.get(path) {
            Some(target) => ReparseBuffer::symlink(target, true).map_err(FsError::from),
            None => Err(FsError::NotAReparsePoint),
        };
        assert_eq!(Some(6), find_reparse_point("\\d\u{e9}j\u{e0}\\link\\f", lookup));
        assert_eq!(None, find_reparse_point("\\d\u{e9}j\u{e0}\\other", lookup));
    }

    #[test]
    fn can_replace() -> anyhow::Result<()> {
        let current = ReparseBuffer::symlink("a", true)?.to_bytes()?;
        let same_tag = ReparseBuffer::symlink("\\completely\\different", false)?.to_bytes()?;
        let other_tag = ReparseBuffer::new(ReparseTag::MOUNT_POINT, vec![1, 2]).to_bytes()?;

        can_replace_reparse_point(&current, &same_tag)?;
        assert!(matches!(
            can_replace_reparse_point(&current, &other_tag),
            Err(FsError::ReparseTagMismatch)
        ));
        assert!(matches!(
            can_replace_reparse_point(&current, &[0, 0]),
            Err(FsError::InvalidReparseData)
        ));

        Ok(())
    }

    #[test]
    fn can_replace_third_party() -> anyhow::Result<()> {
        let tag = ReparseTag(0x0000_1234);
        let guid = Uuid::from_u128(1);
        let current = ReparseBuffer::with_guid(tag, guid, vec![1]).to_bytes()?;
        let same = ReparseBuffer::with_guid(tag, guid, vec![2, 3]).to_bytes()?;
        let other = ReparseBuffer::with_guid(tag, Uuid::from_u128(2), vec![1]).to_bytes()?;

        can_replace_reparse_point(&current, &same)?;
        assert!(matches!(
            can_replace_reparse_point(&current, &other),
            Err(FsError::ReparseGuidMismatch)
        ));

        Ok(())
    }
}
