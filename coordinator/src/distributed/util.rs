use std::ffi::OsStr;
use tracing::warn;

/// separator between the pid and the optional tag of a registry entry
pub const TAG_SEPARATOR: char = '_';

/// name of a registry entry: `<id>` or `<id>_<tag>`
pub fn entry_name(id: u32, tag: Option<&str>) -> String {
    match tag.filter(|tag| !tag.is_empty()) {
        Some(tag) => format!("{id}{TAG_SEPARATOR}{}", sanitize_tag(tag)),
        None => id.to_string(),
    }
}

/// recover the id from an entry name, everything after the first separator is the tag
pub fn parse_entry(name: &OsStr) -> Option<u32> {
    let name = name.to_str()?;
    let id = name
        .split_once(TAG_SEPARATOR)
        .map_or(name, |(id, _tag)| id);

    id.parse().ok()
}

// tags come from hostnames, path separators must not leak into file names
fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| match c {
            '/' | '\0' => '-',
            c => c,
        })
        .collect()
}

/// hostname of this node, as seen by the kernel
pub fn hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.into_string().ok(),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname for registry tags: {error}");

            None
        }
    }
}
