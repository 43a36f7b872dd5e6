//! Text-level helpers for the Maven descriptor shipped in an intervention
//! artifact.
//!
//! The declared version of the dependency under review is swapped for
//! [`VERSION_PLACEHOLDER`] so the spot can be found again once the user picks
//! a replacement.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Marker that never appears in a real version string.
pub const VERSION_PLACEHOLDER: &str = "*****";

static DEPENDENCY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<dependency>.*?</dependency>").expect("dependency block regex is valid")
});

static LEAF_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z][A-Za-z0-9]*)>\s*([^<]*?)\s*</([A-Za-z][A-Za-z0-9]*)>")
        .expect("leaf element regex is valid")
});

/// Snippet of the descriptor shown to the user when an intervention begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeExcerpt {
    pub file_name: String,
    /// 1-based line of the first excerpt line.
    pub start_line: usize,
    pub text: String,
}

/// Byte ranges of every `<dependency>` block.
pub(super) fn dependency_blocks(text: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    DEPENDENCY_BLOCK.find_iter(text).map(|m| m.range())
}

/// `(name, value, value range)` for every element that holds only text.
pub(super) fn leaf_elements(text: &str) -> impl Iterator<Item = (&str, &str, Range<usize>)> {
    LEAF_ELEMENT.captures_iter(text).filter_map(|caps| {
        let open = caps.get(1)?;
        let close = caps.get(3)?;
        if open.as_str() != close.as_str() {
            return None;
        }
        let value = caps.get(2)?;
        Some((open.as_str(), value.as_str(), value.range()))
    })
}

fn leaf<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    leaf_elements(block).find_map(|(n, value, _)| (n == name).then_some(value))
}

/// Replace the version of `group_id:artifact_id` (currently `version`) with
/// `replacement`. Returns `None` when no matching dependency declares that
/// version.
pub fn substitute_version(
    pom: &str,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    replacement: &str,
) -> Option<String> {
    let block = dependency_blocks(pom).find(|range| {
        let block = &pom[range.clone()];
        leaf(block, "groupId") == Some(group_id)
            && leaf(block, "artifactId") == Some(artifact_id)
            && leaf(block, "version") == Some(version)
    })?;
    let (_, _, value) = leaf_elements(&pom[block.clone()]).find(|(n, _, _)| *n == "version")?;
    let start = block.start + value.start;
    let end = block.start + value.end;

    let mut out = String::with_capacity(pom.len() + replacement.len());
    out.push_str(&pom[..start]);
    out.push_str(replacement);
    out.push_str(&pom[end..]);
    Some(out)
}

/// Put `version` where the placeholder sits.
pub fn apply_version(template: &str, version: &str) -> Option<String> {
    template
        .contains(VERSION_PLACEHOLDER)
        .then(|| template.replacen(VERSION_PLACEHOLDER, version, 1))
}

/// The dependency block holding the placeholder, with its line position.
pub fn placeholder_excerpt(template: &str, file_name: &str) -> Option<CodeExcerpt> {
    let block = dependency_blocks(template)
        .find(|range| template[range.clone()].contains(VERSION_PLACEHOLDER))?;
    let line_start = template[..block.start].rfind('\n').map_or(0, |i| i + 1);
    let start_line = template[..line_start].matches('\n').count() + 1;
    Some(CodeExcerpt {
        file_name: file_name.to_string(),
        start_line,
        text: template[line_start..block.end].to_string(),
    })
}
