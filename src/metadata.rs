//! The `bag-info.txt` store: an ordered list of tag/value pairs with a
//! case-insensitive index, RFC 8493 line folding, and repeatability rules.

use crate::declaration::Version;
use crate::error::Issue;
use jiff::civil::Date;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

pub const KEY_DATE: &str = "Bagging-Date";
pub const KEY_OXUM: &str = "Payload-Oxum";
pub(crate) const BAG_INFO_TXT: &str = "bag-info.txt";

/// Tags regenerated on every `update()`; callers cannot set them.
const GENERATED: [&str; 2] = ["payload-oxum", "bagging-date"];
const MUST_NOT_REPEAT: [&str; 1] = ["payload-oxum"];
const SHOULD_NOT_REPEAT: [&str; 4] = [
    "bagging-date",
    "bag-size",
    "bag-group-identifier",
    "bag-count",
];

/// Serialized lines stay at or under this many bytes unless a single token
/// cannot fit.
const FOLD_COLUMN: usize = 78;

/// Wall clock consulted when stamping `Bagging-Date`. The bundled
/// [`SystemClock`] reports the current date in UTC; tests inject a fixed
/// one.
pub trait Clock: Send + Sync {
    fn today(&self) -> Date;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Date {
        jiff::Timestamp::now()
            .to_zoned(jiff::tz::TimeZone::UTC)
            .date()
    }
}

/// Octet and file count summary of the payload, `<octets>.<files>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadOxum {
    pub octets: u64,
    pub files: u64,
}

impl Display for PayloadOxum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.octets, self.files)
    }
}

impl FromStr for PayloadOxum {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (octets, files) = s.split_once('.').ok_or(())?;

        Ok(Self {
            octets: octets.parse().map_err(|_| ())?,
            files: files.parse().map_err(|_| ())?,
        })
    }
}

/// Attempted to set a tag the engine owns.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("`{0}` is regenerated on update and cannot be set")]
pub struct GeneratedTag(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct TagEntry {
    pub tag: String,
    pub value: String,
}

/// Ordered bag-info entries plus a lowercase-tag index rebuilt on every
/// mutation.
#[derive(Debug, Default)]
pub struct BagInfo {
    entries: Vec<TagEntry>,
    index: HashMap<String, Vec<usize>>,
}

impl BagInfo {
    pub fn is_generated(tag: &str) -> bool {
        GENERATED.contains(&tag.to_lowercase().as_str())
    }

    pub fn has(&self, tag: &str) -> bool {
        self.index.contains_key(&tag.to_lowercase())
    }

    /// All values for `tag` in insertion order, matched case-insensitively.
    pub fn get_all(&self, tag: &str) -> Vec<&str> {
        self.index
            .get(&tag.to_lowercase())
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| self.entries[i].value.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a value for `tag`. Generated tags are refused.
    pub fn set(&mut self, tag: &str, value: &str) -> Result<(), GeneratedTag> {
        if Self::is_generated(tag) {
            return Err(GeneratedTag(tag.to_string()));
        }

        self.push_unchecked(tag, value);
        Ok(())
    }

    /// Drop every value of `tag`. Returns how many entries went away.
    pub fn remove_all(&mut self, tag: &str) -> usize {
        let lowered = tag.to_lowercase();
        let before = self.entries.len();

        self.entries.retain(|entry| entry.tag.to_lowercase() != lowered);
        self.rebuild_index();

        before - self.entries.len()
    }

    /// Drop the `position`-th value of `tag` (insertion order). Returns
    /// whether anything was removed.
    pub fn remove_at(&mut self, tag: &str, position: usize) -> bool {
        let target = match self
            .index
            .get(&tag.to_lowercase())
            .and_then(|positions| positions.get(position))
        {
            Some(&target) => target,
            None => return false,
        };

        self.entries.remove(target);
        self.rebuild_index();
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_unchecked(&mut self, tag: &str, value: &str) {
        self.entries.push(TagEntry {
            tag: tag.to_string(),
            value: value.to_string(),
        });
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index.clear();

        for (position, entry) in self.entries.iter().enumerate() {
            self.index
                .entry(entry.tag.to_lowercase())
                .or_default()
                .push(position);
        }
    }

    /// Parse decoded `bag-info.txt` content. Findings land in the returned
    /// error and warning lists rather than aborting the parse.
    pub(crate) fn parse(content: &str, version: Version) -> (Self, Vec<Issue>, Vec<Issue>) {
        let mut info = Self::default();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (number, line) in content.lines().enumerate() {
            let number = number + 1;

            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                match info.entries.last_mut() {
                    Some(entry) => {
                        entry.value.push(' ');
                        entry.value.push_str(line.trim());
                    }
                    None => errors.push(Issue::new(
                        BAG_INFO_TXT,
                        format!("line {number}: continuation line without a preceding tag"),
                    )),
                }
                continue;
            }

            let Some((raw_tag, raw_value)) = line.split_once(':') else {
                errors.push(Issue::new(
                    BAG_INFO_TXT,
                    format!("line {number}: expected `tag: value`"),
                ));
                continue;
            };

            if !raw_value.starts_with([' ', '\t']) {
                errors.push(Issue::new(
                    BAG_INFO_TXT,
                    format!("line {number}: missing space after `:`"),
                ));
                continue;
            }

            let tag = raw_tag.trim();
            if tag != raw_tag && version.at_least(1, 0) {
                errors.push(Issue::new(
                    BAG_INFO_TXT,
                    format!("line {number}: whitespace around tag name `{tag}`"),
                ));
            }

            let lowered = tag.to_lowercase();
            if info.index.contains_key(&lowered) {
                if MUST_NOT_REPEAT.contains(&lowered.as_str()) {
                    errors.push(Issue::new(
                        BAG_INFO_TXT,
                        format!("line {number}: tag `{tag}` must not repeat"),
                    ));
                } else if SHOULD_NOT_REPEAT.contains(&lowered.as_str()) {
                    warnings.push(Issue::new(
                        BAG_INFO_TXT,
                        format!("line {number}: tag `{tag}` should not repeat"),
                    ));
                }
            }

            info.push_unchecked(tag, raw_value.trim());
        }

        (info, errors, warnings)
    }

    /// Render entries for disk, regenerating `Payload-Oxum` and
    /// `Bagging-Date` and folding long values.
    pub(crate) fn serialize(&self, oxum: PayloadOxum, today: Date) -> String {
        let mut lines = Vec::new();

        for entry in self.entries.iter().filter(|e| !Self::is_generated(&e.tag)) {
            fold_into(&mut lines, &entry.tag, &entry.value);
        }
        fold_into(&mut lines, KEY_OXUM, &oxum.to_string());
        fold_into(&mut lines, KEY_DATE, &today.to_string());

        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }
}

/// Greedy word-boundary folding; continuation lines are indented with two
/// spaces. A token longer than the fold column is emitted whole.
fn fold_into(lines: &mut Vec<String>, tag: &str, value: &str) {
    let mut current = format!("{tag}:");
    let mut first = true;

    for word in value.split_whitespace() {
        if first {
            current.push(' ');
            current.push_str(word);
            first = false;
        } else if current.len() + 1 + word.len() > FOLD_COLUMN {
            lines.push(std::mem::take(&mut current));
            current = format!("  {word}");
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }

    if first {
        current.push(' ');
    }
    lines.push(current);
}
