use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use time::format_description;
use time::Date;

use crate::files::{DownloadStatus, TransferStatus};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FileCategory {
    Media,
    Photo,
    Video,
    Audio,
    File,
}

impl Default for FileCategory {
    fn default() -> Self {
        FileCategory::Media
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DateType {
    Sent,
    Downloaded,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum SizeUnit {
    KB,
    MB,
    GB,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortKey {
    Date,
    CompletionDate,
    Size,
    ReactionCount,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileFilter {
    pub search: String,
    #[serde(rename = "type")]
    pub category: Option<FileCategory>,
    pub download_status: Option<DownloadStatus>,
    pub transfer_status: Option<TransferStatus>,
    pub offline: bool,
    pub tags: Vec<String>,
    pub date_type: Option<DateType>,
    /// Inclusive `[from, to]` pair of `YYYY-MM-DD` dates.
    pub date_range: Option<[String; 2]>,
    pub size_range: Option<[u64; 2]>,
    pub size_unit: Option<SizeUnit>,
    pub sort: Option<SortKey>,
    pub order: Option<SortOrder>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            category: Some(FileCategory::Media),
            download_status: None,
            transfer_status: None,
            offline: false,
            tags: Vec::new(),
            date_type: None,
            date_range: None,
            size_range: None,
            size_unit: None,
            sort: None,
            order: None,
        }
    }
}

impl FileFilter {
    /// Defaults for a view; the global (no account) view only has the
    /// offline index to query, so it starts in offline mode.
    pub fn defaults_for(global_scope: bool) -> Self {
        Self {
            offline: global_scope,
            ..Self::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        *self != Self::defaults_for(self.offline)
    }

    pub fn chips(&self) -> Vec<String> {
        let mut chips = Vec::new();
        if !self.search.is_empty() {
            chips.push(format!("\"{}\"", self.search));
        }
        if let Some(category) = self.category {
            chips.push(format!("type:{category}"));
        }
        if let Some(status) = self.download_status {
            chips.push(format!("status:{status}"));
        }
        if let Some(status) = self.transfer_status {
            chips.push(format!("transfer:{status}"));
        }
        if self.offline {
            chips.push("offline".into());
        }
        if !self.tags.is_empty() {
            chips.push(format!("tag:{}", self.tags.join(",")));
        }
        if let Some([from, to]) = &self.date_range {
            let kind = self.date_type.unwrap_or(DateType::Sent);
            chips.push(format!("{kind}:{from}..{to}"));
        }
        if let Some([min, max]) = self.size_range {
            let unit = self.size_unit.map(|u| u.to_string()).unwrap_or_default();
            chips.push(format!("size:{min}..{max}{unit}"));
        }
        if let Some(sort) = self.sort {
            let order = self.order.unwrap_or(SortOrder::Desc);
            chips.push(format!("sort:{sort} {order}"));
        }
        chips
    }
}

static SIZE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\.\.(\d+)(kb|mb|gb)?$").expect("valid size range pattern")
});

/// Builds a filter from a whitespace separated query such as
/// `type:video status:completed tag:a,b size:1..10mb holiday`.
///
/// Unknown or malformed qualifiers are dropped; bare words become the
/// search text.
pub fn parse_query(input: &str) -> FileFilter {
    let mut filter = FileFilter::default();
    let mut words = Vec::new();
    for raw in input.split_whitespace() {
        if raw.eq_ignore_ascii_case("offline") {
            filter.offline = true;
            continue;
        }
        let Some((qualifier, value)) = raw.split_once(':') else {
            words.push(raw);
            continue;
        };
        match qualifier.to_ascii_lowercase().as_str() {
            "type" => filter.category = value.parse().ok(),
            "status" => filter.download_status = value.parse().ok(),
            "transfer" => filter.transfer_status = value.parse().ok(),
            "tag" | "tags" => {
                for tag in split_tags(value) {
                    if !filter.tags.contains(&tag) {
                        filter.tags.push(tag);
                    }
                }
            }
            "sort" => filter.sort = value.parse().ok(),
            "order" => filter.order = value.parse().ok(),
            "size" => {
                if let Some((range, unit)) = parse_size_range(value) {
                    filter.size_range = Some(range);
                    filter.size_unit = unit;
                }
            }
            "date" | "sent" => {
                if let Some(range) = parse_date_range(value) {
                    filter.date_type = Some(DateType::Sent);
                    filter.date_range = Some(range);
                }
            }
            "downloaded" | "completed" => {
                if let Some(range) = parse_date_range(value) {
                    filter.date_type = Some(DateType::Downloaded);
                    filter.date_range = Some(range);
                }
            }
            _ => words.push(raw),
        }
    }
    filter.search = words.join(" ");
    filter
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_size_range(spec: &str) -> Option<([u64; 2], Option<SizeUnit>)> {
    let caps = SIZE_SPEC.captures(spec)?;
    let min: u64 = caps.get(1)?.as_str().parse().ok()?;
    let max: u64 = caps.get(2)?.as_str().parse().ok()?;
    if min > max {
        return None;
    }
    let unit = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some(([min, max], unit))
}

fn parse_date_range(spec: &str) -> Option<[String; 2]> {
    let (from, to) = match spec.split_once("..") {
        Some((from, to)) => (from, to),
        None => (spec, spec),
    };
    let from_date = parse_date(from)?;
    let to_date = parse_date(to)?;
    if from_date > to_date {
        return None;
    }
    Some([from.to_string(), to.to_string()])
}

fn parse_date(input: &str) -> Option<Date> {
    static FORMAT: Lazy<Vec<format_description::FormatItem<'static>>> = Lazy::new(|| {
        format_description::parse("[year]-[month]-[day]").expect("valid date format description")
    });
    Date::parse(input, &*FORMAT).ok()
}
