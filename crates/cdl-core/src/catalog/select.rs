//! Item selection: which items, which quality variant, and where they land.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{Course, CourseItem, MediaVariant};
use crate::job::UnitKind;
use crate::paths::sanitize_component;

/// Preferred video quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Same as `Highest`.
    #[default]
    Auto,
    Highest,
    Lowest,
    /// Exact height if offered, otherwise the closest one (higher wins ties).
    Height(u32),
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => Ok(Quality::Auto),
            "highest" | "best" => Ok(Quality::Highest),
            "lowest" => Ok(Quality::Lowest),
            other => other
                .trim_end_matches('p')
                .parse::<u32>()
                .map(Quality::Height)
                .map_err(|_| format!("invalid quality {:?}", s)),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Auto => f.write_str("auto"),
            Quality::Highest => f.write_str("highest"),
            Quality::Lowest => f.write_str("lowest"),
            Quality::Height(h) => write!(f, "{h}p"),
        }
    }
}

/// Which kinds of items to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilter {
    #[default]
    All,
    /// Videos with their subtitles and thumbnails.
    LecturesOnly,
    AttachmentsOnly,
}

impl ContentFilter {
    pub fn includes(self, kind: UnitKind) -> bool {
        match self {
            ContentFilter::All => true,
            ContentFilter::LecturesOnly => kind != UnitKind::Attachment,
            ContentFilter::AttachmentsOnly => kind == UnitKind::Attachment,
        }
    }
}

impl FromStr for ContentFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" | "both" => Ok(ContentFilter::All),
            "lectures" | "lectures_only" => Ok(ContentFilter::LecturesOnly),
            "attachments" | "attachments_only" => Ok(ContentFilter::AttachmentsOnly),
            other => Err(format!("invalid content filter {:?}", other)),
        }
    }
}

/// What the submitter asked for.
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    /// Empty selects every item of the course.
    pub item_ids: &'a [String],
    pub quality: Quality,
    pub content: ContentFilter,
    /// Keep only subtitles in this language.
    pub subtitle_language: Option<&'a str>,
}

/// One item chosen for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
    pub item_id: String,
    pub title: String,
    pub kind: UnitKind,
    /// None for encrypted items, which are recorded but never fetched.
    pub url: Option<String>,
    pub size: Option<u64>,
    /// Height of the chosen video variant.
    pub quality: Option<u32>,
    pub language: Option<String>,
    pub extension: String,
}

impl SelectedItem {
    pub fn is_encrypted(&self) -> bool {
        self.url.is_none()
    }
}

fn pick_variant(variants: &[MediaVariant], quality: Quality) -> Option<&MediaVariant> {
    let usable = variants.iter().filter(|v| !v.encrypted);
    match quality {
        Quality::Auto | Quality::Highest => usable.max_by_key(|v| v.quality),
        Quality::Lowest => usable.min_by_key(|v| v.quality),
        Quality::Height(h) => usable.min_by_key(|v| (v.quality.abs_diff(h), std::cmp::Reverse(v.quality))),
    }
}

fn extension_for(item: &CourseItem, url: Option<&str>) -> String {
    if let Some(ext) = item.extension.as_deref().filter(|e| !e.is_empty()) {
        return ext.trim_start_matches('.').to_ascii_lowercase();
    }
    let from_url = url
        .and_then(|u| url::Url::parse(u).ok())
        .and_then(|u| {
            let segment = u.path().rsplit('/').next()?.to_string();
            let (_, ext) = segment.rsplit_once('.')?;
            let ok = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
            ok.then(|| ext.to_ascii_lowercase())
        });
    from_url.unwrap_or_else(|| {
        match item.kind {
            UnitKind::Video => "mp4",
            UnitKind::Subtitle => "srt",
            UnitKind::Attachment => "bin",
            UnitKind::Thumbnail => "jpg",
        }
        .to_string()
    })
}

fn select_one(item: &CourseItem, quality: Quality) -> SelectedItem {
    let (url, size, height) = if item.encrypted {
        (None, item.size, None)
    } else if item.variants.is_empty() {
        (item.url.clone(), item.size, None)
    } else {
        match pick_variant(&item.variants, quality) {
            Some(v) => (Some(v.url.clone()), v.size, Some(v.quality)),
            None => (None, item.size, None),
        }
    };
    SelectedItem {
        item_id: item.id.clone(),
        title: item.title.clone(),
        kind: item.kind,
        extension: extension_for(item, url.as_deref()),
        url,
        size,
        quality: height,
        language: item.language.clone(),
    }
}

/// Items of `course` matching `sel`, in course order.
pub fn select_items(course: &Course, sel: &Selection<'_>) -> Vec<SelectedItem> {
    for id in sel.item_ids {
        if !course.items.iter().any(|i| &i.id == id) {
            tracing::warn!(course = %course.id, item = %id, "requested item not in course");
        }
    }
    course
        .items
        .iter()
        .filter(|i| sel.item_ids.is_empty() || sel.item_ids.contains(&i.id))
        .filter(|i| sel.content.includes(i.kind))
        .filter(|i| match (i.kind, sel.subtitle_language) {
            (UnitKind::Subtitle, Some(lang)) => i
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(lang)),
            _ => true,
        })
        .map(|i| select_one(i, sel.quality))
        .collect()
}

/// `<course_dir>/<seq:03>-<title>[_<quality>p|_<lang>].<ext>` with `seq` 1-based.
pub fn destination_for(course_dir: &Path, seq: u32, item: &SelectedItem) -> PathBuf {
    let mut stem = format!("{:03}-{}", seq + 1, item.title);
    match (item.kind, item.quality, item.language.as_deref()) {
        (UnitKind::Video, Some(q), _) => stem.push_str(&format!("_{q}p")),
        (UnitKind::Subtitle, _, Some(lang)) => stem.push_str(&format!("_{lang}")),
        _ => {}
    }
    course_dir.join(format!("{}.{}", sanitize_component(&stem), item.extension))
}
