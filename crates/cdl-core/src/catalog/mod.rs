//! Course catalog collaborator: what a course contains and where to fetch it.
//!
//! The engine only needs a course's ordered item list with source locators,
//! expected sizes and quality variants. `ManifestCatalog` serves courses from
//! JSON manifests; a real deployment plugs its catalog service in through
//! [`CourseCatalog`].

mod select;

pub use select::{destination_for, select_items, ContentFilter, Quality, Selection, SelectedItem};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::job::UnitKind;

/// One quality variant of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaVariant {
    /// Vertical resolution (e.g. 720).
    pub quality: u32,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// DRM-protected stream; never selected.
    #[serde(default)]
    pub encrypted: bool,
}

/// A downloadable course item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseItem {
    pub id: String,
    pub title: String,
    pub kind: UnitKind,
    /// Direct locator for items without quality variants.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub variants: Vec<MediaVariant>,
    /// Subtitle language code (e.g. "en").
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    /// File extension override; otherwise taken from the URL or the kind.
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Headers sent with every request for this course's assets.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub items: Vec<CourseItem>,
}

/// Course/catalog service contract.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Ordered items of a course.
    async fn course(&self, course_id: &str) -> Result<Course>;
}

/// Catalog backed by JSON manifests (one course object or an array of them).
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog {
    courses: HashMap<String, Course>,
}

impl ManifestCatalog {
    pub fn from_courses(courses: impl IntoIterator<Item = Course>) -> Result<Self> {
        let mut map = HashMap::new();
        for course in courses {
            validate(&course)?;
            map.insert(course.id.clone(), course);
        }
        Ok(Self { courses: map })
    }

    /// Load a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn parse(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let courses: Vec<Course> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        Self::from_courses(courses)
    }

    pub fn course_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.courses.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl CourseCatalog for ManifestCatalog {
    async fn course(&self, course_id: &str) -> Result<Course> {
        self.courses
            .get(course_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown course {:?}", course_id))
    }
}

fn validate_url(item: &str, url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("item {item}: invalid url {url:?}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("item {item}: unsupported scheme {other:?}"),
    }
}

fn validate(course: &Course) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for item in &course.items {
        if !seen.insert(item.id.as_str()) {
            bail!("course {}: duplicate item id {:?}", course.id, item.id);
        }
        if let Some(url) = &item.url {
            validate_url(&item.id, url)?;
        }
        for v in &item.variants {
            validate_url(&item.id, &v.url)?;
        }
        if item.url.is_none() && item.variants.is_empty() && !item.encrypted {
            bail!("course {}: item {:?} has no source", course.id, item.id);
        }
    }
    Ok(())
}
