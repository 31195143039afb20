use anyhow::{Context, Result};
use regex::Regex;

use crate::pipeline::DownloadedVideo;

/// Keyword matcher deciding whether a video's metadata mentions the brand.
#[derive(Debug, Clone)]
pub struct BrandFilter {
    keywords: Vec<String>,
    hashtag: Regex,
}

impl BrandFilter {
    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let hashtag = Regex::new(r"#(\w+)").context("Failed to compile hashtag pattern")?;

        Ok(Self { keywords, hashtag })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Hashtag bodies in `text`, without the leading `#`.
    pub fn hashtags<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.hashtag
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .collect()
    }

    pub fn is_brand_related(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        let lowered = text.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return true;
        }

        self.hashtags(text).into_iter().any(|tag| {
            let tag = tag.to_lowercase();
            self.keywords.iter().any(|k| tag.contains(k.as_str()))
        })
    }

    /// Checks title, description, tags and hashtags together.
    pub fn matches_metadata(&self, video: &DownloadedVideo) -> bool {
        let combined = [
            video.title.clone(),
            video.description.clone(),
            video.tags.join(" "),
            video.hashtags.join(" "),
        ]
        .join(" ");

        self.is_brand_related(&combined)
    }
}
