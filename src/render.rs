//! Card rendering: template markup, background choice and rasterizing.
//!
//! Rendering happens in two steps behind two traits so tests can swap either:
//! a [`CardRenderer`] turns a template id and field map into markup, and a
//! [`Rasterizer`] turns markup into an image file. The shipped
//! implementations substitute `{{key}}` placeholders in files under the
//! templates directory and screenshot the page with headless Chromium.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::{CardSize, CollectionEntry, FieldMap};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Palette used when a collection config defines no theme colours.
pub const DEFAULT_THEME_COLORS: [&str; 10] = [
    "#2F4F4F", "#4B0082", "#006400", "#8B0000", "#2F2F4F", "#4A4A6A", "#1a1a2e", "#16213e",
    "#0f3460", "#533483",
];

/// Solid dark background used when no image source is available.
pub const SOLID_BACKGROUND: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' width='1080' height='1350'%3E%3Crect fill='%231a1a2e' width='100%25' height='100%25'/%3E%3C/svg%3E";

const AI_BACKGROUND_ENDPOINT: &str = "https://image.pollinations.ai/prompt";
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Extra time Chromium is given to fetch remote backgrounds before the shot.
const VIRTUAL_TIME_BUDGET_MS: u64 = 15_000;
const RASTERIZE_TIMEOUT: Duration = Duration::from_secs(90);

/// Per-card visual choices shared by every template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub theme_color: String,
    pub background_url: String,
    /// CSS `background-position`, e.g. `35% 80%`.
    pub background_position: String,
}

/// Produces card markup from a template and its fields.
#[async_trait]
pub trait CardRenderer: Send + Sync {
    async fn render(&self, template_id: &str, fields: &FieldMap) -> Result<String>;
}

/// Turns card markup into an image file.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Rasterize `markup` at `size` CSS pixels times `scale` into `output`.
    async fn rasterize(
        &self,
        markup: &str,
        size: CardSize,
        scale: u32,
        output: &Path,
    ) -> Result<PathBuf>;
}

/// Renders templates stored as files in one directory.
#[derive(Debug, Clone)]
pub struct TemplateDirRenderer {
    dir: PathBuf,
}

impl TemplateDirRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CardRenderer for TemplateDirRenderer {
    #[instrument(level = "debug", skip_all, fields(template = %template_id))]
    async fn render(&self, template_id: &str, fields: &FieldMap) -> Result<String> {
        let path = self.dir.join(template_id);
        let template = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::render(format!("cannot read template {}: {e}", path.display())))?;
        let (markup, missing) = fill_placeholders(&template, fields);
        if !missing.is_empty() {
            debug!(?missing, "Template placeholders without a value");
        }
        Ok(markup)
    }
}

/// Replace every `{{ key }}` with its field value.
///
/// Unknown keys render as empty strings and are returned so callers can log
/// them. An unterminated `{{` is copied through unchanged.
pub fn fill_placeholders(template: &str, fields: &FieldMap) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut missing = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return (out, missing);
        };
        let key = after[..end].trim();
        match fields.get(key) {
            Some(value) => out.push_str(value),
            None => missing.push(key.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    (out, missing)
}

/// Screenshots markup with a headless Chromium subprocess.
#[derive(Debug, Clone)]
pub struct ChromiumRasterizer {
    binary: String,
}

impl ChromiumRasterizer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Rasterizer for ChromiumRasterizer {
    #[instrument(level = "info", skip_all, fields(output = %output.display(), width = size.width, height = size.height, scale = scale))]
    async fn rasterize(
        &self,
        markup: &str,
        size: CardSize,
        scale: u32,
        output: &Path,
    ) -> Result<PathBuf> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        let page = output.with_extension("html");
        fs::write(&page, markup).await?;

        let result = self.screenshot(&page, size, scale, output).await;
        if let Err(e) = fs::remove_file(&page).await {
            warn!(page = %page.display(), error = %e, "Failed to remove intermediate page");
        }
        result?;

        if !fs::try_exists(output).await.unwrap_or(false) {
            return Err(Error::rasterize("browser exited without writing a screenshot"));
        }
        info!("Card rasterized");
        Ok(output.to_path_buf())
    }
}

impl ChromiumRasterizer {
    async fn screenshot(&self, page: &Path, size: CardSize, scale: u32, output: &Path) -> Result<()> {
        let page = fs::canonicalize(page).await?;
        let page_url = Url::from_file_path(&page)
            .map_err(|_| Error::rasterize(format!("not an absolute path: {}", page.display())))?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg("--allow-file-access-from-files")
            .arg(format!("--force-device-scale-factor={scale}"))
            .arg(format!("--window-size={},{}", size.width, size.height))
            .arg(format!("--virtual-time-budget={VIRTUAL_TIME_BUDGET_MS}"))
            .arg(format!("--screenshot={}", output.display()))
            .arg(page_url.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(RASTERIZE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::rasterize(format!("browser timed out after {RASTERIZE_TIMEOUT:?}")))?;
        let out = result
            .map_err(|e| Error::rasterize(format!("cannot launch {}: {e}", self.binary)))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::rasterize(format!(
                "browser exited with {}: {}",
                out.status,
                truncate_for_log(stderr.trim(), 300)
            )));
        }
        Ok(())
    }
}

/// Where card backgrounds come from, in order of preference.
///
/// 1. a random CDN image, when enabled and the list is non-empty
/// 2. an AI-generated image URL, when enabled
/// 3. a random local image from the backgrounds directory
/// 4. a solid-colour inline SVG
#[derive(Debug, Clone, Default)]
pub struct BackgroundPolicy {
    pub use_cdn: bool,
    pub cdn_urls: Vec<String>,
    pub enable_ai: bool,
    /// `file://` URLs of local background images.
    pub offline_urls: Vec<String>,
}

impl BackgroundPolicy {
    /// Build the policy from settings, scanning the local backgrounds directory.
    #[instrument(level = "info", skip_all, fields(dir = %config.backgrounds_dir.display()))]
    pub async fn from_config(config: &AppConfig) -> Self {
        let offline_urls = scan_backgrounds(&config.backgrounds_dir).await;
        info!(
            cdn = config.cdn_backgrounds.len(),
            offline = offline_urls.len(),
            ai = config.enable_ai_background,
            "Background sources ready"
        );
        Self {
            use_cdn: config.use_cdn_background,
            cdn_urls: config.cdn_backgrounds.clone(),
            enable_ai: config.enable_ai_background,
            offline_urls,
        }
    }

    /// Background reference for `entry`.
    pub fn background_url<R: Rng + ?Sized>(&self, entry: &CollectionEntry, rng: &mut R) -> String {
        if self.use_cdn {
            if let Some(url) = self.cdn_urls.choose(rng) {
                return url.clone();
            }
        }
        if self.enable_ai {
            return ai_background_url(entry);
        }
        self.offline_urls
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| SOLID_BACKGROUND.to_string())
    }

    /// Random visual context for one card.
    ///
    /// The theme colour comes from `palette`, or the built-in palette when
    /// it is empty.
    pub fn context_for<R: Rng + ?Sized>(
        &self,
        entry: &CollectionEntry,
        palette: &[String],
        rng: &mut R,
    ) -> RenderContext {
        let theme_color = palette
            .choose(rng)
            .cloned()
            .or_else(|| DEFAULT_THEME_COLORS.choose(rng).map(|c| c.to_string()))
            .unwrap_or_else(|| DEFAULT_THEME_COLORS[0].to_string());
        let background_url = self.background_url(entry, rng);
        let background_position = format!(
            "{}% {}%",
            rng.random_range(0..=100),
            rng.random_range(0..=100)
        );
        RenderContext {
            theme_color,
            background_url,
            background_position,
        }
    }
}

/// Prompt describing a background for `entry`, themed by its category.
pub fn ai_prompt(entry: &CollectionEntry) -> String {
    let category = entry.category.as_deref().unwrap_or_default().to_lowercase();
    let theme = if category.contains("adj") {
        "abstract gradient aesthetic atmosphere"
    } else if category.contains("n.") {
        "realistic minimalist photography"
    } else if category.contains("v.") {
        "dynamic motion artistic blur"
    } else {
        "aesthetic minimalist background"
    };
    format!(
        "{} concept, {theme}, high quality, 4k, no text, cinematic lighting",
        entry.primary_text
    )
}

fn ai_background_url(entry: &CollectionEntry) -> String {
    format!(
        "{AI_BACKGROUND_ENDPOINT}/{}?width=1920&height=2400&nologo=true&model=flux&enhance=true",
        urlencoding::encode(&ai_prompt(entry))
    )
}

/// `file://` URLs of the images directly inside `dir`, sorted by path.
async fn scan_backgrounds(dir: &Path) -> Vec<String> {
    let mut urls = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "No local backgrounds directory");
            return urls;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_image {
            continue;
        }
        let Ok(abs) = fs::canonicalize(&path).await else {
            continue;
        };
        if let Ok(url) = Url::from_file_path(&abs) {
            urls.push(url.to_string());
        }
    }
    urls.sort();
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Extra;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn entry(word: &str, category: Option<&str>) -> CollectionEntry {
        CollectionEntry {
            id: word.to_string(),
            primary_text: word.to_string(),
            phonetic: None,
            category: category.map(str::to_string),
            body: "meaning".to_string(),
            example: None,
            extra: Extra::new(),
        }
    }

    #[test]
    fn test_fill_placeholders() {
        let mut fields = FieldMap::new();
        fields.insert("word".into(), "brisk".into());
        fields.insert("theme_color".into(), "#2F4F4F".into());

        let (out, missing) =
            fill_placeholders("<h1 style=\"color:{{theme_color}}\">{{ word }}</h1>{{phonetic}}", &fields);
        assert_eq!(out, "<h1 style=\"color:#2F4F4F\">brisk</h1>");
        assert_eq!(missing, vec!["phonetic"]);
    }

    #[test]
    fn test_fill_placeholders_unterminated() {
        let (out, missing) = fill_placeholders("a {{ b", &FieldMap::new());
        assert_eq!(out, "a {{ b");
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_template_dir_renderer() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(tmp.path().join("card.html"), "<p>{{word}}</p>").await.unwrap();
        let renderer = TemplateDirRenderer::new(tmp.path());

        let mut fields = FieldMap::new();
        fields.insert("word".into(), "abandon".into());
        assert_eq!(renderer.render("card.html", &fields).await.unwrap(), "<p>abandon</p>");
        assert!(matches!(
            renderer.render("missing.html", &fields).await,
            Err(Error::Render(_))
        ));
    }

    #[test]
    fn test_background_policy_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let word = entry("serene", Some("adj."));

        let cdn = BackgroundPolicy {
            use_cdn: true,
            cdn_urls: vec!["https://cdn.example/a.jpg".into()],
            enable_ai: true,
            offline_urls: vec!["file:///photos/a.jpg".into()],
        };
        assert_eq!(cdn.background_url(&word, &mut rng), "https://cdn.example/a.jpg");

        let ai = BackgroundPolicy { use_cdn: false, ..cdn.clone() };
        let url = ai.background_url(&word, &mut rng);
        assert!(url.starts_with("https://image.pollinations.ai/prompt/serene%20concept%2C%20abstract"));

        let offline = BackgroundPolicy { enable_ai: false, ..ai.clone() };
        assert_eq!(offline.background_url(&word, &mut rng), "file:///photos/a.jpg");

        let nothing = BackgroundPolicy::default();
        assert_eq!(nothing.background_url(&word, &mut rng), SOLID_BACKGROUND);
    }

    #[test]
    fn test_ai_prompt_theme_by_category() {
        assert!(ai_prompt(&entry("run", Some("v."))).contains("dynamic motion"));
        assert!(ai_prompt(&entry("tree", Some("n."))).contains("realistic minimalist"));
        assert!(ai_prompt(&entry("一石二鸟", Some("idiom"))).contains("aesthetic minimalist background"));
        assert!(ai_prompt(&entry("x", None)).starts_with("x concept"));
    }

    #[test]
    fn test_context_for_uses_palette() {
        let mut rng = StdRng::seed_from_u64(3);
        let policy = BackgroundPolicy::default();
        let word = entry("brisk", None);

        let ctx = policy.context_for(&word, &["#000000".to_string()], &mut rng);
        assert_eq!(ctx.theme_color, "#000000");
        let (x, y) = ctx.background_position.split_once(' ').unwrap();
        for part in [x, y] {
            let pct: u32 = part.trim_end_matches('%').parse().unwrap();
            assert!(pct <= 100);
        }

        let ctx = policy.context_for(&word, &[], &mut rng);
        assert!(DEFAULT_THEME_COLORS.contains(&ctx.theme_color.as_str()));
    }

    #[tokio::test]
    async fn test_scan_backgrounds_filters_images() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt"] {
            tokio::fs::write(tmp.path().join(name), b"x").await.unwrap();
        }
        let urls = scan_backgrounds(tmp.path()).await;
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.starts_with("file://")));
        assert!(scan_backgrounds(&tmp.path().join("absent")).await.is_empty());
    }
}
