use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{error::AppError, utils::config::PdfIngestMode};
use headless_chrome::{
    protocol::cdp::{Emulation, Page, DOM},
    Browser,
};
use lopdf::Document as LopdfDocument;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

const FAST_PATH_MIN_LEN: usize = 150;
const FAST_PATH_MIN_ASCII_RATIO: f64 = 0.7;
const MAX_VISION_PAGES: usize = 50;
const PAGES_PER_VISION_CHUNK: usize = 4;
const MAX_VISION_ATTEMPTS: usize = 2;
const PDF_MARKDOWN_PROMPT: &str = "Convert these PDF pages to clean Markdown. Preserve headings, lists, tables, blockquotes, code fences, and inline formatting. Keep the original reading order, avoid commentary, and do NOT wrap the entire response in a Markdown code block.";
const PDF_MARKDOWN_PROMPT_RETRY: &str = "You must transcribe the provided PDF page images into accurate Markdown. The images are already supplied, so do not respond that you cannot view them. Extract all visible text, tables, and structure, and do NOT wrap the overall response in a Markdown code block.";
const NAVIGATION_RETRY_INTERVAL_MS: u64 = 120;
const NAVIGATION_RETRY_ATTEMPTS: usize = 10;
const MIN_PAGE_IMAGE_BYTES: usize = 1_024;
const DEFAULT_VIEWPORT_WIDTH: u32 = 1_248;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 1_800;
const DEFAULT_DEVICE_SCALE_FACTOR: f64 = 1.0;
const CANVAS_VIEWPORT_ATTEMPTS: usize = 12;
const CANVAS_VIEWPORT_WAIT_MS: u64 = 200;

/// An image carried out of a parsed document, in document order.
#[derive(Debug, Clone)]
pub struct ParsedImage {
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub page_number: Option<u32>,
}

/// A table carried out of a parsed document, already rendered as a markdown
/// table (pipe-delimited rows) so the chunker can treat it like any other
/// markdown block.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub markdown: String,
    pub caption: Option<String>,
    pub page_number: Option<u32>,
}

/// Output of `Parser::parse`: prose as markdown plus whatever non-text
/// content the source format carried.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub markdown_body: String,
    pub images: Vec<ParsedImage>,
    pub tables: Vec<ParsedTable>,
    pub heading_hierarchy: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Processing(String),
}

impl From<AppError> for ParseError {
    fn from(err: AppError) -> Self {
        ParseError::Processing(err.to_string())
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        let message = err.to_string();
        match err {
            ParseError::UnsupportedType(_) => AppError::Validation(message),
            ParseError::Corrupt(_) | ParseError::Processing(_) => AppError::Internal(message),
        }
    }
}

/// Turns raw bytes plus a declared content type into a `ParsedDocument`.
/// Implementations MUST remove any temp files they create on every exit
/// path, including error returns.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, bytes: &[u8], content_type: &str) -> Result<ParsedDocument, ParseError>;
}

/// Thin UTF-8 decode for markdown/plain-text input -- no structural
/// transformation, since the source is already in the chunker's native
/// format. `heading_hierarchy` is left empty; the chunker derives its own
/// per-chunk section path by scanning the body for `#` headings.
pub struct MarkdownParser;

#[async_trait]
impl Parser for MarkdownParser {
    async fn parse(&self, bytes: &[u8], _content_type: &str) -> Result<ParsedDocument, ParseError> {
        let markdown_body = String::from_utf8(bytes.to_vec())
            .map_err(|e| ParseError::Corrupt(format!("invalid UTF-8: {e}")))?;

        Ok(ParsedDocument {
            markdown_body,
            ..Default::default()
        })
    }
}

/// Two-tier PDF extraction: a fast text-layer pass, and -- when that layer is
/// missing or looks like garbage -- a vision-model fallback that renders
/// each page and transcribes it to Markdown.
///
/// `pdf-extract` only recovers a reading-order text stream, not layout, so
/// the fast path never yields `images`/`tables`; those are populated only
/// when the vision fallback actually runs, using each rendered page as an
/// image and scanning the model's Markdown output for pipe-table blocks.
pub struct PdfParser {
    openai_client: Client<OpenAIConfig>,
    pdf_ingest_mode: PdfIngestMode,
    vision_model: String,
}

impl PdfParser {
    pub fn new(
        openai_client: Client<OpenAIConfig>,
        pdf_ingest_mode: PdfIngestMode,
        vision_model: String,
    ) -> Self {
        Self {
            openai_client,
            pdf_ingest_mode,
            vision_model,
        }
    }
}

#[async_trait]
impl Parser for PdfParser {
    async fn parse(&self, bytes: &[u8], _content_type: &str) -> Result<ParsedDocument, ParseError> {
        if let Some(text) = try_fast_path(bytes.to_vec()).await? {
            return Ok(ParsedDocument {
                heading_hierarchy: extract_headings(&text),
                markdown_body: text,
                ..Default::default()
            });
        }

        if matches!(self.pdf_ingest_mode, PdfIngestMode::Classic) {
            return Err(ParseError::Corrupt(
                "PDF text extraction failed and vision fallback is disabled".into(),
            ));
        }

        let page_numbers = load_page_numbers(bytes.to_vec()).await?;
        if page_numbers.is_empty() {
            return Err(ParseError::Corrupt("PDF appears to have no pages".into()));
        }
        if page_numbers.len() > MAX_VISION_PAGES {
            return Err(ParseError::Processing(format!(
                "PDF has {} pages which exceeds the vision processing limit of {}",
                page_numbers.len(),
                MAX_VISION_PAGES
            )));
        }

        let temp_pdf = materialize_temp_pdf(bytes).await?;
        let rendered_pages = render_pdf_pages(temp_pdf.as_path(), &page_numbers).await?;
        drop(temp_pdf);

        let markdown_body = vision_markdown(&rendered_pages, &self.openai_client, &self.vision_model).await?;
        let markdown_body = post_process(&markdown_body);

        let images = page_numbers
            .iter()
            .zip(rendered_pages)
            .map(|(page, bytes)| ParsedImage {
                bytes,
                caption: None,
                page_number: Some(*page),
            })
            .collect();

        Ok(ParsedDocument {
            heading_hierarchy: extract_headings(&markdown_body),
            tables: extract_tables(&markdown_body),
            markdown_body,
            images,
        })
    }
}

/// Runs `pdf-extract` on the PDF bytes and validates the result with simple
/// heuristics. Returns `Ok(None)` when the text layer is missing or noisy
/// enough that the vision fallback should take over.
async fn try_fast_path(pdf_bytes: Vec<u8>) -> Result<Option<String>, ParseError> {
    let extraction = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&pdf_bytes).map(|s| s.trim().to_string())
    })
    .await
    .map_err(|err| ParseError::Processing(format!("PDF extraction task panicked: {err}")))?
    .map_err(|err| ParseError::Corrupt(format!("failed to extract PDF text: {err}")))?;

    if extraction.is_empty() || !looks_good_enough(&extraction) {
        return Ok(None);
    }

    Ok(Some(reflow_markdown(&extraction)))
}

/// Heuristic that determines whether the fast-path text looks like well-formed prose.
fn looks_good_enough(text: &str) -> bool {
    if text.len() < FAST_PATH_MIN_LEN {
        return false;
    }

    let total_chars = text.chars().count() as f64;
    if total_chars == 0.0 {
        return false;
    }

    let ascii_chars = text.chars().filter(|c| c.is_ascii()).count() as f64;
    if ascii_chars / total_chars < FAST_PATH_MIN_ASCII_RATIO {
        return false;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count() as f64;
    letters / total_chars > 0.3
}

/// Parses the PDF structure to discover the available page numbers, off the
/// async executor since `lopdf` is blocking.
async fn load_page_numbers(pdf_bytes: Vec<u8>) -> Result<Vec<u32>, ParseError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u32>, ParseError> {
        let document = LopdfDocument::load_mem(&pdf_bytes)
            .map_err(|err| ParseError::Corrupt(format!("failed to parse PDF structure: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        Ok(page_numbers)
    })
    .await
    .map_err(|err| ParseError::Processing(format!("PDF page scan task panicked: {err}")))?
}

struct TempPdfGuard {
    path: PathBuf,
}

impl TempPdfGuard {
    fn as_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPdfGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Headless Chrome navigates PDFs via a `file://` URL, so the in-memory
/// bytes need a real path on disk for the duration of rendering.
async fn materialize_temp_pdf(bytes: &[u8]) -> Result<TempPdfGuard, ParseError> {
    let mut path = env::temp_dir();
    path.push(format!("ingest-pdf-{}.pdf", Uuid::new_v4()));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|err| ParseError::Processing(format!("failed to stage PDF for rendering: {err}")))?;
    Ok(TempPdfGuard { path })
}

/// Uses headless Chrome's built-in PDF viewer to rasterize the requested pages into PNGs.
async fn render_pdf_pages(file_path: &Path, pages: &[u32]) -> Result<Vec<Vec<u8>>, ParseError> {
    let file_url = url::Url::from_file_path(file_path)
        .map_err(|_| ParseError::Processing("unable to construct PDF file URL".into()))?;

    let browser = create_browser()?;
    let tab = browser
        .new_tab()
        .map_err(|err| ParseError::Processing(format!("failed to create Chrome tab: {err}")))?;

    tab.set_default_timeout(Duration::from_secs(10));
    configure_tab(&tab)?;
    set_pdf_viewport(&tab)?;

    let mut captures = Vec::with_capacity(pages.len());

    for (idx, page) in pages.iter().enumerate() {
        let target = format!("{}#page={}&toolbar=0&statusbar=0&zoom=page-fit", file_url, page);
        tab.navigate_to(&target)
            .map_err(|err| ParseError::Processing(format!("failed to navigate to PDF page: {err}")))?
            .wait_until_navigated()
            .map_err(|err| ParseError::Processing(format!("navigation to PDF page failed: {err}")))?;

        let mut loaded = false;
        for attempt in 0..NAVIGATION_RETRY_ATTEMPTS {
            if tab.wait_for_element("embed, canvas, body").map(|_| ()).is_ok() {
                loaded = true;
                break;
            }
            if attempt + 1 < NAVIGATION_RETRY_ATTEMPTS {
                sleep(Duration::from_millis(NAVIGATION_RETRY_INTERVAL_MS)).await;
            }
        }

        if !loaded {
            return Err(ParseError::Processing(
                "timed out waiting for Chrome to render PDF page".into(),
            ));
        }

        wait_for_pdf_ready(&tab, *page)?;
        sleep(Duration::from_millis(350)).await;

        prepare_pdf_viewer(&tab, *page);

        let mut viewport: Option<Page::Viewport> = None;
        for attempt in 0..CANVAS_VIEWPORT_ATTEMPTS {
            match canvas_viewport_for_page(&tab, *page) {
                Ok(Some(vp)) => {
                    viewport = Some(vp);
                    break;
                }
                Ok(None) => {
                    if attempt + 1 < CANVAS_VIEWPORT_ATTEMPTS {
                        sleep(Duration::from_millis(CANVAS_VIEWPORT_WAIT_MS)).await;
                    }
                }
                Err(err) => {
                    warn!(page = *page, error = %err, "failed to derive canvas viewport");
                    break;
                }
            }
        }

        let png = if let Some(clip) = viewport {
            match tab.call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip: Some(clip),
                from_surface: Some(true),
                capture_beyond_viewport: Some(true),
                optimize_for_speed: Some(false),
            }) {
                Ok(data) => STANDARD.decode(data.data).unwrap_or_else(|err| {
                    warn!(error = %err, page = *page, "failed to decode clipped screenshot, falling back to full page capture");
                    capture_full_page_png(&tab).unwrap_or_default()
                }),
                Err(err) => {
                    warn!(error = %err, page = *page, "clipped screenshot failed, falling back to full page capture");
                    capture_full_page_png(&tab)?
                }
            }
        } else {
            warn!(page = *page, "unable to determine canvas viewport, capturing full page");
            capture_full_page_png(&tab)?
        };

        debug!(page = *page, bytes = png.len(), page_index = idx, "captured PDF page screenshot");

        if is_suspicious_image(png.len()) {
            warn!(page = *page, bytes = png.len(), "screenshot size below threshold");
        }

        captures.push(png);
    }

    Ok(captures)
}

fn create_browser() -> Result<Browser, ParseError> {
    #[cfg(feature = "docker")]
    {
        let options = headless_chrome::LaunchOptionsBuilder::default()
            .sandbox(false)
            .build()
            .map_err(|err| ParseError::Processing(format!("failed to launch Chrome: {err}")))?;
        Browser::new(options).map_err(|err| ParseError::Processing(format!("failed to start Chrome: {err}")))
    }
    #[cfg(not(feature = "docker"))]
    {
        Browser::default().map_err(|err| ParseError::Processing(format!("failed to start Chrome: {err}")))
    }
}

fn configure_tab(tab: &headless_chrome::Tab) -> Result<(), ParseError> {
    tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
        color: Some(DOM::RGBA {
            r: 255,
            g: 255,
            b: 255,
            a: Some(1.0),
        }),
    })
    .map_err(|err| ParseError::Processing(format!("failed to configure Chrome page background: {err}")))?;

    Ok(())
}

fn set_pdf_viewport(tab: &headless_chrome::Tab) -> Result<(), ParseError> {
    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: DEFAULT_VIEWPORT_WIDTH,
        height: DEFAULT_VIEWPORT_HEIGHT,
        device_scale_factor: DEFAULT_DEVICE_SCALE_FACTOR,
        mobile: false,
        scale: None,
        screen_width: Some(DEFAULT_VIEWPORT_WIDTH),
        screen_height: Some(DEFAULT_VIEWPORT_HEIGHT),
        position_x: None,
        position_y: None,
        dont_set_visible_size: Some(false),
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|err| ParseError::Processing(format!("failed to configure Chrome viewport: {err}")))?;

    tab.call_method(Emulation::SetVisibleSize {
        width: DEFAULT_VIEWPORT_WIDTH,
        height: DEFAULT_VIEWPORT_HEIGHT,
    })
    .map_err(|err| ParseError::Processing(format!("failed to apply Chrome visible size: {err}")))?;

    Ok(())
}

fn wait_for_pdf_ready(
    tab: &headless_chrome::Tab,
    page_number: u32,
) -> Result<headless_chrome::Element<'_>, ParseError> {
    let element = tab
        .wait_for_element_with_custom_timeout("embed[type='application/pdf']", Duration::from_secs(8))
        .or_else(|_| tab.wait_for_element_with_custom_timeout("embed", Duration::from_secs(8)))
        .map_err(|err| ParseError::Processing(format!("timed out waiting for PDF content: {err}")))?;

    if let Err(err) = element.scroll_into_view() {
        debug!("failed to scroll PDF element into view: {err}");
    }

    debug!(page = page_number, "PDF viewer element located");

    Ok(element)
}

fn prepare_pdf_viewer(tab: &headless_chrome::Tab, page_number: u32) {
    let script = format!(
        r#"(function() {{
            const embed = document.querySelector('embed[type="application/pdf"]') || document.querySelector('embed');
            if (!embed || !embed.shadowRoot) return false;
            const viewer = embed.shadowRoot.querySelector('pdf-viewer');
            if (!viewer || !viewer.shadowRoot) return false;
            const app = viewer.shadowRoot.querySelector('viewer-app');
            if (app && app.shadowRoot) {{
                const toolbar = app.shadowRoot.querySelector('#toolbar');
                if (toolbar) {{ toolbar.style.display = 'none'; }}
            }}
            const page = viewer.shadowRoot.querySelector('viewer-page:nth-of-type({page})');
            if (page && page.scrollIntoView) {{
                page.scrollIntoView({{ block: 'start', inline: 'center' }});
            }}
            const canvas = viewer.shadowRoot.querySelector('canvas[aria-label="Page {page}"]');
            return !!canvas;
        }})()"#,
        page = page_number
    );

    if let Err(err) = tab.evaluate(&script, false) {
        debug!(page = page_number, error = %err, "unable to run PDF viewer preparation script");
    }
}

fn canvas_viewport_for_page(
    tab: &headless_chrome::Tab,
    page_number: u32,
) -> Result<Option<Page::Viewport>, ParseError> {
    let script = format!(
        r#"(function() {{
            const embed = document.querySelector('embed[type="application/pdf"]') || document.querySelector('embed');
            if (!embed || !embed.shadowRoot) return null;
            const viewer = embed.shadowRoot.querySelector('pdf-viewer');
            if (!viewer || !viewer.shadowRoot) return null;
            const canvas = viewer.shadowRoot.querySelector('canvas[aria-label="Page {page}"]');
            if (!canvas) return null;
            const rect = canvas.getBoundingClientRect();
            return {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }};
        }})()"#,
        page = page_number
    );

    let result = tab
        .evaluate(&script, false)
        .map_err(|err| ParseError::Processing(format!("failed to inspect PDF canvas: {err}")))?;

    let Some(value) = result.value else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }

    let x = value.get("x").and_then(Value::as_f64).unwrap_or_default().max(0.0);
    let y = value.get("y").and_then(Value::as_f64).unwrap_or_default().max(0.0);
    let width = value.get("width").and_then(Value::as_f64).unwrap_or_default();
    let height = value.get("height").and_then(Value::as_f64).unwrap_or_default();

    if width <= 0.0 || height <= 0.0 {
        return Ok(None);
    }

    Ok(Some(Page::Viewport {
        x,
        y,
        width,
        height,
        scale: 1.0,
    }))
}

fn capture_full_page_png(tab: &headless_chrome::Tab) -> Result<Vec<u8>, ParseError> {
    let screenshot = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(Page::CaptureScreenshotFormatOption::Png),
            quality: None,
            clip: None,
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: Some(false),
        })
        .map_err(|err| ParseError::Processing(format!("failed to capture PDF page (fallback): {err}")))?;

    STANDARD
        .decode(screenshot.data)
        .map_err(|err| ParseError::Processing(format!("failed to decode PDF screenshot (fallback): {err}")))
}

fn is_suspicious_image(len: usize) -> bool {
    len < MIN_PAGE_IMAGE_BYTES
}

/// Sends rendered pages to the configured vision model in small batches and
/// stitches the resulting Markdown chunks together.
async fn vision_markdown(
    rendered_pages: &[Vec<u8>],
    client: &Client<OpenAIConfig>,
    vision_model: &str,
) -> Result<String, ParseError> {
    let mut markdown_sections = Vec::with_capacity(rendered_pages.len());

    for (batch_idx, chunk) in rendered_pages.chunks(PAGES_PER_VISION_CHUNK).enumerate() {
        let encoded_images: Vec<String> = chunk.iter().map(|png_bytes| STANDARD.encode(png_bytes)).collect();

        let mut batch_markdown: Option<String> = None;

        for attempt in 0..MAX_VISION_ATTEMPTS {
            let prompt_text = prompt_for_attempt(attempt);

            let mut content_parts = Vec::with_capacity(encoded_images.len() + 1);
            content_parts.push(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt_text)
                    .build()
                    .map_err(AppError::from)?
                    .into(),
            );

            for encoded in &encoded_images {
                let image_url = format!("data:image/png;base64,{}", encoded);
                content_parts.push(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::High)
                                .build()
                                .map_err(AppError::from)?,
                        )
                        .build()
                        .map_err(AppError::from)?
                        .into(),
                );
            }

            let request = CreateChatCompletionRequestArgs::default()
                .model(vision_model)
                .messages([ChatCompletionRequestUserMessageArgs::default()
                    .content(content_parts)
                    .build()
                    .map_err(AppError::from)?
                    .into()])
                .build()
                .map_err(AppError::from)?;

            let response = client.chat().create(request).await.map_err(AppError::from)?;
            let Some(content) = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
            else {
                warn!(batch = batch_idx, attempt, "vision response missing content");
                continue;
            };

            if is_low_quality_response(content) {
                warn!(batch = batch_idx, attempt, "vision model returned low quality response");
                if attempt + 1 == MAX_VISION_ATTEMPTS {
                    return Err(ParseError::Processing(
                        "vision model failed to transcribe PDF page contents".into(),
                    ));
                }
                continue;
            }

            batch_markdown = Some(content.trim().to_string());
            break;
        }

        match batch_markdown {
            Some(markdown) => markdown_sections.push(markdown),
            None => {
                return Err(ParseError::Processing(
                    "vision model did not return usable Markdown".into(),
                ))
            }
        }
    }

    Ok(markdown_sections.join("\n\n"))
}

fn is_low_quality_response(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    lowered.contains("unable to") || lowered.contains("cannot")
}

fn prompt_for_attempt(attempt: usize) -> &'static str {
    if attempt == 0 {
        PDF_MARKDOWN_PROMPT
    } else {
        PDF_MARKDOWN_PROMPT_RETRY
    }
}

/// Cleans, trims, and reflows Markdown produced by the vision model.
fn post_process(markdown: &str) -> String {
    let cleaned = markdown.replace('\r', "");
    reflow_markdown(cleaned.trim())
}

/// Joins hard-wrapped paragraph text while preserving structural Markdown lines.
fn reflow_markdown(input: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut buffer: Vec<String> = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !buffer.is_empty() {
                paragraphs.push(buffer.join(" "));
                buffer.clear();
            }
            continue;
        }

        if is_structural_line(trimmed) {
            if !buffer.is_empty() {
                paragraphs.push(buffer.join(" "));
                buffer.clear();
            }
            paragraphs.push(trimmed.to_string());
            continue;
        }

        buffer.push(trimmed.to_string());
    }

    if !buffer.is_empty() {
        paragraphs.push(buffer.join(" "));
    }

    paragraphs.join("\n\n")
}

fn is_structural_line(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    line.starts_with('#')
        || line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('>')
        || line.starts_with("```")
        || line.starts_with('~')
        || line.starts_with("| ")
        || line.starts_with("+-")
        || lowered.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) && lowered.contains('.')
}

/// Collects `#`-prefixed heading lines in document order, stripped of their
/// leading hashes, to satisfy `ParsedDocument::heading_hierarchy`.
fn extract_headings(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|heading| !heading.is_empty())
        .collect()
}

/// Scans Markdown for contiguous blocks of pipe-table rows and returns each
/// as its own `ParsedTable`. The vision prompt asks the model to preserve
/// tables as Markdown, so this is a syntactic split rather than a layout
/// reconstruction.
fn extract_tables(markdown: &str) -> Vec<ParsedTable> {
    let mut tables = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1 {
            current.push(trimmed);
        } else if !current.is_empty() {
            tables.push(ParsedTable {
                markdown: current.join("\n"),
                caption: None,
                page_number: None,
            });
            current.clear();
        }
    }
    if !current.is_empty() {
        tables.push(ParsedTable {
            markdown: current.join("\n"),
            caption: None,
            page_number: None,
        });
    }

    tables
}

/// Dispatches on declared content type to the matching parser. Any type
/// neither markdown-ish nor PDF fails with `UnsupportedType` rather than
/// guessing.
pub async fn parse_document(
    bytes: &[u8],
    content_type: &str,
    openai_client: &Client<OpenAIConfig>,
    pdf_ingest_mode: &PdfIngestMode,
    vision_model: &str,
) -> Result<ParsedDocument, AppError> {
    match content_type {
        "text/markdown" | "text/plain" => Ok(MarkdownParser.parse(bytes, content_type).await?),
        "application/pdf" => {
            let parser = PdfParser::new(openai_client.clone(), pdf_ingest_mode.clone(), vision_model.to_string());
            Ok(parser.parse(bytes, content_type).await?)
        }
        other => Err(ParseError::UnsupportedType(other.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn markdown_parser_decodes_utf8_body_unchanged() {
        let parsed = MarkdownParser
            .parse(b"# Title\n\nBody text.", "text/markdown")
            .await
            .unwrap();
        assert_eq!(parsed.markdown_body, "# Title\n\nBody text.");
        assert!(parsed.images.is_empty());
        assert!(parsed.tables.is_empty());
    }

    #[tokio::test]
    async fn markdown_parser_rejects_invalid_utf8() {
        let invalid = vec![0xFF, 0xFE, 0xFD];
        let result = MarkdownParser.parse(&invalid, "text/markdown").await;
        assert!(matches!(result, Err(ParseError::Corrupt(_))));
    }

    #[tokio::test]
    async fn parse_document_rejects_unknown_content_type() {
        let client = Client::with_config(OpenAIConfig::default());
        let result = parse_document(
            b"whatever",
            "application/x-proprietary",
            &client,
            &PdfIngestMode::Classic,
            "gpt-4o-mini",
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn parse_document_dispatches_markdown() {
        let client = Client::with_config(OpenAIConfig::default());
        let parsed = parse_document(
            b"hello",
            "text/markdown",
            &client,
            &PdfIngestMode::Classic,
            "gpt-4o-mini",
        )
        .await
        .unwrap();
        assert_eq!(parsed.markdown_body, "hello");
    }

    #[test]
    fn looks_good_enough_rejects_short_text() {
        assert!(!looks_good_enough("too short"));
    }

    #[test]
    fn looks_good_enough_accepts_ascii_prose() {
        let text = "This is a reasonably long ASCII text that should pass the heuristic. \
        It contains multiple sentences and a decent amount of letters to satisfy the threshold.";
        assert!(looks_good_enough(text));
    }

    #[test]
    fn reflow_markdown_preserves_lists() {
        let output = reflow_markdown("Item one\nItem two\n\n- Bullet\n- Another");
        assert!(output.contains("Item one Item two"));
        assert!(output.contains("- Bullet"));
    }

    #[test]
    fn extract_headings_strips_hashes_in_order() {
        let headings = extract_headings("# First\nbody\n## Second\nmore body");
        assert_eq!(headings, vec!["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn extract_tables_groups_contiguous_pipe_rows() {
        let markdown = "prose\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\nmore prose";
        let tables = extract_tables(markdown);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].markdown.contains("| 1 | 2 |"));
    }

    #[test]
    fn is_low_quality_response_detects_refusals() {
        assert!(is_low_quality_response(""));
        assert!(is_low_quality_response("I'm unable to help."));
        assert!(!is_low_quality_response("# Heading\nValid content"));
    }
}
