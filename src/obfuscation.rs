//! HTML/JS obfuscation
//!
//! Makes generated completions harder to fingerprint before they are shown
//! to workers. The markup keeps rendering the same:
//! - minification (trimmed lines, no whitespace between tags)
//! - random attributes on start tags
//! - hidden dummy `div`s at the end of the body
//! - shuffled attribute order
//! - random enclosing comments
//!
//! `<script>` and `<style>` bodies are never rewritten.

use base64::Engine;
use md5::{Digest, Md5};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{DojoError, Result};
use crate::protocol::CompletionResponse;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

struct Patterns {
    raw_block: Regex,
    start_tag: Regex,
    attribute: Regex,
    between_tags: Regex,
}

impl Patterns {
    fn compile() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            raw_block: Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")?,
            start_tag: Regex::new(
                r#"<([a-zA-Z][a-zA-Z0-9-]*)((?:\s+[^\s=>/"']+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>"']+))?)*)\s*(/?)>"#,
            )?,
            attribute: Regex::new(r#"([^\s=>/"']+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+))?"#)?,
            between_tags: Regex::new(r">\s+<")?,
        })
    }
}

fn patterns() -> Result<&'static Patterns> {
    static PATTERNS: OnceLock<std::result::Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(Patterns::compile)
        .as_ref()
        .map_err(|e| DojoError::Other(format!("Invalid markup pattern: {}", e)))
}

/// Random identifier: a letter followed by letters and digits
pub fn generate_random_string(length: usize) -> String {
    random_string(&mut rand::thread_rng(), length)
}

fn random_string<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|i| {
            let set = if i == 0 { ALPHABET } else { ALPHANUMERIC };
            set[rng.gen_range(0..set.len())] as char
        })
        .collect()
}

/// XOR every byte with `key`, then base64
pub fn simple_encrypt(text: &str, key: u8) -> String {
    let bytes: Vec<u8> = text.bytes().map(|b| b ^ key).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Apply `f` to the markup between `<script>`/`<style>` blocks
fn map_markup(p: &Patterns, content: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for block in p.raw_block.find_iter(content) {
        out.push_str(&f(&content[last..block.start()]));
        out.push_str(block.as_str());
        last = block.end();
    }
    out.push_str(&f(&content[last..]));
    out
}

/// Trim lines and drop blank ones
pub fn simple_minify(code: &str) -> String {
    code.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn minify_html(content: &str) -> Result<String> {
    let p = patterns()?;
    let trimmed = simple_minify(content);
    Ok(map_markup(p, &trimmed, |segment| {
        p.between_tags.replace_all(segment, "><").into_owned()
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    RandomAttributes,
    DummyElements,
    ShuffleAttributes,
}

const TECHNIQUES: [Technique; 3] = [
    Technique::RandomAttributes,
    Technique::DummyElements,
    Technique::ShuffleAttributes,
];

pub struct HtmlObfuscator<R: Rng> {
    rng: R,
}

impl HtmlObfuscator<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> HtmlObfuscator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Rewrite every start tag outside raw blocks
    fn rewrite_start_tags(
        &mut self,
        content: &str,
        mut rewrite: impl FnMut(&mut R, &mut Vec<String>),
    ) -> Result<String> {
        let p = patterns()?;
        let rng = &mut self.rng;
        Ok(map_markup(p, content, |segment| {
            p.start_tag
                .replace_all(segment, |caps: &regex::Captures<'_>| {
                    let mut attrs: Vec<String> = p
                        .attribute
                        .find_iter(&caps[2])
                        .map(|m| m.as_str().to_string())
                        .collect();
                    rewrite(rng, &mut attrs);

                    let mut tag = format!("<{}", &caps[1]);
                    for attr in &attrs {
                        tag.push(' ');
                        tag.push_str(attr);
                    }
                    if !caps[3].is_empty() {
                        tag.push_str(" /");
                    }
                    tag.push('>');
                    tag
                })
                .into_owned()
        }))
    }

    /// Give roughly 30% of tags an extra random attribute
    pub fn add_random_attributes(&mut self, content: &str) -> Result<String> {
        self.rewrite_start_tags(content, |rng, attrs| {
            if rng.gen_bool(0.3) {
                let name = random_string(rng, 5);
                let value = random_string(rng, 8);
                attrs.push(format!("{}=\"{}\"", name, value));
            }
        })
    }

    /// Put 1 to 5 hidden divs before `</body>`, or at the end
    pub fn add_dummy_elements(&mut self, content: &str) -> String {
        let count = self.rng.gen_range(1..=5);
        let dummies: String = (0..count)
            .map(|_| {
                format!(
                    "<div style=\"display:none;\">{}</div>",
                    random_string(&mut self.rng, 20)
                )
            })
            .collect();

        match content.to_ascii_lowercase().rfind("</body>") {
            Some(idx) => format!("{}{}{}", &content[..idx], dummies, &content[idx..]),
            None => format!("{}{}", content, dummies),
        }
    }

    pub fn shuffle_attributes(&mut self, content: &str) -> Result<String> {
        self.rewrite_start_tags(content, |rng, attrs| attrs.shuffle(rng))
    }

    pub fn add_enclosing_comments(&mut self, content: &str) -> String {
        format!(
            "<!-- {} -->\n{}\n<!-- {} -->",
            random_string(&mut self.rng, 16),
            content,
            random_string(&mut self.rng, 16)
        )
    }

    /// Random non-empty subset of techniques, in random order
    pub fn apply_techniques(&mut self, content: &str) -> Result<String> {
        let count = self.rng.gen_range(1..=TECHNIQUES.len());
        let chosen: Vec<Technique> = TECHNIQUES
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect();

        let mut out = content.to_string();
        for technique in chosen {
            out = match technique {
                Technique::RandomAttributes => self.add_random_attributes(&out)?,
                Technique::DummyElements => self.add_dummy_elements(&out),
                Technique::ShuffleAttributes => self.shuffle_attributes(&out)?,
            };
        }
        Ok(out)
    }

    fn try_obfuscate(&mut self, content: &str) -> Result<String> {
        let p = patterns()?;
        if !p.start_tag.is_match(content) && !p.raw_block.is_match(content) {
            return Err(DojoError::Other("No HTML markup found".to_string()));
        }

        let minified = minify_html(content)?;
        let mut obfuscated = self.apply_techniques(&minified)?;
        if self.rng.gen_bool(0.5) {
            obfuscated = self.add_enclosing_comments(&obfuscated);
        }
        Ok(obfuscated)
    }

    /// Obfuscate markup. Content that is not HTML is only minified.
    pub fn obfuscate(&mut self, content: &str) -> String {
        match self.try_obfuscate(content) {
            Ok(obfuscated) => obfuscated,
            Err(e) => {
                error!("Minification failed: {}", e);
                warn!("Falling back to simple minification.");
                simple_minify(content)
            }
        }
    }
}

/// Obfuscate on the blocking pool. The original content comes back when
/// `timeout` expires.
pub async fn obfuscate_html_and_js(content: String, timeout: Duration) -> String {
    let input = content.clone();
    let task = tokio::task::spawn_blocking(move || HtmlObfuscator::from_entropy().obfuscate(&input));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(obfuscated)) => obfuscated,
        Ok(Err(e)) => {
            error!("Obfuscation task failed: {}", e);
            content
        }
        Err(_) => {
            error!("Obfuscation timed out after {} seconds", timeout.as_secs());
            content
        }
    }
}

/// Obfuscate every `.html` file of the code completions
pub async fn obfuscate_completion_files(completions: &mut [CompletionResponse], timeout: Duration) {
    for response in completions.iter_mut() {
        let Some(files) = response.completion.files_mut() else {
            continue;
        };
        for file in files.iter_mut() {
            if file.filename.to_ascii_lowercase().ends_with(".html") {
                let content = std::mem::take(&mut file.content);
                file.content = obfuscate_html_and_js(content, timeout).await;
            }
        }
    }
}

pub fn md5_hex(content: &str) -> String {
    hex::encode(Md5::digest(content.as_bytes()))
}

/// `page.html` -> `page_obfuscated.html`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{}_obfuscated.{}", stem, ext.to_string_lossy()),
        None => format!("{}_obfuscated", stem),
    };
    PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationReport {
    pub output: PathBuf,
    pub original_md5: String,
    pub obfuscated_md5: String,
}

/// Obfuscate `input` into `output`, logging both digests
pub async fn process_file(input: &Path, output: &Path) -> Result<ObfuscationReport> {
    let original = tokio::fs::read_to_string(input).await?;
    let obfuscated = obfuscate_html_and_js(original.clone(), DEFAULT_TIMEOUT).await;
    tokio::fs::write(output, &obfuscated).await?;
    info!("Obfuscated content has been written to {:?}", output);

    let report = ObfuscationReport {
        output: output.to_path_buf(),
        original_md5: md5_hex(&original),
        obfuscated_md5: md5_hex(&obfuscated),
    };
    info!("Original content MD5: {}", report.original_md5);
    info!("Obfuscated content MD5: {}", report.obfuscated_md5);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CodeAnswer, CodeFile, Completion};

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Clock</title>
    <style>
      body > div { color: red; }
    </style>
  </head>
  <body class="main" id="root">

    <div data-x='1'>tick</div>
    <input type="text" disabled />
    <script>
      if (a<b && c>d) { draw(); }
    </script>
  </body>
</html>"#;

    fn obfuscator(seed: u64) -> HtmlObfuscator<StdRng> {
        HtmlObfuscator::new(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_random_string_starts_with_letter() {
        for len in [1, 5, 16] {
            let s = generate_random_string(len);
            assert_eq!(s.len(), len);
            assert!(s.chars().next().unwrap().is_ascii_alphabetic());
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        assert_eq!(generate_random_string(0), "");
    }

    #[test]
    fn test_simple_encrypt() {
        assert_eq!(simple_encrypt("abc", 1), "YGNi");
        assert_eq!(simple_encrypt("", 7), "");
    }

    #[test]
    fn test_minify_keeps_script_body() {
        let minified = minify_html(PAGE).unwrap();
        assert!(minified.contains("<head><title>Clock</title>"));
        assert!(!minified.contains("\n\n"));
        assert!(minified.contains("if (a<b && c>d) { draw(); }"));
        assert!(minified.contains("body > div { color: red; }"));
    }

    #[test]
    fn test_dummy_elements_before_body_end() {
        let out = obfuscator(1).add_dummy_elements("<body><p>x</p></body>");
        let hidden = out.matches("display:none;").count();
        assert!((1..=5).contains(&hidden));
        assert!(out.ends_with("</body>"));

        let appended = obfuscator(1).add_dummy_elements("<p>x</p>");
        assert!(appended.starts_with("<p>x</p><div"));
    }

    #[test]
    fn test_shuffle_keeps_attributes() {
        let html = r#"<div a="1" b='2' c=3 d>x</div><br/>"#;
        for seed in 0..10 {
            let out = obfuscator(seed).shuffle_attributes(html).unwrap();
            for attr in [r#"a="1""#, "b='2'", "c=3", " d"] {
                assert!(out.contains(attr), "{} missing from {}", attr, out);
            }
            assert!(out.contains("<br />"));
            assert!(out.ends_with(">x</div><br />"));
        }
    }

    #[test]
    fn test_random_attributes_skip_script() {
        let html = "<p>1</p><p>2</p><p>3</p><p>4</p><p>5</p><p>6</p><p>7</p><p>8</p>\
                    <script>if (a<b && c>d) {}</script>";
        let out = obfuscator(7).add_random_attributes(&html.repeat(4)).unwrap();
        assert!(out.contains("<script>if (a<b && c>d) {}</script>"));
        assert!(out.matches("</p>").count() == 32);
    }

    #[test]
    fn test_obfuscate_changes_but_keeps_content() {
        for seed in 0..20 {
            let out = obfuscator(seed).obfuscate(PAGE);
            assert!(out.contains("tick"));
            assert!(out.contains("</body>"));
            assert!(out.contains("if (a<b && c>d) { draw(); }"));
            assert_ne!(out, PAGE);
        }
    }

    #[test]
    fn test_plain_js_falls_back_to_minify() {
        let js = "  const x = 1;\n\n  console.log(x);  ";
        assert_eq!(obfuscator(3).obfuscate(js), "const x = 1;\nconsole.log(x);");
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/page.html")),
            PathBuf::from("page_obfuscated.html")
        );
        assert_eq!(
            default_output_path(Path::new("index")),
            PathBuf::from("index_obfuscated")
        );
    }

    #[tokio::test]
    async fn test_process_file_reports_digests() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.html");
        let output = dir.path().join("out.html");
        std::fs::write(&input, PAGE).unwrap();

        let report = process_file(&input, &output).await.unwrap();
        assert_eq!(report.original_md5, md5_hex(PAGE));
        assert_ne!(report.original_md5, report.obfuscated_md5);
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(md5_hex(&written), report.obfuscated_md5);
    }

    #[tokio::test]
    async fn test_process_file_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = process_file(&dir.path().join("nope.html"), &dir.path().join("o.html")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_obfuscate_completion_files_only_html() {
        let mut completions = vec![CompletionResponse::new(
            "model-a",
            Completion::Code(CodeAnswer {
                files: vec![
                    CodeFile {
                        filename: "index.HTML".to_string(),
                        content: PAGE.to_string(),
                        language: None,
                    },
                    CodeFile {
                        filename: "app.js".to_string(),
                        content: "  let a = 1;".to_string(),
                        language: None,
                    },
                ],
            }),
        )];

        obfuscate_completion_files(&mut completions, DEFAULT_TIMEOUT).await;
        let files = completions[0].completion.files_mut().unwrap();
        assert_ne!(files[0].content, PAGE);
        assert!(files[0].content.contains("tick"));
        assert_eq!(files[1].content, "  let a = 1;");
    }
}
