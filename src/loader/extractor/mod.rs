
use anyhow::{Result, anyhow};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

/// Elements whose content is never visible page text
const UNWANTED_SELECTOR: &str = "script, style, noscript, template, iframe, svg, canvas, nav, \
     header, footer, aside, button, form, select, .advertisement, .ads, .sidebar, .menu, \
     .navigation, .breadcrumb, .skip-link";

const MAIN_CONTENT_SELECTOR: &str = "main, article, [role=main], .content, .main-content, #content, #main";

/// Elements that start a new paragraph in the extracted text
const BLOCK_ELEMENTS: &[&str] = &[
    "address",
    "article",
    "blockquote",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
    "main",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "ul",
];

/// Elements that start a new line but not a new paragraph
const LINE_ELEMENTS: &[&str] = &["br", "li", "tr", "caption"];

/// Visible text of a document together with its title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub title: Option<String>,
    pub text: String,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{css}': {e}"))
}

/// Strip markup and page chrome from an HTML document
pub fn extract_html(html: &str) -> Result<ExtractedText> {
    let document = Html::parse_document(html);

    let title_selector = selector("title")?;
    let title = document
        .select(&title_selector)
        .next()
        .map(|title| collapse_whitespace(&title.text().collect::<String>()))
        .filter(|title| !title.is_empty());

    let cleaned = clean_content(document)?;
    let mut raw = String::new();
    collect_text(cleaned.root_element(), &mut raw, false);
    let text = normalize_lines(&raw);

    debug!(
        "Extracted HTML content: title={:?}, {} chars",
        title,
        text.chars().count()
    );

    Ok(ExtractedText { title, text })
}

fn clean_content(document: Html) -> Result<Html> {
    let unwanted_selector = selector(UNWANTED_SELECTOR)?;
    let main_content_selector = selector(MAIN_CONTENT_SELECTOR)?;
    let body_selector = selector("body")?;

    let fragment = document
        .select(&main_content_selector)
        .next()
        .or_else(|| document.select(&body_selector).next())
        .map(|element| element.html());

    let mut cleaned = match fragment {
        Some(html) => Html::parse_fragment(&html),
        None => document,
    };
    remove_unwanted_elements(&mut cleaned, &unwanted_selector);

    Ok(cleaned)
}

fn remove_unwanted_elements(document: &mut Html, unwanted_selector: &Selector) {
    // Collect ids first; detaching while iterating would invalidate the selection
    let unwanted_node_ids: Vec<_> = document
        .select(unwanted_selector)
        .map(|element| element.id())
        .collect();

    for node_id in unwanted_node_ids {
        if let Some(mut node) = document.tree.get_mut(node_id) {
            node.detach();
        }
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String, preformatted: bool) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                if preformatted {
                    out.push_str(text);
                } else {
                    push_inline(out, text);
                }
            }
            Node::Element(child_element) => {
                let Some(child_ref) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_element.name();
                if name == "title" || name == "head" {
                    continue;
                }

                let is_block = BLOCK_ELEMENTS.contains(&name);
                let is_line = LINE_ELEMENTS.contains(&name);
                if is_block {
                    out.push_str("\n\n");
                } else if is_line {
                    out.push('\n');
                }

                collect_text(child_ref, out, preformatted || name == "pre");

                if is_block {
                    out.push_str("\n\n");
                } else if matches!(name, "td" | "th") {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Append text with whitespace runs collapsed to single spaces
fn push_inline(out: &mut String, text: &str) {
    let mut previous_space = out.ends_with(char::is_whitespace);
    for c in text.chars() {
        if c.is_whitespace() {
            if !previous_space {
                out.push(' ');
                previous_space = true;
            }
        } else {
            out.push(c);
            previous_space = false;
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim every line and fold runs of blank lines into one paragraph break
fn normalize_lines(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut paragraph_break = false;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            paragraph_break = !out.is_empty();
            continue;
        }

        if !out.is_empty() {
            out.push_str(if paragraph_break { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        paragraph_break = false;
    }

    out
}

/// Render markdown to plain text, keeping paragraph structure
pub fn extract_markdown(markdown: &str) -> ExtractedText {
    let mut text = String::new();
    let mut title: Option<String> = None;
    let mut heading = String::new();
    let mut in_heading = false;
    let mut title_level = HeadingLevel::H6;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                heading.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                // The shallowest heading wins; ties go to the first one
                let is_better_title = title.is_none() || level < title_level;
                if is_better_title && !heading.trim().is_empty() {
                    title = Some(heading.trim().to_string());
                    title_level = level;
                }
                in_heading = false;
                text.push_str("\n\n");
            }
            Event::Start(Tag::Item) => {
                text.push_str("\n- ");
            }
            Event::End(
                TagEnd::Paragraph | TagEnd::CodeBlock | TagEnd::BlockQuote(_) | TagEnd::List(_),
            ) => {
                text.push_str("\n\n");
            }
            Event::Text(fragment) | Event::Code(fragment) => {
                if in_heading {
                    heading.push_str(&fragment);
                }
                text.push_str(&fragment);
            }
            Event::SoftBreak => text.push(' '),
            Event::HardBreak | Event::Rule => text.push('\n'),
            _ => {}
        }
    }

    ExtractedText {
        title,
        text: normalize_lines(&text),
    }
}
