//! HTML to Markdown conversion
//!
//! A small structural converter over a parsed `scraper` tree. Block
//! elements become paragraphs separated by blank lines, inline elements
//! become lightweight markup inside the current paragraph.

use scraper::{node::Node, ElementRef, Html};

/// Convert an HTML fragment to Markdown
pub fn html_to_markdown(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_to_markdown(fragment.root_element())
}

/// Convert the children of an already parsed element to Markdown
pub fn element_to_markdown(element: ElementRef<'_>) -> String {
    let mut text = render_children(element, "\n\n", 0);
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Elements nested deeper than this are rendered as plain text
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Ordered(usize),
}

fn is_skipped(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript" | "template" | "head")
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "header"
            | "footer"
            | "nav"
            | "aside"
            | "figure"
            | "figcaption"
            | "center"
            | "body"
            | "html"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "blockquote"
            | "pre"
            | "table"
            | "hr"
    )
}

/// Render a mix of inline and block children, joining blocks with `separator`
fn render_children(element: ElementRef<'_>, separator: &str, depth: usize) -> String {
    if depth > MAX_DEPTH {
        return normalize_inline(&flat_text(element));
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut inline = String::new();

    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(&mut inline, text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child.value().name();
                if is_skipped(name) {
                    continue;
                }
                if is_block(name) {
                    flush_inline(&mut inline, &mut blocks);
                    let block = render_block(child, depth + 1);
                    if !block.trim().is_empty() {
                        blocks.push(block);
                    }
                } else {
                    render_inline(child, &mut inline, depth + 1);
                }
            }
            _ => {}
        }
    }
    flush_inline(&mut inline, &mut blocks);

    blocks.join(separator)
}

fn render_block(element: ElementRef<'_>, depth: usize) -> String {
    let name = element.value().name();
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = usize::from(name.as_bytes()[1] - b'0');
            let title = inline_text(element, depth).replace('\n', " ");
            if title.is_empty() {
                String::new()
            } else {
                format!("{} {}", "#".repeat(level), title)
            }
        }
        "ul" => render_list(element, ListKind::Bullet, depth),
        "ol" => {
            let start = element
                .value()
                .attr("start")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(1);
            render_list(element, ListKind::Ordered(start), depth)
        }
        "blockquote" => render_children(element, "\n\n", depth)
            .lines()
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        "pre" => {
            let code: String = element.text().collect();
            format!("```\n{}\n```", code.trim_end_matches('\n'))
        }
        "table" => render_table(element, depth),
        "hr" => "* * *".to_string(),
        "li" => render_children(element, "\n", depth),
        _ => render_children(element, "\n\n", depth),
    }
}

fn render_list(element: ElementRef<'_>, kind: ListKind, depth: usize) -> String {
    if depth > MAX_DEPTH {
        return normalize_inline(&flat_text(element));
    }

    let mut items = Vec::new();
    let mut number = match kind {
        ListKind::Ordered(start) => start,
        ListKind::Bullet => 0,
    };

    for child in element.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "li" => {
                let marker = match kind {
                    ListKind::Bullet => "* ".to_string(),
                    ListKind::Ordered(_) => {
                        let marker = format!("{}. ", number);
                        number = number.saturating_add(1);
                        marker
                    }
                };
                let body = render_children(child, "\n", depth + 1);
                items.push(indent_continuation(&marker, &body));
            }
            // Lists nested directly in a list belong to the previous item
            "ul" | "ol" => {
                let nested = render_block(child, depth + 1);
                if !nested.is_empty() {
                    items.push(indent_continuation("  ", &nested));
                }
            }
            _ => {}
        }
    }

    items.join("\n")
}

/// Prefix the first line with `marker` and indent the rest to match
fn indent_continuation(marker: &str, body: &str) -> String {
    let pad = " ".repeat(marker.len());
    let mut out = String::new();
    for (i, line) in body.lines().enumerate() {
        if i == 0 {
            out.push_str(marker);
            out.push_str(line);
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
                out.push_str(line);
            }
        }
    }
    if out.is_empty() {
        out.push_str(marker.trim_end());
    }
    out
}

fn render_table(table: ElementRef<'_>, depth: usize) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    collect_rows(table, &mut rows, depth);
    if rows.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("| {} |", row.join(" | ")));
        if i == 0 {
            let rule = vec!["---"; row.len().max(1)].join(" | ");
            lines.push(format!("| {} |", rule));
        }
    }
    lines.join("\n")
}

fn collect_rows(element: ElementRef<'_>, rows: &mut Vec<Vec<String>>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }

    for child in element.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "thead" | "tbody" | "tfoot" => collect_rows(child, rows, depth + 1),
            "tr" => {
                let cells: Vec<String> = child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                    .map(|cell| {
                        inline_text(cell, depth + 2)
                            .replace('\n', " ")
                            .replace('|', "\\|")
                    })
                    .collect();
                if !cells.is_empty() {
                    rows.push(cells);
                }
            }
            _ => {}
        }
    }
}

/// All content of `element` rendered as one inline run
fn inline_text(element: ElementRef<'_>, depth: usize) -> String {
    normalize_inline(&inline_raw(element, depth))
}

/// Inline content with whitespace squeezed but edges kept
fn inline_raw(element: ElementRef<'_>, depth: usize) -> String {
    let mut raw = String::new();
    render_inline_children(element, &mut raw, depth);
    raw
}

fn render_inline_children(element: ElementRef<'_>, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str(&flat_text(element));
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_inline(child, out, depth + 1);
                }
            }
            _ => {}
        }
    }
}

fn render_inline(element: ElementRef<'_>, out: &mut String, depth: usize) {
    let name = element.value().name();
    if is_skipped(name) {
        return;
    }

    match name {
        "br" => out.push('\n'),
        "em" | "i" => wrap_inline(out, "_", &inline_raw(element, depth)),
        "strong" | "b" => wrap_inline(out, "**", &inline_raw(element, depth)),
        "code" | "tt" | "kbd" | "samp" => {
            let code: String = element.text().collect();
            let code = squeeze(&code);
            wrap_inline(out, "`", &code);
        }
        "a" => {
            let label = inline_text(element, depth);
            match element.value().attr("href") {
                Some(href) if !label.is_empty() => {
                    out.push_str(&format!("[{}]({})", label, href));
                }
                _ => out.push_str(&label),
            }
        }
        "img" => {
            if let Some(src) = element.value().attr("src") {
                let alt = element.value().attr("alt").unwrap_or_default();
                out.push_str(&format!("![{}]({})", squeeze(alt).trim(), src));
            }
        }
        _ => render_inline_children(element, out, depth),
    }
}

/// Text of a subtree too deep to render structurally, squeezed.
///
/// `ElementRef::text` walks the tree iteratively, so this is safe at any
/// depth.
fn flat_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for text in element.text() {
        push_text(&mut out, text);
    }
    out
}

/// Surround `content` with `marker`, keeping edge whitespace outside
fn wrap_inline(out: &mut String, marker: &str, content: &str) {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        out.push_str(content);
        return;
    }
    if content.starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(marker);
    out.push_str(trimmed);
    out.push_str(marker);
    if content.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn push_text(out: &mut String, text: &str) {
    out.push_str(&squeeze(text));
}

/// Collapse every whitespace run to a single space
fn squeeze(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Tidy an inline run: squeeze each line and drop its edge spaces
fn normalize_inline(raw: &str) -> String {
    raw.split('\n')
        .map(|line| squeeze(line).trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn flush_inline(inline: &mut String, blocks: &mut Vec<String>) {
    let text = normalize_inline(inline);
    if !text.is_empty() {
        blocks.push(text);
    }
    inline.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_paragraphs() {
        let md = html_to_markdown("<h2>History</h2><p>First  line\n of text.</p><p>Second.</p>");
        assert_eq!(md, "## History\n\nFirst line of text.\n\nSecond.\n");
    }

    #[test]
    fn test_emphasis_and_links() {
        let md = html_to_markdown(
            r#"<p>The <b>quick</b> <i>brown</i> fox reads <a href="/wiki/Fox">about foxes</a>.</p>"#,
        );
        assert_eq!(
            md,
            "The **quick** _brown_ fox reads [about foxes](/wiki/Fox).\n"
        );
    }

    #[test]
    fn test_emphasis_keeps_spaces_outside_markers() {
        let md = html_to_markdown("<p>a<b> bold </b>b</p>");
        assert_eq!(md, "a **bold** b\n");
    }

    #[test]
    fn test_lists_nest() {
        let md = html_to_markdown(
            "<ul><li>One</li><li>Two<ul><li>Inner</li></ul></li></ul>\
             <ol start=\"3\"><li>Third</li><li>Fourth</li></ol>",
        );
        assert_eq!(md, "* One\n* Two\n  * Inner\n\n3. Third\n4. Fourth\n");
    }

    #[test]
    fn test_scripts_and_styles_are_dropped() {
        let md = html_to_markdown(
            "<style>.x{color:red}</style><p>Visible</p><script>alert(1)</script>",
        );
        assert_eq!(md, "Visible\n");
    }

    #[test]
    fn test_code_and_pre() {
        let md = html_to_markdown("<p>Call <code>main()</code>.</p><pre>fn main() {\n    run();\n}\n</pre>");
        assert_eq!(
            md,
            "Call `main()`.\n\n```\nfn main() {\n    run();\n}\n```\n"
        );
    }

    #[test]
    fn test_blockquote_and_image() {
        let md = html_to_markdown(
            r#"<blockquote><p>Quoted</p><p>Twice</p></blockquote><p><img src="a.png" alt="An image"></p>"#,
        );
        assert_eq!(md, "> Quoted\n>\n> Twice\n\n![An image](a.png)\n");
    }

    #[test]
    fn test_table_rows() {
        let md = html_to_markdown(
            "<table><tr><th>Name</th><th>Value</th></tr><tr><td>a|b</td><td>1</td></tr></table>",
        );
        assert_eq!(md, "| Name | Value |\n| --- | --- |\n| a\\|b | 1 |\n");
    }

    #[test]
    fn test_line_breaks() {
        let md = html_to_markdown("<p>one<br>two</p>");
        assert_eq!(md, "one\ntwo\n");
    }

    #[test]
    fn test_deep_nesting_is_flattened() {
        let depth = 10_000;
        let html = format!(
            "{}<b>core</b> text{}",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        assert_eq!(html_to_markdown(&html), "core text\n");
    }

    #[test]
    fn test_deep_inline_nesting_is_flattened() {
        let depth = 10_000;
        let html = format!(
            "<p>{}deep{}</p>",
            "<span>".repeat(depth),
            "</span>".repeat(depth)
        );
        assert_eq!(html_to_markdown(&html), "deep\n");
    }

    #[test]
    fn test_ordered_list_start_saturates() {
        let md = html_to_markdown(&format!(
            "<ol start=\"{}\"><li>a</li><li>b</li></ol>",
            usize::MAX
        ));
        assert_eq!(md, format!("{max}. a\n{max}. b\n", max = usize::MAX));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(html_to_markdown(""), "");
        assert_eq!(html_to_markdown("<div>   </div>"), "");
    }
}
