//! HTML for the single chat page.

use pulldown_cmark::{html, Options, Parser};

use crate::export::ExportedFile;
use crate::session::History;

const STYLE: &str = include_str!("ui/style.css");

const INTRO: &str = "Ask anything related to **Basic Finance Concepts**, **Investment & Markets**, **Banking & Loans**, or **Financial Literacy & Personal Finance**.

**Example queries:**
- What is the difference between saving and investing?
- How does inflation affect purchasing power?
- Can you explain what an IPO is?
- What is a credit score and how is it calculated?";

const FOOTER: &str = "*Powered by Azure OpenAI. Data provided by Yahoo Finance and DuckDuckGo.*";

const PROGRESS_SCRIPT: &str = r#"<script>
  const progress = document.getElementById('progress');
  const bar = progress.querySelector('.bar');
  const events = new EventSource('/events');
  events.onmessage = (ev) => {
    const value = ev.data.replace('progress:', '');
    if (value === 'done') { progress.style.display = 'none'; return; }
    progress.style.display = 'block';
    bar.style.width = value + '%';
  };
</script>"#;

/// Markdown to HTML. Raw HTML in the source is passed through.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn open_page(out: &mut String) {
    out.push_str("<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\" />\n");
    out.push_str("<title>&#128202; Investment Analyst</title>\n<style>\n");
    out.push_str(STYLE);
    out.push_str("</style>\n</head>\n<body>\n");
    out.push_str("<div class=\"main-header\">&#128200; Finance Expert</div>\n");
}

fn close_page(out: &mut String) {
    out.push_str("<hr />\n<footer>");
    out.push_str(&markdown_to_html(FOOTER));
    out.push_str("</footer>\n</body>\n</html>\n");
}

/// The page for one session. `files` pairs with `history.display()`.
pub fn render_page(history: &History, files: &[ExportedFile]) -> String {
    let mut out = String::new();
    open_page(&mut out);
    out.push_str(&markdown_to_html(INTRO));

    out.push_str(concat!(
        "<div class=\"query-form\">\n",
        "<form id=\"ask\" method=\"post\" action=\"/query\" style=\"flex:4;display:flex\">\n",
        "<textarea name=\"query\" placeholder=\"e.g. What are the top 3 AI stocks to invest in?\" ",
        "aria-label=\"Your Query\"></textarea>\n",
        "</form>\n",
        "<div class=\"actions\">\n",
        "<button class=\"primary\" type=\"submit\" form=\"ask\">Get Insights</button>\n",
        "<form method=\"post\" action=\"/clear\"><button type=\"submit\">Clear</button></form>\n",
        "</div>\n</div>\n",
        "<div class=\"progress\" id=\"progress\"><div class=\"bar\"></div></div>\n",
    ));

    for (position, (entry, file)) in history.display().zip(files).enumerate() {
        out.push_str("<hr />\n");
        out.push_str(&format!(
            "<p><strong>Query ({}):</strong></p>\n<div class=\"info\">{}</div>\n",
            escape_html(&entry.timestamp),
            escape_html(&entry.query)
        ));
        out.push_str("<p><strong>Response:</strong></p>\n<div class=\"response-container\">\n");
        out.push_str(&markdown_to_html(&entry.response));
        out.push_str("</div>\n");
        out.push_str(&format!(
            "<p><a href=\"/download/{}\" download=\"{}\">Download this analysis</a></p>\n",
            position + 1,
            escape_html(&file.file_name)
        ));
    }

    out.push_str(PROGRESS_SCRIPT);
    close_page(&mut out);
    out
}

/// Generic failure page, the counterpart of a framework error display.
pub fn render_error(message: &str) -> String {
    let mut out = String::new();
    open_page(&mut out);
    out.push_str("<div class=\"error\">");
    out.push_str(&escape_html(message));
    out.push_str("</div>\n<p><a href=\"/\">Back</a></p>\n");
    close_page(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HistoryEntry;
    use std::path::PathBuf;

    fn entry(query: &str, response: &str) -> HistoryEntry {
        HistoryEntry {
            query: query.into(),
            response: response.into(),
            timestamp: "2025-01-02 03:04:05".into(),
        }
    }

    fn file(n: usize) -> ExportedFile {
        ExportedFile {
            file_name: format!("investment_analysis_{n}.md"),
            path: PathBuf::from(format!("investment_analysis_{n}.md")),
            bytes: Vec::new(),
        }
    }

    #[test]
    fn renders_markdown_tables() {
        let rendered = markdown_to_html("| Ticker | Price |\n|---|---|\n| AAPL | 227 |");
        assert!(rendered.contains("<table>"));
        assert!(rendered.contains("<td>AAPL</td>"));
    }

    #[test]
    fn escapes_user_query() {
        assert_eq!(escape_html("<b>\"x\" & 'y'</b>"), "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;");
    }

    #[test]
    fn page_shows_newest_entry_first() {
        let mut history = History::default();
        history.push(entry("A question", "answer **one**"));
        history.push(entry("B question", "answer **two**"));

        let page = render_page(&history, &[file(1), file(2)]);

        let b = page.find("B question").unwrap();
        let a = page.find("A question").unwrap();
        assert!(b < a);
        assert!(page.contains("<strong>two</strong>"));
        assert!(page.contains("href=\"/download/1\" download=\"investment_analysis_1.md\""));
        assert!(page.contains("Query (2025-01-02 03:04:05):"));
    }

    #[test]
    fn empty_history_renders_form_only() {
        let page = render_page(&History::default(), &[]);
        assert!(page.contains("Get Insights"));
        assert!(!page.contains("Download this analysis"));
    }

    #[test]
    fn error_page_escapes_message() {
        let page = render_error("language model error: <timeout>");
        assert!(page.contains("language model error: &lt;timeout&gt;"));
    }
}
