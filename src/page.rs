pub const INDEX_PAGE: &str = include_str!("../assets/index.html");

pub const UPLOAD_PAGE: &str = include_str!("../assets/upload.html");

const UPLOADED_PAGE: &str = include_str!("../assets/uploaded.html");

const LINK_MARKER: &str = "{{link}}";

fn escape_html(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => r.push_str("&amp;"),
            '<' => r.push_str("&lt;"),
            '>' => r.push_str("&gt;"),
            '"' => r.push_str("&quot;"),
            '\'' => r.push_str("&#39;"),
            c => r.push(c),
        }
    }
    r
}

/// Confirmation page for a completed upload, linking to `link` with the text `name`.
pub fn render_uploaded(link: &str, name: &str) -> String {
    let anchor = format!("<a href='{}'>{}</a>", escape_html(link), escape_html(name));
    UPLOADED_PAGE.replace(LINK_MARKER, &anchor)
}
