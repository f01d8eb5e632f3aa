//! HTML pages. Built once at startup and shared by every handler.

use pulldown_cmark::{Options, Parser, html};

/// Values shown on the page after an upload.
#[derive(Debug, Default)]
pub struct LinksContext<'a> {
    pub failed: Option<&'a str>,
    pub use_blobstore: bool,
    pub bf_name: Option<&'a str>,
    pub bf_url: Option<&'a str>,
    pub bzf_name: Option<&'a str>,
    pub bzf_url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Templates {
    title: String,
}

impl Templates {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Upload form, optionally followed by the rendered README.
    pub fn upload_form(&self, use_blobstore: bool, readme_html: Option<&str>) -> String {
        let checked = |flag: bool| if flag { " checked" } else { "" };
        let mut body = String::new();
        body.push_str(&format!("<h1>{}</h1>", html_escape(&self.title)));
        body.push_str(concat!(
            r#"<form action="/blob_upload" method="post" enctype="multipart/form-data">"#,
            r#"<p><input type="file" name="file"></p>"#,
        ));
        body.push_str(&format!(
            concat!(
                r#"<p>Serve files using the blobstore: "#,
                r#"<label><input type="radio" name="use_blobstore" value="T"{}> yes</label> "#,
                r#"<label><input type="radio" name="use_blobstore" value="F"{}> no</label></p>"#,
            ),
            checked(use_blobstore),
            checked(!use_blobstore)
        ));
        body.push_str(r#"<p><input type="submit" value="Upload"></p></form>"#);
        body.push_str(r#"<p><a href="/readme">README</a></p>"#);
        if let Some(readme) = readme_html {
            body.push_str(r#"<div class="readme">"#);
            body.push_str(readme);
            body.push_str("</div>");
        }
        self.page(&body)
    }

    /// Result page of an upload: the file and archive links, or why it failed.
    pub fn links(&self, ctx: &LinksContext<'_>) -> String {
        let mut body = String::new();
        match ctx.failed {
            Some(reason) => {
                body.push_str(&format!("<h3>Upload failed: {}</h3>", html_escape(reason)));
            }
            None => {
                body.push_str("<h3>Upload finished</h3><ul>");
                for (label, name, url) in [
                    ("File", ctx.bf_name, ctx.bf_url),
                    ("Archive", ctx.bzf_name, ctx.bzf_url),
                ] {
                    if let (Some(name), Some(url)) = (name, url) {
                        body.push_str(&format!(
                            r#"<li>{}: <a href="{}">{}</a></li>"#,
                            label,
                            html_escape(url),
                            html_escape(name)
                        ));
                    }
                }
                body.push_str("</ul>");
            }
        }
        body.push_str(&format!(
            r#"<p>Blobstore serving: {}</p><p><a href="/blob_upload">Upload another file</a></p>"#,
            if ctx.use_blobstore { "on" } else { "off" }
        ));
        self.page(&body)
    }

    /// Page holding a single message. `message` is escaped.
    pub fn message(&self, message: &str) -> String {
        self.page(&format!("<p>{}</p>", html_escape(message)))
    }

    /// Page shown after `e_mail` was granted read access; `link` opens the
    /// object in the storage console.
    pub fn acl_granted(&self, e_mail: &str, link: &str) -> String {
        let link = html_escape(link);
        self.page(&format!(
            "<p>TestAcl finished. Authenticated user : {} can now download the object using<br>\
             <br><a href=\"{}\">{}</a></p>",
            html_escape(e_mail),
            link,
            link
        ))
    }

    fn page(&self, body: &str) -> String {
        format!(
            concat!(
                "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
                "<title>{}</title></head><body>{}</body></html>"
            ),
            html_escape(&self.title),
            body
        )
    }
}

/// Markdown to HTML.
pub fn render_markdown(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(source, options);
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Escape text for use in HTML content and double-quoted attributes.
pub fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
