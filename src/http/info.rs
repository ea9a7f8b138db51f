//! Informational page served for non-keyed GET requests.

use std::path::Path;

use bytes::Bytes;

const BUILTIN_PAGE: &str = include_str!("../../static/index.html");

/// HTML payload served verbatim.
#[derive(Debug, Clone)]
pub struct InfoPage {
    html: Bytes,
}

impl InfoPage {
    /// Read the page from `path`, falling back to the built-in page.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };

        match std::fs::read(path) {
            Ok(html) => {
                tracing::info!(path = %path.display(), bytes = html.len(), "Info page loaded");
                Self { html: Bytes::from(html) }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Info page unreadable, serving built-in page"
                );
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self { html: Bytes::from_static(BUILTIN_PAGE.as_bytes()) }
    }

    pub fn html(&self) -> &[u8] {
        &self.html
    }
}

impl Default for InfoPage {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn falls_back_to_builtin() {
        let page = InfoPage::load(Some(Path::new("/no/such/index.html")));
        assert_eq!(page.html(), BUILTIN_PAGE.as_bytes());
    }

    #[test]
    fn reads_custom_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<h1>custom</h1>").unwrap();
        let page = InfoPage::load(Some(file.path()));
        assert_eq!(page.html(), b"<h1>custom</h1>");
    }
}
