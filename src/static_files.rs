use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Static resources served from a public directory.
///
/// A directory request resolves to its `index.html`. Paths that would leave the
/// base directory are refused.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(url_path).ok()?;
        let mut pb = self.base_dir.clone();
        for comp in Path::new(decoded.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn content_type(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" | "mjs" => "application/javascript",
            "json" => "application/json",
            "txt" => "text/plain",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "ico" => "image/x-icon",
            "woff2" => "font/woff2",
            _ => "application/octet-stream",
        }
    }

    /// Read the resource at `url_path`, returning its bytes and content type.
    pub fn load(&self, url_path: &str) -> io::Result<(Vec<u8>, &'static str)> {
        let mut path = self
            .map_path(url_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "invalid path"))?;
        if path.is_dir() {
            path.push("index.html");
        }
        if !path.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        }
        let bytes = fs::read(&path)?;
        Ok((bytes, Self::content_type(&path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "Hello\n").unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();
        dir
    }

    #[test]
    fn map_path_prevents_traversal() {
        let sf = StaticFiles::new("public");
        assert!(sf.map_path("../Cargo.toml").is_none());
        assert!(sf.map_path("/a/../../Cargo.toml").is_none());
        assert!(sf.map_path("%2e%2e/Cargo.toml").is_none());
    }

    #[test]
    fn loads_plain_files() {
        let dir = public();
        let sf = StaticFiles::new(dir.path());
        let (bytes, ct) = sf.load("/hello.txt").unwrap();
        assert_eq!(ct, "text/plain");
        assert_eq!(bytes, b"Hello\n");
    }

    #[test]
    fn directories_resolve_to_index() {
        let dir = public();
        let sf = StaticFiles::new(dir.path());
        assert_eq!(sf.load("/").unwrap().0, b"<h1>home</h1>");
        assert_eq!(sf.load("/docs").unwrap().0, b"<h1>docs</h1>");
        assert_eq!(
            sf.load("/missing.txt").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
